use crate::stealing::data::WorkerCore;
use crate::stealing::request::StealRequest;

/// Cheap random draws before falling back to the exact selection.
const RANDOM_ATTEMPTS: usize = 3;

/// Pick the worker a request held by `d` travels to next.
///
/// Order of precedence: force the request home once it has exhausted its
/// hops, then the last-victim locality hint, then random selection over the
/// unvisited workers. When nothing is viable the request goes home.
pub(crate) fn next_victim(
    d: &WorkerCore,
    req: &StealRequest,
    num_workers: usize,
    use_last_victim: bool,
) -> usize {
    debug_assert!(num_workers > 1, "victim selection needs a peer to pick");
    debug_assert!(
        (req.attempt == 0 && req.origin == d.num_thread)
            || (req.attempt > 0 && req.origin != d.num_thread),
        "a forwarded request always carries a foreign origin"
    );

    let victim = if req.attempt as usize == num_workers - 1 {
        // Max steal attempts reached, return the request to its origin.
        Some(req.origin)
    } else if use_last_victim && let Some(last) = d.last_victim() {
        Some(last)
    } else {
        random_victim(req, num_workers)
    };

    // No viable victim left: send the request home.
    let victim = victim.unwrap_or(req.origin);

    debug_assert!(victim < num_workers);
    debug_assert_ne!(
        victim, d.num_thread,
        "the current holder marked itself visited before selecting"
    );

    victim
}

/// Random selection over workers the request has not visited yet.
///
/// A few uniform draws over the whole range are almost always enough; only
/// when they all collide does this pay for the exact draw, one uniform
/// number indexed through the unvisited bits.
pub(super) fn random_victim(req: &StealRequest, num_workers: usize) -> Option<usize> {
    for _ in 0..RANDOM_ATTEMPTS {
        let candidate = fastrand::usize(..num_workers);
        if candidate != req.origin && !req.visited.test(candidate) {
            return Some(candidate);
        }
    }

    let unvisited = num_workers - req.visited.count();
    if unvisited == 0 {
        return None;
    }

    let pick = fastrand::usize(..unvisited);
    req.visited.unset_iter().nth(pick)
}
