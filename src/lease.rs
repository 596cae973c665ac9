// src/lease.rs
//
// =============================================================================
// SHORTLIST: LEASE CLOCK (v 0.1)
// =============================================================================
//
// Pure timestamp arithmetic, always UTC. The only failure mode in this
// subsystem is wall-clock skew between nodes; the grace period given to
// `is_expired` must exceed the worst-case skew the deployment tolerates.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero())
}

/// `now + duration`, as an ISO-8601 UTC timestamp.
pub fn new_lease(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now + to_chrono(duration)
}

/// True iff `now + grace >= lease`.
pub fn is_expired(lease: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    now + to_chrono(grace) >= lease
}

/// True iff `now > lease` — an assignment eligible for takeover.
pub fn is_orphan(lease: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > lease
}

/// `lease - renewal_threshold - now`, clamped to >= 0.
pub fn sleep_until_renewal(lease: DateTime<Utc>, now: DateTime<Utc>, renewal_threshold: Duration) -> Duration {
    let target = lease - to_chrono(renewal_threshold);
    let delta = target - now;
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lease_adds_duration() {
        let now = Utc::now();
        let lease = new_lease(now, Duration::from_secs(300));
        assert_eq!(lease, now + ChronoDuration::seconds(300));
    }

    #[test]
    fn expired_within_grace() {
        let now = Utc::now();
        let lease = now + ChronoDuration::seconds(10);
        assert!(!is_expired(lease, now, Duration::from_secs(5)));
        assert!(is_expired(lease, now, Duration::from_secs(15)));
    }

    #[test]
    fn orphan_strictly_past() {
        let now = Utc::now();
        assert!(!is_orphan(now + ChronoDuration::seconds(1), now));
        assert!(is_orphan(now - ChronoDuration::seconds(1), now));
    }

    #[test]
    fn sleep_until_renewal_clamps_to_zero() {
        let now = Utc::now();
        let lease = now + ChronoDuration::seconds(30);
        let sleep = sleep_until_renewal(lease, now, Duration::from_secs(60));
        assert_eq!(sleep, Duration::ZERO);
    }
}
