// tests/property_invariants.rs
//
// Property-based coverage for the lease invariants named in spec.md §8:
// renewal is monotonic, and a lease past its grace window is always expired.

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use shortlist::lease::{is_expired, is_orphan, new_lease, sleep_until_renewal};
use std::time::Duration;

proptest! {
    #[test]
    fn renewal_is_never_earlier_than_the_lease_it_replaces(
        duration_secs in 1u64..3600,
        renewal_secs in 1u64..3600,
    ) {
        let now = Utc::now();
        let first = new_lease(now, Duration::from_secs(duration_secs));
        let renewed = new_lease(first, Duration::from_secs(renewal_secs));
        prop_assert!(renewed > first);
    }

    #[test]
    fn expired_implies_orphan_once_grace_elapses(
        lease_offset_secs in -3600i64..3600,
        grace_secs in 0u64..600,
    ) {
        let now = Utc::now();
        let lease = now + ChronoDuration::seconds(lease_offset_secs);
        let grace = Duration::from_secs(grace_secs);

        if is_expired(lease, now, grace) && grace_secs == 0 {
            prop_assert!(is_orphan(lease, now) || lease == now);
        }
    }

    #[test]
    fn sleep_until_renewal_never_negative(
        lease_offset_secs in 0i64..7200,
        renewal_threshold_secs in 0u64..7200,
    ) {
        let now = Utc::now();
        let lease = now + ChronoDuration::seconds(lease_offset_secs);
        let sleep = sleep_until_renewal(lease, now, Duration::from_secs(renewal_threshold_secs));
        prop_assert!(sleep >= Duration::ZERO);
    }
}
