use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, TimeDelta};
use proptest::prelude::*;
use time_server::time_sync::{IpNet, drift_seconds, in_any, is_out_of_sync};

const SECS_RANGE: std::ops::Range<i64> = -10_000_000_000..10_000_000_000;

proptest! {
    #[test]
    fn drift_window_matches_offset(
        reference_secs in SECS_RANGE,
        offset_secs in -50_000i64..50_000,
        tolerance_hours in 0i64..12,
    ) {
        let reference = DateTime::from_timestamp(reference_secs, 0).unwrap();
        let sample = reference + TimeDelta::seconds(offset_secs);
        let expected = offset_secs.abs() > tolerance_hours * 3600;
        prop_assert_eq!(is_out_of_sync(sample, reference, tolerance_hours), expected);
        prop_assert_eq!(drift_seconds(sample, reference), offset_secs);
    }

    #[test]
    fn drift_is_symmetric(
        a in SECS_RANGE,
        b in SECS_RANGE,
        tolerance_hours in any::<i64>(),
    ) {
        let a = DateTime::from_timestamp(a, 0).unwrap();
        let b = DateTime::from_timestamp(b, 0).unwrap();
        prop_assert_eq!(
            is_out_of_sync(a, b, tolerance_hours),
            is_out_of_sync(b, a, tolerance_hours)
        );
    }

    #[test]
    fn host_network_contains_only_itself(a in any::<u32>(), b in any::<u32>()) {
        let host = IpAddr::V4(Ipv4Addr::from(a));
        let other = IpAddr::V4(Ipv4Addr::from(b));
        let net = IpNet::new(host, 32);
        prop_assert!(net.contains(&host));
        prop_assert_eq!(net.contains(&other), a == b);
    }

    #[test]
    fn default_route_contains_family(v4 in any::<u32>(), v6 in any::<u128>()) {
        let ranges = [
            IpNet::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpNet::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        ];
        prop_assert!(in_any(&ranges, &IpAddr::V4(Ipv4Addr::from(v4))));
        prop_assert!(in_any(&ranges, &IpAddr::V6(Ipv6Addr::from(v6))));
    }
}
