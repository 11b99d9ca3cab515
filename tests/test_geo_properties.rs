//! Property tests for the geo helpers, node ordering and rule scoring

use proptest::prelude::*;
use vstore::context::util::{distance_between, is_included_in_sharing_domain, map_to_range};
use vstore::context::LatLng;
use vstore::nodes::NodeDistanceMetric;
use vstore::{NodeInfo, NodeType, VStoreRule};

fn lat() -> impl Strategy<Value = f64> {
    -89.0f64..89.0
}

fn lng() -> impl Strategy<Value = f64> {
    -179.0f64..179.0
}

fn node_type() -> impl Strategy<Value = NodeType> {
    prop::sample::select(vec![
        NodeType::Cloud,
        NodeType::Corenet,
        NodeType::Cloudlet,
        NodeType::Gateway,
        NodeType::Owncloud,
        NodeType::PrivateNode,
    ])
}

proptest! {
    #[test]
    fn distance_is_symmetric(a_lat in lat(), a_lng in lng(), b_lat in lat(), b_lng in lng()) {
        let a = LatLng::new(a_lat, a_lng);
        let b = LatLng::new(b_lat, b_lng);
        let ab = distance_between(&a, &b);
        let ba = distance_between(&b, &a);
        prop_assert!(ab.is_finite());
        prop_assert!(ab >= 0.0);
        prop_assert!((ab - ba).abs() <= ab.max(1.0) * 1e-4, "{} != {}", ab, ba);
    }

    #[test]
    fn same_point_matches_itself(a_lat in lat(), a_lng in lng()) {
        let a = LatLng::new(a_lat, a_lng);
        prop_assert!(distance_between(&a, &a) < 1.0);
        prop_assert!(a.matches(&a));
    }

    #[test]
    fn distance_is_bounded_by_half_circumference(a_lat in lat(), a_lng in lng(), b_lat in lat(), b_lng in lng()) {
        let d = distance_between(&LatLng::new(a_lat, a_lng), &LatLng::new(b_lat, b_lng));
        prop_assert!(d <= 20_100_000.0, "distance {} exceeds half the earth", d);
    }

    #[test]
    fn map_to_range_keeps_endpoints(from_min in -1000.0f32..0.0, span in 1.0f32..1000.0, to_min in -100.0f32..100.0, to_max in -100.0f32..100.0) {
        let from_max = from_min + span;
        prop_assert!((map_to_range(from_min, from_min, from_max, to_min, to_max) - to_min).abs() < 1e-2);
        prop_assert!((map_to_range(from_max, from_min, from_max, to_min, to_max) - to_max).abs() < 1e-2);
    }

    #[test]
    fn metric_sort_is_descending_and_complete(types in prop::collection::vec(node_type(), 0..20)) {
        let nodes: Vec<NodeInfo> = types
            .iter()
            .enumerate()
            .map(|(i, t)| NodeInfo::new(format!("n{i}"), "http://h".to_string(), 1, *t, None, 0, 0))
            .collect();
        let sorted = NodeDistanceMetric::sort_nodes_by_metric(nodes.clone());
        prop_assert_eq!(sorted.len(), nodes.len());
        for pair in sorted.windows(2) {
            prop_assert!(NodeDistanceMetric::metric(&pair[0]) >= NodeDistanceMetric::metric(&pair[1]));
        }
    }

    #[test]
    fn fewer_weekdays_score_higher(days in prop::collection::btree_set(1i32..=7, 2..=7)) {
        let mut wide = VStoreRule::new("wide");
        wide.weekdays = days.iter().copied().collect();
        wide.set_time_start(8, 0);
        wide.set_time_end(18, 0);
        let mut narrow = wide.clone();
        narrow.weekdays.truncate(1);
        prop_assert!(narrow.detail_score() > wide.detail_score());
    }

    #[test]
    fn open_sharing_domain_includes_everything(file_domain in -5i32..5) {
        prop_assert!(is_included_in_sharing_domain(file_domain, -1));
    }
}
