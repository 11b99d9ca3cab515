//! Rule-less node selection based on the file's context

use crate::context::util::distance_between;
use crate::context::{ContextDescription, LatLng, PlaceType, SinglePlace};
use crate::files::VStoreFile;
use crate::nodes::{HierarchyMode, NodeInfo, NodeManager, NodeType};

const PLACE_THRESHOLD_START: f64 = 0.3;
const PLACE_THRESHOLD_STEP: f64 = 0.02;
const PLACE_THRESHOLD_LOWEST: f64 = 0.05;

/// Among the N nearest edge nodes one is picked at random
const EDGE_RANDOM_FACTOR: usize = 2;

const PRIVATE_HIERARCHY: [NodeType; 3] = [NodeType::PrivateNode, NodeType::Corenet, NodeType::Cloud];
const BACKBONE_HIERARCHY: [NodeType; 2] = [NodeType::Corenet, NodeType::Cloud];
const EDGE_TYPES: [NodeType; 2] = [NodeType::Cloudlet, NodeType::Gateway];
const POI_HIERARCHY: [NodeType; 4] = [
    NodeType::Corenet,
    NodeType::Cloudlet,
    NodeType::Gateway,
    NodeType::Cloud,
];

/// Pick a node for a file when no rule decided
pub fn fallback_node(file: &VStoreFile, nodes: &NodeManager) -> Option<NodeInfo> {
    if nodes.node_count() == 0 {
        return None;
    }
    let empty = ContextDescription::default();
    let ctx = file.context.as_ref().unwrap_or(&empty);
    let location = ctx.location.as_ref().map(|l| l.latlng);

    if file.is_private {
        return follow(nodes, &PRIVATE_HIERARCHY, location.as_ref());
    }

    if ctx.has_activity_context() {
        return follow(nodes, &BACKBONE_HIERARCHY, location.as_ref());
    }

    match choose_place(ctx).map(|p| p.place_type) {
        Some(PlaceType::Event) => {
            let loud = ctx.noise.as_ref().is_some_and(|n| !n.is_silent());
            match (loud, location.as_ref()) {
                (true, Some(loc)) => {
                    return nodes
                        .nearest_node_of_types(&EDGE_TYPES, loc, EDGE_RANDOM_FACTOR)
                        .or_else(|| nodes.nearest_node_of_type(NodeType::Corenet, loc))
                        .or_else(|| nodes.nearest_node_of_type(NodeType::Cloud, loc));
                }
                (true, None) => return nodes.random_node_of_types(&EDGE_TYPES),
                (false, Some(loc)) => {
                    return nodes.node_following_hierarchy(&BACKBONE_HIERARCHY, HierarchyMode::Nearest, Some(loc))
                }
                (false, None) => return nodes.random_node_of_types(&BACKBONE_HIERARCHY),
            }
        }
        Some(PlaceType::Poi) => return follow(nodes, &POI_HIERARCHY, location.as_ref()),
        _ => {}
    }

    location
        .as_ref()
        .and_then(|loc| nodes.node_following_hierarchy(&BACKBONE_HIERARCHY, HierarchyMode::Nearest, Some(loc)))
        .or_else(|| nodes.random_node_of_types(&EDGE_TYPES))
}

/// Nearest along the hierarchy when located, random otherwise
fn follow(nodes: &NodeManager, hierarchy: &[NodeType], location: Option<&LatLng>) -> Option<NodeInfo> {
    match location {
        Some(loc) => nodes.node_following_hierarchy(hierarchy, HierarchyMode::Nearest, Some(loc)),
        None => nodes.node_following_hierarchy(hierarchy, HierarchyMode::Random, None),
    }
}

/// The place the device is most probably at.
///
/// The likelihood threshold is lowered until at least one place qualifies.
/// Several candidates are narrowed to the closest one, or the most likely one
/// when the device location is unknown.
pub fn choose_place(ctx: &ContextDescription) -> Option<&SinglePlace> {
    let places = ctx.places.as_ref().filter(|p| !p.is_empty())?;

    let mut threshold = PLACE_THRESHOLD_START;
    let mut candidates = Vec::new();
    while candidates.is_empty() && threshold > PLACE_THRESHOLD_LOWEST {
        candidates = places.filter_places(threshold);
        threshold -= PLACE_THRESHOLD_STEP;
    }

    let (first, rest) = candidates.split_first()?;
    let chosen = match ctx.location.as_ref() {
        Some(loc) => rest.iter().fold(*first, |best, p| {
            if distance_between(&loc.latlng, &p.latlng) < distance_between(&loc.latlng, &best.latlng) {
                *p
            } else {
                best
            }
        }),
        None => rest
            .iter()
            .fold(*first, |best, p| if p.likelihood > best.likelihood { *p } else { best }),
    };
    Some(chosen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Activity, ActivityType, Location, Noise};
    use crate::storage::Database;
    use std::path::Path;

    const DARMSTADT: LatLng = LatLng { lat: 49.877684, lng: 8.654256 };

    fn manager(nodes: &[(&str, NodeType, f64)]) -> NodeManager {
        let m = NodeManager::new(Database::temporary().unwrap(), reqwest::Client::new()).unwrap();
        for (id, t, lat) in nodes {
            m.insert_node(NodeInfo::new(*id, "127.0.0.1", 80, *t, Some(LatLng::new(*lat, 8.654256)), 0, 0))
                .unwrap();
        }
        m
    }

    fn full() -> NodeManager {
        manager(&[
            ("private", NodeType::PrivateNode, 50.5),
            ("corenet", NodeType::Corenet, 49.97),
            ("cloud", NodeType::Cloud, 50.87),
            ("cloudlet", NodeType::Cloudlet, 49.88),
        ])
    }

    fn file(private: bool, ctx: Option<ContextDescription>) -> VStoreFile {
        let mut f = VStoreFile::new("f", Path::new("/tmp"), "f", "image/png", "png", 1, private);
        f.context = ctx;
        f
    }

    fn located() -> ContextDescription {
        ContextDescription::with_location(Location::new(DARMSTADT, 1.0, 0, ""))
    }

    // ========== Heuristic ==========

    #[test]
    fn test_no_nodes() {
        assert!(fallback_node(&file(false, None), &manager(&[])).is_none());
    }

    #[test]
    fn test_private_files_prefer_private_nodes() {
        let n = fallback_node(&file(true, Some(located())), &full()).unwrap();
        assert_eq!(n.uuid, "private");
        let n = fallback_node(&file(true, None), &full()).unwrap();
        assert_eq!(n.uuid, "private");
    }

    #[test]
    fn test_activity_goes_to_backbone() {
        let mut ctx = located();
        ctx.activity = Some(Activity::new(ActivityType::InVehicle, 80, 0));
        assert_eq!(fallback_node(&file(false, Some(ctx)), &full()).unwrap().uuid, "corenet");
    }

    #[test]
    fn test_loud_event_goes_to_edge() {
        let mut ctx = located();
        ctx.put_place(SinglePlace::new("concert", DARMSTADT, PlaceType::Event, 0.9));
        ctx.noise = Some(Noise::with_default_thresholds(-5.0, 5000.0));
        assert_eq!(fallback_node(&file(false, Some(ctx.clone())), &full()).unwrap().uuid, "cloudlet");

        ctx.noise = Some(Noise::with_default_thresholds(-60.0, 1.0));
        assert_eq!(fallback_node(&file(false, Some(ctx)), &full()).unwrap().uuid, "corenet");
    }

    #[test]
    fn test_default_without_location_uses_edge() {
        let m = manager(&[("cloud", NodeType::Cloud, 50.0), ("gw", NodeType::Gateway, 49.0)]);
        assert_eq!(fallback_node(&file(false, None), &m).unwrap().uuid, "gw");
        assert_eq!(fallback_node(&file(false, Some(located())), &m).unwrap().uuid, "cloud");
    }

    // ========== Place choice ==========

    #[test]
    fn test_threshold_is_lowered_until_a_place_qualifies() {
        let mut ctx = ContextDescription::new();
        ctx.put_place(SinglePlace::new("a", DARMSTADT, PlaceType::Poi, 0.1));
        ctx.put_place(SinglePlace::new("b", DARMSTADT, PlaceType::Event, 0.2));
        // the threshold stops at 0.2 where only "b" qualifies
        assert_eq!(choose_place(&ctx).unwrap().name, "b");

        let mut faint = ContextDescription::new();
        faint.put_place(SinglePlace::new("c", DARMSTADT, PlaceType::Poi, 0.04));
        assert!(choose_place(&faint).is_none());
    }

    #[test]
    fn test_closest_place_when_located() {
        let mut ctx = located();
        ctx.put_place(SinglePlace::new("far", LatLng::new(50.0, 8.65), PlaceType::Event, 0.5));
        ctx.put_place(SinglePlace::new("near", LatLng::new(49.878, 8.654), PlaceType::Poi, 0.4));
        assert_eq!(choose_place(&ctx).unwrap().name, "near");
    }
}
