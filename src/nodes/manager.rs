//! Known storage nodes and node selection strategies

use super::node::{NodeInfo, NodeType};
use crate::communication::http::{expect_status, json_body};
use crate::context::util::distance_between;
use crate::context::LatLng;
use crate::error::{VStoreError, VStoreResult};
use crate::storage::Database;
use parking_lot::RwLock;
use rand::seq::IndexedRandom;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// How [`NodeManager::node_following_hierarchy`] picks within a type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyMode {
    Random,
    Nearest,
}

type NodeMap = HashMap<NodeType, BTreeMap<String, NodeInfo>>;

/// In-memory view of the node table, grouped by node type
pub struct NodeManager {
    nodes: RwLock<NodeMap>,
    db: Database,
    identifier_client: reqwest::Client,
}

impl NodeManager {
    /// Create the manager and load the persisted nodes
    pub fn new(db: Database, identifier_client: reqwest::Client) -> VStoreResult<Self> {
        let manager = Self {
            nodes: RwLock::new(HashMap::new()),
            db,
            identifier_client,
        };
        manager.refresh_nodes()?;
        Ok(manager)
    }

    /// Reload all nodes from the database
    pub fn refresh_nodes(&self) -> VStoreResult<()> {
        let stored = self.db.nodes()?;
        let mut map: NodeMap = HashMap::new();
        for node in stored {
            map.entry(node.node_type)
                .or_default()
                .insert(node.uuid.clone(), node);
        }
        *self.nodes.write() = map;
        debug!(count = self.node_count(), "Node table loaded");
        Ok(())
    }

    /// Add or replace a node. Nodes without identifier or with unknown type are
    /// asked for both via `GET /uuid` first.
    pub async fn add_node(&self, mut node: NodeInfo) -> VStoreResult<NodeInfo> {
        if node.uuid.is_empty() || node.node_type == NodeType::Unknown {
            let (uuid, node_type) = self.fetch_node_identifier(&node).await?;
            info!(node_id = %uuid, node_type = %node_type, address = %node.address, "Node identified");
            node.uuid = uuid;
            node.node_type = node_type;
        }
        self.insert_node(node.clone())?;
        Ok(node)
    }

    /// Insert or replace a node whose identifier and type are known
    pub fn insert_node(&self, node: NodeInfo) -> VStoreResult<()> {
        if node.uuid.is_empty() {
            return Err(VStoreError::missing_parameters());
        }
        self.db.insert_node(&node)?;
        let mut nodes = self.nodes.write();
        for by_type in nodes.values_mut() {
            by_type.remove(&node.uuid);
        }
        nodes
            .entry(node.node_type)
            .or_default()
            .insert(node.uuid.clone(), node);
        Ok(())
    }

    async fn fetch_node_identifier(&self, node: &NodeInfo) -> VStoreResult<(String, NodeType)> {
        let url = node.uuid_uri();
        let response = self
            .identifier_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        expect_status(&response, StatusCode::OK)?;
        let reply = json_body(response).await?;
        let uuid = reply
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| VStoreError::parse(format!("{url} replied without uuid")))?;
        let node_type = reply
            .get("type")
            .and_then(Value::as_str)
            .map(NodeType::parse)
            .unwrap_or(NodeType::Unknown);
        Ok((uuid.to_string(), node_type))
    }

    pub fn get_node(&self, uuid: &str) -> Option<NodeInfo> {
        self.nodes
            .read()
            .values()
            .find_map(|by_type| by_type.get(uuid).cloned())
    }

    pub fn node_list(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read();
        let mut list: Vec<NodeInfo> = nodes.values().flat_map(|m| m.values().cloned()).collect();
        list.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        list
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().values().map(BTreeMap::len).sum()
    }

    pub fn delete_node(&self, uuid: &str) -> VStoreResult<bool> {
        let removed = self.db.delete_node(uuid)?;
        let mut nodes = self.nodes.write();
        let in_memory = nodes
            .values_mut()
            .any(|by_type| by_type.remove(uuid).is_some());
        Ok(removed || in_memory)
    }

    /// Replace a known node. Unknown nodes are ignored.
    pub fn update_node(&self, node: NodeInfo) -> VStoreResult<bool> {
        if self.get_node(&node.uuid).is_none() {
            warn!(node_id = %node.uuid, "Ignoring update for unknown node");
            return Ok(false);
        }
        self.insert_node(node)?;
        Ok(true)
    }

    pub fn clear_nodes(&self) -> VStoreResult<()> {
        self.db.clear_nodes()?;
        self.nodes.write().clear();
        Ok(())
    }

    // ---- lookups by type ----

    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<NodeInfo> {
        self.nodes
            .read()
            .get(&node_type)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn nodes_of_types(&self, types: &[NodeType]) -> Vec<NodeInfo> {
        types.iter().flat_map(|t| self.nodes_of_type(*t)).collect()
    }

    pub fn first_node_of_type(&self, node_type: NodeType) -> Option<NodeInfo> {
        self.nodes
            .read()
            .get(&node_type)
            .and_then(|m| m.values().next().cloned())
    }

    pub fn nearest_node_of_type(&self, node_type: NodeType, location: &LatLng) -> Option<NodeInfo> {
        Self::nearest_node_from_list(&self.nodes_of_type(node_type), Some(location))
    }

    /// Up to `n` nodes of a type, nearest first
    pub fn n_nearest_nodes_of_type(
        &self,
        node_type: NodeType,
        location: &LatLng,
        n: usize,
    ) -> Vec<NodeInfo> {
        let mut nodes = self.nodes_of_type(node_type);
        nodes.sort_by(|a, b| {
            node_distance_m(a, location).total_cmp(&node_distance_m(b, location))
        });
        nodes.truncate(n);
        nodes
    }

    /// With `random_factor` 0 the nearest node across all `types`. Otherwise a
    /// random node among the `random_factor` nearest of each type.
    pub fn nearest_node_of_types(
        &self,
        types: &[NodeType],
        location: &LatLng,
        random_factor: usize,
    ) -> Option<NodeInfo> {
        if random_factor == 0 {
            let candidates: Vec<NodeInfo> = types
                .iter()
                .filter_map(|t| self.nearest_node_of_type(*t, location))
                .collect();
            return Self::nearest_node_from_list(&candidates, Some(location));
        }
        let candidates: Vec<NodeInfo> = types
            .iter()
            .flat_map(|t| self.n_nearest_nodes_of_type(*t, location, random_factor))
            .collect();
        Self::random_node_from_list(&candidates)
    }

    pub fn random_node_of_types(&self, types: &[NodeType]) -> Option<NodeInfo> {
        Self::random_node_from_list(&self.nodes_of_types(types))
    }

    pub fn random_node_from_list(nodes: &[NodeInfo]) -> Option<NodeInfo> {
        nodes.choose(&mut rand::rng()).cloned()
    }

    /// Nearest node of the list. Without a location the first node.
    pub fn nearest_node_from_list(nodes: &[NodeInfo], location: Option<&LatLng>) -> Option<NodeInfo> {
        let location = match location {
            Some(l) => l,
            None => return nodes.first().cloned(),
        };
        nodes
            .iter()
            .min_by(|a, b| node_distance_m(a, location).total_cmp(&node_distance_m(b, location)))
            .cloned()
    }

    pub fn random_node(&self) -> Option<NodeInfo> {
        Self::random_node_from_list(&self.node_list())
    }

    /// First type of `hierarchy` that yields a node. Nearest mode needs a location.
    pub fn node_following_hierarchy(
        &self,
        hierarchy: &[NodeType],
        mode: HierarchyMode,
        location: Option<&LatLng>,
    ) -> Option<NodeInfo> {
        if mode == HierarchyMode::Nearest && location.is_none() {
            return None;
        }
        hierarchy.iter().find_map(|t| match (mode, location) {
            (HierarchyMode::Nearest, Some(loc)) => self.nearest_node_of_type(*t, loc),
            _ => self.random_node_of_types(&[*t]),
        })
    }

    // ---- constraint based selection ----

    /// Nodes of a type meeting the bandwidth minimums (0 = unconstrained) and,
    /// when a valid km range and location are given, lying within that range
    pub fn nodes_matching_bandwidth_and_radius(
        &self,
        node_type: NodeType,
        bw_up: i32,
        bw_down: i32,
        min_radius: f32,
        max_radius: f32,
        location: Option<&LatLng>,
    ) -> Vec<NodeInfo> {
        let found = self.nodes_of_type(node_type).into_iter().filter(|n| {
            (bw_up == 0 || n.bandwidth_up >= bw_up) && (bw_down == 0 || n.bandwidth_down >= bw_down)
        });
        match location {
            Some(loc) if min_radius >= 0.0 && max_radius > 0.0 && max_radius > min_radius => found
                .filter(|n| {
                    let d = n.distance_to_km(Some(loc));
                    d >= min_radius && d <= max_radius
                })
                .collect(),
            _ => found.collect(),
        }
    }

    pub fn random_node_of_type_matching_bandwidth(
        &self,
        node_type: NodeType,
        bw_up: i32,
        bw_down: i32,
        min_radius: f32,
        max_radius: f32,
        location: Option<&LatLng>,
    ) -> Option<NodeInfo> {
        Self::random_node_from_list(&self.nodes_matching_bandwidth_and_radius(
            node_type, bw_up, bw_down, min_radius, max_radius, location,
        ))
    }

    /// Like [`Self::random_node_of_type_matching_bandwidth`] across every node type
    pub fn random_node_matching_bandwidth_and_radius(
        &self,
        bw_up: i32,
        bw_down: i32,
        min_radius: f32,
        max_radius: f32,
        location: Option<&LatLng>,
    ) -> Option<NodeInfo> {
        let candidates: Vec<NodeInfo> = NodeType::ALL
            .iter()
            .flat_map(|t| {
                self.nodes_matching_bandwidth_and_radius(*t, bw_up, bw_down, min_radius, max_radius, location)
            })
            .collect();
        Self::random_node_from_list(&candidates)
    }

    /// Random node of `types` within `radius` km. The radius grows by `multiplier`
    /// until something is found or `max` is reached. If nothing is found, a random
    /// node of the `fallback` type is returned.
    pub fn random_node_within_radius(
        &self,
        types: &[NodeType],
        location: &LatLng,
        radius: f32,
        max: f32,
        multiplier: f32,
        fallback: Option<NodeType>,
    ) -> Option<NodeInfo> {
        let nodes = self.nodes_of_types(types);
        if nodes.is_empty() {
            return None;
        }
        let mut radius = radius;
        loop {
            let within: Vec<NodeInfo> = nodes
                .iter()
                .filter(|n| n.distance_to_km(Some(location)) <= radius)
                .cloned()
                .collect();
            if !within.is_empty() {
                return Self::random_node_from_list(&within);
            }
            // a multiplier <= 1 would never reach max
            if radius < max && max > 0.0 && multiplier > 1.0 && radius > 0.0 {
                radius *= multiplier;
            } else {
                break;
            }
        }
        fallback.and_then(|t| self.random_node_of_types(&[t]))
    }

    /// Nodes of a type able to receive `file_size` bytes within `seconds`
    pub fn nodes_by_upload_time(&self, node_type: NodeType, file_size: u64, seconds: u32) -> Vec<NodeInfo> {
        self.nodes_of_type(node_type)
            .into_iter()
            .filter(|n| upload_seconds(file_size, n.bandwidth_up).ceil() <= seconds as f32)
            .collect()
    }

    pub fn all_nodes_by_upload_time(&self, file_size: u64, seconds: u32) -> Vec<NodeInfo> {
        NodeType::ALL
            .iter()
            .flat_map(|t| self.nodes_by_upload_time(*t, file_size, seconds))
            .collect()
    }
}

fn node_distance_m(node: &NodeInfo, location: &LatLng) -> f32 {
    node.latlng
        .as_ref()
        .map(|l| distance_between(l, location))
        .unwrap_or(f32::MAX)
}

/// Upload duration in seconds for a bandwidth in Mbit/s
fn upload_seconds(file_size: u64, bandwidth_up: i32) -> f32 {
    if bandwidth_up <= 0 {
        return f32::INFINITY;
    }
    (file_size as f32 / (1024.0 * 1024.0)) / (bandwidth_up as f32 / 8.0)
}
