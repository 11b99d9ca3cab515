//! Parsing of the configuration distributed by the master node

use crate::error::{VStoreError, VStoreResult};
use crate::matching::MatchingMode;
use crate::nodes::{NodeInfo, NodeManager};
use crate::rules::{RuleManager, VStoreRule};
use serde_json::Value;
use tracing::{debug, warn};

/// What a configuration changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub nodes_added: usize,
    pub rules_stored: usize,
    pub rules_deleted: usize,
    pub matching_mode: MatchingMode,
}

pub struct ConfigParser<'a> {
    nodes: &'a NodeManager,
    rules: &'a RuleManager,
}

impl<'a> ConfigParser<'a> {
    pub fn new(nodes: &'a NodeManager, rules: &'a RuleManager) -> Self {
        Self { nodes, rules }
    }

    /// Apply a full configuration: nodes, rules and matching mode
    pub async fn parse_full_config(&self, json: &str) -> VStoreResult<ConfigUpdate> {
        let config: Value = serde_json::from_str(json)
            .map_err(|e| VStoreError::parse(format!("configuration: {e}")))?;
        if !config.is_object() {
            return Err(VStoreError::parse("configuration must be a JSON object"));
        }

        let nodes_added = self.apply_node_list(&config).await?;
        let (rules_stored, rules_deleted) = self.apply_rules(&config)?;
        let matching_mode = parse_matching_mode(&config);

        let update = ConfigUpdate {
            nodes_added,
            rules_stored,
            rules_deleted,
            matching_mode,
        };
        debug!(?update, "Configuration applied");
        Ok(update)
    }

    async fn apply_node_list(&self, config: &Value) -> VStoreResult<usize> {
        let Some(nodes) = parse_node_list(config) else {
            return Ok(0);
        };
        let mut added = 0;
        for node in nodes {
            let address = node.base_uri();
            match self.nodes.add_node(node).await {
                Ok(_) => added += 1,
                Err(e) => warn!(address = %address, error = %e, "Skipping node"),
            }
        }
        self.nodes.refresh_nodes()?;
        Ok(added)
    }

    fn apply_rules(&self, config: &Value) -> VStoreResult<(usize, usize)> {
        let Some(rules) = config.get("rules").and_then(Value::as_array) else {
            return Ok((0, 0));
        };
        let (mut stored, mut deleted) = (0, 0);
        for entry in rules {
            let delete = entry.get("delete").and_then(Value::as_bool).unwrap_or(false);
            if delete {
                if let Some(uuid) = entry.get("uuid").and_then(Value::as_str) {
                    if self.rules.delete_rule(uuid)? {
                        deleted += 1;
                    }
                }
                continue;
            }
            match VStoreRule::from_value(entry) {
                Ok(rule) => {
                    self.rules.store_rule(&rule)?;
                    stored += 1;
                }
                Err(e) => warn!(error = %e, "Skipping invalid rule"),
            }
        }
        Ok((stored, deleted))
    }
}

/// Nodes of a `{"nodes": [...]}` object. Entries missing required keys are skipped.
pub fn parse_node_list(config: &Value) -> Option<Vec<NodeInfo>> {
    let entries = config.get("nodes")?.as_array()?;
    let nodes = entries
        .iter()
        .filter_map(|entry| match NodeInfo::from_master_value(entry) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!(error = %e, "Skipping invalid node entry");
                None
            }
        })
        .collect();
    Some(nodes)
}

/// Missing or unknown modes give the default mode
pub fn parse_matching_mode(config: &Value) -> MatchingMode {
    config
        .get("matchingMode")
        .and_then(Value::as_str)
        .map(MatchingMode::parse)
        .unwrap_or_default()
}
