//! Runtime configuration and its download from the master node

use super::parser::{parse_node_list, ConfigParser, ConfigUpdate};
use crate::communication::http::{json_body, HttpClients};
use crate::communication::master::{master_route, ROUTE_CONFIGURATION, ROUTE_NODES};
use crate::config::VStoreConfig;
use crate::error::{ErrorCode, VStoreError, VStoreResult};
use crate::events::{EventBus, VStoreEvent};
use crate::matching::MatchingMode;
use crate::nodes::{NodeInfo, NodeManager};
use crate::rules::RuleManager;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
struct Settings {
    matching_mode: MatchingMode,
    multiple_nodes_per_rule: bool,
    rms_threshold: i32,
    db_threshold: i32,
}

/// Matching settings and noise thresholds, refreshed from the master node
#[derive(Clone)]
pub struct ConfigManager {
    settings: Arc<RwLock<Settings>>,
    master_url: Url,
    device_id: String,
    config_client: Client,
    node_list_client: Client,
    nodes: Arc<NodeManager>,
    rules: Arc<RuleManager>,
    events: EventBus,
}

impl ConfigManager {
    pub fn new(
        config: &VStoreConfig,
        device_id: String,
        clients: &HttpClients,
        nodes: Arc<NodeManager>,
        rules: Arc<RuleManager>,
        events: EventBus,
    ) -> VStoreResult<Self> {
        Ok(Self {
            settings: Arc::new(RwLock::new(Settings {
                matching_mode: config.matching.mode,
                multiple_nodes_per_rule: config.matching.multiple_nodes_per_rule,
                rms_threshold: config.noise.rms_threshold,
                db_threshold: config.noise.db_threshold,
            })),
            master_url: config.master_url()?,
            device_id,
            config_client: clients.config.clone(),
            node_list_client: clients.node_list.clone(),
            nodes,
            rules,
            events,
        })
    }

    pub fn matching_mode(&self) -> MatchingMode {
        self.settings.read().matching_mode
    }

    pub fn set_matching_mode(&self, mode: MatchingMode) {
        self.settings.write().matching_mode = mode;
    }

    pub fn is_multiple_nodes_allowed(&self) -> bool {
        self.settings.read().multiple_nodes_per_rule
    }

    pub fn set_multiple_nodes_allowed(&self, allowed: bool) {
        self.settings.write().multiple_nodes_per_rule = allowed;
    }

    pub fn default_rms_threshold(&self) -> i32 {
        self.settings.read().rms_threshold
    }

    pub fn set_default_rms_threshold(&self, threshold: i32) {
        self.settings.write().rms_threshold = threshold;
    }

    pub fn default_db_threshold(&self) -> i32 {
        self.settings.read().db_threshold
    }

    pub fn set_default_db_threshold(&self, threshold: i32) {
        self.settings.write().db_threshold = threshold;
    }

    pub fn master_url(&self) -> &Url {
        &self.master_url
    }

    /// Download and apply the configuration.
    ///
    /// With `block` the result is returned. Otherwise the download runs in the
    /// background and only the events report its outcome.
    pub async fn download(&self, block: bool) -> Option<VStoreResult<ConfigUpdate>> {
        if block {
            return Some(self.download_and_apply().await);
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.download_and_apply().await {
                warn!(error = %e, "Background configuration download failed");
            }
        });
        None
    }

    #[instrument(skip(self), fields(master = %self.master_url))]
    async fn download_and_apply(&self) -> VStoreResult<ConfigUpdate> {
        match self.fetch_and_parse().await {
            Ok(update) => {
                self.set_matching_mode(update.matching_mode);
                info!(
                    nodes = update.nodes_added,
                    rules = update.rules_stored,
                    deleted_rules = update.rules_deleted,
                    mode = %update.matching_mode,
                    "Configuration downloaded"
                );
                self.events.publish(VStoreEvent::ConfigDownloadSucceeded);
                Ok(update)
            }
            Err(e) => {
                error!(error = %e, code = %e.code(), "Configuration download failed");
                self.events
                    .publish(VStoreEvent::ConfigDownloadFailed { code: e.code() });
                Err(e)
            }
        }
    }

    async fn fetch_and_parse(&self) -> VStoreResult<ConfigUpdate> {
        let url = master_route(&self.master_url, ROUTE_CONFIGURATION);
        let response = self
            .config_client
            .post(&url)
            .json(&json!({ "device_id": self.device_id }))
            .send()
            .await
            .map_err(|e| {
                VStoreError::config_download(ErrorCode::ConfigConnectionFailed, format!("{url}: {e}"))
            })?;
        if response.status() != StatusCode::OK {
            return Err(VStoreError::config_download(
                ErrorCode::ConfigDownloadFailed,
                format!("{url} replied with status {}", response.status()),
            ));
        }
        let body = response.text().await.map_err(|e| {
            VStoreError::config_download(ErrorCode::ConfigConnectionFailed, e.to_string())
        })?;

        ConfigParser::new(&self.nodes, &self.rules)
            .parse_full_config(&body)
            .await
            .map_err(|e| match e {
                VStoreError::Parse { message } => {
                    VStoreError::config_download(ErrorCode::ConfigParseError, message)
                }
                other => other,
            })
    }

    /// Storage nodes currently announced by the master node
    pub async fn download_node_list(&self) -> VStoreResult<Vec<NodeInfo>> {
        let url = master_route(&self.master_url, ROUTE_NODES);
        let response = self
            .node_list_client
            .get(&url)
            .send()
            .await
            .map_err(|e| VStoreError::request_failed(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(VStoreError::wrong_status(response.status().as_u16(), url));
        }
        let reply = json_body(response).await?;
        parse_node_list(&reply)
            .ok_or_else(|| VStoreError::master_wrong_reply("node list reply without nodes"))
    }
}
