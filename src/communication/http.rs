//! HTTP clients for the master node and the storage nodes

use crate::config::VStoreConfig;
use crate::error::{sanitize_reply, VStoreError, VStoreResult};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("vstore/", env!("CARGO_PKG_VERSION"));

/// Timeouts used when asking a node for its identifier
pub const IDENTIFIER_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const IDENTIFIER_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// File to node mapping requests to the master node (connect, write, read)
const MAPPING_TIMEOUT: Duration = Duration::from_secs(2);

/// One client per timeout profile. Clones share their connection pools.
#[derive(Debug, Clone)]
pub struct HttpClients {
    /// Configuration download from the master node
    pub config: Client,
    /// Node list download from the master node
    pub node_list: Client,
    /// `/uuid` lookups on storage nodes
    pub identifier: Client,
    /// File to node mapping requests to the master node
    pub mapping: Client,
    /// Short node requests: search, metadata, delete
    pub node: Client,
    /// Uploads and downloads, only bounded while connecting
    pub transfer: Client,
}

impl HttpClients {
    pub fn from_config(config: &VStoreConfig) -> VStoreResult<Self> {
        let master = &config.master;
        let config_connect = Duration::from_secs(master.config_connect_timeout_secs);
        let nodes_connect = Duration::from_secs(master.nodes_connect_timeout_secs);
        Ok(Self {
            config: build_client(
                config_connect,
                Some(
                    config_connect
                        + Duration::from_secs(master.config_write_timeout_secs)
                        + Duration::from_secs(master.config_read_timeout_secs),
                ),
            )?,
            node_list: build_client(
                nodes_connect,
                Some(nodes_connect + Duration::from_secs(master.nodes_read_timeout_secs)),
            )?,
            identifier: build_client(
                IDENTIFIER_CONNECT_TIMEOUT,
                Some(IDENTIFIER_CONNECT_TIMEOUT + IDENTIFIER_READ_TIMEOUT),
            )?,
            mapping: build_client(MAPPING_TIMEOUT, Some(MAPPING_TIMEOUT * 3))?,
            node: build_client(
                nodes_connect,
                Some(Duration::from_secs(config.upload.node_timeout_secs)),
            )?,
            transfer: build_client(nodes_connect, None)?,
        })
    }
}

/// Client with a connect timeout and an optional total request timeout
pub fn build_client(connect: Duration, total: Option<Duration>) -> VStoreResult<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect);
    if let Some(total) = total {
        builder = builder.timeout(total);
    }
    Ok(builder.build()?)
}

/// Fail with `RESPONSE_WRONG_STATUS_CODE` unless the reply carries `expected`
pub fn expect_status(response: &Response, expected: StatusCode) -> VStoreResult<()> {
    if response.status() == expected {
        Ok(())
    } else {
        Err(VStoreError::wrong_status(
            response.status().as_u16(),
            response.url().to_string(),
        ))
    }
}

/// Read a reply body as JSON
pub async fn json_body(response: Response) -> VStoreResult<Value> {
    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| VStoreError::parse(format!("{e}: {}", sanitize_reply(&text))))
}

/// Nodes report errors as `error: 0|1` or `error: false|true`
pub fn reply_has_error(reply: &Value) -> bool {
    match reply.get("error") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        Some(Value::String(s)) => s != "0" && !s.eq_ignore_ascii_case("false"),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clients_build_from_config() {
        let config = VStoreConfig::new("/tmp", "http://127.0.0.1:5000");
        assert!(HttpClients::from_config(&config).is_ok());
    }

    #[test]
    fn test_reply_error_flag() {
        assert!(!reply_has_error(&json!({"error": 0})));
        assert!(!reply_has_error(&json!({"error": false})));
        assert!(!reply_has_error(&json!({"reply": {}})));
        assert!(reply_has_error(&json!({"error": 1})));
        assert!(reply_has_error(&json!({"error": true})));
        assert!(reply_has_error(&json!({"error": "1"})));
    }
}
