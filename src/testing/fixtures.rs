//! Builders for master configurations, node entries and contexts used in tests

use crate::context::{now_ms, ContextDescription, LatLng, Location};
use crate::events::VStoreEvent;
use crate::files::VStoreFile;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

/// Darmstadt, used as the device location throughout the tests
pub const TEST_LOCATION: (f64, f64) = (49.877684, 8.654256);

/// Master node entry for a storage node served at `base_uri`, e.g. a mock server URI
pub fn node_entry(uuid: &str, base_uri: &str, node_type: &str, location: (f64, f64)) -> Value {
    let (address, port) = split_base_uri(base_uri);
    json!({
        "uuid": uuid,
        "url": address,
        "port": port,
        "type": node_type,
        "location": [location.0, location.1],
    })
}

/// `http://host:port` into `("http://host", port)`. Unparseable URIs keep the text and port 80.
pub fn split_base_uri(base_uri: &str) -> (String, u16) {
    match Url::parse(base_uri) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default();
            (
                format!("{}://{host}", url.scheme()),
                url.port_or_known_default().unwrap_or(80),
            )
        }
        Err(_) => (base_uri.to_string(), 80),
    }
}

/// Rule sending every file of the given types, public or private, to a node of `node_type`
pub fn type_rule(uuid: &str, mime_types: &[&str], node_type: &str) -> Value {
    json!({
        "uuid": uuid,
        "name": format!("{node_type} for {}", mime_types.join(",")),
        "mimetypes": mime_types,
        "sharingDomain": -1,
        "decisions": [{"selectedType": node_type}],
    })
}

/// Rule storing every file of the given types on each of `node_ids`
pub fn pinned_rule(uuid: &str, mime_types: &[&str], node_ids: &[&str]) -> Value {
    let decisions: Vec<Value> = node_ids
        .iter()
        .map(|id| json!({"isSpecific": true, "specificNodeId": id, "selectedType": "NONE"}))
        .collect();
    json!({
        "uuid": uuid,
        "name": format!("pinned to {}", node_ids.join(",")),
        "mimetypes": mime_types,
        "sharingDomain": -1,
        "storeMultiple": node_ids.len() > 1,
        "replicationFactor": node_ids.len(),
        "decisions": decisions,
    })
}

/// Full master configuration reply
pub fn config_reply(nodes: Vec<Value>, rules: Vec<Value>, matching_mode: &str) -> Value {
    json!({
        "nodes": nodes,
        "rules": rules,
        "matchingMode": matching_mode,
    })
}

/// Context holding only a location at [`TEST_LOCATION`]
pub fn located_context() -> ContextDescription {
    let (lat, lng) = TEST_LOCATION;
    ContextDescription::with_location(Location::new(LatLng::new(lat, lng), 3.0, now_ms(), ""))
}

/// A file record whose framework copy exists in `dir`
pub fn stored_file(dir: &Path, uuid: &str, content: &[u8]) -> std::io::Result<VStoreFile> {
    let mut file = VStoreFile::new(uuid, dir, "sample.txt", "application/txt", "txt", content.len() as u64, false);
    std::fs::write(file.full_path(), content)?;
    file.hash = format!("hash-{uuid}");
    Ok(file)
}

/// Storage node reply for a search hit
pub fn search_hit(uuid: &str, mime_type: &str, size: u64) -> Value {
    json!({
        "uuid": uuid,
        "creationTimestamp": now_ms(),
        "mimetype": mime_type,
        "descriptiveName": format!("{uuid}.bin"),
        "filesize": size,
    })
}

/// Next event satisfying `predicate`, or `None` after `timeout` or when the bus closes
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<VStoreEvent>,
    timeout: Duration,
    mut predicate: F,
) -> Option<VStoreEvent>
where
    F: FnMut(&VStoreEvent) -> bool,
{
    let search = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, search).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{NodeInfo, NodeType};

    #[test]
    fn test_node_entry_parses() {
        let entry = node_entry("n1", "http://127.0.0.1:4567", "CLOUDLET", TEST_LOCATION);
        let node = NodeInfo::from_master_value(&entry).unwrap();
        assert_eq!(node.base_uri(), "http://127.0.0.1:4567");
        assert_eq!(node.node_type, NodeType::Cloudlet);
    }

    #[tokio::test]
    async fn test_wait_for_event() {
        let bus = crate::events::EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(VStoreEvent::ContextProvided);
        bus.publish(VStoreEvent::AllUploadsDone);

        let found = wait_for_event(&mut rx, Duration::from_secs(1), |e| {
            matches!(e, VStoreEvent::AllUploadsDone)
        })
        .await;
        assert!(matches!(found, Some(VStoreEvent::AllUploadsDone)));
        assert!(wait_for_event(&mut rx, Duration::from_millis(20), |_| true).await.is_none());
    }

    #[test]
    fn test_rule_fixtures_apply_to_public_files() {
        let rule = crate::rules::VStoreRule::from_value(&type_rule("r", &["image/png"], "CLOUD")).unwrap();
        assert_eq!(rule.sharing_domain(), -1);

        let pinned = crate::rules::VStoreRule::from_value(&pinned_rule("p", &[], &["a", "b"])).unwrap();
        assert!(pinned.store_multiple);
        assert_eq!(pinned.replication_factor, 2);
        assert_eq!(pinned.decision_layers[1].specific_node_id, "b");
        assert_eq!(pinned.decision_layers[1].target_type, NodeType::Any);
    }

    #[test]
    fn test_split_base_uri() {
        assert_eq!(split_base_uri("http://h:1"), ("http://h".to_string(), 1));
        assert_eq!(split_base_uri("https://h"), ("https://h".to_string(), 443));
    }
}
