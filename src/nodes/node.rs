//! Storage node descriptions

use crate::context::util::distance_between;
use crate::context::LatLng;
use crate::error::{VStoreError, VStoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const ROUTE_NODE_UUID: &str = "/uuid";
const ROUTE_FILE: &str = "/file/data";
const ROUTE_FILE_DELETE: &str = "/file";
const ROUTE_THUMBNAIL: &str = "/thumbnail";
const ROUTE_FILE_MIMETYPE: &str = "/file/mimetype";
const ROUTE_FILE_METADATA_FULL: &str = "/file/metadata/full";
const ROUTE_FILE_METADATA_LIGHT: &str = "/file/metadata/light";
const ROUTE_SEARCH: &str = "/file/search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Cloud,
    Corenet,
    Cloudlet,
    Gateway,
    Owncloud,
    Phone,
    PrivateNode,
    DeviceOnly,
    /// No particular type: any node satisfying the other constraints
    #[serde(rename = "NONE")]
    Any,
    #[default]
    #[serde(other)]
    Unknown,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Cloud,
        NodeType::Corenet,
        NodeType::Cloudlet,
        NodeType::Gateway,
        NodeType::Owncloud,
        NodeType::Phone,
        NodeType::PrivateNode,
        NodeType::DeviceOnly,
        NodeType::Unknown,
        NodeType::Any,
    ];

    /// Parse a type name, unknown names become `Unknown`
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(NodeType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Cloud => "CLOUD",
            NodeType::Corenet => "CORENET",
            NodeType::Cloudlet => "CLOUDLET",
            NodeType::Gateway => "GATEWAY",
            NodeType::Owncloud => "OWNCLOUD",
            NodeType::Phone => "PHONE",
            NodeType::PrivateNode => "PRIVATE_NODE",
            NodeType::DeviceOnly => "DEVICE_ONLY",
            NodeType::Unknown => "UNKNOWN",
            NodeType::Any => "NONE",
        }
    }

    /// Types that never receive an upload
    pub fn is_no_node(&self) -> bool {
        matches!(self, NodeType::DeviceOnly | NodeType::Unknown)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub uuid: String,
    /// Scheme and host, e.g. `http://10.0.0.3`
    pub address: String,
    pub port: u16,
    pub node_type: NodeType,
    pub latlng: Option<LatLng>,
    pub bandwidth_up: i32,
    pub bandwidth_down: i32,
}

impl NodeInfo {
    pub fn new<S: Into<String>>(
        uuid: S,
        address: S,
        port: u16,
        node_type: NodeType,
        latlng: Option<LatLng>,
        bandwidth_up: i32,
        bandwidth_down: i32,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            address: with_scheme(address.into()),
            port,
            node_type,
            latlng,
            bandwidth_up,
            bandwidth_down,
        }
    }

    /// Parse a node entry of the master's configuration.
    ///
    /// `url`, `port`, `type` and `location` (`[lat, lng]`) are required.
    /// `uuid`, `bandwidthUp` and `bandwidthDown` are optional.
    pub fn from_master_value(value: &Value) -> VStoreResult<Self> {
        let required = || {
            VStoreError::parse("node must contain url, port, type and location")
        };
        let obj = value.as_object().ok_or_else(required)?;
        let url = obj.get("url").and_then(Value::as_str).ok_or_else(required)?;
        let port = obj
            .get("port")
            .and_then(Value::as_u64)
            .ok_or_else(required)?;
        let port = u16::try_from(port)
            .map_err(|_| VStoreError::parse(format!("node port {port} out of range")))?;
        let node_type = obj
            .get("type")
            .and_then(Value::as_str)
            .map(NodeType::parse)
            .ok_or_else(required)?;
        let location = obj
            .get("location")
            .and_then(Value::as_array)
            .ok_or_else(required)?;
        let latlng = match location.as_slice() {
            [lat, lng] => match (lat.as_f64(), lng.as_f64()) {
                (Some(lat), Some(lng)) => Some(LatLng::new(lat, lng)),
                _ => None,
            },
            _ => None,
        };
        let bandwidth = |key: &str| {
            obj.get(key)
                .and_then(Value::as_i64)
                .and_then(|b| i32::try_from(b).ok())
                .unwrap_or(0)
        };

        Ok(Self::new(
            obj.get("uuid").and_then(Value::as_str).unwrap_or_default(),
            url,
            port,
            node_type,
            latlng,
            bandwidth("bandwidthUp"),
            bandwidth("bandwidthDown"),
        ))
    }

    pub fn base_uri(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn uuid_uri(&self) -> String {
        format!("{}{ROUTE_NODE_UUID}", self.base_uri())
    }

    pub fn upload_uri(&self) -> String {
        format!("{}{ROUTE_FILE}", self.base_uri())
    }

    pub fn search_uri(&self) -> String {
        format!("{}{ROUTE_SEARCH}", self.base_uri())
    }

    pub fn download_uri(&self, file_uuid: &str, device_id: &str) -> String {
        format!("{}{ROUTE_FILE}/{file_uuid}/{device_id}", self.base_uri())
    }

    pub fn delete_uri(&self, file_uuid: &str, device_id: &str) -> String {
        format!("{}{ROUTE_FILE_DELETE}/{file_uuid}/{device_id}", self.base_uri())
    }

    pub fn thumbnail_uri(&self, file_uuid: &str, device_id: &str) -> String {
        format!("{}{ROUTE_THUMBNAIL}/{file_uuid}/{device_id}", self.base_uri())
    }

    pub fn mime_type_uri(&self, file_uuid: &str, device_id: &str) -> String {
        format!("{}{ROUTE_FILE_MIMETYPE}/{file_uuid}/{device_id}", self.base_uri())
    }

    pub fn metadata_uri(&self, file_uuid: &str, device_id: &str, full: bool) -> String {
        let route = if full {
            ROUTE_FILE_METADATA_FULL
        } else {
            ROUTE_FILE_METADATA_LIGHT
        };
        format!("{}{route}/{file_uuid}/{device_id}", self.base_uri())
    }

    /// Distance in km, `f32::MAX` when either side has no location
    pub fn distance_to_km(&self, latlng: Option<&LatLng>) -> f32 {
        match (self.latlng.as_ref(), latlng) {
            (Some(own), Some(other)) => distance_between(other, own) / 1000.0,
            _ => f32::MAX,
        }
    }
}

fn with_scheme(address: String) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address
    } else {
        format!("http://{address}")
    }
}
