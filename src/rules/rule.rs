//! Storage rules and their decision layers

use crate::context::util::map_to_range;
use crate::context::{PlaceType, RuleContextDescription};
use crate::error::{VStoreError, VStoreResult};
use crate::nodes::NodeType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const MAX_SCORED_RADIUS: i32 = 1000;
const MAX_TIME_SPAN_MINUTES: i32 = 23 * 60 + 59;
const DEFAULT_RULE_NAME: &str = "<noname>";

/// One target selection step of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLayer {
    #[serde(rename = "isSpecific", default)]
    pub is_specific: bool,
    #[serde(rename = "specificNodeId", default)]
    pub specific_node_id: String,
    #[serde(rename = "selectedType", default)]
    pub target_type: NodeType,
    /// km
    #[serde(rename = "minRadius", default)]
    pub min_radius: f32,
    /// km
    #[serde(rename = "maxRadius", default)]
    pub max_radius: f32,
    #[serde(rename = "minBwUp", default)]
    pub min_bw_up: i32,
    #[serde(rename = "minBwDown", default)]
    pub min_bw_down: i32,
}

impl Default for DecisionLayer {
    fn default() -> Self {
        Self::of_type(NodeType::Unknown)
    }
}

impl DecisionLayer {
    /// Layer picking any node of `target_type`
    pub fn of_type(target_type: NodeType) -> Self {
        Self {
            is_specific: false,
            specific_node_id: String::new(),
            target_type,
            min_radius: 0.0,
            max_radius: 0.0,
            min_bw_up: 0,
            min_bw_down: 0,
        }
    }

    /// Layer pinned to one node
    pub fn specific<S: Into<String>>(node_id: S) -> Self {
        Self {
            is_specific: true,
            specific_node_id: node_id.into(),
            ..Self::of_type(NodeType::Any)
        }
    }

    pub fn has_radius(&self) -> bool {
        self.min_radius >= 0.0 && self.max_radius > 0.0
    }

    pub fn has_bandwidth(&self) -> bool {
        self.min_bw_up > 0 || self.min_bw_down > 0
    }

    /// No radius and no bandwidth constraint
    pub fn is_unconstrained(&self) -> bool {
        self.min_radius == 0.0 && self.max_radius == 0.0 && !self.has_bandwidth()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VStoreRule {
    pub uuid: String,
    pub name: String,
    pub creation_date: DateTime<Utc>,
    pub context: RuleContextDescription,
    /// Empty list matches every mime type
    pub mime_types: Vec<String>,
    /// Bytes, 0 = no minimum
    pub min_file_size: u64,
    pub is_user_rule: bool,
    /// 1 = Monday .. 7 = Sunday
    pub weekdays: Vec<i32>,
    pub decision_layers: Vec<DecisionLayer>,
    pub replication_factor: usize,
    pub store_multiple: bool,
    sharing_domain: i32,
    start: (i32, i32),
    end: (i32, i32),
}

impl VStoreRule {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            creation_date: Utc::now(),
            context: RuleContextDescription::default(),
            mime_types: Vec::new(),
            min_file_size: 0,
            is_user_rule: true,
            weekdays: Vec::new(),
            decision_layers: Vec::new(),
            replication_factor: 1,
            store_multiple: false,
            sharing_domain: -1,
            start: (0, 0),
            end: (0, 0),
        }
    }

    pub fn from_json(json: &str) -> VStoreResult<Self> {
        Self::from_value(&serde_json::from_str(json)?)
    }

    pub fn from_value(value: &Value) -> VStoreResult<Self> {
        let j = value
            .as_object()
            .ok_or_else(|| VStoreError::parse("rule is not a JSON object"))?;
        let uuid = j
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| VStoreError::parse("rule has no id"))?;

        let mut rule = Self::new(
            j.get("name")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_RULE_NAME),
        );
        rule.uuid = uuid.to_string();
        if let Some(created) = j
            .get("dateCreation")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        {
            rule.creation_date = created;
        }

        if let Some(decisions) = j.get("decisions").and_then(Value::as_array) {
            for decision in decisions {
                rule.decision_layers
                    .push(serde_json::from_value(decision.clone())?);
            }
        }
        rule.context = match j.get("context") {
            Some(ctx) => RuleContextDescription::from_value(ctx)?,
            None => RuleContextDescription::default(),
        };
        rule.mime_types = string_list(j.get("mimetypes"));
        rule.min_file_size = j.get("filesize").and_then(Value::as_u64).unwrap_or(0);
        rule.set_sharing_domain(
            j.get("sharingDomain")
                .and_then(Value::as_i64)
                .map(|d| d as i32)
                .unwrap_or(1),
        );
        rule.is_user_rule = j.get("isUserRule").and_then(Value::as_bool).unwrap_or(false);
        rule.weekdays = j
            .get("weekdays")
            .and_then(Value::as_str)
            .map(parse_weekdays)
            .unwrap_or_default();
        let (h, m) = parse_time(j.get("timeStart"));
        rule.set_time_start(h, m);
        let (h, m) = parse_time(j.get("timeEnd"));
        rule.set_time_end(h, m);
        rule.replication_factor = j
            .get("replicationFactor")
            .and_then(Value::as_u64)
            .map(|r| r.max(1) as usize)
            .unwrap_or(1);
        rule.store_multiple = j
            .get("storeMultiple")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(rule)
    }

    pub fn to_value(&self) -> Value {
        let mut j = Map::new();
        j.insert("uuid".into(), json!(self.uuid));
        j.insert("name".into(), json!(self.name));
        j.insert("dateCreation".into(), json!(self.creation_date.timestamp()));
        j.insert("filesize".into(), json!(self.min_file_size));
        j.insert(
            "decisions".into(),
            serde_json::to_value(&self.decision_layers).unwrap_or(Value::Array(Vec::new())),
        );
        j.insert("context".into(), self.context.to_value());
        j.insert("mimetypes".into(), json!(self.mime_types));
        j.insert("sharingDomain".into(), json!(self.sharing_domain));
        j.insert("isUserRule".into(), json!(self.is_user_rule));
        let weekdays: Vec<String> = self.weekdays.iter().map(i32::to_string).collect();
        j.insert("weekdays".into(), json!(weekdays.join(",")));
        j.insert("timeStart".into(), json!(format!("{:02}:{:02}", self.start.0, self.start.1)));
        j.insert("timeEnd".into(), json!(format!("{:02}:{:02}", self.end.0, self.end.1)));
        j.insert("replicationFactor".into(), json!(self.replication_factor));
        j.insert("storeMultiple".into(), json!(self.store_multiple));
        Value::Object(j)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// -1 = any file, 0 = public files, 1 = private files
    pub fn sharing_domain(&self) -> i32 {
        self.sharing_domain
    }

    /// Values other than -1, 0 and 1 become -1
    pub fn set_sharing_domain(&mut self, domain: i32) {
        self.sharing_domain = if matches!(domain, -1..=1) { domain } else { -1 };
    }

    pub fn time_start(&self) -> (i32, i32) {
        self.start
    }

    pub fn time_end(&self) -> (i32, i32) {
        self.end
    }

    pub fn set_time_start(&mut self, hour: i32, minutes: i32) {
        self.start = valid_time(hour, minutes);
    }

    pub fn set_time_end(&mut self, hour: i32, minutes: i32) {
        self.end = valid_time(hour, minutes);
    }

    /// A day time window is configured unless both ends are 00:00
    pub fn has_time_set(&self) -> bool {
        self.start != (0, 0) || self.end != (0, 0)
    }

    pub fn has_weekdays(&self) -> bool {
        !self.weekdays.is_empty()
    }

    pub fn has_file_size_configured(&self) -> bool {
        self.min_file_size > 0
    }

    pub fn has_location_context(&self) -> bool {
        self.context.has_location_context()
    }

    pub fn has_place_context(&self) -> bool {
        self.context
            .place_types
            .as_ref()
            .is_some_and(|t| !t.is_empty())
    }

    pub fn has_activity_context(&self) -> bool {
        self.context.has_activity_context()
    }

    pub fn has_network_context(&self) -> bool {
        self.context.has_network_context()
    }

    pub fn has_noise_context(&self) -> bool {
        self.context.has_noise_context()
    }

    pub fn matches_mime_type(&self, mime_type: &str) -> bool {
        self.mime_types.is_empty() || self.mime_types.iter().any(|m| m == mime_type)
    }

    /// How specific the rule is. More specific rules are evaluated first.
    pub fn detail_score(&self) -> f32 {
        let mut score = 0.0;
        if self.has_location_context() {
            let radius = self.context.radius.min(MAX_SCORED_RADIUS);
            score += 5.0 + map_to_range(radius as f32, 1.0, MAX_SCORED_RADIUS as f32, 15.0, 0.0);
        }
        if self.has_weekdays() {
            score += 5.0;
            score += map_to_range(self.weekdays.len() as f32, 1.0, 7.0, 10.0, 0.0);
            let span = ((self.end.0 * 60 + self.end.1) - (self.start.0 * 60 + self.start.1)).max(0);
            score += map_to_range(span as f32, 1.0, MAX_TIME_SPAN_MINUTES as f32, 10.0, 0.0);
        }
        if matches!(self.sharing_domain, 0 | 1) {
            score += 10.0;
        }
        if let Some(types) = self.context.place_types.as_ref().filter(|t| !t.is_empty()) {
            score += 5.0;
            score += map_to_range(types.len() as f32, 1.0, PlaceType::ALL.len() as f32, 10.0, 0.0);
        }
        if self.has_activity_context() {
            score += 10.0;
        }
        if self.has_network_context() {
            score += 10.0;
        }
        if self.has_noise_context() {
            score += 10.0;
        }
        score
    }
}

fn valid_time(hour: i32, minutes: i32) -> (i32, i32) {
    let hour = if (0..=23).contains(&hour) { hour } else { 0 };
    let minutes = if (0..=59).contains(&minutes) { minutes } else { 0 };
    (hour, minutes)
}

/// "HH:MM", anything malformed is 00:00
fn parse_time(value: Option<&Value>) -> (i32, i32) {
    let parsed = value.and_then(Value::as_str).and_then(|s| {
        let (h, m) = s.trim().split_once(':')?;
        Some((h.trim().parse().ok()?, m.trim().parse().ok()?))
    });
    parsed.unwrap_or((0, 0))
}

fn parse_weekdays(s: &str) -> Vec<i32> {
    s.split(',')
        .filter_map(|d| d.trim().parse::<i32>().ok())
        .filter(|d| (1..=7).contains(d))
        .collect()
}

/// Accepts a JSON array of strings or a string holding one
fn string_list(value: Option<&Value>) -> Vec<String> {
    let array = match value {
        Some(Value::Array(a)) => a.clone(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(a)) => a,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    array
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}
