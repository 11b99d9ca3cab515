//! Context constraints attached to a storage rule

use super::types::{ActivityType, LatLng, Network, Noise, PlaceType};
use crate::error::{VStoreError, VStoreResult};
use serde_json::{Map, Value};

/// The context a rule requires before it applies to a file
#[derive(Debug, Clone, PartialEq)]
pub struct RuleContextDescription {
    pub location: Option<LatLng>,
    /// Radius around `location` in meters, -1 when unset
    pub radius: i32,
    pub place_types: Option<Vec<PlaceType>>,
    pub activity: Option<ActivityType>,
    pub network: Option<Network>,
    pub noise: Option<Noise>,
}

impl Default for RuleContextDescription {
    fn default() -> Self {
        Self {
            location: None,
            radius: -1,
            place_types: None,
            activity: None,
            network: None,
            noise: None,
        }
    }
}

impl RuleContextDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a rule context given either as an object or as a string holding one
    pub fn from_value(value: &Value) -> VStoreResult<Self> {
        let obj = match value {
            Value::Object(map) => map.clone(),
            Value::String(s) if s.trim().is_empty() => return Ok(Self::default()),
            Value::String(s) => match serde_json::from_str::<Value>(s)? {
                Value::Object(map) => map,
                _ => return Err(VStoreError::parse("rule context string is not a JSON object")),
            },
            Value::Null => return Ok(Self::default()),
            other => {
                return Err(VStoreError::parse(format!(
                    "rule context must be an object, got {other}"
                )))
            }
        };

        let mut ctx = Self::default();

        if let Some(loc) = obj.get("location") {
            let loc = match loc {
                Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(Value::Null),
                other => other.clone(),
            };
            ctx.location = serde_json::from_value::<LatLng>(loc).ok();
        }
        ctx.radius = obj
            .get("radius")
            .and_then(Value::as_i64)
            .map(|r| r as i32)
            .unwrap_or(if ctx.location.is_some() { 0 } else { -1 });

        if let Some(types) = obj.get("placetypes").and_then(Value::as_array) {
            let mut parsed = Vec::new();
            for t in types.iter().filter_map(Value::as_str) {
                let place_type = PlaceType::parse(t);
                if place_type == PlaceType::Unknown && !t.eq_ignore_ascii_case("UNKNOWN") {
                    continue;
                }
                if !parsed.contains(&place_type) {
                    parsed.push(place_type);
                }
            }
            ctx.place_types = Some(parsed);
        }

        ctx.activity = obj
            .get("activity")
            .and_then(Value::as_str)
            .map(ActivityType::parse);
        ctx.network = obj
            .get("network")
            .and_then(embedded_object)
            .and_then(|v| serde_json::from_value(v).ok());
        ctx.noise = obj
            .get("noise")
            .and_then(embedded_object)
            .and_then(|v| serde_json::from_value(v).ok());

        Ok(ctx)
    }

    pub fn to_value(&self) -> Value {
        let mut j = Map::new();
        if let (true, Some(loc)) = (self.has_location_context(), self.location) {
            j.insert("location".into(), serde_json::json!({"lat": loc.lat, "lng": loc.lng}));
            j.insert("radius".into(), Value::from(self.radius));
        }
        if let Some(types) = &self.place_types {
            let names: Vec<Value> = types.iter().map(|t| Value::from(t.as_str())).collect();
            j.insert("placetypes".into(), Value::Array(names));
        }
        if let Some(activity) = self.activity {
            j.insert("activity".into(), Value::from(activity.as_str()));
        }
        if let Some(network) = &self.network {
            if let Ok(v) = serde_json::to_value(network) {
                j.insert("network".into(), v);
            }
        }
        if let Some(noise) = &self.noise {
            if let Ok(v) = serde_json::to_value(noise) {
                j.insert("noise".into(), v);
            }
        }
        Value::Object(j)
    }

    pub fn set_location(&mut self, lat: f64, lng: f64, radius: i32) {
        self.location = Some(LatLng::new(lat, lng));
        self.radius = radius;
    }

    pub fn add_place_type(&mut self, place_type: PlaceType) {
        let types = self.place_types.get_or_insert_with(Vec::new);
        if !types.contains(&place_type) {
            types.push(place_type);
        }
    }

    pub fn remove_place_type(&mut self, place_type: PlaceType) {
        if let Some(types) = &mut self.place_types {
            types.retain(|t| *t != place_type);
        }
    }

    /// A location only counts when both coordinates are positive
    pub fn has_location_context(&self) -> bool {
        self.location.is_some_and(|l| l.lat > 0.0 && l.lng > 0.0)
    }

    pub fn has_place_context(&self) -> bool {
        self.place_types.is_some()
    }

    pub fn has_activity_context(&self) -> bool {
        self.activity.is_some()
    }

    pub fn has_network_context(&self) -> bool {
        self.network.is_some()
    }

    pub fn has_noise_context(&self) -> bool {
        self.noise.is_some()
    }
}

fn embedded_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_object),
        _ => None,
    }
}
