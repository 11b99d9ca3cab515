//! The usage context of the device

use super::types::{Activity, Location, Network, Noise, PlaceType, Places, SinglePlace};
use super::util::now_ms;
use crate::error::VStoreResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Snapshot of everything the framework knows about the device's situation.
///
/// Each part is optional. The timestamp is kept with second precision.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextDescription {
    pub location: Option<Location>,
    pub places: Option<Places>,
    pub activity: Option<Activity>,
    pub network: Option<Network>,
    pub noise: Option<Noise>,
    weekday: i32,
    timestamp_secs: i64,
}

impl Default for ContextDescription {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextDescription {
    /// Empty context stamped with the current time
    pub fn new() -> Self {
        Self {
            location: None,
            places: None,
            activity: None,
            network: None,
            noise: None,
            weekday: -1,
            timestamp_secs: now_ms() / 1000,
        }
    }

    pub fn with_location(location: Location) -> Self {
        let mut ctx = Self::new();
        ctx.location = Some(location);
        ctx
    }

    /// Parse the JSON form. Parts that fail to parse are left empty.
    pub fn from_json(json: &str) -> VStoreResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        fn part<T: for<'de> Deserialize<'de>>(value: &Value, key: &str) -> Option<T> {
            let raw = value.get(key)?;
            match serde_json::from_value(raw.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::debug!(part = key, error = %e, "Skipping unparsable context part");
                    None
                }
            }
        }

        let mut ctx = Self::new();
        ctx.location = part(value, "location");
        ctx.places = part(value, "places");
        ctx.activity = part(value, "activity");
        ctx.network = part(value, "network");
        ctx.noise = part(value, "noise");
        if let Some(weekday) = value.get("weekday").and_then(Value::as_i64) {
            ctx.set_weekday(weekday as i32);
        }
        if let Some(ts) = value.get("timestamp").and_then(Value::as_i64) {
            if ts != 0 {
                ctx.set_timestamp_ms(ts);
            }
        }
        ctx
    }

    pub fn to_value(&self) -> Value {
        let mut j = Map::new();
        let mut put = |key: &str, v: Option<Value>| {
            if let Some(v) = v {
                j.insert(key.to_string(), v);
            }
        };
        put("location", self.location.as_ref().and_then(|p| serde_json::to_value(p).ok()));
        put("places", self.places.as_ref().and_then(|p| serde_json::to_value(p).ok()));
        put("activity", self.activity.as_ref().and_then(|p| serde_json::to_value(p).ok()));
        put("noise", self.noise.as_ref().and_then(|p| serde_json::to_value(p).ok()));
        put("network", self.network.as_ref().and_then(|p| serde_json::to_value(p).ok()));
        if self.has_weekday_context() {
            put("weekday", Some(Value::from(self.weekday)));
        }
        put("timestamp", Some(Value::from(self.timestamp_ms())));
        Value::Object(j)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    /// Day of week, 1 = Monday .. 7 = Sunday, -1 when unset
    pub fn weekday(&self) -> i32 {
        self.weekday
    }

    /// Set the day of week; values outside 1..=7 unset it
    pub fn set_weekday(&mut self, weekday: i32) {
        self.weekday = if (1..=7).contains(&weekday) { weekday } else { -1 };
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_secs * 1000
    }

    pub fn set_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.timestamp_secs = timestamp_ms / 1000;
    }

    pub fn has_location_context(&self) -> bool {
        self.location.is_some()
    }

    pub fn has_places_context(&self) -> bool {
        self.places.as_ref().is_some_and(|p| !p.is_empty())
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

    pub fn has_weekday_context(&self) -> bool {
        self.weekday != -1
    }

    pub fn most_likely_place(&self) -> Option<&SinglePlace> {
        self.places.as_ref().and_then(Places::most_likely_place)
    }

    pub fn nearby_place_types(&self) -> Vec<PlaceType> {
        self.places
            .as_ref()
            .map(Places::nearby_place_types)
            .unwrap_or_default()
    }

    /// Append a place, creating the place list when needed
    pub fn put_place(&mut self, place: SinglePlace) {
        self.places
            .get_or_insert_with(|| Places::new(Vec::new(), now_ms()))
            .push(place);
    }
}

impl Serialize for ContextDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContextDescription {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::{ActivityType, LatLng};
    use serde_json::json;

    fn demo_location() -> Location {
        Location::new(LatLng::new(49.877684, 8.654256), 2.0, 1_700_000_000_000, "")
    }

    // ========== Construction ==========

    #[test]
    fn test_empty_context() {
        let ctx = ContextDescription::new();
        assert!(!ctx.has_location_context());
        assert!(!ctx.has_places_context());
        assert!(!ctx.has_weekday_context());
        assert_eq!(ctx.weekday(), -1);
        assert_eq!(ctx.timestamp_ms() % 1000, 0);
    }

    #[test]
    fn test_with_location() {
        let ctx = ContextDescription::with_location(demo_location());
        assert!(ctx.has_location_context());
        assert_eq!(ctx.location.as_ref().unwrap().latlng.lat, 49.877684);
    }

    #[test]
    fn test_weekday_validation() {
        let mut ctx = ContextDescription::new();
        ctx.set_weekday(3);
        assert_eq!(ctx.weekday(), 3);
        ctx.set_weekday(8);
        assert_eq!(ctx.weekday(), -1);
        ctx.set_weekday(0);
        assert!(!ctx.has_weekday_context());
    }

    #[test]
    fn test_timestamp_truncated_to_seconds() {
        let mut ctx = ContextDescription::new();
        ctx.set_timestamp_ms(1_234_567);
        assert_eq!(ctx.timestamp_ms(), 1_234_000);
    }

    #[test]
    fn test_empty_places_do_not_count() {
        let mut ctx = ContextDescription::new();
        ctx.places = Some(Places::default());
        assert!(!ctx.has_places_context());
        ctx.put_place(SinglePlace::new("x", LatLng::new(1.0, 1.0), PlaceType::Poi, 0.5));
        assert!(ctx.has_places_context());
    }

    // ========== JSON ==========

    #[test]
    fn test_json_round_trip() {
        let mut ctx = ContextDescription::with_location(demo_location());
        ctx.activity = Some(Activity::new(ActivityType::Walking, 70, 5));
        ctx.set_weekday(5);
        ctx.set_timestamp_ms(1_700_000_000_000);

        let parsed = ContextDescription::from_json(&ctx.to_json()).unwrap();
        assert_eq!(parsed, ctx);
    }

    #[test]
    fn test_json_skips_missing_and_broken_parts() {
        let v = json!({
            "location": {"lat": 1.0, "lng": 2.0, "acc": 1.0, "time": 3, "description": ""},
            "activity": {"confidence": 3},
            "timestamp": 5000
        });
        let ctx = ContextDescription::from_value(&v);
        assert!(ctx.has_location_context());
        assert!(!ctx.has_activity_context());
        assert!(!ctx.has_noise_context());
        assert_eq!(ctx.timestamp_ms(), 5000);

        let out = ctx.to_value();
        assert!(out.get("activity").is_none());
        assert!(out.get("weekday").is_none());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(ContextDescription::from_json("{not json").is_err());
    }
}
