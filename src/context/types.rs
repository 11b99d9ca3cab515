//! Context primitives: location, activity, noise, network and places
//!
//! Every type serialises to the JSON layout the storage nodes and the master
//! node exchange, so field names are renamed where the wire keys differ.

use super::util::{distance_between, now_ms};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Distance under which two coordinates count as the same point
pub const LATLNG_MATCH_THRESHOLD_KM: f32 = 0.01;
/// Distance under which two places of the same type count as the same place
pub const SAME_PLACE_DISTANCE_THRESHOLD_KM: f32 = 0.5;
pub const PLACE_LIKELIHOOD_THRESHOLD: f64 = 0.15;
pub const PLACE_LIKELIHOOD_THRESHOLD_2: f64 = 0.3;

pub const DEFAULT_RMS_THRESHOLD: i32 = 1000;
pub const DEFAULT_DB_THRESHOLD: i32 = -25;

/// Mobile network generations a rule can ask for
pub const SUPPORTED_MOBILE_TYPES: [&str; 4] = ["2G", "3G", "3.5G", "4G"];

/// Treat an explicit JSON `null` like a missing key
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn default_rms_threshold() -> i32 {
    DEFAULT_RMS_THRESHOLD
}

fn default_db_threshold() -> i32 {
    DEFAULT_DB_THRESHOLD
}

// ========== Location ==========

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Two coordinates match when they are less than 10 m apart
    pub fn matches(&self, other: &LatLng) -> bool {
        distance_between(self, other) / 1000.0 < LATLNG_MATCH_THRESHOLD_KM
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// A location fix as reported by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(flatten)]
    pub latlng: LatLng,
    #[serde(rename = "acc", default)]
    pub accuracy: f32,
    #[serde(rename = "time", default)]
    pub timestamp_ms: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
}

impl Location {
    pub fn new<S: Into<String>>(latlng: LatLng, accuracy: f32, timestamp_ms: i64, description: S) -> Self {
        Self {
            latlng,
            accuracy,
            timestamp_ms,
            description: description.into(),
        }
    }

    pub fn matches(&self, other: &Location) -> bool {
        other.latlng.matches(&self.latlng)
    }
}

// ========== Activity ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Still,
    Walking,
    InVehicle,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ActivityType {
    /// Parse both the wire names (`IN_VEHICLE`) and the short lowercase forms (`invehicle`)
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace('_', "").as_str() {
            "still" => ActivityType::Still,
            "walking" => ActivityType::Walking,
            "invehicle" => ActivityType::InVehicle,
            _ => ActivityType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Still => "STILL",
            ActivityType::Walking => "WALKING",
            ActivityType::InVehicle => "IN_VEHICLE",
            ActivityType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub activity: ActivityType,
    #[serde(default)]
    pub confidence: i32,
    #[serde(rename = "time", default)]
    pub timestamp_ms: i64,
}

impl Activity {
    pub fn new(activity: ActivityType, confidence: i32, timestamp_ms: i64) -> Self {
        Self {
            activity,
            confidence,
            timestamp_ms,
        }
    }

    pub fn matches(&self, other: &Activity) -> bool {
        self.matches_type(other.activity)
    }

    pub fn matches_type(&self, other: ActivityType) -> bool {
        self.activity == other
    }
}

// ========== Noise ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Noise {
    #[serde(rename = "sound_db", default)]
    pub db: f64,
    #[serde(rename = "sound_rms", default)]
    pub rms: f64,
    #[serde(rename = "sound_rms_thresh", default = "default_rms_threshold")]
    pub rms_threshold: i32,
    #[serde(rename = "sound_db_thresh", default = "default_db_threshold")]
    pub db_threshold: i32,
    #[serde(rename = "time", default = "now_ms")]
    pub timestamp_ms: i64,
}

impl Noise {
    pub fn new(db: f64, rms: f64, rms_threshold: i32, db_threshold: i32) -> Self {
        Self {
            db,
            rms,
            rms_threshold,
            db_threshold,
            timestamp_ms: now_ms(),
        }
    }

    /// Noise sample with the default thresholds
    pub fn with_default_thresholds(db: f64, rms: f64) -> Self {
        Self::new(db, rms, DEFAULT_RMS_THRESHOLD, DEFAULT_DB_THRESHOLD)
    }

    pub fn is_silent(&self) -> bool {
        self.db < f64::from(self.db_threshold)
    }

    /// Matches when the other sample is on the same side of this threshold
    pub fn matches(&self, other: &Noise) -> bool {
        (other.db > f64::from(self.db_threshold)) == !self.is_silent()
    }
}

// ========== Network ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "isWifiConnected", default)]
    pub is_wifi_connected: bool,
    #[serde(rename = "isMobileConnected", default)]
    pub is_mobile_connected: bool,
    #[serde(rename = "isMobileNetworkFast", default)]
    pub is_mobile_network_fast: bool,
    #[serde(rename = "wifiSsid", default, deserialize_with = "null_as_default")]
    pub wifi_ssid: String,
    #[serde(rename = "mobileNetworkType", default, deserialize_with = "empty_as_none")]
    pub mobile_network_type: Option<String>,
    #[serde(rename = "timestamp", default = "now_ms")]
    pub timestamp_ms: i64,
}

impl Network {
    pub fn new<S: Into<String>>(
        wifi_connected: bool,
        mobile_connected: bool,
        mobile_fast: bool,
        wifi_ssid: S,
        mobile_network_type: Option<String>,
    ) -> Self {
        Self {
            is_wifi_connected: wifi_connected,
            is_mobile_connected: mobile_connected,
            is_mobile_network_fast: mobile_fast,
            wifi_ssid: wifi_ssid.into(),
            mobile_network_type: mobile_network_type.filter(|t| !t.is_empty()),
            timestamp_ms: now_ms(),
        }
    }

    /// Both connected to Wi-Fi with equal SSIDs; `%` on either side matches any SSID
    pub fn wifi_matches(&self, other: &Network) -> bool {
        self.is_wifi_connected
            && other.is_wifi_connected
            && (self.wifi_ssid == other.wifi_ssid || self.wifi_ssid == "%" || other.wifi_ssid == "%")
    }

    pub fn matches(&self, other: &Network) -> bool {
        if self.wifi_matches(other) {
            return true;
        }
        if self.is_mobile_connected && other.is_mobile_connected {
            return match (&self.mobile_network_type, &other.mobile_network_type) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            };
        }
        false
    }
}

// ========== Places ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaceType {
    Poi,
    Shopping,
    Event,
    Social,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PlaceType {
    pub const ALL: [PlaceType; 5] = [
        PlaceType::Poi,
        PlaceType::Shopping,
        PlaceType::Event,
        PlaceType::Social,
        PlaceType::Unknown,
    ];

    /// Parse the wire name (`POI`), falling back to UNKNOWN
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "POI" => PlaceType::Poi,
            "SHOPPING" => PlaceType::Shopping,
            "EVENT" => PlaceType::Event,
            "SOCIAL" => PlaceType::Social,
            _ => PlaceType::Unknown,
        }
    }

    pub fn readable_name(&self) -> &'static str {
        match self {
            PlaceType::Poi => "Point of interest",
            PlaceType::Shopping => "Shopping",
            PlaceType::Event => "Event",
            PlaceType::Social => "Social",
            PlaceType::Unknown => "Unknown",
        }
    }

    pub fn from_readable_name(name: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.readable_name() == name)
            .unwrap_or(PlaceType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaceType::Poi => "POI",
            PlaceType::Shopping => "SHOPPING",
            PlaceType::Event => "EVENT",
            PlaceType::Social => "SOCIAL",
            PlaceType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PlaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One nearby place with its likelihood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglePlace {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(flatten)]
    pub latlng: LatLng,
    #[serde(rename = "type", default)]
    pub place_type: PlaceType,
    #[serde(rename = "typetext", default)]
    pub type_text: Option<String>,
    #[serde(default)]
    pub likelihood: f64,
    #[serde(rename = "is_likely", default)]
    pub is_likely: bool,
    /// Distance to the device in km, filled by [`SinglePlace::calculate_distance_from`]
    #[serde(skip)]
    pub distance_km: f32,
}

impl SinglePlace {
    pub fn new<S: Into<String>>(name: S, latlng: LatLng, place_type: PlaceType, likelihood: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            latlng,
            place_type,
            type_text: Some(place_type.readable_name().to_string()),
            likelihood,
            is_likely: likelihood >= PLACE_LIKELIHOOD_THRESHOLD,
            distance_km: 0.0,
        }
    }

    /// Store the distance to `location` in km, 0 without a location
    pub fn calculate_distance_from(&mut self, location: Option<&Location>) {
        self.distance_km = match location {
            Some(loc) => distance_between(&loc.latlng, &self.latlng) / 1000.0,
            None => 0.0,
        };
    }

    pub fn distance_to_place_km(&self, other: &SinglePlace) -> f32 {
        distance_between(&other.latlng, &self.latlng) / 1000.0
    }

    pub fn matches(&self, other: &SinglePlace) -> bool {
        other.place_type == self.place_type
            && self.distance_to_place_km(other) < SAME_PLACE_DISTANCE_THRESHOLD_KM
    }
}

/// Nearby places. On the wire the list is an object keyed by index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "PlacesWire", into = "PlacesWire")]
pub struct Places {
    pub places: Vec<SinglePlace>,
    pub timestamp_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct PlacesWire {
    #[serde(default)]
    places: BTreeMap<String, SinglePlace>,
    #[serde(rename = "time", default)]
    time: i64,
}

impl From<PlacesWire> for Places {
    fn from(wire: PlacesWire) -> Self {
        let mut indexed: Vec<(usize, SinglePlace)> = wire
            .places
            .into_iter()
            .map(|(k, p)| (k.parse().unwrap_or(usize::MAX), p))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        Places {
            places: indexed.into_iter().map(|(_, p)| p).collect(),
            timestamp_ms: wire.time,
        }
    }
}

impl From<Places> for PlacesWire {
    fn from(places: Places) -> Self {
        PlacesWire {
            places: places
                .places
                .into_iter()
                .enumerate()
                .map(|(i, p)| (i.to_string(), p))
                .collect(),
            time: places.timestamp_ms,
        }
    }
}

impl Places {
    pub fn new(places: Vec<SinglePlace>, timestamp_ms: i64) -> Self {
        Self {
            places,
            timestamp_ms,
        }
    }

    pub fn push(&mut self, place: SinglePlace) {
        self.places.push(place);
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    /// The likely place with the highest likelihood
    pub fn most_likely_place(&self) -> Option<&SinglePlace> {
        self.places
            .iter()
            .filter(|p| p.is_likely)
            .fold(None, |best: Option<&SinglePlace>, p| match best {
                Some(b) if p.likelihood <= b.likelihood => Some(b),
                _ => Some(p),
            })
    }

    /// Places with a likelihood of at least `min_likelihood`
    pub fn filter_places(&self, min_likelihood: f64) -> Vec<&SinglePlace> {
        self.places
            .iter()
            .filter(|p| p.likelihood >= min_likelihood)
            .collect()
    }

    /// Distinct place types, in order of appearance
    pub fn nearby_place_types(&self) -> Vec<PlaceType> {
        let mut types = Vec::new();
        for p in &self.places {
            if !types.contains(&p.place_type) {
                types.push(p.place_type);
            }
        }
        types
    }

    pub fn calculate_distances_from(&mut self, location: Option<&Location>) {
        for p in &mut self.places {
            p.calculate_distance_from(location);
        }
    }

    pub fn has_at_least_one_place_type(&self, types: &[PlaceType]) -> bool {
        let nearby = self.nearby_place_types();
        types.iter().any(|t| nearby.contains(t))
    }

    pub fn has_all_place_types(&self, types: &[PlaceType]) -> bool {
        let nearby = self.nearby_place_types();
        types.iter().all(|t| nearby.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn place(name: &str, t: PlaceType, likelihood: f64) -> SinglePlace {
        SinglePlace::new(name, LatLng::new(49.87, 8.65), t, likelihood)
    }

    // ========== LatLng / Location ==========

    #[test]
    fn test_latlng_matches_within_ten_meters() {
        let a = LatLng::new(49.877684, 8.654256);
        let b = LatLng::new(49.877700, 8.654260);
        let far = LatLng::new(49.878684, 8.654256);
        assert!(a.matches(&b));
        assert!(!a.matches(&far));
    }

    #[test]
    fn test_location_json_keys() {
        let loc = Location::new(LatLng::new(49.877684, 8.654256), 2.0, 1_000, "lab");
        let v = serde_json::to_value(&loc).unwrap();
        assert_eq!(v["lat"], json!(49.877684));
        assert_eq!(v["lng"], json!(8.654256));
        assert_eq!(v["acc"], json!(2.0));
        assert_eq!(v["time"], json!(1_000));
        assert_eq!(v["description"], json!("lab"));

        let parsed: Location = serde_json::from_value(v).unwrap();
        assert_eq!(parsed, loc);
    }

    #[test]
    fn test_location_null_description() {
        let loc: Location =
            serde_json::from_value(json!({"lat": 1.0, "lng": 2.0, "acc": 3.0, "time": 4, "description": null}))
                .unwrap();
        assert_eq!(loc.description, "");
    }

    // ========== Activity ==========

    #[test]
    fn test_activity_type_names() {
        assert_eq!(serde_json::to_value(ActivityType::InVehicle).unwrap(), json!("IN_VEHICLE"));
        assert_eq!(ActivityType::parse("invehicle"), ActivityType::InVehicle);
        assert_eq!(ActivityType::parse("STILL"), ActivityType::Still);
        assert_eq!(ActivityType::parse("flying"), ActivityType::Unknown);
        let t: ActivityType = serde_json::from_value(json!("RUNNING")).unwrap();
        assert_eq!(t, ActivityType::Unknown);
    }

    #[test]
    fn test_activity_matches_type() {
        let a = Activity::new(ActivityType::Walking, 80, 0);
        assert!(a.matches(&Activity::new(ActivityType::Walking, 10, 5)));
        assert!(!a.matches_type(ActivityType::Still));
    }

    // ========== Noise ==========

    #[test]
    fn test_noise_silence_and_matching() {
        let quiet = Noise::with_default_thresholds(-40.0, 10.0);
        let loud = Noise::with_default_thresholds(-5.0, 2000.0);
        assert!(quiet.is_silent());
        assert!(!loud.is_silent());
        assert!(loud.matches(&Noise::with_default_thresholds(-10.0, 0.0)));
        assert!(!loud.matches(&quiet));
        assert!(quiet.matches(&Noise::with_default_thresholds(-30.0, 0.0)));
    }

    #[test]
    fn test_noise_json_defaults() {
        let n: Noise = serde_json::from_value(json!({"sound_db": -10.0})).unwrap();
        assert_eq!(n.rms_threshold, DEFAULT_RMS_THRESHOLD);
        assert_eq!(n.db_threshold, DEFAULT_DB_THRESHOLD);
    }

    // ========== Network ==========

    #[test]
    fn test_network_wifi_wildcard() {
        let home = Network::new(true, false, false, "home", None);
        let any = Network::new(true, false, false, "%", None);
        let office = Network::new(true, false, false, "office", None);
        assert!(home.matches(&any));
        assert!(any.matches(&office));
        assert!(!home.matches(&office));
    }

    #[test]
    fn test_network_mobile_types() {
        let lte = Network::new(false, true, true, "", Some("4G".to_string()));
        let umts = Network::new(false, true, false, "", Some("3G".to_string()));
        let unknown = Network::new(false, true, false, "", None);
        assert!(lte.matches(&unknown));
        assert!(!lte.matches(&umts));
        assert!(lte.matches(&lte.clone()));
    }

    #[test]
    fn test_network_empty_mobile_type_is_none() {
        let n: Network = serde_json::from_value(json!({
            "isMobileConnected": true,
            "mobileNetworkType": "",
            "wifiSsid": null
        }))
        .unwrap();
        assert!(n.mobile_network_type.is_none());
        assert_eq!(n.wifi_ssid, "");
    }

    // ========== Places ==========

    #[test]
    fn test_place_type_names() {
        assert_eq!(PlaceType::parse("event"), PlaceType::Event);
        assert_eq!(PlaceType::parse("bakery"), PlaceType::Unknown);
        assert_eq!(PlaceType::Poi.readable_name(), "Point of interest");
        assert_eq!(PlaceType::from_readable_name("Shopping"), PlaceType::Shopping);
        assert_eq!(PlaceType::from_readable_name("Bar"), PlaceType::Unknown);
    }

    #[test]
    fn test_most_likely_place_ignores_unlikely() {
        let mut unlikely = place("a", PlaceType::Poi, 0.9);
        unlikely.is_likely = false;
        let places = Places::new(
            vec![unlikely, place("b", PlaceType::Event, 0.4), place("c", PlaceType::Social, 0.6)],
            0,
        );
        assert_eq!(places.most_likely_place().map(|p| p.name.as_str()), Some("c"));
    }

    #[test]
    fn test_places_filters_and_types() {
        let places = Places::new(
            vec![
                place("a", PlaceType::Poi, 0.1),
                place("b", PlaceType::Poi, 0.4),
                place("c", PlaceType::Event, 0.6),
            ],
            0,
        );
        assert_eq!(places.filter_places(0.3).len(), 2);
        assert_eq!(places.nearby_place_types(), vec![PlaceType::Poi, PlaceType::Event]);
        assert!(places.has_at_least_one_place_type(&[PlaceType::Social, PlaceType::Event]));
        assert!(!places.has_all_place_types(&[PlaceType::Social, PlaceType::Event]));
    }

    #[test]
    fn test_places_wire_format() {
        let places = Places::new(vec![place("a", PlaceType::Poi, 0.5), place("b", PlaceType::Event, 0.2)], 77);
        let v = serde_json::to_value(&places).unwrap();
        assert_eq!(v["time"], json!(77));
        assert_eq!(v["places"]["0"]["name"], json!("a"));
        assert_eq!(v["places"]["1"]["type"], json!("EVENT"));

        let parsed: Places = serde_json::from_value(v).unwrap();
        assert_eq!(parsed.places.len(), 2);
        assert_eq!(parsed.places[0].name, "a");
    }

    #[test]
    fn test_place_distance_and_matching() {
        let mut p = place("a", PlaceType::Poi, 0.5);
        p.calculate_distance_from(None);
        assert_eq!(p.distance_km, 0.0);

        let loc = Location::new(LatLng::new(49.88, 8.65), 1.0, 0, "");
        p.calculate_distance_from(Some(&loc));
        assert!(p.distance_km > 1.0 && p.distance_km < 1.6);

        let near = SinglePlace::new("n", LatLng::new(49.8705, 8.65), PlaceType::Poi, 0.5);
        let other_type = SinglePlace::new("o", LatLng::new(49.87, 8.65), PlaceType::Event, 0.5);
        assert!(p.matches(&near));
        assert!(!p.matches(&other_type));
    }
}
