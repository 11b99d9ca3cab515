//! Search filters: which parts of the usage context a file search should use

use super::description::ContextDescription;
use super::types::{Activity, Location, Network, Noise};
use super::util::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SEARCH_RADIUS: i32 = 120;
pub const DEFAULT_TIME_SPAN_MS: i64 = 3 * 60 * 60 * 1000;

/// Below this likelihood the most likely place is not sent along with a search
const MIN_SEARCH_PLACE_LIKELIHOOD: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFilter {
    #[serde(rename = "isLocationEnabled", default)]
    pub location: bool,
    #[serde(default)]
    pub radius: i32,
    #[serde(rename = "isPlaceEnabled", default)]
    pub most_likely_place: bool,
    #[serde(rename = "isActivityEnabled", default)]
    pub activity: bool,
    #[serde(rename = "isNetworkEnabled", default)]
    pub network: bool,
    #[serde(rename = "isNoiseEnabled", default)]
    pub noise: bool,
    #[serde(rename = "isWeekdayEnabled", default)]
    pub weekday: bool,
    #[serde(rename = "isTimeOfDayEnabled", default)]
    pub time_of_day: bool,
    #[serde(rename = "timeSpanMS", default)]
    pub time_span_ms: i64,
}

impl Default for ContextFilter {
    /// Location within 120 m and time of day within 3 hours
    fn default() -> Self {
        Self {
            location: true,
            radius: DEFAULT_SEARCH_RADIUS,
            most_likely_place: false,
            activity: false,
            network: false,
            noise: false,
            weekday: false,
            time_of_day: true,
            time_span_ms: DEFAULT_TIME_SPAN_MS,
        }
    }
}

impl ContextFilter {
    /// Filter with every part disabled
    pub fn disabled() -> Self {
        Self {
            location: false,
            radius: DEFAULT_SEARCH_RADIUS,
            most_likely_place: false,
            activity: false,
            network: false,
            noise: false,
            weekday: false,
            time_of_day: false,
            time_span_ms: 0,
        }
    }
}

/// The context sent to storage nodes when searching for files
#[derive(Debug, Clone, PartialEq)]
pub struct SearchContextDescription {
    pub location: Option<Location>,
    pub radius: i32,
    pub place: Option<String>,
    pub activity: Option<Activity>,
    pub network: Option<Network>,
    pub noise: Option<Noise>,
    pub weekday: i32,
    pub time_of_day: bool,
    pub time_span_ms: i64,
    pub timestamp_ms: i64,
}

impl Default for SearchContextDescription {
    fn default() -> Self {
        Self {
            location: None,
            radius: 0,
            place: None,
            activity: None,
            network: None,
            noise: None,
            weekday: -1,
            time_of_day: false,
            time_span_ms: 0,
            timestamp_ms: (now_ms() / 1000) * 1000,
        }
    }
}

impl SearchContextDescription {
    pub fn to_value(&self) -> Value {
        let mut j = Map::new();
        if let Some(location) = &self.location {
            if let Ok(v) = serde_json::to_value(location) {
                j.insert("location".into(), v);
                j.insert("radius".into(), Value::from(self.radius));
            }
        }
        if let Some(place) = &self.place {
            j.insert("place".into(), Value::from(place.clone()));
        }
        if let Some(v) = self.activity.as_ref().and_then(|a| serde_json::to_value(a).ok()) {
            j.insert("activity".into(), v);
        }
        if let Some(v) = self.noise.as_ref().and_then(|n| serde_json::to_value(n).ok()) {
            j.insert("noise".into(), v);
        }
        if let Some(v) = self.network.as_ref().and_then(|n| serde_json::to_value(n).ok()) {
            j.insert("network".into(), v);
        }
        if self.weekday != -1 {
            j.insert("weekday".into(), Value::from(self.weekday));
        }
        if self.time_of_day {
            j.insert("timeOfDay".into(), Value::Bool(true));
            j.insert("timeSpanMS".into(), Value::from(self.time_span_ms));
        }
        j.insert("timestamp".into(), Value::from(self.timestamp_ms));
        Value::Object(j)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }
}

/// Build the search context from the usage context, keeping only what the filter enables
pub fn apply_filter(usage: &ContextDescription, filter: &ContextFilter) -> SearchContextDescription {
    let mut search = SearchContextDescription {
        timestamp_ms: usage.timestamp_ms(),
        ..Default::default()
    };

    if filter.location {
        if let Some(location) = &usage.location {
            search.location = Some(location.clone());
            search.radius = filter.radius;
        }
    }
    if filter.most_likely_place {
        if let Some(place) = usage.most_likely_place() {
            if place.likelihood > MIN_SEARCH_PLACE_LIKELIHOOD {
                search.place = Some(place.name.clone());
            }
        }
    }
    if filter.activity {
        search.activity = usage.activity.clone();
    }
    if filter.network {
        search.network = usage.network.clone();
    }
    if filter.noise {
        search.noise = usage.noise.clone();
    }
    if filter.weekday {
        search.weekday = usage.weekday();
    }
    if filter.time_of_day {
        search.time_of_day = true;
        search.time_span_ms = filter.time_span_ms;
    }
    search
}
