//! Geo, time and number helpers shared by context matching, rules and nodes

use super::types::LatLng;
use chrono::{Datelike, Local, NaiveTime, Timelike, Utc};

const STATUTE_MILES_PER_NAUTICAL_MILE: f64 = 1.15077945;
const METERS_PER_STATUTE_MILE: f64 = 1609.34;

/// Distance between two coordinates in meters (spherical law of cosines)
pub fn distance_between(one: &LatLng, two: &LatLng) -> f32 {
    let lat1 = one.lat.to_radians();
    let lon1 = one.lng.to_radians();
    let lat2 = two.lat.to_radians();
    let lon2 = two.lng.to_radians();

    let cos_angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).cos();
    // Rounding can push identical points slightly above 1.0, which acos turns into NaN
    let angle = cos_angle.clamp(-1.0, 1.0).acos();

    let nautical_miles = 60.0 * angle.to_degrees();
    let statute_miles = STATUTE_MILES_PER_NAUTICAL_MILE * nautical_miles;
    (statute_miles * METERS_PER_STATUTE_MILE) as f32
}

/// Like [`distance_between`], returning -1 when either point is missing
pub fn distance_between_opt(one: Option<&LatLng>, two: Option<&LatLng>) -> f32 {
    match (one, two) {
        (Some(a), Some(b)) => distance_between(a, b),
        _ => -1.0,
    }
}

/// Linearly map `x` from one range to another. Returns 0 for an empty source range.
pub fn map_to_range(x: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> f32 {
    if from_max - from_min == 0.0 {
        tracing::warn!(from_min, from_max, "map_to_range called with an empty source range");
        return 0.0;
    }
    (x - from_min) * (to_max - to_min) / (from_max - from_min) + to_min
}

/// Index of the number closest to `check`, 0 for an empty list
pub fn closest_number_index(numbers: &[f32], check: f32) -> usize {
    let mut best = 0;
    let mut best_distance = match numbers.first() {
        Some(first) => (first - check).abs(),
        None => return 0,
    };
    for (i, n) in numbers.iter().enumerate().skip(1) {
        let distance = (n - check).abs();
        if distance < best_distance {
            best = i;
            best_distance = distance;
        }
    }
    best
}

/// Milliseconds since the epoch
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// ISO day of week of the local clock, 1 = Monday .. 7 = Sunday
pub fn day_of_week() -> i32 {
    Local::now().weekday().number_from_monday() as i32
}

/// Whether the local time lies in `[start, end]` (inclusive, minute precision).
///
/// Ranges with invalid components or `start >= end` never match.
pub fn is_now_between(start_hour: i32, start_minutes: i32, end_hour: i32, end_minutes: i32) -> bool {
    is_time_between(
        Local::now().time(),
        start_hour,
        start_minutes,
        end_hour,
        end_minutes,
    )
}

pub fn is_time_between(
    time: NaiveTime,
    start_hour: i32,
    start_minutes: i32,
    end_hour: i32,
    end_minutes: i32,
) -> bool {
    let valid = |h: i32, m: i32| (0..=23).contains(&h) && (0..=59).contains(&m);
    if !valid(start_hour, start_minutes) || !valid(end_hour, end_minutes) {
        return false;
    }
    let start = start_hour * 60 + start_minutes;
    let end = end_hour * 60 + end_minutes;
    if start >= end {
        return false;
    }
    let now = time.hour() as i32 * 60 + time.minute() as i32;
    now >= start && now <= end
}

/// Sharing domain check. A rule domain of -1 includes every file, 0 and 1 must match exactly.
pub fn is_included_in_sharing_domain(file_domain: i32, rule_domain: i32) -> bool {
    match rule_domain {
        -1 => true,
        0 | 1 => file_domain == rule_domain,
        _ => false,
    }
}
