//! Usage context
//!
//! The caller describes the device's situation with a [`ContextDescription`].
//! Rules constrain files with a [`RuleContextDescription`], and searches send a
//! [`SearchContextDescription`] built through a [`ContextFilter`].

pub mod description;
pub mod filter;
pub mod manager;
pub mod rule_context;
pub mod types;
pub mod util;

pub use description::ContextDescription;
pub use filter::{apply_filter, ContextFilter, SearchContextDescription};
pub use manager::ContextManager;
pub use rule_context::RuleContextDescription;
pub use types::{
    Activity, ActivityType, LatLng, Location, Network, Noise, PlaceType, Places, SinglePlace,
};
pub use util::{distance_between, map_to_range, now_ms};
