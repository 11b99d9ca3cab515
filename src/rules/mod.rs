//! Storage rules

pub mod manager;
pub mod rule;

pub use manager::RuleManager;
pub use rule::{DecisionLayer, VStoreRule};
