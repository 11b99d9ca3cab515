//! vstore - context-aware distributed file storage
//!
//! Files stored through the framework are placed on storage nodes chosen by
//! matching the device's current usage context against a set of rules
//! downloaded from a master node.
//!
//! # Overview
//!
//! This crate provides:
//! - Context descriptions (location, activity, network, noise, places, time)
//! - Storage rules and the layered node matching algorithm
//! - A local file registry backed by sled
//! - HTTP communication with the master node and the storage nodes
//!   (config download, upload, search, download, delete)
//! - Events published on a broadcast bus
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vstore::{VStore, VStoreConfig};
//! use std::path::Path;
//!
//! # async fn run() -> vstore::VStoreResult<()> {
//! let config = VStoreConfig::new("/var/lib/vstore", "http://master.local:50000");
//! let store = VStore::initialize(config).await?;
//!
//! // Fetch rules and nodes, then store a file
//! store.config_manager().download(true).await;
//! let file = store.store(Path::new("holiday.jpg"), false).await?;
//! println!("stored {} on {:?}", file.uuid, file.stored_node_ids);
//! # Ok(())
//! # }
//! ```

pub mod communication;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod files;
pub mod matching;
pub mod nodes;
pub mod observability;
pub mod remote_config;
pub mod rules;
pub mod storage;
pub mod testing;
pub mod vstore;

pub use config::{ConfigError, VStoreConfig};
pub use context::{ContextDescription, ContextFilter, ContextManager};
pub use error::{ErrorCode, VStoreError, VStoreResult};
pub use events::{EventBus, VStoreEvent};
pub use files::{FileMetadata, VStoreFile};
pub use matching::{Matching, MatchingMode, MatchingResult};
pub use nodes::{NodeInfo, NodeType};
pub use rules::{RuleManager, VStoreRule};
pub use vstore::VStore;
