//! Configuration distributed by the master node

pub mod manager;
pub mod parser;

pub use manager::ConfigManager;
pub use parser::{parse_matching_mode, parse_node_list, ConfigParser, ConfigUpdate};
