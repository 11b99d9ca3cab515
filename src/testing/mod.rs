//! Testing utilities and mock implementations
//!
//! Mocks and fixtures for exercising the framework without a master node,
//! storage nodes or an evaluation server.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
