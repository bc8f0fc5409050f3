//! Core service discovery types
//!
//! This library provides:
//! - `Node` and `ServiceRecord`, the addressing model shared by clients and servers
//! - The `Registry` contract every registry backend implements
//! - An in-memory registry for tests and single-process deployments

pub mod registry;
pub mod node;
pub mod error;

pub use registry::{InMemoryRegistry, Registry};
pub use node::{Node, ServiceRecord};
pub use error::{DiscoveryError, Result};
