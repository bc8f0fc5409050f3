//! Consul agent integration
pub mod api;
pub mod client;

pub use client::{ConsulConfig, ConsulRegistry};
