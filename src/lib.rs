pub mod adapters;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;
