pub mod aggregate;
pub mod bench;
pub mod campaign;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod execution;
pub mod host;
pub mod metrics;
pub mod node;
pub mod plot;
