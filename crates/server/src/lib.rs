//! Refresh coordination service for the Easel artifact cache.
//!
//! This crate provides:
//! - The single-flight refresh coordinator
//! - Batch operations and their status aggregation
//! - The background sweep
//! - The upstream resolver seam and its HTTP implementation
//! - The HTTP API

pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod operations;
pub mod routes;
pub mod state;
pub mod sweep;
pub mod upstream;

pub use coordinator::{RefreshCoordinator, RefreshError};
pub use error::ApiError;
pub use operations::{OperationAggregator, OperationView};
pub use routes::create_router;
pub use state::{AppState, RefreshTaskRegistry};
pub use sweep::{SweepScheduler, SweepStats};
pub use upstream::{HttpResolver, UpstreamError, UpstreamResolver};
