//! Core domain types and shared logic for the Easel artifact cache.
//!
//! This crate defines the data model used across all other crates:
//! - Canonical artifact keys and request validation
//! - Artifact and operation status state machines
//! - Service configuration

pub mod config;
pub mod error;
pub mod key;
pub mod status;

pub use error::{Error, Result};
pub use key::{CanonicalKey, validate_batch};
pub use status::{ArtifactStatus, OperationStatus, OutcomeCounts};

/// Maximum number of keys accepted in a single submitted batch.
pub const MAX_BATCH_KEYS: usize = 100;

/// Maximum length of a single requested key, in characters.
pub const MAX_KEY_LEN: usize = 256;
