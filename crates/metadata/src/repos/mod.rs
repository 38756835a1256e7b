//! Repository traits for metadata operations.

pub mod artifacts;
pub mod operations;

pub use artifacts::{ArtifactRepo, ClaimWindow};
pub use operations::OperationRepo;
