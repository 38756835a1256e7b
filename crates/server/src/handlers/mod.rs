//! HTTP request handlers.

pub mod artifacts;
pub mod health;
pub mod operations;

pub use artifacts::*;
pub use health::*;
pub use operations::*;
