//! Utilities
//!
//! Error type and path helpers shared by the storage and service layers.

pub mod error;
pub mod paths;

pub use error::*;
pub use paths::*;
