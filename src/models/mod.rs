//! Data Models
//!
//! Workflow configuration and run report structures.

pub mod report;
pub mod settings;

pub use report::*;
pub use settings::*;
