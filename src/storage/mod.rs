//! Storage Layer
//!
//! Handles all data persistence: TOML configuration, the run directory
//! layout, and checkpoint receipts.

pub mod checkpoint;
pub mod config;
pub mod layout;

pub use checkpoint::*;
pub use config::*;
pub use layout::*;
