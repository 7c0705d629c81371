//! imgsearch-core
//!
//! Shared vocabulary of the workspace: model descriptors and the registry,
//! the error taxonomy, configuration, and the vector-engine contract.

pub mod config;
pub mod error;
pub mod registry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use registry::{namespace_name, Registry};
