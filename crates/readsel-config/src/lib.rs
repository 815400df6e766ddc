//! # readsel config
//!
//! Configuration for the reading-view selection helper: which page to attach
//! to, the structural patterns that identify content blocks, the debounce and
//! retry timings, and how the action control looks and is triggered.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
