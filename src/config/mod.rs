//! Configuration module
//!
//! Loads and validates the deployment file that maps phases to service
//! endpoints and sets retry, timeout, advisory and output policy.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE, LoadResult, LoadWarning, LoaderOptions};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
