//! Configuration loading for the harvester daemon.
//!
//! Values come from three layers: environment variables (after an optional
//! `.env` file is applied), a TOML file, and built-in defaults, in that order
//! of precedence. Guard rails reject settings the pipeline cannot run with and
//! report suspicious ones as [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{Config, ConfigMetadata, RedisConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
