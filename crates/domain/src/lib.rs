//! Shared types for the Mew plugin host: the common error enum, the
//! env-driven runtime configuration, server wire types, and small text/time
//! helpers used by every plugin crate.

pub mod config;
pub mod error;
pub mod types;
pub mod util;

pub use error::{Error, Result};
