//! Feature Server Common Types and Utilities
//!
//! Shared table descriptors, scalar values, configuration and error
//! handling for the feature server crates.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::FeatureServerConfig;
pub use error::{Error, Result};
