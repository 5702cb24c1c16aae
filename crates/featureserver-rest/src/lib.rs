//! Feature server REST API
//!
//! Exposes the servable tables over HTTP:
//! - `GET /rest/tables` lists tables and their typed columns
//! - `GET /rest/tables/{name}` streams rows as JSON or CSV with bbox, CQL,
//!   sorting, pagination and column selection
//! - `GET /rest/tables/{name}/{property}` lists distinct property values

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod handlers;
pub mod output;
pub mod params;
pub mod server;

pub use handlers::{error_response, RestState};
pub use params::{OutputFormat, ReadParams};
pub use server::{configure, RestServer};
