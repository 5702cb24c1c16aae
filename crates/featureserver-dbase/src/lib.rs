//! Table catalog, query planning and scroll cursors for the feature server
//!
//! This crate turns the include/exclude mapping rules into a catalog of
//! servable tables, validates read requests into executable plans and
//! streams their rows from a [`FeatureStore`] through [`ReadResult`]s.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

pub mod bbox;
pub mod catalog;
pub mod cql;
pub mod cursor;
pub mod facade;
pub mod projector;
pub mod query;
pub mod snapshot;
pub mod store;

pub use catalog::{resolve_servable, Catalog};
pub use cursor::{ReadResult, ScrollCursor};
pub use facade::Database;
pub use projector::{FeatureRecord, Projection, RawRow};
pub use query::{ExecutablePlan, QueryBuilder, QuerySpec};
pub use snapshot::DatabaseHandle;
pub use store::{FeatureStore, InMemoryStore, PgStore, StoreSession};
