//! Store backends
//!
//! A [`FeatureStore`] discovers and describes tables and opens read-only
//! [`StoreSession`]s. Each session owns one transaction scope and at most
//! one forward-only cursor, and is used by exactly one request.

pub mod memory;
pub mod postgres;
pub mod sql;

use featureserver_common::error::Result;
use featureserver_common::types::{TableDescriptor, Value};

use crate::projector::RawRow;
use crate::query::ExecutablePlan;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Table discovery and session factory
#[async_trait::async_trait]
pub trait FeatureStore: Send + Sync {
    /// Names of every table and view the store can see, in discovery order
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Describe the named tables. Names the store cannot describe are skipped.
    async fn describe(&self, names: &[String]) -> Result<Vec<TableDescriptor>>;

    /// Open a read-only session
    async fn begin(&self) -> Result<Box<dyn StoreSession>>;
}

/// Read-only transaction scope with a forward-only cursor
#[async_trait::async_trait]
pub trait StoreSession: Send {
    /// Rows matching the plan's filter, ignoring pagination
    async fn count(&mut self, plan: &ExecutablePlan) -> Result<u64>;

    /// Open the cursor over the filtered, sorted and paginated rows
    async fn scroll(&mut self, plan: &ExecutablePlan, fetch_size: usize) -> Result<()>;

    /// Next batch from the open cursor; empty once exhausted
    async fn fetch(&mut self) -> Result<Vec<RawRow>>;

    /// Distinct non-null values of a property, in ascending order
    async fn distinct(&mut self, table: &TableDescriptor, property: &str) -> Result<Vec<Value>>;

    /// End the transaction scope
    async fn release(self: Box<Self>) -> Result<()>;
}
