//! Database facade
//!
//! Entry point used by the REST layer: owns the store, the resolved
//! catalog and the query builder for one configuration.

use std::sync::Arc;

use tracing::{info, warn};

use featureserver_common::config::MappingConfig;
use featureserver_common::error::{Error, Result};
use featureserver_common::types::{TableDescriptor, Value};

use crate::catalog::{resolve_servable, Catalog};
use crate::cursor::{ReadResult, ScrollCursor};
use crate::query::{ExecutablePlan, QueryBuilder, QuerySpec};
use crate::store::FeatureStore;

pub struct Database {
    store: Arc<dyn FeatureStore>,
    catalog: Catalog,
    builder: QueryBuilder,
    fetch_size: usize,
}

impl Database {
    /// Discover the servable tables of `store` under the mapping rules
    pub async fn discover(store: Arc<dyn FeatureStore>, mapping: &MappingConfig) -> Result<Self> {
        let all_tables = store.table_names().await?;
        let servable = resolve_servable(&all_tables, &mapping.include, &mapping.exclude);
        let described = store.describe(&servable).await?;

        for table in &described {
            info!(
                "Mapped table {} ({} properties{}{})",
                table.name,
                table.properties.len(),
                if table.id.is_some() { ", id" } else { "" },
                if table.geometry.is_some() { ", geometry" } else { "" }
            );
        }
        info!(
            "Serving {} of {} discovered tables",
            described.len(),
            all_tables.len()
        );

        Ok(Self {
            store,
            catalog: Catalog::new(described),
            builder: QueryBuilder::new(mapping.srid),
            fetch_size: mapping.fetch_size,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        self.catalog.tables()
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableDescriptor>> {
        self.catalog.get(name)
    }

    pub fn plan(&self, name: &str, spec: &QuerySpec) -> Result<ExecutablePlan> {
        let table = self.catalog.get(name)?;
        self.builder.build(&table, spec)
    }

    /// Plan and open a read; the caller owns the returned cursor
    pub async fn read(&self, name: &str, spec: &QuerySpec) -> Result<ReadResult> {
        let plan = self.plan(name, spec)?;
        ScrollCursor::open(self.store.as_ref(), plan, self.fetch_size).await
    }

    /// Distinct non-null values of a `String`, `Integer`, `Byte` or `Boolean` property
    pub async fn distinct_values(&self, name: &str, property: &str) -> Result<Vec<Value>> {
        let table = self.catalog.get(name)?;
        let kind = table
            .column_type(property)
            .ok_or_else(|| Error::PropertyNotFound {
                table: name.to_string(),
                property: property.to_string(),
            })?;
        if !kind.supports_distinct() {
            return Err(Error::DistinctNotSupported {
                table: name.to_string(),
                property: property.to_string(),
            });
        }

        let mut session = self.store.begin().await?;
        let values = session.distinct(&table, property).await;
        let released = session.release().await;
        match (values, released) {
            (Ok(values), Ok(())) => Ok(values),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), released) => {
                if let Err(release_error) = released {
                    warn!("Failed to release session on {}: {}", name, release_error);
                }
                Err(e)
            }
        }
    }
}
