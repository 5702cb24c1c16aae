//! PostgreSQL/PostGIS store
//!
//! Tables are discovered through `information_schema`. Each session runs in
//! a read-only transaction and streams rows through a named server-side
//! cursor, so large tables are never materialized in memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, Postgres, Row, Transaction};
use tracing::{debug, info};

use featureserver_common::config::DatabaseConfig;
use featureserver_common::error::{Error, Result};
use featureserver_common::types::{PropertyType, TableDescriptor, Value};

use super::sql::{SqlRenderer, Statement};
use super::{FeatureStore, StoreSession};
use crate::projector::RawRow;
use crate::query::ExecutablePlan;

const TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type IN ('BASE TABLE', 'VIEW') \
     ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT table_name::text, column_name::text, udt_name::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = ANY($2) \
     ORDER BY table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "SELECT tc.table_name::text, kcu.column_name::text \
     FROM information_schema.table_constraints tc \
     JOIN information_schema.key_column_usage kcu \
       ON tc.constraint_name = kcu.constraint_name \
      AND tc.table_schema = kcu.table_schema \
      AND tc.table_name = kcu.table_name \
     WHERE tc.constraint_type = 'PRIMARY KEY' \
       AND tc.table_schema = $1 AND tc.table_name = ANY($2)";

fn db_error(e: sqlx::Error) -> Error {
    Error::DatabaseError(e.to_string())
}

/// Prepare `statement` with its values bound in placeholder order
fn prepare(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    debug!("{} {:?}", statement.sql, statement.params);
    let query = sqlx::query(&statement.sql).persistent(false);
    statement.params.iter().fold(query, |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Date(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
    })
}

/// Map a PostgreSQL `udt_name` to the exposed property type
pub fn property_type(udt_name: &str) -> PropertyType {
    match udt_name {
        "varchar" | "text" | "bpchar" | "name" | "citext" => PropertyType::String,
        "int2" => PropertyType::Short,
        "int4" => PropertyType::Integer,
        "int8" => PropertyType::Long,
        "char" => PropertyType::Byte,
        "float4" => PropertyType::Float,
        "float8" => PropertyType::Double,
        "numeric" => PropertyType::Decimal,
        "bool" => PropertyType::Boolean,
        "date" => PropertyType::Date,
        "timestamp" | "timestamptz" => PropertyType::Timestamp,
        "geometry" => PropertyType::Geometry,
        _ => PropertyType::Other,
    }
}

/// Build a descriptor from ordered `(column, udt_name)` pairs
fn descriptor(name: &str, columns: &[(String, String)], primary_key: &[String]) -> TableDescriptor {
    let id_column = match primary_key {
        [single] => Some(single.as_str()),
        _ => None,
    };

    let mut table = TableDescriptor::new(name);
    for (column, udt_name) in columns {
        let kind = property_type(udt_name);
        if kind == PropertyType::Geometry {
            if table.geometry.is_none() {
                table.geometry = Some(column.clone());
            } else {
                debug!("Ignoring additional geometry column {} of {}", column, name);
            }
        } else if Some(column.as_str()) == id_column {
            table = table.with_id(column.clone(), kind);
        } else {
            table = table.with_property(column.clone(), kind);
        }
    }
    table
}

/// Store backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
    renderer: SqlRenderer,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(db_error)?;

        info!(
            "Connected to PostgreSQL (schema {}, {} connections)",
            config.schema, config.max_connections
        );
        Ok(Self::from_pool(pool, config.schema.clone()))
    }

    pub fn from_pool(pool: PgPool, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        Self {
            pool,
            renderer: SqlRenderer::new(schema.clone()),
            schema,
        }
    }
}

#[async_trait::async_trait]
impl FeatureStore for PgStore {
    async fn table_names(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(TABLES_SQL)
            .bind(&self.schema)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(db_error))
            .collect()
    }

    async fn describe(&self, names: &[String]) -> Result<Vec<TableDescriptor>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let column_rows = sqlx::query(COLUMNS_SQL)
            .bind(&self.schema)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let mut columns: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for row in &column_rows {
            let table: String = row.try_get(0).map_err(db_error)?;
            let column: String = row.try_get(1).map_err(db_error)?;
            let udt_name: String = row.try_get(2).map_err(db_error)?;
            columns.entry(table).or_default().push((column, udt_name));
        }

        let key_rows = sqlx::query(PRIMARY_KEYS_SQL)
            .bind(&self.schema)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for row in &key_rows {
            let table: String = row.try_get(0).map_err(db_error)?;
            let column: String = row.try_get(1).map_err(db_error)?;
            keys.entry(table).or_default().push(column);
        }

        Ok(names
            .iter()
            .filter_map(|name| {
                let table_columns = columns.get(name)?;
                let key = keys.get(name).map_or(&[][..], Vec::as_slice);
                Some(descriptor(name, table_columns, key))
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        (&mut *tx)
            .execute("SET TRANSACTION READ ONLY")
            .await
            .map_err(db_error)?;
        (&mut *tx)
            .execute("SET LOCAL TIME ZONE 'UTC'")
            .await
            .map_err(db_error)?;

        Ok(Box::new(PgSession {
            tx,
            renderer: self.renderer.clone(),
            cursor: None,
        }))
    }
}

struct OpenCursor {
    table: Arc<TableDescriptor>,
    fetch_sql: String,
    fetch_size: usize,
    exhausted: bool,
}

struct PgSession {
    tx: Transaction<'static, Postgres>,
    renderer: SqlRenderer,
    cursor: Option<OpenCursor>,
}

#[async_trait::async_trait]
impl StoreSession for PgSession {
    async fn count(&mut self, plan: &ExecutablePlan) -> Result<u64> {
        let statement = self.renderer.count(plan);
        let row = prepare(&statement)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        let count: i64 = row.try_get(0).map_err(db_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn scroll(&mut self, plan: &ExecutablePlan, fetch_size: usize) -> Result<()> {
        let statement = self.renderer.declare_cursor(plan);
        prepare(&statement)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        let fetch_size = fetch_size.max(1);
        self.cursor = Some(OpenCursor {
            table: plan.table.clone(),
            fetch_sql: SqlRenderer::fetch(fetch_size),
            fetch_size,
            exhausted: false,
        });
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Vec<RawRow>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(Vec::new());
        };
        if cursor.exhausted {
            return Ok(Vec::new());
        }

        let rows = (&mut *self.tx)
            .fetch_all(cursor.fetch_sql.as_str())
            .await
            .map_err(db_error)?;
        if rows.len() < cursor.fetch_size {
            cursor.exhausted = true;
        }
        rows.iter().map(|row| decode_row(&cursor.table, row)).collect()
    }

    async fn distinct(&mut self, table: &TableDescriptor, property: &str) -> Result<Vec<Value>> {
        let (_, kind) = table.resolve(property).ok_or_else(|| Error::PropertyNotFound {
            table: table.name.clone(),
            property: property.to_string(),
        })?;
        let sql = self.renderer.distinct(table, property, kind);
        debug!("{}", sql);
        let rows = (&mut *self.tx)
            .fetch_all(sql.as_str())
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| decode_value(row, 0, kind).map_err(db_error))
            .collect()
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

fn decode_row(table: &TableDescriptor, row: &PgRow) -> Result<RawRow> {
    let id = match &table.id {
        Some(id) => decode_value(row, 0, id.kind).map_err(db_error)?,
        None => Value::Null,
    };
    let geometry = row
        .try_get::<Option<String>, _>(1)
        .map_err(db_error)?
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    let values = table
        .properties
        .iter()
        .enumerate()
        .map(|(idx, p)| decode_value(row, idx + 2, p.kind).map_err(db_error))
        .collect::<Result<Vec<_>>>()?;

    Ok(RawRow {
        id,
        geometry,
        values,
    })
}

/// Decode one column rendered by [`super::sql::select_expr`]
fn decode_value(row: &PgRow, idx: usize, kind: PropertyType) -> std::result::Result<Value, sqlx::Error> {
    let value = match kind {
        PropertyType::Short | PropertyType::Integer | PropertyType::Long | PropertyType::Byte => {
            row.try_get::<Option<i64>, _>(idx)?.into()
        }
        PropertyType::Float | PropertyType::Double | PropertyType::Decimal => {
            row.try_get::<Option<f64>, _>(idx)?.into()
        }
        PropertyType::Boolean => row.try_get::<Option<bool>, _>(idx)?.into(),
        PropertyType::Date => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map_or(Value::Null, Value::Date),
        PropertyType::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map_or(Value::Null, Value::Timestamp),
        PropertyType::String | PropertyType::Other | PropertyType::Geometry => {
            row.try_get::<Option<String>, _>(idx)?.into()
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(c, t)| ((*c).to_string(), (*t).to_string()))
            .collect()
    }

    #[test]
    fn test_property_types() {
        assert_eq!(property_type("varchar"), PropertyType::String);
        assert_eq!(property_type("int4"), PropertyType::Integer);
        assert_eq!(property_type("char"), PropertyType::Byte);
        assert_eq!(property_type("numeric"), PropertyType::Decimal);
        assert_eq!(property_type("timestamptz"), PropertyType::Timestamp);
        assert_eq!(property_type("geometry"), PropertyType::Geometry);
        assert_eq!(property_type("jsonb"), PropertyType::Other);
    }

    #[test]
    fn test_descriptor_with_key_and_geometry() {
        let table = descriptor(
            "ABC_Roads",
            &columns(&[
                ("gid", "int4"),
                ("name", "varchar"),
                ("geom", "geometry"),
                ("centroid", "geometry"),
                ("lanes", "int2"),
            ]),
            &["gid".to_string()],
        );
        assert_eq!(table.id.as_ref().map(|c| c.name.as_str()), Some("gid"));
        assert_eq!(table.geometry.as_deref(), Some("geom"));
        let names: Vec<_> = table.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "lanes"]);
    }

    #[test]
    fn test_composite_key_has_no_id() {
        let table = descriptor(
            "links",
            &columns(&[("a", "int4"), ("b", "int4")]),
            &["a".to_string(), "b".to_string()],
        );
        assert!(table.id.is_none());
        assert_eq!(table.properties.len(), 2);
    }
}
