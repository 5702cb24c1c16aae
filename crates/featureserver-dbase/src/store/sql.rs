//! PostgreSQL statement rendering
//!
//! Identifiers are quoted into the statement text. Filter values never are:
//! they are collected as bind parameters and referenced as `$n`, including
//! in `DECLARE ... CURSOR`, which takes parameters under the extended
//! query protocol.

use std::fmt::Write;

use featureserver_common::types::{PropertyType, TableDescriptor, Value};

use crate::bbox::BoundingBox;
use crate::cql::{ColumnRef, Predicate};
use crate::query::{ExecutablePlan, SortDirection};

/// Name of the per-session cursor
pub const CURSOR_NAME: &str = "featureserver_cursor";

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Statement text and the values bound to its `$n` placeholders, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Bind parameters collected while rendering
#[derive(Debug, Default)]
struct Params(Vec<Value>);

impl Params {
    /// Placeholder for `value`; null is rendered inline
    fn bind(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.0.push(value.clone());
        format!("${}", self.0.len())
    }

    fn finish(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.0,
        }
    }
}

/// Column expression used in filters and sort keys
fn scalar(name: &str, kind: PropertyType) -> String {
    match kind {
        // "char" has no comparison operators against integer parameters
        PropertyType::Byte => format!("{}::integer", quote_ident(name)),
        // text parameters only compare against text
        PropertyType::Other => format!("{}::text", quote_ident(name)),
        _ => quote_ident(name),
    }
}

/// Column expression used in select lists, matching what the decoder reads
pub fn select_expr(name: &str, kind: PropertyType) -> String {
    let column = quote_ident(name);
    match kind {
        PropertyType::String | PropertyType::Other => format!("{column}::text"),
        PropertyType::Short | PropertyType::Integer | PropertyType::Long => {
            format!("{column}::int8")
        }
        PropertyType::Byte => format!("{column}::integer::int8"),
        PropertyType::Float | PropertyType::Double | PropertyType::Decimal => {
            format!("{column}::float8")
        }
        PropertyType::Timestamp => format!("{column}::timestamp"),
        PropertyType::Geometry => format!("ST_AsGeoJSON({column})"),
        PropertyType::Boolean | PropertyType::Date => column,
    }
}

/// Renders statements against one schema
#[derive(Debug, Clone)]
pub struct SqlRenderer {
    schema: String,
}

impl SqlRenderer {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn table(&self, table: &TableDescriptor) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&table.name))
    }

    pub fn count(&self, plan: &ExecutablePlan) -> Statement {
        let mut params = Params::default();
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            self.table(&plan.table),
            where_clause(plan, &mut params)
        );
        params.finish(sql)
    }

    /// Select list is always `id, geometry, properties...`; absent id or
    /// geometry columns are selected as NULL.
    pub fn select(&self, plan: &ExecutablePlan) -> Statement {
        let table = &plan.table;
        let mut columns = Vec::with_capacity(table.properties.len() + 2);
        columns.push(
            table
                .id
                .as_ref()
                .map_or_else(|| "NULL::text".to_string(), |id| select_expr(&id.name, id.kind)),
        );
        columns.push(table.geometry.as_ref().map_or_else(
            || "NULL::text".to_string(),
            |g| select_expr(g, PropertyType::Geometry),
        ));
        columns.extend(
            table
                .properties
                .iter()
                .map(|p| select_expr(&p.name, p.kind)),
        );

        let mut params = Params::default();
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            columns.join(", "),
            self.table(table),
            where_clause(plan, &mut params)
        );

        let mut order: Vec<String> = plan
            .order
            .iter()
            .map(|key| {
                format!(
                    "{} {} NULLS LAST",
                    scalar(&key.column.name, key.column.kind),
                    key.direction.as_sql()
                )
            })
            .collect();
        let sorted_by_id = |name: &str| plan.order.iter().any(|key| key.column.name == name);
        if let Some(id) = table.id.as_ref().filter(|id| !sorted_by_id(&id.name)) {
            order.push(format!(
                "{} {} NULLS LAST",
                scalar(&id.name, id.kind),
                SortDirection::Asc.as_sql()
            ));
        }
        if !order.is_empty() {
            let _ = write!(sql, " ORDER BY {}", order.join(", "));
        }

        if let Some(limit) = plan.page.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if plan.page.start > 0 {
            let _ = write!(sql, " OFFSET {}", plan.page.start);
        }
        params.finish(sql)
    }

    pub fn declare_cursor(&self, plan: &ExecutablePlan) -> Statement {
        let select = self.select(plan);
        Statement {
            sql: format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {}", select.sql),
            params: select.params,
        }
    }

    pub fn fetch(fetch_size: usize) -> String {
        format!("FETCH FORWARD {fetch_size} FROM {CURSOR_NAME}")
    }

    pub fn distinct(&self, table: &TableDescriptor, name: &str, kind: PropertyType) -> String {
        format!(
            "SELECT DISTINCT {} FROM {} WHERE {} IS NOT NULL ORDER BY 1",
            select_expr(name, kind),
            self.table(table),
            quote_ident(name)
        )
    }
}

fn where_clause(plan: &ExecutablePlan, params: &mut Params) -> String {
    let mut conditions = Vec::new();
    if let Some(spatial) = &plan.filter.spatial {
        conditions.push(envelope(&spatial.column, &spatial.bbox, plan.srid, params));
    }
    if let Some(predicate) = &plan.filter.predicate {
        conditions.push(predicate_sql(predicate, plan.srid, params));
    }
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn envelope(column: &str, bbox: &BoundingBox, srid: i32, params: &mut Params) -> String {
    let corners = [bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]
        .map(|c| params.bind(&Value::Float(c)));
    format!(
        "{} && ST_MakeEnvelope({}, {srid})",
        quote_ident(column),
        corners.join(", ")
    )
}

fn column(column: &ColumnRef) -> String {
    scalar(&column.name, column.kind)
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

/// Render a predicate, binding its values into `params`; `srid` applies to
/// `BBOX(...)` calls
fn predicate_sql(predicate: &Predicate, srid: i32, params: &mut Params) -> String {
    match predicate {
        Predicate::Compare {
            column: c,
            op,
            value,
        } => format!("{} {} {}", column(c), op.as_sql(), params.bind(value)),
        Predicate::Like {
            column: c,
            pattern,
            negated,
        } => format!(
            "CAST({} AS text) {}{} {}",
            quote_ident(&c.name),
            not(*negated),
            if pattern.case_insensitive { "ILIKE" } else { "LIKE" },
            params.bind(&Value::Text(pattern.pattern.clone()))
        ),
        Predicate::IsNull { column: c, negated } => {
            format!("{} IS {}NULL", column(c), not(*negated))
        }
        Predicate::Between {
            column: c,
            low,
            high,
            negated,
        } => {
            let low = params.bind(low);
            let high = params.bind(high);
            format!("{} {}BETWEEN {low} AND {high}", column(c), not(*negated))
        }
        Predicate::InList {
            column: c,
            values,
            negated,
        } => {
            let values: Vec<String> = values.iter().map(|v| params.bind(v)).collect();
            format!("{} {}IN ({})", column(c), not(*negated), values.join(", "))
        }
        Predicate::BBox { column, bbox } => envelope(column, bbox, srid, params),
        Predicate::And(left, right) => {
            let left = predicate_sql(left, srid, params);
            let right = predicate_sql(right, srid, params);
            format!("({left} AND {right})")
        }
        Predicate::Or(left, right) => {
            let left = predicate_sql(left, srid, params);
            let right = predicate_sql(right, srid, params);
            format!("({left} OR {right})")
        }
        Predicate::Not(inner) => format!("NOT ({})", predicate_sql(inner, srid, params)),
    }
}
