//! In-memory store
//!
//! Holds table descriptors and their rows in process and evaluates plans
//! the way the PostgreSQL store renders them: three-valued predicate logic,
//! bounding boxes against the geometry envelope, nulls sorted last and the
//! id column as final tie-breaker.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use featureserver_common::error::{Error, Result};
use featureserver_common::types::{Slot, TableDescriptor, Value};

use super::{FeatureStore, StoreSession};
use crate::bbox::BoundingBox;
use crate::cql::Predicate;
use crate::projector::RawRow;
use crate::query::{ExecutablePlan, SortDirection, SortKey};

static NULL: Value = Value::Null;

#[derive(Debug, Clone)]
struct MemoryTable {
    descriptor: TableDescriptor,
    rows: Arc<Vec<RawRow>>,
}

/// Store backed by in-process tables
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Vec<MemoryTable>>>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its rows
    #[must_use]
    pub fn with_table(self, descriptor: TableDescriptor, rows: Vec<RawRow>) -> Self {
        self.insert_table(descriptor, rows);
        self
    }

    /// Add or replace a table
    pub fn insert_table(&self, descriptor: TableDescriptor, rows: Vec<RawRow>) {
        let mut tables = self.tables.write();
        let table = MemoryTable {
            descriptor,
            rows: Arc::new(rows),
        };
        match tables
            .iter_mut()
            .find(|t| t.descriptor.name == table.descriptor.name)
        {
            Some(existing) => *existing = table,
            None => tables.push(table),
        }
    }

    /// Sessions begun and not yet released or dropped
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(AtomicOrdering::SeqCst)
    }

    fn rows_of(tables: &RwLock<Vec<MemoryTable>>, name: &str) -> Result<Arc<Vec<RawRow>>> {
        tables
            .read()
            .iter()
            .find(|t| t.descriptor.name == name)
            .map(|t| t.rows.clone())
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }
}

#[async_trait::async_trait]
impl FeatureStore for InMemoryStore {
    async fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read()
            .iter()
            .map(|t| t.descriptor.name.clone())
            .collect())
    }

    async fn describe(&self, names: &[String]) -> Result<Vec<TableDescriptor>> {
        let tables = self.tables.read();
        Ok(names
            .iter()
            .filter_map(|name| tables.iter().find(|t| &t.descriptor.name == name))
            .map(|t| t.descriptor.clone())
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreSession>> {
        self.open_sessions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemorySession {
            tables: self.tables.clone(),
            open_sessions: self.open_sessions.clone(),
            pending: VecDeque::new(),
            fetch_size: 0,
        }))
    }
}

struct MemorySession {
    tables: Arc<RwLock<Vec<MemoryTable>>>,
    open_sessions: Arc<AtomicUsize>,
    pending: VecDeque<RawRow>,
    fetch_size: usize,
}

impl MemorySession {
    fn matching(&self, plan: &ExecutablePlan) -> Result<Vec<RawRow>> {
        let rows = InMemoryStore::rows_of(&self.tables, &plan.table.name)?;
        Ok(rows
            .iter()
            .filter(|row| matches_filter(plan, row))
            .cloned()
            .collect())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StoreSession for MemorySession {
    async fn count(&mut self, plan: &ExecutablePlan) -> Result<u64> {
        Ok(self.matching(plan)?.len() as u64)
    }

    async fn scroll(&mut self, plan: &ExecutablePlan, fetch_size: usize) -> Result<()> {
        let mut rows = self.matching(plan)?;
        let id_key = plan.table.id.as_ref().map(|_| Slot::Id);
        rows.sort_by(|a, b| compare_rows(&plan.order, id_key, a, b));

        let window = plan.page.window(rows.len());
        debug!(
            "Scrolling {} of {} rows of {}",
            window.len(),
            rows.len(),
            plan.table.name
        );
        self.pending = rows.drain(window).collect();
        self.fetch_size = fetch_size.max(1);
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Vec<RawRow>> {
        let take = self.fetch_size.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    async fn distinct(&mut self, table: &TableDescriptor, property: &str) -> Result<Vec<Value>> {
        let (slot, _) = table.resolve(property).ok_or_else(|| Error::PropertyNotFound {
            table: table.name.clone(),
            property: property.to_string(),
        })?;
        let rows = InMemoryStore::rows_of(&self.tables, &table.name)?;
        let mut values: Vec<Value> = rows
            .iter()
            .map(|row| cell(row, slot))
            .filter(|v| !v.is_null())
            .cloned()
            .collect();
        values.sort_by(Value::sort_cmp);
        values.dedup();
        Ok(values)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn cell(row: &RawRow, slot: Slot) -> &Value {
    match slot {
        Slot::Id => &row.id,
        Slot::Property(idx) => row.values.get(idx).unwrap_or(&NULL),
    }
}

fn matches_filter(plan: &ExecutablePlan, row: &RawRow) -> bool {
    let spatial = plan
        .filter
        .spatial
        .as_ref()
        .map_or(Some(true), |s| in_bbox(row, &s.bbox));
    let predicate = plan
        .filter
        .predicate
        .as_ref()
        .map_or(Some(true), |p| evaluate(p, row));
    and(spatial, predicate) == Some(true)
}

fn in_bbox(row: &RawRow, bbox: &BoundingBox) -> Option<bool> {
    let geometry = row.geometry.as_ref()?;
    BoundingBox::envelope_of(geometry).map(|envelope| envelope.intersects(bbox))
}

fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn negate(value: Option<bool>, negated: bool) -> Option<bool> {
    value.map(|v| v != negated)
}

/// SQL three-valued evaluation: `None` is unknown
fn evaluate(predicate: &Predicate, row: &RawRow) -> Option<bool> {
    match predicate {
        Predicate::Compare { column, op, value } => {
            cell(row, column.slot).compare(value).map(|o| op.holds(o))
        }
        Predicate::Like {
            column,
            pattern,
            negated,
        } => {
            let value = cell(row, column.slot);
            if value.is_null() {
                return None;
            }
            negate(Some(pattern.is_match(&value.to_string())), *negated)
        }
        Predicate::IsNull { column, negated } => {
            negate(Some(cell(row, column.slot).is_null()), *negated)
        }
        Predicate::Between {
            column,
            low,
            high,
            negated,
        } => {
            let value = cell(row, column.slot);
            let above = value.compare(low).map(|o| o != Ordering::Less);
            let below = value.compare(high).map(|o| o != Ordering::Greater);
            negate(and(above, below), *negated)
        }
        Predicate::InList {
            column,
            values,
            negated,
        } => {
            let value = cell(row, column.slot);
            let found = values.iter().fold(Some(false), |acc, candidate| {
                or(acc, value.compare(candidate).map(|o| o == Ordering::Equal))
            });
            negate(found, *negated)
        }
        Predicate::BBox { bbox, .. } => in_bbox(row, bbox),
        Predicate::And(left, right) => and(evaluate(left, row), evaluate(right, row)),
        Predicate::Or(left, right) => or(evaluate(left, row), evaluate(right, row)),
        Predicate::Not(inner) => evaluate(inner, row).map(|v| !v),
    }
}

fn compare_rows(order: &[SortKey], tie_breaker: Option<Slot>, a: &RawRow, b: &RawRow) -> Ordering {
    for key in order {
        let (left, right) = (cell(a, key.column.slot), cell(b, key.column.slot));
        let ordering = match (left.is_null(), right.is_null(), key.direction) {
            (false, false, SortDirection::Desc) => right.sort_cmp(left),
            _ => left.sort_cmp(right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    tie_breaker.map_or(Ordering::Equal, |slot| cell(a, slot).sort_cmp(cell(b, slot)))
}
