//! Query planning
//!
//! Turns loosely-typed request parameters ([`QuerySpec`]) into a validated
//! [`ExecutablePlan`] bound to one table. Invalid bounding boxes, unknown
//! sort columns and unknown visible columns are dropped; a malformed
//! predicate, mismatched sort lists or a zero limit are rejected.

use std::ops::Range;
use std::sync::Arc;

use tracing::debug;

use featureserver_common::config::DEFAULT_SRID;
use featureserver_common::error::{Error, Result};
use featureserver_common::types::TableDescriptor;

use crate::bbox::BoundingBox;
use crate::cql::{self, ColumnRef, Predicate};
use crate::projector::Projection;

/// Read request parameters, before validation
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    /// `minx,miny,maxx,maxy` in the configured SRID
    pub bbox: Option<String>,
    /// CQL predicate
    pub predicate: Option<String>,
    pub start: Option<u64>,
    pub limit: Option<u64>,
    pub sort_columns: Vec<String>,
    /// Co-indexed with `sort_columns`; absent means all ascending
    pub sort_directions: Option<Vec<String>>,
    /// Property allowlist; absent means all properties
    pub visible_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// `asc` in any case is ascending, every other token descending
    pub fn parse(token: &str) -> Self {
        if token.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub column: ColumnRef,
    pub direction: SortDirection,
}

/// Pagination bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub start: u64,
    pub limit: Option<u64>,
}

impl Page {
    pub fn is_unbounded(&self) -> bool {
        self.start == 0 && self.limit.is_none()
    }

    /// Offsets of the rows this page selects out of `total` matching rows
    pub fn window(&self, total: usize) -> Range<usize> {
        let start = usize::try_from(self.start).unwrap_or(usize::MAX).min(total);
        let end = match self.limit {
            Some(limit) => start
                .saturating_add(usize::try_from(limit).unwrap_or(usize::MAX))
                .min(total),
            None => total,
        };
        start..end
    }
}

/// Bounding-box restriction on the geometry column
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialFilter {
    pub column: String,
    pub bbox: BoundingBox,
}

/// Row filter: conjunction of the spatial filter and the predicate
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub spatial: Option<SpatialFilter>,
    pub predicate: Option<Predicate>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.spatial.is_none() && self.predicate.is_none()
    }
}

/// Validated read, ready for a store session
#[derive(Debug, Clone)]
pub struct ExecutablePlan {
    pub table: Arc<TableDescriptor>,
    pub filter: Filter,
    pub order: Vec<SortKey>,
    pub page: Page,
    pub projection: Projection,
    /// Spatial reference of every bounding box in the filter
    pub srid: i32,
}

/// Builds plans for one spatial reference system
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    srid: i32,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self { srid: DEFAULT_SRID }
    }
}

impl QueryBuilder {
    pub fn new(srid: i32) -> Self {
        Self { srid }
    }

    pub fn build(&self, table: &Arc<TableDescriptor>, spec: &QuerySpec) -> Result<ExecutablePlan> {
        let filter = Filter {
            spatial: Self::spatial_filter(table, spec.bbox.as_deref()),
            predicate: predicate(table, spec.predicate.as_deref())?,
        };
        let order = sort_keys(table, &spec.sort_columns, spec.sort_directions.as_deref())?;
        let page = page(spec.start, spec.limit)?;
        let projection = Projection::new(table.clone(), spec.visible_columns.as_deref());

        Ok(ExecutablePlan {
            table: table.clone(),
            filter,
            order,
            page,
            projection,
            srid: self.srid,
        })
    }

    fn spatial_filter(table: &TableDescriptor, bbox: Option<&str>) -> Option<SpatialFilter> {
        let text = bbox?;
        let Some(column) = table.geometry.clone() else {
            debug!("Table {} has no geometry, ignoring bbox", table.name);
            return None;
        };
        match BoundingBox::parse(text) {
            Some(bbox) => Some(SpatialFilter { column, bbox }),
            None => {
                debug!("Ignoring malformed bbox \"{}\"", text);
                None
            }
        }
    }
}

fn predicate(table: &TableDescriptor, text: Option<&str>) -> Result<Option<Predicate>> {
    match text.map(str::trim) {
        Some(text) if !text.is_empty() => cql::parse(text, table).map(Some),
        _ => Ok(None),
    }
}

fn sort_keys(
    table: &TableDescriptor,
    columns: &[String],
    directions: Option<&[String]>,
) -> Result<Vec<SortKey>> {
    if let Some(directions) = directions {
        if directions.len() != columns.len() {
            return Err(Error::SizeMismatch {
                first: "sortColumns",
                second: "sortDirections",
                first_len: columns.len(),
                second_len: directions.len(),
            });
        }
    }

    let mut keys = Vec::with_capacity(columns.len());
    for (idx, name) in columns.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let Some((slot, kind)) = table.resolve(name) else {
            debug!("Ignoring sort on unknown column {} of {}", name, table.name);
            continue;
        };
        let direction = directions
            .and_then(|d| d.get(idx))
            .map_or(SortDirection::Asc, |d| SortDirection::parse(d));
        keys.push(SortKey {
            column: ColumnRef {
                name: name.to_string(),
                slot,
                kind,
            },
            direction,
        });
    }
    Ok(keys)
}

/// Largest offset or limit PostgreSQL accepts (bigint)
pub const MAX_PAGE_BOUND: u64 = i64::MAX.unsigned_abs();

fn page(start: Option<u64>, limit: Option<u64>) -> Result<Page> {
    if limit == Some(0) {
        return Err(Error::InvalidQueryParam(
            "limit must be greater than zero".to_string(),
        ));
    }
    Ok(Page {
        start: start.unwrap_or(0).min(MAX_PAGE_BOUND),
        limit: limit.map(|limit| limit.min(MAX_PAGE_BOUND)),
    })
}
