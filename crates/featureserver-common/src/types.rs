//! Common types for the feature server

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

// ============================================================================
// Table Descriptors
// ============================================================================

/// Semantic type of a column, as exposed in the table listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    String,
    Short,
    Integer,
    Long,
    Byte,
    Float,
    Double,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Geometry,
    Other,
}

impl PropertyType {
    /// Whether distinct-value listings are permitted for this type
    pub fn supports_distinct(self) -> bool {
        matches!(
            self,
            Self::String | Self::Integer | Self::Byte | Self::Boolean
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(self, Self::Short | Self::Integer | Self::Long | Self::Byte)
    }

    pub fn is_fractional(self) -> bool {
        matches!(self, Self::Float | Self::Double | Self::Decimal)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PropertyType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Position of a scalar column within a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Id,
    Property(usize),
}

/// Table metadata produced by schema introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub id: Option<ColumnDescriptor>,
    pub geometry: Option<String>,
    pub properties: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            geometry: None,
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, name: impl Into<String>, kind: PropertyType) -> Self {
        self.id = Some(ColumnDescriptor::new(name, kind));
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, name: impl Into<String>) -> Self {
        self.geometry = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyType) -> Self {
        self.properties.push(ColumnDescriptor::new(name, kind));
        self
    }

    /// Index of a non-id, non-geometry property
    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// Resolve a scalar column (id or property). The geometry column is not scalar.
    pub fn resolve(&self, name: &str) -> Option<(Slot, PropertyType)> {
        if let Some(id) = &self.id {
            if id.name == name {
                return Some((Slot::Id, id.kind));
            }
        }
        self.property_index(name)
            .map(|idx| (Slot::Property(idx), self.properties[idx].kind))
    }

    pub fn is_geometry(&self, name: &str) -> bool {
        self.geometry.as_deref() == Some(name)
    }

    /// Type of any column of the table, geometry included
    pub fn column_type(&self, name: &str) -> Option<PropertyType> {
        if self.is_geometry(name) {
            return Some(PropertyType::Geometry);
        }
        self.resolve(name).map(|(_, kind)| kind)
    }

    /// All columns in listing order: id, geometry, then properties
    pub fn columns(&self) -> Vec<ColumnDescriptor> {
        let mut columns = Vec::with_capacity(self.properties.len() + 2);
        if let Some(id) = &self.id {
            columns.push(id.clone());
        }
        if let Some(geometry) = &self.geometry {
            columns.push(ColumnDescriptor::new(geometry.clone(), PropertyType::Geometry));
        }
        columns.extend(self.properties.iter().cloned());
        columns
    }
}

// ============================================================================
// Values
// ============================================================================

/// Scalar cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// 2^63: floats in `[-2^63, 2^63)` convert to `i64` without saturating
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL-style comparison: `None` when either side is null or the types are unrelated
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Timestamp(b)) => a.and_hms_opt(0, 0, 0).map(|a| a.cmp(b)),
            (Self::Timestamp(a), Self::Date(b)) => b.and_hms_opt(0, 0, 0).map(|b| a.cmp(&b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls sort after every other value
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Convert a literal to the representation used by a column of `kind`
    pub fn coerce_to(&self, kind: PropertyType) -> Option<Value> {
        if self.is_null() {
            return Some(Self::Null);
        }
        match kind {
            PropertyType::String | PropertyType::Other => Some(Self::Text(self.to_string())),
            k if k.is_integral() => match self {
                Self::Int(v) => Some(Self::Int(*v)),
                #[allow(clippy::cast_possible_truncation)]
                Self::Float(v) if v.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(v) => {
                    Some(Self::Int(*v as i64))
                }
                Self::Text(s) => s.trim().parse().ok().map(Self::Int),
                _ => None,
            },
            k if k.is_fractional() => match self {
                #[allow(clippy::cast_precision_loss)]
                Self::Int(v) => Some(Self::Float(*v as f64)),
                Self::Float(v) => Some(Self::Float(*v)),
                Self::Text(s) => s.trim().parse().ok().map(Self::Float),
                _ => None,
            },
            PropertyType::Boolean => match self {
                Self::Bool(v) => Some(Self::Bool(*v)),
                Self::Text(s) if s.eq_ignore_ascii_case("true") => Some(Self::Bool(true)),
                Self::Text(s) if s.eq_ignore_ascii_case("false") => Some(Self::Bool(false)),
                _ => None,
            },
            PropertyType::Date => match self {
                Self::Date(d) => Some(Self::Date(*d)),
                Self::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                    .ok()
                    .map(Self::Date),
                _ => None,
            },
            PropertyType::Timestamp => match self {
                Self::Timestamp(t) => Some(Self::Timestamp(*t)),
                Self::Date(d) => d.and_hms_opt(0, 0, 0).map(Self::Timestamp),
                Self::Text(s) => parse_timestamp(s.trim()).map(Self::Timestamp),
                _ => None,
            },
            _ => None,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Natural string form; null renders as the empty string
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Float(_) => serializer.serialize_none(),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Date(_) | Self::Timestamp(_) => serializer.collect_str(self),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roads() -> TableDescriptor {
        TableDescriptor::new("ABC_Roads")
            .with_id("gid", PropertyType::Integer)
            .with_geometry("geom")
            .with_property("name", PropertyType::String)
            .with_property("lanes", PropertyType::Short)
    }

    #[test]
    fn test_resolve_columns() {
        let table = roads();
        assert_eq!(table.resolve("gid"), Some((Slot::Id, PropertyType::Integer)));
        assert_eq!(
            table.resolve("lanes"),
            Some((Slot::Property(1), PropertyType::Short))
        );
        assert_eq!(table.resolve("geom"), None);
        assert_eq!(table.column_type("geom"), Some(PropertyType::Geometry));
        assert_eq!(table.resolve("missing"), None);
    }

    #[test]
    fn test_columns_listing_order() {
        let names: Vec<_> = roads().columns().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["gid", "geom", "name", "lanes"]);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        let date = NaiveDate::from_ymd_opt(2010, 4, 9).unwrap();
        assert_eq!(Value::Date(date).to_string(), "2010-04-09");
        let ts = date.and_hms_opt(11, 48, 54).unwrap();
        assert_eq!(Value::Timestamp(ts).to_string(), "2010-04-09T11:48:54");
    }

    #[test]
    fn test_value_json() {
        let json = serde_json::to_value(vec![
            Value::Null,
            Value::Int(3),
            Value::Text("x".into()),
            Value::Float(f64::NAN),
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!([null, 3, "x", null]));
    }

    #[test]
    fn test_compare_and_sort() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Greater);
        assert_eq!(Value::Int(1).sort_cmp(&Value::Null), Ordering::Less);
    }

    #[test]
    fn test_coerce_literals() {
        assert_eq!(
            Value::Text("12".into()).coerce_to(PropertyType::Integer),
            Some(Value::Int(12))
        );
        assert_eq!(Value::Int(3).coerce_to(PropertyType::Double), Some(Value::Float(3.0)));
        assert_eq!(Value::Text("abc".into()).coerce_to(PropertyType::Long), None);
        assert_eq!(
            Value::Int(7).coerce_to(PropertyType::String),
            Some(Value::Text("7".into()))
        );
        assert_eq!(
            Value::Text("2011-02-03".into()).coerce_to(PropertyType::Timestamp),
            Some(Value::Timestamp(
                NaiveDate::from_ymd_opt(2011, 2, 3)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
            ))
        );
        assert_eq!(Value::Int(1).coerce_to(PropertyType::Geometry), None);
    }

    #[test]
    fn test_float_to_integer_range() {
        assert_eq!(Value::Float(42.0).coerce_to(PropertyType::Long), Some(Value::Int(42)));
        assert_eq!(
            Value::Float(-9_223_372_036_854_775_808.0).coerce_to(PropertyType::Long),
            Some(Value::Int(i64::MIN))
        );
        assert_eq!(Value::Float(1e20).coerce_to(PropertyType::Long), None);
        assert_eq!(Value::Float(9_223_372_036_854_775_808.0).coerce_to(PropertyType::Integer), None);
        assert_eq!(Value::Float(f64::INFINITY).coerce_to(PropertyType::Long), None);
        assert_eq!(Value::Float(f64::NAN).coerce_to(PropertyType::Long), None);
        assert_eq!(Value::Float(2.5).coerce_to(PropertyType::Long), None);
    }

    #[test]
    fn test_distinct_support() {
        assert!(PropertyType::String.supports_distinct());
        assert!(PropertyType::Byte.supports_distinct());
        assert!(!PropertyType::Long.supports_distinct());
        assert!(!PropertyType::Geometry.supports_distinct());
    }
}
