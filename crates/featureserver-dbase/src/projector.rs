//! Row projection
//!
//! A [`Projection`] selects and orders the properties emitted for a read.
//! The same column list drives the CSV header, every CSV line and the JSON
//! `properties` object, so all three always agree.

use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value as JsonValue;
use tracing::debug;

use featureserver_common::types::{TableDescriptor, Value};

/// Row as produced by a store: `values` is co-indexed with the table's properties
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub id: Value,
    pub geometry: Option<JsonValue>,
    pub values: Vec<Value>,
}

impl RawRow {
    pub fn new(id: impl Into<Value>, geometry: Option<JsonValue>, values: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            geometry,
            values,
        }
    }
}

/// Ordered selection of table properties
#[derive(Debug, Clone)]
pub struct Projection {
    table: Arc<TableDescriptor>,
    indices: Vec<usize>,
    names: Arc<[String]>,
}

impl Projection {
    /// Intersect `visible` with the table's properties, keeping the requested
    /// order. `None` selects every property in catalog order.
    pub fn new(table: Arc<TableDescriptor>, visible: Option<&[String]>) -> Self {
        let indices: Vec<usize> = match visible {
            None => (0..table.properties.len()).collect(),
            Some(requested) => {
                let mut indices = Vec::with_capacity(requested.len());
                for name in requested {
                    match table.property_index(name.trim()) {
                        Some(idx) if !indices.contains(&idx) => indices.push(idx),
                        Some(_) => {}
                        None => debug!("Ignoring visible column {} of {}", name, table.name),
                    }
                }
                indices
            }
        };
        let names = indices
            .iter()
            .map(|&idx| table.properties[idx].name.clone())
            .collect();

        Self {
            table,
            indices,
            names,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub fn project(&self, row: RawRow) -> FeatureRecord {
        let RawRow {
            id,
            geometry,
            mut values,
        } = row;
        let values = self
            .indices
            .iter()
            .map(|&idx| {
                values
                    .get_mut(idx)
                    .map_or(Value::Null, |v| std::mem::replace(v, Value::Null))
            })
            .collect();
        let id = match (&self.table.id, id) {
            (Some(_), id) if !id.is_null() => Some(id),
            _ => None,
        };
        let geometry = if self.table.geometry.is_some() {
            geometry.filter(|g| !g.is_null())
        } else {
            None
        };

        FeatureRecord {
            id,
            geometry,
            names: self.names.clone(),
            values,
        }
    }
}

/// Projected feature: optional id, optional GeoJSON geometry and ordered properties
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: Option<Value>,
    pub geometry: Option<JsonValue>,
    names: Arc<[String]>,
    values: Vec<Value>,
}

impl FeatureRecord {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.values[idx])
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(self.values.iter())
    }
}

struct Properties<'a>(&'a FeatureRecord);

impl Serialize for Properties<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.values.len()))?;
        for (name, value) in self.0.properties() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for FeatureRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = 1 + usize::from(self.id.is_some()) + usize::from(self.geometry.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", id)?;
        }
        if let Some(geometry) = &self.geometry {
            map.serialize_entry("geometry", geometry)?;
        }
        map.serialize_entry("properties", &Properties(self))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featureserver_common::types::PropertyType;
    use serde_json::json;

    fn parcels() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("parcels")
                .with_id("gid", PropertyType::Integer)
                .with_geometry("geom")
                .with_property("name", PropertyType::String)
                .with_property("area", PropertyType::Double)
                .with_property("owner", PropertyType::String),
        )
    }

    fn row() -> RawRow {
        RawRow::new(
            7,
            Some(json!({"type": "Point", "coordinates": [1.0, 2.0]})),
            vec![Value::from("Kouter"), Value::Float(12.5), Value::Null],
        )
    }

    #[test]
    fn test_project_all_properties() {
        let projection = Projection::new(parcels(), None);
        let record = projection.project(row());
        assert_eq!(record.id, Some(Value::Int(7)));
        assert_eq!(record.names(), &["name", "area", "owner"]);
        assert_eq!(record.get("area"), Some(&Value::Float(12.5)));
        assert_eq!(record.get("gid"), None);
    }

    #[test]
    fn test_project_visible_subset() {
        let visible = vec!["name".to_string(), "area".to_string()];
        let projection = Projection::new(parcels(), Some(&visible));
        let record = projection.project(row());
        assert_eq!(record.names(), projection.column_names());
        assert_eq!(
            record.values(),
            &[Value::from("Kouter"), Value::Float(12.5)]
        );
    }

    #[test]
    fn test_visible_name_only_example() {
        let table = Arc::new(
            TableDescriptor::new("places")
                .with_id("id", PropertyType::Integer)
                .with_property("name", PropertyType::String),
        );
        let visible = vec!["name".to_string(), "area".to_string()];
        let projection = Projection::new(table, Some(&visible));
        assert_eq!(projection.column_names(), &["name"]);
    }

    #[test]
    fn test_json_shape() {
        let visible = vec!["area".to_string(), "name".to_string()];
        let projection = Projection::new(parcels(), Some(&visible));
        let json = serde_json::to_string(&projection.project(row())).unwrap();
        assert_eq!(
            json,
            r#"{"id":7,"geometry":{"coordinates":[1.0,2.0],"type":"Point"},"properties":{"area":12.5,"name":"Kouter"}}"#
        );
    }

    #[test]
    fn test_json_omits_absent_id_and_geometry() {
        let table = Arc::new(TableDescriptor::new("codes").with_property("code", PropertyType::String));
        let projection = Projection::new(table, None);
        let record = projection.project(RawRow::new(Value::Null, None, vec![Value::from("A")]));
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"properties": {"code": "A"}})
        );
    }
}
