//! Bounding boxes

use serde_json::Value as JsonValue;

/// Axis-aligned rectangle in the configured spatial reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Build a box from corner coordinates; `None` unless finite and ordered
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Option<Self> {
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x > max_x || min_y > max_y {
            return None;
        }
        Some(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Parse `minx,miny,maxx,maxy`. Anything else yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let coords = text
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        match coords.as_slice() {
            [min_x, min_y, max_x, max_y] => Self::new(*min_x, *min_y, *max_x, *max_y),
            _ => None,
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Envelope of a GeoJSON geometry, `None` for empty or unreadable geometries
    pub fn envelope_of(geometry: &JsonValue) -> Option<Self> {
        let mut envelope: Option<BoundingBox> = None;
        match geometry.get("type").and_then(JsonValue::as_str) {
            Some("GeometryCollection") => {
                for member in geometry.get("geometries")?.as_array()? {
                    if let Some(inner) = Self::envelope_of(member) {
                        merge(&mut envelope, inner.min_x, inner.min_y);
                        merge(&mut envelope, inner.max_x, inner.max_y);
                    }
                }
            }
            Some(_) => collect_positions(geometry.get("coordinates")?, &mut envelope),
            None => return None,
        }
        envelope
    }
}

fn merge(envelope: &mut Option<BoundingBox>, x: f64, y: f64) {
    match envelope {
        Some(env) => env.expand(x, y),
        None => *envelope = BoundingBox::new(x, y, x, y),
    }
}

fn collect_positions(coordinates: &JsonValue, envelope: &mut Option<BoundingBox>) {
    let Some(items) = coordinates.as_array() else {
        return;
    };
    match (items.first().and_then(JsonValue::as_f64), items.get(1).and_then(JsonValue::as_f64)) {
        (Some(x), Some(y)) => merge(envelope, x, y),
        _ => {
            for item in items {
                collect_positions(item, envelope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid() {
        let bbox = BoundingBox::parse("150000, 160000,160000,170000.5").unwrap();
        assert_eq!(bbox.min_x, 150_000.0);
        assert_eq!(bbox.max_y, 170_000.5);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(BoundingBox::parse("").is_none());
        assert!(BoundingBox::parse("1,2,3").is_none());
        assert!(BoundingBox::parse("1,2,3,4,5").is_none());
        assert!(BoundingBox::parse("a,b,c,d").is_none());
        assert!(BoundingBox::parse("10,0,0,10").is_none());
        assert!(BoundingBox::parse("0,0,NaN,10").is_none());
    }

    #[test]
    fn test_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let b = BoundingBox::new(10.0, 10.0, 20.0, 20.0).unwrap();
        let c = BoundingBox::new(10.1, 0.0, 20.0, 5.0).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_envelope_of_point_and_line() {
        let point = json!({"type": "Point", "coordinates": [3.0, 4.0]});
        assert_eq!(
            BoundingBox::envelope_of(&point),
            BoundingBox::new(3.0, 4.0, 3.0, 4.0)
        );

        let line = json!({"type": "LineString", "coordinates": [[0.0, 5.0], [2.0, -1.0]]});
        assert_eq!(
            BoundingBox::envelope_of(&line),
            BoundingBox::new(0.0, -1.0, 2.0, 5.0)
        );
    }

    #[test]
    fn test_envelope_of_polygon_and_collection() {
        let polygon = json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 0.0]]]
        });
        assert_eq!(
            BoundingBox::envelope_of(&polygon),
            BoundingBox::new(0.0, 0.0, 4.0, 3.0)
        );

        let collection = json!({
            "type": "GeometryCollection",
            "geometries": [
                {"type": "Point", "coordinates": [-1.0, 2.0]},
                polygon
            ]
        });
        assert_eq!(
            BoundingBox::envelope_of(&collection),
            BoundingBox::new(-1.0, 0.0, 4.0, 3.0)
        );
    }

    #[test]
    fn test_envelope_of_empty() {
        assert!(BoundingBox::envelope_of(&json!({"type": "Point", "coordinates": []})).is_none());
        assert!(BoundingBox::envelope_of(&json!({"coordinates": [1.0, 2.0]})).is_none());
    }
}
