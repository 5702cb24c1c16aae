//! CQL predicate translation
//!
//! Parses a textual CQL filter into a [`Predicate`] bound to one table.
//! The expression grammar is the SQL expression grammar (via `sqlparser`)
//! restricted to comparisons, `LIKE`/`ILIKE`, `IS NULL`, `BETWEEN`, `IN`,
//! boolean connectives and the `BBOX(geometry, minx, miny, maxx, maxy)`
//! spatial function. Literals are coerced to the type of the property they
//! are compared with, so every predicate is well typed once built.

use std::cmp::Ordering;

use regex::Regex;
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use featureserver_common::error::{Error, Result};
use featureserver_common::types::{PropertyType, Slot, TableDescriptor, Value};

use crate::bbox::BoundingBox;

/// A scalar column referenced by a predicate or sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    pub slot: Slot,
    pub kind: PropertyType,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn from_sql(op: &BinaryOperator) -> Option<Self> {
        match op {
            BinaryOperator::Eq => Some(Self::Eq),
            BinaryOperator::NotEq => Some(Self::NotEq),
            BinaryOperator::Lt => Some(Self::Lt),
            BinaryOperator::LtEq => Some(Self::LtEq),
            BinaryOperator::Gt => Some(Self::Gt),
            BinaryOperator::GtEq => Some(Self::GtEq),
            _ => None,
        }
    }

    /// Operator to use once the operands are swapped
    pub fn flip(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            other => other,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::LtEq => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::GtEq => ordering != Ordering::Less,
        }
    }
}

/// `LIKE` pattern with its compiled matcher
#[derive(Debug, Clone)]
pub struct LikePattern {
    pub pattern: String,
    pub case_insensitive: bool,
    matcher: Regex,
}

impl LikePattern {
    /// `%` matches any run of characters, `_` one character, `\` escapes
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self> {
        let mut body = String::with_capacity(pattern.len() + 8);
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '%' => body.push_str(".*"),
                '_' => body.push('.'),
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        body.push_str(&regex::escape(&escaped.to_string()));
                    }
                }
                other => body.push_str(&regex::escape(&other.to_string())),
            }
        }
        let flags = if case_insensitive { "(?is)" } else { "(?s)" };
        let matcher = Regex::new(&format!("{flags}^{body}$"))
            .map_err(|e| Error::InvalidFilter(format!("invalid LIKE pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            case_insensitive,
            matcher,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// Table-scoped boolean filter
#[derive(Debug, Clone)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: ColumnRef,
        pattern: LikePattern,
        negated: bool,
    },
    IsNull {
        column: ColumnRef,
        negated: bool,
    },
    Between {
        column: ColumnRef,
        low: Value,
        high: Value,
        negated: bool,
    },
    InList {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
    },
    BBox {
        column: String,
        bbox: BoundingBox,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// Parse `text` as a CQL filter over `table`
pub fn parse(text: &str, table: &TableDescriptor) -> Result<Predicate> {
    let dialect = GenericDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| Error::InvalidFilter(e.to_string()))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| Error::InvalidFilter(e.to_string()))?;

    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(Error::InvalidFilter(format!(
            "unexpected '{}' after expression",
            next.token
        )));
    }

    Translator { table }.predicate(&expr)
}

struct Translator<'a> {
    table: &'a TableDescriptor,
}

impl Translator<'_> {
    fn predicate(&self, expr: &Expr) -> Result<Predicate> {
        match expr {
            Expr::Nested(inner) => self.predicate(inner),
            Expr::BinaryOp { left, op, right } => match op {
                BinaryOperator::And => Ok(Predicate::And(
                    Box::new(self.predicate(left)?),
                    Box::new(self.predicate(right)?),
                )),
                BinaryOperator::Or => Ok(Predicate::Or(
                    Box::new(self.predicate(left)?),
                    Box::new(self.predicate(right)?),
                )),
                _ => {
                    let op = CompareOp::from_sql(op).ok_or_else(|| {
                        Error::InvalidFilter(format!("unsupported operator '{op}'"))
                    })?;
                    self.comparison(left, op, right)
                }
            },
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr,
            } => Ok(Predicate::Not(Box::new(self.predicate(expr)?))),
            Expr::IsNull(inner) => Ok(Predicate::IsNull {
                column: self.column(inner)?,
                negated: false,
            }),
            Expr::IsNotNull(inner) => Ok(Predicate::IsNull {
                column: self.column(inner)?,
                negated: true,
            }),
            Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => self.like(expr, pattern, *negated, false),
            Expr::ILike {
                negated,
                expr,
                pattern,
                ..
            } => self.like(expr, pattern, *negated, true),
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let column = self.column(expr)?;
                let low = self.typed_literal(&column, low)?;
                let high = self.typed_literal(&column, high)?;
                Ok(Predicate::Between {
                    column,
                    low,
                    high,
                    negated: *negated,
                })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let column = self.column(expr)?;
                let values = list
                    .iter()
                    .map(|item| self.typed_literal(&column, item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Predicate::InList {
                    column,
                    values,
                    negated: *negated,
                })
            }
            Expr::Function(function) => {
                let name = function.name.to_string();
                if !name.eq_ignore_ascii_case("bbox") {
                    return Err(Error::InvalidFilter(format!("unsupported function '{name}'")));
                }
                let args = function
                    .args
                    .iter()
                    .map(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
                        _ => Err(Error::InvalidFilter("invalid BBOX argument".to_string())),
                    })
                    .collect::<Result<Vec<_>>>()?;
                self.bbox(&args)
            }
            other => Err(Error::InvalidFilter(format!(
                "unsupported expression '{other}'"
            ))),
        }
    }

    fn comparison(&self, left: &Expr, op: CompareOp, right: &Expr) -> Result<Predicate> {
        let (column, op, literal) = if identifier(left).is_some() {
            (self.column(left)?, op, right)
        } else if identifier(right).is_some() {
            (self.column(right)?, op.flip(), left)
        } else {
            return Err(Error::InvalidFilter(
                "comparisons need a property on one side".to_string(),
            ));
        };
        let value = self.typed_literal(&column, literal)?;
        Ok(Predicate::Compare { column, op, value })
    }

    fn like(
        &self,
        expr: &Expr,
        pattern: &Expr,
        negated: bool,
        case_insensitive: bool,
    ) -> Result<Predicate> {
        let column = self.column(expr)?;
        let pattern = match literal(pattern) {
            Some(Value::Text(text)) => text,
            _ => {
                return Err(Error::InvalidFilter(
                    "LIKE needs a quoted string pattern".to_string(),
                ))
            }
        };
        Ok(Predicate::Like {
            column,
            pattern: LikePattern::new(&pattern, case_insensitive)?,
            negated,
        })
    }

    fn bbox(&self, args: &[&Expr]) -> Result<Predicate> {
        // An optional sixth argument names the CRS; coordinates are always
        // read in the configured SRID.
        if args.len() != 5 && args.len() != 6 {
            return Err(Error::InvalidFilter(
                "BBOX expects (geometry, minx, miny, maxx, maxy)".to_string(),
            ));
        }
        let column = identifier(args[0])
            .ok_or_else(|| Error::InvalidFilter("BBOX needs a geometry column".to_string()))?;
        if !self.table.is_geometry(column) {
            return Err(Error::InvalidFilter(format!(
                "{column} is not the geometry column of {}",
                self.table.name
            )));
        }
        let mut coords = [0.0_f64; 4];
        for (slot, arg) in coords.iter_mut().zip(&args[1..5]) {
            *slot = match literal(arg).and_then(|v| v.coerce_to(PropertyType::Double)) {
                Some(Value::Float(v)) => v,
                _ => {
                    return Err(Error::InvalidFilter(
                        "BBOX coordinates must be numbers".to_string(),
                    ))
                }
            };
        }
        let bbox = BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
            .ok_or_else(|| Error::InvalidFilter("BBOX corners are not ordered".to_string()))?;
        Ok(Predicate::BBox {
            column: column.to_string(),
            bbox,
        })
    }

    fn column(&self, expr: &Expr) -> Result<ColumnRef> {
        let name = identifier(expr)
            .ok_or_else(|| Error::InvalidFilter(format!("'{expr}' is not a property")))?;
        if self.table.is_geometry(name) {
            return Err(Error::InvalidFilter(format!(
                "geometry column {name} can only be used in BBOX"
            )));
        }
        let (slot, kind) = self.table.resolve(name).ok_or_else(|| {
            Error::InvalidFilter(format!(
                "table {} has no property {name}",
                self.table.name
            ))
        })?;
        Ok(ColumnRef {
            name: name.to_string(),
            slot,
            kind,
        })
    }

    fn typed_literal(&self, column: &ColumnRef, expr: &Expr) -> Result<Value> {
        let value = literal(expr)
            .ok_or_else(|| Error::InvalidFilter(format!("'{expr}' is not a literal")))?;
        value.coerce_to(column.kind).ok_or_else(|| {
            Error::InvalidFilter(format!(
                "'{value}' is not a valid {} value for {}",
                column.kind, column.name
            ))
        })
    }
}

fn identifier(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.as_str()),
        Expr::Nested(inner) => identifier(inner),
        _ => None,
    }
}

fn literal(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Value(value) => match value {
            SqlValue::Number(text, _) => parse_number(text),
            SqlValue::SingleQuotedString(text) => Some(Value::Text(text.clone())),
            SqlValue::Boolean(flag) => Some(Value::Bool(*flag)),
            SqlValue::Null => Some(Value::Null),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Value::Int(v) => Some(Value::Int(-v)),
            Value::Float(v) => Some(Value::Float(-v)),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => literal(expr),
        Expr::Nested(inner) => literal(inner),
        _ => None,
    }
}

fn parse_number(text: &str) -> Option<Value> {
    text.parse::<i64>()
        .map(Value::Int)
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(Value::Float))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cities() -> TableDescriptor {
        TableDescriptor::new("cities")
            .with_id("gid", PropertyType::Integer)
            .with_geometry("the_geom")
            .with_property("name", PropertyType::String)
            .with_property("population", PropertyType::Long)
            .with_property("capital", PropertyType::Boolean)
            .with_property("area", PropertyType::Double)
    }

    #[test]
    fn test_simple_comparison() {
        let predicate = parse("population > 10000", &cities()).unwrap();
        match predicate {
            Predicate::Compare { column, op, value } => {
                assert_eq!(column.name, "population");
                assert_eq!(column.slot, Slot::Property(1));
                assert_eq!(op, CompareOp::Gt);
                assert_eq!(value, Value::Int(10000));
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_literal_on_left_flips_operator() {
        match parse("100 <= gid", &cities()).unwrap() {
            Predicate::Compare { column, op, value } => {
                assert_eq!(column.slot, Slot::Id);
                assert_eq!(op, CompareOp::GtEq);
                assert_eq!(value, Value::Int(100));
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_literal_coerced_to_column_type() {
        match parse("area = 12", &cities()).unwrap() {
            Predicate::Compare { value, .. } => assert_eq!(value, Value::Float(12.0)),
            other => panic!("unexpected predicate {other:?}"),
        }
        match parse("name = 12", &cities()).unwrap() {
            Predicate::Compare { value, .. } => assert_eq!(value, Value::Text("12".into())),
            other => panic!("unexpected predicate {other:?}"),
        }
        match parse("population > -5", &cities()).unwrap() {
            Predicate::Compare { value, .. } => assert_eq!(value, Value::Int(-5)),
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_integer_literal_rejected() {
        let err = parse("population < 100000000000000000000", &cities()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
        let err = parse("gid = 3.5", &cities()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_connectives_and_nesting() {
        let predicate = parse(
            "(name LIKE 'Ant%' OR capital = true) AND NOT population IS NULL",
            &cities(),
        )
        .unwrap();
        match predicate {
            Predicate::And(left, right) => {
                assert!(matches!(*left, Predicate::Or(_, _)));
                assert!(matches!(*right, Predicate::Not(_)));
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn test_between_in_and_null() {
        assert!(matches!(
            parse("population BETWEEN 10 AND 20", &cities()).unwrap(),
            Predicate::Between { negated: false, .. }
        ));
        match parse("name NOT IN ('Gent', 'Brugge')", &cities()).unwrap() {
            Predicate::InList { values, negated, .. } => {
                assert!(negated);
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected predicate {other:?}"),
        }
        assert!(matches!(
            parse("area IS NOT NULL", &cities()).unwrap(),
            Predicate::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn test_bbox_function() {
        match parse("BBOX(the_geom, 0, 0, 10, 20)", &cities()).unwrap() {
            Predicate::BBox { column, bbox } => {
                assert_eq!(column, "the_geom");
                assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 10.0, 20.0).unwrap());
            }
            other => panic!("unexpected predicate {other:?}"),
        }
        assert!(parse("BBOX(name, 0, 0, 10, 20)", &cities()).is_err());
        assert!(parse("BBOX(the_geom, 0, 0, 10)", &cities()).is_err());
    }

    #[test]
    fn test_like_pattern() {
        let like = LikePattern::new("An_w%", false).unwrap();
        assert!(like.is_match("Antwerpen"));
        assert!(!like.is_match("antwerpen"));
        assert!(!like.is_match("Anwerpen"));

        let ilike = LikePattern::new("an%", true).unwrap();
        assert!(ilike.is_match("ANTWERPEN"));

        let escaped = LikePattern::new("100\\%", false).unwrap();
        assert!(escaped.is_match("100%"));
        assert!(!escaped.is_match("1000"));
    }

    #[test]
    fn test_invalid_filters() {
        let table = cities();
        for cql in [
            "population >",
            "name = 'x' garbage",
            "unknown = 1",
            "the_geom = 1",
            "population = 'many'",
            "name = other_name",
            "lower(name) = 'x'",
            "name LIKE 5",
        ] {
            let err = parse(cql, &table).unwrap_err();
            assert!(matches!(err, Error::InvalidFilter(_)), "{cql} gave {err:?}");
        }
    }
}
