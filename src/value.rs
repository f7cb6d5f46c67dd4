//! Cell values and column type tags.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One parsed CSV field.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Integer(i64),
    Float(f64),
    String(String),
    Null,
}

impl Cell {
    /// Parses a raw field: null marker first, then integer, then float, else text.
    pub fn parse(raw: &str, nulls: &NullMarkers) -> Cell {
        if nulls.is_null(raw) {
            return Cell::Null;
        }
        let trimmed = raw.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            Cell::Integer(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            Cell::Float(f)
        } else {
            Cell::String(raw.to_owned())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Bytes owned on the heap beyond `size_of::<Cell>()`.
    pub fn heap_size(&self) -> usize {
        match self {
            Cell::String(s) => s.capacity(),
            _ => 0,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Integer(i) => write!(f, "{i}"),
            Cell::Float(x) => write!(f, "{x}"),
            Cell::String(s) => f.write_str(s),
            Cell::Null => Ok(()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Integer(i) => serializer.serialize_i64(*i),
            Cell::Float(x) if x.is_finite() => serializer.serialize_f64(*x),
            Cell::Float(_) | Cell::Null => serializer.serialize_none(),
            Cell::String(s) => serializer.serialize_str(s),
        }
    }
}

/// Inferred type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    String,
}

impl ColumnType {
    /// Narrowest tag that still admits `cell`. Nulls never widen.
    pub fn widen(self, cell: &Cell) -> ColumnType {
        match (self, cell) {
            (t, Cell::Null) => t,
            (ColumnType::String, _) | (_, Cell::String(_)) => ColumnType::String,
            (ColumnType::Float, _) | (_, Cell::Float(_)) => ColumnType::Float,
            (ColumnType::Integer, Cell::Integer(_)) => ColumnType::Integer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw field values read as missing.
pub const DEFAULT_NULL_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone)]
pub struct NullMarkers {
    markers: Arc<HashSet<String>>,
}

impl NullMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: Arc::new(markers.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_null(&self, raw: &str) -> bool {
        self.markers.contains(raw)
    }
}

impl Default for NullMarkers {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_MARKERS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefers_null_then_integer_then_float() {
        let nulls = NullMarkers::default();
        assert_eq!(Cell::parse("", &nulls), Cell::Null);
        assert_eq!(Cell::parse("NaN", &nulls), Cell::Null);
        assert_eq!(Cell::parse("42", &nulls), Cell::Integer(42));
        assert_eq!(Cell::parse(" -7 ", &nulls), Cell::Integer(-7));
        assert_eq!(Cell::parse("2.5", &nulls), Cell::Float(2.5));
        assert_eq!(Cell::parse("NYC", &nulls), Cell::String("NYC".into()));
    }

    #[test]
    fn widen_follows_integer_float_string_order() {
        let t = ColumnType::Integer
            .widen(&Cell::Integer(1))
            .widen(&Cell::Null);
        assert_eq!(t, ColumnType::Integer);
        assert_eq!(t.widen(&Cell::Float(0.5)), ColumnType::Float);
        assert_eq!(
            ColumnType::Float.widen(&Cell::String("x".into())),
            ColumnType::String
        );
        assert_eq!(ColumnType::String.widen(&Cell::Integer(3)), ColumnType::String);
    }

    #[test]
    fn null_serializes_as_json_null() {
        let json = serde_json::to_string(&vec![Cell::Null, Cell::Float(f64::NAN), Cell::Integer(3)])
            .unwrap();
        assert_eq!(json, "[null,null,3]");
    }
}
