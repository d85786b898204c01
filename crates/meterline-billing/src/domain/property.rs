//! Typed values for the dynamic `properties` bag carried by events.
//!
//! COUNT_UNIQUE hashing goes through [`PropertyValue::canonical_string`], so
//! equivalent values such as `1.50` and `1.5`, or maps that differ only in key
//! order, hash the same. Meter filters use [`PropertyValue::matches_literal`],
//! which also reads a filter literal like `"1.50"` as a number when the
//! property is numeric.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    /// Arbitrary-precision numeric literal kept verbatim
    Number(NumberLiteral),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

/// Numeric literal that has not been narrowed to a machine type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberLiteral(String);

impl NumberLiteral {
    pub fn new(literal: impl Into<String>) -> Self {
        Self(literal.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PropertyValue {
    pub fn number(literal: impl Into<String>) -> Self {
        PropertyValue::Number(NumberLiteral::new(literal))
    }

    /// Exact decimal value for numeric variants and numeric strings.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            PropertyValue::Int(v) => Some(Decimal::from(*v)),
            PropertyValue::UInt(v) => Some(Decimal::from(*v)),
            PropertyValue::Float(v) => Decimal::from_f64(*v),
            PropertyValue::Number(literal) => parse_decimal(literal.as_str()),
            PropertyValue::String(s) => parse_decimal(s),
            PropertyValue::Null
            | PropertyValue::Bool(_)
            | PropertyValue::List(_)
            | PropertyValue::Map(_) => None,
        }
    }

    /// Best-effort raw rendering used for diagnostics.
    pub fn raw_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Number(literal) => literal.as_str().to_string(),
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::UInt(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            other => other.canonical_string(),
        }
    }

    /// Stable string form: order-independent for maps and identical for
    /// numerically equal values regardless of formatting.
    pub fn canonical_string(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out, true);
        out
    }

    /// Whether a configured filter literal selects this value. Numeric
    /// properties compare by value; everything else compares canonical strings.
    pub fn matches_literal(&self, literal: &str) -> bool {
        if self.canonical_string() == literal {
            return true;
        }
        match self {
            PropertyValue::Int(_)
            | PropertyValue::UInt(_)
            | PropertyValue::Float(_)
            | PropertyValue::Number(_) => match (self.to_decimal(), parse_decimal(literal)) {
                (Some(value), Some(wanted)) => value == wanted,
                _ => false,
            },
            _ => false,
        }
    }

    fn write_canonical(&self, out: &mut String, top_level: bool) {
        match self {
            PropertyValue::Null => out.push_str("null"),
            PropertyValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            PropertyValue::Int(_)
            | PropertyValue::UInt(_)
            | PropertyValue::Float(_)
            | PropertyValue::Number(_) => out.push_str(&self.canonical_number()),
            PropertyValue::String(s) => {
                if top_level {
                    out.push_str(s);
                } else {
                    push_quoted(out, s);
                }
            }
            PropertyValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out, false);
                }
                out.push(']');
            }
            PropertyValue::Map(entries) => {
                // BTreeMap iteration is already key-ordered
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    push_quoted(out, key);
                    out.push(':');
                    value.write_canonical(out, false);
                }
                out.push('}');
            }
        }
    }

    fn canonical_number(&self) -> String {
        match self.to_decimal() {
            Some(d) => d.normalize().to_string(),
            None => match self {
                PropertyValue::Float(v) => v.to_string(),
                PropertyValue::Number(literal) => literal.as_str().trim().to_string(),
                _ => String::new(),
            },
        }
    }
}

fn push_quoted(out: &mut String, s: &str) {
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
    }
}

/// Parse plain or scientific decimal notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PropertyValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    PropertyValue::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    PropertyValue::Float(f)
                } else {
                    PropertyValue::number(n.to_string())
                }
            }
            serde_json::Value::String(s) => PropertyValue::String(s),
            serde_json::Value::Array(items) => {
                PropertyValue::List(items.into_iter().map(PropertyValue::from).collect())
            }
            serde_json::Value::Object(entries) => PropertyValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for PropertyValue {
            fn from(v: $t) -> Self {
                PropertyValue::Int(i64::from(v))
            }
        })*
    };
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for PropertyValue {
            fn from(v: $t) -> Self {
                PropertyValue::UInt(u64::from(v))
            }
        })*
    };
}

impl_from_signed!(i8, i16, i32, i64);
impl_from_unsigned!(u8, u16, u32, u64);

impl From<isize> for PropertyValue {
    fn from(v: isize) -> Self {
        PropertyValue::Int(v as i64)
    }
}

impl From<usize> for PropertyValue {
    fn from(v: usize) -> Self {
        PropertyValue::UInt(v as u64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        // Widen through the shortest f32 rendering so 0.1f32 stays 0.1
        let widened = v.to_string().parse::<f64>().unwrap_or(f64::from(v));
        PropertyValue::Float(widened)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<Decimal> for PropertyValue {
    fn from(v: Decimal) -> Self {
        PropertyValue::number(v.to_string())
    }
}
