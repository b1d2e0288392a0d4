//! Element property values.
//!
//! Properties are set by name with a loosely typed [`PropertyValue`]; the
//! launch parser produces them from `key=value` pairs, and elements convert
//! them with the `as_*` accessors.

use std::fmt;

use crate::caps::Caps;
use crate::error::{Error, Result};

/// A property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// A caps value.
    Caps(Caps),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
            PropertyValue::Caps(c) => c.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to get as caps, parsing strings.
    pub fn as_caps(&self) -> Option<Caps> {
        match self {
            PropertyValue::Caps(c) => Some(c.clone()),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Convert with `f`, reporting an [`Error::InvalidProperty`] on failure.
    pub fn expect_with<T>(
        &self,
        property: &str,
        what: &str,
        f: impl FnOnce(&Self) -> Option<T>,
    ) -> Result<T> {
        f(self).ok_or_else(|| Error::InvalidProperty {
            property: property.to_string(),
            reason: format!("expected {what}, got '{self}'"),
        })
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<u64> for PropertyValue {
    fn from(i: u64) -> Self {
        PropertyValue::Integer(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i64::from(i))
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<Caps> for PropertyValue {
    fn from(c: Caps) -> Self {
        PropertyValue::Caps(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(PropertyValue::from("42").as_u64(), Some(42));
        assert_eq!(PropertyValue::from(-1i64).as_u64(), None);
        assert_eq!(PropertyValue::from("yes").as_bool(), Some(true));
        assert_eq!(PropertyValue::from(3i64).as_f64(), Some(3.0));
        assert!(PropertyValue::from("video/x, width=4").as_caps().is_some());
    }

    #[test]
    fn test_expect_with_reports_property() {
        let err = PropertyValue::from("abc")
            .expect_with("num-buffers", "an integer", PropertyValue::as_i64)
            .unwrap_err();
        assert!(err.to_string().contains("num-buffers"));
    }
}
