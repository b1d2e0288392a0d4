//! Named field sets.

use std::fmt;

use super::value::{CapsValue, Value};

/// A media type name with ordered field constraints, e.g.
/// `video/x-raw, width=(int)[ 1, 1920 ], format=(string){ I420, NV12 }`.
///
/// A field that is absent is unconstrained.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    name: String,
    fields: Vec<(String, CapsValue)>,
}

impl Structure {
    /// Create a structure with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<CapsValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Media type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a field, replacing an existing one in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<CapsValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Get a field constraint.
    pub fn get(&self, name: &str) -> Option<&CapsValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a field's value if it is fixed.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(CapsValue::as_fixed)
    }

    /// Get a fixed integer field.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get_value(name).and_then(Value::as_int)
    }

    /// Get a fixed string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get_value(name).and_then(Value::as_str)
    }

    /// Check if a field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a field. Returns the removed constraint.
    pub fn remove(&mut self, name: &str) -> Option<CapsValue> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    /// Iterate fields in order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &CapsValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// True if every field holds a single value.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Intersect two structures.
    ///
    /// Names must match. Fields present on both sides are intersected;
    /// fields present on only one side are copied. Returns `None` if any
    /// shared field has an empty intersection.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut fields = Vec::with_capacity(self.fields.len().max(other.fields.len()));
        for (name, value) in &self.fields {
            let merged = match other.get(name) {
                Some(o) => value.intersect(o)?,
                None => value.clone(),
            };
            fields.push((name.clone(), merged));
        }
        for (name, value) in &other.fields {
            if self.get(name).is_none() {
                fields.push((name.clone(), value.clone()));
            }
        }
        Some(Structure {
            name: self.name.clone(),
            fields,
        })
    }

    /// Check if two structures have a non-empty intersection.
    pub fn can_intersect(&self, other: &Structure) -> bool {
        self.name == other.name
            && self.fields.iter().all(|(name, value)| {
                other
                    .get(name)
                    .is_none_or(|o| value.intersect(o).is_some())
            })
    }

    /// Check if every format described by `self` is described by `other`.
    ///
    /// `other` may not constrain a field that `self` leaves open.
    pub fn is_subset(&self, other: &Structure) -> bool {
        self.name == other.name
            && other.fields.iter().all(|(name, sup)| {
                self.get(name).is_some_and(|sub| sub.is_subset(sup))
            })
    }

    /// Fix every field to one value.
    pub fn fixate(&mut self) {
        for (_, value) in &mut self.fields {
            if let Some(v) = value.fixate() {
                *value = CapsValue::Fixed(v);
            }
        }
    }

    /// Fix a field to the value nearest `target`, if the field is present.
    pub fn fixate_field_nearest(&mut self, name: &str, target: &Value) -> bool {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, value)) => match value.fixate_nearest(target) {
                Some(v) => {
                    *value = CapsValue::Fixed(v);
                    true
                }
                None => false,
            },
            None => false,
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (name, value) in &self.fields {
            write!(f, ", {name}=")?;
            if let Some(ty) = value.value_type() {
                write!(f, "({})", ty.as_str())?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}
