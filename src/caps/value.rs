//! Field values and constraints.
//!
//! A [`Value`] is a single concrete value. A [`CapsValue`] constrains a field:
//! one fixed value, an inclusive range, or a union list of fixed values and
//! ranges. Intersection finds common ground, fixation picks one value.

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Fraction
// ============================================================================

/// A rational number, e.g. a framerate of 30000/1001.
#[derive(Clone, Copy, Debug)]
pub struct Fraction {
    /// Numerator.
    pub num: i32,
    /// Denominator (never zero for valid fractions).
    pub den: i32,
}

impl Fraction {
    /// Create a new fraction.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // Cross-multiply with the signs of the denominators normalized.
        let (an, ad) = normalize_sign(self);
        let (bn, bd) = normalize_sign(other);
        (an * bd).cmp(&(bn * ad))
    }
}

fn normalize_sign(f: &Fraction) -> (i128, i128) {
    let (n, d) = (i128::from(f.num), i128::from(f.den));
    if d < 0 { (-n, -d) } else { (n, d) }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Value
// ============================================================================

/// The type of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit signed integer.
    Int,
    /// Double-precision float.
    Double,
    /// Rational number.
    Fraction,
    /// UTF-8 string.
    Str,
    /// Boolean.
    Bool,
}

impl ValueType {
    /// Name used in the caps string form, e.g. `(int)`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
            Self::Fraction => "fraction",
            Self::Str => "string",
            Self::Bool => "boolean",
        }
    }

    /// Whether values of this type can form a range.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::Int | Self::Double | Self::Fraction)
    }
}

/// A single concrete field value.
#[derive(Clone, Debug)]
pub enum Value {
    /// Integer.
    Int(i64),
    /// Double.
    Double(f64),
    /// Fraction.
    Fraction(Fraction),
    /// String.
    Str(String),
    /// Boolean.
    Bool(bool),
}

impl Value {
    /// The value's type.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Double(_) => ValueType::Double,
            Self::Fraction(_) => ValueType::Fraction,
            Self::Str(_) => ValueType::Str,
            Self::Bool(_) => ValueType::Bool,
        }
    }

    /// Compare two values of the same type. Returns `None` across types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => Some(a.total_cmp(b)),
            (Self::Fraction(a), Self::Fraction(b)) => Some(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Integer content, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Double content, if this is a double.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Fraction content, if this is a fraction.
    pub fn as_fraction(&self) -> Option<Fraction> {
        match self {
            Self::Fraction(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => {
                // Keep a decimal point so the value parses back as a double.
                if v.is_finite() && v.fract() == 0.0 {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Self::Fraction(v) => write!(f, "{v}"),
            Self::Str(v) => write_string(f, v),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let bare = !s.is_empty() && s.chars().all(is_bare_char);
    if bare {
        return f.write_str(s);
    }
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

/// Characters allowed in an unquoted string.
pub(crate) fn is_bare_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '+' | ':')
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }

            impl From<$ty> for CapsValue {
                fn from(v: $ty) -> Self {
                    Self::Fixed(Value::from(v))
                }
            }
        )*
    };
}

impl_value_from!(
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Double,
    Fraction => Fraction,
    String => Str,
    &str => Str,
    bool => Bool,
);

// ============================================================================
// CapsValue
// ============================================================================

/// A constraint on one field.
///
/// # Examples
///
/// ```rust
/// use mediaflow::caps::{CapsValue, Value};
///
/// let range = CapsValue::range(1, 10);
/// let fixed = CapsValue::from(5);
///
/// assert_eq!(range.intersect(&fixed), Some(CapsValue::Fixed(Value::Int(5))));
/// assert_eq!(range.fixate(), Some(Value::Int(1)));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum CapsValue {
    /// Exactly this value.
    Fixed(Value),
    /// Any value in `[min, max]`.
    Range {
        /// Minimum acceptable value.
        min: Value,
        /// Maximum acceptable value.
        max: Value,
    },
    /// Union of fixed values and ranges, ordered by preference.
    List(Vec<CapsValue>),
}

impl CapsValue {
    /// Create an inclusive range.
    pub fn range(min: impl Into<Value>, max: impl Into<Value>) -> Self {
        Self::Range {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Create a list of fixed values. A single-entry list collapses to fixed.
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::from_items(values.into_iter().map(|v| Self::Fixed(v.into())).collect())
            .unwrap_or(Self::List(Vec::new()))
    }

    /// The alternatives of this constraint: list entries, or itself.
    fn items(&self) -> &[CapsValue] {
        match self {
            Self::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Build a constraint from alternatives, flattening nested lists and
    /// dropping duplicates. Returns `None` if nothing is left.
    fn from_items(items: Vec<CapsValue>) -> Option<CapsValue> {
        let mut out: Vec<CapsValue> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Self::List(inner) => {
                    for v in inner {
                        if !out.contains(&v) {
                            out.push(v);
                        }
                    }
                }
                v => {
                    if !out.contains(&v) {
                        out.push(v);
                    }
                }
            }
        }
        match out.len() {
            0 => None,
            1 => out.pop(),
            _ => Some(Self::List(out)),
        }
    }

    /// Check if a value satisfies this constraint.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => {
                matches!(value.compare(min), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(value.compare(max), Some(Ordering::Less | Ordering::Equal))
            }
            Self::List(items) => items.iter().any(|i| i.accepts(value)),
        }
    }

    /// Intersect two alternatives that are not lists.
    fn intersect_single(a: &CapsValue, b: &CapsValue) -> Option<CapsValue> {
        match (a, b) {
            (Self::Fixed(x), other) | (other, Self::Fixed(x)) => {
                other.accepts(x).then(|| Self::Fixed(x.clone()))
            }
            (
                Self::Range {
                    min: min1,
                    max: max1,
                },
                Self::Range {
                    min: min2,
                    max: max2,
                },
            ) => {
                let lo = match min1.compare(min2)? {
                    Ordering::Less => min2,
                    _ => min1,
                };
                let hi = match max1.compare(max2)? {
                    Ordering::Greater => max2,
                    _ => max1,
                };
                match lo.compare(hi)? {
                    Ordering::Greater => None,
                    Ordering::Equal => Some(Self::Fixed(lo.clone())),
                    Ordering::Less => Some(Self::Range {
                        min: lo.clone(),
                        max: hi.clone(),
                    }),
                }
            }
            _ => None,
        }
    }

    /// Intersect two constraints.
    ///
    /// Alternatives keep the order of `self`. Returns `None` if no value
    /// satisfies both.
    pub fn intersect(&self, other: &CapsValue) -> Option<CapsValue> {
        let mut out = Vec::new();
        for a in self.items() {
            for b in other.items() {
                if let Some(v) = Self::intersect_single(a, b) {
                    out.push(v);
                }
            }
        }
        Self::from_items(out)
    }

    /// Check if every value accepted by `self` is accepted by `other`.
    ///
    /// A range may be covered by several alternatives together: touching
    /// ranges join, and integer neighbours such as `[1, 5]` and `[6, 10]`
    /// cover `[1, 10]`.
    pub fn is_subset(&self, other: &CapsValue) -> bool {
        self.items().iter().all(|a| match a {
            Self::Fixed(v) => other.accepts(v),
            Self::Range { min, max } => Self::range_covered(min, max, other.items()),
            Self::List(_) => false,
        })
    }

    /// Walk the alternatives in ascending order, advancing the lowest
    /// uncovered value until it passes `max` or a gap shows up.
    fn range_covered(min: &Value, max: &Value, items: &[CapsValue]) -> bool {
        let mut spans: Vec<(&Value, &Value)> = items
            .iter()
            .filter_map(|item| match item {
                Self::Range { min, max } => Some((min, max)),
                Self::Fixed(v) => Some((v, v)),
                Self::List(_) => None,
            })
            .filter(|(lo, _)| lo.compare(min).is_some())
            .collect();
        spans.sort_by(|a, b| a.0.compare(b.0).unwrap_or(Ordering::Equal));

        let mut cursor = min.clone();
        for (lo, hi) in spans {
            if hi.compare(&cursor) == Some(Ordering::Less) {
                continue;
            }
            if lo.compare(&cursor) == Some(Ordering::Greater) {
                return false;
            }
            if hi.compare(max) != Some(Ordering::Less) {
                return true;
            }
            cursor = match hi {
                Value::Int(v) => match v.checked_add(1) {
                    Some(next) => Value::Int(next),
                    None => return true,
                },
                Value::Double(_) | Value::Fraction(_) => hi.clone(),
                Value::Str(_) | Value::Bool(_) => return false,
            };
        }
        false
    }

    /// Pick one value: the first list entry, the minimum of a range.
    pub fn fixate(&self) -> Option<Value> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(items) => items.first().and_then(|i| i.fixate()),
        }
    }

    /// Pick the value closest to `target` that the constraint accepts.
    ///
    /// Only meaningful for ordered types; other types fall back to
    /// [`fixate`](Self::fixate).
    pub fn fixate_nearest(&self, target: &Value) -> Option<Value> {
        if self.accepts(target) {
            return Some(target.clone());
        }
        let t = match target {
            Value::Int(v) => *v as f64,
            Value::Double(v) => *v,
            Value::Fraction(f) if f.den != 0 => f64::from(f.num) / f64::from(f.den),
            _ => return self.fixate(),
        };
        let as_f64 = |v: &Value| match v {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            Value::Fraction(f) if f.den != 0 => Some(f64::from(f.num) / f64::from(f.den)),
            _ => None,
        };
        let mut best: Option<(f64, Value)> = None;
        for item in self.items() {
            let candidates: Vec<&Value> = match item {
                Self::Fixed(v) => vec![v],
                Self::Range { min, max } => vec![min, max],
                Self::List(_) => Vec::new(),
            };
            for c in candidates {
                if let Some(x) = as_f64(c) {
                    let d = (x - t).abs();
                    if best.as_ref().is_none_or(|(bd, _)| d < *bd) {
                        best = Some((d, c.clone()));
                    }
                }
            }
        }
        best.map(|(_, v)| v).or_else(|| self.fixate())
    }

    /// Check if this is a single fixed value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Get the fixed value if this is fixed.
    #[inline]
    pub fn as_fixed(&self) -> Option<&Value> {
        match self {
            Self::Fixed(v) => Some(v),
            _ => None,
        }
    }

    /// Type of the values in this constraint (of the first alternative).
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Fixed(v) => Some(v.value_type()),
            Self::Range { min, .. } => Some(min.value_type()),
            Self::List(items) => items.first().and_then(|i| i.value_type()),
        }
    }
}

impl From<Value> for CapsValue {
    fn from(value: Value) -> Self {
        Self::Fixed(value)
    }
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Range { min, max } => write!(f, "[ {min}, {max} ]"),
            Self::List(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_equality_is_numeric() {
        assert_eq!(Fraction::new(1, 2), Fraction::new(2, 4));
        assert!(Fraction::new(30000, 1001) < Fraction::new(30, 1));
        assert!(Fraction::new(-1, -2) == Fraction::new(1, 2));
    }

    #[test]
    fn test_values_of_different_types_never_equal() {
        assert_ne!(Value::Int(1), Value::Double(1.0));
        assert_eq!(Value::Int(1).compare(&Value::Bool(true)), None);
    }

    #[test]
    fn test_fixed_in_range() {
        let r = CapsValue::range(1, 10);
        assert_eq!(r.intersect(&5.into()), Some(CapsValue::from(5)));
        assert_eq!(r.intersect(&11.into()), None);
    }

    #[test]
    fn test_range_overlap() {
        let a = CapsValue::range(1, 10);
        let b = CapsValue::range(5, 20);
        assert_eq!(a.intersect(&b), Some(CapsValue::range(5, 10)));

        let c = CapsValue::range(10, 20);
        assert_eq!(a.intersect(&c), Some(CapsValue::from(10)));
    }

    #[test]
    fn test_list_intersection_keeps_first_order() {
        let a = CapsValue::list(["I420", "NV12", "RGBA"]);
        let b = CapsValue::list(["RGBA", "I420"]);
        assert_eq!(a.intersect(&b), Some(CapsValue::list(["I420", "RGBA"])));
        assert_eq!(b.intersect(&a), Some(CapsValue::list(["RGBA", "I420"])));
    }

    #[test]
    fn test_list_with_ranges() {
        let a = CapsValue::List(vec![CapsValue::range(1, 5), CapsValue::from(100)]);
        let b = CapsValue::range(3, 200);
        assert_eq!(
            a.intersect(&b),
            Some(CapsValue::List(vec![CapsValue::range(3, 5), CapsValue::from(100)]))
        );
        assert_eq!(a.fixate(), Some(Value::Int(1)));
    }

    #[test]
    fn test_type_mismatch_does_not_intersect() {
        assert_eq!(CapsValue::from(1).intersect(&CapsValue::from("1")), None);
        assert_eq!(CapsValue::range(1, 2).intersect(&CapsValue::range(1.0, 2.0)), None);
    }

    #[test]
    fn test_subset() {
        assert!(CapsValue::from(5).is_subset(&CapsValue::range(1, 10)));
        assert!(CapsValue::range(2, 3).is_subset(&CapsValue::range(1, 10)));
        assert!(!CapsValue::range(1, 10).is_subset(&CapsValue::from(5)));
        assert!(CapsValue::list([1, 2]).is_subset(&CapsValue::list([3, 2, 1])));
    }

    #[test]
    fn test_range_subset_of_joined_ranges() {
        let whole = CapsValue::range(1, 10);
        let halves = CapsValue::List(vec![CapsValue::range(1, 5), CapsValue::range(6, 10)]);
        assert!(whole.is_subset(&halves));
        assert!(halves.is_subset(&whole));

        let gap = CapsValue::List(vec![CapsValue::range(1, 4), CapsValue::range(6, 10)]);
        assert!(!whole.is_subset(&gap));

        let mixed = CapsValue::List(vec![
            CapsValue::range(6, 10),
            CapsValue::from(5),
            CapsValue::range(1, 4),
        ]);
        assert!(whole.is_subset(&mixed));

        let touching = CapsValue::List(vec![CapsValue::range(1.0, 2.0), CapsValue::range(2.0, 3.0)]);
        assert!(CapsValue::range(1.0, 3.0).is_subset(&touching));
        let apart = CapsValue::List(vec![CapsValue::range(1.0, 2.0), CapsValue::range(2.5, 3.0)]);
        assert!(!CapsValue::range(1.0, 3.0).is_subset(&apart));
    }

    #[test]
    fn test_fixate_nearest() {
        let r = CapsValue::range(100, 200);
        assert_eq!(r.fixate_nearest(&Value::Int(150)), Some(Value::Int(150)));
        assert_eq!(r.fixate_nearest(&Value::Int(500)), Some(Value::Int(200)));
        let l = CapsValue::list(["a", "b"]);
        assert_eq!(l.fixate_nearest(&Value::from("z")), Some(Value::from("a")));
    }

    #[test]
    fn test_display() {
        assert_eq!(CapsValue::range(1, 10).to_string(), "[ 1, 10 ]");
        assert_eq!(CapsValue::list(["I420", "NV12"]).to_string(), "{ I420, NV12 }");
        assert_eq!(CapsValue::from(2.0).to_string(), "2.0");
        assert_eq!(CapsValue::from("a b").to_string(), "\"a b\"");
    }
}
