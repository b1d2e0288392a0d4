//! Media capabilities (caps) for format negotiation.
//!
//! Caps describe the set of formats a pad can produce or consume:
//!
//! - `ANY`: every format
//! - `EMPTY`: no format
//! - an ordered list of [`Structure`]s, most preferred first
//!
//! Negotiation intersects the caps of both ends of a link and then fixes
//! the result down to a single format.
//!
//! ```rust
//! use mediaflow::caps::Caps;
//!
//! let src: Caps = "video/x-raw, width=(int)[ 1, 10 ]".parse().unwrap();
//! let sink: Caps = "video/x-raw, width=(int)5".parse().unwrap();
//!
//! let common = src.intersect(&sink);
//! assert!(common.is_fixed());
//! assert_eq!(common.to_string(), "video/x-raw, width=(int)5");
//! ```

mod parse;
mod structure;
mod value;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::Error;

pub use structure::Structure;
pub use value::{CapsValue, Fraction, Value, ValueType};

type Structures = SmallVec<[Structure; 1]>;

#[derive(Clone, Debug, PartialEq)]
struct CapsInner {
    any: bool,
    structures: Structures,
}

/// A set of media formats. Cheap to clone.
#[derive(Clone, PartialEq)]
pub struct Caps(Arc<CapsInner>);

impl Caps {
    /// Caps that accept every format.
    pub fn new_any() -> Self {
        Self(Arc::new(CapsInner {
            any: true,
            structures: Structures::new(),
        }))
    }

    /// Caps that accept nothing.
    pub fn new_empty() -> Self {
        Self::from_list(Structures::new())
    }

    fn from_list(structures: Structures) -> Self {
        Self(Arc::new(CapsInner {
            any: false,
            structures,
        }))
    }

    /// Caps with a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        let mut list = Structures::new();
        list.push(structure);
        Self::from_list(list)
    }

    /// Caps from a list of structures, kept in order.
    pub fn from_structures(structures: impl IntoIterator<Item = Structure>) -> Self {
        Self::from_list(structures.into_iter().collect())
    }

    /// Start building single-structure caps.
    ///
    /// ```rust
    /// use mediaflow::caps::{Caps, CapsValue};
    ///
    /// let caps = Caps::builder("audio/x-raw")
    ///     .field("rate", CapsValue::list([48000, 44100]))
    ///     .field("channels", 2)
    ///     .build();
    /// assert_eq!(caps.len(), 1);
    /// ```
    pub fn builder(name: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(name),
        }
    }

    /// True for `ANY`.
    pub fn is_any(&self) -> bool {
        self.0.any
    }

    /// True for `EMPTY`.
    pub fn is_empty(&self) -> bool {
        !self.0.any && self.0.structures.is_empty()
    }

    /// True if the caps describe exactly one format.
    pub fn is_fixed(&self) -> bool {
        !self.0.any && self.0.structures.len() == 1 && self.0.structures[0].is_fixed()
    }

    /// Number of structures (0 for `ANY`).
    pub fn len(&self) -> usize {
        self.0.structures.len()
    }

    /// Structure at `index`.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures().get(index)
    }

    /// All structures, most preferred first. Empty for `ANY`.
    pub fn structures(&self) -> &[Structure] {
        &self.0.structures
    }

    /// Mutable access to the structure list. Converts `ANY` to `EMPTY`.
    fn structures_mut(&mut self) -> &mut Structures {
        let inner = Arc::make_mut(&mut self.0);
        inner.any = false;
        &mut inner.structures
    }

    /// Append a structure unless an equal one is present.
    pub fn append_structure(&mut self, structure: Structure) {
        if self.is_any() {
            return;
        }
        let list = self.structures_mut();
        if !list.contains(&structure) {
            list.push(structure);
        }
    }

    /// Intersect two caps.
    ///
    /// The result keeps the preference order of `self` and contains no
    /// duplicate structures.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut out = Structures::new();
        for a in self.structures() {
            for b in other.structures() {
                if let Some(s) = a.intersect(b) {
                    if !out.contains(&s) {
                        out.push(s);
                    }
                }
            }
        }
        Self::from_list(out)
    }

    /// Check if the intersection is non-empty, without building it.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        if self.is_any() {
            return !other.is_empty();
        }
        if other.is_any() {
            return !self.is_empty();
        }
        self.structures()
            .iter()
            .any(|a| other.structures().iter().any(|b| a.can_intersect(b)))
    }

    /// Check if every format in `self` is also in `superset`.
    pub fn is_subset(&self, superset: &Caps) -> bool {
        if superset.is_any() {
            return true;
        }
        if self.is_any() {
            return false;
        }
        self.structures()
            .iter()
            .all(|s| superset.structures().iter().any(|sup| s.is_subset(sup)))
    }

    /// Check if both caps describe the same formats.
    pub fn is_equal(&self, other: &Caps) -> bool {
        self == other || (self.is_subset(other) && other.is_subset(self))
    }

    /// Union of two caps: structures of `other` not already covered by
    /// `self` are appended.
    pub fn merge(&self, other: &Caps) -> Caps {
        if self.is_any() || other.is_any() {
            return Caps::new_any();
        }
        let mut out = self.clone();
        for s in other.structures() {
            let covered = out.structures().iter().any(|existing| s.is_subset(existing));
            if !covered {
                out.structures_mut().push(s.clone());
            }
        }
        out
    }

    /// Alias for [`merge`](Self::merge).
    pub fn union(&self, other: &Caps) -> Caps {
        self.merge(other)
    }

    /// Remove structures that are duplicates or subsets of another
    /// structure. The earliest covering structure is kept.
    pub fn simplify(&self) -> Caps {
        if self.is_any() {
            return self.clone();
        }
        let list = self.structures();
        let mut out = Structures::new();
        for (i, s) in list.iter().enumerate() {
            let covered = list.iter().enumerate().any(|(j, other)| {
                i != j && s.is_subset(other) && (j < i || !other.is_subset(s))
            });
            if !covered {
                out.push(s.clone());
            }
        }
        Self::from_list(out)
    }

    /// Keep only the first structure.
    pub fn truncate(&self) -> Caps {
        match self.structures().first() {
            Some(first) if self.len() > 1 => Caps::from_structure(first.clone()),
            _ => self.clone(),
        }
    }

    /// Fix the caps down to one format: the first structure, with ranges
    /// fixed to their minimum and lists to their first entry.
    ///
    /// Returns `None` for `ANY` and `EMPTY`.
    pub fn fixate(&self) -> Option<Caps> {
        let mut first = self.structures().first()?.clone();
        first.fixate();
        Some(Caps::from_structure(first))
    }
}

impl Default for Caps {
    fn default() -> Self {
        Self::new_empty()
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Self::from_structure(structure)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("ANY");
        }
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        for (i, structure) in self.structures().iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{structure}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({self})")
    }
}

impl FromStr for Caps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_caps(s)
    }
}

/// Builder for single-structure caps.
#[derive(Debug, Clone)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<CapsValue>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish building.
    pub fn build(self) -> Caps {
        Caps::from_structure(self.structure)
    }
}
