//! Element factories and the process-wide registry.
//!
//! Element types are registered under a type name with a constructor. The
//! launch parser and applications create elements by type name:
//!
//! ```rust
//! use mediaflow::plugin::Registry;
//!
//! let registry = Registry::global();
//! let queue = registry.create_element("queue", None).unwrap();
//! assert!(queue.name().starts_with("queue"));
//! assert!(registry.create_element("no-such-type", None).is_err());
//! ```
//!
//! The global registry holds the built-in elements from
//! [`crate::elements`]; applications add their own with
//! [`Registry::register`]. Dynamic loading of shared-library plugins is not
//! supported; a "plugin" is any code that registers factories.

mod factory;
mod registry;

pub use factory::{ElementConstructor, ElementFactory};
pub use registry::Registry;
