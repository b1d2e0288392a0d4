//! Registry of element factories.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::factory::ElementFactory;
use crate::element::Element;
use crate::error::{Error, Result};

/// Registry for element factories.
///
/// The registry provides a central place to:
/// - Register element types
/// - Query available element types
/// - Create element instances by type name
pub struct Registry {
    /// Factories indexed by type name.
    factories: RwLock<HashMap<String, Arc<ElementFactory>>>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding the built-in elements.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        crate::elements::register_builtins(&registry);
        registry
    }

    /// The process-wide registry. Built-in elements are registered on first
    /// access.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Self::with_builtins)
    }

    /// Register a factory. Fails if the type name is taken.
    pub fn register(&self, factory: ElementFactory) -> Result<()> {
        let mut factories = self.factories.write();
        if factories.contains_key(factory.name()) {
            return Err(Error::AlreadyRegistered(factory.name().to_string()));
        }
        tracing::debug!(factory = %factory.name(), "registered element type");
        factories.insert(factory.name().to_string(), Arc::new(factory));
        Ok(())
    }

    /// Register a constructor under a type name.
    pub fn register_fn<F>(&self, name: &str, description: &str, constructor: F) -> Result<()>
    where
        F: Fn(&str) -> Element + Send + Sync + 'static,
    {
        self.register(ElementFactory::new(name, description, constructor))
    }

    /// Look up a factory.
    pub fn find(&self, name: &str) -> Option<Arc<ElementFactory>> {
        self.factories.read().get(name).cloned()
    }

    /// Check if an element type is registered.
    pub fn has_element(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// List all registered type names, sorted.
    pub fn list_elements(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Create an element of type `type_name`.
    pub fn create_element(&self, type_name: &str, instance_name: Option<&str>) -> Result<Element> {
        let factory = self
            .find(type_name)
            .ok_or_else(|| Error::UnknownType(type_name.to_string()))?;
        Ok(factory.create(instance_name))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementImpl;

    struct Dummy;

    impl ElementImpl for Dummy {}

    #[test]
    fn test_register_and_create() {
        let registry = Registry::new();
        registry
            .register_fn("dummy", "does nothing", |name| Element::new(name, Dummy))
            .unwrap();
        assert!(registry.has_element("dummy"));
        let a = registry.create_element("dummy", None).unwrap();
        let b = registry.create_element("dummy", None).unwrap();
        let named = registry.create_element("dummy", Some("mine")).unwrap();
        assert_eq!(a.name(), "dummy0");
        assert_eq!(b.name(), "dummy1");
        assert_eq!(named.name(), "mine");
        assert!(named.downcast_imp::<Dummy>().is_some());
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        registry
            .register_fn("dummy", "", |name| Element::new(name, Dummy))
            .unwrap();
        let err = registry
            .register_fn("dummy", "", |name| Element::new(name, Dummy))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(name) if name == "dummy"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = Registry::new();
        assert!(matches!(
            registry.create_element("nope", None),
            Err(Error::UnknownType(_))
        ));
    }

    #[test]
    fn test_global_has_builtins() {
        let names = Registry::global().list_elements();
        for builtin in [
            "appsink", "appsrc", "capsfilter", "datasrc", "identity", "nullsink", "queue", "tee",
        ] {
            assert!(names.iter().any(|n| n == builtin), "missing {builtin}");
        }
    }
}
