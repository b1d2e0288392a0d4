//! Element factories.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::element::Element;

/// Constructor called with the instance name.
pub type ElementConstructor = Arc<dyn Fn(&str) -> Element + Send + Sync>;

/// Creates elements of one type.
pub struct ElementFactory {
    name: String,
    description: String,
    constructor: ElementConstructor,
    /// Counter for generated instance names.
    instances: AtomicU32,
}

impl ElementFactory {
    /// Create a factory for type `name`.
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&str) -> Element + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            constructor: Arc::new(constructor),
            instances: AtomicU32::new(0),
        }
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Create an element. Without an instance name one is generated from
    /// the type name and a counter (`queue0`, `queue1`, ...).
    pub fn create(&self, instance_name: Option<&str>) -> Element {
        let name = match instance_name {
            Some(name) => name.to_string(),
            None => {
                let n = self.instances.fetch_add(1, Ordering::Relaxed);
                format!("{}{n}", self.name)
            }
        };
        tracing::trace!(factory = %self.name, element = %name, "creating element");
        (self.constructor)(&name)
    }
}

impl std::fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementFactory")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}
