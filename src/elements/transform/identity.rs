//! Identity element with callbacks for debugging.
//!
//! A pass-through element that allows inspection of buffers via callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, PropertyValue};
use crate::error::{Error, FlowError, FlowResult, Result};
use crate::event::Event;
use crate::pad::{Pad, PadTemplate};

/// Callback type for buffer inspection.
pub type BufferCallback = Box<dyn Fn(&Buffer) + Send + Sync>;

/// An identity element that passes buffers through unchanged while
/// optionally calling callbacks for inspection.
///
/// This is useful for debugging, logging, or metrics collection
/// without modifying the data flow. Caps queries are proxied, so the element
/// is transparent to negotiation.
///
/// Properties:
/// - `error-after` (int, -1): fail with a flow error once this many buffers
///   passed
/// - `silent` (bool, true): when false, every buffer is logged
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::Identity;
///
/// let identity = Identity::new()
///     .on_buffer(|buf| {
///         println!("Buffer: pts={}, len={}", buf.pts(), buf.len());
///     })
///     .into_element("debug-point");
/// assert!(identity.static_pad("sink").is_some());
/// ```
pub struct Identity {
    callback: RwLock<Option<Arc<BufferCallback>>>,
    error_after: AtomicI64,
    silent: AtomicBool,
    count: AtomicU64,
    bytes: AtomicU64,
}

impl Identity {
    /// Create a new identity element.
    pub fn new() -> Self {
        Self {
            callback: RwLock::new(None),
            error_after: AtomicI64::new(-1),
            silent: AtomicBool::new(true),
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Set a callback to be called for each buffer.
    pub fn on_buffer<F>(self, callback: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Fail after `n` buffers passed.
    pub fn with_error_after(self, n: u64) -> Self {
        self.error_after
            .store(i64::try_from(n).unwrap_or(i64::MAX), Ordering::Relaxed);
        self
    }

    /// Wrap this identity in an element.
    pub fn into_element(self, name: &str) -> Element {
        Element::new(name, self)
    }

    /// Get the number of buffers that passed through.
    pub fn buffer_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the total bytes that passed through.
    pub fn byte_count(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementImpl for Identity {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![
            Arc::new(PadTemplate::sink(Caps::new_any())),
            Arc::new(PadTemplate::src(Caps::new_any())),
        ]
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let error_after = self.error_after.load(Ordering::Relaxed);
        let seen = self.count.fetch_add(1, Ordering::Relaxed);
        if error_after >= 0 && seen >= error_after as u64 {
            element.post_error(
                "error-after limit reached",
                Some(format!("failed after {error_after} buffers")),
            );
            return Err(FlowError::Error);
        }
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);

        if !self.silent.load(Ordering::Relaxed) {
            tracing::info!(
                element = %element.name(),
                len = buffer.len(),
                pts = %buffer.pts(),
                "chain"
            );
        }
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(&buffer);
        }

        match element.static_pad("src") {
            Some(src) => src.push(buffer),
            None => Err(FlowError::Error),
        }
    }

    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        if !self.silent.load(Ordering::Relaxed) {
            tracing::info!(element = %element.name(), event = event.name(), "event");
        }
        pad.event_default(event)
    }

    fn get_range(
        &self,
        element: &Element,
        _pad: &Pad,
        offset: u64,
        size: u32,
    ) -> std::result::Result<Buffer, FlowError> {
        match element.static_pad("sink") {
            Some(sink) => sink.pull_range(offset, size),
            None => Err(FlowError::Error),
        }
    }

    fn query_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_query_caps(filter)
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "error-after" => {
                let n = value.expect_with(name, "an integer", PropertyValue::as_i64)?;
                self.error_after.store(n, Ordering::Relaxed);
            }
            "silent" => {
                let silent = value.expect_with(name, "a boolean", PropertyValue::as_bool)?;
                self.silent.store(silent, Ordering::Relaxed);
            }
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_string(),
                    property: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "error-after" => Some(self.error_after.load(Ordering::Relaxed).into()),
            "silent" => Some(self.silent.load(Ordering::Relaxed).into()),
            _ => None,
        }
    }
}
