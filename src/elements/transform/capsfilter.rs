//! CapsFilter: restricts the formats negotiated across a link.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, PropertyValue};
use crate::error::{Error, FlowError, FlowResult, Result};
use crate::event::Event;
use crate::pad::{Pad, PadTemplate};

/// Passes data through unchanged while limiting caps queries on both pads
/// to its `caps` property.
///
/// When the filter caps are fixed and upstream never announced caps, the
/// filter caps are set on the source pad before the first buffer.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::CapsFilter;
///
/// let filter = CapsFilter::new("video/x-raw, width=320".parse().unwrap()).into_element("f");
/// let caps = filter.static_pad("sink").unwrap().query_caps(None);
/// assert_eq!(caps.structure(0).unwrap().get_int("width"), Some(320));
/// ```
pub struct CapsFilter {
    caps: Mutex<Caps>,
}

impl CapsFilter {
    /// Create a filter for `caps`.
    pub fn new(caps: Caps) -> Self {
        Self {
            caps: Mutex::new(caps),
        }
    }

    /// Wrap this filter in an element.
    pub fn into_element(self, name: &str) -> Element {
        Element::new(name, self)
    }

    /// Current filter caps.
    pub fn caps(&self) -> Caps {
        self.caps.lock().clone()
    }
}

impl Default for CapsFilter {
    fn default() -> Self {
        Self::new(Caps::new_any())
    }
}

impl ElementImpl for CapsFilter {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![
            Arc::new(PadTemplate::sink(Caps::new_any())),
            Arc::new(PadTemplate::src(Caps::new_any())),
        ]
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let Some(src) = element.static_pad("src") else {
            return Err(FlowError::Error);
        };
        if src.current_caps().is_none() {
            let caps = self.caps();
            if caps.is_fixed() {
                if let Err(err) = src.set_caps(&caps) {
                    tracing::debug!(element = %element.name(), %err, "downstream refused filter caps");
                    return Err(FlowError::NotNegotiated);
                }
            }
        }
        src.push(buffer)
    }

    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        if let Event::Caps(caps) = &event {
            if !caps.is_subset(&self.caps()) {
                tracing::debug!(element = %element.name(), %caps, "caps outside the filter");
                return false;
            }
        }
        pad.event_default(event)
    }

    fn query_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        let caps = self.caps();
        let restricted = match filter {
            Some(filter) => filter.intersect(&caps),
            None => caps,
        };
        pad.proxy_query_caps(Some(&restricted))
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "caps" => {
                *self.caps.lock() = value.expect_with(name, "caps", PropertyValue::as_caps)?;
                Ok(())
            }
            _ => Err(Error::UnknownProperty {
                element: element.name().to_string(),
                property: name.to_string(),
            }),
        }
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "caps" => Some(self.caps().into()),
            _ => None,
        }
    }
}
