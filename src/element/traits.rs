//! The element implementation interface.

use std::any::Any;
use std::sync::Arc;

use crate::bin::BinCore;
use crate::buffer::Buffer;
use crate::bus::Bus;
use crate::caps::Caps;
use crate::clock::Clock;
use crate::error::{Error, FlowError, FlowResult, Result};
use crate::event::Event;
use crate::message::Message;
use crate::pad::{Pad, PadTemplate};

use super::property::PropertyValue;
use super::state::{StateChange, StateChangeResult, StateChangeSuccess};
use super::{Element, ElementFlags};

// ============================================================================
// Downcasting
// ============================================================================

/// Access to `dyn Any` for downcasting implementations.
pub trait AsAny {
    /// Get `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// ElementImpl
// ============================================================================

/// Behaviour of an element type.
///
/// An [`Element`] handle owns one implementation object. The core calls
/// these hooks; every hook has a default so an implementation only
/// overrides what it needs. Hooks receive the element handle first, so an
/// implementation can reach its pads, post messages and commit async state
/// changes.
///
/// Always-present pads listed by [`pad_templates`](Self::pad_templates) are
/// created before [`constructed`](Self::constructed) runs.
///
/// # Example
///
/// ```rust
/// use mediaflow::prelude::*;
///
/// struct Counter(std::sync::atomic::AtomicUsize);
///
/// impl ElementImpl for Counter {
///     fn pad_templates(&self) -> Vec<std::sync::Arc<PadTemplate>> {
///         vec![std::sync::Arc::new(PadTemplate::sink(Caps::new_any()))]
///     }
///
///     fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///         Ok(FlowSuccess::Ok)
///     }
/// }
///
/// let element = Element::new("counter", Counter(Default::default()));
/// assert!(element.static_pad("sink").is_some());
/// ```
#[allow(unused_variables)]
pub trait ElementImpl: AsAny + Send + Sync + 'static {
    /// Called once after the always-present pads were added.
    fn constructed(&self, element: &Element) {}

    /// Templates of the pads this element type can have.
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        Vec::new()
    }

    /// Static flags (SINK, SOURCE, PROVIDE_CLOCK).
    fn flags(&self) -> ElementFlags {
        ElementFlags::NONE
    }

    /// Perform one state transition.
    ///
    /// Pads are already active for READY→PAUSED and already inactive for
    /// PAUSED→READY.
    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        Ok(StateChangeSuccess::Success)
    }

    /// Wake every blocking wait of the streaming thread. Called before pads
    /// are deactivated on PAUSED→READY.
    fn unlock(&self, element: &Element) {}

    /// Called after an ASYNC return has been recorded.
    fn state_change_async(&self, element: &Element) {}

    /// Create a pad from a request template and add it to the element.
    fn request_new_pad(
        &self,
        element: &Element,
        template: &Arc<PadTemplate>,
        name: Option<&str>,
    ) -> Option<Pad> {
        None
    }

    /// A request pad is about to be removed.
    fn release_pad(&self, element: &Element, pad: &Pad) {}

    /// Handle a buffer on a sink pad.
    fn chain(&self, element: &Element, pad: &Pad, buffer: Buffer) -> FlowResult {
        Err(FlowError::Error)
    }

    /// Handle an event arriving on a sink pad.
    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        pad.event_default(event)
    }

    /// Handle an event arriving on a source pad.
    fn src_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        pad.event_default(event)
    }

    /// Produce a range for a pulling peer.
    fn get_range(
        &self,
        element: &Element,
        pad: &Pad,
        offset: u64,
        size: u32,
    ) -> std::result::Result<Buffer, FlowError> {
        Err(FlowError::Error)
    }

    /// Answer a caps query on one of the element's pads.
    fn query_caps(&self, element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.default_query_caps(filter)
    }

    /// Clock this element can provide to the pipeline.
    fn provide_clock(&self, element: &Element) -> Option<Arc<dyn Clock>> {
        None
    }

    /// Preference among clock providers; higher wins.
    fn clock_priority(&self) -> u32 {
        0
    }

    /// The pipeline distributed a clock. Return false to refuse it.
    fn set_clock(&self, element: &Element, clock: Option<&Arc<dyn Clock>>) -> bool {
        true
    }

    /// Set a property by name.
    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        Err(Error::UnknownProperty {
            element: element.name().to_string(),
            property: name.to_string(),
        })
    }

    /// Read a property by name.
    fn property(&self, element: &Element, name: &str) -> Option<PropertyValue> {
        None
    }

    /// Handle an event sent to the element itself.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// Handle a message posted by a child. Only containers receive these.
    fn handle_message(&self, element: &Element, message: Message) {
        element.post_message(message);
    }

    /// Container state, for bins.
    fn as_bin(&self) -> Option<&BinCore> {
        None
    }

    /// Bus of a top-level element.
    fn bus(&self) -> Option<Bus> {
        None
    }
}
