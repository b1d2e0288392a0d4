//! Elements: the processing nodes of a pipeline.
//!
//! An [`Element`] is a cheap, clonable handle around an implementation
//! object implementing [`ElementImpl`]. The handle owns the generic parts
//! every element shares:
//!
//! - an ordered list of [`Pad`]s (each pad holds a weak back-reference)
//! - a weak reference to its parent bin
//! - the state machine (see [`Element::set_state`])
//! - the clock and base time distributed by the pipeline
//!
//! The implementation supplies the behaviour: pad templates, state-change
//! work, buffer and event handling, request pads, properties and clocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediaflow::prelude::*;
//!
//! let src = Registry::global().create_element("datasrc", Some("src"))?;
//! let sink = Registry::global().create_element("nullsink", Some("sink"))?;
//! src.link(&sink)?;
//! ```

mod property;
mod state;
mod state_machine;
mod traits;

pub use property::PropertyValue;
pub use state::{State, StateChange, StateChangeResult, StateChangeSuccess};
pub use traits::{AsAny, ElementImpl};

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::caps::Caps;
use crate::clock::{Clock, ClockTime};
use crate::error::{Error, LinkError, Result};
use crate::event::Event;
use crate::message::Message;
use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};
use state_machine::StateData;

// ============================================================================
// Flags
// ============================================================================

/// Element flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ElementFlags(u32);

impl ElementFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The element consumes data at the end of a pipeline.
    pub const SINK: Self = Self(1 << 0);
    /// The element produces data at the start of a pipeline.
    pub const SOURCE: Self = Self(1 << 1);
    /// The element can provide a clock.
    pub const PROVIDE_CLOCK: Self = Self(1 << 2);
    /// The element ignores state changes of its parent.
    pub const LOCKED_STATE: Self = Self(1 << 3);

    /// Check if all flags in `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ElementFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ============================================================================
// Element
// ============================================================================

struct ObjectState {
    pads: Vec<Pad>,
    parent: Option<WeakElement>,
    clock: Option<Arc<dyn Clock>>,
    base_time: ClockTime,
    pad_counter: u32,
}

pub(crate) struct ElementInner {
    name: String,
    imp: Box<dyn ElementImpl>,
    object: Mutex<ObjectState>,
    state: Mutex<StateData>,
    state_cond: Condvar,
    /// Serializes `set_state` calls.
    state_lock: Mutex<()>,
    locked_state: AtomicBool,
}

impl Drop for ElementInner {
    fn drop(&mut self) {
        for pad in self.object.get_mut().pads.drain(..) {
            pad.unlink_peer();
        }
    }
}

/// Handle to an element. Cloning is cheap; clones refer to the same element.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

/// Weak handle to an element.
#[derive(Clone, Default)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// Get a strong handle if the element still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(|inner| Element { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Element {
    /// Create an element named `name` backed by `imp`.
    pub fn new(name: impl Into<String>, imp: impl ElementImpl) -> Element {
        let element = Element {
            inner: Arc::new(ElementInner {
                name: name.into(),
                imp: Box::new(imp),
                object: Mutex::new(ObjectState {
                    pads: Vec::new(),
                    parent: None,
                    clock: None,
                    base_time: ClockTime::ZERO,
                    pad_counter: 0,
                }),
                state: Mutex::new(StateData::default()),
                state_cond: Condvar::new(),
                state_lock: Mutex::new(()),
                locked_state: AtomicBool::new(false),
            }),
        };
        for template in element.imp().pad_templates() {
            if template.presence() == PadPresence::Always {
                let pad = Pad::from_template(&template, template.name());
                if let Err(err) = element.add_pad(pad) {
                    tracing::warn!(element = %element.name(), %err, "could not add template pad");
                }
            }
        }
        element.imp().constructed(&element);
        element
    }

    /// Element name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The implementation object.
    pub fn imp(&self) -> &dyn ElementImpl {
        &*self.inner.imp
    }

    /// Downcast the implementation to a concrete type.
    pub fn downcast_imp<T: ElementImpl>(&self) -> Option<&T> {
        self.imp().as_any().downcast_ref::<T>()
    }

    /// Weak handle.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.inner))
    }

    /// Flags of the implementation plus LOCKED_STATE.
    pub fn flags(&self) -> ElementFlags {
        let mut flags = self.imp().flags();
        if self.is_locked_state() {
            flags = flags | ElementFlags::LOCKED_STATE;
        }
        flags
    }

    /// Check if this element is a sink.
    pub fn is_sink(&self) -> bool {
        self.imp().flags().contains(ElementFlags::SINK)
    }

    /// Check if this element is a source.
    pub fn is_source(&self) -> bool {
        self.imp().flags().contains(ElementFlags::SOURCE)
    }

    /// Check if this element is a bin.
    pub fn is_bin(&self) -> bool {
        self.imp().as_bin().is_some()
    }

    /// The containing bin.
    pub fn parent(&self) -> Option<Element> {
        self.inner.object.lock().parent.as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<WeakElement>) -> bool {
        let mut object = self.inner.object.lock();
        if parent.is_some() && object.parent.as_ref().is_some_and(WeakElement::is_alive) {
            return false;
        }
        object.parent = parent;
        true
    }

    // ========================================================================
    // Pads
    // ========================================================================

    /// Add a pad. Its name must be unique on this element.
    pub fn add_pad(&self, pad: Pad) -> Result<()> {
        {
            let mut object = self.inner.object.lock();
            if object.pads.iter().any(|p| p.name() == pad.name()) {
                return Err(Error::NameInUse {
                    parent: self.name().to_string(),
                    name: pad.name().to_string(),
                });
            }
            if !pad.set_parent(Some(self.downgrade())) {
                return Err(Error::AlreadyHasParent(pad.name().to_string()));
            }
            object.pads.push(pad.clone());
        }
        if self.current_state() >= State::Paused {
            pad.set_active(true);
        }
        tracing::trace!(element = %self.name(), pad = %pad.name(), "added pad");
        Ok(())
    }

    /// Remove a pad, unlinking and deactivating it.
    pub fn remove_pad(&self, pad: &Pad) -> Result<()> {
        {
            let mut object = self.inner.object.lock();
            let Some(idx) = object.pads.iter().position(|p| p == pad) else {
                return Err(Error::NotAChild {
                    parent: self.name().to_string(),
                    child: pad.name().to_string(),
                });
            };
            object.pads.remove(idx);
        }
        pad.unlink_peer();
        pad.set_active(false);
        pad.set_parent(None);
        Ok(())
    }

    /// All pads in insertion order.
    pub fn pads(&self) -> Vec<Pad> {
        self.inner.object.lock().pads.clone()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Sink)
    }

    fn pads_in(&self, direction: PadDirection) -> Vec<Pad> {
        self.inner
            .object
            .lock()
            .pads
            .iter()
            .filter(|p| p.direction() == direction)
            .cloned()
            .collect()
    }

    /// Look up a pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.inner
            .object
            .lock()
            .pads
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Template of this element type by template name.
    pub fn pad_template(&self, name: &str) -> Option<Arc<PadTemplate>> {
        self.imp().pad_templates().into_iter().find(|t| t.name() == name)
    }

    /// Request a pad by template name (`src_%u`) or concrete name (`src_3`).
    pub fn request_pad(&self, name: &str) -> Option<Pad> {
        let templates = self.imp().pad_templates();
        let template = templates
            .iter()
            .filter(|t| t.presence() == PadPresence::Request)
            .find(|t| t.name() == name || t.matches_name(name))?;
        let concrete = (!template.is_pattern() || template.name() != name).then_some(name);
        self.request_pad_from_template(template, concrete)
    }

    /// Request a pad from a template.
    pub fn request_pad_from_template(
        &self,
        template: &Arc<PadTemplate>,
        name: Option<&str>,
    ) -> Option<Pad> {
        if template.presence() != PadPresence::Request {
            return None;
        }
        let pad = self.imp().request_new_pad(self, template, name);
        match &pad {
            Some(pad) => {
                tracing::debug!(element = %self.name(), pad = %pad.name(), "requested pad")
            }
            None => tracing::debug!(element = %self.name(), template = %template.name(), "pad request refused"),
        }
        pad
    }

    /// Release a pad obtained with [`request_pad`](Self::request_pad).
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        self.imp().release_pad(self, pad);
        self.remove_pad(pad)
    }

    fn release_unused_pad(&self, pad: &Pad) {
        if let Err(err) = self.release_request_pad(pad) {
            tracing::warn!(element = %self.name(), pad = %pad.name(), %err, "could not release request pad");
        }
    }

    /// A free name for a new pad from `template`.
    pub fn next_pad_name(&self, template: &PadTemplate) -> String {
        let mut object = self.inner.object.lock();
        loop {
            let candidate = template.name_for_index(object.pad_counter);
            object.pad_counter += 1;
            if !object.pads.iter().any(|p| p.name() == candidate) {
                return candidate;
            }
        }
    }

    // ========================================================================
    // Element-level linking
    // ========================================================================

    /// Find an unlinked pad on this element that can link with `other`,
    /// requesting one if no existing pad fits.
    pub(crate) fn compatible_pad(&self, other: &Pad, caps: &Caps) -> Option<Pad> {
        let direction = other.direction().opposite();
        let existing = self
            .pads_in(direction)
            .into_iter()
            .filter(|p| !p.is_linked())
            .find(|p| p.query_caps(None).can_intersect(caps));
        if existing.is_some() {
            return existing;
        }
        self.imp()
            .pad_templates()
            .iter()
            .filter(|t| t.direction() == direction && t.presence() == PadPresence::Request)
            .filter(|t| t.caps().can_intersect(caps))
            .find_map(|t| self.request_pad_from_template(t, None))
    }

    /// Link a source pad of this element to a sink pad of `dest`, picking
    /// unlinked compatible pads (requesting pads if needed).
    pub fn link(&self, dest: &Element) -> Result<()> {
        let mut src_pads: Vec<Pad> = self
            .src_pads()
            .into_iter()
            .filter(|p| !p.is_linked())
            .collect();
        let mut requested = None;
        if src_pads.is_empty() {
            let template = self.imp().pad_templates().into_iter().find(|t| {
                t.direction() == PadDirection::Src && t.presence() == PadPresence::Request
            });
            if let Some(pad) = template.and_then(|t| self.request_pad_from_template(&t, None)) {
                requested = Some(pad.clone());
                src_pads.push(pad);
            }
        }

        for src in src_pads {
            let caps = src.query_caps(None);
            if let Some(sink) = dest.compatible_pad(&src, &caps) {
                return match src.link(&sink) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        if sink.template().is_some_and(|t| t.presence() == PadPresence::Request) {
                            dest.release_unused_pad(&sink);
                        }
                        if let Some(pad) = requested.as_ref() {
                            self.release_unused_pad(pad);
                        }
                        Err(err.into())
                    }
                };
            }
        }
        if let Some(pad) = requested {
            self.release_unused_pad(&pad);
        }
        tracing::debug!(src = %self.name(), sink = %dest.name(), "no compatible pads");
        Err(LinkError::NoCompatiblePads.into())
    }

    /// Link named pads. Names that do not exist as pads are requested.
    pub fn link_pads(
        &self,
        src_pad: Option<&str>,
        dest: &Element,
        sink_pad: Option<&str>,
    ) -> Result<()> {
        let (Some(src_name), Some(sink_name)) = (src_pad, sink_pad) else {
            return self.link(dest);
        };
        let src = self
            .static_pad(src_name)
            .or_else(|| self.request_pad(src_name))
            .ok_or_else(|| Error::PadNotFound {
                element: self.name().to_string(),
                pad: src_name.to_string(),
            })?;
        let sink = dest
            .static_pad(sink_name)
            .or_else(|| dest.request_pad(sink_name))
            .ok_or_else(|| Error::PadNotFound {
                element: dest.name().to_string(),
                pad: sink_name.to_string(),
            })?;
        src.link(&sink).map_err(Into::into)
    }

    /// Link each element to the next.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    /// Unlink every link between this element's source pads and `dest`.
    pub fn unlink(&self, dest: &Element) {
        for pad in self.src_pads() {
            if let Some(peer) = pad.peer() {
                if peer.parent_element().as_ref() == Some(dest) {
                    pad.unlink(&peer);
                }
            }
        }
    }

    // ========================================================================
    // Messages and events
    // ========================================================================

    /// Post a message towards the application: to the parent bin, or to the
    /// element's own bus at the top level.
    pub fn post_message(&self, message: Message) -> bool {
        if let Some(parent) = self.parent() {
            parent.imp().handle_message(&parent, message);
            return true;
        }
        match self.imp().bus() {
            Some(bus) => bus.post(message),
            None => {
                tracing::trace!(element = %self.name(), %message, "no bus, dropping message");
                false
            }
        }
    }

    /// Post an error message.
    pub fn post_error(&self, error: impl Into<String>, debug: Option<String>) {
        let message = Message::new(
            Some(self.name()),
            crate::message::MessageView::Error {
                error: error.into(),
                debug,
            },
        );
        tracing::error!(element = %self.name(), %message, "posting error");
        self.post_message(message);
    }

    /// Send an event to the element (seek, EOS injection, ...).
    pub fn send_event(&self, event: Event) -> bool {
        self.imp().send_event(self, event)
    }

    /// Default element event handling: upstream events leave through a sink
    /// pad, downstream events through a source pad.
    pub fn default_send_event(&self, event: Event) -> bool {
        let pads = if event.is_upstream() && !event.is_downstream() {
            self.sink_pads()
        } else {
            self.src_pads()
        };
        let pad = pads.iter().find(|p| p.is_linked()).or(pads.first());
        match pad {
            Some(pad) => pad.send_event(event),
            None => {
                tracing::debug!(element = %self.name(), event = event.name(), "no pad to send event");
                false
            }
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Set a property.
    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        tracing::trace!(element = %self.name(), property = name, %value, "set property");
        self.imp().set_property(self, name, &value)
    }

    /// Read a property.
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.imp().property(self, name)
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Clock the element provides, if any.
    pub fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.imp().provide_clock(self)
    }

    /// Distribute a clock. Returns false if the element refused it.
    pub fn set_clock(&self, clock: Option<Arc<dyn Clock>>) -> bool {
        if !self.imp().set_clock(self, clock.as_ref()) {
            return false;
        }
        self.inner.object.lock().clock = clock;
        true
    }

    /// Clock in use.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.inner.object.lock().clock.clone()
    }

    /// Clock time at which running time was zero.
    pub fn base_time(&self) -> ClockTime {
        self.inner.object.lock().base_time
    }

    /// Set the base time.
    pub fn set_base_time(&self, base_time: ClockTime) {
        self.inner.object.lock().base_time = base_time;
    }

    /// Clock time minus base time, or NONE without a clock.
    pub fn current_running_time(&self) -> ClockTime {
        let (clock, base) = {
            let object = self.inner.object.lock();
            (object.clock.clone(), object.base_time)
        };
        match clock {
            Some(clock) => clock.now().saturating_sub(base),
            None => ClockTime::NONE,
        }
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.inner.name)
            .field("state", &self.current_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::error::{FlowResult, FlowSuccess};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Filter;

    impl ElementImpl for Filter {
        fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
            vec![
                Arc::new(PadTemplate::sink(Caps::new_any())),
                Arc::new(PadTemplate::src(Caps::new_any())),
            ]
        }

        fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
            match element.static_pad("src") {
                Some(src) => src.push(buffer),
                None => Ok(FlowSuccess::Ok),
            }
        }
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl ElementImpl for Counter {
        fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
            vec![Arc::new(PadTemplate::sink(Caps::new_any()))]
        }

        fn flags(&self) -> ElementFlags {
            ElementFlags::SINK
        }

        fn chain(&self, _element: &Element, _pad: &Pad, _buffer: Buffer) -> FlowResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        }
    }

    #[test]
    fn test_template_pads_created() {
        let element = Element::new("f", Filter);
        assert_eq!(element.pads().len(), 2);
        assert_eq!(element.src_pads()[0].name(), "src");
        assert_eq!(element.static_pad("sink").unwrap().parent_element(), Some(element.clone()));
    }

    #[test]
    fn test_duplicate_pad_name() {
        let element = Element::new("f", Filter);
        let err = element.add_pad(Pad::new("src", PadDirection::Src)).unwrap_err();
        assert!(matches!(err, Error::NameInUse { .. }));
    }

    #[test]
    fn test_element_link_and_dataflow() {
        let filter = Element::new("filter", Filter);
        let sink = Element::new("sink", Counter::default());
        filter.link(&sink).unwrap();
        let src = filter.static_pad("sink").unwrap();
        let upstream = Pad::new("up", PadDirection::Src);
        upstream.link(&src).unwrap();
        upstream.push(Buffer::with_size(1)).unwrap();
        assert_eq!(sink.downcast_imp::<Counter>().unwrap().0.load(Ordering::SeqCst), 1);
        assert!(sink.is_sink());
    }

    #[test]
    fn test_link_without_free_pads() {
        let a = Element::new("a", Filter);
        let b = Element::new("b", Counter::default());
        let c = Element::new("c", Counter::default());
        a.link(&b).unwrap();
        let err = a.link(&c).unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::NoCompatiblePads)));
    }

    struct Splitter;

    impl ElementImpl for Splitter {
        fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
            vec![
                Arc::new(PadTemplate::sink(Caps::new_any())),
                Arc::new(PadTemplate::new(
                    "src_%u",
                    PadDirection::Src,
                    PadPresence::Request,
                    "audio/x-raw".parse().unwrap(),
                )),
            ]
        }

        fn request_new_pad(
            &self,
            element: &Element,
            template: &Arc<PadTemplate>,
            name: Option<&str>,
        ) -> Option<Pad> {
            let name = name.map_or_else(|| element.next_pad_name(template), str::to_string);
            let pad = Pad::from_template(template, name);
            element.add_pad(pad.clone()).ok()?;
            Some(pad)
        }
    }

    struct VideoSink;

    impl ElementImpl for VideoSink {
        fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
            vec![Arc::new(PadTemplate::sink("video/x-raw".parse().unwrap()))]
        }
    }

    #[test]
    fn test_failed_link_releases_requested_pad() {
        let split = Element::new("split", Splitter);
        let sink = Element::new("sink", VideoSink);
        let err = split.link(&sink).unwrap_err();
        assert!(matches!(err, Error::Link(LinkError::NoCompatiblePads)));
        assert_eq!(split.pads().len(), 1);
        assert!(split.src_pads().is_empty());

        // A later link requests a fresh pad.
        let counter = Element::new("counter", Counter::default());
        split.link(&counter).unwrap();
        assert_eq!(split.src_pads().len(), 1);
        assert!(split.src_pads()[0].is_linked());
    }

    #[test]
    fn test_unknown_property() {
        let element = Element::new("f", Filter);
        let err = element.set_property("nope", 1i64).unwrap_err();
        assert!(matches!(err, Error::UnknownProperty { .. }));
    }

    #[test]
    fn test_drop_unlinks_pads() {
        let a = Element::new("a", Filter);
        let sink_pad = {
            let b = Element::new("b", Counter::default());
            a.link(&b).unwrap();
            b.static_pad("sink").unwrap()
        };
        assert!(sink_pad.parent_element().is_none());
        assert!(!sink_pad.is_linked());
        assert!(!a.static_pad("src").unwrap().is_linked());
    }
}
