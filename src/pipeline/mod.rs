//! The top-level bin.
//!
//! A [`Pipeline`] is a bin that owns the [`Bus`] the application listens to
//! and the clock its elements synchronize against:
//!
//! - on PAUSED→PLAYING it selects a clock (the one fixed with
//!   [`Pipeline::use_clock`], else the best clock provided by a child, else
//!   a [`SystemClock`]), distributes it, and sets the base time so running
//!   time continues where it stopped at the last pause
//! - on PLAYING→PAUSED it records the running time reached
//! - on READY→NULL it flushes the bus
//!
//! # Example
//!
//! ```rust
//! use mediaflow::prelude::*;
//! use std::time::Duration;
//!
//! let pipeline = parse_launch("datasrc num-buffers=3 ! identity ! nullsink").unwrap();
//! pipeline.set_state(State::Playing).unwrap();
//! let bus = pipeline.bus().unwrap();
//! let msg = bus.timed_pop_filtered(Some(Duration::from_secs(5)), MessageType::EOS | MessageType::ERROR);
//! assert!(matches!(msg.map(|m| m.message_type()), Some(MessageType::EOS)));
//! pipeline.set_state(State::Null).unwrap();
//! ```

pub mod parser;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bin::BinCore;
use crate::bus::Bus;
use crate::clock::{Clock, ClockTime, SystemClock};
use crate::element::{Element, ElementFlags, ElementImpl, PropertyValue, StateChange, StateChangeResult};
use crate::error::{Error, Result, StateChangeError};
use crate::event::Event;
use crate::message::{Message, MessageView};
use crate::pad::Pad;
use crate::plugin::Registry;

pub use parser::{ParsedChain, ParsedElement, ParsedItem, ParsedPipeline, parse_description};

#[derive(Default)]
struct ClockState {
    /// Clock fixed by the application.
    fixed: Option<Arc<dyn Clock>>,
    /// Clock in use since the last PAUSED→PLAYING.
    selected: Option<Arc<dyn Clock>>,
    /// Running time reached when the pipeline last left PLAYING.
    accumulated: ClockTime,
}

/// Top-level bin with a bus and a clock.
pub struct Pipeline {
    core: BinCore,
    bus: Bus,
    clock: Mutex<ClockState>,
}

impl Pipeline {
    /// Create a pipeline element.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>) -> Element {
        Element::new(
            name,
            Pipeline {
                core: BinCore::new(),
                bus: Bus::new(),
                clock: Mutex::new(ClockState::default()),
            },
        )
    }

    /// The pipeline's bus.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Always use `clock`, ignoring clocks provided by children.
    pub fn use_clock(&self, clock: Arc<dyn Clock>) {
        self.clock.lock().fixed = Some(clock);
    }

    /// Go back to automatic clock selection.
    pub fn auto_clock(&self) {
        self.clock.lock().fixed = None;
    }

    /// Clock selected for the current (or last) PLAYING period.
    pub fn selected_clock(&self) -> Option<Arc<dyn Clock>> {
        self.clock.lock().selected.clone()
    }

    fn choose_clock(&self) -> Arc<dyn Clock> {
        if let Some(fixed) = self.clock.lock().fixed.clone() {
            return fixed;
        }
        match self.core.clock_provider() {
            Some((_, clock)) => clock,
            None => Arc::new(SystemClock::new()),
        }
    }

    /// Select and distribute the clock, then set the base time.
    fn prepare_playing(&self, element: &Element) -> std::result::Result<(), StateChangeError> {
        let clock = self.choose_clock();
        let changed = {
            let state = self.clock.lock();
            state.selected.as_ref().is_none_or(|old| !Arc::ptr_eq(old, &clock))
        };
        if changed {
            tracing::debug!(pipeline = %element.name(), clock = %clock.name(), "selected clock");
            if !element.set_clock(Some(clock.clone())) {
                tracing::warn!(pipeline = %element.name(), "a child refused the clock");
                return Err(StateChangeError);
            }
            self.clock.lock().selected = Some(clock.clone());
            element.post_message(Message::new(
                Some(element.name()),
                MessageView::NewClock {
                    clock: clock.name().to_string(),
                },
            ));
        }
        let accumulated = self.clock.lock().accumulated;
        let base_time = clock.now().saturating_sub(accumulated);
        element.set_base_time(base_time);
        self.core.distribute_base_time(base_time);
        tracing::debug!(pipeline = %element.name(), %base_time, "base time set");
        Ok(())
    }

    fn reset_running_time(&self, element: &Element) {
        let clock = {
            let mut state = self.clock.lock();
            state.accumulated = ClockTime::ZERO;
            state.selected.clone()
        };
        if let Some(clock) = clock {
            if element.current_state() == crate::element::State::Playing {
                let base_time = clock.now();
                element.set_base_time(base_time);
                self.core.distribute_base_time(base_time);
            }
        }
    }
}

impl ElementImpl for Pipeline {
    fn flags(&self) -> ElementFlags {
        self.core.flags()
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::NullToReady => self.bus.set_flushing(false),
            StateChange::ReadyToPaused => self.clock.lock().accumulated = ClockTime::ZERO,
            StateChange::PausedToPlaying => self.prepare_playing(element)?,
            _ => {}
        }

        let ret = self.core.change_state(element, transition);

        match transition {
            StateChange::PlayingToPaused => {
                let running = element.current_running_time();
                if running.is_some() {
                    self.clock.lock().accumulated = running;
                }
            }
            StateChange::ReadyToNull => self.bus.set_flushing(true),
            _ => {}
        }
        ret
    }

    fn state_change_async(&self, element: &Element) {
        self.core.check_async_done(element);
    }

    fn provide_clock(&self, _element: &Element) -> Option<Arc<dyn Clock>> {
        self.core.clock_provider().map(|(_, clock)| clock)
    }

    fn set_clock(&self, _element: &Element, clock: Option<&Arc<dyn Clock>>) -> bool {
        self.core.distribute_clock(clock)
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        let flush = matches!(&event, Event::Seek(seek) if seek.is_flush());
        let handled = self.core.send_event(element, event);
        if handled && flush {
            self.reset_running_time(element);
        }
        handled
    }

    fn handle_message(&self, element: &Element, message: Message) {
        self.core.handle_message(element, message);
    }

    fn as_bin(&self) -> Option<&BinCore> {
        Some(&self.core)
    }

    fn bus(&self) -> Option<Bus> {
        Some(self.bus.clone())
    }
}

impl Element {
    /// The bus of a top-level element (a pipeline).
    pub fn bus(&self) -> Option<Bus> {
        self.imp().bus()
    }

    /// The pipeline implementation, if this element is a pipeline.
    pub fn as_pipeline(&self) -> Option<&Pipeline> {
        self.downcast_imp::<Pipeline>()
    }
}

// ============================================================================
// Launch descriptions
// ============================================================================

/// An instantiated chain item: an element and the pad named in the
/// description, if any.
struct Node {
    element: Element,
    pad: Option<String>,
}

/// Build a pipeline from a launch description.
///
/// Elements are created through the global [`Registry`], properties are
/// set in order, and consecutive items of a chain are linked. A caps item
/// becomes a `capsfilter`.
///
/// ```rust
/// use mediaflow::prelude::*;
///
/// let pipeline = parse_launch("appsrc ! video/x-raw, width=(int)5 ! appsink name=out").unwrap();
/// assert_eq!(pipeline.children().len(), 3);
/// assert!(pipeline.by_name("out").is_some());
/// ```
pub fn parse_launch(description: &str) -> Result<Element> {
    let parsed = parse_description(description)?;
    let pipeline = Pipeline::new("pipeline");
    let registry = Registry::global();

    // Create every element first so references may point forward.
    let mut chains: Vec<Vec<ChainItem>> = Vec::with_capacity(parsed.chains.len());
    for chain in &parsed.chains {
        let mut items = Vec::with_capacity(chain.items.len());
        for item in &chain.items {
            let created = match item {
                ParsedItem::Element(parsed) => {
                    let element =
                        registry.create_element(&parsed.factory, parsed.instance_name().as_deref())?;
                    for (key, value) in &parsed.properties {
                        if key != "name" {
                            element.set_property(key, value.clone())?;
                        }
                    }
                    pipeline.add(&element)?;
                    ChainItem::Node(Node { element, pad: None })
                }
                ParsedItem::Caps(caps) => {
                    let caps = caps.parse()?;
                    let filter = registry.create_element("capsfilter", None)?;
                    filter.set_property("caps", PropertyValue::Caps(caps))?;
                    pipeline.add(&filter)?;
                    ChainItem::Node(Node {
                        element: filter,
                        pad: None,
                    })
                }
                ParsedItem::Reference { element, pad } => ChainItem::Reference {
                    element: element.clone(),
                    pad: pad.clone(),
                },
            };
            items.push(created);
        }
        chains.push(items);
    }

    for chain in chains {
        let mut previous: Option<Node> = None;
        for item in chain {
            let node = match item {
                ChainItem::Node(node) => node,
                ChainItem::Reference { element, pad } => {
                    let element = pipeline
                        .by_name(&element)
                        .ok_or_else(|| Error::Parse(format!("no element named '{element}'")))?;
                    Node { element, pad }
                }
            };
            if let Some(prev) = previous.take() {
                link_nodes(&prev, &node)?;
            }
            previous = Some(node);
        }
    }

    tracing::debug!(%description, children = pipeline.children().len(), "built pipeline");
    Ok(pipeline)
}

enum ChainItem {
    Node(Node),
    Reference { element: String, pad: Option<String> },
}

fn resolve_pad(element: &Element, name: Option<&str>) -> Result<Option<Pad>> {
    let Some(name) = name else {
        return Ok(None);
    };
    element
        .static_pad(name)
        .or_else(|| element.request_pad(name))
        .map(Some)
        .ok_or_else(|| Error::PadNotFound {
            element: element.name().to_string(),
            pad: name.to_string(),
        })
}

fn link_nodes(src: &Node, sink: &Node) -> Result<()> {
    let src_pad = resolve_pad(&src.element, src.pad.as_deref())?;
    let sink_pad = resolve_pad(&sink.element, sink.pad.as_deref())?;
    let linked = match (src_pad, sink_pad) {
        (None, None) => src.element.link(&sink.element),
        (Some(src_pad), Some(sink_pad)) => src_pad.link(&sink_pad).map_err(Error::from),
        (Some(src_pad), None) => sink
            .element
            .compatible_pad(&src_pad, &src_pad.query_caps(None))
            .ok_or(Error::Link(crate::error::LinkError::NoCompatiblePads))
            .and_then(|sink_pad| src_pad.link(&sink_pad).map_err(Error::from)),
        (None, Some(sink_pad)) => src
            .element
            .compatible_pad(&sink_pad, &sink_pad.query_caps(None))
            .ok_or(Error::Link(crate::error::LinkError::NoCompatiblePads))
            .and_then(|src_pad| src_pad.link(&sink_pad).map_err(Error::from)),
    };
    linked.map_err(|err| {
        Error::Parse(format!(
            "could not link {} to {}: {err}",
            src.element.name(),
            sink.element.name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::element::{State, StateChangeSuccess};
    use crate::message::MessageType;
    use std::time::Duration;

    struct ClockProvider {
        clock: Arc<dyn Clock>,
        priority: u32,
    }

    impl ElementImpl for ClockProvider {
        fn flags(&self) -> ElementFlags {
            ElementFlags::PROVIDE_CLOCK
        }

        fn provide_clock(&self, _element: &Element) -> Option<Arc<dyn Clock>> {
            Some(self.clock.clone())
        }

        fn clock_priority(&self) -> u32 {
            self.priority
        }
    }

    #[test]
    fn test_clock_selection_prefers_priority() {
        let pipeline = Pipeline::new("p");
        let low: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let high: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let a = Element::new("a", ClockProvider { clock: low, priority: 1 });
        let b = Element::new(
            "b",
            ClockProvider {
                clock: high.clone(),
                priority: 10,
            },
        );
        pipeline.add_many(&[&a, &b]).unwrap();
        assert_eq!(pipeline.set_state(State::Playing), Ok(StateChangeSuccess::Success));

        let selected = pipeline.as_pipeline().unwrap().selected_clock().unwrap();
        assert!(Arc::ptr_eq(&selected, &high));
        assert!(a.clock().is_some_and(|c| Arc::ptr_eq(&c, &high)));
        let bus = pipeline.bus().unwrap();
        assert!(bus.pop_filtered(MessageType::NEW_CLOCK).is_some());
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_fixed_clock_and_base_time() {
        let pipeline = Pipeline::new("p");
        let clock = Arc::new(ManualClock::new());
        clock.set_time(ClockTime::from_secs(10));
        pipeline.as_pipeline().unwrap().use_clock(clock.clone());
        let child = Element::new(
            "c",
            ClockProvider {
                clock: Arc::new(ManualClock::new()),
                priority: 100,
            },
        );
        pipeline.add(&child).unwrap();

        pipeline.set_state(State::Playing).unwrap();
        assert_eq!(pipeline.base_time(), ClockTime::from_secs(10));
        assert_eq!(child.base_time(), ClockTime::from_secs(10));

        clock.advance(ClockTime::from_secs(3));
        pipeline.set_state(State::Paused).unwrap();
        clock.advance(ClockTime::from_secs(100));
        pipeline.set_state(State::Playing).unwrap();
        // Running time continues at 3s after the pause.
        assert_eq!(pipeline.current_running_time(), ClockTime::from_secs(3));
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_bus_flushed_in_null() {
        let pipeline = Pipeline::new("p");
        pipeline.set_state(State::Ready).unwrap();
        let bus = pipeline.bus().unwrap();
        assert!(bus.have_pending());
        pipeline.set_state(State::Null).unwrap();
        assert!(!bus.have_pending());
        pipeline.set_state(State::Ready).unwrap();
        assert!(bus.timed_pop(Some(Duration::ZERO)).is_some());
    }

    #[test]
    fn test_parse_launch_builds_and_links() {
        let pipeline = parse_launch("datasrc num-buffers=2 ! identity name=id ! nullsink").unwrap();
        let children = pipeline.children();
        assert_eq!(children.len(), 3);
        let id = pipeline.by_name("id").unwrap();
        assert!(id.static_pad("sink").unwrap().is_linked());
        assert!(id.static_pad("src").unwrap().is_linked());
    }

    #[test]
    fn test_parse_launch_unknown_type() {
        let err = parse_launch("datasrc ! no-such-element").unwrap_err();
        assert!(matches!(err, Error::UnknownType(name) if name == "no-such-element"));
    }

    #[test]
    fn test_parse_launch_tee_branches() {
        let pipeline =
            parse_launch("datasrc ! tee name=t  t. ! queue ! nullsink  t. ! queue ! nullsink")
                .unwrap();
        let tee = pipeline.by_name("t").unwrap();
        assert_eq!(tee.src_pads().len(), 2);
        assert!(tee.src_pads().iter().all(Pad::is_linked));
    }

    #[test]
    fn test_parse_launch_unknown_reference() {
        let err = parse_launch("x. ! nullsink").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
