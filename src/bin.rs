//! Bins: elements that contain other elements.
//!
//! A bin owns an ordered list of children and drives their state. State
//! changes are applied to children sinks first, then upstream along links,
//! so a downstream element is always ready before data reaches it:
//!
//! ```text
//!   src ──▶ filter ──▶ sink          change order: sink, filter, src
//! ```
//!
//! The order is computed with a DAG of the links between children; a cycle
//! falls back to insertion order.
//!
//! Bins also aggregate child messages: EOS is posted once every sink child
//! has posted EOS, and an asynchronous state change of the bin completes
//! once every child has completed its own.
//!
//! [`BinCore`] holds the container state; element types that are bins (the
//! plain [`Bin`] and the pipeline) embed one and expose it through
//! [`ElementImpl::as_bin`].

use std::collections::HashSet;
use std::sync::Arc;

use daggy::{Dag, NodeIndex, Walker};
use parking_lot::Mutex;

use crate::clock::{Clock, ClockTime};
use crate::element::{
    Element, ElementFlags, ElementImpl, StateChange, StateChangeResult, StateChangeSuccess,
};
use crate::error::{Error, Result, StateChangeError};
use crate::event::Event;
use crate::message::{Message, MessageView};
use crate::pad::Pad;

#[derive(Default)]
struct BinState {
    children: Vec<Element>,
    /// Sink children that posted EOS.
    eos_seen: HashSet<String>,
    eos_posted: bool,
}

/// Container state shared by every bin type.
#[derive(Default)]
pub struct BinCore {
    state: Mutex<BinState>,
}

impl BinCore {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Children
    // ========================================================================

    /// Add `child` to `bin`.
    pub fn add(&self, bin: &Element, child: &Element) -> Result<()> {
        if bin == child {
            return Err(Error::AlreadyHasParent(child.name().to_string()));
        }
        {
            let mut state = self.state.lock();
            if state.children.iter().any(|c| c.name() == child.name()) {
                return Err(Error::NameInUse {
                    parent: bin.name().to_string(),
                    name: child.name().to_string(),
                });
            }
            if !child.set_parent(Some(bin.downgrade())) {
                return Err(Error::AlreadyHasParent(child.name().to_string()));
            }
            state.children.push(child.clone());
        }
        if let Some(clock) = bin.clock() {
            child.set_clock(Some(clock));
            child.set_base_time(bin.base_time());
        }
        tracing::debug!(bin = %bin.name(), child = %child.name(), "added child");
        Ok(())
    }

    /// Remove `child` from `bin`, unlinking it from its siblings.
    pub fn remove(&self, bin: &Element, child: &Element) -> Result<()> {
        {
            let mut state = self.state.lock();
            let Some(idx) = state.children.iter().position(|c| c == child) else {
                return Err(Error::NotAChild {
                    parent: bin.name().to_string(),
                    child: child.name().to_string(),
                });
            };
            state.children.remove(idx);
            state.eos_seen.remove(child.name());
        }
        for pad in child.pads() {
            let Some(peer) = pad.peer() else { continue };
            let sibling = peer
                .parent_element()
                .and_then(|e| e.parent())
                .is_some_and(|p| &p == bin);
            if sibling {
                pad.unlink(&peer);
            }
        }
        child.set_parent(None);
        tracing::debug!(bin = %bin.name(), child = %child.name(), "removed child");
        Ok(())
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.state.lock().children.clone()
    }

    /// Number of children.
    pub fn n_children(&self) -> usize {
        self.state.lock().children.len()
    }

    /// Direct child by name.
    pub fn child_by_name(&self, name: &str) -> Option<Element> {
        self.state
            .lock()
            .children
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Child by name, searching nested bins.
    pub fn child_by_name_recurse(&self, name: &str) -> Option<Element> {
        for child in self.children() {
            if child.name() == name {
                return Some(child);
            }
            if let Some(found) = child
                .imp()
                .as_bin()
                .and_then(|bin| bin.child_by_name_recurse(name))
            {
                return Some(found);
            }
        }
        None
    }

    /// Children that are sinks.
    pub fn sinks(&self) -> Vec<Element> {
        self.children().into_iter().filter(Element::is_sink).collect()
    }

    /// Children that are sources.
    pub fn sources(&self) -> Vec<Element> {
        self.children()
            .into_iter()
            .filter(|c| c.is_source() || c.sink_pads().is_empty())
            .collect()
    }

    /// Children in state-change order: sinks first, then upstream along
    /// links; ties in insertion order.
    pub fn sorted_children(&self) -> Vec<Element> {
        let children = self.children();
        let n = children.len();
        let mut dag: Dag<usize, ()> = Dag::with_capacity(n, n);
        let nodes: Vec<NodeIndex> = (0..n).map(|i| dag.add_node(i)).collect();

        for (i, child) in children.iter().enumerate() {
            for pad in child.src_pads() {
                let Some(peer_element) = pad.peer().and_then(|p| p.parent_element()) else {
                    continue;
                };
                let Some(j) = children.iter().position(|c| c == &peer_element) else {
                    continue;
                };
                if i == j || dag.find_edge(nodes[i], nodes[j]).is_some() {
                    continue;
                }
                if dag.add_edge(nodes[i], nodes[j], ()).is_err() {
                    tracing::debug!("link cycle between children, using insertion order");
                    return children;
                }
            }
        }

        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let next = (0..n).find(|&i| {
                !placed[i]
                    && dag
                        .children(nodes[i])
                        .iter(&dag)
                        .all(|(_, downstream)| placed[downstream.index()])
            });
            let Some(i) = next else { break };
            placed[i] = true;
            order.push(children[i].clone());
        }
        order
    }

    /// Flags derived from the children.
    pub fn flags(&self) -> ElementFlags {
        let mut flags = ElementFlags::NONE;
        for child in self.children() {
            let child_flags = child.imp().flags();
            for flag in [ElementFlags::SINK, ElementFlags::SOURCE, ElementFlags::PROVIDE_CLOCK] {
                if child_flags.contains(flag) {
                    flags = flags | flag;
                }
            }
        }
        flags
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Apply `transition` to every unlocked child.
    ///
    /// A failing child fails the bin right away; siblings already changed
    /// keep their new state.
    pub fn change_state(&self, bin: &Element, transition: StateChange) -> StateChangeResult {
        if transition == StateChange::ReadyToPaused {
            self.reset_eos();
        }
        let next = transition.next();
        let mut have_async = false;
        let mut have_no_preroll = false;
        for child in self.sorted_children() {
            if child.is_locked_state() {
                tracing::trace!(bin = %bin.name(), child = %child.name(), "skipping locked child");
                continue;
            }
            match child.set_state(next) {
                Ok(StateChangeSuccess::Success) => {}
                Ok(StateChangeSuccess::Async) => have_async = true,
                Ok(StateChangeSuccess::NoPreroll) => have_no_preroll = true,
                Err(err) => {
                    tracing::warn!(bin = %bin.name(), child = %child.name(), %transition, "child failed state change");
                    return Err(err);
                }
            }
        }
        if have_no_preroll {
            Ok(StateChangeSuccess::NoPreroll)
        } else if have_async {
            Ok(StateChangeSuccess::Async)
        } else {
            Ok(StateChangeSuccess::Success)
        }
    }

    /// Complete the bin's asynchronous change once no child is busy.
    pub fn check_async_done(&self, bin: &Element) {
        if !bin.is_awaiting_commit() {
            return;
        }
        let children: Vec<Element> = self
            .children()
            .into_iter()
            .filter(|c| !c.is_locked_state())
            .collect();
        if children.iter().any(|c| c.last_return().is_err()) {
            bin.commit_awaited_async_state(Err(StateChangeError));
        } else if !children.iter().any(Element::is_state_busy) {
            tracing::debug!(bin = %bin.name(), "all children done");
            bin.commit_awaited_async_state(Ok(StateChangeSuccess::Success));
        }
    }

    fn reset_eos(&self) {
        let mut state = self.state.lock();
        state.eos_seen.clear();
        state.eos_posted = false;
    }

    // ========================================================================
    // Messages and events
    // ========================================================================

    /// Aggregate or forward a message from a child.
    pub fn handle_message(&self, bin: &Element, message: Message) {
        match message.view() {
            MessageView::Eos => {
                let complete = {
                    let mut state = self.state.lock();
                    let from_sink = message.src().and_then(|src| {
                        state
                            .children
                            .iter()
                            .find(|c| c.name() == src && c.is_sink())
                            .map(|c| c.name().to_string())
                    });
                    let Some(name) = from_sink else {
                        return;
                    };
                    state.eos_seen.insert(name);
                    let all = state
                        .children
                        .iter()
                        .filter(|c| c.is_sink() && !c.is_locked_state())
                        .all(|c| state.eos_seen.contains(c.name()));
                    let complete = all && !state.eos_posted;
                    if complete {
                        state.eos_posted = true;
                    }
                    complete
                };
                if complete {
                    tracing::debug!(bin = %bin.name(), "all sinks posted eos");
                    bin.post_message(Message::eos(bin.name()));
                }
            }
            MessageView::AsyncStart => {}
            MessageView::AsyncDone => self.check_async_done(bin),
            MessageView::Error { .. } => {
                bin.post_message(message);
                self.check_async_done(bin);
            }
            _ => {
                bin.post_message(message);
            }
        }
    }

    /// Deliver an element event: upstream events go to every sink child,
    /// downstream events to every source child.
    pub fn send_event(&self, bin: &Element, event: Event) -> bool {
        let targets = if event.is_upstream() {
            self.sinks()
        } else {
            self.sources()
        };
        if let Event::Seek(seek) = &event {
            if seek.is_flush() {
                self.reset_eos();
            }
        }
        let mut any = false;
        for child in targets {
            any |= child.send_event(event.clone());
        }
        if !any {
            tracing::debug!(bin = %bin.name(), event = event.name(), "no child handled event");
        }
        any
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// The best clock provided by any element in the bin, with its priority.
    pub fn clock_provider(&self) -> Option<(u32, Arc<dyn Clock>)> {
        let mut best: Option<(u32, Arc<dyn Clock>)> = None;
        for child in self.children() {
            let candidate = match child.imp().as_bin() {
                Some(bin) => bin.clock_provider(),
                None => child
                    .provide_clock()
                    .map(|clock| (child.imp().clock_priority(), clock)),
            };
            if let Some((priority, clock)) = candidate {
                if best.as_ref().is_none_or(|(p, _)| priority > *p) {
                    best = Some((priority, clock));
                }
            }
        }
        best
    }

    /// Give every child the clock. Returns false if any child refused it.
    pub fn distribute_clock(&self, clock: Option<&Arc<dyn Clock>>) -> bool {
        let mut ok = true;
        for child in self.children() {
            ok &= child.set_clock(clock.cloned());
        }
        ok
    }

    /// Set the base time on every element in the bin.
    pub fn distribute_base_time(&self, base_time: ClockTime) {
        for child in self.children() {
            child.set_base_time(base_time);
            if let Some(bin) = child.imp().as_bin() {
                bin.distribute_base_time(base_time);
            }
        }
    }
}

// ============================================================================
// Bin
// ============================================================================

/// A plain container element.
///
/// ```rust
/// use mediaflow::prelude::*;
///
/// let bin = Bin::new("bin");
/// let a = Registry::global().create_element("identity", Some("a")).unwrap();
/// bin.add(&a).unwrap();
/// assert_eq!(bin.children().len(), 1);
/// ```
#[derive(Default)]
pub struct Bin {
    core: BinCore,
}

impl Bin {
    /// Create a bin element.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>) -> Element {
        Element::new(name, Bin::default())
    }
}

impl ElementImpl for Bin {
    fn flags(&self) -> ElementFlags {
        self.core.flags()
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        self.core.change_state(element, transition)
    }

    fn state_change_async(&self, element: &Element) {
        self.core.check_async_done(element);
    }

    fn provide_clock(&self, _element: &Element) -> Option<Arc<dyn Clock>> {
        self.core.clock_provider().map(|(_, clock)| clock)
    }

    fn clock_priority(&self) -> u32 {
        self.core.clock_provider().map_or(0, |(p, _)| p)
    }

    fn set_clock(&self, _element: &Element, clock: Option<&Arc<dyn Clock>>) -> bool {
        self.core.distribute_clock(clock)
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        self.core.send_event(element, event)
    }

    fn handle_message(&self, element: &Element, message: Message) {
        self.core.handle_message(element, message);
    }

    fn as_bin(&self) -> Option<&BinCore> {
        Some(&self.core)
    }
}

// ============================================================================
// Container operations on Element
// ============================================================================

impl Element {
    fn bin_core(&self) -> Result<&BinCore> {
        self.imp()
            .as_bin()
            .ok_or_else(|| Error::NotABin(self.name().to_string()))
    }

    /// Add a child. Fails if this element is not a bin.
    pub fn add(&self, child: &Element) -> Result<()> {
        self.bin_core()?.add(self, child)
    }

    /// Add several children.
    pub fn add_many(&self, children: &[&Element]) -> Result<()> {
        let core = self.bin_core()?;
        for child in children {
            core.add(self, child)?;
        }
        Ok(())
    }

    /// Remove a child.
    pub fn remove(&self, child: &Element) -> Result<()> {
        self.bin_core()?.remove(self, child)
    }

    /// Children of a bin (empty for other elements).
    pub fn children(&self) -> Vec<Element> {
        self.imp().as_bin().map(BinCore::children).unwrap_or_default()
    }

    /// Find an element in a bin by name, searching nested bins.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.imp().as_bin()?.child_by_name_recurse(name)
    }

    /// Expose `target` (a pad of a child) on this bin as a ghost pad.
    pub fn add_ghost_pad(&self, name: &str, target: &Pad) -> Result<Pad> {
        self.bin_core()?;
        let ghost = Pad::new_ghost(name, target)?;
        self.add_pad(ghost.clone())?;
        Ok(ghost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::caps::Caps;
    use crate::element::State;
    use crate::message::MessageType;
    use crate::pad::PadTemplate;

    struct Node {
        sink: bool,
        src: bool,
        fail_on: Option<StateChange>,
    }

    impl Node {
        fn new(sink: bool, src: bool) -> Self {
            Self {
                sink,
                src,
                fail_on: None,
            }
        }
    }

    impl ElementImpl for Node {
        fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
            let mut templates = Vec::new();
            if self.sink {
                templates.push(Arc::new(PadTemplate::sink(Caps::new_any())));
            }
            if self.src {
                templates.push(Arc::new(PadTemplate::src(Caps::new_any())));
            }
            templates
        }

        fn flags(&self) -> ElementFlags {
            if !self.src && self.sink {
                ElementFlags::SINK
            } else {
                ElementFlags::NONE
            }
        }

        fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeResult {
            if Some(transition) == self.fail_on {
                return Err(StateChangeError);
            }
            Ok(StateChangeSuccess::Success)
        }
    }

    struct TopBin {
        core: BinCore,
        bus: Bus,
    }

    impl ElementImpl for TopBin {
        fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
            self.core.change_state(element, transition)
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

    #[test]
    fn test_sorted_sinks_first() {
        let bin = Bin::new("bin");
        let src = Element::new("src", Node::new(false, true));
        let filter = Element::new("filter", Node::new(true, true));
        let sink = Element::new("sink", Node::new(true, false));
        let loose = Element::new("loose", Node::new(false, true));
        bin.add_many(&[&src, &filter, &loose, &sink]).unwrap();
        Element::link_many(&[&src, &filter, &sink]).unwrap();

        let order: Vec<String> = bin
            .imp()
            .as_bin()
            .unwrap()
            .sorted_children()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(order, vec!["loose", "sink", "filter", "src"]);
    }

    #[test]
    fn test_add_checks_names_and_parents() {
        let bin = Bin::new("bin");
        let other = Bin::new("other");
        let a = Element::new("a", Node::new(false, true));
        bin.add(&a).unwrap();
        assert!(matches!(
            bin.add(&Element::new("a", Node::new(false, true))),
            Err(Error::NameInUse { .. })
        ));
        assert!(matches!(other.add(&a), Err(Error::AlreadyHasParent(_))));
        bin.remove(&a).unwrap();
        other.add(&a).unwrap();
        assert_eq!(a.parent(), Some(other));
    }

    #[test]
    fn test_not_a_bin() {
        let a = Element::new("a", Node::new(false, true));
        let b = Element::new("b", Node::new(false, true));
        assert!(matches!(a.add(&b), Err(Error::NotABin(_))));
    }

    #[test]
    fn test_cross_bin_link_is_wrong_hierarchy() {
        let outer = Bin::new("outer");
        let inner = Bin::new("inner");
        let src = Element::new("src", Node::new(false, true));
        let sink = Element::new("sink", Node::new(true, false));
        outer.add_many(&[&src, &inner]).unwrap();
        inner.add(&sink).unwrap();
        let err = src.link(&sink).unwrap_err();
        assert!(matches!(err, Error::Link(crate::error::LinkError::WrongHierarchy)));

        let ghost = inner
            .add_ghost_pad("sink", &sink.static_pad("sink").unwrap())
            .unwrap();
        src.static_pad("src").unwrap().link(&ghost).unwrap();
    }

    #[test]
    fn test_children_follow_bin_state() {
        let bin = Bin::new("bin");
        let a = Element::new("a", Node::new(false, true));
        let b = Element::new("b", Node::new(true, false));
        bin.add_many(&[&a, &b]).unwrap();
        assert_eq!(bin.set_state(State::Playing), Ok(StateChangeSuccess::Success));
        assert_eq!(a.current_state(), State::Playing);
        assert_eq!(b.current_state(), State::Playing);
        bin.set_state(State::Null).unwrap();
        assert_eq!(a.current_state(), State::Null);
    }

    #[test]
    fn test_failing_child_leaves_sibling() {
        let bin = Bin::new("bin");
        let bad = Element::new(
            "bad",
            Node {
                sink: false,
                src: true,
                fail_on: Some(StateChange::PausedToPlaying),
            },
        );
        let good = Element::new("good", Node::new(false, true));
        bin.add_many(&[&bad, &good]).unwrap();
        bin.set_state(State::Paused).unwrap();
        assert_eq!(bin.set_state(State::Playing), Err(StateChangeError));
        assert_eq!(bin.current_state(), State::Paused);
        assert_eq!(good.current_state(), State::Paused);
    }

    #[test]
    fn test_locked_child_skipped() {
        let bin = Bin::new("bin");
        let a = Element::new("a", Node::new(false, true));
        bin.add(&a).unwrap();
        a.set_locked_state(true);
        bin.set_state(State::Paused).unwrap();
        assert_eq!(a.current_state(), State::Null);
    }

    #[test]
    fn test_eos_aggregated_once() {
        let top = Element::new(
            "top",
            TopBin {
                core: BinCore::new(),
                bus: Bus::new(),
            },
        );
        let s1 = Element::new("s1", Node::new(true, false));
        let s2 = Element::new("s2", Node::new(true, false));
        top.add_many(&[&s1, &s2]).unwrap();
        let bus = top.imp().bus().unwrap();

        s1.post_message(Message::eos("s1"));
        assert!(bus.pop_filtered(MessageType::EOS).is_none());
        s2.post_message(Message::eos("s2"));
        s2.post_message(Message::eos("s2"));
        let eos = bus.pop_filtered(MessageType::EOS).unwrap();
        assert_eq!(eos.src(), Some("top"));
        assert!(bus.pop_filtered(MessageType::EOS).is_none());
    }

    #[test]
    fn test_flags_from_children() {
        let bin = Bin::new("bin");
        assert!(!bin.is_sink());
        bin.add(&Element::new("s", Node::new(true, false))).unwrap();
        assert!(bin.is_sink());
    }
}
