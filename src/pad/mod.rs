//! Pads: the connection points of elements.
//!
//! A pad is either a source (data flows out) or a sink (data flows in). A
//! source pad links to exactly one sink pad. Buffers are pushed from source to
//! sink with [`Pad::push`], or pulled by a sink with [`Pad::pull_range`].
//! Events travel both ways with [`Pad::send_event`].
//!
//! # Handlers
//!
//! Each pad dispatches received data to a handler. Handlers installed on the
//! pad itself win; otherwise the owning element's
//! [`ElementImpl`](crate::element::ElementImpl) hook is used.
//!
//! # Locking
//!
//! A pad has an object lock (peer, caps, flags, sticky events, probes) and a
//! stream lock. Buffers and serialized events arriving on a sink pad are
//! delivered while holding its stream lock, so they stay ordered. The object
//! lock is never held while calling into another pad or a handler.
//!
//! # Example
//!
//! ```rust
//! use mediaflow::caps::Caps;
//! use mediaflow::pad::{Pad, PadDirection};
//!
//! let src = Pad::new("src", PadDirection::Src);
//! let sink = Pad::new("sink", PadDirection::Sink);
//! src.link(&sink).unwrap();
//! assert_eq!(src.peer().as_ref(), Some(&sink));
//! assert!(src.unlink(&sink));
//! ```

mod ghost;
mod probe;
mod template;

pub use probe::{ProbeCallback, ProbeId, ProbeInfo, ProbeMask, ProbeReturn};
pub use template::{PadDirection, PadPresence, PadTemplate};

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, WeakElement};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, LinkError, Result};
use crate::event::{Event, StickyKind};
use probe::Probe;

/// Scheduling mode of an active pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadMode {
    /// Inactive.
    #[default]
    None,
    /// Upstream pushes buffers.
    Push,
    /// Downstream pulls ranges.
    Pull,
}

/// Handler for buffers arriving on a sink pad.
pub type ChainFunction = Arc<dyn Fn(&Pad, Buffer) -> FlowResult + Send + Sync>;
/// Handler for events arriving on a pad.
pub type EventFunction = Arc<dyn Fn(&Pad, Event) -> bool + Send + Sync>;
/// Handler for range requests on a source pad.
pub type GetRangeFunction =
    Arc<dyn Fn(&Pad, u64, u32) -> std::result::Result<Buffer, FlowError> + Send + Sync>;
/// Handler for caps queries.
pub type QueryCapsFunction = Arc<dyn Fn(&Pad, Option<&Caps>) -> Caps + Send + Sync>;
/// Fixation policy: picks one fixed caps out of the allowed set.
pub type FixateFunction = Arc<dyn Fn(&Pad, &Caps) -> Option<Caps> + Send + Sync>;

#[derive(Default, Clone)]
struct PadHandlers {
    chain: Option<ChainFunction>,
    event: Option<EventFunction>,
    getrange: Option<GetRangeFunction>,
    query_caps: Option<QueryCapsFunction>,
    fixate: Option<FixateFunction>,
}

struct PadState {
    peer: Weak<PadInner>,
    parent: Option<WeakElement>,
    current_caps: Option<Caps>,
    flushing: bool,
    eos: bool,
    mode: PadMode,
    /// At most one event per kind, ordered by kind.
    sticky: SmallVec<[Event; 3]>,
    probes: Vec<Probe>,
    next_probe_id: u64,
    last_flow: FlowResult,
    /// Proxy pad of a ghost pad.
    internal: Option<Pad>,
}

impl Default for PadState {
    fn default() -> Self {
        Self {
            peer: Weak::new(),
            parent: None,
            current_caps: None,
            flushing: false,
            eos: false,
            mode: PadMode::None,
            sticky: SmallVec::new(),
            probes: Vec::new(),
            next_probe_id: 1,
            last_flow: Ok(FlowSuccess::Ok),
            internal: None,
        }
    }
}

pub(crate) struct PadInner {
    name: String,
    direction: PadDirection,
    template: Option<Arc<PadTemplate>>,
    template_caps: Caps,
    state: Mutex<PadState>,
    stream_lock: Mutex<()>,
    handlers: RwLock<PadHandlers>,
}

/// Handle to a pad. Cloning is cheap; clones refer to the same pad.
#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

/// Weak handle to a pad.
#[derive(Clone, Default)]
pub struct WeakPad(Weak<PadInner>);

impl WeakPad {
    /// Get a strong handle if the pad still exists.
    pub fn upgrade(&self) -> Option<Pad> {
        self.0.upgrade().map(|inner| Pad { inner })
    }
}

fn store_sticky(sticky: &mut SmallVec<[Event; 3]>, event: Event) {
    let Some(kind) = event.sticky_kind() else {
        return;
    };
    match sticky.iter().position(|e| e.sticky_kind().is_some_and(|k| k >= kind)) {
        Some(idx) if sticky[idx].sticky_kind() == Some(kind) => sticky[idx] = event,
        Some(idx) => sticky.insert(idx, event),
        None => sticky.push(event),
    }
}

impl Pad {
    /// Create a pad accepting any caps.
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self::build(name.into(), direction, None, Caps::new_any())
    }

    /// Create a pad from a template.
    pub fn from_template(template: &Arc<PadTemplate>, name: impl Into<String>) -> Self {
        Self::build(
            name.into(),
            template.direction(),
            Some(Arc::clone(template)),
            template.caps().clone(),
        )
    }

    fn build(
        name: String,
        direction: PadDirection,
        template: Option<Arc<PadTemplate>>,
        template_caps: Caps,
    ) -> Self {
        Self {
            inner: Arc::new(PadInner {
                name,
                direction,
                template,
                template_caps,
                state: Mutex::new(PadState::default()),
                stream_lock: Mutex::new(()),
                handlers: RwLock::new(PadHandlers::default()),
            }),
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Pad name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Pad direction.
    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    /// Template the pad was created from.
    pub fn template(&self) -> Option<&Arc<PadTemplate>> {
        self.inner.template.as_ref()
    }

    /// Caps from the template (ANY without one).
    pub fn template_caps(&self) -> &Caps {
        &self.inner.template_caps
    }

    /// `element:pad` for log output.
    pub fn path(&self) -> String {
        match self.parent_element() {
            Some(element) => format!("{}:{}", element.name(), self.name()),
            None => format!(":{}", self.name()),
        }
    }

    /// Element owning this pad.
    pub fn parent_element(&self) -> Option<Element> {
        self.inner.state.lock().parent.as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<WeakElement>) -> bool {
        let mut state = self.inner.state.lock();
        if parent.is_some() && state.parent.as_ref().is_some_and(WeakElement::is_alive) {
            return false;
        }
        state.parent = parent;
        true
    }

    /// The linked pad.
    pub fn peer(&self) -> Option<Pad> {
        self.inner.state.lock().peer.upgrade().map(|inner| Pad { inner })
    }

    /// Check if the pad has a peer.
    pub fn is_linked(&self) -> bool {
        self.inner.state.lock().peer.strong_count() > 0
    }

    /// Negotiated caps.
    pub fn current_caps(&self) -> Option<Caps> {
        self.inner.state.lock().current_caps.clone()
    }

    /// Check if the pad refuses data because of a flush or deactivation.
    pub fn is_flushing(&self) -> bool {
        self.inner.state.lock().flushing
    }

    /// Check if EOS passed through this pad.
    pub fn is_eos(&self) -> bool {
        self.inner.state.lock().eos
    }

    /// Current scheduling mode.
    pub fn mode(&self) -> PadMode {
        self.inner.state.lock().mode
    }

    /// Check if the pad is activated in any mode.
    pub fn is_active(&self) -> bool {
        self.mode() != PadMode::None
    }

    /// Result of the last push through this pad.
    pub fn last_flow(&self) -> FlowResult {
        self.inner.state.lock().last_flow
    }

    /// Stored sticky event of `kind`.
    pub fn sticky_event(&self, kind: StickyKind) -> Option<Event> {
        self.inner
            .state
            .lock()
            .sticky
            .iter()
            .find(|e| e.sticky_kind() == Some(kind))
            .cloned()
    }

    /// All stored sticky events in stream order.
    pub fn sticky_events(&self) -> Vec<Event> {
        self.inner.state.lock().sticky.to_vec()
    }

    /// Take the stream lock, serializing with buffers and serialized events
    /// on this pad.
    pub fn stream_lock(&self) -> MutexGuard<'_, ()> {
        self.inner.stream_lock.lock()
    }

    /// Weak handle.
    pub fn downgrade(&self) -> WeakPad {
        WeakPad(Arc::downgrade(&self.inner))
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Install the buffer handler.
    pub fn set_chain_function<F>(&self, f: F)
    where
        F: Fn(&Pad, Buffer) -> FlowResult + Send + Sync + 'static,
    {
        self.inner.handlers.write().chain = Some(Arc::new(f));
    }

    /// Install the event handler.
    pub fn set_event_function<F>(&self, f: F)
    where
        F: Fn(&Pad, Event) -> bool + Send + Sync + 'static,
    {
        self.inner.handlers.write().event = Some(Arc::new(f));
    }

    /// Install the range handler.
    pub fn set_getrange_function<F>(&self, f: F)
    where
        F: Fn(&Pad, u64, u32) -> std::result::Result<Buffer, FlowError> + Send + Sync + 'static,
    {
        self.inner.handlers.write().getrange = Some(Arc::new(f));
    }

    /// Install the caps query handler.
    pub fn set_query_caps_function<F>(&self, f: F)
    where
        F: Fn(&Pad, Option<&Caps>) -> Caps + Send + Sync + 'static,
    {
        self.inner.handlers.write().query_caps = Some(Arc::new(f));
    }

    /// Install the fixation policy used by [`negotiate`](Self::negotiate).
    pub fn set_fixate_function<F>(&self, f: F)
    where
        F: Fn(&Pad, &Caps) -> Option<Caps> + Send + Sync + 'static,
    {
        self.inner.handlers.write().fixate = Some(Arc::new(f));
    }

    // ========================================================================
    // Linking
    // ========================================================================

    fn lock_pair<'a>(
        a: &'a Pad,
        b: &'a Pad,
    ) -> (MutexGuard<'a, PadState>, MutexGuard<'a, PadState>) {
        // Fixed lock order avoids deadlocks between concurrent link calls.
        if Arc::as_ptr(&a.inner) < Arc::as_ptr(&b.inner) {
            let ga = a.inner.state.lock();
            let gb = b.inner.state.lock();
            (ga, gb)
        } else {
            let gb = b.inner.state.lock();
            let ga = a.inner.state.lock();
            (ga, gb)
        }
    }

    fn check_hierarchy(src: &Pad, sink: &Pad) -> bool {
        match (src.parent_element(), sink.parent_element()) {
            (Some(a), Some(b)) => {
                let pa = a.parent();
                let pb = b.parent();
                match (pa, pb) {
                    (None, None) => true,
                    (Some(pa), Some(pb)) => pa == pb,
                    _ => false,
                }
            }
            _ => true,
        }
    }

    /// Link this pad with `other`. The pads may be given in either order.
    pub fn link(&self, other: &Pad) -> std::result::Result<(), LinkError> {
        let (src, sink) = match (self.direction(), other.direction()) {
            (PadDirection::Src, PadDirection::Sink) => (self, other),
            (PadDirection::Sink, PadDirection::Src) => (other, self),
            _ => return Err(LinkError::WrongDirection),
        };

        if !Self::check_hierarchy(src, sink) {
            tracing::debug!(src = %src.path(), sink = %sink.path(), "link: wrong hierarchy");
            return Err(LinkError::WrongHierarchy);
        }
        if src.is_linked() || sink.is_linked() {
            return Err(LinkError::AlreadyLinked);
        }

        let src_caps = src.query_caps(None);
        let sink_caps = sink.query_caps(None);
        let common = src_caps.intersect(&sink_caps);
        if common.is_empty() {
            tracing::debug!(
                src = %src.path(),
                sink = %sink.path(),
                %src_caps,
                %sink_caps,
                "link: no common format"
            );
            return Err(LinkError::NoCommonFormat);
        }

        {
            let (mut src_state, mut sink_state) = Self::lock_pair(src, sink);
            if src_state.peer.strong_count() > 0 || sink_state.peer.strong_count() > 0 {
                return Err(LinkError::AlreadyLinked);
            }
            src_state.peer = Arc::downgrade(&sink.inner);
            sink_state.peer = Arc::downgrade(&src.inner);
        }
        tracing::debug!(src = %src.path(), sink = %sink.path(), caps = %common, "linked");

        for event in src.sticky_events() {
            if !sink.receive_event(event) {
                tracing::debug!(sink = %sink.path(), "sticky event refused on link");
            }
        }

        if common.is_fixed() {
            let current = src.current_caps();
            if !current.is_some_and(|caps| caps.is_equal(&common)) {
                // A refusal leaves the pads unconfigured; the first push negotiates again.
                if let Err(err) = src.set_caps(&common) {
                    tracing::debug!(src = %src.path(), %err, "link: fixed caps not accepted yet");
                }
            }
        } else {
            let sink_caps = sink.current_caps().filter(Caps::is_fixed);
            let mut src_state = src.inner.state.lock();
            if src_state.current_caps.is_none() {
                src_state.current_caps = sink_caps;
            }
        }
        Ok(())
    }

    /// Unlink this pad from `other`. Returns false if they were not linked
    /// to each other.
    pub fn unlink(&self, other: &Pad) -> bool {
        let (src, sink) = match (self.direction(), other.direction()) {
            (PadDirection::Src, PadDirection::Sink) => (self, other),
            (PadDirection::Sink, PadDirection::Src) => (other, self),
            _ => return false,
        };
        let (mut src_state, mut sink_state) = Self::lock_pair(src, sink);
        let mutual = src_state.peer.as_ptr() == Arc::as_ptr(&sink.inner)
            && sink_state.peer.as_ptr() == Arc::as_ptr(&src.inner);
        if !mutual {
            return false;
        }
        src_state.peer = Weak::new();
        sink_state.peer = Weak::new();
        drop(src_state);
        drop(sink_state);
        tracing::debug!(src = %src.path(), sink = %sink.path(), "unlinked");
        true
    }

    /// Unlink from whatever peer this pad has.
    pub fn unlink_peer(&self) -> bool {
        match self.peer() {
            Some(peer) => self.unlink(&peer),
            None => false,
        }
    }

    // ========================================================================
    // Caps
    // ========================================================================

    /// Caps this pad can handle, intersected with `filter`.
    pub fn query_caps(&self, filter: Option<&Caps>) -> Caps {
        let handler = self.inner.handlers.read().query_caps.clone();
        match handler {
            Some(f) => f(self, filter),
            None => match self.parent_element() {
                Some(element) => element.imp().query_caps(&element, self, filter),
                None => self.default_query_caps(filter),
            },
        }
    }

    /// Template caps intersected with `filter`.
    pub fn default_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match filter {
            Some(filter) => filter.intersect(self.template_caps()),
            None => self.template_caps().clone(),
        }
    }

    /// Caps of the peer, or `filter` (ANY without one) when unlinked.
    pub fn peer_query_caps(&self, filter: Option<&Caps>) -> Caps {
        match self.peer() {
            Some(peer) => peer.query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        }
    }

    /// Caps query for elements that pass data through unchanged: template
    /// caps restricted by what the peers of the opposite pads accept.
    pub fn proxy_query_caps(&self, filter: Option<&Caps>) -> Caps {
        let mut result = self.template_caps().clone();
        if let Some(element) = self.parent_element() {
            for pad in element.pads() {
                if pad.direction() == self.direction() {
                    continue;
                }
                let peer_caps = pad.peer_query_caps(filter);
                result = peer_caps.intersect(pad.template_caps()).intersect(&result);
            }
        }
        match filter {
            Some(filter) => filter.intersect(&result),
            None => result,
        }
    }

    /// Fix the pad's caps.
    ///
    /// The caps must be fixed and inside the template caps. On a source pad
    /// a caps event is sent and the peer must accept it.
    pub fn set_caps(&self, caps: &Caps) -> Result<()> {
        if !caps.is_fixed() {
            return Err(Error::CapsRejected(format!("{caps} is not fixed")));
        }
        if !caps.is_subset(self.template_caps()) {
            return Err(Error::CapsRejected(format!(
                "{caps} is outside template caps {}",
                self.template_caps()
            )));
        }
        match self.direction() {
            PadDirection::Src => {
                if self.send_event(Event::Caps(caps.clone())) {
                    Ok(())
                } else {
                    Err(Error::CapsRejected(format!("{} refused {caps}", self.path())))
                }
            }
            PadDirection::Sink => {
                self.inner.state.lock().current_caps = Some(caps.clone());
                Ok(())
            }
        }
    }

    fn default_fixate(&self, allowed: &Caps) -> Option<Caps> {
        if let Some(peer_caps) = self.peer().and_then(|p| p.current_caps()) {
            if peer_caps.is_fixed() && peer_caps.is_subset(allowed) {
                return Some(peer_caps);
            }
        }
        allowed.fixate()
    }

    /// Negotiate caps with the peer starting from this pad's own caps.
    pub fn negotiate(&self) -> bool {
        let mine = self.query_caps(None);
        self.negotiate_from(&mine)
    }

    /// Negotiate caps with the peer, choosing among `candidates`.
    ///
    /// Allowed caps are `candidates ∩ peer caps`; one fixed caps is picked by
    /// the pad's fixation policy and set with [`set_caps`](Self::set_caps).
    pub fn negotiate_from(&self, candidates: &Caps) -> bool {
        let theirs = self.peer_query_caps(Some(candidates));
        let allowed = candidates.intersect(&theirs);
        if allowed.is_empty() {
            tracing::debug!(pad = %self.path(), %candidates, %theirs, "negotiation: no common caps");
            return false;
        }
        if allowed.is_any() {
            return true;
        }
        let fixate = self.inner.handlers.read().fixate.clone();
        let fixed = match fixate {
            Some(f) => f(self, &allowed),
            None => self.default_fixate(&allowed),
        };
        let Some(fixed) = fixed.filter(Caps::is_fixed) else {
            tracing::debug!(pad = %self.path(), %allowed, "negotiation: could not fixate");
            return false;
        };
        match self.set_caps(&fixed) {
            Ok(()) => {
                tracing::debug!(pad = %self.path(), caps = %fixed, "negotiated");
                true
            }
            Err(err) => {
                tracing::debug!(pad = %self.path(), %err, "negotiation failed");
                false
            }
        }
    }

    // ========================================================================
    // Probes
    // ========================================================================

    /// Install a probe. It is called for data matching `mask` passing this pad.
    pub fn add_probe<F>(&self, mask: ProbeMask, callback: F) -> ProbeId
    where
        F: Fn(&Pad, &mut ProbeInfo<'_>) -> ProbeReturn + Send + Sync + 'static,
    {
        let mut state = self.inner.state.lock();
        let id = ProbeId(state.next_probe_id);
        state.next_probe_id += 1;
        state.probes.push(Probe {
            id,
            mask,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a probe. Returns false if it was not installed.
    pub fn remove_probe(&self, id: ProbeId) -> bool {
        let mut state = self.inner.state.lock();
        let before = state.probes.len();
        state.probes.retain(|p| p.id != id);
        state.probes.len() != before
    }

    /// Run matching probes. Returns false if the data must be dropped.
    fn run_probes(&self, info: &mut ProbeInfo<'_>, upstream: bool) -> bool {
        let mask = info.mask(upstream);
        let probes: SmallVec<[Probe; 2]> = self
            .inner
            .state
            .lock()
            .probes
            .iter()
            .filter(|p| p.mask.intersects(mask))
            .cloned()
            .collect();
        if probes.is_empty() {
            return true;
        }

        let mut pass = true;
        let mut removed: SmallVec<[ProbeId; 2]> = SmallVec::new();
        for probe in &probes {
            match (probe.callback)(self, info) {
                ProbeReturn::Pass => {}
                ProbeReturn::Remove => removed.push(probe.id),
                ProbeReturn::Drop => {
                    pass = false;
                    break;
                }
            }
        }
        if !removed.is_empty() {
            self.inner.state.lock().probes.retain(|p| !removed.contains(&p.id));
        }
        pass
    }

    // ========================================================================
    // Dataflow
    // ========================================================================

    /// Push a buffer to the peer. Source pads only.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Src {
            tracing::warn!(pad = %self.path(), "push on a sink pad");
            return Err(FlowError::Error);
        }
        let peer = {
            let state = self.inner.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            state.peer.upgrade().map(|inner| Pad { inner })
        };
        let result = match peer {
            None => Err(FlowError::NotLinked),
            Some(peer) => self.push_to(&peer, buffer),
        };
        self.inner.state.lock().last_flow = result;
        if let Err(err) = result {
            tracing::trace!(pad = %self.path(), %err, "push returned");
        }
        result
    }

    fn push_to(&self, peer: &Pad, mut buffer: Buffer) -> FlowResult {
        let needs_caps = !self.template_caps().is_any() && self.current_caps().is_none();
        if needs_caps && !self.negotiate() {
            return Err(FlowError::NotNegotiated);
        }
        if !self.run_probes(&mut ProbeInfo::Buffer(&mut buffer), false) {
            return Ok(FlowSuccess::Ok);
        }
        peer.chain(buffer)
    }

    /// Deliver a buffer arriving on this sink pad.
    pub(crate) fn chain(&self, mut buffer: Buffer) -> FlowResult {
        let _stream = self.inner.stream_lock.lock();
        {
            let state = self.inner.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
        }
        if !self.run_probes(&mut ProbeInfo::Buffer(&mut buffer), false) {
            return Ok(FlowSuccess::Ok);
        }
        let handler = self.inner.handlers.read().chain.clone();
        match handler {
            Some(f) => f(self, buffer),
            None => match self.parent_element() {
                Some(element) => element.imp().chain(&element, self, buffer),
                None => Err(FlowError::Error),
            },
        }
    }

    /// Pull a range from the peer source pad. Sink pads only.
    pub fn pull_range(&self, offset: u64, size: u32) -> std::result::Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Sink {
            return Err(FlowError::Error);
        }
        let peer = {
            let state = self.inner.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            state.peer.upgrade().map(|inner| Pad { inner })
        };
        match peer {
            Some(peer) => peer.get_range(offset, size),
            None => Err(FlowError::NotLinked),
        }
    }

    fn get_range(&self, offset: u64, size: u32) -> std::result::Result<Buffer, FlowError> {
        let _stream = self.inner.stream_lock.lock();
        if self.inner.state.lock().flushing {
            return Err(FlowError::Flushing);
        }
        let handler = self.inner.handlers.read().getrange.clone();
        match handler {
            Some(f) => f(self, offset, size),
            None => match self.parent_element() {
                Some(element) => element.imp().get_range(&element, self, offset, size),
                None => Err(FlowError::Error),
            },
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Send an event to the peer.
    ///
    /// Downstream events are sent from source pads, upstream events from
    /// sink pads. Sticky events are stored on the pad even when unlinked,
    /// in which case the call succeeds.
    pub fn send_event(&self, mut event: Event) -> bool {
        let valid = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !valid {
            tracing::warn!(pad = %self.path(), event = event.name(), "event sent in the wrong direction");
            return false;
        }
        let upstream = self.direction() == PadDirection::Sink;
        let is_caps = matches!(event, Event::Caps(_));

        let peer = {
            let mut state = self.inner.state.lock();
            match &event {
                Event::FlushStart => state.flushing = true,
                Event::FlushStop(_) => {
                    state.flushing = false;
                    state.eos = false;
                }
                _ if event.is_serialized() && state.flushing => {
                    tracing::debug!(pad = %self.path(), event = event.name(), "refusing event while flushing");
                    return false;
                }
                Event::Eos => state.eos = true,
                Event::StreamStart(_) => state.eos = false,
                _ => {}
            }
            if !upstream && event.is_sticky() && !is_caps {
                store_sticky(&mut state.sticky, event.clone());
            }
            state.peer.upgrade().map(|inner| Pad { inner })
        };

        if !self.run_probes(&mut ProbeInfo::Event(&mut event), upstream) {
            return true;
        }

        let caps = match &event {
            Event::Caps(caps) => Some(caps.clone()),
            _ => None,
        };
        let sticky = event.is_sticky();
        let accepted = match peer {
            Some(peer) => peer.receive_event(event),
            None => sticky,
        };
        if accepted {
            if let Some(caps) = caps {
                let mut state = self.inner.state.lock();
                state.current_caps = Some(caps.clone());
                store_sticky(&mut state.sticky, Event::Caps(caps));
            }
        }
        accepted
    }

    /// Deliver an event arriving on this pad from its peer.
    pub(crate) fn receive_event(&self, mut event: Event) -> bool {
        let upstream = self.direction() == PadDirection::Src;
        let serialized = !upstream && event.is_serialized();

        if matches!(event, Event::FlushStart) {
            self.inner.state.lock().flushing = true;
        }

        let _stream = serialized.then(|| self.inner.stream_lock.lock());
        {
            let mut state = self.inner.state.lock();
            match &event {
                Event::FlushStart => {}
                Event::FlushStop(_) => {
                    state.flushing = false;
                    state.eos = false;
                }
                _ if serialized && state.flushing => {
                    tracing::debug!(pad = %self.path(), event = event.name(), "refusing event while flushing");
                    return false;
                }
                _ if serialized && state.eos && !event.is_sticky() => {
                    tracing::debug!(pad = %self.path(), event = event.name(), "refusing event after eos");
                    return false;
                }
                Event::Eos => state.eos = true,
                Event::StreamStart(_) => state.eos = false,
                _ => {}
            }
        }

        if let Event::Caps(caps) = &event {
            let allowed = self.query_caps(None);
            if !caps.is_fixed() || !caps.is_subset(&allowed) {
                tracing::debug!(pad = %self.path(), %caps, %allowed, "caps not acceptable");
                return false;
            }
        }

        if !self.run_probes(&mut ProbeInfo::Event(&mut event), upstream) {
            return true;
        }

        let sticky = (!upstream && event.is_sticky()).then(|| event.clone());
        let handler = self.inner.handlers.read().event.clone();
        let handled = match handler {
            Some(f) => f(self, event),
            None => match self.parent_element() {
                Some(element) => match self.direction() {
                    PadDirection::Sink => element.imp().sink_event(&element, self, event),
                    PadDirection::Src => element.imp().src_event(&element, self, event),
                },
                None => true,
            },
        };

        if handled {
            if let Some(sticky) = sticky {
                let mut state = self.inner.state.lock();
                if let Event::Caps(caps) = &sticky {
                    state.current_caps = Some(caps.clone());
                }
                store_sticky(&mut state.sticky, sticky);
            }
        }
        handled
    }

    /// Default event handling: forward to every pad of the opposite
    /// direction on the owning element.
    ///
    /// Returns true if there is nothing to forward to or any forward
    /// succeeded.
    pub fn event_default(&self, event: Event) -> bool {
        let Some(element) = self.parent_element() else {
            return true;
        };
        let targets: Vec<Pad> = element
            .pads()
            .into_iter()
            .filter(|p| p.direction() != self.direction())
            .collect();
        if targets.is_empty() {
            return true;
        }
        let mut any = false;
        for pad in targets {
            any |= pad.send_event(event.clone());
        }
        any
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// Activate in push mode, or deactivate.
    ///
    /// Deactivation marks the pad flushing and waits for a streaming thread
    /// inside the pad to leave it, then drops sticky events and caps.
    pub fn set_active(&self, active: bool) -> bool {
        if active {
            if self.is_active() {
                return true;
            }
            self.activate_mode(PadMode::Push, true)
        } else {
            let mode = self.mode();
            if mode == PadMode::None {
                return true;
            }
            self.activate_mode(mode, false)
        }
    }

    /// Activate or deactivate in a specific mode.
    ///
    /// Activating a sink pad in pull mode also activates its peer in pull
    /// mode.
    pub fn activate_mode(&self, mode: PadMode, active: bool) -> bool {
        let internal = self.inner.state.lock().internal.clone();
        if active {
            let current = self.mode();
            if current == mode {
                return true;
            }
            if current != PadMode::None {
                self.deactivate();
            }
            if mode == PadMode::Pull && self.direction() == PadDirection::Sink {
                let Some(peer) = self.peer() else {
                    tracing::debug!(pad = %self.path(), "pull mode needs a peer");
                    return false;
                };
                if !peer.activate_mode(PadMode::Pull, true) {
                    return false;
                }
            }
            {
                let mut state = self.inner.state.lock();
                state.mode = mode;
                state.flushing = false;
                state.eos = false;
                state.last_flow = Ok(FlowSuccess::Ok);
            }
            if let Some(internal) = internal {
                internal.activate_mode(mode, true);
            }
            tracing::trace!(pad = %self.path(), ?mode, "activated");
            true
        } else {
            if self.mode() != mode {
                return self.mode() == PadMode::None;
            }
            self.deactivate();
            if let Some(internal) = internal {
                internal.set_active(false);
            }
            true
        }
    }

    fn deactivate(&self) {
        {
            let mut state = self.inner.state.lock();
            state.flushing = true;
            state.mode = PadMode::None;
        }
        // Wait for any streaming thread to leave the pad.
        drop(self.inner.stream_lock.lock());
        let mut state = self.inner.state.lock();
        state.sticky.clear();
        state.current_caps = None;
        tracing::trace!(pad = %self.path(), "deactivated");
    }

    pub(crate) fn set_internal(&self, internal: Pad) {
        self.inner.state.lock().internal = Some(internal);
    }

    /// Proxy pad of a ghost pad.
    pub fn internal(&self) -> Option<Pad> {
        self.inner.state.lock().internal.clone()
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Pad {}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.inner.name)
            .field("direction", &self.inner.direction)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::Value;
    use crate::clock::ClockTime;
    use crate::event::{Segment, StreamStartEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn caps(s: &str) -> Caps {
        s.parse().unwrap()
    }

    fn sink_with_template(c: &str) -> Pad {
        let t = Arc::new(PadTemplate::sink(caps(c)));
        Pad::from_template(&t, "sink")
    }

    fn src_with_template(c: &str) -> Pad {
        let t = Arc::new(PadTemplate::src(caps(c)));
        Pad::from_template(&t, "src")
    }

    #[test]
    fn test_link_either_order() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        sink.link(&src).unwrap();
        assert_eq!(src.peer(), Some(sink.clone()));
        assert_eq!(sink.peer(), Some(src.clone()));
        assert_eq!(src.link(&sink), Err(LinkError::AlreadyLinked));
    }

    #[test]
    fn test_link_wrong_direction() {
        let a = Pad::new("a", PadDirection::Src);
        let b = Pad::new("b", PadDirection::Src);
        assert_eq!(a.link(&b), Err(LinkError::WrongDirection));
    }

    #[test]
    fn test_link_no_common_format() {
        let src = src_with_template("audio/raw");
        let sink = sink_with_template("video/raw");
        assert_eq!(src.link(&sink), Err(LinkError::NoCommonFormat));
        assert!(!src.is_linked());
    }

    #[test]
    fn test_link_fixes_common_caps() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=5");
        src.link(&sink).unwrap();
        let expected = caps("video/x, width=5");
        assert_eq!(src.current_caps(), Some(expected.clone()));
        assert_eq!(sink.current_caps(), Some(expected));
    }

    #[test]
    fn test_link_sends_fixed_caps_as_event() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=5");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            sink.set_event_function(move |_, event| {
                seen.lock().push(event);
                true
            });
        }
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));

        src.link(&sink).unwrap();
        src.push(Buffer::from_slice(b"x")).unwrap();

        let seen = seen.lock();
        let caps_events: Vec<_> = seen
            .iter()
            .filter_map(|event| match event {
                Event::Caps(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(caps_events, vec![caps("video/x, width=5")]);
        assert!(src.sticky_event(StickyKind::Caps).is_some());
        assert!(sink.sticky_event(StickyKind::Caps).is_some());
    }

    #[test]
    fn test_link_refused_caps_negotiate_on_push() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=5");
        let accept = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let accept = Arc::clone(&accept);
            sink.set_event_function(move |_, _| accept.load(Ordering::SeqCst));
        }
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));

        src.link(&sink).unwrap();
        assert!(src.is_linked());
        assert!(src.current_caps().is_none());

        accept.store(true, Ordering::SeqCst);
        src.push(Buffer::from_slice(b"x")).unwrap();
        assert_eq!(sink.current_caps(), Some(caps("video/x, width=5")));
    }

    #[test]
    fn test_relink_restores_peer_and_caps() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=5");
        src.link(&sink).unwrap();
        let first = (src.peer(), sink.peer(), src.current_caps(), sink.current_caps());

        assert!(src.unlink(&sink));
        src.link(&sink).unwrap();
        let second = (src.peer(), sink.peer(), src.current_caps(), sink.current_caps());

        assert_eq!(first, second);
        assert_eq!(second.2, Some(caps("video/x, width=5")));
    }

    #[test]
    fn test_unlink_requires_mutual_peers() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        let other = Pad::new("other", PadDirection::Sink);
        src.link(&sink).unwrap();
        assert!(!src.unlink(&other));
        assert!(src.unlink(&sink));
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
        assert!(!src.unlink(&sink));
    }

    #[test]
    fn test_push_unlinked() {
        let src = Pad::new("src", PadDirection::Src);
        assert_eq!(src.push(Buffer::from_slice(b"x")), Err(FlowError::NotLinked));
        assert_eq!(src.last_flow(), Err(FlowError::NotLinked));
    }

    #[test]
    fn test_push_reaches_chain() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        sink.set_chain_function(move |_, buf| {
            c.fetch_add(buf.len(), Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        });
        src.link(&sink).unwrap();
        src.push(Buffer::from_slice(b"abc")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_flush_start_stop() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
        src.link(&sink).unwrap();

        assert!(src.send_event(Event::FlushStart));
        assert!(sink.is_flushing());
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Flushing));

        assert!(src.send_event(Event::flush_stop()));
        assert!(!sink.is_flushing());
        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
    }

    #[test]
    fn test_eos_blocks_further_pushes() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
        src.link(&sink).unwrap();
        assert!(src.send_event(Event::Eos));
        assert!(sink.is_eos());
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::Eos));
    }

    #[test]
    fn test_wrong_direction_event() {
        let src = Pad::new("src", PadDirection::Src);
        assert!(!src.send_event(Event::Reconfigure));
    }

    #[test]
    fn test_sticky_events_replayed_on_link() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        assert!(src.send_event(Event::Segment(Segment::new_time(ClockTime::ZERO, None))));
        assert!(src.send_event(Event::StreamStart(StreamStartEvent::new("s"))));
        let kinds: Vec<_> = src.sticky_events().iter().filter_map(Event::sticky_kind).collect();
        assert_eq!(kinds, vec![StickyKind::StreamStart, StickyKind::Segment]);

        src.link(&sink).unwrap();
        assert!(sink.sticky_event(StickyKind::StreamStart).is_some());
        assert!(sink.sticky_event(StickyKind::Segment).is_some());
    }

    #[test]
    fn test_set_caps_validation() {
        let src = src_with_template("video/x, width=[1, 10]");
        assert!(src.set_caps(&caps("video/x, width=[1, 2]")).is_err());
        assert!(src.set_caps(&caps("video/x, width=20")).is_err());
        src.set_caps(&caps("video/x, width=4")).unwrap();
        assert_eq!(src.current_caps(), Some(caps("video/x, width=4")));
    }

    #[test]
    fn test_caps_event_rejected_by_sink() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=[1, 5]");
        src.link(&sink).unwrap();
        assert!(src.set_caps(&caps("video/x, width=8")).is_err());
        src.set_caps(&caps("video/x, width=3")).unwrap();
        assert_eq!(sink.current_caps(), Some(caps("video/x, width=3")));
    }

    #[test]
    fn test_negotiate_on_first_push() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=[4, 6]");
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
        src.link(&sink).unwrap();
        assert!(src.current_caps().is_none());
        src.push(Buffer::with_size(1)).unwrap();
        assert_eq!(src.current_caps(), Some(caps("video/x, width=4")));
    }

    #[test]
    fn test_custom_fixation() {
        let src = src_with_template("video/x, width=[1, 10]");
        let sink = sink_with_template("video/x, width=[4, 6]");
        sink.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
        src.set_fixate_function(|_, allowed| {
            let mut s = allowed.structure(0)?.clone();
            s.fixate_field_nearest("width", &Value::Int(100));
            Some(Caps::from_structure(s))
        });
        src.link(&sink).unwrap();
        assert!(src.negotiate());
        assert_eq!(src.current_caps(), Some(caps("video/x, width=6")));
    }

    #[test]
    fn test_probe_drop_and_remove() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        let received = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&received);
        sink.set_chain_function(move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        });
        src.link(&sink).unwrap();

        let id = src.add_probe(ProbeMask::BUFFER, |_, _| ProbeReturn::Drop);
        assert_eq!(src.push(Buffer::with_size(1)), Ok(FlowSuccess::Ok));
        assert_eq!(received.load(Ordering::SeqCst), 0);
        assert!(src.remove_probe(id));

        src.add_probe(ProbeMask::BUFFER, |_, _| ProbeReturn::Remove);
        src.push(Buffer::with_size(1)).unwrap();
        src.push(Buffer::with_size(1)).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 2);
        assert!(src.inner.state.lock().probes.is_empty());
    }

    #[test]
    fn test_deactivate_clears_state() {
        let src = src_with_template("video/x, width=4");
        assert!(src.set_active(true));
        src.set_caps(&caps("video/x, width=4")).unwrap();
        assert!(src.set_active(false));
        assert!(src.is_flushing());
        assert!(src.current_caps().is_none());
        assert!(src.sticky_events().is_empty());
        assert!(src.set_active(true));
        assert!(!src.is_flushing());
    }

    #[test]
    fn test_pull_range() {
        let src = Pad::new("src", PadDirection::Src);
        let sink = Pad::new("sink", PadDirection::Sink);
        src.set_getrange_function(|_, offset, size| {
            Ok(Buffer::from_vec(vec![offset as u8; size as usize]))
        });
        src.link(&sink).unwrap();
        assert!(sink.activate_mode(PadMode::Pull, true));
        assert_eq!(src.mode(), PadMode::Pull);
        let buf = sink.pull_range(7, 3).unwrap();
        assert_eq!(buf.data(), &[7, 7, 7]);
    }
}
