//! Queue element for asynchronous buffering.
//!
//! Provides a buffer queue between pipeline elements, enabling:
//! - Decoupling of producer and consumer rates
//! - Backpressure handling
//! - Thread boundary crossing
//!
//! ```text
//!  upstream thread                     queue task (src pad stream lock)
//!  ───────────────                     ─────────────────────────────────
//!  chain(buffer) ──▶ [ b e b b ... ] ──▶ pop ──▶ push / send_event
//!       │ full: block / leak                 │ flow error: pause, remember
//!       ▼                                    ▼
//!  returns the last downstream flow error to upstream
//! ```

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementImpl, PropertyValue, StateChange, StateChangeResult, StateChangeSuccess,
};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result, StateChangeError};
use crate::event::Event;
use crate::pad::{Pad, PadMode, PadTemplate};
use crate::task::{Task, TaskFlow};

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block until space is available (default).
    #[default]
    None,
    /// Drop new buffers when full (upstream leaky).
    Upstream,
    /// Drop old buffers when full (downstream leaky).
    Downstream,
}

impl LeakyMode {
    fn as_str(self) -> &'static str {
        match self {
            LeakyMode::None => "none",
            LeakyMode::Upstream => "upstream",
            LeakyMode::Downstream => "downstream",
        }
    }
}

impl FromStr for LeakyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "no" | "0" => Ok(LeakyMode::None),
            "upstream" | "1" => Ok(LeakyMode::Upstream),
            "downstream" | "2" => Ok(LeakyMode::Downstream),
            other => Err(Error::InvalidProperty {
                property: "leaky".to_string(),
                reason: format!("unknown leaky mode '{other}'"),
            }),
        }
    }
}

/// Queue limits. Zero disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum number of queued buffers.
    pub max_buffers: usize,
    /// Maximum number of queued bytes.
    pub max_bytes: usize,
    /// Behaviour when full.
    pub leaky: LeakyMode,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_buffers: 200,
            max_bytes: 10 * 1024 * 1024,
            leaky: LeakyMode::None,
        }
    }
}

enum QueueItem {
    Buffer(Buffer),
    Event(Event),
}

struct QueueState {
    items: VecDeque<QueueItem>,
    buffers: usize,
    bytes: usize,
    flushing: bool,
    /// Set once EOS was queued; buffers are refused until a flush.
    eos: bool,
    /// Last downstream result, returned to upstream when it is an error.
    srcresult: FlowResult,
    total_pushed: u64,
    total_popped: u64,
    total_dropped: u64,
}

impl QueueState {
    fn new(flushing: bool) -> Self {
        Self {
            items: VecDeque::new(),
            buffers: 0,
            bytes: 0,
            flushing,
            eos: false,
            srcresult: if flushing { Err(FlowError::Flushing) } else { Ok(FlowSuccess::Ok) },
            total_pushed: 0,
            total_popped: 0,
            total_dropped: 0,
        }
    }

    fn is_full(&self, settings: &QueueSettings) -> bool {
        (settings.max_buffers > 0 && self.buffers >= settings.max_buffers)
            || (settings.max_bytes > 0 && self.bytes >= settings.max_bytes)
    }

    fn pop(&mut self) -> Option<QueueItem> {
        let item = self.items.pop_front()?;
        if let QueueItem::Buffer(buffer) = &item {
            self.buffers -= 1;
            self.bytes = self.bytes.saturating_sub(buffer.len());
            self.total_popped += 1;
        }
        Some(item)
    }

    /// Drop the oldest queued buffer, keeping events.
    fn drop_oldest_buffer(&mut self) -> bool {
        let Some(index) = self
            .items
            .iter()
            .position(|item| matches!(item, QueueItem::Buffer(_)))
        else {
            return false;
        };
        if let Some(QueueItem::Buffer(buffer)) = self.items.remove(index) {
            self.buffers -= 1;
            self.bytes = self.bytes.saturating_sub(buffer.len());
            self.total_dropped += 1;
        }
        true
    }

    fn clear(&mut self) {
        self.items.clear();
        self.buffers = 0;
        self.bytes = 0;
    }
}

/// A queue element that buffers data between pipeline stages.
///
/// The upstream thread stores buffers and serialized events; the queue's own
/// task pushes them downstream from the `src` pad. When the downstream push
/// fails, the flow error is remembered and returned to upstream on its next
/// push.
///
/// Properties: `max-size-buffers` (200), `max-size-bytes` (10 MiB), `leaky`
/// (`none`, `upstream`, `downstream`), and the read-only
/// `current-level-buffers` / `current-level-bytes`.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::{LeakyMode, Queue, QueueSettings};
///
/// let queue = Queue::with_settings(QueueSettings {
///     max_buffers: 16,
///     leaky: LeakyMode::Downstream,
///     ..Default::default()
/// })
/// .into_element("q");
/// assert_eq!(queue.property("leaky").unwrap().as_string(), "downstream");
/// ```
pub struct Queue {
    settings: Mutex<QueueSettings>,
    state: Mutex<QueueState>,
    item_added: Condvar,
    item_removed: Condvar,
    task: Mutex<Option<Task>>,
}

impl Queue {
    /// Create a queue with default limits.
    pub fn new() -> Self {
        Self::with_settings(QueueSettings::default())
    }

    /// Create a queue with the given limits.
    pub fn with_settings(settings: QueueSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
            state: Mutex::new(QueueState::new(true)),
            item_added: Condvar::new(),
            item_removed: Condvar::new(),
            task: Mutex::new(None),
        }
    }

    /// Wrap this queue in an element.
    pub fn into_element(self, name: &str) -> Element {
        Element::new(name, self)
    }

    /// Number of queued buffers.
    pub fn len(&self) -> usize {
        self.state.lock().buffers
    }

    /// Check if no buffer is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get statistics about the queue.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            current_buffers: state.buffers,
            current_bytes: state.bytes,
            total_pushed: state.total_pushed,
            total_popped: state.total_popped,
            total_dropped: state.total_dropped,
        }
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        state.flushing = flushing;
        if flushing {
            state.srcresult = Err(FlowError::Flushing);
            self.item_added.notify_all();
            self.item_removed.notify_all();
        }
    }

    // ========================================================================
    // Upstream side
    // ========================================================================

    fn enqueue_buffer(&self, element: &Element, buffer: Buffer) -> FlowResult {
        let settings = *self.settings.lock();
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            state.srcresult?;
            if !state.is_full(&settings) {
                break;
            }
            match settings.leaky {
                LeakyMode::None => {
                    tracing::trace!(element = %element.name(), "queue full, waiting");
                    self.item_removed.wait(&mut state);
                }
                LeakyMode::Upstream => {
                    state.total_dropped += 1;
                    tracing::trace!(element = %element.name(), "queue full, dropping new buffer");
                    return Ok(FlowSuccess::Ok);
                }
                LeakyMode::Downstream => {
                    if !state.drop_oldest_buffer() {
                        break;
                    }
                    tracing::trace!(element = %element.name(), "queue full, dropped oldest buffer");
                }
            }
        }
        state.buffers += 1;
        state.bytes += buffer.len();
        state.total_pushed += 1;
        state.items.push_back(QueueItem::Buffer(buffer));
        self.item_added.notify_one();
        Ok(FlowSuccess::Ok)
    }

    fn enqueue_event(&self, event: Event) -> bool {
        let mut state = self.state.lock();
        if state.flushing {
            return false;
        }
        if matches!(event, Event::Eos) {
            state.eos = true;
        }
        if let Event::StreamStart(_) | Event::Segment(_) = event {
            // A new stream after EOS or a not-linked stop gets another chance.
            state.eos = false;
            if matches!(state.srcresult, Err(FlowError::Eos | FlowError::NotLinked)) {
                state.srcresult = Ok(FlowSuccess::Ok);
            }
        }
        state.items.push_back(QueueItem::Event(event));
        self.item_added.notify_one();
        true
    }

    fn flush_start(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        self.set_flushing(true);
        let forwarded = pad.event_default(event);
        self.pause_task();
        // Wait for the streaming thread to leave the src pad so a later
        // flush-stop cannot interleave with its error handling.
        if let Some(src) = element.static_pad("src") {
            drop(src.stream_lock());
        }
        tracing::debug!(element = %element.name(), "flush start");
        forwarded
    }

    fn flush_stop(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        let forwarded = pad.event_default(event);
        {
            let mut state = self.state.lock();
            state.clear();
            state.flushing = false;
            state.eos = false;
            state.srcresult = Ok(FlowSuccess::Ok);
            self.item_removed.notify_all();
        }
        let active = element
            .static_pad("src")
            .is_some_and(|src| src.mode() == PadMode::Push);
        if active {
            if let Err(err) = self.start_task(element) {
                tracing::warn!(element = %element.name(), ?err, "could not restart queue task");
            }
        }
        tracing::debug!(element = %element.name(), "flush stop");
        forwarded
    }

    // ========================================================================
    // Downstream side
    // ========================================================================

    fn start_task(&self, element: &Element) -> std::result::Result<(), StateChangeError> {
        let task = self
            .task
            .lock()
            .get_or_insert_with(|| {
                let weak = element.downgrade();
                Task::new(format!("{}:src", element.name()), move || {
                    let Some(element) = weak.upgrade() else {
                        return TaskFlow::Stop;
                    };
                    match element.downcast_imp::<Queue>() {
                        Some(queue) => queue.iterate(&element),
                        None => TaskFlow::Stop,
                    }
                })
            })
            .clone();
        task.start().map_err(|err| {
            tracing::error!(element = %element.name(), %err, "could not start queue task");
            StateChangeError
        })
    }

    fn pause_task(&self) {
        let task = self.task.lock().clone();
        if let Some(task) = task {
            if let Err(err) = task.pause() {
                tracing::warn!(task = %task.name(), %err, "could not pause task");
            }
        }
    }

    fn iterate(&self, element: &Element) -> TaskFlow {
        let Some(pad) = element.static_pad("src") else {
            return TaskFlow::Stop;
        };
        let _stream = pad.stream_lock();
        let item = {
            let mut state = self.state.lock();
            loop {
                if state.flushing {
                    return TaskFlow::Pause;
                }
                if let Some(item) = state.pop() {
                    self.item_removed.notify_one();
                    break item;
                }
                self.item_added.wait(&mut state);
            }
        };

        match item {
            QueueItem::Buffer(buffer) => match pad.push(buffer) {
                Ok(_) => TaskFlow::Continue,
                Err(flow) => self.downstream_failed(element, &pad, flow),
            },
            QueueItem::Event(event) => {
                let eos = matches!(event, Event::Eos);
                pad.send_event(event);
                if eos {
                    self.downstream_failed(element, &pad, FlowError::Eos)
                } else {
                    TaskFlow::Continue
                }
            }
        }
    }

    /// Remember a downstream flow error and pause.
    fn downstream_failed(&self, element: &Element, pad: &Pad, flow: FlowError) -> TaskFlow {
        {
            let mut state = self.state.lock();
            if !state.flushing {
                state.srcresult = Err(flow);
            }
            self.item_removed.notify_all();
        }
        match flow {
            FlowError::Error | FlowError::NotNegotiated => {
                pad.send_event(Event::Eos);
                element.post_error(
                    "internal data stream error",
                    Some(format!("streaming stopped, reason {flow}")),
                );
            }
            FlowError::NotLinked | FlowError::Eos | FlowError::Flushing => {
                tracing::debug!(element = %element.name(), %flow, "queue task pausing");
            }
        }
        TaskFlow::Pause
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.stop();
        }
    }
}

impl ElementImpl for Queue {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![
            Arc::new(PadTemplate::sink(Caps::new_any())),
            Arc::new(PadTemplate::src(Caps::new_any())),
        ]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::ReadyToPaused => {
                *self.state.lock() = QueueState::new(false);
                self.start_task(element)?;
            }
            StateChange::PausedToReady => {
                let task = self.task.lock().take();
                if let Some(task) = task {
                    task.join();
                }
                *self.state.lock() = QueueState::new(true);
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn unlock(&self, _element: &Element) {
        self.set_flushing(true);
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.enqueue_buffer(element, buffer)
    }

    fn sink_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::FlushStart => self.flush_start(element, pad, event),
            Event::FlushStop(_) => self.flush_stop(element, pad, event),
            event if event.is_serialized() => self.enqueue_event(event),
            event => pad.event_default(event),
        }
    }

    fn query_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_query_caps(filter)
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock();
        match name {
            "max-size-buffers" => {
                let n = value.expect_with(name, "a non-negative integer", PropertyValue::as_u64)?;
                settings.max_buffers = usize::try_from(n).unwrap_or(usize::MAX);
            }
            "max-size-bytes" => {
                let n = value.expect_with(name, "a non-negative integer", PropertyValue::as_u64)?;
                settings.max_bytes = usize::try_from(n).unwrap_or(usize::MAX);
            }
            "leaky" => settings.leaky = value.as_string().parse()?,
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_string(),
                    property: name.to_string(),
                });
            }
        }
        // Raised limits may unblock upstream.
        self.item_removed.notify_all();
        Ok(())
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        let settings = *self.settings.lock();
        match name {
            "max-size-buffers" => Some((settings.max_buffers as u64).into()),
            "max-size-bytes" => Some((settings.max_bytes as u64).into()),
            "leaky" => Some(settings.leaky.as_str().into()),
            "current-level-buffers" => Some((self.state.lock().buffers as u64).into()),
            "current-level-bytes" => Some((self.state.lock().bytes as u64).into()),
            _ => None,
        }
    }
}

/// Statistics about queue operation.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    /// Current number of buffers in the queue.
    pub current_buffers: usize,
    /// Current total bytes in the queue.
    pub current_bytes: usize,
    /// Total buffers pushed to the queue.
    pub total_pushed: u64,
    /// Total buffers popped from the queue.
    pub total_popped: u64,
    /// Total buffers dropped (due to leaky mode).
    pub total_dropped: u64,
}
