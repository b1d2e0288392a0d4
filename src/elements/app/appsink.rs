//! AppSink element for extracting data to application code.
//!
//! Allows applications to pull buffers from a pipeline programmatically.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, PropertyValue};
use crate::elements::base::{RenderSink, SinkElement};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result};
use crate::event::Event;

/// A sink element that allows applications to extract buffers from a pipeline.
///
/// Rendered buffers are queued internally and retrieved through an
/// [`AppSinkHandle`]. The queue holds at most `max-buffers` buffers (0 means
/// unbounded); when full, the streaming thread blocks until the application
/// pulls, or the oldest buffer is dropped when `drop=true`.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::AppSink;
/// use std::time::Duration;
///
/// let sink = AppSink::new().into_element("sink");
/// let handle = AppSink::from_element(&sink).unwrap();
/// assert!(handle.try_pull_buffer(Duration::from_millis(1)).is_none());
/// ```
pub struct AppSink {
    inner: Arc<AppSinkInner>,
}

struct AppSinkInner {
    state: Mutex<AppSinkState>,
    data_available: Condvar,
    space_available: Condvar,
}

struct AppSinkState {
    queue: VecDeque<Buffer>,
    preroll: Option<Buffer>,
    max_buffers: usize,
    drop_on_full: bool,
    caps: Caps,
    eos: bool,
    flushing: bool,
    total_received: u64,
    total_pulled: u64,
    total_dropped: u64,
}

/// Handle for pulling data from an AppSink.
///
/// This handle can be cloned and sent to other threads.
#[derive(Clone)]
pub struct AppSinkHandle {
    inner: Arc<AppSinkInner>,
}

impl AppSink {
    /// Create a new AppSink with default settings.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppSinkInner {
                state: Mutex::new(AppSinkState {
                    queue: VecDeque::new(),
                    preroll: None,
                    max_buffers: 0,
                    drop_on_full: false,
                    caps: Caps::new_any(),
                    eos: false,
                    flushing: true,
                    total_received: 0,
                    total_pulled: 0,
                    total_dropped: 0,
                }),
                data_available: Condvar::new(),
                space_available: Condvar::new(),
            }),
        }
    }

    /// Set the queue size. 0 means unbounded.
    pub fn with_max_buffers(self, max_buffers: usize) -> Self {
        self.inner.state.lock().max_buffers = max_buffers;
        self
    }

    /// Set whether to drop the oldest buffer when the queue is full.
    ///
    /// If false (default), the streaming thread blocks when full.
    pub fn drop_on_full(self, drop: bool) -> Self {
        self.inner.state.lock().drop_on_full = drop;
        self
    }

    /// Restrict the accepted caps.
    pub fn with_caps(self, caps: Caps) -> Self {
        self.inner.state.lock().caps = caps;
        self
    }

    /// Wrap this sink in an element.
    pub fn into_element(self, name: &str) -> Element {
        SinkElement::new(name, self)
    }

    /// Get a handle for pulling data from this sink.
    pub fn handle(&self) -> AppSinkHandle {
        AppSinkHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Get the pull handle of an appsink element.
    pub fn from_element(element: &Element) -> Option<AppSinkHandle> {
        element
            .downcast_imp::<SinkElement<AppSink>>()
            .map(|sink| sink.inner().handle())
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.inner.state.lock();
        state.flushing = flushing;
        if flushing {
            self.inner.data_available.notify_all();
            self.inner.space_available.notify_all();
        }
    }

    fn reset(&self, flushing: bool) {
        let mut state = self.inner.state.lock();
        state.queue.clear();
        state.preroll = None;
        state.eos = false;
        state.flushing = flushing;
        self.inner.data_available.notify_all();
        self.inner.space_available.notify_all();
    }
}

impl Default for AppSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for AppSink {
    fn caps(&self) -> Caps {
        self.inner.state.lock().caps.clone()
    }

    fn start(&self, _element: &Element) -> Result<()> {
        self.reset(false);
        Ok(())
    }

    fn stop(&self, _element: &Element) {
        self.reset(true);
    }

    fn preroll(&self, _element: &Element, buffer: &Buffer) -> FlowResult {
        self.inner.state.lock().preroll = Some(buffer.clone());
        self.inner.data_available.notify_all();
        Ok(FlowSuccess::Ok)
    }

    fn render(&self, element: &Element, buffer: &Buffer) -> FlowResult {
        let mut state = self.inner.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            let full = state.max_buffers > 0 && state.queue.len() >= state.max_buffers;
            if !full {
                break;
            }
            if state.drop_on_full {
                state.queue.pop_front();
                state.total_dropped += 1;
                tracing::trace!(element = %element.name(), "queue full, dropped oldest buffer");
                break;
            }
            self.inner.space_available.wait(&mut state);
        }
        state.queue.push_back(buffer.clone());
        state.total_received += 1;
        self.inner.data_available.notify_one();
        Ok(FlowSuccess::Ok)
    }

    fn event(&self, _element: &Element, event: &Event) {
        match event {
            Event::Eos => {
                self.inner.state.lock().eos = true;
                self.inner.data_available.notify_all();
            }
            Event::FlushStop(_) => {
                let mut state = self.inner.state.lock();
                state.queue.clear();
                state.preroll = None;
                state.eos = false;
                self.inner.space_available.notify_all();
            }
            _ => {}
        }
    }

    fn unlock(&self) {
        self.set_flushing(true);
    }

    fn unlock_stop(&self) {
        self.set_flushing(false);
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut state = self.inner.state.lock();
        match name {
            "max-buffers" => {
                let max = value.expect_with(name, "a non-negative integer", PropertyValue::as_u64)?;
                state.max_buffers = usize::try_from(max).unwrap_or(usize::MAX);
                self.inner.space_available.notify_all();
            }
            "drop" => state.drop_on_full = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
            "caps" => state.caps = value.expect_with(name, "caps", PropertyValue::as_caps)?,
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_string(),
                    property: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let state = self.inner.state.lock();
        match name {
            "max-buffers" => Some((state.max_buffers as u64).into()),
            "drop" => Some(state.drop_on_full.into()),
            "caps" => Some(state.caps.clone().into()),
            "eos" => Some((state.eos && state.queue.is_empty()).into()),
            _ => None,
        }
    }
}

impl AppSinkHandle {
    /// Pull a buffer, blocking until one is available.
    ///
    /// Returns `None` at end of stream or when the sink is flushing or
    /// stopped.
    pub fn pull_buffer(&self) -> Option<Buffer> {
        self.pull_until(None)
    }

    /// Pull a buffer, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout, at end of stream, or when flushing.
    pub fn try_pull_buffer(&self, timeout: Duration) -> Option<Buffer> {
        self.pull_until(Some(Instant::now() + timeout))
    }

    fn pull_until(&self, deadline: Option<Instant>) -> Option<Buffer> {
        let mut state = self.wait_for(deadline, |state| {
            !state.queue.is_empty() || state.eos || state.flushing
        })?;
        let buffer = state.queue.pop_front()?;
        state.total_pulled += 1;
        self.inner.space_available.notify_one();
        Some(buffer)
    }

    /// Get the buffer that completed preroll, blocking until there is one.
    ///
    /// Returns `None` at end of stream or when flushing.
    pub fn pull_preroll(&self) -> Option<Buffer> {
        let mut state =
            self.wait_for(None, |state| state.preroll.is_some() || state.eos || state.flushing)?;
        state.preroll.take()
    }

    /// Wait until `ready` holds. `None` on timeout.
    fn wait_for(
        &self,
        deadline: Option<Instant>,
        ready: impl Fn(&AppSinkState) -> bool,
    ) -> Option<MutexGuard<'_, AppSinkState>> {
        let mut state = self.inner.state.lock();
        while !ready(&*state) {
            match deadline {
                Some(deadline) => {
                    if self.inner.data_available.wait_until(&mut state, deadline).timed_out() {
                        return ready(&*state).then_some(state);
                    }
                }
                None => self.inner.data_available.wait(&mut state),
            }
        }
        Some(state)
    }

    /// Get the current queue length.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Check if EOS was received and every buffer was pulled.
    pub fn is_eos(&self) -> bool {
        let state = self.inner.state.lock();
        state.eos && state.queue.is_empty()
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSinkStats {
        let state = self.inner.state.lock();
        AppSinkStats {
            queued_buffers: state.queue.len(),
            total_received: state.total_received,
            total_pulled: state.total_pulled,
            total_dropped: state.total_dropped,
            eos: state.eos,
        }
    }
}

/// Statistics about AppSink operation.
#[derive(Debug, Clone, Copy)]
pub struct AppSinkStats {
    /// Number of buffers currently queued.
    pub queued_buffers: usize,
    /// Total buffers rendered into the queue.
    pub total_received: u64,
    /// Total buffers pulled by the application.
    pub total_pulled: u64,
    /// Buffers discarded because the queue was full.
    pub total_dropped: u64,
    /// Whether EOS has been received.
    pub eos: bool,
}
