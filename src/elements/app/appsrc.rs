//! AppSrc element for injecting data from application code.
//!
//! Allows applications to push buffers into a pipeline programmatically.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, PropertyValue};
use crate::elements::base::{CreateResult, PushSrc, SourceElement};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result};

/// A source element that allows applications to inject buffers into a pipeline.
///
/// Buffers pushed through an [`AppSrcHandle`] are queued and pushed
/// downstream by the element's streaming task. The queue holds at most
/// `max-buffers` buffers (0 means unbounded); when it is full a push either
/// blocks (`block=true`) or drops the oldest queued buffer.
///
/// The source accepts data between READY→PAUSED and PAUSED→READY; pushing
/// outside that window returns [`FlowError::Flushing`].
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::AppSrc;
///
/// let src = AppSrc::new().with_max_buffers(4).into_element("src");
/// let handle = AppSrc::from_element(&src).unwrap();
/// assert_eq!(handle.queue_len(), 0);
/// ```
pub struct AppSrc {
    inner: Arc<AppSrcInner>,
}

struct AppSrcInner {
    state: Mutex<AppSrcState>,
    /// Signalled when a buffer is queued or the source is woken.
    data_available: Condvar,
    /// Signalled when a buffer leaves the queue.
    space_available: Condvar,
}

struct AppSrcState {
    queue: VecDeque<Buffer>,
    max_buffers: usize,
    block: bool,
    caps: Caps,
    is_live: bool,
    eos: bool,
    flushing: bool,
    total_pushed: u64,
    total_produced: u64,
    dropped: u64,
}

/// Handle for pushing data into an AppSrc.
///
/// This handle can be cloned and sent to other threads.
#[derive(Clone)]
pub struct AppSrcHandle {
    inner: Arc<AppSrcInner>,
}

impl AppSrc {
    /// Create a new AppSrc with default settings.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppSrcInner {
                state: Mutex::new(AppSrcState {
                    queue: VecDeque::new(),
                    max_buffers: 64,
                    block: false,
                    caps: Caps::new_any(),
                    is_live: false,
                    eos: false,
                    flushing: true,
                    total_pushed: 0,
                    total_produced: 0,
                    dropped: 0,
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

    /// Block pushes while the queue is full instead of dropping.
    pub fn blocking(self) -> Self {
        self.inner.state.lock().block = true;
        self
    }

    /// Set the caps of the pushed data.
    pub fn with_caps(self, caps: Caps) -> Self {
        self.inner.state.lock().caps = caps;
        self
    }

    /// Behave as a live source.
    pub fn live(self) -> Self {
        self.inner.state.lock().is_live = true;
        self
    }

    /// Wrap this source in an element.
    pub fn into_element(self, name: &str) -> Element {
        SourceElement::new(name, self)
    }

    /// Get a handle for pushing data into this source.
    pub fn handle(&self) -> AppSrcHandle {
        AppSrcHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Get the push handle of an appsrc element.
    pub fn from_element(element: &Element) -> Option<AppSrcHandle> {
        element
            .downcast_imp::<SourceElement<AppSrc>>()
            .map(|src| src.inner().handle())
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSrcStats {
        self.handle().stats()
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.inner.state.lock();
        state.flushing = flushing;
        if flushing {
            self.inner.data_available.notify_all();
            self.inner.space_available.notify_all();
        }
    }
}

impl Default for AppSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl PushSrc for AppSrc {
    fn caps(&self) -> Caps {
        self.inner.state.lock().caps.clone()
    }

    fn is_live(&self) -> bool {
        self.inner.state.lock().is_live
    }

    fn start(&self, _element: &Element) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.flushing = false;
        state.eos = false;
        Ok(())
    }

    fn stop(&self, _element: &Element) {
        let mut state = self.inner.state.lock();
        state.flushing = true;
        state.queue.clear();
        self.inner.space_available.notify_all();
    }

    fn create(&self, _element: &Element) -> CreateResult {
        let mut state = self.inner.state.lock();

        // Wait for data or EOS
        while state.queue.is_empty() && !state.eos && !state.flushing {
            self.inner.data_available.wait(&mut state);
        }

        if state.flushing {
            return Err(FlowError::Flushing);
        }

        match state.queue.pop_front() {
            Some(buffer) => {
                state.total_produced += 1;
                self.inner.space_available.notify_one();
                Ok(Some(buffer))
            }
            None => Ok(None),
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
            "caps" => state.caps = value.expect_with(name, "caps", PropertyValue::as_caps)?,
            "max-buffers" => {
                let max = value.expect_with(name, "a non-negative integer", PropertyValue::as_u64)?;
                state.max_buffers = usize::try_from(max).unwrap_or(usize::MAX);
                self.inner.space_available.notify_all();
            }
            "block" => state.block = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
            "is-live" => state.is_live = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
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
            "caps" => Some(state.caps.clone().into()),
            "max-buffers" => Some((state.max_buffers as u64).into()),
            "block" => Some(state.block.into()),
            "is-live" => Some(state.is_live.into()),
            _ => None,
        }
    }
}

impl AppSrcHandle {
    /// Push a buffer into the source.
    ///
    /// Returns [`FlowError::Flushing`] while the element is not running and
    /// [`FlowError::Eos`] after [`end_of_stream`](Self::end_of_stream).
    pub fn push_buffer(&self, buffer: Buffer) -> FlowResult {
        self.push_buffer_timeout(buffer, None)
    }

    /// Push a buffer, blocking at most `timeout` for queue space.
    ///
    /// A blocking push that times out drops the buffer and returns `Ok`.
    pub fn push_buffer_timeout(&self, buffer: Buffer, timeout: Option<Duration>) -> FlowResult {
        let mut state = self.inner.state.lock();

        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            let full = state.max_buffers > 0 && state.queue.len() >= state.max_buffers;
            if !full {
                break;
            }
            if !state.block {
                state.queue.pop_front();
                state.dropped += 1;
                tracing::trace!("appsrc queue full, dropped oldest buffer");
                break;
            }
            match timeout {
                Some(timeout) => {
                    if self.inner.space_available.wait_for(&mut state, timeout).timed_out() {
                        state.dropped += 1;
                        return Ok(FlowSuccess::Ok);
                    }
                }
                None => self.inner.space_available.wait(&mut state),
            }
        }

        state.queue.push_back(buffer);
        state.total_pushed += 1;
        self.inner.data_available.notify_one();
        Ok(FlowSuccess::Ok)
    }

    /// Signal end of stream. Queued buffers are still pushed first.
    pub fn end_of_stream(&self) -> FlowResult {
        let mut state = self.inner.state.lock();
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        state.eos = true;
        self.inner.data_available.notify_all();
        Ok(FlowSuccess::Ok)
    }

    /// Get the current queue length.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Check if the queue is full.
    pub fn is_full(&self) -> bool {
        let state = self.inner.state.lock();
        state.max_buffers > 0 && state.queue.len() >= state.max_buffers
    }

    /// Get statistics.
    pub fn stats(&self) -> AppSrcStats {
        let state = self.inner.state.lock();
        AppSrcStats {
            queued_buffers: state.queue.len(),
            total_pushed: state.total_pushed,
            total_produced: state.total_produced,
            dropped: state.dropped,
            eos: state.eos,
        }
    }
}

/// Statistics about AppSrc operation.
#[derive(Debug, Clone, Copy)]
pub struct AppSrcStats {
    /// Number of buffers currently queued.
    pub queued_buffers: usize,
    /// Total buffers pushed by the application.
    pub total_pushed: u64,
    /// Total buffers produced to the pipeline.
    pub total_produced: u64,
    /// Buffers discarded because the queue was full.
    pub dropped: u64,
    /// Whether EOS has been signaled.
    pub eos: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::State;
    use crate::event::Event;
    use crate::pad::{Pad, PadDirection};
    use std::thread;
    use std::time::Instant;

    fn started() -> AppSrc {
        let src = AppSrc::new();
        src.start(&Element::new("dummy", Dummy)).unwrap();
        src
    }

    struct Dummy;
    impl crate::element::ElementImpl for Dummy {}

    fn produce(src: &AppSrc) -> CreateResult {
        src.create(&Element::new("dummy", Dummy))
    }

    #[test]
    fn test_push_before_start_is_flushing() {
        let src = AppSrc::new();
        let result = src.handle().push_buffer(Buffer::from_slice(b"x"));
        assert_eq!(result, Err(FlowError::Flushing));
    }

    #[test]
    fn test_push_produce_in_order() {
        let src = started();
        let handle = src.handle();
        handle.push_buffer(Buffer::from_slice(b"a")).unwrap();
        handle.push_buffer(Buffer::from_slice(b"b")).unwrap();
        assert_eq!(handle.queue_len(), 2);
        assert_eq!(produce(&src).unwrap().unwrap().data(), b"a");
        assert_eq!(produce(&src).unwrap().unwrap().data(), b"b");

        let stats = src.stats();
        assert_eq!(stats.total_pushed, 2);
        assert_eq!(stats.total_produced, 2);
    }

    #[test]
    fn test_eos_drains_queue_first() {
        let src = started();
        let handle = src.handle();
        handle.push_buffer(Buffer::from_slice(b"a")).unwrap();
        handle.end_of_stream().unwrap();
        assert_eq!(handle.push_buffer(Buffer::from_slice(b"b")), Err(FlowError::Eos));
        assert!(produce(&src).unwrap().is_some());
        assert!(produce(&src).unwrap().is_none());
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let src = started().with_max_buffers(2);
        let handle = src.handle();
        for data in [b"a", b"b", b"c"] {
            handle.push_buffer(Buffer::from_slice(data)).unwrap();
        }
        assert_eq!(handle.queue_len(), 2);
        assert_eq!(handle.stats().dropped, 1);
        assert_eq!(produce(&src).unwrap().unwrap().data(), b"b");
    }

    #[test]
    fn test_blocking_push_waits_for_space() {
        let src = started().with_max_buffers(1).blocking();
        let handle = src.handle();
        handle.push_buffer(Buffer::from_slice(b"a")).unwrap();

        let pusher = {
            let handle = handle.clone();
            thread::spawn(move || handle.push_buffer(Buffer::from_slice(b"b")))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(handle.queue_len(), 1);
        assert_eq!(produce(&src).unwrap().unwrap().data(), b"a");
        assert_eq!(pusher.join().unwrap(), Ok(FlowSuccess::Ok));
        assert_eq!(produce(&src).unwrap().unwrap().data(), b"b");
    }

    #[test]
    fn test_unlock_wakes_create() {
        let src = Arc::new(started());
        let waiter = {
            let src = src.clone();
            thread::spawn(move || produce(&src))
        };
        thread::sleep(Duration::from_millis(20));
        src.unlock();
        assert!(matches!(waiter.join().unwrap(), Err(FlowError::Flushing)));
    }

    #[test]
    fn test_element_pushes_downstream() {
        let src = AppSrc::new().into_element("src");
        let sink = Pad::new("sink", PadDirection::Sink);
        let received = Arc::new(Mutex::new(Vec::new()));
        let got_eos = Arc::new(Mutex::new(false));
        {
            let received = received.clone();
            sink.set_chain_function(move |_pad, buffer| {
                received.lock().push(buffer.data().to_vec());
                Ok(FlowSuccess::Ok)
            });
        }
        {
            let got_eos = got_eos.clone();
            sink.set_event_function(move |_pad, event| {
                if matches!(event, Event::Eos) {
                    *got_eos.lock() = true;
                }
                true
            });
        }
        sink.set_active(true);
        src.static_pad("src").unwrap().link(&sink).unwrap();

        src.set_state(State::Paused).unwrap();
        let handle = AppSrc::from_element(&src).unwrap();
        handle.push_buffer(Buffer::from_slice(b"one")).unwrap();
        handle.push_buffer(Buffer::from_slice(b"two")).unwrap();
        handle.end_of_stream().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !*got_eos.lock() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(*got_eos.lock());
        assert_eq!(*received.lock(), vec![b"one".to_vec(), b"two".to_vec()]);

        src.set_state(State::Null).unwrap();
        assert_eq!(handle.push_buffer(Buffer::from_slice(b"late")), Err(FlowError::Flushing));
    }
}
