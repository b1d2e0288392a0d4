//! Source base: a streaming task pushing buffers out of one `src` pad.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{
    Element, ElementFlags, ElementImpl, PropertyValue, StateChange, StateChangeResult,
    StateChangeSuccess,
};
use crate::error::{Error, FlowError, Result, StateChangeError};
use crate::event::{Event, Format, SeekEvent, Segment, StreamStartEvent};
use crate::observability;
use crate::pad::{Pad, PadMode, PadTemplate};
use crate::task::{Task, TaskFlow};

/// Result of [`PushSrc::create`]: a buffer, `None` at end of stream, or a
/// flow error.
pub type CreateResult = std::result::Result<Option<Buffer>, FlowError>;

/// Behaviour of a source built on [`SourceElement`].
///
/// Only [`create`](Self::create) is required. Blocking implementations must
/// return from `create` with `Err(FlowError::Flushing)` once
/// [`unlock`](Self::unlock) was called, until [`unlock_stop`](Self::unlock_stop).
#[allow(unused_variables)]
pub trait PushSrc: Send + Sync + 'static {
    /// Caps the source can produce. Also used for the pad template.
    fn caps(&self) -> Caps {
        Caps::new_any()
    }

    /// Caps announced before the first buffer. Defaults to [`caps`](Self::caps)
    /// when they are fixed.
    fn fixed_caps(&self) -> Option<Caps> {
        let caps = self.caps();
        caps.is_fixed().then_some(caps)
    }

    /// Live sources only produce data in PLAYING.
    fn is_live(&self) -> bool {
        false
    }

    /// Format of the segments this source emits.
    fn format(&self) -> Format {
        Format::Time
    }

    /// Called on READY→PAUSED, before the task starts.
    fn start(&self, element: &Element) -> Result<()> {
        Ok(())
    }

    /// Called on PAUSED→READY, after the task stopped.
    fn stop(&self, element: &Element) {}

    /// Produce the next buffer.
    fn create(&self, element: &Element) -> CreateResult;

    /// Produce a range for a pulling peer.
    fn fill(&self, element: &Element, offset: u64, size: u32) -> std::result::Result<Buffer, FlowError> {
        Err(FlowError::Error)
    }

    /// Make a blocking `create` return.
    fn unlock(&self) {}

    /// Clear the effect of [`unlock`](Self::unlock).
    fn unlock_stop(&self) {}

    /// Check if [`do_seek`](Self::do_seek) is supported.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Reposition to the start of `segment`. Called with the stream lock
    /// held and the task paused.
    fn do_seek(&self, segment: &mut Segment) -> bool {
        false
    }

    /// Set an implementation property.
    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        Err(Error::UnknownProperty {
            element: element.name().to_string(),
            property: name.to_string(),
        })
    }

    /// Read an implementation property.
    fn property(&self, name: &str) -> Option<PropertyValue> {
        None
    }
}

#[derive(Debug)]
struct SourceState {
    segment: Segment,
    need_stream_start: bool,
    need_segment: bool,
    produced: u64,
    streams: u32,
}

impl SourceState {
    fn new(format: Format) -> Self {
        Self {
            segment: Segment::new(format),
            need_stream_start: true,
            need_segment: true,
            produced: 0,
            streams: 0,
        }
    }
}

/// Element wrapper driving a [`PushSrc`] from a streaming task.
///
/// Handles stream-start, caps and segment events, end of stream, flow error
/// escalation, the `num-buffers` limit and flushing seeks.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::{DataSrc, SourceElement};
///
/// let src = SourceElement::new("src", DataSrc::from_bytes(b"hello".to_vec()));
/// assert!(src.is_source());
/// src.set_property("num-buffers", 1i64).unwrap();
/// ```
pub struct SourceElement<S: PushSrc> {
    source: S,
    num_buffers: Mutex<Option<u64>>,
    state: Mutex<SourceState>,
    task: Mutex<Option<Task>>,
}

impl<S: PushSrc> SourceElement<S> {
    /// Create a source element named `name`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: &str, source: S) -> Element {
        let format = source.format();
        Element::new(
            name,
            Self {
                source,
                num_buffers: Mutex::new(None),
                state: Mutex::new(SourceState::new(format)),
                task: Mutex::new(None),
            },
        )
    }

    /// The wrapped implementation.
    pub fn inner(&self) -> &S {
        &self.source
    }

    /// Buffers produced since the last READY→PAUSED.
    pub fn produced(&self) -> u64 {
        self.state.lock().produced
    }

    /// Current segment.
    pub fn segment(&self) -> Segment {
        self.state.lock().segment.clone()
    }

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
                    match element.downcast_imp::<SourceElement<S>>() {
                        Some(this) => this.iterate(&element),
                        None => TaskFlow::Stop,
                    }
                })
            })
            .clone();
        task.start().map_err(|err| {
            tracing::error!(element = %element.name(), %err, "could not start source task");
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

    fn join_task(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.join();
        }
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// One task iteration. Runs under the src pad's stream lock.
    fn iterate(&self, element: &Element) -> TaskFlow {
        let Some(pad) = element.static_pad("src") else {
            return TaskFlow::Stop;
        };
        let _stream = pad.stream_lock();
        if pad.is_flushing() {
            return TaskFlow::Pause;
        }
        if let Err(flow) = self.send_stream_headers(element, &pad) {
            return self.stop_streaming(element, &pad, flow);
        }

        let limit = *self.num_buffers.lock();
        let exhausted = limit.is_some_and(|n| self.state.lock().produced >= n);
        let created = if exhausted {
            Ok(None)
        } else {
            self.source.create(element)
        };

        match created {
            Ok(Some(buffer)) => {
                let sequence = {
                    let mut state = self.state.lock();
                    state.produced += 1;
                    state.produced - 1
                };
                observability::trace_buffer_produced(element.name(), buffer.len(), sequence);
                match pad.push(buffer) {
                    Ok(_) => TaskFlow::Continue,
                    Err(flow) => self.stop_streaming(element, &pad, flow),
                }
            }
            Ok(None) => {
                observability::trace_eos(element.name());
                pad.send_event(Event::Eos);
                TaskFlow::Pause
            }
            Err(flow) => self.stop_streaming(element, &pad, flow),
        }
    }

    fn send_stream_headers(&self, element: &Element, pad: &Pad) -> std::result::Result<(), FlowError> {
        let (stream_start, segment) = {
            let mut state = self.state.lock();
            let stream_start = state.need_stream_start.then(|| {
                state.streams += 1;
                format!("{}/{:04}", element.name(), state.streams)
            });
            let segment = state.need_segment.then(|| state.segment.clone());
            state.need_stream_start = false;
            state.need_segment = false;
            (stream_start, segment)
        };

        if let Some(stream_id) = stream_start {
            if !pad.send_event(Event::StreamStart(StreamStartEvent::new(stream_id))) {
                tracing::debug!(pad = %pad.path(), "stream-start refused");
            }
            if let Some(caps) = self.source.fixed_caps() {
                if let Err(err) = pad.set_caps(&caps) {
                    tracing::warn!(pad = %pad.path(), %err, "could not set caps");
                    return Err(FlowError::NotNegotiated);
                }
            }
        }
        if let Some(segment) = segment {
            if !pad.send_event(Event::Segment(segment)) {
                tracing::debug!(pad = %pad.path(), "segment refused");
            }
        }
        Ok(())
    }

    /// Handle a flow error from `create` or `push`; the task pauses.
    fn stop_streaming(&self, element: &Element, pad: &Pad, flow: FlowError) -> TaskFlow {
        observability::trace_flow_error(element.name(), flow);
        match flow {
            FlowError::Eos => {
                pad.send_event(Event::Eos);
            }
            FlowError::Error | FlowError::NotNegotiated => {
                pad.send_event(Event::Eos);
                element.post_error(
                    "internal data stream error",
                    Some(format!("streaming stopped, reason {flow}")),
                );
            }
            FlowError::Flushing | FlowError::NotLinked => {}
        }
        TaskFlow::Pause
    }

    // ========================================================================
    // Seeking
    // ========================================================================

    fn perform_seek(&self, element: &Element, pad: &Pad, seek: &SeekEvent) -> bool {
        if !self.source.is_seekable() {
            tracing::debug!(element = %element.name(), "source is not seekable");
            return false;
        }
        let flush = seek.is_flush();
        if flush {
            pad.send_event(Event::FlushStart);
        }
        self.source.unlock();
        self.pause_task();

        let done = {
            let _stream = pad.stream_lock();
            self.source.unlock_stop();
            let mut segment = seek.apply(&self.state.lock().segment);
            let done = self.source.do_seek(&mut segment);
            if flush {
                pad.send_event(Event::flush_stop());
            }
            if done {
                tracing::debug!(element = %element.name(), start = segment.start, "seek done");
                let mut state = self.state.lock();
                state.segment = segment;
                state.need_segment = true;
            }
            done
        };

        let running = pad.mode() == PadMode::Push
            && match element.current_state() {
                crate::element::State::Playing => true,
                crate::element::State::Paused => !self.source.is_live(),
                _ => false,
            };
        if running && self.start_task(element).is_err() {
            return false;
        }
        done
    }
}

impl<S: PushSrc> Drop for SourceElement<S> {
    fn drop(&mut self) {
        // Let a paused task thread exit; it only holds a weak element handle.
        if let Some(task) = self.task.get_mut().take() {
            task.stop();
        }
    }
}

impl<S: PushSrc> ElementImpl for SourceElement<S> {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![Arc::new(PadTemplate::src(self.source.caps()))]
    }

    fn flags(&self) -> ElementFlags {
        ElementFlags::SOURCE
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::ReadyToPaused => {
                self.source.start(element).map_err(|err| {
                    tracing::warn!(element = %element.name(), %err, "source failed to start");
                    StateChangeError
                })?;
                *self.state.lock() = SourceState::new(self.source.format());
                let pull = element
                    .static_pad("src")
                    .is_some_and(|pad| pad.mode() == PadMode::Pull);
                if pull {
                    return Ok(StateChangeSuccess::Success);
                }
                if self.source.is_live() {
                    return Ok(StateChangeSuccess::NoPreroll);
                }
                self.start_task(element)?;
            }
            StateChange::PausedToPlaying if self.source.is_live() => {
                self.start_task(element)?;
            }
            StateChange::PlayingToPaused if self.source.is_live() => {
                self.pause_task();
                return Ok(StateChangeSuccess::NoPreroll);
            }
            StateChange::PausedToReady => {
                self.join_task();
                self.source.unlock_stop();
                self.source.stop(element);
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn unlock(&self, _element: &Element) {
        self.source.unlock();
    }

    fn src_event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Seek(seek) => self.perform_seek(element, pad, &seek),
            other => pad.event_default(other),
        }
    }

    fn get_range(
        &self,
        element: &Element,
        _pad: &Pad,
        offset: u64,
        size: u32,
    ) -> std::result::Result<Buffer, FlowError> {
        self.source.fill(element, offset, size)
    }

    fn query_caps(&self, _element: &Element, _pad: &Pad, filter: Option<&Caps>) -> Caps {
        let caps = self.source.caps();
        match filter {
            Some(filter) => filter.intersect(&caps),
            None => caps,
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "num-buffers" => {
                let n = value.expect_with(name, "an integer", PropertyValue::as_i64)?;
                *self.num_buffers.lock() = u64::try_from(n).ok();
                Ok(())
            }
            _ => self.source.set_property(element, name, value),
        }
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "num-buffers" => Some(PropertyValue::Integer(
                self.num_buffers.lock().map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX)),
            )),
            _ => self.source.property(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::State;
    use crate::error::FlowSuccess;
    use crate::pad::PadDirection;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    /// Produces `limit` one-byte buffers, then fails with `fail_with`.
    struct Counting {
        next: AtomicU64,
        limit: u64,
        fail_with: Option<FlowError>,
    }

    impl PushSrc for Counting {
        fn create(&self, _element: &Element) -> CreateResult {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            if n < self.limit {
                return Ok(Some(Buffer::from_vec(vec![n as u8])));
            }
            match self.fail_with {
                Some(flow) => Err(flow),
                None => Ok(None),
            }
        }
    }

    fn counting(limit: u64, fail_with: Option<FlowError>) -> Element {
        SourceElement::new(
            "src",
            Counting {
                next: AtomicU64::new(0),
                limit,
                fail_with,
            },
        )
    }

    fn collecting_sink(src: &Element) -> (Pad, Arc<Mutex<Vec<Event>>>, Arc<Mutex<Vec<u8>>>) {
        let sink = Pad::new("sink", PadDirection::Sink);
        let events = Arc::new(Mutex::new(Vec::new()));
        let data = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            sink.set_event_function(move |_pad, event| {
                events.lock().push(event);
                true
            });
        }
        {
            let data = data.clone();
            sink.set_chain_function(move |_pad, buffer| {
                data.lock().extend_from_slice(buffer.data());
                Ok(FlowSuccess::Ok)
            });
        }
        sink.set_active(true);
        src.static_pad("src").unwrap().link(&sink).unwrap();
        (sink, events, data)
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_pushes_headers_buffers_and_eos() {
        let src = counting(3, None);
        let (_sink, events, data) = collecting_sink(&src);
        src.set_state(State::Paused).unwrap();
        assert!(wait_for(|| events.lock().iter().any(|e| matches!(e, Event::Eos))));
        assert_eq!(*data.lock(), vec![0, 1, 2]);
        let names: Vec<String> = events.lock().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["stream-start", "segment", "eos"]);
        src.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_num_buffers_limits_output() {
        let src = counting(100, None);
        src.set_property("num-buffers", 2i64).unwrap();
        assert_eq!(src.property("num-buffers"), Some(PropertyValue::Integer(2)));
        let (_sink, events, data) = collecting_sink(&src);
        src.set_state(State::Paused).unwrap();
        assert!(wait_for(|| events.lock().iter().any(|e| matches!(e, Event::Eos))));
        assert_eq!(data.lock().len(), 2);
        src.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_error_is_posted_after_eos() {
        let pipeline = crate::pipeline::Pipeline::new("p");
        let src = counting(1, Some(FlowError::Error));
        pipeline.add(&src).unwrap();
        let (_sink, events, _data) = collecting_sink(&src);
        src.set_state(State::Paused).unwrap();
        let bus = pipeline.bus().unwrap();
        let error = bus.timed_pop_filtered(
            Some(Duration::from_secs(5)),
            crate::message::MessageType::ERROR,
        );
        assert!(error.is_some());
        assert!(events.lock().iter().any(|e| matches!(e, Event::Eos)));
        src.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_not_linked_pauses_quietly() {
        let src = counting(5, None);
        src.set_state(State::Paused).unwrap();
        let element = src.downcast_imp::<SourceElement<Counting>>().unwrap();
        assert!(wait_for(|| element.produced() == 1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(element.produced(), 1);
        src.set_state(State::Null).unwrap();
    }
}
