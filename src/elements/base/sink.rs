//! Sink base: preroll, clock synchronisation and EOS for one `sink` pad.
//!
//! ```text
//!   READY→PAUSED ── returns ASYNC ──▶ first buffer or EOS ──▶ commit
//!                                         │
//!                                         ▼
//!                     block until PLAYING (or flush / shutdown)
//!                                         │
//!                                         ▼
//!                         wait for the clock (sync) ──▶ render
//! ```

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::{ClockId, ClockReturn};
use crate::element::{
    Element, ElementFlags, ElementImpl, PropertyValue, StateChange, StateChangeResult,
    StateChangeSuccess,
};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result, StateChangeError};
use crate::event::{Event, Segment};
use crate::message::{Message, MessageView};
use crate::observability;
use crate::pad::{Pad, PadMode, PadTemplate};
use crate::task::{Task, TaskFlow};

/// Behaviour of a sink built on [`SinkElement`].
#[allow(unused_variables)]
pub trait RenderSink: Send + Sync + 'static {
    /// Caps the sink accepts. Also used for the pad template.
    fn caps(&self) -> Caps {
        Caps::new_any()
    }

    /// Called on READY→PAUSED.
    fn start(&self, element: &Element) -> Result<()> {
        Ok(())
    }

    /// Called on PAUSED→READY.
    fn stop(&self, element: &Element) {}

    /// New caps arrived. Return false to refuse them.
    fn set_caps(&self, element: &Element, caps: &Caps) -> bool {
        true
    }

    /// The first buffer after READY→PAUSED or a flush.
    fn preroll(&self, element: &Element, buffer: &Buffer) -> FlowResult {
        Ok(FlowSuccess::Ok)
    }

    /// Consume a buffer in PLAYING.
    fn render(&self, element: &Element, buffer: &Buffer) -> FlowResult;

    /// Observe an event after the base handled it.
    fn event(&self, element: &Element, event: &Event) {}

    /// Wake anything blocking inside `render`.
    fn unlock(&self) {}

    /// Clear the effect of [`unlock`](Self::unlock).
    fn unlock_stop(&self) {}

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

/// Sink settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSettings {
    /// Wait for the clock before rendering timestamped buffers.
    pub sync: bool,
    /// Return ASYNC from READY→PAUSED until prerolled.
    pub async_preroll: bool,
    /// Pull data from upstream with a task instead of being pushed to.
    pub pull_mode: bool,
    /// Bytes per pull in pull mode.
    pub blocksize: u32,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            sync: true,
            async_preroll: true,
            pull_mode: false,
            blocksize: 4096,
        }
    }
}

impl SinkSettings {
    /// Enable or disable clock synchronisation.
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Enable or disable asynchronous preroll.
    pub fn with_async(mut self, async_preroll: bool) -> Self {
        self.async_preroll = async_preroll;
        self
    }

    /// Pull `blocksize` bytes at a time from upstream.
    pub fn pulling(mut self, blocksize: u32) -> Self {
        self.pull_mode = true;
        self.blocksize = blocksize;
        self
    }
}

#[derive(Default)]
struct SinkState {
    flushing: bool,
    playing: bool,
    /// A buffer or EOS completed preroll in this PAUSED period.
    prerolled: bool,
    /// READY→PAUSED returned ASYNC and waits for preroll.
    need_commit: bool,
    eos: bool,
    eos_posted: bool,
    segment: Segment,
    clock_id: Option<Arc<ClockId>>,
    rendered: u64,
}

enum Synced {
    Ready,
    /// The wait was cancelled by PLAYING→PAUSED; preroll again.
    Interrupted,
}

/// Element wrapper around a [`RenderSink`].
pub struct SinkElement<R: RenderSink> {
    sink: R,
    settings: Mutex<SinkSettings>,
    state: Mutex<SinkState>,
    cond: Condvar,
    task: Mutex<Option<Task>>,
}

impl<R: RenderSink> SinkElement<R> {
    /// Create a sink element with default settings.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: &str, sink: R) -> Element {
        Self::with_settings(name, sink, SinkSettings::default())
    }

    /// Create a sink element.
    pub fn with_settings(name: &str, sink: R, settings: SinkSettings) -> Element {
        Element::new(
            name,
            Self {
                sink,
                settings: Mutex::new(settings),
                state: Mutex::new(SinkState::default()),
                cond: Condvar::new(),
                task: Mutex::new(None),
            },
        )
    }

    /// The wrapped implementation.
    pub fn inner(&self) -> &R {
        &self.sink
    }

    /// Current settings.
    pub fn settings(&self) -> SinkSettings {
        *self.settings.lock()
    }

    /// Buffers rendered since the last READY→PAUSED.
    pub fn rendered(&self) -> u64 {
        self.state.lock().rendered
    }

    /// Check if EOS arrived in the current stream.
    pub fn is_eos(&self) -> bool {
        self.state.lock().eos
    }

    // ========================================================================
    // Dataflow
    // ========================================================================

    fn handle_buffer(&self, element: &Element, buffer: Buffer) -> FlowResult {
        loop {
            self.wait_preroll(element, &buffer)?;
            match self.wait_clock(element, &buffer)? {
                Synced::Ready => break,
                Synced::Interrupted => continue,
            }
        }
        let _span = observability::span_buffer(element.name(), buffer.len()).entered();
        let result = self.sink.render(element, &buffer);
        let sequence = {
            let mut state = self.state.lock();
            state.rendered += 1;
            state.rendered - 1
        };
        observability::trace_buffer_consumed(element.name(), buffer.len(), sequence);
        result
    }

    /// Preroll if needed and block until PLAYING.
    fn wait_preroll(&self, element: &Element, buffer: &Buffer) -> std::result::Result<(), FlowError> {
        let mut state = self.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
            if state.playing {
                return Ok(());
            }
            if !state.prerolled {
                state.prerolled = true;
                let commit = std::mem::take(&mut state.need_commit);
                drop(state);
                tracing::debug!(element = %element.name(), "prerolled");
                let result = self.sink.preroll(element, buffer);
                if commit {
                    let outcome = match result {
                        Ok(_) => Ok(StateChangeSuccess::Success),
                        Err(_) => Err(StateChangeError),
                    };
                    element.commit_async_state(outcome);
                }
                result?;
                state = self.state.lock();
                continue;
            }
            tracing::trace!(element = %element.name(), "waiting for PLAYING");
            self.cond.wait(&mut state);
        }
    }

    fn wait_clock(&self, element: &Element, buffer: &Buffer) -> std::result::Result<Synced, FlowError> {
        if !self.settings.lock().sync || buffer.pts().is_none() {
            return Ok(Synced::Ready);
        }
        let Some(clock) = element.clock() else {
            return Ok(Synced::Ready);
        };
        let id = {
            let mut state = self.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if !state.playing {
                return Ok(Synced::Interrupted);
            }
            let running = state.segment.to_running_time(buffer.pts());
            if running.is_none() {
                return Ok(Synced::Ready);
            }
            let id = ClockId::new(clock, element.base_time().saturating_add(running));
            state.clock_id = Some(Arc::clone(&id));
            id
        };
        tracing::trace!(element = %element.name(), time = %id.time(), "waiting for clock");
        let ret = id.wait();
        let mut state = self.state.lock();
        state.clock_id = None;
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        Ok(match ret {
            ClockReturn::Unscheduled => Synced::Interrupted,
            ClockReturn::Ok | ClockReturn::Early => Synced::Ready,
        })
    }

    fn handle_eos(&self, element: &Element) {
        let (commit, post) = {
            let mut state = self.state.lock();
            state.eos = true;
            let commit = if state.prerolled {
                false
            } else {
                state.prerolled = true;
                std::mem::take(&mut state.need_commit)
            };
            let post = state.playing && !state.eos_posted;
            state.eos_posted |= post;
            self.cond.notify_all();
            (commit, post)
        };
        if commit {
            element.commit_async_state(Ok(StateChangeSuccess::Success));
        }
        if post {
            self.post_eos(element);
        }
    }

    fn post_eos(&self, element: &Element) {
        observability::trace_eos(element.name());
        element.post_message(Message::eos(element.name()));
    }

    /// Mark flushing and wake every wait of the streaming thread.
    fn set_flushing(&self) {
        {
            let mut state = self.state.lock();
            state.flushing = true;
            if let Some(id) = state.clock_id.take() {
                id.unschedule();
            }
            self.cond.notify_all();
        }
        self.sink.unlock();
    }

    // ========================================================================
    // Pull mode
    // ========================================================================

    fn start_pulling(&self, element: &Element) -> std::result::Result<(), StateChangeError> {
        let Some(pad) = element.static_pad("sink") else {
            return Err(StateChangeError);
        };
        if !pad.activate_mode(PadMode::Pull, true) {
            tracing::warn!(pad = %pad.path(), "upstream cannot be pulled");
            return Err(StateChangeError);
        }
        let weak = element.downgrade();
        let mut offset = 0u64;
        let task = Task::new(format!("{}:sink", element.name()), move || {
            let Some(element) = weak.upgrade() else {
                return TaskFlow::Stop;
            };
            let Some(this) = element.downcast_imp::<SinkElement<R>>() else {
                return TaskFlow::Stop;
            };
            this.pull_once(&element, &mut offset)
        });
        task.start().map_err(|err| {
            tracing::error!(element = %element.name(), %err, "could not start pull task");
            StateChangeError
        })?;
        *self.task.lock() = Some(task);
        Ok(())
    }

    fn pull_once(&self, element: &Element, offset: &mut u64) -> TaskFlow {
        let Some(pad) = element.static_pad("sink") else {
            return TaskFlow::Stop;
        };
        let _stream = pad.stream_lock();
        let blocksize = self.settings.lock().blocksize;
        let result = pad
            .pull_range(*offset, blocksize)
            .and_then(|buffer| {
                *offset += buffer.len() as u64;
                self.handle_buffer(element, buffer)
            });
        match result {
            Ok(_) => TaskFlow::Continue,
            Err(FlowError::Eos) => {
                self.handle_eos(element);
                TaskFlow::Pause
            }
            Err(flow) => {
                observability::trace_flow_error(element.name(), flow);
                if matches!(flow, FlowError::Error | FlowError::NotNegotiated) {
                    element.post_error(
                        "internal data stream error",
                        Some(format!("pulling stopped, reason {flow}")),
                    );
                }
                TaskFlow::Pause
            }
        }
    }
}

impl<R: RenderSink> Drop for SinkElement<R> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.stop();
        }
    }
}

impl<R: RenderSink> ElementImpl for SinkElement<R> {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![Arc::new(PadTemplate::sink(self.sink.caps()))]
    }

    fn flags(&self) -> ElementFlags {
        ElementFlags::SINK
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeResult {
        match transition {
            StateChange::NullToReady => {
                *self.state.lock() = SinkState::default();
            }
            StateChange::ReadyToPaused => {
                self.sink.start(element).map_err(|err| {
                    tracing::warn!(element = %element.name(), %err, "sink failed to start");
                    StateChangeError
                })?;
                let settings = self.settings();
                if settings.pull_mode {
                    self.start_pulling(element)?;
                }
                let mut state = self.state.lock();
                if state.prerolled || !settings.async_preroll {
                    return Ok(StateChangeSuccess::Success);
                }
                state.need_commit = true;
                return Ok(StateChangeSuccess::Async);
            }
            StateChange::PausedToPlaying => {
                let post = {
                    let mut state = self.state.lock();
                    state.playing = true;
                    self.cond.notify_all();
                    let post = state.eos && !state.eos_posted;
                    state.eos_posted |= post;
                    post
                };
                if post {
                    self.post_eos(element);
                }
            }
            StateChange::PlayingToPaused => {
                let mut state = self.state.lock();
                state.playing = false;
                if let Some(id) = state.clock_id.take() {
                    id.unschedule();
                }
            }
            StateChange::PausedToReady => {
                let task = self.task.lock().take();
                if let Some(task) = task {
                    task.join();
                }
                self.sink.unlock_stop();
                self.sink.stop(element);
                *self.state.lock() = SinkState::default();
            }
            StateChange::ReadyToNull => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn unlock(&self, _element: &Element) {
        self.set_flushing();
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.handle_buffer(element, buffer)
    }

    fn sink_event(&self, element: &Element, _pad: &Pad, event: Event) -> bool {
        let handled = match &event {
            Event::FlushStart => {
                self.set_flushing();
                true
            }
            Event::FlushStop(_) => {
                {
                    let mut state = self.state.lock();
                    state.flushing = false;
                    state.eos = false;
                    state.eos_posted = false;
                    state.segment = Segment::default();
                    if !state.playing {
                        state.prerolled = false;
                    }
                }
                self.sink.unlock_stop();
                true
            }
            Event::Eos => {
                self.handle_eos(element);
                true
            }
            Event::Segment(segment) => {
                self.state.lock().segment = segment.clone();
                true
            }
            Event::Caps(caps) => self.sink.set_caps(element, caps),
            Event::StreamStart(_) => {
                element.post_message(Message::new(Some(element.name()), MessageView::StreamStart));
                true
            }
            _ => true,
        };
        if handled {
            self.sink.event(element, &event);
        }
        handled
    }

    fn query_caps(&self, _element: &Element, _pad: &Pad, filter: Option<&Caps>) -> Caps {
        let caps = self.sink.caps();
        match filter {
            Some(filter) => filter.intersect(&caps),
            None => caps,
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock();
        match name {
            "sync" => settings.sync = value.expect_with(name, "a boolean", PropertyValue::as_bool)?,
            "async" => {
                settings.async_preroll = value.expect_with(name, "a boolean", PropertyValue::as_bool)?
            }
            "pull-mode" => {
                settings.pull_mode = value.expect_with(name, "a boolean", PropertyValue::as_bool)?
            }
            "blocksize" => {
                let size = value.expect_with(name, "an integer", PropertyValue::as_u64)?;
                settings.blocksize = u32::try_from(size).map_err(|_| Error::InvalidProperty {
                    property: name.to_string(),
                    reason: format!("{size} is too large"),
                })?;
            }
            _ => {
                drop(settings);
                return self.sink.set_property(element, name, value);
            }
        }
        Ok(())
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        let settings = self.settings();
        match name {
            "sync" => Some(settings.sync.into()),
            "async" => Some(settings.async_preroll.into()),
            "pull-mode" => Some(settings.pull_mode.into()),
            "blocksize" => Some(i64::from(settings.blocksize).into()),
            _ => self.sink.property(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ClockTime, ManualClock};
    use crate::element::State;
    use crate::event::StreamStartEvent;
    use crate::pad::PadDirection;
    use std::thread;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        prerolled: Mutex<Vec<u8>>,
        rendered: Mutex<Vec<u8>>,
    }

    impl RenderSink for Recorder {
        fn preroll(&self, _element: &Element, buffer: &Buffer) -> FlowResult {
            self.prerolled.lock().extend_from_slice(buffer.data());
            Ok(FlowSuccess::Ok)
        }

        fn render(&self, _element: &Element, buffer: &Buffer) -> FlowResult {
            self.rendered.lock().extend_from_slice(buffer.data());
            Ok(FlowSuccess::Ok)
        }
    }

    fn recorder(settings: SinkSettings) -> (Element, Pad) {
        let sink = SinkElement::with_settings("sink", Recorder::default(), settings);
        let src = Pad::new("src", PadDirection::Src);
        src.link(&sink.static_pad("sink").unwrap()).unwrap();
        src.set_active(true);
        (sink, src)
    }

    fn imp(sink: &Element) -> &SinkElement<Recorder> {
        sink.downcast_imp::<SinkElement<Recorder>>().unwrap()
    }

    fn start_stream(src: &Pad) {
        assert!(src.send_event(Event::StreamStart(StreamStartEvent::new("s"))));
        assert!(src.send_event(Event::Segment(Segment::default())));
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_preroll_completes_async_state() {
        let (sink, src) = recorder(SinkSettings::default());
        assert_eq!(sink.set_state(State::Paused), Ok(StateChangeSuccess::Async));
        let (ret, current, pending) = sink.get_state(Some(Duration::from_millis(20)));
        assert_eq!(ret, Ok(StateChangeSuccess::Async));
        assert_eq!((current, pending), (State::Ready, Some(State::Paused)));

        start_stream(&src);
        let pusher = thread::spawn(move || src.push(Buffer::from_slice(&[7])));
        let (ret, current, _) = sink.get_state(Some(Duration::from_secs(5)));
        assert_eq!(ret, Ok(StateChangeSuccess::Success));
        assert_eq!(current, State::Paused);
        assert_eq!(*imp(&sink).inner().prerolled.lock(), vec![7]);
        assert!(imp(&sink).inner().rendered.lock().is_empty());

        sink.set_state(State::Playing).unwrap();
        assert_eq!(pusher.join().unwrap(), Ok(FlowSuccess::Ok));
        assert_eq!(*imp(&sink).inner().rendered.lock(), vec![7]);
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_eos_completes_preroll_and_posts_once_playing() {
        let bin = crate::pipeline::Pipeline::new("p");
        let (sink, src) = recorder(SinkSettings::default());
        bin.add(&sink).unwrap();
        let bus = bin.bus().unwrap();

        assert_eq!(sink.set_state(State::Paused), Ok(StateChangeSuccess::Async));
        start_stream(&src);
        assert!(src.send_event(Event::Eos));
        assert_eq!(sink.get_state(Some(Duration::from_secs(5))).1, State::Paused);
        assert!(bus.pop_filtered(crate::message::MessageType::EOS).is_none());

        sink.set_state(State::Playing).unwrap();
        let eos = bus.timed_pop_filtered(Some(Duration::from_secs(5)), crate::message::MessageType::EOS);
        assert!(eos.is_some());
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_flush_unblocks_preroll_wait() {
        let (sink, src) = recorder(SinkSettings::default());
        sink.set_state(State::Paused).unwrap();
        start_stream(&src);
        let pusher = {
            let src = src.clone();
            thread::spawn(move || src.push(Buffer::from_slice(&[1])))
        };
        assert!(wait_for(|| sink.current_state() == State::Paused));
        thread::sleep(Duration::from_millis(20));
        assert!(src.send_event(Event::FlushStart));
        assert_eq!(pusher.join().unwrap(), Err(FlowError::Flushing));
        assert!(src.send_event(Event::flush_stop()));
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_sync_waits_for_clock() {
        let clock = Arc::new(ManualClock::new());
        let (sink, src) = recorder(SinkSettings::default());
        sink.set_clock(Some(clock.clone() as Arc<dyn Clock>));
        sink.set_base_time(ClockTime::ZERO);
        sink.set_state(State::Paused).unwrap();
        start_stream(&src);

        let mut buffer = Buffer::from_slice(&[9]);
        buffer.set_pts(ClockTime::from_millis(100));
        let pusher = {
            let src = src.clone();
            thread::spawn(move || src.push(buffer))
        };
        assert!(wait_for(|| sink.current_state() == State::Paused));
        sink.set_state(State::Playing).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(imp(&sink).inner().rendered.lock().is_empty());

        clock.set_time(ClockTime::from_millis(100));
        assert_eq!(pusher.join().unwrap(), Ok(FlowSuccess::Ok));
        assert_eq!(*imp(&sink).inner().rendered.lock(), vec![9]);
        sink.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_properties() {
        let (sink, _src) = recorder(SinkSettings::default());
        sink.set_property("sync", false).unwrap();
        sink.set_property("blocksize", 512i64).unwrap();
        assert_eq!(sink.property("sync"), Some(PropertyValue::Bool(false)));
        assert_eq!(imp(&sink).settings().blocksize, 512);
        assert!(sink.set_property("sync", "maybe").is_err());
        assert!(sink.set_property("nope", 1i64).is_err());
    }
}
