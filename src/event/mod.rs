//! Events that travel along pad links.
//!
//! Events carry control information next to buffers:
//!
//! - **Downstream events** flow with data (stream-start, caps, segment, EOS, gap)
//! - **Upstream events** flow against data (seek, reconfigure)
//! - **Both**: flush-start and flush-stop, custom events as configured
//!
//! # Serialization
//!
//! Serialized events are delivered in order with buffers, under the sink
//! pad's stream lock. Flush-start is not serialized: it must reach blocked
//! streaming threads immediately.
//!
//! # Sticky events
//!
//! Stream-start, caps and segment are sticky: a pad stores the latest one of
//! each kind and replays them to a new peer when it is linked.
//!
//! # Example
//!
//! ```rust
//! use mediaflow::event::{Event, SeekEvent};
//! use mediaflow::clock::ClockTime;
//!
//! let seek = Event::Seek(SeekEvent::new_time(ClockTime::from_secs(10)));
//! assert!(seek.is_upstream());
//! assert!(!seek.is_sticky());
//! assert!(Event::Eos.is_serialized());
//! ```

use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;

// ============================================================================
// Event Enum
// ============================================================================

/// An event travelling along a link, in or against the data direction.
#[derive(Debug, Clone)]
pub enum Event {
    // ========== Both directions ==========
    /// Start flushing: discard data, unblock waits, refuse new data.
    FlushStart,

    /// Stop flushing and accept data again.
    FlushStop(FlushStopEvent),

    // ========== Downstream Events ==========
    /// Announces a new stream on the pad.
    StreamStart(StreamStartEvent),

    /// The format of the following buffers.
    Caps(Caps),

    /// Timeline of the following buffers.
    Segment(Segment),

    /// No data for a period of time.
    Gap(GapEvent),

    /// End of stream: no more data will follow.
    Eos,

    // ========== Upstream Events ==========
    /// Request to jump to a new position.
    Seek(SeekEvent),

    /// Request upstream to renegotiate.
    Reconfigure,

    /// Application-defined event.
    Custom(CustomEvent),
}

/// Direction an event travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventDirection {
    /// From sources towards sinks.
    Downstream,
    /// From sinks towards sources.
    Upstream,
    /// Either way.
    Both,
}

/// The sticky event slots a pad keeps, in replay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StickyKind {
    /// Stream-start slot.
    StreamStart,
    /// Caps slot.
    Caps,
    /// Segment slot.
    Segment,
}

impl Event {
    /// Direction this event travels in.
    pub fn direction(&self) -> EventDirection {
        match self {
            Event::FlushStart | Event::FlushStop(_) => EventDirection::Both,
            Event::StreamStart(_)
            | Event::Caps(_)
            | Event::Segment(_)
            | Event::Gap(_)
            | Event::Eos => EventDirection::Downstream,
            Event::Seek(_) | Event::Reconfigure => EventDirection::Upstream,
            Event::Custom(c) => c.direction,
        }
    }

    /// Check if this event may travel downstream.
    pub fn is_downstream(&self) -> bool {
        matches!(
            self.direction(),
            EventDirection::Downstream | EventDirection::Both
        )
    }

    /// Check if this event may travel upstream.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self.direction(),
            EventDirection::Upstream | EventDirection::Both
        )
    }

    /// Check if this event is ordered with buffers.
    pub fn is_serialized(&self) -> bool {
        match self {
            Event::FlushStart | Event::Seek(_) | Event::Reconfigure => false,
            Event::Custom(c) => c.serialized,
            _ => true,
        }
    }

    /// Check if pads store this event for replay.
    pub fn is_sticky(&self) -> bool {
        self.sticky_kind().is_some()
    }

    /// Sticky slot this event occupies.
    pub fn sticky_kind(&self) -> Option<StickyKind> {
        match self {
            Event::StreamStart(_) => Some(StickyKind::StreamStart),
            Event::Caps(_) => Some(StickyKind::Caps),
            Event::Segment(_) => Some(StickyKind::Segment),
            _ => None,
        }
    }

    /// Short lowercase name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Event::FlushStart => "flush-start",
            Event::FlushStop(_) => "flush-stop",
            Event::StreamStart(_) => "stream-start",
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Gap(_) => "gap",
            Event::Eos => "eos",
            Event::Seek(_) => "seek",
            Event::Reconfigure => "reconfigure",
            Event::Custom(c) => c.structure.name(),
        }
    }

    /// Flush-stop that resets running time.
    pub fn flush_stop() -> Self {
        Event::FlushStop(FlushStopEvent { reset_time: true })
    }
}

// ============================================================================
// Flush Stop
// ============================================================================

/// Flush-stop event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStopEvent {
    /// Whether running time restarts from zero.
    pub reset_time: bool,
}

// ============================================================================
// Stream Start Event
// ============================================================================

/// First event of every stream.
#[derive(Debug, Clone)]
pub struct StreamStartEvent {
    /// Identifier unique within the pipeline.
    pub stream_id: String,
    /// Stream flags.
    pub flags: StreamFlags,
    /// Group of streams that belong together.
    pub group_id: Option<u32>,
}

impl StreamStartEvent {
    /// Stream start with the given id and no flags.
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            flags: StreamFlags::NONE,
            group_id: None,
        }
    }

    /// Set flags.
    pub fn with_flags(mut self, flags: StreamFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Stream properties carried by stream-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamFlags(u32);

impl StreamFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);
    /// Data arrives irregularly, like subtitles.
    pub const SPARSE: Self = Self(1 << 0);
    /// Preferred stream of its kind.
    pub const SELECT: Self = Self(1 << 1);

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// ============================================================================
// Segment
// ============================================================================

/// Format of segment and seek positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Running time in nanoseconds.
    #[default]
    Time,
    /// Byte offsets.
    Bytes,
    /// Element-specific units (e.g. buffer count).
    Default,
}

/// A playback segment: the part of the stream being played and how its
/// timestamps map to running time.
///
/// Positions are in units of [`format`](Self::format); `None` means unset.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position format.
    pub format: Format,
    /// Speed factor, 1.0 for normal playback.
    pub rate: f64,
    /// First position in the segment.
    pub start: u64,
    /// Last position, if bounded.
    pub stop: Option<u64>,
    /// Stream time corresponding to `start`.
    pub time: u64,
    /// Last known position.
    pub position: u64,
    /// Running time accumulated by previous segments.
    pub base: u64,
}

impl Segment {
    /// Create an open-ended segment starting at zero.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            rate: 1.0,
            start: 0,
            stop: None,
            time: 0,
            position: 0,
            base: 0,
        }
    }

    /// Create a time segment.
    pub fn new_time(start: ClockTime, stop: Option<ClockTime>) -> Self {
        Self {
            start: start.nanos(),
            stop: stop.map(ClockTime::nanos),
            time: start.nanos(),
            position: start.nanos(),
            ..Self::new(Format::Time)
        }
    }

    /// Set the playback rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Convert a position in this segment to running time.
    ///
    /// Returns `NONE` for positions outside the segment.
    pub fn to_running_time(&self, position: ClockTime) -> ClockTime {
        if self.format != Format::Time || position.is_none() {
            return ClockTime::NONE;
        }
        let pos = position.nanos();
        if pos < self.start || self.stop.is_some_and(|stop| pos > stop) {
            return ClockTime::NONE;
        }
        let offset = (pos - self.start) as f64 / self.rate.abs().max(f64::MIN_POSITIVE);
        ClockTime::from_nanos(self.base.saturating_add(offset as u64))
    }

    /// Check if a position falls inside the segment.
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && self.stop.is_none_or(|stop| position <= stop)
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Format::Time)
    }
}

// ============================================================================
// Gap Event
// ============================================================================

/// Gap event - no data for a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapEvent {
    /// Start of the gap.
    pub timestamp: ClockTime,
    /// Length of the gap.
    pub duration: ClockTime,
}

// ============================================================================
// Seek Event
// ============================================================================

/// Upstream request to continue from another position.
///
/// Sent upstream; sources perform the seek.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    /// Seek rate (1.0 = normal, 2.0 = 2x speed).
    pub rate: f64,
    /// Unit of `start` and `stop`.
    pub format: Format,
    /// Seek flags.
    pub flags: SeekFlags,
    /// How to interpret `start`.
    pub start_type: SeekType,
    /// Start position.
    pub start: u64,
    /// How to interpret `stop`.
    pub stop_type: SeekType,
    /// Stop position.
    pub stop: u64,
}

impl SeekEvent {
    /// Create a flushing seek to an absolute time.
    pub fn new_time(position: ClockTime) -> Self {
        Self::new(Format::Time, SeekFlags::FLUSH, position.nanos())
    }

    /// Create a seek to an absolute position.
    pub fn new(format: Format, flags: SeekFlags, position: u64) -> Self {
        Self {
            rate: 1.0,
            format,
            flags,
            start_type: SeekType::Set,
            start: position,
            stop_type: SeekType::None,
            stop: 0,
        }
    }

    /// Set the seek rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Set an absolute stop position.
    pub fn with_stop(mut self, stop: u64) -> Self {
        self.stop_type = SeekType::Set;
        self.stop = stop;
        self
    }

    /// Check if the seek flushes the pipeline.
    pub fn is_flush(&self) -> bool {
        self.flags.contains(SeekFlags::FLUSH)
    }

    /// Apply this seek to a segment, returning the new segment.
    pub fn apply(&self, current: &Segment) -> Segment {
        let mut seg = current.clone();
        seg.format = self.format;
        seg.rate = self.rate;
        match self.start_type {
            SeekType::Set => seg.start = self.start,
            SeekType::End => {
                if let Some(stop) = current.stop {
                    seg.start = stop.saturating_sub(self.start);
                }
            }
            SeekType::None => {}
        }
        match self.stop_type {
            SeekType::Set => seg.stop = Some(self.stop),
            SeekType::End => seg.stop = current.stop.map(|s| s.saturating_sub(self.stop)),
            SeekType::None => {}
        }
        seg.time = seg.start;
        seg.position = seg.start;
        if self.is_flush() {
            seg.base = 0;
        }
        seg
    }
}

/// How a seek position is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekType {
    /// Keep the current value.
    #[default]
    None,
    /// Absolute position.
    Set,
    /// Relative to the end of the stream.
    End,
}

/// Seek behaviour bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekFlags(u32);

impl SeekFlags {
    /// No special flags.
    pub const NONE: Self = Self(0);
    /// Drop in-flight data with a flush-start/flush-stop pair.
    pub const FLUSH: Self = Self(1 << 0);
    /// Land exactly on the requested position.
    pub const ACCURATE: Self = Self(1 << 1);
    /// Land on the closest keyframe.
    pub const KEY_UNIT: Self = Self(1 << 2);

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Union of flags.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// ============================================================================
// Custom Event
// ============================================================================

/// Application-defined event.
#[derive(Debug, Clone)]
pub struct CustomEvent {
    /// Event payload; its name is the event name.
    pub structure: Structure,
    /// Direction the event travels in.
    pub direction: EventDirection,
    /// Whether it is ordered with buffers.
    pub serialized: bool,
}

impl CustomEvent {
    /// Create a serialized downstream custom event.
    pub fn downstream(structure: Structure) -> Self {
        Self {
            structure,
            direction: EventDirection::Downstream,
            serialized: true,
        }
    }

    /// Create a non-serialized upstream custom event.
    pub fn upstream(structure: Structure) -> Self {
        Self {
            structure,
            direction: EventDirection::Upstream,
            serialized: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_directions() {
        assert!(Event::Eos.is_downstream());
        assert!(!Event::Eos.is_upstream());
        assert!(Event::FlushStart.is_downstream() && Event::FlushStart.is_upstream());
        assert!(Event::Reconfigure.is_upstream());
        let custom = Event::Custom(CustomEvent::upstream(Structure::new("ping")));
        assert!(custom.is_upstream() && !custom.is_downstream());
        assert_eq!(custom.name(), "ping");
    }

    #[test]
    fn test_serialization_flags() {
        assert!(!Event::FlushStart.is_serialized());
        assert!(Event::flush_stop().is_serialized());
        assert!(Event::Segment(Segment::default()).is_serialized());
    }

    #[test]
    fn test_sticky_kinds_order() {
        assert_eq!(
            Event::StreamStart(StreamStartEvent::new("s")).sticky_kind(),
            Some(StickyKind::StreamStart)
        );
        assert!(StickyKind::StreamStart < StickyKind::Caps);
        assert!(StickyKind::Caps < StickyKind::Segment);
        assert!(!Event::Eos.is_sticky());
    }

    #[test]
    fn test_segment_running_time() {
        let seg = Segment::new_time(ClockTime::from_secs(10), None);
        assert_eq!(seg.to_running_time(ClockTime::from_secs(12)), ClockTime::from_secs(2));
        assert!(seg.to_running_time(ClockTime::from_secs(5)).is_none());

        let fast = seg.clone().with_rate(2.0);
        assert_eq!(fast.to_running_time(ClockTime::from_secs(12)), ClockTime::from_secs(1));
    }

    #[test]
    fn test_seek_apply() {
        let seg = Segment::new_time(ClockTime::ZERO, Some(ClockTime::from_secs(60)));
        let seek = SeekEvent::new_time(ClockTime::from_secs(30));
        let new = seek.apply(&seg);
        assert_eq!(new.start, ClockTime::from_secs(30).nanos());
        assert_eq!(new.stop, Some(ClockTime::from_secs(60).nanos()));
        assert_eq!(new.position, new.start);
        assert!(seek.is_flush());
    }
}
