//! Messages posted by elements to the application.
//!
//! Elements post messages on the pipeline's [`Bus`](crate::bus::Bus):
//! end of stream, errors, state changes, clock changes, and custom element
//! messages. Every message records the name of the element that posted it
//! and a process-wide increasing sequence number.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::caps::Structure;
use crate::element::State;

static NEXT_SEQNUM: AtomicU64 = AtomicU64::new(1);

/// Allocate a new sequence number.
pub fn next_seqnum() -> u64 {
    NEXT_SEQNUM.fetch_add(1, Ordering::Relaxed)
}

/// Payload of a [`Message`].
#[derive(Debug, Clone)]
pub enum MessageView {
    /// The stream ended. Posted by sinks; bins aggregate it.
    Eos,
    /// A fatal error.
    Error {
        /// Human-readable description.
        error: String,
        /// Extra debugging detail.
        debug: Option<String>,
    },
    /// A non-fatal problem.
    Warning {
        /// Human-readable description.
        warning: String,
        /// Extra debugging detail.
        debug: Option<String>,
    },
    /// Informational message.
    Info {
        /// Human-readable description.
        info: String,
    },
    /// An element committed a state.
    StateChanged {
        /// State before.
        old: State,
        /// State now.
        current: State,
        /// State still to reach, if any.
        pending: Option<State>,
    },
    /// An element started an asynchronous state change.
    AsyncStart,
    /// An element finished an asynchronous state change.
    AsyncDone,
    /// The pipeline selected a clock.
    NewClock {
        /// Name of the clock.
        clock: String,
    },
    /// A new stream started on a sink.
    StreamStart,
    /// Element-specific message.
    Element(Structure),
}

/// A message with its origin and sequence number.
#[derive(Debug, Clone)]
pub struct Message {
    src: Option<String>,
    seqnum: u64,
    view: MessageView,
}

impl Message {
    /// Create a message from `src`.
    pub fn new(src: Option<&str>, view: MessageView) -> Self {
        Self {
            src: src.map(str::to_string),
            seqnum: next_seqnum(),
            view,
        }
    }

    /// Create an EOS message.
    pub fn eos(src: &str) -> Self {
        Self::new(Some(src), MessageView::Eos)
    }

    /// Create an error message.
    pub fn error(src: &str, error: impl Into<String>) -> Self {
        Self::new(
            Some(src),
            MessageView::Error {
                error: error.into(),
                debug: None,
            },
        )
    }

    /// Create a warning message.
    pub fn warning(src: &str, warning: impl Into<String>) -> Self {
        Self::new(
            Some(src),
            MessageView::Warning {
                warning: warning.into(),
                debug: None,
            },
        )
    }

    /// Create an element message.
    pub fn element(src: &str, structure: Structure) -> Self {
        Self::new(Some(src), MessageView::Element(structure))
    }

    /// Name of the posting element.
    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    /// Sequence number.
    pub fn seqnum(&self) -> u64 {
        self.seqnum
    }

    /// Message payload.
    pub fn view(&self) -> &MessageView {
        &self.view
    }

    /// Type mask bit of this message.
    pub fn message_type(&self) -> MessageType {
        match self.view {
            MessageView::Eos => MessageType::EOS,
            MessageView::Error { .. } => MessageType::ERROR,
            MessageView::Warning { .. } => MessageType::WARNING,
            MessageView::Info { .. } => MessageType::INFO,
            MessageView::StateChanged { .. } => MessageType::STATE_CHANGED,
            MessageView::AsyncStart => MessageType::ASYNC_START,
            MessageView::AsyncDone => MessageType::ASYNC_DONE,
            MessageView::NewClock { .. } => MessageType::NEW_CLOCK,
            MessageView::StreamStart => MessageType::STREAM_START,
            MessageView::Element(_) => MessageType::ELEMENT,
        }
    }

    /// Check the message type against a mask.
    pub fn matches(&self, mask: MessageType) -> bool {
        mask.intersects(self.message_type())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let src = self.src.as_deref().unwrap_or("?");
        match &self.view {
            MessageView::Eos => write!(f, "[{src}] eos"),
            MessageView::Error { error, .. } => write!(f, "[{src}] error: {error}"),
            MessageView::Warning { warning, .. } => write!(f, "[{src}] warning: {warning}"),
            MessageView::Info { info } => write!(f, "[{src}] info: {info}"),
            MessageView::StateChanged { old, current, .. } => {
                write!(f, "[{src}] state-changed {old} -> {current}")
            }
            MessageView::AsyncStart => write!(f, "[{src}] async-start"),
            MessageView::AsyncDone => write!(f, "[{src}] async-done"),
            MessageView::NewClock { clock } => write!(f, "[{src}] new-clock {clock}"),
            MessageView::StreamStart => write!(f, "[{src}] stream-start"),
            MessageView::Element(s) => write!(f, "[{src}] element {s}"),
        }
    }
}

/// Bit mask of message types, for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageType(u32);

impl MessageType {
    /// No type.
    pub const NONE: Self = Self(0);
    /// End of stream.
    pub const EOS: Self = Self(1 << 0);
    /// Error.
    pub const ERROR: Self = Self(1 << 1);
    /// Warning.
    pub const WARNING: Self = Self(1 << 2);
    /// Info.
    pub const INFO: Self = Self(1 << 3);
    /// State changed.
    pub const STATE_CHANGED: Self = Self(1 << 4);
    /// Async start.
    pub const ASYNC_START: Self = Self(1 << 5);
    /// Async done.
    pub const ASYNC_DONE: Self = Self(1 << 6);
    /// New clock.
    pub const NEW_CLOCK: Self = Self(1 << 7);
    /// Stream start.
    pub const STREAM_START: Self = Self(1 << 8);
    /// Element message.
    pub const ELEMENT: Self = Self(1 << 9);
    /// Every type.
    pub const ANY: Self = Self(u32::MAX);

    /// Check if any bit is shared.
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Union of masks.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for MessageType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seqnums_increase() {
        let a = Message::eos("sink");
        let b = Message::eos("sink");
        assert!(b.seqnum() > a.seqnum());
    }

    #[test]
    fn test_mask_matching() {
        let msg = Message::error("src", "boom");
        assert!(msg.matches(MessageType::ERROR | MessageType::EOS));
        assert!(!msg.matches(MessageType::EOS));
        assert!(msg.matches(MessageType::ANY));
        assert_eq!(msg.src(), Some("src"));
        assert_eq!(msg.to_string(), "[src] error: boom");
    }
}
