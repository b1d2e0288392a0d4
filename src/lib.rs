//! # Mediaflow
//!
//! A multimedia dataflow core: elements with typed pads exchange
//! reference-counted buffers and ordered events, negotiate formats through
//! caps, and move together through the NULL, READY, PAUSED and PLAYING
//! states under the control of a pipeline.
//!
//! ## Features
//!
//! - **Caps negotiation**: Structured format descriptions with ranges,
//!   lists and fractions, intersected along links
//! - **State machine**: Asynchronous preroll, live sources and lost-state
//!   recovery handled by bins
//! - **Streaming tasks**: Sources and queues run their own threads; every
//!   other element runs on the thread that pushes into it
//! - **Bus**: Messages from any thread, consumed synchronously or as an
//!   async stream
//! - **Launch syntax**: `datasrc ! queue ! nullsink` descriptions are built
//!   from the element registry
//!
//! ## Quick Start
//!
//! ```rust
//! use mediaflow::prelude::*;
//! use std::time::Duration;
//!
//! let pipeline = parse_launch("datasrc num-buffers=4 ! queue ! nullsink").unwrap();
//! pipeline.set_state(State::Playing).unwrap();
//!
//! let bus = pipeline.bus().unwrap();
//! let msg = bus
//!     .timed_pop_filtered(Some(Duration::from_secs(5)), MessageType::EOS | MessageType::ERROR)
//!     .unwrap();
//! assert_eq!(msg.message_type(), MessageType::EOS);
//! pipeline.set_state(State::Null).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bin;
pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod message;
pub mod metadata;
pub mod observability;
pub mod pad;
pub mod pipeline;
pub mod plugin;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bin::Bin;
    pub use crate::buffer::Buffer;
    pub use crate::bus::Bus;
    pub use crate::caps::{Caps, Structure};
    pub use crate::clock::{Clock, ClockTime, SystemClock};
    pub use crate::element::{
        Element, ElementImpl, PropertyValue, State, StateChange, StateChangeResult,
        StateChangeSuccess,
    };
    pub use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result};
    pub use crate::event::{Event, Format, SeekEvent, SeekFlags, Segment};
    pub use crate::message::{Message, MessageType, MessageView};
    pub use crate::metadata::Metadata;
    pub use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};
    pub use crate::pipeline::{Pipeline, parse_launch};
    pub use crate::plugin::Registry;
}

pub use error::{Error, Result};
