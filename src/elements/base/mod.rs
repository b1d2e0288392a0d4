//! Shared source and sink behaviour.
//!
//! Most sources only know how to make the next buffer and most sinks only
//! know how to consume one. [`SourceElement`] and [`SinkElement`] wrap such
//! an implementation and add everything else: streaming task, stream
//! events, preroll, clock sync, EOS, flushing and seeking.

mod sink;
mod src;

pub use sink::{RenderSink, SinkElement, SinkSettings};
pub use src::{CreateResult, PushSrc, SourceElement};
