//! Built-in pipeline elements.
//!
//! ## Sources
//! - [`DataSrc`]: Emits chunks of an inline payload
//! - [`AppSrc`]: Injects buffers from application code
//!
//! ## Sinks
//! - [`NullSink`]: Discards all buffers (useful for benchmarking)
//! - [`AppSink`]: Extracts buffers to application code
//!
//! ## Transforms
//! - [`Identity`]: Passes buffers unchanged, optionally failing after N
//! - [`CapsFilter`]: Restricts the formats that can be negotiated
//!
//! ## Flow
//! - [`Queue`]: Decouples upstream and downstream threads
//! - [`Tee`]: Duplicates buffers to multiple outputs (1-to-N fanout)
//!
//! Sources and sinks are built on [`SourceElement`] and [`SinkElement`],
//! which carry the streaming task, preroll, clock sync and EOS handling.

mod app;
pub mod base;
mod flow;
mod testing;
mod transform;

use crate::caps::Caps;
use crate::plugin::Registry;

// Base classes
pub use base::{CreateResult, PushSrc, RenderSink, SinkElement, SinkSettings, SourceElement};

// Sources
pub use app::{AppSrc, AppSrcHandle, AppSrcStats};
pub use testing::{DataSrc, DataSrcSettings};

// Sinks
pub use app::{AppSink, AppSinkHandle, AppSinkStats};
pub use testing::NullSink;

// Transforms
pub use transform::{BufferCallback, CapsFilter, Identity};

// Flow
pub use flow::{LeakyMode, Queue, QueueSettings, QueueStats, Tee};

/// Register every built-in element type with `registry`.
pub fn register_builtins(registry: &Registry) {
    let results = [
        registry.register_fn("datasrc", "Emits chunks of an inline payload", |name| {
            SourceElement::new(name, DataSrc::new())
        }),
        registry.register_fn("appsrc", "Injects buffers from the application", |name| {
            AppSrc::new().into_element(name)
        }),
        registry.register_fn("identity", "Passes buffers through unchanged", |name| {
            Identity::new().into_element(name)
        }),
        registry.register_fn("capsfilter", "Restricts the allowed formats", |name| {
            CapsFilter::new(Caps::new_any()).into_element(name)
        }),
        registry.register_fn("queue", "Decouples threads with a bounded buffer", |name| {
            Queue::new().into_element(name)
        }),
        registry.register_fn("tee", "Duplicates buffers to every source pad", |name| {
            Tee::new().into_element(name)
        }),
        registry.register_fn("nullsink", "Discards every buffer", NullSink::element),
        registry.register_fn("appsink", "Hands buffers to the application", |name| {
            AppSink::new().into_element(name)
        }),
    ];
    for err in results.into_iter().filter_map(|r| r.err()) {
        tracing::warn!(%err, "could not register built-in element");
    }
}
