//! Flow control and routing elements.
//!
//! ## Buffering
//! - [`Queue`]: Thread boundary with a bounded buffer
//!
//! ## Routing
//! - [`Tee`]: 1-to-N fanout (duplicates buffers)

mod queue;
mod tee;

pub use queue::{LeakyMode, Queue, QueueSettings, QueueStats};
pub use tee::Tee;
