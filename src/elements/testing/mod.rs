//! Test and utility source/sink elements.
//!
//! - [`DataSrc`]: Generates buffers from inline data
//! - [`NullSink`]: Discards everything, for testing and benchmarking

mod datasrc;
mod null;

pub use datasrc::{DataSrc, DataSrcSettings};
pub use null::NullSink;
