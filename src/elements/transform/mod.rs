//! Pass-through elements.
//!
//! - [`Identity`]: Inspect buffers, inject errors
//! - [`CapsFilter`]: Restrict negotiated formats

mod capsfilter;
mod identity;

pub use capsfilter::CapsFilter;
pub use identity::{BufferCallback, Identity};
