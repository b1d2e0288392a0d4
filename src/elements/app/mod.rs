//! Application integration elements.
//!
//! - [`AppSrc`]: Inject buffers from application code
//! - [`AppSink`]: Extract buffers to application code

mod appsink;
mod appsrc;

pub use appsink::{AppSink, AppSinkHandle, AppSinkStats};
pub use appsrc::{AppSrc, AppSrcHandle, AppSrcStats};
