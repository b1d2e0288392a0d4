//! NullSink: discards everything it receives.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::element::Element;
use crate::elements::base::{RenderSink, SinkElement, SinkSettings};
use crate::error::{FlowResult, FlowSuccess};

type Handoff = Box<dyn Fn(&Buffer) + Send + Sync>;

/// A sink that discards all buffers.
///
/// This is useful for:
/// - Benchmarking pipeline throughput
/// - Testing source elements
/// - Draining a pipeline without side effects
///
/// Unlike most sinks it does not synchronise to the clock unless the `sync`
/// property is set.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::NullSink;
///
/// let sink = NullSink::element("sink");
/// assert_eq!(sink.property("sync").and_then(|v| v.as_bool()), Some(false));
/// ```
#[derive(Default)]
pub struct NullSink {
    count: AtomicU64,
    bytes: AtomicU64,
    handoff: Mutex<Option<Handoff>>,
}

impl NullSink {
    /// Create a new NullSink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` with every rendered buffer.
    pub fn with_handoff<F>(self, f: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        *self.handoff.lock() = Some(Box::new(f));
        self
    }

    /// Wrap in a sink element with clock synchronisation off.
    pub fn element(name: &str) -> Element {
        Self::new().into_element(name)
    }

    /// Wrap this sink in an element.
    pub fn into_element(self, name: &str) -> Element {
        SinkElement::with_settings(name, self, SinkSettings::default().with_sync(false))
    }

    /// Get the number of buffers consumed.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the number of bytes consumed.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl RenderSink for NullSink {
    fn render(&self, _element: &Element, buffer: &Buffer) -> FlowResult {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        if let Some(handoff) = self.handoff.lock().as_ref() {
            handoff(buffer);
        }
        Ok(FlowSuccess::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::State;
    use crate::pad::{Pad, PadDirection};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_counts_rendered_buffers() {
        let seen = Arc::new(AtomicU64::new(0));
        let handoff = {
            let seen = seen.clone();
            move |_: &Buffer| {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        };
        let sink = NullSink::new().with_handoff(handoff).into_element("sink");
        let src = Pad::new("src", PadDirection::Src);
        src.set_active(true);
        src.link(&sink.static_pad("sink").unwrap()).unwrap();

        sink.set_state(State::Playing).unwrap();
        for i in 0..3u8 {
            src.push(Buffer::from_vec(vec![i; 4])).unwrap();
        }
        let imp = sink.downcast_imp::<SinkElement<NullSink>>().unwrap();
        assert_eq!(imp.inner().count(), 3);
        assert_eq!(imp.inner().bytes(), 12);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let (result, current, _) = sink.get_state(Some(Duration::from_secs(1)));
        assert!(result.is_ok());
        assert_eq!(current, State::Playing);
        sink.set_state(State::Null).unwrap();
    }
}
