//! Tee element - duplicates buffers to multiple outputs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, PropertyValue};
use crate::error::{Error, FlowError, FlowResult, FlowSuccess, Result};
use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};

/// An element that pushes every buffer to all of its source pads.
///
/// Source pads are requested from the `src_%u` template. A new pad receives
/// the stream's sticky events, so a branch added while data flows starts
/// with the current stream, caps and segment.
///
/// A push succeeds if any branch accepted the buffer. `NotLinked` is only
/// returned when every branch is unlinked, and not even then with
/// `allow-not-linked=true`. Fatal errors of any branch are returned at once.
///
/// # Example
///
/// ```rust
/// use mediaflow::elements::Tee;
///
/// let tee = Tee::new().into_element("tee");
/// let a = tee.request_pad("src_%u").unwrap();
/// let b = tee.request_pad("src_%u").unwrap();
/// assert_eq!((a.name(), b.name()), ("src_0", "src_1"));
/// ```
pub struct Tee {
    allow_not_linked: AtomicBool,
    /// Number of buffers that have passed through.
    count: AtomicU64,
    /// Total bytes that have passed through.
    bytes: AtomicU64,
}

impl Tee {
    /// Create a new Tee element.
    pub fn new() -> Self {
        Self {
            allow_not_linked: AtomicBool::new(false),
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Wrap this tee in an element.
    pub fn into_element(self, name: &str) -> Element {
        Element::new(name, self)
    }

    /// Get the number of buffers that have passed through.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the total bytes that have passed through.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn combine(&self, results: impl IntoIterator<Item = FlowResult>) -> FlowResult {
        let mut accepted = false;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(_) => accepted = true,
                Err(fatal @ (FlowError::Error | FlowError::NotNegotiated)) => return Err(fatal),
                Err(FlowError::NotLinked) => {}
                Err(other) => {
                    first_error.get_or_insert(other);
                }
            }
        }
        if accepted {
            return Ok(FlowSuccess::Ok);
        }
        match first_error {
            Some(err) => Err(err),
            None if self.allow_not_linked.load(Ordering::Relaxed) => Ok(FlowSuccess::Ok),
            None => Err(FlowError::NotLinked),
        }
    }
}

impl Default for Tee {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementImpl for Tee {
    fn pad_templates(&self) -> Vec<Arc<PadTemplate>> {
        vec![
            Arc::new(PadTemplate::sink(Caps::new_any())),
            Arc::new(PadTemplate::new(
                "src_%u",
                PadDirection::Src,
                PadPresence::Request,
                Caps::new_any(),
            )),
        ]
    }

    fn request_new_pad(
        &self,
        element: &Element,
        template: &Arc<PadTemplate>,
        name: Option<&str>,
    ) -> Option<Pad> {
        let name = match name {
            Some(name) => name.to_string(),
            None => element.next_pad_name(template),
        };
        let pad = Pad::from_template(template, name);
        if let Err(err) = element.add_pad(pad.clone()) {
            tracing::debug!(element = %element.name(), %err, "could not add request pad");
            return None;
        }
        let sticky = element
            .static_pad("sink")
            .map(|sink| sink.sticky_events())
            .unwrap_or_default();
        for event in sticky {
            pad.send_event(event);
        }
        Some(pad)
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        let results = element
            .src_pads()
            .into_iter()
            .map(|pad| pad.push(buffer.clone()));
        self.combine(results)
    }

    fn query_caps(&self, _element: &Element, pad: &Pad, filter: Option<&Caps>) -> Caps {
        pad.proxy_query_caps(filter)
    }

    fn set_property(&self, element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "allow-not-linked" => {
                let allow = value.expect_with(name, "a boolean", PropertyValue::as_bool)?;
                self.allow_not_linked.store(allow, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(Error::UnknownProperty {
                element: element.name().to_string(),
                property: name.to_string(),
            }),
        }
    }

    fn property(&self, element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "allow-not-linked" => Some(self.allow_not_linked.load(Ordering::Relaxed).into()),
            "num-src-pads" => Some((element.src_pads().len() as u64).into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, StreamStartEvent};
    use parking_lot::Mutex;

    fn branch(tee: &Element, result: FlowResult) -> (Pad, Arc<Mutex<usize>>) {
        let src = tee.request_pad("src_%u").unwrap();
        let sink = Pad::new("sink", PadDirection::Sink);
        let count = Arc::new(Mutex::new(0));
        {
            let count = count.clone();
            sink.set_chain_function(move |_pad, _buffer| {
                *count.lock() += 1;
                result
            });
        }
        src.link(&sink).unwrap();
        src.set_active(true);
        sink.set_active(true);
        (sink, count)
    }

    fn upstream(tee: &Element) -> Pad {
        let up = Pad::new("up", PadDirection::Src);
        up.link(&tee.static_pad("sink").unwrap()).unwrap();
        up.set_active(true);
        tee.static_pad("sink").unwrap().set_active(true);
        up
    }

    #[test]
    fn test_every_branch_gets_the_buffer() {
        let tee = Tee::new().into_element("tee");
        let up = upstream(&tee);
        let (_a, count_a) = branch(&tee, Ok(FlowSuccess::Ok));
        let (_b, count_b) = branch(&tee, Ok(FlowSuccess::Ok));
        up.push(Buffer::from_slice(b"x")).unwrap();
        assert_eq!((*count_a.lock(), *count_b.lock()), (1, 1));
        assert_eq!(tee.downcast_imp::<Tee>().unwrap().count(), 1);
    }

    #[test]
    fn test_one_unlinked_branch_is_ignored() {
        let tee = Tee::new().into_element("tee");
        let up = upstream(&tee);
        let (_a, count) = branch(&tee, Ok(FlowSuccess::Ok));
        let unlinked = tee.request_pad("src_%u").unwrap();
        unlinked.set_active(true);
        assert!(up.push(Buffer::from_slice(b"x")).is_ok());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_all_unlinked() {
        let tee = Tee::new().into_element("tee");
        let up = upstream(&tee);
        let pad = tee.request_pad("src_%u").unwrap();
        pad.set_active(true);
        assert_eq!(up.push(Buffer::from_slice(b"x")), Err(FlowError::NotLinked));
        tee.set_property("allow-not-linked", true).unwrap();
        assert!(up.push(Buffer::from_slice(b"x")).is_ok());
    }

    #[test]
    fn test_combine_results() {
        let tee = Tee::new();
        assert_eq!(
            tee.combine([Err(FlowError::Eos), Ok(FlowSuccess::Ok)]),
            Ok(FlowSuccess::Ok)
        );
        assert_eq!(
            tee.combine([Ok(FlowSuccess::Ok), Err(FlowError::Error)]),
            Err(FlowError::Error)
        );
        assert_eq!(
            tee.combine([Err(FlowError::NotLinked), Err(FlowError::Flushing)]),
            Err(FlowError::Flushing)
        );
        assert_eq!(tee.combine([]), Err(FlowError::NotLinked));
    }

    #[test]
    fn test_new_pad_gets_sticky_events() {
        let tee = Tee::new().into_element("tee");
        let up = upstream(&tee);
        assert!(up.send_event(Event::StreamStart(StreamStartEvent::new("s"))));
        let late = tee.request_pad("src_%u").unwrap();
        assert_eq!(late.sticky_events().len(), 1);
        assert_eq!(tee.property("num-src-pads"), Some(PropertyValue::Integer(1)));
        tee.release_request_pad(&late).unwrap();
        assert!(tee.src_pads().is_empty());
    }
}
