//! Ghost pads.
//!
//! A ghost pad exposes a pad of a child element on its bin. It owns an
//! internal proxy pad of the opposite direction that is linked to the target.
//! Everything arriving on the ghost pad is re-sent through the proxy, and the
//! other way round, using ordinary push/event calls:
//!
//! ```text
//!   ghost sink ──chain/event──▶ proxy src ──▶ target sink      (inside the bin)
//!   target src ──▶ proxy sink ──chain/event──▶ ghost src
//! ```

use crate::caps::Caps;
use crate::error::LinkError;

use super::{Pad, PadDirection};

impl Pad {
    /// Create a ghost pad for `target`. Add the result to the bin with
    /// [`Element::add_pad`](crate::element::Element::add_pad).
    pub fn new_ghost(
        name: impl Into<String>,
        target: &Pad,
    ) -> std::result::Result<Pad, LinkError> {
        let name = name.into();
        let ghost = Pad::new(name.clone(), target.direction());
        let proxy = Pad::new(format!("{name}_proxy"), target.direction().opposite());
        let weak_ghost = ghost.downgrade();

        match target.direction() {
            PadDirection::Sink => {
                let p = proxy.clone();
                ghost.set_chain_function(move |_, buffer| p.push(buffer));
                let p = proxy.clone();
                ghost.set_event_function(move |_, event| p.send_event(event));
                let p = proxy.clone();
                ghost.set_query_caps_function(move |_, filter| p.peer_query_caps(filter));

                let g = weak_ghost.clone();
                proxy.set_event_function(move |_, event| {
                    g.upgrade().is_some_and(|ghost| ghost.send_event(event))
                });
            }
            PadDirection::Src => {
                let p = proxy.clone();
                ghost.set_event_function(move |_, event| p.send_event(event));
                let p = proxy.clone();
                ghost.set_getrange_function(move |_, offset, size| p.pull_range(offset, size));
                let p = proxy.clone();
                ghost.set_query_caps_function(move |_, filter| p.peer_query_caps(filter));

                let g = weak_ghost.clone();
                proxy.set_chain_function(move |_, buffer| match g.upgrade() {
                    Some(ghost) => ghost.push(buffer),
                    None => Err(crate::error::FlowError::NotLinked),
                });
                let g = weak_ghost.clone();
                proxy.set_event_function(move |_, event| {
                    g.upgrade().is_some_and(|ghost| ghost.send_event(event))
                });
            }
        }

        let g = weak_ghost;
        proxy.set_query_caps_function(move |_, filter| match g.upgrade() {
            Some(ghost) => ghost.peer_query_caps(filter),
            None => filter.cloned().unwrap_or_else(Caps::new_any),
        });

        proxy.link(target)?;
        ghost.set_internal(proxy);
        tracing::debug!(ghost = %ghost.name(), target = %target.path(), "created ghost pad");
        Ok(ghost)
    }

    /// The child pad a ghost pad proxies.
    pub fn ghost_target(&self) -> Option<Pad> {
        self.internal().and_then(|proxy| proxy.peer())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::buffer::Buffer;
    use crate::error::FlowSuccess;
    use crate::event::Event;
    use crate::pad::{Pad, PadDirection};

    #[test]
    fn test_ghost_sink_forwards_buffers_and_events() {
        let target = Pad::new("sink", PadDirection::Sink);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        target.set_chain_function(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        });

        let ghost = Pad::new_ghost("sink", &target).unwrap();
        assert_eq!(ghost.direction(), PadDirection::Sink);
        assert_eq!(ghost.ghost_target(), Some(target.clone()));

        let upstream = Pad::new("src", PadDirection::Src);
        upstream.link(&ghost).unwrap();
        upstream.push(Buffer::with_size(4)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(upstream.send_event(Event::Eos));
        assert!(target.is_eos());
    }

    #[test]
    fn test_ghost_src_forwards_buffers() {
        let target = Pad::new("src", PadDirection::Src);
        let ghost = Pad::new_ghost("src", &target).unwrap();
        let downstream = Pad::new("sink", PadDirection::Sink);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        downstream.set_chain_function(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(FlowSuccess::Ok)
        });
        ghost.link(&downstream).unwrap();
        target.push(Buffer::with_size(1)).unwrap();
        target.push(Buffer::with_size(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
