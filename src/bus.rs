//! Message bus from the pipeline to the application.
//!
//! The bus is a thread-safe FIFO. Elements [`post`](Bus::post) from any
//! thread without blocking; the application pops messages synchronously
//! (optionally with a timeout and a type filter) or consumes them as an
//! async [`Stream`](futures::Stream).
//!
//! # Example
//!
//! ```rust,ignore
//! use mediaflow::message::MessageType;
//! use std::time::Duration;
//!
//! let bus = pipeline.bus();
//! match bus.timed_pop_filtered(Some(Duration::from_secs(5)), MessageType::EOS | MessageType::ERROR) {
//!     Some(msg) => println!("{msg}"),
//!     None => println!("timed out"),
//! }
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::message::{Message, MessageType};

#[derive(Default)]
struct BusState {
    queue: VecDeque<Message>,
    flushing: bool,
    wakers: Vec<Waker>,
}

struct BusInner {
    state: Mutex<BusState>,
    cond: Condvar,
}

/// A message queue shared between the pipeline and the application.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Queue a message. Returns false if the bus is flushing and the message
    /// was dropped.
    pub fn post(&self, message: Message) -> bool {
        let wakers = {
            let mut state = self.inner.state.lock();
            if state.flushing {
                tracing::trace!(%message, "bus flushing, dropping message");
                return false;
            }
            tracing::trace!(%message, "posting message");
            state.queue.push_back(message);
            self.inner.cond.notify_all();
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Pop the oldest message without waiting.
    pub fn pop(&self) -> Option<Message> {
        self.inner.state.lock().queue.pop_front()
    }

    /// Pop the oldest message, waiting up to `timeout` (`None` waits forever).
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        self.timed_pop_filtered(timeout, MessageType::ANY)
    }

    /// Pop the oldest message matching `mask`, waiting up to `timeout`
    /// (`None` waits forever).
    ///
    /// Messages that do not match are removed from the bus and dropped.
    pub fn timed_pop_filtered(&self, timeout: Option<Duration>, mask: MessageType) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        loop {
            while let Some(message) = state.queue.pop_front() {
                if message.matches(mask) {
                    return Some(message);
                }
                tracing::trace!(%message, "discarding unmatched message");
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        // One last look in case a post raced with the timeout.
                        return Self::take_matching(&mut state, mask);
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
    }

    fn take_matching(state: &mut BusState, mask: MessageType) -> Option<Message> {
        while let Some(message) = state.queue.pop_front() {
            if message.matches(mask) {
                return Some(message);
            }
        }
        None
    }

    /// Pop the oldest message matching `mask` without waiting, dropping
    /// non-matching messages in front of it.
    pub fn pop_filtered(&self, mask: MessageType) -> Option<Message> {
        Self::take_matching(&mut self.inner.state.lock(), mask)
    }

    /// Look at the oldest message without removing it.
    pub fn peek(&self) -> Option<Message> {
        self.inner.state.lock().queue.front().cloned()
    }

    /// Check if messages are queued.
    pub fn have_pending(&self) -> bool {
        !self.inner.state.lock().queue.is_empty()
    }

    /// While flushing, queued messages are dropped and posts are refused.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = self.inner.state.lock();
        state.flushing = flushing;
        if flushing {
            state.queue.clear();
        }
    }

    /// Consume messages as an async stream.
    ///
    /// The stream never ends on its own; stop polling it after EOS or ERROR.
    pub fn stream(&self) -> BusStream {
        BusStream { bus: self.clone() }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Bus")
            .field("pending", &state.queue.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}

/// Async stream of bus messages.
pub struct BusStream {
    bus: Bus,
}

impl futures::Stream for BusStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.bus.inner.state.lock();
        match state.queue.pop_front() {
            Some(message) => Poll::Ready(Some(message)),
            None => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageView;

    #[test]
    fn test_fifo_order() {
        let bus = Bus::new();
        bus.post(Message::warning("a", "1"));
        bus.post(Message::warning("b", "2"));
        assert!(bus.have_pending());
        assert_eq!(bus.peek().unwrap().src(), Some("a"));
        assert_eq!(bus.pop().unwrap().src(), Some("a"));
        assert_eq!(bus.pop().unwrap().src(), Some("b"));
        assert!(bus.pop().is_none());
    }

    #[test]
    fn test_timed_pop_times_out() {
        let bus = Bus::new();
        let start = Instant::now();
        assert!(bus.timed_pop(Some(Duration::from_millis(30))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_filtered_pop_discards_others() {
        let bus = Bus::new();
        bus.post(Message::warning("a", "w"));
        bus.post(Message::eos("sink"));
        let msg = bus
            .timed_pop_filtered(Some(Duration::ZERO), MessageType::EOS)
            .unwrap();
        assert!(matches!(msg.view(), MessageView::Eos));
        assert!(!bus.have_pending());
    }

    #[test]
    fn test_pop_wakes_on_post() {
        let bus = Bus::new();
        let poster = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                bus.post(Message::eos("sink"));
            })
        };
        let msg = bus.timed_pop_filtered(None, MessageType::EOS);
        assert!(msg.is_some());
        poster.join().unwrap();
    }

    #[test]
    fn test_flushing_refuses_posts() {
        let bus = Bus::new();
        bus.post(Message::eos("x"));
        bus.set_flushing(true);
        assert!(!bus.have_pending());
        assert!(!bus.post(Message::eos("x")));
        bus.set_flushing(false);
        assert!(bus.post(Message::eos("x")));
    }
}
