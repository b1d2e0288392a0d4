//! The element state machine.
//!
//! `set_state(target)` walks one transition at a time from the current state
//! towards `target`, calling [`ElementImpl::change_state`] for each step.
//!
//! ```text
//!   NULL ──▶ READY ──▶ PAUSED ──▶ PLAYING
//!        ◀──       ◀──        ◀──
//! ```
//!
//! A step may complete later (ASYNC): the walk stops, the in-flight state is
//! reported as pending, and the implementation calls
//! [`Element::commit_async_state`] when done. The commit resumes the walk
//! towards the target on a helper thread, so streaming threads never run
//! state changes themselves.
//!
//! Locks: `state_lock` serializes whole `set_state` calls; the state data
//! mutex protects the fields below and is never held across a hook call or
//! a message post.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use super::state::{State, StateChange, StateChangeResult, StateChangeSuccess};
use super::{Element, ElementInner};
use crate::error::StateChangeError;
use crate::message::{Message, MessageView};
use crate::observability;

pub(crate) struct StateData {
    pub(crate) current: State,
    /// State of the transition in flight.
    pub(crate) next: Option<State>,
    pub(crate) target: State,
    pub(crate) last_return: StateChangeResult,
    /// Bumped whenever a new request supersedes earlier work.
    pub(crate) cookie: u64,
    /// A step returned ASYNC and waits for its commit.
    pub(crate) awaiting_commit: bool,
}

impl Default for StateData {
    fn default() -> Self {
        Self {
            current: State::Null,
            next: None,
            target: State::Null,
            last_return: Ok(StateChangeSuccess::Success),
            cookie: 0,
            awaiting_commit: false,
        }
    }
}

impl StateData {
    fn is_async(&self) -> bool {
        self.last_return == Ok(StateChangeSuccess::Async)
    }

    fn pending(&self) -> Option<State> {
        match self.next {
            Some(next) => Some(next),
            None if self.is_async() && self.current != self.target => {
                Some(self.current.step_towards(self.target))
            }
            None => None,
        }
    }
}

impl Element {
    fn state_data(&self) -> parking_lot::MutexGuard<'_, StateData> {
        self.inner.state.lock()
    }

    /// Current committed state.
    pub fn current_state(&self) -> State {
        self.state_data().current
    }

    /// Final state requested by the last `set_state`.
    pub fn target_state(&self) -> State {
        self.state_data().target
    }

    /// State of the transition in flight.
    pub fn pending_state(&self) -> Option<State> {
        self.state_data().pending()
    }

    /// Result of the last state change.
    pub fn last_return(&self) -> StateChangeResult {
        self.state_data().last_return
    }

    /// Check if an asynchronous change is still running.
    pub fn is_state_busy(&self) -> bool {
        self.state_data().is_async()
    }

    /// Check if a step returned ASYNC and nothing committed it yet.
    pub(crate) fn is_awaiting_commit(&self) -> bool {
        let data = self.state_data();
        data.awaiting_commit && data.next.is_some()
    }

    /// Lock or unlock the state. A locked element ignores state changes of
    /// its parent bin.
    pub fn set_locked_state(&self, locked: bool) -> bool {
        let old = self.inner.locked_state.swap(locked, Ordering::SeqCst);
        old != locked
    }

    /// Check if the state is locked.
    pub fn is_locked_state(&self) -> bool {
        self.inner.locked_state.load(Ordering::SeqCst)
    }

    // ========================================================================
    // set_state
    // ========================================================================

    /// Change the element state, stepping through every intermediate state.
    ///
    /// Returns the result of the last step performed: `Ok(Async)` when a
    /// step completes later, `Err` on the first failing step (the current
    /// state stays at the last completed step).
    pub fn set_state(&self, target: State) -> StateChangeResult {
        let _guard = self.inner.state_lock.lock();
        self.set_state_locked(target, true)
    }

    fn set_state_locked(&self, target: State, request: bool) -> StateChangeResult {
        let abandoned = {
            let mut data = self.state_data();
            let in_flight = data.next.filter(|_| data.is_async());
            match in_flight {
                Some(next) => {
                    let upward = next > data.current;
                    let same_direction = if upward { target >= next } else { target <= next };
                    if same_direction {
                        tracing::debug!(element = %self.name(), %target, "retargeting async change");
                        data.target = target;
                        return Ok(StateChangeSuccess::Async);
                    }
                    // Treat the in-flight state as reached and walk back from there.
                    let old = data.current;
                    data.awaiting_commit = false;
                    data.current = next;
                    data.next = None;
                    data.cookie += 1;
                    data.last_return = Ok(StateChangeSuccess::Success);
                    self.inner.state_cond.notify_all();
                    Some((old, next))
                }
                None => {
                    if data.current == target && data.next.is_none() {
                        data.target = target;
                        if data.is_async() {
                            data.last_return = Ok(StateChangeSuccess::Success);
                            self.inner.state_cond.notify_all();
                        }
                        return Ok(StateChangeSuccess::Success);
                    }
                    if request {
                        data.cookie += 1;
                    }
                    None
                }
            }
        };
        if let Some((old, current)) = abandoned {
            self.post_state_changed(old, current, Some(target));
        }

        self.state_data().target = target;

        let mut result: StateChangeResult = Ok(StateChangeSuccess::Success);
        loop {
            let transition = {
                let mut data = self.state_data();
                let Some(transition) = StateChange::towards(data.current, data.target) else {
                    break;
                };
                data.next = Some(transition.next());
                transition
            };

            let ret = {
                let _span = observability::span_state_change(self.name(), transition).entered();
                self.change_state_step(transition)
            };

            match ret {
                Ok(StateChangeSuccess::Async) => {
                    let already_committed = {
                        let mut data = self.state_data();
                        if data.next != Some(transition.next()) {
                            true
                        } else {
                            data.last_return = ret;
                            data.awaiting_commit = true;
                            false
                        }
                    };
                    if !already_committed {
                        tracing::debug!(element = %self.name(), %transition, "state change is async");
                        self.post_message(Message::new(Some(self.name()), MessageView::AsyncStart));
                        self.imp().state_change_async(self);
                    }
                    return ret;
                }
                Ok(_) => {
                    let (old, current, pending) = {
                        let mut data = self.state_data();
                        let old = data.current;
                        data.current = transition.next();
                        data.last_return = ret;
                        let pending = (data.current != data.target).then_some(data.target);
                        self.inner.state_cond.notify_all();
                        (old, data.current, pending)
                    };
                    self.post_state_changed(old, current, pending);
                    result = ret;
                }
                Err(err) => {
                    tracing::warn!(element = %self.name(), %transition, "state change failed");
                    let mut data = self.state_data();
                    data.next = None;
                    data.target = data.current;
                    data.last_return = Err(err);
                    self.inner.state_cond.notify_all();
                    return Err(err);
                }
            }
        }

        let mut data = self.state_data();
        data.next = None;
        data.last_return = result;
        self.inner.state_cond.notify_all();
        result
    }

    /// One transition with the generic work around the implementation hook.
    fn change_state_step(&self, transition: StateChange) -> StateChangeResult {
        tracing::debug!(element = %self.name(), %transition, "changing state");
        match transition {
            StateChange::ReadyToPaused => {
                if !self.activate_pads(true) {
                    self.activate_pads(false);
                    return Err(StateChangeError);
                }
            }
            StateChange::PausedToReady => {
                self.imp().unlock(self);
                self.activate_pads(false);
            }
            _ => {}
        }
        let ret = self.imp().change_state(self, transition);
        if ret.is_err() && transition == StateChange::ReadyToPaused {
            self.activate_pads(false);
        }
        ret
    }

    fn activate_pads(&self, active: bool) -> bool {
        let mut ok = true;
        for pad in self.pads() {
            if !pad.set_active(active) {
                tracing::warn!(pad = %pad.path(), active, "pad activation failed");
                ok = false;
            }
        }
        ok
    }

    fn post_state_changed(&self, old: State, current: State, pending: Option<State>) {
        tracing::debug!(element = %self.name(), %old, %current, ?pending, "state changed");
        self.post_message(Message::new(
            Some(self.name()),
            MessageView::StateChanged {
                old,
                current,
                pending,
            },
        ));
    }

    // ========================================================================
    // Async completion
    // ========================================================================

    /// Complete an asynchronous transition.
    ///
    /// On success the in-flight state is committed and, if the target is
    /// further away, the walk continues on a helper thread; ASYNC-DONE is
    /// posted when the target is reached. On failure the element stays in
    /// its current state and an error is posted.
    pub fn commit_async_state(&self, result: StateChangeResult) {
        self.commit_async(result, false);
    }

    /// Like [`commit_async_state`](Self::commit_async_state), but only if a
    /// step returned ASYNC and is still uncommitted. The check and the commit
    /// share one critical section, so concurrent callers commit at most once.
    pub(crate) fn commit_awaited_async_state(&self, result: StateChangeResult) {
        self.commit_async(result, true);
    }

    fn commit_async(&self, result: StateChangeResult, only_awaited: bool) {
        enum Outcome {
            Done { old: State, current: State },
            Continue { old: State, current: State, target: State, cookie: u64 },
            Failed,
        }

        let outcome = {
            let mut data = self.state_data();
            let Some(next) = data.next else {
                tracing::trace!(element = %self.name(), "no async change to commit");
                return;
            };
            if only_awaited && !data.awaiting_commit {
                tracing::trace!(element = %self.name(), "async change already committed");
                return;
            }
            data.awaiting_commit = false;
            match result {
                Ok(_) => {
                    let old = data.current;
                    data.current = next;
                    data.next = None;
                    let outcome = if next == data.target {
                        data.last_return = Ok(StateChangeSuccess::Success);
                        Outcome::Done { old, current: next }
                    } else {
                        data.last_return = Ok(StateChangeSuccess::Async);
                        Outcome::Continue {
                            old,
                            current: next,
                            target: data.target,
                            cookie: data.cookie,
                        }
                    };
                    self.inner.state_cond.notify_all();
                    outcome
                }
                Err(err) => {
                    data.next = None;
                    data.target = data.current;
                    data.last_return = Err(err);
                    self.inner.state_cond.notify_all();
                    Outcome::Failed
                }
            }
        };

        match outcome {
            Outcome::Done { old, current } => {
                self.post_state_changed(old, current, None);
                self.post_message(Message::new(Some(self.name()), MessageView::AsyncDone));
            }
            Outcome::Continue {
                old,
                current,
                target,
                cookie,
            } => {
                self.post_state_changed(old, current, Some(target));
                self.continue_state(cookie);
            }
            Outcome::Failed => {
                self.post_error("asynchronous state change failed", None);
            }
        }
    }

    fn continue_state(&self, cookie: u64) {
        let element = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-state", self.name()))
            .spawn(move || {
                let _guard = element.inner.state_lock.lock();
                let target = {
                    let data = element.state_data();
                    if data.cookie != cookie {
                        tracing::trace!(element = %element.name(), "continuation superseded");
                        return;
                    }
                    data.target
                };
                // ASYNC-DONE goes out once the whole walk completed, so a
                // parent never sees this element idle while it still moves.
                match element.set_state_locked(target, false) {
                    Ok(StateChangeSuccess::Async) => {}
                    Ok(_) => {
                        element.post_message(Message::new(Some(element.name()), MessageView::AsyncDone));
                    }
                    Err(_) => {
                        element.post_error("state change failed while continuing", None);
                    }
                }
            });
        if let Err(err) = spawned {
            tracing::error!(element = %self.name(), %err, "could not spawn state continuation");
            self.abort_state();
        }
    }

    /// Abort an asynchronous change: waiters see a failure and the element
    /// stays in its current state.
    pub fn abort_state(&self) {
        let mut data = self.state_data();
        if !data.is_async() {
            return;
        }
        tracing::debug!(element = %self.name(), "aborting async state change");
        data.awaiting_commit = false;
        data.next = None;
        data.target = data.current;
        data.last_return = Err(StateChangeError);
        self.inner.state_cond.notify_all();
    }

    // ========================================================================
    // get_state
    // ========================================================================

    /// Wait for an asynchronous change to finish.
    ///
    /// Returns `(result, current, pending)`. `None` waits forever. On
    /// timeout the result is `Ok(Async)`; if a newer request abandons the
    /// change the result is `Err`.
    pub fn get_state(
        &self,
        timeout: Option<Duration>,
    ) -> (StateChangeResult, State, Option<State>) {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut data = self.state_data();
        let cookie = data.cookie;
        loop {
            if data.cookie != cookie {
                return (Err(StateChangeError), data.current, data.pending());
            }
            if !data.is_async() {
                return (data.last_return, data.current, data.pending());
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.state_cond.wait_until(&mut data, deadline).timed_out()
                        && data.is_async()
                        && data.cookie == cookie
                    {
                        return (data.last_return, data.current, data.pending());
                    }
                }
                None => self.inner.state_cond.wait(&mut data),
            }
        }
    }

    /// Bring the element to its parent's target state.
    pub fn sync_state_with_parent(&self) -> StateChangeResult {
        let Some(parent) = self.parent() else {
            return Err(StateChangeError);
        };
        let target = parent.target_state();
        tracing::debug!(element = %self.name(), %target, "syncing state with parent");
        self.set_state(target)
    }
}

impl ElementInner {
    #[cfg(test)]
    pub(crate) fn cookie(&self) -> u64 {
        self.state.lock().cookie
    }
}
