//! Streaming threads.
//!
//! A [`Task`] owns one thread that calls a function repeatedly while the
//! task is started. Sources, queues and pull-mode sinks use a task to drive
//! dataflow; everything else runs on the caller's thread.
//!
//! ```text
//!            start()            pause()
//!   Stopped ─────────▶ Started ─────────▶ Paused
//!      ▲                  │  ◀───────────   │
//!      └──── stop() ──────┴──── start() ────┘
//! ```
//!
//! The function decides how the loop continues by returning a [`TaskFlow`]:
//! a source returns `Pause` after a flow error and `Stop` is rarely needed.
//! Control calls never wait for an iteration in progress; callers that need
//! the function to be idle take the stream lock it runs under, or
//! [`join`](Task::join).

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::observability;

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// No thread runs (or it is exiting).
    Stopped,
    /// The function is called in a loop.
    Started,
    /// The thread waits to be started again.
    Paused,
}

/// What the task loop does after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskFlow {
    /// Call the function again.
    Continue,
    /// Pause the task until it is started again.
    Pause,
    /// Stop the task; the thread exits.
    Stop,
}

type TaskFunction = Box<dyn FnMut() -> TaskFlow + Send>;

struct Control {
    state: TaskState,
    /// Bumped by every `start`, so a `Pause` returned by an iteration that
    /// raced with a restart is ignored.
    starts: u64,
    thread: Option<JoinHandle<()>>,
    thread_id: Option<ThreadId>,
}

struct TaskInner {
    name: String,
    control: Mutex<Control>,
    cond: Condvar,
    func: Mutex<TaskFunction>,
}

/// A restartable streaming thread.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a stopped task calling `func`.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut() -> TaskFlow + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                control: Mutex::new(Control {
                    state: TaskState::Stopped,
                    starts: 0,
                    thread: None,
                    thread_id: None,
                }),
                cond: Condvar::new(),
                func: Mutex::new(Box::new(func)),
            }),
        }
    }

    /// Task name, also used as the thread name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.inner.control.lock().state
    }

    /// Start calling the function, spawning the thread if needed.
    pub fn start(&self) -> Result<()> {
        self.set_state(TaskState::Started)
    }

    /// Stop calling the function after the current iteration. The thread
    /// stays alive and waits.
    pub fn pause(&self) -> Result<()> {
        self.set_state(TaskState::Paused)
    }

    /// Let the thread exit after the current iteration. Does not wait.
    pub fn stop(&self) {
        let mut control = self.inner.control.lock();
        control.state = TaskState::Stopped;
        self.inner.cond.notify_all();
    }

    /// Stop the task and wait for the thread to exit.
    ///
    /// Called from the task's own thread this only stops the task.
    pub fn join(&self) {
        let handle = {
            let mut control = self.inner.control.lock();
            control.state = TaskState::Stopped;
            self.inner.cond.notify_all();
            if control.thread_id == Some(thread::current().id()) {
                return;
            }
            control.thread_id = None;
            control.thread.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(task = %self.inner.name, "task thread panicked");
            }
        }
    }

    fn set_state(&self, state: TaskState) -> Result<()> {
        let mut control = self.inner.control.lock();
        control.state = state;
        if state == TaskState::Started {
            control.starts += 1;
        }
        self.inner.cond.notify_all();
        let exited = control.thread.as_ref().is_none_or(JoinHandle::is_finished);
        if exited {
            // Reap a thread that left after a previous stop.
            if let Some(old) = control.thread.take() {
                let _ = old.join();
            }
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(self.inner.name.clone())
                .spawn(move || run(inner))?;
            control.thread_id = Some(handle.thread().id());
            control.thread = Some(handle);
            tracing::debug!(task = %self.inner.name, ?state, "spawned task thread");
        }
        Ok(())
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn run(inner: Arc<TaskInner>) {
    loop {
        let starts = {
            let mut control = inner.control.lock();
            while control.state == TaskState::Paused {
                inner.cond.wait(&mut control);
            }
            if control.state == TaskState::Stopped {
                break;
            }
            control.starts
        };

        let flow = {
            let _span = observability::span_task(&inner.name).entered();
            let mut func = inner.func.lock();
            (func)()
        };

        match flow {
            TaskFlow::Continue => {}
            TaskFlow::Pause => {
                let mut control = inner.control.lock();
                if control.state == TaskState::Started && control.starts == starts {
                    control.state = TaskState::Paused;
                }
            }
            TaskFlow::Stop => {
                inner.control.lock().state = TaskState::Stopped;
                break;
            }
        }
    }
    tracing::trace!(task = %inner.name, "task thread exiting");
}
