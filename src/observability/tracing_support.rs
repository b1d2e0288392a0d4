//! Tracing integration for structured logging and spans.

use parking_lot::RwLock;
use tracing::{Level, Span, span};

use crate::element::StateChange;
use crate::error::FlowError;

/// Configuration for tracing behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Whether to create spans for element state transitions.
    pub state_spans: bool,
    /// Whether to create spans for streaming task iterations.
    pub task_spans: bool,
    /// Whether to create spans for buffer processing.
    pub buffer_spans: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            state_spans: true,
            task_spans: true,
            buffer_spans: false, // Can be expensive
        }
    }
}

impl TracingConfig {
    /// Create a new tracing config with all spans enabled.
    pub const fn all() -> Self {
        Self {
            state_spans: true,
            task_spans: true,
            buffer_spans: true,
        }
    }

    /// Create a minimal config (state change spans only).
    pub const fn minimal() -> Self {
        Self {
            state_spans: true,
            task_spans: false,
            buffer_spans: false,
        }
    }

    /// Disable all spans.
    pub const fn none() -> Self {
        Self {
            state_spans: false,
            task_spans: false,
            buffer_spans: false,
        }
    }
}

static CONFIG: RwLock<TracingConfig> = RwLock::new(TracingConfig {
    state_spans: true,
    task_spans: true,
    buffer_spans: false,
});

/// Replace the process-wide tracing configuration.
pub fn set_tracing_config(config: TracingConfig) {
    *CONFIG.write() = config;
}

/// The process-wide tracing configuration.
pub fn tracing_config() -> TracingConfig {
    *CONFIG.read()
}

/// Create a span for one state transition of an element.
///
/// # Example
///
/// ```rust,ignore
/// use mediaflow::observability::span_state_change;
///
/// let _guard = span_state_change("sink", StateChange::ReadyToPaused).entered();
/// // change_state hook runs here...
/// ```
#[inline]
pub fn span_state_change(element: &str, transition: StateChange) -> Span {
    if !tracing_config().state_spans {
        return Span::none();
    }
    span!(Level::DEBUG, "state_change", element = %element, transition = %transition)
}

/// Create a span for one iteration of a streaming task.
#[inline]
pub fn span_task(task: &str) -> Span {
    if !tracing_config().task_spans {
        return Span::none();
    }
    span!(Level::TRACE, "task", task = %task)
}

/// Create a span for handling one buffer.
#[inline]
pub fn span_buffer(element: &str, size: usize) -> Span {
    if !tracing_config().buffer_spans {
        return Span::none();
    }
    span!(Level::TRACE, "buffer", element = %element, size = size)
}

/// Log a buffer being produced.
#[inline]
pub fn trace_buffer_produced(element: &str, size: usize, sequence: u64) {
    tracing::trace!(
        element = %element,
        size = size,
        sequence = sequence,
        "buffer produced"
    );
}

/// Log a buffer being consumed.
#[inline]
pub fn trace_buffer_consumed(element: &str, size: usize, sequence: u64) {
    tracing::trace!(
        element = %element,
        size = size,
        sequence = sequence,
        "buffer consumed"
    );
}

/// Log a flow result that stopped a streaming thread.
#[inline]
pub fn trace_flow_error(element: &str, error: FlowError) {
    match error {
        FlowError::Error | FlowError::NotNegotiated => {
            tracing::error!(element = %element, error = %error, "streaming stopped")
        }
        _ => tracing::debug!(element = %element, error = %error, "streaming paused"),
    }
}

/// Log end-of-stream.
#[inline]
pub fn trace_eos(element: &str) {
    tracing::debug!(element = %element, "end of stream");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert!(config.state_spans);
        assert!(config.task_spans);
        assert!(!config.buffer_spans);
    }

    #[test]
    fn test_tracing_config_presets() {
        assert!(TracingConfig::all().buffer_spans);
        let minimal = TracingConfig::minimal();
        assert!(minimal.state_spans && !minimal.task_spans);
        let none = TracingConfig::none();
        assert!(!none.state_spans && !none.task_spans && !none.buffer_spans);
    }

    #[test]
    fn test_span_creation() {
        // No subscriber installed; spans are disabled but must not panic.
        let _span = span_state_change("sink", StateChange::NullToReady);
        let _span = span_task("src:src");
        let _span = span_buffer("sink", 16);
    }

    #[test]
    fn test_trace_functions() {
        trace_buffer_produced("src", 100, 0);
        trace_buffer_consumed("sink", 100, 0);
        trace_flow_error("src", FlowError::NotLinked);
        trace_flow_error("src", FlowError::Error);
        trace_eos("sink");
    }
}
