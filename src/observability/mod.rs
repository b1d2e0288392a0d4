//! Observability: structured logging and spans.
//!
//! mediaflow logs through `tracing`. Besides plain events at state changes,
//! linking, negotiation and flow errors, it opens spans for:
//!
//! - every state transition of every element (`state_change`)
//! - every iteration of a streaming task (`task`)
//! - every buffer handled by a source or sink (`buffer`, off by default)
//!
//! Which spans are created is controlled by a process-wide
//! [`TracingConfig`]. Install a subscriber (for example
//! `tracing-subscriber`) to see the output.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediaflow::observability::{TracingConfig, set_tracing_config};
//!
//! tracing_subscriber::fmt().with_env_filter("mediaflow=debug").init();
//! set_tracing_config(TracingConfig::all());
//! ```

mod tracing_support;

pub use tracing_support::{
    TracingConfig, set_tracing_config, span_buffer, span_state_change, span_task,
    trace_buffer_consumed, trace_buffer_produced, trace_eos, trace_flow_error, tracing_config,
};
