//! Run a launch line until end-of-stream or error.
//!
//! ```text
//! cargo run --example launch -- "datasrc num-buffers=100 ! queue ! nullsink"
//! RUST_LOG=mediaflow=debug cargo run --example launch -- "datasrc ! tee name=t ! nullsink t. ! queue ! nullsink"
//! ```

use mediaflow::observability::{TracingConfig, set_tracing_config};
use mediaflow::prelude::*;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mediaflow=info")),
        )
        .init();
    set_tracing_config(TracingConfig::all());

    let description = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let description = if description.is_empty() {
        "datasrc num-buffers=10 ! identity ! queue ! nullsink".to_string()
    } else {
        description
    };

    println!("launching: {description}");
    let pipeline = parse_launch(&description)?;
    let bus = pipeline
        .bus()
        .ok_or_else(|| Error::NotABin(pipeline.name().to_string()))?;
    let started = Instant::now();
    if pipeline.set_state(State::Playing).is_err() {
        eprintln!("pipeline refused to start");
        let _ = pipeline.set_state(State::Null);
        std::process::exit(1);
    }

    let mut failed = false;
    while let Some(msg) = bus.timed_pop_filtered(None, MessageType::EOS | MessageType::ERROR) {
        match msg.view() {
            MessageView::Eos => {
                println!("end of stream after {:?}", started.elapsed());
                break;
            }
            MessageView::Error { error, debug } => {
                eprintln!("error from {:?}: {error} ({debug:?})", msg.src());
                failed = true;
                break;
            }
            _ => {}
        }
    }

    let _ = pipeline.set_state(State::Null);
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
