//! Consuming the bus from async code.

use futures::StreamExt;
use mediaflow::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn test_bus_stream_delivers_eos() {
    let pipeline = parse_launch("datasrc num-buffers=5 ! queue ! nullsink").unwrap();
    let mut messages = pipeline.bus().unwrap().stream();
    pipeline.set_state(State::Playing).unwrap();

    let eos = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = messages.next().await {
            match msg.view() {
                MessageView::Eos => return Some(msg),
                MessageView::Error { error, .. } => panic!("pipeline error: {error}"),
                _ => {}
            }
        }
        None
    })
    .await
    .expect("timed out waiting for EOS");

    assert_eq!(eos.unwrap().src(), Some("pipeline"));
    pipeline.set_state(State::Null).unwrap();
}

#[tokio::test]
async fn test_bus_stream_sees_messages_posted_from_threads() {
    let bus = Bus::new();
    let mut messages = bus.stream();
    let poster = {
        let bus = bus.clone();
        std::thread::spawn(move || {
            for i in 0..3 {
                std::thread::sleep(Duration::from_millis(5));
                bus.post(Message::warning("worker", format!("warning {i}")));
            }
        })
    };

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let msg = tokio::time::timeout(Duration::from_secs(5), messages.next())
            .await
            .expect("timed out")
            .expect("stream ended");
        seen.push(msg.seqnum());
    }
    poster.join().unwrap();
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}
