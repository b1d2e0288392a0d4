//! Throughput benchmarks for buffers, pad pushes and complete pipelines.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mediaflow::buffer::Buffer;
use mediaflow::elements::Identity;
use mediaflow::error::FlowSuccess;
use mediaflow::message::MessageType;
use mediaflow::pad::{Pad, PadDirection};
use mediaflow::prelude::*;
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

fn bench_buffer_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_creation");

    for size in [64, 1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(Buffer::with_size(size)));
        });
    }

    group.finish();
}

fn bench_buffer_clone(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_clone");

    for size in [64, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let buffer = Buffer::with_size(size);
            b.iter(|| black_box(buffer.clone()));
        });
    }

    group.finish();
}

/// Push through a chain of identity elements on the calling thread.
fn bench_identity_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_chain");

    for depth in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, &depth| {
            let elements: Vec<Element> = (0..depth)
                .map(|i| Identity::new().into_element(&format!("id{i}")))
                .collect();
            let refs: Vec<&Element> = elements.iter().collect();
            Element::link_many(&refs).unwrap();

            let head = Pad::new("head", PadDirection::Src);
            let tail = Pad::new("tail", PadDirection::Sink);
            let count = Arc::new(AtomicU64::new(0));
            {
                let count = count.clone();
                tail.set_chain_function(move |_pad, _buffer| {
                    count.fetch_add(1, Ordering::Relaxed);
                    Ok(FlowSuccess::Ok)
                });
            }
            head.link(&elements[0].static_pad("sink").unwrap()).unwrap();
            elements[depth - 1]
                .static_pad("src")
                .unwrap()
                .link(&tail)
                .unwrap();
            for element in &elements {
                element.set_state(State::Paused).unwrap();
            }
            head.set_active(true);
            tail.set_active(true);

            let buffer = Buffer::with_size(1024);
            b.iter(|| black_box(head.push(buffer.clone())));

            for element in &elements {
                element.set_state(State::Null).unwrap();
            }
        });
    }

    group.finish();
}

/// Run complete launch lines to EOS.
fn bench_pipeline_to_eos(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_to_eos");
    group.sample_size(20);

    let buffers = 1000u64;
    for description in [
        "datasrc num-buffers=1000 ! nullsink",
        "datasrc num-buffers=1000 ! queue ! nullsink",
        "datasrc num-buffers=1000 ! tee name=t ! queue ! nullsink t. ! queue ! nullsink",
    ] {
        group.throughput(Throughput::Elements(buffers));
        group.bench_function(description, |b| {
            b.iter(|| {
                let pipeline = parse_launch(description).unwrap();
                pipeline.set_state(State::Playing).unwrap();
                let bus = pipeline.bus().unwrap();
                let msg = bus.timed_pop_filtered(
                    Some(Duration::from_secs(10)),
                    MessageType::EOS | MessageType::ERROR,
                );
                black_box(msg);
                pipeline.set_state(State::Null).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_buffer_creation,
    bench_buffer_clone,
    bench_identity_chain,
    bench_pipeline_to_eos,
);

criterion_main!(benches);
