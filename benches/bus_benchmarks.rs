use std::{hint::black_box, sync::Arc};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use emigate::{
    broker::{BroadcastChannel, EnvelopeFilter, Listener, ATTR_CORRELATION_ID, ATTR_TYPE},
    transport::Attributes,
    Envelope, InboundMessage,
};

fn message(body: &'static [u8]) -> InboundMessage {
    let mut attributes = Attributes::new();
    attributes.insert(ATTR_TYPE.to_string(), "OrderCreated".to_string());
    attributes.insert(ATTR_CORRELATION_ID.to_string(), "c-42".to_string());
    InboundMessage::new("1", Bytes::from_static(body), attributes)
}

fn envelope() -> Arc<Envelope> {
    let msg = message(br#"{"order":42,"items":[1,2,3]}"#);
    Arc::new(Envelope::decode(Arc::from("events"), &msg).unwrap())
}

fn bench_push_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_push");
    let env = envelope();
    for listeners in [0usize, 1, 10, 100] {
        let bus = BroadcastChannel::new(1024);
        // очереди слушателей не ограничены, поэтому вычитываем их в замере
        let mut receivers: Vec<Listener> = (0..listeners).map(|_| bus.listen().unwrap()).collect();
        group.bench_with_input(BenchmarkId::from_parameter(listeners), &listeners, |b, _| {
            b.iter(|| {
                black_box(bus.push(env.clone()));
                for listener in receivers.iter_mut() {
                    black_box(listener.try_recv());
                }
            })
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let small = message(br#"{"ok":true}"#);
    let large = message(
        br#"{"order":42,"customer":{"id":"u-1","tags":["a","b","c"]},"items":[{"sku":"x","qty":1},{"sku":"y","qty":2},{"sku":"z","qty":3}]}"#,
    );
    let topic: Arc<str> = Arc::from("events");

    c.bench_function("envelope_decode_small", |b| {
        b.iter(|| black_box(Envelope::decode(topic.clone(), &small).unwrap()))
    });
    c.bench_function("envelope_decode_large", |b| {
        b.iter(|| black_box(Envelope::decode(topic.clone(), &large).unwrap()))
    });
}

fn bench_filter(c: &mut Criterion) {
    let env = envelope();
    let by_type = EnvelopeFilter::new()
        .topic("events")
        .types(Some(vec!["OrderShipped".to_string(), "OrderCreated".to_string()]))
        .exclude_sender("self");
    let by_correlation = EnvelopeFilter::new().topic("events").correlation_id("c-42");

    c.bench_function("filter_by_type", |b| {
        b.iter(|| black_box(by_type.matches(&env)))
    });
    c.bench_function("filter_by_correlation_id", |b| {
        b.iter(|| black_box(by_correlation.matches(&env)))
    });
}

criterion_group!(benches, bench_push_fan_out, bench_decode, bench_filter);
criterion_main!(benches);
