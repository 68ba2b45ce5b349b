use criterion::Criterion;
use iothub_device::hub::message::Message;
use iothub_device::hub::topics;
use std::hint::black_box;

pub fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let inbound = [
        "$iothub/twin/res/200/?$rid=42",
        "$iothub/twin/PATCH/properties/desired/?$version=7",
        "$iothub/methods/POST/reboot/?$rid=9f",
        "devices/dev1/messages/devicebound/%24.mid=abc&color=blue",
    ];
    group.bench_function("classify", |b| {
        b.iter(|| {
            for topic in inbound {
                let _ = topics::classify(black_box(topic)).expect("Failed to classify");
            }
        })
    });
    group.finish();
}

pub fn bench_telemetry_topic(c: &mut Criterion) {
    let mut group = c.benchmark_group("telemetry_topic");
    let mut message = Message::from_text("{\"temperature\":21.5}")
        .with_property("unit", "C")
        .with_property("room name", "lab/2");
    message.set_message_id("m-1");
    message.set_correlation_id("c-1");
    group.bench_function("telemetry_with_properties", |b| {
        b.iter(|| {
            topics::telemetry_with_properties(black_box("dev1"), black_box(&message))
                .expect("Failed to build topic")
        })
    });
    group.finish();
}
