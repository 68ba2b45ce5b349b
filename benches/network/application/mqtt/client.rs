use criterion::{Criterion, Throughput};
use iothub_device::network::application::mqtt::{Client, Options, QoS, Session};
use iothub_device::network::error::Error;
use iothub_device::network::{Close, Connect, Connection, Read, Write};
use iothub_device::time::Instant;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A broker stand-in that reflects every PUBLISH back to the sender and
/// acknowledges QoS 1 ones.
#[derive(Default)]
struct Loopback {
    inbound: VecDeque<u8>,
}

impl Loopback {
    fn reflect(&mut self, frame: &[u8]) {
        if frame.first().map(|b| b & 0xF0) != Some(0x30) {
            return;
        }
        self.inbound.extend(frame.iter().copied());
        if (frame[0] >> 1) & 0x03 == 1 {
            // Single-byte remaining length; bench frames stay under 128 bytes.
            let topic_len = u16::from_be_bytes([frame[2], frame[3]]) as usize;
            let id_at = 4 + topic_len;
            self.inbound
                .extend([0x40, 0x02, frame[id_at], frame[id_at + 1]]);
        }
    }
}

struct LoopConnection(Rc<RefCell<Loopback>>);

impl Read for LoopConnection {
    type Error = Error;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut lb = self.0.borrow_mut();
        let n = buf.len().min(lb.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(lb.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for LoopConnection {
    type Error = Error;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.0.borrow_mut().reflect(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for LoopConnection {
    type Error = Error;
    fn close(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Connection for LoopConnection {}

struct LoopNetwork;

impl Connect for LoopNetwork {
    type Connection = LoopConnection;
    type Error = Error;
    fn connect(&mut self, _remote: &str, _port: u16) -> Result<Self::Connection, Self::Error> {
        Ok(LoopConnection(Rc::new(RefCell::new(Loopback::default()))))
    }
}

fn setup_client(client_id: &str) -> Client<LoopNetwork> {
    let opts = Options {
        client_id,
        username: None,
        password: None,
        keep_alive_seconds: 0,
        clean_session: true,
    };
    let mut client = Client::new(LoopNetwork);
    client
        .connect("loopback", 1883, &opts, Instant::ZERO)
        .expect("Failed to connect");
    client
}

pub fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    let payload = b"hello from publish";
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("publish", |b| {
        b.iter_batched_ref(
            || setup_client("bench-publish"),
            |client| {
                client
                    .publish("bench/topic", payload, QoS::AtMostOnce, 0, false)
                    .expect("Failed to publish");
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_poll(c: &mut Criterion) {
    let mut group = c.benchmark_group("poll");
    let payload = b"hello from poll";
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("poll", |b| {
        b.iter_batched_ref(
            || {
                let mut client = setup_client("bench-poll");
                client
                    .publish("bench/topic", payload, QoS::AtMostOnce, 0, false)
                    .expect("Failed to publish");
                client
            },
            |client| {
                let _ = client.poll(Instant::ZERO).expect("Failed to poll");
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_publish_and_poll_qos0(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_and_poll_qos0");
    let payload = b"hello world from bench";
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));

    group.bench_function("publish_and_poll_qos0", |b| {
        b.iter_batched_ref(
            || setup_client("bench-pubpoll-qos0"),
            |client| {
                for _ in 0..50 {
                    client
                        .publish("bench/topic-qos0", payload, QoS::AtMostOnce, 0, false)
                        .expect("Failed to publish");
                    let _ = client.poll(Instant::ZERO).expect("Failed to poll");
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}

pub fn bench_publish_and_poll_qos1(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_and_poll_qos1");
    let payload = b"hello world from bench qos1";
    group.throughput(Throughput::Bytes(payload.len() as u64 * 50));

    group.bench_function("publish_and_poll_qos1", |b| {
        b.iter_batched_ref(
            || setup_client("bench-pubpoll-qos1"),
            |client| {
                for id in 1..=50 {
                    client
                        .publish("bench/topic-qos1", payload, QoS::AtLeastOnce, id, false)
                        .expect("Failed to publish");
                    // Reflected message, then PUBACK.
                    let _ = client.poll(Instant::ZERO).expect("Failed to poll");
                    let _ = client.poll(Instant::ZERO).expect("Failed to poll");
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
    group.finish();
}
