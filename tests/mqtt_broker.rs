//! Runs the MQTT session against a real broker.
//!
//! Ignored by default. Point `TEST_MQTT_ADDRESS` (or a `.env` file) at a
//! plain-TCP broker and run with `cargo test -- --ignored`.

use dotenvy::dotenv;
use iothub_device::network::application::mqtt::{
    Client, ConnectReturnCode, Event, Options, QoS, Session,
};
use iothub_device::network::error::Error;
use iothub_device::network::{Close, Connect, Connection, Read, Write};
use iothub_device::time::Instant;
use std::env;
use std::io::{ErrorKind, Read as StdRead, Write as StdWrite};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant as StdInstant};

struct NetConnection {
    stream: TcpStream,
}

impl Read for NetConnection {
    type Error = Error;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match self.stream.read(buf) {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(0),
            Err(_) => Err(Error::ReadError),
        }
    }
}

impl Write for NetConnection {
    type Error = Error;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf).map_err(|_| Error::WriteError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush().map_err(|_| Error::WriteError)
    }
}

impl Close for NetConnection {
    type Error = Error;
    fn close(self) -> Result<(), Self::Error> {
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl Connection for NetConnection {}

struct TcpConnector;

impl Connect for TcpConnector {
    type Connection = NetConnection;
    type Error = Error;
    fn connect(&mut self, remote: &str, port: u16) -> Result<Self::Connection, Self::Error> {
        let stream =
            TcpStream::connect((remote, port)).map_err(|_| Error::ConnectionRefused)?;
        stream
            .set_read_timeout(Some(Duration::from_millis(50)))
            .map_err(|_| Error::ConnectionRefused)?;
        Ok(NetConnection { stream })
    }
}

fn broker() -> (String, u16) {
    dotenv().ok();
    let address =
        env::var("TEST_MQTT_ADDRESS").unwrap_or("test.mosquitto.org:1883".to_string());
    let (host, port) = address.rsplit_once(':').expect("address is host:port");
    (host.to_string(), port.parse().expect("port is a number"))
}

fn now(origin: StdInstant) -> Instant {
    Instant::from_millis(origin.elapsed().as_millis() as u64)
}

/// Polls until `want` matches an event or five seconds pass. Every event
/// seen on the way is returned, the matching one last.
fn wait_for(
    session: &mut Client<TcpConnector>,
    origin: StdInstant,
    want: impl Fn(&Event) -> bool,
) -> Vec<Event> {
    let start = StdInstant::now();
    let mut seen = Vec::new();
    loop {
        if let Some(event) = session.poll(now(origin)).expect("Failed to poll") {
            let done = want(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "broker did not answer"
        );
    }
}

#[test]
#[ignore]
fn test_round_trip_through_broker() {
    let (host, port) = broker();
    let origin = StdInstant::now();
    let mut session = Client::new(TcpConnector);
    let options = Options {
        client_id: "iothub-device-broker-test",
        username: None,
        password: None,
        keep_alive_seconds: 30,
        clean_session: true,
    };
    session
        .connect(&host, port, &options, now(origin))
        .expect("Failed to connect");

    let seen = wait_for(&mut session, origin, |e| matches!(e, Event::ConnAck { .. }));
    assert!(matches!(
        seen.last(),
        Some(Event::ConnAck {
            code: ConnectReturnCode::Accepted,
            ..
        })
    ));

    let topic = "iothub-device/test/round-trip";
    session
        .subscribe(1, &[(topic, QoS::AtLeastOnce)])
        .expect("Failed to subscribe");
    wait_for(&mut session, origin, |e| matches!(e, Event::SubAck { packet_id: 1, .. }));

    session
        .publish(topic, b"ping", QoS::AtLeastOnce, 2, false)
        .expect("Failed to publish");
    // The echo and the PUBACK may arrive in either order.
    let mut seen = wait_for(&mut session, origin, |e| {
        matches!(e, Event::PubAck(2) | Event::Publish(_))
    });
    if !seen.iter().any(|e| matches!(e, Event::PubAck(2))) {
        seen.extend(wait_for(&mut session, origin, |e| matches!(e, Event::PubAck(2))));
    }
    let echo = seen
        .iter()
        .find_map(|e| match e {
            Event::Publish(p) => Some(p.clone()),
            _ => None,
        })
        .or_else(|| {
            wait_for(&mut session, origin, |e| matches!(e, Event::Publish(_)))
                .into_iter()
                .find_map(|e| match e {
                    Event::Publish(p) => Some(p),
                    _ => None,
                })
        })
        .expect("no echo");
    assert_eq!(echo.topic, topic);
    assert_eq!(echo.payload, b"ping");

    session.disconnect();
    assert!(!session.is_connected());
}
