//! Non-blocking MQTT 3.1.1 session for embedded systems.
//!
//! The session owns one [`Connect`] implementation and, while connected, the
//! [`Connection`](crate::network::Connection) it produced. Nothing in here
//! waits for the broker: [`Session::connect`] only writes CONNECT, and the
//! CONNACK (like every other inbound packet) surfaces later from
//! [`Session::poll`] as an [`Event`]. This lets the caller interleave network
//! progress with its own timeout bookkeeping inside one cooperative loop.
//!
//! # Features
//!
//! - CONNECT with username/password and keep-alive
//! - QoS 0 and QoS 1 publish, with automatic PUBACK for inbound QoS 1
//! - Multi-filter SUBSCRIBE and UNSUBSCRIBE
//! - PINGREQ scheduling and missing-PINGRESP detection
//! - Partial-read reassembly of inbound packets
//!
//! # Examples
//!
//! ```rust,no_run
//! use iothub_device::network::application::mqtt::{Client, Options, QoS, Session};
//! use iothub_device::time::Instant;
//! # use iothub_device::network::{Connect, Connection};
//! # struct MockConnection;
//! # impl Connection for MockConnection {}
//! # impl iothub_device::network::Read for MockConnection {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
//! # }
//! # impl iothub_device::network::Write for MockConnection {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl iothub_device::network::Close for MockConnection {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # struct MockNetwork;
//! # impl Connect for MockNetwork {
//! #     type Connection = MockConnection;
//! #     type Error = ();
//! #     fn connect(&mut self, _remote: &str, _port: u16) -> Result<MockConnection, ()> { Ok(MockConnection) }
//! # }
//!
//! let mut session = Client::new(MockNetwork);
//! let options = Options {
//!     client_id: "sensor_device_01",
//!     username: None,
//!     password: None,
//!     keep_alive_seconds: 60,
//!     clean_session: true,
//! };
//!
//! session.connect("broker.local", 1883, &options, Instant::ZERO).unwrap();
//! while let Ok(Some(event)) = session.poll(Instant::ZERO) {
//!     // react to ConnAck, PubAck, Publish...
//!     let _ = event;
//! }
//! ```

use crate::network::error::Error;
use crate::network::{Close, Connect, OptionValue, Read, Write};
use crate::time::Instant;
use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
const PUBACK: u8 = 0x40;
/// MQTT SUBSCRIBE packet type identifier.
const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
const SUBACK: u8 = 0x90;
/// MQTT UNSUBSCRIBE packet type identifier.
const UNSUBSCRIBE: u8 = 0xA2;
/// MQTT UNSUBACK packet type identifier.
const UNSUBACK: u8 = 0xB0;
/// MQTT PINGREQ packet type identifier.
const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by MQTT 3.1.1 specification
/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Largest inbound packet accepted; twin documents are capped well below this.
pub const MAX_PACKET_SIZE: usize = 256 * 1024;
/// Most filters carried by one SUBSCRIBE.
pub const MAX_FILTERS: usize = 8;

const READ_CHUNK: usize = 512;

/// Quality of Service levels for MQTT messages.
///
/// ```rust
/// use iothub_device::network::application::mqtt::QoS;
///
/// assert_eq!(QoS::AtMostOnce as u8, 0);
/// assert_eq!(QoS::AtLeastOnce as u8, 1);
/// ```
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// **QoS 0**: At most once delivery, no acknowledgement.
    AtMostOnce = 0,
    /// **QoS 1**: At least once delivery, acknowledged with PUBACK.
    AtLeastOnce = 1,
    /// **QoS 2**: Exactly once delivery. Not accepted by this session.
    ExactlyOnce = 2,
}

/// Configuration options for an MQTT connection.
#[derive(Debug, Clone)]
pub struct Options<'a> {
    /// The client identifier, unique within the broker.
    pub client_id: &'a str,
    /// Optional user name.
    pub username: Option<&'a str>,
    /// Optional password, sent only together with a user name.
    pub password: Option<&'a str>,
    /// The keep-alive interval in seconds; 0 disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Whether the broker should discard previous session state.
    pub clean_session: bool,
}

/// CONNACK return codes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted,
    /// The broker does not support MQTT 3.1.1.
    UnacceptableProtocolVersion,
    /// The client identifier is not allowed.
    IdentifierRejected,
    /// The service is unavailable.
    ServerUnavailable,
    /// The user name or password is malformed or wrong.
    BadUsernameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
}

impl ConnectReturnCode {
    fn from_u8(code: u8) -> Result<Self, Error> {
        Ok(match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUsernameOrPassword,
            5 => ConnectReturnCode::NotAuthorized,
            _ => return Err(Error::ProtocolError),
        })
    }
}

/// An incoming MQTT publish message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic on which the message was published.
    pub topic: String,
    /// The message payload data.
    pub payload: Vec<u8>,
    /// Delivery level chosen by the broker.
    pub qos: QoS,
    /// Packet identifier for QoS 1 deliveries.
    pub packet_id: Option<u16>,
}

/// Something the broker told us.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// Reply to CONNECT.
    ConnAck {
        /// Whether the broker resumed a stored session.
        session_present: bool,
        /// Outcome of the connection attempt.
        code: ConnectReturnCode,
    },
    /// A QoS 1 publish of ours was delivered.
    PubAck(u16),
    /// Reply to SUBSCRIBE, one return code per filter (0x80 marks a failure).
    SubAck {
        /// Identifier of the SUBSCRIBE being acknowledged.
        packet_id: u16,
        /// Granted QoS or failure code per filter, in request order.
        return_codes: heapless::Vec<u8, MAX_FILTERS>,
    },
    /// Reply to UNSUBSCRIBE.
    UnsubAck(u16),
    /// An inbound application message.
    Publish(PublishPacket),
    /// Reply to PINGREQ.
    PingResp,
}

/// The narrow interface the hub transport drives.
///
/// Anything that can connect, publish, subscribe and report inbound events
/// one at a time can stand in for [`Client`], which is what the transport
/// tests do with a scripted session.
pub trait Session {
    /// Opens the byte stream and writes CONNECT. The CONNACK arrives via [`Session::poll`].
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &Options<'_>,
        now: Instant,
    ) -> Result<(), Error>;

    /// Writes DISCONNECT if possible and closes the byte stream.
    fn disconnect(&mut self);

    /// Whether a byte stream is currently open.
    fn is_connected(&self) -> bool;

    /// Writes a PUBLISH. `packet_id` is ignored for QoS 0.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        packet_id: u16,
        dup: bool,
    ) -> Result<(), Error>;

    /// Writes a SUBSCRIBE carrying every filter.
    fn subscribe(&mut self, packet_id: u16, filters: &[(&str, QoS)]) -> Result<(), Error>;

    /// Writes an UNSUBSCRIBE carrying every filter.
    fn unsubscribe(&mut self, packet_id: u16, filters: &[&str]) -> Result<(), Error>;

    /// Makes one non-blocking step and returns at most one inbound event.
    ///
    /// Also schedules keep-alive pings; a missing PINGRESP is reported as
    /// [`Error::Timeout`].
    fn poll(&mut self, now: Instant) -> Result<Option<Event>, Error>;

    /// Forwards an option to the byte-stream layer.
    fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), Error>;

    /// Enables packet tracing; `raw` adds payload sizes.
    fn set_trace(&mut self, enabled: bool, raw: bool) {
        let _ = (enabled, raw);
    }
}

/// An MQTT 3.1.1 session over any [`Connect`] implementation.
pub struct Client<N: Connect> {
    connector: N,
    connection: Option<N::Connection>,
    rx: Vec<u8>,
    keep_alive: Duration,
    // Latest time seen through `connect` or `poll`.
    current: Instant,
    last_outbound: Instant,
    ping_sent: Option<Instant>,
    trace: bool,
    raw_trace: bool,
}

impl<N: Connect> core::fmt::Debug for Client<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.connection.is_some())
            .field("buffered", &self.rx.len())
            .field("keep_alive", &self.keep_alive)
            .field("ping_sent", &self.ping_sent)
            .finish()
    }
}

impl<N: Connect> Client<N> {
    /// Creates a disconnected session that will open streams through `connector`.
    pub fn new(connector: N) -> Self {
        Self {
            connector,
            connection: None,
            rx: Vec::new(),
            keep_alive: Duration::ZERO,
            current: Instant::ZERO,
            last_outbound: Instant::ZERO,
            ping_sent: None,
            trace: false,
            raw_trace: false,
        }
    }

    /// The connector, e.g. to inspect it in tests.
    pub fn connector(&self) -> &N {
        &self.connector
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;
        let mut written = 0;
        while written < packet.len() {
            match connection.write(&packet[written..]) {
                Ok(0) => return Err(Error::WriteError),
                Ok(n) => written += n,
                Err(_) => return Err(Error::WriteError),
            }
        }
        connection.flush().map_err(|_| Error::WriteError)?;
        self.last_outbound = self.current;
        if self.trace {
            trace!("mqtt -> {:#04x} ({} bytes)", packet[0], packet.len());
        }
        Ok(())
    }

    fn keep_alive(&mut self, now: Instant) -> Result<(), Error> {
        if self.keep_alive.is_zero() {
            return Ok(());
        }
        match self.ping_sent {
            Some(sent) if now.saturating_duration_since(sent) >= self.keep_alive => {
                warn!("mqtt: no PINGRESP within {} s", self.keep_alive.as_secs());
                Err(Error::Timeout)
            }
            Some(_) => Ok(()),
            None if now.saturating_duration_since(self.last_outbound) >= self.keep_alive => {
                self.send(&[PINGREQ, 0x00])?;
                self.ping_sent = Some(now);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn fill(&mut self) -> Result<usize, Error> {
        let connection = self.connection.as_mut().ok_or(Error::NotOpen)?;
        let mut chunk = [0u8; READ_CHUNK];
        let n = connection.read(&mut chunk).map_err(|_| Error::ReadError)?;
        self.rx.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Pops one complete packet off the receive buffer, if there is one.
    fn next_packet(&mut self) -> Result<Option<(u8, Vec<u8>)>, Error> {
        let Some((remaining, header_len)) = decode_remaining_length(&self.rx)? else {
            return Ok(None);
        };
        if remaining > MAX_PACKET_SIZE {
            return Err(Error::BufferOverflow);
        }
        let total = header_len + remaining;
        if self.rx.len() < total {
            return Ok(None);
        }
        let header = self.rx[0];
        let body = self.rx[header_len..total].to_vec();
        self.rx.drain(..total);
        Ok(Some((header, body)))
    }

    fn handle_packet(&mut self, header: u8, body: &[u8]) -> Result<Event, Error> {
        if self.trace {
            trace!("mqtt <- {:#04x} ({} bytes)", header, body.len());
        }
        match header & 0xF0 {
            CONNACK => {
                if body.len() != 2 {
                    return Err(Error::ProtocolError);
                }
                Ok(Event::ConnAck {
                    session_present: body[0] & 0x01 != 0,
                    code: ConnectReturnCode::from_u8(body[1])?,
                })
            }
            PUBLISH => {
                let publish = parse_publish(header, body)?;
                if let Some(id) = publish.packet_id {
                    let [hi, lo] = id.to_be_bytes();
                    self.send(&[PUBACK, 0x02, hi, lo])?;
                }
                if self.raw_trace {
                    debug!(
                        "mqtt publish on {} ({} bytes)",
                        publish.topic.as_str(),
                        publish.payload.len()
                    );
                }
                Ok(Event::Publish(publish))
            }
            PUBACK => Ok(Event::PubAck(packet_id(body)?)),
            SUBACK => {
                let id = packet_id(body)?;
                let return_codes = heapless::Vec::from_slice(&body[2..])
                    .map_err(|_| Error::ProtocolError)?;
                Ok(Event::SubAck {
                    packet_id: id,
                    return_codes,
                })
            }
            UNSUBACK => Ok(Event::UnsubAck(packet_id(body)?)),
            PINGRESP => {
                self.ping_sent = None;
                Ok(Event::PingResp)
            }
            _ => Err(Error::ProtocolError),
        }
    }
}

impl<N: Connect> Session for Client<N> {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &Options<'_>,
        now: Instant,
    ) -> Result<(), Error> {
        if self.connection.is_some() {
            self.disconnect();
        }
        let connection = self.connector.connect(host, port).map_err(|e| {
            warn!("mqtt: cannot open {}:{}: {:?}", host, port, e);
            Error::ConnectionRefused
        })?;
        self.connection = Some(connection);
        self.current = now;
        self.rx.clear();
        self.ping_sent = None;
        self.keep_alive = Duration::from_secs(u64::from(options.keep_alive_seconds));

        // --- Variable Header ---
        let mut packet: Vec<u8> = Vec::new();
        put_bytes(&mut packet, PROTOCOL_NAME)?;
        packet.push(PROTOCOL_LEVEL);

        let mut connect_flags = 0;
        if options.clean_session {
            connect_flags |= 0x02;
        }
        if options.username.is_some() {
            connect_flags |= 0x80;
            if options.password.is_some() {
                connect_flags |= 0x40;
            }
        }
        packet.push(connect_flags);
        packet.extend_from_slice(&options.keep_alive_seconds.to_be_bytes());

        // --- Payload ---
        put_bytes(&mut packet, options.client_id.as_bytes())?;
        if let Some(username) = options.username {
            put_bytes(&mut packet, username.as_bytes())?;
            if let Some(password) = options.password {
                put_bytes(&mut packet, password.as_bytes())?;
            }
        }

        let framed = frame(CONNECT, &packet)?;
        if let Err(e) = self.send(&framed) {
            self.disconnect();
            return Err(e);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connection.is_some() {
            // Best effort; the stream may already be gone.
            let _ = self.send(&[DISCONNECT, 0x00]);
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                debug!("mqtt: close failed: {:?}", e);
            }
        }
        self.rx.clear();
        self.ping_sent = None;
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        packet_id: u16,
        dup: bool,
    ) -> Result<(), Error> {
        if qos == QoS::ExactlyOnce {
            return Err(Error::ProtocolError);
        }
        // --- Variable Header ---
        let mut packet: Vec<u8> = Vec::with_capacity(topic.len() + payload.len() + 4);
        put_bytes(&mut packet, topic.as_bytes())?;
        if qos == QoS::AtLeastOnce {
            packet.extend_from_slice(&packet_id.to_be_bytes());
        }

        // --- Payload ---
        packet.extend_from_slice(payload);

        // --- Fixed Header ---
        let mut flags = PUBLISH | ((qos as u8) << 1);
        if dup && qos == QoS::AtLeastOnce {
            flags |= 0x08;
        }
        let framed = frame(flags, &packet)?;
        self.send(&framed)
    }

    fn subscribe(&mut self, packet_id: u16, filters: &[(&str, QoS)]) -> Result<(), Error> {
        if filters.is_empty() || filters.len() > MAX_FILTERS {
            return Err(Error::ProtocolError);
        }
        // --- Variable Header (Packet Identifier) ---
        let mut packet: Vec<u8> = Vec::new();
        packet.extend_from_slice(&packet_id.to_be_bytes());

        // --- Payload ---
        for (filter, qos) in filters {
            put_bytes(&mut packet, filter.as_bytes())?;
            packet.push(*qos as u8);
        }

        let framed = frame(SUBSCRIBE, &packet)?;
        self.send(&framed)
    }

    fn unsubscribe(&mut self, packet_id: u16, filters: &[&str]) -> Result<(), Error> {
        if filters.is_empty() || filters.len() > MAX_FILTERS {
            return Err(Error::ProtocolError);
        }
        let mut packet: Vec<u8> = Vec::new();
        packet.extend_from_slice(&packet_id.to_be_bytes());
        for filter in filters {
            put_bytes(&mut packet, filter.as_bytes())?;
        }
        let framed = frame(UNSUBSCRIBE, &packet)?;
        self.send(&framed)
    }

    fn poll(&mut self, now: Instant) -> Result<Option<Event>, Error> {
        if self.connection.is_none() {
            return Err(Error::NotOpen);
        }
        self.current = now;
        if let Some((header, body)) = self.next_packet()? {
            return self.handle_packet(header, &body).map(Some);
        }
        if self.fill()? > 0 {
            if let Some((header, body)) = self.next_packet()? {
                return self.handle_packet(header, &body).map(Some);
            }
        }
        self.keep_alive(now)?;
        Ok(None)
    }

    fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), Error> {
        self.connector.set_option(name, value)
    }

    fn set_trace(&mut self, enabled: bool, raw: bool) {
        self.trace = enabled;
        self.raw_trace = raw;
    }
}

fn packet_id(body: &[u8]) -> Result<u16, Error> {
    match body {
        [hi, lo, ..] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::ProtocolError),
    }
}

fn parse_publish(header: u8, body: &[u8]) -> Result<PublishPacket, Error> {
    let qos = match (header >> 1) & 0x03 {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => return Err(Error::ProtocolError),
    };
    if body.len() < 2 {
        return Err(Error::ProtocolError);
    }
    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let mut offset = 2 + topic_len;
    let topic = body
        .get(2..offset)
        .and_then(|raw| core::str::from_utf8(raw).ok())
        .ok_or(Error::ProtocolError)?;
    let packet_id = if qos == QoS::AtLeastOnce {
        let id = packet_id(body.get(offset..).ok_or(Error::ProtocolError)?)?;
        offset += 2;
        Some(id)
    } else {
        None
    };
    Ok(PublishPacket {
        topic: String::from(topic),
        payload: body[offset..].to_vec(),
        qos,
        packet_id,
    })
}

/// Appends a length-prefixed MQTT string or binary field.
fn put_bytes(packet: &mut Vec<u8>, bytes: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(bytes.len()).map_err(|_| Error::BufferOverflow)?;
    packet.extend_from_slice(&len.to_be_bytes());
    packet.extend_from_slice(bytes);
    Ok(())
}

/// Prepends the fixed header to a packet body.
fn frame(first_byte: u8, body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut fixed_header: heapless::Vec<u8, 5> = heapless::Vec::new();
    fixed_header
        .push(first_byte)
        .map_err(|_| Error::BufferOverflow)?;
    encode_remaining_length(&mut fixed_header, body.len())?;
    let mut framed = Vec::with_capacity(fixed_header.len() + body.len());
    framed.extend_from_slice(&fixed_header);
    framed.extend_from_slice(body);
    Ok(framed)
}

/// Encode the remaining length field for an MQTT packet.
///
/// Up to 4 bytes, each carrying 7 bits of the length; the most significant
/// bit flags a continuation byte.
fn encode_remaining_length(buf: &mut heapless::Vec<u8, 5>, mut len: usize) -> Result<(), Error> {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.push(byte).map_err(|_| Error::BufferOverflow)?;
        if len == 0 {
            break;
        }
    }
    Ok(())
}

/// Decodes the remaining length that follows the first byte of `buf`.
///
/// Returns the length and the total fixed-header size, or `None` while the
/// header is still incomplete.
fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for i in 0..4 {
        let Some(&byte) = buf.get(1 + i) else {
            return Ok(None);
        };
        value += (byte as usize & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, 2 + i)));
        }
        multiplier *= 128;
    }
    Err(Error::ProtocolError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_length_round_trips_boundaries() {
        for len in [0usize, 127, 128, 16_383, 16_384, 2_097_151] {
            let mut buf: heapless::Vec<u8, 5> = heapless::Vec::new();
            buf.push(PUBLISH).unwrap();
            encode_remaining_length(&mut buf, len).unwrap();
            let (decoded, header_len) = decode_remaining_length(&buf).unwrap().unwrap();
            assert_eq!(decoded, len);
            assert_eq!(header_len, buf.len());
        }
    }

    #[test]
    fn incomplete_remaining_length_waits_for_more() {
        assert_eq!(decode_remaining_length(&[PUBLISH, 0x80]).unwrap(), None);
        assert_eq!(
            decode_remaining_length(&[PUBLISH, 0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(Error::ProtocolError)
        );
    }

    #[test]
    fn publish_with_qos1_carries_packet_id() {
        let mut body = Vec::new();
        put_bytes(&mut body, b"a/b").unwrap();
        body.extend_from_slice(&[0x00, 0x07]);
        body.extend_from_slice(b"hi");
        let packet = parse_publish(PUBLISH | 0x02, &body).unwrap();
        assert_eq!(packet.topic, "a/b");
        assert_eq!(packet.packet_id, Some(7));
        assert_eq!(packet.payload, b"hi");
    }

    #[test]
    fn qos2_publish_is_rejected() {
        let mut body = Vec::new();
        put_bytes(&mut body, b"t").unwrap();
        assert_eq!(
            parse_publish(PUBLISH | 0x04, &body),
            Err(Error::ProtocolError)
        );
    }
}
