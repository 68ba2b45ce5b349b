//! MQTT transport state machine.
//!
//! ```text
//! CONNECT -> CONNACK -> SUBSCRIBE -> SUBACK -> PUBLISH
//!     ^                                          |
//!     +------------ DISCONNECT / ERROR <---------+   (from any state)
//! ```
//!
//! Each [`Transport::poll`] makes one pass: reconnect if the retry policy
//! allows, drain inbound packets, advance the subscription handshake, publish
//! queued telemetry, resend what the hub has not acknowledged within the
//! resend window and expire what ran past its deadline. The session and the
//! clock are owned by the transport, so nothing here is process-global.
//!
//! Telemetry is published at QoS 1 and tracked by packet id until PUBACK.
//! Twin requests are published at QoS 0 and correlated to their response by
//! `$rid`. A CONNACK refusing the credential stops automatic reconnection;
//! every other failure goes back through the retry policy, and subscriptions
//! that were active are restored after the next CONNACK.

use super::{
    ConfirmationResult, ConnectionStatus, ConnectionStatusReason, IdentityType, PendingEvent,
    ProcessResult, SendStatus, Transport, TwinItem, TwinItemKind, UpperLayer,
};
use crate::hub::config::{ClientConfig, Credential, DeviceConfig};
use crate::hub::error::ClientError;
use crate::hub::message::{Disposition, Message};
use crate::hub::retry::{RetryPolicy, RetryState};
use crate::hub::sas::{self, DEFAULT_TOKEN_LIFETIME, SasToken};
use crate::hub::topics::{self, Inbound, Topic};
use crate::network::OptionValue;
use crate::network::application::mqtt::{
    ConnectReturnCode, Event, Options, PublishPacket, QoS, Session,
};
use crate::time::{Clock, Instant};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

/// MQTT over TLS.
pub const MQTT_TLS_PORT: u16 = 8883;
/// Keep-alive used until the `keepalive` option says otherwise.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 240;
/// How long a publish may stay unacknowledged before it is sent again.
pub const RESEND_WINDOW: Duration = Duration::from_secs(60);
/// Resends allowed before a publish is failed.
pub const MAX_RESEND_COUNT: u8 = 2;
/// Sent in place of a method status that is not three digits.
pub const METHOD_FAILED_STATUS: i32 = 500;
/// How long the hub has to answer CONNECT before the attempt is abandoned.
pub const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_TYPE: &str = concat!("iothubclient%2F", env!("CARGO_PKG_VERSION"));

// Bound on inbound packets handled per poll so one call cannot spin forever.
const MAX_EVENTS_PER_POLL: usize = 32;

/// Phase of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttState {
    /// Not connected; the next permitted attempt sends CONNECT.
    Connect,
    /// CONNECT sent, waiting for CONNACK.
    Connack,
    /// Connected; subscriptions still to be sent.
    Subscribe,
    /// SUBSCRIBE sent, waiting for SUBACK.
    Suback,
    /// Steady state.
    Publish,
    /// Disconnected on purpose (option change, token renewal).
    Disconnect,
    /// Disconnected by a failure.
    Error,
}

/// Topic groups, as a bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Topics(u8);

impl Topics {
    const NONE: Topics = Topics(0);
    const MESSAGES: Topics = Topics(0x01);
    const TWIN: Topics = Topics(0x02 | 0x04);
    const METHODS: Topics = Topics(0x08);

    const TWIN_RESPONSE: u8 = 0x02;
    const TWIN_DESIRED: u8 = 0x04;

    fn contains(self, other: Topics) -> bool {
        self.0 & other.0 == other.0
    }

    fn has_bit(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn insert(&mut self, other: Topics) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: Topics) {
        self.0 &= !other.0;
    }

    fn is_empty(self) -> bool {
        self.0 == 0
    }
}

struct InFlight {
    event: PendingEvent,
    packet_id: u16,
    published_at: Instant,
    resends: u8,
}

struct TwinRequest {
    item_id: u32,
    kind: TwinItemKind,
    request_id: u16,
    payload: Vec<u8>,
    published_at: Instant,
    resends: u8,
}

type Status = (ConnectionStatus, ConnectionStatusReason);

/// The MQTT transport, generic over the MQTT session and the clock.
pub struct MqttTransport<S: Session, C: Clock> {
    session: S,
    clock: C,
    host_name: String,
    connect_host: String,
    port: u16,
    device_id: String,
    credential: Credential,
    username: String,
    sas_token: Option<SasToken>,
    registered: bool,
    state: MqttState,
    recoverable: bool,
    // Groups the application asked for, and the subset not yet subscribed.
    wanted: Topics,
    pending: Topics,
    awaiting_suback: Option<(u16, Topics)>,
    connect_sent_at: Instant,
    keep_alive_secs: u16,
    last_packet_id: u16,
    in_flight: Vec<InFlight>,
    twin_requests: Vec<TwinRequest>,
    retry: RetryState,
    reported: Option<Status>,
    unreported: Vec<Status>,
    log_trace: bool,
    raw_trace: bool,
}

impl<S: Session, C: Clock> core::fmt::Debug for MqttTransport<S, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("state", &self.state)
            .field("recoverable", &self.recoverable)
            .field("in_flight", &self.in_flight.len())
            .field("twin_requests", &self.twin_requests.len())
            .finish()
    }
}

impl<S: Session, C: Clock> MqttTransport<S, C> {
    /// Creates a transport for the device in `config`.
    ///
    /// The device still has to be registered before the transport connects.
    pub fn create(config: &ClientConfig, session: S, clock: C) -> Result<Self, ClientError> {
        config.validate()?;
        let host_name = config.host_name();
        let username = format!(
            "{}/{}/DeviceClientType={}",
            host_name, config.device_id, CLIENT_TYPE
        );
        let seed = clock.now().as_millis() ^ clock.unix_time().unwrap_or(0);
        info!(
            "mqtt transport for {} via {}",
            host_name.as_str(),
            config.connect_host().as_str()
        );
        Ok(Self {
            session,
            clock,
            connect_host: config.connect_host(),
            host_name,
            port: MQTT_TLS_PORT,
            device_id: config.device_id.clone(),
            credential: config.credential.clone(),
            username,
            sas_token: None,
            registered: false,
            state: MqttState::Connect,
            recoverable: true,
            wanted: Topics::NONE,
            pending: Topics::NONE,
            awaiting_suback: None,
            connect_sent_at: Instant::ZERO,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            last_packet_id: 0,
            in_flight: Vec::new(),
            twin_requests: Vec::new(),
            retry: RetryState::new(RetryPolicy::ExponentialBackoffWithJitter, 0, seed),
            reported: None,
            unreported: Vec::new(),
            log_trace: false,
            raw_trace: false,
        })
    }

    /// Connects to `port` instead of the MQTT/TLS default.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Current connection phase.
    pub fn state(&self) -> MqttState {
        self.state
    }

    /// `false` once the hub refused the credential.
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// The MQTT user name sent with CONNECT.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The underlying MQTT session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Mutable access to the MQTT session.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Reconnection bookkeeping.
    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// 16-bit ids skip 0 and wrap to 1 before `u16::MAX`.
    fn next_packet_id(&mut self) -> u16 {
        self.last_packet_id = if self.last_packet_id >= u16::MAX - 1 {
            1
        } else {
            self.last_packet_id + 1
        };
        self.last_packet_id
    }

    fn report(&mut self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        self.unreported.push((status, reason));
    }

    fn flush_status(&mut self, upper: &mut dyn UpperLayer) {
        for status in core::mem::take(&mut self.unreported) {
            if self.reported != Some(status) {
                self.reported = Some(status);
                upper.connection_status(status.0, status.1);
            }
        }
    }

    fn is_connected_state(&self) -> bool {
        matches!(
            self.state,
            MqttState::Connack | MqttState::Subscribe | MqttState::Suback | MqttState::Publish
        )
    }

    /// Closes the session and schedules a full resubscription.
    fn reset_connection(&mut self, state: MqttState) {
        self.session.disconnect();
        self.state = state;
        self.pending = self.wanted;
        self.awaiting_suback = None;
    }

    fn connection_lost(&mut self, reason: ConnectionStatusReason) {
        warn!("mqtt connection lost in {:?}: {:?}", self.state, reason);
        self.reset_connection(MqttState::Error);
        self.report(ConnectionStatus::Unauthenticated, reason);
    }

    fn password(&mut self, now: Instant) -> Result<Option<String>, ConnectionStatusReason> {
        match &self.credential {
            Credential::DeviceKey(key) => {
                if let Some(token) = self.sas_token.as_ref().filter(|t| !t.needs_refresh(now)) {
                    return Ok(Some(String::from(token.as_str())));
                }
                let Some(unix_now) = self.clock.unix_time() else {
                    error!("no wall-clock time, cannot sign a SAS token");
                    return Err(ConnectionStatusReason::CommunicationError);
                };
                let resource = sas::resource_uri(&self.host_name, &self.device_id);
                let token = SasToken::issue(key, &resource, unix_now, now, DEFAULT_TOKEN_LIFETIME)
                    .map_err(|_| ConnectionStatusReason::CommunicationError)?;
                let password = String::from(token.as_str());
                self.sas_token = Some(token);
                Ok(Some(password))
            }
            Credential::SasToken(token) => {
                let expiry = sas::expiry_of(token);
                if let (Some(expiry), Some(unix_now)) = (expiry, self.clock.unix_time()) {
                    if unix_now > expiry {
                        return Err(ConnectionStatusReason::ExpiredSasToken);
                    }
                }
                Ok(Some(token.clone()))
            }
            Credential::X509 => Ok(None),
        }
    }

    fn user_token_expired(&self) -> bool {
        match (&self.credential, self.clock.unix_time()) {
            (Credential::SasToken(token), Some(unix_now)) => {
                sas::expiry_of(token).is_some_and(|expiry| unix_now > expiry)
            }
            _ => false,
        }
    }

    fn start_connect(&mut self, now: Instant) {
        let password = match self.password(now) {
            Ok(password) => password,
            Err(reason) => {
                if reason == ConnectionStatusReason::ExpiredSasToken {
                    error!("supplied SAS token has expired");
                    self.recoverable = false;
                }
                self.state = MqttState::Error;
                self.report(ConnectionStatus::Unauthenticated, reason);
                return;
            }
        };
        let options = Options {
            client_id: &self.device_id,
            username: Some(&self.username),
            password: password.as_deref(),
            keep_alive_seconds: self.keep_alive_secs,
            clean_session: false,
        };
        debug!(
            "mqtt connect to {}:{} (attempt {})",
            self.connect_host.as_str(),
            self.port,
            self.retry.attempts()
        );
        match self
            .session
            .connect(&self.connect_host, self.port, &options, now)
        {
            Ok(()) => {
                self.state = MqttState::Connack;
                self.connect_sent_at = now;
            }
            Err(e) => {
                warn!("mqtt connect failed: {:?}", e);
                self.state = MqttState::Error;
                self.report(
                    ConnectionStatus::Unauthenticated,
                    ConnectionStatusReason::NoNetwork,
                );
            }
        }
    }

    fn pump(&mut self, now: Instant, upper: &mut dyn UpperLayer) {
        for _ in 0..MAX_EVENTS_PER_POLL {
            match self.session.poll(now) {
                Ok(Some(event)) => self.handle_event(event, now, upper),
                Ok(None) => break,
                Err(e) => {
                    warn!("mqtt poll failed: {:?}", e);
                    self.connection_lost(ConnectionStatusReason::NoNetwork);
                    break;
                }
            }
            if !self.session.is_connected() {
                break;
            }
        }
    }

    fn handle_event(&mut self, event: Event, now: Instant, upper: &mut dyn UpperLayer) {
        match event {
            Event::ConnAck { code, .. } => self.on_connack(code, now),
            Event::PubAck(packet_id) => {
                match self.in_flight.iter().position(|f| f.packet_id == packet_id) {
                    Some(pos) => {
                        let flight = self.in_flight.remove(pos);
                        upper.event_complete(flight.event, ConfirmationResult::Ok);
                    }
                    None => debug!("PUBACK for unknown packet {}", packet_id),
                }
            }
            Event::SubAck {
                packet_id,
                return_codes,
            } => match self.awaiting_suback {
                Some((expected, _)) if expected == packet_id => {
                    for code in return_codes.iter().filter(|c| **c & 0x80 != 0) {
                        error!("subscription refused by hub (code {:#04x})", *code);
                    }
                    self.awaiting_suback = None;
                    if self.state == MqttState::Suback {
                        info!("mqtt subscribed, publishing");
                        self.state = MqttState::Publish;
                    }
                }
                _ => debug!("SUBACK for unknown packet {}", packet_id),
            },
            Event::UnsubAck(packet_id) => debug!("UNSUBACK {}", packet_id),
            Event::PingResp => trace!("PINGRESP"),
            Event::Publish(packet) => self.dispatch(packet, upper),
        }
    }

    fn on_connack(&mut self, code: ConnectReturnCode, now: Instant) {
        if self.state != MqttState::Connack {
            debug!("unexpected CONNACK in {:?}", self.state);
        }
        match code {
            ConnectReturnCode::Accepted => {
                info!("mqtt connected to {}", self.connect_host.as_str());
                self.retry.stop(now);
                self.state = MqttState::Subscribe;
                self.pending = self.wanted;
                self.awaiting_suback = None;
                self.report(ConnectionStatus::Authenticated, ConnectionStatusReason::Ok);
            }
            ConnectReturnCode::BadUsernameOrPassword => {
                error!("hub refused the credential, not reconnecting");
                self.recoverable = false;
                let reason = if self.user_token_expired() {
                    ConnectionStatusReason::ExpiredSasToken
                } else {
                    ConnectionStatusReason::BadCredential
                };
                self.reset_connection(MqttState::Error);
                self.report(ConnectionStatus::Unauthenticated, reason);
            }
            ConnectReturnCode::NotAuthorized => {
                warn!("hub refused the device as not authorized");
                self.reset_connection(MqttState::Error);
                self.report(
                    ConnectionStatus::Unauthenticated,
                    ConnectionStatusReason::DeviceDisabled,
                );
            }
            other => {
                warn!("hub refused the connection: {:?}", other);
                self.reset_connection(MqttState::Error);
                self.report(
                    ConnectionStatus::Unauthenticated,
                    ConnectionStatusReason::CommunicationError,
                );
            }
        }
    }

    fn dispatch(&mut self, packet: PublishPacket, upper: &mut dyn UpperLayer) {
        if self.raw_trace {
            debug!(
                "inbound {} ({} bytes)",
                packet.topic.as_str(),
                packet.payload.len()
            );
        }
        match topics::classify(&packet.topic) {
            Ok(Inbound::TwinResponse { status, request_id }) => {
                match self
                    .twin_requests
                    .iter()
                    .position(|r| r.request_id == request_id)
                {
                    Some(pos) => {
                        let request = self.twin_requests.remove(pos);
                        upper.twin_response(request.item_id, status, &packet.payload);
                    }
                    None => warn!("twin response for unknown $rid {}", request_id),
                }
            }
            Ok(Inbound::TwinDesired) => upper.twin_desired(&packet.payload),
            Ok(Inbound::Method { name, request_id }) => {
                let response = upper.method_invoked(name, &packet.payload);
                let status = if (100..=999).contains(&response.status) {
                    response.status
                } else {
                    warn!("method {} returned status {}, answering 500", name, response.status);
                    METHOD_FAILED_STATUS
                };
                let topic = match topics::method_response(status, request_id) {
                    Ok(topic) => topic,
                    Err(e) => {
                        error!("cannot build method response topic: {:?}", e);
                        return;
                    }
                };
                if let Err(e) =
                    self.session
                        .publish(&topic, &response.payload, QoS::AtMostOnce, 0, false)
                {
                    warn!("method response publish failed: {:?}", e);
                    self.connection_lost(ConnectionStatusReason::NoNetwork);
                }
            }
            Ok(Inbound::Message { properties }) => {
                let mut message = Message::new(&packet.payload);
                topics::apply_properties(properties, &mut message);
                let disposition = upper.message_received(message);
                if disposition != Disposition::Accepted {
                    warn!("message {:?}; MQTT cannot reject or abandon", disposition);
                }
            }
            Err(_) => warn!("unparseable inbound topic {}", packet.topic.as_str()),
        }
    }

    fn send_subscriptions(&mut self) {
        let groups = self.pending;
        if groups.is_empty() {
            return;
        }
        let devicebound = match topics::devicebound_filter(&self.device_id) {
            Ok(topic) => topic,
            Err(_) => Topic::new(),
        };
        let mut filters: heapless::Vec<(&str, QoS), 4> = heapless::Vec::new();
        if groups.contains(Topics::MESSAGES) && !devicebound.is_empty() {
            let _ = filters.push((devicebound.as_str(), QoS::AtLeastOnce));
        }
        if groups.has_bit(Topics::TWIN_RESPONSE) {
            let _ = filters.push((topics::TWIN_RESPONSE_FILTER, QoS::AtMostOnce));
        }
        if groups.has_bit(Topics::TWIN_DESIRED) {
            let _ = filters.push((topics::TWIN_DESIRED_FILTER, QoS::AtMostOnce));
        }
        if groups.contains(Topics::METHODS) {
            let _ = filters.push((topics::METHODS_FILTER, QoS::AtMostOnce));
        }
        let packet_id = self.next_packet_id();
        match self.session.subscribe(packet_id, &filters) {
            Ok(()) => {
                self.pending = Topics::NONE;
                self.awaiting_suback = Some((packet_id, groups));
                if self.state == MqttState::Subscribe {
                    self.state = MqttState::Suback;
                }
            }
            Err(e) => {
                warn!("subscribe failed: {:?}", e);
                self.connection_lost(ConnectionStatusReason::NoNetwork);
            }
        }
    }

    fn send_unsubscribe(&mut self, filters: &[&str]) {
        if !self.is_connected_state() {
            return;
        }
        let packet_id = self.next_packet_id();
        if let Err(e) = self.session.unsubscribe(packet_id, filters) {
            warn!("unsubscribe failed: {:?}", e);
        }
    }

    fn publish_waiting(&mut self, now: Instant, upper: &mut dyn UpperLayer) {
        while let Some(event) = upper.next_event() {
            let topic = match topics::telemetry_with_properties(&self.device_id, &event.message) {
                Ok(topic) => topic,
                Err(e) => {
                    error!("cannot build telemetry topic: {:?}", e);
                    upper.event_complete(event, ConfirmationResult::Error);
                    continue;
                }
            };
            let packet_id = self.next_packet_id();
            let result = self.session.publish(
                &topic,
                event.message.payload(),
                QoS::AtLeastOnce,
                packet_id,
                false,
            );
            // Tracked either way; a failed write is retried after reconnection.
            self.in_flight.push(InFlight {
                event,
                packet_id,
                published_at: now,
                resends: 0,
            });
            if let Err(e) = result {
                warn!("telemetry publish failed: {:?}", e);
                self.connection_lost(ConnectionStatusReason::NoNetwork);
                break;
            }
        }
    }

    fn expire_in_flight(&mut self, now: Instant, upper: &mut dyn UpperLayer) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if self.in_flight[i].event.deadline.is_expired(now) {
                let flight = self.in_flight.remove(i);
                debug!("message {} timed out awaiting PUBACK", flight.packet_id);
                upper.event_complete(flight.event, ConfirmationResult::Timeout);
            } else {
                i += 1;
            }
        }
    }

    fn resend_telemetry(&mut self, now: Instant, upper: &mut dyn UpperLayer) {
        let mut i = 0;
        while i < self.in_flight.len() {
            if now.saturating_duration_since(self.in_flight[i].published_at) < RESEND_WINDOW {
                i += 1;
                continue;
            }
            if self.in_flight[i].resends >= MAX_RESEND_COUNT {
                let flight = self.in_flight.remove(i);
                warn!("message {} unacknowledged after resends", flight.packet_id);
                upper.event_complete(flight.event, ConfirmationResult::Error);
                continue;
            }
            let flight = &mut self.in_flight[i];
            let topic =
                match topics::telemetry_with_properties(&self.device_id, &flight.event.message) {
                    Ok(topic) => topic,
                    Err(_) => {
                        i += 1;
                        continue;
                    }
                };
            flight.resends += 1;
            flight.published_at = now;
            let result = self.session.publish(
                &topic,
                flight.event.message.payload(),
                QoS::AtLeastOnce,
                flight.packet_id,
                true,
            );
            if let Err(e) = result {
                warn!("telemetry resend failed: {:?}", e);
                self.connection_lost(ConnectionStatusReason::NoNetwork);
                return;
            }
            i += 1;
        }
    }

    fn twin_topic(kind: TwinItemKind, request_id: u16) -> Result<Topic, ClientError> {
        match kind {
            TwinItemKind::GetTwin => topics::twin_get(request_id),
            TwinItemKind::ReportedState => topics::twin_reported(request_id),
        }
    }

    fn resend_twin(&mut self, now: Instant, upper: &mut dyn UpperLayer) {
        let mut i = 0;
        while i < self.twin_requests.len() {
            if now.saturating_duration_since(self.twin_requests[i].published_at) < RESEND_WINDOW {
                i += 1;
                continue;
            }
            if self.twin_requests[i].resends >= MAX_RESEND_COUNT {
                let request = self.twin_requests.remove(i);
                warn!("twin item {} got no response", request.item_id);
                upper.twin_abandoned(request.item_id);
                continue;
            }
            let request = &mut self.twin_requests[i];
            let Ok(topic) = Self::twin_topic(request.kind, request.request_id) else {
                i += 1;
                continue;
            };
            request.resends += 1;
            request.published_at = now;
            if let Err(e) =
                self.session
                    .publish(&topic, &request.payload, QoS::AtMostOnce, 0, false)
            {
                warn!("twin resend failed: {:?}", e);
                self.connection_lost(ConnectionStatusReason::NoNetwork);
                return;
            }
            i += 1;
        }
    }

    fn token_needs_renewal(&self, now: Instant) -> bool {
        matches!(self.credential, Credential::DeviceKey(_))
            && self
                .sas_token
                .as_ref()
                .is_some_and(|token| token.needs_refresh(now))
    }
}

impl<S: Session, C: Clock> Transport for MqttTransport<S, C> {
    fn destroy(mut self) {
        if !self.in_flight.is_empty() {
            warn!("destroying transport with {} unacknowledged messages", self.in_flight.len());
        }
        self.session.disconnect();
        info!("mqtt transport for {} destroyed", self.host_name.as_str());
    }

    fn register(&mut self, device: &DeviceConfig<'_>) -> Result<(), ClientError> {
        if self.registered {
            return Err(ClientError::AlreadyRegistered);
        }
        if device.device_id != self.device_id {
            error!("registration device id does not match transport");
            return Err(ClientError::InvalidArgument);
        }
        if device.credential()? != self.credential {
            error!("registration credential does not match transport");
            return Err(ClientError::InvalidArgument);
        }
        self.registered = true;
        self.state = MqttState::Connect;
        self.recoverable = true;
        Ok(())
    }

    fn unregister(&mut self, upper: &mut dyn UpperLayer) {
        if !self.registered {
            return;
        }
        for flight in self.in_flight.drain(..) {
            upper.event_complete(flight.event, ConfirmationResult::Destroyed);
        }
        self.twin_requests.clear();
        self.wanted = Topics::NONE;
        self.reset_connection(MqttState::Connect);
        self.sas_token = None;
        self.reported = None;
        self.unreported.clear();
        self.registered = false;
    }

    fn subscribe(&mut self) -> Result<(), ClientError> {
        if !self.registered {
            return Err(ClientError::OperationFailed);
        }
        if !self.wanted.contains(Topics::MESSAGES) {
            self.wanted.insert(Topics::MESSAGES);
            self.pending.insert(Topics::MESSAGES);
        }
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if !self.wanted.contains(Topics::MESSAGES) {
            return;
        }
        self.wanted.remove(Topics::MESSAGES);
        self.pending.remove(Topics::MESSAGES);
        if let Ok(filter) = topics::devicebound_filter(&self.device_id) {
            self.send_unsubscribe(&[filter.as_str()]);
        }
    }

    fn subscribe_device_twin(&mut self) -> Result<(), ClientError> {
        if !self.registered {
            return Err(ClientError::OperationFailed);
        }
        if !self.wanted.contains(Topics::TWIN) {
            self.wanted.insert(Topics::TWIN);
            self.pending.insert(Topics::TWIN);
        }
        Ok(())
    }

    fn unsubscribe_device_twin(&mut self) {
        if !self.wanted.contains(Topics::TWIN) {
            return;
        }
        self.wanted.remove(Topics::TWIN);
        self.pending.remove(Topics::TWIN);
        self.send_unsubscribe(&[topics::TWIN_RESPONSE_FILTER, topics::TWIN_DESIRED_FILTER]);
    }

    fn subscribe_device_method(&mut self) -> Result<(), ClientError> {
        if !self.registered {
            return Err(ClientError::OperationFailed);
        }
        if !self.wanted.contains(Topics::METHODS) {
            self.wanted.insert(Topics::METHODS);
            self.pending.insert(Topics::METHODS);
        }
        Ok(())
    }

    fn unsubscribe_device_method(&mut self) {
        if !self.wanted.contains(Topics::METHODS) {
            return;
        }
        self.wanted.remove(Topics::METHODS);
        self.pending.remove(Topics::METHODS);
        self.send_unsubscribe(&[topics::METHODS_FILTER]);
    }

    fn process_item(&mut self, identity: IdentityType, item: &TwinItem<'_>) -> ProcessResult {
        if identity != IdentityType::DeviceTwin {
            return ProcessResult::Continue;
        }
        if self.state != MqttState::Publish {
            return ProcessResult::NotConnected;
        }
        let request_id = self.next_packet_id();
        let topic = match Self::twin_topic(item.kind, request_id) {
            Ok(topic) => topic,
            Err(e) => {
                error!("cannot build twin topic: {:?}", e);
                return ProcessResult::Error;
            }
        };
        let payload: &[u8] = match item.kind {
            TwinItemKind::ReportedState => item.payload,
            TwinItemKind::GetTwin => &[],
        };
        if let Err(e) = self
            .session
            .publish(&topic, payload, QoS::AtMostOnce, 0, false)
        {
            warn!("twin publish failed: {:?}", e);
            self.connection_lost(ConnectionStatusReason::NoNetwork);
            return ProcessResult::NotConnected;
        }
        self.twin_requests.push(TwinRequest {
            item_id: item.item_id,
            kind: item.kind,
            request_id,
            payload: payload.to_vec(),
            published_at: self.clock.now(),
            resends: 0,
        });
        ProcessResult::Ok
    }

    fn poll(&mut self, upper: &mut dyn UpperLayer) {
        if !self.registered {
            return;
        }
        let now = self.clock.now();

        if matches!(
            self.state,
            MqttState::Connect | MqttState::Disconnect | MqttState::Error
        ) && self.recoverable
        {
            if self.retry.can_retry(now) {
                self.start_connect(now);
            } else if self.retry.is_expired() {
                self.report(
                    ConnectionStatus::Unauthenticated,
                    ConnectionStatusReason::RetryExpired,
                );
            }
        }

        if self.session.is_connected() {
            self.pump(now, upper);
        }
        if self.state == MqttState::Connack
            && now.saturating_duration_since(self.connect_sent_at) >= CONNACK_TIMEOUT
        {
            warn!("no CONNACK within {} s", CONNACK_TIMEOUT.as_secs());
            self.connection_lost(ConnectionStatusReason::NoNetwork);
        }
        self.expire_in_flight(now, upper);

        if self.state == MqttState::Subscribe {
            if self.pending.is_empty() {
                self.state = MqttState::Publish;
            } else {
                self.send_subscriptions();
            }
        }
        if self.state == MqttState::Publish {
            if self.token_needs_renewal(now) {
                info!("SAS token due for renewal, reconnecting");
                self.reset_connection(MqttState::Disconnect);
                self.retry.stop(now);
            } else {
                if !self.pending.is_empty() && self.awaiting_suback.is_none() {
                    self.send_subscriptions();
                }
                if self.state == MqttState::Publish {
                    self.publish_waiting(now, upper);
                }
                if self.state == MqttState::Publish {
                    self.resend_telemetry(now, upper);
                }
                if self.state == MqttState::Publish {
                    self.resend_twin(now, upper);
                }
            }
        }

        self.flush_status(upper);
    }

    fn send_status(&self) -> SendStatus {
        if self.in_flight.is_empty() {
            SendStatus::Idle
        } else {
            SendStatus::Busy
        }
    }

    fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), ClientError> {
        match name {
            "keepalive" => {
                let secs = value
                    .as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or(ClientError::InvalidArgument)?;
                if secs != self.keep_alive_secs {
                    self.keep_alive_secs = secs;
                    if self.is_connected_state() {
                        info!("keep-alive changed to {} s, reconnecting", secs);
                        self.reset_connection(MqttState::Disconnect);
                        self.retry.stop(self.clock.now());
                    }
                }
                Ok(())
            }
            "logtrace" => {
                self.log_trace = value.as_bool().ok_or(ClientError::InvalidArgument)?;
                self.session.set_trace(self.log_trace, self.raw_trace);
                Ok(())
            }
            "rawlogtrace" => {
                self.raw_trace = value.as_bool().ok_or(ClientError::InvalidArgument)?;
                self.session.set_trace(self.log_trace, self.raw_trace);
                Ok(())
            }
            "x509certificate" | "x509privatekey" => {
                if self.credential != Credential::X509 {
                    error!("{} requires X.509 authentication", name);
                    return Err(ClientError::InvalidArgument);
                }
                value.as_str().ok_or(ClientError::InvalidArgument)?;
                self.session.set_option(name, value).map_err(ClientError::from)
            }
            _ => self.session.set_option(name, value).map_err(ClientError::from),
        }
    }

    fn set_retry_policy(
        &mut self,
        policy: RetryPolicy,
        timeout_limit_secs: u64,
    ) -> Result<(), ClientError> {
        let seed = self.clock.now().as_millis() ^ u64::from(self.last_packet_id);
        self.retry = RetryState::new(policy, timeout_limit_secs, seed);
        Ok(())
    }

    fn hostname(&self) -> &str {
        &self.host_name
    }
}
