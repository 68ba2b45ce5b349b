//! Shared fixtures: a scripted MQTT session and a device configuration.

#![allow(dead_code)]

use iothub_device::hub::config::ClientConfig;
use iothub_device::network::OptionValue;
use iothub_device::network::application::mqtt::{
    ConnectReturnCode, Event, Options, PublishPacket, QoS, Session,
};
use iothub_device::network::error::Error;
use iothub_device::time::Instant;
use std::cell::{RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::Rc;

pub const HUB: &str = "myhub";
pub const SUFFIX: &str = "azure-devices.net";
pub const DEVICE: &str = "dev1";
pub const KEY: &str = "ZGV2aWNlLXNlY3JldC1rZXktMDEyMzQ1Njc4OWFiY2Q=";
pub const UNIX_START: u64 = 1_700_000_000;

pub fn key_config() -> ClientConfig {
    ClientConfig::new(HUB, SUFFIX, DEVICE, Some(KEY), None).unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRecord {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_seconds: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub packet_id: u16,
    pub dup: bool,
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub connected: bool,
    pub refuse_connect: bool,
    pub fail_publish: bool,
    pub connects: Vec<ConnectRecord>,
    pub disconnects: usize,
    pub published: Vec<PublishRecord>,
    pub subscribed: Vec<(u16, Vec<String>)>,
    pub unsubscribed: Vec<(u16, Vec<String>)>,
    pub options: Vec<String>,
    pub trace: (bool, bool),
    pub inbound: VecDeque<Result<Event, Error>>,
}

/// A session that records what the transport sends and replays scripted
/// broker events. Clones share state, so a test keeps one handle after
/// moving another into the transport.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession(Rc<RefCell<SessionState>>);

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefMut<'_, SessionState> {
        self.0.borrow_mut()
    }

    pub fn push(&self, event: Event) {
        self.state().inbound.push_back(Ok(event));
    }

    pub fn push_error(&self, error: Error) {
        self.state().inbound.push_back(Err(error));
    }

    pub fn connack(&self, code: ConnectReturnCode) {
        self.push(Event::ConnAck {
            session_present: false,
            code,
        });
    }

    pub fn puback(&self, packet_id: u16) {
        self.push(Event::PubAck(packet_id));
    }

    /// Grants every filter of the most recent SUBSCRIBE.
    pub fn suback_last(&self) {
        let (packet_id, count) = {
            let state = self.state();
            let (id, filters) = state.subscribed.last().expect("no SUBSCRIBE sent");
            (*id, filters.len())
        };
        let return_codes = heapless::Vec::from_slice(&vec![0u8; count]).unwrap();
        self.push(Event::SubAck {
            packet_id,
            return_codes,
        });
    }

    pub fn inbound(&self, topic: &str, payload: &[u8]) {
        self.push(Event::Publish(PublishPacket {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: QoS::AtMostOnce,
            packet_id: None,
        }));
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects.len()
    }

    pub fn last_connect(&self) -> ConnectRecord {
        self.state().connects.last().cloned().expect("no CONNECT sent")
    }

    pub fn published(&self) -> Vec<PublishRecord> {
        self.state().published.clone()
    }

    pub fn published_to(&self, prefix: &str) -> Vec<PublishRecord> {
        self.published()
            .into_iter()
            .filter(|p| p.topic.starts_with(prefix))
            .collect()
    }

    pub fn subscribed_filters(&self) -> Vec<String> {
        self.state()
            .subscribed
            .iter()
            .flat_map(|(_, filters)| filters.iter().cloned())
            .collect()
    }
}

impl Session for ScriptedSession {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        options: &Options<'_>,
        _now: Instant,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(Error::ConnectionRefused);
        }
        state.connects.push(ConnectRecord {
            host: host.to_string(),
            port,
            client_id: options.client_id.to_string(),
            username: options.username.map(str::to_string),
            password: options.password.map(str::to_string),
            keep_alive_seconds: options.keep_alive_seconds,
            clean_session: options.clean_session,
        });
        state.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.state();
        if state.connected {
            state.disconnects += 1;
        }
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.0.borrow().connected
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        packet_id: u16,
        dup: bool,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotOpen);
        }
        if state.fail_publish {
            return Err(Error::WriteError);
        }
        state.published.push(PublishRecord {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            packet_id,
            dup,
        });
        Ok(())
    }

    fn subscribe(&mut self, packet_id: u16, filters: &[(&str, QoS)]) -> Result<(), Error> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotOpen);
        }
        state.subscribed.push((
            packet_id,
            filters.iter().map(|(f, _)| f.to_string()).collect(),
        ));
        Ok(())
    }

    fn unsubscribe(&mut self, packet_id: u16, filters: &[&str]) -> Result<(), Error> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotOpen);
        }
        state
            .unsubscribed
            .push((packet_id, filters.iter().map(|f| f.to_string()).collect()));
        Ok(())
    }

    fn poll(&mut self, _now: Instant) -> Result<Option<Event>, Error> {
        let mut state = self.state();
        if !state.connected {
            return Err(Error::NotOpen);
        }
        match state.inbound.pop_front() {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn set_option(&mut self, name: &str, _value: &OptionValue<'_>) -> Result<(), Error> {
        self.state().options.push(name.to_string());
        Ok(())
    }

    fn set_trace(&mut self, enabled: bool, raw: bool) {
        self.state().trace = (enabled, raw);
    }
}

/// `$rid` of a twin request topic.
pub fn request_id(topic: &str) -> u16 {
    topic
        .rsplit("$rid=")
        .next()
        .and_then(|rid| rid.parse().ok())
        .expect("topic has no $rid")
}
