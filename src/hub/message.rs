//! Telemetry and cloud-to-device messages.

use alloc::string::String;
use alloc::vec::Vec;

/// A message travelling between the device and the hub.
///
/// Outbound, the payload becomes the MQTT publish body and the properties
/// are appended to the telemetry topic. Inbound, the properties are parsed
/// back out of the devicebound topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    payload: Vec<u8>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    properties: Vec<(String, String)>,
}

impl Message {
    /// A message carrying `payload`.
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            ..Self::default()
        }
    }

    /// A message carrying UTF-8 text.
    pub fn from_text(text: &str) -> Self {
        Self::new(text.as_bytes())
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    /// Message id, `$.mid` on the wire.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Sets the message id.
    pub fn set_message_id(&mut self, id: &str) {
        self.message_id = Some(String::from(id));
    }

    /// Correlation id, `$.cid` on the wire.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Sets the correlation id.
    pub fn set_correlation_id(&mut self, id: &str) {
        self.correlation_id = Some(String::from(id));
    }

    /// Application properties in insertion order.
    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Looks up one application property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets a property, replacing an existing value for the same key.
    pub fn set_property(&mut self, key: &str, value: &str) {
        match self.properties.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = String::from(value),
            None => self
                .properties
                .push((String::from(key), String::from(value))),
        }
    }

    /// Builder form of [`Message::set_property`].
    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.set_property(key, value);
        self
    }
}

/// What the application did with an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Disposition {
    /// Processed; the hub may forget it.
    Accepted,
    /// Refused; not redelivered.
    Rejected,
    /// Not processed; may be redelivered.
    Abandoned,
}
