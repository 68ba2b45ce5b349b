//! The hub's MQTT topic layout.
//!
//! | Purpose | Topic |
//! |---|---|
//! | Publish telemetry | `devices/{id}/messages/events/` |
//! | Subscribe inbound messages | `devices/{id}/messages/devicebound/#` |
//! | Subscribe twin responses | `$iothub/twin/res/#` |
//! | Subscribe desired-property patches | `$iothub/twin/PATCH/properties/desired/#` |
//! | Get full twin | `$iothub/twin/GET/?$rid={n}` |
//! | Send reported properties | `$iothub/twin/PATCH/properties/reported/?$rid={n}` |
//! | Subscribe methods | `$iothub/methods/POST/#` |
//! | Method response | `$iothub/methods/res/{status}/?$rid={n}` |
//!
//! These strings must match the service byte for byte.

use super::error::ClientError;
use super::message::Message;
use super::url;
use alloc::string::String;
use core::fmt::Write;

/// Capacity of a fixed topic string.
pub const TOPIC_CAPACITY: usize = 256;

/// A topic with no user payload in it.
pub type Topic = heapless::String<TOPIC_CAPACITY>;

/// Filter for twin GET/PATCH responses.
pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
/// Filter for desired-property notifications.
pub const TWIN_DESIRED_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
/// Filter for direct method invocations.
pub const METHODS_FILTER: &str = "$iothub/methods/POST/#";

const TWIN_PREFIX: &str = "$iothub/twin/";
const TWIN_DESIRED_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
const METHODS_PREFIX: &str = "$iothub/methods/POST/";
const DEVICEBOUND_MARKER: &str = "/messages/devicebound/";
const REQUEST_ID_KEY: &str = "$rid=";

const MESSAGE_ID_KEY: &str = "%24.mid";
const CORRELATION_ID_KEY: &str = "%24.cid";
const SYSTEM_PROPERTY_PREFIXES: [&str; 8] = [
    "%24.exp",
    "%24.mid",
    "%24.uid",
    "%24.to",
    "%24.cid",
    "devices/",
    "iothub-operation",
    "iothub-ack",
];

/// Maximum device id length accepted by the hub.
pub const MAX_DEVICE_ID_LEN: usize = 128;

fn format_topic(args: core::fmt::Arguments<'_>) -> Result<Topic, ClientError> {
    let mut topic = Topic::new();
    topic
        .write_fmt(args)
        .map_err(|_| ClientError::BufferTooSmall)?;
    Ok(topic)
}

/// `devices/{id}/messages/events/`
pub fn telemetry(device_id: &str) -> Result<Topic, ClientError> {
    format_topic(format_args!("devices/{}/messages/events/", device_id))
}

/// The telemetry topic followed by the message's ids and properties.
///
/// Properties are percent-encoded and joined as `k=v&k2=v2`.
pub fn telemetry_with_properties(
    device_id: &str,
    message: &Message,
) -> Result<String, ClientError> {
    let mut topic = String::from(telemetry(device_id)?.as_str());
    let mut first = true;
    let mut separator = |topic: &mut String| {
        if !first {
            topic.push('&');
        }
        first = false;
    };
    if let Some(id) = message.message_id() {
        separator(&mut topic);
        topic.push_str(MESSAGE_ID_KEY);
        topic.push('=');
        url::encode_into(&mut topic, id);
    }
    if let Some(id) = message.correlation_id() {
        separator(&mut topic);
        topic.push_str(CORRELATION_ID_KEY);
        topic.push('=');
        url::encode_into(&mut topic, id);
    }
    for (key, value) in message.properties() {
        separator(&mut topic);
        url::encode_into(&mut topic, key);
        topic.push('=');
        url::encode_into(&mut topic, value);
    }
    Ok(topic)
}

/// `devices/{id}/messages/devicebound/#`
pub fn devicebound_filter(device_id: &str) -> Result<Topic, ClientError> {
    format_topic(format_args!("devices/{}/messages/devicebound/#", device_id))
}

/// `$iothub/twin/GET/?$rid={n}`
pub fn twin_get(request_id: u16) -> Result<Topic, ClientError> {
    format_topic(format_args!("$iothub/twin/GET/?$rid={}", request_id))
}

/// `$iothub/twin/PATCH/properties/reported/?$rid={n}`
pub fn twin_reported(request_id: u16) -> Result<Topic, ClientError> {
    format_topic(format_args!(
        "$iothub/twin/PATCH/properties/reported/?$rid={}",
        request_id
    ))
}

/// `$iothub/methods/res/{status}/?$rid={n}`, with the request id echoed as received.
///
/// The status must be three digits.
pub fn method_response(status: i32, request_id: &str) -> Result<Topic, ClientError> {
    if !(100..=999).contains(&status) {
        return Err(ClientError::InvalidArgument);
    }
    format_topic(format_args!(
        "$iothub/methods/res/{}/?$rid={}",
        status, request_id
    ))
}

/// What an inbound topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// A desired-property notification, delivered as a partial twin.
    TwinDesired,
    /// The answer to one of our twin GET or reported PATCH requests.
    TwinResponse {
        /// HTTP-like status code.
        status: u16,
        /// The `$rid` we sent.
        request_id: u16,
    },
    /// A direct method call.
    Method {
        /// Method name.
        name: &'a str,
        /// Request id to echo in the response.
        request_id: &'a str,
    },
    /// A cloud-to-device message; `properties` is the raw segment after `devicebound/`.
    Message {
        /// Encoded `k=v&...` property list, possibly empty.
        properties: &'a str,
    },
}

fn request_id(query: &str) -> Option<&str> {
    let start = query.find(REQUEST_ID_KEY)? + REQUEST_ID_KEY.len();
    let rest = &query[start..];
    let end = rest.find('&').unwrap_or(rest.len());
    let id = &rest[..end];
    (!id.is_empty()).then_some(id)
}

/// Classifies an inbound topic. Anything that is not twin or method traffic
/// is treated as a cloud-to-device message.
pub fn classify(topic: &str) -> Result<Inbound<'_>, ClientError> {
    if let Some(rest) = topic.strip_prefix(TWIN_PREFIX) {
        if topic.starts_with(TWIN_DESIRED_PREFIX) {
            return Ok(Inbound::TwinDesired);
        }
        // Responses have been observed both as `res/` and `$res/`.
        let rest = rest
            .strip_prefix("res/")
            .or_else(|| rest.strip_prefix("$res/"))
            .ok_or(ClientError::OperationFailed)?;
        let status_end = rest.find('/').ok_or(ClientError::OperationFailed)?;
        let status = rest[..status_end]
            .parse::<u16>()
            .map_err(|_| ClientError::OperationFailed)?;
        let request_id = request_id(&rest[status_end..])
            .and_then(|id| id.parse::<u16>().ok())
            .ok_or(ClientError::OperationFailed)?;
        return Ok(Inbound::TwinResponse { status, request_id });
    }
    if let Some(rest) = topic.strip_prefix(METHODS_PREFIX) {
        let name_end = rest.find('/').ok_or(ClientError::OperationFailed)?;
        let name = &rest[..name_end];
        if name.is_empty() {
            return Err(ClientError::OperationFailed);
        }
        let request_id = request_id(&rest[name_end..]).ok_or(ClientError::OperationFailed)?;
        return Ok(Inbound::Method { name, request_id });
    }
    let properties = topic
        .find(DEVICEBOUND_MARKER)
        .map(|at| &topic[at + DEVICEBOUND_MARKER.len()..])
        .unwrap_or("");
    Ok(Inbound::Message { properties })
}

/// Copies the properties of a devicebound topic segment onto `message`.
///
/// System properties are skipped, except that message and correlation ids
/// are kept on the message itself.
pub fn apply_properties(segment: &str, message: &mut Message) {
    for pair in segment.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == MESSAGE_ID_KEY {
            message.set_message_id(&url::decode(value));
        } else if key == CORRELATION_ID_KEY {
            message.set_correlation_id(&url::decode(value));
        } else if SYSTEM_PROPERTY_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
        {
            trace!("skipping system property {}", key);
        } else {
            message.set_property(&url::decode(key), &url::decode(value));
        }
    }
}
