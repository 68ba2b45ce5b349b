//! The contract between the client lifecycle manager and a protocol transport.
//!
//! The manager owns the application-facing queues and callbacks; a transport
//! owns the wire. The manager drives the transport through [`Transport`], and
//! during [`Transport::poll`] the transport calls back into the manager
//! through [`UpperLayer`] to pull queued telemetry and to report deliveries,
//! inbound traffic and connection changes. MQTT is the bundled
//! implementation; any other protocol plugs in by implementing the same
//! trait.

#![allow(missing_docs)]

use super::config::{ClientConfig, DeviceConfig};
use super::error::ClientError;
use super::message::{Disposition, Message};
use super::retry::RetryPolicy;
use crate::network::OptionValue;
use crate::time::Deadline;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// MQTT implementation of the transport contract.
pub mod mqtt;

/// Status reported to reported-state callbacks for operations that never got an answer.
pub const TWIN_TIMEOUT_STATUS: u16 = 408;

/// Terminal outcome of a telemetry send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfirmationResult {
    /// The hub acknowledged the message.
    Ok,
    /// The message could not be delivered.
    Error,
    /// The message deadline passed first.
    Timeout,
    /// The client was destroyed first.
    Destroyed,
}

/// Callback fired once per sent event.
pub type ConfirmationCallback = Box<dyn FnMut(ConfirmationResult)>;

/// A telemetry message waiting to be sent or acknowledged.
pub struct PendingEvent {
    /// Owned copy of the caller's message.
    pub message: Message,
    /// When the send gives up.
    pub deadline: Deadline,
    callback: Option<ConfirmationCallback>,
}

impl PendingEvent {
    pub fn new(
        message: Message,
        deadline: Deadline,
        callback: Option<ConfirmationCallback>,
    ) -> Self {
        Self {
            message,
            deadline,
            callback,
        }
    }

    /// Fires the confirmation callback, consuming the event so it can fire only once.
    pub fn complete(mut self, result: ConfirmationResult) {
        if let Some(callback) = self.callback.as_mut() {
            callback(result);
        }
    }
}

impl core::fmt::Debug for PendingEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingEvent")
            .field("payload_len", &self.message.payload().len())
            .field("deadline", &self.deadline)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// The kind of work handed to [`Transport::process_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityType {
    Telemetry,
    DeviceTwin,
    DeviceMethod,
}

/// Which twin request an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwinItemKind {
    /// PATCH of reported properties.
    ReportedState,
    /// GET of the full twin document.
    GetTwin,
}

/// A twin operation as seen by the transport.
#[derive(Debug, Clone, Copy)]
pub struct TwinItem<'a> {
    /// Correlation id assigned by the manager, never 0.
    pub item_id: u32,
    pub kind: TwinItemKind,
    /// Reported properties document; empty for [`TwinItemKind::GetTwin`].
    pub payload: &'a [u8],
}

/// Outcome of [`Transport::process_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcessResult {
    /// Dispatched; the item now waits for its response.
    Ok,
    /// Failed for good; the item should be dropped.
    Error,
    /// Not connected yet; try again on a later poll.
    NotConnected,
    /// This transport does not handle the item type now.
    Continue,
}

/// Whether anything is still on its way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionStatus {
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionStatusReason {
    Ok,
    /// The application-supplied SAS token is past its expiry.
    ExpiredSasToken,
    /// The hub refused the device as not authorized.
    DeviceDisabled,
    /// The hub refused the credential; no automatic reconnect follows.
    BadCredential,
    /// The reconnection budget is exhausted.
    RetryExpired,
    /// The byte stream could not be opened or broke.
    NoNetwork,
    /// Any other protocol-level failure.
    CommunicationError,
}

/// Whether a twin callback received the whole document or a desired-property patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwinUpdateState {
    Complete,
    Partial,
}

/// What a device method handler returns to the caller in the cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    pub status: i32,
    pub payload: Vec<u8>,
}

impl MethodResponse {
    pub fn new(status: i32, payload: &[u8]) -> Self {
        Self {
            status,
            payload: payload.to_vec(),
        }
    }
}

/// Calls a transport makes into the lifecycle manager during [`Transport::poll`].
pub trait UpperLayer {
    /// Takes the oldest event waiting to be sent.
    fn next_event(&mut self) -> Option<PendingEvent>;

    /// Finishes an event the transport had taken.
    fn event_complete(&mut self, event: PendingEvent, result: ConfirmationResult);

    /// Delivers a cloud-to-device message.
    fn message_received(&mut self, message: Message) -> Disposition;

    /// Delivers the response to a twin item.
    fn twin_response(&mut self, item_id: u32, status: u16, payload: &[u8]);

    /// Reports that a twin item will never get a response.
    fn twin_abandoned(&mut self, item_id: u32);

    /// Delivers a desired-property notification.
    fn twin_desired(&mut self, payload: &[u8]);

    /// Runs a device method and returns its response.
    fn method_invoked(&mut self, name: &str, payload: &[u8]) -> MethodResponse;

    fn connection_status(&mut self, status: ConnectionStatus, reason: ConnectionStatusReason);
}

/// A protocol transport.
pub trait Transport {
    /// Releases the transport and its connection.
    fn destroy(self)
    where
        Self: Sized;

    /// Attaches a device. Fails if its identity does not match the one the
    /// transport was created with, or if a device is already attached.
    fn register(&mut self, device: &DeviceConfig<'_>) -> Result<(), ClientError>;

    /// Detaches the device, finishing every event the transport still holds
    /// with [`ConfirmationResult::Destroyed`].
    fn unregister(&mut self, upper: &mut dyn UpperLayer);

    /// Starts receiving cloud-to-device messages.
    fn subscribe(&mut self) -> Result<(), ClientError>;
    fn unsubscribe(&mut self);

    /// Starts receiving twin responses and desired-property notifications.
    fn subscribe_device_twin(&mut self) -> Result<(), ClientError>;
    fn unsubscribe_device_twin(&mut self);

    /// Starts receiving device method calls.
    fn subscribe_device_method(&mut self) -> Result<(), ClientError>;
    fn unsubscribe_device_method(&mut self);

    /// Hands one queued item to the wire.
    fn process_item(&mut self, identity: IdentityType, item: &TwinItem<'_>) -> ProcessResult;

    /// One non-blocking pass over the connection.
    fn poll(&mut self, upper: &mut dyn UpperLayer);

    /// Busy while the transport holds unacknowledged telemetry.
    fn send_status(&self) -> SendStatus;

    fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), ClientError>;

    /// Replaces the reconnection policy; `timeout_limit_secs == 0` retries forever.
    fn set_retry_policy(
        &mut self,
        policy: RetryPolicy,
        timeout_limit_secs: u64,
    ) -> Result<(), ClientError>;

    /// `{hub}.{suffix}`
    fn hostname(&self) -> &str;
}

/// Builds a transport from a client configuration.
///
/// Implemented for any `FnOnce(&ClientConfig) -> Result<T, ClientError>`, so
/// a closure capturing the session and clock is the usual factory.
pub trait TransportFactory {
    type Transport: Transport;

    fn create(self, config: &ClientConfig) -> Result<Self::Transport, ClientError>;
}

impl<T, F> TransportFactory for F
where
    T: Transport,
    F: FnOnce(&ClientConfig) -> Result<T, ClientError>,
{
    type Transport = T;

    fn create(self, config: &ClientConfig) -> Result<T, ClientError> {
        self(config)
    }
}
