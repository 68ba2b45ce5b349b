//! The device client.
//!
//! [`Client`] owns everything the application hands it: telemetry waiting to
//! be sent, twin operations waiting to be dispatched or answered, and the
//! callbacks. It drives a [`Transport`] from [`Client::poll`], which the
//! application calls repeatedly; nothing runs between two calls. All
//! callbacks fire from inside `poll` (or `destroy`) on the caller's stack.
//!
//! Every telemetry send and every reported-state patch ends in exactly one
//! callback: acknowledged, failed, timed out or destroyed.

use super::config::ClientConfig;
use super::error::ClientError;
use super::message::{Disposition, Message};
use super::retry::RetryPolicy;
use super::transport::{
    ConfirmationCallback, ConfirmationResult, ConnectionStatus, ConnectionStatusReason,
    IdentityType, MethodResponse, PendingEvent, ProcessResult, SendStatus, TWIN_TIMEOUT_STATUS,
    Transport, TransportFactory, TwinItem, TwinItemKind, TwinUpdateState, UpperLayer,
};
use crate::network::OptionValue;
use crate::time::{Clock, Deadline};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::time::Duration;

/// Receives cloud-to-device messages.
pub type MessageCallback = Box<dyn FnMut(&Message) -> Disposition>;
/// Receives the full twin document and desired-property patches.
pub type TwinCallback = Box<dyn FnMut(TwinUpdateState, &[u8])>;
/// Receives the status of one reported-state patch.
pub type ReportedStateCallback = Box<dyn FnMut(u16)>;
/// Runs a device method.
pub type MethodCallback = Box<dyn FnMut(&str, &[u8]) -> MethodResponse>;
/// Receives connection status changes.
pub type ConnectionStatusCallback = Box<dyn FnMut(ConnectionStatus, ConnectionStatusReason)>;

/// Status sent back for a method nobody handles.
pub const METHOD_NOT_IMPLEMENTED: i32 = 501;

struct TwinOperation {
    item_id: u32,
    kind: TwinItemKind,
    payload: Vec<u8>,
    callback: Option<ReportedStateCallback>,
}

impl TwinOperation {
    fn finish(mut self, status: u16) {
        if let Some(callback) = self.callback.as_mut() {
            callback(status);
        }
    }
}

/// Twin item ids: never 0, wrapping from `u32::MAX` back to 1.
#[derive(Debug, Clone, Copy, Default)]
struct ItemIds {
    last: u32,
}

impl ItemIds {
    fn next(&mut self) -> u32 {
        self.last = if self.last == u32::MAX { 1 } else { self.last + 1 };
        self.last
    }

    /// Next id not currently used by an operation in flight.
    fn next_free(&mut self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let id = self.next();
            if !in_use(id) {
                return id;
            }
        }
    }
}

/// Queues and callbacks; the part of the client a transport calls back into.
#[derive(Default)]
struct Core {
    waiting: VecDeque<PendingEvent>,
    twin_pending: VecDeque<TwinOperation>,
    twin_ack_wait: Vec<TwinOperation>,
    message_callback: Option<MessageCallback>,
    twin_callback: Option<TwinCallback>,
    method_callback: Option<MethodCallback>,
    status_callback: Option<ConnectionStatusCallback>,
    complete_twin_received: bool,
    last_message_received: Option<u64>,
    unix_now: Option<u64>,
}

impl Core {
    fn twin_id_in_use(&self, id: u32) -> bool {
        self.twin_pending.iter().any(|op| op.item_id == id)
            || self.twin_ack_wait.iter().any(|op| op.item_id == id)
    }

    fn take_ack_wait(&mut self, item_id: u32) -> Option<TwinOperation> {
        let pos = self.twin_ack_wait.iter().position(|op| op.item_id == item_id)?;
        Some(self.twin_ack_wait.remove(pos))
    }
}

impl UpperLayer for Core {
    fn next_event(&mut self) -> Option<PendingEvent> {
        self.waiting.pop_front()
    }

    fn event_complete(&mut self, event: PendingEvent, result: ConfirmationResult) {
        event.complete(result);
    }

    fn message_received(&mut self, message: Message) -> Disposition {
        if let Some(unix_now) = self.unix_now {
            self.last_message_received = Some(unix_now);
        }
        match self.message_callback.as_mut() {
            Some(callback) => callback(&message),
            None => {
                warn!("message received with no message callback");
                Disposition::Abandoned
            }
        }
    }

    fn twin_response(&mut self, item_id: u32, status: u16, payload: &[u8]) {
        let Some(op) = self.take_ack_wait(item_id) else {
            warn!("twin response for unknown item {}", item_id);
            return;
        };
        match op.kind {
            TwinItemKind::GetTwin => {
                if !(200..300).contains(&status) {
                    error!("get twin failed with status {}", status);
                    return;
                }
                self.complete_twin_received = true;
                if let Some(callback) = self.twin_callback.as_mut() {
                    callback(TwinUpdateState::Complete, payload);
                }
            }
            TwinItemKind::ReportedState => op.finish(status),
        }
    }

    fn twin_abandoned(&mut self, item_id: u32) {
        match self.take_ack_wait(item_id) {
            Some(op) if op.kind == TwinItemKind::ReportedState => op.finish(TWIN_TIMEOUT_STATUS),
            Some(_) => error!("get twin request {} got no response, dropped", item_id),
            None => debug!("abandoned twin item {} already gone", item_id),
        }
    }

    fn twin_desired(&mut self, payload: &[u8]) {
        if !self.complete_twin_received {
            debug!("desired properties before the full twin, dropped");
            return;
        }
        if let Some(callback) = self.twin_callback.as_mut() {
            callback(TwinUpdateState::Partial, payload);
        }
    }

    fn method_invoked(&mut self, name: &str, payload: &[u8]) -> MethodResponse {
        match self.method_callback.as_mut() {
            Some(callback) => callback(name, payload),
            None => {
                warn!("method {} invoked with no method callback", name);
                MethodResponse::new(METHOD_NOT_IMPLEMENTED, &[])
            }
        }
    }

    fn connection_status(&mut self, status: ConnectionStatus, reason: ConnectionStatusReason) {
        info!("connection status {:?} ({:?})", status, reason);
        if let Some(callback) = self.status_callback.as_mut() {
            callback(status, reason);
        }
    }
}

/// A device client, generic over its transport and clock.
///
/// ```rust,no_run
/// use iothub_device::hub::client::Client;
/// use iothub_device::hub::config::ClientConfig;
/// use iothub_device::hub::message::Message;
/// use iothub_device::hub::transport::mqtt::MqttTransport;
/// # use iothub_device::network::application::mqtt::Session;
/// # use iothub_device::time::ManualClock;
/// # fn run<S: Session>(session: S) -> Result<(), iothub_device::hub::error::ClientError> {
/// let config = ClientConfig::new("contoso", "azure-devices.net", "dev1", Some("a2V5"), None)?;
/// let clock = ManualClock::with_unix_time(1_700_000_000);
/// let transport_clock = clock.clone();
/// let mut client = Client::create(&config, clock, |config: &ClientConfig| {
///     MqttTransport::create(config, session, transport_clock)
/// })?;
///
/// client.send_event_async(&Message::from_text("{\"t\":21.5}"), None)?;
/// loop {
///     client.poll();
/// #   break;
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client<T: Transport, C: Clock> {
    transport: Option<T>,
    owns_transport: bool,
    clock: C,
    core: Core,
    item_ids: ItemIds,
    message_timeout: Duration,
    retry_policy: RetryPolicy,
    retry_timeout_secs: u64,
}

impl<T: Transport, C: Clock> core::fmt::Debug for Client<T, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Client")
            .field("owns_transport", &self.owns_transport)
            .field("waiting", &self.core.waiting.len())
            .field("twin_pending", &self.core.twin_pending.len())
            .field("twin_ack_wait", &self.core.twin_ack_wait.len())
            .field("message_timeout", &self.message_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl<T: Transport, C: Clock> Client<T, C> {
    /// Creates the transport through `factory` and registers the device on it.
    ///
    /// The transport is destroyed again if registration fails.
    pub fn create<F>(config: &ClientConfig, clock: C, factory: F) -> Result<Self, ClientError>
    where
        F: TransportFactory<Transport = T>,
    {
        config.validate()?;
        let transport = factory.create(config)?;
        Self::attach(config, clock, transport, true).map_err(|(e, transport)| {
            transport.destroy();
            e
        })
    }

    /// Registers the device on a transport the caller keeps ownership of.
    ///
    /// On failure the transport is handed back untouched. [`Client::destroy`]
    /// unregisters the device and returns the transport instead of destroying it.
    pub fn create_with_transport(
        config: &ClientConfig,
        clock: C,
        transport: T,
    ) -> Result<Self, (ClientError, T)> {
        if let Err(e) = config.validate() {
            return Err((e, transport));
        }
        Self::attach(config, clock, transport, false)
    }

    fn attach(
        config: &ClientConfig,
        clock: C,
        mut transport: T,
        owns_transport: bool,
    ) -> Result<Self, (ClientError, T)> {
        if let Err(e) = transport.register(&config.device()) {
            error!("device registration failed: {}", e);
            return Err((e, transport));
        }
        let policy = RetryPolicy::ExponentialBackoffWithJitter;
        let mut core = Core::default();
        if let Err(e) = transport.set_retry_policy(policy, 0) {
            transport.unregister(&mut core);
            return Err((e, transport));
        }
        info!("client for {} created", config.device_id.as_str());
        Ok(Self {
            transport: Some(transport),
            owns_transport,
            clock,
            core,
            item_ids: ItemIds::default(),
            message_timeout: Duration::ZERO,
            retry_policy: policy,
            retry_timeout_secs: 0,
        })
    }

    fn transport_mut(transport: &mut Option<T>) -> Result<&mut T, ClientError> {
        transport.as_mut().ok_or(ClientError::InvalidArgument)
    }

    /// Queues a copy of `message` for sending.
    ///
    /// `callback` fires exactly once with the outcome. The deadline comes
    /// from the `messageTimeout` option in force now.
    pub fn send_event_async(
        &mut self,
        message: &Message,
        callback: Option<ConfirmationCallback>,
    ) -> Result<(), ClientError> {
        Self::transport_mut(&mut self.transport)?;
        let deadline = Deadline::after(self.clock.now(), self.message_timeout);
        self.core
            .waiting
            .push_back(PendingEvent::new(message.clone(), deadline, callback));
        Ok(())
    }

    /// Installs (`Some`) or removes (`None`) the message callback.
    ///
    /// Installing subscribes to cloud-to-device messages; if that fails no
    /// callback is installed.
    pub fn set_message_callback(
        &mut self,
        callback: Option<MessageCallback>,
    ) -> Result<(), ClientError> {
        let transport = Self::transport_mut(&mut self.transport)?;
        match callback {
            Some(callback) => {
                transport.subscribe()?;
                self.core.message_callback = Some(callback);
            }
            None => {
                transport.unsubscribe();
                self.core.message_callback = None;
            }
        }
        Ok(())
    }

    /// Installs or removes the twin callback.
    ///
    /// Installing subscribes to twin traffic and queues a request for the
    /// full document, which is delivered as [`TwinUpdateState::Complete`].
    pub fn set_device_twin_callback(
        &mut self,
        callback: Option<TwinCallback>,
    ) -> Result<(), ClientError> {
        let transport = Self::transport_mut(&mut self.transport)?;
        match callback {
            Some(callback) => {
                transport.subscribe_device_twin()?;
                self.core.twin_callback = Some(callback);
                self.core.complete_twin_received = false;
                let core = &self.core;
                let item_id = self.item_ids.next_free(|id| core.twin_id_in_use(id));
                self.core.twin_pending.push_back(TwinOperation {
                    item_id,
                    kind: TwinItemKind::GetTwin,
                    payload: Vec::new(),
                    callback: None,
                });
            }
            None => {
                transport.unsubscribe_device_twin();
                self.core.twin_callback = None;
            }
        }
        Ok(())
    }

    /// Installs or removes the device method callback.
    pub fn set_device_method_callback(
        &mut self,
        callback: Option<MethodCallback>,
    ) -> Result<(), ClientError> {
        let transport = Self::transport_mut(&mut self.transport)?;
        match callback {
            Some(callback) => {
                transport.subscribe_device_method()?;
                self.core.method_callback = Some(callback);
            }
            None => {
                transport.unsubscribe_device_method();
                self.core.method_callback = None;
            }
        }
        Ok(())
    }

    /// Installs or removes the connection status callback.
    pub fn set_connection_status_callback(&mut self, callback: Option<ConnectionStatusCallback>) {
        self.core.status_callback = callback;
    }

    /// Queues a reported-properties patch.
    ///
    /// `callback` receives the status the hub answered with, or
    /// [`TWIN_TIMEOUT_STATUS`] if no answer ever comes.
    pub fn send_reported_state(
        &mut self,
        reported: &[u8],
        callback: Option<ReportedStateCallback>,
    ) -> Result<(), ClientError> {
        if reported.is_empty() {
            return Err(ClientError::InvalidArgument);
        }
        let transport = Self::transport_mut(&mut self.transport)?;
        transport.subscribe_device_twin()?;
        let core = &self.core;
        let item_id = self.item_ids.next_free(|id| core.twin_id_in_use(id));
        self.core.twin_pending.push_back(TwinOperation {
            item_id,
            kind: TwinItemKind::ReportedState,
            payload: reported.to_vec(),
            callback,
        });
        Ok(())
    }

    /// Does one round of work: times out waiting telemetry, hands queued twin
    /// operations to the transport in order, then lets the transport run.
    pub fn poll(&mut self) {
        let now = self.clock.now();

        let mut i = 0;
        while i < self.core.waiting.len() {
            if self.core.waiting[i].deadline.is_expired(now) {
                if let Some(event) = self.core.waiting.remove(i) {
                    debug!("message timed out before it was sent");
                    event.complete(ConfirmationResult::Timeout);
                }
            } else {
                i += 1;
            }
        }

        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        while let Some(op) = self.core.twin_pending.front() {
            let item = TwinItem {
                item_id: op.item_id,
                kind: op.kind,
                payload: &op.payload,
            };
            match transport.process_item(IdentityType::DeviceTwin, &item) {
                ProcessResult::Ok => {
                    if let Some(op) = self.core.twin_pending.pop_front() {
                        self.core.twin_ack_wait.push(op);
                    }
                }
                ProcessResult::Continue | ProcessResult::NotConnected => break,
                ProcessResult::Error => {
                    if let Some(op) = self.core.twin_pending.pop_front() {
                        error!("twin item {} could not be sent, dropped", op.item_id);
                        op.finish(TWIN_TIMEOUT_STATUS);
                    }
                }
            }
        }

        self.core.unix_now = self.clock.unix_time();
        transport.poll(&mut self.core);
    }

    /// Busy while any telemetry is queued here or unacknowledged in the transport.
    pub fn send_status(&self) -> SendStatus {
        if !self.core.waiting.is_empty() {
            return SendStatus::Busy;
        }
        self.transport
            .as_ref()
            .map_or(SendStatus::Idle, Transport::send_status)
    }

    /// Sets a runtime option.
    ///
    /// `messageTimeout` (milliseconds, 0 for none) is kept here and applies to
    /// messages sent afterwards; everything else goes to the transport.
    pub fn set_option(&mut self, name: &str, value: &OptionValue<'_>) -> Result<(), ClientError> {
        if name == "messageTimeout" {
            let millis = value.as_u64().ok_or(ClientError::InvalidArgument)?;
            self.message_timeout = Duration::from_millis(millis);
            return Ok(());
        }
        Self::transport_mut(&mut self.transport)?.set_option(name, value)
    }

    /// Replaces the reconnection policy. A limit of 0 seconds retries forever.
    pub fn set_retry_policy(
        &mut self,
        policy: RetryPolicy,
        timeout_limit_secs: u64,
    ) -> Result<(), ClientError> {
        Self::transport_mut(&mut self.transport)?.set_retry_policy(policy, timeout_limit_secs)?;
        self.retry_policy = policy;
        self.retry_timeout_secs = timeout_limit_secs;
        Ok(())
    }

    /// The policy and limit last set.
    pub fn retry_policy(&self) -> (RetryPolicy, u64) {
        (self.retry_policy, self.retry_timeout_secs)
    }

    /// Unix time, in seconds, at which the last inbound message arrived.
    pub fn last_message_receive_time(&self) -> Result<u64, ClientError> {
        self.core
            .last_message_received
            .ok_or(ClientError::IndefiniteTime)
    }

    /// `{hub}.{suffix}`
    pub fn hostname(&self) -> &str {
        self.transport.as_ref().map_or("", Transport::hostname)
    }

    /// Tears the client down.
    ///
    /// Events still queued complete with [`ConfirmationResult::Destroyed`] and
    /// twin operations with [`TWIN_TIMEOUT_STATUS`]. A transport passed to
    /// [`Client::create_with_transport`] is returned; one the client created is
    /// destroyed.
    pub fn destroy(mut self) -> Option<T> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<T> {
        let returned = match self.transport.take() {
            Some(mut transport) => {
                transport.unregister(&mut self.core);
                if self.owns_transport {
                    transport.destroy();
                    None
                } else {
                    Some(transport)
                }
            }
            None => None,
        };
        for event in self.core.waiting.drain(..) {
            event.complete(ConfirmationResult::Destroyed);
        }
        for op in self
            .core
            .twin_pending
            .drain(..)
            .chain(self.core.twin_ack_wait.drain(..))
        {
            op.finish(TWIN_TIMEOUT_STATUS);
        }
        returned
    }
}

impl<T: Transport, C: Clock> Drop for Client<T, C> {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
