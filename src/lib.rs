//! # iothub-device - device client for cloud IoT hubs
//!
//! Lets a constrained device send telemetry, receive cloud-to-device
//! messages, keep its device twin in sync and answer direct methods, while
//! managing its own connection: SAS credentials, reconnection with
//! exponential backoff and jitter, and acknowledgement tracking. The crate
//! is `no_std` (it needs `alloc`) and never spawns threads; all progress
//! happens inside [`hub::client::Client::poll`].
//!
//! ## Layers
//!
//! - [`network`]: the byte-stream contract (`Read`/`Write`/`Close`/`Connect`)
//!   the device's TLS socket implements, and a small non-blocking MQTT 3.1.1
//!   session on top of it.
//! - [`hub::transport`]: the transport contract and the MQTT transport state
//!   machine (`CONNECT -> CONNACK -> SUBSCRIBE -> SUBACK -> PUBLISH`).
//! - [`hub::client`]: the application-facing client with its send queue,
//!   twin queues and callbacks.
//! - [`time`]: the monotonic clock abstraction every timeout goes through.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! iothub-device = "0.1.0"
//! ```
//!
//! ```rust,no_run
//! use iothub_device::hub::client::Client;
//! use iothub_device::hub::config::ClientConfig;
//! use iothub_device::hub::message::Message;
//! use iothub_device::hub::transport::ConfirmationResult;
//! use iothub_device::hub::transport::mqtt::MqttTransport;
//! use iothub_device::network::application::mqtt::Client as MqttSession;
//! use iothub_device::time::ManualClock;
//! # use iothub_device::network::Connect;
//! # fn run<N: Connect>(connector: N) -> Result<(), iothub_device::hub::error::ClientError> {
//!
//! let config = ClientConfig::from_json(br#"{
//!     "iotHubName": "contoso",
//!     "iotHubSuffix": "azure-devices.net",
//!     "deviceId": "thermostat-7",
//!     "deviceKey": "ZGV2aWNlLXNlY3JldC1rZXktMDEyMzQ1Njc4OWFiY2Q="
//! }"#)?;
//!
//! let clock = ManualClock::with_unix_time(1_700_000_000);
//! let transport_clock = clock.clone();
//! let mut client = Client::create(&config, clock.clone(), |config: &ClientConfig| {
//!     MqttTransport::create(config, MqttSession::new(connector), transport_clock)
//! })?;
//!
//! client.send_event_async(
//!     &Message::from_text("{\"temperature\":21.5}").with_property("unit", "C"),
//!     Some(Box::new(|result: ConfirmationResult| {
//!         assert_eq!(result, ConfirmationResult::Ok);
//!     })),
//! )?;
//!
//! loop {
//!     client.poll();
//!     clock.advance(core::time::Duration::from_millis(100));
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - `std`: `SystemClock` backed by `std::time`
//! - `log`: diagnostics through the `log` crate
//! - `defmt`: `defmt::Format` for the public enums

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

extern crate alloc;

#[macro_use]
mod fmt;

/// Monotonic time, deadlines and clock sources.
pub mod time;

/// Byte-stream abstraction and the MQTT session built on it.
pub mod network;

/// The IoT hub device client: configuration, credentials, topics, retry,
/// transports and the lifecycle manager.
pub mod hub;
