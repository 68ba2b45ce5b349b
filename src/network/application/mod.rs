//! # Application Layer Network Protocols
//!
//! Protocol clients that sit on top of the [`Connection`](crate::network::Connection)
//! traits. The hub transport only needs MQTT, consumed through the narrow
//! [`mqtt::Session`] interface so that a different MQTT implementation can be
//! swapped in without touching the transport state machine.

/// MQTT client implementation.
///
/// Provides a non-blocking MQTT 3.1.1 session driven by repeated polling.
pub mod mqtt;
