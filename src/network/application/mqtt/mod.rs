//! MQTT 3.1.1 protocol support.
//!
//! The hub transport talks to the broker exclusively through the [`Session`]
//! trait: connect, publish, subscribe, unsubscribe, and a non-blocking
//! [`Session::poll`] that yields one [`Event`] at a time. [`Client`] is the
//! bundled implementation over any [`Connect`](crate::network::Connect)
//! connector.
//!
//! # Protocol Overview
//!
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! Only QoS 0 and QoS 1 are used by the hub, so QoS 2 flows are refused.

/// MQTT session implementation and supporting types.
pub mod client;

pub use client::{Client, ConnectReturnCode, Event, Options, PublishPacket, QoS, Session};
