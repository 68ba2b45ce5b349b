pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod retry;
pub mod sas;
pub mod topics;
pub mod transport;

mod url;

pub use client::Client;
pub use config::{ClientConfig, Credential};
pub use error::ClientError;
pub use message::{Disposition, Message};
pub use retry::RetryPolicy;
pub use transport::mqtt::MqttTransport;
