//! Device identity and hub addressing.
//!
//! A [`ClientConfig`] can be assembled in code or read from a JSON document,
//! which is handy on devices that provision their identity into flash:
//!
//! ```rust
//! use iothub_device::hub::config::{ClientConfig, Credential};
//!
//! let json = br#"{
//!     "iotHubName": "contoso",
//!     "iotHubSuffix": "azure-devices.net",
//!     "deviceId": "thermostat-7",
//!     "deviceKey": "ZGV2aWNlLXNlY3JldC1rZXktMDEyMzQ1Njc4OWFiY2Q="
//! }"#;
//!
//! let config = ClientConfig::from_json(json).unwrap();
//! assert_eq!(config.host_name(), "contoso.azure-devices.net");
//! assert!(matches!(config.credential, Credential::DeviceKey(_)));
//! ```

use super::error::ClientError;
use super::topics::MAX_DEVICE_ID_LEN;
use alloc::format;
use alloc::string::String;
use serde::Deserialize;

/// How the device proves its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A base64 symmetric key; SAS tokens are generated and renewed from it.
    DeviceKey(String),
    /// A SAS token supplied by the application, used as-is until it expires.
    SasToken(String),
    /// A client certificate presented by the TLS layer.
    X509,
}

impl Credential {
    /// Picks the credential from optional key and token; both absent means X.509.
    pub fn from_parts(
        device_key: Option<&str>,
        device_sas_token: Option<&str>,
    ) -> Result<Self, ClientError> {
        match (device_key, device_sas_token) {
            (Some(_), Some(_)) => Err(ClientError::InvalidArgument),
            (Some(""), None) | (None, Some("")) => Err(ClientError::InvalidArgument),
            (Some(key), None) => Ok(Credential::DeviceKey(String::from(key))),
            (None, Some(token)) => Ok(Credential::SasToken(String::from(token))),
            (None, None) => Ok(Credential::X509),
        }
    }

    /// The symmetric key, if that is the credential.
    pub fn device_key(&self) -> Option<&str> {
        match self {
            Credential::DeviceKey(key) => Some(key),
            _ => None,
        }
    }

    /// The application token, if that is the credential.
    pub fn sas_token(&self) -> Option<&str> {
        match self {
            Credential::SasToken(token) => Some(token),
            _ => None,
        }
    }
}

/// Everything needed to reach the hub as one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Hub name, the first label of the host name.
    pub hub_name: String,
    /// Host suffix, e.g. `azure-devices.net`.
    pub hub_suffix: String,
    /// Device identity registered in the hub.
    pub device_id: String,
    /// Authentication material.
    pub credential: Credential,
    /// Protocol gateway to connect through instead of the hub itself.
    pub gateway_host: Option<String>,
}

/// The registration view of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig<'a> {
    /// Device identity.
    pub device_id: &'a str,
    /// Base64 symmetric key.
    pub device_key: Option<&'a str>,
    /// Application-supplied SAS token.
    pub device_sas_token: Option<&'a str>,
}

impl<'a> DeviceConfig<'a> {
    /// The credential these fields describe.
    pub fn credential(&self) -> Result<Credential, ClientError> {
        Credential::from_parts(self.device_key, self.device_sas_token)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig<'a> {
    iot_hub_name: &'a str,
    iot_hub_suffix: &'a str,
    device_id: &'a str,
    #[serde(default, borrow)]
    device_key: Option<&'a str>,
    #[serde(default, borrow)]
    device_sas_token: Option<&'a str>,
    #[serde(default, borrow)]
    protocol_gateway_host_name: Option<&'a str>,
}

impl ClientConfig {
    /// Builds and validates a configuration.
    pub fn new(
        hub_name: &str,
        hub_suffix: &str,
        device_id: &str,
        device_key: Option<&str>,
        device_sas_token: Option<&str>,
    ) -> Result<Self, ClientError> {
        let config = Self {
            hub_name: String::from(hub_name),
            hub_suffix: String::from(hub_suffix),
            device_id: String::from(device_id),
            credential: Credential::from_parts(device_key, device_sas_token)?,
            gateway_host: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Routes the connection through a protocol gateway.
    pub fn with_gateway(mut self, host: &str) -> Self {
        self.gateway_host = Some(String::from(host));
        self
    }

    /// Parses the JSON provisioning format.
    pub fn from_json(json: &[u8]) -> Result<Self, ClientError> {
        let (raw, _) = serde_json_core::from_slice::<RawConfig<'_>>(json).map_err(|e| {
            warn!("invalid client configuration: {:?}", e);
            ClientError::InvalidArgument
        })?;
        let mut config = Self::new(
            raw.iot_hub_name,
            raw.iot_hub_suffix,
            raw.device_id,
            raw.device_key,
            raw.device_sas_token,
        )?;
        config.gateway_host = raw.protocol_gateway_host_name.map(String::from);
        Ok(config)
    }

    /// Checks the identity fields.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.hub_name.is_empty() || self.hub_suffix.is_empty() {
            return Err(ClientError::InvalidArgument);
        }
        if self.device_id.is_empty() || self.device_id.len() > MAX_DEVICE_ID_LEN {
            return Err(ClientError::InvalidArgument);
        }
        match &self.credential {
            Credential::DeviceKey(v) | Credential::SasToken(v) if v.is_empty() => {
                Err(ClientError::InvalidArgument)
            }
            _ => Ok(()),
        }
    }

    /// `{hub}.{suffix}`
    pub fn host_name(&self) -> String {
        format!("{}.{}", self.hub_name, self.hub_suffix)
    }

    /// The host the transport actually connects to.
    pub fn connect_host(&self) -> String {
        match &self.gateway_host {
            Some(gateway) => gateway.clone(),
            None => self.host_name(),
        }
    }

    /// Borrowed registration view.
    pub fn device(&self) -> DeviceConfig<'_> {
        DeviceConfig {
            device_id: &self.device_id,
            device_key: self.credential.device_key(),
            device_sas_token: self.credential.sas_token(),
        }
    }
}
