//! Shared access signature tokens.
//!
//! A device holding a symmetric key authenticates by sending, as its MQTT
//! password, a token of the form
//!
//! ```text
//! SharedAccessSignature sr={resource}&sig={signature}&se={expiry}&skn={key name}
//! ```
//!
//! where `signature` is the base64 HMAC-SHA256, keyed with the decoded device
//! key, of `{resource}\n{expiry}`. The resource is the percent-encoded
//! `{hub}.{suffix}/devices/{device id}` and the expiry is a Unix time in
//! seconds. Tokens are regenerated once [`REFRESH_RATIO_PERCENT`] of their
//! lifetime has passed.

use super::error::ClientError;
use super::url;
use crate::time::Instant;
use alloc::format;
use alloc::string::String;
use base64ct::{Base64, Encoding};
use core::time::Duration;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Lifetime of a generated token.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Share of the lifetime after which the token is renewed.
pub const REFRESH_RATIO_PERCENT: u32 = 80;

const MAX_KEY_LEN: usize = 128;

/// `{host}/devices/{device id}`, the scope a device token grants.
pub fn resource_uri(host: &str, device_id: &str) -> String {
    format!("{}/devices/{}", host, device_id)
}

/// Builds a token for `resource` that expires at `expiry_unix`.
pub fn generate(
    key_base64: &str,
    resource: &str,
    key_name: &str,
    expiry_unix: u64,
) -> Result<String, ClientError> {
    let mut key_buf = [0u8; MAX_KEY_LEN];
    let key = Base64::decode(key_base64, &mut key_buf).map_err(|_| {
        warn!("device key is not valid base64");
        ClientError::InvalidArgument
    })?;

    let encoded_resource = url::encode(resource);
    let string_to_sign = format!("{}\n{}", encoded_resource, expiry_unix);

    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| ClientError::InvalidArgument)?;
    mac.update(string_to_sign.as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut sig_buf = [0u8; 64];
    let signature =
        Base64::encode(&digest, &mut sig_buf).map_err(|_| ClientError::BufferTooSmall)?;

    let mut token = String::from("SharedAccessSignature sr=");
    token.push_str(&encoded_resource);
    token.push_str("&sig=");
    url::encode_into(&mut token, signature);
    token.push_str("&se=");
    token.push_str(&format!("{}", expiry_unix));
    token.push_str("&skn=");
    token.push_str(key_name);
    Ok(token)
}

/// The `se=` field of a token, if present.
pub fn expiry_of(token: &str) -> Option<u64> {
    let start = token
        .find("&se=")
        .map(|at| at + 4)
        .or_else(|| token.strip_prefix("se=").map(|_| 3))?;
    let rest = &token[start..];
    let end = rest.find('&').unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// A generated token and when it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasToken {
    token: String,
    issued_at: Instant,
    lifetime: Duration,
}

impl SasToken {
    /// Generates a token valid for `lifetime` from `unix_now`.
    pub fn issue(
        key_base64: &str,
        resource: &str,
        unix_now: u64,
        now: Instant,
        lifetime: Duration,
    ) -> Result<Self, ClientError> {
        let token = generate(key_base64, resource, "", unix_now + lifetime.as_secs())?;
        Ok(Self {
            token,
            issued_at: now,
            lifetime,
        })
    }

    /// The token text, as sent in the MQTT password.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Whether the token has used up its refresh share of the lifetime.
    pub fn needs_refresh(&self, now: Instant) -> bool {
        let threshold = self.lifetime * REFRESH_RATIO_PERCENT / 100;
        now.saturating_duration_since(self.issued_at) >= threshold
    }
}
