//! HMAC-SHA256 request signing and host selection

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;
use tracing::info;

type HmacSha256 = Hmac<Sha256>;

/// Header name carrying the API key on authenticated requests
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Authentication failures, terminal at startup
#[derive(Debug, Error)]
pub enum AuthError {
    /// The vault file is absent, unparseable, or incomplete
    #[error("credentials unavailable: {reason}")]
    CredentialsUnavailable {
        /// What went wrong while loading the vault
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct VaultFile {
    binance_testnet: Option<VaultEntry>,
}

#[derive(Debug, Deserialize)]
struct VaultEntry {
    api_key: String,
    secret_key: String,
    #[serde(default = "default_use_testnet")]
    use_testnet: bool,
}

fn default_use_testnet() -> bool {
    true
}

/// Signs exchange requests with HMAC-SHA256 and selects API hosts.
///
/// Immutable after construction; safe to query concurrently.
#[derive(Debug, Clone)]
pub struct Signer {
    api_key: String,
    secret_key: String,
    use_testnet: bool,
}

impl Signer {
    /// Construct a signer from raw credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String, use_testnet: bool) -> Self {
        Self {
            api_key,
            secret_key,
            use_testnet,
        }
    }

    /// Load credentials from a JSON vault file with a top-level
    /// `binance_testnet` object
    pub fn from_vault(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AuthError::CredentialsUnavailable {
            reason: format!("cannot read vault {}: {e}", path.display()),
        })?;
        let vault: VaultFile =
            serde_json::from_str(&raw).map_err(|e| AuthError::CredentialsUnavailable {
                reason: format!("cannot parse vault {}: {e}", path.display()),
            })?;
        let entry = vault
            .binance_testnet
            .ok_or_else(|| AuthError::CredentialsUnavailable {
                reason: format!("vault {} has no binance_testnet entry", path.display()),
            })?;
        if entry.api_key.is_empty() || entry.secret_key.is_empty() {
            return Err(AuthError::CredentialsUnavailable {
                reason: "vault entry has empty api_key or secret_key".to_string(),
            });
        }
        info!(use_testnet = entry.use_testnet, "loaded exchange credentials");
        Ok(Self::new(entry.api_key, entry.secret_key, entry.use_testnet))
    }

    /// Build a signed query string from `k=v` pairs in caller order,
    /// appending the current millisecond timestamp when requested and the
    /// hex signature last
    #[must_use]
    pub fn sign(&self, params: &[(&str, String)], with_timestamp: bool) -> String {
        let timestamp = with_timestamp.then(|| chrono::Utc::now().timestamp_millis().unsigned_abs());
        self.sign_at(params, timestamp)
    }

    /// Deterministic signing core: signature over the query string with an
    /// explicit timestamp (pure given params, secret, and timestamp)
    #[must_use]
    pub fn sign_at(&self, params: &[(&str, String)], timestamp_ms: Option<u64>) -> String {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if let Some(ts) = timestamp_ms {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("timestamp={ts}"));
        }
        let signature = self.signature_hex(&query);
        format!("{query}&signature={signature}")
    }

    /// Lowercase hex HMAC-SHA256 of an arbitrary payload
    #[must_use]
    pub fn signature_hex(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Append the API-key header to a header list
    pub fn add_auth_header(&self, headers: &mut Vec<(String, String)>) {
        headers.push((API_KEY_HEADER.to_string(), self.api_key.clone()));
    }

    /// The API key
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Whether requests are routed to the exchange testnet
    #[must_use]
    pub const fn is_testnet(&self) -> bool {
        self.use_testnet
    }

    /// REST API host for the selected network
    #[must_use]
    pub const fn rest_base(&self) -> &'static str {
        if self.use_testnet {
            "testnet.binance.vision"
        } else {
            "api.binance.com"
        }
    }

    /// WebSocket host for the selected network
    #[must_use]
    pub const fn ws_base(&self) -> &'static str {
        if self.use_testnet {
            "stream.testnet.binance.vision"
        } else {
            "stream.binance.com"
        }
    }
}
