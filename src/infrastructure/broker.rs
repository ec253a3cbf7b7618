//! # Broker REST client
//!
//! Client for the SmartAPI-style broker behind the simulated accounts. The
//! broker issues a day-scoped JWT on login (client code + MPIN + TOTP); the
//! token is cached in `broker_sessions` and expires at 23:59:59 exchange-local.
//! Stale-session responses surface as `BrokerError::AuthStale`, which the
//! price bridge answers with exactly one forced refresh and retry.

use crate::domain::services::market_time::local_day_end;
use crate::persistence::repository::BrokerSessionRepository;
use crate::persistence::{DatabaseError, DbPool};
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Broker error codes meaning the cached session is no longer accepted
static STALE_SESSION_CODES: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["AG8001", "AG8002", "AB8050", "AB8051"]));

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker credentials are not configured")]
    NotConfigured,

    #[error("Broker HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Broker API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Broker session is stale")]
    AuthStale,

    #[error("Invalid TOTP secret: {0}")]
    Totp(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Broker connection settings; credentials stay zeroized in memory
#[derive(Clone)]
pub struct BrokerConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub client_code: Option<String>,
    pub mpin: Option<Zeroizing<String>>,
    pub totp_secret: Option<Zeroizing<String>>,
    pub timeout_secs: u64,
    pub exchange_offset_minutes: i32,
}

impl BrokerConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
            && self.client_code.is_some()
            && self.mpin.is_some()
            && self.totp_secret.is_some()
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("api_base", &self.api_base)
            .field("client_code", &self.client_code)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("mpin", &self.mpin.as_ref().map(|_| "[redacted]"))
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    #[serde(rename = "errorcode", default)]
    error_code: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    #[serde(rename = "jwtToken")]
    jwt_token: String,
    #[serde(rename = "refreshToken")]
    refresh_token: String,
    #[serde(rename = "feedToken")]
    feed_token: String,
}

/// One hit from the broker's instrument search
#[derive(Debug, Clone, Deserialize)]
pub struct ScripMatch {
    pub exchange: String,
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
    #[serde(rename = "symboltoken")]
    pub symbol_token: String,
}

#[derive(Debug, Deserialize)]
struct LtpData {
    ltp: f64,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    clientcode: &'a str,
    mpin: &'a str,
    totp: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    exchange: &'a str,
    searchscrip: &'a str,
}

#[derive(Debug, Serialize)]
struct LtpRequest<'a> {
    exchange: &'a str,
    tradingsymbol: &'a str,
    symboltoken: &'a str,
}

/// Broker REST client with a database-cached day session
pub struct BrokerClient {
    http: Client,
    config: BrokerConfig,
    sessions: BrokerSessionRepository,
}

impl BrokerClient {
    pub fn new(config: BrokerConfig, pool: DbPool) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            config,
            sessions: BrokerSessionRepository::new(pool),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Cached day-session JWT, logging in when absent, expired, or forced
    async fn session_token(&self, force: bool) -> Result<String, BrokerError> {
        if !force {
            if let Some(session) = self.sessions.get().await? {
                if session.expires_at > Utc::now() {
                    return Ok(session.jwt_token);
                }
            }
        }
        self.login().await
    }

    /// Force a fresh login, replacing the cached session
    pub async fn force_refresh(&self) -> Result<(), BrokerError> {
        self.session_token(true).await.map(|_| ())
    }

    async fn login(&self) -> Result<String, BrokerError> {
        let client_code = self.config.client_code.as_deref().ok_or(BrokerError::NotConfigured)?;
        let mpin = self.config.mpin.as_ref().ok_or(BrokerError::NotConfigured)?;
        let secret = self.config.totp_secret.as_ref().ok_or(BrokerError::NotConfigured)?;

        let body = LoginRequest {
            clientcode: client_code,
            mpin: mpin.as_str(),
            totp: totp(secret.as_str(), SystemTime::now())?,
        };

        let url = format!("{}/rest/auth/user/v1/loginByPassword", self.config.api_base);
        let response = self
            .http
            .post(&url)
            .header("X-PrivateKey", self.config.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await?;

        let envelope: ApiEnvelope<LoginData> = response.json().await?;
        if !envelope.status {
            return Err(BrokerError::Api {
                code: envelope.error_code,
                message: envelope.message,
            });
        }
        let data = envelope.data.ok_or_else(|| BrokerError::Api {
            code: "EMPTY".to_string(),
            message: "login returned no session data".to_string(),
        })?;

        let expires_at = local_day_end(Utc::now(), self.config.exchange_offset_minutes);
        self.sessions
            .upsert(&data.jwt_token, &data.refresh_token, &data.feed_token, expires_at)
            .await?;

        info!("Broker session refreshed, valid until {}", expires_at);
        Ok(data.jwt_token)
    }

    /// Search the broker instrument catalog
    pub async fn search_scrip(
        &self,
        exchange: &str,
        text: &str,
    ) -> Result<Vec<ScripMatch>, BrokerError> {
        let body = SearchRequest {
            exchange,
            searchscrip: text,
        };
        let matches: Vec<ScripMatch> = self
            .post_authed("/rest/secure/order/v1/searchScrip", &body)
            .await?;
        debug!("Scrip search '{}' on {}: {} matches", text, exchange, matches.len());
        Ok(matches)
    }

    /// Last traded price for a resolved instrument
    pub async fn ltp(
        &self,
        exchange: &str,
        trading_symbol: &str,
        symbol_token: &str,
    ) -> Result<f64, BrokerError> {
        let body = LtpRequest {
            exchange,
            tradingsymbol: trading_symbol,
            symboltoken: symbol_token,
        };
        let data: LtpData = self.post_authed("/rest/secure/market/v1/getLtpData", &body).await?;
        Ok(data.ltp)
    }

    async fn post_authed<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        if !self.is_configured() {
            return Err(BrokerError::NotConfigured);
        }

        let token = self.session_token(false).await?;
        let url = format!("{}{}", self.config.api_base, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header("X-PrivateKey", self.config.api_key.as_deref().unwrap_or_default())
            .json(body)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::FORBIDDEN
        {
            return Err(BrokerError::AuthStale);
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        if !envelope.status {
            if STALE_SESSION_CODES.contains(envelope.error_code.as_str()) {
                return Err(BrokerError::AuthStale);
            }
            return Err(BrokerError::Api {
                code: envelope.error_code,
                message: envelope.message,
            });
        }

        envelope.data.ok_or_else(|| BrokerError::Api {
            code: "EMPTY".to_string(),
            message: "response carried no data".to_string(),
        })
    }
}

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

fn base32_decode(input: &str) -> Result<Vec<u8>, BrokerError> {
    let mut bits: u32 = 0;
    let mut nbits: u32 = 0;
    let mut out = Vec::new();

    for c in input.trim().trim_end_matches('=').bytes() {
        let c = c.to_ascii_uppercase();
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| BrokerError::Totp(format!("invalid base32 character '{}'", c as char)))?
            as u32;
        bits = (bits << 5) | value;
        nbits += 5;
        if nbits >= 8 {
            nbits -= 8;
            out.push((bits >> nbits) as u8);
        }
    }

    Ok(out)
}

/// RFC 6238 time-based OTP over the broker's shared secret (30s step,
/// 6 digits, HMAC-SHA256 per the broker contract)
fn totp(secret: &str, at: SystemTime) -> Result<String, BrokerError> {
    let key = base32_decode(secret)?;
    if key.is_empty() {
        return Err(BrokerError::Totp("empty secret".to_string()));
    }

    let counter = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / 30;

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| BrokerError::Totp(e.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) % 1_000_000;

    Ok(format!("{:06}", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base32_decode_rfc_vectors() {
        assert_eq!(base32_decode("MY======").unwrap(), b"f");
        assert_eq!(base32_decode("MZXW6===").unwrap(), b"foo");
        assert_eq!(base32_decode("MZXW6YTB").unwrap(), b"fooba");
        assert!(base32_decode("1!").is_err());
    }

    #[test]
    fn test_totp_is_deterministic_per_window() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_010);
        let a = totp("MZXW6YTB", at).unwrap();
        let b = totp("MZXW6YTB", at + Duration::from_secs(5)).unwrap();

        assert_eq!(a.len(), 6);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        // Same 30-second window yields the same code
        assert_eq!(a, b);
    }

    #[test]
    fn test_totp_rejects_empty_secret() {
        assert!(totp("", SystemTime::now()).is_err());
    }

    #[test]
    fn test_config_redacts_secrets_in_debug() {
        let config = BrokerConfig {
            api_base: "https://broker.example".to_string(),
            api_key: Some("key".to_string()),
            client_code: Some("C123".to_string()),
            mpin: Some(Zeroizing::new("1234".to_string())),
            totp_secret: Some(Zeroizing::new("MZXW6YTB".to_string())),
            timeout_secs: 5,
            exchange_offset_minutes: 330,
        };

        let debug = format!("{:?}", config);
        assert!(!debug.contains("1234"));
        assert!(!debug.contains("MZXW6YTB"));
    }
}
