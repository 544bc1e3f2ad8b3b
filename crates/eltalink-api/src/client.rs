// Session client for the ESR62PF controller.
//
// Owns the login token lifecycle, the device-list cache, and the relay
// command queue. Everything network-facing funnels through `request()`,
// which layers token refresh (single forced retry on 401) and bounded
// exponential backoff for transport failures.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::Error;
use crate::model::{DeviceRecord, RelayState};
use crate::transport::TransportConfig;

/// Fixed login user; the device only authenticates via the PoP credential.
const LOGIN_USER: &str = "admin";

const ENDPOINT_LOGIN: &str = "/api/v0/login";
const ENDPOINT_DEVICES: &str = "/api/v0/devices";

fn relay_endpoint(guid: &str) -> String {
    format!("/api/v0/devices/{guid}/functions/relay")
}

/// Client configuration.
///
/// All tunables carry the firmware-appropriate defaults; construct with
/// [`ClientConfig::new`] and override fields as needed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Controller base URL, e.g. `https://192.168.1.40:443`.
    pub url: Url,
    /// Proof-of-possession credential printed on the device.
    pub pop_credential: SecretString,
    /// Login token lifetime. The firmware invalidates tokens after 15 min.
    pub token_ttl: Duration,
    /// How long a fetched device list stays fresh.
    pub device_cache_ttl: Duration,
    /// Transport retries per request (on top of the initial attempt).
    pub max_retries: u32,
    /// Exponential backoff base: delay = `retry_backoff * backoff_base^attempt`.
    pub backoff_base: u32,
    /// Backoff time unit.
    pub retry_backoff: Duration,
}

impl ClientConfig {
    pub fn new(url: Url, pop_credential: SecretString) -> Self {
        Self {
            url,
            pop_credential,
            token_ttl: Duration::from_secs(900),
            device_cache_ttl: Duration::from_secs(60),
            max_retries: 3,
            backoff_base: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct TokenState {
    api_key: Option<SecretString>,
    issued_at: Option<Instant>,
}

impl TokenState {
    /// A token is valid iff it exists and `now - issued_at < ttl`.
    fn is_expired(&self, ttl: Duration) -> bool {
        match (&self.api_key, self.issued_at) {
            (Some(_), Some(issued_at)) => issued_at.elapsed() >= ttl,
            _ => true,
        }
    }

    fn header_value(&self) -> Result<HeaderValue, Error> {
        let key = self.api_key.as_ref().ok_or_else(|| Error::Authentication {
            message: "no cached API key".into(),
        })?;
        let mut value =
            HeaderValue::from_str(key.expose_secret()).map_err(|e| Error::Authentication {
                message: format!("API key not usable as header value: {e}"),
            })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

struct DeviceCache {
    entries: Vec<DeviceRecord>,
    fetched_at: Instant,
}

/// Authenticated HTTP client for a single ESR62PF controller.
///
/// The token, the device cache, and the relay queue are owned here and
/// mutated only through the public operations; there are no background
/// tasks — all refresh activity is caller-driven.
pub struct RelayClient {
    http: reqwest::Client,
    config: ClientConfig,
    /// Guards both the token check and the refresh so concurrent callers
    /// collapse into at most one in-flight login.
    token: Mutex<TokenState>,
    device_cache: Mutex<Option<DeviceCache>>,
    /// Serializes relay commands; the firmware mishandles overlapping
    /// writes, so all devices share one queue.
    relay_lock: Mutex<()>,
}

impl RelayClient {
    /// Create a client with its own connection pool built from `transport`.
    pub fn new(config: ClientConfig, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, config))
    }

    /// Create a client around an externally supplied `reqwest::Client`.
    ///
    /// `reqwest` pools are reference-counted, so closing this client never
    /// tears down the caller's pool.
    pub fn with_client(http: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            http,
            config,
            token: Mutex::new(TokenState::default()),
            device_cache: Mutex::new(None),
            relay_lock: Mutex::new(()),
        }
    }

    /// The controller base URL.
    pub fn base_url(&self) -> &Url {
        &self.config.url
    }

    /// Join an endpoint path onto the base URL. The relay endpoint embeds
    /// a caller-supplied GUID, so failure maps to an error, not a panic.
    fn url(&self, path: &str) -> Result<Url, Error> {
        self.config.url.join(path).map_err(|e| Error::InvalidDevice {
            message: format!("cannot build request URL for {path:?}: {e}"),
        })
    }

    // ── Authentication ───────────────────────────────────────────────

    /// Authenticate with the controller and cache the returned API key.
    ///
    /// Unconditional: always performs the network login. The key itself is
    /// cached internally rather than returned; subsequent requests attach
    /// it automatically. Use the regular request methods if you just need
    /// a valid session.
    pub async fn login(&self) -> Result<(), Error> {
        let mut token = self.token.lock().await;
        self.do_login(&mut token).await
    }

    /// Perform the login POST and store the token. Caller holds the lock.
    async fn do_login(&self, token: &mut TokenState) -> Result<(), Error> {
        let url = self.url(ENDPOINT_LOGIN)?;
        debug!("logging in at {url}");

        let body = json!({
            "user": LOGIN_USER,
            "password": self.config.pop_credential.expose_secret(),
        });

        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            error!("authentication failed: credential rejected");
            return Err(Error::Authentication {
                message: "invalid PoP credential".into(),
            });
        }
        if status != StatusCode::OK {
            error!(status = status.as_u16(), "login failed");
            return Err(Error::Api {
                status: Some(status.as_u16()),
                message: format!("login failed with status {}", status.as_u16()),
            });
        }

        let data: Value = resp.json().await.map_err(|e| Error::Api {
            status: None,
            message: format!("malformed login response: {e}"),
        })?;
        let api_key = data
            .get("apiKey")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Api {
                status: None,
                message: "no API key in login response".into(),
            })?;

        token.api_key = Some(SecretString::from(api_key.to_owned()));
        token.issued_at = Some(Instant::now());
        debug!("authenticated and cached API key");
        Ok(())
    }

    /// Check-and-refresh under the token guard: of N concurrent callers
    /// against an expired token, exactly one performs the network login.
    async fn ensure_valid_token(&self) -> Result<(), Error> {
        let mut token = self.token.lock().await;
        if token.is_expired(self.config.token_ttl) {
            debug!("token expired or not set, refreshing");
            self.do_login(&mut token).await?;
        }
        Ok(())
    }

    // ── Authenticated request primitive ──────────────────────────────

    /// Issue an authenticated request, handling token refresh and retries.
    ///
    /// A 401 forces exactly one relogin-and-retry; a second 401 surfaces
    /// as an API error. Transport failures and timeouts retry up to
    /// `max_retries` times with exponential backoff. The two retry paths
    /// are independent: a 401 retry does not consume a backoff slot.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.url(path)?;
        let mut attempt: u32 = 0;
        let mut refreshed_token = false;

        loop {
            self.ensure_valid_token().await?;
            let auth = {
                let token = self.token.lock().await;
                token.header_value()?
            };

            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, auth);
            if let Some(json_body) = body {
                req = req.json(json_body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    let timed_out = err.is_timeout();
                    if attempt < self.config.max_retries {
                        let delay =
                            self.config.retry_backoff * self.config.backoff_base.pow(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max = self.config.max_retries,
                            ?delay,
                            error = %err,
                            "transport error, retrying",
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    error!(retries = self.config.max_retries, error = %err, "retries exhausted");
                    return Err(if timed_out {
                        Error::Timeout {
                            message: format!(
                                "request timed out after {} retries",
                                self.config.max_retries
                            ),
                        }
                    } else {
                        Error::Connection {
                            message: format!(
                                "failed to connect after {} retries",
                                self.config.max_retries
                            ),
                        }
                    });
                }
            };

            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED && !refreshed_token {
                debug!("received 401, refreshing token and retrying");
                let mut token = self.token.lock().await;
                self.do_login(&mut token).await?;
                drop(token);
                refreshed_token = true;
                continue;
            }

            if !matches!(status.as_u16(), 200 | 201 | 204) {
                let text = resp.text().await.unwrap_or_default();
                error!(status = status.as_u16(), body = %text, "API request failed");
                return Err(Error::Api {
                    status: Some(status.as_u16()),
                    message: format!("API request failed with status {}", status.as_u16()),
                });
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Object(serde_json::Map::new()));
            }

            return resp.json().await.map_err(|e| Error::Api {
                status: None,
                message: format!("malformed response body: {e}"),
            });
        }
    }

    // ── Device operations ────────────────────────────────────────────

    /// Fetch the device list, serving from cache while it is fresh.
    ///
    /// `force_refresh` bypasses the cache unconditionally. A response with
    /// no `devices` field is an empty list; a non-list `devices` field is
    /// an API error. The cache is replaced wholesale, never mutated.
    pub async fn get_devices(&self, force_refresh: bool) -> Result<Vec<DeviceRecord>, Error> {
        if !force_refresh {
            let cache = self.device_cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.config.device_cache_ttl {
                    debug!("returning cached device list");
                    return Ok(cached.entries.clone());
                }
            }
        }

        debug!("fetching device list");
        let response = self.request(Method::GET, ENDPOINT_DEVICES, None).await?;

        let devices: Vec<DeviceRecord> = match response.get("devices") {
            None => Vec::new(),
            Some(raw) if raw.is_array() => {
                serde_json::from_value(raw.clone()).map_err(|e| Error::Api {
                    status: None,
                    message: format!("malformed device entry: {e}"),
                })?
            }
            Some(_) => {
                error!("invalid devices response: expected a list");
                return Err(Error::Api {
                    status: None,
                    message: "invalid devices response format: expected a list".into(),
                });
            }
        };

        *self.device_cache.lock().await = Some(DeviceCache {
            entries: devices.clone(),
            fetched_at: Instant::now(),
        });
        debug!(count = devices.len(), "fetched and cached devices");
        Ok(devices)
    }

    /// Switch a device relay.
    ///
    /// Commands serialize behind a single queue lock — even for different
    /// devices — in first-acquired order. Validation happens before any
    /// lock or network activity.
    pub async fn set_relay(&self, guid: &str, state: RelayState) -> Result<(), Error> {
        if guid.is_empty() {
            return Err(Error::InvalidDevice {
                message: "device GUID must be a non-empty string".into(),
            });
        }

        let _queue = self.relay_lock.lock().await;
        debug!(%guid, %state, "setting relay");
        self.request(
            Method::PUT,
            &relay_endpoint(guid),
            Some(&json!({ "value": state.as_str() })),
        )
        .await?;
        debug!(%guid, %state, "relay set");
        Ok(())
    }

    /// Consume the client, dropping its handle on the connection pool.
    ///
    /// A pool built by [`new`](Self::new) is released once this handle is
    /// gone; one supplied via [`with_client`](Self::with_client) stays
    /// alive with its owner.
    pub fn close(self) {
        debug!("relay client closed");
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            message: format!("request timed out: {err}"),
        }
    } else {
        Error::Connection {
            message: format!("failed to connect to device: {err}"),
        }
    }
}
