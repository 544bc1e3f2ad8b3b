//! Async client for the Eltako ESR62PF-IP relay controller.
//!
//! The controller exposes a small HTTPS API (self-signed certificate by
//! default) behind a proof-of-possession login. This crate owns the full
//! session lifecycle so callers never deal with tokens directly:
//!
//! - **[`RelayClient`]** — authenticated request primitive with a cached
//!   login token (15 min TTL, single-flight refresh), a short-lived device
//!   list cache, bounded exponential-backoff retries for transport
//!   failures, and a serialized relay command queue.
//!
//! - **[`TransportConfig`]** — shared TLS / timeout settings for building
//!   the underlying `reqwest::Client`. Self-signed certificates are the
//!   norm for this device class, so [`TlsMode::DangerAcceptInvalid`] is
//!   the default.
//!
//! - **Wire model** ([`model`]) — [`DeviceRecord`] as returned by the
//!   `/api/v0/devices` endpoint and the [`RelayState`] command value.
//!
//! Higher-level state reconciliation (optimistic updates, availability
//! tracking) lives in `eltalink-core`.

pub mod client;
pub mod error;
pub mod model;
pub mod transport;

pub use client::{ClientConfig, RelayClient};
pub use error::Error;
pub use model::{DeviceFunction, DeviceRecord, RelayState};
pub use transport::{TlsMode, TransportConfig};
