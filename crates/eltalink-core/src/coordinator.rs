// ── Device state coordinator ──
//
// Drives refreshes through the RelayClient, reconciles discovery results
// against known state, applies optimistic command-driven updates, and
// tracks consecutive failures for the degraded/recovered health signal.
// Freestanding component: subscribers attach via watch/broadcast channels
// rather than host lifecycle hooks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use eltalink_api::{DeviceRecord, Error as ApiError, RelayClient, RelayState};

use crate::error::{CoreError, ErrorCategory};
use crate::model::{DeviceMap, KnownDevice, synthesized_name};

const HEALTH_CHANNEL_SIZE: usize = 16;

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Failures in a row before a degraded notification is signaled.
    pub max_consecutive_failures: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
        }
    }
}

/// Degraded/recovered signal for user-visible alerts.
///
/// `Degraded` is sent exactly once per unbroken failure streak;
/// `Recovered` exactly once when a success follows a degraded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthNotification {
    Degraded {
        category: ErrorCategory,
        message: String,
    },
    Recovered,
}

#[derive(Default)]
struct CoordinatorState {
    devices: HashMap<String, KnownDevice>,
    consecutive_failures: u32,
    last_error: Option<String>,
    degraded_notice_shown: bool,
}

/// Orchestrates refreshes and owns the known-device map.
///
/// Polling is opt-in ([`spawn_polling`](Self::spawn_polling)); by default
/// the coordinator relies on caller-driven refreshes plus optimistic
/// updates after relay commands.
pub struct Coordinator {
    client: RelayClient,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    updates: watch::Sender<DeviceMap>,
    health: broadcast::Sender<HealthNotification>,
}

impl Coordinator {
    pub fn new(client: RelayClient, config: CoordinatorConfig) -> Self {
        let (updates, _) = watch::channel(Arc::new(HashMap::new()));
        let (health, _) = broadcast::channel(HEALTH_CHANNEL_SIZE);
        Self {
            client,
            config,
            state: Mutex::new(CoordinatorState::default()),
            updates,
            health,
        }
    }

    /// The session client, for issuing relay commands.
    pub fn client(&self) -> &RelayClient {
        &self.client
    }

    // ── Refresh cycle ────────────────────────────────────────────────

    /// Fetch devices and reconcile against known state.
    ///
    /// Relay-capable devices already known keep their `{state, available}`
    /// and get their name refreshed; new ones start unknown and available.
    /// Devices absent from the fetch are dropped from the map. On failure
    /// the tracker is bumped, every known device flips unavailable, and
    /// the wrapped error carries a category-specific message.
    pub async fn refresh(&self) -> Result<DeviceMap, CoreError> {
        debug!("fetching device states");
        match self.client.get_devices(false).await {
            Ok(devices) => Ok(self.apply_discovery(devices)),
            Err(err) => Err(self.record_failure(err)),
        }
    }

    fn apply_discovery(&self, devices: Vec<DeviceRecord>) -> DeviceMap {
        let total = devices.len();
        let snapshot;
        let was_degraded;
        {
            let mut state = self.state.lock().expect("state lock poisoned");

            let mut next: HashMap<String, KnownDevice> = HashMap::new();
            for device in devices.into_iter().filter(DeviceRecord::has_relay_function) {
                let Some(guid) = device.guid else {
                    warn!(name = ?device.name, "device missing GUID, skipping");
                    continue;
                };
                let name = device.name.unwrap_or_else(|| synthesized_name(&guid));
                let entry = match state.devices.get(&guid) {
                    Some(existing) => KnownDevice {
                        guid: guid.clone(),
                        name,
                        state: existing.state,
                        available: existing.available,
                    },
                    None => KnownDevice::discovered(guid.clone(), name),
                };
                next.insert(guid, entry);
            }
            debug!(relay = next.len(), total, "filtered discovery results");

            let was_failing = state.consecutive_failures > 0;
            was_degraded = state.degraded_notice_shown;
            state.consecutive_failures = 0;
            state.last_error = None;
            state.degraded_notice_shown = false;

            if was_failing {
                info!("connection to relay controller restored");
                for device in next.values_mut() {
                    device.available = true;
                }
            }

            state.devices = next;
            snapshot = Arc::new(state.devices.clone());
        }

        if was_degraded {
            let _ = self.health.send(HealthNotification::Recovered);
        }
        self.updates.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    fn record_failure(&self, err: ApiError) -> CoreError {
        let category = ErrorCategory::from_error(&err);
        let message = self.failure_message(category, &err);
        match category {
            ErrorCategory::Connection | ErrorCategory::Timeout => {
                warn!(%category, error = %err, "device fetch failed");
            }
            _ => error!(%category, error = %err, "device fetch failed"),
        }

        let snapshot;
        let signal_degraded;
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.consecutive_failures += 1;
            state.last_error = Some(err.to_string());
            for device in state.devices.values_mut() {
                device.available = false;
            }

            signal_degraded = state.consecutive_failures >= self.config.max_consecutive_failures
                && !state.degraded_notice_shown;
            if signal_degraded {
                state.degraded_notice_shown = true;
            }
            snapshot = Arc::new(state.devices.clone());
        }

        self.updates.send_replace(snapshot);
        if signal_degraded {
            let _ = self.health.send(HealthNotification::Degraded {
                category,
                message: message.clone(),
            });
        }

        CoreError::UpdateFailed {
            category,
            message,
            source: err,
        }
    }

    fn failure_message(&self, category: ErrorCategory, err: &ApiError) -> String {
        match category {
            ErrorCategory::Connection => {
                let url = self.client.base_url();
                let host = url.host_str().unwrap_or("unknown");
                match url.port_or_known_default() {
                    Some(port) => {
                        format!("Cannot connect to the Eltako controller at {host}:{port}")
                    }
                    None => format!("Cannot connect to the Eltako controller at {host}"),
                }
            }
            ErrorCategory::Authentication => {
                "Authentication with the Eltako controller failed; check the PoP credential"
                    .to_owned()
            }
            ErrorCategory::Timeout => "Request to the Eltako controller timed out".to_owned(),
            ErrorCategory::Api => format!("Eltako API error: {err}"),
            ErrorCategory::Unexpected => format!("Unexpected error: {err}"),
        }
    }

    // ── Optimistic updates ───────────────────────────────────────────

    /// Upsert a device state immediately, without any network refresh.
    ///
    /// Called after a successful relay command for instant feedback;
    /// creates the entry (with a synthesized name) if the device hasn't
    /// been discovered yet.
    pub fn set_device_state_optimistic(&self, guid: &str, relay_state: RelayState) {
        debug!(%guid, state = %relay_state, "optimistic state update");
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let entry = state
                .devices
                .entry(guid.to_owned())
                .or_insert_with(|| KnownDevice::discovered(guid.to_owned(), synthesized_name(guid)));
            entry.state = Some(relay_state);
            entry.available = true;
            Arc::new(state.devices.clone())
        };
        self.updates.send_replace(snapshot);
    }

    /// Flip a device unavailable after a failed command.
    pub fn mark_device_unavailable(&self, guid: &str) {
        let snapshot = {
            let mut state = self.state.lock().expect("state lock poisoned");
            let Some(entry) = state.devices.get_mut(guid) else {
                return;
            };
            warn!(%guid, "marking device unavailable");
            entry.available = false;
            Arc::new(state.devices.clone())
        };
        self.updates.send_replace(snapshot);
    }

    // ── State observation ────────────────────────────────────────────

    /// Current known-device snapshot.
    pub fn devices(&self) -> DeviceMap {
        self.updates.borrow().clone()
    }

    /// Subscribe to device map updates.
    pub fn subscribe(&self) -> watch::Receiver<DeviceMap> {
        self.updates.subscribe()
    }

    /// Subscribe to degraded/recovered health notifications.
    pub fn health_notifications(&self) -> broadcast::Receiver<HealthNotification> {
        self.health.subscribe()
    }

    /// Refresh failures in a row; reset to zero on any success.
    pub fn consecutive_failures(&self) -> u32 {
        self.state
            .lock()
            .expect("state lock poisoned")
            .consecutive_failures
    }

    /// Message of the most recent refresh failure, if still failing.
    pub fn last_error(&self) -> Option<String> {
        self.state
            .lock()
            .expect("state lock poisoned")
            .last_error
            .clone()
    }

    // ── Polling ──────────────────────────────────────────────────────

    /// Spawn a periodic refresh task. The first refresh happens one full
    /// `interval` after spawning; failures are already tracked and
    /// surfaced through the health channel, so they are only logged here.
    pub fn spawn_polling(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = coordinator.refresh().await {
                            debug!(error = %err, "periodic refresh failed");
                        }
                    }
                }
            }
            debug!("polling task stopped");
        })
    }
}
