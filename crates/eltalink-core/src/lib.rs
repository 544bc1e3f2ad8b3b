//! State coordination layer between `eltalink-api` and host applications.
//!
//! The session client is pure request/response; this crate adds the
//! notion of "previous state":
//!
//! - **[`Coordinator`]** — drives refreshes (on demand or via
//!   [`spawn_polling`](Coordinator::spawn_polling)), reconciles discovery
//!   results against the known-device map, applies optimistic updates
//!   issued after relay commands, and tracks consecutive refresh failures.
//!
//! - **[`HealthNotification`]** — degraded/recovered signal broadcast once
//!   per failure streak, with a category-specific troubleshooting message
//!   for user-visible alerts.
//!
//! - **[`KnownDevice`]** / [`DeviceMap`] — the merged optimistic view,
//!   published wholesale through a `watch` channel so subscribers never
//!   see a partially updated map.
//!
//! The expected caller contract: call [`Coordinator::refresh`] on a timer
//! or on demand, [`Coordinator::set_device_state_optimistic`] right after
//! a successful command, [`Coordinator::mark_device_unavailable`] after a
//! failed one, and subscribe to health notifications for alerts.

pub mod coordinator;
pub mod error;
pub mod model;

pub use coordinator::{Coordinator, CoordinatorConfig, HealthNotification};
pub use error::{CoreError, ErrorCategory};
pub use model::{DeviceMap, KnownDevice};
