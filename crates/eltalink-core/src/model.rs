// ── Coordinator-owned device state ──

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use eltalink_api::RelayState;

/// Everything the coordinator knows about one relay device.
///
/// `state` is `None` until the first command or reported state; the
/// device list endpoint only returns metadata, not relay positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub guid: String,
    pub name: String,
    pub state: Option<RelayState>,
    pub available: bool,
}

impl KnownDevice {
    /// Fresh entry for a newly discovered device.
    pub(crate) fn discovered(guid: String, name: String) -> Self {
        Self {
            guid,
            name,
            state: None,
            available: true,
        }
    }
}

/// Immutable snapshot of the known-device map, swapped wholesale on
/// every mutation so subscribers never observe a partial update.
pub type DeviceMap = Arc<HashMap<String, KnownDevice>>;

/// Display name for devices the controller didn't name (or that were
/// commanded before discovery).
pub(crate) fn synthesized_name(guid: &str) -> String {
    let short: String = guid.chars().take(8).collect();
    format!("Relay {short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_name_truncates_long_guids() {
        assert_eq!(
            synthesized_name("0123456789abcdef"),
            "Relay 01234567"
        );
        assert_eq!(synthesized_name("d1"), "Relay d1");
    }
}
