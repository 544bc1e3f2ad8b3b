// ── Wire types for the ESR62PF HTTP API ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// Commanded relay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    /// The wire value sent in relay command bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelayState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            other => Err(Error::Api {
                status: None,
                message: format!("invalid relay state: {other:?} (must be \"on\" or \"off\")"),
            }),
        }
    }
}

/// A controllable capability advertised by a device.
///
/// Only `identifier == "relay"` is meaningful to this crate; everything
/// else is carried through untouched in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceFunction {
    #[serde(default)]
    pub identifier: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A device entry from `GET /api/v0/devices`.
///
/// The firmware omits fields freely, so everything is optional or
/// defaulted; records without a `guid` are dropped downstream rather
/// than failing the whole fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_functions")]
    pub functions: Vec<DeviceFunction>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The firmware has been observed emitting garbage in `functions`.
/// A non-list value, or a non-object element within the list, degrades
/// the device to "no functions" instead of failing the whole fetch.
fn lenient_functions<'de, D>(deserializer: D) -> Result<Vec<DeviceFunction>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let Some(items) = value.as_array() else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect())
}

impl DeviceRecord {
    /// Whether this device can be switched: any function entry with
    /// identifier `"relay"` qualifies it.
    pub fn has_relay_function(&self) -> bool {
        self.functions.iter().any(|f| f.identifier == "relay")
    }
}
