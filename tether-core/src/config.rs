//! Host configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::reactive::DEFAULT_SNAPSHOT_DEPTH;
use crate::scheduler::Operator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Capacity of the event bus broadcast channel.
    pub event_bus_capacity: usize,
    /// Operator used by an action invocation until a `use_*` hook changes it.
    pub default_operator: Operator,
    /// How deep state snapshots follow nested objects.
    pub snapshot_depth: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: 1024,
            default_operator: Operator::Switch,
            snapshot_depth: DEFAULT_SNAPSHOT_DEPTH,
        }
    }
}

impl HostConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StoreError::Config(e.to_string()))
    }
}
