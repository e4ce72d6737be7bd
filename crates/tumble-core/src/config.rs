//! Orchestrator tunables.

use serde::{Deserialize, Serialize};

use crate::drag::DragConfig;
use crate::history::HISTORY_CAPACITY;
use crate::scheduler::SchedulerConfig;

/// Session configuration. Every field has a default, so `{}` is valid JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub scheduler: SchedulerConfig,
    pub drag: DragConfig,
    pub history_capacity: usize,
    /// Prefix prepended to every persistence key.
    pub storage_prefix: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            drag: DragConfig::default(),
            history_capacity: HISTORY_CAPACITY,
            storage_prefix: String::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Persistence key of a level's saved arrangement.
    pub fn level_key(&self, level_id: &str) -> String {
        format!("{}level:{}", self.storage_prefix, level_id)
    }

    /// Persistence key recording that a level is unlocked.
    pub fn unlock_key(&self, level_id: &str) -> String {
        format!("{}progress:unlocked:{}", self.storage_prefix, level_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.history_capacity, 50);
    }

    #[test]
    fn test_partial_override() {
        let config = SessionConfig::from_json(
            r#"{ "scheduler": { "maxSubsteps": 4 }, "drag": { "dragMass": 0.1 }, "storagePrefix": "t/" }"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_substeps, 4);
        assert_eq!(config.scheduler.min_substeps, 1);
        assert_eq!(config.drag.drag_mass, 0.1);
        assert_eq!(config.drag.stiffness, 40.0);
        assert_eq!(config.level_key("a"), "t/level:a");
        assert_eq!(config.unlock_key("b"), "t/progress:unlocked:b");
    }
}
