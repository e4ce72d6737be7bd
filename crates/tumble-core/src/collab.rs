//! Collaborator interfaces.
//!
//! Rendering, UI and durable storage live outside the core. The session
//! reaches them only through these traits; every method is fire-and-forget
//! from the session's point of view except persistence, whose errors are
//! logged and swallowed by the caller.

use std::collections::HashMap;

use crate::error::PersistenceError;
use crate::goals::LevelSummary;
use crate::level::{ConstraintDef, LevelObject, WorldParams};
use crate::mode::InteractionMode;
use crate::objective::GoalStatus;
use crate::physics::BodyState;

/// Key/value storage for level arrangements and progress.
pub trait Persistence {
    fn save(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError>;
}

/// Opaque handle to a visual owned by the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisualHandle {
    pub body_id: String,
    pub key: u64,
}

/// Renderer side of the scene.
pub trait VisualSink {
    fn create_visuals(
        &mut self,
        objects: &[LevelObject],
        constraints: &[ConstraintDef],
        world: &WorldParams,
    ) -> Vec<VisualHandle>;

    /// Pushes current body poses to existing visuals.
    fn update_visuals(&mut self, handles: &[VisualHandle], bodies: &[BodyState]);

    /// Reconciles visuals with an edited document, reusing what it can.
    fn sync_visuals(
        &mut self,
        objects: &[LevelObject],
        constraints: &[ConstraintDef],
        world: &WorldParams,
        existing: Vec<VisualHandle>,
    ) -> Vec<VisualHandle>;

    fn dispose_visuals(&mut self, handles: Vec<VisualHandle>);

    /// Shows or hides simulation-only decorations such as boundary walls.
    fn set_simulation_visuals(&mut self, _active: bool) {}
}

/// Interface panels and overlays.
pub trait UiSink {
    fn show_status(&mut self, _statuses: &[GoalStatus]) {}
    fn show_level_end(&mut self, _summary: &LevelSummary) {}
    fn hide_level_end(&mut self) {}
    fn show_property_panel(&mut self, _object: &LevelObject) {}
    fn hide_property_panel(&mut self) {}
    fn clear_selection(&mut self) {}
    fn set_interaction_mode(&mut self, _mode: InteractionMode) {}
}

/// In-memory store, optionally bounded in total bytes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    capacity: Option<usize>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::default()
        }
    }

    /// A store whose every call fails.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn used_bytes_without(&self, key: &str) -> usize {
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl Persistence for MemoryStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if self.unavailable {
            return Err(PersistenceError::Unavailable("memory store disabled".to_string()));
        }
        if let Some(capacity) = self.capacity {
            let needed = key.len() + value.len();
            let available = capacity.saturating_sub(self.used_bytes_without(key));
            if needed > available {
                return Err(PersistenceError::Full {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        if self.unavailable {
            return Err(PersistenceError::Unavailable("memory store disabled".to_string()));
        }
        Ok(self.entries.get(key).cloned())
    }
}

/// Renderer that draws nothing but hands out stable handles.
#[derive(Debug, Clone, Default)]
pub struct NullVisuals {
    next_key: u64,
}

impl NullVisuals {
    fn handles_for(&mut self, objects: &[LevelObject]) -> Vec<VisualHandle> {
        objects
            .iter()
            .map(|o| {
                self.next_key += 1;
                VisualHandle {
                    body_id: o.id.clone(),
                    key: self.next_key,
                }
            })
            .collect()
    }
}

impl VisualSink for NullVisuals {
    fn create_visuals(
        &mut self,
        objects: &[LevelObject],
        _constraints: &[ConstraintDef],
        _world: &WorldParams,
    ) -> Vec<VisualHandle> {
        self.handles_for(objects)
    }

    fn update_visuals(&mut self, _handles: &[VisualHandle], _bodies: &[BodyState]) {}

    fn sync_visuals(
        &mut self,
        objects: &[LevelObject],
        _constraints: &[ConstraintDef],
        _world: &WorldParams,
        existing: Vec<VisualHandle>,
    ) -> Vec<VisualHandle> {
        let mut kept: Vec<VisualHandle> = existing
            .into_iter()
            .filter(|h| objects.iter().any(|o| o.id == h.body_id))
            .collect();
        let missing: Vec<LevelObject> = objects
            .iter()
            .filter(|o| !kept.iter().any(|h| h.body_id == o.id))
            .cloned()
            .collect();
        kept.extend(self.handles_for(&missing));
        kept
    }

    fn dispose_visuals(&mut self, _handles: Vec<VisualHandle>) {}
}

/// UI that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullUi;

impl UiSink for NullUi {}

/// The session's outside world.
pub struct Collaborators {
    pub persistence: Box<dyn Persistence>,
    pub visuals: Box<dyn VisualSink>,
    pub ui: Box<dyn UiSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            persistence: Box::new(MemoryStore::new()),
            visuals: Box::new(NullVisuals::default()),
            ui: Box::new(NullUi),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.save("level:a", "{}").unwrap();
        assert_eq!(store.load("level:a").unwrap().as_deref(), Some("{}"));
        assert_eq!(store.load("level:b").unwrap(), None);
    }

    #[test]
    fn test_memory_store_full() {
        let mut store = MemoryStore::with_capacity(16);
        store.save("k", "0123456789").unwrap();
        // Overwriting the same key only counts the new value.
        store.save("k", "abcdefghij").unwrap();
        let err = store.save("other", "0123456789").unwrap_err();
        assert!(matches!(err, PersistenceError::Full { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unavailable_store() {
        let mut store = MemoryStore::unavailable();
        assert!(store.save("k", "v").is_err());
        assert!(store.load("k").is_err());
    }

    #[test]
    fn test_null_visuals_sync_reuses_handles() {
        let mut visuals = NullVisuals::default();
        let level = crate::level::LevelConfig::default_level();
        let handles = visuals.create_visuals(&level.objects, &level.constraints, &level.world);
        assert_eq!(handles.len(), level.objects.len());

        let objects = &level.objects[..1];
        let synced = visuals.sync_visuals(objects, &[], &level.world, handles.clone());
        assert_eq!(synced, vec![handles[0].clone()]);
    }
}
