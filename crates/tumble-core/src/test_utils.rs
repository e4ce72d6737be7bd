//! Test utilities for headless session tests.
//!
//! Provides `TestSession`, a `LevelSession` wired to recording collaborators
//! so tests can drive frames and inspect what the UI, renderer and store
//! were told.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::collab::{
    Collaborators, MemoryStore, NullVisuals, Persistence, UiSink, VisualHandle, VisualSink,
};
use crate::command::{InputEvent, SessionCommand};
use crate::config::SessionConfig;
use crate::error::PersistenceError;
use crate::goals::LevelSummary;
use crate::level::{ConstraintDef, LevelConfig, LevelObject, WorldParams};
use crate::mode::InteractionMode;
use crate::objective::GoalStatus;
use crate::physics::BodyState;
use crate::session::LevelSession;

/// One frame at 60 FPS.
pub(crate) const FRAME_DT: f32 = 1.0 / 60.0;

/// Small level used by session tests.
///
/// A loose block hangs above the ground and a ball rests inside the
/// landing zone, so a run ends after half a second with every objective
/// complete.
pub(crate) const TEST_LEVEL_JSON: &str = r#"{
    "meta": { "id": "test-1", "name": "Test", "nextLevel": "test-2" },
    "world": {
        "workingBounds": { "min": [-5, 0.5], "max": [5, 6] },
        "simulationBounds": { "min": [-8, -1], "max": [8, 12] }
    },
    "objects": [
        { "id": "ground", "shape": { "type": "box", "width": 16, "height": 1 },
          "position": [0, 0], "isStatic": true },
        { "id": "block-1", "shape": { "type": "box", "width": 1, "height": 1 },
          "position": [0, 3], "source": "block" },
        { "id": "ball", "shape": { "type": "circle", "radius": 0.4 },
          "position": [3, 0.9], "restitution": 0 }
    ],
    "inventory": [
        { "id": "block", "shape": { "type": "box", "width": 1, "height": 1 }, "count": 3 }
    ],
    "objectives": [
        { "type": "stayInZone", "id": "landing", "target": "ball",
          "zone": { "x": 2, "y": 0, "w": 2, "h": 2 }, "duration": 0.5 }
    ],
    "endConditions": [
        { "type": "stayInZoneEnd", "id": "landed", "objective": "landing" },
        { "type": "timeLimit", "id": "clock", "duration": 5 }
    ]
}"#;

pub(crate) fn test_level() -> LevelConfig {
    LevelConfig::from_json(TEST_LEVEL_JSON).expect("Failed to parse test level JSON")
}

/// Notifications received by `RecordingUi`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UiEvent {
    Status(Vec<GoalStatus>),
    LevelEnd(LevelSummary),
    HideLevelEnd,
    ShowPanel(String),
    HidePanel,
    ClearSelection,
    Interaction(InteractionMode),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingUi {
    pub events: Arc<Mutex<Vec<UiEvent>>>,
}

impl RecordingUi {
    pub fn count(&self, pred: impl Fn(&UiEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl UiSink for RecordingUi {
    fn show_status(&mut self, statuses: &[GoalStatus]) {
        self.events.lock().push(UiEvent::Status(statuses.to_vec()));
    }

    fn show_level_end(&mut self, summary: &LevelSummary) {
        self.events.lock().push(UiEvent::LevelEnd(summary.clone()));
    }

    fn hide_level_end(&mut self) {
        self.events.lock().push(UiEvent::HideLevelEnd);
    }

    fn show_property_panel(&mut self, object: &LevelObject) {
        self.events.lock().push(UiEvent::ShowPanel(object.id.clone()));
    }

    fn hide_property_panel(&mut self) {
        self.events.lock().push(UiEvent::HidePanel);
    }

    fn clear_selection(&mut self) {
        self.events.lock().push(UiEvent::ClearSelection);
    }

    fn set_interaction_mode(&mut self, mode: InteractionMode) {
        self.events.lock().push(UiEvent::Interaction(mode));
    }
}

/// What the renderer was asked to do.
#[derive(Debug, Default)]
pub(crate) struct VisualLog {
    pub created: usize,
    pub synced: usize,
    pub updates: usize,
    pub disposed: usize,
    pub simulation_visuals: bool,
    pub live: Vec<VisualHandle>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingVisuals {
    pub log: Arc<Mutex<VisualLog>>,
    inner: Arc<Mutex<NullVisuals>>,
}

impl VisualSink for RecordingVisuals {
    fn create_visuals(
        &mut self,
        objects: &[LevelObject],
        constraints: &[ConstraintDef],
        world: &WorldParams,
    ) -> Vec<VisualHandle> {
        let handles = self.inner.lock().create_visuals(objects, constraints, world);
        let mut log = self.log.lock();
        log.created += handles.len();
        log.live.clone_from(&handles);
        handles
    }

    fn update_visuals(&mut self, _handles: &[VisualHandle], _bodies: &[BodyState]) {
        self.log.lock().updates += 1;
    }

    fn sync_visuals(
        &mut self,
        objects: &[LevelObject],
        constraints: &[ConstraintDef],
        world: &WorldParams,
        existing: Vec<VisualHandle>,
    ) -> Vec<VisualHandle> {
        let handles = self
            .inner
            .lock()
            .sync_visuals(objects, constraints, world, existing);
        let mut log = self.log.lock();
        log.synced += 1;
        log.live.clone_from(&handles);
        handles
    }

    fn dispose_visuals(&mut self, handles: Vec<VisualHandle>) {
        self.log.lock().disposed += handles.len();
    }

    fn set_simulation_visuals(&mut self, active: bool) {
        self.log.lock().simulation_visuals = active;
    }
}

/// Memory store shared between the session and the test.
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStore {
    pub inner: Arc<Mutex<MemoryStore>>,
}

impl SharedStore {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().get(key).map(str::to_string)
    }
}

impl Persistence for SharedStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        self.inner.lock().save(key, value)
    }

    fn load(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        self.inner.lock().load(key)
    }
}

/// A level session wired to recording collaborators.
pub(crate) struct TestSession {
    pub session: LevelSession,
    pub ui: RecordingUi,
    pub visuals: RecordingVisuals,
    pub store: SharedStore,
}

impl TestSession {
    /// Session on the test level with an empty store.
    pub fn new() -> Self {
        Self::with_level(test_level())
    }

    pub fn with_level(level: LevelConfig) -> Self {
        Self::with_store(level, MemoryStore::new())
    }

    pub fn with_store(level: LevelConfig, store: MemoryStore) -> Self {
        let ui = RecordingUi::default();
        let visuals = RecordingVisuals::default();
        let store = SharedStore::new(store);
        let collab = Collaborators {
            persistence: Box::new(store.clone()),
            visuals: Box::new(visuals.clone()),
            ui: Box::new(ui.clone()),
        };
        let session = LevelSession::new(SessionConfig::default(), collab, level);
        Self {
            session,
            ui,
            visuals,
            store,
        }
    }

    /// Push a command to the session's queue.
    pub fn push(&self, command: SessionCommand) {
        self.session.commands().push(command);
    }

    pub fn input(&self, event: InputEvent) {
        self.session.commands().push_input(event);
    }

    /// Run a single frame.
    pub fn frame(&mut self) {
        self.session.frame(FRAME_DT);
    }

    /// Run `n` frames.
    pub fn frames(&mut self, n: usize) {
        for _ in 0..n {
            self.frame();
        }
    }

    /// Push a command and run the frame that processes it.
    pub fn send(&mut self, command: SessionCommand) {
        self.push(command);
        self.frame();
    }

    pub fn level_end_count(&self) -> usize {
        self.ui.count(|e| matches!(e, UiEvent::LevelEnd(_)))
    }
}
