//! Tumble Core Library
//!
//! Simulation orchestrator for a rigid-shape building puzzle, using `Rapier2D`
//! with fixed-step integration.
//!
//! A `LevelSession` owns one level: the construction / configuration /
//! simulation mode machine, the fixed-step scheduler, the drag controller,
//! objective and end-condition evaluation, and bounded undo/redo history.
//! Rendering, UI and storage are reached through the traits in `collab`.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod collab;
pub mod command;
pub mod condition;
pub mod config;
pub mod drag;
pub mod error;
pub mod goals;
pub mod history;
pub mod level;
pub mod mode;
pub mod objective;
pub mod physics;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod test_utils;

pub use collab::{
    Collaborators, MemoryStore, NullUi, NullVisuals, Persistence, UiSink, VisualHandle,
    VisualSink,
};
pub use command::{CommandQueue, InputEvent, KeyAction, SessionCommand};
pub use condition::{Condition, ConditionDef, ConditionKind};
pub use config::SessionConfig;
pub use drag::{DragConfig, DragController, DragSession, ReleasedBody};
pub use error::{DefinitionError, DragError, LevelError, PersistenceError};
pub use goals::{GoalBook, LevelSummary, ObjectiveScore};
pub use history::{HISTORY_CAPACITY, HistoryManager, Snapshot};
pub use level::{
    Bounds, ConstraintDef, InventoryItem, LevelConfig, LevelMeta, LevelObject, ObjectPatch, Pose,
    ShapeDef, WorldParams,
};
pub use mode::{InteractionMode, Mode};
pub use objective::{
    Completion, GoalStatus, Objective, ObjectiveDef, ObjectiveKind, StarThreshold, Zone,
};
pub use physics::{BodyState, PHYSICS_DT, PhysicsWorld, default_gravity};
pub use scheduler::{
    CadenceConfig, CadenceProfile, MAX_SUBSTEPS, MIN_SUBSTEPS, PhysicsScheduler, SchedulerConfig,
};
pub use session::LevelSession;
