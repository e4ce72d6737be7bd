//! Level session: the mode state machine and per-frame driver.
//!
//! One `LevelSession` owns everything that lives for the duration of a
//! level: the live document, history, physics world, scheduler, drag
//! controller, goals and collaborators. Hosts talk to it through the
//! `CommandQueue` and call `frame(dt)` once per display frame.
//!
//! Frame order:
//! 1. drain queued commands
//! 2. physics sub-stepping
//! 3. drag controller update
//! 4. visual pose synchronization
//! 5. objective and condition evaluation (simulation only, until level end)
//! 6. UI status refresh
//! 7. level-end check

use std::sync::Arc;

use rapier2d::prelude::{ColliderHandle, Vector};

use crate::collab::{Collaborators, VisualHandle};
use crate::command::{CommandQueue, InputEvent, KeyAction, SessionCommand};
use crate::config::SessionConfig;
use crate::drag::DragController;
use crate::error::LevelError;
use crate::goals::{GoalBook, LevelSummary};
use crate::history::{HistoryManager, Snapshot};
use crate::level::{LevelConfig, LevelObject, ObjectPatch, Pose};
use crate::mode::{InteractionMode, Mode};
use crate::physics::{BodyState, PhysicsWorld, distance};
use crate::scheduler::{CadenceProfile, PhysicsScheduler};

pub struct LevelSession {
    config: SessionConfig,
    level: Snapshot,
    mode: Mode,
    /// Mode to return to when a run is stopped.
    previous_mode: Mode,
    interaction: InteractionMode,
    world: PhysicsWorld,
    scheduler: PhysicsScheduler,
    drag: DragController,
    /// Set while a drag runs outside simulation; selects the dragging cadence.
    drag_paused: bool,
    history: HistoryManager,
    goals: GoalBook,
    commands: CommandQueue,
    collab: Collaborators,
    visuals: Vec<VisualHandle>,
    walls: Vec<ColliderHandle>,
    /// Inventory item armed for the next pointer press.
    pending_placement: Option<String>,
    /// Piece being placed; only in the world until released.
    placing: Option<LevelObject>,
    selection: Option<String>,
    elapsed: f32,
    level_ended: bool,
    last_summary: Option<LevelSummary>,
}

/// Pose change below which a released drag is not recorded.
const MOVE_EPSILON: f32 = 1e-3;

fn pose_moved(before: Pose, after: Pose) -> bool {
    distance(before.position, after.position) > MOVE_EPSILON
        || (before.angle - after.angle).abs() > MOVE_EPSILON
}

impl std::fmt::Debug for LevelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelSession")
            .field("level", &self.level.meta.id)
            .field("mode", &self.mode)
            .field("elapsed", &self.elapsed)
            .field("level_ended", &self.level_ended)
            .finish_non_exhaustive()
    }
}

impl LevelSession {
    /// Creates a session and performs a fresh load of `level`.
    pub fn new(config: SessionConfig, collab: Collaborators, level: LevelConfig) -> Self {
        let mut session = Self {
            scheduler: PhysicsScheduler::new(config.scheduler.clone()),
            drag: DragController::new(config.drag.clone()),
            history: HistoryManager::new(config.history_capacity),
            config,
            level: Arc::new(LevelConfig::default()),
            mode: Mode::Construction,
            previous_mode: Mode::Construction,
            interaction: InteractionMode::Manipulate,
            world: PhysicsWorld::new(),
            drag_paused: false,
            goals: GoalBook::default(),
            commands: CommandQueue::new(),
            collab,
            visuals: Vec::new(),
            walls: Vec::new(),
            pending_placement: None,
            placing: None,
            selection: None,
            elapsed: 0.0,
            level_ended: false,
            last_summary: None,
        };
        session.load_level(level);
        session
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn previous_mode(&self) -> Mode {
        self.previous_mode
    }

    pub fn interaction_mode(&self) -> InteractionMode {
        self.interaction
    }

    pub fn level(&self) -> &LevelConfig {
        &self.level
    }

    /// Cheap handle to the current document.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.level)
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn goals(&self) -> &GoalBook {
        &self.goals
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn drag(&self) -> &DragController {
        &self.drag
    }

    pub fn is_drag_paused(&self) -> bool {
        self.drag_paused
    }

    pub fn pending_placement(&self) -> Option<&str> {
        self.pending_placement.as_deref()
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Simulated seconds since the current run started.
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn is_level_ended(&self) -> bool {
        self.level_ended
    }

    pub fn last_summary(&self) -> Option<&LevelSummary> {
        self.last_summary.as_ref()
    }

    /// Handle for pushing commands; clones share the same queue.
    pub fn commands(&self) -> CommandQueue {
        self.commands.clone()
    }

    pub fn body_states(&self) -> Vec<BodyState> {
        self.world.body_states()
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Runs one display frame of `dt` seconds.
    pub fn frame(&mut self, dt: f32) {
        for command in self.commands.drain_until_yield() {
            self.handle_command(command);
        }

        let profile = if self.mode.is_simulation() {
            Some(CadenceProfile::Running)
        } else if self.drag.is_active() && self.drag_paused {
            Some(CadenceProfile::Dragging)
        } else {
            None
        };
        let simulated = self.scheduler.advance(&mut self.world, profile, dt);

        self.drag.update(&mut self.world, simulated);

        let bodies = self.world.body_states();
        self.collab.visuals.update_visuals(&self.visuals, &bodies);

        if !self.mode.is_simulation() || self.level_ended {
            return;
        }
        self.elapsed += simulated;
        let ended_by = self.goals.evaluate(&bodies, simulated, self.elapsed);

        self.collab.ui.show_status(&self.goals.statuses());

        if let Some(condition_id) = ended_by {
            self.end_level(&condition_id);
        }
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Input(event) => self.handle_input(event),
            SessionCommand::SetMode(mode) => {
                tracing::info!("[command] SetMode: {}", mode.name());
                self.set_mode(mode);
            }
            SessionCommand::ToggleSimulation => {
                tracing::info!("[command] ToggleSimulation");
                self.toggle_simulation_mode();
            }
            SessionCommand::SetInteractionMode(mode) => {
                tracing::info!("[command] SetInteractionMode: {:?}", mode);
                self.set_interaction_mode(mode);
            }
            SessionCommand::BeginPlacement { item_id } => {
                tracing::info!("[command] BeginPlacement: {}", item_id);
                if let Err(e) = self.begin_placement(&item_id) {
                    tracing::warn!("[command] BeginPlacement rejected: {}", e);
                }
            }
            SessionCommand::CancelPlacement => {
                tracing::info!("[command] CancelPlacement");
                self.cancel_placement();
            }
            SessionCommand::SelectObject { id } => {
                tracing::info!("[command] SelectObject: {:?}", id);
                self.select_object(id.as_deref());
            }
            SessionCommand::EditObject { id, patch } => {
                tracing::info!("[command] EditObject: {}", id);
                if let Err(e) = self.edit_object(&id, &patch) {
                    tracing::warn!("[command] EditObject rejected: {}", e);
                }
            }
            SessionCommand::RemoveObject { id } => {
                tracing::info!("[command] RemoveObject: {}", id);
                if let Err(e) = self.remove_object(&id) {
                    tracing::warn!("[command] RemoveObject rejected: {}", e);
                }
            }
            SessionCommand::TriggerCondition { id } => {
                tracing::info!("[command] TriggerCondition: {}", id);
                self.trigger_condition(&id);
            }
            SessionCommand::RestartLevel => {
                tracing::info!("[command] RestartLevel");
                self.restart_level();
            }
            SessionCommand::Undo => {
                self.undo();
            }
            SessionCommand::Redo => {
                self.redo();
            }
            SessionCommand::LoadLevel { config } => {
                tracing::info!("[command] LoadLevel: {}", config.meta.id);
                self.load_level(*config);
            }
            // Yield is consumed by drain_until_yield(), should not reach here
            SessionCommand::Yield => {}
        }
    }

    fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerDown { position } => self.pointer_down(position),
            InputEvent::PointerMove { position } => self.pointer_move(position),
            InputEvent::PointerUp { position } => self.pointer_up(position),
            InputEvent::Wheel { delta } => self.wheel(delta),
            InputEvent::Key(KeyAction::Cancel) => {
                self.cancel_placement();
                self.cancel_drag();
            }
            InputEvent::Key(KeyAction::ToggleRun) => self.toggle_simulation_mode(),
            InputEvent::Key(KeyAction::Undo) => {
                self.undo();
            }
            InputEvent::Key(KeyAction::Redo) => {
                self.redo();
            }
        }
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Fresh load: clears history and restores a saved arrangement if one exists.
    pub fn load_level(&mut self, authored: LevelConfig) {
        let level = self.restore_saved(authored);
        tracing::info!(
            "[session] loading level `{}` ({} objects)",
            level.meta.id,
            level.objects.len()
        );

        self.history.clear_history();
        self.mode = Mode::Construction;
        self.previous_mode = Mode::Construction;
        self.interaction = InteractionMode::Manipulate;
        self.collab.ui.set_interaction_mode(self.interaction);
        self.selection = None;
        self.last_summary = None;
        self.apply_level(Arc::new(level));
    }

    fn restore_saved(&self, authored: LevelConfig) -> LevelConfig {
        let key = self.config.level_key(&authored.meta.id);
        match self.collab.persistence.load(&key) {
            Ok(Some(json)) => match LevelConfig::from_json(&json) {
                Ok(saved) if saved.meta.id == authored.meta.id => {
                    tracing::info!("[persistence] restored saved arrangement `{}`", key);
                    saved
                }
                Ok(_) => {
                    tracing::warn!("[persistence] `{}` holds another level, ignoring", key);
                    authored
                }
                Err(e) => {
                    tracing::warn!("[persistence] `{}` is unreadable: {}", key, e);
                    authored
                }
            },
            Ok(None) => authored,
            Err(e) => {
                tracing::warn!("[persistence] load `{}` failed: {}", key, e);
                authored
            }
        }
    }

    /// Rebuilds world, goals and visuals from `level` without touching history.
    fn apply_level(&mut self, level: Snapshot) {
        self.cancel_drag();
        self.pending_placement = None;

        self.goals.dispose();
        let old = std::mem::take(&mut self.visuals);
        self.collab.visuals.dispose_visuals(old);
        self.collab.visuals.set_simulation_visuals(false);
        self.walls.clear();

        let gravity = Vector::new(level.world.gravity[0], level.world.gravity[1]);
        self.world = PhysicsWorld::with_gravity(gravity);
        for object in &level.objects {
            if let Err(e) = self.world.spawn_object(object) {
                tracing::warn!("[session] skipping object `{}`: {}", object.id, e);
            }
        }
        for constraint in &level.constraints {
            if self.world.add_constraint(constraint).is_none() {
                tracing::warn!(
                    "[session] constraint `{}` references a missing body",
                    constraint.id
                );
            }
        }

        self.goals = GoalBook::from_definitions(&level.objectives, &level.end_conditions);
        self.visuals =
            self.collab
                .visuals
                .create_visuals(&level.objects, &level.constraints, &level.world);

        let selection_gone = self
            .selection
            .as_deref()
            .is_some_and(|selected| level.object(selected).is_none());
        if selection_gone {
            self.selection = None;
            self.collab.ui.hide_property_panel();
        }
        self.level = level;
        self.elapsed = 0.0;
        self.level_ended = false;
        self.collab.ui.hide_level_end();
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    pub fn set_mode(&mut self, next: Mode) {
        if next == self.mode {
            return;
        }
        let prev = self.mode;

        match prev {
            Mode::Construction => {
                self.cancel_placement();
                self.cancel_drag();
            }
            Mode::Configuration => {
                self.collab.ui.hide_property_panel();
                self.collab.ui.clear_selection();
                self.selection = None;
            }
            Mode::Simulation => self.leave_simulation(),
        }

        self.mode = next;
        if next.is_simulation() {
            self.enter_simulation();
        }
        tracing::info!("[session] mode {} -> {}", prev.name(), next.name());
    }

    fn enter_simulation(&mut self) {
        self.cancel_drag();
        self.drag_paused = false;
        self.set_interaction_mode(InteractionMode::Manipulate);

        let bounds = self.level.world.simulation_bounds;
        self.walls = self
            .world
            .add_boundary_walls(&bounds, self.level.world.wall_thickness);
        self.collab.visuals.set_simulation_visuals(true);

        self.elapsed = 0.0;
        self.goals.reset_all();
        self.level_ended = false;
        self.last_summary = None;
        self.collab.ui.hide_level_end();
        self.collab.ui.show_status(&self.goals.statuses());
    }

    fn leave_simulation(&mut self) {
        for wall in std::mem::take(&mut self.walls) {
            self.world.remove_static_collider(wall);
        }
        self.collab.visuals.set_simulation_visuals(false);

        let restore: Vec<(String, Pose)> = self
            .world
            .entries()
            .iter()
            .filter(|e| !e.is_static)
            .filter_map(|e| e.initial_pose.map(|pose| (e.id.clone(), pose)))
            .collect();
        for (id, pose) in restore {
            self.world.set_pose(&id, pose);
        }
        let bodies = self.world.body_states();
        self.collab.visuals.update_visuals(&self.visuals, &bodies);

        self.goals.reset_objectives();
        if self.level_ended {
            self.level_ended = false;
            self.collab.ui.hide_level_end();
        }
    }

    pub fn toggle_simulation_mode(&mut self) {
        if self.mode.is_simulation() {
            if self.level_ended {
                self.restart_level();
            } else {
                self.set_mode(self.previous_mode);
            }
        } else {
            self.previous_mode = self.mode;
            self.set_mode(Mode::Simulation);
        }
    }

    /// Reloads the current document in place. From simulation, returns to
    /// the mode the run was started from.
    pub fn restart_level(&mut self) {
        tracing::info!("[session] restarting level `{}`", self.level.meta.id);
        let level = self.snapshot();
        if self.mode.is_simulation() {
            self.mode = self.previous_mode;
        }
        self.apply_level(level);
    }

    pub fn set_interaction_mode(&mut self, mode: InteractionMode) {
        if self.interaction != mode {
            self.interaction = mode;
            self.collab.ui.set_interaction_mode(mode);
        }
    }

    // ------------------------------------------------------------------
    // Goals
    // ------------------------------------------------------------------

    /// Manually confirms a time limit waiting for the user.
    pub fn trigger_condition(&mut self, id: &str) -> bool {
        if !self.mode.is_simulation() || self.level_ended {
            tracing::warn!("[goals] `{}` can only be triggered during a run", id);
            return false;
        }
        match self.goals.condition_mut(id) {
            Some(condition) => condition.trigger_manually(),
            None => {
                tracing::warn!("[goals] no end condition `{}`", id);
                false
            }
        }
    }

    fn end_level(&mut self, condition_id: &str) {
        if self.level_ended {
            return;
        }
        self.level_ended = true;

        let summary = self.goals.summary(
            &self.level.meta.id,
            condition_id,
            self.elapsed,
            self.level.meta.next_level.as_deref(),
        );
        tracing::info!(
            "[session] level `{}` ended by `{}` at {:.2}s (all complete: {})",
            summary.level_id,
            condition_id,
            summary.end_time,
            summary.all_complete
        );

        if let Some(next) = &summary.unlocked {
            let key = self.config.unlock_key(next);
            match self.collab.persistence.save(&key, "true") {
                Ok(()) => tracing::info!("[session] unlocked level `{}`", next),
                Err(e) => tracing::warn!("[persistence] save `{}` failed: {}", key, e),
            }
        }
        self.collab.ui.show_level_end(&summary);
        self.last_summary = Some(summary);
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Restores the previous document. Not available during a run.
    pub fn undo(&mut self) -> bool {
        if self.mode.is_simulation() {
            tracing::warn!("[history] undo ignored during simulation");
            return false;
        }
        self.cancel_drag();
        let Some(previous) = self.history.undo(self.snapshot()) else {
            return false;
        };
        tracing::info!("[history] undo");
        self.apply_level(previous);
        self.persist();
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.mode.is_simulation() {
            tracing::warn!("[history] redo ignored during simulation");
            return false;
        }
        self.cancel_drag();
        let Some(next) = self.history.redo(self.snapshot()) else {
            return false;
        };
        tracing::info!("[history] redo");
        self.apply_level(next);
        self.persist();
        true
    }

    // ------------------------------------------------------------------
    // Document edits
    // ------------------------------------------------------------------

    fn ensure_editable(&self) -> Result<(), LevelError> {
        if self.mode.is_simulation() {
            Err(LevelError::WrongMode(self.mode.name()))
        } else {
            Ok(())
        }
    }

    /// Applies a property edit to a placed object.
    pub fn edit_object(&mut self, id: &str, patch: &ObjectPatch) -> Result<(), LevelError> {
        self.ensure_editable()?;
        if self.level.object(id).is_none() {
            return Err(LevelError::UnknownObject(id.to_string()));
        }
        if self.drag.dragged_id() == Some(id) {
            self.cancel_drag();
        }

        self.history.push_state(self.snapshot());
        let level = Arc::make_mut(&mut self.level);
        let Some(object) = level.object_mut(id) else {
            return Err(LevelError::UnknownObject(id.to_string()));
        };
        patch.apply_to(object);
        let object = object.clone();

        if patch.position.is_some() || patch.angle.is_some() {
            self.world.set_pose(id, object.pose());
            if !object.is_static {
                self.world.set_initial_pose(id, Some(object.pose()));
            }
        }
        if patch.mass.is_some() {
            self.world.set_mass(id, object.mass);
        }
        if patch.friction.is_some() {
            self.world.set_friction(id, object.friction);
        }
        if patch.restitution.is_some() {
            self.world.set_restitution(id, object.restitution);
        }

        if self.selection.as_deref() == Some(id) {
            self.collab.ui.show_property_panel(&object);
        }
        self.sync_visuals();
        self.persist();
        Ok(())
    }

    /// Removes a placed object, returning its piece to the inventory.
    pub fn remove_object(&mut self, id: &str) -> Result<(), LevelError> {
        self.ensure_editable()?;
        let object = self
            .level
            .object(id)
            .ok_or_else(|| LevelError::UnknownObject(id.to_string()))?;
        if object.is_static {
            return Err(LevelError::FixedObject(id.to_string()));
        }
        if self.drag.dragged_id() == Some(id) {
            self.cancel_drag();
        }

        self.history.push_state(self.snapshot());
        Arc::make_mut(&mut self.level).remove_object(id)?;
        self.world.remove_object(id);
        if self.selection.as_deref() == Some(id) {
            self.selection = None;
            self.collab.ui.hide_property_panel();
        }
        tracing::info!("[session] removed `{}`", id);

        self.sync_visuals();
        self.persist();
        Ok(())
    }

    /// Arms placement of one piece from `item_id`.
    pub fn begin_placement(&mut self, item_id: &str) -> Result<(), LevelError> {
        if self.mode != Mode::Construction {
            return Err(LevelError::WrongMode(self.mode.name()));
        }
        let item = self
            .level
            .inventory_item(item_id)
            .ok_or_else(|| LevelError::UnknownInventoryItem(item_id.to_string()))?;
        if item.count == 0 {
            return Err(LevelError::InventoryExhausted(item_id.to_string()));
        }
        self.pending_placement = Some(item_id.to_string());
        Ok(())
    }

    /// Disarms a pending placement and drops a piece still being placed.
    pub fn cancel_placement(&mut self) {
        self.pending_placement = None;
        if self.drag.session().is_some_and(|s| s.is_placement) {
            self.cancel_drag();
        }
    }

    pub fn select_object(&mut self, id: Option<&str>) {
        if self.mode != Mode::Configuration {
            return;
        }
        match id.and_then(|id| self.level.object(id)) {
            Some(object) => {
                self.selection = Some(object.id.clone());
                self.collab.ui.show_property_panel(object);
            }
            None => {
                self.selection = None;
                self.collab.ui.hide_property_panel();
                self.collab.ui.clear_selection();
            }
        }
    }

    // ------------------------------------------------------------------
    // Pointer input
    // ------------------------------------------------------------------

    pub fn pointer_down(&mut self, position: [f32; 2]) {
        match self.mode {
            Mode::Simulation => {}
            Mode::Configuration => {
                let hit = self.world.body_at(position);
                self.select_object(hit.as_deref());
            }
            Mode::Construction => {
                if let Some(item_id) = self.pending_placement.take() {
                    self.place_from_inventory(&item_id, position);
                    return;
                }
                let Some(id) = self.world.body_at(position) else {
                    return;
                };
                match self.interaction {
                    InteractionMode::Remove => {
                        if let Err(e) = self.remove_object(&id) {
                            tracing::debug!("[session] cannot remove `{}`: {}", id, e);
                        }
                    }
                    InteractionMode::Manipulate => {
                        if self.world.entry(&id).is_some_and(|e| e.is_static) {
                            return;
                        }
                        match self.drag.start(&mut self.world, &id, position, false) {
                            Ok(()) => self.drag_paused = true,
                            Err(e) => tracing::warn!("[drag] {}", e),
                        }
                    }
                }
            }
        }
    }

    fn place_from_inventory(&mut self, item_id: &str, position: [f32; 2]) {
        if self.drag.is_active() {
            tracing::warn!("[drag] placement ignored, a drag is already open");
            return;
        }
        let Some(item) = self.level.inventory_item(item_id) else {
            tracing::warn!("[session] inventory item `{}` vanished", item_id);
            return;
        };
        if item.count == 0 {
            tracing::warn!("[session] inventory item `{}` is empty", item_id);
            return;
        }
        let position = self.level.world.working_bounds.clamp(position);
        let object = item.instantiate(self.level.next_object_id(item_id), position);

        if let Err(e) = self.world.spawn_object(&object) {
            tracing::warn!("[session] cannot place `{}`: {}", object.id, e);
            return;
        }
        if let Err(e) = self.drag.start(&mut self.world, &object.id, position, true) {
            tracing::warn!("[drag] {}", e);
            self.world.remove_object(&object.id);
            return;
        }
        tracing::info!("[session] placing `{}` from `{}`", object.id, item_id);
        self.drag_paused = true;
        self.placing = Some(object);
        self.sync_visuals();
    }

    pub fn pointer_move(&mut self, position: [f32; 2]) {
        if self.drag.is_active() {
            let position = self.level.world.working_bounds.clamp(position);
            self.drag.set_pointer(position);
        }
    }

    pub fn pointer_up(&mut self, position: [f32; 2]) {
        if self.drag.is_active() {
            self.pointer_move(position);
            self.release_drag();
        }
    }

    pub fn wheel(&mut self, delta: f32) {
        if delta.is_finite() && delta != 0.0 {
            self.drag.rotate(&mut self.world, delta);
        }
    }

    /// Commits the open drag to the document.
    fn release_drag(&mut self) {
        let Some(released) = self.drag.stop(&mut self.world) else {
            return;
        };
        self.drag_paused = false;

        let mut pose = released.pose;
        pose.position = self.level.world.working_bounds.clamp(pose.position);
        self.world.set_pose(&released.id, pose);

        if released.is_placement {
            let Some(mut object) = self.placing.take() else {
                return;
            };
            object.position = pose.position;
            object.angle = pose.angle;
            let item_id = object.source.clone().unwrap_or_default();

            let before = self.snapshot();
            let level = Arc::make_mut(&mut self.level);
            if let Err(e) = level.take_from_inventory(&item_id) {
                tracing::warn!("[session] placement of `{}` dropped: {}", object.id, e);
                self.level = before;
                self.world.remove_object(&released.id);
                self.sync_visuals();
                return;
            }
            if let Err(e) = level.add_object(object) {
                tracing::warn!("[session] placement of `{}` dropped: {}", released.id, e);
                self.level = before;
                self.world.remove_object(&released.id);
                self.sync_visuals();
                return;
            }
            self.history.push_state(before);
            tracing::info!("[session] placed `{}`", released.id);
        } else {
            let Some(current) = self.level.object(&released.id).map(LevelObject::pose) else {
                return;
            };
            if !pose_moved(current, pose) {
                tracing::debug!("[session] `{}` released in place", released.id);
                self.world.set_pose(&released.id, current);
                return;
            }
            self.history.push_state(self.snapshot());
            let level = Arc::make_mut(&mut self.level);
            if let Some(object) = level.object_mut(&released.id) {
                ObjectPatch::pose(pose).apply_to(object);
            }
        }

        self.world.set_initial_pose(&released.id, Some(pose));
        self.sync_visuals();
        self.persist();
    }

    /// Closes any open drag without committing it.
    pub fn cancel_drag(&mut self) {
        let Some(released) = self.drag.cancel(&mut self.world) else {
            return;
        };
        self.drag_paused = false;

        if released.is_placement {
            self.world.remove_object(&released.id);
            self.placing = None;
            self.sync_visuals();
        } else if let Some(object) = self.level.object(&released.id) {
            self.world.set_pose(&released.id, object.pose());
        }
    }

    // ------------------------------------------------------------------
    // Collaborators
    // ------------------------------------------------------------------

    fn sync_visuals(&mut self) {
        let mut objects = self.level.objects.clone();
        objects.extend(self.placing.iter().cloned());
        let existing = std::mem::take(&mut self.visuals);
        self.visuals = self.collab.visuals.sync_visuals(
            &objects,
            &self.level.constraints,
            &self.level.world,
            existing,
        );
    }

    /// Hands the current document to persistence. Failures are logged only.
    pub fn persist(&mut self) {
        let key = self.config.level_key(&self.level.meta.id);
        let json = match self.level.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("[persistence] cannot serialize `{}`: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.collab.persistence.save(&key, &json) {
            tracing::warn!("[persistence] save `{}` failed: {}", key, e);
        }
    }

    /// Tears the session down; the session must not be used afterwards.
    pub fn exit(&mut self) {
        self.cancel_placement();
        self.cancel_drag();
        self.goals.dispose();
        let handles = std::mem::take(&mut self.visuals);
        self.collab.visuals.dispose_visuals(handles);
        self.collab.ui.hide_level_end();
        self.commands.clear();
        tracing::info!("[session] exit level `{}`", self.level.meta.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MemoryStore, Persistence};
    use crate::test_utils::{TestSession, UiEvent, test_level};

    fn position(t: &TestSession, id: &str) -> [f32; 2] {
        t.session.world().pose(id).unwrap().position
    }

    fn run(t: &mut TestSession) {
        t.send(SessionCommand::ToggleSimulation);
        assert_eq!(t.session.mode(), Mode::Simulation);
    }

    #[test]
    fn test_initial_state() {
        let t = TestSession::new();
        assert_eq!(t.session.mode(), Mode::Construction);
        assert_eq!(t.session.goals().objectives.len(), 1);
        assert_eq!(t.session.goals().conditions.len(), 2);
        assert_eq!(t.session.world().entries().len(), 3);
        assert_eq!(t.visuals.log.lock().created, 3);
        assert!(!t.session.history().can_undo());
    }

    #[test]
    fn test_construction_does_not_step_physics() {
        let mut t = TestSession::new();
        t.frames(30);
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
        assert_eq!(t.session.world().current_frame(), 0);
    }

    #[test]
    fn test_set_mode_same_is_noop() {
        let mut t = TestSession::new();
        t.ui.clear();
        t.session.set_mode(Mode::Construction);
        assert!(t.ui.events.lock().is_empty());
    }

    #[test]
    fn test_entering_simulation_side_effects() {
        let mut t = TestSession::new();
        t.session.set_interaction_mode(InteractionMode::Remove);
        let colliders = t.session.world().collider_set.len();
        t.ui.clear();

        run(&mut t);

        assert_eq!(t.session.interaction_mode(), InteractionMode::Manipulate);
        assert_eq!(t.session.world().collider_set.len(), colliders + 4);
        assert!(t.visuals.log.lock().simulation_visuals);
        assert_eq!(t.ui.count(|e| matches!(e, UiEvent::HideLevelEnd)), 1);
        assert!(t.ui.count(|e| matches!(e, UiEvent::Status(_))) >= 1);
        assert!(t.session.elapsed() > 0.0);
    }

    #[test]
    fn test_leaving_simulation_restores_initial_poses() {
        let mut t = TestSession::new();
        run(&mut t);
        t.frames(20);
        assert!(position(&t, "block-1")[1] < 3.0);

        t.send(SessionCommand::ToggleSimulation);

        assert_eq!(t.session.mode(), Mode::Construction);
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
        assert_eq!(t.session.world().linvel("block-1"), Some([0.0, 0.0]));
        assert_eq!(t.session.world().angvel("block-1"), Some(0.0));
        assert!(!t.visuals.log.lock().simulation_visuals);
        assert!(!t.session.goals().objectives[0].is_complete());
    }

    #[test]
    fn test_toggle_returns_to_previous_mode() {
        let mut t = TestSession::new();
        t.send(SessionCommand::SetMode(Mode::Configuration));
        run(&mut t);
        assert_eq!(t.session.previous_mode(), Mode::Configuration);

        t.send(SessionCommand::ToggleSimulation);
        assert_eq!(t.session.mode(), Mode::Configuration);
    }

    #[test]
    fn test_level_end_fires_once_and_unlocks() {
        let mut t = TestSession::new();
        run(&mut t);
        t.frames(60);

        assert!(t.session.is_level_ended());
        let summary = t.session.last_summary().unwrap();
        assert_eq!(summary.ended_by, "landed");
        assert!(summary.all_complete);
        assert_eq!(summary.unlocked.as_deref(), Some("test-2"));
        assert_eq!(t.store.get("progress:unlocked:test-2").as_deref(), Some("true"));

        t.frames(60);
        assert_eq!(t.level_end_count(), 1);
    }

    #[test]
    fn test_evaluation_stops_after_level_end() {
        let mut t = TestSession::new();
        run(&mut t);
        t.frames(60);
        let elapsed = t.session.elapsed();
        let substeps = t.session.world().current_frame();

        t.frames(10);
        assert_eq!(t.session.elapsed(), elapsed);
        // Physics keeps running.
        assert!(t.session.world().current_frame() > substeps);
    }

    #[test]
    fn test_toggle_after_level_end_restarts() {
        let mut t = TestSession::new();
        run(&mut t);
        t.frames(60);
        assert!(t.session.is_level_ended());

        t.send(SessionCommand::ToggleSimulation);

        assert_eq!(t.session.mode(), Mode::Construction);
        assert!(!t.session.is_level_ended());
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
        assert_eq!(t.session.elapsed(), 0.0);
        assert!(!t.visuals.log.lock().simulation_visuals);
    }

    #[test]
    fn test_placement_from_inventory() {
        let mut t = TestSession::new();
        t.send(SessionCommand::BeginPlacement {
            item_id: "block".to_string(),
        });
        assert_eq!(t.session.pending_placement(), Some("block"));

        t.input(InputEvent::PointerDown {
            position: [-3.0, 2.0],
        });
        t.frame();
        assert!(t.session.world().contains("block-2"));
        assert!(t.session.level().object("block-2").is_none());
        assert!(t.session.is_drag_paused());
        assert_eq!(t.session.pending_placement(), None);

        t.frames(10);
        t.input(InputEvent::PointerUp {
            position: [-3.0, 2.0],
        });
        t.frame();

        let level = t.session.level();
        assert!(level.object("block-2").is_some());
        assert_eq!(level.inventory_item("block").unwrap().count, 2);
        assert_eq!(t.session.history().undo_len(), 1);
        assert!(!t.session.drag().is_active());
        assert!(t.store.get("level:test-1").is_some());
        assert_eq!(t.session.world().entry("ball").map(|e| e.is_static), Some(false));
    }

    #[test]
    fn test_cancelled_placement_leaves_document_untouched() {
        let mut t = TestSession::new();
        let before = t.session.snapshot();
        t.send(SessionCommand::BeginPlacement {
            item_id: "block".to_string(),
        });
        t.input(InputEvent::PointerDown {
            position: [-3.0, 2.0],
        });
        t.frame();
        t.input(InputEvent::Key(KeyAction::Cancel));
        t.frame();

        assert!(!t.session.world().contains("block-2"));
        assert_eq!(*t.session.level(), *before);
        assert_eq!(t.session.history().undo_len(), 0);
        assert!(!t.session.is_drag_paused());
    }

    #[test]
    fn test_begin_placement_rejects_bad_items() {
        let mut t = TestSession::new();
        assert!(matches!(
            t.session.begin_placement("anvil"),
            Err(LevelError::UnknownInventoryItem(_))
        ));
        t.session.set_mode(Mode::Configuration);
        assert!(matches!(
            t.session.begin_placement("block"),
            Err(LevelError::WrongMode(_))
        ));
    }

    #[test]
    fn test_drag_existing_body_commits_pose() {
        let mut t = TestSession::new();
        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.frame();
        assert_eq!(t.session.drag().dragged_id(), Some("block-1"));
        assert_eq!(t.session.world().entry("ball").map(|e| e.is_static), Some(true));

        t.input(InputEvent::PointerMove {
            position: [-2.0, 4.0],
        });
        t.frames(120);
        t.input(InputEvent::PointerUp {
            position: [-2.0, 4.0],
        });
        t.frame();

        let placed = t.session.level().object("block-1").unwrap().position;
        assert!(placed[0] < -1.5, "x = {}", placed[0]);
        assert_eq!(placed, position(&t, "block-1"));
        assert_eq!(t.session.history().undo_len(), 1);
        assert_eq!(t.session.world().entry("ball").map(|e| e.is_static), Some(false));
        assert_eq!(t.session.world().entry("block-1").map(|e| e.mass), Some(1.0));
    }

    #[test]
    fn test_click_without_moving_records_nothing() {
        let mut t = TestSession::new();
        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.input(InputEvent::PointerUp {
            position: [0.0, 3.0],
        });
        t.frame();

        assert!(!t.session.drag().is_active());
        assert_eq!(t.session.history().undo_len(), 0);
        assert!(t.store.get("level:test-1").is_none());
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
        assert_eq!(t.session.world().entry("ball").map(|e| e.is_static), Some(false));
    }

    #[test]
    fn test_wheel_ignores_non_finite_delta() {
        let mut t = TestSession::new();
        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.frame();
        assert!(t.session.drag().is_active());

        t.input(InputEvent::Wheel { delta: f32::NAN });
        t.input(InputEvent::Wheel {
            delta: f32::INFINITY,
        });
        t.frame();

        let angvel = t.session.world().angvel("block-1").unwrap();
        assert!(angvel.is_finite());
        assert!(t.session.world().pose("block-1").unwrap().angle.is_finite());
    }

    #[test]
    fn test_swapped_working_bounds_do_not_abort_drag() {
        let mut level = test_level();
        level.world.working_bounds = crate::level::Bounds {
            min: [5.0, 6.0],
            max: [-5.0, 0.5],
        };
        let mut t = TestSession::with_level(level);

        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.frame();
        t.input(InputEvent::PointerMove {
            position: [9.0, 3.0],
        });
        t.frames(60);
        t.input(InputEvent::PointerUp {
            position: [9.0, 3.0],
        });
        t.frame();

        let placed = t.session.level().object("block-1").unwrap().position;
        assert!((-5.0..=5.0).contains(&placed[0]), "x = {}", placed[0]);
        assert!((0.5..=6.0).contains(&placed[1]), "y = {}", placed[1]);
    }

    #[test]
    fn test_leaving_construction_cancels_pending_placement() {
        let mut t = TestSession::new();
        t.send(SessionCommand::BeginPlacement {
            item_id: "block".to_string(),
        });
        assert_eq!(t.session.pending_placement(), Some("block"));

        t.send(SessionCommand::SetMode(Mode::Configuration));
        assert_eq!(t.session.pending_placement(), None);

        t.send(SessionCommand::SetMode(Mode::Construction));
        t.input(InputEvent::PointerDown {
            position: [-3.0, 2.0],
        });
        t.frame();
        assert!(!t.session.world().contains("block-2"));
        assert!(!t.session.drag().is_active());
    }

    #[test]
    fn test_entering_simulation_cancels_drag() {
        let mut t = TestSession::new();
        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.frame();
        assert!(t.session.drag().is_active());

        t.input(InputEvent::Key(KeyAction::ToggleRun));
        t.frame();

        assert_eq!(t.session.mode(), Mode::Simulation);
        assert!(!t.session.drag().is_active());
        assert!(!t.session.is_drag_paused());
        assert_eq!(t.session.world().entry("block-1").map(|e| e.mass), Some(1.0));
        assert_eq!(t.session.world().entry("ball").map(|e| e.is_static), Some(false));
        assert_eq!(t.session.history().undo_len(), 0);
    }

    #[test]
    fn test_undo_redo_reloads_in_place() {
        let mut t = TestSession::new();
        t.session
            .edit_object("block-1", &ObjectPatch::pose(Pose::new([1.0, 2.0], 0.0)))
            .unwrap();
        assert_eq!(position(&t, "block-1"), [1.0, 2.0]);

        t.input(InputEvent::Key(KeyAction::Undo));
        t.frame();
        assert_eq!(t.session.level().object("block-1").unwrap().position, [0.0, 3.0]);
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
        assert!(t.session.history().can_redo());

        t.send(SessionCommand::Redo);
        assert_eq!(position(&t, "block-1"), [1.0, 2.0]);
        assert!(t.session.history().can_undo());
    }

    #[test]
    fn test_undo_ignored_during_simulation() {
        let mut t = TestSession::new();
        t.session
            .edit_object("block-1", &ObjectPatch::pose(Pose::new([1.0, 2.0], 0.0)))
            .unwrap();
        run(&mut t);
        assert!(!t.session.undo());
        assert_eq!(t.session.history().undo_len(), 1);
    }

    #[test]
    fn test_edit_object_updates_world_and_persists() {
        let mut t = TestSession::new();
        t.send(SessionCommand::SetMode(Mode::Configuration));
        t.send(SessionCommand::SelectObject {
            id: Some("block-1".to_string()),
        });
        t.send(SessionCommand::EditObject {
            id: "block-1".to_string(),
            patch: ObjectPatch {
                mass: Some(3.0),
                friction: Some(0.9),
                ..ObjectPatch::default()
            },
        });

        let object = t.session.level().object("block-1").unwrap();
        assert_eq!(object.mass, 3.0);
        assert_eq!(object.friction, 0.9);
        assert_eq!(t.session.world().entry("block-1").unwrap().mass, 3.0);
        assert_eq!(t.session.world().entry("block-1").unwrap().friction, 0.9);
        assert_eq!(t.ui.count(|e| matches!(e, UiEvent::ShowPanel(id) if id == "block-1")), 2);

        let saved = LevelConfig::from_json(&t.store.get("level:test-1").unwrap()).unwrap();
        assert_eq!(saved.object("block-1").unwrap().mass, 3.0);
    }

    #[test]
    fn test_edits_rejected_during_simulation() {
        let mut t = TestSession::new();
        run(&mut t);
        assert!(matches!(
            t.session.edit_object("block-1", &ObjectPatch::default()),
            Err(LevelError::WrongMode("simulation"))
        ));
        assert!(matches!(
            t.session.remove_object("block-1"),
            Err(LevelError::WrongMode("simulation"))
        ));
    }

    #[test]
    fn test_leaving_configuration_hides_panel() {
        let mut t = TestSession::new();
        t.send(SessionCommand::SetMode(Mode::Configuration));
        t.input(InputEvent::PointerDown {
            position: [3.0, 0.9],
        });
        t.frame();
        assert_eq!(t.session.selection(), Some("ball"));

        t.ui.clear();
        t.send(SessionCommand::SetMode(Mode::Construction));
        assert_eq!(t.session.selection(), None);
        assert_eq!(t.ui.count(|e| matches!(e, UiEvent::HidePanel)), 1);
        assert_eq!(t.ui.count(|e| matches!(e, UiEvent::ClearSelection)), 1);
    }

    #[test]
    fn test_remove_mode_returns_piece() {
        let mut t = TestSession::new();
        t.send(SessionCommand::SetInteractionMode(InteractionMode::Remove));
        t.input(InputEvent::PointerDown {
            position: [0.0, 3.0],
        });
        t.frame();

        assert!(t.session.level().object("block-1").is_none());
        assert!(!t.session.world().contains("block-1"));
        assert_eq!(t.session.level().inventory_item("block").unwrap().count, 4);

        // The ground is part of the level.
        assert!(matches!(
            t.session.remove_object("ground"),
            Err(LevelError::FixedObject(_))
        ));
    }

    #[test]
    fn test_persistence_failure_is_tolerated() {
        let mut t = TestSession::with_store(test_level(), MemoryStore::unavailable());
        t.session
            .edit_object("block-1", &ObjectPatch::pose(Pose::new([1.0, 2.0], 0.0)))
            .unwrap();
        run(&mut t);
        t.frames(60);
        assert!(t.session.is_level_ended());
        assert_eq!(t.level_end_count(), 1);
    }

    #[test]
    fn test_full_store_is_tolerated() {
        let mut t = TestSession::with_store(test_level(), MemoryStore::with_capacity(8));
        assert!(t.session.remove_object("block-1").is_ok());
        assert!(t.store.get("level:test-1").is_none());
    }

    #[test]
    fn test_fresh_load_restores_saved_arrangement() {
        let mut saved = test_level();
        saved.object_mut("block-1").unwrap().position = [-1.0, 4.0];
        let mut store = MemoryStore::new();
        store
            .save("level:test-1", &saved.to_json().unwrap())
            .unwrap();

        let t = TestSession::with_store(test_level(), store);
        assert_eq!(position(&t, "block-1"), [-1.0, 4.0]);
        assert!(!t.session.history().can_undo());
    }

    #[test]
    fn test_corrupt_save_falls_back_to_authored() {
        let mut store = MemoryStore::new();
        store.save("level:test-1", "{ not json").unwrap();
        let t = TestSession::with_store(test_level(), store);
        assert_eq!(position(&t, "block-1"), [0.0, 3.0]);
    }

    #[test]
    fn test_fresh_load_clears_history() {
        let mut t = TestSession::new();
        t.session.remove_object("block-1").unwrap();
        assert!(t.session.history().can_undo());

        let mut other = test_level();
        other.meta.id = "test-9".to_string();
        t.send(SessionCommand::LoadLevel {
            config: Box::new(other),
        });
        assert!(!t.session.history().can_undo());
        assert_eq!(t.session.level().meta.id, "test-9");
    }

    #[test]
    fn test_bad_definitions_do_not_abort_load() {
        let mut level = test_level();
        level.objectives.push(serde_json::json!({ "type": "spin", "id": "x" }));
        level
            .end_conditions
            .insert(0, serde_json::json!({ "type": "timeLimit", "id": "broken" }));

        let t = TestSession::with_level(level);
        assert_eq!(t.session.goals().objectives.len(), 1);
        assert_eq!(t.session.goals().conditions.len(), 2);
    }

    #[test]
    fn test_manual_time_limit_needs_trigger() {
        let mut level = test_level();
        level.objectives.clear();
        level.end_conditions = vec![serde_json::json!({
            "type": "timeLimit", "id": "clock", "duration": 0.5, "awaitsManualTrigger": true
        })];
        let mut t = TestSession::with_level(level);
        assert!(!t.session.trigger_condition("clock"));

        run(&mut t);
        assert!(!t.session.trigger_condition("clock"));
        t.frames(60);
        assert!(!t.session.is_level_ended());

        t.send(SessionCommand::TriggerCondition {
            id: "clock".to_string(),
        });
        assert!(t.session.is_level_ended());
        assert_eq!(t.session.last_summary().unwrap().ended_by, "clock");
        assert!(!t.session.trigger_condition("clock"));
    }

    #[test]
    fn test_yield_splits_commands_across_frames() {
        let mut t = TestSession::new();
        t.push(SessionCommand::ToggleSimulation);
        t.push(SessionCommand::Yield);
        t.push(SessionCommand::ToggleSimulation);

        t.frame();
        assert_eq!(t.session.mode(), Mode::Simulation);
        t.frame();
        assert_eq!(t.session.mode(), Mode::Construction);
    }

    #[test]
    fn test_exit_disposes_visuals() {
        let mut t = TestSession::new();
        t.session.exit();
        assert_eq!(t.visuals.log.lock().disposed, 3);
        assert!(t.session.goals().objectives.is_empty());
    }
}
