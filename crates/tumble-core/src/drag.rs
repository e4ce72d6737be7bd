//! Pointer-driven drag and placement controller.
//!
//! A drag links the picked body's origin to the pointer with a compliant
//! spring. While the session is open every other dynamic body is forced
//! static and the dragged body's mass is shrunk so the spring moves it
//! responsively. Release and cancel share one teardown that restores all of
//! that state verbatim.

use serde::{Deserialize, Serialize};

use crate::error::DragError;
use crate::level::Pose;
use crate::physics::{distance, PhysicsWorld, SpringId, SpringLink, SpringTarget};

/// Drag tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DragConfig {
    /// Mass given to the dragged body for the duration of the session.
    pub drag_mass: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// Maximum distance between the body origin and the spring's free end.
    pub max_distance: f32,
    /// Maximum linear speed of the dragged body.
    pub max_speed: f32,
    /// Exponential decay rate applied to angular velocity, per second.
    pub angular_damping: f32,
    /// Angular velocity added per wheel notch, in rad/s.
    pub rotation_step: f32,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            drag_mass: 0.05,
            stiffness: 40.0,
            damping: 2.0,
            max_distance: 2.0,
            max_speed: 15.0,
            angular_damping: 8.0,
            rotation_step: 1.5,
        }
    }
}

/// State of the one open drag.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub body_id: String,
    /// Pointer position relative to the body origin when the drag started.
    pub anchor_offset: [f32; 2],
    pub saved_mass: f32,
    /// Other bodies forced static, with the flag they had before.
    pub saved_static: Vec<(String, bool)>,
    /// Whether the body was just placed from the inventory.
    pub is_placement: bool,
    pointer: [f32; 2],
    spring: SpringId,
}

impl DragSession {
    pub fn pointer(&self) -> [f32; 2] {
        self.pointer
    }
}

/// Result of closing a drag session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasedBody {
    pub id: String,
    pub pose: Pose,
    pub is_placement: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DragController {
    config: DragConfig,
    session: Option<DragSession>,
}

impl DragController {
    pub fn new(config: DragConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn config(&self) -> &DragConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DragSession> {
        self.session.as_ref()
    }

    pub fn dragged_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.body_id.as_str())
    }

    /// Opens a drag session on `body_id` grabbed at `pointer`.
    ///
    /// Only one session may be open; a second start is rejected and leaves
    /// the open session untouched.
    pub fn start(
        &mut self,
        world: &mut PhysicsWorld,
        body_id: &str,
        pointer: [f32; 2],
        is_placement: bool,
    ) -> Result<(), DragError> {
        if let Some(open) = &self.session {
            return Err(DragError::SessionAlreadyOpen(open.body_id.clone()));
        }
        let entry = world
            .entry(body_id)
            .ok_or_else(|| DragError::UnknownBody(body_id.to_string()))?;
        if entry.is_static {
            return Err(DragError::StaticBody(body_id.to_string()));
        }
        let handle = entry.body;
        let saved_mass = entry.mass;
        let origin = world
            .pose(body_id)
            .ok_or_else(|| DragError::UnknownBody(body_id.to_string()))?
            .position;
        let anchor_offset = [pointer[0] - origin[0], pointer[1] - origin[1]];

        let saved_static: Vec<(String, bool)> = world
            .entries()
            .iter()
            .filter(|e| e.id != body_id && !e.is_static)
            .map(|e| (e.id.clone(), e.is_static))
            .collect();
        for (id, _) in &saved_static {
            world.set_static(id, true);
        }

        world.set_mass(body_id, self.config.drag_mass);
        world.zero_velocity(body_id);
        let spring = world.add_spring(SpringLink {
            body: handle,
            local_anchor: [0.0, 0.0],
            target: SpringTarget::World(origin),
            rest_length: 0.0,
            stiffness: self.config.stiffness,
            damping: self.config.damping,
        });

        tracing::debug!(
            "[drag] start `{}` (placement={}, froze {} bodies)",
            body_id,
            is_placement,
            saved_static.len()
        );
        self.session = Some(DragSession {
            body_id: body_id.to_string(),
            anchor_offset,
            saved_mass,
            saved_static,
            is_placement,
            pointer,
            spring,
        });
        Ok(())
    }

    /// Records the latest pointer position; applied on the next `update`.
    pub fn set_pointer(&mut self, pointer: [f32; 2]) {
        if let Some(session) = &mut self.session {
            session.pointer = pointer;
        }
    }

    /// Per-tick update after physics sub-stepping.
    pub fn update(&mut self, world: &mut PhysicsWorld, dt: f32) {
        let Some(session) = &self.session else {
            return;
        };
        let Some(origin) = world.pose(&session.body_id).map(|p| p.position) else {
            return;
        };

        let mut target = [
            session.pointer[0] - session.anchor_offset[0],
            session.pointer[1] - session.anchor_offset[1],
        ];
        let reach = distance(origin, target);
        if reach > self.config.max_distance && reach > f32::EPSILON {
            let scale = self.config.max_distance / reach;
            target = [
                origin[0] + (target[0] - origin[0]) * scale,
                origin[1] + (target[1] - origin[1]) * scale,
            ];
        }
        if let Some(link) = world.spring_mut(session.spring) {
            link.target = SpringTarget::World(target);
        }

        let body_id = session.body_id.clone();
        if let Some(angvel) = world.angvel(&body_id) {
            let decay = (-self.config.angular_damping * dt.max(0.0)).exp();
            world.set_angvel(&body_id, angvel * decay);
        }
        if let Some(linvel) = world.linvel(&body_id) {
            let speed = (linvel[0] * linvel[0] + linvel[1] * linvel[1]).sqrt();
            if speed > self.config.max_speed {
                let scale = self.config.max_speed / speed;
                world.set_linvel(&body_id, [linvel[0] * scale, linvel[1] * scale]);
            }
        }
    }

    /// Adds one wheel notch of spin to the dragged body.
    pub fn rotate(&mut self, world: &mut PhysicsWorld, notches: f32) {
        let Some(session) = &self.session else {
            return;
        };
        if !notches.is_finite() || notches == 0.0 {
            return;
        }
        if let Some(angvel) = world.angvel(&session.body_id) {
            world.set_angvel(
                &session.body_id,
                angvel + self.config.rotation_step * notches.signum(),
            );
        }
    }

    /// Ends the session on pointer release.
    pub fn stop(&mut self, world: &mut PhysicsWorld) -> Option<ReleasedBody> {
        let released = self.teardown(world)?;
        tracing::debug!("[drag] release `{}`", released.id);
        Some(released)
    }

    /// Ends the session without committing it.
    pub fn cancel(&mut self, world: &mut PhysicsWorld) -> Option<ReleasedBody> {
        let released = self.teardown(world)?;
        tracing::debug!("[drag] cancel `{}`", released.id);
        Some(released)
    }

    fn teardown(&mut self, world: &mut PhysicsWorld) -> Option<ReleasedBody> {
        let session = self.session.take()?;

        world.remove_spring(session.spring);
        world.set_mass(&session.body_id, session.saved_mass);
        for (id, was_static) in &session.saved_static {
            world.set_static(id, *was_static);
        }
        world.zero_velocity(&session.body_id);

        let pose = world.pose(&session.body_id).unwrap_or_default();
        Some(ReleasedBody {
            id: session.body_id,
            pose,
            is_placement: session.is_placement,
        })
    }
}
