//! Physics world backed by `Rapier2D`.
//!
//! Wraps the rapier pipeline together with a registry that maps level object
//! ids to rigid bodies, and the compliant spring links used by level
//! constraints and by the drag controller. Contact resolution is entirely
//! rapier's; this module only creates bodies, applies spring forces before
//! each sub-step and exposes read-only `BodyState` snapshots.

use std::fmt;

use rapier2d::prelude::*;

use crate::error::LevelError;
use crate::level::{Bounds, ConstraintDef, LevelObject, Pose, ShapeDef};

/// Nominal fixed timestep (60Hz). Sub-steps use smaller fixed deltas.
pub const PHYSICS_DT: f32 = 1.0 / 60.0;

/// Default gravity vector (downward, in m/s²).
pub fn default_gravity() -> Vector {
    Vector::new(0.0, -9.81)
}

/// Read-only view of one body, produced after physics for goal evaluation
/// and visual synchronization.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyState {
    pub id: String,
    pub shape: ShapeDef,
    pub position: [f32; 2],
    pub angle: f32,
    pub linvel: [f32; 2],
    pub angvel: f32,
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    pub is_static: bool,
    pub is_sensor: bool,
}

impl BodyState {
    /// World-space height of the body's highest point.
    pub fn top(&self) -> f32 {
        self.position[1] + self.shape.vertical_extent(self.angle)
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.angle)
    }
}

/// Registry entry tying a level object to its rapier handles.
#[derive(Debug, Clone)]
pub struct BodyEntry {
    pub id: String,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
    pub shape: ShapeDef,
    /// Current mass; temporarily lowered while dragged.
    pub mass: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Current static flag; temporarily forced while a sibling is dragged.
    pub is_static: bool,
    pub is_sensor: bool,
    /// Pose recorded when the body was placed, restored when a run ends.
    pub initial_pose: Option<Pose>,
}

/// Identifier of a spring link inside a `PhysicsWorld`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpringId(u32);

/// Free end of a spring link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpringTarget {
    /// Fixed world point.
    World([f32; 2]),
    /// Point on another body, in that body's local frame.
    Body {
        body: RigidBodyHandle,
        local_anchor: [f32; 2],
    },
}

/// Compliant spring pulling a body-local anchor towards a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringLink {
    pub body: RigidBodyHandle,
    pub local_anchor: [f32; 2],
    pub target: SpringTarget,
    pub rest_length: f32,
    pub stiffness: f32,
    pub damping: f32,
}

/// Physics world containing all `Rapier2D` components and the body registry.
pub struct PhysicsWorld {
    pub rigid_body_set: RigidBodySet,
    pub collider_set: ColliderSet,
    pub integration_parameters: IntegrationParameters,
    pub physics_pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub impulse_joint_set: ImpulseJointSet,
    pub multibody_joint_set: MultibodyJointSet,
    pub ccd_solver: CCDSolver,
    pub gravity: Vector,
    pub frame: u64,
    bodies: Vec<BodyEntry>,
    springs: Vec<(SpringId, SpringLink)>,
    next_spring: u32,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("frame", &self.frame)
            .field("body_count", &self.bodies.len())
            .field("spring_count", &self.springs.len())
            .field("collider_count", &self.collider_set.len())
            .finish_non_exhaustive()
    }
}

impl PhysicsWorld {
    /// Creates a new physics world with default settings.
    pub fn new() -> Self {
        Self::with_gravity(default_gravity())
    }

    /// Creates a new physics world with custom gravity.
    pub fn with_gravity(gravity: Vector) -> Self {
        let integration_parameters = IntegrationParameters {
            dt: PHYSICS_DT,
            ..Default::default()
        };

        Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity,
            frame: 0,
            bodies: Vec::new(),
            springs: Vec::new(),
            next_spring: 0,
        }
    }

    /// Advances the simulation by one fixed sub-step of `dt` seconds.
    pub fn step_dt(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        self.apply_spring_forces();
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            &(),
        );
        self.frame += 1;
    }

    /// Returns the number of sub-steps taken so far.
    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    // ------------------------------------------------------------------
    // Bodies
    // ------------------------------------------------------------------

    /// Creates the rigid body and collider for a level object.
    pub fn spawn_object(&mut self, object: &LevelObject) -> Result<(), LevelError> {
        if self.entry(&object.id).is_some() {
            return Err(LevelError::DuplicateObject(object.id.clone()));
        }

        let builder = if object.is_static {
            RigidBodyBuilder::fixed()
        } else {
            RigidBodyBuilder::dynamic()
        };
        let rigid_body = builder
            .translation(Vector::new(object.position[0], object.position[1]))
            .rotation(object.angle)
            .ccd_enabled(!object.is_static)
            .build();
        let body = self.rigid_body_set.insert(rigid_body);

        let collider = match object.shape {
            ShapeDef::Box { width, height } => ColliderBuilder::cuboid(width / 2.0, height / 2.0),
            ShapeDef::Circle { radius } => ColliderBuilder::ball(radius),
        }
        .friction(object.friction)
        .restitution(object.restitution)
        .mass(object.mass)
        .sensor(object.is_sensor)
        .build();
        let collider =
            self.collider_set
                .insert_with_parent(collider, body, &mut self.rigid_body_set);

        self.bodies.push(BodyEntry {
            id: object.id.clone(),
            body,
            collider,
            shape: object.shape,
            mass: object.mass,
            friction: object.friction,
            restitution: object.restitution,
            is_static: object.is_static,
            is_sensor: object.is_sensor,
            initial_pose: (!object.is_static).then(|| object.pose()),
        });
        Ok(())
    }

    /// Removes a body, its collider and every spring attached to it.
    pub fn remove_object(&mut self, id: &str) -> bool {
        let Some(pos) = self.bodies.iter().position(|b| b.id == id) else {
            return false;
        };
        let entry = self.bodies.remove(pos);
        self.springs.retain(|(_, link)| {
            link.body != entry.body
                && !matches!(link.target, SpringTarget::Body { body, .. } if body == entry.body)
        });
        self.rigid_body_set.remove(
            entry.body,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        true
    }

    pub fn entry(&self, id: &str) -> Option<&BodyEntry> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn entries(&self) -> &[BodyEntry] {
        &self.bodies
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    /// Handle of the rigid body registered under `id`.
    pub fn handle(&self, id: &str) -> Option<RigidBodyHandle> {
        self.entry(id).map(|b| b.body)
    }

    /// Ids of every body that is currently dynamic.
    pub fn dynamic_ids(&self) -> Vec<String> {
        self.bodies
            .iter()
            .filter(|b| !b.is_static)
            .map(|b| b.id.clone())
            .collect()
    }

    /// Snapshot of every registered body.
    pub fn body_states(&self) -> Vec<BodyState> {
        self.bodies
            .iter()
            .filter_map(|entry| {
                let body = self.rigid_body_set.get(entry.body)?;
                let pos = body.translation();
                let vel = body.linvel();
                Some(BodyState {
                    id: entry.id.clone(),
                    shape: entry.shape,
                    position: [pos.x, pos.y],
                    angle: body.rotation().angle(),
                    linvel: [vel.x, vel.y],
                    angvel: body.angvel(),
                    mass: entry.mass,
                    friction: entry.friction,
                    restitution: entry.restitution,
                    is_static: entry.is_static,
                    is_sensor: entry.is_sensor,
                })
            })
            .collect()
    }

    pub fn body_state(&self, id: &str) -> Option<BodyState> {
        self.body_states().into_iter().find(|b| b.id == id)
    }

    /// Current pose of a body.
    pub fn pose(&self, id: &str) -> Option<Pose> {
        let body = self.rigid_body_set.get(self.handle(id)?)?;
        let pos = body.translation();
        Some(Pose::new([pos.x, pos.y], body.rotation().angle()))
    }

    /// Teleports a body and zeroes its velocities.
    pub fn set_pose(&mut self, id: &str, pose: Pose) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        let Some(body) = self.rigid_body_set.get_mut(handle) else {
            return false;
        };
        body.set_translation(Vector::new(pose.position[0], pose.position[1]), true);
        body.set_rotation(Rotation::from_angle(pose.angle), true);
        body.set_linvel(Vector::new(0.0, 0.0), true);
        body.set_angvel(0.0, true);
        true
    }

    /// Zeroes both linear and angular velocity of a body.
    pub fn zero_velocity(&mut self, id: &str) {
        if let Some(body) = self
            .handle(id)
            .and_then(|h| self.rigid_body_set.get_mut(h))
        {
            body.set_linvel(Vector::new(0.0, 0.0), true);
            body.set_angvel(0.0, true);
        }
    }

    pub fn linvel(&self, id: &str) -> Option<[f32; 2]> {
        let body = self.rigid_body_set.get(self.handle(id)?)?;
        let vel = body.linvel();
        Some([vel.x, vel.y])
    }

    pub fn set_linvel(&mut self, id: &str, linvel: [f32; 2]) {
        if let Some(body) = self
            .handle(id)
            .and_then(|h| self.rigid_body_set.get_mut(h))
        {
            body.set_linvel(Vector::new(linvel[0], linvel[1]), true);
        }
    }

    pub fn angvel(&self, id: &str) -> Option<f32> {
        let body = self.rigid_body_set.get(self.handle(id)?)?;
        Some(body.angvel())
    }

    pub fn set_angvel(&mut self, id: &str, angvel: f32) {
        if let Some(body) = self
            .handle(id)
            .and_then(|h| self.rigid_body_set.get_mut(h))
        {
            body.set_angvel(angvel, true);
        }
    }

    /// Sets the mass of a body's collider and records it in the registry.
    pub fn set_mass(&mut self, id: &str, mass: f32) {
        let Some(entry) = self.bodies.iter_mut().find(|b| b.id == id) else {
            return;
        };
        entry.mass = mass;
        if let Some(collider) = self.collider_set.get_mut(entry.collider) {
            collider.set_mass(mass);
        }
        if let Some(body) = self.rigid_body_set.get_mut(entry.body) {
            body.wake_up(true);
        }
    }

    pub fn set_friction(&mut self, id: &str, friction: f32) {
        let Some(entry) = self.bodies.iter_mut().find(|b| b.id == id) else {
            return;
        };
        entry.friction = friction;
        if let Some(collider) = self.collider_set.get_mut(entry.collider) {
            collider.set_friction(friction);
        }
    }

    pub fn set_restitution(&mut self, id: &str, restitution: f32) {
        let Some(entry) = self.bodies.iter_mut().find(|b| b.id == id) else {
            return;
        };
        entry.restitution = restitution;
        if let Some(collider) = self.collider_set.get_mut(entry.collider) {
            collider.set_restitution(restitution);
        }
    }

    /// Switches a body between fixed and dynamic.
    pub fn set_static(&mut self, id: &str, is_static: bool) {
        let Some(entry) = self.bodies.iter_mut().find(|b| b.id == id) else {
            return;
        };
        entry.is_static = is_static;
        if let Some(body) = self.rigid_body_set.get_mut(entry.body) {
            let body_type = if is_static {
                RigidBodyType::Fixed
            } else {
                RigidBodyType::Dynamic
            };
            body.set_body_type(body_type, true);
        }
    }

    pub fn set_initial_pose(&mut self, id: &str, pose: Option<Pose>) {
        if let Some(entry) = self.bodies.iter_mut().find(|b| b.id == id) {
            entry.initial_pose = pose;
        }
    }

    /// Topmost body containing a world point.
    pub fn body_at(&self, point: [f32; 2]) -> Option<String> {
        self.bodies.iter().rev().find_map(|entry| {
            let body = self.rigid_body_set.get(entry.body)?;
            let pos = body.translation();
            let pose = Pose::new([pos.x, pos.y], body.rotation().angle());
            entry
                .shape
                .contains_local(pose.to_local(point))
                .then(|| entry.id.clone())
        })
    }

    // ------------------------------------------------------------------
    // Static colliders (simulation-only boundary walls)
    // ------------------------------------------------------------------

    /// Adds a collider without a parent (static collider).
    pub fn add_static_collider(&mut self, collider: Collider) -> ColliderHandle {
        self.collider_set.insert(collider)
    }

    pub fn remove_static_collider(&mut self, handle: ColliderHandle) {
        self.collider_set.remove(
            handle,
            &mut self.island_manager,
            &mut self.rigid_body_set,
            true,
        );
    }

    /// Builds four walls of the given thickness just outside `bounds`.
    pub fn add_boundary_walls(&mut self, bounds: &Bounds, thickness: f32) -> Vec<ColliderHandle> {
        let half = thickness / 2.0;
        let center = bounds.center();
        let half_w = bounds.width() / 2.0 + thickness;
        let half_h = bounds.height() / 2.0 + thickness;

        let walls = [
            // floor, ceiling
            (center[0], bounds.min[1] - half, half_w, half),
            (center[0], bounds.max[1] + half, half_w, half),
            // left, right
            (bounds.min[0] - half, center[1], half, half_h),
            (bounds.max[0] + half, center[1], half, half_h),
        ];

        walls
            .into_iter()
            .map(|(x, y, hx, hy)| {
                let collider = ColliderBuilder::cuboid(hx, hy)
                    .translation(Vector::new(x, y))
                    .friction(0.5)
                    .build();
                self.add_static_collider(collider)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Springs
    // ------------------------------------------------------------------

    pub fn add_spring(&mut self, link: SpringLink) -> SpringId {
        let id = SpringId(self.next_spring);
        self.next_spring += 1;
        self.springs.push((id, link));
        id
    }

    pub fn remove_spring(&mut self, id: SpringId) -> Option<SpringLink> {
        let pos = self.springs.iter().position(|(sid, _)| *sid == id)?;
        Some(self.springs.remove(pos).1)
    }

    pub fn spring(&self, id: SpringId) -> Option<&SpringLink> {
        self.springs.iter().find(|(sid, _)| *sid == id).map(|(_, l)| l)
    }

    pub fn spring_mut(&mut self, id: SpringId) -> Option<&mut SpringLink> {
        self.springs
            .iter_mut()
            .find(|(sid, _)| *sid == id)
            .map(|(_, l)| l)
    }

    pub fn spring_count(&self) -> usize {
        self.springs.len()
    }

    /// Creates a spring for a level constraint definition.
    pub fn add_constraint(&mut self, def: &ConstraintDef) -> Option<SpringId> {
        let body = self.handle(&def.body_a)?;
        let target = match &def.body_b {
            Some(other) => SpringTarget::Body {
                body: self.handle(other)?,
                local_anchor: def.anchor_b,
            },
            None => SpringTarget::World(def.anchor_b),
        };

        let mut link = SpringLink {
            body,
            local_anchor: def.anchor_a,
            target,
            rest_length: 0.0,
            stiffness: def.stiffness,
            damping: def.damping,
        };
        link.rest_length = def.rest_length.unwrap_or_else(|| {
            self.spring_endpoints(&link)
                .map_or(0.0, |(a, b, _, _)| distance(a, b))
        });
        Some(self.add_spring(link))
    }

    /// World positions and velocities of both spring endpoints.
    fn spring_endpoints(&self, link: &SpringLink) -> Option<([f32; 2], [f32; 2], [f32; 2], [f32; 2])> {
        let body = self.rigid_body_set.get(link.body)?;
        let a = body_point(body, link.local_anchor);
        let va = body.linvel();
        let (b, vb) = match link.target {
            SpringTarget::World(point) => (point, [0.0, 0.0]),
            SpringTarget::Body { body, local_anchor } => {
                let other = self.rigid_body_set.get(body)?;
                let v = other.linvel();
                (body_point(other, local_anchor), [v.x, v.y])
            }
        };
        Some((a, b, [va.x, va.y], vb))
    }

    /// Resets user forces and applies every spring's force for the coming sub-step.
    fn apply_spring_forces(&mut self) {
        if self.springs.is_empty() {
            return;
        }

        let mut forces: Vec<(RigidBodyHandle, [f32; 2])> = Vec::with_capacity(self.springs.len() * 2);
        for (_, link) in &self.springs {
            let Some((a, b, va, vb)) = self.spring_endpoints(link) else {
                continue;
            };
            let delta = [b[0] - a[0], b[1] - a[1]];
            let len = distance(a, b);
            let dir = if len > f32::EPSILON {
                [delta[0] / len, delta[1] / len]
            } else {
                [0.0, 0.0]
            };
            let stretch = len - link.rest_length;
            let rel_vel = [vb[0] - va[0], vb[1] - va[1]];
            let closing = rel_vel[0] * dir[0] + rel_vel[1] * dir[1];
            let magnitude = link.stiffness * stretch + link.damping * closing;
            let force = [dir[0] * magnitude, dir[1] * magnitude];

            forces.push((link.body, force));
            if let SpringTarget::Body { body, .. } = link.target {
                forces.push((body, [-force[0], -force[1]]));
            }
        }

        for (_, body) in self.rigid_body_set.iter_mut() {
            body.reset_forces(false);
        }
        for (handle, force) in forces {
            if let Some(body) = self.rigid_body_set.get_mut(handle) {
                if body.is_dynamic() {
                    body.add_force(Vector::new(force[0], force[1]), true);
                }
            }
        }
    }
}

fn body_point(body: &RigidBody, local: [f32; 2]) -> [f32; 2] {
    let pos = body.translation();
    Pose::new([pos.x, pos.y], body.rotation().angle()).to_world(local)
}

pub(crate) fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dx * dx + dy * dy).sqrt()
}
