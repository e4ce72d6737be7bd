//! Fixed-step physics scheduler.
//!
//! The world is always integrated with a fixed sub-step delta. A frame's
//! variable duration only decides how many sub-steps run, scaled from the
//! active profile's nominal count and clamped so one slow frame cannot
//! snowball into an unbounded catch-up.

use serde::{Deserialize, Serialize};

use crate::physics::PhysicsWorld;

/// Lowest number of sub-steps run for an active frame.
pub const MIN_SUBSTEPS: u32 = 1;
/// Highest number of sub-steps run for a single frame.
pub const MAX_SUBSTEPS: u32 = 8;

/// Which cadence the scheduler steps with this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CadenceProfile {
    /// Simulation mode.
    Running,
    /// A drag session is open while the scene is otherwise paused.
    Dragging,
}

/// Sub-step configuration of one profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CadenceConfig {
    /// Sub-steps run for a frame of exactly the target duration.
    pub nominal_steps: u32,
    /// Fixed integration delta of one sub-step, in seconds.
    pub substep_dt: f32,
}

/// Scheduler tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub running: CadenceConfig,
    pub dragging: CadenceConfig,
    /// Frame duration the nominal step counts are tuned for.
    pub target_frame_dt: f32,
    pub min_substeps: u32,
    pub max_substeps: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            running: CadenceConfig {
                nominal_steps: 4,
                substep_dt: 1.0 / 240.0,
            },
            dragging: CadenceConfig {
                nominal_steps: 2,
                substep_dt: 1.0 / 120.0,
            },
            target_frame_dt: 1.0 / 60.0,
            min_substeps: MIN_SUBSTEPS,
            max_substeps: MAX_SUBSTEPS,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_substeps(mut self, max: u32) -> Self {
        self.max_substeps = max.max(self.min_substeps);
        self
    }

    pub fn cadence(&self, profile: CadenceProfile) -> CadenceConfig {
        match profile {
            CadenceProfile::Running => self.running,
            CadenceProfile::Dragging => self.dragging,
        }
    }
}

/// Advances a `PhysicsWorld` by fixed sub-steps.
#[derive(Debug, Clone, Default)]
pub struct PhysicsScheduler {
    config: SchedulerConfig,
    total_substeps: u64,
}

impl PhysicsScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            total_substeps: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sub-steps taken since creation.
    pub fn total_substeps(&self) -> u64 {
        self.total_substeps
    }

    /// Number of sub-steps to run for a frame of `frame_dt` seconds.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn substep_count(&self, profile: CadenceProfile, frame_dt: f32) -> u32 {
        let cadence = self.config.cadence(profile);
        let target = self.config.target_frame_dt;
        let dt = if frame_dt.is_finite() && frame_dt > 0.0 {
            frame_dt
        } else {
            target
        };

        let scaled = (cadence.nominal_steps as f32 * dt / target).round();
        let lo = self.config.min_substeps;
        let hi = self.config.max_substeps.max(lo);
        if scaled.is_nan() || scaled <= lo as f32 {
            lo
        } else if scaled >= hi as f32 {
            hi
        } else {
            scaled as u32
        }
    }

    /// Runs this frame's sub-steps and returns the simulated time advanced.
    ///
    /// With no active profile nothing is stepped and zero is returned.
    #[allow(clippy::cast_precision_loss)]
    pub fn advance(
        &mut self,
        world: &mut PhysicsWorld,
        profile: Option<CadenceProfile>,
        frame_dt: f32,
    ) -> f32 {
        let Some(profile) = profile else {
            return 0.0;
        };
        let steps = self.substep_count(profile, frame_dt);
        let substep_dt = self.config.cadence(profile).substep_dt;

        for _ in 0..steps {
            world.step_dt(substep_dt);
        }
        self.total_substeps += u64::from(steps);
        tracing::trace!(
            "[scheduler] {:?}: {} sub-steps of {:.5}s (frame {:.4}s)",
            profile,
            steps,
            substep_dt,
            frame_dt
        );

        steps as f32 * substep_dt
    }
}
