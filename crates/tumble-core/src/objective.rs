//! Level objectives.
//!
//! An objective watches the bodies whose id starts with its target prefix
//! and decides, frame by frame, whether the designer's goal was reached.
//! Completion is a tri-state: once an objective is `Complete` or `Failed`
//! it stays there until `reset`.

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;
use crate::physics::BodyState;

/// Tolerance used when accumulated time is compared with a duration.
pub const TIME_EPSILON: f32 = 1e-4;

pub const NO_TARGET: &str = "no target found";

/// Objective progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Completion {
    #[default]
    Pending,
    Complete,
    Failed,
}

/// Scoring rule: award `stars` once `height` is reached, optionally no later
/// than `time` seconds into the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarThreshold {
    pub stars: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f32>,
}

/// Axis-aligned rectangle given by its minimum corner and size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Zone {
    /// Inclusive containment test.
    pub fn contains(&self, point: [f32; 2]) -> bool {
        point[0] >= self.x
            && point[0] <= self.x + self.w
            && point[1] >= self.y
            && point[1] <= self.y + self.h
    }
}

/// Read-only status pushed to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalStatus {
    pub id: String,
    pub display_name: String,
    pub is_complete: bool,
    pub is_failed: bool,
    pub status_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    MaxHeight,
    MinHeight,
    StayInZone,
    LeaveZone,
}

/// Type tags accepted in the `objectives` list.
pub const OBJECTIVE_TAGS: &[&str] = &["maxHeight", "minHeight", "stayInZone", "leaveZone"];

fn default_ceiling() -> f32 {
    f32::INFINITY
}

/// Objective definition as authored in the level document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectiveDef {
    #[serde(rename_all = "camelCase")]
    MaxHeight {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        target: String,
        target_height: f32,
        #[serde(default)]
        stars: Vec<StarThreshold>,
    },
    #[serde(rename_all = "camelCase")]
    MinHeight {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        target: String,
        target_height: f32,
        #[serde(default = "default_ceiling")]
        initial_height: f32,
        #[serde(default)]
        stars: Vec<StarThreshold>,
    },
    #[serde(rename_all = "camelCase")]
    StayInZone {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        target: String,
        zone: Zone,
        duration: f32,
        #[serde(default)]
        stars: Vec<StarThreshold>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveZone {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        target: String,
        zone: Zone,
        time_limit: f32,
        #[serde(default)]
        stars: Vec<StarThreshold>,
    },
}

/// State shared by every objective variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveCore {
    pub id: String,
    pub display_name: String,
    /// Bodies whose id starts with this prefix are tracked.
    pub target: String,
    pub completion: Completion,
    pub completed_at: Option<f32>,
    pub status_text: String,
    pub stars: Vec<StarThreshold>,
    disposed: bool,
}

impl ObjectiveCore {
    fn new(id: String, name: Option<String>, target: String, stars: Vec<StarThreshold>) -> Self {
        Self {
            display_name: name.unwrap_or_else(|| id.clone()),
            id,
            target,
            completion: Completion::Pending,
            completed_at: None,
            status_text: String::new(),
            stars,
            disposed: false,
        }
    }

    fn reset(&mut self) {
        self.completion = Completion::Pending;
        self.completed_at = None;
        self.status_text.clear();
    }

    fn complete(&mut self, at: f32) {
        if self.completion == Completion::Pending {
            self.completion = Completion::Complete;
            self.completed_at = Some(at);
            tracing::info!("[goals] objective `{}` complete at {:.2}s", self.id, at);
        }
    }

    fn fail(&mut self) {
        if self.completion == Completion::Pending {
            self.completion = Completion::Failed;
            tracing::info!("[goals] objective `{}` failed", self.id);
        }
    }

    fn tracked<'a>(&'a self, bodies: &'a [BodyState]) -> impl Iterator<Item = &'a BodyState> {
        bodies.iter().filter(move |b| b.id.starts_with(&self.target))
    }

    /// Highest point among tracked bodies, `None` when nothing matches.
    fn highest(&self, bodies: &[BodyState]) -> Option<f32> {
        self.tracked(bodies).map(BodyState::top).reduce(f32::max)
    }

    /// Stars awarded given each threshold's achievement time.
    fn score(&self, achieved: impl Fn(usize, &StarThreshold) -> Option<f32>) -> u8 {
        match self.completion {
            Completion::Failed => 0,
            _ if self.stars.is_empty() => u8::from(self.completion == Completion::Complete),
            _ => self
                .stars
                .iter()
                .enumerate()
                .filter(|(i, t)| {
                    achieved(*i, t).is_some_and(|at| t.time.is_none_or(|limit| at <= limit + TIME_EPSILON))
                })
                .map(|(_, t)| t.stars)
                .max()
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxHeightObjective {
    pub core: ObjectiveCore,
    pub target_height: f32,
    /// Highest top extent ever observed; negative infinity until a body is seen.
    pub max_height: f32,
    /// First time each star threshold's height was reached.
    pub threshold_times: Vec<Option<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinHeightObjective {
    pub core: ObjectiveCore,
    pub target_height: f32,
    pub initial_height: f32,
    /// Lowest observed highest point; only ever decreases.
    pub ceiling: f32,
    pub threshold_times: Vec<Option<f32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StayInZoneObjective {
    pub core: ObjectiveCore,
    pub zone: Zone,
    pub duration: f32,
    /// Continuous time a tracked body has been inside the zone.
    pub accumulated: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaveZoneObjective {
    pub core: ObjectiveCore,
    pub zone: Zone,
    pub time_limit: f32,
    pub elapsed: f32,
}

/// A live objective.
#[derive(Debug, Clone, PartialEq)]
pub enum Objective {
    MaxHeight(MaxHeightObjective),
    MinHeight(MinHeightObjective),
    StayInZone(StayInZoneObjective),
    LeaveZone(LeaveZoneObjective),
}

fn non_negative(id: &str, field: &str, value: f32) -> Result<(), DefinitionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DefinitionError::OutOfRange {
            kind: "objective",
            id: id.to_string(),
            reason: format!("`{field}` must be a non-negative number, got {value}"),
        })
    }
}

impl Objective {
    /// Builds a live objective from its definition.
    pub fn from_def(def: ObjectiveDef) -> Result<Self, DefinitionError> {
        Ok(match def {
            ObjectiveDef::MaxHeight {
                id,
                name,
                target,
                target_height,
                stars,
            } => {
                let threshold_times = vec![None; stars.len()];
                Self::MaxHeight(MaxHeightObjective {
                    core: ObjectiveCore::new(id, name, target, stars),
                    target_height,
                    max_height: f32::NEG_INFINITY,
                    threshold_times,
                })
            }
            ObjectiveDef::MinHeight {
                id,
                name,
                target,
                target_height,
                initial_height,
                stars,
            } => {
                let threshold_times = vec![None; stars.len()];
                Self::MinHeight(MinHeightObjective {
                    core: ObjectiveCore::new(id, name, target, stars),
                    target_height,
                    initial_height,
                    ceiling: initial_height,
                    threshold_times,
                })
            }
            ObjectiveDef::StayInZone {
                id,
                name,
                target,
                zone,
                duration,
                stars,
            } => {
                non_negative(&id, "duration", duration)?;
                non_negative(&id, "zone.w", zone.w)?;
                non_negative(&id, "zone.h", zone.h)?;
                Self::StayInZone(StayInZoneObjective {
                    core: ObjectiveCore::new(id, name, target, stars),
                    zone,
                    duration,
                    accumulated: 0.0,
                })
            }
            ObjectiveDef::LeaveZone {
                id,
                name,
                target,
                zone,
                time_limit,
                stars,
            } => {
                non_negative(&id, "timeLimit", time_limit)?;
                non_negative(&id, "zone.w", zone.w)?;
                non_negative(&id, "zone.h", zone.h)?;
                Self::LeaveZone(LeaveZoneObjective {
                    core: ObjectiveCore::new(id, name, target, stars),
                    zone,
                    time_limit,
                    elapsed: 0.0,
                })
            }
        })
    }

    pub fn core(&self) -> &ObjectiveCore {
        match self {
            Self::MaxHeight(o) => &o.core,
            Self::MinHeight(o) => &o.core,
            Self::StayInZone(o) => &o.core,
            Self::LeaveZone(o) => &o.core,
        }
    }

    fn core_mut(&mut self) -> &mut ObjectiveCore {
        match self {
            Self::MaxHeight(o) => &mut o.core,
            Self::MinHeight(o) => &mut o.core,
            Self::StayInZone(o) => &mut o.core,
            Self::LeaveZone(o) => &mut o.core,
        }
    }

    pub fn kind(&self) -> ObjectiveKind {
        match self {
            Self::MaxHeight(_) => ObjectiveKind::MaxHeight,
            Self::MinHeight(_) => ObjectiveKind::MinHeight,
            Self::StayInZone(_) => ObjectiveKind::StayInZone,
            Self::LeaveZone(_) => ObjectiveKind::LeaveZone,
        }
    }

    pub fn id(&self) -> &str {
        &self.core().id
    }

    pub fn display_name(&self) -> &str {
        &self.core().display_name
    }

    pub fn completion(&self) -> Completion {
        self.core().completion
    }

    pub fn is_complete(&self) -> bool {
        self.completion() == Completion::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.completion() == Completion::Failed
    }

    /// Advances the objective by one simulation frame.
    pub fn update(&mut self, bodies: &[BodyState], delta_time: f32, total_elapsed: f32) {
        if self.core().disposed {
            return;
        }
        match self {
            Self::MaxHeight(o) => o.update(bodies, total_elapsed),
            Self::MinHeight(o) => o.update(bodies, total_elapsed),
            Self::StayInZone(o) => o.update(bodies, delta_time, total_elapsed),
            Self::LeaveZone(o) => o.update(bodies, delta_time, total_elapsed),
        }
    }

    /// Stars earned by a run that ended at `end_time`.
    pub fn calculate_stars(&self, end_time: f32) -> u8 {
        match self {
            Self::MaxHeight(o) => o.core.score(|i, _| o.threshold_times.get(i).copied().flatten()),
            Self::MinHeight(o) => o.core.score(|i, _| o.threshold_times.get(i).copied().flatten()),
            Self::StayInZone(StayInZoneObjective { core, .. })
            | Self::LeaveZone(LeaveZoneObjective { core, .. }) => {
                let at = (core.completion == Completion::Complete)
                    .then(|| core.completed_at.unwrap_or(end_time));
                core.score(|_, _| at)
            }
        }
    }

    /// Returns the objective to its freshly loaded state.
    pub fn reset(&mut self) {
        self.core_mut().reset();
        match self {
            Self::MaxHeight(o) => {
                o.max_height = f32::NEG_INFINITY;
                o.threshold_times.iter_mut().for_each(|t| *t = None);
            }
            Self::MinHeight(o) => {
                o.ceiling = o.initial_height;
                o.threshold_times.iter_mut().for_each(|t| *t = None);
            }
            Self::StayInZone(o) => o.accumulated = 0.0,
            Self::LeaveZone(o) => o.elapsed = 0.0,
        }
    }

    /// Detaches the objective; further updates are ignored.
    pub fn dispose(&mut self) {
        self.reset();
        self.core_mut().disposed = true;
    }

    pub fn status(&self) -> GoalStatus {
        let core = self.core();
        GoalStatus {
            id: core.id.clone(),
            display_name: core.display_name.clone(),
            is_complete: core.completion == Completion::Complete,
            is_failed: core.completion == Completion::Failed,
            status_text: core.status_text.clone(),
        }
    }
}

impl MaxHeightObjective {
    fn update(&mut self, bodies: &[BodyState], total_elapsed: f32) {
        let Some(highest) = self.core.highest(bodies) else {
            self.core.status_text = NO_TARGET.to_string();
            return;
        };
        self.max_height = self.max_height.max(highest);

        for (threshold, time) in self.core.stars.iter().zip(self.threshold_times.iter_mut()) {
            let reached = threshold.height.map_or(self.max_height >= self.target_height, |h| {
                self.max_height >= h
            });
            if reached && time.is_none() {
                *time = Some(total_elapsed);
            }
        }
        if self.max_height >= self.target_height {
            self.core.complete(total_elapsed);
        }
        self.core.status_text = format!(
            "Height: {:.2} / {:.2}",
            self.max_height, self.target_height
        );
    }
}

impl MinHeightObjective {
    fn update(&mut self, bodies: &[BodyState], total_elapsed: f32) {
        let Some(highest) = self.core.highest(bodies) else {
            self.core.status_text = NO_TARGET.to_string();
            return;
        };
        self.ceiling = self.ceiling.min(highest);

        for (threshold, time) in self.core.stars.iter().zip(self.threshold_times.iter_mut()) {
            let reached = threshold.height.map_or(self.ceiling <= self.target_height, |h| {
                self.ceiling <= h
            });
            if reached && time.is_none() {
                *time = Some(total_elapsed);
            }
        }
        if self.ceiling <= self.target_height {
            self.core.complete(total_elapsed);
        }
        self.core.status_text = format!(
            "Ceiling: {:.2} / {:.2}",
            self.ceiling, self.target_height
        );
    }
}

impl StayInZoneObjective {
    fn update(&mut self, bodies: &[BodyState], delta_time: f32, total_elapsed: f32) {
        if self.core.completion != Completion::Pending {
            return;
        }
        let tracked: Vec<&BodyState> = self.core.tracked(bodies).collect();
        if tracked.is_empty() {
            self.accumulated = 0.0;
            self.core.status_text = NO_TARGET.to_string();
            return;
        }
        let inside = tracked.iter().any(|b| self.zone.contains(b.position));

        if inside {
            self.accumulated += delta_time.max(0.0);
            if self.accumulated >= self.duration - TIME_EPSILON {
                self.accumulated = self.duration;
                self.core.complete(total_elapsed);
            }
        } else {
            self.accumulated = 0.0;
        }
        self.core.status_text = format!(
            "In zone: {:.1}s / {:.1}s",
            self.accumulated, self.duration
        );
    }
}

impl LeaveZoneObjective {
    fn update(&mut self, bodies: &[BodyState], delta_time: f32, total_elapsed: f32) {
        if self.core.completion != Completion::Pending {
            return;
        }
        let tracked: Vec<&BodyState> = self.core.tracked(bodies).collect();
        if tracked.is_empty() {
            self.core.status_text = NO_TARGET.to_string();
            return;
        }
        let all_outside = tracked.iter().all(|b| !self.zone.contains(b.position));

        if all_outside {
            self.core.complete(total_elapsed);
            self.core.status_text = "Left zone".to_string();
            return;
        }
        self.elapsed += delta_time.max(0.0);
        if self.elapsed >= self.time_limit {
            self.core.fail();
            self.core.status_text = "Still in zone".to_string();
        } else {
            self.core.status_text = format!(
                "Leave zone: {:.1}s left",
                self.time_limit - self.elapsed
            );
        }
    }
}
