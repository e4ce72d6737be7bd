//! End conditions.
//!
//! A condition decides when a simulation run is over. The first condition
//! whose `is_met` flag turns on ends the level.

use serde::Deserialize;

use crate::error::DefinitionError;
use crate::objective::{GoalStatus, NO_TARGET, Objective, ObjectiveKind, TIME_EPSILON};
use crate::physics::BodyState;

/// Height gain below which a new apex does not restart the settle countdown.
pub const PEAK_EPSILON: f32 = 1e-3;

/// Type tags accepted in the `endConditions` list.
pub const CONDITION_TAGS: &[&str] = &["timeLimit", "stayInZoneEnd", "leaveZoneEnd", "maxHeightEnd"];

/// End-condition definition as authored in the level document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConditionDef {
    #[serde(rename_all = "camelCase")]
    TimeLimit {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        duration: f32,
        #[serde(default)]
        awaits_manual_trigger: bool,
    },
    #[serde(rename_all = "camelCase")]
    StayInZoneEnd {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        objective: String,
        #[serde(default)]
        delay: f32,
    },
    #[serde(rename_all = "camelCase")]
    LeaveZoneEnd {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        objective: String,
        #[serde(default)]
        delay: f32,
    },
    #[serde(rename_all = "camelCase")]
    MaxHeightEnd {
        id: String,
        #[serde(default, alias = "displayName")]
        name: Option<String>,
        target: String,
        target_height: f32,
        settle_time: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeLimitCondition {
    pub duration: f32,
    pub awaits_manual_trigger: bool,
    pub elapsed: f32,
    /// Deadline reached on a condition that waits for a manual trigger.
    pub is_time_up: bool,
}

/// Waits for an objective to complete, then for `delay` more seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveEndCondition {
    pub objective_id: String,
    pub objective_kind: ObjectiveKind,
    pub delay: f32,
    /// Time since the objective was seen complete.
    pub waited: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxHeightEndCondition {
    pub target: String,
    pub target_height: f32,
    pub settle_time: f32,
    pub peak: f32,
    /// Time since the last new peak above the target height.
    pub countdown: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    TimeLimit(TimeLimitCondition),
    StayInZoneEnd(ObjectiveEndCondition),
    LeaveZoneEnd(ObjectiveEndCondition),
    MaxHeightEnd(MaxHeightEndCondition),
}

/// A live end condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub id: String,
    pub display_name: String,
    pub is_met: bool,
    pub status_text: String,
    pub kind: ConditionKind,
}

fn check(id: &str, field: &str, value: f32) -> Result<(), DefinitionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DefinitionError::OutOfRange {
            kind: "end condition",
            id: id.to_string(),
            reason: format!("`{field}` must be a non-negative number, got {value}"),
        })
    }
}

impl Condition {
    pub fn from_def(def: ConditionDef) -> Result<Self, DefinitionError> {
        let (id, name, kind) = match def {
            ConditionDef::TimeLimit {
                id,
                name,
                duration,
                awaits_manual_trigger,
            } => {
                check(&id, "duration", duration)?;
                let kind = ConditionKind::TimeLimit(TimeLimitCondition {
                    duration,
                    awaits_manual_trigger,
                    elapsed: 0.0,
                    is_time_up: false,
                });
                (id, name, kind)
            }
            ConditionDef::StayInZoneEnd {
                id,
                name,
                objective,
                delay,
            } => {
                check(&id, "delay", delay)?;
                let kind = ConditionKind::StayInZoneEnd(ObjectiveEndCondition {
                    objective_id: objective,
                    objective_kind: ObjectiveKind::StayInZone,
                    delay,
                    waited: None,
                });
                (id, name, kind)
            }
            ConditionDef::LeaveZoneEnd {
                id,
                name,
                objective,
                delay,
            } => {
                check(&id, "delay", delay)?;
                let kind = ConditionKind::LeaveZoneEnd(ObjectiveEndCondition {
                    objective_id: objective,
                    objective_kind: ObjectiveKind::LeaveZone,
                    delay,
                    waited: None,
                });
                (id, name, kind)
            }
            ConditionDef::MaxHeightEnd {
                id,
                name,
                target,
                target_height,
                settle_time,
            } => {
                check(&id, "settleTime", settle_time)?;
                let kind = ConditionKind::MaxHeightEnd(MaxHeightEndCondition {
                    target,
                    target_height,
                    settle_time,
                    peak: f32::NEG_INFINITY,
                    countdown: None,
                });
                (id, name, kind)
            }
        };

        Ok(Self {
            display_name: name.unwrap_or_else(|| id.clone()),
            id,
            is_met: false,
            status_text: String::new(),
            kind,
        })
    }

    /// Advances the condition by one simulation frame.
    pub fn update(&mut self, bodies: &[BodyState], objectives: &[Objective], delta_time: f32) {
        if self.is_met {
            return;
        }
        let dt = delta_time.max(0.0);
        let (met, text) = match &mut self.kind {
            ConditionKind::TimeLimit(c) => c.update(dt),
            ConditionKind::StayInZoneEnd(c) | ConditionKind::LeaveZoneEnd(c) => {
                c.update(objectives, dt)
            }
            ConditionKind::MaxHeightEnd(c) => c.update(bodies, dt),
        };
        self.status_text = text;
        if met {
            self.is_met = true;
            tracing::info!("[goals] end condition `{}` met", self.id);
        }
    }

    /// Confirms an expired manual time limit.
    ///
    /// Returns `false` with a warning when the condition is not a manual
    /// time limit, is already met, or has not reached its deadline.
    pub fn trigger_manually(&mut self) -> bool {
        let ConditionKind::TimeLimit(limit) = &self.kind else {
            tracing::warn!("[goals] `{}` cannot be triggered manually", self.id);
            return false;
        };
        if !limit.awaits_manual_trigger {
            tracing::warn!("[goals] `{}` does not await a manual trigger", self.id);
            return false;
        }
        if self.is_met {
            tracing::warn!("[goals] `{}` already met", self.id);
            return false;
        }
        if !limit.is_time_up {
            tracing::warn!("[goals] `{}` triggered before its deadline", self.id);
            return false;
        }
        self.is_met = true;
        tracing::info!("[goals] end condition `{}` triggered manually", self.id);
        true
    }

    /// Seconds left on a time limit; `None` for other variants.
    pub fn remaining_time(&self) -> Option<f32> {
        match &self.kind {
            ConditionKind::TimeLimit(c) => Some((c.duration - c.elapsed).max(0.0)),
            _ => None,
        }
    }

    pub fn is_time_up(&self) -> bool {
        matches!(&self.kind, ConditionKind::TimeLimit(c) if c.is_time_up)
    }

    pub fn reset(&mut self) {
        self.is_met = false;
        self.status_text.clear();
        match &mut self.kind {
            ConditionKind::TimeLimit(c) => {
                c.elapsed = 0.0;
                c.is_time_up = false;
            }
            ConditionKind::StayInZoneEnd(c) | ConditionKind::LeaveZoneEnd(c) => c.waited = None,
            ConditionKind::MaxHeightEnd(c) => {
                c.peak = f32::NEG_INFINITY;
                c.countdown = None;
            }
        }
    }

    pub fn status(&self) -> GoalStatus {
        GoalStatus {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            is_complete: self.is_met,
            is_failed: false,
            status_text: self.status_text.clone(),
        }
    }
}

impl TimeLimitCondition {
    fn update(&mut self, dt: f32) -> (bool, String) {
        if self.is_time_up {
            return (false, "Time up".to_string());
        }
        self.elapsed += dt;
        if self.elapsed >= self.duration - TIME_EPSILON {
            self.elapsed = self.duration;
            if self.awaits_manual_trigger {
                self.is_time_up = true;
                return (false, "Time up".to_string());
            }
            return (true, "Time up".to_string());
        }
        (false, format!("{:.1}s left", self.duration - self.elapsed))
    }
}

impl ObjectiveEndCondition {
    fn update(&mut self, objectives: &[Objective], dt: f32) -> (bool, String) {
        match self.waited.as_mut() {
            Some(waited) => *waited += dt,
            None => {
                let Some(objective) = objectives
                    .iter()
                    .find(|o| o.id() == self.objective_id && o.kind() == self.objective_kind)
                else {
                    return (false, format!("objective `{}` not found", self.objective_id));
                };
                if !objective.is_complete() {
                    return (false, "Waiting".to_string());
                }
                self.waited = Some(0.0);
            }
        }

        let waited = self.waited.unwrap_or_default();
        if waited >= self.delay - TIME_EPSILON {
            (true, "Done".to_string())
        } else {
            (false, format!("Ending in {:.1}s", self.delay - waited))
        }
    }
}

impl MaxHeightEndCondition {
    fn update(&mut self, bodies: &[BodyState], dt: f32) -> (bool, String) {
        let Some(highest) = bodies
            .iter()
            .filter(|b| b.id.starts_with(&self.target))
            .map(BodyState::top)
            .reduce(f32::max)
        else {
            return (false, NO_TARGET.to_string());
        };

        if highest > self.peak {
            let new_peak = highest > self.peak + PEAK_EPSILON;
            self.peak = highest;
            if self.peak >= self.target_height && (new_peak || self.countdown.is_none()) {
                self.countdown = Some(0.0);
                return (false, format!("Settling: {:.1}s", self.settle_time));
            }
        }

        match self.countdown.as_mut() {
            Some(countdown) => {
                *countdown += dt;
                if *countdown >= self.settle_time - TIME_EPSILON {
                    (true, "Settled".to_string())
                } else {
                    (false, format!("Settling: {:.1}s", self.settle_time - *countdown))
                }
            }
            None => (
                false,
                format!("Height: {:.2} / {:.2}", self.peak, self.target_height),
            ),
        }
    }
}
