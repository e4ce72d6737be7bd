//! Objective and end-condition book-keeping for one level.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::condition::{CONDITION_TAGS, Condition, ConditionDef};
use crate::error::DefinitionError;
use crate::objective::{GoalStatus, OBJECTIVE_TAGS, Objective, ObjectiveDef};
use crate::physics::BodyState;

/// Per-objective result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveScore {
    pub id: String,
    pub stars: u8,
    pub complete: bool,
}

/// Level-end summary handed to the UI once per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    pub level_id: String,
    /// Condition that ended the run.
    pub ended_by: String,
    pub end_time: f32,
    pub objectives: Vec<ObjectiveScore>,
    pub all_complete: bool,
    /// Level unlocked by this run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked: Option<String>,
}

/// Validates a definition's `type` tag, then deserializes it.
fn parse_tagged<T: DeserializeOwned>(
    kind: &'static str,
    known: &[&str],
    value: &serde_json::Value,
) -> Result<T, DefinitionError> {
    let tag = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DefinitionError::MissingType { kind })?;
    if !known.contains(&tag) {
        return Err(DefinitionError::UnknownVariant {
            kind,
            tag: tag.to_string(),
        });
    }
    serde_json::from_value(value.clone()).map_err(|source| DefinitionError::Invalid {
        kind,
        tag: tag.to_string(),
        source,
    })
}

/// Live objectives and end conditions of the loaded level.
#[derive(Debug, Clone, Default)]
pub struct GoalBook {
    pub objectives: Vec<Objective>,
    pub conditions: Vec<Condition>,
}

impl GoalBook {
    /// Builds every definition it can; bad entries are logged and skipped.
    pub fn from_definitions(
        objectives: &[serde_json::Value],
        conditions: &[serde_json::Value],
    ) -> Self {
        let objectives: Vec<Objective> = objectives
            .iter()
            .filter_map(|value| {
                parse_tagged::<ObjectiveDef>("objective", OBJECTIVE_TAGS, value)
                    .and_then(Objective::from_def)
                    .inspect_err(|e| tracing::warn!("[goals] skipping objective: {}", e))
                    .ok()
            })
            .collect();
        let conditions: Vec<Condition> = conditions
            .iter()
            .filter_map(|value| {
                parse_tagged::<ConditionDef>("end condition", CONDITION_TAGS, value)
                    .and_then(Condition::from_def)
                    .inspect_err(|e| tracing::warn!("[goals] skipping end condition: {}", e))
                    .ok()
            })
            .collect();

        tracing::info!(
            "[goals] loaded {} objectives, {} end conditions",
            objectives.len(),
            conditions.len()
        );
        Self {
            objectives,
            conditions,
        }
    }

    /// Runs one evaluation frame.
    ///
    /// Objectives update first. Conditions then update in declaration order,
    /// and the first one found met stops the pass; its id is returned.
    pub fn evaluate(&mut self, bodies: &[BodyState], delta_time: f32, total_elapsed: f32) -> Option<String> {
        for objective in &mut self.objectives {
            objective.update(bodies, delta_time, total_elapsed);
        }
        self.first_met_condition(bodies, delta_time)
    }

    fn first_met_condition(&mut self, bodies: &[BodyState], delta_time: f32) -> Option<String> {
        for condition in &mut self.conditions {
            condition.update(bodies, &self.objectives, delta_time);
            if condition.is_met {
                return Some(condition.id.clone());
            }
        }
        None
    }

    pub fn statuses(&self) -> Vec<GoalStatus> {
        self.objectives
            .iter()
            .map(Objective::status)
            .chain(self.conditions.iter().map(Condition::status))
            .collect()
    }

    pub fn condition_mut(&mut self, id: &str) -> Option<&mut Condition> {
        self.conditions.iter_mut().find(|c| c.id == id)
    }

    pub fn objective(&self, id: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.id() == id)
    }

    /// Id of the first condition already met, in declaration order.
    pub fn met_condition(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|c| c.is_met)
            .map(|c| c.id.as_str())
    }

    pub fn all_complete(&self) -> bool {
        self.objectives.iter().all(Objective::is_complete)
    }

    pub fn reset_objectives(&mut self) {
        self.objectives.iter_mut().for_each(Objective::reset);
    }

    pub fn reset_all(&mut self) {
        self.reset_objectives();
        self.conditions.iter_mut().for_each(Condition::reset);
    }

    pub fn dispose(&mut self) {
        self.objectives.iter_mut().for_each(Objective::dispose);
        self.objectives.clear();
        self.conditions.clear();
    }

    /// Scores every objective for a run that ended at `end_time`.
    pub fn summary(
        &self,
        level_id: &str,
        ended_by: &str,
        end_time: f32,
        next_level: Option<&str>,
    ) -> LevelSummary {
        let objectives: Vec<ObjectiveScore> = self
            .objectives
            .iter()
            .map(|o| ObjectiveScore {
                id: o.id().to_string(),
                stars: o.calculate_stars(end_time),
                complete: o.is_complete(),
            })
            .collect();
        let all_complete = self.all_complete();
        LevelSummary {
            level_id: level_id.to_string(),
            ended_by: ended_by.to_string(),
            end_time,
            objectives,
            all_complete,
            unlocked: next_level.filter(|_| all_complete).map(str::to_string),
        }
    }
}
