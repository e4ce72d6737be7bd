//! Session modes.

use serde::{Deserialize, Serialize};

/// Top-level mode of a level session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Placing, moving and removing pieces.
    #[default]
    Construction,
    /// Editing material properties of placed pieces.
    Configuration,
    /// Running the physics simulation against the level's goals.
    Simulation,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Construction => "construction",
            Self::Configuration => "configuration",
            Self::Simulation => "simulation",
        }
    }

    pub fn is_simulation(self) -> bool {
        self == Self::Simulation
    }
}

/// What a pointer press does in construction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InteractionMode {
    /// Press picks a body up and drags it.
    #[default]
    Manipulate,
    /// Press removes the body under the pointer.
    Remove,
}
