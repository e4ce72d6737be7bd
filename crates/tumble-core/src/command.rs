//! Command queue between the host (input, UI) and the session.
//!
//! Hosts push commands at any time, from any thread. The session drains the
//! queue once at the start of each frame, so mode changes and edits always
//! land at a frame boundary and never interleave with physics or goal
//! evaluation.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::level::{LevelConfig, ObjectPatch};
use crate::mode::{InteractionMode, Mode};

/// Discrete key actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Cancel,
    ToggleRun,
    Undo,
    Redo,
}

/// Pointer and key input, in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown { position: [f32; 2] },
    PointerMove { position: [f32; 2] },
    PointerUp { position: [f32; 2] },
    /// Wheel notches; the sign gives the spin direction.
    Wheel { delta: f32 },
    Key(KeyAction),
}

/// Commands accepted by a `LevelSession`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Input(InputEvent),
    SetMode(Mode),
    ToggleSimulation,
    SetInteractionMode(InteractionMode),
    /// Arms placement of one piece from an inventory item.
    BeginPlacement { item_id: String },
    CancelPlacement,
    /// Selects an object for the property panel (configuration mode).
    SelectObject { id: Option<String> },
    EditObject { id: String, patch: ObjectPatch },
    RemoveObject { id: String },
    /// Manually confirms an expired time limit.
    TriggerCondition { id: String },
    RestartLevel,
    Undo,
    Redo,
    /// Fresh load of a level document.
    LoadLevel { config: Box<LevelConfig> },
    /// Frame boundary marker - commands after this are processed in the next frame.
    Yield,
}

/// Thread-safe command queue.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<SessionCommand>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a command to be processed.
    pub fn push(&self, command: SessionCommand) {
        self.inner.lock().push_back(command);
    }

    pub fn push_input(&self, event: InputEvent) {
        self.push(SessionCommand::Input(event));
    }

    /// Drain commands until Yield or empty.
    ///
    /// Yield itself is consumed but not returned; everything after it stays
    /// queued for the next frame.
    pub fn drain_until_yield(&self) -> Vec<SessionCommand> {
        let mut guard = self.inner.lock();
        let mut commands = Vec::new();

        while let Some(cmd) = guard.pop_front() {
            if matches!(cmd, SessionCommand::Yield) {
                tracing::debug!("[command] Yield - deferring remaining commands to next frame");
                break;
            }
            commands.push(cmd);
        }
        commands
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_until_yield() {
        let queue = CommandQueue::new();
        queue.push(SessionCommand::Undo);
        queue.push(SessionCommand::Yield);
        queue.push(SessionCommand::Redo);

        assert_eq!(queue.drain_until_yield(), vec![SessionCommand::Undo]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_until_yield(), vec![SessionCommand::Redo]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_the_queue() {
        let queue = CommandQueue::new();
        let sender = queue.clone();
        let handle = std::thread::spawn(move || {
            sender.push_input(InputEvent::Key(KeyAction::ToggleRun));
        });
        handle.join().unwrap();

        assert_eq!(
            queue.drain_until_yield(),
            vec![SessionCommand::Input(InputEvent::Key(KeyAction::ToggleRun))]
        );
    }

    #[test]
    fn test_clear() {
        let queue = CommandQueue::new();
        queue.push(SessionCommand::RestartLevel);
        queue.clear();
        assert!(queue.drain_until_yield().is_empty());
    }
}
