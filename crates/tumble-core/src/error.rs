//! Error types for level documents, goal definitions, dragging and persistence.

use thiserror::Error;

/// Failure to build one objective or end-condition from its definition.
///
/// These never abort a level load: the goal builder logs the error and
/// continues with the remaining definitions.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("{kind} definition has no `type` tag")]
    MissingType { kind: &'static str },
    #[error("unknown {kind} type `{tag}`")]
    UnknownVariant { kind: &'static str, tag: String },
    #[error("invalid {kind} `{tag}` definition: {source}")]
    Invalid {
        kind: &'static str,
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} `{id}`: {reason}")]
    OutOfRange {
        kind: &'static str,
        id: String,
        reason: String,
    },
}

/// Errors raised while loading or editing a level document.
#[derive(Debug, Error)]
pub enum LevelError {
    #[error("level document parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("object `{0}` already exists")]
    DuplicateObject(String),
    #[error("object `{0}` not found")]
    UnknownObject(String),
    #[error("object `{0}` is fixed to the level")]
    FixedObject(String),
    #[error("inventory item `{0}` not found")]
    UnknownInventoryItem(String),
    #[error("inventory item `{0}` has no pieces left")]
    InventoryExhausted(String),
    #[error("operation not allowed in {0} mode")]
    WrongMode(&'static str),
}

/// Errors from the drag/placement constraint controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DragError {
    #[error("a drag session on `{0}` is already open")]
    SessionAlreadyOpen(String),
    #[error("body `{0}` not found")]
    UnknownBody(String),
    #[error("body `{0}` is static and cannot be dragged")]
    StaticBody(String),
}

/// Errors reported by a persistence collaborator.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage full: `{key}` needs {needed} bytes, {available} available")]
    Full {
        key: String,
        needed: usize,
        available: usize,
    },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
