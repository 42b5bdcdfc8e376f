//! Error types for the SceneMind core library.

use thiserror::Error;

use crate::types::{EntityId, QuestionId, QuestionStatus, SceneNumber};

/// Top-level error type for all SceneMind core operations.
#[derive(Error, Debug)]
pub enum SceneMindError {
    /// An entity with the given ID is not tracked.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A question with the given ID was never raised.
    #[error("Question not found: {0}")]
    QuestionNotFound(QuestionId),

    /// A question status change that is not `open → answered | irrelevant`.
    #[error("Illegal transition for {id}: cannot mark {attempted} while {from}")]
    IllegalTransition {
        /// The question being changed.
        id: QuestionId,
        /// Its current (terminal) status.
        from: QuestionStatus,
        /// The status the caller asked for.
        attempted: QuestionStatus,
    },

    /// An alias is already claimed by another entity.
    #[error("Alias '{alias}' already resolves to {owner}")]
    AliasConflict {
        /// The alias text.
        alias: String,
        /// The entity that already owns it.
        owner: EntityId,
    },

    /// A scene index outside the legal range for this operation.
    #[error("Invalid scene {scene}: {reason}")]
    InvalidScene {
        /// The rejected scene number.
        scene: SceneNumber,
        /// What made it invalid.
        reason: String,
    },

    /// Scenes must arrive in strictly increasing order.
    #[error("Scene {got} arrived out of order (last processed: {last})")]
    OutOfOrder {
        /// The most recently processed scene.
        last: SceneNumber,
        /// The scene that was offered.
        got: SceneNumber,
    },

    /// The window is full and the evicted scene was not compressed.
    #[error("Window full: a digest for {scene_id} is required before admitting another scene")]
    MissingDigest {
        /// The scene that must be compressed first.
        scene_id: String,
    },

    /// The supplied digest belongs to a different scene than the one evicted.
    #[error("Digest mismatch: expected {expected}, got {got}")]
    DigestMismatch {
        /// Scene id of the oldest recent scene.
        expected: String,
        /// Scene id carried by the supplied digest.
        got: String,
    },

    /// A digest was supplied while the window still had room.
    #[error("Unexpected digest for {scene_id}: window is not full")]
    UnexpectedDigest {
        /// Scene id carried by the supplied digest.
        scene_id: String,
    },

    /// The session was driven out of its observe → apply → commit order.
    #[error("Session phase error: {0}")]
    SessionPhase(String),

    /// Blank names, empty question text, malformed reviewer ids and the like.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SceneMindError>;
