//! Review-layer error types.

use scenemind_core::error::SceneMindError;
use scenemind_llm::LlmError;
use thiserror::Error;

/// Errors raised while loading personas, parsing replies or driving a review.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// A store or session operation failed.
    #[error(transparent)]
    Core(#[from] SceneMindError),

    /// The chat provider failed.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Persona file could not be read or is invalid.
    #[error("Persona error: {0}")]
    Persona(String),

    /// A requested persona id is not in the loaded set.
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// A reviewer reply carried no usable signal.
    #[error("Unusable reviewer feedback: {0}")]
    Feedback(String),

    /// A scene has no recorded reading for this reviewer.
    #[error("No reading recorded for scene {0}")]
    NoReading(u32),

    /// Logging could not be initialized.
    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

/// Convenience alias for review-layer results.
pub type Result<T> = std::result::Result<T, ReviewError>;
