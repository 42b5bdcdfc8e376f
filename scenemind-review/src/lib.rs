//! # scenemind-review: persona reviewers over a narrative session
//!
//! Reads a screenplay scene by scene with a panel of reviewer personas:
//!   - [`persona`]: reviewer profiles loaded from TOML
//!   - [`prompt`]: renders each reviewer's bounded context into a request
//!   - [`feedback`]: turns raw replies into store updates
//!   - [`engine`]: concurrent fan-out per scene, ordered apply, commit
//!   - [`reviewer`]: running per-reviewer state and summaries
//!
//! The memory itself lives in `scenemind-core`; model calls go through
//! `scenemind-llm`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod error;
pub mod feedback;
pub mod persona;
pub mod prompt;
pub mod reviewer;
pub mod telemetry;

pub use engine::{DocumentReport, ReviewEngine, SceneOutcome};
pub use error::{Result, ReviewError};
pub use feedback::{parse_reply, ParsedFeedback};
pub use persona::{PersonaSet, ReviewerProfile};
pub use reviewer::{ReviewerState, ReviewerSummary};
