//! # SceneMind Core Library
//!
//! Narrative context memory for reviewers who read a screenplay one scene at
//! a time. A [`NarrativeSession`] owns everything one document needs:
//!
//! - **Entities**: characters, objects and locations scored by narrative importance
//! - **Questions**: open threads with a strict open → answered/irrelevant lifecycle
//! - **Memory**: a fixed window of full scenes, with older scenes kept as digests
//! - **Affect**: per-reviewer emotional state, preserved verbatim inside digests
//! - **Context**: bounded per-reviewer briefs assembled from the above
//!
//! Nothing in this crate is async or talks to a model. The default
//! [`HeuristicSummarizer`] is deterministic, and model-backed summaries plug in
//! through [`SceneSummarizer`].
//!
//! ## Scene cycle
//!
//! ```text
//! observe_scene(n) → context_for(reviewer)* → apply_update(..)* → commit_scene()
//! ```
//!
//! Committing scene `n` when the window is full compresses the oldest scene
//! into a [`SceneDigest`] before scene `n` is admitted.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod affect;
pub mod compressor;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod persistence;
pub mod question;
pub mod scene;
pub mod screenplay;
pub mod session;
pub mod types;

pub use affect::{AffectRecord, Emotions, ReviewerAffect};
pub use compressor::{HeuristicSummarizer, PlotBeat, SceneCompressor, SceneSummarizer};
pub use config::SceneMindConfig;
pub use context::{ContextAssembler, ReviewerContext};
pub use entity::{Entity, EntityStore};
pub use error::{Result, SceneMindError};
pub use memory::{MemoryManager, SceneDigest};
pub use persistence::SessionStore;
pub use question::{Question, QuestionDraft, QuestionStore};
pub use scene::SceneRecord;
pub use screenplay::{parse_fountain, Screenplay};
pub use session::{NarrativeSession, ReviewerUpdate, SessionSnapshot};
pub use types::*;
