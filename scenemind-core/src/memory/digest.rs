//! Compressed stand-in for a scene that has left the recent window.

use serde::{Deserialize, Serialize};

use crate::affect::{AffectRecord, ReviewerAffect};
use crate::compressor::PlotBeat;
use crate::types::{ImportanceBand, QuestionId, ReviewerId, SceneNumber};

/// A historical scene: plot compressed, affect kept whole.
///
/// `emotional_states_by_reviewer` is exempt from every size bound and is
/// never rewritten after the compressor copies it in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDigest {
    /// Id of the scene this digest replaces.
    pub scene_id: String,
    /// Its position in the document.
    pub scene_number: SceneNumber,
    /// Bounded plot summary.
    pub summary: String,
    /// Location from the heading, if parsed.
    #[serde(default)]
    pub location: Option<String>,
    /// Characters present in the scene.
    pub characters_present: Vec<String>,
    /// Up to a handful of capitalised props/places.
    #[serde(default)]
    pub key_objects: Vec<String>,
    /// Keyword-detected beats.
    #[serde(default)]
    pub plot_beats: Vec<PlotBeat>,
    /// Scene importance in `[0, 1]`.
    pub importance_score: f32,
    /// Word count of the source scene.
    #[serde(default)]
    pub word_count: u32,
    /// Full affect per reviewer, verbatim.
    #[serde(default)]
    pub emotional_states_by_reviewer: ReviewerAffect,
    /// Questions raised while reading this scene.
    #[serde(default)]
    pub questions_raised: Vec<QuestionId>,
    /// Questions answered in this scene.
    #[serde(default)]
    pub questions_answered: Vec<QuestionId>,
}

impl SceneDigest {
    /// Whether `reviewer` left an affect reading on this scene.
    #[must_use]
    pub fn has_reviewer(&self, reviewer: &ReviewerId) -> bool {
        self.emotional_states_by_reviewer.contains_key(reviewer)
    }

    /// The reviewer's reading, if any.
    #[must_use]
    pub fn affect_for(&self, reviewer: &ReviewerId) -> Option<&AffectRecord> {
        self.emotional_states_by_reviewer.get(reviewer)
    }

    /// Band of the scene importance.
    #[must_use]
    pub fn band(&self) -> ImportanceBand {
        ImportanceBand::from_score(self.importance_score)
    }

    /// `Scene 3 (KITCHEN): …` single-line rendering.
    #[must_use]
    pub fn one_line(&self) -> String {
        match &self.location {
            Some(location) => format!("Scene {} ({location}): {}", self.scene_number, self.summary),
            None => format!("Scene {}: {}", self.scene_number, self.summary),
        }
    }
}
