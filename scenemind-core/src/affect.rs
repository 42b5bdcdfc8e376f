//! Reviewer affect: the one payload the engine never compresses.
//!
//! An [`AffectRecord`] is a typed, per-reviewer, per-scene emotional reading.
//! Values are clamped once, at construction. After that the engine only ever
//! moves records around: the compressor copies them into digests verbatim and
//! persistence stores them as-is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{unit, ReviewerId, SceneNumber};

/// Affect readings for one scene, keyed by reviewer.
pub type ReviewerAffect = BTreeMap<ReviewerId, AffectRecord>;

/// One reviewer's emotional reaction to one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectRecord {
    /// Scene this reading belongs to.
    pub scene_number: SceneNumber,
    /// How engaged the reviewer is (0–1).
    pub engagement: f32,
    /// Enjoyment (−1 to 1).
    pub enjoyment: f32,
    /// Confusion (0–1).
    #[serde(default)]
    pub confusion: f32,
    /// Overall emotional intensity (0–1).
    #[serde(default)]
    pub emotional_intensity: f32,
    /// Excitement (0–1).
    #[serde(default)]
    pub excitement: f32,
    /// Suspense (0–1).
    #[serde(default)]
    pub suspense: f32,
    /// Humor (0–1).
    #[serde(default)]
    pub humor: f32,
    /// Sadness (0–1).
    #[serde(default)]
    pub sadness: f32,
    /// Anger (0–1).
    #[serde(default)]
    pub anger: f32,
    /// Hope (0–1).
    #[serde(default)]
    pub hope: f32,
    /// Fear (0–1).
    #[serde(default)]
    pub fear: f32,
    /// Free-text reaction.
    #[serde(default)]
    pub reaction: Option<String>,
    /// Question texts the reviewer raised in this scene.
    #[serde(default)]
    pub questions_raised: Vec<String>,
    /// Whether this reading was revised after later scenes.
    #[serde(default)]
    pub revised: bool,
    /// Why it was revised.
    #[serde(default)]
    pub revision_note: Option<String>,
}

impl AffectRecord {
    /// Create a reading with the two headline values; others start at zero.
    #[must_use]
    pub fn new(scene_number: SceneNumber, engagement: f32, enjoyment: f32) -> Self {
        Self {
            scene_number,
            engagement: unit(engagement),
            enjoyment: signed_unit(enjoyment),
            confusion: 0.0,
            emotional_intensity: 0.0,
            excitement: 0.0,
            suspense: 0.0,
            humor: 0.0,
            sadness: 0.0,
            anger: 0.0,
            hope: 0.0,
            fear: 0.0,
            reaction: None,
            questions_raised: Vec::new(),
            revised: false,
            revision_note: None,
        }
    }

    /// Attach the reviewer's free-text reaction.
    #[must_use]
    pub fn with_reaction(mut self, reaction: impl Into<String>) -> Self {
        self.reaction = Some(reaction.into());
        self
    }

    /// Set the secondary emotions, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_emotions(mut self, emotions: &Emotions) -> Self {
        self.confusion = unit(emotions.confusion);
        self.emotional_intensity = unit(emotions.emotional_intensity);
        self.excitement = unit(emotions.excitement);
        self.suspense = unit(emotions.suspense);
        self.humor = unit(emotions.humor);
        self.sadness = unit(emotions.sadness);
        self.anger = unit(emotions.anger);
        self.hope = unit(emotions.hope);
        self.fear = unit(emotions.fear);
        self
    }

    /// Apply a later revision in place, marking the record revised.
    pub fn revise(&mut self, revision: &AffectRevision, note: impl Into<String>) {
        if let Some(v) = revision.engagement {
            self.engagement = unit(v);
        }
        if let Some(v) = revision.enjoyment {
            self.enjoyment = signed_unit(v);
        }
        if let Some(v) = revision.confusion {
            self.confusion = unit(v);
        }
        if let Some(v) = revision.suspense {
            self.suspense = unit(v);
        }
        if let Some(reaction) = &revision.reaction {
            self.reaction = Some(reaction.clone());
        }
        self.revised = true;
        self.revision_note = Some(note.into());
    }
}

/// Secondary emotion values, all 0–1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emotions {
    /// Confusion.
    pub confusion: f32,
    /// Overall intensity.
    pub emotional_intensity: f32,
    /// Excitement.
    pub excitement: f32,
    /// Suspense.
    pub suspense: f32,
    /// Humor.
    pub humor: f32,
    /// Sadness.
    pub sadness: f32,
    /// Anger.
    pub anger: f32,
    /// Hope.
    pub hope: f32,
    /// Fear.
    pub fear: f32,
}

/// Partial update applied by [`AffectRecord::revise`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffectRevision {
    /// New engagement.
    pub engagement: Option<f32>,
    /// New enjoyment.
    pub enjoyment: Option<f32>,
    /// New confusion.
    pub confusion: Option<f32>,
    /// New suspense.
    pub suspense: Option<f32>,
    /// Replacement reaction text.
    pub reaction: Option<String>,
}

fn signed_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(-1.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_clamps_ranges() {
        let record = AffectRecord::new(1, 1.7, -3.0).with_emotions(&Emotions {
            fear: 2.0,
            hope: -1.0,
            ..Emotions::default()
        });
        assert!((record.engagement - 1.0).abs() < f32::EPSILON);
        assert!((record.enjoyment + 1.0).abs() < f32::EPSILON);
        assert!((record.fear - 1.0).abs() < f32::EPSILON);
        assert!(record.hope.abs() < f32::EPSILON);
    }

    #[test]
    fn revise_marks_record() {
        let mut record = AffectRecord::new(4, 0.5, 0.1);
        record.revise(
            &AffectRevision {
                enjoyment: Some(0.9),
                ..AffectRevision::default()
            },
            "the twist recontextualised this scene",
        );
        assert!(record.revised);
        assert!((record.enjoyment - 0.9).abs() < f32::EPSILON);
        assert!((record.engagement - 0.5).abs() < f32::EPSILON);
        assert_eq!(record.revision_note.as_deref(), Some("the twist recontextualised this scene"));
    }

    #[test]
    fn json_round_trip_is_exact() {
        let record = AffectRecord::new(2, 0.33, -0.25)
            .with_reaction("Unsettling.")
            .with_emotions(&Emotions { suspense: 0.8, ..Emotions::default() });
        let json = serde_json::to_string(&record).expect("serialize");
        let back: AffectRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
        assert_eq!(serde_json::to_string(&back).expect("serialize"), json);
    }
}
