//! Core type definitions shared by every SceneMind component.
//!
//! Identifiers are stable strings so that persisted rows and prompt text can
//! refer to the same entity or question across reloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 1-based position of a scene in the document.
pub type SceneNumber = u32;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Stable identifier of a tracked entity, e.g. `CHARACTER_001`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    /// Build the identifier for the `seq`-th entity of `entity_type`.
    #[must_use]
    pub fn generate(entity_type: EntityType, seq: u32) -> Self {
        Self(format!("{}_{seq:03}", entity_type.tag()))
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a narrative question, e.g. `Q_007`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QuestionId(pub String);

impl QuestionId {
    /// Build the identifier for the `seq`-th question raised.
    #[must_use]
    pub fn generate(seq: u32) -> Self {
        Self(format!("Q_{seq:03}"))
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number encoded in the id, if it follows the `Q_nnn` shape.
    #[must_use]
    pub fn sequence(&self) -> Option<u32> {
        self.0.strip_prefix("Q_").and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a reviewer (one persona bound to one provider).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReviewerId(pub String);

impl ReviewerId {
    /// Create a reviewer id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of one document review session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

/// Kind of tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person or speaking role.
    Character,
    /// A prop or significant item.
    Object,
    /// A place from a scene heading.
    Location,
}

impl EntityType {
    /// Upper-case tag used in generated ids.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Character => "CHARACTER",
            Self::Object => "OBJECT",
            Self::Location => "LOCATION",
        }
    }
}

/// How much a key moment matters to an entity's arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    /// Incidental.
    Low,
    /// Worth noting.
    Medium,
    /// Shapes the arc.
    High,
    /// Turning point.
    Critical,
}

/// Fixed dramatic weight of a question, chosen when it is raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeWeight {
    /// Minor curiosity.
    Low,
    /// Default weight.
    #[default]
    Medium,
    /// A thread the story is clearly pulling on.
    High,
    /// The central mystery.
    Critical,
}

impl NarrativeWeight {
    /// Scoring factor before the 0.30 weighting.
    #[must_use]
    pub fn factor(self) -> f32 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.75,
            Self::Medium => 0.5,
            Self::Low => 0.25,
        }
    }

    /// Lenient parse used for reviewer output (`"critical"`, `"High"` …).
    #[must_use]
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Lifecycle status of a question. Only `Open` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Still unresolved.
    Open,
    /// Resolved by the story.
    Answered,
    /// Dropped, either by a reviewer or by auto-pruning.
    Irrelevant,
}

impl QuestionStatus {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Answered => "answered",
            Self::Irrelevant => "irrelevant",
        })
    }
}

/// Dramatic role inferred for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeFunction {
    /// The most important character so far.
    Protagonist,
    /// A late, high-impact arrival.
    AntagonistPotential,
    /// Connected to several other characters.
    Supporting,
}

impl fmt::Display for NarrativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Protagonist => "protagonist",
            Self::AntagonistPotential => "antagonist_potential",
            Self::Supporting => "supporting",
        })
    }
}

// ---------------------------------------------------------------------------
// Importance banding
// ---------------------------------------------------------------------------

/// Scores strictly above this are in the high band.
pub const HIGH_IMPORTANCE_THRESHOLD: f32 = 0.7;
/// Scores at or above this (and not high) are in the medium band.
pub const MEDIUM_IMPORTANCE_THRESHOLD: f32 = 0.4;

/// Coarse importance band shared by entities and questions.
///
/// High-band entities are never dropped from an assembled reviewer context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceBand {
    /// `< 0.4`
    Low,
    /// `[0.4, 0.7]`
    Medium,
    /// `> 0.7`
    High,
}

impl ImportanceBand {
    /// Classify a 0–1 score.
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score > HIGH_IMPORTANCE_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_IMPORTANCE_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0.
#[must_use]
pub(crate) fn unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Recency test shared by entity and question scoring: `current − last < 3`.
#[must_use]
pub(crate) fn is_recent(current: SceneNumber, last: SceneNumber) -> bool {
    i64::from(current) - i64::from(last) < 3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_are_zero_padded_per_type() {
        assert_eq!(EntityId::generate(EntityType::Character, 1).as_str(), "CHARACTER_001");
        assert_eq!(EntityId::generate(EntityType::Location, 42).as_str(), "LOCATION_042");
        assert_eq!(EntityId::generate(EntityType::Object, 1234).as_str(), "OBJECT_1234");
    }

    #[test]
    fn question_id_sequence_round_trips() {
        let id = QuestionId::generate(7);
        assert_eq!(id.as_str(), "Q_007");
        assert_eq!(id.sequence(), Some(7));
        assert_eq!(QuestionId("custom".into()).sequence(), None);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(ImportanceBand::from_score(0.71), ImportanceBand::High);
        assert_eq!(ImportanceBand::from_score(0.7), ImportanceBand::Medium);
        assert_eq!(ImportanceBand::from_score(0.4), ImportanceBand::Medium);
        assert_eq!(ImportanceBand::from_score(0.399), ImportanceBand::Low);
    }

    #[test]
    fn weight_parse_is_lenient() {
        assert_eq!(NarrativeWeight::parse_lenient(" Critical "), Some(NarrativeWeight::Critical));
        assert_eq!(NarrativeWeight::parse_lenient("huge"), None);
    }

    #[test]
    fn unit_handles_nan_and_range() {
        assert_eq!(unit(f32::NAN), 0.0);
        assert_eq!(unit(1.5), 1.0);
        assert_eq!(unit(-0.5), 0.0);
    }

    #[test]
    fn recency_tolerates_future_appearance() {
        assert!(is_recent(8, 7));
        assert!(!is_recent(8, 5));
        assert!(is_recent(3, 5));
    }
}
