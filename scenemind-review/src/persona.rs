//! Reviewer personas.
//!
//! A persona decides what a reviewer cares about and how they speak. Sets
//! are loaded from TOML, one `[[persona]]` table each:
//!
//! ```toml
//! [[persona]]
//! id = "indie_critic"
//! name = "Morgan"
//! reviewer_type = "indie critic"
//! system_prompt = "You are Morgan, ..."
//!
//! [persona.weights]
//! character_importance = 0.9
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use scenemind_core::types::ReviewerId;

use crate::error::{ReviewError, Result};

/// The persona set shipped with the crate. Loaded only through
/// [`PersonaSet::bundled`].
const BUNDLED: &str = include_str!("../personas/default.toml");

/// How much a reviewer weighs each aspect of a script, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectWeights {
    /// Story and structure.
    #[serde(default = "default_half")]
    pub plot_importance: f32,
    /// Depth and arcs of characters.
    #[serde(default = "default_half")]
    pub character_importance: f32,
    /// Quality of lines.
    #[serde(default = "default_half")]
    pub dialogue_importance: f32,
    /// Set pieces and movement.
    #[serde(default = "default_half")]
    pub action_importance: f32,
    /// Rhythm of scenes.
    #[serde(default = "default_half")]
    pub pacing_importance: f32,
    /// Freshness.
    #[serde(default = "default_half")]
    pub originality_importance: f32,
    /// How much the script makes them feel.
    #[serde(default = "default_half")]
    pub emotional_impact_importance: f32,
    /// Whether it would sell.
    #[serde(default = "default_half")]
    pub commercial_viability_importance: f32,
}

impl Default for AspectWeights {
    fn default() -> Self {
        Self {
            plot_importance: 0.5,
            character_importance: 0.5,
            dialogue_importance: 0.5,
            action_importance: 0.5,
            pacing_importance: 0.5,
            originality_importance: 0.5,
            emotional_impact_importance: 0.5,
            commercial_viability_importance: 0.5,
        }
    }
}

impl AspectWeights {
    fn named(&self) -> [(&'static str, f32); 8] {
        [
            ("plot", self.plot_importance),
            ("character", self.character_importance),
            ("dialogue", self.dialogue_importance),
            ("action", self.action_importance),
            ("pacing", self.pacing_importance),
            ("originality", self.originality_importance),
            ("emotional impact", self.emotional_impact_importance),
            ("commercial viability", self.commercial_viability_importance),
        ]
    }

    /// The `n` most heavily weighted aspects, strongest first. Ties keep
    /// declaration order.
    #[must_use]
    pub fn top(&self, n: usize) -> Vec<&'static str> {
        let mut named = self.named().to_vec();
        named.sort_by(|a, b| b.1.total_cmp(&a.1));
        named.into_iter().take(n).map(|(name, _)| name).collect()
    }
}

/// Temperament of a reviewer, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traits {
    /// Tolerance for slow scenes.
    #[serde(default = "default_half")]
    pub patience: f32,
    /// Notices small things.
    #[serde(default = "default_half")]
    pub attention_to_detail: f32,
    /// Harshness.
    #[serde(default = "default_half")]
    pub cynicism: f32,
    /// Gets emotionally involved.
    #[serde(default = "default_half")]
    pub emotional_investment: f32,
}

impl Default for Traits {
    fn default() -> Self {
        Self {
            patience: 0.5,
            attention_to_detail: 0.5,
            cynicism: 0.5,
            emotional_investment: 0.5,
        }
    }
}

/// One reviewer persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    /// Stable id, used as the [`ReviewerId`].
    pub id: String,
    /// Display name.
    pub name: String,
    /// Kind of reader, e.g. "casual viewer".
    pub reviewer_type: String,
    /// Aspect weights.
    #[serde(default)]
    pub weights: AspectWeights,
    /// Temperament.
    #[serde(default)]
    pub traits: Traits,
    /// Genre affinity, keyed by genre name.
    #[serde(default)]
    pub genre_preferences: BTreeMap<String, f32>,
    /// Persona text placed at the top of the system prompt.
    pub system_prompt: String,
    /// Register of the feedback ("casual", "professional", ...).
    #[serde(default = "default_feedback_style")]
    pub feedback_style: String,
    /// One-line description for listings.
    #[serde(default)]
    pub description: String,
    /// Named entry of `[providers]` to use instead of `[llm]`.
    #[serde(default)]
    pub provider: Option<String>,
}

impl ReviewerProfile {
    /// The id the stores know this reviewer by.
    #[must_use]
    pub fn reviewer_id(&self) -> ReviewerId {
        ReviewerId::new(self.id.clone())
    }

    /// Top three aspects as prompt text, e.g. `"plot, pacing, action"`.
    #[must_use]
    pub fn priorities(&self) -> String {
        self.weights.top(3).join(", ")
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ReviewError::Persona("persona id must be non-empty".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(ReviewError::Persona(format!("{}: system_prompt must be non-empty", self.id)));
        }
        let traits = [
            ("patience", self.traits.patience),
            ("attention_to_detail", self.traits.attention_to_detail),
            ("cynicism", self.traits.cynicism),
            ("emotional_investment", self.traits.emotional_investment),
        ];
        for (name, value) in self.weights.named().into_iter().chain(traits) {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReviewError::Persona(format!("{}: {name} must be in [0, 1], got {value}", self.id)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PersonaFile {
    #[serde(default)]
    persona: Vec<ReviewerProfile>,
}

/// An ordered, validated collection of personas.
#[derive(Debug, Clone, Default)]
pub struct PersonaSet {
    personas: Vec<ReviewerProfile>,
}

impl PersonaSet {
    /// Parse a persona TOML document.
    ///
    /// # Errors
    /// [`ReviewError::Persona`] on malformed TOML, duplicate ids or
    /// out-of-range weights.
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: PersonaFile =
            toml::from_str(content).map_err(|e| ReviewError::Persona(format!("persona TOML: {e}")))?;
        let mut seen = HashSet::new();
        for persona in &file.persona {
            persona.validate()?;
            if !seen.insert(persona.id.as_str()) {
                return Err(ReviewError::Persona(format!("duplicate persona id {}", persona.id)));
            }
        }
        Ok(Self { personas: file.persona })
    }

    /// Load a persona TOML file.
    ///
    /// # Errors
    /// [`ReviewError::Persona`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ReviewError::Persona(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// The persona set shipped with the crate.
    ///
    /// # Errors
    /// Only if the bundled file is invalid.
    pub fn bundled() -> Result<Self> {
        Self::from_toml(BUNDLED)
    }

    /// Look up a persona by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ReviewerProfile> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Personas for `ids`, in that order. An empty list selects every persona.
    ///
    /// # Errors
    /// [`ReviewError::UnknownPersona`] for the first id not in the set.
    pub fn select(&self, ids: &[String]) -> Result<Vec<ReviewerProfile>> {
        if ids.is_empty() {
            return Ok(self.personas.clone());
        }
        ids.iter()
            .map(|id| self.get(id).cloned().ok_or_else(|| ReviewError::UnknownPersona(id.clone())))
            .collect()
    }

    /// All personas in file order.
    pub fn iter(&self) -> impl Iterator<Item = &ReviewerProfile> {
        self.personas.iter()
    }

    /// Number of personas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

fn default_half() -> f32 { 0.5 }
fn default_feedback_style() -> String { "conversational".to_string() }
