//! Scene → digest compression.
//!
//! The plot side of a digest (summary, key objects, plot beats) comes from a
//! [`SceneSummarizer`]. [`HeuristicSummarizer`] is the built-in keyword and
//! snippet implementation; a model-backed summarizer can replace it without
//! touching the rest of the pipeline.
//!
//! Scoring and affect passthrough belong to [`SceneCompressor`] itself:
//!
//! ```text
//! importance = min(|present| / 5, 1)      × 0.3
//!            + min(dialogue / 10, 1)      × 0.3
//!            + min(words / 200, 1)        × 0.2
//!            + min(high_entities / 2, 1)  × 0.2
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::affect::ReviewerAffect;
use crate::config::CompressorConfig;
use crate::entity::EntityStore;
use crate::memory::SceneDigest;
use crate::scene::SceneRecord;
use crate::types::{ImportanceBand, QuestionId};

// ---------------------------------------------------------------------------
// Plot beats
// ---------------------------------------------------------------------------

/// Keyword-detected narrative beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotBeat {
    /// Something hidden comes out.
    Revelation,
    /// Characters clash.
    Conflict,
    /// Someone commits to a course.
    Decision,
    /// Visible emotion.
    Emotional,
    /// Physical action.
    Action,
    /// Plans and preparation.
    Setup,
    /// Something unexplained.
    Mystery,
}

impl PlotBeat {
    /// Every beat, in tagging order.
    pub const ALL: [Self; 7] = [
        Self::Revelation,
        Self::Conflict,
        Self::Decision,
        Self::Emotional,
        Self::Action,
        Self::Setup,
        Self::Mystery,
    ];

    /// Lowercase keywords that trigger this beat.
    #[must_use]
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Revelation => &["reveal", "discover", "realize", "truth", "secret"],
            Self::Conflict => &["argue", "fight", "confront", "challenge", "accuse"],
            Self::Decision => &["decide", "choose", "must", "will"],
            Self::Emotional => &["cry", "laugh", "smile", "tears", "angry", "sad"],
            Self::Action => &["run", "chase", "escape", "attack", "defend"],
            Self::Setup => &["plan", "prepare", "ready", "scheme"],
            Self::Mystery => &["question", "wonder", "suspicious", "strange", "weird"],
        }
    }
}

impl fmt::Display for PlotBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Revelation => "revelation",
            Self::Conflict => "conflict",
            Self::Decision => "decision",
            Self::Emotional => "emotional",
            Self::Action => "action",
            Self::Setup => "setup",
            Self::Mystery => "mystery",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Summarizer seam
// ---------------------------------------------------------------------------

/// Plot fields of a digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestFields {
    /// Bounded summary text.
    pub summary: String,
    /// Key objects, in order of first appearance.
    pub key_objects: Vec<String>,
    /// Beats, in [`PlotBeat::ALL`] order.
    pub plot_beats: Vec<PlotBeat>,
}

/// Produces the plot side of a digest.
pub trait SceneSummarizer: Send + Sync {
    /// Summarize one scene.
    fn summarize(&self, scene: &SceneRecord) -> DigestFields;
}

static CAPS_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,}(?:[ \t]+[A-Z]{2,})*)\b").expect("valid regex"));

/// Heading vocabulary and cue extensions never reported as objects.
const NOT_OBJECTS: &[&str] = &[
    "INT", "EXT", "DAY", "NIGHT", "CONTINUOUS", "LATER", "MORNING", "EVENING", "CONT", "CUT", "TO",
    "FADE", "IN", "OUT", "V.O.", "O.S.", "CONT'D",
];

/// Snippet-and-keyword summarizer.
#[derive(Debug, Clone, Default)]
pub struct HeuristicSummarizer {
    config: CompressorConfig,
}

impl HeuristicSummarizer {
    /// Create a summarizer with the given limits.
    #[must_use]
    pub fn new(config: CompressorConfig) -> Self {
        Self { config }
    }

    /// Location, participants, dialogue and action snippets, size-bounded.
    #[must_use]
    pub fn summary(&self, scene: &SceneRecord) -> String {
        let cfg = &self.config;
        let mut parts = vec![format!("{}.", scene.location_or_heading())];

        if !scene.characters_present.is_empty() {
            let shown = cfg.max_listed_participants.max(1);
            let mut names = scene.characters_present.iter().take(shown).cloned().collect::<Vec<_>>().join(", ");
            let rest = scene.characters_present.len().saturating_sub(shown);
            if rest > 0 {
                names.push_str(&format!(" and {rest} others"));
            }
            parts.push(format!("{names} present."));
        }

        let dialogue: Vec<&str> = scene.dialogue_lines().collect();
        match dialogue.as_slice() {
            [] => {}
            [only] => parts.push(format!("\"{}...\"", prefix(only, cfg.dialogue_snippet_chars * 2))),
            [first, .., last] => parts.push(format!(
                "Dialogue: \"{}...\" to \"{}...\"",
                prefix(first, cfg.dialogue_snippet_chars),
                prefix(last, cfg.dialogue_snippet_chars)
            )),
        }

        if let Some(action) = scene.first_action() {
            parts.push(format!("Action: {}...", prefix(action, cfg.action_snippet_chars)));
        }

        bound_summary(parts.join(" "), scene.char_len(), cfg.trigger_ratio, cfg.target_ratio)
    }

    /// First unique all-caps runs that are not characters or heading words.
    #[must_use]
    pub fn key_objects(&self, scene: &SceneRecord) -> Vec<String> {
        let mut objects: Vec<String> = Vec::new();
        for m in CAPS_RUN.find_iter(&scene.full_text) {
            if objects.len() >= self.config.max_key_objects {
                break;
            }
            let word = m.as_str();
            let is_character = scene.characters_present.iter().any(|c| c == word)
                || scene.characters_speaking.iter().any(|c| c == word);
            if is_character || NOT_OBJECTS.contains(&word) || objects.iter().any(|o| o == word) {
                continue;
            }
            objects.push(word.to_string());
        }
        objects
    }

    /// Beats whose keyword table matches the lowercased scene text.
    #[must_use]
    pub fn plot_beats(scene: &SceneRecord) -> Vec<PlotBeat> {
        let text = scene.full_text.to_lowercase();
        PlotBeat::ALL
            .into_iter()
            .filter(|beat| beat.keywords().iter().any(|k| text.contains(k)))
            .collect()
    }
}

impl SceneSummarizer for HeuristicSummarizer {
    fn summarize(&self, scene: &SceneRecord) -> DigestFields {
        DigestFields {
            summary: self.summary(scene),
            key_objects: self.key_objects(scene),
            plot_beats: Self::plot_beats(scene),
        }
    }
}

/// First `max_chars` characters of `text`.
fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Hard-truncate to `target` × source length once `trigger` × source is exceeded.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bound_summary(summary: String, source_chars: usize, trigger: f32, target: f32) -> String {
    let len = summary.chars().count();
    if (len as f32) <= source_chars as f32 * trigger {
        return summary;
    }
    let keep = (source_chars as f32 * target) as usize;
    format!("{}...", prefix(&summary, keep))
}

// ---------------------------------------------------------------------------
// Compressor
// ---------------------------------------------------------------------------

/// Turns a full scene plus its reviewer affect into a [`SceneDigest`].
pub struct SceneCompressor {
    summarizer: Box<dyn SceneSummarizer>,
}

impl fmt::Debug for SceneCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneCompressor").finish_non_exhaustive()
    }
}

impl Default for SceneCompressor {
    fn default() -> Self {
        Self::heuristic(CompressorConfig::default())
    }
}

impl SceneCompressor {
    /// Compressor over any summarizer.
    #[must_use]
    pub fn new(summarizer: Box<dyn SceneSummarizer>) -> Self {
        Self { summarizer }
    }

    /// Compressor over the built-in [`HeuristicSummarizer`].
    #[must_use]
    pub fn heuristic(config: CompressorConfig) -> Self {
        Self::new(Box::new(HeuristicSummarizer::new(config)))
    }

    /// Compress one scene. Pure: nothing passed in is modified, and
    /// `emotional_states` lands in the digest unchanged.
    #[must_use]
    pub fn compress(
        &self,
        scene: &SceneRecord,
        emotional_states: ReviewerAffect,
        questions_raised: Vec<QuestionId>,
        questions_answered: Vec<QuestionId>,
        entities: Option<&EntityStore>,
    ) -> SceneDigest {
        let fields = self.summarizer.summarize(scene);
        let importance_score = scene_importance(scene, entities);
        debug!(
            scene = scene.scene_number,
            importance = importance_score,
            beats = fields.plot_beats.len(),
            reviewers = emotional_states.len(),
            "Compressed scene"
        );
        SceneDigest {
            scene_id: scene.scene_id.clone(),
            scene_number: scene.scene_number,
            summary: fields.summary,
            location: scene.location.clone(),
            characters_present: scene.characters_present.clone(),
            key_objects: fields.key_objects,
            plot_beats: fields.plot_beats,
            importance_score,
            word_count: scene.word_count,
            emotional_states_by_reviewer: emotional_states,
            questions_raised,
            questions_answered,
        }
    }

    /// Compress an already-aged run of scenes. `affect_by_scene` is keyed by
    /// scene id; scenes without an entry get an empty affect map.
    #[must_use]
    pub fn batch_compress(
        &self,
        scenes: &[SceneRecord],
        affect_by_scene: &BTreeMap<String, ReviewerAffect>,
        entities: Option<&EntityStore>,
    ) -> Vec<SceneDigest> {
        scenes
            .iter()
            .map(|scene| {
                let affect = affect_by_scene.get(&scene.scene_id).cloned().unwrap_or_default();
                self.compress(scene, affect, Vec::new(), Vec::new(), entities)
            })
            .collect()
    }
}

/// Structural importance of a scene in `[0, 1]`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn scene_importance(scene: &SceneRecord, entities: Option<&EntityStore>) -> f32 {
    let cast = (scene.characters_present.len() as f32 / 5.0).min(1.0) * 0.3;
    let dialogue = (scene.dialogue_count() as f32 / 10.0).min(1.0) * 0.3;
    let length = (scene.word_count as f32 / 200.0).min(1.0) * 0.2;
    let high = entities.map_or(0, |store| {
        scene
            .characters_present
            .iter()
            .filter_map(|name| store.find_by_name_or_alias(name))
            .filter(|e| e.band() == ImportanceBand::High)
            .count()
    });
    let high = (high as f32 / 2.0).min(1.0) * 0.2;
    (cast + dialogue + length + high).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::AffectRecord;
    use crate::types::ReviewerId;

    fn kitchen() -> SceneRecord {
        SceneRecord::new(4, "INT. KITCHEN - NIGHT")
            .with_action("MARIA drops the SILVER KEY into the sink and stares at the BLOODY KNIFE on the counter.")
            .with_dialogue("MARIA", &["You told me the house was empty. You swore it on your mother's grave."])
            .with_dialogue("JOHN", &["I didn't know. I promise you I had no idea anyone was still living here."])
    }

    #[test]
    fn beats_follow_keyword_table() {
        let scene = SceneRecord::new(1, "EXT. ROOF - DAY")
            .with_action("They run. A strange light follows.")
            .with_dialogue("ANA", &["I must reveal the secret."]);
        let beats = HeuristicSummarizer::plot_beats(&scene);
        assert_eq!(beats, vec![PlotBeat::Revelation, PlotBeat::Decision, PlotBeat::Action, PlotBeat::Mystery]);
    }

    #[test]
    fn key_objects_skip_characters_and_heading_words() {
        let objects = HeuristicSummarizer::default().key_objects(&kitchen());
        assert_eq!(objects, vec!["KITCHEN", "SILVER KEY", "BLOODY KNIFE"]);
    }

    #[test]
    fn key_objects_are_capped() {
        let scene = SceneRecord::new(1, "INT. ROOM - DAY").with_action("AA BB. CC. DD. EE. FF. GG. ROOM.");
        let config = CompressorConfig { max_key_objects: 3, ..CompressorConfig::default() };
        let objects = HeuristicSummarizer::new(config).key_objects(&scene);
        assert_eq!(objects, vec!["ROOM", "AA BB", "CC"]);
    }

    #[test]
    fn summary_lists_location_people_and_snippets() {
        let scene = kitchen()
            .with_action("Rain hammers the windows while the kettle screams on the stove. ".repeat(12));
        let summary = HeuristicSummarizer::default().summary(&scene);
        assert!(summary.starts_with("KITCHEN. MARIA, JOHN present."), "{summary}");
        assert!(summary.contains("Dialogue: \"You told me"));
        assert!(summary.contains("Action: MARIA drops"));
    }

    #[test]
    fn summary_is_bounded_against_short_scenes() {
        let scene = SceneRecord::new(1, "INT. A - DAY").with_dialogue("BOB", &["Hi."]);
        let summary = HeuristicSummarizer::default().summary(&scene);
        let limit = (scene.char_len() as f32 * 0.2) as usize + 3;
        assert!(summary.chars().count() <= limit, "{summary}");
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn participant_list_is_truncated() {
        let scene = SceneRecord::new(2, "INT. HALL - DAY")
            .with_present("A")
            .with_present("B")
            .with_present("C")
            .with_present("D")
            .with_present("E")
            .with_action("Everyone waits in silence for the verdict to be read aloud. ".repeat(10));
        let summary = HeuristicSummarizer::default().summary(&scene);
        assert!(summary.contains("A, B, C and 2 others present."), "{summary}");
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(prefix("héllo", 2), "hé");
        assert_eq!(prefix("hi", 10), "hi");
    }

    #[test]
    fn importance_formula() {
        let scene = kitchen();
        let expected = 2.0 / 5.0 * 0.3 + 2.0 / 10.0 * 0.3 + scene.word_count as f32 / 200.0 * 0.2;
        assert!((scene_importance(&scene, None) - expected).abs() < 1e-6);
    }

    #[test]
    fn high_importance_characters_raise_scene_score() {
        let scene = kitchen();
        let mut store = EntityStore::new();
        let maria = store.get_or_create_character("MARIA", 1).expect("maria").entity_id.clone();
        for s in 1..=4 {
            store.record_appearance(&maria, s, true, 10).expect("appear");
        }
        for s in 1..=3 {
            store.add_key_moment(&maria, s, "turn", crate::types::Significance::Critical).expect("moment");
        }
        store.get_or_create_character("JOHN", 4).expect("john");
        // MARIA: .25 + .16 + .1125 + .15 + .10 = .7725
        store.recompute_all(4);
        assert_eq!(store.find_by_name_or_alias("MARIA").expect("maria").band(), ImportanceBand::High);

        let base = scene_importance(&scene, None);
        let with_store = scene_importance(&scene, Some(&store));
        assert!((with_store - base - 0.1).abs() < 1e-6);
    }

    #[test]
    fn affect_is_passed_through_verbatim() {
        let mut affect = ReviewerAffect::new();
        affect.insert(ReviewerId::new("critic"), AffectRecord::new(4, 0.8, -0.2).with_reaction("Tense."));
        let before = serde_json::to_string(&affect).expect("json");

        let digest = SceneCompressor::default().compress(&kitchen(), affect, vec![QuestionId::generate(1)], Vec::new(), None);
        assert_eq!(serde_json::to_string(&digest.emotional_states_by_reviewer).expect("json"), before);
        assert_eq!(digest.scene_id, "SCENE_004");
        assert_eq!(digest.questions_raised, vec![QuestionId::generate(1)]);
    }

    struct Fixed;

    impl SceneSummarizer for Fixed {
        fn summarize(&self, _scene: &SceneRecord) -> DigestFields {
            DigestFields {
                summary: "fixed".into(),
                ..DigestFields::default()
            }
        }
    }

    #[test]
    fn summarizer_is_swappable() {
        let digest = SceneCompressor::new(Box::new(Fixed)).compress(&kitchen(), ReviewerAffect::new(), Vec::new(), Vec::new(), None);
        assert_eq!(digest.summary, "fixed");
        assert!(digest.importance_score > 0.0);
    }

    #[test]
    fn batch_compress_looks_up_affect_by_scene_id() {
        let scenes = vec![kitchen(), SceneRecord::new(5, "EXT. YARD - DAY").with_action("Quiet.")];
        let mut lookup = BTreeMap::new();
        let mut affect = ReviewerAffect::new();
        affect.insert(ReviewerId::new("fan"), AffectRecord::new(5, 0.2, 0.0));
        lookup.insert("SCENE_005".to_string(), affect);

        let digests = SceneCompressor::default().batch_compress(&scenes, &lookup, None);
        assert_eq!(digests.len(), 2);
        assert!(digests[0].emotional_states_by_reviewer.is_empty());
        assert_eq!(digests[1].emotional_states_by_reviewer.len(), 1);
    }
}
