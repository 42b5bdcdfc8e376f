//! Bounded per-reviewer context for the next model call.
//!
//! [`ContextAssembler::assemble`] reads the three stores and produces an
//! owned [`ReviewerContext`] whose size depends only on the `[context]`
//! limits, never on how long the document is. High-band entities are the
//! one exception to the entity limit: they are always included.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::affect::{AffectRecord, ReviewerAffect};
use crate::compressor::PlotBeat;
use crate::config::ContextConfig;
use crate::entity::{Entity, EntityStore};
use crate::memory::{MemoryManager, SceneDigest};
use crate::question::{Question, QuestionStore};
use crate::scene::SceneRecord;
use crate::types::{
    EntityId, EntityType, ImportanceBand, NarrativeFunction, NarrativeWeight, QuestionId, ReviewerId,
    SceneNumber,
};

/// Read-only view of everything the assembler draws from.
#[derive(Debug, Clone, Copy)]
pub struct ContextSources<'a> {
    /// Entity store.
    pub entities: &'a EntityStore,
    /// Question store.
    pub questions: &'a QuestionStore,
    /// Scene window and digests.
    pub memory: &'a MemoryManager,
    /// Affect recorded on scenes still in the recent window.
    pub pending_affect: &'a BTreeMap<SceneNumber, ReviewerAffect>,
}

/// Historical scene as shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestBrief {
    /// Scene number.
    pub scene_number: SceneNumber,
    /// Location, if known.
    pub location: Option<String>,
    /// Compressed summary.
    pub summary: String,
    /// Detected beats.
    pub plot_beats: Vec<PlotBeat>,
}

impl From<&SceneDigest> for DigestBrief {
    fn from(d: &SceneDigest) -> Self {
        Self {
            scene_number: d.scene_number,
            location: d.location.clone(),
            summary: d.summary.clone(),
            plot_beats: d.plot_beats.clone(),
        }
    }
}

/// Entity as shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityBrief {
    /// Entity id.
    pub entity_id: EntityId,
    /// Canonical name.
    pub name: String,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Last computed importance.
    pub importance_score: f32,
    /// Band of that score.
    pub band: ImportanceBand,
    /// Number of scenes appeared in.
    pub appearances: usize,
    /// First scene seen.
    pub first_appearance: SceneNumber,
    /// Last scene seen.
    pub last_appearance: SceneNumber,
    /// Dialogue lines.
    pub speaking_lines: u32,
    /// Inferred role.
    pub narrative_function: Option<NarrativeFunction>,
}

impl From<&Entity> for EntityBrief {
    fn from(e: &Entity) -> Self {
        Self {
            entity_id: e.entity_id.clone(),
            name: e.name.clone(),
            entity_type: e.entity_type,
            importance_score: e.importance_score,
            band: e.band(),
            appearances: e.appearances.len(),
            first_appearance: e.first_appearance,
            last_appearance: e.last_appearance,
            speaking_lines: e.speaking_lines,
            narrative_function: e.narrative_function,
        }
    }
}

/// Open question as shown to a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionBrief {
    /// Question id, for referencing or answering.
    pub question_id: QuestionId,
    /// Question text.
    pub text: String,
    /// Scene it was raised in.
    pub raised_in_scene: SceneNumber,
    /// Who raised it.
    pub raised_by: ReviewerId,
    /// Last computed importance.
    pub importance_score: f32,
    /// Dramatic weight.
    pub narrative_weight: NarrativeWeight,
    /// The raiser's guess, if any.
    pub speculation: Option<String>,
}

impl From<&Question> for QuestionBrief {
    fn from(q: &Question) -> Self {
        Self {
            question_id: q.question_id.clone(),
            text: q.text.clone(),
            raised_in_scene: q.raised_in_scene,
            raised_by: q.raised_by.clone(),
            importance_score: q.importance_score,
            narrative_weight: q.narrative_weight,
            speculation: q.speculation.clone(),
        }
    }
}

/// The bounded payload handed to prompt building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerContext {
    /// Reviewer this context was built for.
    pub reviewer: ReviewerId,
    /// Scene being reviewed.
    pub current_scene: SceneNumber,
    /// Most recent scenes in full, oldest first. Excludes the current scene.
    pub recent_scenes: Vec<SceneRecord>,
    /// Most recent digests, oldest first.
    pub digests: Vec<DigestBrief>,
    /// Key entities, most important first.
    pub entities: Vec<EntityBrief>,
    /// Top open questions.
    pub questions: Vec<QuestionBrief>,
    /// The reviewer's own recent readings, in scene order.
    pub affect: Vec<AffectRecord>,
}

/// Builds [`ReviewerContext`]s under fixed limits.
#[derive(Debug, Clone, Default)]
pub struct ContextAssembler {
    limits: ContextConfig,
}

impl ContextAssembler {
    /// Assembler with the given limits.
    #[must_use]
    pub fn new(limits: ContextConfig) -> Self {
        Self { limits }
    }

    /// Limits in use.
    #[must_use]
    pub fn limits(&self) -> &ContextConfig {
        &self.limits
    }

    /// Context for `reviewer` at `current_scene`. Recent scenes at or after
    /// `current_scene` are left out; the caller renders the current scene
    /// itself.
    #[must_use]
    pub fn assemble(&self, sources: ContextSources<'_>, reviewer: &ReviewerId, current_scene: SceneNumber) -> ReviewerContext {
        let limits = &self.limits;

        let earlier: Vec<&SceneRecord> = sources
            .memory
            .get_recent_scenes()
            .filter(|s| s.scene_number < current_scene)
            .collect();
        let recent_scenes = tail(&earlier, limits.max_recent_scenes).iter().map(|s| (*s).clone()).collect();

        let digests = tail(sources.memory.get_historical_digests(), limits.max_digests)
            .iter()
            .map(DigestBrief::from)
            .collect();

        let questions = sources
            .questions
            .active_context(limits.max_questions)
            .into_iter()
            .map(QuestionBrief::from)
            .collect();

        ReviewerContext {
            reviewer: reviewer.clone(),
            current_scene,
            recent_scenes,
            digests,
            entities: self.key_entities(sources.entities),
            questions,
            affect: self.affect_trajectory(sources, reviewer),
        }
    }

    /// Every high-band entity, then the best of the rest up to `max_entities`.
    #[must_use]
    pub fn key_entities(&self, store: &EntityStore) -> Vec<EntityBrief> {
        let high = store.get_high_importance_entities();
        let room = self.limits.max_entities.saturating_sub(high.len());
        let taken: HashSet<&EntityId> = high.iter().map(|e| &e.entity_id).collect();
        let rest: Vec<&Entity> = store
            .top_entities(store.len())
            .into_iter()
            .filter(|e| !taken.contains(&e.entity_id))
            .take(room)
            .collect();
        high.into_iter().chain(rest).map(EntityBrief::from).collect()
    }

    fn affect_trajectory(&self, sources: ContextSources<'_>, reviewer: &ReviewerId) -> Vec<AffectRecord> {
        let mut by_scene: BTreeMap<SceneNumber, &AffectRecord> = BTreeMap::new();
        for digest in sources.memory.get_historical_digests() {
            if let Some(record) = digest.affect_for(reviewer) {
                by_scene.insert(digest.scene_number, record);
            }
        }
        for (scene, affect) in sources.pending_affect {
            if let Some(record) = affect.get(reviewer) {
                by_scene.insert(*scene, record);
            }
        }
        let all: Vec<&AffectRecord> = by_scene.into_values().collect();
        tail(&all, self.limits.max_affect_entries).iter().map(|r| (*r).clone()).collect()
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::SceneCompressor;
    use crate::question::QuestionDraft;
    use crate::types::Significance;

    struct Fixture {
        entities: EntityStore,
        questions: QuestionStore,
        memory: MemoryManager,
        pending: BTreeMap<SceneNumber, ReviewerAffect>,
    }

    impl Fixture {
        fn sources(&self) -> ContextSources<'_> {
            ContextSources {
                entities: &self.entities,
                questions: &self.questions,
                memory: &self.memory,
                pending_affect: &self.pending,
            }
        }
    }

    fn critic() -> ReviewerId {
        ReviewerId::new("critic")
    }

    fn fixture(scenes: SceneNumber) -> Fixture {
        let compressor = SceneCompressor::default();
        let mut memory = MemoryManager::new(3).expect("memory");
        let mut pending: BTreeMap<SceneNumber, ReviewerAffect> = BTreeMap::new();
        for n in 1..=scenes {
            let scene = SceneRecord::new(n, format!("INT. ROOM {n} - DAY")).with_action("Waiting.");
            memory
                .admit_scene(scene, |old| {
                    let affect = pending.remove(&old.scene_number).unwrap_or_default();
                    compressor.compress(old, affect, Vec::new(), Vec::new(), None)
                })
                .expect("admit");
            let mut affect = ReviewerAffect::new();
            affect.insert(critic(), AffectRecord::new(n, 0.1 * n as f32, 0.0));
            pending.insert(n, affect);
        }
        Fixture {
            entities: EntityStore::new(),
            questions: QuestionStore::default(),
            memory,
            pending,
        }
    }

    #[test]
    fn scenes_and_digests_are_bounded() {
        let fx = fixture(9);
        let limits = ContextConfig {
            max_recent_scenes: 2,
            max_digests: 4,
            ..ContextConfig::default()
        };
        let ctx = ContextAssembler::new(limits).assemble(fx.sources(), &critic(), 9);
        let recent: Vec<_> = ctx.recent_scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(recent, vec![7, 8]);
        let digests: Vec<_> = ctx.digests.iter().map(|d| d.scene_number).collect();
        assert_eq!(digests, vec![3, 4, 5, 6]);
    }

    #[test]
    fn affect_spans_digests_and_pending() {
        let fx = fixture(8);
        let limits = ContextConfig {
            max_affect_entries: 4,
            ..ContextConfig::default()
        };
        let ctx = ContextAssembler::new(limits).assemble(fx.sources(), &critic(), 8);
        let scenes: Vec<_> = ctx.affect.iter().map(|a| a.scene_number).collect();
        assert_eq!(scenes, vec![5, 6, 7, 8]);
        assert!(ContextAssembler::default().assemble(fx.sources(), &ReviewerId::new("x"), 8).affect.is_empty());
    }

    #[test]
    fn high_band_entities_are_never_dropped() {
        let mut fx = fixture(1);
        for name in ["A", "B", "C", "D"] {
            let id = fx.entities.get_or_create_character(name, 1).expect("create").entity_id.clone();
            for s in 1..=5 {
                fx.entities.record_appearance(&id, s, true, 5).expect("appear");
            }
            for s in 1..=3 {
                fx.entities.add_key_moment(&id, s, "turn", Significance::Critical).expect("moment");
            }
        }
        fx.entities.get_or_create_character("EXTRA", 1).expect("extra");
        fx.entities.recompute_all(5);
        assert_eq!(fx.entities.get_high_importance_entities().len(), 4);

        let assembler = ContextAssembler::new(ContextConfig {
            max_entities: 2,
            ..ContextConfig::default()
        });
        let names: Vec<_> = assembler.key_entities(&fx.entities).into_iter().map(|e| e.name).collect();
        assert_eq!(names.len(), 4);
        assert!(!names.contains(&"EXTRA".to_string()));

        let roomy = ContextAssembler::new(ContextConfig {
            max_entities: 6,
            ..ContextConfig::default()
        });
        let names: Vec<_> = roomy.key_entities(&fx.entities).into_iter().map(|e| e.name).collect();
        assert_eq!(names.len(), 5);
        assert_eq!(names.last().map(String::as_str), Some("EXTRA"));
    }

    #[test]
    fn questions_come_from_active_context() {
        let mut fx = fixture(3);
        for text in ["One?", "Two?", "Three?"] {
            fx.questions.raise(QuestionDraft::new(text), 2, &critic()).expect("raise");
        }
        fx.questions.recompute_all(3, None);
        let ctx = ContextAssembler::new(ContextConfig {
            max_questions: 2,
            ..ContextConfig::default()
        })
        .assemble(fx.sources(), &critic(), 3);
        assert_eq!(ctx.questions.len(), 2);
    }
}
