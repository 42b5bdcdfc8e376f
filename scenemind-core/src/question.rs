//! Narrative question ("mystery") tracking.
//!
//! Reviewers raise questions as they read. Each [`Question`] carries a fixed
//! [`NarrativeWeight`], a growing set of referencing scenes, and an urgency
//! that rises every time it is referenced while still open. Status only ever
//! moves `open → answered` or `open → irrelevant`.
//!
//! ## Importance
//!
//! | term | weight |
//! |---|---|
//! | references / 5 | 0.25 |
//! | (current − raised) / current | 0.15 |
//! | narrative weight factor | 0.30 |
//! | max related-entity importance | 0.15 |
//! | urgency | 0.15 |
//! | referenced within the last 3 scenes | +0.10 |
//!
//! Scores are only recomputed while a question is open; terminal questions
//! keep their last score.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::QuestionConfig;
use crate::entity::EntityStore;
use crate::error::{Result, SceneMindError};
use crate::types::{
    is_recent, unit, EntityId, ImportanceBand, NarrativeWeight, QuestionId, QuestionStatus,
    ReviewerId, SceneNumber,
};

/// Reason recorded on questions closed by [`QuestionStore::prune_low_importance`].
pub const AUTO_PRUNED: &str = "auto-pruned";

/// A question raised by a reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Stable sequential id.
    pub question_id: QuestionId,
    /// The question as the reviewer phrased it.
    pub text: String,
    /// Scene it was raised in.
    pub raised_in_scene: SceneNumber,
    /// Reviewer who raised it.
    pub raised_by: ReviewerId,
    /// Lifecycle status.
    pub status: QuestionStatus,
    /// Last computed importance.
    #[serde(default)]
    pub importance_score: f32,
    /// Scenes in which the question was relevant.
    pub references: BTreeSet<SceneNumber>,
    /// Entities the question is about.
    #[serde(default)]
    pub related_entities: BTreeSet<EntityId>,
    /// Fixed at creation.
    pub narrative_weight: NarrativeWeight,
    /// 0–1, only ever rises.
    pub urgency: f32,
    /// The reviewer's guess at an answer.
    #[serde(default)]
    pub speculation: Option<String>,
    /// Set on `open → answered`.
    #[serde(default)]
    pub answer: Option<String>,
    /// Set on `open → answered`.
    #[serde(default)]
    pub answered_in_scene: Option<SceneNumber>,
    /// Set on `open → irrelevant`.
    #[serde(default)]
    pub irrelevant_reason: Option<String>,
    /// Set on `open → irrelevant`.
    #[serde(default)]
    pub became_irrelevant_in_scene: Option<SceneNumber>,
}

impl Question {
    /// Whether the question is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == QuestionStatus::Open
    }

    /// Most recent referencing scene.
    #[must_use]
    pub fn last_reference(&self) -> SceneNumber {
        self.references.last().copied().unwrap_or(self.raised_in_scene)
    }

    /// Importance at `current_scene`, ignoring status.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn importance_at(&self, current_scene: SceneNumber, entities: Option<&EntityStore>) -> f32 {
        let references = unit(self.references.len() as f32 / 5.0) * 0.25;
        let duration = if current_scene > self.raised_in_scene {
            unit((current_scene - self.raised_in_scene) as f32 / current_scene as f32) * 0.15
        } else {
            0.0
        };
        let weight = self.narrative_weight.factor() * 0.30;
        let linked = entities.map_or(0.0, |store| {
            self.related_entities
                .iter()
                .filter_map(|id| store.get(id))
                .map(|e| e.importance_score)
                .fold(0.0_f32, f32::max)
        });
        let linked = unit(linked) * 0.15;
        let urgency = unit(self.urgency) * 0.15;
        let recency = if is_recent(current_scene, self.last_reference()) { 0.10 } else { 0.0 };

        (references + duration + weight + linked + urgency + recency).min(1.0)
    }

    /// Band of the last computed score.
    #[must_use]
    pub fn band(&self) -> ImportanceBand {
        ImportanceBand::from_score(self.importance_score)
    }
}

/// Everything a reviewer supplies when raising a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    /// Question text.
    pub text: String,
    /// Dramatic weight.
    #[serde(default)]
    pub weight: NarrativeWeight,
    /// Entities the question concerns.
    #[serde(default)]
    pub related_entities: Vec<EntityId>,
    /// Optional guess at the answer.
    #[serde(default)]
    pub speculation: Option<String>,
}

impl QuestionDraft {
    /// A medium-weight draft with no related entities.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            weight: NarrativeWeight::Medium,
            related_entities: Vec::new(),
            speculation: None,
        }
    }

    /// Set the narrative weight.
    #[must_use]
    pub fn weight(mut self, weight: NarrativeWeight) -> Self {
        self.weight = weight;
        self
    }

    /// Relate the question to an entity.
    #[must_use]
    pub fn about(mut self, entity: EntityId) -> Self {
        self.related_entities.push(entity);
        self
    }

    /// Attach the reviewer's speculation.
    #[must_use]
    pub fn speculation(mut self, guess: impl Into<String>) -> Self {
        self.speculation = Some(guess.into());
        self
    }
}

/// Count of questions per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    /// Still open.
    pub open: usize,
    /// Answered.
    pub answered: usize,
    /// Irrelevant (dismissed or pruned).
    pub irrelevant: usize,
}

/// Owns every question, in the order raised.
#[derive(Debug, Clone)]
pub struct QuestionStore {
    questions: Vec<Question>,
    index: HashMap<QuestionId, usize>,
    next_seq: u32,
    config: QuestionConfig,
}

impl Default for QuestionStore {
    fn default() -> Self {
        Self::new(QuestionConfig::default())
    }
}

impl QuestionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: QuestionConfig) -> Self {
        Self {
            questions: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
            config,
        }
    }

    /// Rebuild a store from persisted questions.
    ///
    /// # Errors
    /// Returns [`SceneMindError::InvalidInput`] if two questions share an id.
    pub fn restore(config: QuestionConfig, questions: Vec<Question>, next_seq: u32) -> Result<Self> {
        let mut index = HashMap::with_capacity(questions.len());
        for (i, q) in questions.iter().enumerate() {
            if index.insert(q.question_id.clone(), i).is_some() {
                return Err(SceneMindError::InvalidInput(format!("duplicate question id {}", q.question_id)));
            }
        }
        let next_seq = questions
            .iter()
            .filter_map(|q| q.question_id.sequence())
            .max()
            .unwrap_or(0)
            .max(next_seq);
        Ok(Self {
            questions,
            index,
            next_seq,
            config,
        })
    }

    /// Sequence number of the last question raised.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.next_seq
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Raise a new open question in `scene`.
    ///
    /// # Errors
    /// Returns [`SceneMindError::InvalidInput`] for blank text.
    pub fn raise(&mut self, draft: QuestionDraft, scene: SceneNumber, reviewer: &ReviewerId) -> Result<&Question> {
        let text = draft.text.trim();
        if text.is_empty() {
            return Err(SceneMindError::InvalidInput("question text is blank".into()));
        }

        self.next_seq += 1;
        let id = QuestionId::generate(self.next_seq);
        let question = Question {
            question_id: id.clone(),
            text: text.to_string(),
            raised_in_scene: scene,
            raised_by: reviewer.clone(),
            status: QuestionStatus::Open,
            importance_score: 0.0,
            references: BTreeSet::from([scene]),
            related_entities: draft.related_entities.into_iter().collect(),
            narrative_weight: draft.weight,
            urgency: unit(self.config.initial_urgency),
            speculation: draft.speculation,
            answer: None,
            answered_in_scene: None,
            irrelevant_reason: None,
            became_irrelevant_in_scene: None,
        };

        debug!(question = %id, scene, reviewer = %reviewer, weight = ?question.narrative_weight, "Raised question");
        let i = self.questions.len();
        self.index.insert(id, i);
        self.questions.push(question);
        Ok(&self.questions[i])
    }

    /// Note that the question is still relevant in `scene`. Returns `false`
    /// if that scene was already referenced.
    ///
    /// # Errors
    /// [`SceneMindError::QuestionNotFound`] for an unknown id.
    pub fn add_reference(&mut self, id: &QuestionId, scene: SceneNumber) -> Result<bool> {
        let step = self.config.urgency_step;
        let question = self.get_mut(id)?;
        if !question.references.insert(scene) {
            return Ok(false);
        }
        if question.is_open() {
            question.urgency = (question.urgency + step).min(1.0);
        }
        Ok(true)
    }

    /// Transition `open → answered`.
    ///
    /// # Errors
    /// [`SceneMindError::QuestionNotFound`], [`SceneMindError::IllegalTransition`]
    /// if not open, or [`SceneMindError::InvalidScene`] if `scene` precedes the
    /// scene the question was raised in.
    pub fn mark_answered(&mut self, id: &QuestionId, scene: SceneNumber, answer: impl Into<String>) -> Result<()> {
        let question = self.get_mut(id)?;
        check_transition(question, scene, QuestionStatus::Answered)?;
        question.status = QuestionStatus::Answered;
        question.answer = Some(answer.into());
        question.answered_in_scene = Some(scene);
        question.references.insert(scene);
        info!(question = %id, scene, "Question answered");
        Ok(())
    }

    /// Transition `open → irrelevant`.
    ///
    /// # Errors
    /// Same as [`QuestionStore::mark_answered`].
    pub fn mark_irrelevant(&mut self, id: &QuestionId, scene: SceneNumber, reason: impl Into<String>) -> Result<()> {
        let question = self.get_mut(id)?;
        check_transition(question, scene, QuestionStatus::Irrelevant)?;
        question.status = QuestionStatus::Irrelevant;
        question.irrelevant_reason = Some(reason.into());
        question.became_irrelevant_in_scene = Some(scene);
        debug!(question = %id, scene, "Question marked irrelevant");
        Ok(())
    }

    /// Validate a transition without applying it.
    ///
    /// # Errors
    /// Same as [`QuestionStore::mark_answered`].
    pub fn check_can_close(&self, id: &QuestionId, scene: SceneNumber, to: QuestionStatus) -> Result<()> {
        let question = self.get(id).ok_or_else(|| SceneMindError::QuestionNotFound(id.clone()))?;
        check_transition(question, scene, to)
    }

    /// Close every open question scoring below `threshold` as irrelevant,
    /// stamped at its most recent reference. Returns the pruned ids.
    pub fn prune_low_importance(&mut self, threshold: f32) -> Vec<QuestionId> {
        let mut pruned = Vec::new();
        for question in self.questions.iter_mut().filter(|q| q.is_open()) {
            if question.importance_score < threshold {
                question.status = QuestionStatus::Irrelevant;
                question.irrelevant_reason = Some(AUTO_PRUNED.to_string());
                question.became_irrelevant_in_scene = Some(question.last_reference());
                pruned.push(question.question_id.clone());
            }
        }
        if !pruned.is_empty() {
            info!(count = pruned.len(), threshold, "Pruned low-importance questions");
        }
        pruned
    }

    // ------------------------------------------------------------------
    // Importance
    // ------------------------------------------------------------------

    /// Recompute one question's score. Terminal questions return their
    /// frozen score unchanged.
    ///
    /// # Errors
    /// [`SceneMindError::QuestionNotFound`] for an unknown id.
    pub fn recompute_importance(
        &mut self,
        id: &QuestionId,
        current_scene: SceneNumber,
        entities: Option<&EntityStore>,
    ) -> Result<f32> {
        let question = self.get_mut(id)?;
        if question.is_open() {
            question.importance_score = question.importance_at(current_scene, entities);
        }
        Ok(question.importance_score)
    }

    /// Recompute every open question.
    pub fn recompute_all(&mut self, current_scene: SceneNumber, entities: Option<&EntityStore>) {
        for question in self.questions.iter_mut().filter(|q| q.is_open()) {
            question.importance_score = question.importance_at(current_scene, entities);
        }
    }

    /// The `max_n` most important open questions. Ties go to the most
    /// recently referenced, then the earliest raised.
    #[must_use]
    pub fn active_context(&self, max_n: usize) -> Vec<&Question> {
        let mut open: Vec<&Question> = self.open_questions().collect();
        open.sort_by_key(|q| {
            (
                Reverse(OrderedFloat(q.importance_score)),
                Reverse(q.last_reference()),
                q.raised_in_scene,
                q.question_id.sequence().unwrap_or(u32::MAX),
            )
        });
        open.truncate(max_n);
        open
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Question by id.
    #[must_use]
    pub fn get(&self, id: &QuestionId) -> Option<&Question> {
        self.index.get(id).map(|&i| &self.questions[i])
    }

    fn get_mut(&mut self, id: &QuestionId) -> Result<&mut Question> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.questions[i]),
            None => Err(SceneMindError::QuestionNotFound(id.clone())),
        }
    }

    /// All questions in the order raised.
    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }

    /// Number of questions ever raised.
    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether no question was raised yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Open questions in the order raised.
    pub fn open_questions(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(|q| q.is_open())
    }

    /// Open questions in the high band.
    #[must_use]
    pub fn high_importance_questions(&self) -> Vec<&Question> {
        self.open_questions().filter(|q| q.band() == ImportanceBand::High).collect()
    }

    /// Questions referenced in `scene`.
    #[must_use]
    pub fn questions_for_scene(&self, scene: SceneNumber) -> Vec<&Question> {
        self.questions.iter().filter(|q| q.references.contains(&scene)).collect()
    }

    /// Questions raised by `reviewer`.
    #[must_use]
    pub fn questions_by_reviewer(&self, reviewer: &ReviewerId) -> Vec<&Question> {
        self.questions.iter().filter(|q| &q.raised_by == reviewer).collect()
    }

    /// Count per status.
    #[must_use]
    pub fn status_summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for q in &self.questions {
            match q.status {
                QuestionStatus::Open => summary.open += 1,
                QuestionStatus::Answered => summary.answered += 1,
                QuestionStatus::Irrelevant => summary.irrelevant += 1,
            }
        }
        summary
    }

    /// Open question texts grouped by band.
    #[must_use]
    pub fn importance_summary(&self) -> BTreeMap<ImportanceBand, Vec<String>> {
        let mut summary: BTreeMap<ImportanceBand, Vec<String>> = BTreeMap::new();
        for q in self.open_questions() {
            summary.entry(q.band()).or_default().push(q.text.clone());
        }
        summary
    }
}

fn check_transition(question: &Question, scene: SceneNumber, to: QuestionStatus) -> Result<()> {
    if question.status.is_terminal() {
        return Err(SceneMindError::IllegalTransition {
            id: question.question_id.clone(),
            from: question.status,
            attempted: to,
        });
    }
    if scene < question.raised_in_scene {
        return Err(SceneMindError::InvalidScene {
            scene,
            reason: format!("{} was raised in scene {}", question.question_id, question.raised_in_scene),
        });
    }
    Ok(())
}
