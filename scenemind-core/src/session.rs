//! Sequential driver state for one document review.
//!
//! A [`NarrativeSession`] owns every store and moves through a fixed cycle
//! per scene:
//!
//! ```text
//! observe_scene(s) ──▶ context_for(r)… ──▶ apply_update(u)… ──▶ commit_scene()
//! ```
//!
//! `observe_scene` folds the scene into the entity store and rescores
//! everything at the new scene number. Reviewer updates are validated in
//! full before any store is touched, so a rejected update leaves the session
//! exactly as it was. `commit_scene` compresses the scene leaving the window
//! using the affect and question ids recorded while it was recent, then
//! admits the observed scene.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::affect::{AffectRecord, ReviewerAffect};
use crate::compressor::SceneCompressor;
use crate::config::SceneMindConfig;
use crate::context::{ContextAssembler, ContextSources, ReviewerContext};
use crate::entity::tracking::{assign_narrative_functions, SceneTracker, TrackingReport};
use crate::entity::{Entity, EntityStore, IdCounters};
use crate::error::{Result, SceneMindError};
use crate::memory::{MemoryManager, SceneDigest};
use crate::metrics::{spans, SessionCounters};
use crate::question::{Question, QuestionDraft, QuestionStore};
use crate::scene::SceneRecord;
use crate::types::{NarrativeWeight, QuestionId, QuestionStatus, ReviewerId, SceneNumber, SessionId};

// ---------------------------------------------------------------------------
// Reviewer updates
// ---------------------------------------------------------------------------

/// A question raised in a reviewer's output, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaisedQuestion {
    /// Question text.
    pub text: String,
    /// Dramatic weight.
    #[serde(default)]
    pub weight: NarrativeWeight,
    /// Names or ids of entities the question is about. Unknown names are ignored.
    #[serde(default)]
    pub about: Vec<String>,
    /// The reviewer's guess.
    #[serde(default)]
    pub speculation: Option<String>,
}

/// A question the reviewer says was answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    /// Question id.
    pub question_id: QuestionId,
    /// The answer.
    pub answer: String,
}

/// A question the reviewer no longer considers relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissedQuestion {
    /// Question id.
    pub question_id: QuestionId,
    /// Why.
    pub reason: String,
}

/// Everything one reviewer contributes for one scene, already structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerUpdate {
    /// Reviewer.
    pub reviewer: ReviewerId,
    /// Scene the update belongs to.
    pub scene_number: SceneNumber,
    /// Typed affect for this scene.
    pub affect: AffectRecord,
    /// New questions.
    #[serde(default)]
    pub raised: Vec<RaisedQuestion>,
    /// Open questions still relevant in this scene.
    #[serde(default)]
    pub referenced: Vec<QuestionId>,
    /// Questions answered in this scene.
    #[serde(default)]
    pub answered: Vec<AnsweredQuestion>,
    /// Questions dropped as irrelevant.
    #[serde(default)]
    pub dismissed: Vec<DismissedQuestion>,
}

impl ReviewerUpdate {
    /// An update carrying only affect.
    #[must_use]
    pub fn new(reviewer: ReviewerId, affect: AffectRecord) -> Self {
        Self {
            reviewer,
            scene_number: affect.scene_number,
            affect,
            raised: Vec::new(),
            referenced: Vec::new(),
            answered: Vec::new(),
            dismissed: Vec::new(),
        }
    }
}

/// What an accepted update changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedUpdate {
    /// Reviewer.
    pub reviewer: ReviewerId,
    /// Ids assigned to raised questions, in order.
    pub raised: Vec<QuestionId>,
    /// Questions answered.
    pub answered: Vec<QuestionId>,
    /// Questions dismissed.
    pub dismissed: Vec<QuestionId>,
}

/// An update that was refused; the session is unchanged by it.
#[derive(Debug)]
pub struct RejectedUpdate {
    /// Reviewer.
    pub reviewer: ReviewerId,
    /// Why.
    pub error: SceneMindError,
}

/// Outcome of [`NarrativeSession::apply_updates`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Accepted updates, in input order.
    pub applied: Vec<AppliedUpdate>,
    /// Refused updates, in input order.
    pub rejected: Vec<RejectedUpdate>,
}

/// Outcome of [`NarrativeSession::commit_scene`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    /// Scene admitted.
    pub scene_number: SceneNumber,
    /// Scene that moved to the historical tier.
    pub evicted: Option<SceneNumber>,
    /// Questions closed by auto-pruning.
    pub pruned: Vec<QuestionId>,
}

/// Question ids attributed to one scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneQuestions {
    /// Raised while reading the scene.
    pub raised: Vec<QuestionId>,
    /// Answered in the scene.
    pub answered: Vec<QuestionId>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Session-level state outside the entity, question and digest rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session id.
    pub session_id: SessionId,
    /// Highest committed scene.
    pub current_scene: SceneNumber,
    /// Window size in effect.
    pub window_size: usize,
    /// Entity id counters.
    pub entity_counters: IdCounters,
    /// Last question sequence number.
    pub question_seq: u32,
    /// Recent window, oldest first.
    pub recent: Vec<SceneRecord>,
    /// Scene observed but not yet committed.
    pub observed: Option<SceneRecord>,
    /// Affect on scenes still in the window (or observed).
    pub pending_affect: BTreeMap<SceneNumber, ReviewerAffect>,
    /// Question ids on scenes still in the window (or observed).
    pub question_log: BTreeMap<SceneNumber, SceneQuestions>,
}

/// Complete persisted form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session row.
    pub state: SessionState,
    /// Entity rows.
    pub entities: Vec<Entity>,
    /// Question rows.
    pub questions: Vec<Question>,
    /// Digest rows, oldest first.
    pub digests: Vec<SceneDigest>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Owns the stores for one document and enforces scene ordering.
#[derive(Debug)]
pub struct NarrativeSession {
    id: SessionId,
    config: SceneMindConfig,
    entities: EntityStore,
    questions: QuestionStore,
    memory: MemoryManager,
    compressor: SceneCompressor,
    assembler: ContextAssembler,
    tracker: SceneTracker,
    observed: Option<SceneRecord>,
    pending_affect: BTreeMap<SceneNumber, ReviewerAffect>,
    question_log: BTreeMap<SceneNumber, SceneQuestions>,
    counters: Arc<SessionCounters>,
}

impl NarrativeSession {
    /// Fresh session using the heuristic summarizer.
    ///
    /// # Errors
    /// [`SceneMindError::Config`] if the config fails validation.
    pub fn new(config: SceneMindConfig) -> Result<Self> {
        let compressor = SceneCompressor::heuristic(config.compressor.clone());
        Self::with_compressor(config, compressor)
    }

    /// Fresh session with a caller-supplied compressor.
    ///
    /// # Errors
    /// [`SceneMindError::Config`] if the config fails validation.
    pub fn with_compressor(config: SceneMindConfig, compressor: SceneCompressor) -> Result<Self> {
        config.validate()?;
        let session = Self {
            id: SessionId::new(),
            entities: EntityStore::new(),
            questions: QuestionStore::new(config.questions.clone()),
            memory: MemoryManager::new(config.memory.window_size)?,
            compressor,
            assembler: ContextAssembler::new(config.context.clone()),
            tracker: SceneTracker::new(&config.entities),
            observed: None,
            pending_affect: BTreeMap::new(),
            question_log: BTreeMap::new(),
            counters: Arc::new(SessionCounters::new()),
            config,
        };
        info!(session = %session.id, window = session.config.memory.window_size, "Session opened");
        Ok(session)
    }

    /// Rebuild a session from a snapshot.
    ///
    /// # Errors
    /// [`SceneMindError::Config`] or [`SceneMindError::InvalidInput`] if the
    /// snapshot is inconsistent with itself or with `config`.
    pub fn from_snapshot(config: SceneMindConfig, snapshot: SessionSnapshot) -> Result<Self> {
        config.validate()?;
        let SessionSnapshot {
            state,
            entities,
            questions,
            digests,
        } = snapshot;
        if state.window_size != config.memory.window_size {
            return Err(SceneMindError::Config(format!(
                "snapshot window {} differs from configured {}",
                state.window_size, config.memory.window_size
            )));
        }
        let session = Self {
            id: state.session_id,
            entities: EntityStore::restore(entities, state.entity_counters)?,
            questions: QuestionStore::restore(config.questions.clone(), questions, state.question_seq)?,
            memory: MemoryManager::restore(state.window_size, state.current_scene, state.recent, digests)?,
            compressor: SceneCompressor::heuristic(config.compressor.clone()),
            assembler: ContextAssembler::new(config.context.clone()),
            tracker: SceneTracker::new(&config.entities),
            observed: state.observed,
            pending_affect: state.pending_affect,
            question_log: state.question_log,
            counters: Arc::new(SessionCounters::new()),
            config,
        };
        info!(session = %session.id, scene = session.memory.current_scene(), "Session restored");
        Ok(session)
    }

    /// Capture everything needed to resume.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: SessionState {
                session_id: self.id,
                current_scene: self.memory.current_scene(),
                window_size: self.memory.capacity(),
                entity_counters: self.entities.counters(),
                question_seq: self.questions.sequence(),
                recent: self.memory.get_recent_scenes().cloned().collect(),
                observed: self.observed.clone(),
                pending_affect: self.pending_affect.clone(),
                question_log: self.question_log.clone(),
            },
            entities: self.entities.iter().cloned().collect(),
            questions: self.questions.iter().cloned().collect(),
            digests: self.memory.get_historical_digests().to_vec(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Config in effect.
    #[must_use]
    pub fn config(&self) -> &SceneMindConfig {
        &self.config
    }

    /// Entity store.
    #[must_use]
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// Question store.
    #[must_use]
    pub fn questions(&self) -> &QuestionStore {
        &self.questions
    }

    /// Scene window.
    #[must_use]
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Shared counters.
    #[must_use]
    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    /// Scene observed and awaiting commit.
    #[must_use]
    pub fn observed_scene(&self) -> Option<&SceneRecord> {
        self.observed.as_ref()
    }

    /// Affect recorded on scenes that are not yet digested.
    #[must_use]
    pub fn pending_affect(&self) -> &BTreeMap<SceneNumber, ReviewerAffect> {
        &self.pending_affect
    }

    /// Highest committed scene number.
    #[must_use]
    pub fn current_scene(&self) -> SceneNumber {
        self.memory.current_scene()
    }

    // ------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------

    /// Fold `scene` into the entity store and rescore at its number.
    ///
    /// # Errors
    /// [`SceneMindError::SessionPhase`] if a scene is already observed,
    /// [`SceneMindError::OutOfOrder`] if `scene` does not follow the last one.
    pub fn observe_scene(&mut self, scene: SceneRecord) -> Result<TrackingReport> {
        if let Some(pending) = &self.observed {
            return Err(SceneMindError::SessionPhase(format!(
                "scene {} observed but not committed",
                pending.scene_number
            )));
        }
        let last = self.memory.current_scene();
        if last > 0 && scene.scene_number <= last {
            return Err(SceneMindError::OutOfOrder {
                last,
                got: scene.scene_number,
            });
        }

        let n = scene.scene_number;
        let report = self.tracker.track_scene(&mut self.entities, &scene)?;
        self.entities.recompute_all(n);
        self.questions.recompute_all(n, Some(&self.entities));
        assign_narrative_functions(&mut self.entities)?;
        debug!(
            scene = n,
            created = report.created.len(),
            present = report.present.len(),
            "Observed scene"
        );
        self.observed = Some(scene);
        Ok(report)
    }

    fn observed_number(&self) -> Result<SceneNumber> {
        self.observed
            .as_ref()
            .map(|s| s.scene_number)
            .ok_or_else(|| SceneMindError::SessionPhase("no scene observed".into()))
    }

    /// Bounded context for `reviewer` at the observed scene.
    ///
    /// # Errors
    /// [`SceneMindError::SessionPhase`] if no scene is observed.
    pub fn context_for(&self, reviewer: &ReviewerId) -> Result<ReviewerContext> {
        let n = self.observed_number()?;
        let sources = ContextSources {
            entities: &self.entities,
            questions: &self.questions,
            memory: &self.memory,
            pending_affect: &self.pending_affect,
        };
        Ok(self.assembler.assemble(sources, reviewer, n))
    }

    /// Validate and apply one reviewer's update atomically.
    ///
    /// # Errors
    /// Any validation failure; the session is unchanged when this returns `Err`.
    pub fn apply_update(&mut self, update: &ReviewerUpdate) -> Result<AppliedUpdate> {
        let n = self.validate_update(update)?;

        let mut applied = AppliedUpdate {
            reviewer: update.reviewer.clone(),
            raised: Vec::with_capacity(update.raised.len()),
            answered: Vec::new(),
            dismissed: Vec::new(),
        };

        for raised in &update.raised {
            let mut draft = QuestionDraft::new(raised.text.clone()).weight(raised.weight);
            draft.speculation.clone_from(&raised.speculation);
            let mut about = BTreeSet::new();
            for name in &raised.about {
                if let Some(entity) = self.entities.lookup(name) {
                    about.insert(entity.entity_id.clone());
                }
            }
            draft.related_entities = about.into_iter().collect();
            let id = self.questions.raise(draft, n, &update.reviewer)?.question_id.clone();
            applied.raised.push(id);
        }
        for id in &update.referenced {
            self.questions.add_reference(id, n)?;
        }
        for answered in &update.answered {
            self.questions.mark_answered(&answered.question_id, n, answered.answer.clone())?;
            applied.answered.push(answered.question_id.clone());
        }
        for dismissed in &update.dismissed {
            self.questions.mark_irrelevant(&dismissed.question_id, n, dismissed.reason.clone())?;
            applied.dismissed.push(dismissed.question_id.clone());
        }
        for id in &applied.raised {
            self.questions.recompute_importance(id, n, Some(&self.entities))?;
        }
        for id in &update.referenced {
            self.questions.recompute_importance(id, n, Some(&self.entities))?;
        }

        let log = self.question_log.entry(n).or_default();
        log.raised.extend(applied.raised.iter().cloned());
        log.answered.extend(applied.answered.iter().cloned());
        self.pending_affect
            .entry(n)
            .or_default()
            .insert(update.reviewer.clone(), update.affect.clone());

        SessionCounters::add(&self.counters.questions_raised, applied.raised.len() as u64);
        SessionCounters::add(&self.counters.questions_answered, applied.answered.len() as u64);
        debug!(
            reviewer = %update.reviewer,
            scene = n,
            raised = applied.raised.len(),
            answered = applied.answered.len(),
            dismissed = applied.dismissed.len(),
            "Applied reviewer update"
        );
        Ok(applied)
    }

    /// Checks every part of `update` against current state. Returns the scene number.
    fn validate_update(&self, update: &ReviewerUpdate) -> Result<SceneNumber> {
        let n = self.observed_number()?;
        if update.scene_number != n {
            return Err(SceneMindError::SessionPhase(format!(
                "update for scene {} while scene {n} is observed",
                update.scene_number
            )));
        }
        if update.affect.scene_number != n {
            return Err(SceneMindError::InvalidInput(format!(
                "affect is for scene {}, update for scene {n}",
                update.affect.scene_number
            )));
        }
        if update.reviewer.as_str().trim().is_empty() {
            return Err(SceneMindError::InvalidInput("reviewer id is blank".into()));
        }
        if self.pending_affect.get(&n).is_some_and(|a| a.contains_key(&update.reviewer)) {
            return Err(SceneMindError::InvalidInput(format!(
                "{} already reviewed scene {n}",
                update.reviewer
            )));
        }
        if update.raised.iter().any(|q| q.text.trim().is_empty()) {
            return Err(SceneMindError::InvalidInput("question text is blank".into()));
        }
        for id in &update.referenced {
            if self.questions.get(id).is_none() {
                return Err(SceneMindError::QuestionNotFound(id.clone()));
            }
        }

        let mut closing = BTreeSet::new();
        let closes = update
            .answered
            .iter()
            .map(|a| (&a.question_id, QuestionStatus::Answered))
            .chain(update.dismissed.iter().map(|d| (&d.question_id, QuestionStatus::Irrelevant)));
        for (id, to) in closes {
            self.questions.check_can_close(id, n, to)?;
            if !closing.insert(id) {
                return Err(SceneMindError::InvalidInput(format!("{id} closed twice in one update")));
            }
        }
        Ok(n)
    }

    /// Apply each update independently; failures are reported, not fatal.
    pub fn apply_updates(&mut self, updates: &[ReviewerUpdate]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for update in updates {
            match self.apply_update(update) {
                Ok(applied) => report.applied.push(applied),
                Err(error) => {
                    warn!(reviewer = %update.reviewer, scene = update.scene_number, %error, "Rejected reviewer update");
                    SessionCounters::add(&self.counters.reviews_rejected, 1);
                    report.rejected.push(RejectedUpdate {
                        reviewer: update.reviewer.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    /// Admit the observed scene, digesting the scene it pushes out.
    ///
    /// # Errors
    /// [`SceneMindError::SessionPhase`] if no scene is observed.
    pub fn commit_scene(&mut self) -> Result<CommitReport> {
        let _span = info_span!(spans::COMMIT_SCENE).entered();
        let scene = self
            .observed
            .clone()
            .ok_or_else(|| SceneMindError::SessionPhase("no scene observed".into()))?;
        let n = scene.scene_number;

        let compressor = &self.compressor;
        let entities = &self.entities;
        let pending_affect = &self.pending_affect;
        let question_log = &self.question_log;
        let evicted = self.memory.admit_scene(scene, |old| {
            let affect = pending_affect.get(&old.scene_number).cloned().unwrap_or_default();
            let log = question_log.get(&old.scene_number).cloned().unwrap_or_default();
            compressor.compress(old, affect, log.raised, log.answered, Some(entities))
        })?;

        self.observed = None;
        let evicted = evicted.map(|old| {
            self.pending_affect.remove(&old.scene_number);
            self.question_log.remove(&old.scene_number);
            SessionCounters::add(&self.counters.digests_produced, 1);
            old.scene_number
        });

        let pruned = if self.config.questions.auto_prune {
            self.questions.prune_low_importance(self.config.questions.prune_threshold)
        } else {
            Vec::new()
        };
        SessionCounters::add(&self.counters.questions_pruned, pruned.len() as u64);
        SessionCounters::add(&self.counters.scenes_committed, 1);

        info!(scene = n, evicted = ?evicted, pruned = pruned.len(), "Committed scene");
        Ok(CommitReport {
            scene_number: n,
            evicted,
            pruned,
        })
    }

    /// Observe and commit a scene with no reviewer input.
    ///
    /// # Errors
    /// Same as [`NarrativeSession::observe_scene`].
    pub fn advance(&mut self, scene: SceneRecord) -> Result<CommitReport> {
        self.observe_scene(scene)?;
        self.commit_scene()
    }
}
