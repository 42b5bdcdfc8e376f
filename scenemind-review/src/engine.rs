//! Scene-by-scene review driver.
//!
//! For each scene the engine observes it, fans reviewer calls out to the
//! provider under a concurrency bound, joins them, applies the parsed
//! updates in reviewer order and only then commits the scene. The session
//! is owned here and never touched while calls are in flight.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

use scenemind_core::context::QuestionBrief;
use scenemind_core::metrics::{spans, CounterSnapshot, LatencyMonitor, LatencyPercentiles, SessionCounters};
use scenemind_core::question::QuestionStore;
use scenemind_core::scene::SceneRecord;
use scenemind_core::session::{CommitReport, NarrativeSession, ReviewerUpdate};
use scenemind_core::types::{QuestionId, ReviewerId, SceneNumber, SessionId};
use scenemind_core::{Screenplay, SessionStore};
use scenemind_llm::{ChatProvider, ChatResponse, LlmError, ReviewTemplates};

use crate::error::{ReviewError, Result};
use crate::feedback::{parse_reply, ParsedFeedback};
use crate::persona::ReviewerProfile;
use crate::prompt::{build_request, PromptInputs};
use crate::reviewer::{ReviewerState, ReviewerSummary};

/// Open questions listed in a [`DocumentReport`].
const REPORT_QUESTIONS: usize = 5;

/// One reviewer's applied reading of a scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneFeedback {
    /// Reviewer.
    pub reviewer: ReviewerId,
    /// Engagement recorded.
    pub engagement: f32,
    /// Enjoyment recorded.
    pub enjoyment: f32,
    /// Free-text reaction, if any.
    pub reaction: Option<String>,
    /// Questions this reviewer raised.
    pub raised: Vec<QuestionId>,
    /// Questions this reviewer answered.
    pub answered: Vec<QuestionId>,
}

/// A reviewer whose reading of a scene was lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewFailure {
    /// Reviewer.
    pub reviewer: ReviewerId,
    /// What went wrong.
    pub reason: String,
}

/// Result of reviewing one scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneOutcome {
    /// Scene reviewed.
    pub scene_number: SceneNumber,
    /// Applied readings, in reviewer order.
    pub feedback: Vec<SceneFeedback>,
    /// Calls that failed or replies that were rejected.
    pub failures: Vec<ReviewFailure>,
    /// Scene evicted into a digest by the commit, if any.
    pub evicted: Option<SceneNumber>,
    /// Questions auto-pruned by the commit.
    pub pruned: Vec<QuestionId>,
}

/// End-of-document report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    /// Session the review ran in.
    pub session_id: SessionId,
    /// Document title.
    pub title: String,
    /// Last committed scene.
    pub scenes_reviewed: SceneNumber,
    /// Per-reviewer summaries, in reviewer order.
    pub reviewers: Vec<ReviewerSummary>,
    /// Most important questions still open.
    pub open_questions: Vec<QuestionBrief>,
    /// Session counters.
    pub counters: CounterSnapshot,
    /// Reviewer-call latency.
    pub latency: LatencyPercentiles,
}

/// Drives reviewers through a document one scene at a time.
pub struct ReviewEngine<P: ChatProvider + 'static> {
    session: NarrativeSession,
    reviewers: Vec<ReviewerState>,
    default_provider: Arc<P>,
    named_providers: BTreeMap<String, Arc<P>>,
    templates: ReviewTemplates,
    semaphore: Arc<Semaphore>,
    latency: Arc<LatencyMonitor>,
    store: Option<SessionStore>,
    title: String,
}

impl<P: ChatProvider + 'static> std::fmt::Debug for ReviewEngine<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewEngine")
            .field("session", &self.session.id())
            .field("reviewers", &self.reviewers.len())
            .field("model", &self.default_provider.model())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: ChatProvider + 'static> ReviewEngine<P> {
    /// Engine over `session` for the given personas. A resumed session
    /// seeds each reviewer's trajectory from what the session recorded.
    ///
    /// # Errors
    /// [`ReviewError::Persona`] if `personas` is empty.
    pub fn new(session: NarrativeSession, personas: Vec<ReviewerProfile>, provider: P) -> Result<Self> {
        if personas.is_empty() {
            return Err(ReviewError::Persona("no reviewers selected".into()));
        }
        let config = session.config();
        let permits = config.performance.max_concurrent_reviews.max(1);
        #[allow(clippy::cast_precision_loss)]
        let latency = Arc::new(LatencyMonitor::new(config.performance.review_latency_budget_ms as f64));
        let reviewers = personas.into_iter().map(|p| ReviewerState::resume(p, &session)).collect();
        Ok(Self {
            session,
            reviewers,
            default_provider: Arc::new(provider),
            named_providers: BTreeMap::new(),
            templates: ReviewTemplates::builtin(),
            semaphore: Arc::new(Semaphore::new(permits)),
            latency,
            store: None,
            title: String::new(),
        })
    }

    /// Register a provider personas can select by name.
    #[must_use]
    pub fn with_named_provider(mut self, name: impl Into<String>, provider: P) -> Self {
        self.named_providers.insert(name.into(), Arc::new(provider));
        self
    }

    /// Save the session through `store` as scenes are committed.
    #[must_use]
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the built-in prompt templates.
    #[must_use]
    pub fn with_templates(mut self, templates: ReviewTemplates) -> Self {
        self.templates = templates;
        self
    }

    /// Document title used in prompts when the screenplay has none.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The narrative session.
    #[must_use]
    pub fn session(&self) -> &NarrativeSession {
        &self.session
    }

    /// Reviewer states, in reviewer order.
    #[must_use]
    pub fn reviewers(&self) -> &[ReviewerState] {
        &self.reviewers
    }

    /// Reviewer-call latency monitor.
    #[must_use]
    pub fn latency(&self) -> &LatencyMonitor {
        &self.latency
    }

    /// The attached store, if any.
    #[must_use]
    pub fn store(&self) -> Option<&SessionStore> {
        self.store.as_ref()
    }

    /// Review every scene after the session's current one, then report.
    ///
    /// # Errors
    /// Any session or persistence error. Individual reviewer failures are
    /// not errors.
    pub async fn review_document(&mut self, screenplay: &Screenplay) -> Result<DocumentReport> {
        if let Some(title) = &screenplay.title {
            self.title.clone_from(title);
        }
        let span = info_span!(spans::REVIEW_DOCUMENT, session = %self.session.id(), title = %self.title);
        self.review_document_inner(screenplay).instrument(span).await
    }

    async fn review_document_inner(&mut self, screenplay: &Screenplay) -> Result<DocumentReport> {
        for reviewer in &self.reviewers {
            if let Some(name) = &reviewer.profile().provider {
                if !self.named_providers.contains_key(name) {
                    warn!(reviewer = %reviewer.id(), provider = %name, "Unknown provider, using default");
                }
            }
        }

        let start = self.session.current_scene();
        let pending: Vec<&SceneRecord> = screenplay.scenes.iter().filter(|s| s.scene_number > start).collect();
        info!(scenes = pending.len(), resume_after = start, reviewers = self.reviewers.len(), "Reviewing document");
        for scene in pending {
            self.review_scene(scene.clone()).await?;
        }

        if let Some(store) = &self.store {
            if !self.session.config().persistence.save_every_scene {
                self.save()?;
            }
            store.create_rotating_backup()?;
        }
        Ok(self.report())
    }

    /// Review one scene: observe, fan out, parse, apply, commit and
    /// optionally save.
    ///
    /// # Errors
    /// Session phase or ordering errors, and persistence errors.
    pub async fn review_scene(&mut self, scene: SceneRecord) -> Result<SceneOutcome> {
        let span = info_span!(spans::REVIEW_SCENE, scene = scene.scene_number);
        self.review_scene_inner(scene).instrument(span).await
    }

    async fn review_scene_inner(&mut self, scene: SceneRecord) -> Result<SceneOutcome> {
        let n = scene.scene_number;
        self.session.observe_scene(scene.clone())?;
        let counters = self.session.counters();

        // Build every request before anything is spawned.
        let mut contexts = Vec::with_capacity(self.reviewers.len());
        let mut calls = JoinSet::new();
        for (idx, reviewer) in self.reviewers.iter().enumerate() {
            let context = self.session.context_for(reviewer.id())?;
            let request = build_request(
                &PromptInputs {
                    title: &self.title,
                    profile: reviewer.profile(),
                    context: &context,
                    scene: &scene,
                },
                &self.templates,
                self.session.config().provider(reviewer.profile().provider.as_deref()),
            );
            contexts.push(context);

            let provider = reviewer
                .profile()
                .provider
                .as_ref()
                .and_then(|name| self.named_providers.get(name))
                .unwrap_or(&self.default_provider)
                .clone();
            let semaphore = Arc::clone(&self.semaphore);
            let latency = Arc::clone(&self.latency);
            let call_span = info_span!(spans::REVIEWER_CALL, reviewer = %reviewer.id(), model = provider.model());
            calls.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (idx, Err(LlmError::Unavailable("review semaphore closed".into())));
                    };
                    let _timer = latency.time();
                    (idx, provider.chat(&request).await)
                }
                .instrument(call_span),
            );
        }
        SessionCounters::add(&counters.reviews_requested, self.reviewers.len() as u64);

        let mut replies: Vec<Option<std::result::Result<ChatResponse, LlmError>>> =
            (0..self.reviewers.len()).map(|_| None).collect();
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((idx, reply)) => replies[idx] = Some(reply),
                Err(e) => warn!(scene = n, error = %e, "Reviewer task panicked"),
            }
        }

        let mut failures = Vec::new();
        let mut parsed: Vec<(usize, ParsedFeedback)> = Vec::new();
        for (idx, reply) in replies.into_iter().enumerate() {
            let id = self.reviewers[idx].id().clone();
            let reason = match reply {
                Some(Ok(response)) => match parse_reply(&response.text, &id, &contexts[idx]) {
                    Ok(feedback) => {
                        debug!(reviewer = %id, format = ?feedback.format, latency_ms = response.latency_ms, "Parsed reply");
                        parsed.push((idx, feedback));
                        continue;
                    }
                    Err(e) => {
                        warn!(reviewer = %id, scene = n, error = %e, "Rejected reviewer reply");
                        SessionCounters::add(&counters.reviews_rejected, 1);
                        e.to_string()
                    }
                },
                Some(Err(e)) => {
                    warn!(reviewer = %id, scene = n, error = %e, "Reviewer call failed");
                    SessionCounters::add(&counters.reviews_failed, 1);
                    e.to_string()
                }
                None => {
                    SessionCounters::add(&counters.reviews_failed, 1);
                    "reviewer task panicked".to_string()
                }
            };
            self.reviewers[idx].record_failure(n);
            failures.push(ReviewFailure { reviewer: id, reason });
        }

        let mut updates: Vec<ReviewerUpdate> = parsed.iter().map(|(_, p)| p.update.clone()).collect();
        reconcile_closures(&mut updates, self.session.questions());
        let report = self.session.apply_updates(&updates);

        let mut feedback = Vec::with_capacity(report.applied.len());
        for rejected in &report.rejected {
            failures.push(ReviewFailure {
                reviewer: rejected.reviewer.clone(),
                reason: rejected.error.to_string(),
            });
        }
        for (idx, item) in parsed {
            let state = &mut self.reviewers[idx];
            let Some(applied) = report.applied.iter().find(|a| &a.reviewer == state.id()) else {
                state.record_failure(n);
                continue;
            };
            let affect = item.update.affect;
            feedback.push(SceneFeedback {
                reviewer: applied.reviewer.clone(),
                engagement: affect.engagement,
                enjoyment: affect.enjoyment,
                reaction: affect.reaction.clone(),
                raised: applied.raised.clone(),
                answered: applied.answered.clone(),
            });
            state.record(affect, item.character_opinions);
        }

        let CommitReport { evicted, pruned, .. } = self.session.commit_scene()?;
        if self.store.is_some() && self.session.config().persistence.save_every_scene {
            self.save()?;
        }

        info!(
            scene = n,
            applied = feedback.len(),
            failed = failures.len(),
            evicted = ?evicted,
            "Reviewed scene"
        );
        Ok(SceneOutcome {
            scene_number: n,
            feedback,
            failures,
            evicted,
            pruned,
        })
    }

    /// Save the session snapshot through the attached store.
    ///
    /// # Errors
    /// Persistence errors. Without a store this is a no-op.
    pub fn save(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save_session(&self.session.snapshot())?;
        SessionCounters::add(&self.session.counters().snapshots_saved, 1);
        Ok(())
    }

    /// Report on the review so far.
    #[must_use]
    pub fn report(&self) -> DocumentReport {
        DocumentReport {
            session_id: self.session.id(),
            title: self.title.clone(),
            scenes_reviewed: self.session.current_scene(),
            reviewers: self.reviewers.iter().map(ReviewerState::summary).collect(),
            open_questions: self
                .session
                .questions()
                .active_context(REPORT_QUESTIONS)
                .into_iter()
                .map(QuestionBrief::from)
                .collect(),
            counters: self.session.counters().snapshot(),
            latency: self.latency.percentiles(),
        }
    }
}

/// Two reviewers often answer the same question in the same scene. Only
/// the first close is kept; later ones become references so the rest of
/// those updates still apply.
fn reconcile_closures(updates: &mut [ReviewerUpdate], questions: &QuestionStore) {
    let mut closed: HashSet<QuestionId> =
        questions.iter().filter(|q| !q.is_open()).map(|q| q.question_id.clone()).collect();
    for update in updates {
        let (answered, late_answers): (Vec<_>, Vec<_>) = std::mem::take(&mut update.answered)
            .into_iter()
            .partition(|a| closed.insert(a.question_id.clone()));
        let (dismissed, late_dismissals): (Vec<_>, Vec<_>) = std::mem::take(&mut update.dismissed)
            .into_iter()
            .partition(|d| closed.insert(d.question_id.clone()));
        update.answered = answered;
        update.dismissed = dismissed;

        let late = late_answers
            .into_iter()
            .map(|a| a.question_id)
            .chain(late_dismissals.into_iter().map(|d| d.question_id));
        for id in late {
            if !update.referenced.contains(&id) {
                update.referenced.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use scenemind_core::config::SceneMindConfig;
    use scenemind_core::types::QuestionStatus;
    use scenemind_llm::ChatRequest;

    use crate::persona::PersonaSet;

    const PANEL: &str = r#"
[[persona]]
id = "max"
name = "Max"
reviewer_type = "blockbuster fan"
system_prompt = "You love explosions."

[[persona]]
id = "morgan"
name = "Morgan"
reviewer_type = "indie critic"
system_prompt = "You love long takes."

[[persona]]
id = "chris"
name = "Chris"
reviewer_type = "comedy lover"
system_prompt = "You love jokes."
"#;

    /// Answers each request synchronously from a closure.
    struct ScriptedProvider<F>(F);

    impl<F> ChatProvider for ScriptedProvider<F>
    where
        F: Fn(&ChatRequest) -> std::result::Result<String, LlmError> + Send + Sync,
    {
        fn chat(
            &self,
            request: &ChatRequest,
        ) -> impl std::future::Future<Output = std::result::Result<ChatResponse, LlmError>> + Send {
            let result = (self.0)(request).map(|text| ChatResponse {
                text,
                tokens_generated: 0,
                latency_ms: 1,
                model: "scripted".into(),
            });
            async move { result }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Sleeps on every call and records the peak number in flight.
    #[derive(Default)]
    struct SlowProvider {
        in_flight: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    impl ChatProvider for SlowProvider {
        fn chat(
            &self,
            _request: &ChatRequest,
        ) -> impl std::future::Future<Output = std::result::Result<ChatResponse, LlmError>> + Send {
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ChatResponse {
                    text: r#"{"engagement": 0.5, "enjoyment": 0.1}"#.into(),
                    tokens_generated: 0,
                    latency_ms: 20,
                    model: "slow".into(),
                })
            }
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    fn scripted<F>(reply: F) -> ScriptedProvider<F>
    where
        F: Fn(&ChatRequest) -> std::result::Result<String, LlmError> + Send + Sync,
    {
        ScriptedProvider(reply)
    }

    fn user_text(request: &ChatRequest) -> &str {
        request.messages.last().map_or("", |m| m.content.as_str())
    }

    fn system_text(request: &ChatRequest) -> &str {
        request.system_prompt().unwrap_or("")
    }

    fn panel() -> Vec<ReviewerProfile> {
        PersonaSet::from_toml(PANEL).expect("panel").select(&[]).expect("select")
    }

    fn session(window: usize) -> NarrativeSession {
        let mut config = SceneMindConfig::default();
        config.memory.window_size = window;
        NarrativeSession::new(config).expect("session")
    }

    fn screenplay(scenes: u32) -> Screenplay {
        Screenplay {
            title: Some("The Lighthouse".into()),
            scenes: (1..=scenes)
                .map(|n| {
                    SceneRecord::new(n, format!("INT. LIGHTHOUSE {n} - NIGHT"))
                        .with_action("The lamp turns.")
                        .with_dialogue("ELENA", &["Who's there?"])
                })
                .collect(),
            ..Screenplay::default()
        }
    }

    #[tokio::test]
    async fn reviews_whole_document() {
        let provider = scripted(|_: &ChatRequest| {
            Ok(r#"{"engagement": 0.8, "enjoyment": 0.75, "reaction": "Gripping."}"#.to_string())
        });
        let mut engine = ReviewEngine::new(session(5), panel(), provider).expect("engine");
        let report = engine.review_document(&screenplay(7)).await.expect("review");

        assert_eq!(report.title, "The Lighthouse");
        assert_eq!(report.scenes_reviewed, 7);
        assert_eq!(report.reviewers.len(), 3);
        for summary in &report.reviewers {
            assert_eq!(summary.scenes_reviewed, 7);
            assert_eq!(summary.favourite_scenes.len(), 7);
            assert_eq!(summary.last_reaction.as_deref(), Some("Gripping."));
        }
        assert_eq!(report.counters.reviews_requested, 21);
        assert_eq!(report.counters.scenes_committed, 7);
        assert_eq!(engine.session().memory().get_historical_digests().len(), 2);

        let digest = &engine.session().memory().get_historical_digests()[0];
        assert_eq!(digest.emotional_states_by_reviewer.len(), 3);
        assert_eq!(engine.latency().count(), 21);
    }

    #[tokio::test]
    async fn failed_and_unusable_replies_are_skipped() {
        let provider = scripted(|req: &ChatRequest| match system_text(req) {
            s if s.contains("Morgan") => Err(LlmError::Timeout(100)),
            s if s.contains("Chris") => Ok("I have no idea what to say.".to_string()),
            _ => Ok(r#"{"engagement": 0.6, "enjoyment": 0.2}"#.to_string()),
        });
        let mut engine = ReviewEngine::new(session(5), panel(), provider).expect("engine");
        let outcome = engine.review_scene(screenplay(1).scenes.remove(0)).await.expect("scene");

        assert_eq!(outcome.feedback.len(), 1);
        assert_eq!(outcome.feedback[0].reviewer, ReviewerId::new("max"));
        assert_eq!(outcome.failures.len(), 2);
        let counters = engine.session().counters().snapshot();
        assert_eq!(counters.reviews_failed, 1);
        assert_eq!(counters.reviews_rejected, 1);

        // The scene still advances with whatever readings were applied.
        assert_eq!(engine.session().current_scene(), 1);
        let summaries = engine.report().reviewers;
        assert_eq!(summaries[1].scenes_failed, vec![1]);
        assert_eq!(summaries[2].scenes_failed, vec![1]);
    }

    #[tokio::test]
    async fn concurrent_calls_respect_limit() {
        let mut config = SceneMindConfig::default();
        config.performance.max_concurrent_reviews = 2;
        let personas: String = (0..5)
            .map(|i| format!("[[persona]]\nid = \"r{i}\"\nname = \"R{i}\"\nreviewer_type = \"x\"\nsystem_prompt = \"x\"\n"))
            .collect();
        let personas = PersonaSet::from_toml(&personas).expect("personas").select(&[]).expect("select");

        let provider = SlowProvider::default();
        let peak = Arc::clone(&provider.peak);
        let mut engine =
            ReviewEngine::new(NarrativeSession::new(config).expect("session"), personas, provider).expect("engine");
        let outcome = engine.review_scene(screenplay(1).scenes.remove(0)).await.expect("scene");

        assert_eq!(outcome.feedback.len(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        // Applied in reviewer order regardless of completion order.
        let order: Vec<&str> = outcome.feedback.iter().map(|f| f.reviewer.as_str()).collect();
        assert_eq!(order, ["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn shared_answer_does_not_sink_second_reviewer() {
        let provider = scripted(|req: &ChatRequest| {
            let user = user_text(req);
            if user.contains("(Scene 1:") {
                if system_text(req).contains("Max") {
                    return Ok(r#"{"engagement": 0.7, "questions_raised": [{"text": "Who is knocking?", "weight": "critical"}]}"#.to_string());
                }
                return Ok(r#"{"engagement": 0.5}"#.to_string());
            }
            Ok(r#"{"engagement": 0.9, "questions_answered": [{"id": "Q_001", "answer": "The keeper."}]}"#.to_string())
        });
        let mut engine = ReviewEngine::new(session(5), panel(), provider).expect("engine");
        let mut scenes = screenplay(2).scenes.into_iter();
        engine.review_scene(scenes.next().expect("scene 1")).await.expect("scene 1");
        let outcome = engine.review_scene(scenes.next().expect("scene 2")).await.expect("scene 2");

        assert_eq!(outcome.feedback.len(), 3, "failures: {:?}", outcome.failures);
        assert_eq!(outcome.feedback[0].answered, vec![QuestionId("Q_001".into())]);
        assert!(outcome.feedback[1].answered.is_empty());
        let question = engine.session().questions().get(&QuestionId("Q_001".into())).expect("question");
        assert_eq!(question.status, QuestionStatus::Answered);
    }

    #[tokio::test]
    async fn saves_after_each_scene() {
        let store = SessionStore::open_in_memory(&SceneMindConfig::default().persistence).expect("store");
        let provider = scripted(|_: &ChatRequest| Ok(r#"{"engagement": 0.4, "enjoyment": -0.5}"#.to_string()));
        let mut engine = ReviewEngine::new(session(2), panel(), provider).expect("engine").with_store(store);
        let report = engine.review_document(&screenplay(4)).await.expect("review");

        assert_eq!(report.counters.snapshots_saved, 4);
        assert!(report.reviewers.iter().all(|r| r.disliked_scenes == vec![1, 2, 3, 4]));
        let store = engine.store().expect("store");
        let snapshot = store.load_session(&report.session_id).expect("load").expect("saved");
        assert_eq!(snapshot.state.current_scene, 4);
        assert_eq!(snapshot.digests.len(), 2);
    }

    #[tokio::test]
    async fn resumed_engine_skips_reviewed_scenes() {
        let provider = || scripted(|_: &ChatRequest| Ok(r#"{"engagement": 0.6, "enjoyment": 0.3}"#.to_string()));
        let mut first = ReviewEngine::new(session(2), panel(), provider()).expect("engine");
        let script = screenplay(5);
        for scene in script.scenes.iter().take(3) {
            first.review_scene(scene.clone()).await.expect("scene");
        }
        let snapshot = first.session().snapshot();

        let mut config = SceneMindConfig::default();
        config.memory.window_size = 2;
        let resumed = NarrativeSession::from_snapshot(config, snapshot).expect("resume");
        let mut second = ReviewEngine::new(resumed, panel(), provider()).expect("engine");
        assert_eq!(second.reviewers()[0].trajectory().count(), 3);

        let report = second.review_document(&script).await.expect("review");
        assert_eq!(report.scenes_reviewed, 5);
        assert!(report.reviewers.iter().all(|r| r.scenes_reviewed == 5));
    }

    #[test]
    fn empty_panel_is_rejected() {
        let provider = scripted(|_: &ChatRequest| Ok(String::new()));
        assert!(matches!(ReviewEngine::new(session(5), Vec::new(), provider), Err(ReviewError::Persona(_))));
    }
}
