//! Per-reviewer running state across a document.

use std::collections::BTreeMap;

use serde::Serialize;

use scenemind_core::affect::{AffectRecord, AffectRevision};
use scenemind_core::session::NarrativeSession;
use scenemind_core::types::{ReviewerId, SceneNumber};

use crate::error::{ReviewError, Result};
use crate::persona::ReviewerProfile;

/// Enjoyment above this marks a favourite scene.
pub const FAVOURITE_THRESHOLD: f32 = 0.7;
/// Enjoyment below this marks a disliked scene.
pub const DISLIKED_THRESHOLD: f32 = -0.3;

/// A reviewer's readings so far and what they make of the characters.
#[derive(Debug, Clone)]
pub struct ReviewerState {
    profile: ReviewerProfile,
    id: ReviewerId,
    trajectory: BTreeMap<SceneNumber, AffectRecord>,
    character_opinions: BTreeMap<String, String>,
    failed_scenes: Vec<SceneNumber>,
}

impl ReviewerState {
    /// Fresh state for `profile`.
    #[must_use]
    pub fn new(profile: ReviewerProfile) -> Self {
        let id = profile.reviewer_id();
        Self {
            profile,
            id,
            trajectory: BTreeMap::new(),
            character_opinions: BTreeMap::new(),
            failed_scenes: Vec::new(),
        }
    }

    /// Rebuild the trajectory from a resumed session: digested affect plus
    /// affect still pending on the recent window. Character opinions are not
    /// persisted and start empty.
    #[must_use]
    pub fn resume(profile: ReviewerProfile, session: &NarrativeSession) -> Self {
        let mut state = Self::new(profile);
        let digested = session
            .memory()
            .get_historical_digests()
            .iter()
            .filter_map(|d| d.affect_for(&state.id));
        let pending = session.pending_affect().values().filter_map(|a| a.get(&state.id));
        for record in digested.chain(pending) {
            state.trajectory.insert(record.scene_number, record.clone());
        }
        state
    }

    /// Persona behind this reviewer.
    #[must_use]
    pub fn profile(&self) -> &ReviewerProfile {
        &self.profile
    }

    /// Store id of this reviewer.
    #[must_use]
    pub fn id(&self) -> &ReviewerId {
        &self.id
    }

    /// Record an applied reading and any updated character opinions.
    pub fn record(&mut self, affect: AffectRecord, opinions: BTreeMap<String, String>) {
        self.trajectory.insert(affect.scene_number, affect);
        self.character_opinions.extend(opinions);
    }

    /// Note a scene this reviewer produced no reading for.
    pub fn record_failure(&mut self, scene: SceneNumber) {
        self.failed_scenes.push(scene);
    }

    /// Revise an earlier reading in this reviewer's own record. The stores
    /// keep what was recorded at the time.
    ///
    /// # Errors
    /// [`ReviewError::NoReading`] if the reviewer has no reading for `scene`.
    pub fn revise_affect(&mut self, scene: SceneNumber, revision: &AffectRevision, note: &str) -> Result<()> {
        let record = self.trajectory.get_mut(&scene).ok_or(ReviewError::NoReading(scene))?;
        record.revise(revision, note);
        Ok(())
    }

    /// Readings in scene order.
    pub fn trajectory(&self) -> impl Iterator<Item = &AffectRecord> {
        self.trajectory.values()
    }

    /// Reading for one scene.
    #[must_use]
    pub fn reading(&self, scene: SceneNumber) -> Option<&AffectRecord> {
        self.trajectory.get(&scene)
    }

    /// Latest opinion per character.
    #[must_use]
    pub fn character_opinions(&self) -> &BTreeMap<String, String> {
        &self.character_opinions
    }

    /// Mean engagement over all readings, 0 when there are none.
    #[must_use]
    pub fn overall_engagement(&self) -> f32 {
        self.mean(|a| a.engagement)
    }

    /// Mean enjoyment over all readings, 0 when there are none.
    #[must_use]
    pub fn overall_enjoyment(&self) -> f32 {
        self.mean(|a| a.enjoyment)
    }

    /// Scenes with enjoyment above [`FAVOURITE_THRESHOLD`].
    #[must_use]
    pub fn favourite_scenes(&self) -> Vec<SceneNumber> {
        self.scenes_where(|a| a.enjoyment > FAVOURITE_THRESHOLD)
    }

    /// Scenes with enjoyment below [`DISLIKED_THRESHOLD`].
    #[must_use]
    pub fn disliked_scenes(&self) -> Vec<SceneNumber> {
        self.scenes_where(|a| a.enjoyment < DISLIKED_THRESHOLD)
    }

    /// End-of-document summary.
    #[must_use]
    pub fn summary(&self) -> ReviewerSummary {
        ReviewerSummary {
            reviewer: self.id.clone(),
            name: self.profile.name.clone(),
            reviewer_type: self.profile.reviewer_type.clone(),
            scenes_reviewed: self.trajectory.len(),
            scenes_failed: self.failed_scenes.clone(),
            overall_engagement: self.overall_engagement(),
            overall_enjoyment: self.overall_enjoyment(),
            favourite_scenes: self.favourite_scenes(),
            disliked_scenes: self.disliked_scenes(),
            character_opinions: self.character_opinions.clone(),
            last_reaction: self.trajectory.values().rev().find_map(|a| a.reaction.clone()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self, field: impl Fn(&AffectRecord) -> f32) -> f32 {
        if self.trajectory.is_empty() {
            return 0.0;
        }
        self.trajectory.values().map(field).sum::<f32>() / self.trajectory.len() as f32
    }

    fn scenes_where(&self, pred: impl Fn(&AffectRecord) -> bool) -> Vec<SceneNumber> {
        self.trajectory.values().filter(|a| pred(a)).map(|a| a.scene_number).collect()
    }
}

/// What one reviewer thought of the whole document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewerSummary {
    /// Reviewer id.
    pub reviewer: ReviewerId,
    /// Persona name.
    pub name: String,
    /// Persona kind.
    pub reviewer_type: String,
    /// Scenes with an applied reading.
    pub scenes_reviewed: usize,
    /// Scenes whose call failed or whose reply was rejected.
    pub scenes_failed: Vec<SceneNumber>,
    /// Mean engagement.
    pub overall_engagement: f32,
    /// Mean enjoyment.
    pub overall_enjoyment: f32,
    /// Scenes enjoyed most.
    pub favourite_scenes: Vec<SceneNumber>,
    /// Scenes enjoyed least.
    pub disliked_scenes: Vec<SceneNumber>,
    /// Latest opinion per character.
    pub character_opinions: BTreeMap<String, String>,
    /// Most recent free-text reaction.
    pub last_reaction: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenemind_core::config::SceneMindConfig;
    use scenemind_core::scene::SceneRecord;
    use scenemind_core::session::ReviewerUpdate;

    fn profile() -> ReviewerProfile {
        ReviewerProfile {
            id: "max".into(),
            name: "Max".into(),
            reviewer_type: "blockbuster fan".into(),
            weights: crate::persona::AspectWeights::default(),
            traits: crate::persona::Traits::default(),
            genre_preferences: BTreeMap::new(),
            system_prompt: "You like explosions.".into(),
            feedback_style: "casual".into(),
            description: String::new(),
            provider: None,
        }
    }

    #[test]
    fn averages_and_extremes() {
        let mut state = ReviewerState::new(profile());
        state.record(AffectRecord::new(1, 0.8, 0.9), BTreeMap::new());
        state.record(AffectRecord::new(2, 0.4, -0.5), BTreeMap::new());
        state.record(AffectRecord::new(3, 0.6, 0.1).with_reaction("Fine."), BTreeMap::new());

        assert!((state.overall_engagement() - 0.6).abs() < 1e-6);
        assert!((state.overall_enjoyment() - 0.5 / 3.0).abs() < 1e-6);
        assert_eq!(state.favourite_scenes(), vec![1]);
        assert_eq!(state.disliked_scenes(), vec![2]);
        assert_eq!(state.summary().last_reaction.as_deref(), Some("Fine."));
    }

    #[test]
    fn opinions_keep_latest() {
        let mut state = ReviewerState::new(profile());
        let first = BTreeMap::from([("ELENA".to_string(), "Brave.".to_string())]);
        let later = BTreeMap::from([("ELENA".to_string(), "Reckless.".to_string())]);
        state.record(AffectRecord::new(1, 0.5, 0.0), first);
        state.record(AffectRecord::new(2, 0.5, 0.0), later);
        assert_eq!(state.character_opinions()["ELENA"], "Reckless.");
    }

    #[test]
    fn revision_moves_averages_and_marks_record() {
        let mut state = ReviewerState::new(profile());
        state.record(AffectRecord::new(4, 0.5, 0.2), BTreeMap::new());
        state
            .revise_affect(4, &AffectRevision { enjoyment: Some(0.9), ..AffectRevision::default() }, "the twist paid it off")
            .expect("revise");

        let record = state.reading(4).expect("reading");
        assert!(record.revised);
        assert_eq!(record.revision_note.as_deref(), Some("the twist paid it off"));
        assert_eq!(state.favourite_scenes(), vec![4]);
        assert!(matches!(state.revise_affect(9, &AffectRevision::default(), "x"), Err(ReviewError::NoReading(9))));
    }

    #[test]
    fn resume_collects_digested_and_pending_readings() {
        let mut config = SceneMindConfig::default();
        config.memory.window_size = 2;
        let mut session = NarrativeSession::new(config).expect("session");
        let id = ReviewerId::new("max");
        for n in 1..=4 {
            session
                .observe_scene(SceneRecord::new(n, format!("INT. ROOM {n} - DAY")).with_action("Rain."))
                .expect("observe");
            #[allow(clippy::cast_precision_loss)]
            let update = ReviewerUpdate::new(id.clone(), AffectRecord::new(n, 0.1 * n as f32, 0.0));
            session.apply_update(&update).expect("apply");
            session.commit_scene().expect("commit");
        }

        let state = ReviewerState::resume(profile(), &session);
        let scenes: Vec<SceneNumber> = state.trajectory().map(|a| a.scene_number).collect();
        assert_eq!(scenes, vec![1, 2, 3, 4]);
    }
}
