//! Sliding-window scene memory.
//!
//! The last *N* scenes live in `recent` verbatim; everything older exists
//! only as a [`SceneDigest`] in `historical`. A scene crosses over exactly
//! once, at the moment a new scene would overflow the window, and the
//! caller must hand over its digest at that moment:
//!
//! ```text
//!   add_scene(s6, Some(digest(s1)))
//!
//!   recent:     [s1 s2 s3 s4 s5]  ──▶  [s2 s3 s4 s5 s6]
//!   historical: [..]              ──▶  [.. d1]
//! ```
//!
//! Compression happens strictly before the push: [`MemoryManager::peek_next_eviction`]
//! names the scene that needs a digest, and [`MemoryManager::add_scene`]
//! rejects a missing or mismatched digest before touching any state.

pub mod digest;

pub use digest::SceneDigest;

use std::collections::VecDeque;
use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use crate::affect::AffectRecord;
use crate::error::{Result, SceneMindError};
use crate::scene::SceneRecord;
use crate::types::{ReviewerId, SceneNumber};

/// Everything the manager remembers, for prompt building or export.
#[derive(Debug, Clone, Serialize)]
pub struct FullContext<'a> {
    /// Recent scenes, oldest first.
    pub recent_scenes: Vec<&'a SceneRecord>,
    /// All digests, oldest first.
    pub historical_digests: &'a [SceneDigest],
    /// Highest scene number admitted.
    pub total_scenes_processed: SceneNumber,
}

/// One point on a reviewer's emotional journey.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyPoint<'a> {
    /// Scene number.
    pub scene_number: SceneNumber,
    /// Scene id.
    pub scene_id: &'a str,
    /// The reading stored in the digest.
    pub emotional_state: &'a AffectRecord,
}

/// Memory filtered for one reviewer.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewerMemory<'a> {
    /// Recent scenes, oldest first.
    pub recent_scenes: Vec<&'a SceneRecord>,
    /// Digests carrying a reading from this reviewer.
    pub historical_digests: Vec<&'a SceneDigest>,
    /// The reviewer's readings across historical scenes.
    pub emotional_journey: Vec<JourneyPoint<'a>>,
    /// Highest scene number admitted.
    pub current_scene: SceneNumber,
}

/// Fixed-capacity FIFO of full scenes plus an append-only digest log.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    capacity: usize,
    recent: VecDeque<SceneRecord>,
    historical: Vec<SceneDigest>,
    current_scene: SceneNumber,
}

impl MemoryManager {
    /// Create an empty manager with a window of `capacity` scenes.
    ///
    /// # Errors
    /// [`SceneMindError::InvalidInput`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SceneMindError::InvalidInput("memory window must hold at least one scene".into()));
        }
        Ok(Self {
            capacity,
            recent: VecDeque::with_capacity(capacity),
            historical: Vec::new(),
            current_scene: 0,
        })
    }

    /// Rebuild a manager from persisted parts.
    ///
    /// # Errors
    /// [`SceneMindError::InvalidInput`] if the parts break the window invariants.
    pub fn restore(
        capacity: usize,
        current_scene: SceneNumber,
        recent: Vec<SceneRecord>,
        historical: Vec<SceneDigest>,
    ) -> Result<Self> {
        let mut manager = Self::new(capacity)?;
        if recent.len() > capacity {
            return Err(SceneMindError::InvalidInput(format!(
                "{} recent scenes exceed window of {capacity}",
                recent.len()
            )));
        }
        if !historical.is_empty() && recent.len() < capacity {
            return Err(SceneMindError::InvalidInput("digests present but window not full".into()));
        }
        let numbers = historical.iter().map(|d| d.scene_number).chain(recent.iter().map(|s| s.scene_number));
        let mut last = None;
        for n in numbers {
            if last.is_some_and(|l| n <= l) {
                return Err(SceneMindError::InvalidInput(format!("scene {n} out of order in saved memory")));
            }
            last = Some(n);
        }
        if last.is_some_and(|l| l > current_scene) {
            return Err(SceneMindError::InvalidInput("current scene behind saved memory".into()));
        }
        manager.recent = recent.into();
        manager.historical = historical;
        manager.current_scene = current_scene;
        Ok(manager)
    }

    /// Window size *N*.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the next admission will evict.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.recent.len() >= self.capacity
    }

    /// Highest scene number admitted so far (0 before the first).
    #[must_use]
    pub fn current_scene(&self) -> SceneNumber {
        self.current_scene
    }

    /// The scene the next admission will evict, if the window is full.
    #[must_use]
    pub fn peek_next_eviction(&self) -> Option<&SceneRecord> {
        if self.is_full() { self.recent.front() } else { None }
    }

    fn check_order(&self, scene: &SceneRecord) -> Result<()> {
        if self.current_scene > 0 && scene.scene_number <= self.current_scene {
            return Err(SceneMindError::OutOfOrder {
                last: self.current_scene,
                got: scene.scene_number,
            });
        }
        Ok(())
    }

    /// Admit `scene`, evicting the oldest recent scene if the window is full.
    ///
    /// When full, `digest` must be the digest of [`MemoryManager::peek_next_eviction`];
    /// when not full it must be `None`. Returns the evicted scene.
    ///
    /// # Errors
    /// [`SceneMindError::OutOfOrder`], [`SceneMindError::MissingDigest`],
    /// [`SceneMindError::DigestMismatch`] or [`SceneMindError::UnexpectedDigest`].
    /// Nothing is modified on error.
    pub fn add_scene(&mut self, scene: SceneRecord, digest: Option<SceneDigest>) -> Result<Option<SceneRecord>> {
        self.check_order(&scene)?;

        let oldest = self.peek_next_eviction().map(|s| s.scene_id.clone());
        let evicted = match (oldest, digest) {
            (Some(scene_id), None) => return Err(SceneMindError::MissingDigest { scene_id }),
            (Some(expected), Some(d)) if d.scene_id != expected => {
                return Err(SceneMindError::DigestMismatch { expected, got: d.scene_id });
            }
            (None, Some(d)) => return Err(SceneMindError::UnexpectedDigest { scene_id: d.scene_id }),
            (Some(_), Some(d)) => {
                self.historical.push(d);
                self.recent.pop_front()
            }
            (None, None) => None,
        };

        debug!(
            scene = scene.scene_number,
            evicted = ?evicted.as_ref().map(|s| s.scene_number),
            historical = self.historical.len(),
            "Admitted scene"
        );
        self.current_scene = scene.scene_number;
        self.recent.push_back(scene);
        Ok(evicted)
    }

    /// Admit `scene`, calling `compress` on the scene about to be evicted
    /// only when an eviction is due.
    ///
    /// # Errors
    /// Same as [`MemoryManager::add_scene`].
    pub fn admit_scene<F>(&mut self, scene: SceneRecord, compress: F) -> Result<Option<SceneRecord>>
    where
        F: FnOnce(&SceneRecord) -> SceneDigest,
    {
        self.check_order(&scene)?;
        let digest = self.peek_next_eviction().map(compress);
        self.add_scene(scene, digest)
    }

    /// Recent scenes, oldest first.
    pub fn get_recent_scenes(&self) -> impl DoubleEndedIterator<Item = &SceneRecord> + ExactSizeIterator {
        self.recent.iter()
    }

    /// All digests, oldest first.
    #[must_use]
    pub fn get_historical_digests(&self) -> &[SceneDigest] {
        &self.historical
    }

    /// Digest for a scene id, if it has aged out.
    #[must_use]
    pub fn digest_for_scene(&self, scene_id: &str) -> Option<&SceneDigest> {
        self.historical.iter().find(|d| d.scene_id == scene_id)
    }

    /// Recent scene by id.
    #[must_use]
    pub fn recent_scene(&self, scene_id: &str) -> Option<&SceneRecord> {
        self.recent.iter().find(|s| s.scene_id == scene_id)
    }

    /// Both tiers, unfiltered.
    #[must_use]
    pub fn get_full_context(&self) -> FullContext<'_> {
        FullContext {
            recent_scenes: self.recent.iter().collect(),
            historical_digests: &self.historical,
            total_scenes_processed: self.current_scene,
        }
    }

    /// Recent scenes plus the digests `reviewer` left a reading on.
    #[must_use]
    pub fn get_memory_for_reviewer(&self, reviewer: &ReviewerId) -> ReviewerMemory<'_> {
        let historical_digests: Vec<&SceneDigest> = self.historical.iter().filter(|d| d.has_reviewer(reviewer)).collect();
        let emotional_journey = historical_digests
            .iter()
            .filter_map(|d| {
                d.affect_for(reviewer).map(|state| JourneyPoint {
                    scene_number: d.scene_number,
                    scene_id: &d.scene_id,
                    emotional_state: state,
                })
            })
            .collect();
        ReviewerMemory {
            recent_scenes: self.recent.iter().collect(),
            historical_digests,
            emotional_journey,
            current_scene: self.current_scene,
        }
    }

    /// Human-readable description of the window state.
    #[must_use]
    pub fn context_summary(&self) -> String {
        let recent = self.recent.len();
        let historical = self.historical.len();
        let mut out = format!("Memory State (Scene {}):\n", self.current_scene);
        let _ = writeln!(out, "  Recent (full detail): {recent} scenes");
        let _ = writeln!(out, "  Historical (digests): {historical} scenes");
        let _ = writeln!(out, "  Total tracked: {} scenes", recent + historical);
        if !self.recent.is_empty() {
            let numbers: Vec<String> = self.recent.iter().map(|s| s.scene_number.to_string()).collect();
            let _ = writeln!(out, "  Recent window: Scenes [{}]", numbers.join(", "));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::{AffectRecord, ReviewerAffect};
    use crate::compressor::SceneCompressor;

    fn scene(n: SceneNumber) -> SceneRecord {
        SceneRecord::new(n, format!("INT. ROOM {n} - DAY")).with_action("Someone waits.")
    }

    fn digest(scene: &SceneRecord) -> SceneDigest {
        SceneCompressor::default().compress(scene, ReviewerAffect::new(), Vec::new(), Vec::new(), None)
    }

    fn filled(n: SceneNumber, capacity: usize) -> MemoryManager {
        let compressor = SceneCompressor::default();
        let mut memory = MemoryManager::new(capacity).expect("memory");
        for i in 1..=n {
            memory
                .admit_scene(scene(i), |old| compressor.compress(old, ReviewerAffect::new(), Vec::new(), Vec::new(), None))
                .expect("admit");
        }
        memory
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(MemoryManager::new(0).is_err());
    }

    #[test]
    fn window_fills_without_digests() {
        let memory = filled(3, 5);
        assert_eq!(memory.get_recent_scenes().len(), 3);
        assert!(memory.get_historical_digests().is_empty());
        assert!(memory.peek_next_eviction().is_none());
    }

    #[test]
    fn sixth_scene_needs_digest_of_first() {
        let mut memory = filled(5, 5);
        assert_eq!(memory.peek_next_eviction().map(|s| s.scene_number), Some(1));

        let err = memory.add_scene(scene(6), None).expect_err("missing");
        assert!(matches!(err, SceneMindError::MissingDigest { ref scene_id } if scene_id == "SCENE_001"));

        let wrong = digest(&scene(2));
        let err = memory.add_scene(scene(6), Some(wrong)).expect_err("mismatch");
        assert!(matches!(err, SceneMindError::DigestMismatch { ref expected, ref got } if expected == "SCENE_001" && got == "SCENE_002"));
        assert_eq!(memory.get_recent_scenes().len(), 5);
        assert!(memory.get_historical_digests().is_empty());
        assert_eq!(memory.current_scene(), 5);

        let first = memory.peek_next_eviction().map(digest).expect("full");
        let evicted = memory.add_scene(scene(6), Some(first)).expect("admit");
        assert_eq!(evicted.map(|s| s.scene_number), Some(1));
        assert_eq!(memory.get_historical_digests()[0].scene_id, "SCENE_001");
        let recent: Vec<_> = memory.get_recent_scenes().map(|s| s.scene_number).collect();
        assert_eq!(recent, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn digest_without_eviction_is_rejected() {
        let mut memory = filled(2, 5);
        let err = memory.add_scene(scene(3), Some(digest(&scene(1)))).expect_err("unexpected");
        assert!(matches!(err, SceneMindError::UnexpectedDigest { .. }));
        assert_eq!(memory.get_recent_scenes().len(), 2);
    }

    #[test]
    fn scene_numbers_must_increase() {
        let mut memory = filled(3, 5);
        assert!(matches!(
            memory.add_scene(scene(3), None),
            Err(SceneMindError::OutOfOrder { last: 3, got: 3 })
        ));
        assert!(memory.add_scene(scene(2), None).is_err());
        assert!(memory.add_scene(scene(7), None).is_ok());
    }

    #[test]
    fn admit_scene_only_compresses_on_eviction() {
        let mut memory = MemoryManager::new(2).expect("memory");
        let mut calls = 0;
        for n in 1..=4 {
            memory
                .admit_scene(scene(n), |old| {
                    calls += 1;
                    digest(old)
                })
                .expect("admit");
        }
        assert_eq!(calls, 2);
        let numbers: Vec<_> = memory.get_historical_digests().iter().map(|d| d.scene_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn eight_scenes_in_window_of_five() {
        let memory = filled(8, 5);
        let recent: Vec<_> = memory.get_recent_scenes().map(|s| s.scene_number).collect();
        let historical: Vec<_> = memory.get_historical_digests().iter().map(|d| d.scene_number).collect();
        assert_eq!(recent, vec![4, 5, 6, 7, 8]);
        assert_eq!(historical, vec![1, 2, 3]);
        assert!(memory.digest_for_scene("SCENE_002").is_some());
        assert!(memory.digest_for_scene("SCENE_004").is_none());
        assert!(memory.recent_scene("SCENE_004").is_some());
        assert_eq!(memory.get_full_context().total_scenes_processed, 8);
    }

    #[test]
    fn reviewer_memory_filters_digests() {
        let compressor = SceneCompressor::default();
        let critic = ReviewerId::new("critic");
        let mut memory = MemoryManager::new(1).expect("memory");
        for n in 1..=4 {
            memory
                .admit_scene(scene(n), |old| {
                    let mut affect = ReviewerAffect::new();
                    if old.scene_number % 2 == 1 {
                        affect.insert(critic.clone(), AffectRecord::new(old.scene_number, 0.6, 0.1));
                    }
                    compressor.compress(old, affect, Vec::new(), Vec::new(), None)
                })
                .expect("admit");
        }
        let view = memory.get_memory_for_reviewer(&critic);
        let scenes: Vec<_> = view.emotional_journey.iter().map(|p| p.scene_number).collect();
        assert_eq!(scenes, vec![1, 3]);
        assert_eq!(view.historical_digests.len(), 2);
        assert_eq!(view.recent_scenes.len(), 1);
        assert!(memory.get_memory_for_reviewer(&ReviewerId::new("nobody")).historical_digests.is_empty());
    }

    #[test]
    fn summary_lists_window() {
        let summary = filled(7, 5).context_summary();
        assert!(summary.starts_with("Memory State (Scene 7):"));
        assert!(summary.contains("Historical (digests): 2 scenes"));
        assert!(summary.contains("Recent window: Scenes [3, 4, 5, 6, 7]"));
    }

    #[test]
    fn restore_validates_shape() {
        let memory = filled(7, 5);
        let recent: Vec<_> = memory.get_recent_scenes().cloned().collect();
        let historical = memory.get_historical_digests().to_vec();

        let back = MemoryManager::restore(5, 7, recent.clone(), historical.clone()).expect("restore");
        assert_eq!(back.get_historical_digests(), memory.get_historical_digests());
        assert!(MemoryManager::restore(4, 7, recent.clone(), historical.clone()).is_err());
        assert!(MemoryManager::restore(5, 6, recent.clone(), historical).is_err());
        assert!(MemoryManager::restore(6, 7, recent, vec![digest(&scene(1))]).is_err());
    }
}
