//! Per-scene entity tracking heuristics.
//!
//! [`SceneTracker::track_scene`] folds one parsed scene into an
//! [`EntityStore`]: appearances and dialogue counts, the heading location,
//! offscreen mentions, first-appearance / long-absence key moments, and
//! co-presence relationships. Name matching is an alias-table lookup, not
//! coreference resolution.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::EntityStore;
use crate::config::EntityConfig;
use crate::error::Result;
use crate::scene::SceneRecord;
use crate::types::{EntityId, EntityType, NarrativeFunction, Significance};

/// What a single `track_scene` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackingReport {
    /// Entities created by this scene.
    pub created: Vec<EntityId>,
    /// Characters recorded as present, in scene order.
    pub present: Vec<EntityId>,
    /// Characters mentioned without being present.
    pub mentioned: Vec<EntityId>,
    /// Location entity for the heading, if tracked.
    pub location: Option<EntityId>,
    /// Bidirectional links created.
    pub new_links: usize,
}

/// Applies tracking heuristics using an injected alias table.
#[derive(Debug, Clone)]
pub struct SceneTracker {
    aliases: BTreeMap<String, String>,
    config: EntityConfig,
}

impl SceneTracker {
    /// Build a tracker from the `[entities]` config section.
    #[must_use]
    pub fn new(config: &EntityConfig) -> Self {
        let aliases = config
            .aliases
            .iter()
            .map(|(alias, canonical)| (alias.trim().to_uppercase(), canonical.trim().to_string()))
            .collect();
        Self {
            aliases,
            config: config.clone(),
        }
    }

    /// Canonical name for a raw character name, via the alias table.
    #[must_use]
    pub fn canonical<'a>(&'a self, raw: &'a str) -> &'a str {
        self.aliases
            .get(&raw.trim().to_uppercase())
            .map_or(raw.trim(), String::as_str)
    }

    /// Fold `scene` into `store`.
    ///
    /// # Errors
    /// Propagates store errors; none are expected for well-formed scenes.
    pub fn track_scene(&self, store: &mut EntityStore, scene: &SceneRecord) -> Result<TrackingReport> {
        let n = scene.scene_number;
        let lines = scene.lines_by_speaker();
        let mut report = TrackingReport::default();

        for raw in &scene.characters_present {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let previous = store.find_by_name_or_alias(raw).map(|e| e.last_appearance);
            let resolved_name = if previous.is_some() { raw } else { self.canonical(raw) };
            let previous = previous.or_else(|| store.find_by_name_or_alias(resolved_name).map(|e| e.last_appearance));

            let id = store.get_or_create_character(resolved_name, n)?.entity_id.clone();
            if resolved_name != raw {
                store.add_alias(&id, raw)?;
            }

            let spoke = scene.characters_speaking.iter().any(|s| s.trim() == raw);
            let line_count = lines.get(raw).copied().unwrap_or(0);
            store.record_appearance(&id, n, spoke, line_count)?;

            match previous {
                None => {
                    let name = store.get(&id).map(|e| e.name.clone()).unwrap_or_default();
                    store.add_key_moment(&id, n, format!("First appearance of {name}"), Significance::Medium)?;
                    report.created.push(id.clone());
                }
                Some(last) if n.saturating_sub(last) > self.config.absence_gap => {
                    let name = store.get(&id).map(|e| e.name.clone()).unwrap_or_default();
                    let gap = n - last;
                    store.add_key_moment(
                        &id,
                        n,
                        format!("{name} returns after {gap} scene absence"),
                        Significance::High,
                    )?;
                }
                Some(_) => {}
            }

            if !report.present.contains(&id) {
                report.present.push(id);
            }
        }

        if self.config.track_locations {
            if let Some(location) = scene.location.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                let existed = store.find_by_name_or_alias(location).is_some();
                let id = store.add_entity(location, EntityType::Location, n, &[])?.entity_id.clone();
                store.record_appearance(&id, n, false, 0)?;
                if !existed {
                    report.created.push(id.clone());
                }
                report.location = Some(id);
            }
        }

        if self.config.track_mentions {
            report.mentioned = self.record_mentions(store, scene, &report.present)?;
        }

        report.new_links = self.link_co_present(store, &report.present)?;

        debug!(
            scene = n,
            present = report.present.len(),
            created = report.created.len(),
            mentioned = report.mentioned.len(),
            links = report.new_links,
            "Tracked scene entities"
        );
        Ok(report)
    }

    fn record_mentions(
        &self,
        store: &mut EntityStore,
        scene: &SceneRecord,
        present: &[EntityId],
    ) -> Result<Vec<EntityId>> {
        let text = scene.full_text.to_lowercase();
        let absent: Vec<EntityId> = store
            .iter()
            .filter(|e| e.entity_type == EntityType::Character && !present.contains(&e.entity_id))
            .filter(|e| {
                std::iter::once(&e.name)
                    .chain(e.aliases.iter())
                    .any(|name| contains_word(&text, &name.to_lowercase()))
            })
            .map(|e| e.entity_id.clone())
            .collect();

        let mut mentioned = Vec::new();
        for id in absent {
            if store.record_mention(&id, scene.scene_number)? {
                mentioned.push(id);
            }
        }
        Ok(mentioned)
    }

    fn link_co_present(&self, store: &mut EntityStore, present: &[EntityId]) -> Result<usize> {
        let mut links = 0;
        for (i, a) in present.iter().enumerate() {
            for b in &present[i + 1..] {
                let (Some(ea), Some(eb)) = (store.get(a), store.get(b)) else {
                    continue;
                };
                if ea.is_linked_to(b) {
                    continue;
                }
                let shared = ea.shared_scenes(eb);
                if shared.len() >= self.config.relationship_min_shared {
                    let since = shared.first().copied().unwrap_or_default();
                    store.link(a, b, "associate", since)?;
                    links += 1;
                }
            }
        }
        Ok(links)
    }
}

/// Assign protagonist / antagonist-potential / supporting roles from the last
/// computed scores. Call after `recompute_all`. Every character's role is
/// cleared first, so one that has left the high band loses it.
///
/// # Errors
/// Propagates store errors.
pub fn assign_narrative_functions(store: &mut EntityStore) -> Result<()> {
    let characters: Vec<EntityId> = store
        .iter()
        .filter(|e| e.entity_type == EntityType::Character && e.narrative_function.is_some())
        .map(|e| e.entity_id.clone())
        .collect();
    for id in &characters {
        store.set_narrative_function(id, None)?;
    }

    let ranked: Vec<(EntityId, u32, f32, usize)> = store
        .get_high_importance_entities()
        .into_iter()
        .filter(|e| e.entity_type == EntityType::Character)
        .map(|e| (e.entity_id.clone(), e.first_appearance, e.importance_score, e.relationships.len()))
        .collect();

    for (rank, (id, first, score, relationships)) in ranked.into_iter().enumerate() {
        let function = if rank == 0 {
            Some(NarrativeFunction::Protagonist)
        } else if first > 3 && score > 0.75 {
            Some(NarrativeFunction::AntagonistPotential)
        } else if relationships >= 2 {
            Some(NarrativeFunction::Supporting)
        } else {
            None
        };
        if function.is_some() {
            store.set_narrative_function(&id, function)?;
        }
    }
    Ok(())
}

/// Whole-word, already-lowercased substring test.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '\'';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImportanceBand;

    fn tracker() -> SceneTracker {
        let mut config = EntityConfig::default();
        config.aliases.insert("MAID".into(), "MARIA".into());
        config.aliases.insert("THE MAID".into(), "MARIA".into());
        SceneTracker::new(&config)
    }

    #[test]
    fn alias_table_folds_names_into_one_entity() {
        let mut store = EntityStore::new();
        let t = tracker();
        t.track_scene(&mut store, &SceneRecord::new(1, "INT. HALL - DAY").with_present("MARIA"))
            .expect("scene 1");
        t.track_scene(&mut store, &SceneRecord::new(2, "INT. HALL - DAY").with_dialogue("MAID", &["Yes, sir."]))
            .expect("scene 2");

        let maria = store.find_by_name_or_alias("MARIA").expect("maria");
        assert_eq!(store.find_by_name_or_alias("maid").map(|e| &e.entity_id), Some(&maria.entity_id));
        assert_eq!(maria.aliases, vec!["MAID"]);
        assert_eq!(maria.speaking_lines, 1);
        assert_eq!(maria.appearances.len(), 2);
    }

    #[test]
    fn alias_first_sighting_creates_canonical_entity() {
        let mut store = EntityStore::new();
        tracker()
            .track_scene(&mut store, &SceneRecord::new(1, "INT. HALL - DAY").with_present("THE MAID"))
            .expect("scene");
        let entity = store.find_by_name_or_alias("THE MAID").expect("entity");
        assert_eq!(entity.name, "MARIA");
        assert_eq!(entity.key_moments[0].description, "First appearance of MARIA");
    }

    #[test]
    fn speakers_get_line_counts_and_location_is_tracked() {
        let mut store = EntityStore::new();
        let scene = SceneRecord::new(1, "EXT. DOCKS - NIGHT")
            .with_dialogue("JOHN", &["Line one.", "Line two."])
            .with_present("ELLA");
        let report = tracker().track_scene(&mut store, &scene).expect("track");

        let john = store.find_by_name_or_alias("JOHN").expect("john");
        assert_eq!(john.speaking_lines, 2);
        assert_eq!(john.dialogue_count, 1);
        let ella = store.find_by_name_or_alias("ELLA").expect("ella");
        assert_eq!(ella.speaking_lines, 0);
        let docks = store.find_by_name_or_alias("DOCKS").expect("location");
        assert_eq!(docks.entity_type, EntityType::Location);
        assert_eq!(report.location.as_ref(), Some(&docks.entity_id));
        assert_eq!(report.created.len(), 3);
    }

    #[test]
    fn long_absence_is_a_high_key_moment() {
        let mut store = EntityStore::new();
        let t = tracker();
        t.track_scene(&mut store, &SceneRecord::new(1, "INT. A - DAY").with_present("GHOST")).expect("1");
        t.track_scene(&mut store, &SceneRecord::new(13, "INT. A - DAY").with_present("GHOST")).expect("13");
        let ghost = store.find_by_name_or_alias("GHOST").expect("ghost");
        let last = ghost.key_moments.last().expect("moment");
        assert_eq!(last.significance, Significance::High);
        assert_eq!(last.description, "GHOST returns after 12 scene absence");
    }

    #[test]
    fn co_presence_links_after_two_shared_scenes() {
        let mut store = EntityStore::new();
        let t = tracker();
        let pair = |n| SceneRecord::new(n, "INT. CAR - NIGHT").with_present("ANA").with_present("BEN");
        assert_eq!(t.track_scene(&mut store, &pair(1)).expect("1").new_links, 0);
        assert_eq!(t.track_scene(&mut store, &pair(2)).expect("2").new_links, 1);
        assert_eq!(t.track_scene(&mut store, &pair(3)).expect("3").new_links, 0);

        let ana = store.find_by_name_or_alias("ANA").expect("ana");
        assert_eq!(ana.relationships.len(), 1);
        assert_eq!(ana.relationships[0].relationship_type, "associate");
        assert_eq!(ana.relationships[0].since_scene, 1);
    }

    #[test]
    fn offscreen_mentions_are_recorded() {
        let mut store = EntityStore::new();
        let t = tracker();
        t.track_scene(&mut store, &SceneRecord::new(1, "INT. A - DAY").with_present("MARIA")).expect("1");
        let scene = SceneRecord::new(2, "INT. B - DAY").with_dialogue("JOHN", &["Where is Maria tonight?"]);
        let report = t.track_scene(&mut store, &scene).expect("2");
        let maria = store.find_by_name_or_alias("MARIA").expect("maria");
        assert_eq!(report.mentioned, vec![maria.entity_id.clone()]);
        assert!(maria.mentioned_when_absent.contains(&2));
    }

    #[test]
    fn whole_word_matching() {
        assert!(contains_word("where is maria?", "maria"));
        assert!(!contains_word("mariachi band", "maria"));
        assert!(!contains_word("anything", ""));
    }

    #[test]
    fn narrative_functions_follow_ranking() {
        let mut store = EntityStore::new();
        let lead = store.get_or_create_character("LEAD", 1).expect("lead").entity_id.clone();
        let late = store.get_or_create_character("LATE", 5).expect("late").entity_id.clone();
        for scene in 1..=10 {
            store.record_appearance(&lead, scene, true, 3).expect("lead");
        }
        for scene in 5..=10 {
            store.record_appearance(&late, scene, true, 3).expect("late");
        }
        store.add_key_moment(&late, 9, "Reveal", Significance::Critical).expect("moment");
        store.add_key_moment(&lead, 9, "Reveal", Significance::Critical).expect("moment");
        store.link(&lead, &late, "rival", 5).expect("link");
        for extra in ["X", "Y"] {
            let id = store.get_or_create_character(extra, 1).expect("extra").entity_id.clone();
            store.link(&lead, &id, "associate", 1).expect("link");
            store.link(&late, &id, "associate", 5).expect("link");
        }
        // LEAD ≈ 0.835, LATE ≈ 0.775
        store.recompute_all(10);
        assign_narrative_functions(&mut store).expect("assign");

        assert_eq!(store.get(&lead).and_then(|e| e.narrative_function), Some(NarrativeFunction::Protagonist));
        assert_eq!(
            store.get(&late).and_then(|e| e.narrative_function),
            Some(NarrativeFunction::AntagonistPotential)
        );
    }

    #[test]
    fn roles_move_when_the_lead_changes() {
        let mut store = EntityStore::new();
        let ana = store.get_or_create_character("ANA", 1).expect("ana").entity_id.clone();
        for scene in 1..=6 {
            store.record_appearance(&ana, scene, true, 3).expect("ana");
        }
        store.add_key_moment(&ana, 2, "Arrival", Significance::Critical).expect("moment");
        store.add_key_moment(&ana, 4, "Theft", Significance::Critical).expect("moment");
        store.recompute_all(6);
        assign_narrative_functions(&mut store).expect("assign");
        assert_eq!(store.get(&ana).and_then(|e| e.narrative_function), Some(NarrativeFunction::Protagonist));

        let vera = store.get_or_create_character("VERA", 7).expect("vera").entity_id.clone();
        for scene in 7..=20 {
            store.record_appearance(&vera, scene, true, 3).expect("vera");
        }
        for scene in [9, 12, 15] {
            store.add_key_moment(&vera, scene, "Turn", Significance::Critical).expect("moment");
        }
        store.recompute_all(20);
        assign_narrative_functions(&mut store).expect("reassign");

        let ana = store.get(&ana).expect("ana");
        assert_ne!(ana.band(), ImportanceBand::High);
        assert_eq!(ana.narrative_function, None);
        let protagonists = store
            .iter()
            .filter(|e| e.narrative_function == Some(NarrativeFunction::Protagonist))
            .count();
        assert_eq!(protagonists, 1);
        assert_eq!(store.get(&vera).and_then(|e| e.narrative_function), Some(NarrativeFunction::Protagonist));
    }
}
