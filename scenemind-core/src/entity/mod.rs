//! Entity tracking: characters, objects and locations across the document.
//!
//! Every distinct named thing gets exactly one [`Entity`], found by canonical
//! name or alias (case-insensitive). Entities are never deleted: a low
//! importance score only de-prioritises them.
//!
//! ## Importance
//!
//! [`Entity::importance_at`] is a pure function of the entity's state and the
//! reader's current scene:
//!
//! | term | weight |
//! |---|---|
//! | speaking lines / 10 | 0.25 |
//! | appearances / 5 | 0.20 |
//! | (last − first) / current | 0.15 |
//! | offscreen mentions / 5 | 0.15 |
//! | relationships / 3 | 0.10 |
//! | (critical + 0.5·high moments) / 3 | 0.15 |
//! | appeared within the last 3 scenes | +0.10 |
//!
//! Each term is clamped to `[0, 1]` before weighting; the sum is capped at 1.

pub mod tracking;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SceneMindError};
use crate::types::{
    is_recent, unit, EntityId, EntityType, ImportanceBand, NarrativeFunction, SceneNumber,
    Significance,
};

/// A significant moment in an entity's arc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMoment {
    /// Scene the moment happened in.
    pub scene_number: SceneNumber,
    /// What happened.
    pub description: String,
    /// How much it matters.
    pub significance: Significance,
}

/// A link from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// The other side.
    pub other_entity_id: EntityId,
    /// Display name of the other side when the link was made.
    pub other_name: String,
    /// Free-form type, e.g. `associate`, `rival`.
    pub relationship_type: String,
    /// Optional description of tension between the two.
    #[serde(default)]
    pub tension: Option<String>,
    /// Scene the relationship dates from.
    pub since_scene: SceneNumber,
}

/// A tracked character, object or location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id, `{TYPE}_{seq:03}`.
    pub entity_id: EntityId,
    /// Character, object or location.
    pub entity_type: EntityType,
    /// Canonical name.
    pub name: String,
    /// Other names resolving to this entity.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Earliest scene seen.
    pub first_appearance: SceneNumber,
    /// Latest scene seen.
    pub last_appearance: SceneNumber,
    /// Every scene seen, deduplicated and ordered.
    #[serde(default)]
    pub appearances: BTreeSet<SceneNumber>,
    /// Total dialogue lines (characters only).
    #[serde(default)]
    pub speaking_lines: u32,
    /// Scenes in which the entity spoke.
    #[serde(default)]
    pub dialogue_count: u32,
    /// Last computed importance; see [`Entity::importance_at`].
    #[serde(default)]
    pub importance_score: f32,
    /// Ordered key moments.
    #[serde(default)]
    pub key_moments: Vec<KeyMoment>,
    /// Links to other entities, one per other id.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Scenes where the entity was referenced without being present.
    #[serde(default)]
    pub mentioned_when_absent: BTreeSet<SceneNumber>,
    /// Inferred dramatic role.
    #[serde(default)]
    pub narrative_function: Option<NarrativeFunction>,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity {
    fn new(entity_id: EntityId, entity_type: EntityType, name: &str, scene: SceneNumber) -> Self {
        Self {
            entity_id,
            entity_type,
            name: name.trim().to_string(),
            aliases: Vec::new(),
            first_appearance: scene,
            last_appearance: scene,
            appearances: BTreeSet::from([scene]),
            speaking_lines: 0,
            dialogue_count: 0,
            importance_score: 0.0,
            key_moments: Vec::new(),
            relationships: Vec::new(),
            mentioned_when_absent: BTreeSet::new(),
            narrative_function: None,
            description: None,
        }
    }

    /// Whether `name` is the canonical name or one of the aliases.
    #[must_use]
    pub fn answers_to(&self, name: &str) -> bool {
        same_name(&self.name, name) || self.aliases.iter().any(|a| same_name(a, name))
    }

    /// Importance as seen from `current_scene`, without mutating anything.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn importance_at(&self, current_scene: SceneNumber) -> f32 {
        let ratio = |n: usize, d: f32| unit(n as f32 / d);

        let speaking = unit(self.speaking_lines as f32 / 10.0) * 0.25;
        let breadth = ratio(self.appearances.len(), 5.0) * 0.20;
        let span = if current_scene == 0 {
            0.0
        } else {
            let width = self.last_appearance.saturating_sub(self.first_appearance);
            unit(width as f32 / current_scene as f32) * 0.15
        };
        let mentions = ratio(self.mentioned_when_absent.len(), 5.0) * 0.15;
        let relationships = ratio(self.relationships.len(), 3.0) * 0.10;

        let critical = self.key_moments.iter().filter(|m| m.significance == Significance::Critical).count();
        let high = self.key_moments.iter().filter(|m| m.significance == Significance::High).count();
        let moments = unit((critical as f32 + high as f32 * 0.5) / 3.0) * 0.15;

        let recency = if is_recent(current_scene, self.last_appearance) { 0.10 } else { 0.0 };

        (speaking + breadth + span + mentions + relationships + moments + recency).min(1.0)
    }

    /// Band of the last computed score.
    #[must_use]
    pub fn band(&self) -> ImportanceBand {
        ImportanceBand::from_score(self.importance_score)
    }

    /// Scenes shared with `other`.
    #[must_use]
    pub fn shared_scenes(&self, other: &Entity) -> BTreeSet<SceneNumber> {
        self.appearances.intersection(&other.appearances).copied().collect()
    }

    /// Whether a relationship to `other` exists.
    #[must_use]
    pub fn is_linked_to(&self, other: &EntityId) -> bool {
        self.relationships.iter().any(|r| &r.other_entity_id == other)
    }
}

/// Per-type sequence counters backing generated ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounters {
    /// Characters created so far.
    pub character: u32,
    /// Objects created so far.
    pub object: u32,
    /// Locations created so far.
    pub location: u32,
}

impl IdCounters {
    fn next(&mut self, entity_type: EntityType) -> u32 {
        let slot = match entity_type {
            EntityType::Character => &mut self.character,
            EntityType::Object => &mut self.object,
            EntityType::Location => &mut self.location,
        };
        *slot += 1;
        *slot
    }
}

/// Entity names grouped by importance band.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportanceSummary {
    /// Names in the high band.
    pub high: Vec<String>,
    /// Names in the medium band.
    pub medium: Vec<String>,
    /// Names in the low band.
    pub low: Vec<String>,
}

/// Owns every tracked entity, in creation order.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
    counters: IdCounters,
}

impl EntityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted entities and counters.
    ///
    /// # Errors
    /// Returns [`SceneMindError::InvalidInput`] if two entities share an id.
    pub fn restore(entities: Vec<Entity>, counters: IdCounters) -> Result<Self> {
        let mut index = HashMap::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            if index.insert(entity.entity_id.clone(), i).is_some() {
                return Err(SceneMindError::InvalidInput(format!(
                    "duplicate entity id {}",
                    entity.entity_id
                )));
            }
        }
        Ok(Self { entities, index, counters })
    }

    /// Id counters, for persistence.
    #[must_use]
    pub fn counters(&self) -> IdCounters {
        self.counters
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Case-insensitive lookup: every canonical name first, then every alias.
    #[must_use]
    pub fn find_by_name_or_alias(&self, name: &str) -> Option<&Entity> {
        self.resolve(name).map(|i| &self.entities[i])
    }

    fn resolve(&self, name: &str) -> Option<usize> {
        self.entities
            .iter()
            .position(|e| same_name(&e.name, name))
            .or_else(|| {
                self.entities
                    .iter()
                    .position(|e| e.aliases.iter().any(|a| same_name(a, name)))
            })
    }

    /// Entity by id.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.index.get(id).map(|&i| &self.entities[i])
    }

    fn get_mut(&mut self, id: &EntityId) -> Result<&mut Entity> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.entities[i]),
            None => Err(SceneMindError::EntityNotFound(id.clone())),
        }
    }

    /// Resolve a reviewer-supplied reference that may be an id or a name.
    #[must_use]
    pub fn lookup(&self, id_or_name: &str) -> Option<&Entity> {
        self.get(&EntityId(id_or_name.to_string()))
            .or_else(|| self.find_by_name_or_alias(id_or_name))
    }

    /// All entities in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether nothing is tracked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Resolve `name` to a character, creating one first seen in `scene` if
    /// nothing resolves.
    ///
    /// # Errors
    /// Returns [`SceneMindError::InvalidInput`] for a blank name.
    pub fn get_or_create_character(&mut self, name: &str, scene: SceneNumber) -> Result<&mut Entity> {
        self.add_entity(name, EntityType::Character, scene, &[])
    }

    /// Create an entity unless `name` already resolves, in which case the
    /// existing entity is returned unchanged.
    ///
    /// # Errors
    /// Returns [`SceneMindError::InvalidInput`] for a blank name, or
    /// [`SceneMindError::AliasConflict`] if an alias belongs to another
    /// entity.
    pub fn add_entity(
        &mut self,
        name: &str,
        entity_type: EntityType,
        first_scene: SceneNumber,
        aliases: &[&str],
    ) -> Result<&mut Entity> {
        if name.trim().is_empty() {
            return Err(SceneMindError::InvalidInput("entity name is blank".into()));
        }
        if let Some(i) = self.resolve(name) {
            return Ok(&mut self.entities[i]);
        }
        for alias in aliases {
            if let Some(i) = self.resolve(alias) {
                return Err(SceneMindError::AliasConflict {
                    alias: (*alias).to_string(),
                    owner: self.entities[i].entity_id.clone(),
                });
            }
        }

        let seq = self.counters.next(entity_type);
        let mut entity = Entity::new(EntityId::generate(entity_type, seq), entity_type, name, first_scene);
        for alias in aliases {
            let alias = alias.trim();
            if !alias.is_empty() && !entity.answers_to(alias) {
                entity.aliases.push(alias.to_string());
            }
        }

        debug!(entity = %entity.entity_id, name = %entity.name, scene = first_scene, "Created entity");
        let i = self.entities.len();
        self.index.insert(entity.entity_id.clone(), i);
        self.entities.push(entity);
        Ok(&mut self.entities[i])
    }

    /// Register another name for an entity. Re-adding an existing name is a
    /// no-op.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`], [`SceneMindError::InvalidInput`]
    /// for a blank alias, or [`SceneMindError::AliasConflict`] if the alias
    /// already resolves elsewhere.
    pub fn add_alias(&mut self, id: &EntityId, alias: &str) -> Result<()> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(SceneMindError::InvalidInput("alias is blank".into()));
        }
        if !self.index.contains_key(id) {
            return Err(SceneMindError::EntityNotFound(id.clone()));
        }
        if let Some(i) = self.resolve(alias) {
            let owner = &self.entities[i].entity_id;
            if owner == id {
                return Ok(());
            }
            return Err(SceneMindError::AliasConflict {
                alias: alias.to_string(),
                owner: owner.clone(),
            });
        }
        self.get_mut(id)?.aliases.push(alias.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sightings
    // ------------------------------------------------------------------

    /// Record that the entity appears in `scene`. An offscreen mention already
    /// recorded for that scene is kept.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] for an unknown id.
    pub fn record_appearance(
        &mut self,
        id: &EntityId,
        scene: SceneNumber,
        spoke: bool,
        line_count: u32,
    ) -> Result<()> {
        let entity = self.get_mut(id)?;
        entity.appearances.insert(scene);
        entity.first_appearance = entity.first_appearance.min(scene);
        entity.last_appearance = entity.last_appearance.max(scene);
        if spoke {
            entity.speaking_lines += line_count;
            entity.dialogue_count += 1;
        }
        Ok(())
    }

    /// Record that the entity was referenced in `scene` without being present.
    /// Ignored if it appears in that scene.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] for an unknown id.
    pub fn record_mention(&mut self, id: &EntityId, scene: SceneNumber) -> Result<bool> {
        let entity = self.get_mut(id)?;
        if entity.appearances.contains(&scene) {
            return Ok(false);
        }
        Ok(entity.mentioned_when_absent.insert(scene))
    }

    /// Append a key moment.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] for an unknown id.
    pub fn add_key_moment(
        &mut self,
        id: &EntityId,
        scene: SceneNumber,
        description: impl Into<String>,
        significance: Significance,
    ) -> Result<()> {
        self.get_mut(id)?.key_moments.push(KeyMoment {
            scene_number: scene,
            description: description.into(),
            significance,
        });
        Ok(())
    }

    /// Add or update the relationship from `from` to `to`.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] if either side is unknown.
    pub fn add_relationship(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        relationship_type: &str,
        tension: Option<String>,
        since_scene: SceneNumber,
    ) -> Result<()> {
        let other_name = self
            .get(to)
            .map(|e| e.name.clone())
            .ok_or_else(|| SceneMindError::EntityNotFound(to.clone()))?;
        let entity = self.get_mut(from)?;
        if let Some(existing) = entity.relationships.iter_mut().find(|r| &r.other_entity_id == to) {
            existing.relationship_type = relationship_type.to_string();
            existing.tension = tension;
            return Ok(());
        }
        entity.relationships.push(Relationship {
            other_entity_id: to.clone(),
            other_name,
            relationship_type: relationship_type.to_string(),
            tension,
            since_scene,
        });
        Ok(())
    }

    /// Relate two entities in both directions.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] if either side is unknown.
    pub fn link(&mut self, a: &EntityId, b: &EntityId, relationship_type: &str, since_scene: SceneNumber) -> Result<()> {
        self.add_relationship(a, b, relationship_type, None, since_scene)?;
        self.add_relationship(b, a, relationship_type, None, since_scene)
    }

    /// Set the inferred dramatic role.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] for an unknown id.
    pub fn set_narrative_function(&mut self, id: &EntityId, function: Option<NarrativeFunction>) -> Result<()> {
        self.get_mut(id)?.narrative_function = function;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Importance
    // ------------------------------------------------------------------

    /// Recompute and cache one entity's importance at `current_scene`.
    ///
    /// # Errors
    /// [`SceneMindError::EntityNotFound`] for an unknown id.
    pub fn recompute_importance(&mut self, id: &EntityId, current_scene: SceneNumber) -> Result<f32> {
        let entity = self.get_mut(id)?;
        entity.importance_score = entity.importance_at(current_scene);
        Ok(entity.importance_score)
    }

    /// Re-score every entity at `current_scene`.
    pub fn recompute_all(&mut self, current_scene: SceneNumber) {
        for entity in &mut self.entities {
            entity.importance_score = entity.importance_at(current_scene);
        }
    }

    /// High-band entities, most important first.
    #[must_use]
    pub fn get_high_importance_entities(&self) -> Vec<&Entity> {
        let mut high: Vec<&Entity> = self
            .entities
            .iter()
            .filter(|e| e.band() == ImportanceBand::High)
            .collect();
        high.sort_by_key(|e| Reverse(OrderedFloat(e.importance_score)));
        high
    }

    /// The `k` most important entities; ties keep creation order.
    #[must_use]
    pub fn top_entities(&self, k: usize) -> Vec<&Entity> {
        let mut all: Vec<&Entity> = self.entities.iter().collect();
        all.sort_by_key(|e| Reverse(OrderedFloat(e.importance_score)));
        all.truncate(k);
        all
    }

    /// Entities that appear in `scene`.
    #[must_use]
    pub fn entities_in_scene(&self, scene: SceneNumber) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.appearances.contains(&scene)).collect()
    }

    /// Canonical names of every character.
    #[must_use]
    pub fn character_names(&self) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Character)
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Names grouped by band, using the last computed scores.
    #[must_use]
    pub fn importance_summary(&self) -> ImportanceSummary {
        let mut summary = ImportanceSummary::default();
        for entity in &self.entities {
            let bucket = match entity.band() {
                ImportanceBand::High => &mut summary.high,
                ImportanceBand::Medium => &mut summary.medium,
                ImportanceBand::Low => &mut summary.low,
            };
            bucket.push(entity.name.clone());
        }
        summary
    }

    /// Count of entities per type.
    #[must_use]
    pub fn type_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for entity in &self.entities {
            *counts.entry(entity.entity_type.tag()).or_insert(0) += 1;
        }
        counts
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}
