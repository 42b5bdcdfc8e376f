//! Scene records: the unit of input the memory engine consumes.
//!
//! A [`SceneRecord`] is produced by the screenplay parser (or built by hand
//! with the `with_*` helpers) and is kept verbatim while it sits in the
//! recent window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::SceneNumber;

/// Kind of a single screenplay element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// Description / stage direction.
    Action,
    /// Character cue preceding dialogue.
    Character,
    /// A spoken line.
    Dialogue,
    /// `(beat)`-style direction inside dialogue.
    Parenthetical,
    /// `CUT TO:` and friends.
    Transition,
}

/// One element of a scene, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneElement {
    /// Element kind.
    pub kind: ElementKind,
    /// Trimmed text.
    pub text: String,
}

/// A full scene as delivered by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneRecord {
    /// Stable id, `SCENE_001` style.
    pub scene_id: String,
    /// 1-based position in the document.
    pub scene_number: SceneNumber,
    /// Full heading line, e.g. `INT. MANSION - LIBRARY - NIGHT`.
    pub heading: String,
    /// Location part of the heading.
    #[serde(default)]
    pub location: Option<String>,
    /// `DAY`, `NIGHT` …
    #[serde(default)]
    pub time_of_day: Option<String>,
    /// `INT`, `EXT`, `I/E` …
    #[serde(default)]
    pub interior_exterior: Option<String>,
    /// Elements in document order.
    #[serde(default)]
    pub elements: Vec<SceneElement>,
    /// Complete scene text including the heading.
    pub full_text: String,
    /// Ordered, unique.
    #[serde(default)]
    pub characters_present: Vec<String>,
    /// Ordered, unique; a subset of `characters_present`.
    #[serde(default)]
    pub characters_speaking: Vec<String>,
    /// Whitespace-separated words in `full_text`.
    #[serde(default)]
    pub word_count: u32,
}

impl SceneRecord {
    /// Start a scene with only its heading.
    #[must_use]
    pub fn new(scene_number: SceneNumber, heading: impl Into<String>) -> Self {
        let heading = heading.into();
        let parts = crate::screenplay::parse_heading(&heading);
        let mut scene = Self {
            scene_id: scene_id_for(scene_number),
            scene_number,
            location: parts.as_ref().map(|p| p.location.clone()),
            time_of_day: parts.as_ref().and_then(|p| p.time_of_day.clone()),
            interior_exterior: parts.map(|p| p.interior_exterior),
            heading,
            elements: Vec::new(),
            full_text: String::new(),
            characters_present: Vec::new(),
            characters_speaking: Vec::new(),
            word_count: 0,
        };
        scene.refresh_text();
        scene
    }

    /// Append an action line.
    #[must_use]
    pub fn with_action(mut self, text: impl Into<String>) -> Self {
        self.push(ElementKind::Action, text.into());
        self
    }

    /// Append a character cue followed by each of `lines` as dialogue.
    #[must_use]
    pub fn with_dialogue(mut self, speaker: &str, lines: &[&str]) -> Self {
        let name = speaker.trim().to_uppercase();
        self.push(ElementKind::Character, name.clone());
        for line in lines {
            self.push(ElementKind::Dialogue, (*line).to_string());
        }
        add_unique(&mut self.characters_present, &name);
        add_unique(&mut self.characters_speaking, &name);
        self
    }

    /// Mark a character as present without speaking.
    #[must_use]
    pub fn with_present(mut self, name: &str) -> Self {
        add_unique(&mut self.characters_present, &name.trim().to_uppercase());
        self
    }

    fn push(&mut self, kind: ElementKind, text: String) {
        self.elements.push(SceneElement { kind, text });
        self.refresh_text();
    }

    /// Rebuild `full_text` and `word_count` from heading and elements.
    pub fn refresh_text(&mut self) {
        let mut text = self.heading.clone();
        for element in &self.elements {
            text.push('\n');
            text.push_str(&element.text);
        }
        self.word_count = u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX);
        self.full_text = text;
    }

    /// Number of dialogue elements.
    #[must_use]
    pub fn dialogue_count(&self) -> usize {
        self.elements.iter().filter(|e| e.kind == ElementKind::Dialogue).count()
    }

    /// Dialogue lines in order.
    pub fn dialogue_lines(&self) -> impl Iterator<Item = &str> {
        self.elements
            .iter()
            .filter(|e| e.kind == ElementKind::Dialogue)
            .map(|e| e.text.as_str())
    }

    /// First action line, if any.
    #[must_use]
    pub fn first_action(&self) -> Option<&str> {
        self.elements
            .iter()
            .find(|e| e.kind == ElementKind::Action)
            .map(|e| e.text.as_str())
    }

    /// Dialogue elements attributed to each speaker by the preceding cue.
    #[must_use]
    pub fn lines_by_speaker(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        let mut speaker: Option<&str> = None;
        for element in &self.elements {
            match element.kind {
                ElementKind::Character => speaker = Some(element.text.as_str()),
                ElementKind::Dialogue => {
                    if let Some(name) = speaker {
                        *counts.entry(name.to_string()).or_insert(0) += 1;
                    }
                }
                ElementKind::Parenthetical => {}
                ElementKind::Action | ElementKind::Transition => speaker = None,
            }
        }
        counts
    }

    /// Location if parsed, else the raw heading.
    #[must_use]
    pub fn location_or_heading(&self) -> &str {
        self.location.as_deref().unwrap_or(&self.heading)
    }

    /// Character length of `full_text` (not bytes).
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.full_text.chars().count()
    }
}

/// `SCENE_{n:03}`.
#[must_use]
pub fn scene_id_for(scene_number: SceneNumber) -> String {
    format!("SCENE_{scene_number:03}")
}

fn add_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_tracks_characters_and_text() {
        let scene = SceneRecord::new(3, "INT. MANSION - LIBRARY - NIGHT")
            .with_action("Dust hangs in the lamplight.")
            .with_dialogue("john", &["Who's there?", "Show yourself."])
            .with_present("MARIA");

        assert_eq!(scene.scene_id, "SCENE_003");
        assert_eq!(scene.location.as_deref(), Some("MANSION - LIBRARY"));
        assert_eq!(scene.time_of_day.as_deref(), Some("NIGHT"));
        assert_eq!(scene.characters_present, vec!["JOHN", "MARIA"]);
        assert_eq!(scene.characters_speaking, vec!["JOHN"]);
        assert_eq!(scene.dialogue_count(), 2);
        assert!(scene.full_text.starts_with("INT. MANSION"));
        assert_eq!(scene.word_count, 16);
    }

    #[test]
    fn lines_are_attributed_to_the_preceding_cue() {
        let scene = SceneRecord::new(1, "EXT. DOCKS - DAY")
            .with_dialogue("ANA", &["One.", "Two."])
            .with_action("A gull screams.")
            .with_dialogue("BEN", &["Three."]);
        let counts = scene.lines_by_speaker();
        assert_eq!(counts.get("ANA"), Some(&2));
        assert_eq!(counts.get("BEN"), Some(&1));
    }
}
