//! Fountain screenplay parser.
//!
//! Turns plain-text screenplays into [`SceneRecord`]s. This is deliberately a
//! small subset of <https://fountain.io/syntax>:
//!
//! - title page `Key: value` lines up to the first blank line (or `===`)
//! - scene headings starting with `INT`, `EXT`, `EST`, `INT./EXT.`, `I/E`
//! - character cues (all caps, optional extension such as `(V.O.)`) followed
//!   by dialogue and parentheticals
//! - transitions ending in `TO:`
//! - everything else is action
//!
//! Characters named in all caps inside action lines count as present when
//! they speak somewhere in the script.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scene::{scene_id_for, ElementKind, SceneElement, SceneRecord};
use crate::types::SceneNumber;

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(INT\./EXT\.|INT/EXT|I/E|INT|EXT|EST)[.\s]+(.+)$").expect("valid regex")
});

static CUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9 .'\-]*[A-Z0-9.])\s*(\([^)]*\))?$").expect("valid regex")
});

static TRANSITION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z\s]+TO:\s*$").expect("valid regex"));

static CAPS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][A-Z'\-]+(?: [A-Z][A-Z'\-]+)*)\b").expect("valid regex"));

const TITLE_PAGE_KEYS: &[&str] = &[
    "title", "credit", "author", "authors", "source", "draft date", "date", "contact", "copyright",
];

/// Parsed scene heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadingParts {
    /// `INT`, `EXT` …, upper-cased.
    pub interior_exterior: String,
    /// Everything between the prefix and the last ` - `.
    pub location: String,
    /// Text after the last ` - `, if any.
    pub time_of_day: Option<String>,
}

/// Parse a heading line, returning `None` when it is not a scene heading.
#[must_use]
pub fn parse_heading(line: &str) -> Option<HeadingParts> {
    let caps = HEADING.captures(line.trim())?;
    let interior_exterior = caps.get(1)?.as_str().trim_end_matches('.').to_uppercase();
    let rest = caps.get(2)?.as_str().trim();
    let (location, time_of_day) = match rest.rsplit_once(" - ") {
        Some((loc, time)) => (loc.trim().to_string(), Some(time.trim().to_uppercase())),
        None => (rest.to_string(), None),
    };
    Some(HeadingParts {
        interior_exterior,
        location,
        time_of_day,
    })
}

/// A parsed screenplay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Screenplay {
    /// Title from the title page.
    pub title: Option<String>,
    /// Author(s) from the title page.
    pub author: Option<String>,
    /// Draft date from the title page.
    pub draft_date: Option<String>,
    /// Scenes in document order, numbered from 1.
    pub scenes: Vec<SceneRecord>,
    /// All speaking characters, sorted.
    pub characters: Vec<String>,
    /// Total words across scenes.
    pub word_count: u64,
    /// Every recognised title-page key.
    pub metadata: BTreeMap<String, String>,
}

impl Screenplay {
    /// Look up a scene by its number.
    #[must_use]
    pub fn scene(&self, number: SceneNumber) -> Option<&SceneRecord> {
        self.scenes.iter().find(|s| s.scene_number == number)
    }
}

/// Parse Fountain text into a [`Screenplay`].
#[must_use]
pub fn parse_fountain(content: &str) -> Screenplay {
    let lines: Vec<&str> = content.lines().collect();
    let (metadata, body_start) = parse_title_page(&lines);
    let blocks = split_scenes(&lines[body_start..]);

    let speakers: HashSet<String> = blocks
        .iter()
        .flat_map(|block| cue_names(block))
        .collect();

    let mut scenes = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let number = SceneNumber::try_from(scenes.len() + 1).unwrap_or(SceneNumber::MAX);
        if let Some(scene) = parse_scene(number, block, &speakers) {
            scenes.push(scene);
        }
    }

    let mut characters: Vec<String> = speakers.into_iter().collect();
    characters.sort();
    let word_count = scenes.iter().map(|s| u64::from(s.word_count)).sum();

    debug!(scenes = scenes.len(), characters = characters.len(), words = word_count, "Parsed screenplay");

    Screenplay {
        title: metadata.get("title").cloned(),
        author: metadata.get("author").or_else(|| metadata.get("authors")).cloned(),
        draft_date: metadata.get("draft date").or_else(|| metadata.get("date")).cloned(),
        scenes,
        characters,
        word_count,
        metadata,
    }
}

fn parse_title_page(lines: &[&str]) -> (BTreeMap<String, String>, usize) {
    let mut metadata = BTreeMap::new();
    let first = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let Some(line) = lines.get(first) else {
        return (metadata, 0);
    };
    if !is_title_key(line) {
        return (metadata, 0);
    }

    let mut last_key: Option<String> = None;
    for (i, line) in lines.iter().enumerate().skip(first) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("===") {
            return (metadata, i + 1);
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let key = key.trim().to_lowercase();
            if TITLE_PAGE_KEYS.contains(&key.as_str()) {
                metadata.insert(key.clone(), value.trim().to_string());
                last_key = Some(key);
                continue;
            }
        }
        // Indented continuation of the previous key.
        if let Some(key) = &last_key {
            if let Some(value) = metadata.get_mut(key) {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(trimmed);
            }
        }
    }
    (metadata, lines.len())
}

fn is_title_key(line: &str) -> bool {
    line.split_once(':')
        .is_some_and(|(key, _)| TITLE_PAGE_KEYS.contains(&key.trim().to_lowercase().as_str()))
}

fn split_scenes<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    for line in lines {
        if parse_heading(line).is_some() {
            blocks.push(vec![*line]);
        } else if let Some(current) = blocks.last_mut() {
            current.push(*line);
        }
    }
    blocks
}

fn is_cue(lines: &[&str], i: usize) -> bool {
    let line = lines[i].trim();
    if parse_heading(line).is_some() || TRANSITION.is_match(line) || !CUE.is_match(line) {
        return false;
    }
    lines.get(i + 1).is_some_and(|next| !next.trim().is_empty())
}

fn cue_name(line: &str) -> Option<String> {
    CUE.captures(line.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn cue_names(block: &[&str]) -> Vec<String> {
    (1..block.len())
        .filter(|&i| is_cue(block, i))
        .filter_map(|i| cue_name(block[i]))
        .collect()
}

fn parse_scene(number: SceneNumber, block: &[&str], speakers: &HashSet<String>) -> Option<SceneRecord> {
    let heading = block.first()?.trim().to_string();
    let parts = parse_heading(&heading)?;

    let mut elements = Vec::new();
    let mut present: Vec<String> = Vec::new();
    let mut speaking: Vec<String> = Vec::new();

    let mut i = 1;
    while i < block.len() {
        let line = block[i].trim();
        if line.is_empty() {
            i += 1;
            continue;
        }

        if is_cue(block, i) {
            let name = cue_name(line).unwrap_or_else(|| line.to_string());
            push_unique(&mut present, &name);
            push_unique(&mut speaking, &name);
            elements.push(SceneElement { kind: ElementKind::Character, text: name });
            i += 1;
            while i < block.len() {
                let next = block[i].trim();
                if next.is_empty() {
                    i += 1;
                    break;
                }
                let kind = if next.starts_with('(') && next.ends_with(')') {
                    ElementKind::Parenthetical
                } else {
                    ElementKind::Dialogue
                };
                elements.push(SceneElement { kind, text: next.to_string() });
                i += 1;
            }
            continue;
        }

        if TRANSITION.is_match(line) {
            elements.push(SceneElement { kind: ElementKind::Transition, text: line.to_string() });
        } else {
            for caps in CAPS_NAME.captures_iter(line) {
                let candidate = &caps[1];
                if speakers.contains(candidate) {
                    push_unique(&mut present, candidate);
                }
            }
            elements.push(SceneElement { kind: ElementKind::Action, text: line.to_string() });
        }
        i += 1;
    }

    let mut scene = SceneRecord {
        scene_id: scene_id_for(number),
        scene_number: number,
        heading,
        location: Some(parts.location),
        time_of_day: parts.time_of_day,
        interior_exterior: Some(parts.interior_exterior),
        elements,
        full_text: String::new(),
        characters_present: present,
        characters_speaking: speaking,
        word_count: 0,
    };
    scene.refresh_text();
    Some(scene)
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Title: The Quiet House
Author: J. Doe
Draft date: 2024-01-01

INT. MANSION - LIBRARY - NIGHT

JOHN searches the shelves. MARIA watches from the doorway.

JOHN
(whispering)
Where did she hide it?

MARIA (O.S.)
You'll never find it.

CUT TO:

EXT. GARDEN - DAY

Rain. Nobody moves.

MARIA
I warned him.
";

    #[test]
    fn parses_title_page_and_scenes() {
        let play = parse_fountain(SAMPLE);
        assert_eq!(play.title.as_deref(), Some("The Quiet House"));
        assert_eq!(play.author.as_deref(), Some("J. Doe"));
        assert_eq!(play.draft_date.as_deref(), Some("2024-01-01"));
        assert_eq!(play.scenes.len(), 2);
        assert_eq!(play.characters, vec!["JOHN", "MARIA"]);
    }

    #[test]
    fn first_scene_elements_and_characters() {
        let play = parse_fountain(SAMPLE);
        let scene = &play.scenes[0];
        assert_eq!(scene.scene_id, "SCENE_001");
        assert_eq!(scene.location.as_deref(), Some("MANSION - LIBRARY"));
        assert_eq!(scene.time_of_day.as_deref(), Some("NIGHT"));
        assert_eq!(scene.interior_exterior.as_deref(), Some("INT"));
        assert_eq!(scene.characters_present, vec!["JOHN", "MARIA"]);
        assert_eq!(scene.characters_speaking, vec!["JOHN", "MARIA"]);
        assert_eq!(scene.dialogue_count(), 2);
        assert!(scene.elements.iter().any(|e| e.kind == ElementKind::Parenthetical));
        assert!(scene.elements.iter().any(|e| e.kind == ElementKind::Transition));
    }

    #[test]
    fn action_mentions_of_non_speakers_are_ignored() {
        let play = parse_fountain("INT. ROOM - DAY\n\nA LOUD BANG. JOHN flinches.\n\nJOHN\nWhat?\n");
        assert_eq!(play.scenes[0].characters_present, vec!["JOHN"]);
    }

    #[test]
    fn heading_without_time() {
        let parts = parse_heading("EXT. ROOFTOP").expect("heading");
        assert_eq!(parts.location, "ROOFTOP");
        assert_eq!(parts.time_of_day, None);
        assert!(parse_heading("INTERIOR DESIGN").is_none());
    }

    #[test]
    fn text_before_first_heading_is_dropped() {
        let play = parse_fountain("FADE IN:\n\nINT. ROOM - DAY\n\nQuiet.\n");
        assert_eq!(play.scenes.len(), 1);
        assert_eq!(play.scenes[0].elements.len(), 1);
    }
}
