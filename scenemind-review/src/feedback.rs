//! Turning a reviewer's raw reply into a [`ReviewerUpdate`].
//!
//! Replies are read as JSON first. Models that ignore the schema usually
//! still write lines like `Engagement: 7/10`, so a line parser picks those
//! up. A reply with neither engagement nor enjoyment is rejected outright,
//! and nothing from it reaches the stores.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use scenemind_core::affect::{AffectRecord, Emotions};
use scenemind_core::context::ReviewerContext;
use scenemind_core::session::{AnsweredQuestion, DismissedQuestion, RaisedQuestion, ReviewerUpdate};
use scenemind_core::types::{NarrativeWeight, QuestionId, ReviewerId};
use scenemind_llm::client::extract_json_block;

use crate::error::{ReviewError, Result};

/// Longest reaction kept when the whole reply stands in for one.
const MAX_REACTION_CHARS: usize = 400;

/// Which reader produced a [`ParsedFeedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyFormat {
    /// The JSON schema was followed.
    Json,
    /// Recovered from free text.
    Lines,
}

/// A reply that can be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeedback {
    /// Store mutations for this reviewer and scene.
    pub update: ReviewerUpdate,
    /// Opinions the reviewer voiced about characters.
    pub character_opinions: BTreeMap<String, String>,
    /// How the reply was read.
    pub format: ReplyFormat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonReply {
    engagement: Option<f32>,
    enjoyment: Option<f32>,
    emotions: Emotions,
    reaction: Option<String>,
    questions_raised: Vec<JsonRaised>,
    questions_referenced: Vec<String>,
    questions_answered: Vec<JsonAnswered>,
    questions_dropped: Vec<JsonDropped>,
    character_opinions: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct JsonRaised {
    text: String,
    #[serde(default)]
    weight: Option<String>,
    #[serde(default)]
    about: Vec<String>,
    #[serde(default)]
    speculation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonAnswered {
    id: String,
    #[serde(default)]
    answer: String,
}

#[derive(Debug, Deserialize)]
struct JsonDropped {
    id: String,
    #[serde(default)]
    reason: String,
}

static ENGAGEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bengage(?:ment|d)?\b\D{0,20}?(-?\d+(?:\.\d+)?)(?:\s*/\s*(\d+))?").expect("valid regex")
});
static ENJOYMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\benjoy(?:ment|ed)?\b\D{0,20}?(-?\d+(?:\.\d+)?)(?:\s*/\s*(\d+))?").expect("valid regex")
});
static QUESTION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*]\s*)?(?:new\s+)?question\s*:\s*(.+\?)\s*$").expect("valid regex")
});
static ANSWERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*]\s*)?answered\s*:?\s*\[?(Q_\d+)\]?\s*[-:]?\s*(.*)$").expect("valid regex")
});
static REACTION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*reaction\s*:\s*(.+)$").expect("valid regex"));

/// Parse `text`, the reply of `reviewer` to a prompt built from `context`.
///
/// Question ids are only kept if they were offered in `context`; others are
/// dropped so that one stray id does not sink the whole update.
///
/// # Errors
/// [`ReviewError::Feedback`] if neither engagement nor enjoyment can be read.
pub fn parse_reply(text: &str, reviewer: &ReviewerId, context: &ReviewerContext) -> Result<ParsedFeedback> {
    let offered: HashSet<&QuestionId> = context.questions.iter().map(|q| &q.question_id).collect();

    let json = extract_json_block(text).and_then(|block| serde_json::from_str::<JsonReply>(block).ok());
    let (reply, format) = match json {
        Some(reply) if reply.engagement.is_some() || reply.enjoyment.is_some() => (reply, ReplyFormat::Json),
        _ => (read_lines(text), ReplyFormat::Lines),
    };
    if reply.engagement.is_none() && reply.enjoyment.is_none() {
        return Err(ReviewError::Feedback("no engagement or enjoyment signal".into()));
    }

    let mut affect = AffectRecord::new(
        context.current_scene,
        reply.engagement.map_or(0.5, |v| rescale(v, false)),
        reply.enjoyment.map_or(0.0, |v| rescale(v, true)),
    )
    .with_emotions(&reply.emotions);
    if let Some(reaction) = reply.reaction.filter(|r| !r.trim().is_empty()) {
        affect = affect.with_reaction(reaction.trim());
    }

    let raised: Vec<RaisedQuestion> = reply
        .questions_raised
        .into_iter()
        .filter(|q| !q.text.trim().is_empty())
        .map(|q| RaisedQuestion {
            text: q.text.trim().to_string(),
            weight: q.weight.as_deref().and_then(NarrativeWeight::parse_lenient).unwrap_or_default(),
            about: q.about,
            speculation: q.speculation.filter(|s| !s.trim().is_empty()),
        })
        .collect();
    affect.questions_raised = raised.iter().map(|q| q.text.clone()).collect();

    let keep = |raw: &str| -> Option<QuestionId> {
        let id = normalize_question_id(raw);
        if offered.contains(&id) {
            Some(id)
        } else {
            debug!(reviewer = %reviewer, id = raw, "Dropping question id not offered to reviewer");
            None
        }
    };

    let mut closed: HashSet<QuestionId> = HashSet::new();
    let answered: Vec<AnsweredQuestion> = reply
        .questions_answered
        .into_iter()
        .filter_map(|a| keep(&a.id).map(|question_id| AnsweredQuestion { question_id, answer: a.answer }))
        .filter(|a| closed.insert(a.question_id.clone()))
        .collect();
    let dismissed: Vec<DismissedQuestion> = reply
        .questions_dropped
        .into_iter()
        .filter_map(|d| keep(&d.id).map(|question_id| DismissedQuestion { question_id, reason: d.reason }))
        .filter(|d| closed.insert(d.question_id.clone()))
        .collect();
    let mut referenced: Vec<QuestionId> = Vec::new();
    for raw in &reply.questions_referenced {
        if let Some(id) = keep(raw) {
            if !referenced.contains(&id) {
                referenced.push(id);
            }
        }
    }

    let mut update = ReviewerUpdate::new(reviewer.clone(), affect);
    update.raised = raised;
    update.referenced = referenced;
    update.answered = answered;
    update.dismissed = dismissed;

    Ok(ParsedFeedback {
        update,
        character_opinions: reply.character_opinions,
        format,
    })
}

/// Recover what we can from free text.
fn read_lines(text: &str) -> JsonReply {
    let reaction = REACTION_LINE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .or_else(|| Some(truncate_chars(text.trim(), MAX_REACTION_CHARS)));
    JsonReply {
        engagement: read_score(&ENGAGEMENT, text),
        enjoyment: read_score(&ENJOYMENT, text),
        reaction,
        questions_raised: QUESTION_LINE
            .captures_iter(text)
            .map(|c| JsonRaised {
                text: c[1].trim().to_string(),
                weight: None,
                about: Vec::new(),
                speculation: None,
            })
            .collect(),
        questions_answered: ANSWERED_LINE
            .captures_iter(text)
            .map(|c| JsonAnswered {
                id: c[1].to_string(),
                answer: c[2].trim().to_string(),
            })
            .collect(),
        ..JsonReply::default()
    }
}

/// First score matched by `pattern`, divided by its denominator when one is
/// written (`7/10`).
fn read_score(pattern: &Regex, text: &str) -> Option<f32> {
    let caps = pattern.captures(text)?;
    let value: f32 = caps[1].parse().ok()?;
    match caps.get(2).and_then(|d| d.as_str().parse::<f32>().ok()) {
        Some(denominator) if denominator > 0.0 => Some(value / denominator),
        _ => Some(value),
    }
}

/// Values outside the unit range are read as out of ten, then clamped.
fn rescale(value: f32, signed: bool) -> f32 {
    let value = if value.abs() > 1.0 { value / 10.0 } else { value };
    if signed { value.clamp(-1.0, 1.0) } else { value.clamp(0.0, 1.0) }
}

fn normalize_question_id(raw: &str) -> QuestionId {
    QuestionId(raw.trim().trim_matches(|c| c == '[' || c == ']').to_ascii_uppercase())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
