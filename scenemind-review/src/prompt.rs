//! Rendering a [`ReviewerContext`] into a chat request.

use std::fmt::Write as _;

use scenemind_core::config::LlmConfig;
use scenemind_core::context::{DigestBrief, EntityBrief, QuestionBrief, ReviewerContext};
use scenemind_core::scene::SceneRecord;
use scenemind_core::types::{EntityType, ImportanceBand};
use scenemind_core::AffectRecord;
use scenemind_llm::prompt::{unfilled_placeholders, NOTHING_YET};
use scenemind_llm::{ChatRequest, ReviewTemplates};
use tracing::warn;

use crate::persona::ReviewerProfile;

/// Snippet length for remembered scenes.
const RECENT_SNIPPET_CHARS: usize = 160;

/// Everything one reviewer call is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInputs<'a> {
    /// Document title.
    pub title: &'a str,
    /// Reviewer persona.
    pub profile: &'a ReviewerProfile,
    /// Assembled memory for this reviewer.
    pub context: &'a ReviewerContext,
    /// Scene being read now.
    pub scene: &'a SceneRecord,
}

/// Build the JSON-mode chat request for one reviewer and scene.
#[must_use]
pub fn build_request(inputs: &PromptInputs<'_>, templates: &ReviewTemplates, llm: &LlmConfig) -> ChatRequest {
    let ctx = inputs.context;
    let profile = inputs.profile;

    let priorities = profile.priorities();
    let recent = section(&ctx.recent_scenes, recent_line);
    let earlier = section(&ctx.digests, digest_line);
    let characters = section(&ctx.entities, entity_line);
    let questions = section(&ctx.questions, question_line);
    let feelings = section(&ctx.affect, feeling_line);
    let scene_number = inputs.scene.scene_number.to_string();

    let vars = [
        ("persona_prompt", profile.system_prompt.trim()),
        ("reviewer_name", profile.name.as_str()),
        ("reviewer_type", profile.reviewer_type.as_str()),
        ("priorities", priorities.as_str()),
        ("feedback_style", profile.feedback_style.as_str()),
        ("title", inputs.title),
        ("recent_scenes", recent.as_str()),
        ("earlier_scenes", earlier.as_str()),
        ("key_characters", characters.as_str()),
        ("open_questions", questions.as_str()),
        ("feelings", feelings.as_str()),
        ("scene_number", scene_number.as_str()),
        ("scene_heading", inputs.scene.heading.as_str()),
        ("scene_text", inputs.scene.full_text.as_str()),
    ];
    let (system, user) = templates.render(&vars);

    let missing: Vec<String> = unfilled_placeholders(&system).into_iter().chain(unfilled_placeholders(&user)).collect();
    if !missing.is_empty() {
        warn!(template = %templates.version, ?missing, "Prompt template has unfilled placeholders");
    }

    ChatRequest::new(system, user)
        .with_json()
        .with_timeout(llm.request_timeout_ms)
        .with_sampling(llm.temperature, llm.max_tokens)
}

fn section<T>(items: &[T], line: fn(&T) -> String) -> String {
    if items.is_empty() {
        return NOTHING_YET.to_string();
    }
    items.iter().map(line).collect::<Vec<_>>().join("\n")
}

fn recent_line(scene: &SceneRecord) -> String {
    let mut line = format!("Scene {} ({})", scene.scene_number, scene.heading);
    if let Some(action) = scene.first_action() {
        let _ = write!(line, ": {}", snippet(action, RECENT_SNIPPET_CHARS));
    }
    if !scene.characters_present.is_empty() {
        let _ = write!(line, " [with {}]", scene.characters_present.join(", "));
    }
    line
}

fn digest_line(digest: &DigestBrief) -> String {
    let mut line = format!("Scene {}", digest.scene_number);
    if let Some(location) = &digest.location {
        let _ = write!(line, " ({location})");
    }
    let _ = write!(line, ": {}", digest.summary);
    if !digest.plot_beats.is_empty() {
        let beats: Vec<String> = digest.plot_beats.iter().map(ToString::to_string).collect();
        let _ = write!(line, " [{}]", beats.join(", "));
    }
    line
}

fn entity_line(entity: &EntityBrief) -> String {
    let role = entity
        .narrative_function
        .map_or_else(|| kind(entity.entity_type).to_string(), |f| f.to_string());
    format!(
        "- {} ({role}, {}): in {} scenes, last seen in scene {}",
        entity.name,
        band(entity.band),
        entity.appearances,
        entity.last_appearance
    )
}

fn question_line(question: &QuestionBrief) -> String {
    let mut line = format!(
        "- [{}] {} ({}, raised in scene {})",
        question.question_id,
        question.text,
        weight(question),
        question.raised_in_scene
    );
    if let Some(guess) = &question.speculation {
        let _ = write!(line, " Guess so far: {guess}");
    }
    line
}

fn feeling_line(affect: &AffectRecord) -> String {
    let mut line = format!(
        "Scene {}: engagement {:.1}, enjoyment {:.1}",
        affect.scene_number, affect.engagement, affect.enjoyment
    );
    if let Some(reaction) = &affect.reaction {
        let _ = write!(line, ", \"{reaction}\"");
    }
    line
}

fn weight(question: &QuestionBrief) -> &'static str {
    use scenemind_core::types::NarrativeWeight;
    match question.narrative_weight {
        NarrativeWeight::Low => "low",
        NarrativeWeight::Medium => "medium",
        NarrativeWeight::High => "high",
        NarrativeWeight::Critical => "critical",
    }
}

fn band(band: ImportanceBand) -> &'static str {
    match band {
        ImportanceBand::Low => "low",
        ImportanceBand::Medium => "medium",
        ImportanceBand::High => "high",
    }
}

fn kind(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Character => "character",
        EntityType::Object => "object",
        EntityType::Location => "location",
    }
}

fn snippet(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}
