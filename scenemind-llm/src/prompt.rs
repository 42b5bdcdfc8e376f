//! Prompt templates for scene review.
//!
//! The built-in templates are compiled in. A deployment can override them
//! with a TOML file of the same shape:
//!
//! ```toml
//! [prompt]
//! version = "2"
//! system = "You are {reviewer_name} ..."
//! user = "RECENT SCENES YOU REMEMBER:\n{recent_scenes}\n..."
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::LlmError;

/// Filler for an empty section.
pub const NOTHING_YET: &str = "(nothing yet)";

/// Reviewer system prompt.
pub const REVIEW_SYSTEM: &str = r"{persona_prompt}

You are {reviewer_name}, a {reviewer_type}, reading a screenplay one scene at a time.
You only know what you have read so far. Never guess at pages you have not seen.
What you weigh most: {priorities}.
Your feedback style: {feedback_style}.

RULES:
- React to this scene as it lands for you, in your own voice.
- Keep track of what you are wondering about and say when it is answered.
- Your response must be valid JSON.";

/// Reviewer user prompt, one section per part of the assembled context.
pub const REVIEW_USER: &str = r"SCREENPLAY: {title}

RECENT SCENES YOU REMEMBER:
{recent_scenes}

EARLIER IN THE SCRIPT:
{earlier_scenes}

KEY CHARACTERS:
{key_characters}

QUESTIONS YOU'RE WONDERING ABOUT:
{open_questions}

HOW YOU'VE BEEN FEELING:
{feelings}

NOW YOU'RE READING (Scene {scene_number}: {scene_heading}):
{scene_text}

RESPOND WITH:
{response_format}";

/// Reply schema substituted for `{response_format}`.
pub const RESPONSE_FORMAT: &str = r#"A single JSON object:
{
  "engagement": <0.0 to 1.0, how gripped you are>,
  "enjoyment": <-1.0 to 1.0>,
  "emotions": {"confusion": <0-1>, "suspense": <0-1>, "excitement": <0-1>, "humor": <0-1>, "sadness": <0-1>, "anger": <0-1>, "hope": <0-1>, "fear": <0-1>, "emotional_intensity": <0-1>},
  "reaction": "one or two sentences in your voice",
  "questions_raised": [{"text": "what you now wonder", "weight": "critical|high|medium|low", "about": ["CHARACTER NAME"], "speculation": "your guess, or null"}],
  "questions_referenced": ["Q_001"],
  "questions_answered": [{"id": "Q_001", "answer": "how this scene answered it"}],
  "questions_dropped": [{"id": "Q_002", "reason": "why it no longer matters"}],
  "character_opinions": {"CHARACTER NAME": "what you think of them now"}
}
Use question ids exactly as listed above. Empty lists may be omitted."#;

/// Replace each `{key}` in `template` with its value. Unknown keys are left
/// in place.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// `{placeholder}` names still present in `rendered`, in order of first use.
#[must_use]
pub fn unfilled_placeholders(rendered: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut rest = rendered;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else { break };
        let name = &after[..close];
        if !name.is_empty()
            && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
            && !found.iter().any(|f| f == name)
        {
            found.push(name.to_string());
        }
        rest = &after[close + 1..];
    }
    found
}

#[derive(Debug, Deserialize)]
struct TomlPromptFile {
    prompt: ReviewTemplates,
}

/// System and user templates for reviewer calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewTemplates {
    /// Template version, logged with each run.
    pub version: String,
    /// System prompt.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Reply schema.
    #[serde(default = "default_response_format")]
    pub response_format: String,
}

fn default_response_format() -> String {
    RESPONSE_FORMAT.to_string()
}

impl Default for ReviewTemplates {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ReviewTemplates {
    /// The compiled-in templates.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            version: "builtin".into(),
            system: REVIEW_SYSTEM.into(),
            user: REVIEW_USER.into(),
            response_format: RESPONSE_FORMAT.into(),
        }
    }

    /// Parse a `[prompt]` TOML document.
    ///
    /// # Errors
    /// [`LlmError::ConfigError`] if the TOML is malformed or a template is blank.
    pub fn from_toml(content: &str) -> Result<Self, LlmError> {
        let parsed: TomlPromptFile =
            toml::from_str(content).map_err(|e| LlmError::ConfigError(format!("prompt template: {e}")))?;
        let templates = parsed.prompt;
        if templates.system.trim().is_empty() || templates.user.trim().is_empty() {
            return Err(LlmError::ConfigError("prompt template: system and user must be non-empty".into()));
        }
        Ok(templates)
    }

    /// Load a `[prompt]` TOML file.
    ///
    /// # Errors
    /// [`LlmError::ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LlmError::ConfigError(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Render `(system, user)`. `{response_format}` is filled from
    /// [`ReviewTemplates::response_format`] unless `vars` supplies it.
    #[must_use]
    pub fn render(&self, vars: &[(&str, &str)]) -> (String, String) {
        let system = render_template(&self.system, vars);
        let mut user = render_template(&self.user, vars);
        if user.contains("{response_format}") {
            user = user.replace("{response_format}", &self.response_format);
        }
        (system, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_rendering_works() {
        let rendered = render_template("Hello {name}, you are a {role}.", &[("name", "Iris"), ("role", "critic")]);
        assert_eq!(rendered, "Hello Iris, you are a critic.");
    }

    #[test]
    fn missing_vars_are_reported() {
        let rendered = render_template("Hello {name}, {unknown} and {unknown}.", &[("name", "Iris")]);
        assert_eq!(rendered, "Hello Iris, {unknown} and {unknown}.");
        assert_eq!(unfilled_placeholders(&rendered), vec!["unknown".to_string()]);
    }

    #[test]
    fn json_braces_are_not_placeholders() {
        assert!(unfilled_placeholders(RESPONSE_FORMAT).is_empty());
    }

    #[test]
    fn builtin_names_every_section() {
        let t = ReviewTemplates::builtin();
        for heading in [
            "RECENT SCENES YOU REMEMBER",
            "EARLIER IN THE SCRIPT",
            "KEY CHARACTERS",
            "QUESTIONS YOU'RE WONDERING ABOUT",
            "HOW YOU'VE BEEN FEELING",
            "NOW YOU'RE READING",
            "RESPOND WITH",
        ] {
            assert!(t.user.contains(heading), "missing {heading}");
        }
    }

    #[test]
    fn render_fills_response_format() {
        let (_, user) = ReviewTemplates::builtin().render(&[]);
        assert!(user.contains("\"engagement\""));
        assert!(!user.contains("{response_format}"));
    }

    #[test]
    fn toml_override() {
        let t = ReviewTemplates::from_toml(
            "[prompt]\nversion = \"2\"\nsystem = \"You are {reviewer_name}.\"\nuser = \"{scene_text}\\n{response_format}\"\n",
        )
        .expect("parse");
        assert_eq!(t.version, "2");
        assert_eq!(t.response_format, RESPONSE_FORMAT);
        let (system, user) = t.render(&[("reviewer_name", "Iris"), ("scene_text", "INT. LAB")]);
        assert_eq!(system, "You are Iris.");
        assert!(user.starts_with("INT. LAB\n"));
    }

    #[test]
    fn toml_rejects_blank_templates() {
        assert!(ReviewTemplates::from_toml("[prompt]\nversion = \"x\"\nsystem = \"\"\nuser = \"u\"\n").is_err());
        assert!(ReviewTemplates::from_toml("not toml").is_err());
    }
}
