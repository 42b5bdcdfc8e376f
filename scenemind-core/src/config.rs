//! Configuration for the SceneMind narrative memory engine.
//!
//! Maps directly to `scenemind.toml`. Every section and field has a default,
//! so an empty file is a valid configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level SceneMind configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SceneMindConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Sliding-window sizing.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Entity tracking heuristics and the alias table.
    #[serde(default)]
    pub entities: EntityConfig,
    /// Question urgency and pruning.
    #[serde(default)]
    pub questions: QuestionConfig,
    /// Digest size bounds.
    #[serde(default)]
    pub compressor: CompressorConfig,
    /// Limits on the assembled reviewer context.
    #[serde(default)]
    pub context: ContextConfig,
    /// Default LLM provider.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Additional named providers that personas may opt into.
    #[serde(default)]
    pub providers: BTreeMap<String, LlmConfig>,
    /// Reviewer fan-out limits.
    #[serde(default)]
    pub performance: PerformanceConfig,
    /// Persistence / save settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging and metrics output.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Persona ids to instantiate as reviewers, in order.
    #[serde(default)]
    pub reviewers: Vec<String>,
}

impl SceneMindConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `SceneMindError::Config` if the TOML is invalid or a value is
    /// out of range.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| crate::SceneMindError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values that would break the engine's invariants.
    ///
    /// # Errors
    /// Returns `SceneMindError::Config` naming the offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let err = |msg: &str| Err(crate::SceneMindError::Config(msg.to_string()));
        if self.memory.window_size == 0 {
            return err("memory.window_size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.questions.initial_urgency) {
            return err("questions.initial_urgency must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.questions.prune_threshold) {
            return err("questions.prune_threshold must be within [0, 1]");
        }
        if self.compressor.target_ratio > self.compressor.trigger_ratio {
            return err("compressor.target_ratio must not exceed compressor.trigger_ratio");
        }
        if self.performance.max_concurrent_reviews == 0 {
            return err("performance.max_concurrent_reviews must be at least 1");
        }
        Ok(())
    }

    /// Provider settings for a persona, falling back to `[llm]`.
    #[must_use]
    pub fn provider(&self, name: Option<&str>) -> &LlmConfig {
        name.and_then(|n| self.providers.get(n)).unwrap_or(&self.llm)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level or `EnvFilter` directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Sliding-window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of scenes kept in full before compression.
    #[serde(default = "default_window")]
    pub window_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: default_window(),
        }
    }
}

/// Entity tracking heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Alias → canonical name (e.g. `"THE MAID" = "MARIA"`), matched
    /// case-insensitively before store lookup.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Absence longer than this many scenes makes a return a key moment.
    #[serde(default = "default_absence_gap")]
    pub absence_gap: u32,
    /// Shared scenes needed before two characters are linked.
    #[serde(default = "default_min_shared")]
    pub relationship_min_shared: usize,
    /// Track the heading location as a location entity.
    #[serde(default = "default_true")]
    pub track_locations: bool,
    /// Record offscreen mentions of known characters in scene text.
    #[serde(default = "default_true")]
    pub track_mentions: bool,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            aliases: BTreeMap::new(),
            absence_gap: default_absence_gap(),
            relationship_min_shared: default_min_shared(),
            track_locations: true,
            track_mentions: true,
        }
    }
}

/// Question urgency and pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionConfig {
    /// Urgency of a freshly raised question.
    #[serde(default = "default_half")]
    pub initial_urgency: f32,
    /// Urgency added per unresolved reference.
    #[serde(default = "default_urgency_step")]
    pub urgency_step: f32,
    /// Open questions scoring below this are auto-pruned.
    #[serde(default = "default_prune_threshold")]
    pub prune_threshold: f32,
    /// Run auto-pruning after each committed scene.
    #[serde(default = "default_true")]
    pub auto_prune: bool,
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            initial_urgency: default_half(),
            urgency_step: default_urgency_step(),
            prune_threshold: default_prune_threshold(),
            auto_prune: true,
        }
    }
}

/// Digest size bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorConfig {
    /// Summaries longer than this fraction of the scene text are truncated.
    #[serde(default = "default_trigger_ratio")]
    pub trigger_ratio: f32,
    /// Length a truncated summary is cut to, as a fraction of the scene text.
    #[serde(default = "default_target_ratio")]
    pub target_ratio: f32,
    /// Maximum key objects kept per digest.
    #[serde(default = "default_max_objects")]
    pub max_key_objects: usize,
    /// Characters kept from each dialogue snippet.
    #[serde(default = "default_dialogue_snippet")]
    pub dialogue_snippet_chars: usize,
    /// Characters kept from the first action line.
    #[serde(default = "default_action_snippet")]
    pub action_snippet_chars: usize,
    /// Participants named before "and N others".
    #[serde(default = "default_listed")]
    pub max_listed_participants: usize,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            trigger_ratio: default_trigger_ratio(),
            target_ratio: default_target_ratio(),
            max_key_objects: default_max_objects(),
            dialogue_snippet_chars: default_dialogue_snippet(),
            action_snippet_chars: default_action_snippet(),
            max_listed_participants: default_listed(),
        }
    }
}

/// Limits on the assembled reviewer context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Recent scenes rendered in full.
    #[serde(default = "default_recent_scenes")]
    pub max_recent_scenes: usize,
    /// Most recent historical digests included.
    #[serde(default = "default_five")]
    pub max_digests: usize,
    /// Entity slots. High-band entities are always included, even past this.
    #[serde(default = "default_five")]
    pub max_entities: usize,
    /// Open questions included.
    #[serde(default = "default_five")]
    pub max_questions: usize,
    /// Affect records from the reviewer's own trajectory.
    #[serde(default = "default_five")]
    pub max_affect_entries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_recent_scenes: default_recent_scenes(),
            max_digests: default_five(),
            max_entities: default_five(),
            max_questions: default_five(),
            max_affect_entries: default_five(),
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "anthropic", "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key, if the provider needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Hard timeout for any LLM call in milliseconds.
    #[serde(default = "default_timeout")]
    pub request_timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_2")]
    pub max_retries: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum tokens per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            model: default_model(),
            api_key_env: None,
            request_timeout_ms: default_timeout(),
            max_retries: 2,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Reviewer fan-out limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Reviewer calls in flight at once for a single scene.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_reviews: usize,
    /// Calls slower than this are counted as over budget.
    #[serde(default = "default_latency_budget")]
    pub review_latency_budget_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reviews: default_concurrency(),
            review_latency_budget_ms: default_latency_budget(),
        }
    }
}

/// Persistence / save settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Number of save backups to keep.
    #[serde(default = "default_3")]
    pub backup_count: u32,
    /// Detect save corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Save a snapshot after every committed scene.
    #[serde(default = "default_true")]
    pub save_every_scene: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            backup_count: 3,
            checksum_enabled: true,
            save_every_scene: true,
        }
    }
}

/// Logging and metrics output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Emit a Prometheus-format metrics dump at the end of a run.
    #[serde(default)]
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            metrics_enabled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_window() -> usize { 5 }
fn default_absence_gap() -> u32 { 10 }
fn default_min_shared() -> usize { 2 }
fn default_half() -> f32 { 0.5 }
fn default_urgency_step() -> f32 { 0.1 }
fn default_prune_threshold() -> f32 { 0.2 }
fn default_trigger_ratio() -> f32 { 0.3 }
fn default_target_ratio() -> f32 { 0.2 }
fn default_max_objects() -> usize { 5 }
fn default_dialogue_snippet() -> usize { 50 }
fn default_action_snippet() -> usize { 80 }
fn default_listed() -> usize { 3 }
fn default_recent_scenes() -> usize { 3 }
fn default_five() -> usize { 5 }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:7b-instruct".to_string() }
fn default_timeout() -> u64 { 60_000 }
fn default_2() -> u32 { 2 }
fn default_3() -> u32 { 3 }
fn default_temperature() -> f32 { 0.8 }
fn default_max_tokens() -> u32 { 800 }
fn default_concurrency() -> usize { 4 }
fn default_latency_budget() -> u64 { 30_000 }
fn default_log_format() -> String { "pretty".to_string() }
