//! # scenemind-llm: chat-model layer for SceneMind reviewers
//!
//! One interface for reviewer calls across backends:
//!   - **Ollama** (local, default)
//!   - **OpenAI-compatible** (OpenAI, vLLM, llama.cpp server, Together, ...)
//!   - **Anthropic** Messages API
//!
//! Every reviewer call goes through [`ChatProvider`], which gives:
//!   - JSON-mode requests where the backend supports it
//!   - Per-attempt timeouts
//!   - Retry with linear backoff on transient failures
//!   - A `None` backend for offline runs
//!
//! Parsing replies into reviewer updates is not done here; that belongs to
//! `scenemind-review`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{parse_structured, ChatProvider, LlmClient, LlmProvider};
pub use error::LlmError;
pub use prompt::ReviewTemplates;
pub use types::{ChatMessage, ChatRequest, ChatResponse, Role};
