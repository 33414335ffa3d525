//! Language-model primitives for taskloom.
//!
//! This crate provides:
//!
//! - **Backend**: the `LlmBackend` trait every provider implements
//! - **OpenAI-compatible backend**: a `reqwest` client for chat-completion APIs
//! - **JSON extraction**: turning raw model text into typed structures
//!
//! Prompt wording for classification and planning lives with the callers; this
//! crate only moves text in and out of a model.

pub mod backend;
pub mod error;
pub mod json;
pub mod openai;

pub use backend::{LlmBackend, LlmBackendConfig, LlmRequest, LlmResponse, TokenUsage, ask_json};
pub use error::LlmError;
pub use json::extract_json;
pub use openai::OpenAiCompatibleBackend;
