//! # mcplink-providers
//!
//! Language model providers for mcplink.
//!
//! This crate provides:
//! - The [`Provider`] trait the agent loop talks to
//! - A Google Gemini implementation with function calling
//! - JSON Schema cleanup for Gemini function declarations

pub mod gemini;
pub mod schema;
pub mod traits;

pub use gemini::GeminiProvider;
pub use traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};
