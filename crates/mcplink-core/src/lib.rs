//! # mcplink-core
//!
//! Core types and abstractions for mcplink, the command-line bridge between
//! a hosted language model and Model Context Protocol servers.
//!
//! This crate provides:
//! - Message and conversation primitives
//! - Tool definitions, calls, results and the [`ToolBackend`] seam
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod message;
pub mod tool;

pub use config::Config;
pub use error::{Error, ProviderError, Result};
pub use message::{Content, ContentPart, Message, Role};
pub use tool::{ToolBackend, ToolCall, ToolDefinition, ToolResult};
