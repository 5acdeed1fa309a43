//! # mcplink-agent
//!
//! The query loop that ties a language model to MCP tools: send the prompt
//! with the tool schemas, run the tool calls the model asks for, hand the
//! results back and collect the answer.

pub mod agent;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentError, AgentEventHandler, AgentResponse, AgentResult,
    NoOpEventHandler, StepResult,
};
