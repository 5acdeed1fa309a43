//! CLI command implementations.

pub mod chat;
pub mod connect;
