//! Claude Bridge - drive the Claude Code CLI over stream-json and turn its
//! output into chat messages.

pub mod chat;
pub mod cli;
pub mod config;
pub mod display;
