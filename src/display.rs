//! Colored terminal output for bridged chat sessions.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;

use crate::chat::{ChatMessage, MessageType, Role};
use crate::cli::SessionProcessInfo;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    format_timestamp(&Utc::now())
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_chars` characters, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else if max_chars <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_chars - 3).collect();
        format!("{kept}...")
    }
}

/// Format tool input for display, truncating long values.
#[must_use]
pub fn format_tool_input(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => truncate(s, 50),
                    other => truncate(&other.to_string(), 50),
                };
                format!("{k}={value}")
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => truncate(&other.to_string(), 80),
    }
}

/// Print session start information.
pub fn print_session_start(info: &SessionProcessInfo) {
    println!(
        "{} {} session={} pid={} cwd={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        info.id.cyan(),
        info.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
        info.cwd.display().dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print a finalized chat message.
pub fn print_chat_message(message: &ChatMessage) {
    let ts = format_timestamp(&message.timestamp);
    let metadata = message.metadata.as_ref();
    match (message.role, message.message_type) {
        (_, MessageType::Error) => {
            println!("{} {} {}", ts.dimmed(), "[ERROR]".red().bold(), message.content.red());
        }
        (_, MessageType::ToolUse) => {
            let name = metadata
                .and_then(|m| m.get("toolName"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("tool");
            let input = metadata
                .and_then(|m| m.get("toolInput"))
                .map(format_tool_input)
                .unwrap_or_default();
            println!(
                "{} {} {} ({})",
                ts.dimmed(),
                "[TOOL]".cyan().bold(),
                name.bold(),
                input.dimmed()
            );
            if !message.is_blank() {
                println!("{}", message.content);
            }
        }
        (Role::Assistant, MessageType::Text) => {
            println!("{} {}", ts.dimmed(), "[CLAUDE]".green().bold());
            println!("{}", message.content);
            if let Some(cost) = metadata
                .and_then(|m| m.get("costUsd"))
                .and_then(serde_json::Value::as_f64)
            {
                println!("{}", format!("(cost: ${cost:.4})").dimmed());
            }
        }
        (Role::User, MessageType::Text) => {
            println!("{} {} {}", ts.dimmed(), "[YOU]".blue().bold(), message.content);
        }
        (Role::System, MessageType::Text) => {
            println!(
                "{} {} {}",
                ts.dimmed(),
                "[SYSTEM]".magenta().bold(),
                message.content.dimmed()
            );
        }
    }
    let _ = io::stdout().flush();
}

/// Print a chunk of the child's stderr, dimmed.
pub fn print_stderr(chunk: &str) {
    for line in chunk.lines().filter(|line| !line.trim().is_empty()) {
        eprintln!("{} {}", "[STDERR]".yellow(), line.dimmed());
    }
}

/// Print how the session ended.
pub fn print_exit(code: Option<i32>, signal: Option<&str>) {
    let ts = timestamp();
    match (code, signal) {
        (Some(0), _) => println!("{} {} Session exited", ts.dimmed(), "[SESSION]".blue().bold()),
        (Some(code), _) => println!(
            "{} {} Session exited with code {}",
            ts.dimmed(),
            "[SESSION]".red().bold(),
            code
        ),
        (None, Some(signal)) => println!(
            "{} {} Session terminated by {}",
            ts.dimmed(),
            "[SESSION]".yellow().bold(),
            signal
        ),
        (None, None) => println!("{} {} Session ended", ts.dimmed(), "[SESSION]".blue().bold()),
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
