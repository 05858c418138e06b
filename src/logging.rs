//! Structured logging module for Persona Chat
//!
//! Writes daily log files under the configured log directory with categories:
//! - STORE: Conversation store writes and schema setup
//! - COGNITIVE: Background naming and profile updates
//! - CONVERSATION: Conversation lifecycle (insert, load, delete)
//! - PROFILE: User profile mutations
//! - PROVIDER: Language-model requests
//! - ERROR: Errors and aborted background tasks

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Store,
    Cognitive,
    Conversation,
    Profile,
    Provider,
    Error,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Store => "STORE",
            LogCategory::Cognitive => "COGNITIVE",
            LogCategory::Conversation => "CONVERSATION",
            LogCategory::Profile => "PROFILE",
            LogCategory::Provider => "PROVIDER",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Directory the daily log files go to; `None` means console only
static LOG_DIR: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Echo every category to stderr, not just ERROR
static CONSOLE_ECHO: AtomicBool = AtomicBool::new(false);

pub fn set_console_echo(enabled: bool) {
    CONSOLE_ECHO.store(enabled, Ordering::Relaxed);
}

fn console_echo() -> bool {
    CONSOLE_ECHO.load(Ordering::Relaxed)
}

fn log_file_path(dir: &Path) -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    dir.join(format!("persona-chat-{}.log", today))
}

/// Initialize the logging system - creates the log directory if needed
pub fn init_logging(log_dir: &Path) -> std::io::Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    if let Ok(mut dir) = LOG_DIR.lock() {
        *dir = Some(log_dir.to_path_buf());
    }

    log(LogCategory::Conversation, None, "Persona Chat logging initialized");
    Ok(())
}

/// Format one log line. Conversation ids are shortened to 8 chars.
pub fn format_line(category: LogCategory, conversation_id: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let conv_context = conversation_id
        .map(|id| format!("conversation={} | ", id.chars().take(8).collect::<String>()))
        .unwrap_or_default();

    format!("[{}] [{}] {}{}\n", timestamp, category.as_str(), conv_context, message)
}

/// Log a message with category and optional conversation context
pub fn log(category: LogCategory, conversation_id: Option<&str>, message: &str) {
    let log_line = format_line(category, conversation_id, message);

    if category == LogCategory::Error || console_echo() {
        eprint!("{}", log_line);
    }

    let dir = match LOG_DIR.lock() {
        Ok(dir) => dir.clone(),
        Err(_) => None,
    };
    if let Some(dir) = dir {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&dir))
        {
            let _ = file.write_all(log_line.as_bytes());
        }
    }
}

pub fn log_store(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Store, conversation_id, message);
}

pub fn log_cognitive(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Cognitive, conversation_id, message);
}

pub fn log_conversation(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Conversation, conversation_id, message);
}

pub fn log_profile(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Profile, conversation_id, message);
}

pub fn log_provider(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Provider, conversation_id, message);
}

/// Log an error
pub fn log_error(conversation_id: Option<&str>, message: &str) {
    log(LogCategory::Error, conversation_id, message);
}

/// Clean up log files older than `keep_days` in `log_dir`
pub fn cleanup_old_logs(log_dir: &Path, keep_days: i64) -> std::io::Result<usize> {
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(keep_days);

    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                    deleted += 1;
                }
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_shortens_conversation_id() {
        let line = format_line(
            LogCategory::Cognitive,
            Some("0123456789abcdef"),
            "named conversation",
        );
        assert!(line.contains("[COGNITIVE]"));
        assert!(line.contains("conversation=01234567 | named conversation"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_format_line_without_conversation() {
        let line = format_line(LogCategory::Store, None, "schema ready");
        assert!(line.contains("[STORE] schema ready"));
    }

    #[test]
    fn test_cleanup_keeps_fresh_logs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("persona-chat-2026-01-01.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let deleted = cleanup_old_logs(dir.path(), 7).unwrap();
        assert_eq!(deleted, 0);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_console_echo_toggle() {
        assert!(!console_echo());
        set_console_echo(true);
        assert!(console_echo());
        set_console_echo(false);
        assert!(!console_echo());
    }
}
