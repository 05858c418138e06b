//! Application configuration
//!
//! Settings live in `<data_dir>/config.json`. Environment variables override
//! whatever the file says, which is how API keys normally arrive.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";
pub const DEFAULT_PERSONA: &str = "assistant";
pub const DEFAULT_USER: &str = "default";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAI,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "gpt" => Some(Self::OpenAI),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAI => "openai",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub anthropic_key: Option<String>,
    pub openai_key: Option<String>,
    pub default_persona: String,
    pub default_user: String,
    pub log_retention_days: i64,
    /// Messages sent to the provider per turn, oldest dropped first
    pub history_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: None,
            provider: ProviderKind::Anthropic,
            model: None,
            anthropic_key: None,
            openai_key: None,
            default_persona: DEFAULT_PERSONA.to_string(),
            default_user: DEFAULT_USER.to_string(),
            log_retention_days: 7,
            history_limit: 20,
        }
    }
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".persona-chat")
}

impl AppConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load with an explicit variable lookup
    pub fn load_with<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = env("PERSONA_CHAT_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let mut config = Self::read_file(&data_dir)?;
        config.data_dir = data_dir;

        if let Some(dir) = env("PERSONA_CHAT_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(key) = env("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
            config.anthropic_key = Some(key);
        }
        if let Some(key) = env("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            config.openai_key = Some(key);
        }
        if let Some(provider) = env("PERSONA_CHAT_PROVIDER") {
            config.provider = ProviderKind::from_str(&provider).ok_or_else(|| {
                Error::InvalidInput(format!("unknown provider '{}'", provider))
            })?;
        }
        if let Some(model) = env("PERSONA_CHAT_MODEL").filter(|m| !m.is_empty()) {
            config.model = Some(model);
        }

        Ok(config)
    }

    fn read_file(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the config back to `<data_dir>/config.json`
    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(self.data_dir.join(CONFIG_FILE), json)?;
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }

    pub fn personas_dir(&self) -> PathBuf {
        self.data_dir.join("personas")
    }
}
