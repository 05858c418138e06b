//! Persona registry
//!
//! A persona is a named assistant configuration. Each one owns a directory
//! under `<data_dir>/personas/<name>/` holding its `persona.json`, its
//! conversation database and its user profiles.

use crate::db::ConversationStore;
use crate::error::{Error, Result};
use crate::logging;
use crate::profile::ProfileStore;
use crate::prompts;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PERSONA_FILE: &str = "persona.json";
const DATABASE_FILE: &str = "conversations.db";
const PROFILES_DIR: &str = "profiles";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PersonaConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Overrides the configured model for this persona
    #[serde(default)]
    pub model: Option<String>,
    pub created_at: String,
}

/// An opened persona: config plus its stores
pub struct Persona {
    pub config: PersonaConfig,
    pub store: Arc<ConversationStore>,
    pub profiles: Arc<ProfileStore>,
}

impl Persona {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("persona name is empty".to_string()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::InvalidInput(format!(
            "persona name '{}' may only contain letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}

pub struct PersonaRegistry {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<Persona>>>,
}

impl PersonaRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            open: Mutex::new(HashMap::new()),
        }
    }

    fn persona_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<Persona>>>> {
        self.open
            .lock()
            .map_err(|_| Error::StoreUnavailable("persona cache lock poisoned".to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.persona_dir(name).join(PERSONA_FILE).exists()
    }

    pub fn create(&self, name: &str, description: &str, system_prompt: Option<&str>) -> Result<PersonaConfig> {
        validate_name(name)?;
        if self.exists(name) {
            return Err(Error::InvalidInput(format!("persona '{}' already exists", name)));
        }

        let config = PersonaConfig {
            name: name.to_string(),
            description: description.to_string(),
            system_prompt: system_prompt
                .unwrap_or(prompts::DEFAULT_PERSONA_PROMPT)
                .to_string(),
            model: None,
            created_at: Utc::now().to_rfc3339(),
        };
        self.save(&config)?;
        logging::log_conversation(None, &format!("Created persona '{}'", name));
        Ok(config)
    }

    pub fn save(&self, config: &PersonaConfig) -> Result<()> {
        validate_name(&config.name)?;
        let dir = self.persona_dir(&config.name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(PERSONA_FILE), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<PersonaConfig> {
        validate_name(name)?;
        let path = self.persona_dir(name).join(PERSONA_FILE);
        if !path.exists() {
            return Err(Error::NotFound(format!("persona '{}'", name)));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// All personas, sorted by name. Directories without a readable
    /// `persona.json` are skipped.
    pub fn list(&self) -> Result<Vec<PersonaConfig>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut personas = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match self.get(&name) {
                Ok(config) => personas.push(config),
                Err(e) => logging::log_error(None, &format!("Skipping persona dir '{}': {}", name, e)),
            }
        }
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(personas)
    }

    /// Create `name` with the default prompt unless it already exists
    pub fn ensure_default(&self, name: &str) -> Result<PersonaConfig> {
        if self.exists(name) {
            return self.get(name);
        }
        self.create(name, "Default assistant", None)
    }

    /// Open a persona's stores. Repeated calls share one store instance.
    pub fn open(&self, name: &str) -> Result<Arc<Persona>> {
        let mut cache = self.cache()?;
        if let Some(persona) = cache.get(name) {
            return Ok(persona.clone());
        }

        let config = self.get(name)?;
        let dir = self.persona_dir(name);
        let store = ConversationStore::open(&dir.join(DATABASE_FILE))?;
        let persona = Arc::new(Persona {
            config,
            store: Arc::new(store),
            profiles: Arc::new(ProfileStore::new(&dir.join(PROFILES_DIR))),
        });
        cache.insert(name.to_string(), persona.clone());
        logging::log_store(None, &format!("Opened persona '{}'", name));
        Ok(persona)
    }

    /// Delete a persona and all of its data
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if !self.exists(name) {
            return Err(Error::NotFound(format!("persona '{}'", name)));
        }
        self.cache()?.remove(name);
        fs::remove_dir_all(self.persona_dir(name))?;
        logging::log_conversation(None, &format!("Deleted persona '{}'", name));
        Ok(())
    }
}
