//! Per-user profile documents
//!
//! Each user gets one JSON file per persona holding free-form named fields.
//! Fields are created and extended by instructions the cognitive service
//! pulls out of LLM responses.

use crate::error::{Error, Result};
use crate::logging;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A field's content or observations: one value, or a list once appended to
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Many(Vec<String>),
}

impl FieldValue {
    /// Scalar becomes `[original, new..]`; a list grows
    pub fn append(&mut self, value: FieldValue) {
        let incoming = value.into_vec();
        match self {
            FieldValue::Many(items) => items.extend(incoming),
            FieldValue::Single(original) => {
                let mut items = vec![std::mem::take(original)];
                items.extend(incoming);
                *self = FieldValue::Many(items);
            }
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            FieldValue::Single(s) => vec![s],
            FieldValue::Many(items) => items,
        }
    }

    pub fn render(&self) -> String {
        match self {
            FieldValue::Single(s) => s.clone(),
            FieldValue::Many(items) => items.join("; "),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Single(s.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProfileField {
    pub content: FieldValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<FieldValue>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub user: String,
    #[serde(default)]
    pub fields: BTreeMap<String, ProfileField>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// An instruction as emitted by the LLM
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "action")]
pub enum ProfileInstruction {
    #[serde(rename = "addfield", alias = "addField")]
    AddField {
        #[serde(alias = "field_name", alias = "fieldName")]
        field: String,
        content: FieldValue,
        #[serde(default)]
        observations: Option<FieldValue>,
    },
    #[serde(rename = "appendContentByField", alias = "appendcontentbyfield")]
    AppendContentByField {
        #[serde(alias = "field_name", alias = "fieldName")]
        field: String,
        content: FieldValue,
        #[serde(default)]
        observations: Option<FieldValue>,
    },
}

impl ProfileInstruction {
    pub fn action(&self) -> &'static str {
        match self {
            ProfileInstruction::AddField { .. } => "addfield",
            ProfileInstruction::AppendContentByField { .. } => "appendContentByField",
        }
    }

    pub fn field(&self) -> &str {
        match self {
            ProfileInstruction::AddField { field, .. } => field,
            ProfileInstruction::AppendContentByField { field, .. } => field,
        }
    }
}

impl UserProfile {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            fields: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// Create `field`. An existing field is appended to instead so nothing
    /// the model said earlier is lost.
    pub fn add_field(&mut self, field: &str, content: FieldValue, observations: Option<FieldValue>) {
        if self.fields.contains_key(field) {
            self.append_content_by_field(field, content, observations);
            return;
        }
        self.fields.insert(
            field.to_string(),
            ProfileField {
                content,
                observations,
            },
        );
    }

    /// Append to `field`, creating it when missing
    pub fn append_content_by_field(&mut self, field: &str, content: FieldValue, observations: Option<FieldValue>) {
        match self.fields.get_mut(field) {
            None => {
                self.fields.insert(
                    field.to_string(),
                    ProfileField {
                        content,
                        observations,
                    },
                );
            }
            Some(existing) => {
                existing.content.append(content);
                if let Some(obs) = observations {
                    match existing.observations.as_mut() {
                        Some(current) => current.append(obs),
                        None => existing.observations = Some(obs),
                    }
                }
            }
        }
    }

    pub fn apply(&mut self, instruction: ProfileInstruction) {
        match instruction {
            ProfileInstruction::AddField { field, content, observations } => {
                self.add_field(&field, content, observations)
            }
            ProfileInstruction::AppendContentByField { field, content, observations } => {
                self.append_content_by_field(&field, content, observations)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compact text form for prompts
    pub fn render(&self) -> String {
        if self.fields.is_empty() {
            return "No profile information yet.".to_string();
        }
        self.fields
            .iter()
            .map(|(name, field)| match &field.observations {
                Some(obs) => format!("- {}: {} (observed: {})", name, field.content.render(), obs.render()),
                None => format!("- {}: {}", name, field.content.render()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Map a user name onto a safe file stem: a readable sanitized prefix plus
/// the hex-encoded name, so distinct users never share a file.
fn file_stem(user: &str) -> String {
    let readable: String = user
        .chars()
        .take(32)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let encoded: String = user.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", readable, encoded)
}

/// JSON profile files for one persona
pub struct ProfileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, user: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(user)))
    }

    /// Load a profile; a missing file is an empty profile
    pub fn load(&self, user: &str) -> Result<UserProfile> {
        let path = self.path_for(user);
        if !path.exists() {
            return Ok(UserProfile::new(user));
        }
        let raw = fs::read_to_string(&path)?;
        let mut profile: UserProfile = serde_json::from_str(&raw)?;
        if profile.user.is_empty() {
            profile.user = user.to_string();
        } else if profile.user != user {
            return Err(Error::StoreUnavailable(format!(
                "{} holds the profile of another user", path.display()
            )));
        }
        Ok(profile)
    }

    /// Write via temp file + rename
    pub fn save(&self, profile: &UserProfile) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&profile.user);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(profile)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read-modify-write a user's profile with a batch of instructions
    pub fn apply(&self, user: &str, instructions: Vec<ProfileInstruction>) -> Result<UserProfile> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::StoreUnavailable("profile lock poisoned".to_string()))?;

        let mut profile = self.load(user)?;
        let count = instructions.len();
        for instruction in instructions {
            logging::log_profile(None, &format!(
                "{} user={} field={}",
                instruction.action(),
                user,
                instruction.field()
            ));
            profile.apply(instruction);
        }
        profile.updated_at = Some(Utc::now().to_rfc3339());
        self.save(&profile)?;

        logging::log_profile(None, &format!("Applied {} instructions for user={}", count, user));
        Ok(profile)
    }

    pub fn delete(&self, user: &str) -> Result<bool> {
        let path = self.path_for(user);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}
