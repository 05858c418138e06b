//! Background cognitive service
//!
//! After a conversation is first stored, a job is spawned that asks the
//! provider to name the conversation and to suggest profile updates. The
//! chat loop never waits on it. Every job ends with a `CognitiveReport` on
//! the service's channel, so failures are observable without being
//! propagated into the chat flow.

use crate::db::{ConversationStore, HistoryEntry};
use crate::error::{Error, Result};
use crate::logging;
use crate::profile::{ProfileInstruction, ProfileStore};
use crate::prompts;
use crate::provider::{ChatMessage, LlmProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Transcript entries sent to the provider, newest kept
const MAX_TRANSCRIPT_ENTRIES: usize = 40;

#[derive(Debug, Clone, PartialEq)]
pub struct CognitiveUpdate {
    pub name: String,
    pub instructions: Vec<ProfileInstruction>,
}

pub struct CognitiveJob {
    pub persona: String,
    pub user: String,
    pub conversation_id: String,
    pub transcript: Vec<HistoryEntry>,
    pub store: Arc<ConversationStore>,
    pub profiles: Arc<ProfileStore>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CognitiveOutcome {
    Completed { name: String, applied: usize },
    Failed { error: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CognitiveReport {
    pub persona: String,
    pub user: String,
    pub conversation_id: String,
    pub outcome: CognitiveOutcome,
}

/// Pull the conversation name and the instruction list out of free text.
///
/// The instruction list is the JSON array that ends at the last `]`; the
/// name is the first double-quoted string before it.
pub fn parse_cognitive_response(response: &str) -> Result<CognitiveUpdate> {
    let end = response
        .rfind(']')
        .ok_or_else(|| Error::MalformedResponse("no instruction list in response".to_string()))?;

    let mut list_start = None;
    for (idx, _) in response[..end].match_indices('[') {
        if let Ok(serde_json::Value::Array(_)) =
            serde_json::from_str::<serde_json::Value>(&response[idx..=end])
        {
            list_start = Some(idx);
            break;
        }
    }
    let start = list_start
        .ok_or_else(|| Error::MalformedResponse("instruction list is not valid JSON".to_string()))?;

    let instructions: Vec<ProfileInstruction> = serde_json::from_str(&response[start..=end])
        .map_err(|e| Error::MalformedResponse(format!("bad profile instruction: {}", e)))?;

    let name = quoted_name(&response[..start])
        .ok_or_else(|| Error::MalformedResponse("no quoted conversation name".to_string()))?;

    Ok(CognitiveUpdate { name, instructions })
}

fn quoted_name(text: &str) -> Option<String> {
    let open = text.find('"')?;
    let rest = &text[open + 1..];
    let close = rest.find('"')?;
    let name = rest[..close].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn format_transcript(transcript: &[HistoryEntry]) -> String {
    let skip = transcript.len().saturating_sub(MAX_TRANSCRIPT_ENTRIES);
    transcript
        .iter()
        .skip(skip)
        .map(|m| format!("{}: {}", m.role.to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct CognitiveService {
    provider: Arc<dyn LlmProvider>,
    reports: mpsc::UnboundedSender<CognitiveReport>,
}

impl CognitiveService {
    pub fn new(provider: Arc<dyn LlmProvider>) -> (Self, mpsc::UnboundedReceiver<CognitiveReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(provider, tx), rx)
    }

    /// Report into an existing channel
    pub fn with_sender(provider: Arc<dyn LlmProvider>, reports: mpsc::UnboundedSender<CognitiveReport>) -> Self {
        Self { provider, reports }
    }

    /// Spawn the job and return immediately. Awaiting the handle is optional.
    pub fn schedule(&self, job: CognitiveJob) -> JoinHandle<()> {
        let service = self.clone();
        logging::log_cognitive(Some(&job.conversation_id), "Spawning cognitive task...");

        tokio::spawn(async move {
            let outcome = match service.run(&job).await {
                Ok(update) => {
                    logging::log_cognitive(Some(&job.conversation_id), &format!(
                        "Cognitive task completed: \"{}\", {} profile updates",
                        update.name,
                        update.instructions.len()
                    ));
                    CognitiveOutcome::Completed {
                        name: update.name,
                        applied: update.instructions.len(),
                    }
                }
                Err(e) => {
                    logging::log_error(Some(&job.conversation_id), &format!(
                        "Cognitive task aborted: {}", e
                    ));
                    CognitiveOutcome::Failed { error: e.to_string() }
                }
            };

            // Nobody listening is fine
            let _ = service.reports.send(CognitiveReport {
                persona: job.persona,
                user: job.user,
                conversation_id: job.conversation_id,
                outcome,
            });
        })
    }

    /// Run one job to completion: ask, parse, rename, update profile.
    /// Nothing is written unless the response parses.
    pub async fn run(&self, job: &CognitiveJob) -> Result<CognitiveUpdate> {
        if job.transcript.is_empty() {
            return Err(Error::InvalidInput("empty transcript".to_string()));
        }

        let profile = job.profiles.load(&job.user)?;
        let user_prompt = prompts::cognitive_user_prompt(&profile.render(), &format_transcript(&job.transcript));

        logging::log_cognitive(Some(&job.conversation_id), &format!(
            "Requesting name and profile updates via {} ({} transcript entries)",
            self.provider.name(),
            job.transcript.len()
        ));

        let response = self
            .provider
            .complete(
                Some(prompts::COGNITIVE_SYSTEM_PROMPT),
                vec![ChatMessage::new("user", &user_prompt)],
                0.2,
                Some(800),
            )
            .await?;

        let update = parse_cognitive_response(&response).map_err(|e| {
            let preview: String = response.chars().take(200).collect();
            logging::log_error(Some(&job.conversation_id), &format!(
                "Failed to parse cognitive response: {}. Response: {}", e, preview
            ));
            e
        })?;

        job.store
            .update_conversation_name(&job.user, &job.conversation_id, &update.name)?;

        if !update.instructions.is_empty() {
            job.profiles.apply(&job.user, update.instructions.clone())?;
        }

        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InsertOutcome, NewConversation, ROLE_ASSISTANT, ROLE_USER};
    use crate::profile::FieldValue;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: std::result::Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            _system_prompt: Option<&str>,
            messages: Vec<ChatMessage>,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .extend(messages.into_iter().map(|m| m.content));
            self.reply.clone().map_err(Error::Provider)
        }
    }

    fn entry(role: &str, content: &str) -> HistoryEntry {
        HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ConversationStore>,
        profiles: Arc<ProfileStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConversationStore::open_in_memory().unwrap());
        let profiles = Arc::new(ProfileStore::new(&dir.path().join("profiles")));
        let outcome = store
            .insert_conversation(&NewConversation {
                user: "alice".to_string(),
                conversation_id: "c1".to_string(),
                persona: "assistant".to_string(),
                transcript: vec![],
                loaded: false,
            })
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        Fixture {
            _dir: dir,
            store,
            profiles,
        }
    }

    fn job(f: &Fixture) -> CognitiveJob {
        CognitiveJob {
            persona: "assistant".to_string(),
            user: "alice".to_string(),
            conversation_id: "c1".to_string(),
            transcript: vec![
                entry(ROLE_USER, "I'm planning a trip to Kyoto with my sister"),
                entry(ROLE_ASSISTANT, "Great! When are you going?"),
            ],
            store: f.store.clone(),
            profiles: f.profiles.clone(),
        }
    }

    const GOOD_RESPONSE: &str = r#"Name: "Kyoto trip planning"
[
  {"action": "addfield", "field": "travel", "content": "Kyoto", "observations": "plans trips with family"},
  {"action": "appendContentByField", "field": "family", "content": "sister"}
]"#;

    #[test]
    fn test_parse_name_and_instructions() {
        let update = parse_cognitive_response(GOOD_RESPONSE).unwrap();
        assert_eq!(update.name, "Kyoto trip planning");
        assert_eq!(update.instructions.len(), 2);
        assert_eq!(update.instructions[1].field(), "family");
    }

    #[test]
    fn test_parse_handles_fences_and_brackets_in_name() {
        let response = "Sure.\nName: \"Budget [2026] review\"\n```json\n[]\n```";
        let update = parse_cognitive_response(response).unwrap();
        assert_eq!(update.name, "Budget [2026] review");
        assert!(update.instructions.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed_responses() {
        let cases = [
            "Name: \"No list here\"",
            "[{\"action\": \"addfield\", \"field\": \"x\", \"content\": \"y\"}]",
            "Name: \"Broken\" [{\"action\": \"addfield\", ",
            "Name: \"Bad action\" [{\"action\": \"dropfield\", \"field\": \"x\", \"content\": \"y\"}]",
            "Name: \"\" []",
        ];
        for case in cases {
            let err = parse_cognitive_response(case).unwrap_err();
            assert!(matches!(err, Error::MalformedResponse(_)), "case: {}", case);
        }
    }

    #[tokio::test]
    async fn test_job_names_conversation_and_updates_profile() {
        let f = fixture();
        f.profiles
            .apply("alice", vec![ProfileInstruction::AddField {
                field: "family".to_string(),
                content: "brother".into(),
                observations: None,
            }])
            .unwrap();

        let provider = ScriptedProvider::ok(GOOD_RESPONSE);
        let (service, mut reports) = CognitiveService::new(provider.clone());

        service.schedule(job(&f)).await.unwrap();

        let report = reports.recv().await.unwrap();
        assert_eq!(report.conversation_id, "c1");
        assert_eq!(
            report.outcome,
            CognitiveOutcome::Completed {
                name: "Kyoto trip planning".to_string(),
                applied: 2
            }
        );

        let conv = f.store.get_conversation("alice", "c1").unwrap().unwrap();
        assert_eq!(conv.name.as_deref(), Some("Kyoto trip planning"));

        let profile = f.profiles.load("alice").unwrap();
        assert_eq!(profile.fields["travel"].content, FieldValue::Single("Kyoto".to_string()));
        assert_eq!(
            profile.fields["family"].content,
            FieldValue::Many(vec!["brother".to_string(), "sister".to_string()])
        );

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].contains("- family: brother"));
        assert!(prompts[0].contains("USER: I'm planning a trip to Kyoto"));
    }

    #[tokio::test]
    async fn test_malformed_response_aborts_without_writes() {
        let f = fixture();
        let (service, mut reports) =
            CognitiveService::new(ScriptedProvider::ok("I think this chat is about travel."));

        service.schedule(job(&f)).await.unwrap();

        let report = reports.recv().await.unwrap();
        assert!(matches!(report.outcome, CognitiveOutcome::Failed { .. }));
        let conv = f.store.get_conversation("alice", "c1").unwrap().unwrap();
        assert_eq!(conv.name, None);
        assert!(f.profiles.load("alice").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported() {
        let f = fixture();
        let (service, mut reports) = CognitiveService::new(ScriptedProvider::failing("timeout"));

        service.schedule(job(&f)).await.unwrap();

        match reports.recv().await.unwrap().outcome {
            CognitiveOutcome::Failed { error } => assert!(error.contains("timeout")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deleted_conversation_fails_job() {
        let f = fixture();
        f.store.delete_conversation("alice", "c1").unwrap();
        let (service, _reports) = CognitiveService::new(ScriptedProvider::ok(GOOD_RESPONSE));

        let err = service.run(&job(&f)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(f.profiles.load("alice").unwrap().is_empty());
    }

    #[test]
    fn test_transcript_keeps_newest_entries() {
        let transcript: Vec<_> = (0..50).map(|i| entry(ROLE_USER, &format!("m{}", i))).collect();
        let text = format_transcript(&transcript);
        assert!(!text.contains("USER: m9\n"));
        assert!(text.starts_with("USER: m10\n"));
        assert!(text.ends_with("USER: m49"));
    }
}
