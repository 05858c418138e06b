pub mod anthropic;
pub mod cli;
pub mod cognitive;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod openai;
pub mod persona;
pub mod profile;
pub mod prompts;
pub mod provider;

use cognitive::{CognitiveJob, CognitiveReport, CognitiveService};
use config::AppConfig;
use db::{
    Conversation, ConversationStore, FunctionCall, FunctionResponse, HistoryEntry, InsertOutcome,
    NewConversation, ROLE_USER,
};
use error::{Error, Result};
use once_cell::sync::OnceCell;
use persona::{Persona, PersonaRegistry};
use profile::UserProfile;
use provider::{ChatMessage, LlmProvider};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatTurn {
    pub conversation_id: String,
    pub reply: String,
    pub user_message_id: i64,
    pub reply_message_id: i64,
    /// Set when this exchange inserted (or replaced) the conversation row
    pub stored: Option<String>,
}

// ============ App Initialization ============

/// Prepare the data directory, logging and the default persona
pub fn init_app(config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;

    let log_dir = config.log_dir();
    if let Err(e) = logging::init_logging(&log_dir) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    let _ = logging::cleanup_old_logs(&log_dir, config.log_retention_days);

    let registry = PersonaRegistry::new(&config.personas_dir());
    registry.ensure_default(&config.default_persona)?;

    logging::log_conversation(None, &format!(
        "App initialized at {}", config.data_dir.display()
    ));
    Ok(())
}

/// The last `limit` turns of `history` plus the new user message. The window
/// is trimmed forward so it always opens on a user turn.
fn context_window(history: &[HistoryEntry], text: &str, limit: usize) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .map(|h| ChatMessage::new(&h.role, &h.content))
        .chain(std::iter::once(ChatMessage::new(ROLE_USER, text)))
        .collect();

    let start = messages.len().saturating_sub(limit.max(1));
    let skip = messages[start..]
        .iter()
        .position(|m| m.role == ROLE_USER)
        .map_or(start, |offset| start + offset);
    messages.drain(..skip);
    messages
}

enum ProviderSource {
    Config,
    Fixed(Arc<dyn LlmProvider>),
}

type LoadedKey = (String, String, String);

/// Front door for the chat loop: personas, conversations, profiles and the
/// background cognitive service.
pub struct Assistant {
    config: AppConfig,
    personas: PersonaRegistry,
    source: ProviderSource,
    providers: Mutex<HashMap<Option<String>, Arc<dyn LlmProvider>>>,
    cognitive: OnceCell<CognitiveService>,
    report_tx: mpsc::UnboundedSender<CognitiveReport>,
    report_rx: Mutex<Option<mpsc::UnboundedReceiver<CognitiveReport>>>,
    loaded: Mutex<HashSet<LoadedKey>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Assistant {
    /// Providers are built from the config on first use, so commands that
    /// never call a model work without API keys.
    pub fn new(config: AppConfig) -> Self {
        Self::build(config, ProviderSource::Config)
    }

    /// Use one provider for every persona
    pub fn with_provider(config: AppConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self::build(config, ProviderSource::Fixed(provider))
    }

    fn build(config: AppConfig, source: ProviderSource) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            personas: PersonaRegistry::new(&config.personas_dir()),
            config,
            source,
            providers: Mutex::new(HashMap::new()),
            cognitive: OnceCell::new(),
            report_tx,
            report_rx: Mutex::new(Some(report_rx)),
            loaded: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    /// Hand out the cognitive report receiver. Only the first caller gets it.
    pub fn take_reports(&self) -> Option<mpsc::UnboundedReceiver<CognitiveReport>> {
        self.report_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn provider(&self, model: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        match &self.source {
            ProviderSource::Fixed(provider) => Ok(provider.clone()),
            ProviderSource::Config => {
                let mut cache = self
                    .providers
                    .lock()
                    .map_err(|_| Error::StoreUnavailable("provider cache lock poisoned".to_string()))?;
                let key = model.map(|m| m.to_string());
                if let Some(provider) = cache.get(&key) {
                    return Ok(provider.clone());
                }
                let provider = provider::provider_from_config(&self.config, model)?;
                cache.insert(key, provider.clone());
                Ok(provider)
            }
        }
    }

    fn cognitive(&self) -> Result<&CognitiveService> {
        self.cognitive.get_or_try_init(|| {
            let provider = self.provider(None)?;
            Ok(CognitiveService::with_sender(provider, self.report_tx.clone()))
        })
    }

    fn loaded_set(&self) -> Result<std::sync::MutexGuard<'_, HashSet<LoadedKey>>> {
        self.loaded
            .lock()
            .map_err(|_| Error::StoreUnavailable("loaded-conversation lock poisoned".to_string()))
    }

    fn loaded_key(persona: &str, user: &str, conversation_id: &str) -> LoadedKey {
        (persona.to_string(), user.to_string(), conversation_id.to_string())
    }

    // ============ Chat ============

    /// One user turn: ask the provider, then store the user message and the
    /// reply together. A failed provider call leaves the store untouched.
    ///
    /// The first exchange of a conversation (or the first one after it was
    /// loaded from history) writes the conversation row and schedules the
    /// cognitive job without waiting for it.
    pub async fn send_message(
        &self,
        persona_name: &str,
        user: &str,
        conversation_id: Option<&str>,
        text: &str,
    ) -> Result<ChatTurn> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("message is empty".to_string()));
        }

        let persona = self.personas.open(persona_name)?;
        let store = &persona.store;
        let conversation_id = conversation_id
            .map(|id| id.to_string())
            .unwrap_or_else(ConversationStore::new_conversation_id);
        let key = Self::loaded_key(persona_name, user, &conversation_id);

        let exists = store.conversation_exists(user, &conversation_id)?;
        let was_loaded = self.loaded_set()?.contains(&key);

        let history = store.get_history(user, &conversation_id)?;
        let messages = context_window(&history, text, self.config.history_limit);

        let profile = persona.profiles.load(user)?;
        let system = prompts::chat_system_prompt(&persona.config.system_prompt, &profile.render());

        let provider = self.provider(persona.config.model.as_deref())?;
        let reply = provider
            .complete(Some(&system), messages, 0.7, None)
            .await
            .map_err(|e| {
                logging::log_error(Some(&conversation_id), &format!("Chat completion failed: {}", e));
                e
            })?;

        // Nothing is stored until the provider has answered
        let (user_message_id, reply_message_id) = store.add_exchange(user, &conversation_id, text, &reply)?;
        let transcript = store.get_history(user, &conversation_id)?;

        let stored = if !exists || was_loaded {
            let outcome = store.insert_conversation(&NewConversation {
                user: user.to_string(),
                conversation_id: conversation_id.clone(),
                persona: persona_name.to_string(),
                transcript: transcript.clone(),
                loaded: was_loaded,
            })?;
            self.loaded_set()?.remove(&key);

            if outcome != InsertOutcome::Unchanged {
                self.schedule_cognitive(&persona, user, &conversation_id, transcript);
            }
            Some(format!("{:?}", outcome).to_lowercase())
        } else {
            store.update_transcript(user, &conversation_id, &transcript)?;
            None
        };

        Ok(ChatTurn {
            conversation_id,
            reply,
            user_message_id,
            reply_message_id,
            stored,
        })
    }

    /// Fire-and-forget: the chat flow never awaits the job. The handle is
    /// kept so `finish_background` can let it complete before shutdown.
    fn schedule_cognitive(&self, persona: &Arc<Persona>, user: &str, conversation_id: &str, transcript: Vec<HistoryEntry>) {
        let service = match self.cognitive() {
            Ok(service) => service,
            Err(e) => {
                logging::log_error(Some(conversation_id), &format!(
                    "Cognitive service unavailable: {}", e
                ));
                return;
            }
        };
        let handle = service.schedule(CognitiveJob {
            persona: persona.name().to_string(),
            user: user.to_string(),
            conversation_id: conversation_id.to_string(),
            transcript,
            store: persona.store.clone(),
            profiles: persona.profiles.clone(),
        });
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|h| !h.is_finished());
            pending.push(handle);
        }
    }

    /// Wait up to `timeout` for scheduled cognitive jobs. Returns how many
    /// were still running when the time ran out; those are aborted.
    pub async fn finish_background(&self, timeout: Duration) -> usize {
        let handles: Vec<JoinHandle<()>> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return 0,
        };

        let deadline = Instant::now() + timeout;
        let mut unfinished = 0;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                unfinished += 1;
            }
        }
        if unfinished > 0 {
            logging::log_error(None, &format!(
                "{} cognitive jobs did not finish before shutdown", unfinished
            ));
        }
        unfinished
    }

    // ============ Function Calls ============

    pub fn record_function_call(
        &self,
        persona_name: &str,
        user: &str,
        conversation_id: &str,
        message_id: i64,
        function_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<i64> {
        let persona = self.personas.open(persona_name)?;
        persona.store.add_function_call(
            user,
            conversation_id,
            message_id,
            function_name,
            &arguments.to_string(),
        )
    }

    pub fn record_function_response(
        &self,
        persona_name: &str,
        user: &str,
        conversation_id: &str,
        function_call_id: i64,
        response: &str,
    ) -> Result<i64> {
        let persona = self.personas.open(persona_name)?;
        persona.store.add_response(user, conversation_id, function_call_id, response)
    }

    pub fn function_calls(&self, persona_name: &str, user: &str, conversation_id: &str, message_id: i64) -> Result<Vec<FunctionCall>> {
        self.personas
            .open(persona_name)?
            .store
            .get_function_calls(user, conversation_id, message_id)
    }

    pub fn function_responses(&self, persona_name: &str, user: &str, conversation_id: &str, function_call_id: i64) -> Result<Vec<FunctionResponse>> {
        self.personas
            .open(persona_name)?
            .store
            .get_responses(user, conversation_id, function_call_id)
    }

    // ============ Conversations ============

    /// Open a stored conversation to continue it. The next exchange writes
    /// the conversation back with `loaded` set.
    pub fn load_conversation(&self, persona_name: &str, user: &str, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        let persona = self.personas.open(persona_name)?;
        if !persona.store.conversation_exists(user, conversation_id)? {
            return Err(Error::NotFound(format!("conversation {}", conversation_id)));
        }
        self.loaded_set()?
            .insert(Self::loaded_key(persona_name, user, conversation_id));
        logging::log_conversation(Some(conversation_id), "Loaded conversation from history");
        persona.store.get_history(user, conversation_id)
    }

    pub fn history(&self, persona_name: &str, user: &str, conversation_id: &str) -> Result<Vec<HistoryEntry>> {
        self.personas.open(persona_name)?.store.get_history(user, conversation_id)
    }

    pub fn list_conversations(&self, persona_name: &str, user: &str, limit: usize) -> Result<Vec<Conversation>> {
        self.personas.open(persona_name)?.store.list_conversations(user, limit)
    }

    pub fn rename_conversation(&self, persona_name: &str, user: &str, conversation_id: &str, name: &str) -> Result<()> {
        self.personas
            .open(persona_name)?
            .store
            .update_conversation_name(user, conversation_id, name)
    }

    pub fn delete_conversation(&self, persona_name: &str, user: &str, conversation_id: &str) -> Result<bool> {
        let persona = self.personas.open(persona_name)?;
        self.loaded_set()?
            .remove(&Self::loaded_key(persona_name, user, conversation_id));
        persona.store.delete_conversation(user, conversation_id)
    }

    // ============ Profiles ============

    pub fn profile(&self, persona_name: &str, user: &str) -> Result<UserProfile> {
        self.personas.open(persona_name)?.profiles.load(user)
    }

    /// Remove every conversation and the profile a persona holds for `user`.
    /// Returns the number of conversations removed.
    pub fn forget_user(&self, persona_name: &str, user: &str) -> Result<usize> {
        let persona = self.personas.open(persona_name)?;
        if let Ok(mut loaded) = self.loaded_set() {
            loaded.retain(|(p, u, _)| !(p == persona_name && u == user));
        }
        let removed = persona.store.reset_user(user)?;
        persona.profiles.delete(user)?;
        logging::log_profile(None, &format!("Forgot user={} for persona '{}'", user, persona_name));
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cognitive::CognitiveOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers chat turns with "reply N" and cognitive prompts with a fixed
    /// naming response.
    struct EchoProvider {
        calls: AtomicUsize,
        last_messages: Mutex<Vec<ChatMessage>>,
    }

    impl EchoProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            system_prompt: Option<&str>,
            messages: Vec<ChatMessage>,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<String> {
            if system_prompt == Some(prompts::COGNITIVE_SYSTEM_PROMPT) {
                return Ok(r#"Name: "Greeting"
[{"action": "addfield", "field": "name", "content": "Sam"}]"#
                    .to_string());
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_messages.lock().unwrap() = messages;
            Ok(format!("reply {}", n))
        }
    }

    fn setup(provider: Arc<EchoProvider>) -> (tempfile::TempDir, Assistant) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.history_limit = 3;
        let assistant = Assistant::with_provider(config, provider);
        assistant.personas().ensure_default("assistant").unwrap();
        (dir, assistant)
    }

    #[tokio::test]
    async fn test_first_exchange_inserts_and_names_conversation() {
        let (_dir, assistant) = setup(EchoProvider::new());
        let mut reports = assistant.take_reports().unwrap();
        assert!(assistant.take_reports().is_none());

        let turn = assistant
            .send_message("assistant", "alice", None, "Hi, I'm Sam")
            .await
            .unwrap();
        assert_eq!(turn.reply, "reply 1");
        assert_eq!(turn.stored.as_deref(), Some("inserted"));

        let report = reports.recv().await.unwrap();
        assert_eq!(report.conversation_id, turn.conversation_id);
        assert_eq!(
            report.outcome,
            CognitiveOutcome::Completed { name: "Greeting".to_string(), applied: 1 }
        );

        let convs = assistant.list_conversations("assistant", "alice", 10).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].name.as_deref(), Some("Greeting"));
        assert_eq!(convs[0].transcript.len(), 2);
        assert!(assistant.profile("assistant", "alice").unwrap().fields.contains_key("name"));
    }

    #[tokio::test]
    async fn test_follow_up_updates_transcript_only() {
        let provider = EchoProvider::new();
        let (_dir, assistant) = setup(provider.clone());

        let first = assistant.send_message("assistant", "alice", None, "one").await.unwrap();
        let id = first.conversation_id.clone();
        let second = assistant.send_message("assistant", "alice", Some(&id), "two").await.unwrap();
        let third = assistant.send_message("assistant", "alice", Some(&id), "three").await.unwrap();

        assert_eq!(second.stored, None);
        assert_eq!(third.reply, "reply 3");

        let history = assistant.history("assistant", "alice", &id).unwrap();
        let contents: Vec<_> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "reply 1", "two", "reply 2", "three", "reply 3"]);

        // history_limit = 3
        let sent = provider.last_messages.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2], ChatMessage::new("user", "three"));

        let conv = assistant.list_conversations("assistant", "alice", 1).unwrap().remove(0);
        assert_eq!(conv.transcript.len(), 6);
    }

    #[tokio::test]
    async fn test_loaded_conversation_is_replaced_on_next_exchange() {
        let (_dir, assistant) = setup(EchoProvider::new());
        let first = assistant.send_message("assistant", "alice", None, "one").await.unwrap();
        let id = first.conversation_id;

        let history = assistant.load_conversation("assistant", "alice", &id).unwrap();
        assert_eq!(history.len(), 2);

        let turn = assistant.send_message("assistant", "alice", Some(&id), "back again").await.unwrap();
        assert_eq!(turn.stored.as_deref(), Some("replaced"));

        let next = assistant.send_message("assistant", "alice", Some(&id), "and again").await.unwrap();
        assert_eq!(next.stored, None);

        let convs = assistant.list_conversations("assistant", "alice", 10).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].transcript.len(), 6);
    }

    #[tokio::test]
    async fn test_function_calls_and_delete() {
        let (_dir, assistant) = setup(EchoProvider::new());
        let turn = assistant.send_message("assistant", "alice", None, "weather?").await.unwrap();
        let id = turn.conversation_id.clone();

        let call = assistant
            .record_function_call(
                "assistant",
                "alice",
                &id,
                turn.reply_message_id,
                "get_weather",
                &serde_json::json!({"city": "Oslo"}),
            )
            .unwrap();
        assistant
            .record_function_response("assistant", "alice", &id, call, "{\"temp\": 3}")
            .unwrap();

        let calls = assistant
            .function_calls("assistant", "alice", &id, turn.reply_message_id)
            .unwrap();
        assert_eq!(calls[0].arguments, "{\"city\":\"Oslo\"}");
        let responses = assistant.function_responses("assistant", "alice", &id, call).unwrap();
        assert_eq!(responses[0].response, "{\"temp\": 3}");

        assert!(assistant.delete_conversation("assistant", "alice", &id).unwrap());
        assert!(assistant.history("assistant", "alice", &id).unwrap().is_empty());
        assert!(assistant.function_calls("assistant", "alice", &id, turn.reply_message_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_message_and_unknown_persona() {
        let (_dir, assistant) = setup(EchoProvider::new());
        assert!(matches!(
            assistant.send_message("assistant", "alice", None, "   ").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            assistant.send_message("nobody", "alice", None, "hi").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            assistant.load_conversation("assistant", "alice", "missing"),
            Err(Error::NotFound(_))
        ));
    }

    /// Chat turns fail, or the cognitive pass hangs
    struct BrokenProvider {
        stall_cognitive: bool,
    }

    #[async_trait]
    impl LlmProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn complete(
            &self,
            system_prompt: Option<&str>,
            _messages: Vec<ChatMessage>,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<String> {
            if !self.stall_cognitive {
                return Err(Error::Provider("connection refused".to_string()));
            }
            if system_prompt == Some(prompts::COGNITIVE_SYSTEM_PROMPT) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok("ok".to_string())
        }
    }

    fn setup_with(provider: Arc<dyn LlmProvider>) -> (tempfile::TempDir, Assistant) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.data_dir = dir.path().to_path_buf();
        let assistant = Assistant::with_provider(config, provider);
        assistant.personas().ensure_default("assistant").unwrap();
        (dir, assistant)
    }

    #[tokio::test]
    async fn test_failed_completion_stores_nothing() {
        let (_dir, assistant) = setup_with(Arc::new(BrokenProvider { stall_cognitive: false }));

        let result = assistant.send_message("assistant", "alice", Some("c1"), "hello").await;
        assert!(matches!(result, Err(Error::Provider(_))));

        let store = assistant.personas().open("assistant").unwrap().store.clone();
        assert_eq!(store.count_messages("alice", "c1").unwrap(), 0);
        assert!(assistant.list_conversations("assistant", "alice", 10).unwrap().is_empty());

        // A retry does not see a duplicate user turn either
        let retry = assistant.send_message("assistant", "alice", Some("c1"), "hello").await;
        assert!(retry.is_err());
        assert_eq!(store.count_messages("alice", "c1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_finish_background_waits_for_jobs() {
        let (_dir, assistant) = setup(EchoProvider::new());
        let mut reports = assistant.take_reports().unwrap();

        assistant.send_message("assistant", "alice", None, "hi").await.unwrap();
        assert_eq!(assistant.finish_background(Duration::from_secs(5)).await, 0);
        assert!(matches!(
            reports.try_recv().unwrap().outcome,
            CognitiveOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_finish_background_gives_up_after_timeout() {
        let (_dir, assistant) = setup_with(Arc::new(BrokenProvider { stall_cognitive: true }));

        assistant.send_message("assistant", "alice", None, "hi").await.unwrap();
        assert_eq!(assistant.finish_background(Duration::from_millis(50)).await, 1);
        assert_eq!(assistant.finish_background(Duration::from_millis(50)).await, 0);
    }

    #[tokio::test]
    async fn test_forget_user_removes_conversations_and_profile() {
        let (_dir, assistant) = setup(EchoProvider::new());
        assistant.send_message("assistant", "alice", None, "Hi, I'm Sam").await.unwrap();
        assistant.send_message("assistant", "bob", None, "hello").await.unwrap();
        assistant.finish_background(Duration::from_secs(5)).await;
        assert!(!assistant.profile("assistant", "alice").unwrap().is_empty());

        assert_eq!(assistant.forget_user("assistant", "alice").unwrap(), 1);
        assert!(assistant.list_conversations("assistant", "alice", 10).unwrap().is_empty());
        assert!(assistant.profile("assistant", "alice").unwrap().is_empty());
        assert_eq!(assistant.list_conversations("assistant", "bob", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_context_window_opens_on_user_turn() {
        let entry = |role: &str, content: &str| HistoryEntry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: String::new(),
        };
        let history = vec![
            entry(ROLE_USER, "u1"),
            entry(db::ROLE_ASSISTANT, "a1"),
            entry(ROLE_USER, "u2"),
            entry(db::ROLE_ASSISTANT, "a2"),
        ];

        // Four turns would start on "a1"
        let window = context_window(&history, "u3", 4);
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["u2", "a2", "u3"]);

        let window = context_window(&history, "u3", 20);
        assert_eq!(window.len(), 5);
        assert_eq!(context_window(&[], "only", 0), vec![ChatMessage::new(ROLE_USER, "only")]);
    }

    #[test]
    fn test_init_app_creates_default_persona() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.data_dir = dir.path().to_path_buf();

        init_app(&config).unwrap();

        assert!(dir.path().join("logs").exists());
        let registry = PersonaRegistry::new(&config.personas_dir());
        assert!(registry.exists(config::DEFAULT_PERSONA));
    }
}
