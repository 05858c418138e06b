//! Command-line front end

use crate::cognitive::{CognitiveOutcome, CognitiveReport};
use crate::config::AppConfig;
use crate::error::Result;
use crate::logging;
use crate::{init_app, Assistant};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `chat` waits for cognitive jobs before exiting
const BACKGROUND_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "persona-chat", version, about = "Chat with personas that remember you")]
pub struct Cli {
    /// Persona to talk to (defaults to the configured one)
    #[arg(long, short, global = true)]
    pub persona: Option<String>,

    /// User the conversation and profile belong to
    #[arg(long, short, global = true)]
    pub user: Option<String>,

    /// Echo every log line to stderr, not just errors
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive chat. Pass --conversation to continue a stored one.
    Chat {
        #[arg(long, short)]
        conversation: Option<String>,
    },
    /// List stored conversations, newest first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print a conversation transcript
    History { conversation: String },
    /// Rename a conversation
    Rename { conversation: String, name: String },
    /// Delete a conversation and everything attached to it
    Delete { conversation: String },
    /// Print the user's profile
    Profile,
    /// Delete all of the user's conversations and their profile
    Forget,
    #[command(subcommand)]
    Personas(PersonaCommand),
}

#[derive(Subcommand, Debug)]
pub enum PersonaCommand {
    List,
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        prompt: Option<String>,
    },
    Delete { name: String },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::set_console_echo(cli.verbose);
    let config = AppConfig::load()?;
    init_app(&config)?;

    let persona = cli.persona.clone().unwrap_or_else(|| config.default_persona.clone());
    let user = cli.user.clone().unwrap_or_else(|| config.default_user.clone());
    let assistant = Assistant::new(config);

    match cli.command {
        Command::Chat { conversation } => chat(&assistant, &persona, &user, conversation).await?,
        Command::List { limit } => {
            for conv in assistant.list_conversations(&persona, &user, limit)? {
                println!(
                    "{}  {}  {} messages  {}",
                    conv.conversation_id,
                    conv.last_modified,
                    conv.transcript.len(),
                    conv.name.as_deref().unwrap_or("(unnamed)")
                );
            }
        }
        Command::History { conversation } => {
            for entry in assistant.history(&persona, &user, &conversation)? {
                println!("[{}] {}: {}", entry.timestamp, entry.role, entry.content);
            }
        }
        Command::Rename { conversation, name } => {
            assistant.rename_conversation(&persona, &user, &conversation, &name)?;
        }
        Command::Delete { conversation } => {
            if assistant.delete_conversation(&persona, &user, &conversation)? {
                println!("Deleted {}", conversation);
            } else {
                println!("No conversation {}", conversation);
            }
        }
        Command::Profile => {
            let profile = assistant.profile(&persona, &user)?;
            println!("{}", profile.render());
        }
        Command::Forget => {
            let removed = assistant.forget_user(&persona, &user)?;
            println!("Removed {} conversations and the profile of {}", removed, user);
        }
        Command::Personas(cmd) => personas(&assistant, cmd)?,
    }
    Ok(())
}

fn personas(assistant: &Assistant, cmd: PersonaCommand) -> Result<()> {
    let registry = assistant.personas();
    match cmd {
        PersonaCommand::List => {
            for p in registry.list()? {
                println!("{}  {}", p.name, p.description);
            }
        }
        PersonaCommand::Create { name, description, prompt } => {
            registry.create(&name, &description, prompt.as_deref())?;
            println!("Created persona {}", name);
        }
        PersonaCommand::Delete { name } => {
            registry.delete(&name)?;
            println!("Deleted persona {}", name);
        }
    }
    Ok(())
}

async fn chat(assistant: &Assistant, persona: &str, user: &str, conversation: Option<String>) -> Result<()> {
    let mut conversation_id = conversation;
    if let Some(id) = &conversation_id {
        for entry in assistant.load_conversation(persona, user, id)? {
            println!("{}: {}", entry.role, entry.content);
        }
    }
    let mut reports = assistant.take_reports();

    println!("Chatting with {} as {}. Empty line or Ctrl-D to quit.", persona, user);
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }

        match assistant
            .send_message(persona, user, conversation_id.as_deref(), line.trim())
            .await
        {
            Ok(turn) => {
                println!("{}", turn.reply);
                conversation_id = Some(turn.conversation_id);
            }
            Err(e) => eprintln!("error: {}", e),
        }

        if let Some(rx) = reports.as_mut() {
            drain_reports(rx);
        }
    }

    let unfinished = assistant.finish_background(BACKGROUND_GRACE).await;
    if let Some(rx) = reports.as_mut() {
        drain_reports(rx);
    }
    if unfinished > 0 {
        eprintln!("  ({} background updates did not finish)", unfinished);
    }

    if let Some(id) = conversation_id {
        println!("Conversation {}", id);
    }
    Ok(())
}

fn drain_reports(rx: &mut mpsc::UnboundedReceiver<CognitiveReport>) {
    while let Ok(report) = rx.try_recv() {
        match report.outcome {
            CognitiveOutcome::Completed { name, applied } => {
                println!("  (named \"{}\", {} profile updates)", name, applied);
            }
            CognitiveOutcome::Failed { error } => {
                eprintln!("  (background update failed: {})", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_with_globals() {
        let cli = Cli::try_parse_from([
            "persona-chat", "chat", "--conversation", "abc", "--persona", "coach", "-u", "sam",
        ])
        .unwrap();
        assert_eq!(cli.persona.as_deref(), Some("coach"));
        assert_eq!(cli.user.as_deref(), Some("sam"));
        assert!(matches!(cli.command, Command::Chat { conversation: Some(ref c) } if c == "abc"));
    }

    #[test]
    fn test_parse_forget() {
        let cli = Cli::try_parse_from(["persona-chat", "forget", "--user", "sam", "-v"]).unwrap();
        assert!(matches!(cli.command, Command::Forget));
        assert!(cli.verbose);
        assert_eq!(cli.user.as_deref(), Some("sam"));
    }

    #[test]
    fn test_parse_persona_create() {
        let cli = Cli::try_parse_from([
            "persona-chat", "personas", "create", "coach", "--prompt", "Be brief.",
        ])
        .unwrap();
        match cli.command {
            Command::Personas(PersonaCommand::Create { name, prompt, description }) => {
                assert_eq!(name, "coach");
                assert_eq!(prompt.as_deref(), Some("Be brief."));
                assert_eq!(description, "");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
