// Prompt text used by the chat loop and the cognitive service

/// Default system prompt for a freshly created persona
pub const DEFAULT_PERSONA_PROMPT: &str = "You are a helpful, concise desktop assistant. \
Use what you know about the user to tailor your answers, but never recite their profile back to them.";

/// System prompt for the background cognitive pass. The response format is
/// load-bearing: `cognitive::parse_cognitive_response` expects a quoted name
/// followed by a JSON array of instructions.
pub const COGNITIVE_SYSTEM_PROMPT: &str = r#"You maintain conversation metadata and a user profile for a desktop assistant.

You receive the user's CURRENT PROFILE and a CONVERSATION transcript. Do two things:

1. NAME the conversation: a short title (2-6 words) describing what it is about.
2. UPDATE the profile with anything durable you learned about the user
   (preferences, facts about their life, recurring interests, how they like to be answered).
   - Use "addfield" for information that has no field yet.
   - Use "appendContentByField" to add to a field that already exists.
   - "content" is what the user said or showed; "observations" is your own short inference.
   - Only record things the user revealed. If nothing new was learned, return an empty list.

Respond in EXACTLY this format and nothing else:

Name: "<conversation name>"
[
  {"action": "addfield", "field": "<field name>", "content": "<value>", "observations": "<inference>"},
  {"action": "appendContentByField", "field": "<existing field>", "content": "<value>", "observations": "<inference>"}
]"#;

/// User turn for the cognitive pass
pub fn cognitive_user_prompt(profile: &str, transcript: &str) -> String {
    format!(
        "CURRENT PROFILE:\n{}\n\nCONVERSATION:\n{}\n\nName the conversation and list profile updates:",
        profile, transcript
    )
}

/// System prompt for a chat turn: persona prompt plus what we know about the user
pub fn chat_system_prompt(persona_prompt: &str, profile: &str) -> String {
    format!("{}\n\nWHAT YOU KNOW ABOUT THE USER:\n{}", persona_prompt, profile)
}
