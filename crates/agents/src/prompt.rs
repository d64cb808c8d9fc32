//! Prompt assembly: persona, channel reply guidance, bounded history, and
//! the new user turn.

use {
    nexza_channels::{ChannelProfile, markup::Language},
    nexza_common::{Channel, Role},
    nexza_sessions::Turn,
};

use crate::{model::ChatMessage, persona::Persona};

/// Character budget for replayed history. Oldest turns are dropped first.
pub const HISTORY_MAX_CHARS: usize = 12_000;

/// Longest single history turn replayed verbatim.
const TURN_MAX_CHARS: usize = 2_000;

/// Appended for callers listening to text-to-speech.
pub const VOICE_REPLY_SUFFIX: &str = "\n\n\
## Voice Reply Mode\n\
The caller is on the phone and hears your reply through text-to-speech.\n\
- Use short, natural, conversational sentences. No lists or headings.\n\
- Never include raw URLs, markdown, or code.\n\
- One or two sentences is usually enough.\n";

const SPANISH_REPLY_SUFFIX: &str = "\nResponde siempre en español.\n";

fn channel_suffix(profile: &ChannelProfile) -> Option<String> {
    match profile.channel {
        Channel::Telephone => Some(VOICE_REPLY_SUFFIX.to_string()),
        Channel::Sms => Some(format!(
            "\n\n## Text Message Reply\nReply in plain text under {} characters. No markdown.\n",
            profile.max_reply_chars
        )),
        Channel::ChatPlatform | Channel::MobileApp | Channel::Other => None,
    }
}

/// System prompt for one request.
#[must_use]
pub fn system_prompt(persona: &Persona, profile: &ChannelProfile, language: Language) -> String {
    let mut prompt = persona.prompt_for(language).trim().to_string();
    if let Some(suffix) = channel_suffix(profile) {
        prompt.push_str(&suffix);
    }
    if language == Language::Spanish && persona.prompt_es.is_none() {
        prompt.push_str(SPANISH_REPLY_SUFFIX);
    }
    prompt
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let mut iter = text.chars();
    let taken: String = iter.by_ref().take(max_chars).collect();
    if iter.next().is_some() {
        format!("{taken}...")
    } else {
        taken
    }
}

/// Newest turns that fit in `budget` characters, returned oldest first.
fn bounded_history<'a, I>(history: I, budget: usize) -> Vec<ChatMessage>
where
    I: DoubleEndedIterator<Item = &'a Turn>,
{
    let mut used = 0usize;
    let mut kept = Vec::new();
    for turn in history.rev() {
        let text = truncate_chars(&turn.text, TURN_MAX_CHARS);
        let cost = text.chars().count();
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(ChatMessage::from_turn(turn.role, text));
    }
    kept.reverse();
    kept
}

/// Full message list for a conversational request.
#[must_use]
pub fn build_messages<'a, I>(
    persona: &Persona,
    profile: &ChannelProfile,
    language: Language,
    history: I,
    user_text: &str,
) -> Vec<ChatMessage>
where
    I: DoubleEndedIterator<Item = &'a Turn>,
{
    let mut messages = vec![ChatMessage::system(system_prompt(persona, profile, language))];
    messages.extend(bounded_history(history, HISTORY_MAX_CHARS));
    messages.push(ChatMessage::user(user_text));
    messages
}

/// Messages asking the model to summarise `turns` (oldest first).
#[must_use]
pub fn build_summary_messages<'a, I>(persona: &Persona, turns: I) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = &'a Turn>,
{
    let mut transcript = String::new();
    for turn in turns {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        transcript.push_str(speaker);
        transcript.push_str(": ");
        transcript.push_str(&truncate_chars(&turn.text, TURN_MAX_CHARS));
        transcript.push('\n');
    }
    if transcript.is_empty() {
        transcript.push_str("(no messages yet)\n");
    }
    let transcript = truncate_chars(&transcript, HISTORY_MAX_CHARS);

    vec![
        ChatMessage::system(persona.prompt.trim()),
        ChatMessage::user(format!(
            "Summarize the following conversation in a few short bullet points. \
             Mention open tasks and who they are assigned to.\n\n{transcript}"
        )),
    ]
}
