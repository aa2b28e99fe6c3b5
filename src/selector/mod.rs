//! Speaker selector - who talks next
//!
//! A pure function of (recent history tail, agent roster) → agent id or
//! abstention. The selector sends a compact instruction plus a truncated,
//! role-labeled transcript to the inference provider with near-zero
//! temperature and a small output budget, then parses the reply by
//! substring match against known agent ids: the first configured agent
//! whose id appears anywhere in the reply wins.
//!
//! Abstention (`None`) is a normal outcome, not an error — the scheduler
//! applies its deterministic fallback. Provider failures during selection
//! are logged and collapse into abstention as well.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::SelectorConfig;
use crate::conversation::Entry;
use crate::providers::{ChatOptions, InferenceProvider, PromptMessage};
use crate::roster::AgentRoster;
use crate::utils::string::truncate_chars;

const SELECTION_INSTRUCTION: &str = "You route turns in a conversation between several \
agents working on one goal. Given the participant list and the recent transcript, name \
the agent best placed to speak next. Reply with exactly one agent id from the list and \
nothing else.";

/// Chooses the next speaker via the inference provider.
pub struct SpeakerSelector {
    provider: Arc<dyn InferenceProvider>,
    config: SelectorConfig,
}

impl SpeakerSelector {
    /// Create a selector over the given provider.
    pub fn new(provider: Arc<dyn InferenceProvider>, config: SelectorConfig) -> Self {
        Self { provider, config }
    }

    /// Select the next speaker, or abstain.
    pub async fn select(&self, history: &[Entry], roster: &AgentRoster) -> Option<String> {
        if roster.is_empty() {
            return None;
        }

        let prompt = build_selection_prompt(history, roster, &self.config);
        let options = ChatOptions::new()
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        let reply = match self
            .provider
            .complete(
                vec![
                    PromptMessage::system(SELECTION_INSTRUCTION),
                    PromptMessage::user(&prompt),
                ],
                options,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "speaker selection call failed, treating as abstention");
                return None;
            }
        };

        let chosen = parse_selection_reply(&reply, roster);
        match &chosen {
            Some(id) => debug!(agent = %id, "selector chose speaker"),
            None => debug!(reply = %reply, "selector abstained"),
        }
        chosen
    }
}

/// Build the roster listing plus the bounded transcript tail.
fn build_selection_prompt(history: &[Entry], roster: &AgentRoster, config: &SelectorConfig) -> String {
    let mut prompt = String::from("Participants:\n");
    for agent in roster.iter() {
        prompt.push_str(&format!("- {} ({})\n", agent.id, agent.role));
    }

    prompt.push_str("\nRecent transcript:\n");
    let finalized: Vec<&Entry> = history.iter().filter(|e| !e.thinking).collect();
    let start = finalized.len().saturating_sub(config.history_window);
    for entry in &finalized[start..] {
        prompt.push_str(&format!(
            "{}: {}\n",
            entry.author_label(),
            truncate_chars(&entry.content, config.entry_char_cap)
        ));
    }

    prompt.push_str("\nWho should speak next?");
    prompt
}

/// First roster agent whose id appears in the reply (case-insensitive).
fn parse_selection_reply(reply: &str, roster: &AgentRoster) -> Option<String> {
    let reply = reply.to_lowercase();
    roster
        .iter()
        .find(|agent| reply.contains(&agent.id.to_lowercase()))
        .map(|agent| agent.id.clone())
}
