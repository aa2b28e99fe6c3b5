//! The turn scheduler
//!
//! Drives one cycle: select speaker → generate → detect tool requests →
//! pause or continue → repeat until a stop condition. One round is in
//! flight at a time; a new `start` while a cycle is active (including
//! paused) is rejected.
//!
//! Cancellation is cooperative. A stop request is honored before speaker
//! selection, before/during/after the inter-turn cooldown, and immediately
//! after generation — never between streamed tokens of a healthy
//! generation (an interrupted stream would leave a half-written entry).
//! A *stalled* stream is the exception: the provider consults the same
//! stop flag once its stall window passes.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::bridge::{BridgeMessage, ContextLog, Envelope, Mailbox};
use crate::config::{OrchestratorConfig, ProviderConfig, SelectorConfig};
use crate::conversation::{
    ConversationStore, Entry, EntryId, EntryUpdate, NewEntry, ToolInvocation, SYSTEM_AUTHOR,
};
use crate::error::{Result, RoundtableError};
use crate::learning::LessonLog;
use crate::providers::{
    CancelToken, ChatOptions, GenerationOutput, InferenceProvider, PromptMessage, ToolDefinition,
};
use crate::roster::{AgentProfile, AgentRoster};
use crate::selector::SpeakerSelector;
use crate::utils::string::preview;

/// Trigger used when the previous turn was agent-authored.
const CONTINUATION_TRIGGER: &str = "Continue the work based on the team's previous turns.";

/// States of the turn scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle has run yet, or the last one was fully torn down.
    Idle,
    /// Asking the selector who speaks next.
    SelectingSpeaker,
    /// An agent turn is being generated.
    Generating,
    /// Paused on pending tool invocations; cycle stays active.
    AwaitingApproval,
    /// Inter-turn cooldown before the next round.
    Cooling,
    /// Terminal: the final agent declared completion.
    Completed,
    /// Terminal: stop request, round budget, or unrecoverable failure.
    Stopped,
}

impl CycleState {
    /// Stable string form for status endpoints and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::SelectingSpeaker => "selecting_speaker",
            CycleState::Generating => "generating",
            CycleState::AwaitingApproval => "awaiting_approval",
            CycleState::Cooling => "cooling",
            CycleState::Completed => "completed",
            CycleState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a driven stretch of the cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The final agent declared completion.
    Completed,
    /// Stop request, round budget, or failure ended the cycle.
    Stopped,
    /// Paused on pending tool invocations; `resume` continues it.
    Paused,
}

/// Everything the scheduler needs, wired up by the engine.
pub struct OrchestratorParts {
    /// Scheduler configuration.
    pub config: OrchestratorConfig,
    /// Selector configuration.
    pub selector: SelectorConfig,
    /// Generation sampling defaults (model, max_tokens, temperature).
    pub generation: ProviderConfig,
    /// How many recent failure lessons to surface per generation.
    pub advisory_limit: usize,
    /// The agent roster.
    pub roster: AgentRoster,
    /// Conversation storage.
    pub store: Arc<dyn ConversationStore>,
    /// Inference endpoint.
    pub provider: Arc<dyn InferenceProvider>,
    /// Tool definitions offered to generation calls.
    pub tools: Vec<ToolDefinition>,
    /// Outcome memory.
    pub lessons: Arc<dyn LessonLog>,
    /// Bridge mailbox for publishing finished output.
    pub mailbox: Arc<Mailbox>,
    /// Optional shared context log.
    pub context_log: Option<Arc<ContextLog>>,
}

/// The turn scheduler.
pub struct Orchestrator {
    config: OrchestratorConfig,
    generation: ProviderConfig,
    advisory_limit: usize,
    roster: AgentRoster,
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn InferenceProvider>,
    selector: SpeakerSelector,
    selector_window: usize,
    tools: Vec<ToolDefinition>,
    lessons: Arc<dyn LessonLog>,
    mailbox: Arc<Mailbox>,
    context_log: Option<Arc<ContextLog>>,
    state: RwLock<CycleState>,
    round: AtomicU32,
    active: AtomicBool,
    stop_tx: watch::Sender<bool>,
    /// Serializes run loops so start and resume can never interleave.
    run_guard: Mutex<()>,
}

impl Orchestrator {
    /// Assemble a scheduler from its parts.
    pub fn new(parts: OrchestratorParts) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let selector_window = parts.selector.history_window;
        let selector = SpeakerSelector::new(Arc::clone(&parts.provider), parts.selector);
        Self {
            config: parts.config,
            generation: parts.generation,
            advisory_limit: parts.advisory_limit,
            roster: parts.roster,
            store: parts.store,
            provider: parts.provider,
            selector,
            selector_window,
            tools: parts.tools,
            lessons: parts.lessons,
            mailbox: parts.mailbox,
            context_log: parts.context_log,
            state: RwLock::new(CycleState::Idle),
            round: AtomicU32::new(0),
            active: AtomicBool::new(false),
            stop_tx,
            run_guard: Mutex::new(()),
        }
    }

    /// Current scheduler state.
    pub fn state(&self) -> CycleState {
        *self.state.read().unwrap()
    }

    /// Current round counter.
    pub fn round(&self) -> u32 {
        self.round.load(Ordering::SeqCst)
    }

    /// True while a cycle is in progress, including the paused state.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Reference to the conversation store this scheduler writes to.
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Request the cycle to stop at its next suspension point.
    ///
    /// A cycle parked in `AwaitingApproval` has no running loop, so it is
    /// moved straight to `Stopped`.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if self.state() == CycleState::AwaitingApproval {
            self.set_state(CycleState::Stopped);
            self.active.store(false, Ordering::SeqCst);
            info!("paused cycle stopped");
        }
    }

    /// Start a new cycle with the given goal and drive it until it
    /// terminates or pauses for approval.
    ///
    /// # Errors
    /// Fails with a cycle error if a cycle is already active.
    pub async fn start(&self, goal: &str) -> Result<CycleOutcome> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(RoundtableError::Cycle("a cycle is already active".to_string()));
        }
        let _guard = self.run_guard.lock().await;

        let _ = self.stop_tx.send(false);
        self.round.store(0, Ordering::SeqCst);

        if let Err(e) = self.store.append(NewEntry::user(goal)).await {
            self.set_state(CycleState::Idle);
            self.active.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(goal = %preview(goal, 80), "cycle started");
        Ok(self.run_rounds(0).await)
    }

    /// Continue a paused cycle from the round after the pause.
    ///
    /// Resuming is an explicit operation — resolving the last invocation
    /// never auto-continues the loop.
    ///
    /// # Errors
    /// Fails if the cycle is not paused, or if any invocation from the
    /// paused turn is still pending.
    pub async fn resume(&self) -> Result<CycleOutcome> {
        if self.state() != CycleState::AwaitingApproval {
            return Err(RoundtableError::Cycle("cycle is not paused".to_string()));
        }

        let _guard = self.run_guard.lock().await;
        // Both preconditions are checked under the guard: a stop may have
        // parked the cycle, and a concurrent resume may have already run a
        // round that re-paused on fresh pending invocations.
        if self.state() != CycleState::AwaitingApproval {
            return Err(RoundtableError::Cycle("cycle is not paused".to_string()));
        }
        let entries = self.store.entries().await;
        if entries.iter().any(|e| e.has_pending_invocations()) {
            return Err(RoundtableError::Cycle(
                "invocations from the paused turn are still pending".to_string(),
            ));
        }

        let next_round = self.round.load(Ordering::SeqCst) + 1;
        info!(round = next_round, "cycle resumed");
        Ok(self.run_rounds(next_round).await)
    }

    // ------------------------------------------------------------------
    // Round loop
    // ------------------------------------------------------------------

    async fn run_rounds(&self, start_round: u32) -> CycleOutcome {
        let mut round = start_round;
        loop {
            self.round.store(round, Ordering::SeqCst);

            if self.stop_requested() {
                return self.finish_stopped("stop requested").await;
            }
            if round >= self.config.max_rounds {
                return self.finish_stopped("round budget exhausted").await;
            }

            // 1. Speaker selection
            self.set_state(CycleState::SelectingSpeaker);
            let tail = self.store.tail(self.selector_fetch_window()).await;
            let selected = self.selector.select(&tail, &self.roster).await;
            let agent = match self.resolve_speaker(selected, round) {
                Some(agent) => agent.clone(),
                None => return self.finish_stopped("no speaker available").await,
            };
            info!(round, agent = %agent.id, "speaker selected");

            // 2. Generation
            self.set_state(CycleState::Generating);
            let placeholder = match self.store.append(NewEntry::placeholder(&agent.id)).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "failed to create placeholder entry");
                    return self.finish_stopped("placeholder rejected").await;
                }
            };

            let output = match self.generate_turn(&agent, placeholder).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(round, agent = %agent.id, error = %e, "generation failed");
                    let marker = format!("generation failed: {}", e);
                    let _ = self
                        .store
                        .update(
                            placeholder,
                            EntryUpdate::new().with_content(&marker).with_thinking(false),
                        )
                        .await;
                    return self.finish_stopped("generation failed").await;
                }
            };

            let invocations: Vec<ToolInvocation> = output
                .tool_requests
                .iter()
                .cloned()
                .map(|r| r.into_invocation())
                .collect();

            let mut update = EntryUpdate::new()
                .with_content(&output.text)
                .with_thinking(false)
                .with_citations(output.citations.clone())
                .with_invocations(invocations.clone());
            if let Some(usage) = output.usage.clone() {
                update = update.with_usage(usage);
            }
            if let Err(e) = self.store.update(placeholder, update).await {
                warn!(error = %e, "failed to finalize entry");
                return self.finish_stopped("finalize failed").await;
            }

            // A stop that arrived while the turn was generating is honored
            // here, before the pause branch: the cycle terminates even when
            // the turn requested tools.
            if self.stop_requested() {
                return self.finish_stopped("stop requested").await;
            }

            // 3. Pause for approval: the cycle stays active but the loop
            // breaks here. Resuming is a separate, explicit operation.
            if !invocations.is_empty() {
                info!(
                    round,
                    agent = %agent.id,
                    invocations = invocations.len(),
                    "turn requested tools, pausing for approval"
                );
                self.set_state(CycleState::AwaitingApproval);
                return CycleOutcome::Paused;
            }

            // 4. Completion marker
            if self.is_completion(&agent, &output) {
                return self.finish_completed(placeholder).await;
            }

            // 5. Cooldown with jitter; throttles the cycle to a
            // human-observable pace.
            self.set_state(CycleState::Cooling);
            if !self.cooldown().await {
                return self.finish_stopped("stop requested during cooldown").await;
            }

            round += 1;
        }
    }

    fn selector_fetch_window(&self) -> usize {
        // The selector applies its own window; fetch one extra entry so a
        // trailing placeholder never eats into the window.
        self.selector_window + 1
    }

    fn resolve_speaker(&self, selected: Option<String>, round: u32) -> Option<&AgentProfile> {
        if let Some(id) = selected {
            if let Some(agent) = self.roster.get(&id) {
                return Some(agent);
            }
        }

        let (preferred, alternate) = if round > self.config.critic_after_round {
            (&self.config.fallback_critic, &self.config.fallback_lead)
        } else {
            (&self.config.fallback_lead, &self.config.fallback_critic)
        };
        let fallback = self
            .roster
            .get(preferred)
            .or_else(|| self.roster.get(alternate));
        if let Some(agent) = fallback {
            info!(round, agent = %agent.id, "selector abstained, using fallback speaker");
        }
        fallback
    }

    fn is_completion(&self, agent: &AgentProfile, output: &GenerationOutput) -> bool {
        agent.id == self.config.final_agent
            && output
                .text
                .to_lowercase()
                .contains(&self.config.completion_marker.to_lowercase())
    }

    // ------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------

    async fn generate_turn(
        &self,
        agent: &AgentProfile,
        placeholder: EntryId,
    ) -> Result<GenerationOutput> {
        let history = self.store.entries().await;
        let finalized: Vec<&Entry> = history
            .iter()
            .filter(|e| e.id != placeholder && !e.thinking)
            .collect();

        let system = self.system_prompt(agent).await;
        let mut messages = vec![PromptMessage::system(&system)];
        for entry in &finalized {
            match &entry.author {
                None => messages.push(PromptMessage::user(&entry.content)),
                Some(author) => messages.push(PromptMessage::assistant(&format!(
                    "{}: {}",
                    author, entry.content
                ))),
            }
        }
        messages.push(PromptMessage::user(&trigger_for(&finalized)));

        let mut options = ChatOptions::new()
            .with_max_tokens(self.generation.max_tokens)
            .with_temperature(self.generation.temperature);
        if let Some(model) = &agent.model {
            options = options.with_model(model);
        }

        // Streamed tokens flow through an unbounded channel into the
        // store so the provider never blocks on a slow consumer.
        let (token_tx, mut token_rx) = mpsc::unbounded_channel::<String>();
        let store = Arc::clone(&self.store);
        let forwarder = tokio::spawn(async move {
            while let Some(token) = token_rx.recv().await {
                store.stream_token(placeholder, &token).await;
            }
        });

        let cancel = CancelToken::from_watch(self.stop_tx.subscribe());
        let result = self
            .provider
            .generate(messages, self.tools.clone(), options, Some(token_tx), cancel)
            .await;

        // The provider dropped its sender; let the forwarder drain.
        let _ = forwarder.await;
        result
    }

    async fn system_prompt(&self, agent: &AgentProfile) -> String {
        let mut prompt = format!(
            "You are {} ({}), one of several agents collaborating in a shared conversation.\n\n{}",
            agent.name, agent.role, agent.system_instruction
        );

        let teammates: Vec<String> = self
            .roster
            .iter()
            .filter(|a| a.id != agent.id)
            .map(|a| format!("- {} ({})", a.id, a.role))
            .collect();
        if !teammates.is_empty() {
            prompt.push_str("\n\nOther participants:\n");
            prompt.push_str(&teammates.join("\n"));
        }

        // Surface recent failures so the same mistakes are not replanned.
        let tags: Vec<String> = std::iter::once(agent.id.clone())
            .chain(self.tools.iter().map(|t| t.name.clone()))
            .collect();
        match self.lessons.recent_failures(&tags, self.advisory_limit).await {
            Ok(failures) if !failures.is_empty() => {
                prompt.push_str("\n\nKnown failure modes from earlier attempts:");
                for lesson in failures {
                    let detail = lesson.error_details.as_deref().unwrap_or("failed");
                    prompt.push_str(&format!("\n- {} ({})", lesson.action, detail));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "lesson lookup failed"),
        }

        prompt
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    async fn finish_stopped(&self, reason: &str) -> CycleOutcome {
        info!(reason, "cycle stopped");
        self.publish_latest().await;
        self.set_state(CycleState::Stopped);
        self.active.store(false, Ordering::SeqCst);
        CycleOutcome::Stopped
    }

    async fn finish_completed(&self, final_entry: EntryId) -> CycleOutcome {
        if let Some(entry) = self.store.entry(final_entry).await {
            self.publish_entry(&entry).await;
        }
        info!("cycle completed");
        self.set_state(CycleState::Completed);
        self.active.store(false, Ordering::SeqCst);
        CycleOutcome::Completed
    }

    /// Push the most recent finalized agent turn to the driver, if any.
    async fn publish_latest(&self) {
        let entries = self.store.entries().await;
        let latest = entries.iter().rev().find(|e| {
            !e.thinking && e.author.is_some() && e.author.as_deref() != Some(SYSTEM_AUTHOR)
        });
        if let Some(entry) = latest {
            self.publish_entry(entry).await;
        }
    }

    async fn publish_entry(&self, entry: &Entry) {
        let message = BridgeMessage::from_entry(entry);
        if let Some(log) = &self.context_log {
            log.append("engine", &message).await;
        }
        self.mailbox.publish(Envelope::message("engine", message));
    }

    // ------------------------------------------------------------------
    // Cancellation and cooldown
    // ------------------------------------------------------------------

    fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    fn set_state(&self, state: CycleState) {
        *self.state.write().unwrap() = state;
    }

    /// Sleep the jittered inter-turn delay. Returns false if a stop
    /// request arrived before or during the delay.
    async fn cooldown(&self) -> bool {
        if self.stop_requested() {
            return false;
        }
        let delay = jitter_delay(self.config.cooldown_min_ms, self.config.cooldown_max_ms);
        let mut stop_rx = self.stop_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {}
        }
        !self.stop_requested()
    }
}

/// Trigger string for the next generation: the literal last user content
/// when the previous turn was human-authored, a generic continuation
/// instruction otherwise.
fn trigger_for(finalized: &[&Entry]) -> String {
    match finalized.last() {
        Some(entry) if entry.is_user() => entry.content.clone(),
        _ => CONTINUATION_TRIGGER.to_string(),
    }
}

/// Delay in [min_ms, max_ms] derived from system clock nanoseconds.
/// Avoids adding a `rand` crate — sufficient decorrelation for pacing.
fn jitter_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    let span = max_ms - min_ms + 1;
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % span)
        .unwrap_or(0);
    Duration::from_millis(min_ms + jitter)
}
