//! End-to-end scheduler scenarios against a scripted provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use roundtable::bridge::Mailbox;
use roundtable::config::{OrchestratorConfig, ProviderConfig, SelectorConfig};
use roundtable::conversation::{ConversationStore, InvocationStatus, MemoryStore, SYSTEM_AUTHOR};
use roundtable::error::{Result, RoundtableError};
use roundtable::learning::{FileLessonLog, LessonLog};
use roundtable::orchestrator::{
    ApprovalGate, CycleOutcome, CycleState, Orchestrator, OrchestratorParts, ResolutionOutcome,
};
use roundtable::providers::{
    CancelToken, ChatOptions, GenerationOutput, InferenceProvider, PromptMessage, TokenSink,
    ToolDefinition, ToolRequest,
};
use roundtable::roster::{default_roster, AgentProfile, AgentRoster};
use roundtable::tools::{ToolExecutor, WorkspaceExecutor};

/// One scripted generation turn.
#[derive(Clone)]
struct Turn {
    text: String,
    tools: Vec<(String, serde_json::Value)>,
    fail: bool,
}

impl Turn {
    fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            tools: vec![],
            fail: false,
        }
    }

    fn with_tool(text: &str, function: &str, arguments: serde_json::Value) -> Self {
        Self {
            text: text.to_string(),
            tools: vec![(function.to_string(), arguments)],
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            text: String::new(),
            tools: vec![],
            fail: true,
        }
    }
}

/// Provider that replays scripted selector replies and turns.
struct ScriptedProvider {
    selections: Mutex<VecDeque<String>>,
    turns: Mutex<VecDeque<Turn>>,
    generate_prompts: Mutex<Vec<Vec<PromptMessage>>>,
}

impl ScriptedProvider {
    fn new(selections: Vec<&str>, turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            selections: Mutex::new(selections.into_iter().map(String::from).collect()),
            turns: Mutex::new(turns.into_iter().collect()),
            generate_prompts: Mutex::new(Vec::new()),
        })
    }

    fn last_generate_prompt(&self) -> Vec<PromptMessage> {
        self.generate_prompts.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn complete(&self, _messages: Vec<PromptMessage>, _options: ChatOptions) -> Result<String> {
        let mut selections = self.selections.lock().unwrap();
        Ok(selections.pop_front().unwrap_or_else(|| "no idea".to_string()))
    }

    async fn generate(
        &self,
        messages: Vec<PromptMessage>,
        _tools: Vec<ToolDefinition>,
        _options: ChatOptions,
        tokens: Option<TokenSink>,
        _cancel: CancelToken,
    ) -> Result<GenerationOutput> {
        self.generate_prompts.lock().unwrap().push(messages);

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Turn::text("carrying on"));

        if turn.fail {
            return Err(RoundtableError::Provider("endpoint exploded".to_string()));
        }

        // Stream the text in two fragments like a real endpoint would.
        if let Some(sink) = tokens {
            let mid = turn.text.len() / 2;
            let (a, b) = turn.text.split_at(mid);
            let _ = sink.send(a.to_string());
            let _ = sink.send(b.to_string());
        }

        Ok(GenerationOutput {
            text: turn.text,
            citations: vec![],
            tool_requests: turn
                .tools
                .into_iter()
                .map(|(function, arguments)| ToolRequest {
                    id: None,
                    function,
                    arguments,
                })
                .collect(),
            usage: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<MemoryStore>,
    mailbox: Arc<Mailbox>,
    orchestrator: Arc<Orchestrator>,
    gate: ApprovalGate,
    workspace: std::path::PathBuf,
}

fn harness(provider: Arc<dyn InferenceProvider>, config: OrchestratorConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    let store = Arc::new(MemoryStore::new());
    let mailbox = Arc::new(Mailbox::new());
    let executor = Arc::new(WorkspaceExecutor::new(&workspace));
    let lessons = Arc::new(FileLessonLog::new(dir.path().join("lessons.jsonl")));

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorParts {
        config,
        selector: SelectorConfig::default(),
        generation: ProviderConfig::default(),
        advisory_limit: 3,
        roster: AgentRoster::new(default_roster()),
        store: Arc::clone(&store) as Arc<dyn ConversationStore>,
        provider,
        tools: executor.definitions(),
        lessons: Arc::clone(&lessons) as Arc<dyn LessonLog>,
        mailbox: Arc::clone(&mailbox),
        context_log: None,
    }));

    let gate = ApprovalGate::new(
        Arc::clone(&store) as Arc<dyn ConversationStore>,
        Arc::clone(&executor) as Arc<dyn ToolExecutor>,
        lessons as Arc<dyn LessonLog>,
    );

    Harness {
        _dir: dir,
        store,
        mailbox,
        orchestrator,
        gate,
        workspace,
    }
}

/// Fast cooldown so tests stay quick.
fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        cooldown_min_ms: 1,
        cooldown_max_ms: 2,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Round progression and completion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rounds_advance_until_completion_marker() {
    let provider = ScriptedProvider::new(
        vec!["lead", "critic"],
        vec![
            Turn::text("Here is the plan."),
            Turn::text("Looks solid. Ready for handoff."),
        ],
    );
    let h = harness(Arc::clone(&provider) as Arc<dyn InferenceProvider>, fast_config());

    let outcome = h.orchestrator.start("draft plan").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(h.orchestrator.state(), CycleState::Completed);
    assert!(!h.orchestrator.is_active());

    let entries = h.store.entries().await;
    assert_eq!(entries.len(), 3); // goal + two turns
    assert!(entries[0].is_user());
    assert_eq!(entries[1].author.as_deref(), Some("lead"));
    assert_eq!(entries[2].author.as_deref(), Some("critic"));
    assert!(entries.iter().all(|e| !e.thinking));

    // The finished message was pushed through the mailbox.
    let published = h.mailbox.fetch().unwrap();
    let message = published.as_message().unwrap();
    assert_eq!(message.author.as_deref(), Some("critic"));
    assert!(message.content.contains("Ready for handoff"));
}

#[tokio::test]
async fn trigger_is_goal_then_generic_continuation() {
    let provider = ScriptedProvider::new(
        vec!["lead", "critic"],
        vec![
            Turn::text("Plan drafted."),
            Turn::text("ready for handoff"),
        ],
    );
    let h = harness(Arc::clone(&provider) as Arc<dyn InferenceProvider>, fast_config());

    h.orchestrator.start("draft plan").await.unwrap();

    // Round 2's trigger: the previous turn was agent-authored, so the
    // last user message is the generic continuation instruction.
    let prompt = provider.last_generate_prompt();
    let last = prompt.last().unwrap();
    assert!(last.content.contains("Continue the work"));

    // The lead's finalized turn is visible as transcript context.
    assert!(prompt.iter().any(|m| m.content.contains("lead: Plan drafted.")));
}

#[tokio::test]
async fn completion_marker_is_case_insensitive_and_final_agent_only() {
    // The lead says the marker, but only the critic's output terminates.
    let provider = ScriptedProvider::new(
        vec!["lead", "critic"],
        vec![
            Turn::text("I say READY FOR HANDOFF but I am not the final agent."),
            Turn::text("Agreed: Ready For Handoff."),
        ],
    );
    let h = harness(provider, fast_config());

    let outcome = h.orchestrator.start("draft plan").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    let entries = h.store.entries().await;
    // Both turns happened: the lead's marker did not end round 1.
    assert_eq!(entries.len(), 3);
}

// ---------------------------------------------------------------------------
// Round budget
// ---------------------------------------------------------------------------

#[tokio::test]
async fn round_budget_forces_stop() {
    let config = OrchestratorConfig {
        max_rounds: 3,
        ..fast_config()
    };
    // Selector always picks the lead; no turn ever declares completion.
    let provider = ScriptedProvider::new(
        vec!["lead", "lead", "lead", "lead", "lead"],
        vec![],
    );
    let h = harness(provider, config);

    let outcome = h.orchestrator.start("never finishes").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Stopped);
    assert_eq!(h.orchestrator.state(), CycleState::Stopped);
    assert!(h.orchestrator.round() <= 3);

    // Exactly max_rounds turns were generated.
    let agent_turns = h
        .store
        .entries()
        .await
        .iter()
        .filter(|e| e.author.is_some())
        .count();
    assert_eq!(agent_turns, 3);
}

// ---------------------------------------------------------------------------
// Tool calls: pause, approval, explicit resume
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_call_pauses_cycle_and_resume_is_explicit() {
    let provider = ScriptedProvider::new(
        vec!["coder", "critic"],
        vec![
            Turn::with_tool(
                "Writing the scaffold now.",
                "write_file",
                json!({"filename": "a.ts", "content": "export {}"}),
            ),
            Turn::text("File looks right. ready for handoff"),
        ],
    );
    let h = harness(provider, fast_config());

    // Round 1 pauses on the pending invocation.
    let outcome = h.orchestrator.start("scaffold the app").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Paused);
    assert_eq!(h.orchestrator.state(), CycleState::AwaitingApproval);
    // Paused, not ended: the cycle is still active.
    assert!(h.orchestrator.is_active());

    let entries = h.store.entries().await;
    let coder_entry = entries.iter().find(|e| e.author.as_deref() == Some("coder")).unwrap();
    let entry_id = coder_entry.id;
    let invocation_id = coder_entry.invocations[0].id.clone();
    assert_eq!(coder_entry.invocations[0].status, InvocationStatus::Pending);

    // A second start while paused is rejected.
    let err = h.orchestrator.start("another goal").await.unwrap_err();
    assert!(matches!(err, RoundtableError::Cycle(_)));

    // Resume before resolution is rejected.
    let err = h.orchestrator.resume().await.unwrap_err();
    assert!(err.to_string().contains("pending"));

    // Approve: invocation executes, file lands in the workspace.
    let outcome = h.gate.resolve(entry_id, &invocation_id, true).await.unwrap();
    assert_eq!(
        outcome,
        ResolutionOutcome::Resolved(InvocationStatus::Executed)
    );
    assert!(h.workspace.join("a.ts").exists());

    // No auto-resume: still paused after resolution.
    assert_eq!(h.orchestrator.state(), CycleState::AwaitingApproval);
    assert!(h.orchestrator.is_active());

    // Explicit resume drives the cycle to completion.
    let outcome = h.orchestrator.resume().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    // The system notice about the write sits between the turns.
    let entries = h.store.entries().await;
    assert!(entries
        .iter()
        .any(|e| e.author.as_deref() == Some(SYSTEM_AUTHOR) && e.content.contains("a.ts")));
}

#[tokio::test]
async fn rejection_keeps_cycle_paused_and_appends_denial() {
    let provider = ScriptedProvider::new(
        vec!["coder"],
        vec![Turn::with_tool(
            "Attempting a write.",
            "write_file",
            json!({"filename": "a.ts", "content": "x"}),
        )],
    );
    let h = harness(provider, fast_config());

    h.orchestrator.start("scaffold").await.unwrap();

    let entries = h.store.entries().await;
    let entry = entries.iter().find(|e| e.author.as_deref() == Some("coder")).unwrap();
    let invocation_id = entry.invocations[0].id.clone();

    let outcome = h.gate.resolve(entry.id, &invocation_id, false).await.unwrap();
    assert_eq!(
        outcome,
        ResolutionOutcome::Resolved(InvocationStatus::Rejected)
    );
    assert!(!h.workspace.join("a.ts").exists());
    assert_eq!(h.orchestrator.state(), CycleState::AwaitingApproval);

    let entries = h.store.entries().await;
    assert!(entries.last().unwrap().content.contains("Action denied"));
}

#[tokio::test]
async fn duplicate_resume_cannot_skip_a_fresh_pause() {
    // Round 1 and round 2 both emit a tool call, so a resume from the
    // first pause immediately lands in a second pause.
    let provider = ScriptedProvider::new(
        vec!["coder", "coder"],
        vec![
            Turn::with_tool(
                "first write",
                "write_file",
                json!({"filename": "a.ts", "content": "x"}),
            ),
            Turn::with_tool(
                "second write",
                "write_file",
                json!({"filename": "b.ts", "content": "y"}),
            ),
        ],
    );
    let h = harness(provider, fast_config());

    assert_eq!(
        h.orchestrator.start("two writes").await.unwrap(),
        CycleOutcome::Paused
    );

    let entries = h.store.entries().await;
    let first = entries
        .iter()
        .find(|e| e.author.as_deref() == Some("coder"))
        .unwrap();
    let invocation_id = first.invocations[0].id.clone();
    h.gate.resolve(first.id, &invocation_id, true).await.unwrap();

    // Two drivers race to resume the same pause.
    let a = Arc::clone(&h.orchestrator);
    let b = Arc::clone(&h.orchestrator);
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.resume().await }),
        tokio::spawn(async move { b.resume().await }),
    );
    let results = [ra.unwrap(), rb.unwrap()];

    // Exactly one resume runs round 2 into its own pause; the other is
    // refused instead of advancing past the fresh pending invocation.
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Ok(CycleOutcome::Paused))));

    assert_eq!(h.orchestrator.state(), CycleState::AwaitingApproval);
    let entries = h.store.entries().await;
    let coder_turns: Vec<_> = entries
        .iter()
        .filter(|e| e.author.as_deref() == Some("coder"))
        .collect();
    assert_eq!(coder_turns.len(), 2);
    assert_eq!(
        coder_turns[1].invocations[0].status,
        InvocationStatus::Pending
    );
    assert!(!h.workspace.join("b.ts").exists());
}

// ---------------------------------------------------------------------------
// Stop requests
// ---------------------------------------------------------------------------

/// Provider that parks inside `generate` until released, so a stop request
/// can land while the turn is still in flight.
struct HoldingProvider {
    generating: Arc<AtomicBool>,
    release: Arc<Semaphore>,
}

#[async_trait]
impl InferenceProvider for HoldingProvider {
    async fn complete(&self, _messages: Vec<PromptMessage>, _options: ChatOptions) -> Result<String> {
        Ok("coder".to_string())
    }

    async fn generate(
        &self,
        _messages: Vec<PromptMessage>,
        _tools: Vec<ToolDefinition>,
        _options: ChatOptions,
        _tokens: Option<TokenSink>,
        _cancel: CancelToken,
    ) -> Result<GenerationOutput> {
        self.generating.store(true, Ordering::SeqCst);
        self.release.acquire().await.unwrap().forget();
        Ok(GenerationOutput {
            text: "writing the file".to_string(),
            citations: vec![],
            tool_requests: vec![ToolRequest {
                id: None,
                function: "write_file".to_string(),
                arguments: json!({"filename": "a.ts", "content": "x"}),
            }],
            usage: None,
        })
    }

    fn name(&self) -> &str {
        "holding"
    }
}

#[tokio::test]
async fn stop_during_tool_emitting_generation_stops_instead_of_pausing() {
    let generating = Arc::new(AtomicBool::new(false));
    let release = Arc::new(Semaphore::new(0));
    let provider = Arc::new(HoldingProvider {
        generating: Arc::clone(&generating),
        release: Arc::clone(&release),
    });
    let h = harness(provider, fast_config());

    let orchestrator = Arc::clone(&h.orchestrator);
    let handle = tokio::spawn(async move { orchestrator.start("stop me mid-turn").await });

    // Wait until the turn is in flight.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !generating.load(Ordering::SeqCst) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "generation never started"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The stop lands mid-generation; the turn then finishes with a tool
    // request. The cycle must terminate, not park awaiting approval.
    h.orchestrator.stop();
    release.add_permits(1);

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("cycle should terminate promptly")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Stopped);
    assert_eq!(h.orchestrator.state(), CycleState::Stopped);
    assert!(!h.orchestrator.is_active());

    // The turn itself was finalized; its invocation stays pending but no
    // pause survives the stop.
    let entries = h.store.entries().await;
    let turn = entries
        .iter()
        .find(|e| e.author.as_deref() == Some("coder"))
        .unwrap();
    assert!(!turn.thinking);
    assert_eq!(turn.invocations[0].status, InvocationStatus::Pending);
    assert!(h.orchestrator.resume().await.is_err());
}

#[tokio::test]
async fn stop_during_cooldown_prevents_next_round() {
    // Long cooldown so the stop lands inside it.
    let config = OrchestratorConfig {
        cooldown_min_ms: 5_000,
        cooldown_max_ms: 6_000,
        ..Default::default()
    };
    let provider = ScriptedProvider::new(vec!["lead", "lead"], vec![]);
    let h = harness(provider, config);

    let orchestrator = Arc::clone(&h.orchestrator);
    let handle = tokio::spawn(async move { orchestrator.start("long task").await });

    // Wait until the scheduler reaches the cooldown.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.orchestrator.state() != CycleState::Cooling {
        assert!(tokio::time::Instant::now() < deadline, "never reached cooldown");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.orchestrator.stop();

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("stop should end the cooldown promptly")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Stopped);
    assert_eq!(h.orchestrator.state(), CycleState::Stopped);

    // No second round was generated.
    let agent_turns = h
        .store
        .entries()
        .await
        .iter()
        .filter(|e| e.author.is_some())
        .count();
    assert_eq!(agent_turns, 1);
}

#[tokio::test]
async fn stop_while_paused_parks_the_cycle() {
    let provider = ScriptedProvider::new(
        vec!["coder"],
        vec![Turn::with_tool(
            "write incoming",
            "write_file",
            json!({"filename": "a.ts", "content": "x"}),
        )],
    );
    let h = harness(provider, fast_config());

    h.orchestrator.start("goal").await.unwrap();
    assert_eq!(h.orchestrator.state(), CycleState::AwaitingApproval);

    h.orchestrator.stop();
    assert_eq!(h.orchestrator.state(), CycleState::Stopped);
    assert!(!h.orchestrator.is_active());

    // Resume after the park is rejected.
    assert!(h.orchestrator.resume().await.is_err());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generation_failure_stops_gracefully_with_marker() {
    let provider = ScriptedProvider::new(vec!["lead"], vec![Turn::failing()]);
    let h = harness(provider, fast_config());

    let outcome = h.orchestrator.start("doomed goal").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Stopped);
    assert_eq!(h.orchestrator.state(), CycleState::Stopped);

    // The placeholder was finalized with a visible error marker, not
    // left dangling in thinking state.
    let entries = h.store.entries().await;
    let lead_entry = entries.iter().find(|e| e.author.as_deref() == Some("lead")).unwrap();
    assert!(!lead_entry.thinking);
    assert!(lead_entry.content.contains("generation failed"));
}

// ---------------------------------------------------------------------------
// Selector fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn selector_abstention_falls_back_by_round() {
    let config = OrchestratorConfig {
        critic_after_round: 0,
        ..fast_config()
    };
    // Selector never gives a usable id.
    let provider = ScriptedProvider::new(
        vec!["nobody", "nobody"],
        vec![
            Turn::text("lead speaking via fallback"),
            Turn::text("critic speaking via fallback, ready for handoff"),
        ],
    );
    let h = harness(provider, config);

    let outcome = h.orchestrator.start("fallback test").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    let entries = h.store.entries().await;
    // Round 0: round > critic_after_round is false → lead.
    assert_eq!(entries[1].author.as_deref(), Some("lead"));
    // Round 1: 1 > 0 → critic.
    assert_eq!(entries[2].author.as_deref(), Some("critic"));
}

#[tokio::test]
async fn missing_fallback_agents_stop_the_cycle() {
    let provider = ScriptedProvider::new(vec!["nobody"], vec![]);

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let executor = Arc::new(WorkspaceExecutor::new(dir.path().join("ws")));
    let lessons = Arc::new(FileLessonLog::new(dir.path().join("lessons.jsonl")));
    let orchestrator = Orchestrator::new(OrchestratorParts {
        config: fast_config(),
        selector: SelectorConfig::default(),
        generation: ProviderConfig::default(),
        advisory_limit: 3,
        // Roster without the configured fallback ids.
        roster: AgentRoster::new(vec![AgentProfile::new("solo", "Solo", "generalist", "x")]),
        store: Arc::clone(&store) as Arc<dyn ConversationStore>,
        provider,
        tools: executor.definitions(),
        lessons: lessons as Arc<dyn LessonLog>,
        mailbox: Arc::new(Mailbox::new()),
        context_log: None,
    });

    let outcome = orchestrator.start("goal").await.unwrap();
    assert_eq!(outcome, CycleOutcome::Stopped);
    // Only the goal entry exists.
    assert_eq!(store.entries().await.len(), 1);
}

// ---------------------------------------------------------------------------
// Restart after terminal state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_cycle_allowed_after_terminal_state() {
    let provider = ScriptedProvider::new(
        vec!["critic", "critic"],
        vec![
            Turn::text("ready for handoff"),
            Turn::text("ready for handoff again"),
        ],
    );
    let h = harness(provider, fast_config());

    assert_eq!(
        h.orchestrator.start("first").await.unwrap(),
        CycleOutcome::Completed
    );
    // Round counter resets for the new cycle.
    assert_eq!(
        h.orchestrator.start("second").await.unwrap(),
        CycleOutcome::Completed
    );
    assert_eq!(h.orchestrator.round(), 0);
}
