//! Configuration type definitions for Roundtable
//!
//! This module defines all configuration structs used throughout the crate.
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so a partial config file (or none at all) always produces a
//! runnable configuration.

use serde::{Deserialize, Serialize};

use crate::roster::{default_roster, AgentProfile};

/// Main configuration struct for Roundtable
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The agent roster, in speaker-selection priority order.
    pub agents: Vec<AgentProfile>,
    /// Turn scheduler configuration (round budget, cooldown, fallbacks)
    pub orchestrator: OrchestratorConfig,
    /// Speaker selector configuration (transcript window, sampling)
    pub selector: SelectorConfig,
    /// Inference provider configuration (endpoint, model, sampling)
    pub provider: ProviderConfig,
    /// Bridge server and polling configuration
    pub bridge: BridgeConfig,
    /// Workspace (sandboxed file writes, shared context log)
    pub workspace: WorkspaceConfig,
    /// Lesson log configuration
    pub learning: LearningConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents: default_roster(),
            orchestrator: OrchestratorConfig::default(),
            selector: SelectorConfig::default(),
            provider: ProviderConfig::default(),
            bridge: BridgeConfig::default(),
            workspace: WorkspaceConfig::default(),
            learning: LearningConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============================================================================
// Orchestrator Configuration
// ============================================================================

/// Turn scheduler configuration.
///
/// The fallback/termination ids are configuration rather than embedded
/// literals so deployments with a different roster can retarget them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard round budget per cycle. The cycle stops once this is reached.
    pub max_rounds: u32,
    /// Lower bound of the randomized inter-turn delay (milliseconds).
    pub cooldown_min_ms: u64,
    /// Upper bound of the randomized inter-turn delay (milliseconds).
    pub cooldown_max_ms: u64,
    /// After this round, selector abstention falls back to the critic
    /// instead of the lead.
    pub critic_after_round: u32,
    /// Fallback speaker for early rounds when the selector abstains.
    pub fallback_lead: String,
    /// Fallback speaker for late rounds when the selector abstains.
    pub fallback_critic: String,
    /// Agent whose output is checked for the completion marker.
    pub final_agent: String,
    /// Case-insensitive phrase that terminates the cycle when it appears in
    /// the final agent's output.
    pub completion_marker: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_rounds: 25,
            cooldown_min_ms: 500,
            cooldown_max_ms: 1500,
            critic_after_round: 5,
            fallback_lead: "lead".to_string(),
            fallback_critic: "critic".to_string(),
            final_agent: "critic".to_string(),
            completion_marker: "ready for handoff".to_string(),
        }
    }
}

// ============================================================================
// Selector Configuration
// ============================================================================

/// Speaker selector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Number of most recent entries included in the selection transcript.
    pub history_window: usize,
    /// Per-entry character cap applied to the selection transcript.
    pub entry_char_cap: usize,
    /// Sampling temperature for selection calls (near-deterministic).
    pub temperature: f32,
    /// Output token budget for selection calls.
    pub max_tokens: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            history_window: 12,
            entry_char_cap: 280,
            temperature: 0.0,
            max_tokens: 16,
        }
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Inference provider configuration.
///
/// Defaults target an OpenAI-compatible local endpoint (LM Studio style).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the chat-completions endpoint.
    pub api_base: String,
    /// Optional bearer token. Local endpoints usually need none.
    pub api_key: Option<String>,
    /// Default model identifier.
    pub model: String,
    /// Maximum tokens per generated turn.
    pub max_tokens: u32,
    /// Sampling temperature for generation turns.
    pub temperature: f32,
    /// Idle window (seconds) after which a silent generation stream is
    /// considered stalled and becomes cancellable by a stop request.
    pub stall_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:1234/v1".to_string(),
            api_key: None,
            model: "local-model".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            stall_timeout_secs: 120,
        }
    }
}

// ============================================================================
// Bridge Configuration
// ============================================================================

/// Bridge server and polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Address to bind the bridge HTTP server to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// How often the engine polls the inbound slot (milliseconds).
    pub poll_interval_ms: u64,
    /// How often the reachability monitor probes the bridge (seconds).
    pub probe_interval_secs: u64,
    /// File name of the append-only shared context log, relative to the
    /// workspace directory.
    pub context_log_file: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4230,
            poll_interval_ms: 2000,
            probe_interval_secs: 5,
            context_log_file: "SHARED_CONTEXT.md".to_string(),
        }
    }
}

impl BridgeConfig {
    /// The base URL driver-side clients should use for this bridge.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Workspace Configuration
// ============================================================================

/// Workspace configuration for sandboxed file writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace directory path (supports `~` expansion).
    pub dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: "~/.roundtable/workspace".to_string(),
        }
    }
}

// ============================================================================
// Learning Configuration
// ============================================================================

/// Lesson log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Path of the JSONL lesson log (supports `~` expansion).
    pub file: String,
    /// How many recent failure lessons are surfaced to generation prompts.
    pub advisory_limit: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            file: "~/.roundtable/lessons.jsonl".to_string(),
            advisory_limit: 3,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default tracing pretty-print (human-readable).
    Pretty,
    /// Compact single-line text, grep-friendly.
    #[default]
    Compact,
    /// Structured JSON lines for log aggregators.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Optional log file path (JSON format only).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
