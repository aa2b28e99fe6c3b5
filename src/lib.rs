//! Roundtable - multi-agent turn-taking orchestrator with an approval
//! gate and a polling bridge

pub mod bridge;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod learning;
pub mod orchestrator;
pub mod providers;
pub mod roster;
pub mod selector;
pub mod tools;
pub mod utils;

pub use bridge::{BridgeClient, BridgeMessage, Envelope, Mailbox};
pub use config::Config;
pub use conversation::{ConversationStore, Entry, InvocationStatus, MemoryStore, ToolInvocation};
pub use error::{Result, RoundtableError};
pub use orchestrator::{ApprovalGate, CycleOutcome, CycleState, Orchestrator};
pub use providers::{InferenceProvider, OpenAiProvider};
pub use roster::{AgentProfile, AgentRoster};
