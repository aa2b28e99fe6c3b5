//! Bridge module - the cross-process handoff channel
//!
//! The bridge lets an external driver inject a goal into the running
//! engine and later read back the conversation's final output, without a
//! persistent connection — only best-effort polling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  POST /bridge/in   ┌──────────────┐   poll()   ┌────────┐
//! │  Driver  │ ─────────────────> │   Mailbox    │ ─────────> │ Engine │
//! │  (CLI)   │                    │ inbound slot │            │        │
//! │          │  GET /bridge/out   │──────────────│  publish() │        │
//! │          │ <───────────────── │outbound slot │ <───────── │        │
//! └──────────┘                    └──────────────┘            └────────┘
//! ```
//!
//! Each direction is a single slot holding at most one envelope:
//!
//! - **inbound** (driver→app): `submit` overwrites any unconsumed envelope
//!   (last-write-wins, no backlog); `poll` atomically reads and clears.
//! - **outbound** (app→driver): `publish` stores the latest finalized
//!   output; `fetch` reads without clearing — a "last known good", not a
//!   one-time delivery.
//!
//! A submission arriving while the engine is mid-cycle can be displaced by
//! a later one before anybody polls. That loss window is part of the
//! protocol, not a bug; callers must poll frequently relative to their
//! submission rate.

mod client;
mod context_log;
mod envelope;
mod monitor;
mod server;

pub use client::BridgeClient;
pub use context_log::ContextLog;
pub use envelope::{
    BridgeCommand, BridgeMessage, Envelope, EnvelopePayload, PROTOCOL_VERSION,
};
pub use monitor::BridgeMonitor;
pub use server::{BridgeHandles, BridgeServer};

use std::sync::Mutex;

use tracing::{debug, info};

/// Outcome of a submit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored into an empty slot.
    Stored,
    /// Stored, displacing an unconsumed envelope (last-write-wins).
    Replaced,
}

/// Outcome of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored as the latest output.
    Stored,
    /// Ignored: streaming content is never exposed to the driver.
    IgnoredThinking,
}

/// The two single-slot channels between driver and engine.
///
/// Each slot has its own lock; critical sections are plain swaps with no
/// awaits, so submit/poll and publish/fetch can race freely with the
/// scheduler's own work.
#[derive(Debug, Default)]
pub struct Mailbox {
    inbound: Mutex<Option<Envelope>>,
    outbound: Mutex<Option<Envelope>>,
}

impl Mailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an envelope in the driver→app slot, overwriting any
    /// unconsumed one.
    pub fn submit(&self, envelope: Envelope) -> SubmitOutcome {
        let mut slot = self.inbound.lock().unwrap();
        let displaced = slot.replace(envelope);
        match displaced {
            Some(old) => {
                info!(
                    displaced_source = %old.source,
                    "inbound slot overwritten before poll (last-write-wins)"
                );
                SubmitOutcome::Replaced
            }
            None => SubmitOutcome::Stored,
        }
    }

    /// Atomically read and clear the driver→app slot.
    ///
    /// Returns `None` when empty — a normal result, never an error.
    pub fn poll(&self) -> Option<Envelope> {
        let taken = self.inbound.lock().unwrap().take();
        if let Some(envelope) = &taken {
            debug!(source = %envelope.source, "inbound envelope consumed");
        }
        taken
    }

    /// Store an envelope in the app→driver slot.
    ///
    /// A message still in `thinking` state is ignored: partial/streaming
    /// content must never reach the driver.
    pub fn publish(&self, envelope: Envelope) -> PublishOutcome {
        if let Some(message) = envelope.as_message() {
            if message.thinking {
                debug!("refusing to publish a thinking message");
                return PublishOutcome::IgnoredThinking;
            }
        }
        *self.outbound.lock().unwrap() = Some(envelope);
        PublishOutcome::Stored
    }

    /// Read the app→driver slot without clearing it.
    pub fn fetch(&self) -> Option<Envelope> {
        self.outbound.lock().unwrap().clone()
    }

    /// Whether the driver→app slot currently holds an envelope.
    /// Read-only: has no effect on slot contents.
    pub fn inbound_pending(&self) -> bool {
        self.inbound.lock().unwrap().is_some()
    }

    /// Whether the app→driver slot currently holds an envelope.
    /// Read-only: has no effect on slot contents.
    pub fn outbound_available(&self) -> bool {
        self.outbound.lock().unwrap().is_some()
    }
}
