//! Engine - composition root
//!
//! Wires the store, roster, provider, mailbox, scheduler, approval gate,
//! bridge server, and reachability monitor into one running process, and
//! owns the mailbox intake loop that turns driver submissions into cycles.
//!
//! The intake loop only polls while no cycle is active. An active (or
//! paused) cycle leaves the inbound slot untouched, so the slot always
//! holds the newest submission when the engine is ready for it; older
//! submissions displaced in the meantime are lost (last-write-wins).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::bridge::{
    BridgeCommand, BridgeHandles, BridgeMonitor, BridgeServer, ContextLog, Envelope,
    EnvelopePayload, Mailbox,
};
use crate::config::Config;
use crate::conversation::{ConversationStore, MemoryStore};
use crate::error::Result;
use crate::learning::{FileLessonLog, LessonLog};
use crate::orchestrator::{ApprovalGate, Orchestrator, OrchestratorParts};
use crate::providers::{InferenceProvider, OpenAiProvider};
use crate::roster::AgentRoster;
use crate::tools::{ToolExecutor, WorkspaceExecutor};
use crate::utils::string::preview;

/// The assembled engine process.
pub struct Engine {
    config: Config,
    store: Arc<dyn ConversationStore>,
    mailbox: Arc<Mailbox>,
    orchestrator: Arc<Orchestrator>,
    context_log: Arc<ContextLog>,
    monitor: Option<BridgeMonitor>,
    server: BridgeServer,
    intake_running: Arc<AtomicBool>,
}

impl Engine {
    /// Assemble an engine from configuration with the default
    /// OpenAI-compatible provider.
    pub fn new(config: Config) -> Self {
        let provider: Arc<dyn InferenceProvider> =
            Arc::new(OpenAiProvider::from_config(&config.provider));
        Self::with_provider(config, provider)
    }

    /// Assemble an engine with a custom provider (tests, alternative
    /// endpoints).
    pub fn with_provider(config: Config, provider: Arc<dyn InferenceProvider>) -> Self {
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryStore::new());
        let mailbox = Arc::new(Mailbox::new());
        let context_log = Arc::new(ContextLog::new(config.context_log_path()));
        let executor: Arc<dyn ToolExecutor> =
            Arc::new(WorkspaceExecutor::new(config.workspace_path()));
        let lessons: Arc<dyn LessonLog> = Arc::new(FileLessonLog::new(config.lessons_path()));
        let roster = AgentRoster::new(config.agents.clone());

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorParts {
            config: config.orchestrator.clone(),
            selector: config.selector.clone(),
            generation: config.provider.clone(),
            advisory_limit: config.learning.advisory_limit,
            roster,
            store: Arc::clone(&store),
            provider,
            tools: executor.definitions(),
            lessons: Arc::clone(&lessons),
            mailbox: Arc::clone(&mailbox),
            context_log: Some(Arc::clone(&context_log)),
        }));

        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&store),
            executor,
            lessons,
        ));

        let server = BridgeServer::new(
            &config.bridge.host,
            config.bridge.port,
            BridgeHandles {
                mailbox: Arc::clone(&mailbox),
                orchestrator: Arc::clone(&orchestrator),
                gate,
                context_log: Some(Arc::clone(&context_log)),
            },
        );

        Self {
            config,
            store,
            mailbox,
            orchestrator,
            context_log,
            monitor: None,
            server,
            intake_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The scheduler handle.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// The mailbox handle.
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Whether the bridge is currently reachable per the monitor.
    pub fn bridge_reachable(&self) -> bool {
        self.monitor.as_ref().map(|m| m.reachable()).unwrap_or(false)
    }

    /// Start all services: context log, bridge server, monitor, intake
    /// loop, and optionally a first cycle. Returns the bound address.
    pub async fn start(&mut self, initial_goal: Option<String>) -> Result<SocketAddr> {
        self.context_log.ensure_initialized().await?;

        let addr = self.server.start().await?;

        // Probe the address we actually bound (port 0 resolves here).
        let monitor = BridgeMonitor::new(
            &format!("http://{}", addr),
            self.config.bridge.probe_interval_secs,
        );
        monitor.start();
        self.monitor = Some(monitor);

        self.start_intake();

        if let Some(goal) = initial_goal {
            let orchestrator = Arc::clone(&self.orchestrator);
            tokio::spawn(async move {
                match orchestrator.start(&goal).await {
                    Ok(outcome) => info!(outcome = ?outcome, "initial cycle finished"),
                    Err(e) => error!(error = %e, "initial cycle failed to start"),
                }
            });
        }

        info!(addr = %addr, "engine started");
        Ok(addr)
    }

    /// Run until Ctrl-C, then shut down.
    pub async fn run_until_shutdown(mut self, initial_goal: Option<String>) -> Result<()> {
        self.start(initial_goal).await?;
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        self.shutdown();
        Ok(())
    }

    /// Stop all services. The active cycle is asked to stop cooperatively.
    pub fn shutdown(&mut self) {
        self.intake_running.store(false, Ordering::SeqCst);
        self.orchestrator.stop();
        if let Some(monitor) = &self.monitor {
            monitor.stop();
        }
        self.server.stop();
        info!("engine shut down");
    }

    /// Spawn the mailbox intake loop.
    fn start_intake(&self) {
        if self.intake_running.swap(true, Ordering::SeqCst) {
            warn!("intake loop already running");
            return;
        }

        let running = Arc::clone(&self.intake_running);
        let mailbox = Arc::clone(&self.mailbox);
        let orchestrator = Arc::clone(&self.orchestrator);
        let store = Arc::clone(&self.store);
        let context_log = Arc::clone(&self.context_log);
        let interval = Duration::from_millis(self.config.bridge.poll_interval_ms.max(100));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Consume the immediate first tick so the first poll happens
            // one full interval after startup.
            ticker.tick().await;
            info!(interval_ms = interval.as_millis() as u64, "intake loop started");

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    info!("intake loop stopped");
                    break;
                }

                // Leave the slot alone while a cycle is running or paused;
                // the newest submission will be there when we are ready.
                if orchestrator.is_active() {
                    continue;
                }

                let Some(envelope) = mailbox.poll() else {
                    continue;
                };
                dispatch(&orchestrator, &store, &context_log, envelope).await;
            }
        });
    }
}

/// Act on one consumed envelope.
async fn dispatch(
    orchestrator: &Arc<Orchestrator>,
    store: &Arc<dyn ConversationStore>,
    context_log: &Arc<ContextLog>,
    envelope: Envelope,
) {
    match envelope.payload {
        EnvelopePayload::Message { message } => {
            info!(goal = %preview(&message.content, 80), "goal received from driver");
            let orchestrator = Arc::clone(orchestrator);
            tokio::spawn(async move {
                match orchestrator.start(&message.content).await {
                    Ok(outcome) => info!(outcome = ?outcome, "cycle finished"),
                    Err(e) => warn!(error = %e, "cycle rejected"),
                }
            });
        }
        EnvelopePayload::Command { command } => match command {
            BridgeCommand::Stop => {
                info!("stop command received from driver");
                orchestrator.stop();
            }
            BridgeCommand::Clear => {
                info!("history clear command received from driver");
                store.clear().await;
                if let Err(e) = context_log.reset().await {
                    warn!(error = %e, "context log reset failed");
                }
            }
        },
    }
}
