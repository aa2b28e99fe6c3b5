//! `roundtable run` — host the engine.

use anyhow::Result;
use tracing::info;

use roundtable::config::Config;
use roundtable::engine::Engine;

/// Start the engine and serve until Ctrl-C.
pub async fn execute(config: Config, goal: Option<String>) -> Result<()> {
    info!(
        bridge = %config.bridge.base_url(),
        agents = config.agents.len(),
        "starting roundtable engine"
    );

    let engine = Engine::new(config);
    engine.run_until_shutdown(goal).await?;
    Ok(())
}
