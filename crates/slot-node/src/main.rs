//! `slot-node` — reference slot for a relay.
//!
//! Registers with the relay, migrates to the dedicated port, registers one
//! agent (reusing the id stored in the agent-id file when present) and then
//! pulls commands on an interval. Each pulled command is printed to stdout
//! as one JSON line; logs go to stderr.
//!
//! # Env vars
//!
//! | Variable             | Description                 | Default                  |
//! |----------------------|-----------------------------|--------------------------|
//! | `SLOT_CONFIG`        | TOML config file            | `slot.toml`              |
//! | `SLOT_RELAY_URL`     | Registration endpoint       | `ws://localhost:8081/ws` |
//! | `SLOT_ID`            | Slot identity               | `slot-<hostname>`        |
//! | `SLOT_AGENT_ID_FILE` | Where the agent id is kept  | `agent_id.txt`           |
//! | `RUST_LOG`           | Log filter                  | `info`                   |

mod agent_store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use slot_sdk::{
    AgentIdentity, AgentRegistration, SlotClient, SlotClientBuilder, SlotConfig, SlotSdkError,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "slot-node", version, about = "Relay slot client")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "SLOT_CONFIG", default_value = "slot.toml")]
    config: PathBuf,
    /// Override `relay_url` from the config file.
    #[arg(long, env = "SLOT_RELAY_URL")]
    relay_url: Option<String>,
    /// Override `slot_id` from the config file.
    #[arg(long, env = "SLOT_ID")]
    slot_id: Option<String>,
    /// File holding the agent id assigned by the relay.
    #[arg(long, env = "SLOT_AGENT_ID_FILE", default_value = "agent_id.txt")]
    agent_id_file: PathBuf,
    /// Description sent with AGENT_REGISTER.
    #[arg(long, default_value = "slot-node")]
    description: String,
    /// Seconds between command pulls.
    #[arg(long, default_value_t = 2)]
    poll_interval_secs: u64,
    /// Commands requested per pull.
    #[arg(long, default_value_t = 1)]
    count: u32,
    /// Emit logs as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = load_config(&cli.config)?;
    if let Some(url) = &cli.relay_url {
        config.relay_url = url.clone();
    }
    if let Some(id) = &cli.slot_id {
        config.slot_id = id.clone();
    }

    let client = SlotClientBuilder::from_config(&config).build()?;
    let runner = client.spawn();

    // ── Shutdown ─────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let stopper = client.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received, shutting down");
        shutdown_clone.cancel();
        stopper.stop();
    });

    tracing::info!(
        slot_id = %config.slot_id,
        relay_url = %config.relay_url,
        "starting slot-node"
    );

    let poll = PollLoop {
        client: &client,
        identity: AgentIdentity::local(cli.description.clone()),
        agent_id_file: &cli.agent_id_file,
        interval: Duration::from_secs(cli.poll_interval_secs),
        count: cli.count,
        shutdown: &shutdown,
    };
    if let Err(e) = poll.run().await {
        tracing::error!(error = %e, "poll loop failed");
        client.stop();
        let _ = runner.await;
        return Err(e);
    }

    match runner.await? {
        Ok(()) => tracing::info!("slot exited cleanly"),
        Err(SlotSdkError::Shutdown) => tracing::info!("slot shutdown"),
        Err(e) => {
            tracing::error!(error = %e, "slot exited with error");
            return Err(e.into());
        }
    }
    Ok(())
}

struct PollLoop<'a> {
    client: &'a SlotClient,
    identity: AgentIdentity,
    agent_id_file: &'a Path,
    interval: Duration,
    count: u32,
    shutdown: &'a CancellationToken,
}

impl PollLoop<'_> {
    async fn run(&self) -> anyhow::Result<()> {
        let mut agent_id = agent_store::load(self.agent_id_file)?;
        if let Some(id) = agent_id {
            tracing::info!(agent_id = id, "reusing stored agent id");
        }

        while !self.shutdown.is_cancelled() {
            let ready = tokio::select! {
                r = self.client.wait_ready(Duration::from_secs(30)) => r,
                _ = self.shutdown.cancelled() => break,
            };
            if !ready {
                tracing::info!(state = %self.client.state(), "waiting for dedicated connection");
                continue;
            }

            let id = match agent_id {
                Some(id) => id,
                None => match self.register().await? {
                    Some(id) => {
                        agent_id = Some(id);
                        id
                    }
                    None => {
                        self.pause().await;
                        continue;
                    }
                },
            };

            if let Some(command) = self.client.pull_commands_default(id, self.count).await? {
                println!("{}", serde_json::Value::Object(command));
            }
            self.pause().await;
        }
        Ok(())
    }

    async fn register(&self) -> anyhow::Result<Option<i64>> {
        match self.client.register_agent_default(&self.identity).await? {
            Some(AgentRegistration::Registered(id)) => {
                agent_store::save(self.agent_id_file, id)?;
                tracing::info!(
                    agent_id = id,
                    file = %self.agent_id_file.display(),
                    "agent registered"
                );
                Ok(Some(id))
            }
            Some(AgentRegistration::Rejected { error }) => {
                tracing::error!(error = %error, "agent registration rejected");
                Ok(None)
            }
            None => {
                tracing::warn!("agent registration timed out");
                Ok(None)
            }
        }
    }

    async fn pause(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

/// Load the config file; a missing file yields the defaults.
fn load_config(path: &Path) -> anyhow::Result<SlotConfig> {
    if !path.exists() {
        return Ok(SlotConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))
}

/// Logs go to stderr so stdout carries only pulled commands.
fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
