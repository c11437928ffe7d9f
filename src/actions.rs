use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::info;
use tokio::process::Command;

use crate::config::ActionsCfg;

/// System actions triggered by power button gestures.
#[async_trait]
pub trait PowerActions: Send + Sync {
    async fn reboot(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
}

/// Runs the configured commands.
#[derive(Debug, Clone)]
pub struct SystemPowerActions {
    reboot: Vec<String>,
    shutdown: Vec<String>,
}

impl SystemPowerActions {
    pub fn from_config(cfg: &ActionsCfg) -> Self {
        Self {
            reboot: cfg.reboot.clone(),
            shutdown: cfg.shutdown.clone(),
        }
    }
}

async fn run_command(argv: &[String]) -> Result<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("Empty power command"))?;

    info!("Running {}", argv.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run {program}"))?;

    if !status.success() {
        anyhow::bail!("{program} exited with {status}");
    }
    Ok(())
}

#[async_trait]
impl PowerActions for SystemPowerActions {
    async fn reboot(&self) -> Result<()> {
        run_command(&self.reboot).await
    }

    async fn shutdown(&self) -> Result<()> {
        run_command(&self.shutdown).await
    }
}
