use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::EventBus,
    gesture::PowerButtonMonitor,
    monitor_state::MonitorState,
    providers::traits::ServiceProvider,
    snapshot::ConfigSnapshot,
    task_manager::TaskManager,
};

/// Power button gesture monitoring.
///
/// Starts two tasks: the gesture monitor itself and a gate task that keeps
/// the enable and remap flags in step with the configuration. Priority 9.
pub struct PowerButtonServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl PowerButtonServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

pub const GATE_TASK: &str = "PowerButtonGate";

#[async_trait]
impl ServiceProvider for PowerButtonServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let config = self.state.config_manager.clone();
        let monitor = self.state.monitor.clone();
        task_manager
            .spawn_task(GATE_TASK.to_string(), move |cancel_token| async move {
                run_gate(config, monitor, cancel_token).await
            })
            .await?;

        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                PowerButtonMonitor::new(
                    state.monitor.clone(),
                    state.edge_acquirer.clone(),
                    state.actions.clone(),
                    event_bus,
                    cancel_token,
                )
                .run()
                .await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "PowerButtonService"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Applies the power button flags now and after every configuration change.
async fn run_gate(
    config: Arc<ConfigManager>,
    monitor: Arc<MonitorState>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut settings = config.subscribe();

    loop {
        settings.borrow_and_update();
        let current = config.clone_config().await;
        match ConfigSnapshot::build(&current) {
            Ok(snapshot) => snapshot.apply_power_button(&monitor),
            Err(e) => warn!("Power button settings not applied: {e:#}"),
        }

        tokio::select! {
            () = cancel_token.cancelled() => break,
            changed = settings.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("Configuration changed, refreshing power button gate");
            }
        }
    }
    Ok(())
}
