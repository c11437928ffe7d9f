use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState, event::EventBus, fan_control::FanControlLoop,
    providers::traits::ServiceProvider, task_manager::TaskManager,
};

/// Runs the fan control loop against the board.
///
/// Not critical: without an I2C bus the daemon still handles the power
/// button. Priority 10, started first.
pub struct FanControlServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl FanControlServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for FanControlServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let device = self
            .state
            .device
            .clone()
            .context("No board on the I2C bus")?;
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                FanControlLoop::new(
                    state.config_manager.clone(),
                    device,
                    state.sensors.clone(),
                    event_bus,
                    state.fan_speed.clone(),
                    cancel_token,
                )?
                .run()
                .await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "FanControlService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        false
    }
}
