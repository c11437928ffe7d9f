//! Application state shared by every service.

use std::sync::{Arc, atomic::AtomicU8};

use log::{info, warn};

use crate::{
    actions::{PowerActions, SystemPowerActions},
    board::{ArgonBoard, DeviceChannel, I2cDevice},
    config::{Config, ConfigManager},
    edge::{EdgeAcquirer, GpioEdgeAcquirer},
    fan_control::SPEED_UNKNOWN,
    monitor_state::MonitorState,
    sensors::SensorSource,
    temperature_sensors::BoardSensors,
};

/// Hardware handles and runtime flags shared between the monitors, the
/// coordinator and the D-Bus interface.
pub struct AppState {
    pub config_manager: Arc<ConfigManager>,
    /// `None` when the I2C bus could not be opened; fan control is then off.
    pub device: Option<Arc<dyn DeviceChannel>>,
    pub sensors: Arc<dyn SensorSource>,
    pub monitor: Arc<MonitorState>,
    pub actions: Arc<dyn PowerActions>,
    pub edge_acquirer: Arc<dyn EdgeAcquirer>,
    /// Last speed written to the board, [`SPEED_UNKNOWN`] before the first write.
    pub fan_speed: Arc<AtomicU8>,
}

impl AppState {
    /// Opens the board and discovers sensors for the loaded configuration.
    pub async fn new(config_manager: ConfigManager) -> anyhow::Result<Self> {
        let config = config_manager.clone_config().await;

        Ok(Self::with_components(
            Arc::new(config_manager),
            open_device(&config),
            Arc::new(BoardSensors::discover(&config.sensors)),
            Arc::new(SystemPowerActions::from_config(&config.actions)),
            Arc::new(GpioEdgeAcquirer::from_config(&config.board)),
        ))
    }

    pub fn with_components(
        config_manager: Arc<ConfigManager>,
        device: Option<Arc<dyn DeviceChannel>>,
        sensors: Arc<dyn SensorSource>,
        actions: Arc<dyn PowerActions>,
        edge_acquirer: Arc<dyn EdgeAcquirer>,
    ) -> Self {
        Self {
            config_manager,
            device,
            sensors,
            monitor: Arc::new(MonitorState::new()),
            actions,
            edge_acquirer,
            fan_speed: Arc::new(AtomicU8::new(SPEED_UNKNOWN)),
        }
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}

fn open_device(config: &Config) -> Option<Arc<dyn DeviceChannel>> {
    let board = &config.board;
    match I2cDevice::open(&board.i2c_bus, board.i2c_address) {
        Ok(dev) => {
            info!(
                "Board found on {} at {:#04x}",
                board.i2c_bus.display(),
                board.i2c_address
            );
            Some(Arc::new(ArgonBoard::new(dev)))
        }
        Err(e) => {
            warn!("I2C not enabled yet. Fan control requires a reboot. ({e:#})");
            None
        }
    }
}
