use std::sync::{Arc, atomic::Ordering};

use log::info;
use zbus::{fdo, interface, object_server::SignalEmitter};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
};

pub const DBUS_NAME: &str = "io.github.argond";
pub const DBUS_PATH: &str = "/io/github/argond";

pub struct DBusInterface {
    state: Arc<AppState>,
    version: String,
    event_bus: EventBus,
}

impl DBusInterface {
    pub fn new(state: Arc<AppState>, version: String, event_bus: EventBus) -> Self {
        Self {
            state,
            version,
            event_bus,
        }
    }
}

#[interface(name = "io.github.argond1")]
impl DBusInterface {
    #[zbus(signal)]
    async fn stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn fan_speed_changed(emitter: &SignalEmitter<'_>, speed: u8) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn gesture_detected(emitter: &SignalEmitter<'_>, gesture: &str) -> zbus::Result<()>;

    async fn stop(
        &self,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> fdo::Result<()> {
        info!("Stop requested over D-Bus");
        emitter.stopped().await?;
        self.event_bus
            .publish(Event::SystemShutdown)
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn reload(&self) -> fdo::Result<()> {
        info!("Reload requested over D-Bus");
        self.state
            .config_manager()
            .reload()
            .await
            .map_err(|e| fdo::Error::Failed(format!("{e:#}")))
    }

    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }

    /// Last written speed in percent, 255 before the first write.
    #[zbus(property)]
    async fn current_fan_speed(&self) -> u8 {
        self.state.fan_speed.load(Ordering::Acquire)
    }

    #[zbus(property)]
    async fn power_button_enabled(&self) -> bool {
        self.state.monitor.is_enabled()
    }
}
