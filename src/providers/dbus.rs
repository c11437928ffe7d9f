//! D-Bus service provider for dependency injection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_stream::{
    StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tokio_util::sync::CancellationToken;
use zbus::{Connection, object_server::InterfaceRef};

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    interface::{DBUS_NAME, DBUS_PATH, DBusInterface, DBusInterfaceSignals},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// D-Bus service provider for external control and monitoring.
///
/// Exposes `Stop`/`Reload` methods and the daemon's live state on the
/// session bus, and turns fan speed and gesture events into signals.
///
/// # Priority and Criticality
///
/// - **Priority**: 8 (high)
/// - **Critical**: No (the board keeps working without a bus)
///
/// # Interface
///
/// - **Service Name**: `io.github.argond`
/// - **Object Path**: `/io/github/argond`
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use argond::providers::DBusServiceProvider;
/// use argond::event::EventBus;
/// use argond::app_context::AppState;
///
/// # async fn example(state: Arc<AppState>) -> anyhow::Result<()> {
/// let event_bus = EventBus::new();
/// // Fails when no session bus is available
/// let provider = DBusServiceProvider::new(state, event_bus).await?;
/// # Ok(())
/// # }
/// ```
pub struct DBusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
}

impl DBusServiceProvider {
    /// Creates a new D-Bus service provider with session bus connection.
    pub async fn new(state: Arc<AppState>, event_bus: EventBus) -> Result<Self> {
        let connection = Connection::session()
            .await
            .context("Failed to connect to the session bus")?;
        Ok(Self {
            state,
            event_bus,
            connection,
        })
    }
}

#[async_trait]
impl ServiceProvider for DBusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        let connection = self.connection.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_dbus_service(state, event_bus, connection, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "DBusService"
    }

    fn priority(&self) -> i32 {
        8
    }

    fn is_critical(&self) -> bool {
        false
    }
}

async fn run_dbus_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    connection: Connection,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut events = BroadcastStream::new(event_bus.subscribe());
    let interface = DBusInterface::new(state, env!("CARGO_PKG_VERSION").to_string(), event_bus);

    connection.object_server().at(DBUS_PATH, interface).await?;
    connection.request_name(DBUS_NAME).await?;
    let iface = connection
        .object_server()
        .interface::<_, DBusInterface>(DBUS_PATH)
        .await?;
    info!("D-Bus interface registered as {DBUS_NAME}");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("D-Bus service cancelled");
                break;
            }
            event = events.next() => match event {
                Some(Ok(event)) => emit_signal(&iface, event).await,
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    warn!("D-Bus service missed {n} events");
                }
                None => break,
            }
        }
    }

    if let Err(e) = connection.release_name(DBUS_NAME).await {
        debug!("Failed to release {DBUS_NAME}: {e}");
    }
    Ok(())
}

async fn emit_signal(iface: &InterfaceRef<DBusInterface>, event: Event) {
    let result = match event {
        Event::FanSpeedChanged(speed) => iface.fan_speed_changed(speed).await,
        Event::GestureDetected(gesture) => iface.gesture_detected(&gesture.to_string()).await,
        _ => return,
    };
    if let Err(e) = result {
        warn!("Failed to emit D-Bus signal: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, testing};

    #[tokio::test]
    async fn dbus_service_provider_metadata() {
        let state = testing::app_state(Config::default());

        // No session bus in most build environments.
        match DBusServiceProvider::new(state, EventBus::new()).await {
            Ok(provider) => {
                assert_eq!(provider.name(), "DBusService");
                assert_eq!(provider.priority(), 8);
                assert!(!provider.is_critical());
            }
            Err(e) => assert!(e.to_string().contains("session bus")),
        }
    }

    #[tokio::test]
    async fn dbus_service_stops_on_cancel() {
        let state = testing::app_state(Config::default());
        let event_bus = EventBus::new();
        let mut task_manager = TaskManager::new();

        let Ok(provider) = DBusServiceProvider::new(state, event_bus.clone()).await else {
            return;
        };
        if provider.start(&mut task_manager).await.is_err() {
            return;
        }
        assert!(task_manager.is_running("DBusService"));

        let _ = event_bus.publish(Event::FanSpeedChanged(55));
        let _ = task_manager.shutdown_all().await;
        assert_eq!(task_manager.active_count(), 0);
    }
}
