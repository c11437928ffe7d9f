//! System coordinator for managing service lifecycle and dependency injection.

use std::{ops::ControlFlow, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{ConfigChangeType, Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, ConfigWatcherServiceProvider, DBusServiceProvider,
        FanControlServiceProvider, PowerButtonServiceProvider, ServiceProvider,
    },
    task_manager::TaskManager,
};

/// Owns every service of the daemon and stops them together.
///
/// Services are registered as providers, started in priority order and
/// share one [`TaskManager`]; cancelling its token stops the fan loop and
/// the power button monitor within one tick. The main loop reacts to
/// process signals and to events published on the [`EventBus`]:
///
/// - `SIGINT` / `SIGTERM` and [`Event::SystemShutdown`] stop the daemon
/// - `SIGHUP` and hot-reloadable file changes reload the configuration
/// - cold-restart changes are only reported
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Opens the hardware described by the configuration and registers the
    /// services that use it.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;

        self.initialize_with_state(state).await
    }

    /// Registers services around an already built state.
    pub async fn initialize_with_state(&mut self, state: Arc<AppState>) -> Result<()> {
        self.shared_state = Some(state.clone());

        self.register_service_providers(state)
            .await
            .context("Failed to register service providers")?;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn register_service_providers(&mut self, state: Arc<AppState>) -> Result<()> {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(FanControlServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(PowerButtonServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(ConfigWatcherServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
        ];

        match DBusServiceProvider::new(state, self.event_bus.clone()).await {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!("Failed to create D-Bus service provider: {e:#}, skipping D-Bus service"),
        }

        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => info!(
                    "Service '{}' started successfully (priority: {}, critical: {})",
                    provider.name(),
                    provider.priority(),
                    is_critical
                ),
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => warn!(
                    "Non-critical service '{}' failed to start: {e:#}",
                    provider.name()
                ),
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Runs until a stop is requested, then shuts every service down.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }

                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    self.handle_hot_reload().await;
                }

                event = event_rx.recv() => {
                    if self.handle_event(event).await?.is_break() {
                        break;
                    }
                }
            }
        }

        self.shutdown()
            .await
            .context("Failed to shutdown gracefully")?;
        info!("Main event loop terminated");
        Ok(())
    }

    async fn handle_event(&self, event_result: Result<Event, RecvError>) -> Result<ControlFlow<()>> {
        match event_result {
            Ok(Event::ConfigChangeDetected(change_type)) => {
                info!("Processing ConfigChangeDetected event");
                self.handle_config_change(change_type).await;
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(ControlFlow::Break(()));
            }
            Ok(event) => debug!("Received event: {event:?}"),
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
            Err(RecvError::Lagged(n)) => warn!("Event bus lagged by {n} messages"),
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn handle_config_change(&self, change_type: ConfigChangeType) {
        match change_type {
            ConfigChangeType::HotReload => self.handle_hot_reload().await,
            ConfigChangeType::ColdRestart { changed_sections } => {
                warn!("Hardware configuration changes detected in sections: {changed_sections:?}");
                warn!("These changes require daemon restart to take effect");
                info!("To restart the daemon, run: sudo systemctl restart argond");
            }
        }
    }

    /// Reloads the file; the running configuration stays in place when the
    /// new one cannot be read.
    async fn handle_hot_reload(&self) {
        let Some(state) = &self.shared_state else {
            warn!("Cannot reload config: system state not initialized");
            return;
        };

        match state.config_manager().reload().await {
            Ok(()) => info!("Hot configuration reload completed successfully"),
            Err(e) => warn!("Keeping previous configuration: {e:#}"),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }
        if let Some(state) = &self.shared_state {
            state.monitor.reset();
        }

        info!("Shutdown complete");
        Ok(())
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }

    pub fn state(&self) -> Result<&Arc<AppState>> {
        self.shared_state
            .as_ref()
            .ok_or_else(|| anyhow!("System not properly initialized"))
    }
}
