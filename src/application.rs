//! Application entry point and builder pattern implementation.

use std::sync::Arc;

use crate::{app_context::AppState, config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::{Result, bail};

/// The daemon from initialization to shutdown.
///
/// # Example
///
/// ```no_run
/// use argond::application::Application;
/// use argond::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()
///     .await?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    source: StateSource,
}

enum StateSource {
    Config(ConfigManager),
    Prepared(Arc<AppState>),
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and run main loop.
    pub async fn run(&mut self) -> Result<()> {
        match &self.source {
            StateSource::Config(config_manager) => {
                self.coordinator
                    .initialize(config_manager.clone())
                    .await?;
            }
            StateSource::Prepared(state) => {
                self.coordinator.initialize_with_state(state.clone()).await?;
            }
        }

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
    app_state: Option<Arc<AppState>>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
            app_state: None,
        }
    }

    /// Sets the configuration manager; hardware is opened from it on `run`.
    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    /// Uses already opened hardware instead of the configured devices.
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.app_state = Some(app_state);
        self
    }

    pub async fn build(self) -> Result<Application> {
        let source = match (self.config_manager, self.app_state) {
            (_, Some(state)) => StateSource::Prepared(state),
            (Some(config_manager), None) => StateSource::Config(config_manager),
            (None, None) => bail!("Configuration manager is required"),
        };

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, event::Event, testing};
    use std::time::Duration;

    #[tokio::test]
    async fn build_requires_configuration() {
        let err = Application::builder().build().await.err().unwrap();
        assert_eq!(err.to_string(), "Configuration manager is required");
    }

    #[tokio::test]
    async fn runs_until_stopped() {
        let state = testing::app_state(Config::default());
        let mut app = Application::builder()
            .with_app_state(state.clone())
            .build()
            .await
            .unwrap();
        let event_bus = app.coordinator.event_bus().clone();
        let handle = tokio::spawn(async move { app.run().await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                let _ = event_bus.publish(Event::SystemShutdown);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("application did not stop");

        handle.await.unwrap().unwrap();
        assert!(!state.monitor.is_enabled());
    }
}
