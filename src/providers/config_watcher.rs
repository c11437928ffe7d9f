use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{ConfigChangeType, Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Quiet period after the last write before the file is analysed.
pub const DEBOUNCE: Duration = Duration::from_millis(2000);

/// Configuration file watcher.
///
/// Watches the directory holding the configuration file (editors replace
/// files rather than writing in place) and publishes a
/// [`AppEvent::ConfigChangeDetected`] once writes settle. The coordinator
/// decides whether to reload.
///
/// - **Priority**: 6
/// - **Critical**: No
pub struct ConfigWatcherServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl ConfigWatcherServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for ConfigWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_config_watcher_service(state, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ConfigWatcherService"
    }

    fn priority(&self) -> i32 {
        6
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Forwards notify callbacks into the async side.
#[derive(Debug)]
struct AsyncEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for AsyncEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward filesystem event: {e}");
        }
    }
}

fn affects_config(event: &Event, config_path: &Path) -> bool {
    let relevant_kind = event.kind.is_modify() || event.kind.is_create();
    relevant_kind
        && event
            .paths
            .iter()
            .any(|path| path == config_path || path.file_name() == config_path.file_name())
}

async fn run_config_watcher_service(
    state: Arc<AppState>,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let config_path = state.config_manager().path().to_path_buf();
    let watch_path = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_path.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(AsyncEventHandler { sender: event_tx })
        .context("Failed to create filesystem watcher")?;
    watcher
        .watch(&watch_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", watch_path.display()))?;
    info!("Watching {} for changes", config_path.display());

    let mut pending_since: Option<tokio::time::Instant> = None;

    loop {
        let deadline = pending_since.map(|since| since + DEBOUNCE);
        let settle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = cancel_token.cancelled() => break,

            event_result = event_rx.recv() => match event_result {
                Some(Ok(event)) => {
                    if affects_config(&event, &config_path) {
                        debug!("Config file event: {:?}", event.kind);
                        pending_since = Some(tokio::time::Instant::now());
                    }
                }
                Some(Err(e)) => warn!("Filesystem watcher error: {e}"),
                None => {
                    warn!("Filesystem event channel closed");
                    break;
                }
            },

            () = settle => {
                pending_since = None;
                publish_change(&state, &event_bus, &config_path).await;
            }
        }
    }

    if let Err(e) = watcher.unwatch(&watch_path) {
        debug!("Failed to unwatch {}: {e}", watch_path.display());
    }
    info!("Config watcher stopped");
    Ok(())
}

async fn publish_change(state: &AppState, event_bus: &EventBus, config_path: &Path) {
    if !config_path.exists() {
        warn!("Configuration file {} no longer exists", config_path.display());
        return;
    }

    let change_type = match state.config_manager().analyze_config_changes().await {
        Ok(change_type) => change_type,
        Err(e) => {
            error!("Ignoring unreadable configuration: {e:#}");
            return;
        }
    };

    if let ConfigChangeType::ColdRestart { changed_sections } = &change_type {
        warn!("Changes to {changed_sections:?} take effect after a restart");
    }
    if let Err(e) = event_bus.publish(AppEvent::ConfigChangeDetected(change_type)) {
        error!("Failed to publish config change event: {e}");
    }
}
