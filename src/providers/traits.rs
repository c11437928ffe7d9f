use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Base trait for providers that build a component asynchronously.
///
/// # Example
///
/// ```no_run
/// use argond::providers::traits::AsyncProvider;
///
/// struct BusPathProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for BusPathProvider {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("/dev/i2c-1".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// Trait for services that can be started through TaskManager.
///
/// Providers are started in descending priority. A critical provider that
/// fails to start aborts startup; any other failure is logged and the
/// daemon runs without that service.
///
/// # Example
///
/// ```no_run
/// use argond::providers::traits::ServiceProvider;
/// use argond::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct HeartbeatService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for HeartbeatService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("heartbeat".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "HeartbeatService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}
