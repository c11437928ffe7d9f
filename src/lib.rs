//! # argond
//!
//! A Linux daemon for the Argon ONE family of Raspberry Pi cases: it drives
//! the case fan over I2C and turns power button pulses into reboot and
//! shutdown.
//!
//! ## Features
//!
//! - **Fan Control**: descending threshold tables per temperature domain
//!   (CPU, GPU, storage, PMIC) with hysteresis on the way down
//! - **Power Button**: pulse width classification on a GPIO line with three
//!   edge acquisition backends chosen at runtime
//! - **Hot Reload**: configuration changes without restart
//! - **D-Bus Interface**: stop, reload and live state on the session bus
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Shared hardware handles
//! - Service providers for modular functionality
//!
//! ## Example
//!
//! ```no_run
//! use argond::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod actions;
pub mod app_context;
pub mod application;
pub mod board;
pub mod config;
pub mod coordinator;
pub mod edge;
pub mod event;
pub mod fan_control;
pub mod gesture;
pub mod interface;
pub mod monitor_state;
pub mod providers;
pub mod sensors;
pub mod snapshot;
pub mod task_manager;
pub mod temperature_sensors;
pub mod threshold;

#[cfg(test)]
pub mod testing;
