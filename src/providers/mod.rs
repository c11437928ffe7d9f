//! Dependency injection providers for service management.
//!
//! Each long running part of the daemon is a [`ServiceProvider`] that the
//! coordinator starts in priority order:
//!
//! | service                | priority | critical |
//! |------------------------|----------|----------|
//! | fan control            | 10       | no       |
//! | power button           | 9        | no       |
//! | D-Bus                  | 8        | no       |
//! | configuration watcher  | 6        | no       |

pub mod app_state;
pub mod config_watcher;
pub mod dbus;
pub mod fan_control;
pub mod power_button;
pub mod traits;

pub use app_state::AppStateProvider;
pub use config_watcher::ConfigWatcherServiceProvider;
pub use dbus::DBusServiceProvider;
pub use fan_control::FanControlServiceProvider;
pub use power_button::PowerButtonServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
