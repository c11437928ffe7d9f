//! Device channel to the add-on board microcontroller.

pub mod argon;
pub mod bus_io;
pub mod protocol;

use anyhow::Result;
use async_trait::async_trait;

use crate::threshold::FanSpeed;

pub use argon::ArgonBoard;
pub use bus_io::I2cDevice;

/// Commands understood by the board.
///
/// Only the fan control loop writes through the channel, so implementations
/// need no ordering beyond their own internal lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Whether the firmware supports the register protocol. Probe failures
    /// read as `false`.
    async fn probe_extended_support(&self) -> bool;

    /// Fails on transport errors.
    async fn set_fan_speed(&self, speed: FanSpeed, extended: bool) -> Result<()>;
}
