use std::path::Path;

use anyhow::{Context, Result};
use i2cdev::{core::I2CDevice, linux::LinuxI2CDevice};

pub trait BusIO: Send + 'static {
    fn write(&mut self, buf: &[u8]) -> Result<()>;
    /// Writes `buf` then reads `out.len()` bytes.
    fn write_read(&mut self, buf: &[u8], out: &mut [u8]) -> Result<()>;
}

/// A client address on a Linux `/dev/i2c-N` adapter.
///
/// The board speaks plain SMBus: one byte commands, byte writes to a
/// register, byte reads from a register.
pub struct I2cDevice {
    dev: LinuxI2CDevice,
    address: u16,
}

impl I2cDevice {
    pub fn open(path: &Path, address: u16) -> Result<Self> {
        let dev = LinuxI2CDevice::new(path, address).with_context(|| {
            format!("Failed to open {} at address {address:#04x}", path.display())
        })?;
        Ok(Self { dev, address })
    }
}

impl BusIO for I2cDevice {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let result = match *buf {
            [value] => self.dev.smbus_write_byte(value),
            [register, value] => self.dev.smbus_write_byte_data(register, value),
            _ => self.dev.write(buf),
        };
        result.with_context(|| format!("I2C write to {:#04x} failed", self.address))
    }

    fn write_read(&mut self, buf: &[u8], out: &mut [u8]) -> Result<()> {
        let result = match (buf, out.len()) {
            ([register], 1) => self
                .dev
                .smbus_read_byte_data(*register)
                .map(|value| out[0] = value),
            _ => self.dev.write(buf).and_then(|()| self.dev.read(out)),
        };
        result.with_context(|| format!("I2C transfer with {:#04x} failed", self.address))
    }
}
