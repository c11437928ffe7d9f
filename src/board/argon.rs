use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::{
    DeviceChannel,
    bus_io::BusIO,
    protocol::{Command, REG_DUTY_CYCLE, Response, probe_value},
};
use crate::threshold::FanSpeed;

/// Time the microcontroller needs after a speed command.
pub const SETTLE_TIME: Duration = Duration::from_secs(1);

/// Register level access to the board microcontroller.
#[derive(Debug)]
pub struct Controller<Io: BusIO> {
    pub dev: Io,
}

impl<Io: BusIO> Controller<Io> {
    fn request(&mut self, cmd: Command) -> Result<Response> {
        let pkt = cmd.to_bytes();
        let mut buf = vec![0u8; cmd.expected_response_len()];
        if buf.is_empty() {
            self.dev.write(&pkt)?;
        } else {
            self.dev.write_read(&pkt, &mut buf)?;
        }
        Response::parse(cmd, &buf)
    }

    pub fn read_register(&mut self, register: u8) -> Result<u8> {
        match self.request(Command::ReadRegister { register })? {
            Response::Register(value) => Ok(value),
            other => Err(anyhow!("Invalid register read response: {other:?}")),
        }
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.request(Command::WriteRegister { register, value })
            .map(|_| ())
    }

    pub fn set_speed(&mut self, speed: u8, extended: bool) -> Result<()> {
        self.request(Command::set_speed(speed, extended)).map(|_| ())
    }

    /// Writes a different value to the duty cycle register and reads it
    /// back. Firmware without register support ignores the write.
    pub fn check_register_support(&mut self) -> Result<bool> {
        let original = self.read_register(REG_DUTY_CYCLE)?;
        self.write_register(REG_DUTY_CYCLE, probe_value(original))?;
        let readback = self.read_register(REG_DUTY_CYCLE)?;
        if readback == original {
            return Ok(false);
        }
        self.write_register(REG_DUTY_CYCLE, original)?;
        Ok(true)
    }
}

/// The add-on board's fan controller behind a bus transport.
pub struct ArgonBoard<Io: BusIO>(Arc<Mutex<Controller<Io>>>, Duration);

impl<Io: BusIO> ArgonBoard<Io> {
    pub fn new(dev: Io) -> Self {
        Self::with_settle_time(dev, SETTLE_TIME)
    }

    pub fn with_settle_time(dev: Io, settle: Duration) -> Self {
        Self(Arc::new(Mutex::new(Controller { dev })), settle)
    }

    async fn with_controller<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Controller<Io>) -> Result<T> + Send + 'static,
    {
        let ctrl = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = ctrl.blocking_lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl<Io: BusIO> DeviceChannel for ArgonBoard<Io> {
    async fn probe_extended_support(&self) -> bool {
        match self
            .with_controller(|ctrl| ctrl.check_register_support())
            .await
        {
            Ok(supported) => {
                info!("Board register support: {supported}");
                supported
            }
            Err(e) => {
                warn!("Register support probe failed, using legacy commands: {e:#}");
                false
            }
        }
    }

    async fn set_fan_speed(&self, speed: FanSpeed, extended: bool) -> Result<()> {
        let percent = speed.percent();
        debug!("Writing fan speed {percent}% (extended: {extended})");
        self.with_controller(move |ctrl| ctrl.set_speed(percent, extended))
            .await?;
        tokio::time::sleep(self.1).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex as StdMutex;

    /// Register file shared with the test body.
    #[derive(Default)]
    struct FakeBusState {
        duty_cycle: u8,
        writes: Vec<Vec<u8>>,
        registers_supported: bool,
        fail: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBus(Arc<StdMutex<FakeBusState>>);

    impl BusIO for FakeBus {
        fn write(&mut self, buf: &[u8]) -> Result<()> {
            let mut state = self.0.lock().unwrap();
            if state.fail {
                anyhow::bail!("Remote I/O error");
            }
            state.writes.push(buf.to_vec());
            if state.registers_supported && buf.len() == 2 && buf[0] == REG_DUTY_CYCLE {
                state.duty_cycle = buf[1];
            }
            Ok(())
        }

        fn write_read(&mut self, buf: &[u8], out: &mut [u8]) -> Result<()> {
            let state = self.0.lock().unwrap();
            if state.fail {
                anyhow::bail!("Remote I/O error");
            }
            assert_eq!(buf, &[REG_DUTY_CYCLE]);
            out[0] = state.duty_cycle;
            Ok(())
        }
    }

    fn board(bus: &FakeBus) -> ArgonBoard<FakeBus> {
        ArgonBoard::with_settle_time(bus.clone(), Duration::ZERO)
    }

    #[tokio::test]
    async fn probe_detects_and_restores_register() {
        let bus = FakeBus::default();
        {
            let mut state = bus.0.lock().unwrap();
            state.registers_supported = true;
            state.duty_cycle = 40;
        }

        assert!(board(&bus).probe_extended_support().await);

        let state = bus.0.lock().unwrap();
        assert_eq!(state.writes, vec![vec![0x80, 41], vec![0x80, 40]]);
        assert_eq!(state.duty_cycle, 40);
    }

    #[tokio::test]
    async fn probe_reports_legacy_firmware() {
        let bus = FakeBus::default();
        bus.0.lock().unwrap().duty_cycle = 100;

        assert!(!board(&bus).probe_extended_support().await);
        assert_eq!(bus.0.lock().unwrap().writes, vec![vec![0x80, 98]]);
    }

    #[tokio::test]
    async fn probe_failure_means_legacy() {
        let bus = FakeBus::default();
        bus.0.lock().unwrap().fail = true;

        assert!(!board(&bus).probe_extended_support().await);
    }

    #[tokio::test]
    async fn set_speed_uses_selected_protocol() {
        let bus = FakeBus::default();
        let board = board(&bus);

        board.set_fan_speed(FanSpeed::from_raw(55), false).await.unwrap();
        board.set_fan_speed(FanSpeed::MAX, true).await.unwrap();

        assert_eq!(bus.0.lock().unwrap().writes, vec![vec![55], vec![0x80, 100]]);
    }

    #[tokio::test]
    async fn set_speed_propagates_transport_errors() {
        let bus = FakeBus::default();
        bus.0.lock().unwrap().fail = true;

        assert!(board(&bus).set_fan_speed(FanSpeed::MAX, false).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn set_speed_waits_for_settle() {
        let bus = FakeBus::default();
        let board = ArgonBoard::new(bus.clone());

        let start = tokio::time::Instant::now();
        board.set_fan_speed(FanSpeed::OFF, false).await.unwrap();

        assert!(start.elapsed() >= SETTLE_TIME);
    }
}
