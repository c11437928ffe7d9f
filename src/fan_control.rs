//! Temperature driven fan control loop.
//!
//! The outer loop rebuilds a [`ConfigSnapshot`] whenever settings change; the
//! inner loop samples sensors every poll interval, arbitrates the hottest
//! domain and writes the result to the board with a spin-down delay.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    board::DeviceChannel,
    config::{ConfigManager, TimingCfg},
    event::{Event, EventBus},
    sensors::SensorSource,
    snapshot::{self, ConfigSnapshot, DomainTables},
    threshold::{FanSpeed, ThresholdTable},
};

/// Sentinel stored in the reported speed before the first write.
pub const SPEED_UNKNOWN: u8 = u8::MAX;

/// What to do with a newly computed speed given the last applied one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedDecision {
    /// Same as the applied speed: no bus traffic this cycle.
    Unchanged,
    /// Lower than the applied speed: wait one more interval first.
    LowerAfterDelay,
    ApplyNow,
}

pub fn decide(previous: Option<FanSpeed>, next: FanSpeed) -> SpeedDecision {
    match previous {
        Some(prev) if prev == next => SpeedDecision::Unchanged,
        Some(prev) if next < prev => SpeedDecision::LowerAfterDelay,
        _ => SpeedDecision::ApplyNow,
    }
}

/// Why an interruptible wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Elapsed,
    SettingsChanged,
    Abort,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    poll: Duration,
    backoff: Duration,
}

impl From<&TimingCfg> for Timing {
    fn from(cfg: &TimingCfg) -> Self {
        Self {
            poll: Duration::from_secs(cfg.poll_interval_secs),
            backoff: Duration::from_secs(cfg.retry_backoff_secs),
        }
    }
}

pub struct FanControlLoop {
    config: Arc<ConfigManager>,
    channel: Arc<dyn DeviceChannel>,
    sensors: Arc<dyn SensorSource>,
    event_bus: EventBus,
    reported: Arc<AtomicU8>,
    cancel: CancellationToken,
    settings: watch::Receiver<u64>,
    previous: Option<FanSpeed>,
    cpu_fallback: ThresholdTable,
    reload_pending: bool,
}

impl FanControlLoop {
    pub fn new(
        config: Arc<ConfigManager>,
        channel: Arc<dyn DeviceChannel>,
        sensors: Arc<dyn SensorSource>,
        event_bus: EventBus,
        reported: Arc<AtomicU8>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let settings = config.subscribe();
        Ok(Self {
            config,
            channel,
            sensors,
            event_bus,
            reported,
            cancel,
            settings,
            previous: None,
            cpu_fallback: snapshot::default_cpu_table()?,
            reload_pending: false,
        })
    }

    /// Runs until cancelled. The fan is left at its last speed on exit.
    pub async fn run(mut self) -> Result<()> {
        info!("Fan control loop started");

        while !self.cancel.is_cancelled() {
            self.settings.borrow_and_update();
            self.reload_pending = false;

            let config = self.config.clone_config().await;
            let timing = Timing::from(&config.timing);

            let snapshot = match ConfigSnapshot::build(&config) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    error!("Configuration reload failed: {e:#}");
                    if self.pause(timing.poll).await == Wake::Abort {
                        break;
                    }
                    continue;
                }
            };

            let overridden = snapshot.fan_disabled || snapshot.always_on;
            let tables = self.with_cpu_fallback(snapshot.tables, overridden);

            let extended = if snapshot.legacy_protocol {
                debug!("Legacy command set only");
                false
            } else {
                let supported = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    supported = self.channel.probe_extended_support() => supported,
                };
                debug!("Command set with register support: {supported}");
                supported
            };

            if self.control(&tables, extended, timing).await == Wake::Abort {
                break;
            }
            debug!("Settings changed, reloading fan configuration");
        }

        info!("Fan control loop stopped");
        Ok(())
    }

    /// An empty CPU table falls back to the last usable one.
    fn with_cpu_fallback(&mut self, mut tables: DomainTables, overridden: bool) -> DomainTables {
        if tables.cpu.is_empty() {
            tables.cpu = self.cpu_fallback.clone();
        } else if !overridden {
            self.cpu_fallback = tables.cpu.clone();
        }
        tables
    }

    async fn control(&mut self, tables: &DomainTables, extended: bool, timing: Timing) -> Wake {
        loop {
            let readings = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Wake::Abort,
                readings = self.sensors.read_all() => readings,
            };
            let candidates = tables.evaluate(&readings);
            let speed = candidates.arbitrate();
            debug!("Temperatures {readings:?} -> speeds {candidates:?} -> {speed}");

            match decide(self.previous, speed) {
                SpeedDecision::Unchanged => match self.pause(timing.poll).await {
                    Wake::Elapsed => continue,
                    wake => return wake,
                },
                SpeedDecision::LowerAfterDelay => {
                    if self.pause(timing.poll).await == Wake::Abort {
                        return Wake::Abort;
                    }
                }
                SpeedDecision::ApplyNow => {}
            }

            let wake = match self.channel.set_fan_speed(speed, extended).await {
                Ok(()) => {
                    self.report(speed);
                    let wake = self.pause(timing.poll).await;
                    self.previous = Some(speed);
                    wake
                }
                Err(e) => {
                    warn!(
                        "Failed to set fan speed {speed}, retrying in {}s: {e:#}",
                        timing.backoff.as_secs()
                    );
                    self.pause(timing.backoff).await
                }
            };
            if wake != Wake::Elapsed {
                return wake;
            }
        }
    }

    fn report(&self, speed: FanSpeed) {
        let old = self.reported.swap(speed.percent(), Ordering::AcqRel);
        if old != speed.percent() {
            info!("Fan speed set to {speed}");
        }
        if let Err(e) = self
            .event_bus
            .publish(Event::FanSpeedChanged(speed.percent()))
        {
            debug!("No listeners for fan speed change: {e}");
        }
    }

    /// Sleeps for `duration` unless cancelled or settings change first. A
    /// settings change stays pending until the next reload, so every later
    /// wait in the same cycle returns at once.
    async fn pause(&mut self, duration: Duration) -> Wake {
        if self.cancel.is_cancelled() {
            return Wake::Abort;
        }
        if self.reload_pending {
            return Wake::SettingsChanged;
        }

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Wake::Abort,
            Ok(()) = self.settings.changed() => {
                self.reload_pending = true;
                Wake::SettingsChanged
            }
            () = tokio::time::sleep(duration) => Wake::Elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::MockDeviceChannel,
        config::Config,
        sensors::Readings,
        testing::{FakeSensors, RecordingChannel, config_manager},
    };
    use pretty_assertions::assert_eq;
    use tokio::{task::JoinHandle, time::Instant};

    const SECOND: Duration = Duration::from_secs(1);

    struct Harness {
        config: Arc<ConfigManager>,
        reported: Arc<AtomicU8>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<()>>,
        start: Instant,
    }

    impl Harness {
        fn start(
            config: Config,
            channel: Arc<dyn DeviceChannel>,
            sensors: Arc<dyn SensorSource>,
        ) -> Self {
            let config = config_manager(config);
            let reported = Arc::new(AtomicU8::new(SPEED_UNKNOWN));
            let cancel = CancellationToken::new();
            let fan_loop = FanControlLoop::new(
                config.clone(),
                channel,
                sensors,
                EventBus::new(),
                reported.clone(),
                cancel.clone(),
            )
            .unwrap();
            let start = Instant::now();
            let handle = tokio::spawn(fan_loop.run());
            Self {
                config,
                reported,
                cancel,
                handle,
                start,
            }
        }

        async fn stop(self) {
            self.cancel.cancel();
            tokio::time::timeout(Duration::from_millis(10), self.handle)
                .await
                .expect("loop did not stop within one tick")
                .unwrap()
                .unwrap();
        }

        fn offsets(&self, channel: &RecordingChannel) -> Vec<(u8, u64)> {
            channel
                .writes()
                .iter()
                .map(|w| (w.speed, (w.at - self.start).as_secs()))
                .collect()
        }
    }

    #[test]
    fn decide_follows_hysteresis_rules() {
        let s = FanSpeed::from_raw;
        assert_eq!(decide(None, s(0)), SpeedDecision::ApplyNow);
        assert_eq!(decide(Some(s(50)), s(50)), SpeedDecision::Unchanged);
        assert_eq!(decide(Some(s(50)), s(20)), SpeedDecision::LowerAfterDelay);
        assert_eq!(decide(Some(s(20)), s(80)), SpeedDecision::ApplyNow);
    }

    #[tokio::test(start_paused = true)]
    async fn hot_cpu_drives_full_speed() {
        let channel = RecordingChannel::new();
        let sensors = Arc::new(FakeSensors::default());
        sensors.set(Readings {
            cpu: Some(70.0),
            gpu: Some(50.0),
            storage: None,
            pmic: None,
        });
        let mut config = Config::default();
        config.fan.gpu.enabled = true;

        let harness = Harness::start(config, channel.clone(), sensors);
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.speeds(), vec![100]);
        assert_eq!(harness.reported.load(Ordering::SeqCst), 100);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn always_on_runs_full_speed_when_cold() {
        let channel = RecordingChannel::new();
        let mut config = Config::default();
        config.fan.always_on = true;

        let harness = Harness::start(config, channel.clone(), FakeSensors::with_cpu(20.0));
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.speeds(), vec![100]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fan_disabled_stays_off_at_normal_temperature() {
        let channel = RecordingChannel::new();
        let mut config = Config::default();
        config.fan.disabled = true;

        let harness = Harness::start(config, channel.clone(), FakeSensors::with_cpu(40.0));
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.speeds(), vec![0]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_speed_is_not_rewritten() {
        let channel = RecordingChannel::new();
        let harness = Harness::start(Config::default(), channel.clone(), FakeSensors::with_cpu(62.0));

        tokio::time::sleep(100 * SECOND).await;

        assert_eq!(harness.offsets(&channel), vec![(55, 0)]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn lowering_waits_one_extra_interval() {
        let channel = RecordingChannel::new();
        let sensors = FakeSensors::with_cpu(70.0);
        let harness = Harness::start(Config::default(), channel.clone(), sensors.clone());

        tokio::time::sleep(10 * SECOND).await;
        sensors.set_cpu(40.0);
        tokio::time::sleep(90 * SECOND).await;

        // Evaluated at 30s, applied after another 30s.
        assert_eq!(harness.offsets(&channel), vec![(100, 0), (0, 60)]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn raising_applies_on_next_cycle() {
        let channel = RecordingChannel::new();
        let sensors = FakeSensors::with_cpu(40.0);
        let harness = Harness::start(Config::default(), channel.clone(), sensors.clone());

        tokio::time::sleep(10 * SECOND).await;
        sensors.set_cpu(70.0);
        tokio::time::sleep(30 * SECOND).await;

        assert_eq!(harness.offsets(&channel), vec![(0, 0), (100, 30)]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_backs_off_and_retries() {
        let channel = RecordingChannel::new();
        channel.fail_next(1);
        let harness = Harness::start(Config::default(), channel.clone(), FakeSensors::with_cpu(70.0));

        tokio::time::sleep(30 * SECOND).await;
        assert_eq!(channel.attempts(), 1);
        assert!(channel.writes().is_empty());

        tokio::time::sleep(40 * SECOND).await;
        assert_eq!(channel.attempts(), 2);
        assert_eq!(harness.offsets(&channel), vec![(100, 60)]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_reloads_and_probes_again() {
        let channel = RecordingChannel::with_extended_support();
        let harness = Harness::start(Config::default(), channel.clone(), FakeSensors::with_cpu(20.0));

        tokio::time::sleep(5 * SECOND).await;
        assert_eq!(channel.probes(), 1);

        let mut config = Config::default();
        config.fan.always_on = true;
        harness.config.update_config(config).await.unwrap();
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.probes(), 2);
        // Reload happens mid-interval; the higher speed goes out at once.
        assert_eq!(harness.offsets(&channel), vec![(0, 0), (100, 5)]);
        assert!(channel.writes().iter().all(|w| w.extended));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_flag_skips_probe() {
        let mut mock = MockDeviceChannel::new();
        mock.expect_probe_extended_support().times(0);
        mock.expect_set_fan_speed()
            .withf(|speed, extended| speed.percent() == 100 && !*extended)
            .times(1)
            .returning(|_, _| Ok(()));
        let mut config = Config::default();
        config.fan.legacy_protocol = true;

        let harness = Harness::start(config, Arc::new(mock), FakeSensors::with_cpu(70.0));
        tokio::time::sleep(SECOND).await;
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probe_runs_once_per_reload() {
        let mut mock = MockDeviceChannel::new();
        mock.expect_probe_extended_support()
            .times(1)
            .returning(|| true);
        mock.expect_set_fan_speed()
            .withf(|_, extended| *extended)
            .returning(|_, _| Ok(()));

        let harness = Harness::start(Config::default(), Arc::new(mock), FakeSensors::with_cpu(62.0));
        tokio::time::sleep(300 * SECOND).await;
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_cpu_domain_uses_default_table() {
        let channel = RecordingChannel::new();
        let mut config = Config::default();
        config.fan.cpu.enabled = false;

        let harness = Harness::start(config, channel.clone(), FakeSensors::with_cpu(62.0));
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.speeds(), vec![55]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn override_tables_do_not_replace_cpu_fallback() {
        let channel = RecordingChannel::new();
        let sensors = FakeSensors::with_cpu(62.0);
        let mut config = Config::default();
        config.fan.disabled = true;
        let harness = Harness::start(config, channel.clone(), sensors);
        tokio::time::sleep(SECOND).await;

        let mut config = Config::default();
        config.fan.cpu.enabled = false;
        harness.config.update_config(config).await.unwrap();
        tokio::time::sleep(SECOND).await;

        assert_eq!(channel.speeds(), vec![0, 55]);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn abort_leaves_fan_running() {
        let channel = RecordingChannel::new();
        let harness = Harness::start(Config::default(), channel.clone(), FakeSensors::with_cpu(70.0));
        tokio::time::sleep(5 * SECOND).await;

        harness.stop().await;

        assert_eq!(channel.speeds(), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_during_spin_down_delay_skips_write() {
        let channel = RecordingChannel::new();
        let sensors = FakeSensors::with_cpu(70.0);
        let harness = Harness::start(Config::default(), channel.clone(), sensors.clone());

        tokio::time::sleep(SECOND).await;
        sensors.set_cpu(40.0);
        tokio::time::sleep(40 * SECOND).await;
        harness.stop().await;

        assert_eq!(channel.speeds(), vec![100]);
    }

    struct StuckSensors;

    #[async_trait::async_trait]
    impl SensorSource for StuckSensors {
        async fn cpu_temp(&self) -> Option<f32> {
            std::future::pending().await
        }
        async fn gpu_temp(&self) -> Option<f32> {
            std::future::pending().await
        }
        async fn max_storage_temp(&self) -> Option<f32> {
            std::future::pending().await
        }
        async fn pmic_temp(&self) -> Option<f32> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_a_hung_sensor_read() {
        let channel = RecordingChannel::new();
        let harness = Harness::start(Config::default(), channel.clone(), Arc::new(StuckSensors));

        tokio::time::sleep(5 * SECOND).await;
        harness.stop().await;

        assert!(channel.speeds().is_empty());
    }
}
