//! Fakes shared by unit tests across the crate.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::{
    actions::PowerActions,
    app_context::AppState,
    board::DeviceChannel,
    config::{Config, ConfigManager},
    edge::{
        EdgeAcquirer, EdgeBackend, EdgeSource,
        cdev::EdgeKind,
        watcher::EdgeEvents,
    },
    monitor_state::MonitorState,
    sensors::{Readings, SensorSource},
    threshold::FanSpeed,
};

pub fn config_manager(config: Config) -> Arc<ConfigManager> {
    Arc::new(ConfigManager::new(
        config,
        std::path::PathBuf::from("/nonexistent/argond.yml"),
    ))
}

/// Application state over fakes: a recording board, CPU at 40°C, recorded
/// power actions and an idle button line.
pub fn app_state(config: Config) -> Arc<AppState> {
    app_state_at(config, std::path::PathBuf::from("/nonexistent/argond.yml"))
}

/// Like [`app_state`], with the configuration file at `path`.
pub fn app_state_at(config: Config, path: std::path::PathBuf) -> Arc<AppState> {
    Arc::new(AppState::with_components(
        Arc::new(ConfigManager::new(config, path)),
        Some(RecordingChannel::new()),
        FakeSensors::with_cpu(40.0),
        RecordingActions::new(),
        FakeAcquirer::new(FakeLine::new()),
    ))
}

/// Sensor source whose readings the test sets directly.
#[derive(Default)]
pub struct FakeSensors(Mutex<Readings>);

impl FakeSensors {
    pub fn with_cpu(cpu: f32) -> Arc<Self> {
        let sensors = Arc::new(Self::default());
        sensors.set(Readings {
            cpu: Some(cpu),
            ..Readings::default()
        });
        sensors
    }

    pub fn set(&self, readings: Readings) {
        *self.0.lock().unwrap() = readings;
    }

    pub fn set_cpu(&self, cpu: f32) {
        self.0.lock().unwrap().cpu = Some(cpu);
    }
}

#[async_trait]
impl SensorSource for FakeSensors {
    async fn cpu_temp(&self) -> Option<f32> {
        self.0.lock().unwrap().cpu
    }

    async fn gpu_temp(&self) -> Option<f32> {
        self.0.lock().unwrap().gpu
    }

    async fn max_storage_temp(&self) -> Option<f32> {
        self.0.lock().unwrap().storage
    }

    async fn pmic_temp(&self) -> Option<f32> {
        self.0.lock().unwrap().pmic
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Write {
    pub speed: u8,
    pub extended: bool,
    pub at: Instant,
}

/// Device channel recording every successful write with its time.
#[derive(Default)]
pub struct RecordingChannel {
    writes: Mutex<Vec<Write>>,
    attempts: AtomicUsize,
    failures: Mutex<VecDeque<bool>>,
    probes: AtomicUsize,
    extended: bool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_extended_support() -> Arc<Self> {
        Arc::new(Self {
            extended: true,
            ..Self::default()
        })
    }

    /// The next `count` writes fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(true, count));
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn speeds(&self) -> Vec<u8> {
        self.writes().iter().map(|w| w.speed).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceChannel for RecordingChannel {
    async fn probe_extended_support(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.extended
    }

    async fn set_fan_speed(&self, speed: FanSpeed, extended: bool) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.lock().unwrap().pop_front().unwrap_or(false) {
            anyhow::bail!("Remote I/O error");
        }
        self.writes.lock().unwrap().push(Write {
            speed: speed.percent(),
            extended,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCall {
    Reboot,
    Shutdown,
}

/// Power actions that only remember what was asked.
#[derive(Default)]
pub struct RecordingActions(Mutex<Vec<PowerCall>>);

impl RecordingActions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<PowerCall> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl PowerActions for RecordingActions {
    async fn reboot(&self) -> Result<()> {
        self.0.lock().unwrap().push(PowerCall::Reboot);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.0.lock().unwrap().push(PowerCall::Shutdown);
        Ok(())
    }
}

/// Button line held high for a scripted duration on the tokio clock.
#[derive(Default)]
pub struct FakeLine {
    pressed_until: Mutex<Option<Instant>>,
    pending_edge: AtomicBool,
    releases: AtomicUsize,
}

impl FakeLine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn press(&self, duration: Duration) {
        *self.pressed_until.lock().unwrap() = Some(Instant::now() + duration);
        self.pending_edge.store(true, Ordering::SeqCst);
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

pub struct FakeEdgeSource {
    line: Option<Arc<FakeLine>>,
}

impl EdgeSource for FakeEdgeSource {
    fn backend(&self) -> EdgeBackend {
        EdgeBackend::Polling
    }

    fn take_rising_edge(&mut self) -> bool {
        self.line
            .as_ref()
            .is_some_and(|line| line.pending_edge.swap(false, Ordering::SeqCst))
    }

    fn is_asserted(&mut self) -> Result<bool> {
        let Some(line) = self.line.as_ref() else {
            anyhow::bail!("Line released");
        };
        Ok(line
            .pressed_until
            .lock()
            .unwrap()
            .is_some_and(|until| Instant::now() < until))
    }

    fn release(&mut self) {
        if let Some(line) = self.line.take() {
            line.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeEdgeSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out [`FakeEdgeSource`]s over one shared line, or fails like a busy
/// GPIO when built with [`FakeAcquirer::busy`].
pub struct FakeAcquirer {
    line: Arc<FakeLine>,
    busy: bool,
    acquisitions: AtomicUsize,
}

impl FakeAcquirer {
    pub fn new(line: Arc<FakeLine>) -> Arc<Self> {
        Arc::new(Self {
            line,
            busy: false,
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn busy() -> Arc<Self> {
        Arc::new(Self {
            line: FakeLine::new(),
            busy: true,
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl EdgeAcquirer for FakeAcquirer {
    fn acquire(&self, _state: &Arc<MonitorState>) -> Result<Box<dyn EdgeSource>> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.busy {
            anyhow::bail!("GPIO in use /dev/gpiochip0:4");
        }
        Ok(Box::new(FakeEdgeSource {
            line: Some(self.line.clone()),
        }))
    }
}

/// Test side of [`FakeEdges`].
pub struct EdgeFeed(mpsc::Sender<EdgeKind>);

impl EdgeFeed {
    pub fn send(&self, edge: EdgeKind) {
        self.0.send(edge).unwrap();
    }
}

/// Line edges fed by a test. Dropping the [`EdgeFeed`] fails the line like
/// a vanished chip.
pub struct FakeEdges {
    feed: Mutex<mpsc::Receiver<EdgeKind>>,
    pending: Mutex<VecDeque<EdgeKind>>,
}

impl FakeEdges {
    pub fn new() -> (EdgeFeed, Arc<Self>) {
        let (tx, rx) = mpsc::channel();
        let edges = Arc::new(Self {
            feed: Mutex::new(rx),
            pending: Mutex::new(VecDeque::new()),
        });
        (EdgeFeed(tx), edges)
    }
}

impl EdgeEvents for FakeEdges {
    fn wait_edge(&self, timeout: Duration) -> Result<bool> {
        if !self.pending.lock().unwrap().is_empty() {
            return Ok(true);
        }
        match self.feed.lock().unwrap().recv_timeout(timeout) {
            Ok(edge) => {
                self.pending.lock().unwrap().push_back(edge);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("GPIO line gone"),
        }
    }

    fn read_edge(&self) -> Result<EdgeKind> {
        self.pending
            .lock()
            .unwrap()
            .pop_front()
            .context("No pending edge")
    }
}
