//! Power button line acquisition.
//!
//! The gesture classifier only asks two things of the hardware: whether a
//! rising edge happened since it last looked, and whether the line is high
//! right now. [`EdgeSource`] answers both, whatever the kernel offers:
//!
//! - [`StreamSource`]: both-edge event stream, level tracked from events.
//! - [`CallbackSource`]: rising-edge events only, level read on demand.
//! - [`PollingSource`]: plain input, edges derived from successive samples.
//!
//! [`GpioEdgeAcquirer`] picks the first backend the chip accepts.

pub mod callback;
pub mod cdev;
pub mod polling;
pub mod stream;
pub mod watcher;

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Result, anyhow};
use log::{debug, info};

use crate::{
    config::{BoardCfg, EdgeBackendCfg},
    monitor_state::MonitorState,
};

pub use callback::CallbackSource;
pub use polling::PollingSource;
pub use stream::StreamSource;

const PREFERRED_CHIP: &str = "gpiochip4";
const FALLBACK_CHIP: &str = "gpiochip0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeBackend {
    Stream,
    Callback,
    Polling,
}

impl fmt::Display for EdgeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeBackend::Stream => "stream",
            EdgeBackend::Callback => "callback",
            EdgeBackend::Polling => "polling",
        })
    }
}

impl EdgeBackend {
    fn candidates(cfg: EdgeBackendCfg) -> &'static [EdgeBackend] {
        match cfg {
            EdgeBackendCfg::Auto => &[
                EdgeBackend::Stream,
                EdgeBackend::Callback,
                EdgeBackend::Polling,
            ],
            EdgeBackendCfg::Stream => &[EdgeBackend::Stream],
            EdgeBackendCfg::Callback => &[EdgeBackend::Callback],
            EdgeBackendCfg::Polling => &[EdgeBackend::Polling],
        }
    }
}

/// An acquired power button line.
///
/// `release` gives the hardware back and may be called any number of times;
/// implementations also release on drop.
pub trait EdgeSource: Send {
    fn backend(&self) -> EdgeBackend;

    /// Whether a rising edge was seen since the previous call.
    fn take_rising_edge(&mut self) -> bool;

    fn is_asserted(&mut self) -> Result<bool>;

    fn release(&mut self);
}

pub trait EdgeAcquirer: Send + Sync {
    fn acquire(&self, state: &Arc<MonitorState>) -> Result<Box<dyn EdgeSource>>;
}

/// Current level of a line.
pub trait LineLevel: Send + Sync {
    fn level(&self) -> io::Result<bool>;
}

impl<T: LineLevel + ?Sized> LineLevel for Arc<T> {
    fn level(&self) -> io::Result<bool> {
        (**self).level()
    }
}

/// The configured chip, else `gpiochip4` when `dev_dir` has one, else
/// `gpiochip0`.
pub fn resolve_chip(configured: Option<&Path>, dev_dir: &Path) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    let preferred = dev_dir.join(PREFERRED_CHIP);
    if preferred.exists() {
        preferred
    } else {
        dev_dir.join(FALLBACK_CHIP)
    }
}

/// Acquires the shutdown pin through the GPIO character device.
#[derive(Debug, Clone)]
pub struct GpioEdgeAcquirer {
    board: BoardCfg,
    dev_dir: PathBuf,
}

impl GpioEdgeAcquirer {
    pub fn from_config(board: &BoardCfg) -> Self {
        Self {
            board: board.clone(),
            dev_dir: PathBuf::from("/dev"),
        }
    }

    fn open_backend(
        backend: EdgeBackend,
        chip: &Path,
        pin: u32,
        state: &Arc<MonitorState>,
    ) -> Result<Box<dyn EdgeSource>> {
        Ok(match backend {
            EdgeBackend::Stream => Box::new(StreamSource::open(chip, pin, state.clone())?),
            EdgeBackend::Callback => Box::new(CallbackSource::open(chip, pin, state.clone())?),
            EdgeBackend::Polling => Box::new(PollingSource::open(chip, pin)?),
        })
    }
}

impl EdgeAcquirer for GpioEdgeAcquirer {
    fn acquire(&self, state: &Arc<MonitorState>) -> Result<Box<dyn EdgeSource>> {
        let chip = resolve_chip(self.board.gpio_chip.as_deref(), &self.dev_dir);
        let pin = self.board.shutdown_pin;
        cdev::ensure_free(&chip, pin)?;

        let mut last_error = None;
        for &backend in EdgeBackend::candidates(self.board.edge_backend) {
            match Self::open_backend(backend, &chip, pin, state) {
                Ok(source) => {
                    info!(
                        "Watching power button on {}:{pin} ({backend})",
                        chip.display()
                    );
                    return Ok(source);
                }
                Err(e) => {
                    debug!("{backend} edge backend unavailable: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow!("no backend selected"));
        Err(error.context(format!(
            "No usable edge backend for {}:{pin}",
            chip.display()
        )))
    }
}
