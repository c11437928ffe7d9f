//! Shutdown pin requests through the GPIO character device.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use gpiocdev::{
    Request,
    line::{self, Bias, EdgeDetection, Offset, Value},
};
use log::debug;

use super::{LineLevel, watcher::EdgeEvents};

const CONSUMER: &str = "argond";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl From<line::EdgeKind> for EdgeKind {
    fn from(kind: line::EdgeKind) -> Self {
        match kind {
            line::EdgeKind::Rising => EdgeKind::Rising,
            line::EdgeKind::Falling => EdgeKind::Falling,
        }
    }
}

/// Fails when another consumer already holds `offset`.
pub fn ensure_free(chip: &Path, offset: Offset) -> Result<()> {
    let chip_handle = gpiocdev::Chip::from_path(chip)
        .with_context(|| format!("Failed to open {}", chip.display()))?;
    let info = chip_handle
        .line_info(offset)
        .with_context(|| format!("Failed to query {}:{offset}", chip.display()))?;
    if info.used {
        anyhow::bail!(
            "GPIO in use {}:{offset} (held by '{}')",
            chip.display(),
            info.consumer
        );
    }
    Ok(())
}

/// One requested input line, pulled down where the kernel allows it.
pub struct Line {
    request: Request,
    offset: Offset,
}

impl Line {
    /// Input line reporting `edges`.
    pub fn events(chip: &Path, offset: Offset, edges: EdgeDetection) -> Result<Self> {
        Self::request(chip, offset, Some(edges))
    }

    /// Input line for level reads only.
    pub fn input(chip: &Path, offset: Offset) -> Result<Self> {
        Self::request(chip, offset, None)
    }

    fn request(chip: &Path, offset: Offset, edges: Option<EdgeDetection>) -> Result<Self> {
        match Self::request_with(chip, offset, edges, Some(Bias::PullDown)) {
            Ok(line) => Ok(line),
            Err(e) => {
                debug!(
                    "Pull-down refused on {}:{offset} ({e}), retrying without bias",
                    chip.display()
                );
                Self::request_with(chip, offset, edges, None).with_context(|| {
                    format!("Failed to request {}:{offset}", chip.display())
                })
            }
        }
    }

    fn request_with(
        chip: &Path,
        offset: Offset,
        edges: Option<EdgeDetection>,
        bias: Option<Bias>,
    ) -> gpiocdev::Result<Self> {
        let mut builder = Request::builder();
        builder
            .on_chip(PathBuf::from(chip))
            .with_consumer(CONSUMER)
            .with_line(offset)
            .as_input();
        if let Some(edges) = edges {
            builder.with_edge_detection(edges);
        }
        if let Some(bias) = bias {
            builder.with_bias(bias);
        }
        let request = builder.request()?;
        Ok(Self { request, offset })
    }
}

impl LineLevel for Line {
    fn level(&self) -> io::Result<bool> {
        self.request
            .value(self.offset)
            .map(|value| value == Value::Active)
            .map_err(io::Error::other)
    }
}

impl EdgeEvents for Line {
    fn wait_edge(&self, timeout: Duration) -> Result<bool> {
        self.request
            .wait_edge_event(timeout)
            .context("Failed to wait for GPIO event")
    }

    fn read_edge(&self) -> Result<EdgeKind> {
        let event = self
            .request
            .read_edge_event()
            .context("Failed to read GPIO event")?;
        Ok(event.kind.into())
    }
}
