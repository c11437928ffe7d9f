use std::{path::Path, sync::Arc};

use anyhow::Result;
use gpiocdev::line::EdgeDetection;

use super::{
    EdgeBackend, EdgeSource,
    cdev::{EdgeKind, Line},
    watcher::{EdgeEvents, EdgeWatcher, STOP_GRACE},
};
use crate::monitor_state::MonitorState;

/// Both-edge event stream. The watcher thread keeps the trigger and level
/// flags in [`MonitorState`] current.
#[derive(Debug)]
pub struct StreamSource {
    state: Arc<MonitorState>,
    watcher: Option<EdgeWatcher>,
}

impl StreamSource {
    pub fn open(chip: &Path, pin: u32, state: Arc<MonitorState>) -> Result<Self> {
        let line = Line::events(chip, pin, EdgeDetection::BothEdges)?;
        Self::from_events(line, state)
    }

    pub(crate) fn from_events(events: impl EdgeEvents, state: Arc<MonitorState>) -> Result<Self> {
        let watcher_state = state.clone();
        let watcher = EdgeWatcher::spawn(events, move |edge| match edge {
            EdgeKind::Rising => watcher_state.mark_rising_edge(),
            EdgeKind::Falling => watcher_state.mark_falling_edge(),
        })?;

        Ok(Self {
            state,
            watcher: Some(watcher),
        })
    }
}

impl EdgeSource for StreamSource {
    fn backend(&self) -> EdgeBackend {
        EdgeBackend::Stream
    }

    fn take_rising_edge(&mut self) -> bool {
        self.state.take_trigger()
    }

    fn is_asserted(&mut self) -> Result<bool> {
        if self.watcher.is_none() {
            anyhow::bail!("Line released");
        }
        Ok(self.state.line_level_high())
    }

    fn release(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop(STOP_GRACE);
        }
    }
}

impl Drop for StreamSource {
    fn drop(&mut self) {
        self.release();
    }
}
