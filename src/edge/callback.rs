use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use gpiocdev::line::EdgeDetection;

use super::{
    EdgeBackend, EdgeSource, LineLevel,
    cdev::{EdgeKind, Line},
    watcher::{EdgeEvents, EdgeWatcher, STOP_GRACE},
};
use crate::monitor_state::MonitorState;

/// Rising-edge interrupt delivered to a callback. The level is read from the
/// line whenever the classifier asks.
pub struct CallbackSource {
    state: Arc<MonitorState>,
    level: Option<Box<dyn LineLevel>>,
    watcher: Option<EdgeWatcher>,
}

impl CallbackSource {
    pub fn open(chip: &Path, pin: u32, state: Arc<MonitorState>) -> Result<Self> {
        let line = Arc::new(Line::events(chip, pin, EdgeDetection::RisingEdge)?);
        Self::with_level(line.clone(), Box::new(line), state)
    }

    pub(crate) fn with_level(
        events: impl EdgeEvents,
        level: Box<dyn LineLevel>,
        state: Arc<MonitorState>,
    ) -> Result<Self> {
        let callback_state = state.clone();
        let watcher = EdgeWatcher::spawn(events, move |edge| {
            if edge == EdgeKind::Rising {
                callback_state.mark_triggered();
            }
        })?;

        Ok(Self {
            state,
            level: Some(level),
            watcher: Some(watcher),
        })
    }
}

impl EdgeSource for CallbackSource {
    fn backend(&self) -> EdgeBackend {
        EdgeBackend::Callback
    }

    fn take_rising_edge(&mut self) -> bool {
        self.state.take_trigger()
    }

    fn is_asserted(&mut self) -> Result<bool> {
        let level = self.level.as_ref().context("Line released")?;
        level.level().context("Failed to read GPIO level")
    }

    fn release(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop(STOP_GRACE);
        }
        self.level = None;
    }
}

impl Drop for CallbackSource {
    fn drop(&mut self) {
        self.release();
    }
}
