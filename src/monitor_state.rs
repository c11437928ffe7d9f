use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Flags shared between the edge watcher, the gesture classifier and the
/// configuration reload path.
///
/// The trigger and level flags are written from the edge acquisition side
/// (possibly a plain OS thread) and consumed by the classifier, so they are
/// atomics. The enable gate is a watch channel: only the current value
/// matters and waiters wake when it flips.
#[derive(Debug)]
pub struct MonitorState {
    triggered: AtomicBool,
    line_level_high: AtomicBool,
    remap: AtomicBool,
    enabled: watch::Sender<bool>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        let (enabled, _) = watch::channel(false);
        Self {
            triggered: AtomicBool::new(false),
            line_level_high: AtomicBool::new(false),
            remap: AtomicBool::new(false),
            enabled,
        }
    }

    pub fn mark_rising_edge(&self) {
        self.line_level_high.store(true, Ordering::Release);
        self.triggered.store(true, Ordering::Release);
    }

    pub fn mark_falling_edge(&self) {
        self.line_level_high.store(false, Ordering::Release);
    }

    /// Marks a press without touching the tracked level; used by sources that
    /// read the level from hardware.
    pub fn mark_triggered(&self) {
        self.triggered.store(true, Ordering::Release);
    }

    /// Returns whether a rising edge was seen since the last call, clearing it.
    pub fn take_trigger(&self) -> bool {
        self.triggered.swap(false, Ordering::AcqRel)
    }

    pub fn line_level_high(&self) -> bool {
        self.line_level_high.load(Ordering::Acquire)
    }

    pub fn set_remap(&self, remap: bool) {
        self.remap.store(remap, Ordering::Release);
    }

    pub fn remap(&self) -> bool {
        self.remap.load(Ordering::Acquire)
    }

    /// Opens or closes the enable gate. Returns true when the value changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.send_if_modified(|current| {
            if *current == enabled {
                false
            } else {
                *current = enabled;
                true
            }
        })
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    /// Waits until the gate is open. Returns false if `cancel` fired first.
    pub async fn wait_enabled(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let mut rx = self.enabled.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            res = rx.wait_for(|enabled| *enabled) => res.is_ok() && !cancel.is_cancelled(),
        }
    }

    /// Returns every flag to its startup value.
    pub fn reset(&self) {
        self.triggered.store(false, Ordering::Release);
        self.line_level_high.store(false, Ordering::Release);
        self.remap.store(false, Ordering::Release);
        self.set_enabled(false);
    }
}
