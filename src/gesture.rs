//! Power button gesture classification.
//!
//! The board pulses the shutdown pin high for a duration that encodes what
//! the user did with the button. After a rising edge the monitor waits one
//! debounce period, then counts 10 ms ticks until the line drops:
//!
//! | ticks | gesture                          |
//! |-------|----------------------------------|
//! | 2..=3 | reboot (shutdown when remapped)  |
//! | 4..=5 | shutdown                         |
//! | other | ignored                          |

use std::{fmt, sync::Arc, time::Duration};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    actions::PowerActions,
    edge::{EdgeAcquirer, EdgeSource},
    event::{Event, EventBus},
    monitor_state::MonitorState,
};

pub const DEBOUNCE: Duration = Duration::from_millis(10);
pub const TICK: Duration = Duration::from_millis(10);
pub const IDLE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    None,
    Reboot,
    Shutdown,
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gesture::None => "none",
            Gesture::Reboot => "reboot",
            Gesture::Shutdown => "shutdown",
        })
    }
}

pub fn classify(ticks: u32, remap: bool) -> Gesture {
    match ticks {
        2..=3 if remap => Gesture::Shutdown,
        2..=3 => Gesture::Reboot,
        4..=5 => Gesture::Shutdown,
        _ => Gesture::None,
    }
}

pub struct PowerButtonMonitor {
    state: Arc<MonitorState>,
    acquirer: Arc<dyn EdgeAcquirer>,
    actions: Arc<dyn PowerActions>,
    event_bus: EventBus,
    cancel: CancellationToken,
}

impl PowerButtonMonitor {
    pub fn new(
        state: Arc<MonitorState>,
        acquirer: Arc<dyn EdgeAcquirer>,
        actions: Arc<dyn PowerActions>,
        event_bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            state,
            acquirer,
            actions,
            event_bus,
            cancel,
        }
    }

    /// Runs until cancelled. The line is acquired once the gate first opens.
    /// An unavailable line disables gesture detection without failing.
    pub async fn run(self) -> Result<()> {
        if !self.state.wait_enabled(&self.cancel).await {
            debug!("Power button monitor stopped before it was enabled");
            return Ok(());
        }

        let mut source = match self.acquirer.acquire(&self.state) {
            Ok(source) => source,
            Err(e) => {
                warn!("Power button monitoring unavailable: {e:#}");
                return Ok(());
            }
        };

        info!("Power button monitor started ({})", source.backend());
        self.watch(source.as_mut()).await;
        // Releasing joins the watcher thread.
        if tokio::task::spawn_blocking(move || source.release())
            .await
            .is_err()
        {
            warn!("Power button line release panicked");
        }
        info!("Power button monitor stopped");
        Ok(())
    }

    async fn watch(&self, source: &mut dyn EdgeSource) {
        loop {
            if !self.state.is_enabled() {
                debug!("Power button monitoring paused");
                if !self.state.wait_enabled(&self.cancel).await {
                    return;
                }
                // Presses made while paused are not acted on.
                source.take_rising_edge();
                debug!("Power button monitoring resumed");
            }

            if !self.sleep(IDLE_POLL).await {
                return;
            }
            if !source.take_rising_edge() {
                continue;
            }

            match self.measure_pulse(source).await {
                Some(ticks) => {
                    let gesture = classify(ticks, self.state.remap());
                    debug!("Button pulse of {ticks} ticks: {gesture}");
                    if gesture != Gesture::None {
                        self.perform(gesture).await;
                    }
                }
                None if self.cancel.is_cancelled() => return,
                None => debug!("Button measurement abandoned"),
            }
        }
    }

    /// Tick count of the current pulse, or `None` when the measurement was
    /// abandoned.
    async fn measure_pulse(&self, source: &mut dyn EdgeSource) -> Option<u32> {
        if !self.sleep(DEBOUNCE).await {
            return None;
        }

        let mut ticks = 1;
        loop {
            if !self.state.is_enabled() {
                return None;
            }
            match source.is_asserted() {
                Ok(true) => {}
                Ok(false) => return Some(ticks),
                Err(e) => {
                    warn!("Failed to sample power button: {e:#}");
                    return None;
                }
            }
            if !self.sleep(TICK).await {
                return None;
            }
            ticks += 1;
        }
    }

    async fn perform(&self, gesture: Gesture) {
        info!("Power button {gesture} requested");
        if let Err(e) = self.event_bus.publish(Event::GestureDetected(gesture)) {
            debug!("No listeners for gesture: {e}");
        }

        let result = match gesture {
            Gesture::Reboot => self.actions.reboot().await,
            Gesture::Shutdown => self.actions.shutdown().await,
            Gesture::None => return,
        };
        if let Err(e) = result {
            error!("Power button {gesture} failed: {e:#}");
        }
    }

    /// Returns false when cancelled first.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
