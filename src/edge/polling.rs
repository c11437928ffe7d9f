use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use super::{EdgeBackend, EdgeSource, LineLevel, cdev::Line};

/// Plain input line. Rising edges are inferred from successive samples, so a
/// press shorter than the idle poll can be missed.
pub struct PollingSource {
    line: Option<Box<dyn LineLevel>>,
    last_level: bool,
}

impl PollingSource {
    pub fn open(chip: &Path, pin: u32) -> Result<Self> {
        Ok(Self::new(Box::new(Line::input(chip, pin)?)))
    }

    pub(crate) fn new(line: Box<dyn LineLevel>) -> Self {
        let last_level = line.level().unwrap_or(false);
        Self {
            line: Some(line),
            last_level,
        }
    }
}

impl EdgeSource for PollingSource {
    fn backend(&self) -> EdgeBackend {
        EdgeBackend::Polling
    }

    fn take_rising_edge(&mut self) -> bool {
        let Some(line) = self.line.as_ref() else {
            return false;
        };
        match line.level() {
            Ok(level) => {
                let rising = level && !self.last_level;
                self.last_level = level;
                rising
            }
            Err(e) => {
                debug!("GPIO level read failed: {e}");
                false
            }
        }
    }

    fn is_asserted(&mut self) -> Result<bool> {
        let line = self.line.as_ref().context("Line released")?;
        let level = line.level().context("Failed to read GPIO level")?;
        self.last_level = level;
        Ok(level)
    }

    fn release(&mut self) {
        self.line = None;
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    #[derive(Default)]
    struct ScriptedLevel(Mutex<Vec<io::Result<bool>>>);

    impl ScriptedLevel {
        fn push(&self, level: io::Result<bool>) {
            self.0.lock().unwrap().insert(0, level);
        }
    }

    impl LineLevel for ScriptedLevel {
        fn level(&self) -> io::Result<bool> {
            self.0.lock().unwrap().pop().unwrap_or(Ok(false))
        }
    }

    #[test]
    fn detects_low_to_high_transition_once() {
        let line = Arc::new(ScriptedLevel::default());
        let mut source = PollingSource::new(Box::new(line.clone()));

        line.push(Ok(false));
        line.push(Ok(true));
        line.push(Ok(true));
        assert!(!source.take_rising_edge());
        assert!(source.take_rising_edge());
        assert!(!source.take_rising_edge());
    }

    #[test]
    fn line_high_at_open_is_not_an_edge() {
        let line = Arc::new(ScriptedLevel::default());
        line.push(Ok(true));
        let mut source = PollingSource::new(Box::new(line.clone()));

        line.push(Ok(true));
        assert!(!source.take_rising_edge());
    }

    #[test]
    fn read_errors_are_not_edges() {
        let line = Arc::new(ScriptedLevel::default());
        let mut source = PollingSource::new(Box::new(line.clone()));

        line.push(Err(io::Error::other("gone")));
        assert!(!source.take_rising_edge());
        line.push(Err(io::Error::other("gone")));
        assert!(source.is_asserted().is_err());
    }

    #[test]
    fn release_drops_line() {
        let line = Arc::new(ScriptedLevel::default());
        let mut source = PollingSource::new(Box::new(line.clone()));
        assert_eq!(Arc::strong_count(&line), 2);

        source.release();
        source.release();
        assert_eq!(Arc::strong_count(&line), 1);
        assert!(!source.take_rising_edge());
        assert!(source.is_asserted().is_err());
    }
}
