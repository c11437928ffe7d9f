//! Threshold tables for temperature-based fan speed selection.
//!
//! A table is a list of `temperature=speed` steps sorted by descending
//! temperature. Evaluation picks the first step whose threshold is reached,
//! so the hottest matching step wins.

use std::{fmt, str::FromStr};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Fan speed percentage as sent to the board.
///
/// Construction through [`FanSpeed::from_raw`] applies the board's clamping
/// rules: anything below 1 turns the fan off, 1..=9 is raised to the minimum
/// spinning speed and values above 100 are capped.
///
/// # Example
///
/// ```
/// use argond::threshold::FanSpeed;
///
/// assert_eq!(FanSpeed::from_raw(0).percent(), 0);
/// assert_eq!(FanSpeed::from_raw(5).percent(), 10);
/// assert_eq!(FanSpeed::from_raw(55).percent(), 55);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct FanSpeed(u8);

impl FanSpeed {
    pub const OFF: FanSpeed = FanSpeed(0);
    pub const MIN_SPINNING: FanSpeed = FanSpeed(10);
    pub const MAX: FanSpeed = FanSpeed(100);

    /// Clamps a raw percentage into a valid board command.
    pub fn from_raw(raw: i64) -> Self {
        if raw < 1 {
            Self::OFF
        } else if raw < i64::from(Self::MIN_SPINNING.0) {
            Self::MIN_SPINNING
        } else {
            Self(raw.min(i64::from(Self::MAX.0)) as u8)
        }
    }

    pub const fn percent(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FanSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// One `temperature=speed` step of a [`ThresholdTable`].
///
/// Temperatures are kept at one decimal place, the precision of the text
/// encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub temperature: f32,
    pub speed: u8,
}

impl ThresholdEntry {
    pub fn new(temperature: f32, speed: u8) -> Self {
        Self {
            temperature: (temperature * 10.0).round() / 10.0,
            speed,
        }
    }
}

impl fmt::Display for ThresholdEntry {
    /// Fixed width (`{:5.1}`) so that string order follows numeric order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:5.1}={}", self.temperature, self.speed)
    }
}

impl FromStr for ThresholdEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (temp, speed) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("Malformed threshold entry '{s}': missing '='"))?;
        let temperature: f32 = temp
            .trim()
            .parse()
            .with_context(|| format!("Malformed threshold temperature in '{s}'"))?;
        let speed: f64 = speed
            .trim()
            .parse()
            .with_context(|| format!("Malformed threshold speed in '{s}'"))?;
        if !temperature.is_finite() || !speed.is_finite() {
            anyhow::bail!("Threshold entry '{s}' is not finite");
        }
        if !(0.0..=100.0).contains(&speed) {
            anyhow::bail!("Threshold speed in '{s}' is outside 0..=100");
        }

        Ok(Self::new(temperature, speed as u8))
    }
}

/// Temperature to speed steps, sorted by descending temperature.
///
/// # Example
///
/// ```
/// use argond::threshold::ThresholdTable;
///
/// let table: ThresholdTable = "55=10,65=100,60=55".parse()?;
/// assert_eq!(table.evaluate(70.0).percent(), 100);
/// assert_eq!(table.evaluate(62.0).percent(), 55);
/// assert_eq!(table.evaluate(40.0).percent(), 0);
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    entries: Vec<ThresholdEntry>,
}

impl ThresholdTable {
    pub fn new(mut entries: Vec<ThresholdEntry>) -> Self {
        entries.sort_by(|a, b| b.temperature.total_cmp(&a.temperature));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    /// Speed of the first step whose threshold is at or below `temperature`,
    /// [`FanSpeed::OFF`] when none matches.
    pub fn evaluate(&self, temperature: f32) -> FanSpeed {
        self.entries
            .iter()
            .find(|entry| temperature >= entry.temperature)
            .map(|entry| FanSpeed::from_raw(i64::from(entry.speed)))
            .unwrap_or(FanSpeed::OFF)
    }

    /// Like [`evaluate`](Self::evaluate), an unreadable sensor contributes
    /// nothing.
    pub fn evaluate_reading(&self, reading: Option<f32>) -> FanSpeed {
        reading.map_or(FanSpeed::OFF, |t| self.evaluate(t))
    }
}

impl fmt::Display for ThresholdTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.to_string().trim_start().to_string())
            .collect();
        write!(f, "[{}]", encoded.join(", "))
    }
}

impl FromStr for ThresholdTable {
    type Err = anyhow::Error;

    /// Parses a comma separated list of `temperature=speed` steps.
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse::<ThresholdEntry>)
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }
}
