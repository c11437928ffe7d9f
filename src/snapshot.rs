//! Per-reload view of the configuration used by the monitors.
//!
//! Building a snapshot never fails on user data: a domain whose points are
//! incomplete or out of range is dropped with a warning and contributes
//! nothing to the fan speed.

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::{
    config::{Config, DomainCfg, TemperatureUnit},
    monitor_state::MonitorState,
    sensors::{Domain, Readings},
    threshold::{FanSpeed, ThresholdEntry, ThresholdTable},
};

/// CPU table used until the configuration provides a usable one.
pub const DEFAULT_CPU_TABLE: &str = "65=100,60=55,55=10";
/// Keeps the fan off at any normal operating temperature.
pub const FAN_DISABLED_TABLE: &str = "90=100";
/// Full speed from 1°C upward.
pub const ALWAYS_ON_TABLE: &str = "1=100";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainTables {
    pub cpu: ThresholdTable,
    pub gpu: ThresholdTable,
    pub storage: ThresholdTable,
    pub pmic: ThresholdTable,
}

impl DomainTables {
    pub fn evaluate(&self, readings: &Readings) -> CandidateSpeeds {
        CandidateSpeeds {
            cpu: self.cpu.evaluate_reading(readings.cpu),
            gpu: self.gpu.evaluate_reading(readings.gpu),
            storage: self.storage.evaluate_reading(readings.storage),
            pmic: self.pmic.evaluate_reading(readings.pmic),
        }
    }

    fn only_cpu(cpu: ThresholdTable) -> Self {
        Self {
            cpu,
            ..Self::default()
        }
    }
}

/// Speed requested by each domain for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandidateSpeeds {
    pub cpu: FanSpeed,
    pub gpu: FanSpeed,
    pub storage: FanSpeed,
    pub pmic: FanSpeed,
}

impl CandidateSpeeds {
    /// The hottest domain decides.
    pub fn arbitrate(&self) -> FanSpeed {
        self.cpu.max(self.gpu).max(self.storage).max(self.pmic)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub tables: DomainTables,
    pub power_button_enabled: bool,
    pub remap: bool,
    pub legacy_protocol: bool,
    pub fan_disabled: bool,
    pub always_on: bool,
}

impl ConfigSnapshot {
    /// Builds the tables and flags for one reload cycle.
    ///
    /// The only error is a malformed built-in table.
    pub fn build(config: &Config) -> Result<Self> {
        let fan = &config.fan;

        let tables = if fan.disabled {
            DomainTables::only_cpu(
                FAN_DISABLED_TABLE
                    .parse()
                    .context("Invalid fan-disabled table")?,
            )
        } else if fan.always_on {
            DomainTables::only_cpu(ALWAYS_ON_TABLE.parse().context("Invalid always-on table")?)
        } else {
            let unit = config.temperature_unit;
            DomainTables {
                cpu: domain_table(Domain::Cpu, &fan.cpu, unit),
                gpu: domain_table(Domain::Gpu, &fan.gpu, unit),
                storage: domain_table(Domain::Storage, &fan.storage, unit),
                pmic: domain_table(Domain::Pmic, &fan.pmic, unit),
            }
        };

        debug!(
            "Thresholds: cpu={} gpu={} storage={} pmic={}",
            tables.cpu, tables.gpu, tables.storage, tables.pmic
        );

        Ok(Self {
            tables,
            power_button_enabled: config.power_button.enabled,
            remap: config.power_button.remap,
            legacy_protocol: fan.legacy_protocol,
            fan_disabled: fan.disabled,
            always_on: fan.always_on,
        })
    }

    /// Pushes the power button flags into the shared monitor state.
    pub fn apply_power_button(&self, state: &MonitorState) {
        state.set_remap(self.remap);
        if state.set_enabled(self.power_button_enabled) {
            if self.power_button_enabled {
                info!("Power button monitoring has been enabled");
            } else {
                info!("Power button monitoring has been disabled");
            }
        }
    }
}

pub fn default_cpu_table() -> Result<ThresholdTable> {
    DEFAULT_CPU_TABLE
        .parse()
        .context("Invalid default CPU table")
}

fn to_celsius(temp: f32, unit: TemperatureUnit) -> f32 {
    match unit {
        TemperatureUnit::Celsius => temp,
        TemperatureUnit::Fahrenheit => (temp - 32.0) * 5.0 / 9.0,
    }
}

fn domain_table(domain: Domain, cfg: &DomainCfg, unit: TemperatureUnit) -> ThresholdTable {
    if !cfg.enabled {
        return ThresholdTable::default();
    }

    let entries: Option<Vec<ThresholdEntry>> = cfg
        .points
        .iter()
        .map(|point| {
            let temp = point.temp.filter(|t| t.is_finite())?;
            let speed = point.speed.filter(|s| (0..=100).contains(s))?;
            Some(ThresholdEntry::new(to_celsius(temp, unit), speed as u8))
        })
        .collect();

    match entries {
        Some(entries) => ThresholdTable::new(entries),
        None => {
            warn!("Ignoring {domain} thresholds: incomplete or out of range point");
            ThresholdTable::default()
        }
    }
}
