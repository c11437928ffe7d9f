//! Concrete temperature sources of the board host.

pub mod hwmon;
pub mod thermal_zone;
pub mod vcgencmd;

use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;

use crate::{
    config::SensorsCfg,
    sensors::{SensorSource, TemperatureSensor},
};
use thermal_zone::MillidegreeSensor;
use vcgencmd::VcgencmdSensor;

/// Sensor source backed by sysfs and the firmware tool.
pub struct BoardSensors {
    cpu: Box<dyn TemperatureSensor>,
    gpu: Box<dyn TemperatureSensor>,
    pmic: Box<dyn TemperatureSensor>,
    hwmon_root: PathBuf,
    storage_drivers: Vec<String>,
}

impl BoardSensors {
    pub fn discover(cfg: &SensorsCfg) -> Self {
        debug!(
            "Sensors: cpu={}, vcgencmd={}, hwmon={}",
            cfg.thermal_zone.display(),
            cfg.vcgencmd.display(),
            cfg.hwmon_root.display()
        );
        Self {
            cpu: Box::new(MillidegreeSensor::new("cpu", &cfg.thermal_zone)),
            gpu: Box::new(VcgencmdSensor::gpu(&cfg.vcgencmd)),
            pmic: Box::new(VcgencmdSensor::pmic(&cfg.vcgencmd)),
            hwmon_root: cfg.hwmon_root.clone(),
            storage_drivers: cfg.storage_drivers.clone(),
        }
    }
}

async fn read_soft(sensor: &dyn TemperatureSensor) -> Option<f32> {
    match sensor.read_temperature().await {
        Ok(t) => Some(t),
        Err(e) => {
            let name = sensor.sensor_name().await.unwrap_or_default();
            debug!("Sensor {name} unreadable: {e:#}");
            None
        }
    }
}

#[async_trait]
impl SensorSource for BoardSensors {
    async fn cpu_temp(&self) -> Option<f32> {
        read_soft(self.cpu.as_ref()).await
    }

    async fn gpu_temp(&self) -> Option<f32> {
        read_soft(self.gpu.as_ref()).await
    }

    async fn max_storage_temp(&self) -> Option<f32> {
        let mut hottest: Option<f32> = None;
        for sensor in hwmon::scan(&self.hwmon_root, &self.storage_drivers) {
            if let Some(t) = read_soft(&sensor).await {
                hottest = Some(hottest.map_or(t, |h| h.max(t)));
            }
        }
        hottest
    }

    async fn pmic_temp(&self) -> Option<f32> {
        read_soft(self.pmic.as_ref()).await
    }
}
