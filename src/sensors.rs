use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

/// Temperature domains the fan reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Cpu,
    Gpu,
    Storage,
    Pmic,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::Cpu => "CPU",
            Domain::Gpu => "GPU",
            Domain::Storage => "storage",
            Domain::Pmic => "PMIC",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in degrees Celsius.
    async fn read_temperature(&self) -> Result<f32>;
    async fn sensor_name(&self) -> Option<String> {
        None
    }
}

/// One reading per domain; `None` means the sensor could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub cpu: Option<f32>,
    pub gpu: Option<f32>,
    pub storage: Option<f32>,
    pub pmic: Option<f32>,
}

/// Per-domain temperature readings for the fan loop.
///
/// Failures are reported as `None` and never as errors: an unreadable domain
/// simply contributes nothing to the fan speed.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn cpu_temp(&self) -> Option<f32>;
    async fn gpu_temp(&self) -> Option<f32>;
    /// Hottest of all attached storage devices.
    async fn max_storage_temp(&self) -> Option<f32>;
    async fn pmic_temp(&self) -> Option<f32>;

    async fn read_all(&self) -> Readings {
        let (cpu, gpu, storage, pmic) = futures::join!(
            self.cpu_temp(),
            self.gpu_temp(),
            self.max_storage_temp(),
            self.pmic_temp()
        );
        Readings {
            cpu,
            gpu,
            storage,
            pmic,
        }
    }
}
