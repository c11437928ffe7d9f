use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;

use crate::sensors::TemperatureSensor;

/// Longest a single `vcgencmd` run may take before it is killed.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Temperature reported by the firmware through `vcgencmd measure_temp`.
///
/// Without an argument the tool reports the SoC (GPU) temperature, `pmic`
/// selects the power management IC.
#[derive(Debug, Clone)]
pub struct VcgencmdSensor {
    program: PathBuf,
    target: Option<&'static str>,
    timeout: Duration,
}

impl VcgencmdSensor {
    pub fn gpu(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            target: None,
            timeout: READ_TIMEOUT,
        }
    }

    pub fn pmic(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            target: Some("pmic"),
            timeout: READ_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parses output like `temp=45.6'C`.
pub(crate) fn parse_measure_temp(output: &str) -> Result<f32> {
    let value = output
        .trim()
        .strip_prefix("temp=")
        .ok_or_else(|| anyhow!("Unexpected vcgencmd output '{}'", output.trim()))?;
    let value = value.trim_end_matches("'C");
    value
        .parse()
        .with_context(|| format!("Malformed vcgencmd temperature '{value}'"))
}

#[async_trait]
impl TemperatureSensor for VcgencmdSensor {
    async fn read_temperature(&self) -> Result<f32> {
        let mut command = Command::new(&self.program);
        command.arg("measure_temp").kill_on_drop(true);
        if let Some(target) = self.target {
            command.arg(target);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .with_context(|| {
                format!(
                    "{} timed out after {:?}",
                    self.program.display(),
                    self.timeout
                )
            })?
            .with_context(|| format!("Failed to run {}", self.program.display()))?;
        if !output.status.success() {
            anyhow::bail!("{} exited with {}", self.program.display(), output.status);
        }

        parse_measure_temp(&String::from_utf8_lossy(&output.stdout))
    }

    async fn sensor_name(&self) -> Option<String> {
        Some(format!("vcgencmd:{}", self.target.unwrap_or("soc")))
    }
}
