use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::sensors::TemperatureSensor;

/// Reads a sysfs file holding a temperature in millidegrees Celsius.
///
/// Used for the CPU thermal zone and for hwmon `temp*_input` files, which
/// share the format.
#[derive(Debug, Clone)]
pub struct MillidegreeSensor {
    name: String,
    path: PathBuf,
}

impl MillidegreeSensor {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn parse_millidegrees(raw: &str) -> Result<f32> {
    let value: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Malformed temperature value '{}'", raw.trim()))?;
    Ok(value as f32 / 1000.0)
}

#[async_trait]
impl TemperatureSensor for MillidegreeSensor {
    async fn read_temperature(&self) -> Result<f32> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        parse_millidegrees(&raw)
    }

    async fn sensor_name(&self) -> Option<String> {
        Some(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_millidegrees() {
        assert_eq!(parse_millidegrees("48312\n").unwrap(), 48.312);
        assert_eq!(parse_millidegrees("-5000").unwrap(), -5.0);
        assert!(parse_millidegrees("hot").is_err());
    }

    #[tokio::test]
    async fn reads_sysfs_style_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "61500").unwrap();

        let sensor = MillidegreeSensor::new("cpu", file.path());
        assert_eq!(sensor.read_temperature().await.unwrap(), 61.5);
        assert_eq!(sensor.sensor_name().await.as_deref(), Some("cpu"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let sensor = MillidegreeSensor::new("cpu", "/nonexistent/thermal_zone0/temp");
        assert!(sensor.read_temperature().await.is_err());
    }
}
