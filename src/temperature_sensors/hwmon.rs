use std::{fs, path::Path};

use log::debug;

use super::thermal_zone::MillidegreeSensor;

/// Finds the first temperature input of every hwmon device whose `name`
/// matches one of `drivers`.
///
/// Storage can be hot plugged, so this is cheap enough to run on every read.
pub fn scan(root: &Path, drivers: &[String]) -> Vec<MillidegreeSensor> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut sensors: Vec<MillidegreeSensor> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter_map(|dir| {
            let name = fs::read_to_string(dir.join("name")).ok()?;
            let name = name.trim();
            if !drivers.iter().any(|d| d == name) {
                return None;
            }
            let input = dir.join("temp1_input");
            input
                .exists()
                .then(|| MillidegreeSensor::new(format!("hwmon:{name}"), input))
        })
        .collect();

    sensors.sort_by(|a, b| a.path().cmp(b.path()));
    sensors
}
