//! Configuration management for the argond daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that holds fan threshold points, power button behavior, board wiring and
//! sensor locations.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{RwLock, watch};

use crate::event::ConfigChangeType;

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "ARGOND_CONFIG";

/// Main configuration structure for the argond daemon.
///
/// Every section has defaults, so a file containing only `version: 1` is a
/// complete configuration.
///
/// # Example
///
/// ```yaml
/// version: 1
/// temperature_unit: celsius
/// fan:
///   cpu:
///     points:
///       - { temp: 55, speed: 10 }
///       - { temp: 60, speed: 55 }
///       - { temp: 65, speed: 100 }
///   storage:
///     enabled: true
/// power_button:
///   enabled: true
///   remap: false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Unit the threshold temperatures are written in.
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    #[serde(default)]
    pub fan: FanCfg,

    #[serde(default)]
    pub power_button: PowerButtonCfg,

    #[serde(default)]
    pub timing: TimingCfg,

    #[serde(default)]
    pub actions: ActionsCfg,

    /// Bus and GPIO wiring. Changes need a restart.
    #[serde(default)]
    pub board: BoardCfg,

    /// Sensor locations. Changes need a restart.
    #[serde(default)]
    pub sensors: SensorsCfg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

/// Fan control settings.
///
/// `disabled` and `always_on` override every domain table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanCfg {
    /// Keep the fan off unless the CPU reaches 90°C.
    #[serde(default)]
    pub disabled: bool,

    /// Run the fan at full speed regardless of temperature.
    #[serde(default)]
    pub always_on: bool,

    /// Only use the legacy single byte command set. Early board firmware
    /// hangs on register access.
    #[serde(default)]
    pub legacy_protocol: bool,

    #[serde(default = "defaults::cpu_domain", deserialize_with = "lenient::cpu")]
    pub cpu: DomainCfg,

    #[serde(default = "defaults::gpu_domain", deserialize_with = "lenient::gpu")]
    pub gpu: DomainCfg,

    #[serde(default = "defaults::storage_domain", deserialize_with = "lenient::storage")]
    pub storage: DomainCfg,

    #[serde(default = "defaults::pmic_domain", deserialize_with = "lenient::pmic")]
    pub pmic: DomainCfg,
}

impl Default for FanCfg {
    fn default() -> Self {
        Self {
            disabled: false,
            always_on: false,
            legacy_protocol: false,
            cpu: defaults::cpu_domain(),
            gpu: defaults::gpu_domain(),
            storage: defaults::storage_domain(),
            pmic: defaults::pmic_domain(),
        }
    }
}

/// Threshold points of one temperature domain.
///
/// Read leniently: a written section is enabled unless it
/// says otherwise, omitted `points` fall back to the domain's built-in
/// points, and a value of the wrong type only breaks this domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainCfg {
    pub enabled: bool,
    pub points: Vec<PointCfg>,
}

/// A single `temp -> speed` point.
///
/// A missing or non-numeric field is `None`, which drops the domain when the
/// snapshot is built instead of failing the whole file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PointCfg {
    pub temp: Option<f32>,
    pub speed: Option<i32>,
}

impl PointCfg {
    pub fn new(temp: f32, speed: i32) -> Self {
        Self {
            temp: Some(temp),
            speed: Some(speed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerButtonCfg {
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Turn the short press into a shutdown instead of a reboot.
    #[serde(default)]
    pub remap: bool,
}

impl Default for PowerButtonCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            remap: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingCfg {
    /// Delay between fan evaluations.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Delay after a failed bus write.
    #[serde(default = "defaults::retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval_secs(),
            retry_backoff_secs: defaults::retry_backoff_secs(),
        }
    }
}

/// Commands run for power gestures, as argv vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionsCfg {
    #[serde(default = "defaults::reboot_command")]
    pub reboot: Vec<String>,

    #[serde(default = "defaults::shutdown_command")]
    pub shutdown: Vec<String>,
}

impl Default for ActionsCfg {
    fn default() -> Self {
        Self {
            reboot: defaults::reboot_command(),
            shutdown: defaults::shutdown_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardCfg {
    #[serde(default = "defaults::i2c_bus")]
    pub i2c_bus: PathBuf,

    #[serde(default = "defaults::i2c_address")]
    pub i2c_address: u16,

    /// GPIO chip device. Probed when unset.
    #[serde(default)]
    pub gpio_chip: Option<PathBuf>,

    /// Line offset of the power button signal.
    #[serde(default = "defaults::shutdown_pin")]
    pub shutdown_pin: u32,

    #[serde(default)]
    pub edge_backend: EdgeBackendCfg,
}

impl Default for BoardCfg {
    fn default() -> Self {
        Self {
            i2c_bus: defaults::i2c_bus(),
            i2c_address: defaults::i2c_address(),
            gpio_chip: None,
            shutdown_pin: defaults::shutdown_pin(),
            edge_backend: EdgeBackendCfg::default(),
        }
    }
}

/// Edge acquisition strategy. `auto` tries them in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeBackendCfg {
    #[default]
    Auto,
    Stream,
    Callback,
    Polling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorsCfg {
    /// Sysfs file with the CPU temperature in millidegrees.
    #[serde(default = "defaults::thermal_zone")]
    pub thermal_zone: PathBuf,

    #[serde(default = "defaults::hwmon_root")]
    pub hwmon_root: PathBuf,

    /// hwmon driver names treated as storage devices.
    #[serde(default = "defaults::storage_drivers")]
    pub storage_drivers: Vec<String>,

    /// Firmware tool used for GPU and PMIC readings.
    #[serde(default = "defaults::vcgencmd")]
    pub vcgencmd: PathBuf,
}

impl Default for SensorsCfg {
    fn default() -> Self {
        Self {
            thermal_zone: defaults::thermal_zone(),
            hwmon_root: defaults::hwmon_root(),
            storage_drivers: defaults::storage_drivers(),
            vcgencmd: defaults::vcgencmd(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            temperature_unit: TemperatureUnit::default(),
            fan: FanCfg::default(),
            power_button: PowerButtonCfg::default(),
            timing: TimingCfg::default(),
            actions: ActionsCfg::default(),
            board: BoardCfg::default(),
            sensors: SensorsCfg::default(),
        }
    }
}

impl Config {
    /// Validates the structural parts of the configuration.
    ///
    /// Threshold points are not checked here: a broken point only disables
    /// its domain when the snapshot is built.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use argond::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.timing.poll_interval_secs == 0 {
            anyhow::bail!("timing.poll_interval_secs must be greater than zero");
        }
        if self.timing.retry_backoff_secs == 0 {
            anyhow::bail!("timing.retry_backoff_secs must be greater than zero");
        }
        if self.actions.reboot.is_empty() {
            anyhow::bail!("actions.reboot must name a command");
        }
        if self.actions.shutdown.is_empty() {
            anyhow::bail!("actions.shutdown must name a command");
        }
        if self.board.i2c_address > 0x7f {
            anyhow::bail!(
                "board.i2c_address {:#x} is not a 7-bit address",
                self.board.i2c_address
            );
        }
        Ok(())
    }

    /// Sections whose changes cannot be applied without a restart.
    pub fn hardware_changes(&self, other: &Config) -> Vec<String> {
        let mut changed = Vec::new();
        if self.board != other.board {
            changed.push("board".to_string());
        }
        if self.sensors != other.sensors {
            changed.push("sensors".to_string());
        }
        changed
    }
}

/// Domain sections are parsed from raw YAML so that one mistyped value
/// never rejects the file.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_yaml::Value;

    use super::{DomainCfg, PointCfg, defaults};

    pub fn cpu<'de, D: Deserializer<'de>>(d: D) -> Result<DomainCfg, D::Error> {
        Ok(domain(Value::deserialize(d)?, defaults::cpu_domain()))
    }

    pub fn gpu<'de, D: Deserializer<'de>>(d: D) -> Result<DomainCfg, D::Error> {
        Ok(domain(Value::deserialize(d)?, defaults::gpu_domain()))
    }

    pub fn storage<'de, D: Deserializer<'de>>(d: D) -> Result<DomainCfg, D::Error> {
        Ok(domain(Value::deserialize(d)?, defaults::storage_domain()))
    }

    pub fn pmic<'de, D: Deserializer<'de>>(d: D) -> Result<DomainCfg, D::Error> {
        Ok(domain(Value::deserialize(d)?, defaults::pmic_domain()))
    }

    pub(super) fn domain(value: Value, default: DomainCfg) -> DomainCfg {
        match value {
            Value::Null => default,
            Value::Mapping(_) => {
                let enabled = match value.get("enabled") {
                    None | Some(Value::Null) => Some(true),
                    Some(v) => v.as_bool(),
                };
                let points = match value.get("points") {
                    None | Some(Value::Null) => default.points,
                    Some(Value::Sequence(items)) => items.iter().map(point).collect(),
                    Some(_) => vec![PointCfg::default()],
                };
                match enabled {
                    Some(enabled) => DomainCfg { enabled, points },
                    None => broken(),
                }
            }
            _ => broken(),
        }
    }

    /// Enabled with an unusable point, so the snapshot drops it with a warning.
    fn broken() -> DomainCfg {
        DomainCfg {
            enabled: true,
            points: vec![PointCfg::default()],
        }
    }

    fn point(item: &Value) -> PointCfg {
        PointCfg {
            temp: item.get("temp").and_then(number).map(|t| t as f32),
            speed: item.get("speed").and_then(number).map(|s| s.trunc() as i32),
        }
    }

    /// Numbers and numeric strings; speeds like `55.0` are accepted.
    fn number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|n: &f64| n.is_finite())
    }
}

mod defaults {
    use super::{DomainCfg, PointCfg};
    use std::path::PathBuf;

    pub fn enabled() -> bool {
        true
    }

    fn standard_points() -> Vec<PointCfg> {
        vec![
            PointCfg::new(55.0, 10),
            PointCfg::new(60.0, 55),
            PointCfg::new(65.0, 100),
        ]
    }

    pub fn cpu_domain() -> DomainCfg {
        DomainCfg {
            enabled: true,
            points: standard_points(),
        }
    }

    pub fn gpu_domain() -> DomainCfg {
        DomainCfg {
            enabled: false,
            points: standard_points(),
        }
    }

    pub fn storage_domain() -> DomainCfg {
        DomainCfg {
            enabled: false,
            points: vec![
                PointCfg::new(30.0, 30),
                PointCfg::new(40.0, 55),
                PointCfg::new(50.0, 100),
            ],
        }
    }

    pub fn pmic_domain() -> DomainCfg {
        DomainCfg {
            enabled: false,
            points: standard_points(),
        }
    }

    pub fn poll_interval_secs() -> u64 {
        30
    }

    pub fn retry_backoff_secs() -> u64 {
        60
    }

    pub fn reboot_command() -> Vec<String> {
        vec!["systemctl".to_string(), "reboot".to_string()]
    }

    pub fn shutdown_command() -> Vec<String> {
        vec!["systemctl".to_string(), "poweroff".to_string()]
    }

    pub fn i2c_bus() -> PathBuf {
        PathBuf::from("/dev/i2c-1")
    }

    pub fn i2c_address() -> u16 {
        0x1a
    }

    pub fn shutdown_pin() -> u32 {
        4
    }

    pub fn thermal_zone() -> PathBuf {
        PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
    }

    pub fn hwmon_root() -> PathBuf {
        PathBuf::from("/sys/class/hwmon")
    }

    pub fn storage_drivers() -> Vec<String> {
        vec!["drivetemp".to_string(), "nvme".to_string()]
    }

    pub fn vcgencmd() -> PathBuf {
        PathBuf::from("vcgencmd")
    }
}

fn locate_config() -> Result<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("argond/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir);
        }
    }

    let etc = Path::new("/etc/argond/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Configuration manager that handles both config data and file operations.
///
/// Every successful reload or update bumps a generation counter; long
/// running loops subscribe to it to learn that settings changed.
///
/// # Example
///
/// ```no_run
/// use argond::config::ConfigManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = ConfigManager::load(Some(PathBuf::from("config.yml"))).await?;
/// let mut changes = config_manager.subscribe();
///
/// config_manager.reload().await?;
/// assert!(changes.has_changed()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
    generation: Arc<watch::Sender<u64>>,
}

impl ConfigManager {
    pub fn new(config: Config, path: PathBuf) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
            generation: Arc::new(generation),
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. `ARGOND_CONFIG` environment variable
    /// 3. `$XDG_CONFIG_HOME/argond/config.yml` or `~/.config/argond/config.yml`
    /// 4. `/etc/argond/config.yml`
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receiver that is marked changed after each reload or update.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Reloads configuration from the same file.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading config from: {}", self.path.display());
        let new_config = Self::load_config_from_path(&self.path).await?;

        *self.config.write().await = new_config;
        self.bump_generation();
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Saves the current configuration to file.
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        self.save_to_path(&config, &self.path).await
    }

    /// Saves configuration to a specific path through a temporary file.
    pub async fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        let config_yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration")?;

        let tmp_path = path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml).with_context(|| {
            format!("Failed to write temporary config to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move config to {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    pub async fn validate(&self) -> Result<()> {
        let config = self.config.read().await;
        config.validate()
    }

    /// Clones the current configuration.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Replaces the configuration after validating it.
    pub async fn update_config(&self, new_config: Config) -> Result<()> {
        new_config
            .validate()
            .context("New configuration is invalid")?;
        *self.config.write().await = new_config;
        self.bump_generation();
        info!("Configuration updated in memory");
        Ok(())
    }

    /// Reads the file again and classifies how it differs from the
    /// configuration in memory. The in-memory configuration is untouched.
    pub async fn analyze_config_changes(&self) -> Result<ConfigChangeType> {
        let on_disk = Self::load_config_from_path(&self.path).await?;
        let current = self.config.read().await;

        let changed_sections = current.hardware_changes(&on_disk);
        if changed_sections.is_empty() {
            Ok(ConfigChangeType::HotReload)
        } else {
            Ok(ConfigChangeType::ColdRestart { changed_sections })
        }
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
