//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Patient / unit identifier stamped on every published message
    #[serde(default = "default_device_owner")]
    pub owner: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { owner: default_device_owner() }
    }
}

fn default_device_owner() -> String {
    "Unknown".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Wrap the connection in TLS (rustls, platform native root certificates)
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for the first CONNACK before giving up
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_client_id() -> String {
    "sensorbox".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path(), pool_size: default_pool_size() }
    }
}

fn default_storage_path() -> String {
    "sensor_data.db".to_string()
}

fn default_pool_size() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_distance_publish_interval_secs")]
    pub distance_publish_interval_secs: u64,
    #[serde(default = "default_battery_publish_interval_secs")]
    pub battery_publish_interval_secs: u64,
    /// LDR count above which the box is considered lit (lighting dependent)
    #[serde(default = "default_light_threshold")]
    pub light_threshold: f64,
    /// Distance (cm) above which the box is considered empty
    #[serde(default = "default_empty_box_threshold_cm")]
    pub empty_box_threshold_cm: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            distance_publish_interval_secs: default_distance_publish_interval_secs(),
            battery_publish_interval_secs: default_battery_publish_interval_secs(),
            light_threshold: default_light_threshold(),
            empty_box_threshold_cm: default_empty_box_threshold_cm(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_distance_publish_interval_secs() -> u64 {
    10
}

fn default_battery_publish_interval_secs() -> u64 {
    1
}

fn default_light_threshold() -> f64 {
    1000.0
}

fn default_empty_box_threshold_cm() -> f64 {
    2.9
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatteryConfig {
    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,
    #[serde(default = "default_divider_ratio")]
    pub divider_ratio: f64,
    #[serde(default = "default_adc_reference_voltage")]
    pub adc_reference_voltage: f64,
    #[serde(default = "default_adc_max")]
    pub adc_max: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_voltage: default_min_voltage(),
            max_voltage: default_max_voltage(),
            divider_ratio: default_divider_ratio(),
            adc_reference_voltage: default_adc_reference_voltage(),
            adc_max: default_adc_max(),
        }
    }
}

fn default_min_voltage() -> f64 {
    3.0
}

fn default_max_voltage() -> f64 {
    4.2
}

fn default_divider_ratio() -> f64 {
    2.0
}

fn default_adc_reference_voltage() -> f64 {
    3.3
}

fn default_adc_max() -> f64 {
    4095.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TimeConfig {
    /// Offset applied to wall-clock timestamps (seconds east of UTC)
    #[serde(default)]
    pub utc_offset_secs: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_owner: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_tls: bool,
    mqtt_keep_alive_secs: u64,
    mqtt_connect_timeout_secs: u64,
    storage_path: String,
    storage_pool_size: usize,
    poll_interval_ms: u64,
    distance_publish_interval_secs: u64,
    battery_publish_interval_secs: u64,
    light_threshold: f64,
    empty_box_threshold_cm: f64,
    battery: BatteryConfig,
    utc_offset: FixedOffset,
    metrics_interval_secs: u64,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_owner: default_device_owner(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_tls: false,
            mqtt_keep_alive_secs: default_keep_alive_secs(),
            mqtt_connect_timeout_secs: default_connect_timeout_secs(),
            storage_path: default_storage_path(),
            storage_pool_size: default_pool_size(),
            poll_interval_ms: default_poll_interval_ms(),
            distance_publish_interval_secs: default_distance_publish_interval_secs(),
            battery_publish_interval_secs: default_battery_publish_interval_secs(),
            light_threshold: default_light_threshold(),
            empty_box_threshold_cm: default_empty_box_threshold_cm(),
            battery: BatteryConfig::default(),
            utc_offset: Utc.fix(),
            metrics_interval_secs: default_metrics_interval_secs(),
            broker_enabled: false,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let battery = toml_config.battery;
        anyhow::ensure!(
            battery.max_voltage > battery.min_voltage,
            "battery.max_voltage ({}) must exceed battery.min_voltage ({})",
            battery.max_voltage,
            battery.min_voltage
        );
        let utc_offset = FixedOffset::east_opt(toml_config.time.utc_offset_secs).with_context(|| {
            format!("time.utc_offset_secs {} out of range", toml_config.time.utc_offset_secs)
        })?;

        Ok(Self {
            device_owner: toml_config.device.owner,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_tls: toml_config.mqtt.tls,
            mqtt_keep_alive_secs: toml_config.mqtt.keep_alive_secs,
            mqtt_connect_timeout_secs: toml_config.mqtt.connect_timeout_secs,
            storage_path: toml_config.storage.path,
            storage_pool_size: toml_config.storage.pool_size.max(1),
            poll_interval_ms: toml_config.edge.poll_interval_ms,
            distance_publish_interval_secs: toml_config.edge.distance_publish_interval_secs,
            battery_publish_interval_secs: toml_config.edge.battery_publish_interval_secs,
            light_threshold: toml_config.edge.light_threshold,
            empty_box_threshold_cm: toml_config.edge.empty_box_threshold_cm,
            battery,
            utc_offset,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load a specific file, falling back to defaults when it is unusable
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn device_owner(&self) -> &str {
        &self.device_owner
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_tls(&self) -> bool {
        self.mqtt_tls
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt_connect_timeout_secs)
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn storage_pool_size(&self) -> usize {
        self.storage_pool_size
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn distance_publish_interval(&self) -> Duration {
        Duration::from_secs(self.distance_publish_interval_secs)
    }

    pub fn battery_publish_interval(&self) -> Duration {
        Duration::from_secs(self.battery_publish_interval_secs)
    }

    pub fn light_threshold(&self) -> f64 {
        self.light_threshold
    }

    pub fn empty_box_threshold_cm(&self) -> f64 {
        self.empty_box_threshold_cm
    }

    pub fn battery(&self) -> &BatteryConfig {
        &self.battery
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point storage at a temp file
    pub fn with_storage_path(mut self, path: &str) -> Self {
        self.storage_path = path.to_string();
        self
    }

    /// Builder method for tests to set the device owner
    pub fn with_device_owner(mut self, owner: &str) -> Self {
        self.device_owner = owner.to_string();
        self
    }

    /// Builder method for tests: enable the embedded broker on `bind_address:port`
    pub fn with_broker(mut self, bind_address: &str, port: u16) -> Self {
        self.broker_enabled = true;
        self.broker_bind_address = bind_address.to_string();
        self.broker_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert!(!config.mqtt_tls());
        assert_eq!(config.device_owner(), "Unknown");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.distance_publish_interval(), Duration::from_secs(10));
        assert_eq!(config.light_threshold(), 1000.0);
        assert_eq!(config.empty_box_threshold_cm(), 2.9);
        assert_eq!(config.battery().min_voltage, 3.0);
        assert_eq!(config.battery().max_voltage, 4.2);
        assert_eq!(config.utc_offset().local_minus_utc(), 0);
        assert!(!config.broker_enabled());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["telemetry-ingest".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "telemetry-ingest".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["telemetry-edge".to_string(), "--config=config/edge.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/edge.toml");
    }

    #[test]
    fn test_section_defaults() {
        let edge = EdgeConfig::default();
        assert_eq!(edge.battery_publish_interval_secs, 1);
        let storage = StorageConfig::default();
        assert_eq!(storage.path, "sensor_data.db");
        assert_eq!(storage.pool_size, 4);
    }
}
