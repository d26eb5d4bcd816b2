//! Configuration
//!
//! JSON configuration model. Missing fields take their defaults through
//! `#[serde(default)]`; sections this crate does not use (`monitoring`,
//! `slack`) are ignored. [`Config::validate`] reports every problem in one
//! pass; the core never validates on its own.

use crate::error::{ConfigError, ValidationErrors};
use crate::transport::serial;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Baud rates accepted for serial endpoints
pub const VALID_BAUD_RATES: [u32; 9] = [300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Recognised generator modes
pub const VALID_MODES: [&str; 2] = ["replay", "synthetic"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            instance_id: default_instance_id(),
        }
    }
}

/// One output endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// Endpoint identity: device path, `tcp://host:port` or `stdout`
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: String,
    pub format: String,
    /// `replay` or `synthetic`; parsed by the generator
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_file: Option<String>,
    #[serde(default, rename = "loop")]
    pub looping: bool,
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: f64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic: Option<SyntheticConfig>,
}

impl PortConfig {
    /// Minimal enabled endpoint with every optional field defaulted
    pub fn new(device: impl Into<String>, format: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            format: format.into(),
            mode: mode.into(),
            sample_file: None,
            looping: false,
            calls_per_minute: default_calls_per_minute(),
            enabled: true,
            description: None,
            synthetic: None,
        }
    }
}

/// Synthetic generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default)]
    pub system_id: String,
    #[serde(default = "default_psap_name")]
    pub psap_name: String,
    #[serde(default)]
    pub agent_count: u32,
    #[serde(default = "default_min_duration_sec")]
    pub min_duration_sec: u32,
    #[serde(default = "default_max_duration_sec")]
    pub max_duration_sec: u32,
    #[serde(default = "default_true")]
    pub include_agent_events: bool,
    /// Fixed seed for reproducible output; OS entropy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            system_id: String::new(),
            psap_name: default_psap_name(),
            agent_count: 0,
            min_duration_sec: default_min_duration_sec(),
            max_duration_sec: default_max_duration_sec(),
            include_agent_events: true,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,
    #[serde(default)]
    pub startup_delay_sec: u64,
    #[serde(default = "default_stats_interval_sec")]
    pub stats_interval_sec: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            jitter_percent: default_jitter_percent(),
            startup_delay_sec: 0,
            stats_interval_sec: default_stats_interval_sec(),
        }
    }
}

impl TimingConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_sec)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_sec)
    }
}

/// Rotation applies to file output only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the JSON log file; console output when empty
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_log_filename")]
    pub filename: String,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    #[serde(default)]
    pub compress: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            base_path: String::new(),
            filename: default_log_filename(),
            max_size_mb: default_max_size_mb(),
            max_backups: default_max_backups(),
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_reconnect_delay_sec")]
    pub reconnect_delay_sec: u64,
    #[serde(default = "default_max_reconnect_delay_sec")]
    pub max_reconnect_delay_sec: u64,
    #[serde(default)]
    pub exponential_backoff: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_sec: default_reconnect_delay_sec(),
            max_reconnect_delay_sec: default_max_reconnect_delay_sec(),
            exponential_backoff: false,
        }
    }
}

impl RecoveryConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_sec)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_sec)
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_app_name() -> String {
    "CDRGenerator".to_string()
}

fn default_instance_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "cdrgen".to_string())
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_calls_per_minute() -> f64 {
    1.0
}

fn default_psap_name() -> String {
    crate::format::context::DEFAULT_PSAP_NAME.to_string()
}

fn default_min_duration_sec() -> u32 {
    crate::format::context::DEFAULT_MIN_DURATION_SEC
}

fn default_max_duration_sec() -> u32 {
    crate::format::context::DEFAULT_MAX_DURATION_SEC
}

fn default_true() -> bool {
    true
}

fn default_jitter_percent() -> f64 {
    10.0
}

fn default_stats_interval_sec() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_filename() -> String {
    "cdrgenerator.log".to_string()
}

fn default_max_size_mb() -> u32 {
    50
}

fn default_max_backups() -> u32 {
    5
}

fn default_reconnect_delay_sec() -> u64 {
    5
}

fn default_max_reconnect_delay_sec() -> u64 {
    300
}

// ============================================================================
// Loading and validation
// ============================================================================

impl Config {
    /// Read and parse a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn enabled_ports(&self) -> impl Iterator<Item = &PortConfig> {
        self.ports.iter().filter(|p| p.enabled)
    }

    /// Check the whole configuration, collecting every problem found.
    /// `available_formats` holds the registered (lowercase) format names.
    pub fn validate(&self, available_formats: &[String]) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        if self.ports.is_empty() {
            errors.push("ports", "at least one port must be configured");
        }

        let mut devices_seen = HashSet::new();
        for (i, port) in self.ports.iter().enumerate() {
            validate_port(port, i, available_formats, &mut devices_seen, &mut errors);
        }

        if !(0.0..=100.0).contains(&self.timing.jitter_percent) {
            errors.push("timing.jitter_percent", "must be between 0 and 100");
        }

        if !self.logging.base_path.is_empty() && !Path::new(&self.logging.base_path).is_dir() {
            errors.push(
                "logging.base_path",
                format!("directory does not exist: {}", self.logging.base_path),
            );
        }

        if !self.logging.base_path.is_empty() && self.logging.max_size_mb < 1 {
            errors.push("logging.max_size_mb", "must be at least 1");
        }

        if self.recovery.reconnect_delay_sec < 1 {
            errors.push("recovery.reconnect_delay_sec", "must be at least 1 second");
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn validate_port(
    port: &PortConfig,
    index: usize,
    available_formats: &[String],
    devices_seen: &mut HashSet<String>,
    errors: &mut ValidationErrors,
) {
    let prefix = format!("ports[{}]", index);

    if port.device.is_empty() {
        errors.push(format!("{}.device", prefix), "device path is required");
    } else if !devices_seen.insert(port.device.clone()) {
        errors.push(
            format!("{}.device", prefix),
            format!("duplicate device: {}", port.device),
        );
    }

    if !VALID_BAUD_RATES.contains(&port.baud_rate) {
        errors.push(
            format!("{}.baud_rate", prefix),
            format!("invalid baud rate: {}", port.baud_rate),
        );
    }

    if let Err(message) = serial::data_bits(port.data_bits) {
        errors.push(format!("{}.data_bits", prefix), message);
    }
    if let Err(message) = serial::parity(&port.parity) {
        errors.push(format!("{}.parity", prefix), message);
    }
    if let Err(message) = serial::stop_bits(port.stop_bits) {
        errors.push(format!("{}.stop_bits", prefix), message);
    }

    if port.format.is_empty() {
        errors.push(format!("{}.format", prefix), "format is required");
    } else if !available_formats.contains(&port.format.to_lowercase()) {
        errors.push(
            format!("{}.format", prefix),
            format!(
                "unknown format: {} (available: {})",
                port.format,
                available_formats.join(", ")
            ),
        );
    }

    let mode = port.mode.to_lowercase();
    if !VALID_MODES.contains(&mode.as_str()) {
        errors.push(
            format!("{}.mode", prefix),
            format!("invalid mode: {} (must be 'replay' or 'synthetic')", port.mode),
        );
    }

    if mode == "replay" {
        match port.sample_file.as_deref() {
            None | Some("") => errors.push(
                format!("{}.sample_file", prefix),
                "sample_file is required for replay mode",
            ),
            Some(file) if !Path::new(file).exists() => errors.push(
                format!("{}.sample_file", prefix),
                format!("file does not exist: {}", file),
            ),
            Some(_) => {}
        }
    }

    if mode == "synthetic" {
        match &port.synthetic {
            None => errors.push(
                format!("{}.synthetic", prefix),
                "synthetic configuration is required for synthetic mode",
            ),
            Some(synth) => validate_synthetic(synth, &prefix, errors),
        }
    }

    if port.calls_per_minute <= 0.0 || !port.calls_per_minute.is_finite() {
        errors.push(format!("{}.calls_per_minute", prefix), "must be greater than 0");
    }
}

fn validate_synthetic(synth: &SyntheticConfig, prefix: &str, errors: &mut ValidationErrors) {
    if synth.system_id.is_empty() {
        errors.push(format!("{}.synthetic.system_id", prefix), "system_id is required");
    }
    if synth.agent_count < 1 {
        errors.push(format!("{}.synthetic.agent_count", prefix), "must be at least 1");
    }
    if synth.min_duration_sec < 1 {
        errors.push(
            format!("{}.synthetic.min_duration_sec", prefix),
            "must be at least 1 second",
        );
    }
    if synth.max_duration_sec < synth.min_duration_sec {
        errors.push(
            format!("{}.synthetic.max_duration_sec", prefix),
            "must be greater than or equal to min_duration_sec",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> Vec<String> {
        vec!["vesta".to_string(), "viper".to_string()]
    }

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn synthetic_port(device: &str) -> PortConfig {
        let mut port = PortConfig::new(device, "viper", "synthetic");
        port.synthetic = Some(SyntheticConfig {
            system_id: "PSAP-01".to_string(),
            agent_count: 5,
            ..SyntheticConfig::default()
        });
        port
    }

    #[test]
    fn test_defaults_applied_on_load() {
        let cfg = Config::from_json(
            r#"{
                "ports": [
                    { "device": "/dev/ttyUSB0", "format": "vesta", "mode": "replay",
                      "sample_file": "x.csv", "enabled": true }
                ],
                "monitoring": { "port": 8080 }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.app.name, "CDRGenerator");
        assert!(!cfg.app.instance_id.is_empty());

        let port = &cfg.ports[0];
        assert_eq!(port.baud_rate, 9600);
        assert_eq!(port.data_bits, 8);
        assert_eq!(port.stop_bits, 1);
        assert_eq!(port.parity, "none");
        assert_eq!(port.calls_per_minute, 1.0);
        assert!(!port.looping);

        assert_eq!(cfg.timing.jitter_percent, 10.0);
        assert_eq!(cfg.timing.stats_interval(), Duration::from_secs(60));
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.filename, "cdrgenerator.log");
        assert_eq!(cfg.recovery.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(cfg.recovery.max_reconnect_delay(), Duration::from_secs(300));
        assert!(!cfg.recovery.exponential_backoff);
    }

    #[test]
    fn test_loop_and_synthetic_fields() {
        let cfg = Config::from_json(
            r#"{
                "ports": [
                    { "device": "a", "format": "vesta", "mode": "replay", "loop": true },
                    { "device": "b", "format": "viper", "mode": "synthetic",
                      "synthetic": { "system_id": "S1", "agent_count": 3, "seed": 9 } }
                ]
            }"#,
        )
        .unwrap();

        assert!(cfg.ports[0].looping);
        let synth = cfg.ports[1].synthetic.as_ref().unwrap();
        assert_eq!(synth.psap_name, "Default PSAP");
        assert_eq!(synth.min_duration_sec, 30);
        assert_eq!(synth.max_duration_sec, 300);
        assert!(synth.include_agent_events);
        assert_eq!(synth.seed, Some(9));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_malformed_json() {
        let err = Config::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_valid_config_passes() {
        let mut replay = PortConfig::new("/dev/ttyUSB1", "Vesta", "replay");
        replay.sample_file = Some(fixture("vesta_sample.csv"));

        let cfg = Config {
            ports: vec![synthetic_port("/dev/ttyUSB0"), replay],
            ..Config::default()
        };
        assert!(cfg.validate(&formats()).is_ok());
    }

    #[test]
    fn test_empty_ports_rejected() {
        let errors = Config::default().validate(&formats()).unwrap_err();
        assert!(errors.has_field("ports"));
    }

    #[test]
    fn test_port_errors_are_collected() {
        let mut bad = PortConfig::new("/dev/ttyUSB0", "nope", "stream");
        bad.baud_rate = 1234;
        bad.calls_per_minute = 0.0;

        let cfg = Config {
            ports: vec![synthetic_port("/dev/ttyUSB0"), bad],
            ..Config::default()
        };
        let errors = cfg.validate(&formats()).unwrap_err();

        assert!(errors.has_field("ports[1].device"));
        assert!(errors.has_field("ports[1].baud_rate"));
        assert!(errors.has_field("ports[1].format"));
        assert!(errors.has_field("ports[1].mode"));
        assert!(errors.has_field("ports[1].calls_per_minute"));
        assert!(!errors.has_field("ports[0].device"));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_line_settings_validated() {
        let mut port = synthetic_port("/dev/ttyUSB0");
        port.data_bits = 9;
        port.parity = "mark".to_string();
        port.stop_bits = 0;

        let cfg = Config {
            ports: vec![port],
            ..Config::default()
        };
        let errors = cfg.validate(&formats()).unwrap_err();
        assert!(errors.has_field("ports[0].data_bits"));
        assert!(errors.has_field("ports[0].parity"));
        assert!(errors.has_field("ports[0].stop_bits"));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_mode_specific_requirements() {
        let mut replay = PortConfig::new("a", "vesta", "replay");
        replay.sample_file = Some("/no/such/sample.csv".to_string());
        let missing_synth = PortConfig::new("b", "viper", "synthetic");
        let mut bad_synth = synthetic_port("c");
        if let Some(s) = bad_synth.synthetic.as_mut() {
            s.system_id.clear();
            s.agent_count = 0;
            s.min_duration_sec = 0;
        }
        let mut inverted = synthetic_port("d");
        if let Some(s) = inverted.synthetic.as_mut() {
            s.min_duration_sec = 60;
            s.max_duration_sec = 30;
        }

        let cfg = Config {
            ports: vec![replay, missing_synth, bad_synth, inverted],
            ..Config::default()
        };
        let errors = cfg.validate(&formats()).unwrap_err();

        assert!(errors.has_field("ports[0].sample_file"));
        assert!(errors.has_field("ports[1].synthetic"));
        assert!(errors.has_field("ports[2].synthetic.system_id"));
        assert!(errors.has_field("ports[2].synthetic.agent_count"));
        assert!(errors.has_field("ports[2].synthetic.min_duration_sec"));
        assert!(errors.has_field("ports[3].synthetic.max_duration_sec"));
    }

    #[test]
    fn test_global_sections_validated() {
        let mut cfg = Config {
            ports: vec![synthetic_port("a")],
            ..Config::default()
        };
        cfg.timing.jitter_percent = 150.0;
        cfg.logging.base_path = "/no/such/log/dir".to_string();
        cfg.logging.max_size_mb = 0;
        cfg.recovery.reconnect_delay_sec = 0;

        let errors = cfg.validate(&formats()).unwrap_err();
        assert!(errors.has_field("timing.jitter_percent"));
        assert!(errors.has_field("logging.max_size_mb"));
        assert!(errors.has_field("logging.base_path"));
        assert!(errors.has_field("recovery.reconnect_delay_sec"));

        let message = errors.to_string();
        assert!(message.contains("timing.jitter_percent: must be between 0 and 100; "));
    }
}
