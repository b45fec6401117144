//! Sidecar configuration (config.toml)

use anyhow::{bail, Context, Result};
use lanxi_stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
///
/// Every section is optional; a missing file section falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_device_id")]
    pub id: String,
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_host() -> String {
    "169.254.61.199".to_string()
}

fn default_device_id() -> String {
    "lanxi-01".to_string()
}

fn default_location() -> String {
    "lab-1".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            id: default_device_id(),
            location: default_location(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StreamSection {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_max_payload_bytes() -> usize {
    lanxi_stream::frame::DEFAULT_MAX_PAYLOAD_LEN
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub timeout_secs: u64,
}

fn default_liveness_interval() -> u64 {
    5
}

fn default_ping_timeout() -> u64 {
    1
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_liveness_interval(),
            timeout_secs: default_ping_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ControlConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AppConfig {
    /// Reject values the sidecar cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            bail!("device.host must not be empty");
        }
        if self.http.port == 0 {
            bail!("http.port must be non-zero");
        }
        if self.stream.flush_interval_ms == 0 {
            bail!("stream.flush_interval_ms must be non-zero");
        }
        if self.stream.max_payload_bytes == 0 {
            bail!("stream.max_payload_bytes must be non-zero");
        }
        if self.liveness.interval_secs == 0 {
            bail!("liveness.interval_secs must be non-zero");
        }
        if self.liveness.timeout_secs == 0 {
            bail!("liveness.timeout_secs must be non-zero");
        }
        if self.control.request_timeout_secs == 0 {
            bail!("control.request_timeout_secs must be non-zero");
        }
        Ok(())
    }

    /// Settings handed to the stream session
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new()
            .with_device(self.device.id.clone(), self.device.location.clone())
            .with_flush_interval(Duration::from_millis(self.stream.flush_interval_ms))
            .with_max_payload_len(self.stream.max_payload_bytes)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.control.request_timeout_secs)
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let toml_content = r#"
            [device]
            host = "10.0.0.5"
            id = "lanxi-07"

            [stream]
            flush_interval_ms = 250
        "#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.device.host, "10.0.0.5");
        assert_eq!(config.device.id, "lanxi-07");
        assert_eq!(config.device.location, "lab-1");
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.stream.flush_interval_ms, 250);
        assert_eq!(config.liveness.interval_secs, 5);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.http.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.stream.flush_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.liveness.interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stream_config() {
        let mut config = AppConfig::default();
        config.device.id = "lanxi-02".into();
        config.stream.flush_interval_ms = 500;

        let stream = config.stream_config();
        assert_eq!(stream.device_id, "lanxi-02");
        assert_eq!(stream.location, "lab-1");
        assert_eq!(stream.flush_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 9100\n[liveness]\ntimeout_secs = 2").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.http.port, 9100);
        assert_eq!(config.liveness.timeout_secs, 2);
    }

    #[test]
    fn test_load_config_errors() {
        assert!(load_config(Path::new("/nonexistent/config.toml")).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 0").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("http.port"));
    }
}
