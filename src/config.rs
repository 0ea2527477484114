//! Connection and signal configuration
//!
//! Both structures are plain values handed in by the surrounding application.
//! They deserialize from the `config.yml` layout used by the desktop front end:
//!
//! ```yaml
//! modbus:
//!   host: 127.0.0.1
//!   port: 5020
//!   timeout: 3
//!   retries: 3
//! signal:
//!   sample_rate: 1000
//!   duration: 1.0
//!   trigger_threshold: 0.3
//!   noise_threshold: 0.1
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProbeError, ProbeResult};

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 3.0;

/// Default number of attempts per register operation
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Endpoint description for a Modbus/TCP device or simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Per-attempt timeout in seconds
    #[serde(rename = "timeout", default = "default_timeout_secs")]
    pub timeout_seconds: f64,
    /// Attempts per operation; 0 means every operation fails without touching the network
    #[serde(rename = "retries", default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ConnectionConfig {
    /// Create a configuration with the default timeout and retry budget
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = timeout.as_secs_f64();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Per-attempt timeout as a `Duration`
    ///
    /// Falls back to [`DEFAULT_TIMEOUT_SECS`] when the configured value is not
    /// representable; `validate()` rejects such values up front.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64))
    }

    pub fn validate(&self) -> ProbeResult<()> {
        if self.host.trim().is_empty() {
            return Err(ProbeError::invalid_config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ProbeError::invalid_config("port must be within 1..=65535"));
        }
        if !self.timeout_seconds.is_finite() || self.timeout_seconds <= 0.0 {
            return Err(ProbeError::invalid_config(format!(
                "timeout must be a positive number of seconds, got {}",
                self.timeout_seconds
            )));
        }
        if Duration::try_from_secs_f64(self.timeout_seconds).is_err() {
            return Err(ProbeError::invalid_config(format!(
                "timeout of {} seconds is out of range",
                self.timeout_seconds
            )));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 5020)
    }
}

/// Parameters of the synthetic EM trace and of its analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(rename = "sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(rename = "duration")]
    pub duration_seconds: f64,
    pub trigger_threshold: f64,
    pub noise_threshold: f64,
}

impl SignalConfig {
    pub fn new(
        sample_rate_hz: u32,
        duration_seconds: f64,
        trigger_threshold: f64,
        noise_threshold: f64,
    ) -> Self {
        Self {
            sample_rate_hz,
            duration_seconds,
            trigger_threshold,
            noise_threshold,
        }
    }

    /// Number of samples in a generated trace: `floor(duration * rate)`
    pub fn sample_count(&self) -> usize {
        (self.duration_seconds * f64::from(self.sample_rate_hz)).floor() as usize
    }

    /// Check the generation invariants
    ///
    /// A zero noise threshold is a valid generation setting (the crash trace
    /// is then exactly half the normal trace); it is rejected later, when an
    /// SNR is computed.
    pub fn validate(&self) -> ProbeResult<()> {
        if self.sample_rate_hz == 0 {
            return Err(ProbeError::invalid_config("sample_rate must be greater than zero"));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(ProbeError::invalid_config(format!(
                "duration must be a positive number of seconds, got {}",
                self.duration_seconds
            )));
        }
        if !self.trigger_threshold.is_finite() {
            return Err(ProbeError::invalid_config("trigger_threshold must be finite"));
        }
        if !self.noise_threshold.is_finite() || self.noise_threshold < 0.0 {
            return Err(ProbeError::invalid_config(format!(
                "noise_threshold must be non-negative, got {}",
                self.noise_threshold
            )));
        }
        Ok(())
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::new(1000, 1.0, 0.3, 0.1)
    }
}

/// Both configuration sections as found in `config.yml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub modbus: ConnectionConfig,
    pub signal: SignalConfig,
}

impl ProbeConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ProbeResult<Self> {
        let config: ProbeConfig = serde_yml::from_str(yaml)?;
        config.modbus.validate()?;
        config.signal.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> ProbeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::invalid_config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
modbus:
  host: 127.0.0.1
  port: 5020
  timeout: 2
  retries: 5
signal:
  sample_rate: 1000
  duration: 1.0
  trigger_threshold: 0.3
  noise_threshold: 0.1
"#;

    #[test]
    fn test_parse_yaml() {
        let config = ProbeConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.modbus.port, 5020);
        assert_eq!(config.modbus.max_retries, 5);
        assert_eq!(config.modbus.timeout(), Duration::from_secs(2));
        assert_eq!(config.signal.sample_count(), 1000);
    }

    #[test]
    fn test_modbus_defaults() {
        let yaml = "modbus: {host: localhost, port: 502}\nsignal: {sample_rate: 10, duration: 2.5, trigger_threshold: 0.1, noise_threshold: 0.0}";
        let config = ProbeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.modbus.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.modbus.timeout_seconds, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.signal.sample_count(), 25);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ConnectionConfig::new("127.0.0.1", 0).validate().is_err());
        assert!(ConnectionConfig::new("", 502).validate().is_err());
        assert!(SignalConfig::new(0, 1.0, 0.3, 0.1).validate().is_err());
        assert!(SignalConfig::new(1000, -1.0, 0.3, 0.1).validate().is_err());
        assert!(SignalConfig::new(1000, 1.0, 0.3, -0.1).validate().is_err());
        assert!(SignalConfig::new(1000, 1.0, 0.3, 0.0).validate().is_ok());

        let yaml = SAMPLE.replace("port: 5020", "port: 0");
        assert!(matches!(
            ProbeConfig::from_yaml_str(&yaml),
            Err(ProbeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let yaml = SAMPLE.replace("timeout: 2", "timeout: 1e20");
        assert!(matches!(
            ProbeConfig::from_yaml_str(&yaml),
            Err(ProbeError::InvalidConfig { .. })
        ));

        let config = ConnectionConfig {
            timeout_seconds: 1e20,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.timeout(), Duration::from_secs(3));

        // Large but representable values stay accepted
        let config = ConnectionConfig {
            timeout_seconds: 1e9,
            ..ConnectionConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(1_000_000_000));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(config.modbus, ProbeConfig::from_yaml_str(SAMPLE).unwrap().modbus);

        assert!(ProbeConfig::load("/definitely/not/here.yml").is_err());
    }
}
