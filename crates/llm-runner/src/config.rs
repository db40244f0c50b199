use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("Invalid port range {start}..{end}")]
    InvalidPortRange { start: u16, end: u16 },
}

/// Read a JSON configuration document, leaving unnamed fields at their defaults.
pub(crate) fn load_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Settings governing how a runner process is launched and supervised.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Number of port/spawn/health-check attempts before giving up.
    pub max_attempts: u32,
    /// Delay between two liveness probes while the runner starts.
    pub health_poll_interval_ms: u64,
    /// Time a single attempt has to answer its first probe.
    pub startup_timeout_ms: u64,
    /// Per-request timeout of a liveness probe.
    pub probe_timeout_ms: u64,
    /// First port of the range random ports are drawn from.
    pub port_range_start: u16,
    /// Exclusive end of the port range.
    pub port_range_end: u16,
    /// Loopback address the runner listens on.
    pub host: String,
    /// Free VRAM reported by the host, used by the default GPU layer policy.
    pub free_vram_mib: Option<u64>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            max_attempts: 3,
            health_poll_interval_ms: 200,
            startup_timeout_ms: 45_000,
            probe_timeout_ms: 2000,
            port_range_start: 49152,
            port_range_end: 65535,
            host: String::from("127.0.0.1"),
            free_vram_mib: None,
        }
    }
}

impl SupervisorConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: SupervisorConfig = load_json(path.as_ref())?;
        config.port_range()?;
        Ok(config)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_free_vram(mut self, free_vram_mib: Option<u64>) -> Self {
        self.free_vram_mib = free_vram_mib;
        self
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn port_range(&self) -> Result<Range<u16>, ConfigError> {
        if self.port_range_start >= self.port_range_end {
            return Err(ConfigError::InvalidPortRange {
                start: self.port_range_start,
                end: self.port_range_end,
            });
        }
        Ok(self.port_range_start..self.port_range_end)
    }
}
