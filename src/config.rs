use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString, IntoStaticStr};

/// What to do when the engine fails to set up the debug target.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Deserialize, EnumString, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
pub enum EngineFailurePolicy {
    /// Log the engine error and keep the session; forwarded requests fail later.
    #[default]
    #[strum(serialize = "degrade")]
    Degrade,
    /// Abort `start` with the engine error.
    #[strum(serialize = "fail_fast")]
    FailFast,
}

/// Closed interval of candidate TCP ports.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 5678,
            end: 5900,
        }
    }
}

/// Debug bridge configuration.
///
/// Every key is optional in the TOML form, missing keys take the defaults below.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Address of the debug target (loopback by default).
    pub host: String,
    /// Candidate ports for the debug target.
    pub port_range: PortRange,
    /// How many candidates are probed before giving up.
    pub probe_attempts: u32,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// Read timeout of the transport socket, bounds shutdown latency.
    pub poll_interval_ms: u64,
    pub engine_failure: EngineFailurePolicy,
    /// Trace DAP traffic into the session log directory.
    pub trace_dap: bool,
    /// Root for session logs and cell files, system temp dir if absent.
    pub temp_root: Option<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_range: PortRange::default(),
            probe_attempts: 100,
            connect_timeout_ms: 3000,
            request_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            poll_interval_ms: 50,
            engine_failure: EngineFailurePolicy::default(),
            trace_dap: false,
            temp_root: None,
        }
    }
}

impl DebuggerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let data = read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> crate::Result<Self> {
        Ok(toml::de::from_str(data)?)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}
