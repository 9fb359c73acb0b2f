use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;

use crate::constants::{
    DEFAULT_BANNER_MARKER, DEFAULT_CHANNEL_OPEN_TIMEOUT, DEFAULT_ENGINE_EXIT_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LONG_READ_IDLE_TIMEOUT, DEFAULT_MAX_STATEMENT_BYTES,
    DEFAULT_QUERY_LOCK_TIMEOUT, DEFAULT_READ_BUFFER_SIZE, DEFAULT_READ_IDLE_TIMEOUT,
    DEFAULT_SESSION_LOCK_TIMEOUT,
};
use crate::error::{Error, Result};
use crate::handshake::ChannelTransfer;

pub const ENV_RUNTIME_DIR: &str = "TAPI_BRIDGE_RUNTIME_DIR";
pub const ENV_SESSION_LOCK_MS: &str = "TAPI_BRIDGE_SESSION_LOCK_MS";
pub const ENV_QUERY_LOCK_MS: &str = "TAPI_BRIDGE_QUERY_LOCK_MS";
pub const ENV_READ_IDLE_MS: &str = "TAPI_BRIDGE_READ_IDLE_MS";

lazy_static! {
    /// Where named objects live unless configured otherwise
    pub static ref DEFAULT_RUNTIME_DIR: PathBuf = {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    };
}

/// Bounded waits, one per blocking operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub session_lock: Duration,
    pub query_lock: Duration,
    pub channel_open: Duration,
    pub handshake: Duration,
    /// Wait for the next bytes of an ordinary response
    pub read_idle: Duration,
    /// Wait for the next bytes of a batch or schema response
    pub long_read_idle: Duration,
    pub engine_exit: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            session_lock: DEFAULT_SESSION_LOCK_TIMEOUT,
            query_lock: DEFAULT_QUERY_LOCK_TIMEOUT,
            channel_open: DEFAULT_CHANNEL_OPEN_TIMEOUT,
            handshake: DEFAULT_HANDSHAKE_TIMEOUT,
            read_idle: DEFAULT_READ_IDLE_TIMEOUT,
            long_read_idle: DEFAULT_LONG_READ_IDLE_TIMEOUT,
            engine_exit: DEFAULT_ENGINE_EXIT_TIMEOUT,
        }
    }
}

/// How an attaching client obtains channel endpoints to a running engine
#[derive(Clone, Default)]
pub enum AttachMode {
    /// Open the named channels directly
    #[default]
    OpenByName,
    /// Ask a connected peer to duplicate its endpoints into this process
    HandleExchange(Arc<dyn ChannelTransfer>),
}

impl fmt::Debug for AttachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachMode::OpenByName => f.write_str("OpenByName"),
            AttachMode::HandleExchange(_) => f.write_str("HandleExchange"),
        }
    }
}

/// Driver configuration for one engine target
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Directory the engine runs in; names every shared object
    pub working_dir: PathBuf,
    /// Engine executable
    pub executable: PathBuf,
    /// Directory holding segments, lock files and channels
    pub runtime_dir: PathBuf,
    pub timeouts: Timeouts,
    pub read_buffer_size: usize,
    /// Largest statement the positioned executor writes in one go
    pub max_statement_bytes: usize,
    /// Marker ending the engine's startup banner
    pub banner_marker: String,
    pub attach_mode: AttachMode,
}

impl DriverConfig {
    pub fn new(working_dir: impl Into<PathBuf>, executable: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            executable: executable.into(),
            runtime_dir: DEFAULT_RUNTIME_DIR.clone(),
            timeouts: Timeouts::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_statement_bytes: DEFAULT_MAX_STATEMENT_BYTES,
            banner_marker: DEFAULT_BANNER_MARKER.to_string(),
            attach_mode: AttachMode::OpenByName,
        }
    }

    /// Build a config and apply `TAPI_BRIDGE_*` overrides from the environment
    pub fn from_env(working_dir: impl Into<PathBuf>, executable: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(working_dir, executable);
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_RUNTIME_DIR) {
            self.runtime_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_SESSION_LOCK_MS) {
            self.timeouts.session_lock = parse_millis(ENV_SESSION_LOCK_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_QUERY_LOCK_MS) {
            self.timeouts.query_lock = parse_millis(ENV_QUERY_LOCK_MS, &ms)?;
        }
        if let Some(ms) = lookup(ENV_READ_IDLE_MS) {
            self.timeouts.read_idle = parse_millis(ENV_READ_IDLE_MS, &ms)?;
        }
        Ok(())
    }

    pub fn with_runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = dir.into();
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_statement_bytes(mut self, size: usize) -> Self {
        self.max_statement_bytes = size;
        self
    }

    pub fn with_banner_marker(mut self, marker: impl Into<String>) -> Self {
        self.banner_marker = marker.into();
        self
    }

    pub fn with_attach_mode(mut self, mode: AttachMode) -> Self {
        self.attach_mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.working_dir.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "working directory {} does not exist",
                self.working_dir.display()
            )));
        }
        if !self.executable.is_file() {
            return Err(Error::InvalidConfig(format!(
                "executable {} does not exist",
                self.executable.display()
            )));
        }
        if !self.runtime_dir.is_absolute() || !self.runtime_dir.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "runtime directory {} must be an existing absolute path",
                self.runtime_dir.display()
            )));
        }
        if self.read_buffer_size == 0 || self.max_statement_bytes == 0 {
            return Err(Error::InvalidConfig(
                "buffer sizes must be non-zero".to_string(),
            ));
        }
        if self.banner_marker.is_empty() {
            return Err(Error::InvalidConfig("banner marker is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::InvalidConfig(format!("{} must be milliseconds, got {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn overrides_replace_defaults() {
        let mut config = DriverConfig::new("/tmp", "/bin/sh");
        let env: HashMap<&str, &str> = [
            (ENV_RUNTIME_DIR, "/run/user/1"),
            (ENV_SESSION_LOCK_MS, "250"),
            (ENV_READ_IDLE_MS, " 40 "),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.runtime_dir, PathBuf::from("/run/user/1"));
        assert_eq!(config.timeouts.session_lock, Duration::from_millis(250));
        assert_eq!(config.timeouts.read_idle, Duration::from_millis(40));
        assert_eq!(config.timeouts.query_lock, DEFAULT_QUERY_LOCK_TIMEOUT);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = DriverConfig::new("/tmp", "/bin/sh");
        let err = config
            .apply_overrides(|key| (key == ENV_QUERY_LOCK_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn validate_checks_paths_and_sizes() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("engine");
        std::fs::write(&exe, "").unwrap();

        let config = DriverConfig::new(dir.path(), &exe).with_runtime_dir(dir.path());
        assert!(config.validate().is_ok());

        let missing = DriverConfig::new(dir.path(), dir.path().join("nope"))
            .with_runtime_dir(dir.path());
        assert!(missing.validate().is_err());

        let zero = config.clone().with_read_buffer_size(0);
        assert!(zero.validate().is_err());
    }
}
