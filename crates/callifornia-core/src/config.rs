//! Configuration system for Callifornia.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CALLIFORNIA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/callifornia/config.toml
//!   3. ~/.config/callifornia/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::RSA_KEY_BITS;
use crate::wire::{DEFAULT_MAX_DATAGRAM, MIN_MAX_DATAGRAM};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallsConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub timing: TimingConfig,
    pub crypto: CryptoConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay host name or address.
    pub host: String,
    /// Relay UDP port.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Largest datagram sent, header included.
    pub max_datagram_size: usize,
    /// Idle time before a partially received packet is dropped.
    pub assembly_timeout_ms: u64,
    /// SO_RCVBUF / SO_SNDBUF in bytes. 0 = OS default.
    pub socket_buffer_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Idle ping cadence.
    pub ping_interval_ms: u64,
    /// How often the liveness monitor evaluates ping responses.
    pub ping_check_interval_ms: u64,
    /// Consecutive failed checks before the connection is declared down.
    pub max_ping_failures: u32,
    /// Delay between retries of an unconfirmed request.
    pub task_retry_interval_ms: u64,
    /// Attempts (first send included) before a request is abandoned.
    pub task_max_attempts: u32,
    /// Lifetime of an unanswered call offer, either direction.
    pub call_expiry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// RSA modulus size for the per-session keypair.
    pub rsa_key_bits: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Playback volume, 0..=200 percent.
    pub volume: u8,
    pub muted: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM,
            assembly_timeout_ms: 3000,
            socket_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 1000,
            ping_check_interval_ms: 5000,
            max_ping_failures: 4,
            task_retry_interval_ms: 2000,
            task_max_attempts: 5,
            call_expiry_secs: 32,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: RSA_KEY_BITS,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 100,
            muted: false,
        }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl TransportConfig {
    pub fn assembly_timeout(&self) -> Duration {
        Duration::from_millis(self.assembly_timeout_ms)
    }
}

impl TimingConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_check_interval(&self) -> Duration {
        Duration::from_millis(self.ping_check_interval_ms)
    }

    pub fn task_retry_interval(&self) -> Duration {
        Duration::from_millis(self.task_retry_interval_ms)
    }

    pub fn call_expiry(&self) -> Duration {
        Duration::from_secs(self.call_expiry_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("callifornia")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CallsConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CallsConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CALLIFORNIA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CallsConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the transport or timers cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.max_datagram_size < MIN_MAX_DATAGRAM {
            return Err(ConfigError::Invalid(
                "transport.max_datagram_size",
                format!("{} is below {MIN_MAX_DATAGRAM}", self.transport.max_datagram_size),
            ));
        }
        let t = &self.timing;
        for (name, value) in [
            ("timing.ping_interval_ms", t.ping_interval_ms),
            ("timing.ping_check_interval_ms", t.ping_check_interval_ms),
            ("timing.task_retry_interval_ms", t.task_retry_interval_ms),
            ("timing.call_expiry_secs", t.call_expiry_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(name, "must be non-zero".into()));
            }
        }
        if t.task_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "timing.task_max_attempts",
                "must be non-zero".into(),
            ));
        }
        if t.max_ping_failures == 0 {
            return Err(ConfigError::Invalid(
                "timing.max_ping_failures",
                "must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Apply CALLIFORNIA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CALLIFORNIA_SERVER__HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("CALLIFORNIA_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Ok(v) = std::env::var("CALLIFORNIA_TRANSPORT__MAX_DATAGRAM_SIZE") {
            if let Ok(n) = v.parse() {
                self.transport.max_datagram_size = n;
            }
        }
        if let Ok(v) = std::env::var("CALLIFORNIA_CRYPTO__RSA_KEY_BITS") {
            if let Ok(n) = v.parse() {
                self.crypto.rsa_key_bits = n;
            }
        }
    }
}
