//! Relay configuration
//!
//! Every component takes its settings from an [`AppConfig`] handed to it at
//! construction time. The values in [`crate::constants`] only seed the
//! defaults. Configuration is persisted as TOML in the platform config
//! directory (`~/.config/vox/config.toml` on Linux).

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::codec::FrameLayout;
use crate::constants::*;
use crate::error::{Error, Result};

/// Largest UDP payload that fits in a single IPv4 datagram
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub trigger: TriggerConfig,
    pub session: SessionConfig,
    pub sink: SinkConfig,
}

/// Audio stream parameters shared by both ends of the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per channel in one block (one datagram)
    pub frames_per_chunk: usize,
    /// Input device name; `None` uses the host default
    pub input_device: Option<String>,
    /// Output device name; `None` uses the host default
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frames_per_chunk: DEFAULT_FRAMES_PER_CHUNK,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.channels, self.frames_per_chunk)
    }

    /// Wall-clock duration of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_chunk as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Last used peer address for sending
    pub target_ip: Option<IpAddr>,
    /// Local address the receiver binds to
    pub listen_ip: IpAddr,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            target_ip: None,
            listen_ip: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_UDP_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// evdev input device path
    pub device_path: PathBuf,
    /// Raw key code of the trigger key
    pub key_code: u16,
    pub cooldown_ms: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(DEFAULT_TRIGGER_DEVICE),
            key_code: DEFAULT_TRIGGER_KEY_CODE,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
        }
    }
}

impl TriggerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Where session workers run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerBackend {
    /// In-process worker thread
    #[default]
    Thread,
    /// Child `vox-send` / `vox-listen` process
    Process,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded wait for cooperative shutdown before forced termination
    pub grace_period_ms: u64,
    /// Receive timeout; also the playback cancellation-polling interval
    pub receive_timeout_ms: u64,
    /// How long a worker may take to open its socket and device
    pub start_timeout_ms: u64,
    /// Provision the virtual sink around send sessions
    pub auto_sink: bool,
    pub backend: WorkerBackend,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            auto_sink: true,
            backend: WorkerBackend::Thread,
        }
    }
}

impl SessionConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub name: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SINK_NAME.to_string(),
        }
    }
}

impl AppConfig {
    /// Default config file location for this platform
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "vox").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::warn!("No config directory for this platform; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file {} not found; using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Persist `ip` as the last used send target
    pub fn remember_target(&mut self, ip: IpAddr, path: &Path) -> Result<()> {
        self.network.target_ip = Some(ip);
        self.save_to(path)
    }

    /// Persist `ip` as the last used listen address
    pub fn remember_listen(&mut self, ip: IpAddr, path: &Path) -> Result<()> {
        self.network.listen_ip = ip;
        self.save_to(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.channels == 0 {
            return Err(Error::Config("audio.channels must be at least 1".into()));
        }
        if self.audio.frames_per_chunk == 0 {
            return Err(Error::Config("audio.frames_per_chunk must be at least 1".into()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be non-zero".into()));
        }
        let packet = self.audio.layout().packet_size();
        if packet > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "block of {} bytes does not fit in one datagram (max {})",
                packet, MAX_DATAGRAM_SIZE
            )));
        }
        if self.session.receive_timeout_ms == 0 {
            return Err(Error::Config("session.receive_timeout_ms must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 48000);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.audio.frames_per_chunk, 1024);
        assert_eq!(config.audio.layout().packet_size(), 4096);
        assert_eq!(config.network.port, 5004);
        assert_eq!(config.trigger.key_code, 168);
        assert_eq!(config.trigger.cooldown(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_remember_target_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vox").join("config.toml");

        let mut config = AppConfig::default();
        config
            .remember_target("192.168.68.100".parse().unwrap(), &path)
            .unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.network.target_ip, Some("192.168.68.100".parse().unwrap()));
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[trigger]\ncooldown_ms = 500\n\n[session]\nbackend = \"process\"\n")
            .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.trigger.cooldown_ms, 500);
        assert_eq!(config.trigger.key_code, 168);
        assert_eq!(config.session.backend, WorkerBackend::Process);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio\nchannels = ").unwrap();

        assert!(matches!(AppConfig::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut config = AppConfig::default();
        config.audio.frames_per_chunk = 32_768;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
