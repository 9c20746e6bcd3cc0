//! Configuration module
//!
//! Handles loading and saving radiochat configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::link::LinkConfig;
use crate::protocol::{BaudRate, Batching, InboundFraming, DEFAULT_MAX_LINE_LEN};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Who we are in the chat
    #[serde(default)]
    pub user: UserConfig,

    /// Serial link settings
    #[serde(default)]
    pub link: LinkSettings,

    /// Inbound chat handling
    #[serde(default)]
    pub chat: ChatConfig,

    /// Image transfer settings
    #[serde(default)]
    pub image: ImageConfig,
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Display name prefixed to outgoing messages
    #[serde(default = "default_user_name")]
    pub name: String,
}

/// Home directory name, then host name, then a placeholder
fn default_user_name() -> String {
    dirs::home_dir()
        .and_then(|home| home.file_name().map(|n| n.to_string_lossy().to_string()))
        .filter(|name| !name.is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().to_string())
        })
        .unwrap_or_else(|| "None".to_string())
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: default_user_name(),
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Device to open when none is given on the command line
    pub device: Option<String>,
    /// Baud rate
    #[serde(default)]
    pub baud: BaudRate,
    /// Pause between write attempts while the peer is not draining (ms)
    #[serde(default = "default_write_retry")]
    pub write_retry_ms: u64,
    /// Give up on a write after this long without progress (ms, unset = never)
    pub write_stall_timeout_ms: Option<u64>,
    /// Inbound polling interval (ms)
    #[serde(default = "default_read_poll")]
    pub read_poll_ms: u64,
    /// Queued writes before senders wait
    #[serde(default = "default_write_queue_depth")]
    pub write_queue_depth: usize,
}

fn default_write_retry() -> u64 {
    20
}

fn default_read_poll() -> u64 {
    10
}

fn default_write_queue_depth() -> usize {
    64
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            device: None,
            baud: BaudRate::default(),
            write_retry_ms: default_write_retry(),
            write_stall_timeout_ms: None,
            read_poll_ms: default_read_poll(),
            write_queue_depth: default_write_queue_depth(),
        }
    }
}

impl LinkSettings {
    /// Runtime tuning for the link manager
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            write_retry: Duration::from_millis(self.write_retry_ms),
            write_stall_timeout: self.write_stall_timeout_ms.map(Duration::from_millis),
            read_poll: Duration::from_millis(self.read_poll_ms),
            write_queue_depth: self.write_queue_depth,
            ..Default::default()
        }
    }
}

/// Chat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How inbound bytes are split into messages
    #[serde(default)]
    pub inbound_framing: InboundFraming,
    /// Longest inbound line kept pending before it is shown anyway
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

fn default_max_line_len() -> usize {
    DEFAULT_MAX_LINE_LEN
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            inbound_framing: InboundFraming::default(),
            max_line_len: default_max_line_len(),
        }
    }
}

/// Image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Send an `I <width> <height>` line before the first row
    #[serde(default = "default_true")]
    pub send_header: bool,
    /// How the pixel stream is grouped into writes
    #[serde(default)]
    pub batching: Batching,
}

fn default_true() -> bool {
    true
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            send_header: default_true(),
            batching: Batching::default(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("radiochat/config.toml")),
            Some(PathBuf::from("./radiochat.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        user: UserConfig {
            name: "alice".to_string(),
        },
        link: LinkSettings {
            device: Some("/dev/ttyACM0".to_string()),
            baud: BaudRate::B115200,
            write_stall_timeout_ms: Some(5000),
            ..Default::default()
        },
        image: ImageConfig {
            batching: Batching::PerRow,
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.link.baud, BaudRate::B9600);
        assert_eq!(config.link.write_retry_ms, 20);
        assert!(config.link.write_stall_timeout_ms.is_none());
        assert_eq!(config.chat.inbound_framing, InboundFraming::Line);
        assert!(config.image.send_header);
        assert_eq!(config.image.batching, Batching::PerValue);
        assert!(!config.user.name.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.link.device = Some("COM3".to_string());
        config.image.batching = Batching::Chunked(32);
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.link.device.as_deref(), Some("COM3"));
        assert_eq!(loaded.image.batching, Batching::Chunked(32));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[link]\nbaud = 57600\n\n[chat]\ninbound_framing = \"per-read\"\n\n[image]\nbatching = {{ chunked = 16 }}"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.link.baud, BaudRate::B57600);
        assert_eq!(config.link.read_poll_ms, 10);
        assert_eq!(config.chat.inbound_framing, InboundFraming::PerRead);
        assert_eq!(config.image.batching, Batching::Chunked(16));
        assert!(config.image.send_header);
    }

    #[test]
    fn test_unsupported_baud_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[link]\nbaud = 12345").unwrap();
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/radiochat.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_link_config_conversion() {
        let settings = LinkSettings {
            write_stall_timeout_ms: Some(250),
            write_retry_ms: 5,
            ..Default::default()
        };
        let link = settings.link_config();
        assert_eq!(link.write_retry, Duration::from_millis(5));
        assert_eq!(link.write_stall_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.user.name, "alice");
        assert_eq!(parsed.link.baud, BaudRate::B115200);
        assert_eq!(parsed.image.batching, Batching::PerRow);
    }
}
