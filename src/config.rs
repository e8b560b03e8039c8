//! Application configuration
//!
//! Loaded from `<config dir>/rcbridge/config.toml`. A missing file falls back to
//! the defaults so the bridge always starts; a malformed file is an error.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::controller::link_lifecycle::SubChannel;

const CONFIG_DIR: &str = "rcbridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ControllerSettings,
    pub replay: ReplaySettings,
}

/// Configuration settings for the controller subsystem
///
/// One set of settings drives both the link lifecycle and the sampling loop.
/// Every field has a default, so a config file only needs the values it
/// changes.
///
/// # Performance Impact
///
/// - `polling_interval_ms`: Lower values react faster but poll the transmitter more often
/// - `event_buffer`: Bounds every controller queue; a slow host applies back-pressure once it fills
///
/// # Examples
///
/// ```rust
/// use rcbridge::config::ControllerSettings;
/// use rcbridge::controller::SubChannel;
///
/// // Fast polling on the second UART
/// let settings = ControllerSettings {
///     polling_interval_ms: 100,
///     sub_channel: SubChannel::Uart1,
///     ..Default::default()
/// };
/// assert_eq!(settings.polling_interval().as_millis(), 100);
/// ```
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerSettings {
    /// Sampling interval in milliseconds
    ///
    /// One channel snapshot is requested per tick while the link is
    /// Connected. The transmitter reports at a much higher rate, so this only
    /// bounds how quickly stick moves and clicks reach the host.
    pub polling_interval_ms: u64,

    /// Transport sub-channel the pipeline is opened on
    pub sub_channel: SubChannel,

    /// Capacity of the command, callback and internal queues
    pub event_buffer: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: 300,
            sub_channel: SubChannel::Uart0,
            event_buffer: 100,
        }
    }
}

impl ControllerSettings {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Script for the replay transport
///
/// `frames` are played back in order, one per fetch. With `repeat` set the
/// last frame is served for ever once the script runs out.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReplaySettings {
    pub frames: Vec<Vec<i32>>,
    pub repeat: bool,
    pub connect_delay_ms: u64,
    pub fetch_delay_ms: u64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        let neutral = vec![1500, 1500, 1500, 1500, 1000, 1000, 0, 0, 1500, 1500, 1500, 1500];
        let with = |index: usize, value: i32| {
            let mut frame = neutral.clone();
            frame[index] = value;
            frame
        };

        Self {
            frames: vec![
                neutral.clone(),
                with(3, 1300),  // left stick left
                with(8, 1950),  // left aux click
                with(0, 1700),  // right stick tier 2 right
                with(9, 1050),  // right aux click
                neutral.clone(),
            ],
            repeat: true,
            connect_delay_ms: 200,
            fetch_delay_ms: 20,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            warn!("Config file {} does not exist, using default", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file: {}", e))?;
        let config = Self::parse(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.controller.polling_interval_ms == 0 {
            return Err(eyre!("polling_interval_ms must be greater than zero"));
        }
        if self.controller.event_buffer == 0 {
            return Err(eyre!("event_buffer must be greater than zero"));
        }
        Ok(())
    }
}
