//! Durable gateway configuration.
//!
//! The configuration is a versioned blob: gateway EUI, LoRa channel plan,
//! and network-server settings. It is read once at init and written only on
//! explicit command; runtime changes require a stop/start cycle.

use crate::au915;
use crate::packet::Bandwidth;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub const EUI_SIZE: usize = 8;
/// Channels served per gateway (one sub-band).
pub const GATEWAY_CHANNELS: usize = 8;

/// One receive channel of the active sub-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub frequency_hz: u32,
    pub sf_min: u8,
    pub sf_max: u8,
    pub bandwidth: Bandwidth,
    pub enabled: bool,
}

/// LoRa-side configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoraConfig {
    /// Active AU915 sub-band, 0..=7. Sub-band 1 (channels 8..15) is the
    /// TTN default.
    pub subband: u8,
    pub channels: Vec<ChannelConfig>,
    pub rx_sf: u8,
    pub rx_bandwidth: Bandwidth,
    pub tx_power_dbm: i8,
    pub sync_word: u8,
}

/// Backhaul link credentials. Bring-up and failover policy live in the
/// platform layer; only the durable settings are stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub wifi_enabled: bool,
    pub wifi_ssid: String,
    pub wifi_password: String,
}

/// Network-server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// PULL_DATA keepalive period.
    pub keepalive_interval_ms: u32,
    /// Statistics report period.
    pub stat_interval_ms: u32,
}

/// Complete durable configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub gateway_eui: [u8; EUI_SIZE],
    pub lora: LoraConfig,
    pub link: LinkConfig,
    pub server: ServerConfig,
    pub config_version: u32,
}

impl GatewayConfig {
    /// Defaults: AU915 sub-band 2 (TTN), SF7/BW125 uplink, 14 dBm, public
    /// sync word, Semtech default port.
    pub fn defaults(gateway_eui: [u8; EUI_SIZE]) -> Self {
        let subband = 1;
        let channels = au915::subband_frequencies(subband)
            .iter()
            .map(|&frequency_hz| ChannelConfig {
                frequency_hz,
                sf_min: 7,
                sf_max: 10,
                bandwidth: Bandwidth::Khz125,
                enabled: true,
            })
            .collect();

        Self {
            gateway_eui,
            lora: LoraConfig {
                subband,
                channels,
                rx_sf: 7,
                rx_bandwidth: Bandwidth::Khz125,
                tx_power_dbm: 14,
                sync_word: au915::PUBLIC_SYNC_WORD,
            },
            link: LinkConfig {
                wifi_enabled: true,
                wifi_ssid: String::new(),
                wifi_password: String::new(),
            },
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 1700,
                keepalive_interval_ms: 10_000,
                stat_interval_ms: 30_000,
            },
            config_version: 1,
        }
    }

    /// Uplink frequency of channel `index` (0..7) within the active
    /// sub-band.
    pub fn uplink_frequency(&self, index: u8) -> u32 {
        au915::uplink_frequency(au915::subband_channel(self.lora.subband, index))
    }
}

/// Synthesize an EUI-64 from a 6-byte MAC: `MAC[0..3] || FF FE || MAC[3..6]`.
pub fn eui_from_mac(mac: [u8; 6]) -> [u8; EUI_SIZE] {
    [
        mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5],
    ]
}

/// EUI as a 16-character upper-case hex string.
pub fn eui_to_string(eui: &[u8; EUI_SIZE]) -> String {
    eui.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Parse an EUI from a 16-character hex string.
pub fn eui_from_string(s: &str) -> Option<[u8; EUI_SIZE]> {
    if s.len() != EUI_SIZE * 2 {
        return None;
    }
    let mut eui = [0u8; EUI_SIZE];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hex = std::str::from_utf8(chunk).ok()?;
        eui[i] = u8::from_str_radix(hex, 16).ok()?;
    }
    Some(eui)
}

/// Configuration persistence errors.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Format(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {}", e),
            Self::Format(e) => write!(f, "config format error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e)
    }
}

/// Durable configuration storage. NVS on the device, a file on the host.
pub trait ConfigStore {
    /// `Ok(None)` when no configuration has been saved yet.
    fn load(&self) -> Result<Option<GatewayConfig>, ConfigError>;
    fn save(&mut self, config: &GatewayConfig) -> Result<(), ConfigError>;
}

/// File-backed store for host tools and tests.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<Option<GatewayConfig>, ConfigError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, config: &GatewayConfig) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec(config)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}
