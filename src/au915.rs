//! AU915 frequency plan.
//!
//! 64 uplink channels from 915.2 MHz in 200 kHz steps, grouped into eight
//! sub-bands of eight channels, and 8 downlink channels from 923.3 MHz in
//! 600 kHz steps. Gateways normally serve a single sub-band (sub-band 2 is
//! The Things Network's default).

use crate::packet::{Bandwidth, SpreadingFactor};

/// First uplink channel frequency in Hz.
pub const UPLINK_START_HZ: u32 = 915_200_000;
/// Uplink channel spacing in Hz.
pub const UPLINK_STEP_HZ: u32 = 200_000;
/// Number of uplink channels.
pub const UPLINK_CHANNELS: u8 = 64;

/// First downlink channel frequency in Hz.
pub const DOWNLINK_START_HZ: u32 = 923_300_000;
/// Downlink channel spacing in Hz.
pub const DOWNLINK_STEP_HZ: u32 = 600_000;
/// Number of downlink channels.
pub const DOWNLINK_CHANNELS: u8 = 8;

/// Channels per sub-band.
pub const SUBBAND_SIZE: u8 = 8;
/// Number of sub-bands.
pub const SUBBAND_COUNT: u8 = 8;

/// Public LoRaWAN sync word.
pub const PUBLIC_SYNC_WORD: u8 = 0x34;
/// Private network sync word.
pub const PRIVATE_SYNC_WORD: u8 = 0x12;

/// RX2 window defaults: 923.3 MHz, SF12, BW500.
pub fn rx2_defaults() -> (u32, SpreadingFactor, Bandwidth) {
    (
        DOWNLINK_START_HZ,
        SpreadingFactor::new(12).unwrap(),
        Bandwidth::Khz500,
    )
}

/// Frequency of an absolute uplink channel (0..63). Out-of-range indices
/// are clamped to the last channel.
pub fn uplink_frequency(channel: u8) -> u32 {
    let ch = channel.min(UPLINK_CHANNELS - 1);
    UPLINK_START_HZ + u32::from(ch) * UPLINK_STEP_HZ
}

/// Frequency of a downlink channel (0..7), clamped.
pub fn downlink_frequency(channel: u8) -> u32 {
    let ch = channel.min(DOWNLINK_CHANNELS - 1);
    DOWNLINK_START_HZ + u32::from(ch) * DOWNLINK_STEP_HZ
}

/// Absolute uplink channel for a (sub-band, index-within-sub-band) pair.
pub fn subband_channel(subband: u8, index: u8) -> u8 {
    let sb = subband.min(SUBBAND_COUNT - 1);
    let idx = index.min(SUBBAND_SIZE - 1);
    sb * SUBBAND_SIZE + idx
}

/// The eight uplink frequencies of a sub-band.
pub fn subband_frequencies(subband: u8) -> [u32; SUBBAND_SIZE as usize] {
    let mut freqs = [0u32; SUBBAND_SIZE as usize];
    for (i, f) in freqs.iter_mut().enumerate() {
        *f = uplink_frequency(subband_channel(subband, i as u8));
    }
    freqs
}

/// Uplink channel index of an uplink frequency, if it lies on the plan grid.
pub fn uplink_channel_of(freq_hz: u32) -> Option<u8> {
    if freq_hz < UPLINK_START_HZ {
        return None;
    }
    let offset = freq_hz - UPLINK_START_HZ;
    if offset % UPLINK_STEP_HZ != 0 {
        return None;
    }
    let channel = offset / UPLINK_STEP_HZ;
    (channel < u32::from(UPLINK_CHANNELS)).then_some(channel as u8)
}

/// RX1 downlink frequency for an uplink frequency.
///
/// Uplink channel `n` maps to downlink channel `n / 8`, capped to 7.
/// Off-grid uplink frequencies fall back to the RX2 frequency.
pub fn rx1_downlink_frequency(uplink_freq_hz: u32) -> u32 {
    match uplink_channel_of(uplink_freq_hz) {
        Some(channel) => downlink_frequency(channel / SUBBAND_SIZE),
        None => DOWNLINK_START_HZ,
    }
}
