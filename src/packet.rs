//! Packet and statistics types shared across the gateway.
//!
//! [`RxDescriptor`] is produced by the radio interrupt path and moves
//! through the bounded queues to the packet forwarder; [`TxRequest`] travels
//! the opposite way, from a PULL_RESP to the channel manager. Both are
//! plain owned values, never shared or mutated after construction.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Maximum LoRa payload the SX1276 FIFO can hold.
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// LoRa signal bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    /// Bandwidth in kHz, as used in the `datr` wire string.
    pub fn khz(self) -> u32 {
        match self {
            Self::Khz125 => 125,
            Self::Khz250 => 250,
            Self::Khz500 => 500,
        }
    }

    pub fn from_khz(khz: u32) -> Option<Self> {
        match khz {
            125 => Some(Self::Khz125),
            250 => Some(Self::Khz250),
            500 => Some(Self::Khz500),
            _ => None,
        }
    }
}

/// LoRa spreading factor. SF6 exists on the chip but LoRaWAN uses 7..=12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpreadingFactor(u8);

impl SpreadingFactor {
    pub fn new(sf: u8) -> Option<Self> {
        (6..=12).contains(&sf).then_some(Self(sf))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// LoRa coding rate 4/5 .. 4/8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

impl CodingRate {
    /// Denominator of the `4/n` wire string.
    pub fn denominator(self) -> u8 {
        match self {
            Self::Cr4_5 => 5,
            Self::Cr4_6 => 6,
            Self::Cr4_7 => 7,
            Self::Cr4_8 => 8,
        }
    }

    pub fn from_denominator(n: u8) -> Option<Self> {
        match n {
            5 => Some(Self::Cr4_5),
            6 => Some(Self::Cr4_6),
            7 => Some(Self::Cr4_7),
            8 => Some(Self::Cr4_8),
            _ => None,
        }
    }

    /// Register field value (1 = 4/5 .. 4 = 4/8), as the modem encodes it.
    pub fn register_value(self) -> u8 {
        self.denominator() - 4
    }
}

/// Modulation parameters attached to every RX descriptor and TX request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modulation {
    pub frequency_hz: u32,
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
    pub coding_rate: CodingRate,
}

/// A frame received by the RX radio, built inside the interrupt handler.
#[derive(Debug, Clone, PartialEq)]
pub struct RxDescriptor {
    pub payload: Vec<u8>,
    pub modulation: Modulation,
    /// Packet RSSI in dBm (register value minus 157).
    pub rssi_dbm: i16,
    /// Packet SNR in dB (signed register value divided by 4).
    pub snr_db: i8,
    pub crc_ok: bool,
    /// Monotonic microsecond counter sampled at interrupt time.
    pub hw_timestamp_us: u32,
    pub rf_chain: u8,
}

/// When a downlink should leave the antenna.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxSchedule {
    Immediate,
    /// Transmit when the monotonic counter reaches this value.
    At(u32),
}

/// A downlink to transmit, decoded from a PULL_RESP `txpk` object.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub payload: Vec<u8>,
    pub modulation: Modulation,
    pub tx_power_dbm: i8,
    pub schedule: TxSchedule,
    /// True for LoRaWAN downlinks (end devices expect inverted IQ).
    pub invert_iq: bool,
}

/// Monotonic gateway counters, updated from the interrupt path, the
/// workers, and the forwarder. All fields are atomics so no lock is needed.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub rx_total: AtomicU32,
    pub rx_ok: AtomicU32,
    pub rx_bad: AtomicU32,
    pub rx_forwarded: AtomicU32,
    /// RX descriptors dropped on queue overflow.
    pub rx_dropped: AtomicU32,
    pub tx_total: AtomicU32,
    pub tx_ok: AtomicU32,
    pub tx_fail: AtomicU32,
    /// Downlinks discarded because their window had already passed.
    pub tx_collision: AtomicU32,
    /// TX requests dropped on queue overflow.
    pub tx_dropped: AtomicU32,
    pub uptime_seconds: AtomicU64,
    pub last_rx_time_us: AtomicI64,
    pub last_tx_time_us: AtomicI64,
}

/// Plain-value snapshot of [`GatewayStats`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_total: u32,
    pub rx_ok: u32,
    pub rx_bad: u32,
    pub rx_forwarded: u32,
    pub rx_dropped: u32,
    pub tx_total: u32,
    pub tx_ok: u32,
    pub tx_fail: u32,
    pub tx_collision: u32,
    pub tx_dropped: u32,
    pub uptime_seconds: u64,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rx_total: self.rx_total.load(Ordering::Relaxed),
            rx_ok: self.rx_ok.load(Ordering::Relaxed),
            rx_bad: self.rx_bad.load(Ordering::Relaxed),
            rx_forwarded: self.rx_forwarded.load(Ordering::Relaxed),
            rx_dropped: self.rx_dropped.load(Ordering::Relaxed),
            tx_total: self.tx_total.load(Ordering::Relaxed),
            tx_ok: self.tx_ok.load(Ordering::Relaxed),
            tx_fail: self.tx_fail.load(Ordering::Relaxed),
            tx_collision: self.tx_collision.load(Ordering::Relaxed),
            tx_dropped: self.tx_dropped.load(Ordering::Relaxed),
            uptime_seconds: self.uptime_seconds.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.rx_total.store(0, Ordering::Relaxed);
        self.rx_ok.store(0, Ordering::Relaxed);
        self.rx_bad.store(0, Ordering::Relaxed);
        self.rx_forwarded.store(0, Ordering::Relaxed);
        self.rx_dropped.store(0, Ordering::Relaxed);
        self.tx_total.store(0, Ordering::Relaxed);
        self.tx_ok.store(0, Ordering::Relaxed);
        self.tx_fail.store(0, Ordering::Relaxed);
        self.tx_collision.store(0, Ordering::Relaxed);
        self.tx_dropped.store(0, Ordering::Relaxed);
        self.last_rx_time_us.store(0, Ordering::Relaxed);
        self.last_tx_time_us.store(0, Ordering::Relaxed);
    }
}

/// Forwarder-side connection status, derived from PULL_ACK liveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStatus {
    pub connected: bool,
    pub push_ack_count: u32,
    pub pull_ack_count: u32,
    /// Monotonic timestamp of the most recent PULL_ACK, if any.
    pub last_pull_ack_us: Option<u32>,
}
