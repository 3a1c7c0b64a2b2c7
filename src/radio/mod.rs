//! Radio abstraction layer.
//!
//! The SX1276 driver talks to its transceiver through the [`SpiDevice`]
//! trait, which platform code (or a test mock) implements. The channel
//! manager and gateway in turn talk to radios through the [`Radio`] trait,
//! so they never depend on a concrete SPI binding.

pub mod regs;
pub mod sx1276;

pub use sx1276::{RadioConfig, Sx1276};

use crate::packet::{Modulation, RxDescriptor};
use std::fmt;
use std::time::Duration;

/// SPI device bound to one transceiver's chip select.
///
/// Register reads and writes are 2-byte transactions; FIFO bursts are one
/// address byte followed by payload bytes, all under a single CS assertion.
/// The platform layer arbitrates the shared bus between devices.
pub trait SpiDevice: Send {
    /// Full-duplex transfer; `tx` and `rx` have the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<(), BusError>;

    /// Write-only transaction.
    fn write(&mut self, tx: &[u8]) -> Result<(), BusError>;
}

/// Opaque SPI bus failure reported by the platform layer.
#[derive(Debug, Clone)]
pub struct BusError {
    detail: String,
}

impl BusError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPI bus error: {}", self.detail)
    }
}

impl std::error::Error for BusError {}

/// Errors returned by radio operations.
#[derive(Debug)]
pub enum Error {
    /// Caller-visible programming error (bad argument, wrong state).
    InvalidArgument,
    /// Version register did not read back as the expected chip identity.
    ChipAbsent { found: u8 },
    /// Operation exceeded its deadline (CAD poll, TX-done wait).
    Timeout,
    /// A transmission is already in flight.
    Busy,
    /// SPI transaction failed; the radio stays in its last-known state.
    Bus(BusError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ChipAbsent { found } => {
                write!(
                    f,
                    "chip version mismatch: read 0x{:02X}, expected 0x{:02X}",
                    found,
                    regs::CHIP_VERSION
                )
            }
            Self::Timeout => write!(f, "radio timeout"),
            Self::Busy => write!(f, "transmit already in flight"),
            Self::Bus(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

/// Transceiver operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep,
    Standby,
    FsTx,
    Tx,
    FsRx,
    RxContinuous,
    RxSingle,
    Cad,
}

impl Mode {
    /// Low bits of REG_OP_MODE for this mode.
    pub(crate) fn bits(self) -> u8 {
        match self {
            Self::Sleep => regs::mode::SLEEP,
            Self::Standby => regs::mode::STDBY,
            Self::FsTx => regs::mode::FSTX,
            Self::Tx => regs::mode::TX,
            Self::FsRx => regs::mode::FSRX,
            Self::RxContinuous => regs::mode::RX_CONTINUOUS,
            Self::RxSingle => regs::mode::RX_SINGLE,
            Self::Cad => regs::mode::CAD,
        }
    }
}

/// Callback invoked from the interrupt path with a completed RX frame.
pub type RxCallback = Box<dyn FnMut(RxDescriptor) + Send>;

/// Callback invoked when a transmission completes (`true` on success).
pub type TxCallback = Box<dyn FnMut(bool) + Send>;

/// One frame handed to the TX radio, with the modulation to apply for it.
#[derive(Debug, Clone)]
pub struct TxFrame {
    pub payload: Vec<u8>,
    pub modulation: Modulation,
    pub tx_power_dbm: i8,
    pub invert_iq: bool,
    /// Busy-wait this long immediately before keying the PA, to land the
    /// frame on a precise timestamp. Zero disables the spin.
    pub tx_delay_us: u32,
}

/// Driver-independent view of one transceiver, as the channel manager and
/// gateway see it.
pub trait Radio: Send + Sync {
    /// Enter continuous receive and deliver frames to `callback`.
    fn start_rx(&self, callback: RxCallback) -> Result<(), Error>;

    /// Leave receive mode and drop the RX callback.
    fn stop_rx(&self) -> Result<(), Error>;

    /// Register a completion callback for transmissions.
    fn set_tx_callback(&self, callback: TxCallback);

    /// Start transmitting one frame. Returns as soon as the PA is keyed;
    /// completion is reported through [`Radio::wait_tx_done`] and the TX
    /// callback.
    fn transmit(&self, frame: TxFrame) -> Result<(), Error>;

    /// Block until the in-flight transmission completes. Returns `true`
    /// on TX-done, `Err(Timeout)` if the deadline passes first.
    fn wait_tx_done(&self, timeout: Duration) -> Result<bool, Error>;

    /// Retune the carrier frequency.
    fn set_frequency(&self, freq_hz: u32) -> Result<(), Error>;

    /// Update the receive spreading factor and bandwidth.
    fn set_rx_params(
        &self,
        sf: crate::packet::SpreadingFactor,
        bw: crate::packet::Bandwidth,
    ) -> Result<(), Error>;

    /// Request an operating-mode transition.
    fn set_mode(&self, mode: Mode) -> Result<(), Error>;

    /// Last requested operating mode.
    fn mode(&self) -> Mode;

    /// Channel activity detection: `true` when no LoRa preamble is heard.
    fn channel_free(&self) -> Result<bool, Error>;
}
