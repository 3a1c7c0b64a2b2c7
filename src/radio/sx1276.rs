//! SX1276 LoRa transceiver driver.
//!
//! Register-level control of one transceiver over a shared SPI bus. All
//! register access goes through a single per-radio mutex that also guards
//! the cached configuration, so a configuration change can never interleave
//! with an in-flight transaction.
//!
//! The platform layer owns the reset line and the DIO0 interrupt: it resets
//! the chip before calling [`Sx1276::init`] and calls
//! [`Sx1276::handle_interrupt`] on each DIO0 rising edge.

use super::regs;
use super::{BusError, Error, Mode, Radio, RxCallback, SpiDevice, TxCallback, TxFrame};
use crate::packet::{
    Bandwidth, CodingRate, Modulation, RxDescriptor, SpreadingFactor, MAX_PAYLOAD_SIZE,
};
use crate::time::{us_delta, MonotonicClock};
use log::{debug, info, warn};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Ceiling for the channel-activity-detection poll.
const CAD_TIMEOUT_MS: u32 = 100;

/// Per-radio modem configuration, applied at init and on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    pub frequency_hz: u32,
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
    pub coding_rate: CodingRate,
    pub tx_power_dbm: i8,
    pub sync_word: u8,
    pub preamble_length: u16,
    pub crc_on: bool,
    pub implicit_header: bool,
    pub invert_iq_rx: bool,
    pub invert_iq_tx: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 916_800_000,
            spreading_factor: SpreadingFactor::new(7).unwrap(),
            bandwidth: Bandwidth::Khz125,
            coding_rate: CodingRate::Cr4_5,
            tx_power_dbm: 14,
            sync_word: crate::au915::PUBLIC_SYNC_WORD,
            preamble_length: 8,
            crc_on: true,
            implicit_header: false,
            invert_iq_rx: false,
            invert_iq_tx: true,
        }
    }
}

/// Register state guarded by the per-radio mutex.
struct Inner<SPI> {
    spi: SPI,
    config: RadioConfig,
    mode: Mode,
    /// Outcome of the last CAD cycle completed by the interrupt path.
    cad_free: Option<bool>,
}

/// TX-done signal. The interrupt handler sets the outcome and notifies; the
/// TX worker blocks on the condvar instead of polling a flag.
#[derive(Default)]
struct TxDoneSignal {
    state: Mutex<Option<bool>>,
    cond: Condvar,
}

/// SX1276 driver instance. One per transceiver chip.
pub struct Sx1276<SPI: SpiDevice> {
    inner: Mutex<Inner<SPI>>,
    rx_callback: Mutex<Option<RxCallback>>,
    tx_callback: Mutex<Option<TxCallback>>,
    tx_done: TxDoneSignal,
    clock: Arc<dyn MonotonicClock>,
    rf_chain: u8,
}

impl<SPI: SpiDevice> Sx1276<SPI> {
    /// Probe the chip and bring it into standby with `config` applied.
    ///
    /// The version register is read before anything is written; a mismatch
    /// is fatal for this radio and leaves it untouched.
    pub fn init(
        spi: SPI,
        config: RadioConfig,
        clock: Arc<dyn MonotonicClock>,
        rf_chain: u8,
    ) -> Result<Self, Error> {
        let mut inner = Inner {
            spi,
            config: config.clone(),
            mode: Mode::Sleep,
            cad_free: None,
        };

        let version = inner.read_reg(regs::REG_VERSION)?;
        if version != regs::CHIP_VERSION {
            return Err(Error::ChipAbsent { found: version });
        }
        info!("rf{}: SX1276 detected, version 0x{:02X}", rf_chain, version);

        // The LoRa-mode bit latches only in sleep.
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::SLEEP)?;
        std::thread::sleep(Duration::from_millis(10));
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::STDBY)?;
        std::thread::sleep(Duration::from_millis(10));
        inner.mode = Mode::Standby;

        inner.apply_config(&config)?;
        info!(
            "rf{}: configured {} Hz, SF{}, BW{} kHz, {} dBm",
            rf_chain,
            config.frequency_hz,
            config.spreading_factor.value(),
            config.bandwidth.khz(),
            config.tx_power_dbm
        );

        Ok(Self {
            inner: Mutex::new(inner),
            rx_callback: Mutex::new(None),
            tx_callback: Mutex::new(None),
            tx_done: TxDoneSignal::default(),
            clock,
            rf_chain,
        })
    }

    /// Re-apply a full configuration (radio ends up in standby).
    pub fn apply_config(&self, config: &RadioConfig) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::SLEEP)?;
        std::thread::sleep(Duration::from_millis(10));
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::STDBY)?;
        inner.mode = Mode::Standby;
        inner.apply_config(config)
    }

    /// Currently applied configuration.
    pub fn config(&self) -> RadioConfig {
        self.inner.lock().unwrap().config.clone()
    }

    /// DIO0 rising-edge dispatch.
    ///
    /// Called by the platform interrupt path. Reads the IRQ flags once and
    /// handles RX-done, TX-done and CAD-done. Bounded work only: one FIFO
    /// burst at most, then the callback invocation.
    pub fn handle_interrupt(&self) {
        let dispatch = {
            let mut inner = match self.inner.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };

            let flags = match inner.read_reg(regs::REG_IRQ_FLAGS) {
                Ok(f) => f,
                Err(e) => {
                    warn!("rf{}: IRQ flag read failed: {}", self.rf_chain, e);
                    return;
                }
            };

            if flags & regs::irq::RX_DONE != 0 {
                match inner.read_rx_frame(flags, self.clock.now_us(), self.rf_chain) {
                    Ok(descriptor) => Dispatch::Rx(descriptor),
                    Err(e) => {
                        warn!("rf{}: RX frame read failed: {}", self.rf_chain, e);
                        Dispatch::None
                    }
                }
            } else if flags & regs::irq::TX_DONE != 0 {
                let _ = inner.write_reg(regs::REG_IRQ_FLAGS, regs::irq::TX_DONE);
                let _ = inner.write_reg(
                    regs::REG_OP_MODE,
                    regs::mode::LONG_RANGE | regs::mode::STDBY,
                );
                inner.mode = Mode::Standby;
                Dispatch::TxDone
            } else if flags & regs::irq::CAD_DONE != 0 {
                inner.cad_free = Some(flags & regs::irq::CAD_DETECTED == 0);
                let _ = inner.write_reg(
                    regs::REG_IRQ_FLAGS,
                    regs::irq::CAD_DONE | regs::irq::CAD_DETECTED,
                );
                let _ = inner.write_reg(
                    regs::REG_OP_MODE,
                    regs::mode::LONG_RANGE | regs::mode::STDBY,
                );
                inner.mode = Mode::Standby;
                Dispatch::None
            } else {
                Dispatch::None
            }
        };

        // Callbacks run outside the register mutex.
        match dispatch {
            Dispatch::Rx(descriptor) => {
                if let Some(callback) = self.rx_callback.lock().unwrap().as_mut() {
                    callback(descriptor);
                }
            }
            Dispatch::TxDone => {
                *self.tx_done.state.lock().unwrap() = Some(true);
                self.tx_done.cond.notify_all();
                if let Some(callback) = self.tx_callback.lock().unwrap().as_mut() {
                    callback(true);
                }
            }
            Dispatch::None => {}
        }
    }
}

enum Dispatch {
    Rx(RxDescriptor),
    TxDone,
    None,
}

impl<SPI: SpiDevice> Radio for Sx1276<SPI> {
    fn start_rx(&self, callback: RxCallback) -> Result<(), Error> {
        *self.rx_callback.lock().unwrap() = Some(callback);

        let mut inner = self.inner.lock().unwrap();
        inner.write_reg(regs::REG_IRQ_FLAGS, 0xFF)?;
        inner.write_reg(regs::REG_DIO_MAPPING_1, regs::dio0::RX_DONE)?;
        inner.write_reg(regs::REG_FIFO_ADDR_PTR, 0x00)?;
        inner.write_reg(
            regs::REG_OP_MODE,
            regs::mode::LONG_RANGE | regs::mode::RX_CONTINUOUS,
        )?;
        inner.mode = Mode::RxContinuous;
        debug!("rf{}: continuous RX started", self.rf_chain);
        Ok(())
    }

    fn stop_rx(&self) -> Result<(), Error> {
        *self.rx_callback.lock().unwrap() = None;
        self.set_mode(Mode::Standby)
    }

    fn set_tx_callback(&self, callback: TxCallback) {
        *self.tx_callback.lock().unwrap() = Some(callback);
    }

    fn transmit(&self, frame: TxFrame) -> Result<(), Error> {
        if frame.payload.is_empty() || frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidArgument);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.mode == Mode::Tx {
            return Err(Error::Busy);
        }

        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::STDBY)?;
        inner.mode = Mode::Standby;

        if frame.modulation.frequency_hz != inner.config.frequency_hz {
            inner.set_frequency(frame.modulation.frequency_hz)?;
        }
        inner.set_bandwidth(frame.modulation.bandwidth)?;
        inner.set_spreading_factor(frame.modulation.spreading_factor)?;
        inner.set_coding_rate(frame.modulation.coding_rate)?;
        inner.set_tx_power(frame.tx_power_dbm)?;
        let rx_invert = inner.config.invert_iq_rx;
        inner.set_invert_iq(rx_invert, frame.invert_iq)?;

        inner.write_reg(regs::REG_IRQ_FLAGS, 0xFF)?;
        inner.write_reg(regs::REG_DIO_MAPPING_1, regs::dio0::TX_DONE)?;
        inner.write_reg(regs::REG_FIFO_ADDR_PTR, 0x00)?;
        inner.write_reg(regs::REG_FIFO_TX_BASE_ADDR, 0x00)?;
        inner.write_fifo(&frame.payload)?;
        inner.write_reg(regs::REG_PAYLOAD_LENGTH, frame.payload.len() as u8)?;

        *self.tx_done.state.lock().unwrap() = None;

        if frame.tx_delay_us > 0 {
            // Precise-timing spin happens without the register mutex held.
            drop(inner);
            let start = self.clock.now_us();
            while us_delta(self.clock.now_us(), start) < frame.tx_delay_us as i32 {
                std::hint::spin_loop();
            }
            inner = self.inner.lock().unwrap();
        }

        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::TX)?;
        inner.mode = Mode::Tx;
        debug!(
            "rf{}: TX keyed, {} bytes at {} Hz SF{}",
            self.rf_chain,
            frame.payload.len(),
            frame.modulation.frequency_hz,
            frame.modulation.spreading_factor.value()
        );
        Ok(())
    }

    fn wait_tx_done(&self, timeout: Duration) -> Result<bool, Error> {
        let state = self.tx_done.state.lock().unwrap();
        let (state, result) = self
            .tx_done
            .cond
            .wait_timeout_while(state, timeout, |done| done.is_none())
            .map_err(|_| Error::Timeout)?;
        if result.timed_out() && state.is_none() {
            return Err(Error::Timeout);
        }
        Ok(state.unwrap_or(false))
    }

    fn set_frequency(&self, freq_hz: u32) -> Result<(), Error> {
        self.inner.lock().unwrap().set_frequency(freq_hz)
    }

    fn set_rx_params(&self, sf: SpreadingFactor, bw: Bandwidth) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.set_bandwidth(bw)?;
        inner.set_spreading_factor(sf)
    }

    fn set_mode(&self, mode: Mode) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        // Mode changes clear any pending interrupt before rearming.
        inner.write_reg(regs::REG_IRQ_FLAGS, 0xFF)?;
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | mode.bits())?;
        inner.mode = mode;
        Ok(())
    }

    fn mode(&self) -> Mode {
        self.inner.lock().unwrap().mode
    }

    fn channel_free(&self) -> Result<bool, Error> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.cad_free = None;
            inner.write_reg(regs::REG_IRQ_FLAGS, 0xFF)?;
            inner.write_reg(regs::REG_DIO_MAPPING_1, regs::dio0::CAD_DONE)?;
            inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::CAD)?;
            inner.mode = Mode::Cad;
        }

        // Poll with a millisecond backoff; the lock is released between
        // iterations so the interrupt path can complete the cycle too.
        for _ in 0..CAD_TIMEOUT_MS {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(free) = inner.cad_free.take() {
                    return Ok(free);
                }
                let flags = inner.read_reg(regs::REG_IRQ_FLAGS)?;
                if flags & regs::irq::CAD_DONE != 0 {
                    let free = flags & regs::irq::CAD_DETECTED == 0;
                    inner.write_reg(
                        regs::REG_IRQ_FLAGS,
                        regs::irq::CAD_DONE | regs::irq::CAD_DETECTED,
                    )?;
                    inner.write_reg(
                        regs::REG_OP_MODE,
                        regs::mode::LONG_RANGE | regs::mode::STDBY,
                    )?;
                    inner.mode = Mode::Standby;
                    return Ok(free);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.write_reg(regs::REG_OP_MODE, regs::mode::LONG_RANGE | regs::mode::STDBY)?;
        inner.mode = Mode::Standby;
        Err(Error::Timeout)
    }
}

impl<SPI: SpiDevice> Inner<SPI> {
    fn read_reg(&mut self, reg: u8) -> Result<u8, BusError> {
        let tx = [reg & 0x7F, 0x00];
        let mut rx = [0u8; 2];
        self.spi.transfer(&tx, &mut rx)?;
        Ok(rx[1])
    }

    fn write_reg(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        self.spi.write(&[reg | 0x80, value])
    }

    fn write_fifo(&mut self, data: &[u8]) -> Result<(), BusError> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.push(regs::REG_FIFO | 0x80);
        buf.extend_from_slice(data);
        self.spi.write(&buf)
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, BusError> {
        let tx = vec![regs::REG_FIFO & 0x7F; len + 1];
        let mut rx = vec![0u8; len + 1];
        self.spi.transfer(&tx, &mut rx)?;
        Ok(rx[1..].to_vec())
    }

    /// RX-done path: burst-read the frame and build its descriptor while
    /// the modem stays in continuous receive.
    fn read_rx_frame(
        &mut self,
        flags: u8,
        timestamp_us: u32,
        rf_chain: u8,
    ) -> Result<RxDescriptor, BusError> {
        let length = self.read_reg(regs::REG_RX_NB_BYTES)?;
        let current = self.read_reg(regs::REG_FIFO_RX_CURRENT_ADDR)?;
        self.write_reg(regs::REG_FIFO_ADDR_PTR, current)?;
        let payload = self.read_fifo(length as usize)?;

        let rssi_dbm = i16::from(self.read_reg(regs::REG_PKT_RSSI_VALUE)?) - 157;
        let snr_db = (self.read_reg(regs::REG_PKT_SNR_VALUE)? as i8) / 4;
        let crc_ok = flags & regs::irq::PAYLOAD_CRC_ERROR == 0;

        self.write_reg(
            regs::REG_IRQ_FLAGS,
            regs::irq::RX_DONE | regs::irq::PAYLOAD_CRC_ERROR,
        )?;

        Ok(RxDescriptor {
            payload,
            modulation: Modulation {
                frequency_hz: self.config.frequency_hz,
                bandwidth: self.config.bandwidth,
                spreading_factor: self.config.spreading_factor,
                coding_rate: self.config.coding_rate,
            },
            rssi_dbm,
            snr_db,
            crc_ok,
            hw_timestamp_us: timestamp_us,
            rf_chain,
        })
    }

    fn set_frequency(&mut self, freq_hz: u32) -> Result<(), Error> {
        let frf = (u64::from(freq_hz) << 19) / regs::F_XO_HZ;
        self.write_reg(regs::REG_FRF_MSB, (frf >> 16) as u8)?;
        self.write_reg(regs::REG_FRF_MID, (frf >> 8) as u8)?;
        self.write_reg(regs::REG_FRF_LSB, frf as u8)?;
        self.config.frequency_hz = freq_hz;
        Ok(())
    }

    fn set_spreading_factor(&mut self, sf: SpreadingFactor) -> Result<(), Error> {
        let config2 = self.read_reg(regs::REG_MODEM_CONFIG_2)?;
        self.write_reg(
            regs::REG_MODEM_CONFIG_2,
            (config2 & 0x0F) | (sf.value() << 4),
        )?;

        if sf.value() == 6 {
            self.write_reg(regs::REG_DETECT_OPTIMIZE, regs::DETECT_OPTIMIZE_SF6)?;
            self.write_reg(regs::REG_DETECTION_THRESHOLD, regs::DETECTION_THRESHOLD_SF6)?;
        } else {
            self.write_reg(regs::REG_DETECT_OPTIMIZE, regs::DETECT_OPTIMIZE_SF7_12)?;
            self.write_reg(
                regs::REG_DETECTION_THRESHOLD,
                regs::DETECTION_THRESHOLD_SF7_12,
            )?;
        }

        // Low-data-rate optimize is required for long symbols.
        let config3 = self.read_reg(regs::REG_MODEM_CONFIG_3)?;
        let config3 = if sf.value() >= 11 && self.config.bandwidth == Bandwidth::Khz125 {
            config3 | regs::MODEM_CONFIG3_LOW_DATA_RATE
        } else {
            config3 & !regs::MODEM_CONFIG3_LOW_DATA_RATE
        };
        self.write_reg(regs::REG_MODEM_CONFIG_3, config3)?;

        self.config.spreading_factor = sf;
        Ok(())
    }

    fn set_bandwidth(&mut self, bw: Bandwidth) -> Result<(), Error> {
        let value = match bw {
            Bandwidth::Khz125 => 0x07,
            Bandwidth::Khz250 => 0x08,
            Bandwidth::Khz500 => 0x09,
        };
        let config1 = self.read_reg(regs::REG_MODEM_CONFIG_1)?;
        self.write_reg(regs::REG_MODEM_CONFIG_1, (config1 & 0x0F) | (value << 4))?;
        self.config.bandwidth = bw;
        Ok(())
    }

    fn set_coding_rate(&mut self, cr: CodingRate) -> Result<(), Error> {
        let config1 = self.read_reg(regs::REG_MODEM_CONFIG_1)?;
        self.write_reg(
            regs::REG_MODEM_CONFIG_1,
            (config1 & 0xF1) | (cr.register_value() << 1),
        )?;
        self.config.coding_rate = cr;
        Ok(())
    }

    fn set_tx_power(&mut self, power_dbm: i8) -> Result<(), Error> {
        let power = power_dbm.clamp(2, 20);
        if power > 17 {
            self.write_reg(regs::REG_PA_DAC, regs::PA_DAC_BOOST)?;
            self.write_reg(regs::REG_PA_CONFIG, regs::PA_BOOST | (power - 5) as u8)?;
        } else {
            self.write_reg(regs::REG_PA_DAC, regs::PA_DAC_DEFAULT)?;
            self.write_reg(regs::REG_PA_CONFIG, regs::PA_BOOST | (power - 2) as u8)?;
        }
        self.write_reg(regs::REG_OCP, regs::OCP_100_MA)?;
        self.config.tx_power_dbm = power;
        Ok(())
    }

    fn set_invert_iq(&mut self, invert_rx: bool, invert_tx: bool) -> Result<(), Error> {
        let mut value = self.read_reg(regs::REG_INVERT_IQ)?;
        if invert_rx {
            value |= 0x40;
        } else {
            value &= !0x40;
        }
        if invert_tx {
            value |= 0x01;
        } else {
            value &= !0x01;
        }
        self.write_reg(regs::REG_INVERT_IQ, value)?;
        self.write_reg(
            regs::REG_INVERT_IQ_2,
            if invert_rx || invert_tx { 0x19 } else { 0x1D },
        )?;
        Ok(())
    }

    fn apply_config(&mut self, config: &RadioConfig) -> Result<(), Error> {
        self.set_frequency(config.frequency_hz)?;
        self.set_bandwidth(config.bandwidth)?;
        self.set_spreading_factor(config.spreading_factor)?;
        self.set_coding_rate(config.coding_rate)?;
        self.set_tx_power(config.tx_power_dbm)?;
        self.write_reg(regs::REG_SYNC_WORD, config.sync_word)?;

        self.write_reg(regs::REG_PREAMBLE_MSB, (config.preamble_length >> 8) as u8)?;
        self.write_reg(regs::REG_PREAMBLE_LSB, config.preamble_length as u8)?;

        let config1 = self.read_reg(regs::REG_MODEM_CONFIG_1)?;
        let config1 = if config.implicit_header {
            config1 | regs::MODEM_CONFIG1_IMPLICIT_HEADER
        } else {
            config1 & !regs::MODEM_CONFIG1_IMPLICIT_HEADER
        };
        self.write_reg(regs::REG_MODEM_CONFIG_1, config1)?;

        let config2 = self.read_reg(regs::REG_MODEM_CONFIG_2)?;
        let config2 = if config.crc_on {
            config2 | regs::MODEM_CONFIG2_RX_CRC
        } else {
            config2 & !regs::MODEM_CONFIG2_RX_CRC
        };
        self.write_reg(regs::REG_MODEM_CONFIG_2, config2)?;

        self.write_reg(regs::REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.write_reg(regs::REG_FIFO_RX_BASE_ADDR, 0x00)?;

        let config3 = self.read_reg(regs::REG_MODEM_CONFIG_3)?;
        self.write_reg(regs::REG_MODEM_CONFIG_3, config3 | regs::MODEM_CONFIG3_AGC_AUTO)?;
        self.write_reg(regs::REG_LNA, regs::LNA_MAX_GAIN_BOOST)?;

        self.set_invert_iq(config.invert_iq_rx, config.invert_iq_tx)?;

        self.config = config.clone();
        Ok(())
    }
}
