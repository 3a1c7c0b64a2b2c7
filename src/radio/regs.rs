//! SX1276 LoRa register map and bit definitions.

#![allow(dead_code)]

pub const REG_FIFO: u8 = 0x00;
pub const REG_OP_MODE: u8 = 0x01;
pub const REG_FRF_MSB: u8 = 0x06;
pub const REG_FRF_MID: u8 = 0x07;
pub const REG_FRF_LSB: u8 = 0x08;
pub const REG_PA_CONFIG: u8 = 0x09;
pub const REG_PA_RAMP: u8 = 0x0A;
pub const REG_OCP: u8 = 0x0B;
pub const REG_LNA: u8 = 0x0C;
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;
pub const REG_IRQ_FLAGS_MASK: u8 = 0x11;
pub const REG_IRQ_FLAGS: u8 = 0x12;
pub const REG_RX_NB_BYTES: u8 = 0x13;
pub const REG_MODEM_STAT: u8 = 0x18;
pub const REG_PKT_SNR_VALUE: u8 = 0x19;
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;
pub const REG_RSSI_VALUE: u8 = 0x1B;
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;
pub const REG_SYMB_TIMEOUT_LSB: u8 = 0x1F;
pub const REG_PREAMBLE_MSB: u8 = 0x20;
pub const REG_PREAMBLE_LSB: u8 = 0x21;
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;
pub const REG_MAX_PAYLOAD_LENGTH: u8 = 0x23;
pub const REG_MODEM_CONFIG_3: u8 = 0x26;
pub const REG_DETECT_OPTIMIZE: u8 = 0x31;
pub const REG_INVERT_IQ: u8 = 0x33;
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;
pub const REG_SYNC_WORD: u8 = 0x39;
pub const REG_INVERT_IQ_2: u8 = 0x3B;
pub const REG_DIO_MAPPING_1: u8 = 0x40;
pub const REG_DIO_MAPPING_2: u8 = 0x41;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PA_DAC: u8 = 0x4D;

/// Operating mode bits (REG_OP_MODE).
pub mod mode {
    pub const LONG_RANGE: u8 = 0x80;
    pub const SLEEP: u8 = 0x00;
    pub const STDBY: u8 = 0x01;
    pub const FSTX: u8 = 0x02;
    pub const TX: u8 = 0x03;
    pub const FSRX: u8 = 0x04;
    pub const RX_CONTINUOUS: u8 = 0x05;
    pub const RX_SINGLE: u8 = 0x06;
    pub const CAD: u8 = 0x07;
}

/// IRQ flag bits (REG_IRQ_FLAGS).
pub mod irq {
    pub const CAD_DETECTED: u8 = 0x01;
    pub const FHSS_CHANGE_CHANNEL: u8 = 0x02;
    pub const CAD_DONE: u8 = 0x04;
    pub const TX_DONE: u8 = 0x08;
    pub const VALID_HEADER: u8 = 0x10;
    pub const PAYLOAD_CRC_ERROR: u8 = 0x20;
    pub const RX_DONE: u8 = 0x40;
    pub const RX_TIMEOUT: u8 = 0x80;
}

/// DIO0 mapping values (REG_DIO_MAPPING_1, bits 7:6).
pub mod dio0 {
    pub const RX_DONE: u8 = 0x00;
    pub const TX_DONE: u8 = 0x40;
    pub const CAD_DONE: u8 = 0x80;
}

/// PA_BOOST output pin select (REG_PA_CONFIG bit 7).
pub const PA_BOOST: u8 = 0x80;

/// PA_DAC values: default, and +20 dBm boost.
pub const PA_DAC_DEFAULT: u8 = 0x84;
pub const PA_DAC_BOOST: u8 = 0x87;

/// Overcurrent protection trim for ~100 mA.
pub const OCP_100_MA: u8 = 0x2B;

/// Modem config 1 bits.
pub const MODEM_CONFIG1_IMPLICIT_HEADER: u8 = 0x01;
/// Modem config 2 bits.
pub const MODEM_CONFIG2_RX_CRC: u8 = 0x04;
/// Modem config 3 bits.
pub const MODEM_CONFIG3_LOW_DATA_RATE: u8 = 0x08;
pub const MODEM_CONFIG3_AGC_AUTO: u8 = 0x04;

/// LNA: maximum gain with HF boost.
pub const LNA_MAX_GAIN_BOOST: u8 = 0x23;

/// Detection optimize / threshold pairs.
pub const DETECT_OPTIMIZE_SF6: u8 = 0x05;
pub const DETECT_OPTIMIZE_SF7_12: u8 = 0x03;
pub const DETECTION_THRESHOLD_SF6: u8 = 0x0C;
pub const DETECTION_THRESHOLD_SF7_12: u8 = 0x0A;

/// Expected content of REG_VERSION for the SX1276 family.
pub const CHIP_VERSION: u8 = 0x12;

/// Crystal oscillator frequency in Hz; FRF = freq * 2^19 / F_XO.
pub const F_XO_HZ: u64 = 32_000_000;
