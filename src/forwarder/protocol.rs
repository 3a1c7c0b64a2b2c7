//! Semtech UDP packet-forwarder wire framing (protocol version 2).
//!
//! Every datagram starts with a 4-byte header: version, big-endian token,
//! packet type. Gateway-originated types carry the 8-byte gateway EUI next;
//! a UTF-8 JSON payload may follow. The JSON is appended as a byte run of
//! exactly its length, with no terminator.

use std::fmt;

pub const PROTOCOL_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 4;
pub const EUI_LEN: usize = 8;

/// Datagram type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::PushData),
            0x01 => Some(Self::PushAck),
            0x02 => Some(Self::PullData),
            0x03 => Some(Self::PullResp),
            0x04 => Some(Self::PullAck),
            0x05 => Some(Self::TxAck),
            _ => None,
        }
    }
}

/// Error codes reported to the server in a TX_ACK `txpk_ack` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAckError {
    InvalidJson,
    MissingTxpk,
    TxFailed,
    TooLate,
    TooEarly,
}

impl TxAckError {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::MissingTxpk => "MISSING_TXPK",
            Self::TxFailed => "TX_FAILED",
            Self::TooLate => "TOO_LATE",
            Self::TooEarly => "TOO_EARLY",
        }
    }
}

impl fmt::Display for TxAckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Malformed incoming datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    Truncated { len: usize },
    BadVersion { version: u8 },
    UnknownType { code: u8 },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "datagram too short: {} bytes", len),
            Self::BadVersion { version } => write!(f, "unsupported protocol version {}", version),
            Self::UnknownType { code } => write!(f, "unknown packet type 0x{:02X}", code),
        }
    }
}

impl std::error::Error for FrameError {}

/// Parsed datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub token: u16,
    pub packet_type: PacketType,
}

/// Parse the 4-byte header of an incoming datagram.
pub fn parse_header(buf: &[u8]) -> Result<Header, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated { len: buf.len() });
    }
    if buf[0] != PROTOCOL_VERSION {
        return Err(FrameError::BadVersion { version: buf[0] });
    }
    let token = u16::from_be_bytes([buf[1], buf[2]]);
    let packet_type = PacketType::from_byte(buf[3]).ok_or(FrameError::UnknownType { code: buf[3] })?;
    Ok(Header { token, packet_type })
}

/// Payload bytes following the header of a PULL_RESP (no EUI on this type).
pub fn pull_resp_payload(buf: &[u8]) -> &[u8] {
    &buf[HEADER_LEN.min(buf.len())..]
}

fn push_header(buf: &mut Vec<u8>, token: u16, packet_type: PacketType) {
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&token.to_be_bytes());
    buf.push(packet_type as u8);
}

/// PULL_DATA keepalive: header + EUI, 12 bytes.
pub fn build_pull_data(token: u16, eui: &[u8; EUI_LEN]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + EUI_LEN);
    push_header(&mut buf, token, PacketType::PullData);
    buf.extend_from_slice(eui);
    buf
}

/// PUSH_DATA: header + EUI + JSON payload.
pub fn build_push_data(token: u16, eui: &[u8; EUI_LEN], json: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + EUI_LEN + json.len());
    push_header(&mut buf, token, PacketType::PushData);
    buf.extend_from_slice(eui);
    buf.extend_from_slice(json);
    buf
}

/// TX_ACK: header + EUI, plus a `txpk_ack` JSON object when reporting an
/// error. The token echoes the PULL_RESP being acknowledged.
pub fn build_tx_ack(token: u16, eui: &[u8; EUI_LEN], error: Option<TxAckError>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + EUI_LEN + 40);
    push_header(&mut buf, token, PacketType::TxAck);
    buf.extend_from_slice(eui);
    if let Some(error) = error {
        let json = format!(r#"{{"txpk_ack":{{"error":"{}"}}}}"#, error.code());
        buf.extend_from_slice(json.as_bytes());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUI: [u8; 8] = [0x24, 0x6F, 0x28, 0xFF, 0xFE, 0xAB, 0xCD, 0xEF];

    #[test]
    fn test_parse_header() {
        let header = parse_header(&[0x02, 0x12, 0x34, 0x04]).unwrap();
        assert_eq!(header.token, 0x1234);
        assert_eq!(header.packet_type, PacketType::PullAck);
    }

    #[test]
    fn test_parse_header_errors() {
        assert_eq!(
            parse_header(&[0x02, 0x00]),
            Err(FrameError::Truncated { len: 2 })
        );
        assert_eq!(
            parse_header(&[0x01, 0x00, 0x00, 0x04]),
            Err(FrameError::BadVersion { version: 0x01 })
        );
        assert_eq!(
            parse_header(&[0x02, 0x00, 0x00, 0x09]),
            Err(FrameError::UnknownType { code: 0x09 })
        );
    }

    #[test]
    fn test_pull_data_layout() {
        let datagram = build_pull_data(0xBEEF, &EUI);
        assert_eq!(datagram.len(), 12);
        assert_eq!(datagram[0], 0x02);
        assert_eq!(&datagram[1..3], &[0xBE, 0xEF]);
        assert_eq!(datagram[3], PacketType::PullData as u8);
        assert_eq!(&datagram[4..12], &EUI);
    }

    #[test]
    fn test_push_data_carries_json_exactly() {
        let json = br#"{"rxpk":[]}"#;
        let datagram = build_push_data(1, &EUI, json);
        assert_eq!(datagram.len(), 12 + json.len());
        assert_eq!(&datagram[12..], json);
        // No trailing NUL.
        assert_ne!(*datagram.last().unwrap(), 0);
    }

    #[test]
    fn test_tx_ack_without_error_has_no_json() {
        let datagram = build_tx_ack(7, &EUI, None);
        assert_eq!(datagram.len(), 12);
        assert_eq!(datagram[3], PacketType::TxAck as u8);
    }

    #[test]
    fn test_tx_ack_error_json() {
        let datagram = build_tx_ack(7, &EUI, Some(TxAckError::TooLate));
        let json = std::str::from_utf8(&datagram[12..]).unwrap();
        assert_eq!(json, r#"{"txpk_ack":{"error":"TOO_LATE"}}"#);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(TxAckError::InvalidJson.code(), "INVALID_JSON");
        assert_eq!(TxAckError::MissingTxpk.code(), "MISSING_TXPK");
        assert_eq!(TxAckError::TxFailed.code(), "TX_FAILED");
        assert_eq!(TxAckError::TooLate.code(), "TOO_LATE");
        assert_eq!(TxAckError::TooEarly.code(), "TOO_EARLY");
    }
}
