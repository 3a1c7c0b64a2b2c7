//! JSON bodies of the packet-forwarder protocol.
//!
//! Uplinks become `rxpk` array entries, periodic statistics a `stat`
//! object, and PULL_RESP downlinks arrive as a `txpk` object that decodes
//! into a [`TxRequest`]. The wire format is fixed by the Semtech protocol;
//! field names and value encodings must not change.

use super::protocol::TxAckError;
use crate::packet::{
    Bandwidth, CodingRate, Modulation, RxDescriptor, SpreadingFactor, StatsSnapshot, TxRequest,
    TxSchedule, MAX_PAYLOAD_SIZE,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One uplink entry of a PUSH_DATA `rxpk` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rxpk {
    pub tmst: u32,
    /// Centre frequency in MHz.
    pub freq: f64,
    pub chan: u8,
    pub rfch: u8,
    pub stat: String,
    pub modu: String,
    pub datr: String,
    pub codr: String,
    pub rssi: i16,
    pub lsnr: f64,
    pub size: u8,
    pub data: String,
}

#[derive(Serialize)]
struct PushRxpk<'a> {
    rxpk: &'a [Rxpk],
}

/// `stat` object of a statistics PUSH_DATA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stat {
    pub time: String,
    pub rxnb: u32,
    pub rxok: u32,
    pub rxfw: u32,
    pub ackr: f64,
    pub dwnb: u32,
    pub txnb: u32,
}

#[derive(Serialize)]
struct PushStat<'a> {
    stat: &'a Stat,
}

/// `txpk` object of a PULL_RESP.
#[derive(Debug, Clone, Deserialize)]
pub struct Txpk {
    #[serde(default)]
    pub imme: bool,
    #[serde(default)]
    pub tmst: Option<u32>,
    pub freq: f64,
    #[serde(default = "default_tx_power")]
    pub powe: i8,
    pub datr: String,
    pub codr: String,
    #[serde(default)]
    pub ipol: bool,
    #[serde(default)]
    pub size: Option<u8>,
    pub data: String,
}

fn default_tx_power() -> i8 {
    14
}

#[derive(Deserialize)]
struct PullResp {
    txpk: Option<Txpk>,
}

/// Format a data-rate string, e.g. `SF7BW125`.
pub fn format_datr(sf: SpreadingFactor, bw: Bandwidth) -> String {
    format!("SF{}BW{}", sf.value(), bw.khz())
}

/// Parse a data-rate string of the form `SF<n>BW<khz>`.
pub fn parse_datr(datr: &str) -> Option<(SpreadingFactor, Bandwidth)> {
    let rest = datr.strip_prefix("SF")?;
    let bw_pos = rest.find("BW")?;
    let sf: u8 = rest[..bw_pos].parse().ok()?;
    let khz: u32 = rest[bw_pos + 2..].parse().ok()?;
    Some((SpreadingFactor::new(sf)?, Bandwidth::from_khz(khz)?))
}

/// Format a coding-rate string, e.g. `4/5`.
pub fn format_codr(cr: CodingRate) -> String {
    format!("4/{}", cr.denominator())
}

/// Parse a coding-rate string of the form `4/<n>`.
pub fn parse_codr(codr: &str) -> Option<CodingRate> {
    let denominator = codr.strip_prefix("4/")?.parse().ok()?;
    CodingRate::from_denominator(denominator)
}

/// Build the `rxpk` entry for one received frame.
pub fn rxpk_from_descriptor(descriptor: &RxDescriptor) -> Rxpk {
    Rxpk {
        tmst: descriptor.hw_timestamp_us,
        freq: f64::from(descriptor.modulation.frequency_hz) / 1e6,
        chan: descriptor.rf_chain,
        rfch: descriptor.rf_chain,
        stat: if descriptor.crc_ok { "OK" } else { "CRC" }.to_string(),
        modu: "LORA".to_string(),
        datr: format_datr(
            descriptor.modulation.spreading_factor,
            descriptor.modulation.bandwidth,
        ),
        codr: format_codr(descriptor.modulation.coding_rate),
        rssi: descriptor.rssi_dbm,
        lsnr: f64::from(descriptor.snr_db),
        size: descriptor.payload.len() as u8,
        data: BASE64.encode(&descriptor.payload),
    }
}

/// Serialize a PUSH_DATA uplink body: `{"rxpk":[...]}`.
pub fn rxpk_json(rxpk: &[Rxpk]) -> String {
    serde_json::to_string(&PushRxpk { rxpk }).expect("rxpk serialization is infallible")
}

/// Serialize a PUSH_DATA statistics body: `{"stat":{...}}`.
pub fn stat_json(stat: &Stat) -> String {
    serde_json::to_string(&PushStat { stat }).expect("stat serialization is infallible")
}

/// Build the `stat` object from a counter snapshot.
pub fn stat_from_snapshot(time: String, snapshot: &StatsSnapshot, ackr: f64) -> Stat {
    Stat {
        time,
        rxnb: snapshot.rx_total,
        rxok: snapshot.rx_ok,
        rxfw: snapshot.rx_forwarded,
        ackr,
        dwnb: snapshot.tx_total,
        txnb: snapshot.tx_ok,
    }
}

/// Decode a PULL_RESP JSON body into a transmit request.
pub fn decode_pull_resp(payload: &[u8]) -> Result<TxRequest, TxAckError> {
    let resp: PullResp =
        serde_json::from_slice(payload).map_err(|_| TxAckError::InvalidJson)?;
    let txpk = resp.txpk.ok_or(TxAckError::MissingTxpk)?;
    txpk_to_request(&txpk)
}

fn txpk_to_request(txpk: &Txpk) -> Result<TxRequest, TxAckError> {
    let (spreading_factor, bandwidth) =
        parse_datr(&txpk.datr).ok_or(TxAckError::InvalidJson)?;
    let coding_rate = parse_codr(&txpk.codr).ok_or(TxAckError::InvalidJson)?;

    let payload = BASE64
        .decode(&txpk.data)
        .map_err(|_| TxAckError::InvalidJson)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(TxAckError::InvalidJson);
    }

    let schedule = if txpk.imme {
        TxSchedule::Immediate
    } else if let Some(tmst) = txpk.tmst {
        TxSchedule::At(tmst)
    } else {
        TxSchedule::Immediate
    };

    Ok(TxRequest {
        payload,
        modulation: Modulation {
            frequency_hz: (txpk.freq * 1e6).round() as u32,
            bandwidth,
            spreading_factor,
            coding_rate,
        },
        tx_power_dbm: txpk.powe,
        schedule,
        invert_iq: txpk.ipol,
    })
}
