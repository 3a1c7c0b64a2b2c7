//! End-to-end gateway scenarios against a loopback UDP network server.
//!
//! A mock radio pair stands in for the SX1276 hardware; everything from the
//! RX descriptor intake through UDP datagrams on the wire is real.

use lora_gateway_esp32::forwarder::protocol;
use lora_gateway_esp32::forwarder::{ForwarderConfig, PacketForwarder};
use lora_gateway_esp32::link::HostLink;
use lora_gateway_esp32::packet::{
    Bandwidth, CodingRate, Modulation, RxDescriptor, SpreadingFactor,
};
use lora_gateway_esp32::radio::{
    BusError, Error, Mode, Radio, RxCallback, SpiDevice, Sx1276, TxCallback, TxFrame,
};
use lora_gateway_esp32::time::StdClock;
use lora_gateway_esp32::{Gateway, GatewayOptions, RadioConfig};
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const EUI: [u8; 8] = [0x24, 0x6F, 0x28, 0xFF, 0xFE, 0xAB, 0xCD, 0xEF];

struct MockRadio {
    mode: Mutex<Mode>,
    rx_callback: Mutex<Option<RxCallback>>,
    transmitted: Mutex<Vec<TxFrame>>,
}

impl MockRadio {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(Mode::Sleep),
            rx_callback: Mutex::new(None),
            transmitted: Mutex::new(Vec::new()),
        })
    }
}

impl Radio for MockRadio {
    fn start_rx(&self, callback: RxCallback) -> Result<(), Error> {
        *self.rx_callback.lock().unwrap() = Some(callback);
        *self.mode.lock().unwrap() = Mode::RxContinuous;
        Ok(())
    }

    fn stop_rx(&self) -> Result<(), Error> {
        *self.rx_callback.lock().unwrap() = None;
        Ok(())
    }

    fn set_tx_callback(&self, _callback: TxCallback) {}

    fn transmit(&self, frame: TxFrame) -> Result<(), Error> {
        self.transmitted.lock().unwrap().push(frame);
        Ok(())
    }

    fn wait_tx_done(&self, _timeout: Duration) -> Result<bool, Error> {
        Ok(true)
    }

    fn set_frequency(&self, _freq_hz: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_rx_params(&self, _sf: SpreadingFactor, _bw: Bandwidth) -> Result<(), Error> {
        Ok(())
    }

    fn set_mode(&self, mode: Mode) -> Result<(), Error> {
        *self.mode.lock().unwrap() = mode;
        Ok(())
    }

    fn mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    fn channel_free(&self) -> Result<bool, Error> {
        Ok(true)
    }
}

struct Harness {
    gateway: Arc<Gateway>,
    forwarder: Arc<PacketForwarder>,
    tx_radio: Arc<MockRadio>,
    server: UdpSocket,
}

fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = UdpSocket::bind("127.0.0.1:0").expect("server socket");
    server
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let rx_radio = MockRadio::new();
    let tx_radio = MockRadio::new();
    let clock = Arc::new(StdClock::new());

    let gateway = Arc::new(Gateway::new(
        rx_radio,
        tx_radio.clone(),
        clock.clone(),
        GatewayOptions::default(),
    ));
    gateway.start().expect("gateway start");

    let forwarder = Arc::new(PacketForwarder::new(
        ForwarderConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: port,
            gateway_eui: EUI,
            keepalive_interval_ms: 10_000,
            stat_interval_ms: 30_000,
        },
        Arc::new(HostLink::new()),
        clock,
        gateway.stats_handle(),
        gateway.clone(),
    ));
    {
        let forwarder = forwarder.clone();
        gateway.set_uplink_handler(Box::new(move |descriptor| {
            forwarder.submit_uplink(descriptor);
        }));
    }
    forwarder.start().expect("forwarder start");

    Harness {
        gateway,
        forwarder,
        tx_radio,
        server,
    }
}

fn recv_datagram(server: &UdpSocket) -> (Vec<u8>, std::net::SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, from) = server.recv_from(&mut buf).expect("datagram from gateway");
    (buf[..len].to_vec(), from)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn uplink_descriptor() -> RxDescriptor {
    RxDescriptor {
        payload: vec![
            0x40, 0x11, 0x22, 0x33, 0x44, 0x80, 0x01, 0x00, 0x01, 0xAB, 0xCD, 0xEF, 0x01, 0x02,
            0x03,
        ],
        modulation: Modulation {
            frequency_hz: 916_800_000,
            bandwidth: Bandwidth::Khz125,
            spreading_factor: SpreadingFactor::new(7).unwrap(),
            coding_rate: CodingRate::Cr4_5,
        },
        rssi_dbm: -39,
        snr_db: 10,
        crc_ok: true,
        hw_timestamp_us: 123_456,
        rf_chain: 0,
    }
}

#[test]
fn test_gateway_to_server_flow() {
    let h = harness();

    // The forwarder announces itself with a PULL_DATA keepalive.
    let (pull_data, gw_addr) = recv_datagram(&h.server);
    assert_eq!(pull_data.len(), 12);
    assert_eq!(pull_data[0], 0x02);
    assert_eq!(pull_data[3], protocol::PacketType::PullData as u8);
    assert_eq!(&pull_data[4..12], &EUI);

    // A PULL_ACK marks the server connected.
    let mut pull_ack = vec![0x02, pull_data[1], pull_data[2], 0x04];
    h.server.send_to(&pull_ack, gw_addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || h.forwarder.is_connected()));

    // Uplink: a received frame becomes a PUSH_DATA rxpk entry.
    h.gateway.rx_sink().deliver(uplink_descriptor());

    let (push_data, _) = recv_datagram(&h.server);
    assert_eq!(push_data[0], 0x02);
    assert_eq!(push_data[3], protocol::PacketType::PushData as u8);
    assert_eq!(&push_data[4..12], &EUI);

    let json: serde_json::Value = serde_json::from_slice(&push_data[12..]).unwrap();
    let rxpk = &json["rxpk"][0];
    assert_eq!(rxpk["tmst"], 123_456);
    assert_eq!(rxpk["freq"], 916.8);
    assert_eq!(rxpk["datr"], "SF7BW125");
    assert_eq!(rxpk["codr"], "4/5");
    assert_eq!(rxpk["rssi"], -39);
    assert_eq!(rxpk["lsnr"], 10.0);
    assert_eq!(rxpk["size"], 15);
    assert_eq!(rxpk["data"], "QBEiM0SAAQABq83vAQID");

    // Acknowledge the uplink (exercises the push-ack accounting).
    pull_ack[3] = 0x01;
    h.server.send_to(&pull_ack, gw_addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        h.forwarder.status().push_ack_count == 1
    }));

    // Downlink: PULL_RESP with an immediate txpk transmits and is acked.
    let txpk = br#"{"txpk":{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":11,"data":"SGVsbG8gV29ybGQ="}}"#;
    let mut pull_resp = vec![0x02, 0xAB, 0xCD, 0x03];
    pull_resp.extend_from_slice(txpk);
    h.server.send_to(&pull_resp, gw_addr).unwrap();

    let (tx_ack, _) = recv_datagram(&h.server);
    assert_eq!(tx_ack[3], protocol::PacketType::TxAck as u8);
    assert_eq!(&tx_ack[1..3], &[0xAB, 0xCD]);
    // No error object on success.
    assert_eq!(tx_ack.len(), 12);

    assert!(wait_until(Duration::from_secs(2), || {
        !h.tx_radio.transmitted.lock().unwrap().is_empty()
    }));
    let transmitted = h.tx_radio.transmitted.lock().unwrap();
    let frame = &transmitted[0];
    assert_eq!(frame.payload, b"Hello World");
    assert_eq!(frame.modulation.frequency_hz, 923_300_000);
    assert_eq!(frame.modulation.spreading_factor.value(), 12);
    assert_eq!(frame.modulation.bandwidth, Bandwidth::Khz500);
    assert!(frame.invert_iq);
    drop(transmitted);

    assert!(wait_until(Duration::from_secs(2), || {
        h.gateway.stats().tx_ok == 1
    }));

    h.forwarder.stop();
    h.gateway.stop();
}

#[test]
fn test_malformed_pull_resp_gets_error_ack() {
    let h = harness();

    let (_, gw_addr) = recv_datagram(&h.server);

    let mut pull_resp = vec![0x02, 0x00, 0x07, 0x03];
    pull_resp.extend_from_slice(b"{not valid json");
    h.server.send_to(&pull_resp, gw_addr).unwrap();

    let (tx_ack, _) = recv_datagram(&h.server);
    assert_eq!(tx_ack[3], protocol::PacketType::TxAck as u8);
    let json: serde_json::Value = serde_json::from_slice(&tx_ack[12..]).unwrap();
    assert_eq!(json["txpk_ack"]["error"], "INVALID_JSON");

    // Nothing reached the TX radio.
    assert!(h.tx_radio.transmitted.lock().unwrap().is_empty());

    h.forwarder.stop();
    h.gateway.stop();
}

/// SPI device whose chip never answers with the right version.
struct AbsentChipSpi {
    writes: Arc<Mutex<u32>>,
}

impl SpiDevice for AbsentChipSpi {
    fn transfer(&mut self, _tx: &[u8], rx: &mut [u8]) -> Result<(), BusError> {
        rx.fill(0x00);
        Ok(())
    }

    fn write(&mut self, _tx: &[u8]) -> Result<(), BusError> {
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}

#[test]
fn test_absent_chip_aborts_init() {
    let writes = Arc::new(Mutex::new(0));
    let spi = AbsentChipSpi {
        writes: writes.clone(),
    };

    let result = Sx1276::init(spi, RadioConfig::default(), Arc::new(StdClock::new()), 0);
    match result {
        Err(Error::ChipAbsent { found }) => assert_eq!(found, 0x00),
        _ => panic!("expected ChipAbsent"),
    }
    // No register writes were attempted after the failed probe.
    assert_eq!(*writes.lock().unwrap(), 0);
}
