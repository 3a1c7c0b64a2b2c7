//! Semtech UDP packet-forwarder engine.
//!
//! Owns the single UDP socket and the four protocol workers: the receive
//! loop, the uplink batcher, the PULL_DATA keepalive and the statistics
//! report. Downlinks decoded from PULL_RESP go to a [`DownlinkSink`]; the
//! resulting TX_ACK carries the precise rejection code when scheduling
//! fails.

pub mod frames;
pub mod protocol;

use crate::channel_manager::ScheduleError;
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::link::LinkState;
use crate::packet::{ForwarderStatus, GatewayStats, RxDescriptor, TxRequest};
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::time::{us_delta, MonotonicClock};
use chrono::Utc;
use log::{debug, info, warn};
use protocol::{PacketType, TxAckError};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Uplink queue between the gateway core and the batcher.
pub const UPLINK_QUEUE_CAPACITY: usize = 32;
/// Maximum `rxpk` entries per PUSH_DATA datagram.
pub const UPLINK_BATCH_MAX: usize = 8;
/// Outbound datagram cap.
pub const UDP_BUFFER_SIZE: usize = 2048;
/// Server is declared lost after this long without a PULL_ACK.
pub const LIVENESS_TIMEOUT_US: i32 = 30_000_000;
/// Socket receive timeout, so the receive loop can observe shutdown.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);
/// Wait on the first batched uplink; the rest are taken non-blocking.
const BATCH_FIRST_WAIT: Duration = Duration::from_millis(100);

/// Forwarder-side settings, usually taken from the durable configuration.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    pub server_host: String,
    pub server_port: u16,
    pub gateway_eui: [u8; 8],
    pub keepalive_interval_ms: u32,
    pub stat_interval_ms: u32,
}

impl ForwarderConfig {
    pub fn from_gateway_config(config: &GatewayConfig) -> Self {
        Self {
            server_host: config.server.host.clone(),
            server_port: config.server.port,
            gateway_eui: config.gateway_eui,
            keepalive_interval_ms: config.server.keepalive_interval_ms,
            stat_interval_ms: config.server.stat_interval_ms,
        }
    }
}

/// Accepts decoded downlinks for transmission.
pub trait DownlinkSink: Send + Sync {
    fn submit(&self, request: TxRequest) -> Result<(), ScheduleError>;
}

impl DownlinkSink for Gateway {
    fn submit(&self, request: TxRequest) -> Result<(), ScheduleError> {
        self.schedule_downlink(request)
    }
}

/// Forwarder start-up errors.
#[derive(Debug)]
pub enum ForwarderError {
    Resolve(String),
    Io(std::io::Error),
}

impl fmt::Display for ForwarderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve(host) => write!(f, "cannot resolve server address: {}", host),
            Self::Io(e) => write!(f, "socket error: {}", e),
        }
    }
}

impl std::error::Error for ForwarderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ForwarderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[derive(Default)]
struct Status {
    connected: bool,
    push_ack: u32,
    pull_ack: u32,
    last_pull_ack_us: Option<u32>,
}

#[derive(Default)]
struct AckrWindow {
    prev_sent: u32,
    prev_ack: u32,
}

struct Shared {
    config: ForwarderConfig,
    link: Arc<dyn LinkState>,
    clock: Arc<dyn MonotonicClock>,
    stats: Arc<GatewayStats>,
    downlink: Arc<dyn DownlinkSink>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    server_addr: Mutex<Option<SocketAddr>>,
    status: Mutex<Status>,
    push_token: AtomicU16,
    pull_token: AtomicU16,
    push_sent: AtomicU32,
    link_dropped: AtomicU32,
    ackr_window: Mutex<AckrWindow>,
    running: AtomicBool,
}

impl Shared {
    fn next_push_token(&self) -> u16 {
        self.push_token.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn next_pull_token(&self) -> u16 {
        self.pull_token.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Send one datagram to the server. Sends are suppressed while the link
    /// is down; the receive loop keeps running regardless.
    fn send_datagram(&self, datagram: &[u8]) -> bool {
        if !self.link.is_connected() {
            self.link_dropped.fetch_add(1, Ordering::Relaxed);
            debug!("link down, datagram dropped");
            return false;
        }

        let socket = match self.socket.lock().unwrap().clone() {
            Some(socket) => socket,
            None => return false,
        };
        let addr = match *self.server_addr.lock().unwrap() {
            Some(addr) => addr,
            None => return false,
        };

        match socket.send_to(datagram, addr) {
            Ok(sent) if sent == datagram.len() => true,
            Ok(sent) => {
                warn!("short send: {} of {} bytes", sent, datagram.len());
                false
            }
            Err(e) => {
                warn!("send failed: {}", e);
                false
            }
        }
    }

    fn send_pull_data(&self) {
        let token = self.next_pull_token();
        let datagram = protocol::build_pull_data(token, &self.config.gateway_eui);
        if self.send_datagram(&datagram) {
            debug!("PULL_DATA sent (token {:04X})", token);
        }
    }

    /// Encode and send a batch of uplinks, splitting into multiple
    /// datagrams when the buffer cap would be exceeded.
    fn send_push_rxpk(&self, batch: &[RxDescriptor]) {
        let entries: Vec<frames::Rxpk> = batch.iter().map(frames::rxpk_from_descriptor).collect();
        let mut start = 0;

        while start < entries.len() {
            let mut end = start + 1;
            let mut json = frames::rxpk_json(&entries[start..end]);
            while end < entries.len() {
                let candidate = frames::rxpk_json(&entries[start..end + 1]);
                if protocol::HEADER_LEN + protocol::EUI_LEN + candidate.len() > UDP_BUFFER_SIZE {
                    break;
                }
                json = candidate;
                end += 1;
            }

            let token = self.next_push_token();
            let datagram =
                protocol::build_push_data(token, &self.config.gateway_eui, json.as_bytes());
            if self.send_datagram(&datagram) {
                self.push_sent.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .rx_forwarded
                    .fetch_add((end - start) as u32, Ordering::Relaxed);
                info!(
                    "PUSH_DATA sent ({} uplinks, {} bytes)",
                    end - start,
                    datagram.len()
                );
            }
            start = end;
        }
    }

    fn send_stat(&self) {
        let snapshot = self.stats.snapshot();
        let ackr = self.ackr_for_interval();
        let time = Utc::now().format("%Y-%m-%d %H:%M:%S GMT").to_string();
        let stat = frames::stat_from_snapshot(time, &snapshot, ackr);
        let json = frames::stat_json(&stat);

        let token = self.next_push_token();
        let datagram = protocol::build_push_data(token, &self.config.gateway_eui, json.as_bytes());
        if self.send_datagram(&datagram) {
            self.push_sent.fetch_add(1, Ordering::Relaxed);
            debug!(
                "stat sent: rxnb={} rxfw={} ackr={:.1}",
                snapshot.rx_total, snapshot.rx_forwarded, ackr
            );
        }
    }

    /// PUSH_ACK ratio over the window since the previous stat report.
    fn ackr_for_interval(&self) -> f64 {
        let sent = self.push_sent.load(Ordering::Relaxed);
        let acked = self.status.lock().unwrap().push_ack;

        let mut window = self.ackr_window.lock().unwrap();
        let delta_sent = sent.wrapping_sub(window.prev_sent);
        let delta_ack = acked.wrapping_sub(window.prev_ack);
        window.prev_sent = sent;
        window.prev_ack = acked;

        let ratio = 100.0 * f64::from(delta_ack) / f64::from(delta_sent.max(1));
        ratio.clamp(0.0, 100.0)
    }

    /// Dispatch one datagram received from the server.
    fn process_datagram(&self, datagram: &[u8]) {
        let header = match protocol::parse_header(datagram) {
            Ok(header) => header,
            Err(e) => {
                warn!("bad datagram: {}", e);
                return;
            }
        };

        match header.packet_type {
            PacketType::PushAck => {
                debug!("PUSH_ACK (token {:04X})", header.token);
                self.status.lock().unwrap().push_ack += 1;
            }
            PacketType::PullAck => {
                debug!("PULL_ACK (token {:04X})", header.token);
                let mut status = self.status.lock().unwrap();
                status.pull_ack += 1;
                status.last_pull_ack_us = Some(self.clock.now_us());
                if !status.connected {
                    info!("server connected");
                    status.connected = true;
                }
            }
            PacketType::PullResp => {
                info!("PULL_RESP received ({} bytes)", datagram.len());
                self.handle_pull_resp(header.token, protocol::pull_resp_payload(datagram));
            }
            other => {
                warn!("unexpected packet type from server: {:?}", other);
            }
        }
    }

    fn handle_pull_resp(&self, token: u16, payload: &[u8]) {
        let ack_error = match frames::decode_pull_resp(payload) {
            Ok(request) => match self.downlink.submit(request) {
                Ok(()) => None,
                Err(e) => {
                    warn!("downlink rejected: {}", e);
                    Some(schedule_error_code(e))
                }
            },
            Err(code) => {
                warn!("PULL_RESP decode failed: {}", code);
                Some(code)
            }
        };
        self.send_tx_ack(token, ack_error);
    }

    fn send_tx_ack(&self, token: u16, error: Option<TxAckError>) {
        let datagram = protocol::build_tx_ack(token, &self.config.gateway_eui, error);
        if self.send_datagram(&datagram) {
            debug!(
                "TX_ACK sent ({})",
                error.map(|e| e.code()).unwrap_or("no error")
            );
        }
    }

    /// Drop the connected flag when PULL_ACKs stop arriving.
    fn check_liveness(&self) {
        let now = self.clock.now_us();
        let mut status = self.status.lock().unwrap();
        if let Some(last) = status.last_pull_ack_us {
            if status.connected && us_delta(now, last) > LIVENESS_TIMEOUT_US {
                warn!("server connection lost (no PULL_ACK for 30 s)");
                status.connected = false;
            }
        }
    }
}

fn schedule_error_code(error: ScheduleError) -> TxAckError {
    match error {
        ScheduleError::TooLate => TxAckError::TooLate,
        ScheduleError::TooEarly => TxAckError::TooEarly,
        ScheduleError::QueueFull | ScheduleError::NotRunning => TxAckError::TxFailed,
    }
}

/// The packet-forwarder protocol engine.
pub struct PacketForwarder {
    shared: Arc<Shared>,
    uplink_tx: Mutex<QueueSender<RxDescriptor>>,
    uplink_rx: Mutex<Option<QueueReceiver<RxDescriptor>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PacketForwarder {
    pub fn new(
        config: ForwarderConfig,
        link: Arc<dyn LinkState>,
        clock: Arc<dyn MonotonicClock>,
        stats: Arc<GatewayStats>,
        downlink: Arc<dyn DownlinkSink>,
    ) -> Self {
        let (uplink_tx, uplink_rx) = queue::bounded(UPLINK_QUEUE_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                config,
                link,
                clock,
                stats,
                downlink,
                socket: Mutex::new(None),
                server_addr: Mutex::new(None),
                status: Mutex::new(Status::default()),
                push_token: AtomicU16::new(0),
                pull_token: AtomicU16::new(0),
                push_sent: AtomicU32::new(0),
                link_dropped: AtomicU32::new(0),
                ackr_window: Mutex::new(AckrWindow::default()),
                running: AtomicBool::new(false),
            }),
            uplink_tx: Mutex::new(uplink_tx),
            uplink_rx: Mutex::new(Some(uplink_rx)),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Resolve the server, bind the socket, start the workers and send the
    /// initial PULL_DATA.
    pub fn start(&self) -> Result<(), ForwarderError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let host = &self.shared.config.server_host;
        let port = self.shared.config.server_port;
        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| ForwarderError::Resolve(host.clone()))?
            .next()
            .ok_or_else(|| ForwarderError::Resolve(host.clone()))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let socket = Arc::new(socket);

        info!("packet forwarder starting, server {}:{} ({})", host, port, addr);
        *self.shared.socket.lock().unwrap() = Some(socket);
        *self.shared.server_addr.lock().unwrap() = Some(addr);

        // A fresh queue pair on every start keeps the forwarder
        // restartable after a stop.
        let uplink_rx = match self.uplink_rx.lock().unwrap().take() {
            Some(uplink_rx) => uplink_rx,
            None => {
                let (uplink_tx, uplink_rx) = queue::bounded(UPLINK_QUEUE_CAPACITY);
                *self.uplink_tx.lock().unwrap() = uplink_tx;
                uplink_rx
            }
        };

        self.shared.send_pull_data();

        let mut workers = self.workers.lock().unwrap();
        workers.push(spawn_udp_rx(self.shared.clone()));
        workers.push(spawn_udp_tx(self.shared.clone(), uplink_rx));
        workers.push(spawn_keepalive(self.shared.clone()));
        workers.push(spawn_stat(self.shared.clone()));

        info!("packet forwarder started");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }
        *self.shared.socket.lock().unwrap() = None;
        self.shared.status.lock().unwrap().connected = false;
        info!("packet forwarder stopped");
    }

    /// Queue one uplink for the next PUSH_DATA batch. Never blocks; on
    /// overflow the frame is dropped and counted.
    pub fn submit_uplink(&self, descriptor: RxDescriptor) {
        if !self.uplink_tx.lock().unwrap().push(descriptor) {
            warn!("uplink queue full, frame dropped");
            self.shared
                .stats
                .rx_dropped
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn status(&self) -> ForwarderStatus {
        let status = self.shared.status.lock().unwrap();
        ForwarderStatus {
            connected: status.connected,
            push_ack_count: status.push_ack,
            pull_ack_count: status.pull_ack,
            last_pull_ack_us: status.last_pull_ack_us,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.lock().unwrap().connected
    }

    /// Datagrams dropped because the link was down.
    pub fn link_dropped(&self) -> u32 {
        self.shared.link_dropped.load(Ordering::Relaxed)
    }
}

impl Drop for PacketForwarder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_udp_rx(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("UDP RX worker started");
        let socket = shared.socket.lock().unwrap().clone();
        let socket = match socket {
            Some(socket) => socket,
            None => return,
        };
        let mut buf = [0u8; UDP_BUFFER_SIZE];

        while shared.running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((len, _from)) => shared.process_datagram(&buf[..len]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("recv failed: {}", e);
                }
            }
        }
        debug!("UDP RX worker stopped");
    })
}

fn spawn_udp_tx(shared: Arc<Shared>, uplink_rx: QueueReceiver<RxDescriptor>) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("UDP TX worker started");
        while shared.running.load(Ordering::SeqCst) {
            let first = match uplink_rx.recv_timeout(BATCH_FIRST_WAIT) {
                Some(descriptor) => descriptor,
                None => continue,
            };

            let mut batch = vec![first];
            while batch.len() < UPLINK_BATCH_MAX {
                match uplink_rx.try_recv() {
                    Some(descriptor) => batch.push(descriptor),
                    None => break,
                }
            }
            shared.send_push_rxpk(&batch);
        }
        debug!("UDP TX worker stopped");
    })
}

fn spawn_keepalive(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        let interval = Duration::from_millis(u64::from(shared.config.keepalive_interval_ms.max(1)));
        let mut last_sent = Instant::now();
        while shared.running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            if last_sent.elapsed() >= interval {
                last_sent = Instant::now();
                shared.send_pull_data();
            }
            shared.check_liveness();
        }
    })
}

fn spawn_stat(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::spawn(move || {
        let interval = Duration::from_millis(u64::from(shared.config.stat_interval_ms.max(1)));
        let mut last_sent = Instant::now();
        while shared.running.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            if last_sent.elapsed() >= interval {
                last_sent = Instant::now();
                shared.send_stat();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::HostLink;
    use crate::packet::{Bandwidth, CodingRate, Modulation, SpreadingFactor, TxSchedule};
    use crate::time::ManualClock;

    struct RecordingSink {
        requests: Mutex<Vec<TxRequest>>,
        response: Mutex<Result<(), ScheduleError>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(Ok(())),
            })
        }
    }

    impl DownlinkSink for RecordingSink {
        fn submit(&self, request: TxRequest) -> Result<(), ScheduleError> {
            self.requests.lock().unwrap().push(request);
            *self.response.lock().unwrap()
        }
    }

    fn forwarder_with(
        sink: Arc<RecordingSink>,
    ) -> (PacketForwarder, ManualClock, Arc<GatewayStats>) {
        let clock = ManualClock::new(1_000_000);
        let stats = Arc::new(GatewayStats::new());
        let forwarder = PacketForwarder::new(
            ForwarderConfig {
                server_host: "127.0.0.1".to_string(),
                server_port: 1700,
                gateway_eui: [1, 2, 3, 4, 5, 6, 7, 8],
                keepalive_interval_ms: 10_000,
                stat_interval_ms: 30_000,
            },
            Arc::new(HostLink::new()),
            Arc::new(clock.clone()),
            stats.clone(),
            sink,
        );
        (forwarder, clock, stats)
    }

    fn pull_ack(token: u16) -> Vec<u8> {
        vec![0x02, (token >> 8) as u8, token as u8, 0x04]
    }

    #[test]
    fn test_push_ack_counted() {
        let (forwarder, _, _) = forwarder_with(RecordingSink::new());
        forwarder.shared.process_datagram(&[0x02, 0x00, 0x01, 0x01]);
        forwarder.shared.process_datagram(&[0x02, 0x00, 0x02, 0x01]);
        assert_eq!(forwarder.status().push_ack_count, 2);
    }

    #[test]
    fn test_liveness_transitions() {
        let (forwarder, clock, _) = forwarder_with(RecordingSink::new());
        assert!(!forwarder.is_connected());

        // First PULL_ACK marks the server connected.
        forwarder.shared.process_datagram(&pull_ack(1));
        assert!(forwarder.is_connected());
        assert_eq!(forwarder.status().pull_ack_count, 1);

        // 30 seconds of silence drops it.
        clock.advance(LIVENESS_TIMEOUT_US as u32 + 1);
        forwarder.shared.check_liveness();
        assert!(!forwarder.is_connected());

        // The next PULL_ACK brings it back.
        forwarder.shared.process_datagram(&pull_ack(2));
        assert!(forwarder.is_connected());
    }

    #[test]
    fn test_liveness_survives_fresh_acks() {
        let (forwarder, clock, _) = forwarder_with(RecordingSink::new());
        forwarder.shared.process_datagram(&pull_ack(1));

        clock.advance(10_000_000);
        forwarder.shared.process_datagram(&pull_ack(2));
        clock.advance(25_000_000);
        forwarder.shared.check_liveness();
        assert!(forwarder.is_connected());
    }

    #[test]
    fn test_pull_resp_reaches_downlink_sink() {
        let sink = RecordingSink::new();
        let (forwarder, _, _) = forwarder_with(sink.clone());

        let json = br#"{"txpk":{"imme":true,"freq":923.3,"powe":14,"datr":"SF12BW500","codr":"4/5","ipol":true,"size":3,"data":"AQID"}}"#;
        let mut datagram = vec![0x02, 0x00, 0x09, 0x03];
        datagram.extend_from_slice(json);
        forwarder.shared.process_datagram(&datagram);

        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload, vec![1, 2, 3]);
        assert_eq!(requests[0].modulation.frequency_hz, 923_300_000);
        assert_eq!(requests[0].schedule, TxSchedule::Immediate);
    }

    #[test]
    fn test_invalid_pull_resp_does_not_reach_sink() {
        let sink = RecordingSink::new();
        let (forwarder, _, _) = forwarder_with(sink.clone());

        let mut datagram = vec![0x02, 0x00, 0x09, 0x03];
        datagram.extend_from_slice(b"{broken");
        forwarder.shared.process_datagram(&datagram);

        assert!(sink.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_schedule_error_codes() {
        assert_eq!(schedule_error_code(ScheduleError::TooLate), TxAckError::TooLate);
        assert_eq!(schedule_error_code(ScheduleError::TooEarly), TxAckError::TooEarly);
        assert_eq!(
            schedule_error_code(ScheduleError::QueueFull),
            TxAckError::TxFailed
        );
        assert_eq!(
            schedule_error_code(ScheduleError::NotRunning),
            TxAckError::TxFailed
        );
    }

    #[test]
    fn test_ackr_rolling_window() {
        let (forwarder, _, _) = forwarder_with(RecordingSink::new());
        let shared = &forwarder.shared;

        // Interval 1: 4 sent, 3 acked.
        shared.push_sent.store(4, Ordering::Relaxed);
        shared.status.lock().unwrap().push_ack = 3;
        assert_eq!(shared.ackr_for_interval(), 75.0);

        // Interval 2: 2 more sent, 2 more acked.
        shared.push_sent.store(6, Ordering::Relaxed);
        shared.status.lock().unwrap().push_ack = 5;
        assert_eq!(shared.ackr_for_interval(), 100.0);

        // Interval 3: nothing sent.
        assert_eq!(shared.ackr_for_interval(), 0.0);
    }

    #[test]
    fn test_tokens_increment_and_wrap() {
        let (forwarder, _, _) = forwarder_with(RecordingSink::new());
        let shared = &forwarder.shared;

        assert_eq!(shared.next_push_token(), 1);
        assert_eq!(shared.next_push_token(), 2);
        assert_eq!(shared.next_pull_token(), 1);

        shared.push_token.store(u16::MAX, Ordering::Relaxed);
        assert_eq!(shared.next_push_token(), 0);
        assert_eq!(shared.next_push_token(), 1);
    }

    #[test]
    fn test_uplink_queue_overflow_counted() {
        let (forwarder, _, stats) = forwarder_with(RecordingSink::new());
        let descriptor = RxDescriptor {
            payload: vec![0xAA],
            modulation: Modulation {
                frequency_hz: 916_800_000,
                bandwidth: Bandwidth::Khz125,
                spreading_factor: SpreadingFactor::new(7).unwrap(),
                coding_rate: CodingRate::Cr4_5,
            },
            rssi_dbm: -50,
            snr_db: 7,
            crc_ok: true,
            hw_timestamp_us: 1,
            rf_chain: 0,
        };

        // Workers not running: the queue fills at capacity, newest dropped.
        for _ in 0..UPLINK_QUEUE_CAPACITY + 2 {
            forwarder.submit_uplink(descriptor.clone());
        }
        assert_eq!(stats.snapshot().rx_dropped, 2);
    }
}
