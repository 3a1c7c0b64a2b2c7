//! Gateway core: lifecycle, statistics and the uplink pipeline.
//!
//! The radio interrupt path hands frames to [`Gateway::rx_sink`], which
//! counts them and pushes onto a bounded queue. A worker drains the queue in
//! arrival order, filters CRC failures, and delivers to the registered
//! uplink handler (the packet forwarder, wired up by the caller so neither
//! side knows the other's type).

use crate::channel_manager::{ChannelManager, RxSink, ScheduleError};
use crate::packet::{GatewayStats, RxDescriptor, StatsSnapshot, TxRequest};
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::radio::{self, Radio};
use crate::time::MonotonicClock;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Uplink queue depth between the interrupt path and the RX worker.
pub const RX_QUEUE_CAPACITY: usize = 32;

/// Receives frames that passed the gateway's filters.
pub type UplinkHandler = Box<dyn Fn(RxDescriptor) + Send + Sync>;

/// Gateway construction options.
#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    /// Forward frames whose CRC check failed. Off by default; the network
    /// server cannot use them.
    pub forward_crc_invalid: bool,
    /// RX retune plan for channel hopping.
    pub hop_frequencies: Vec<u32>,
}

/// Interrupt-side frame intake, handed to the channel manager as the
/// [`RxSink`]. Bounded work: counter updates and a wait-free queue push.
struct RxIngress {
    stats: Arc<GatewayStats>,
    clock: Arc<dyn MonotonicClock>,
    queue: QueueSender<RxDescriptor>,
}

impl RxSink for RxIngress {
    fn deliver(&self, descriptor: RxDescriptor) {
        self.stats.rx_total.fetch_add(1, Ordering::Relaxed);
        if descriptor.crc_ok {
            self.stats.rx_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.rx_bad.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .last_rx_time_us
            .store(i64::from(self.clock.now_us()), Ordering::Relaxed);

        if !self.queue.push(descriptor) {
            self.stats.rx_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The gateway core.
pub struct Gateway {
    clock: Arc<dyn MonotonicClock>,
    stats: Arc<GatewayStats>,
    channel_manager: ChannelManager,
    rx_sink: Arc<RxIngress>,
    rx_queue: Mutex<Option<QueueReceiver<RxDescriptor>>>,
    uplink_handler: Arc<Mutex<Option<UplinkHandler>>>,
    forward_crc_invalid: bool,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started_at: Mutex<Option<Instant>>,
}

impl Gateway {
    pub fn new(
        rx_radio: Arc<dyn Radio>,
        tx_radio: Arc<dyn Radio>,
        clock: Arc<dyn MonotonicClock>,
        options: GatewayOptions,
    ) -> Self {
        let stats = Arc::new(GatewayStats::new());
        let (queue_tx, queue_rx) = queue::bounded(RX_QUEUE_CAPACITY);

        let channel_manager = ChannelManager::new(
            rx_radio,
            tx_radio.clone(),
            clock.clone(),
            stats.clone(),
            options.hop_frequencies,
        );

        // Stamp completion times from the TX radio's done callback.
        let tx_stats = stats.clone();
        let tx_clock = clock.clone();
        tx_radio.set_tx_callback(Box::new(move |success| {
            if success {
                tx_stats
                    .last_tx_time_us
                    .store(i64::from(tx_clock.now_us()), Ordering::Relaxed);
            }
        }));

        let rx_sink = Arc::new(RxIngress {
            stats: stats.clone(),
            clock: clock.clone(),
            queue: queue_tx,
        });

        Self {
            clock,
            stats,
            channel_manager,
            rx_sink,
            rx_queue: Mutex::new(Some(queue_rx)),
            uplink_handler: Arc::new(Mutex::new(None)),
            forward_crc_invalid: options.forward_crc_invalid,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    /// The interrupt-side frame intake. Exposed so callers can drive the
    /// pipeline without hardware in tests.
    pub fn rx_sink(&self) -> Arc<dyn RxSink> {
        self.rx_sink.clone()
    }

    /// Register the consumer of filtered uplinks.
    pub fn set_uplink_handler(&self, handler: UplinkHandler) {
        *self.uplink_handler.lock().unwrap() = Some(handler);
    }

    /// Start the channel manager and the RX processing worker.
    pub fn start(&self) -> Result<(), radio::Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let queue_rx = match self.rx_queue.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(radio::Error::InvalidArgument);
            }
        };

        if let Err(e) = self.channel_manager.start(self.rx_sink.clone()) {
            self.running.store(false, Ordering::SeqCst);
            *self.rx_queue.lock().unwrap() = Some(queue_rx);
            return Err(e);
        }

        let running = self.running.clone();
        let handler = self.uplink_handler.clone();
        let forward_crc_invalid = self.forward_crc_invalid;
        let worker = thread::spawn(move || {
            debug!("RX processing worker started");
            while running.load(Ordering::SeqCst) {
                let descriptor = match queue_rx.recv_timeout(Duration::from_millis(100)) {
                    Some(descriptor) => descriptor,
                    None => continue,
                };

                debug!(
                    "RX: {} bytes, RSSI {} dBm, SNR {} dB, CRC {}",
                    descriptor.payload.len(),
                    descriptor.rssi_dbm,
                    descriptor.snr_db,
                    if descriptor.crc_ok { "OK" } else { "ERR" }
                );

                if !descriptor.crc_ok && !forward_crc_invalid {
                    continue;
                }
                if let Some(handler) = handler.lock().unwrap().as_ref() {
                    handler(descriptor);
                }
            }
            debug!("RX processing worker stopped");
        });
        *self.worker.lock().unwrap() = Some(worker);
        *self.started_at.lock().unwrap() = Some(Instant::now());

        info!("gateway started");
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.channel_manager.stop();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        info!("gateway stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a downlink with the channel manager.
    pub fn schedule_downlink(&self, request: TxRequest) -> Result<(), ScheduleError> {
        self.channel_manager.schedule_tx(request)
    }

    /// Enable or disable RX channel hopping.
    pub fn set_hopping(&self, enabled: bool, interval_ms: u32) {
        self.channel_manager.set_hopping(enabled, interval_ms);
    }

    /// Retune the RX radio.
    pub fn set_rx_frequency(&self, freq_hz: u32) -> Result<(), radio::Error> {
        self.channel_manager.set_rx_frequency(freq_hz)
    }

    /// Update the RX spreading factor and bandwidth.
    pub fn set_rx_params(
        &self,
        sf: crate::packet::SpreadingFactor,
        bw: crate::packet::Bandwidth,
    ) -> Result<(), radio::Error> {
        self.channel_manager.set_rx_params(sf, bw)
    }

    /// Monotonic microsecond timestamp, shared with the protocol engine.
    pub fn timestamp_us(&self) -> u32 {
        self.clock.now_us()
    }

    /// Shared counters; the forwarder reads these for stat reports.
    pub fn stats_handle(&self) -> Arc<GatewayStats> {
        self.stats.clone()
    }

    /// Counter snapshot with up-to-date uptime.
    pub fn stats(&self) -> StatsSnapshot {
        if let Some(started_at) = *self.started_at.lock().unwrap() {
            self.stats
                .uptime_seconds
                .store(started_at.elapsed().as_secs(), Ordering::Relaxed);
        }
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}
