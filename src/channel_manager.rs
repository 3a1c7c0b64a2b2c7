//! Dual-radio channel management.
//!
//! One radio sits in continuous receive, the other is held in standby and
//! transmits on demand. Downlinks are serialized through a bounded queue
//! and a single TX worker that honours the request's timestamp window.

use crate::packet::{GatewayStats, RxDescriptor, TxRequest, TxSchedule};
use crate::queue::{self, QueueReceiver, QueueSender};
use crate::radio::{self, Mode, Radio, TxFrame};
use crate::time::{us_delta, MonotonicClock};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Downlink queue depth.
pub const TX_QUEUE_CAPACITY: usize = 16;
/// Requests scheduled further out than this are rejected as too early.
pub const TX_EARLY_LIMIT_US: i32 = 5_000_000;
/// Requests older than this are rejected as too late; anything between the
/// limit and now transmits immediately.
pub const TX_LATE_LIMIT_US: i32 = -100_000;
/// Ceiling on the wait for TX-done.
pub const TX_DONE_TIMEOUT: Duration = Duration::from_secs(5);
/// Remainder handed to the driver's pre-TX spin instead of sleeping.
const TX_SPIN_THRESHOLD_US: i32 = 1_000;

/// Consumer of received frames, implemented by the gateway core. Passing it
/// in at start time keeps the manager free of any dependency on its owner.
pub trait RxSink: Send + Sync {
    /// Called from the radio interrupt path; must not block.
    fn deliver(&self, descriptor: RxDescriptor);
}

/// Why a downlink was not accepted or transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    NotRunning,
    QueueFull,
    /// The requested timestamp already passed beyond the tolerated window.
    TooLate,
    /// The requested timestamp is further out than the scheduler accepts.
    TooEarly,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "channel manager not running"),
            Self::QueueFull => write!(f, "TX queue full"),
            Self::TooLate => write!(f, "TX timestamp already passed"),
            Self::TooEarly => write!(f, "TX timestamp too far in the future"),
        }
    }
}

impl std::error::Error for ScheduleError {}

struct HopState {
    enabled: bool,
    interval: Duration,
    current_channel: usize,
}

/// Owns the radio pair and the downlink path.
pub struct ChannelManager {
    rx_radio: Arc<dyn Radio>,
    tx_radio: Arc<dyn Radio>,
    clock: Arc<dyn MonotonicClock>,
    stats: Arc<GatewayStats>,
    tx_queue: QueueSender<TxRequest>,
    tx_queue_rx: Mutex<Option<QueueReceiver<TxRequest>>>,
    running: Arc<AtomicBool>,
    hop: Arc<Mutex<HopState>>,
    hop_frequencies: Vec<u32>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelManager {
    /// `hop_frequencies` is the RX retune plan used when hopping is enabled
    /// (normally the active sub-band's eight uplink channels).
    pub fn new(
        rx_radio: Arc<dyn Radio>,
        tx_radio: Arc<dyn Radio>,
        clock: Arc<dyn MonotonicClock>,
        stats: Arc<GatewayStats>,
        hop_frequencies: Vec<u32>,
    ) -> Self {
        let (tx_queue, tx_queue_rx) = queue::bounded(TX_QUEUE_CAPACITY);
        Self {
            rx_radio,
            tx_radio,
            clock,
            stats,
            tx_queue,
            tx_queue_rx: Mutex::new(Some(tx_queue_rx)),
            running: Arc::new(AtomicBool::new(false)),
            hop: Arc::new(Mutex::new(HopState {
                enabled: false,
                interval: Duration::from_secs(1),
                current_channel: 0,
            })),
            hop_frequencies,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start both radios and the TX worker. Received frames go to `sink`.
    pub fn start(&self, sink: Arc<dyn RxSink>) -> Result<(), radio::Error> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let queue_rx = match self.tx_queue_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(radio::Error::InvalidArgument);
            }
        };

        if let Err(e) = self
            .rx_radio
            .start_rx(Box::new(move |descriptor| sink.deliver(descriptor)))
            .and_then(|()| self.tx_radio.set_mode(Mode::Standby))
        {
            self.running.store(false, Ordering::SeqCst);
            *self.tx_queue_rx.lock().unwrap() = Some(queue_rx);
            return Err(e);
        }

        let mut workers = self.workers.lock().unwrap();
        workers.push(self.spawn_tx_worker(queue_rx));
        workers.push(self.spawn_hop_worker());

        info!("channel manager started (RX continuous, TX standby)");
        Ok(())
    }

    /// Stop the workers and put both radios to sleep.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for worker in self.workers.lock().unwrap().drain(..) {
            let _ = worker.join();
        }

        let _ = self.rx_radio.stop_rx();
        let _ = self.rx_radio.set_mode(Mode::Sleep);
        let _ = self.tx_radio.set_mode(Mode::Sleep);
        info!("channel manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a downlink for transmission.
    ///
    /// The timestamp window is validated here so the caller can report the
    /// precise rejection back to the network server; the TX worker checks
    /// again at dequeue time.
    pub fn schedule_tx(&self, request: TxRequest) -> Result<(), ScheduleError> {
        if !self.is_running() {
            return Err(ScheduleError::NotRunning);
        }

        self.stats.tx_total.fetch_add(1, Ordering::Relaxed);

        if let TxSchedule::At(t) = request.schedule {
            let delta = us_delta(t, self.clock.now_us());
            if delta > TX_EARLY_LIMIT_US {
                self.stats.tx_fail.fetch_add(1, Ordering::Relaxed);
                return Err(ScheduleError::TooEarly);
            }
            if delta < TX_LATE_LIMIT_US {
                self.stats.tx_collision.fetch_add(1, Ordering::Relaxed);
                return Err(ScheduleError::TooLate);
            }
        }

        if !self.tx_queue.push(request) {
            warn!("TX queue full, downlink dropped");
            self.stats.tx_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(ScheduleError::QueueFull);
        }
        Ok(())
    }

    /// Retune the RX radio's carrier frequency.
    pub fn set_rx_frequency(&self, freq_hz: u32) -> Result<(), radio::Error> {
        self.rx_radio.set_frequency(freq_hz)
    }

    /// Update the RX radio's spreading factor and bandwidth.
    pub fn set_rx_params(
        &self,
        sf: crate::packet::SpreadingFactor,
        bw: crate::packet::Bandwidth,
    ) -> Result<(), radio::Error> {
        self.rx_radio.set_rx_params(sf, bw)
    }

    /// Enable or disable periodic RX channel hopping.
    pub fn set_hopping(&self, enabled: bool, interval_ms: u32) {
        let mut hop = self.hop.lock().unwrap();
        hop.enabled = enabled;
        hop.interval = Duration::from_millis(u64::from(interval_ms.max(1)));
        info!(
            "channel hopping {} (interval {} ms)",
            if enabled { "enabled" } else { "disabled" },
            interval_ms
        );
    }

    fn spawn_tx_worker(&self, queue_rx: QueueReceiver<TxRequest>) -> JoinHandle<()> {
        let running = self.running.clone();
        let tx_radio = self.tx_radio.clone();
        let clock = self.clock.clone();
        let stats = self.stats.clone();
        // One TX in flight at a time, even if the queue drains faster.
        let tx_lock = Mutex::new(());

        thread::spawn(move || {
            debug!("TX worker started");
            while running.load(Ordering::SeqCst) {
                let request = match queue_rx.recv_timeout(Duration::from_millis(100)) {
                    Some(request) => request,
                    None => continue,
                };
                let _guard = tx_lock.lock().unwrap();
                transmit_one(&*tx_radio, &*clock, &stats, &running, request);
            }
            debug!("TX worker stopped");
        })
    }

    fn spawn_hop_worker(&self) -> JoinHandle<()> {
        let running = self.running.clone();
        let rx_radio = self.rx_radio.clone();
        let hop = self.hop.clone();
        let frequencies = self.hop_frequencies.clone();

        thread::spawn(move || {
            let mut last_hop = Instant::now();
            while running.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
                let mut state = hop.lock().unwrap();
                if !state.enabled || frequencies.is_empty() {
                    last_hop = Instant::now();
                    continue;
                }
                if last_hop.elapsed() < state.interval {
                    continue;
                }
                last_hop = Instant::now();
                state.current_channel = (state.current_channel + 1) % frequencies.len();
                let freq = frequencies[state.current_channel];
                drop(state);
                if let Err(e) = rx_radio.set_frequency(freq) {
                    warn!("hop retune to {} Hz failed: {}", freq, e);
                } else {
                    debug!("hopped to {} Hz", freq);
                }
            }
        })
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dequeue-side handling of a single downlink.
fn transmit_one(
    tx_radio: &dyn Radio,
    clock: &dyn MonotonicClock,
    stats: &GatewayStats,
    running: &AtomicBool,
    request: TxRequest,
) {
    let mut tx_delay_us = 0u32;

    if let TxSchedule::At(t) = request.schedule {
        let delta = us_delta(t, clock.now_us());
        if delta > TX_EARLY_LIMIT_US {
            warn!("TX dropped at dequeue: {} us early", delta);
            stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if delta < TX_LATE_LIMIT_US {
            warn!("TX dropped at dequeue: {} us late", -delta);
            stats.tx_collision.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Sleep down to the spin threshold, then let the driver's pre-TX
        // spin land the frame on the exact timestamp.
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            let remaining = us_delta(t, clock.now_us());
            if remaining <= TX_SPIN_THRESHOLD_US {
                tx_delay_us = remaining.max(0) as u32;
                break;
            }
            thread::sleep(Duration::from_micros(
                (remaining - TX_SPIN_THRESHOLD_US).min(1_000) as u64,
            ));
        }
    }

    let frame = TxFrame {
        payload: request.payload,
        modulation: request.modulation,
        tx_power_dbm: request.tx_power_dbm,
        invert_iq: request.invert_iq,
        tx_delay_us,
    };
    debug!(
        "TX: {} Hz SF{} {} bytes",
        frame.modulation.frequency_hz,
        frame.modulation.spreading_factor.value(),
        frame.payload.len()
    );

    if let Err(e) = tx_radio.transmit(frame) {
        warn!("transmit failed: {}", e);
        stats.tx_fail.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match tx_radio.wait_tx_done(TX_DONE_TIMEOUT) {
        Ok(true) => {
            stats.tx_ok.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            warn!("TX completed with failure");
            stats.tx_fail.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            warn!("TX-done wait failed: {}", e);
            stats.tx_fail.fetch_add(1, Ordering::Relaxed);
            let _ = tx_radio.set_mode(Mode::Standby);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Bandwidth, CodingRate, Modulation, SpreadingFactor};
    use crate::radio::{Error, RxCallback, TxCallback};
    use crate::time::ManualClock;
    use std::sync::Condvar;

    /// Scripted radio for scheduler tests.
    struct MockRadio {
        mode: Mutex<Mode>,
        rx_callback: Mutex<Option<RxCallback>>,
        transmitted: Mutex<Vec<TxFrame>>,
        frequencies: Mutex<Vec<u32>>,
        /// When set, `wait_tx_done` blocks until `release_tx` is called.
        hold_tx: AtomicBool,
        tx_gate: (Mutex<bool>, Condvar),
        tx_started: (Mutex<u32>, Condvar),
    }

    impl MockRadio {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                mode: Mutex::new(Mode::Sleep),
                rx_callback: Mutex::new(None),
                transmitted: Mutex::new(Vec::new()),
                frequencies: Mutex::new(Vec::new()),
                hold_tx: AtomicBool::new(false),
                tx_gate: (Mutex::new(false), Condvar::new()),
                tx_started: (Mutex::new(0), Condvar::new()),
            })
        }

        fn transmit_count(&self) -> usize {
            self.transmitted.lock().unwrap().len()
        }

        fn wait_for_transmit(&self, count: u32, timeout: Duration) -> bool {
            let (lock, cond) = &self.tx_started;
            let guard = lock.lock().unwrap();
            let (guard, _) = cond
                .wait_timeout_while(guard, timeout, |started| *started < count)
                .unwrap();
            *guard >= count
        }

        fn release_tx(&self) {
            let (lock, cond) = &self.tx_gate;
            *lock.lock().unwrap() = true;
            cond.notify_all();
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
            *self.mode.lock().unwrap() = Mode::Standby;
            Ok(())
        }

        fn set_tx_callback(&self, _callback: TxCallback) {}

        fn transmit(&self, frame: TxFrame) -> Result<(), Error> {
            self.transmitted.lock().unwrap().push(frame);
            let (lock, cond) = &self.tx_started;
            *lock.lock().unwrap() += 1;
            cond.notify_all();
            Ok(())
        }

        fn wait_tx_done(&self, timeout: Duration) -> Result<bool, Error> {
            if self.hold_tx.load(Ordering::SeqCst) {
                let (lock, cond) = &self.tx_gate;
                let guard = lock.lock().unwrap();
                let (_guard, result) = cond
                    .wait_timeout_while(guard, timeout, |released| !*released)
                    .unwrap();
                if result.timed_out() {
                    return Err(Error::Timeout);
                }
            }
            Ok(true)
        }

        fn set_frequency(&self, freq_hz: u32) -> Result<(), Error> {
            self.frequencies.lock().unwrap().push(freq_hz);
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

    struct CollectSink(Mutex<Vec<RxDescriptor>>);

    impl RxSink for CollectSink {
        fn deliver(&self, descriptor: RxDescriptor) {
            self.0.lock().unwrap().push(descriptor);
        }
    }

    fn request(schedule: TxSchedule) -> TxRequest {
        TxRequest {
            payload: vec![0xAA; 4],
            modulation: Modulation {
                frequency_hz: 923_300_000,
                bandwidth: Bandwidth::Khz500,
                spreading_factor: SpreadingFactor::new(12).unwrap(),
                coding_rate: CodingRate::Cr4_5,
            },
            tx_power_dbm: 14,
            schedule,
            invert_iq: true,
        }
    }

    fn setup(
        now_us: u32,
    ) -> (
        ChannelManager,
        Arc<MockRadio>,
        Arc<MockRadio>,
        ManualClock,
        Arc<GatewayStats>,
    ) {
        let rx = MockRadio::new();
        let tx = MockRadio::new();
        let clock = ManualClock::new(now_us);
        let stats = Arc::new(GatewayStats::new());
        let manager = ChannelManager::new(
            rx.clone(),
            tx.clone(),
            Arc::new(clock.clone()),
            stats.clone(),
            vec![916_800_000, 917_000_000, 917_200_000],
        );
        (manager, rx, tx, clock, stats)
    }

    #[test]
    fn test_start_sets_radio_roles() {
        let (manager, rx, tx, _, _) = setup(0);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();
        assert_eq!(rx.mode(), Mode::RxContinuous);
        assert_eq!(tx.mode(), Mode::Standby);
        manager.stop();
        assert_eq!(rx.mode(), Mode::Sleep);
        assert_eq!(tx.mode(), Mode::Sleep);
    }

    #[test]
    fn test_rx_frames_reach_sink() {
        let (manager, rx, _, _, _) = setup(0);
        let sink = Arc::new(CollectSink(Mutex::new(Vec::new())));
        manager.start(sink.clone()).unwrap();

        let descriptor = RxDescriptor {
            payload: vec![1, 2, 3],
            modulation: request(TxSchedule::Immediate).modulation,
            rssi_dbm: -40,
            snr_db: 9,
            crc_ok: true,
            hw_timestamp_us: 55,
            rf_chain: 0,
        };
        rx.rx_callback.lock().unwrap().as_mut().unwrap()(descriptor.clone());

        assert_eq!(sink.0.lock().unwrap().as_slice(), &[descriptor]);
        manager.stop();
    }

    #[test]
    fn test_immediate_request_transmits() {
        let (manager, _, tx, _, stats) = setup(1_000_000);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        manager.schedule_tx(request(TxSchedule::Immediate)).unwrap();
        assert!(tx.wait_for_transmit(1, Duration::from_secs(1)));
        manager.stop();

        assert_eq!(stats.snapshot().tx_total, 1);
        assert_eq!(stats.snapshot().tx_ok, 1);
    }

    #[test]
    fn test_scheduled_request_waits_for_timestamp() {
        let (manager, _, tx, clock, stats) = setup(1_000_000);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        manager
            .schedule_tx(request(TxSchedule::At(1_050_000)))
            .unwrap();
        // Clock frozen short of the timestamp: nothing may go out.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(tx.transmit_count(), 0);

        clock.set(1_050_000);
        assert!(tx.wait_for_transmit(1, Duration::from_secs(1)));
        manager.stop();
        assert_eq!(stats.snapshot().tx_ok, 1);
    }

    #[test]
    fn test_slightly_late_request_transmits_immediately() {
        let (manager, _, tx, _, _) = setup(1_000_000);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        manager
            .schedule_tx(request(TxSchedule::At(999_000)))
            .unwrap();
        assert!(tx.wait_for_transmit(1, Duration::from_secs(1)));
        manager.stop();
    }

    #[test]
    fn test_too_late_request_rejected() {
        let (manager, _, tx, _, stats) = setup(1_000_000);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        let result = manager.schedule_tx(request(TxSchedule::At(800_000)));
        assert_eq!(result, Err(ScheduleError::TooLate));
        manager.stop();

        assert_eq!(stats.snapshot().tx_collision, 1);
        assert_eq!(tx.transmit_count(), 0);
    }

    #[test]
    fn test_too_early_request_rejected() {
        let (manager, _, tx, _, stats) = setup(1_000_000);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        let result = manager.schedule_tx(request(TxSchedule::At(7_000_000)));
        assert_eq!(result, Err(ScheduleError::TooEarly));
        manager.stop();

        assert_eq!(stats.snapshot().tx_fail, 1);
        assert_eq!(tx.transmit_count(), 0);
    }

    #[test]
    fn test_queue_full() {
        let (manager, _, tx, _, stats) = setup(1_000_000);
        tx.hold_tx.store(true, Ordering::SeqCst);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();

        // First request occupies the worker, which parks in wait_tx_done.
        manager.schedule_tx(request(TxSchedule::Immediate)).unwrap();
        assert!(tx.wait_for_transmit(1, Duration::from_secs(1)));

        for _ in 0..TX_QUEUE_CAPACITY {
            manager.schedule_tx(request(TxSchedule::Immediate)).unwrap();
        }
        let result = manager.schedule_tx(request(TxSchedule::Immediate));
        assert_eq!(result, Err(ScheduleError::QueueFull));
        assert_eq!(stats.snapshot().tx_dropped, 1);

        tx.release_tx();
        manager.stop();
    }

    #[test]
    fn test_not_running() {
        let (manager, _, _, _, _) = setup(0);
        assert_eq!(
            manager.schedule_tx(request(TxSchedule::Immediate)),
            Err(ScheduleError::NotRunning)
        );
    }

    #[test]
    fn test_rx_retune() {
        let (manager, rx, _, _, _) = setup(0);
        manager.set_rx_frequency(917_400_000).unwrap();
        manager
            .set_rx_params(SpreadingFactor::new(10).unwrap(), Bandwidth::Khz250)
            .unwrap();
        assert_eq!(*rx.frequencies.lock().unwrap(), vec![917_400_000]);
    }

    #[test]
    fn test_hopping_retunes_rx_radio() {
        let (manager, rx, _, _, _) = setup(0);
        manager.start(Arc::new(CollectSink(Mutex::new(Vec::new())))).unwrap();
        manager.set_hopping(true, 20);

        thread::sleep(Duration::from_millis(120));
        manager.stop();

        let frequencies = rx.frequencies.lock().unwrap();
        assert!(frequencies.len() >= 2, "expected hops, got {:?}", frequencies);
        for freq in frequencies.iter() {
            assert!([916_800_000, 917_000_000, 917_200_000].contains(freq));
        }
    }
}
