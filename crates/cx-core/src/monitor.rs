//! Counters and rolling windows for latency, throughput, memory, and
//! reconnect accounting, plus threshold alerts.
//!
//! All counters are atomics; the sample windows sit behind a mutex taken
//! only for the few nanoseconds of a push. Alerts are emitted as
//! [`PushEvent::Alert`] values on the consumer channel — informational,
//! never errors.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;

use crate::stats::{RollingWindow, WindowStats};
use crate::time_util;
use crate::types::{MonitorAlert, PushEvent};

/// Latency sample above this emits [`MonitorAlert::Latency`].
const LATENCY_ALERT_MS: f64 = 50.0;

/// Frame time above this emits [`MonitorAlert::FrameDrop`] (60 fps budget).
const FRAME_BUDGET_MS: f64 = 16.67;

/// RSS above this emits [`MonitorAlert::MemoryPressure`].
const MEMORY_PRESSURE_BYTES: u64 = 1 << 30;

/// Retained latency samples per window.
const LATENCY_WINDOW: usize = 100;

/// Retained frame-time samples.
const FRAME_WINDOW: usize = 60;

/// Point-in-time summary of all monitor state.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub trades_processed: u64,
    pub book_updates: u64,
    pub decode_errors: u64,
    pub timestamp_parse_errors: u64,
    pub field_parse_errors: u64,
    pub reconnects: u64,
    pub network_errors: u64,
    pub points_pushed: u64,
    pub events_dropped: u64,
    pub trade_latency_ms: Option<WindowStats>,
    pub book_latency_ms: Option<WindowStats>,
    pub frame_time_ms: Option<WindowStats>,
    pub trades_per_second: f64,
    pub rss_bytes: u64,
}

impl std::fmt::Display for MonitorSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "trades={} books={} decode_err={} reconnects={} net_err={} tps={:.1} rss={}MiB",
            self.trades_processed,
            self.book_updates,
            self.decode_errors,
            self.reconnects,
            self.network_errors,
            self.trades_per_second,
            self.rss_bytes >> 20,
        )?;
        if let Some(stats) = self.trade_latency_ms {
            write!(f, " trade_lat[{stats}]")?;
        }
        if let Some(stats) = self.book_latency_ms {
            write!(f, " book_lat[{stats}]")?;
        }
        Ok(())
    }
}

/// Central metrics hub shared across the transport, decoder, core, and
/// consumers.
pub struct Monitor {
    trades_processed: AtomicU64,
    book_updates: AtomicU64,
    decode_errors: AtomicU64,
    timestamp_parse_errors: AtomicU64,
    field_parse_errors: AtomicU64,
    reconnects: AtomicU64,
    network_errors: AtomicU64,
    points_pushed: AtomicU64,
    events_dropped: AtomicU64,

    trade_latency_ms: Mutex<RollingWindow>,
    book_latency_ms: Mutex<RollingWindow>,
    frame_time_ms: Mutex<RollingWindow>,
    trade_arrival_ms: Mutex<RollingWindow>,

    alerts: Mutex<Option<Sender<PushEvent>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            trades_processed: AtomicU64::new(0),
            book_updates: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            timestamp_parse_errors: AtomicU64::new(0),
            field_parse_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            points_pushed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            trade_latency_ms: Mutex::new(RollingWindow::new(LATENCY_WINDOW)),
            book_latency_ms: Mutex::new(RollingWindow::new(LATENCY_WINDOW)),
            frame_time_ms: Mutex::new(RollingWindow::new(FRAME_WINDOW)),
            trade_arrival_ms: Mutex::new(RollingWindow::new(LATENCY_WINDOW)),
            alerts: Mutex::new(None),
        }
    }

    /// Register the channel that receives threshold alerts.
    pub fn set_alert_sender(&self, sender: Sender<PushEvent>) {
        *self.alerts.lock().expect("alert sender lock poisoned") = Some(sender);
    }

    fn emit_alert(&self, alert: MonitorAlert) {
        let guard = self.alerts.lock().expect("alert sender lock poisoned");
        if let Some(sender) = guard.as_ref() {
            if sender.try_send(PushEvent::Alert(alert)).is_err() {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Record one exchange→arrival trade latency sample.
    pub fn record_trade_latency(&self, exchange_ts_us: u64, arrival_us: u64) {
        let sample_ms = arrival_us.saturating_sub(exchange_ts_us) as f64 / 1_000.0;
        self.trade_latency_ms
            .lock()
            .expect("latency window lock poisoned")
            .record(sample_ms);
        if sample_ms > LATENCY_ALERT_MS {
            self.emit_alert(MonitorAlert::Latency { sample_ms });
        }
    }

    /// Record one exchange→arrival order-book latency sample.
    pub fn record_book_latency(&self, exchange_ts_us: u64, arrival_us: u64) {
        let sample_ms = arrival_us.saturating_sub(exchange_ts_us) as f64 / 1_000.0;
        self.book_latency_ms
            .lock()
            .expect("latency window lock poisoned")
            .record(sample_ms);
        if sample_ms > LATENCY_ALERT_MS {
            self.emit_alert(MonitorAlert::Latency { sample_ms });
        }
    }

    /// Record one render frame time (reported by the rendering surface).
    pub fn record_frame_time(&self, frame_ms: f64) {
        self.frame_time_ms
            .lock()
            .expect("frame window lock poisoned")
            .record(frame_ms);
        if frame_ms > FRAME_BUDGET_MS {
            self.emit_alert(MonitorAlert::FrameDrop { frame_ms });
        }
    }

    pub fn record_trade_processed(&self) {
        self.trades_processed.fetch_add(1, Ordering::Relaxed);
        self.trade_arrival_ms
            .lock()
            .expect("arrival window lock poisoned")
            .record(time_util::now_ms() as f64);
    }

    pub fn record_book_update(&self) {
        self.book_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timestamp_parse_error(&self) {
        self.timestamp_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_field_parse_error(&self) {
        self.field_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_points_pushed(&self, count: u64) {
        self.points_pushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Sample the process RSS and alert on memory pressure.
    pub fn check_memory(&self) -> u64 {
        let rss = rss_bytes();
        if rss > MEMORY_PRESSURE_BYTES {
            self.emit_alert(MonitorAlert::MemoryPressure { rss_bytes: rss });
        }
        rss
    }

    // -----------------------------------------------------------------------
    // Derived
    // -----------------------------------------------------------------------

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn timestamp_parse_errors(&self) -> u64 {
        self.timestamp_parse_errors.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Trade arrival rate over the retained arrival window.
    pub fn trades_per_second(&self) -> f64 {
        let window = self.trade_arrival_ms.lock().expect("arrival window lock poisoned");
        let Some(stats) = window.stats() else {
            return 0.0;
        };
        let span_ms = stats.max - stats.min;
        if span_ms <= 0.0 {
            return 0.0;
        }
        (stats.count as f64 - 1.0) / (span_ms / 1_000.0)
    }

    /// Full point-in-time summary.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            trades_processed: self.trades_processed.load(Ordering::Relaxed),
            book_updates: self.book_updates.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            timestamp_parse_errors: self.timestamp_parse_errors.load(Ordering::Relaxed),
            field_parse_errors: self.field_parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            points_pushed: self.points_pushed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            trade_latency_ms: self
                .trade_latency_ms
                .lock()
                .expect("latency window lock poisoned")
                .stats(),
            book_latency_ms: self
                .book_latency_ms
                .lock()
                .expect("latency window lock poisoned")
                .stats(),
            frame_time_ms: self
                .frame_time_ms
                .lock()
                .expect("frame window lock poisoned")
                .stats(),
            trades_per_second: self.trades_per_second(),
            rss_bytes: rss_bytes(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RSS
// ---------------------------------------------------------------------------

/// Resident set size of the current process in bytes.
#[cfg(target_os = "linux")]
pub fn rss_bytes() -> u64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let Some(resident_pages) = statm.split_whitespace().nth(1) else {
        return 0;
    };
    let pages: u64 = resident_pages.parse().unwrap_or(0);
    // SAFETY: sysconf(_SC_PAGESIZE) has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    pages * page_size.max(0) as u64
}

#[cfg(not(target_os = "linux"))]
pub fn rss_bytes() -> u64 {
    0
}
