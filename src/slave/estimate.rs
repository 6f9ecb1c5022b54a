use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use tokio::sync::watch;

/// Corrected time reported by the sync receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReport {
    /// Sync round the report was computed from
    pub sync_id: u64,
    /// Local receipt time of that round's SYNC
    pub receipt_time: i64,
    /// Master-minus-local offset from that round
    pub gap: i64,
    /// Latest one-way delay estimate
    pub delay: i64,
    /// `receipt_time + gap + delay`
    pub local_time_estimate: i64,
}

/// Offset and delay estimates shared by the sync receiver and the delay prober
///
/// `gap` has a single writer (the receiver) and `delay` has a single writer
/// (the prober). Each field is read without tearing, but the pair is not read
/// atomically: a snapshot may combine a fresh `gap` with the previous `delay`.
#[derive(Debug)]
pub struct ClockEstimate {
    gap: AtomicI64,
    delay: AtomicI64,
    gap_ever_computed: AtomicBool,
    delay_ever_computed: AtomicBool,
    reports: watch::Sender<Option<TimeReport>>,
}

impl Default for ClockEstimate {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockEstimate {
    /// Creates an estimate with zero gap and delay
    pub fn new() -> Self {
        let (reports, _) = watch::channel(None);
        ClockEstimate {
            gap: AtomicI64::new(0),
            delay: AtomicI64::new(0),
            gap_ever_computed: AtomicBool::new(false),
            delay_ever_computed: AtomicBool::new(false),
            reports,
        }
    }

    /// Latest master-minus-local offset
    pub fn gap(&self) -> i64 {
        self.gap.load(Ordering::Acquire)
    }

    /// Latest one-way delay
    pub fn delay(&self) -> i64 {
        self.delay.load(Ordering::Acquire)
    }

    /// Reads `(gap, delay)`; the two loads are independent
    pub fn snapshot(&self) -> (i64, i64) {
        (self.gap(), self.delay())
    }

    /// Whether a FOLLOW_UP has ever been matched
    pub fn has_gap(&self) -> bool {
        self.gap_ever_computed.load(Ordering::Acquire)
    }

    /// Whether a DELAY_RESPONSE has ever been matched
    pub fn has_delay(&self) -> bool {
        self.delay_ever_computed.load(Ordering::Acquire)
    }

    /// Stores a new gap
    pub fn set_gap(&self, gap: i64) {
        self.gap.store(gap, Ordering::Release);
        self.gap_ever_computed.store(true, Ordering::Release);
    }

    /// Stores a new delay
    pub fn set_delay(&self, delay: i64) {
        self.delay.store(delay, Ordering::Release);
        self.delay_ever_computed.store(true, Ordering::Release);
    }

    /// Publishes a corrected time report, replacing the previous one
    pub fn publish(&self, report: TimeReport) {
        self.reports.send_replace(Some(report));
    }

    /// Most recent report, if any
    pub fn latest_report(&self) -> Option<TimeReport> {
        *self.reports.borrow()
    }

    /// Subscribes to corrected time reports
    pub fn subscribe(&self) -> watch::Receiver<Option<TimeReport>> {
        self.reports.subscribe()
    }
}
