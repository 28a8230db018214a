//! Fixed-width refresh intervals.

/// Width of the window used to smooth throughput.
///
/// Timestamps are milliseconds since the Unix epoch and may be negative (the
/// initial wait cursor sits one interval before service start), so interval
/// indexes use floor division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshInterval {
    width_ms: i64,
}

impl RefreshInterval {
    /// Interval of `secs` seconds.
    pub fn from_secs(secs: u64) -> Self {
        let width_ms = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self::from_millis(width_ms)
    }

    /// Interval of `width_ms` milliseconds. Widths below 1ms are treated as 1ms.
    pub fn from_millis(width_ms: i64) -> Self {
        Self {
            width_ms: width_ms.max(1),
        }
    }

    /// Width in milliseconds.
    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// Index of the interval containing `time`.
    pub fn index(&self, time: i64) -> i64 {
        time.div_euclid(self.width_ms)
    }

    /// First boundary strictly after `time`, saturating at `i64::MAX`.
    pub fn next_boundary(&self, time: i64) -> i64 {
        self.index(time)
            .saturating_add(1)
            .saturating_mul(self.width_ms)
    }

    /// Number of interval boundaries crossed going from `from` to `to`.
    /// Never negative.
    pub fn elapsed(&self, from: i64, to: i64) -> i64 {
        self.index(to).saturating_sub(self.index(from)).max(0)
    }
}
