use std::fmt;
use std::time::Duration;

/// Histogram of durable-barrier durations observed by one WAL handle.
///
/// Buckets count syncs under 1ms, 10ms, 100ms, 1s, and at or above 1s.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStat {
    pub count: u64,
    pub total: Duration,
    pub max: Duration,
    /// Syncs that exceeded the configured warn threshold.
    pub slow: u64,
    pub buckets: [u64; 5],
}

impl SyncStat {
    pub(crate) fn observe(&mut self, took: Duration, warn_threshold: Duration) {
        self.count += 1;
        self.total += took;
        if took > self.max {
            self.max = took;
        }
        if took > warn_threshold {
            self.slow += 1;
        }

        let bucket = match took.as_millis() {
            0 => 0,
            1..=9 => 1,
            10..=99 => 2,
            100..=999 => 3,
            _ => 4,
        };
        self.buckets[bucket] += 1;
    }
}

impl fmt::Display for SyncStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncStat{{ count: {}, total: {:?}, max: {:?}, slow: {}, buckets(<1ms,<10ms,<100ms,<1s,>=1s): {:?} }}",
            self.count, self.total, self.max, self.slow, self.buckets
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::wal::stat::SyncStat;

    #[test]
    fn test_observe() {
        let mut stat = SyncStat::default();
        let warn = Duration::from_millis(100);

        stat.observe(Duration::from_micros(300), warn);
        stat.observe(Duration::from_millis(5), warn);
        stat.observe(Duration::from_millis(150), warn);

        assert_eq!(3, stat.count);
        assert_eq!(Duration::from_millis(150), stat.max);
        assert_eq!(1, stat.slow);
        assert_eq!([1, 1, 0, 1, 0], stat.buckets);
    }
}
