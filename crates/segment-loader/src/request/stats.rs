use std::time::{Duration, Instant};

/// Advisory transfer statistics for one request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestStats {
    /// Estimated throughput in bits per second.
    pub bandwidth: u64,
    pub bytes_received: u64,
    pub round_trip_time: Duration,
    pub first_bytes_received_at: Option<Instant>,
}

impl Default for RequestStats {
    fn default() -> Self {
        Self {
            bandwidth: 0,
            bytes_received: 0,
            round_trip_time: Duration::ZERO,
            first_bytes_received_at: None,
        }
    }
}

impl RequestStats {
    fn measure(requested_at: Instant, bytes_received: u64, first: Option<Instant>) -> Self {
        let round_trip_time = requested_at.elapsed();
        Self {
            bandwidth: bandwidth(bytes_received, round_trip_time),
            bytes_received,
            round_trip_time,
            first_bytes_received_at: first,
        }
    }
}

/// Bits per second for `bytes` received over `elapsed`, clamped to one microsecond.
pub fn bandwidth(bytes: u64, elapsed: Duration) -> u64 {
    let micros = elapsed.as_micros().max(1);
    (bytes as u128 * 8 * 1_000_000 / micros).min(u64::MAX as u128) as u64
}

/// Tracks a single request from issue to completion.
#[derive(Debug)]
pub(crate) struct StatsTracker {
    requested_at: Instant,
    first_bytes_received_at: Option<Instant>,
}

impl StatsTracker {
    pub fn start() -> Self {
        Self {
            requested_at: Instant::now(),
            first_bytes_received_at: None,
        }
    }

    /// Recomputes the stats from the cumulative byte count.
    pub fn progress(&mut self, cumulative: usize) -> RequestStats {
        if cumulative > 0 && self.first_bytes_received_at.is_none() {
            self.first_bytes_received_at = Some(Instant::now());
        }
        RequestStats::measure(
            self.requested_at,
            cumulative as u64,
            self.first_bytes_received_at,
        )
    }

    pub fn finish(self, total: usize) -> RequestStats {
        RequestStats::measure(self.requested_at, total as u64, self.first_bytes_received_at)
    }
}
