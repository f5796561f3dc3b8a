//! Median network time
//!
//! The adjusted time is the local clock shifted by the median of the offsets
//! reported by connected peers. Consensus only consumes `adjusted_time`; the
//! sampling surface exists for the networking collaborator.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum number of peer offset samples retained.
const MAX_MEDIAN_TIME_ENTRIES: usize = 200;

/// Samples with an absolute offset beyond this many seconds are ignored.
const MAX_ALLOWED_OFFSET_SECS: i64 = 70 * 60;

/// Provider of the median-adjusted network time.
pub trait MedianTimeSource {
    /// Current unix time adjusted by the median peer offset, whole seconds.
    fn adjusted_time(&self) -> i64;

    /// Record a time sample from a peer.
    fn add_time_sample(&mut self, source: IpAddr, unix_time: i64);
}

/// The standard collector over peer samples.
#[derive(Debug, Default)]
pub struct MedianTime {
    known_ids: HashSet<IpAddr>,
    offsets: Vec<i64>,
}

impl MedianTime {
    pub fn new() -> MedianTime {
        MedianTime::default()
    }

    fn median_offset(&self) -> i64 {
        if self.offsets.is_empty() {
            return 0;
        }
        let mut sorted = self.offsets.clone();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        // Only apply an offset once enough samples agree; a lone peer must
        // not steer the clock.
        if sorted.len() < 5 {
            return 0;
        }
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        };
        if median.abs() > MAX_ALLOWED_OFFSET_SECS {
            0
        } else {
            median
        }
    }

    fn local_time() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl MedianTimeSource for MedianTime {
    fn adjusted_time(&self) -> i64 {
        Self::local_time() + self.median_offset()
    }

    fn add_time_sample(&mut self, source: IpAddr, unix_time: i64) {
        if !self.known_ids.insert(source) {
            return;
        }
        if self.offsets.len() == MAX_MEDIAN_TIME_ENTRIES {
            self.offsets.remove(0);
        }
        self.offsets.push(unix_time - Self::local_time());
    }
}

/// Fixed-time source for deterministic validation harnesses.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub i64);

impl MedianTimeSource for FixedTimeSource {
    fn adjusted_time(&self) -> i64 {
        self.0
    }

    fn add_time_sample(&mut self, _source: IpAddr, _unix_time: i64) {}
}
