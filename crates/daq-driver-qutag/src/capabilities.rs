//! Capability traits implemented by the quTAG driver.
//!
//! Instrument-layer code programs against these rather than the concrete
//! driver, so a simulator or another tagger model can stand in behind the
//! same surface.

use async_trait::async_trait;

use crate::error::TdcError;

/// A device that produces per-channel event timestamps.
#[async_trait]
pub trait TimestampSource: Send + Sync {
    /// Take all timestamps queued for `channel`, oldest first. Consuming:
    /// a second call returns only tags that arrived in between.
    async fn timestamps(&self, channel: u8) -> Result<Vec<i64>, TdcError>;

    /// Number of timestamps currently queued for `channel`, without
    /// consuming them.
    async fn timestamp_count(&self, channel: u8) -> Result<usize, TdcError>;

    /// Discard queued timestamps for `channel`.
    async fn clear_timestamps(&self, channel: u8) -> Result<(), TdcError>;
}

/// A device that produces coincidence counter readings.
#[async_trait]
pub trait CoincidenceSource: Send + Sync {
    /// Sample one counter slot.
    ///
    /// Returns `(count, updates)` where `updates` is the number of exposure
    /// cycles behind this value, handed out at most once per slot per cycle.
    /// `updates == 0` means the count repeats data already sampled.
    async fn coincidence_counts_for(&self, slot: usize) -> Result<(i32, i32), TdcError>;
}
