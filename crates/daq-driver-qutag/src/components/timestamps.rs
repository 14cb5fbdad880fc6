//! Per-channel timestamp collection.
//!
//! The device holds arriving tags in a single bounded buffer; reading it is
//! destructive and loses channel interleaving unless done in one pass. The
//! collector therefore drains the device in bulk and fans tags out into
//! per-channel queues, from which instrument channels take their slices
//! independently.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::trace;

use crate::error::TdcError;

use super::connection::TdcConnection;
use super::synchronizer::TdcSynchronizer;

/// Fans device timestamp reads out into per-channel queues.
#[derive(Default)]
pub struct TimestampCollector {
    queues: Mutex<HashMap<u8, Vec<i64>>>,
}

impl TimestampCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn queues(&self) -> std::sync::MutexGuard<'_, HashMap<u8, Vec<i64>>> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drain the device buffer into the per-channel queues.
    ///
    /// Holds the synchronizer only for the addressing and the bulk read; the
    /// fan-out happens afterwards. A structurally inconsistent read (valid
    /// count outside the buffers) is discarded whole with
    /// [`TdcError::InvalidData`]; the queues are left untouched.
    pub async fn drain(
        &self,
        conn: &TdcConnection,
        sync: &TdcSynchronizer,
        timeout: Duration,
    ) -> Result<usize, TdcError> {
        let (timestamps, channels, valid) = {
            let _guard = sync.lock(timeout).await?;
            conn.address_device()?;
            conn.read_timestamps(true)?
        };

        if valid < 0
            || valid as usize > timestamps.len()
            || valid as usize > channels.len()
        {
            return Err(TdcError::InvalidData(format!(
                "device reported {valid} valid tags for buffers of {} and {}",
                timestamps.len(),
                channels.len()
            )));
        }

        let n = valid as usize;
        let mut queues = self.queues();
        for i in 0..n {
            queues.entry(channels[i]).or_default().push(timestamps[i]);
        }
        trace!(tags = n, "timestamp buffer drained");
        Ok(n)
    }

    /// Take all queued timestamps for one channel, oldest first.
    pub fn take(&self, channel: u8) -> Vec<i64> {
        self.queues()
            .get_mut(&channel)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Number of queued timestamps for one channel, without consuming them.
    pub fn len(&self, channel: u8) -> usize {
        self.queues().get(&channel).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, channel: u8) -> bool {
        self.len(channel) == 0
    }

    /// Discard queued timestamps for one channel.
    pub fn clear(&self, channel: u8) {
        self.queues().remove(&channel);
    }

    /// Discard all queued timestamps.
    pub fn clear_all(&self) {
        self.queues().clear();
    }
}
