//! Driver for qutools quTAG time-to-digital converters.
//!
//! The quTAG is a time tagger: it records event timestamps on its input
//! channels with picosecond resolution and derives coincidence counts and
//! second-order (HBT) correlation functions on the device. This crate wraps
//! the vendor's C library behind an async, mock-friendly driver.
//!
//! # Features
//!
//! - `mock` (default): simulate the device in memory. All driver behavior,
//!   including error paths, is scriptable through [`QutagDriver::with_mock`].
//! - `qutag_sdk`: link the vendor library via `qutag-sys` and talk to real
//!   hardware.
//!
//! # Concurrency model
//!
//! The vendor library addresses one device at a time through process-global
//! state, so every hardware operation runs as: acquire the shared
//! [`TdcSynchronizer`], address this driver's device, perform the calls,
//! release. Operations are bounded by the configured timeout when waiting
//! for the synchronizer and fail with [`TdcError::Timeout`] without having
//! touched the hardware.
//!
//! ```no_run
//! use daq_driver_qutag::{CoincidenceSource, QutagConfig, QutagDriver};
//!
//! # async fn run() -> Result<(), daq_driver_qutag::TdcError> {
//! let driver = QutagDriver::new(QutagConfig::default());
//! driver.open().await?;
//! let singles = driver.coincidence_counts_for(0).await?;
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod components;
pub mod config;
pub mod error;
pub mod instrument;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use components::channels::{ChannelConfig, QUTAG_STANDARD};
use components::coincidence::{CoincidenceCache, COINC_SLOT_COUNT};
use components::connection::TdcConnection;
use components::hbt::{HbtEngine, HbtEventCount, HbtFunctionData};
use components::synchronizer::TdcSynchronizer;
use components::timestamps::TimestampCollector;

pub use capabilities::{CoincidenceSource, TimestampSource};
pub use components::channels::{FilterKind, SignalConditioning, SignalEdge};
pub use components::connection::QUTAG_CHANNEL_COUNT;
pub use components::hbt::HbtPoint;
pub use config::QutagConfig;
pub use error::TdcError;

#[cfg(not(feature = "qutag_sdk"))]
pub use components::connection::MockTdcState;

/// Async driver for one quTAG device.
///
/// All methods take `&self`; the session state lives behind an async mutex
/// so one driver can be shared across instrument channels.
pub struct QutagDriver {
    config: QutagConfig,
    sync: TdcSynchronizer,
    op_timeout: Duration,
    connection: Mutex<TdcConnection>,
    collector: TimestampCollector,
    coincidence: CoincidenceCache,
}

impl QutagDriver {
    /// Create a driver sharing the process-wide device synchronizer.
    pub fn new(config: QutagConfig) -> Self {
        Self::with_synchronizer(config, TdcSynchronizer::global())
    }

    /// Create a driver with an explicit synchronizer. Production code shares
    /// [`TdcSynchronizer::global`]; tests inject private instances.
    pub fn with_synchronizer(config: QutagConfig, sync: TdcSynchronizer) -> Self {
        let op_timeout = config.op_timeout();
        Self {
            config,
            sync,
            op_timeout,
            connection: Mutex::new(TdcConnection::new()),
            collector: TimestampCollector::new(),
            coincidence: CoincidenceCache::new(),
        }
    }

    /// Serial numbers of all discoverable devices.
    pub fn enumerate() -> Result<Vec<String>, TdcError> {
        TdcConnection::enumerate()
    }

    pub fn config(&self) -> &QutagConfig {
        &self.config
    }

    /// Open the configured device and apply defaults. Idempotent.
    pub async fn open(&self) -> Result<(), TdcError> {
        let mut conn = self.connection.lock().await;
        conn.open(&self.config, &self.sync).await?;
        info!(device = ?conn.device_number(), "quTAG driver open");
        Ok(())
    }

    /// Close the session. Idempotent; queued timestamps and cached counter
    /// data survive until [`reset`](Self::reset).
    pub async fn close(&self) -> Result<(), TdcError> {
        let mut conn = self.connection.lock().await;
        conn.close()?;
        info!("quTAG driver closed");
        Ok(())
    }

    /// Full reinitialization: close, drop all buffered data, reopen.
    pub async fn reset(&self) -> Result<(), TdcError> {
        let mut conn = self.connection.lock().await;
        conn.close()?;
        self.collector.clear_all();
        self.coincidence.reset();
        conn.open(&self.config, &self.sync).await?;
        info!("quTAG driver reset");
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    /// Device timebase in picoseconds per tick.
    pub async fn timebase_ps(&self) -> Result<i64, TdcError> {
        self.connection.lock().await.timebase_ps()
    }

    /// Capacity of the device timestamp buffer, in tags.
    pub async fn buffer_size(&self) -> i32 {
        self.connection.lock().await.buffer_size()
    }

    /// Input channel count of the open device.
    pub async fn channel_count(&self) -> u8 {
        self.connection.lock().await.channel_count()
    }

    // --- channel and device-wide parameters ---------------------------------

    /// Enable exactly the channels in `mask` (bit n = channel n).
    pub async fn enable_channels(&self, mask: i32) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::enable_channels(&conn, mask)
    }

    pub async fn channels_enabled(&self) -> Result<i32, TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::channels_enabled(&conn)
    }

    /// Enable one channel, leaving the rest of the mask untouched.
    pub async fn enable_channel(&self, channel: u8) -> Result<(), TdcError> {
        self.update_channel_mask(channel, true).await
    }

    /// Disable one channel, leaving the rest of the mask untouched.
    pub async fn disable_channel(&self, channel: u8) -> Result<(), TdcError> {
        self.update_channel_mask(channel, false).await
    }

    async fn update_channel_mask(&self, channel: u8, enable: bool) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(channel)?;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        let mask = ChannelConfig::channels_enabled(&conn)?;
        let mask = if enable {
            mask | (1 << channel)
        } else {
            mask & !(1 << channel)
        };
        ChannelConfig::enable_channels(&conn, mask)
    }

    /// Set the coincidence counter exposure time in ms.
    pub async fn set_exposure_time(&self, exposure_ms: i32) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::set_exposure_time(&conn, exposure_ms)
    }

    /// Set the coincidence window in picoseconds.
    pub async fn set_coincidence_window_ps(&self, window_ps: i64) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let ticks = i32::try_from(conn.ticks_from_ps(window_ps)?).map_err(|_| {
            TdcError::OutOfRange(format!("coincidence window {window_ps} ps overflows the device range"))
        })?;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::set_coincidence_window(&conn, ticks)
    }

    /// Resize the device timestamp buffer.
    pub async fn set_timestamp_buffer_size(&self, size: i32) -> Result<(), TdcError> {
        let mut conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::set_timestamp_buffer_size(&mut conn, size)
    }

    /// Configure one channel's input stage.
    pub async fn configure_input(
        &self,
        channel: u8,
        conditioning: SignalConditioning,
        edge: SignalEdge,
        threshold_volts: f64,
    ) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(channel)?;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        ChannelConfig::configure_signal_conditioning(&conn, channel, conditioning, edge, threshold_volts)
    }

    /// Set a per-channel input delay. Validated, but without effect on the
    /// quTAG Standard.
    pub async fn set_channel_delay(&self, channel: u8, delay_ps: i64) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        ChannelConfig::set_channel_delay(&conn, QUTAG_STANDARD, channel, delay_ps)
    }

    /// Configure an event filter. Validated, but without effect on the quTAG
    /// Standard.
    pub async fn configure_filter(
        &self,
        channel: u8,
        kind: FilterKind,
        channel_mask: i32,
    ) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        ChannelConfig::configure_filter(&conn, QUTAG_STANDARD, channel, kind, channel_mask)
    }

    // --- timestamps ---------------------------------------------------------

    /// Drain the device buffer into the per-channel queues, returning the
    /// number of tags read.
    pub async fn refresh_timestamps(&self) -> Result<usize, TdcError> {
        let conn = self.connection.lock().await;
        self.collector.drain(&conn, &self.sync, self.op_timeout).await
    }

    // --- coincidence counters -----------------------------------------------

    /// Read the device counter block into the cache and return the cached
    /// snapshot. A read reporting zero completed cycles leaves the previous
    /// snapshot in place.
    pub async fn refresh_coincidence_counts(&self) -> Result<Option<(Vec<i32>, i32)>, TdcError> {
        let conn = self.connection.lock().await;
        let (counts, updates) = {
            let _guard = self.sync.lock(self.op_timeout).await?;
            conn.address_device()?;
            conn.read_coincidence_counters()?
        };
        self.coincidence.refresh(counts, updates);
        Ok(self.coincidence.snapshot())
    }

    /// Copy of the most recently read counter block, if any. Touches no
    /// hardware.
    pub async fn coincidence_snapshot(&self) -> Option<(Vec<i32>, i32)> {
        self.coincidence.snapshot()
    }

    // --- HBT correlation ----------------------------------------------------

    /// Enable correlation accumulation between a channel pair.
    pub async fn enable_hbt(&self, first: u8, second: u8) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(first)?;
        conn.require_channel(second)?;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::enable(&conn, true)?;
        HbtEngine::set_input(&conn, first, second)
    }

    /// Stop correlation accumulation.
    pub async fn disable_hbt(&self) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::enable(&conn, false)
    }

    /// Set correlation binning. The bin width is given in picoseconds and
    /// must land within the device's supported tick range.
    pub async fn configure_hbt(&self, bin_width_ps: i64, bin_count: i32) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let ticks = conn.ticks_from_ps(bin_width_ps)?;
        if !(1..=1_000_000).contains(&ticks) {
            return Err(TdcError::OutOfRange(format!(
                "HBT bin width {bin_width_ps} ps is {ticks} ticks, outside 1..=1000000"
            )));
        }
        if !(16..=64_000).contains(&bin_count) {
            return Err(TdcError::OutOfRange(format!(
                "HBT bin count {bin_count} outside 16..=64000"
            )));
        }
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::set_params(&conn, ticks as i32, bin_count)
    }

    /// Discard accumulated correlation data.
    pub async fn reset_hbt(&self) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::reset_correlations(&conn)
    }

    /// Event counts on the correlated inputs.
    pub async fn hbt_event_count(&self) -> Result<HbtEventCount, TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::event_count(&conn)
    }

    /// Accumulated integration time of the correlation function.
    pub async fn hbt_integration_time(&self) -> Result<Duration, TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::integration_time(&conn)
    }

    /// Calculate the current g2 correlation function as `(lag, value)`
    /// points in physical units.
    pub async fn hbt_points(&self) -> Result<Vec<HbtPoint>, TdcError> {
        let conn = self.connection.lock().await;
        let timebase_ps = conn.timebase_ps()?;
        let data = {
            let _guard = self.sync.lock(self.op_timeout).await?;
            conn.address_device()?;
            HbtEngine::calc_g2(&conn)?
        };
        Ok(data.points(timebase_ps))
    }

    /// Raw copy of the current g2 correlation function.
    pub async fn hbt_function(&self) -> Result<HbtFunctionData, TdcError> {
        let conn = self.connection.lock().await;
        let _guard = self.sync.lock(self.op_timeout).await?;
        conn.address_device()?;
        HbtEngine::calc_g2(&conn)
    }

    // --- test support -------------------------------------------------------

    /// Run a closure against the simulated device state.
    #[cfg(not(feature = "qutag_sdk"))]
    pub async fn with_mock<R>(&self, f: impl FnOnce(&mut MockTdcState) -> R) -> R {
        let conn = self.connection.lock().await;
        let mut state = conn.mock();
        f(&mut state)
    }
}

#[async_trait]
impl TimestampSource for QutagDriver {
    async fn timestamps(&self, channel: u8) -> Result<Vec<i64>, TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(channel)?;
        self.collector.drain(&conn, &self.sync, self.op_timeout).await?;
        Ok(self.collector.take(channel))
    }

    async fn timestamp_count(&self, channel: u8) -> Result<usize, TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(channel)?;
        self.collector.drain(&conn, &self.sync, self.op_timeout).await?;
        Ok(self.collector.len(channel))
    }

    async fn clear_timestamps(&self, channel: u8) -> Result<(), TdcError> {
        let conn = self.connection.lock().await;
        conn.require_channel(channel)?;
        self.collector.clear(channel);
        Ok(())
    }
}

#[async_trait]
impl CoincidenceSource for QutagDriver {
    async fn coincidence_counts_for(&self, slot: usize) -> Result<(i32, i32), TdcError> {
        if slot >= COINC_SLOT_COUNT {
            return Err(TdcError::OutOfRange(format!(
                "counter slot {slot} outside 0..{COINC_SLOT_COUNT}"
            )));
        }
        self.refresh_coincidence_counts().await?;
        Ok(self.coincidence.take_for(slot))
    }
}
