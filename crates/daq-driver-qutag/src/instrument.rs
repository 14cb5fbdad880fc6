//! Instrument-level view of one quTAG input channel.
//!
//! A [`TdcChannel`] is what experiment code holds: one logical data stream
//! bound to a physical input, sharing the underlying [`QutagDriver`] with the
//! other channels of the same device. Depending on its [`StreamMode`] a
//! channel yields either coincidence count samples or raw event timestamps.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::capabilities::{CoincidenceSource, TimestampSource};
use crate::components::channels::{FilterKind, SignalConditioning, SignalEdge};
use crate::components::hbt::{HbtEventCount, HbtPoint};
use crate::error::TdcError;
use crate::QutagDriver;

/// What a channel produces on each read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Coincidence counter samples, one per completed exposure cycle.
    Counts,
    /// Raw event timestamps.
    Events,
}

/// One read from a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    /// A counter sample, or `None` when no exposure cycle completed since
    /// the previous read.
    Counts(Option<i32>),
    /// Timestamps accumulated since the previous read, in device ticks.
    Events(Vec<i64>),
}

/// Latest correlation data attached to a channel running an HBT measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct HbtResults {
    pub points: Vec<HbtPoint>,
    pub event_count: HbtEventCount,
    pub integration_time: Duration,
}

/// One input channel of a quTAG device.
pub struct TdcChannel {
    driver: Arc<QutagDriver>,
    channel: u8,
    stream_mode: StreamMode,
    hbt_partner: Option<u8>,
    hbt_results: Option<HbtResults>,
}

impl fmt::Debug for TdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdcChannel")
            .field("channel", &self.channel)
            .field("stream_mode", &self.stream_mode)
            .field("hbt_partner", &self.hbt_partner)
            .field("hbt_results", &self.hbt_results)
            .finish_non_exhaustive()
    }
}

impl TdcChannel {
    /// Bind a channel to a shared driver. Fails if the channel does not
    /// exist on the open device.
    pub async fn attach(
        driver: Arc<QutagDriver>,
        channel: u8,
        stream_mode: StreamMode,
    ) -> Result<Self, TdcError> {
        if channel >= driver.channel_count().await {
            return Err(TdcError::OutOfRange(format!(
                "channel {channel} exceeds device channel count {}",
                driver.channel_count().await
            )));
        }
        let mut this = Self {
            driver,
            channel,
            stream_mode,
            hbt_partner: None,
            hbt_results: None,
        };
        this.driver.enable_channel(channel).await?;
        this.apply_stream_mode().await?;
        Ok(this)
    }

    /// Release the channel, disabling it on the device. Other channels of
    /// the shared driver keep running.
    pub async fn detach(self) -> Result<(), TdcError> {
        if self.hbt_partner.is_some() {
            self.driver.disable_hbt().await?;
        }
        self.driver.disable_channel(self.channel).await
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn stream_mode(&self) -> StreamMode {
        self.stream_mode
    }

    /// Counter-mode reads mute the channel's event stream so counting is not
    /// perturbed by timestamp readout; event mode lifts the mute. On models
    /// without filter hardware both are validated no-ops.
    async fn apply_stream_mode(&mut self) -> Result<(), TdcError> {
        let kind = match self.stream_mode {
            StreamMode::Counts => FilterKind::Mute,
            StreamMode::Events => FilterKind::None,
        };
        self.driver.configure_filter(self.channel, kind, 0).await
    }

    /// Switch what this channel produces.
    pub async fn set_stream_mode(&mut self, mode: StreamMode) -> Result<(), TdcError> {
        if mode != self.stream_mode {
            self.stream_mode = mode;
            self.apply_stream_mode().await?;
            debug!(channel = self.channel, ?mode, "stream mode changed");
        }
        Ok(())
    }

    /// Produce the next sample for this channel, refreshing HBT results when
    /// a measurement is active.
    pub async fn read_data(&mut self) -> Result<ChannelData, TdcError> {
        let data = match self.stream_mode {
            StreamMode::Counts => {
                // Counter slot layout: slot 0 is the total, the per-channel
                // singles follow from slot 1.
                let (count, updates) = self
                    .driver
                    .coincidence_counts_for(self.channel as usize + 1)
                    .await?;
                if updates > 0 {
                    ChannelData::Counts(Some(count))
                } else {
                    ChannelData::Counts(None)
                }
            }
            StreamMode::Events => ChannelData::Events(self.driver.timestamps(self.channel).await?),
        };

        if self.hbt_partner.is_some() {
            self.hbt_results = Some(HbtResults {
                points: self.driver.hbt_points().await?,
                event_count: self.driver.hbt_event_count().await?,
                integration_time: self.driver.hbt_integration_time().await?,
            });
        }
        Ok(data)
    }

    /// Discard buffered data for this channel.
    pub async fn clear(&mut self) -> Result<(), TdcError> {
        self.driver.clear_timestamps(self.channel).await?;
        self.hbt_results = None;
        Ok(())
    }

    // --- configuration ------------------------------------------------------

    pub async fn configure_input(
        &self,
        conditioning: SignalConditioning,
        edge: SignalEdge,
        threshold_volts: f64,
    ) -> Result<(), TdcError> {
        debug!(
            channel = self.channel,
            conditioning = conditioning.as_str(),
            "configuring input stage"
        );
        self.driver
            .configure_input(self.channel, conditioning, edge, threshold_volts)
            .await
    }

    /// Exposure time shared by all counter-mode channels of the device.
    pub async fn set_exposure_time(&self, exposure_ms: i32) -> Result<(), TdcError> {
        self.driver.set_exposure_time(exposure_ms).await
    }

    /// Coincidence window shared by all channels of the device.
    pub async fn set_coincidence_window_ps(&self, window_ps: i64) -> Result<(), TdcError> {
        self.driver.set_coincidence_window_ps(window_ps).await
    }

    /// Input delay for this channel.
    pub async fn set_delay_ps(&self, delay_ps: i64) -> Result<(), TdcError> {
        self.driver.set_channel_delay(self.channel, delay_ps).await
    }

    /// Resize the device timestamp buffer backing event-mode reads.
    pub async fn set_stream_size(&self, size: i32) -> Result<(), TdcError> {
        self.driver.set_timestamp_buffer_size(size).await
    }

    // --- HBT ---------------------------------------------------------------

    /// Start or stop an HBT measurement between this channel and `partner`.
    ///
    /// Starting clears any event filters on both inputs so the correlator
    /// sees the full streams.
    pub async fn set_hbt_active(&mut self, active: bool, partner: u8) -> Result<(), TdcError> {
        if active {
            self.driver.enable_hbt(self.channel, partner).await?;
            self.driver
                .configure_filter(self.channel, FilterKind::None, 0)
                .await?;
            self.driver.configure_filter(partner, FilterKind::None, 0).await?;
            self.hbt_partner = Some(partner);
        } else {
            self.driver.disable_hbt().await?;
            self.hbt_partner = None;
            self.hbt_results = None;
        }
        Ok(())
    }

    /// Set correlation binning for the active or next measurement.
    pub async fn configure_hbt(&self, bin_width_ps: i64, bin_count: i32) -> Result<(), TdcError> {
        self.driver.configure_hbt(bin_width_ps, bin_count).await
    }

    /// Restart correlation accumulation. Ignored while no measurement is
    /// active.
    pub async fn reset_hbt(&mut self) -> Result<(), TdcError> {
        if self.hbt_partner.is_none() {
            return Ok(());
        }
        self.hbt_results = None;
        self.driver.reset_hbt().await
    }

    /// Correlation data captured by the most recent [`read_data`](Self::read_data).
    pub fn hbt_results(&self) -> Option<&HbtResults> {
        self.hbt_results.as_ref()
    }

    // --- device facts -------------------------------------------------------

    /// Timestamp resolution in picoseconds.
    pub async fn resolution_ps(&self) -> Result<i64, TdcError> {
        self.driver.timebase_ps().await
    }

    /// Current device timestamp buffer capacity.
    pub async fn stream_size(&self) -> i32 {
        self.driver.buffer_size().await
    }
}
