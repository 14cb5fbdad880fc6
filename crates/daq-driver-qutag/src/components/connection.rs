//! quTAG connection management.
//!
//! Handles device discovery, session open/close, and the per-session cached
//! hardware facts (timebase, buffer size, channel count).
//!
//! ## Device addressing
//!
//! The vendor library keeps one "currently addressed" device as process-global
//! state. Every operation here that touches hardware assumes the caller holds
//! the [`TdcSynchronizer`](super::synchronizer::TdcSynchronizer) and has
//! addressed this connection's device; the driver layer enforces that pairing.

use tracing::debug;

use crate::config::QutagConfig;
use crate::error::TdcError;

#[cfg(feature = "qutag_sdk")]
use crate::error::check;
#[cfg(not(feature = "qutag_sdk"))]
use crate::error::codes;

use super::channels::{ChannelConfig, SignalConditioning};
use super::coincidence::COINC_SLOT_COUNT;
use super::synchronizer::TdcSynchronizer;

/// Input channel count of the quTAG Standard. The vendor library exposes no
/// query for this, so it is fixed per hardware variant.
pub const QUTAG_CHANNEL_COUNT: u8 = 5;

/// Sentinel for "timebase not yet read from the device".
const TIMEBASE_UNKNOWN: i64 = -1;

/// Serial-number buffer length passed to `TDC_getDeviceInfo`.
#[cfg(feature = "qutag_sdk")]
const SERIAL_BUF_LEN: usize = 32;

/// Serial numbers reported in mock mode.
#[cfg(not(feature = "qutag_sdk"))]
pub const MOCK_DEVICES: [&str; 2] = ["TDC001", "TDC002"];

/// Manages one session on a quTAG device.
pub struct TdcConnection {
    /// Enumeration index of the open device.
    device_number: Option<u32>,
    /// Set as soon as `TDC_connect` succeeds so that a failed open can still
    /// be torn down with `close`.
    connected: bool,
    /// Device timebase in picoseconds, or [`TIMEBASE_UNKNOWN`].
    timebase_ps: i64,
    /// Last timestamp buffer size accepted by the hardware.
    buffer_size: i32,
    channel_count: u8,

    /// Mock device state for testing without hardware.
    #[cfg(not(feature = "qutag_sdk"))]
    pub mock_state: std::sync::Mutex<MockTdcState>,
}

/// Per-channel trigger settings held by the mock device.
#[cfg(not(feature = "qutag_sdk"))]
#[derive(Debug, Clone, Copy)]
pub struct MockConditioning {
    pub conditioning: i32,
    pub rising_edge: bool,
    pub threshold_volts: f64,
}

/// State of the simulated quTAG device.
///
/// Tests seed this through `QutagDriver::with_mock` to script device
/// behavior: pending timestamps, counter snapshots, injected failures.
#[cfg(not(feature = "qutag_sdk"))]
#[derive(Debug)]
pub struct MockTdcState {
    /// Device index passed to the last successful connect, if any.
    pub connected_device: Option<u32>,
    /// Device index currently addressed by the simulated library.
    pub addressed: Option<u32>,
    /// Timebase reported by the device, in seconds per tick.
    pub timebase_s: f64,
    /// Device-side timestamp buffer capacity (device default until set).
    pub buffer_size: i32,
    pub exposure_ms: i32,
    pub coincidence_window_ticks: i32,
    pub channel_mask: i32,
    pub conditioning: Vec<MockConditioning>,
    /// Tags waiting in the device buffer, `(channel, timestamp_ticks)`.
    pub pending_tags: std::collections::VecDeque<(u8, i64)>,
    /// Counter values returned by the next counter read.
    pub coinc_counts: Vec<i32>,
    /// Exposure cycles completed since the last counter read; the device
    /// zeroes this on read.
    pub coinc_updates: i32,

    pub hbt_enabled: bool,
    pub hbt_input: Option<(i32, i32)>,
    pub hbt_bin_width_ticks: i32,
    pub hbt_bin_count: i32,
    pub hbt_total_events: i64,
    pub hbt_last_events: i64,
    pub hbt_last_rate: f64,
    pub hbt_integration_s: f64,
    pub hbt_values: Vec<f64>,
    pub hbt_index_offset: i32,
    /// Correlation-function descriptors handed out and not yet released.
    pub hbt_open_handles: u32,
    /// When set, the next g2 calculation fails with an unspecified error.
    pub hbt_fail_calc: bool,

    /// When set, the next timestamp read reports more valid entries than the
    /// buffers can hold.
    pub invalid_next_timestamp_read: bool,
    /// When set, the next simulated library call fails with this code.
    pub fail_next_call: Option<i32>,
    /// Total simulated library calls, used by tests to assert an operation
    /// never reached the hardware.
    pub sdk_calls: u64,
}

#[cfg(not(feature = "qutag_sdk"))]
impl Default for MockTdcState {
    fn default() -> Self {
        Self {
            connected_device: None,
            addressed: None,
            timebase_s: 1e-12,
            buffer_size: 256,
            exposure_ms: 0,
            coincidence_window_ticks: 0,
            channel_mask: 0,
            conditioning: vec![
                MockConditioning {
                    conditioning: SignalConditioning::None.to_sdk(),
                    rising_edge: true,
                    threshold_volts: 0.0,
                };
                QUTAG_CHANNEL_COUNT as usize
            ],
            pending_tags: std::collections::VecDeque::new(),
            coinc_counts: vec![0; COINC_SLOT_COUNT],
            coinc_updates: 0,
            hbt_enabled: false,
            hbt_input: None,
            hbt_bin_width_ticks: 1,
            hbt_bin_count: 256,
            hbt_total_events: 0,
            hbt_last_events: 0,
            hbt_last_rate: 0.0,
            hbt_integration_s: 0.0,
            hbt_values: Vec::new(),
            hbt_index_offset: 0,
            hbt_open_handles: 0,
            hbt_fail_calc: false,
            invalid_next_timestamp_read: false,
            fail_next_call: None,
            sdk_calls: 0,
        }
    }
}

#[cfg(not(feature = "qutag_sdk"))]
impl MockTdcState {
    /// Count a simulated library call and apply any injected failure.
    pub fn begin_call(&mut self) -> Result<(), TdcError> {
        self.sdk_calls += 1;
        if let Some(code) = self.fail_next_call.take() {
            return Err(TdcError::hardware(code));
        }
        Ok(())
    }

    fn require_addressed(&self) -> Result<(), TdcError> {
        if self.addressed.is_none() {
            return Err(TdcError::hardware(codes::TDC_NOT_CONNECTED));
        }
        Ok(())
    }
}

impl Default for TdcConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl TdcConnection {
    /// Create a new, unconnected connection manager.
    pub fn new() -> Self {
        Self {
            device_number: None,
            connected: false,
            timebase_ps: TIMEBASE_UNKNOWN,
            buffer_size: 0,
            channel_count: 0,
            #[cfg(not(feature = "qutag_sdk"))]
            mock_state: std::sync::Mutex::new(MockTdcState::default()),
        }
    }

    /// Lock the mock device state, recovering from poisoning so a panicked
    /// test cannot wedge every later operation on the connection.
    #[cfg(not(feature = "qutag_sdk"))]
    pub(crate) fn mock(&self) -> std::sync::MutexGuard<'_, MockTdcState> {
        match self.mock_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// List serial numbers of all discoverable quTAG devices.
    ///
    /// Enumeration re-runs vendor discovery, so the set may change between
    /// calls as devices are plugged or unplugged.
    #[cfg(feature = "qutag_sdk")]
    pub fn enumerate() -> Result<Vec<String>, TdcError> {
        let mut count: u32 = 0;
        // SAFETY: count is a valid out pointer.
        check(unsafe { qutag_sys::TDC_discover(&mut count) })?;

        let mut serials = Vec::with_capacity(count as usize);
        for dev in 0..count {
            let mut dev_type: i32 = 0;
            let mut dev_id: i32 = 0;
            let mut connected: i32 = 0;
            let mut serial = [0u8; SERIAL_BUF_LEN];
            // SAFETY: all out pointers are valid; serial meets the vendor's
            // minimum buffer length.
            check(unsafe {
                qutag_sys::TDC_getDeviceInfo(
                    dev,
                    &mut dev_type,
                    &mut dev_id,
                    serial.as_mut_ptr() as *mut std::os::raw::c_char,
                    &mut connected,
                )
            })?;
            let len = serial.iter().position(|&b| b == 0).unwrap_or(serial.len());
            serials.push(String::from_utf8_lossy(&serial[..len]).into_owned());
        }
        Ok(serials)
    }

    /// List serial numbers of all discoverable quTAG devices (mock mode).
    #[cfg(not(feature = "qutag_sdk"))]
    pub fn enumerate() -> Result<Vec<String>, TdcError> {
        Ok(MOCK_DEVICES.iter().map(|s| s.to_string()).collect())
    }

    /// Open a session on the device named by `config.device_descriptor` and
    /// apply the configured defaults.
    ///
    /// An empty descriptor selects the first enumerated device. The
    /// synchronizer is held from device addressing through the last default,
    /// so the whole open is one atomic unit against other drivers.
    pub async fn open(
        &mut self,
        config: &QutagConfig,
        sync: &TdcSynchronizer,
    ) -> Result<(), TdcError> {
        if self.connected {
            return Ok(());
        }

        let serials = Self::enumerate()?;
        if serials.is_empty() {
            return Err(TdcError::NoDevices);
        }
        let device_number = if config.device_descriptor.is_empty() {
            0u32
        } else {
            serials
                .iter()
                .position(|s| s == &config.device_descriptor)
                .ok_or_else(|| TdcError::NotFound(config.device_descriptor.clone()))?
                as u32
        };

        self.connect(device_number)?;
        // From here on a failure leaves the session half-open; the caller
        // tears it down with close(), which disconnects unconditionally.
        self.device_number = Some(device_number);
        self.connected = true;

        let _guard = sync.lock(config.op_timeout()).await?;
        self.address_device()?;

        let timebase_s = self.read_timebase()?;
        self.timebase_ps = (timebase_s * 1e12).round() as i64;
        debug!(timebase_ps = self.timebase_ps, "quTAG timebase read");

        ChannelConfig::set_timestamp_buffer_size(self, config.timestamp_buffer_size)?;
        self.channel_count = QUTAG_CHANNEL_COUNT;

        // Configured defaults, applied under the same guard.
        let all_channels = (1i32 << self.channel_count) - 1;
        ChannelConfig::enable_channels(self, all_channels)?;
        ChannelConfig::set_exposure_time(self, config.exposure_ms as i32)?;
        let window_ticks = i32::try_from(self.ticks_from_ps(config.coincidence_window_ps)?)
            .map_err(|_| {
                TdcError::OutOfRange(format!(
                    "coincidence window {} ps overflows the device range",
                    config.coincidence_window_ps
                ))
            })?;
        ChannelConfig::set_coincidence_window(self, window_ticks)?;
        for channel in 0..self.channel_count {
            ChannelConfig::configure_signal_conditioning(
                self,
                channel,
                SignalConditioning::Misc,
                config.trigger_edge,
                config.threshold_volts,
            )?;
        }

        debug!(device_number, "quTAG session opened");
        Ok(())
    }

    /// Close the session if open. Idempotent.
    ///
    /// The session is marked closed before the vendor disconnect, so a
    /// disconnect failure is reported but never leaves the connection
    /// claiming to be open.
    pub fn close(&mut self) -> Result<(), TdcError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let device_number = self.device_number.take();
        self.timebase_ps = TIMEBASE_UNKNOWN;
        self.buffer_size = 0;
        self.channel_count = 0;

        if let Some(dev) = device_number {
            self.disconnect(dev)?;
            debug!(device_number = dev, "quTAG session closed");
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn device_number(&self) -> Option<u32> {
        self.device_number
    }

    /// Device timebase in picoseconds per tick.
    pub fn timebase_ps(&self) -> Result<i64, TdcError> {
        if self.timebase_ps == TIMEBASE_UNKNOWN {
            return Err(TdcError::NotOpen("timebase has not been read"));
        }
        Ok(self.timebase_ps)
    }

    /// Last buffer size accepted by the hardware.
    pub fn buffer_size(&self) -> i32 {
        self.buffer_size
    }

    pub(crate) fn set_cached_buffer_size(&mut self, size: i32) {
        self.buffer_size = size;
    }

    /// Input channel count of the open device.
    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    /// Reject channel numbers the open device does not have.
    pub fn require_channel(&self, channel: u8) -> Result<(), TdcError> {
        if channel >= self.channel_count {
            return Err(TdcError::OutOfRange(format!(
                "channel {channel} exceeds device channel count {}",
                self.channel_count
            )));
        }
        Ok(())
    }

    /// Convert a picosecond quantity to device ticks, truncating toward zero.
    pub fn ticks_from_ps(&self, ps: i64) -> Result<i64, TdcError> {
        let timebase = self.timebase_ps()?;
        Ok(ps / timebase)
    }

    /// Make this connection's device the vendor library's addressed device.
    /// Callers must hold the synchronizer.
    pub fn address_device(&self) -> Result<(), TdcError> {
        let dev = self.device_number.ok_or(TdcError::NotOpen("no device"))?;
        #[cfg(feature = "qutag_sdk")]
        {
            // SAFETY: no pointers; addresses the library's device selector.
            check(unsafe { qutag_sys::TDC_addressDevice(dev) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = self.mock();
            state.begin_call()?;
            if state.connected_device != Some(dev) {
                return Err(TdcError::hardware(codes::TDC_NO_DEVICE));
            }
            state.addressed = Some(dev);
            Ok(())
        }
    }

    fn connect(&self, dev: u32) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            // SAFETY: no pointers; dev comes from enumeration.
            check(unsafe { qutag_sys::TDC_connect(dev) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = self.mock();
            state.begin_call()?;
            state.connected_device = Some(dev);
            Ok(())
        }
    }

    fn disconnect(&self, dev: u32) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            // SAFETY: no pointers; dev was previously connected.
            check(unsafe { qutag_sys::TDC_disconnect(dev) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = self.mock();
            state.begin_call()?;
            if state.connected_device != Some(dev) {
                return Err(TdcError::hardware(codes::TDC_NO_DEVICE));
            }
            state.connected_device = None;
            state.addressed = None;
            Ok(())
        }
    }

    fn read_timebase(&self) -> Result<f64, TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let mut timebase: f64 = 0.0;
            // SAFETY: timebase is a valid out pointer.
            check(unsafe { qutag_sys::TDC_getTimebase(&mut timebase) })?;
            Ok(timebase)
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = self.mock();
            state.begin_call()?;
            state.require_addressed()?;
            Ok(state.timebase_s)
        }
    }

    /// Read up to one buffer of timestamps from the device.
    ///
    /// Returns the raw timestamp and channel buffers plus the count the
    /// device reported valid. Validation of that count against the buffer
    /// lengths is the collector's job.
    pub fn read_timestamps(&self, reset: bool) -> Result<(Vec<i64>, Vec<u8>, i32), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let capacity = self.buffer_size.max(0) as usize;
            let mut timestamps = vec![0i64; capacity];
            let mut channels = vec![0u8; capacity];
            let mut valid: i32 = 0;
            // SAFETY: buffers match the size last given to
            // TDC_setTimestampBufferSize; valid is a valid out pointer.
            check(unsafe {
                qutag_sys::TDC_getLastTimestamps(
                    i32::from(reset),
                    timestamps.as_mut_ptr(),
                    channels.as_mut_ptr(),
                    &mut valid,
                )
            })?;
            Ok((timestamps, channels, valid))
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let capacity = self.buffer_size.max(0) as usize;
            let mut state = self.mock();
            state.begin_call()?;
            state.require_addressed()?;

            let n = state.pending_tags.len().min(capacity);
            let mut timestamps = Vec::with_capacity(n);
            let mut channels = Vec::with_capacity(n);
            if reset {
                for _ in 0..n {
                    if let Some((ch, ts)) = state.pending_tags.pop_front() {
                        channels.push(ch);
                        timestamps.push(ts);
                    }
                }
            } else {
                for &(ch, ts) in state.pending_tags.iter().take(n) {
                    channels.push(ch);
                    timestamps.push(ts);
                }
            }
            let valid = if state.invalid_next_timestamp_read {
                state.invalid_next_timestamp_read = false;
                n as i32 + 3
            } else {
                n as i32
            };
            Ok((timestamps, channels, valid))
        }
    }

    /// Read the coincidence counter block.
    ///
    /// Returns one value per counter slot plus the number of exposure cycles
    /// completed since the previous read. The device zeroes the cycle count
    /// on read, so zero means the values are a repeat of data already seen.
    pub fn read_coincidence_counters(&self) -> Result<(Vec<i32>, i32), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let mut data = vec![0i32; COINC_SLOT_COUNT];
            let mut updates: i32 = 0;
            // SAFETY: data holds the fixed slot count the vendor writes;
            // updates is a valid out pointer.
            check(unsafe { qutag_sys::TDC_getCoincCounters(data.as_mut_ptr(), &mut updates) })?;
            Ok((data, updates))
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = self.mock();
            state.begin_call()?;
            state.require_addressed()?;
            let counts = state.coinc_counts.clone();
            let updates = state.coinc_updates;
            state.coinc_updates = 0;
            Ok((counts, updates))
        }
    }
}
