//! Channel and device-wide parameter control.
//!
//! [`ChannelConfig`] is stateless; every function takes the connection it
//! operates on. Callers must hold the device synchronizer and have addressed
//! the connection's device, exactly as for the raw calls in
//! [`connection`](super::connection).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{codes, TdcError};

#[cfg(feature = "qutag_sdk")]
use crate::error::check;

use super::connection::TdcConnection;

// Vendor signal conditioning codes (tdcbase.h: TDC_SignalCond).
const SCOND_LVTTL: i32 = 1;
const SCOND_NIM: i32 = 2;
const SCOND_MISC: i32 = 3;
const SCOND_NONE: i32 = 4;

/// Input stage preset for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalConditioning {
    /// Fixed LVTTL levels; edge and threshold arguments are ignored.
    Lvttl,
    /// Fixed NIM levels; edge and threshold arguments are ignored.
    Nim,
    /// Adjustable: edge and threshold are taken from the caller.
    Misc,
    /// Conditioning disabled.
    None,
}

impl SignalConditioning {
    /// All presets, for configuration dropdowns.
    pub const ALL: [Self; 4] = [Self::Lvttl, Self::Nim, Self::Misc, Self::None];

    pub fn to_sdk(self) -> i32 {
        match self {
            SignalConditioning::Lvttl => SCOND_LVTTL,
            SignalConditioning::Nim => SCOND_NIM,
            SignalConditioning::Misc => SCOND_MISC,
            SignalConditioning::None => SCOND_NONE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalConditioning::Lvttl => "LVTTL",
            SignalConditioning::Nim => "NIM",
            SignalConditioning::Misc => "Misc",
            SignalConditioning::None => "None",
        }
    }
}

impl std::str::FromStr for SignalConditioning {
    type Err = TdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TdcError::OutOfRange(format!("unknown signal conditioning '{s}'")))
    }
}

/// Trigger edge for a channel's input stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalEdge {
    Rising,
    Falling,
}

impl SignalEdge {
    pub const ALL: [Self; 2] = [Self::Rising, Self::Falling];

    pub fn is_rising(self) -> bool {
        matches!(self, SignalEdge::Rising)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalEdge::Rising => "rising",
            SignalEdge::Falling => "falling",
        }
    }
}

impl std::str::FromStr for SignalEdge {
    type Err = TdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TdcError::OutOfRange(format!("unknown signal edge '{s}'")))
    }
}

/// Event filter modes offered by the vendor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    None,
    Mute,
    Coincidence,
    Sync,
}

/// Per-model feature switches.
///
/// The vendor library exposes these calls for every model but only some
/// hardware honors them; calling them on the wrong model fails. The driver
/// short-circuits unsupported calls instead.
#[derive(Debug, Clone, Copy)]
pub struct ModelCaps {
    pub channel_delay: bool,
    pub filters: bool,
}

/// The quTAG Standard supports neither per-channel delays nor event filters.
pub const QUTAG_STANDARD: ModelCaps = ModelCaps {
    channel_delay: false,
    filters: false,
};

/// Stateless parameter operations on an addressed quTAG device.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Enable exactly the channels set in `mask` (bit n = channel n).
    pub fn enable_channels(conn: &TdcConnection, mask: i32) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_enableChannels(mask) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.channel_mask = mask;
            Ok(())
        }
    }

    /// Read back the currently enabled channel mask.
    pub fn channels_enabled(conn: &TdcConnection) -> Result<i32, TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            let mut mask: i32 = 0;
            // SAFETY: mask is a valid out pointer.
            check(unsafe { qutag_sys::TDC_getChannelsEnabled(&mut mask) })?;
            Ok(mask)
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            Ok(state.channel_mask)
        }
    }

    /// Set the coincidence counter exposure (integration) time in ms.
    pub fn set_exposure_time(conn: &TdcConnection, exposure_ms: i32) -> Result<(), TdcError> {
        if !(0..=65_535).contains(&exposure_ms) {
            return Err(TdcError::OutOfRange(format!(
                "exposure {exposure_ms} ms outside 0..=65535"
            )));
        }
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_setExposureTime(exposure_ms) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.exposure_ms = exposure_ms;
            Ok(())
        }
    }

    /// Set the coincidence window in device ticks.
    pub fn set_coincidence_window(conn: &TdcConnection, window_ticks: i32) -> Result<(), TdcError> {
        if window_ticks <= 0 {
            return Err(TdcError::OutOfRange(format!(
                "coincidence window {window_ticks} ticks must be positive"
            )));
        }
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_setCoincidenceWindow(window_ticks) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.coincidence_window_ticks = window_ticks;
            Ok(())
        }
    }

    /// Resize the device timestamp buffer.
    ///
    /// The connection's cached size is updated only after the hardware
    /// accepts the new value, so a failed resize leaves reads using the size
    /// the device actually has.
    pub fn set_timestamp_buffer_size(
        conn: &mut TdcConnection,
        size: i32,
    ) -> Result<(), TdcError> {
        if size <= 0 {
            return Err(TdcError::OutOfRange(format!(
                "timestamp buffer size {size} must be positive"
            )));
        }
        #[cfg(feature = "qutag_sdk")]
        {
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_setTimestampBufferSize(size) })?;
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.buffer_size = size;
        }
        conn.set_cached_buffer_size(size);
        Ok(())
    }

    /// Configure one channel's input stage.
    pub fn configure_signal_conditioning(
        conn: &TdcConnection,
        channel: u8,
        conditioning: SignalConditioning,
        edge: SignalEdge,
        threshold_volts: f64,
    ) -> Result<(), TdcError> {
        conn.require_channel(channel)?;
        #[cfg(feature = "qutag_sdk")]
        {
            // SAFETY: no pointers.
            check(unsafe {
                qutag_sys::TDC_configureSignalConditioning(
                    i32::from(channel),
                    conditioning.to_sdk(),
                    i32::from(edge.is_rising()),
                    threshold_volts,
                )
            })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.conditioning[channel as usize] = super::connection::MockConditioning {
                conditioning: conditioning.to_sdk(),
                rising_edge: edge.is_rising(),
                threshold_volts,
            };
            Ok(())
        }
    }

    /// Set a per-channel input delay.
    ///
    /// The quTAG Standard has no delay hardware; the request is validated and
    /// then acknowledged without effect, so instrument code written against
    /// delay-capable models runs unchanged.
    pub fn set_channel_delay(
        conn: &TdcConnection,
        caps: ModelCaps,
        channel: u8,
        delay_ps: i64,
    ) -> Result<(), TdcError> {
        conn.require_channel(channel)?;
        if !caps.channel_delay {
            debug!(channel, delay_ps, "channel delay ignored on this model");
            return Ok(());
        }
        Err(TdcError::hardware(codes::TDC_NOT_AVAILABLE))
    }

    /// Configure an event filter on a channel.
    ///
    /// Filters are likewise absent on the quTAG Standard; any request is
    /// accepted and ignored.
    pub fn configure_filter(
        conn: &TdcConnection,
        caps: ModelCaps,
        channel: u8,
        kind: FilterKind,
        channel_mask: i32,
    ) -> Result<(), TdcError> {
        conn.require_channel(channel)?;
        if !caps.filters {
            debug!(channel, ?kind, channel_mask, "event filter ignored on this model");
            return Ok(());
        }
        Err(TdcError::hardware(codes::TDC_NOT_AVAILABLE))
    }
}
