//! Hanbury Brown-Twiss correlation support.
//!
//! The vendor library accumulates a second-order correlation function
//! between one channel pair on the device. [`HbtEngine`] wraps those calls;
//! like [`ChannelConfig`](super::channels::ChannelConfig) it is stateless and
//! expects the caller to hold the synchronizer with the device addressed.
//!
//! The correlation function itself lives in vendor-owned descriptors that
//! must be released exactly once. `calc_g2` copies the data out and releases
//! the descriptor before returning, on success and on failure alike, so no
//! vendor memory outlives a call.

use std::time::Duration;

use crate::error::{codes, TdcError};

#[cfg(feature = "qutag_sdk")]
use crate::error::check;

use super::connection::TdcConnection;

/// Event counts accumulated on the HBT inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HbtEventCount {
    /// Events since the last correlation reset.
    pub total: i64,
    /// Events in the most recent accumulation step.
    pub last: i64,
    /// Event rate of the most recent step, in events per second.
    pub last_rate: f64,
}

/// One point of a correlation function, in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HbtPoint {
    /// Time lag of this bin relative to zero delay, in picoseconds.
    pub lag_ps: i64,
    /// Normalized g2 value.
    pub value: f64,
}

/// An owned copy of a calculated correlation function.
#[derive(Debug, Clone, PartialEq)]
pub struct HbtFunctionData {
    /// One g2 value per bin.
    pub values: Vec<f64>,
    /// Width of each bin, in device ticks.
    pub bin_width_ticks: i32,
    /// Index of the zero-delay bin.
    pub index_offset: i32,
}

impl HbtFunctionData {
    /// Expand the function into `(lag, value)` points using the device
    /// timebase.
    pub fn points(&self, timebase_ps: i64) -> Vec<HbtPoint> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &value)| HbtPoint {
                lag_ps: (i as i64 - i64::from(self.index_offset))
                    * i64::from(self.bin_width_ticks)
                    * timebase_ps,
                value,
            })
            .collect()
    }
}

/// Stateless HBT operations on an addressed quTAG device.
pub struct HbtEngine;

/// Releases a vendor correlation-function descriptor on drop.
#[cfg(feature = "qutag_sdk")]
struct HbtFnGuard(*mut qutag_sys::TDC_HbtFunction);

#[cfg(feature = "qutag_sdk")]
impl Drop for HbtFnGuard {
    fn drop(&mut self) {
        // SAFETY: the pointer came from TDC_createHbtFunction and is
        // released exactly once, here.
        unsafe { qutag_sys::TDC_releaseHbtFunction(self.0) }
    }
}

impl HbtEngine {
    /// Switch correlation accumulation on or off.
    pub fn enable(conn: &TdcConnection, enable: bool) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_enableHbt(i32::from(enable)) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.hbt_enabled = enable;
            Ok(())
        }
    }

    /// Select the correlated channel pair. Channels are the driver's 0-based
    /// numbers; the vendor library counts inputs from 1.
    pub fn set_input(conn: &TdcConnection, first: u8, second: u8) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe {
                qutag_sys::TDC_setHbtInput(i32::from(first) + 1, i32::from(second) + 1)
            })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.hbt_input = Some((i32::from(first) + 1, i32::from(second) + 1));
            Ok(())
        }
    }

    /// Set binning of the correlation function.
    pub fn set_params(
        conn: &TdcConnection,
        bin_width_ticks: i32,
        bin_count: i32,
    ) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_setHbtParams(bin_width_ticks, bin_count) })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.hbt_bin_width_ticks = bin_width_ticks;
            state.hbt_bin_count = bin_count;
            Ok(())
        }
    }

    /// Discard the accumulated correlation data and event counts.
    pub fn reset_correlations(conn: &TdcConnection) -> Result<(), TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            // SAFETY: no pointers.
            check(unsafe { qutag_sys::TDC_resetHbtCorrelations() })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            state.hbt_total_events = 0;
            state.hbt_last_events = 0;
            state.hbt_last_rate = 0.0;
            state.hbt_integration_s = 0.0;
            Ok(())
        }
    }

    /// Event counts on the correlated inputs.
    pub fn event_count(conn: &TdcConnection) -> Result<HbtEventCount, TdcError> {
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            let mut total: i64 = 0;
            let mut last: i64 = 0;
            let mut last_rate: f64 = 0.0;
            // SAFETY: all out pointers are valid.
            check(unsafe { qutag_sys::TDC_getHbtEventCount(&mut total, &mut last, &mut last_rate) })?;
            Ok(HbtEventCount {
                total,
                last,
                last_rate,
            })
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            Ok(HbtEventCount {
                total: state.hbt_total_events,
                last: state.hbt_last_events,
                last_rate: state.hbt_last_rate,
            })
        }
    }

    /// Accumulated integration time of the correlation function.
    pub fn integration_time(conn: &TdcConnection) -> Result<Duration, TdcError> {
        let seconds;
        #[cfg(feature = "qutag_sdk")]
        {
            let _ = conn;
            let mut int_time: f64 = 0.0;
            // SAFETY: int_time is a valid out pointer.
            check(unsafe { qutag_sys::TDC_getHbtIntegrationTime(&mut int_time) })?;
            seconds = int_time;
        }
        #[cfg(not(feature = "qutag_sdk"))]
        {
            let mut state = conn.mock();
            state.begin_call()?;
            seconds = state.hbt_integration_s;
        }
        Ok(Duration::from_micros((seconds * 1e6).round() as u64))
    }

    /// Calculate the current g2 function and copy it out.
    #[cfg(feature = "qutag_sdk")]
    pub fn calc_g2(conn: &TdcConnection) -> Result<HbtFunctionData, TdcError> {
        let _ = conn;
        // SAFETY: descriptor ownership passes to the guard, which releases
        // it on every exit path.
        let raw = unsafe { qutag_sys::TDC_createHbtFunction() };
        if raw.is_null() {
            return Err(TdcError::hardware(codes::TDC_ERROR));
        }
        let guard = HbtFnGuard(raw);
        // SAFETY: guard.0 is a live descriptor from TDC_createHbtFunction.
        check(unsafe { qutag_sys::TDC_calcHbtG2(guard.0) })?;

        // SAFETY: on success the library filled the descriptor; size counts
        // initialized doubles behind values.
        let (size, bin_width_ticks, index_offset, values_ptr) = unsafe {
            let fct = &*guard.0;
            (fct.size, fct.binWidth, fct.indexOffset, fct.values)
        };
        let len = size.max(0) as usize;
        let values = if values_ptr.is_null() {
            Vec::new()
        } else {
            // SAFETY: values_ptr points at len initialized doubles.
            unsafe { std::slice::from_raw_parts(values_ptr, len) }.to_vec()
        };
        Ok(HbtFunctionData {
            values,
            bin_width_ticks,
            index_offset,
        })
    }

    /// Calculate the current g2 function and copy it out (mock mode).
    #[cfg(not(feature = "qutag_sdk"))]
    pub fn calc_g2(conn: &TdcConnection) -> Result<HbtFunctionData, TdcError> {
        let mut state = conn.mock();
        state.begin_call()?;
        state.hbt_open_handles += 1;
        let result = if state.hbt_fail_calc {
            state.hbt_fail_calc = false;
            Err(TdcError::hardware(codes::TDC_ERROR))
        } else {
            Ok(HbtFunctionData {
                values: state.hbt_values.clone(),
                bin_width_ticks: state.hbt_bin_width_ticks,
                index_offset: state.hbt_index_offset,
            })
        };
        state.hbt_open_handles -= 1;
        result
    }
}
