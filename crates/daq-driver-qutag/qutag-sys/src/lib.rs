//! Low-level FFI bindings for the qutools quTAG time-to-digital converter
//! library (`tdcbase` / `tdchbt`).
//!
//! The vendor library is a C API addressing one "currently selected" device
//! at a time via process-global state (`TDC_addressDevice`). All functions
//! here are raw, unsafe bindings; use the `daq-driver-qutag` crate for a safe
//! wrapper that serializes access to that global state.
//!
//! # Features
//!
//! - `qutag-sdk`: link against the vendor library. Requires `QUTAG_SDK_DIR`
//!   to be set at build time. Without this feature, only the shared constants
//!   and data layouts are available (used by the driver's mock mode).
//!
//! # Note: FFI integer types
//!
//! The vendor headers use `Int32`/`Int64`/`Bln32` typedefs. Timestamps stay
//! signed (`i64`) because analysis code routinely takes differences between
//! tags; channel numbers are reduced to `u8` as only values 0..=7 occur on
//! this device family.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::c_double;

#[cfg(feature = "qutag-sdk")]
use std::os::raw::c_char;

// =============================================================================
// Return codes (tdcbase.h)
// =============================================================================

pub const TDC_Ok: i32 = 0;
pub const TDC_Error: i32 = -1;
pub const TDC_Timeout: i32 = 1;
pub const TDC_NotConnected: i32 = 2;
pub const TDC_DriverError: i32 = 3;
pub const TDC_DeviceLocked: i32 = 7;
pub const TDC_Unknown: i32 = 8;
pub const TDC_NoDevice: i32 = 9;
pub const TDC_OutOfRange: i32 = 10;
pub const TDC_CantOpen: i32 = 11;
pub const TDC_NotInitialized: i32 = 12;
pub const TDC_NotEnabled: i32 = 13;
pub const TDC_NotAvailable: i32 = 14;

/// Human-readable text for a vendor return code.
///
/// Mirrors `TDC_perror()` but is available without linking the vendor
/// library, so mock-mode drivers can produce identical error messages.
pub fn error_text(code: i32) -> &'static str {
    match code {
        TDC_Ok => "Success",
        TDC_Error => "Unspecified error",
        TDC_Timeout => "Receive timed out",
        TDC_NotConnected => "No connection was established",
        TDC_DriverError => "Error occurred within the driver",
        TDC_DeviceLocked => "Device is in use by another program",
        TDC_Unknown => "Unknown error",
        TDC_NoDevice => "Invalid device number",
        TDC_OutOfRange => "Parameter out of range",
        TDC_CantOpen => "Failed to open the device",
        TDC_NotInitialized => "Library has not been initialized",
        TDC_NotEnabled => "Requested feature is not enabled",
        TDC_NotAvailable => "Requested feature is not available",
        _ => "Unrecognized return code",
    }
}

// =============================================================================
// Signal conditioning (tdcbase.h: TDC_SignalCond)
// =============================================================================

pub const SCOND_LVTTL: i32 = 1;
pub const SCOND_NIM: i32 = 2;
pub const SCOND_MISC: i32 = 3;
pub const SCOND_NONE: i32 = 4;

// =============================================================================
// Event filters (tdcbase.h: TDC_FilterType)
// =============================================================================

pub const FILTER_NONE: i32 = 0;
pub const FILTER_MUTE: i32 = 1;
pub const FILTER_COINC: i32 = 2;
pub const FILTER_SYNC: i32 = 3;

// =============================================================================
// Fixed device layout
// =============================================================================

/// Number of coincidence counter slots returned by `TDC_getCoincCounters`
/// on the quTAG Standard (singles plus all defined channel combinations).
pub const COINC_SLOT_COUNT: usize = 59;

/// Minimum usable size of the serial-number buffer passed to
/// `TDC_getDeviceInfo` (per the vendor documentation).
pub const DEVICE_SERIAL_MIN_LEN: usize = 16;

/// Correlation function descriptor returned by `TDC_createHbtFunction`
/// (tdchbt.h: `TDC_HbtFunction`). `values` points to a vendor-owned buffer of
/// `capacity` doubles; the descriptor must be returned to the library via
/// `TDC_releaseHbtFunction` exactly once.
#[repr(C)]
pub struct TDC_HbtFunction {
    pub capacity: i32,
    pub size: i32,
    pub binWidth: i32,
    pub indexOffset: i32,
    pub values: *mut c_double,
}

// =============================================================================
// Vendor functions (linked only with the `qutag-sdk` feature)
// =============================================================================

#[cfg(feature = "qutag-sdk")]
extern "C" {
    // Discovery and lifecycle
    pub fn TDC_discover(devCount: *mut u32) -> i32;
    pub fn TDC_getDeviceInfo(
        devNo: u32,
        devType: *mut i32,
        devId: *mut i32,
        serialNo: *mut c_char,
        connected: *mut i32,
    ) -> i32;
    pub fn TDC_connect(devNo: u32) -> i32;
    pub fn TDC_disconnect(devNo: u32) -> i32;
    pub fn TDC_addressDevice(devNo: u32) -> i32;
    pub fn TDC_perror(rc: i32) -> *const c_char;

    // Device-wide settings
    pub fn TDC_getTimebase(timebase: *mut c_double) -> i32;
    pub fn TDC_enableChannels(channelMask: i32) -> i32;
    pub fn TDC_getChannelsEnabled(channelMask: *mut i32) -> i32;
    pub fn TDC_setExposureTime(exposureMs: i32) -> i32;
    pub fn TDC_setCoincidenceWindow(windowTicks: i32) -> i32;
    pub fn TDC_setTimestampBufferSize(size: i32) -> i32;
    pub fn TDC_getTimestampBufferSize(size: *mut i32) -> i32;
    pub fn TDC_configureSignalConditioning(
        channel: i32,
        conditioning: i32,
        risingEdge: i32,
        thresholdVolts: c_double,
    ) -> i32;
    pub fn TDC_configureFilter(channel: i32, filterType: i32, channelMask: i32) -> i32;

    // Bulk data
    pub fn TDC_getLastTimestamps(
        reset: i32,
        timestamps: *mut i64,
        channels: *mut u8,
        valid: *mut i32,
    ) -> i32;
    pub fn TDC_getCoincCounters(data: *mut i32, updates: *mut i32) -> i32;

    // HBT correlation (tdchbt.h)
    pub fn TDC_enableHbt(enable: i32) -> i32;
    pub fn TDC_setHbtInput(channel1: i32, channel2: i32) -> i32;
    pub fn TDC_setHbtParams(binWidth: i32, binCount: i32) -> i32;
    pub fn TDC_resetHbtCorrelations() -> i32;
    pub fn TDC_getHbtEventCount(
        totalCount: *mut i64,
        lastCount: *mut i64,
        lastRate: *mut c_double,
    ) -> i32;
    pub fn TDC_getHbtIntegrationTime(intTime: *mut c_double) -> i32;
    pub fn TDC_createHbtFunction() -> *mut TDC_HbtFunction;
    pub fn TDC_releaseHbtFunction(fct: *mut TDC_HbtFunction);
    pub fn TDC_calcHbtG2(fct: *mut TDC_HbtFunction) -> i32;
}
