//! Error types for the quTAG driver.
//!
//! One enum covers every failure mode of the adapter. Hardware-facing
//! operations never retry internally; retry policy belongs to the task
//! scheduler driving the instruments. `Timeout` is the only variant callers
//! should treat as transient: it means the device synchronizer could not be
//! acquired in time and the hardware operation was never started.

use std::time::Duration;
use thiserror::Error;

/// Vendor return codes used by the driver's own code paths. These mirror the
/// `tdcbase.h` values so mock mode produces the same codes the real library
/// would.
pub mod codes {
    pub const TDC_OK: i32 = 0;
    pub const TDC_ERROR: i32 = -1;
    pub const TDC_NOT_CONNECTED: i32 = 2;
    pub const TDC_NO_DEVICE: i32 = 9;
    pub const TDC_OUT_OF_RANGE: i32 = 10;
    pub const TDC_NOT_AVAILABLE: i32 = 14;

    /// Human-readable text for a vendor return code (mirrors `TDC_perror`).
    pub fn text(code: i32) -> &'static str {
        match code {
            TDC_OK => "Success",
            TDC_ERROR => "Unspecified error",
            1 => "Receive timed out",
            TDC_NOT_CONNECTED => "No connection was established",
            3 => "Error occurred within the driver",
            7 => "Device is in use by another program",
            8 => "Unknown error",
            TDC_NO_DEVICE => "Invalid device number",
            TDC_OUT_OF_RANGE => "Parameter out of range",
            11 => "Failed to open the device",
            12 => "Library has not been initialized",
            13 => "Requested feature is not enabled",
            TDC_NOT_AVAILABLE => "Requested feature is not available",
            _ => "Unrecognized return code",
        }
    }
}

/// Primary error type for the quTAG driver.
#[derive(Error, Debug)]
pub enum TdcError {
    /// A vendor SDK call reported non-success. Carries the numeric return
    /// code and the vendor's message; surfaced as a hard failure of the
    /// requested operation, never retried here.
    #[error("quTAG hardware error {code}: {message}")]
    Hardware { code: i32, message: String },

    /// The device synchronizer was not acquired within the configured
    /// hardware-operation timeout. Transient: the hardware operation never
    /// started.
    #[error("device synchronizer not acquired within {0:?}")]
    Timeout(Duration),

    /// A channel or combination index outside the valid bound for this
    /// hardware variant. Raised before any hardware access.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The configured device descriptor did not match any enumerated device.
    #[error("device not found: {0}")]
    NotFound(String),

    /// The device returned structurally inconsistent data from a bulk read.
    /// The read is discarded entirely, never partially applied.
    #[error("invalid data from device: {0}")]
    InvalidData(String),

    /// No device is discoverable and none is pre-registered, so
    /// configuration cannot proceed.
    #[error("no quTAG device is available")]
    NoDevices,

    /// The operation requires an open session (e.g. a tick conversion while
    /// the timebase is still unread).
    #[error("device session is not open: {0}")]
    NotOpen(&'static str),
}

impl TdcError {
    /// Wrap a vendor return code into a `Hardware` error.
    pub fn hardware(code: i32) -> Self {
        TdcError::Hardware {
            code,
            message: codes::text(code).to_string(),
        }
    }
}

/// Translate a vendor return code, succeeding only on `TDC_Ok`.
pub fn check(code: i32) -> Result<(), TdcError> {
    if code == codes::TDC_OK {
        Ok(())
    } else {
        Err(TdcError::hardware(code))
    }
}
