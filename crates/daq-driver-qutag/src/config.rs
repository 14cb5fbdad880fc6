//! Driver configuration.
//!
//! A [`QutagConfig`] captures everything the driver applies to the device at
//! open time. Values deserialize from the experiment's TOML configuration;
//! every field has a default so an empty table selects the first discovered
//! device with factory-reasonable settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::components::channels::SignalEdge;
use crate::components::connection::TdcConnection;
use crate::error::TdcError;

/// Settings applied to a quTAG device when a session opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QutagConfig {
    /// Serial number of the device to open. Empty string selects the first
    /// enumerated device.
    pub device_descriptor: String,

    /// Capacity of the on-device timestamp buffer, in tags.
    pub timestamp_buffer_size: i32,

    /// Exposure (integration) time for the coincidence counters, in ms.
    pub exposure_ms: u32,

    /// Coincidence window, in picoseconds. Converted to device ticks using
    /// the timebase read from the hardware.
    pub coincidence_window_ps: i64,

    /// Trigger edge applied to every input at open time.
    pub trigger_edge: SignalEdge,

    /// Trigger threshold applied to every input at open time, in volts.
    pub threshold_volts: f64,

    /// Upper bound on waiting for the device synchronizer before a hardware
    /// operation is abandoned with [`TdcError::Timeout`].
    pub op_timeout_ms: u64,
}

impl Default for QutagConfig {
    fn default() -> Self {
        Self {
            device_descriptor: String::new(),
            timestamp_buffer_size: 1000,
            exposure_ms: 100,
            coincidence_window_ps: 10_000,
            trigger_edge: SignalEdge::Rising,
            threshold_volts: 1.0,
            op_timeout_ms: 1000,
        }
    }
}

impl QutagConfig {
    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Descriptors a user may select from: everything currently enumerable,
    /// plus the configured descriptor even while the device is unplugged, so
    /// a saved experiment stays loadable.
    pub fn selectable_descriptors(&self) -> Result<Vec<String>, TdcError> {
        let mut descriptors = TdcConnection::enumerate()?;
        if !self.device_descriptor.is_empty()
            && !descriptors.iter().any(|d| d == &self.device_descriptor)
        {
            descriptors.push(self.device_descriptor.clone());
        }
        if descriptors.is_empty() {
            return Err(TdcError::NoDevices);
        }
        Ok(descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = QutagConfig::default();
        assert_eq!(cfg.device_descriptor, "");
        assert_eq!(cfg.timestamp_buffer_size, 1000);
        assert_eq!(cfg.exposure_ms, 100);
        assert_eq!(cfg.coincidence_window_ps, 10_000);
        assert_eq!(cfg.trigger_edge, SignalEdge::Rising);
        assert!((cfg.threshold_volts - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.op_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = QutagConfig::from_toml_str(
            r#"
            device_descriptor = "TDC002"
            coincidence_window_ps = 2500
            "#,
        )
        .unwrap();
        assert_eq!(cfg.device_descriptor, "TDC002");
        assert_eq!(cfg.coincidence_window_ps, 2500);
        assert_eq!(cfg.exposure_ms, 100);
    }

    #[test]
    fn trigger_edge_from_toml() {
        let cfg = QutagConfig::from_toml_str(r#"trigger_edge = "falling""#).unwrap();
        assert_eq!(cfg.trigger_edge, SignalEdge::Falling);
    }
}
