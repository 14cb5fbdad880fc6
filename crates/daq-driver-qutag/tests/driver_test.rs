//! Integration tests for QutagDriver session handling.
//!
//! ## Running Tests
//!
//! ```bash
//! # Mock mode tests
//! cargo test -p daq-driver-qutag --test driver_test
//!
//! # Hardware tests (require a connected quTAG and the vendor SDK)
//! cargo test -p daq-driver-qutag --test driver_test --features "qutag_sdk,hardware_tests"
//! ```

use daq_driver_qutag::components::synchronizer::TdcSynchronizer;
use daq_driver_qutag::{QutagConfig, QutagDriver, TdcError, QUTAG_CHANNEL_COUNT};
use tracing_subscriber::EnvFilter;

#[allow(dead_code)]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[allow(dead_code)]
fn private_driver(config: QutagConfig) -> QutagDriver {
    QutagDriver::with_synchronizer(config, TdcSynchronizer::new())
}

// =============================================================================
// Mock Mode Driver Tests
// =============================================================================

#[cfg(not(feature = "qutag_sdk"))]
mod mock_driver {
    use super::*;
    use daq_driver_qutag::{CoincidenceSource, TimestampSource};
    use serial_test::serial;

    #[tokio::test]
    async fn enumerate_lists_mock_devices() {
        let devices = QutagDriver::enumerate().unwrap();
        assert_eq!(devices, vec!["TDC001".to_string(), "TDC002".to_string()]);
    }

    #[tokio::test]
    #[serial]
    async fn open_with_global_synchronizer() {
        init_tracing();
        let driver = QutagDriver::new(QutagConfig::default());
        driver.open().await.unwrap();
        assert!(driver.is_open().await);
        driver.close().await.unwrap();
        assert!(!driver.is_open().await);
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let driver = private_driver(QutagConfig::default());
        driver.open().await.unwrap();
        let calls_after_first = driver.with_mock(|state| state.sdk_calls).await;
        driver.open().await.unwrap();
        // The second open must not touch the device again.
        let calls_after_second = driver.with_mock(|state| state.sdk_calls).await;
        assert_eq!(calls_after_first, calls_after_second);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let driver = private_driver(QutagConfig::default());
        driver.open().await.unwrap();
        driver.close().await.unwrap();
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_descriptor_is_not_found() {
        let config = QutagConfig {
            device_descriptor: "TDC999".into(),
            ..QutagConfig::default()
        };
        let driver = private_driver(config);
        let err = driver.open().await.unwrap_err();
        assert!(matches!(err, TdcError::NotFound(ref d) if d == "TDC999"));
        assert!(!driver.is_open().await);
    }

    #[tokio::test]
    async fn open_applies_configured_defaults() {
        let config = QutagConfig {
            timestamp_buffer_size: 500,
            exposure_ms: 250,
            coincidence_window_ps: 4000,
            ..QutagConfig::default()
        };
        let driver = private_driver(config);
        driver.open().await.unwrap();

        assert_eq!(driver.buffer_size().await, 500);
        assert_eq!(driver.channel_count().await, QUTAG_CHANNEL_COUNT);
        assert_eq!(driver.timebase_ps().await.unwrap(), 1);

        driver
            .with_mock(|state| {
                assert_eq!(state.buffer_size, 500);
                assert_eq!(state.exposure_ms, 250);
                assert_eq!(state.coincidence_window_ticks, 4000);
                assert_eq!(state.channel_mask, 0b11111);
            })
            .await;
    }

    #[tokio::test]
    async fn failed_disconnect_still_leaves_session_closed() {
        let driver = private_driver(QutagConfig::default());
        driver.open().await.unwrap();

        driver
            .with_mock(|state| state.fail_next_call = Some(-1))
            .await;
        let err = driver.close().await.unwrap_err();
        assert!(matches!(err, TdcError::Hardware { code: -1, .. }));
        // The session is marked closed before the vendor disconnect runs.
        assert!(!driver.is_open().await);
    }

    #[tokio::test]
    async fn reset_drops_buffered_data_and_reopens() {
        let driver = private_driver(QutagConfig::default());
        driver.open().await.unwrap();

        driver
            .with_mock(|state| {
                state.pending_tags.push_back((0, 100));
                state.coinc_counts[1] = 7;
                state.coinc_updates = 1;
            })
            .await;
        driver.refresh_timestamps().await.unwrap();
        driver.coincidence_counts_for(1).await.unwrap();

        driver.reset().await.unwrap();
        assert!(driver.is_open().await);
        assert!(driver.coincidence_snapshot().await.is_none());
        assert_eq!(driver.timestamp_count(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn operations_require_open_session() {
        let driver = private_driver(QutagConfig::default());
        let err = driver.set_exposure_time(10).await.unwrap_err();
        assert!(matches!(err, TdcError::NotOpen(_)));
        let err = driver.timebase_ps().await.unwrap_err();
        assert!(matches!(err, TdcError::NotOpen(_)));
    }

    #[tokio::test]
    async fn selectable_descriptors_include_configured_offline_device() {
        let config = QutagConfig {
            device_descriptor: "TDC777".into(),
            ..QutagConfig::default()
        };
        let descriptors = config.selectable_descriptors().unwrap();
        assert!(descriptors.contains(&"TDC001".to_string()));
        assert!(descriptors.contains(&"TDC777".to_string()));
    }
}

// =============================================================================
// Hardware Tests (require a connected quTAG)
// =============================================================================

#[cfg(all(feature = "qutag_sdk", feature = "hardware_tests"))]
mod hardware_driver {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    /// Hardware tests must not address the device concurrently.
    static DEVICE_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[tokio::test]
    async fn open_first_device() {
        let _lock = DEVICE_LOCK.lock().unwrap();
        init_tracing();
        let driver = QutagDriver::new(QutagConfig::default());
        driver.open().await.unwrap();
        assert!(driver.timebase_ps().await.unwrap() > 0);
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn enumerate_finds_a_device() {
        let _lock = DEVICE_LOCK.lock().unwrap();
        let devices = QutagDriver::enumerate().unwrap();
        assert!(!devices.is_empty(), "no quTAG device discovered");
    }
}
