//! Integration tests for timestamp and coincidence counter readout.

#![cfg(not(feature = "qutag_sdk"))]

use daq_driver_qutag::components::synchronizer::TdcSynchronizer;
use daq_driver_qutag::{
    CoincidenceSource, QutagConfig, QutagDriver, TdcError, TimestampSource,
};

async fn open_driver() -> QutagDriver {
    let driver = QutagDriver::with_synchronizer(QutagConfig::default(), TdcSynchronizer::new());
    driver.open().await.unwrap();
    driver
}

// =============================================================================
// Timestamps
// =============================================================================

#[tokio::test]
async fn timestamps_fan_out_per_channel_in_order() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state
                .pending_tags
                .extend([(0, 10), (1, 20), (0, 30), (4, 40), (0, 50)]);
        })
        .await;

    assert_eq!(driver.timestamps(0).await.unwrap(), vec![10, 30, 50]);
    assert_eq!(driver.timestamps(1).await.unwrap(), vec![20]);
    assert_eq!(driver.timestamps(4).await.unwrap(), vec![40]);
}

#[tokio::test]
async fn timestamps_are_consumed_once() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| state.pending_tags.extend([(2, 1), (2, 2)]))
        .await;

    assert_eq!(driver.timestamps(2).await.unwrap(), vec![1, 2]);
    assert!(driver.timestamps(2).await.unwrap().is_empty());

    // New arrivals show up on the next read.
    driver.with_mock(|state| state.pending_tags.push_back((2, 3))).await;
    assert_eq!(driver.timestamps(2).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn timestamp_count_does_not_consume() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| state.pending_tags.extend([(1, 5), (1, 6)]))
        .await;

    assert_eq!(driver.timestamp_count(1).await.unwrap(), 2);
    assert_eq!(driver.timestamp_count(1).await.unwrap(), 2);
    assert_eq!(driver.timestamps(1).await.unwrap(), vec![5, 6]);
}

#[tokio::test]
async fn clear_timestamps_discards_one_channel() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| state.pending_tags.extend([(0, 1), (3, 2)]))
        .await;
    driver.refresh_timestamps().await.unwrap();

    driver.clear_timestamps(0).await.unwrap();
    assert!(driver.timestamps(0).await.unwrap().is_empty());
    assert_eq!(driver.timestamps(3).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn inconsistent_device_read_is_rejected() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state.pending_tags.push_back((0, 9));
            state.invalid_next_timestamp_read = true;
        })
        .await;

    let err = driver.timestamps(0).await.unwrap_err();
    assert!(matches!(err, TdcError::InvalidData(_)));
    // Nothing from the bad read reaches the queues.
    assert_eq!(driver.timestamp_count(0).await.unwrap(), 0);
}

#[tokio::test]
async fn timestamp_channel_is_bounds_checked() {
    let driver = open_driver().await;
    let calls_before = driver.with_mock(|state| state.sdk_calls).await;
    let err = driver.timestamps(9).await.unwrap_err();
    assert!(matches!(err, TdcError::OutOfRange(_)));
    let calls_after = driver.with_mock(|state| state.sdk_calls).await;
    assert_eq!(calls_before, calls_after);
}

// =============================================================================
// Coincidence counters
// =============================================================================

#[tokio::test]
async fn update_count_is_reported_once_per_slot() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state.coinc_counts[1] = 11;
            state.coinc_counts[2] = 22;
            state.coinc_updates = 3;
        })
        .await;

    // First sample of each slot carries the shared cycle count; repeats of
    // the same snapshot report zero pending updates.
    assert_eq!(driver.coincidence_counts_for(1).await.unwrap(), (11, 3));
    assert_eq!(driver.coincidence_counts_for(1).await.unwrap(), (11, 0));
    assert_eq!(driver.coincidence_counts_for(2).await.unwrap(), (22, 3));
}

#[tokio::test]
async fn fresh_cycle_resets_reporting() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state.coinc_counts[1] = 5;
            state.coinc_updates = 1;
        })
        .await;
    assert_eq!(driver.coincidence_counts_for(1).await.unwrap(), (5, 1));

    driver
        .with_mock(|state| {
            state.coinc_counts[1] = 8;
            state.coinc_updates = 2;
        })
        .await;
    assert_eq!(driver.coincidence_counts_for(1).await.unwrap(), (8, 2));
}

#[tokio::test]
async fn unsampled_cache_reads_zero() {
    let driver = open_driver().await;
    // No exposure cycle has completed; the device block is all zeros with
    // updates == 0, which must not populate the cache.
    assert_eq!(driver.coincidence_counts_for(0).await.unwrap(), (0, 0));
    assert!(driver.coincidence_snapshot().await.is_none());
}

#[tokio::test]
async fn slot_is_bounds_checked_before_hardware() {
    let driver = open_driver().await;
    let calls_before = driver.with_mock(|state| state.sdk_calls).await;
    let err = driver.coincidence_counts_for(59).await.unwrap_err();
    assert!(matches!(err, TdcError::OutOfRange(_)));
    let calls_after = driver.with_mock(|state| state.sdk_calls).await;
    assert_eq!(calls_before, calls_after);
}

#[tokio::test]
async fn whole_block_refresh_survives_idle_cycles() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state.coinc_counts[4] = 9;
            state.coinc_updates = 2;
        })
        .await;

    let (counts, updates) = driver.refresh_coincidence_counts().await.unwrap().unwrap();
    assert_eq!(counts[4], 9);
    assert_eq!(updates, 2);

    // The device has completed no further cycle; the cached block persists.
    let (counts, updates) = driver.refresh_coincidence_counts().await.unwrap().unwrap();
    assert_eq!(counts[4], 9);
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn snapshot_copies_current_block() {
    let driver = open_driver().await;
    driver
        .with_mock(|state| {
            state.coinc_counts[0] = 100;
            state.coinc_updates = 1;
        })
        .await;
    driver.coincidence_counts_for(0).await.unwrap();

    let (counts, updates) = driver.coincidence_snapshot().await.unwrap();
    assert_eq!(counts[0], 100);
    assert_eq!(updates, 1);
}
