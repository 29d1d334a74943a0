//! Attach responses and region files are checked before anything is used.

mod common;

use common::{DriverSetup, MockDriver, client_config};
use std::sync::Arc;
use tensorpool_client::{
    AttachExpectations, Consumer, ErrorCode, LoopbackBus, Producer, TpError,
};
use tp::config::ClientConfig;
use tp::control::{AttachResponse, ConsumerMode};

fn attach_with(tamper: fn(&mut AttachResponse)) -> (TpError, usize) {
    let driver = MockDriver::with_setup(DriverSetup {
        tamper: Some(tamper),
        ..DriverSetup::default()
    });
    let err = Producer::attach(
        driver.transport(),
        client_config(1),
        11,
        &AttachExpectations::any(),
    )
    .unwrap_err();
    (err, driver.leases().len())
}

/// Fails after the lease was granted; the lease must be handed back.
fn mapping_fails_with(tamper: fn(&mut AttachResponse)) -> TpError {
    let (err, leases) = attach_with(tamper);
    assert_eq!(leases, 0, "lease left behind after {err}");
    err
}

#[test]
fn null_epoch_is_protocol_error() {
    let (err, _) = attach_with(|r| r.epoch = u64::MAX);
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert!(err.to_string().contains("epoch"));
}

#[test]
fn null_lease_id_is_protocol_error() {
    let (err, _) = attach_with(|r| r.lease_id = u64::MAX);
    assert_eq!(err.code(), ErrorCode::Protocol);
}

#[test]
fn empty_header_uri_is_protocol_error() {
    let (err, _) = attach_with(|r| r.header_region_uri.clear());
    assert_eq!(err.code(), ErrorCode::Protocol);
}

#[test]
fn empty_pool_uri_is_protocol_error() {
    let (err, _) = attach_with(|r| r.pools[0].region_uri.clear());
    assert_eq!(err.code(), ErrorCode::Protocol);
}

#[test]
fn mismatched_layout_version_is_protocol_error() {
    let (err, _) = attach_with(|r| r.layout_version += 1);
    assert_eq!(err.code(), ErrorCode::Protocol);
}

#[test]
fn superblock_epoch_disagreeing_with_response_is_rejected() {
    let err = mapping_fails_with(|r| r.epoch += 1);
    assert_eq!(err.code(), ErrorCode::Protocol);
}

#[test]
fn pool_stride_disagreeing_with_file_is_rejected() {
    let err = mapping_fails_with(|r| r.pools[0].stride_bytes = 128);
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert!(err.to_string().contains("stride"));
}

#[test]
fn unknown_uri_scheme_is_unsupported() {
    let err = mapping_fails_with(|r| r.header_region_uri = "shm:memfd?name=tp".to_string());
    assert_eq!(err.code(), ErrorCode::Unsupported);
}

#[test]
fn missing_region_file_is_shm_error() {
    let err = mapping_fails_with(|r| {
        r.header_region_uri = "shm:file?path=/nonexistent/tensorpool/header".to_string()
    });
    assert_eq!(err.code(), ErrorCode::Shm);
}

#[test]
fn second_producer_is_rejected() {
    let driver = MockDriver::start();
    let _first = Producer::attach(
        driver.transport(),
        client_config(1),
        3,
        &AttachExpectations::any(),
    )
    .unwrap();
    let err = Producer::attach(
        driver.transport(),
        client_config(2),
        3,
        &AttachExpectations::any(),
    )
    .unwrap_err();
    match err {
        TpError::Rejected { message } => assert_eq!(message, "producer already attached"),
        other => panic!("expected rejection, got {other}"),
    }
    assert_eq!(driver.leases().len(), 1);
}

#[test]
fn attach_without_driver_times_out() {
    let bus = LoopbackBus::new();
    let config = ClientConfig {
        attach_timeout_ns: 30_000_000,
        attach_retry_interval_ns: 5_000_000,
        ..client_config(1)
    };
    let err = Consumer::attach(
        Arc::new(bus.connect()),
        config,
        1,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(err.is_retryable());
}

#[test]
fn geometry_expectations_are_enforced() {
    let driver = MockDriver::start();

    let wrong_ring = Consumer::attach(
        driver.transport(),
        client_config(1),
        4,
        ConsumerMode::Stream,
        &AttachExpectations::any().with_header_nslots(16),
    )
    .unwrap_err();
    assert_eq!(wrong_ring.code(), ErrorCode::Protocol);

    let wrong_pool = Consumer::attach(
        driver.transport(),
        client_config(2),
        4,
        ConsumerMode::Stream,
        &AttachExpectations::any().with_pool(1, 2048),
    )
    .unwrap_err();
    assert_eq!(wrong_pool.code(), ErrorCode::Protocol);

    let exact = Consumer::attach(
        driver.transport(),
        client_config(3),
        4,
        ConsumerMode::Stream,
        &AttachExpectations::any()
            .with_header_nslots(8)
            .with_pool(1, 1024)
            .with_pool(2, 64 * 1024),
    )
    .unwrap();
    assert_eq!(exact.nslots(), 8);
}
