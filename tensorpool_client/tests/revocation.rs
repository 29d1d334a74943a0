//! Lease revocation, driver shutdown, keepalives and producer restarts.

mod common;

use common::{MockDriver, client_config};
use std::time::{Duration, Instant};
use tensorpool_client::{
    AttachExpectations, Consumer, DriverClient, ErrorCode, HandleState, Producer, TpError,
};
use tp::control::{ConsumerMode, Role};
use tp::shm::slot::{Dtype, TensorHeader};

/// Call `work` until it fails, for at most two seconds.
fn until_err(mut work: impl FnMut() -> Result<usize, TpError>) -> TpError {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if let Err(e) = work() {
            return e;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("handle never failed");
}

fn tensor() -> TensorHeader {
    TensorHeader::contiguous(Dtype::U16, &[4]).unwrap()
}

#[test]
fn revoked_producer_stops_publishing() {
    let driver = MockDriver::start();
    let mut producer = Producer::attach(
        driver.transport(),
        client_config(1),
        20,
        &AttachExpectations::any(),
    )
    .unwrap();
    let mut consumer = Consumer::attach(
        driver.transport(),
        client_config(2),
        20,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap();
    producer.offer_frame(&[0u8; 8], &tensor()).unwrap();

    driver.revoke(producer.lease().lease_id);
    let err = until_err(|| producer.do_work());
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert_eq!(producer.state(), HandleState::Revoked);
    assert_eq!(
        producer.offer_frame(&[0u8; 8], &tensor()).unwrap_err().code(),
        ErrorCode::Protocol
    );

    // Only the producer's lease was revoked.
    consumer.do_work().unwrap();
    assert_eq!(consumer.state(), HandleState::Attached);
    assert_eq!(consumer.try_read_frame().unwrap().seq(), 1);

    // The driver already forgot the lease; closing still releases the mapping.
    let close = producer.close().unwrap_err();
    assert_eq!(close.code(), ErrorCode::NotFound);
}

#[test]
fn revoked_consumer_cannot_read() {
    let driver = MockDriver::start();
    let mut producer = Producer::attach(
        driver.transport(),
        client_config(1),
        21,
        &AttachExpectations::any(),
    )
    .unwrap();
    let mut consumer = Consumer::attach(
        driver.transport(),
        client_config(2),
        21,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap();

    driver.revoke(consumer.lease().lease_id);
    let err = until_err(|| consumer.do_work());
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert_eq!(consumer.state(), HandleState::Revoked);

    producer.offer_frame(&[1u8; 8], &tensor()).unwrap();
    assert!(matches!(
        consumer.try_read_frame(),
        Err(TpError::Revoked { .. })
    ));
    producer.do_work().unwrap();
}

#[test]
fn shutdown_fails_attach_fast() {
    let driver = MockDriver::start();
    let mut client = DriverClient::new(driver.transport(), client_config(1)).unwrap();
    let grant = client
        .attach(22, Role::Consumer, &AttachExpectations::any())
        .unwrap();

    driver.shutdown();
    let err = until_err(|| {
        client.poll_control()?;
        client.check_lease(&grant.lease).map(|()| 0)
    });
    assert!(matches!(err, TpError::DriverShutdown));
    assert!(client.session().is_shutdown());

    let started = Instant::now();
    let err = client
        .attach(22, Role::Consumer, &AttachExpectations::any())
        .unwrap_err();
    assert!(matches!(err, TpError::DriverShutdown));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(matches!(
        client.detach(&grant.lease),
        Err(TpError::DriverShutdown)
    ));
}

#[test]
fn shutdown_revokes_attached_handles() {
    let driver = MockDriver::start();
    let mut producer = Producer::attach(
        driver.transport(),
        client_config(1),
        23,
        &AttachExpectations::any(),
    )
    .unwrap();
    let mut consumer = Consumer::attach(
        driver.transport(),
        client_config(2),
        23,
        ConsumerMode::Latest,
        &AttachExpectations::any(),
    )
    .unwrap();

    driver.shutdown();
    assert_eq!(until_err(|| producer.do_work()).code(), ErrorCode::Protocol);
    assert_eq!(until_err(|| consumer.do_work()).code(), ErrorCode::Protocol);
    assert_eq!(producer.state(), HandleState::Revoked);
    assert_eq!(consumer.state(), HandleState::Revoked);

    assert!(matches!(producer.close(), Err(TpError::DriverShutdown)));
    assert!(matches!(consumer.close(), Err(TpError::DriverShutdown)));
}

#[test]
fn keepalives_reach_driver_and_extend_lease() {
    let driver = MockDriver::start();
    let mut consumer = Consumer::attach(
        driver.transport(),
        client_config(2),
        24,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap();
    let first_expiry = consumer.lease().expiry_ns;

    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(2));
        consumer.do_work().unwrap();
    }
    assert!(driver.wait_for(|s| s.keepalives >= 1));
    assert!(consumer.lease().expiry_ns > first_expiry);
}

#[test]
fn producer_restart_revokes_consumers_of_old_epoch() {
    let driver = MockDriver::start();
    let mut producer = Producer::attach(
        driver.transport(),
        client_config(1),
        25,
        &AttachExpectations::any(),
    )
    .unwrap();
    let mut consumer = Consumer::attach(
        driver.transport(),
        client_config(2),
        25,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap();
    assert_eq!(producer.epoch(), 1);

    producer.offer_frame(&[9u8; 8], &tensor()).unwrap();
    assert_eq!(consumer.try_read_frame().unwrap().seq(), 1);
    producer.close().unwrap();

    let mut restarted = Producer::attach(
        driver.transport(),
        client_config(3),
        25,
        &AttachExpectations::any(),
    )
    .unwrap();
    assert_eq!(restarted.epoch(), 2);
    assert_eq!(restarted.next_seq(), 1);
    restarted.do_work().unwrap();

    let err = consumer.do_work().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Protocol);
    assert!(err.to_string().contains("epoch"));
    assert_eq!(consumer.state(), HandleState::Revoked);

    // A fresh attach follows the new epoch.
    let mut rejoined = Consumer::attach(
        driver.transport(),
        client_config(4),
        25,
        ConsumerMode::Stream,
        &AttachExpectations::any(),
    )
    .unwrap();
    restarted.offer_frame(&[3u8; 8], &tensor()).unwrap();
    let frame = rejoined.try_read_frame().unwrap();
    assert_eq!((frame.seq(), frame.payload()), (1, &[3u8; 8][..]));
}
