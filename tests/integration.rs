#![cfg(feature = "mock")] // Needs the simulated controller

//! End-to-end port scenarios against the simulated SCB controller

use std::sync::Mutex;

use scb_master::platform::mock::{drive, run_until_idle, BusTransaction, MockScb};
use scb_master::platform::{BusFault, ScbmError, TransferError};
use scb_master::scbm::{Completion, Direction, Notify, Port, Registry, Settings, Timeout};

const TUNER: u16 = 0x4C;

fn registry() -> Registry<MockScb> {
    Registry::new(|_| MockScb::new())
}

fn leak(data: &[u8]) -> &'static mut [u8] {
    Box::leak(data.to_vec().into_boxed_slice())
}

type Seen = (Direction, u16, usize, Result<(), ScbmError>);

fn summary(c: &Completion) -> Seen {
    (c.direction, c.address, c.transferred, c.result)
}

#[tokio::test]
async fn blocking_write_to_tuner() {
    let registry = registry();
    let settings = Settings {
        bitrate_khz: 400,
        core_clock_khz: 169_000,
        bus_delay_ns: 0,
        ..Settings::default()
    };
    let port = Port::init(&registry, settings).unwrap();
    port.device().hardware().attach(TUNER);

    let data = [0x00, 0x01, 0x40, 0x00];
    let result = drive(port.device(), port.write(TUNER, &data, Timeout::Infinite)).await;
    assert_eq!(result, Ok(4));
    assert_eq!(
        port.device().hardware().transactions(),
        vec![BusTransaction::Write {
            addr: TUNER,
            data: data.to_vec()
        }]
    );
}

static NACK_SEEN: Mutex<Vec<Seen>> = Mutex::new(Vec::new());

fn record_nack(c: Completion) {
    NACK_SEEN.lock().unwrap().push(summary(&c));
}

#[test]
fn callback_reports_address_nack() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();

    port.submit_write(0x3B, leak(&[0x00, 0x01]), Notify::Callback(record_nack)).unwrap();
    assert!(run_until_idle(port.device()));

    assert_eq!(
        *NACK_SEEN.lock().unwrap(),
        vec![(
            Direction::Write,
            0x3B,
            0,
            Err(ScbmError::Bus(BusFault::AddressNack))
        )]
    );
    assert_eq!(port.error_status(), Some(BusFault::AddressNack));
}

#[test]
fn async_read_write_with_callback() {
    static SEEN: Mutex<Vec<Seen>> = Mutex::new(Vec::new());
    static DATA: Mutex<Vec<u8>> = Mutex::new(Vec::new());
    fn on_done(c: Completion) {
        if c.direction == Direction::Read {
            DATA.lock().unwrap().extend_from_slice(c.data());
        }
        SEEN.lock().unwrap().push(summary(&c));
    }

    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(TUNER);

    port.submit_write(TUNER, leak(&[7, 8, 9]), Notify::Callback(on_done)).unwrap();
    port.submit_read(TUNER, leak(&[0; 3]), Notify::Callback(on_done)).unwrap();
    assert!(run_until_idle(port.device()));

    assert_eq!(
        *SEEN.lock().unwrap(),
        vec![
            (Direction::Write, TUNER, 3, Ok(())),
            (Direction::Read, TUNER, 3, Ok(())),
        ]
    );
    assert_eq!(*DATA.lock().unwrap(), vec![7, 8, 9]);
}

#[test]
fn mailbox_results_in_submission_order() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.attach(0x60);

    port.submit_write(TUNER, leak(&[1]), Notify::Mailbox).unwrap();
    port.submit_write(0x61, leak(&[2]), Notify::Mailbox).unwrap();
    port.submit_write(0x60, leak(&[3, 4]), Notify::Mailbox).unwrap();
    assert!(run_until_idle(port.device()));

    let results: Vec<Seen> = (0..3)
        .map(|_| summary(&port.try_get_result().unwrap()))
        .collect();
    assert_eq!(
        results,
        vec![
            (Direction::Write, TUNER, 1, Ok(())),
            (
                Direction::Write,
                0x61,
                0,
                Err(ScbmError::Bus(BusFault::AddressNack))
            ),
            (Direction::Write, 0x60, 2, Ok(())),
        ]
    );
    assert!(matches!(port.try_get_result(), Err(ScbmError::WouldBlock)));
}

#[test]
fn discard_frees_slot_without_result() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(TUNER);

    port.submit_write(TUNER, leak(&[5, 6]), Notify::Discard).unwrap();
    assert!(run_until_idle(port.device()));

    assert_eq!(port.device().hardware().data(TUNER), vec![5, 6]);
    assert!(matches!(port.try_get_result(), Err(ScbmError::WouldBlock)));
}

#[test]
fn too_many_queued_would_block() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(TUNER);

    let mut accepted = 0;
    let mut rejected = 0;
    for i in 0..16u8 {
        match port.submit_write(TUNER, leak(&[i]), Notify::Discard) {
            Ok(()) => accepted += 1,
            Err(refused) => {
                // The buffer comes back untouched
                assert_eq!(refused.0, &[i]);
                rejected += 1;
            }
        }
    }
    assert_eq!((accepted, rejected), (8, 8));

    assert!(run_until_idle(port.device()));
    assert_eq!(port.device().hardware().data(TUNER), vec![7]);
    assert!(port.submit_write(TUNER, leak(&[0xEE]), Notify::Discard).is_ok());
}

#[test]
fn cancel_queue_then_queue_new() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.stall_after(1);

    for _ in 0..3 {
        port.submit_write(TUNER, leak(&[1, 2, 3]), Notify::Mailbox).unwrap();
    }
    run_until_idle(port.device());
    port.cancel();

    let cancelled: Vec<(usize, Result<(), ScbmError>)> = (0..3)
        .map(|_| {
            let c = port.try_get_result().unwrap();
            (c.transferred, c.result)
        })
        .collect();
    assert_eq!(
        cancelled,
        vec![
            (1, Err(ScbmError::Cancelled)),
            (0, Err(ScbmError::Cancelled)),
            (0, Err(ScbmError::Cancelled)),
        ]
    );
    assert!(port.device().is_idle());

    hw.resume();
    port.submit_write(TUNER, leak(&[9]), Notify::Mailbox).unwrap();
    assert!(run_until_idle(port.device()));
    assert_eq!(port.try_get_result().unwrap().result, Ok(()));
}

#[test]
fn cancel_delivers_callbacks_once() {
    static SEEN: Mutex<Vec<Seen>> = Mutex::new(Vec::new());
    fn on_done(c: Completion) {
        SEEN.lock().unwrap().push(summary(&c));
    }

    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(TUNER);

    port.submit_read(TUNER, leak(&[0; 4]), Notify::Callback(on_done)).unwrap();
    port.submit_read(TUNER, leak(&[0; 4]), Notify::Callback(on_done)).unwrap();
    port.cancel();
    // Nothing left for the bus to finish
    assert!(run_until_idle(port.device()));

    assert_eq!(
        *SEEN.lock().unwrap(),
        vec![
            (Direction::Read, TUNER, 0, Err(ScbmError::Cancelled)),
            (Direction::Read, TUNER, 0, Err(ScbmError::Cancelled)),
        ]
    );
}

#[tokio::test]
async fn long_transfers_cross_fifo_boundary() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(TUNER);

    let data: Vec<u8> = (0..100u8).collect();
    let written = drive(port.device(), port.write(TUNER, &data, Timeout::millis(500))).await;
    assert_eq!(written, Ok(100));

    let mut back = vec![0u8; 100];
    let read = drive(port.device(), port.read(TUNER, &mut back, Timeout::millis(500))).await;
    assert_eq!(read, Ok(100));
    assert_eq!(back, data);
}

#[tokio::test]
async fn ten_bit_addressing() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    port.device().hardware().attach(0x3A5);

    let written = drive(port.device(), port.write(0x3A5, &[0xC3], Timeout::millis(100))).await;
    assert_eq!(written, Ok(1));
    assert_eq!(port.device().hardware().data(0x3A5), vec![0xC3]);
}

#[tokio::test]
async fn blocking_timeouts() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.stall_after(0);

    let written = drive(port.device(), port.write(TUNER, &[1, 2], Timeout::millis(20))).await;
    assert_eq!(
        written,
        Err(TransferError {
            error: ScbmError::Timeout,
            transferred: 0,
        })
    );

    let mut buf = [0u8; 2];
    let read = drive(port.device(), port.read(TUNER, &mut buf, Timeout::millis(20))).await;
    assert_eq!(read.map_err(|e| e.error), Err(ScbmError::Timeout));

    let result = port.get_result(true, Timeout::millis(20)).await;
    assert!(matches!(result, Err(ScbmError::Timeout)));
}

#[tokio::test]
async fn inactive_bus_detected_when_enabled() {
    let registry = registry();
    let settings = Settings {
        enable_bus_inactive: true,
        ..Settings::default()
    };
    let port = Port::init(&registry, settings).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.disconnect_after(TUNER, 3);

    let result = drive(
        port.device(),
        port.write(TUNER, &[1, 2, 3, 4, 5, 6], Timeout::millis(100)),
    )
    .await;
    assert_eq!(
        result,
        Err(TransferError {
            error: ScbmError::Bus(BusFault::BusInactive),
            transferred: 3,
        })
    );
    assert_eq!(port.error_status(), Some(BusFault::BusInactive));
}

#[tokio::test]
async fn inactive_bus_times_out_when_disabled() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.disconnect_after(TUNER, 3);

    let result = drive(
        port.device(),
        port.write(TUNER, &[1, 2, 3, 4, 5, 6], Timeout::millis(20)),
    )
    .await;
    assert_eq!(
        result,
        Err(TransferError {
            error: ScbmError::Timeout,
            transferred: 3,
        })
    );
}

#[test]
fn reinit_with_new_settings() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let fast = port.device().hardware().timing().unwrap();
    port.deinit();

    let settings = Settings {
        bitrate_khz: 100,
        ..Settings::default()
    };
    let port = Port::init(&registry, settings).unwrap();
    let standard = port.device().hardware().timing().unwrap();
    assert!(standard.period_ns > fast.period_ns);
    port.deinit();

    assert!(registry.device(0).unwrap().hardware().is_released());
}

#[tokio::test]
async fn read_from_missing_device() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();

    let mut buf = [0u8; 4];
    let result = drive(port.device(), port.read(0x70, &mut buf, Timeout::millis(100))).await;
    assert_eq!(
        result,
        Err(TransferError {
            error: ScbmError::Bus(BusFault::AddressNack),
            transferred: 0,
        })
    );
    assert_eq!(
        port.device().hardware().transactions(),
        vec![BusTransaction::AddressNack { addr: 0x70 }]
    );
}

#[test]
fn cancel_after_bus_finished_keeps_success() {
    let registry = registry();
    let port = Port::init(&registry, Settings::default()).unwrap();
    let hw = port.device().hardware();
    hw.attach(TUNER);
    hw.set_data(TUNER, &[0xA1, 0xA2]);

    port.submit_read(TUNER, leak(&[0; 2]), Notify::Mailbox).unwrap();
    // Clock the whole read but leave its interrupt unserviced
    while hw.step() {}
    assert!(!hw.is_busy());
    port.cancel();

    let completion = port.try_get_result().unwrap();
    assert_eq!(completion.result, Ok(()));
    assert_eq!(completion.transferred, 2);
    assert_eq!(completion.data(), &[0xA1, 0xA2]);
    assert!(port.device().is_idle());
}
