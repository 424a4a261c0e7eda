//! Ingest queue behaviour against a virtual capture card

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::*;
use frameport::device::VirtualDevice;
use frameport::{Error, IngestQueue};

#[test]
fn full_hd_queue_drops_the_ninth_frame() {
    let mode = hd1080_uyvy();
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 8);
    queue.start(0, 0).unwrap();

    assert_eq!(queue.calculate_frame_data_size(), 1920 * 1080 * 2);

    for value in 1..=9u8 {
        assert!(rig.input.inject(&frame_of(&mode, value), 1920, 1080));
    }

    assert_eq!(queue.count_queued(), 8);
    assert_eq!(queue.dropped_count(), 1);

    // Oldest first, and the dropped one is the newest
    let first = queue.pop().unwrap();
    assert_eq!(first[0], 1);
    assert_eq!(first.len(), 1920 * 1080 * 2);

    let mut last = 0;
    while let Some(frame) = queue.pop() {
        last = frame[0];
    }
    assert_eq!(last, 8);
}

#[test]
fn frames_are_consumed_in_arrival_order() {
    let mode = tiny_mode(16, 4);
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 4);
    queue.start(0, 0).unwrap();

    for value in [10u8, 20, 30] {
        rig.input.inject(&frame_of(&mode, value), 16, 4);
    }

    {
        let oldest = queue.lock_oldest_frame().unwrap();
        assert_eq!(oldest[0], 10);
        assert_eq!(oldest.frame().unwrap().width(), 16);
    }
    queue.dequeue_frame();

    assert_eq!(queue.with_oldest_frame(|bytes| bytes[0]), Some(20));
    assert_eq!(queue.pop().unwrap()[0], 20);
    assert_eq!(queue.pop().unwrap()[0], 30);
    assert_eq!(queue.count_queued(), 0);
    assert!(queue.lock_oldest_frame().is_none());

    // Dequeue on an empty queue is harmless
    queue.dequeue_frame();

    let stats = queue.stats();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.consumed, 3);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn count_never_exceeds_capacity() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 3);
    queue.start(0, 0).unwrap();

    for value in 0..20u8 {
        rig.input.inject(&frame_of(&mode, value), 8, 2);
        assert!(queue.count_queued() <= 3);
        if value % 4 == 0 {
            queue.dequeue_frame();
        }
    }

    let stats = queue.stats();
    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.received + stats.dropped, 20);
}

#[test]
fn wrong_size_frames_are_discarded_without_counting_drops() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 4);
    queue.start(0, 0).unwrap();

    // Wrong dimensions, then right dimensions with a short payload
    rig.input.inject(&[0u8; 64], 16, 2);
    rig.input.inject(&[0u8; 10], 8, 2);

    let stats = queue.stats();
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.mismatched, 2);
    assert!(queue.is_running());
    assert_eq!(queue.error_message(), "");
}

#[test]
fn short_frame_on_full_queue_is_a_mismatch_not_a_drop() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 2);
    queue.start(0, 0).unwrap();

    rig.input.inject(&frame_of(&mode, 1), 8, 2);
    rig.input.inject(&frame_of(&mode, 2), 8, 2);
    rig.input.inject(&[0u8; 10], 8, 2);

    let stats = queue.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.mismatched, 1);
}

#[test]
fn order_holds_across_producer_and_consumer_threads() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = Arc::new(IngestQueue::new(rig.directory.clone(), 4));
    queue.start(0, 0).unwrap();

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let mut seen = Vec::new();
            while let Some(frame) = queue.pop_blocking(Duration::from_millis(500)) {
                seen.push(frame[0]);
            }
            seen
        })
    };

    let producer = {
        let input = rig.input.clone();
        thread::spawn(move || {
            for value in 1..=200u8 {
                input.inject(&frame_of(&mode, value), 8, 2);
                if value % 8 == 0 {
                    thread::yield_now();
                }
            }
        })
    };

    producer.join().unwrap();
    let seen = consumer.join().unwrap();

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", seen);
    assert_eq!(seen.len() as u64 + queue.dropped_count(), 200);
}

#[test]
fn reports_bound_format() {
    let mode = tiny_mode(32, 8);
    let rig = loopback(vec![hd1080_uyvy(), mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 4);
    queue.start(0, 1).unwrap();

    assert_eq!(queue.frame_dimensions(), (32, 8));
    assert_eq!(queue.frame_duration(), 1000);
    assert!((queue.frame_rate() - 60.0).abs() < 1e-9);
    assert!(queue.is_progressive());
    assert_eq!(queue.format_name().as_deref(), Some("32x8p60"));
    assert_eq!(rig.input.current_mode(), Some(mode));
}

#[test]
fn pop_blocking_wakes_on_arrival() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = Arc::new(IngestQueue::new(rig.directory.clone(), 4));
    queue.start(0, 0).unwrap();

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.pop_blocking(Duration::from_secs(5)))
    };

    thread::sleep(Duration::from_millis(20));
    rig.input.inject(&frame_of(&mode, 42), 8, 2);

    let frame = consumer.join().unwrap().unwrap();
    assert_eq!(frame[0], 42);
}

#[test]
fn stop_wakes_blocked_consumer() {
    let rig = loopback(vec![tiny_mode(8, 2)]);
    let queue = Arc::new(IngestQueue::new(rig.directory.clone(), 4));
    queue.start(0, 0).unwrap();

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let frame = queue.pop_blocking(Duration::from_secs(10));
            (frame.is_none(), started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(30));
    queue.stop();

    let (empty, waited) = consumer.join().unwrap();
    assert!(empty);
    assert!(waited < Duration::from_secs(5));
    assert!(!queue.is_running());
    assert!(!rig.input.has_callback());
}

#[test]
fn restart_after_stop_streams_again() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = IngestQueue::new(rig.directory.clone(), 4);

    queue.start(0, 0).unwrap();
    assert_eq!(queue.start(0, 0), Err(Error::AlreadyStarted));
    rig.input.inject(&frame_of(&mode, 1), 8, 2);
    queue.stop();
    assert_eq!(queue.count_queued(), 0);
    assert!(!rig.input.inject(&frame_of(&mode, 2), 8, 2));

    queue.start(0, 0).unwrap();
    rig.input.inject(&frame_of(&mode, 3), 8, 2);
    assert_eq!(queue.pop().unwrap()[0], 3);
}

#[test]
fn generator_feeds_queue_continuously() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode]);
    let queue = IngestQueue::new(rig.directory.clone(), 8);
    queue.start(0, 0).unwrap();

    let mut generator = rig.input.spawn_generator(Duration::from_millis(2));
    assert!(eventually(Duration::from_secs(5), || queue.count_queued() >= 3));
    generator.stop();

    assert!(queue.stats().received >= 3);
}

#[test]
fn empty_directory_fails_with_device_not_found() {
    let queue = IngestQueue::new(directory(vec![]), 4);

    assert_eq!(queue.start(0, 0), Err(Error::DeviceNotFound));
    assert!(!queue.error_message().is_empty());
    // Sticky: every later call reports the same failure
    assert_eq!(queue.start(0, 0), Err(Error::DeviceNotFound));
    assert_eq!(queue.count_queued(), 0);
    assert_eq!(queue.frame_dimensions(), (0, 0));
}

#[test]
fn index_errors_are_sticky() {
    let dir = directory(vec![VirtualDevice::new("A", vec![tiny_mode(8, 2)])]);

    let queue = IngestQueue::new(dir.clone(), 4);
    assert_eq!(
        queue.start(3, 0),
        Err(Error::InvalidDeviceIndex { index: 3, count: 1 })
    );
    assert!(queue.error_message().contains('3'));

    let queue = IngestQueue::new(dir, 4);
    assert_eq!(
        queue.start(0, 1),
        Err(Error::InvalidFormatIndex { index: 1, count: 1 })
    );
    assert!(!queue.is_running());
}

#[test]
fn output_only_card_has_no_input() {
    let dir = directory(vec![VirtualDevice::output_only("Playout", vec![tiny_mode(8, 2)])]);
    let queue = IngestQueue::new(dir, 4);

    assert!(matches!(queue.start(0, 0), Err(Error::NoInputCapability(_))));
}

#[test]
fn busy_port_is_reported() {
    let rig = loopback(vec![tiny_mode(8, 2)]);
    rig.input.set_busy(true);

    let queue = IngestQueue::new(rig.directory.clone(), 4);
    assert!(matches!(queue.start(0, 0), Err(Error::DeviceBusy(_))));
    assert!(queue.error_message().contains("busy"));
    assert!(!rig.input.has_callback());
}
