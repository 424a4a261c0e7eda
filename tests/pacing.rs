//! Consumer-side playout pacing and sender-side in-flight limiting

mod common;

use std::time::Duration;

use common::*;
use frameport::{Error, Field, IngestPacer, IngestQueue, OutputPacer, OutputScheduler};

// A bit more than one 60 Hz frame
const TICK: Duration = Duration::from_millis(20);

fn started_queue(rig: &Rig) -> IngestQueue {
    let queue = IngestQueue::new(rig.directory.clone(), 8);
    queue.start(0, 0).unwrap();
    queue
}

#[test]
fn ingest_pacer_waits_for_preroll() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = started_queue(&rig);
    let mut pacer = IngestPacer::new("test", 2);

    assert_eq!(pacer.update(&queue, TICK), None);

    rig.input.inject(&frame_of(&mode, 1), 8, 2);
    rig.input.inject(&frame_of(&mode, 2), 8, 2);
    assert_eq!(pacer.update(&queue, TICK), None);
    assert!(!pacer.is_prerolled());

    rig.input.inject(&frame_of(&mode, 3), 8, 2);
    assert_eq!(pacer.update(&queue, Duration::ZERO), Some(Field::Even));
    assert!(pacer.is_prerolled());
    assert_eq!(queue.count_queued(), 3);
}

#[test]
fn ingest_pacer_advances_one_frame_per_tick() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = started_queue(&rig);
    let mut pacer = IngestPacer::new("test", 2);

    for value in 1..=4u8 {
        rig.input.inject(&frame_of(&mode, value), 8, 2);
    }
    assert_eq!(pacer.update(&queue, Duration::ZERO), Some(Field::Even));
    assert_eq!(queue.with_oldest_frame(|bytes| bytes[0]), Some(1));

    assert_eq!(pacer.update(&queue, TICK), Some(Field::Odd));
    assert_eq!(queue.with_oldest_frame(|bytes| bytes[0]), Some(2));

    // Less than a frame since the last advance
    assert_eq!(pacer.update(&queue, Duration::from_millis(1)), Some(Field::Even));
    assert_eq!(queue.with_oldest_frame(|bytes| bytes[0]), Some(2));
}

#[test]
fn ingest_pacer_trims_over_queued_frames() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = started_queue(&rig);
    let mut pacer = IngestPacer::new("test", 1);
    assert_eq!(pacer.max_queued(), 2);

    for value in 1..=6u8 {
        rig.input.inject(&frame_of(&mode, value), 8, 2);
    }
    pacer.update(&queue, Duration::ZERO);

    assert_eq!(queue.count_queued(), 2);
    // Trimming drops the oldest frames, the newest stay
    assert_eq!(queue.with_oldest_frame(|bytes| bytes[0]), Some(5));
}

#[test]
fn ingest_pacer_prerolls_again_on_underrun() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let queue = started_queue(&rig);
    let mut pacer = IngestPacer::new("test", 1);

    rig.input.inject(&frame_of(&mode, 1), 8, 2);
    rig.input.inject(&frame_of(&mode, 2), 8, 2);

    assert_eq!(pacer.update(&queue, TICK), Some(Field::Odd));
    assert_eq!(queue.count_queued(), 1);

    // The last frame is kept on screen
    assert_eq!(pacer.update(&queue, TICK), Some(Field::Even));
    assert!(!pacer.is_prerolled());
    assert_eq!(queue.count_queued(), 1);

    assert_eq!(pacer.update(&queue, TICK), None);
}

#[test]
fn output_pacer_bounds_frames_in_flight() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let scheduler = OutputScheduler::new(rig.directory.clone());
    scheduler.start_manual(0, 0).unwrap();

    let mut clock = rig.output.spawn_clock(Duration::from_millis(4));
    let mut pacer = OutputPacer::new(3, Duration::from_secs(2));

    for value in 0..12u8 {
        pacer.feed(&scheduler, &frame_of(&mode, value)).unwrap();
        let in_flight = scheduler.queued_count() - scheduler.completed_count();
        assert!(in_flight <= 3, "{} frames in flight", in_flight);
    }
    clock.stop();

    assert_eq!(pacer.fed(), 12);
    assert_eq!(scheduler.queued_count(), 12);
    assert!(scheduler.completed_count() >= 9);
}

#[test]
fn output_pacer_does_not_wait_while_filling() {
    let mode = tiny_mode(8, 2);
    let rig = loopback(vec![mode.clone()]);
    let scheduler = OutputScheduler::new(rig.directory.clone());
    scheduler.start_manual(0, 0).unwrap();

    // No clock: the first two feeds fit the window, the third waits for frame 0
    let mut pacer = OutputPacer::new(3, Duration::from_millis(20));
    pacer.feed(&scheduler, &frame_of(&mode, 0)).unwrap();
    pacer.feed(&scheduler, &frame_of(&mode, 1)).unwrap();
    pacer.feed(&scheduler, &frame_of(&mode, 2)).unwrap();

    // Frame 1 never completes
    assert!(matches!(
        pacer.feed(&scheduler, &frame_of(&mode, 3)),
        Err(Error::SyncTimeout { target: 1, .. })
    ));
}
