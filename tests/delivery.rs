//! Vblank delivery tests: warm-up suppression, not-ready reads, frame
//! sequencing and concurrent transitions.

use std::sync::Arc;
use std::thread;

use pipe_crc::backends::sim::frame_crc;
use pipe_crc::backends::SimRig;
use pipe_crc::config::CrcdConfig;
use pipe_crc::CaptureSource;

fn rig() -> SimRig {
    SimRig::from_config(&CrcdConfig {
        ring_capacity: 8,
        ..CrcdConfig::default()
    })
}

#[test]
fn first_two_vblanks_after_enable_are_suppressed() {
    let rig = rig();
    rig.controller.request_source(0, Some("crtc")).unwrap();

    rig.tick();
    rig.tick();
    assert!(rig.ring.is_empty(0));
    assert_eq!(rig.controller.warmup_remaining(0), Some(0));

    rig.tick();
    let entries = rig.ring.drain(0);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].frame, 3);
    assert!(entries[0].has_frame_counter);
    assert_eq!(entries[0].crcs, frame_crc(pipe_crc::StreamId(0), 0));

    rig.tick();
    rig.tick();
    let frames: Vec<u64> = rig.ring.drain(0).iter().map(|e| e.frame).collect();
    assert_eq!(frames, vec![4, 5]);
}

#[test]
fn reenabling_restarts_warmup() {
    let rig = rig();
    rig.controller.request_source(0, Some("crtc")).unwrap();
    for _ in 0..4 {
        rig.tick();
    }
    assert_eq!(rig.ring.drain(0).len(), 2);

    rig.controller.request_source(0, Some("auto")).unwrap();
    rig.tick();
    rig.tick();
    assert!(rig.ring.is_empty(0));
    rig.tick();
    assert_eq!(rig.ring.drain(0).len(), 1);
}

#[test]
fn not_ready_hardware_emits_nothing() {
    let rig = rig();
    rig.controller.request_source(0, Some("crtc")).unwrap();
    rig.device.set_crc_ready(false);
    for _ in 0..5 {
        rig.tick();
    }
    assert!(rig.ring.is_empty(0));
    assert_eq!(rig.ring.dropped(0), 0);

    rig.device.set_crc_ready(true);
    rig.tick();
    assert_eq!(rig.ring.drain(0).len(), 1);
}

#[test]
fn receiver_source_delivers_nothing_from_vblank() {
    let rig = rig();
    rig.controller.request_source(0, Some("dprx")).unwrap();
    for _ in 0..6 {
        rig.tick();
    }
    assert!(rig.ring.is_empty(0));
    assert_eq!(rig.device.stats().crc_reads, 0);
    assert_eq!(rig.controller.warmup_remaining(0), Some(0));
}

#[test]
fn disabled_pipe_keeps_warmup_untouched() {
    let rig = rig();
    for _ in 0..3 {
        rig.tick();
    }
    assert_eq!(rig.controller.warmup_remaining(0), Some(2));
    assert_eq!(rig.device.stats().crc_reads, 0);
}

#[test]
fn crcs_change_with_scene() {
    let rig = rig();
    rig.controller.request_source(1, Some("crtc")).unwrap();
    for _ in 0..3 {
        rig.tick();
    }
    rig.device.set_scene(pipe_crc::StreamId(1), 7);
    rig.tick();
    let entries = rig.ring.drain(1);
    assert_eq!(entries.len(), 2);
    assert_ne!(entries[0].crcs, entries[1].crcs);
    assert_eq!(entries[1].crcs, frame_crc(pipe_crc::StreamId(1), 7));
}

#[test]
fn slow_consumer_overflows_ring() {
    let rig = rig();
    rig.controller.request_source(0, Some("crtc")).unwrap();
    for _ in 0..(2 + 8 + 3) {
        rig.tick();
    }
    assert_eq!(rig.ring.len(0), 8);
    assert_eq!(rig.ring.dropped(0), 3);
    let frames: Vec<u64> = rig.ring.drain(0).iter().map(|e| e.frame).collect();
    assert_eq!(frames, (3..11).collect::<Vec<u64>>());
}

#[test]
fn vblanks_tolerate_concurrent_transitions() {
    let rig = Arc::new(rig());
    let vblank = {
        let rig = rig.clone();
        thread::spawn(move || {
            for _ in 0..2000 {
                rig.tick();
                rig.ring.drain(0);
            }
        })
    };
    for i in 0..200 {
        let name = ["crtc", "none", "dprx", "none"][i % 4];
        rig.controller.request_source(0, Some(name)).unwrap();
    }
    vblank.join().unwrap();

    assert_eq!(rig.controller.active_source(0), Some(CaptureSource::None));
    assert!(!rig.controller.holds_vblank_reference(0));
    let stats = rig.device.stats();
    assert_eq!(stats.vblank_gets, 100);
    assert_eq!(stats.vblank_puts, 100);
}

#[test]
fn concurrent_requests_on_one_pipe_stay_consistent() {
    let rig = Arc::new(rig());
    let workers: Vec<_> = (0..4)
        .map(|w| {
            let rig = rig.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    let name = if (i + w) % 2 == 0 { "crtc" } else { "none" };
                    rig.controller.request_source(1, Some(name)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let source = rig.controller.active_source(1).unwrap();
    assert_eq!(
        source == CaptureSource::None,
        !rig.controller.holds_vblank_reference(1)
    );
    let stats = rig.device.stats();
    let held = u64::from(rig.controller.holds_vblank_reference(1));
    assert_eq!(stats.vblank_gets, stats.vblank_puts + held);
}
