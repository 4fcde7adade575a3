//! Simulated display device for tests and the bundled binaries.
//!
//! `SimDevice` stands in for both the display controller and its vblank
//! subsystem; `SimAux` for a receiver's sideband channel. Every call is
//! counted and the failure paths can be forced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::config::CrcdConfig;
use crate::controller::CrcController;
use crate::hw::{DisplayHardware, DitherOption, PipeId, StreamId};
use crate::sideband::{Connector, SidebandError, SidebandTransport};
use crate::sink::CrcRing;
use crate::vblank::VblankSource;

/// Snapshot of `SimDevice` call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimStats {
    pub configure_calls: u64,
    pub dither_calls: u64,
    pub crc_reads: u64,
    pub vblank_gets: u64,
    pub vblank_puts: u64,
}

#[derive(Default)]
pub struct SimDevice {
    reject_config: AtomicBool,
    crc_not_ready: AtomicBool,
    configure_calls: AtomicU64,
    dither_calls: AtomicU64,
    crc_reads: AtomicU64,
    vblank_gets: AtomicU64,
    vblank_puts: AtomicU64,
    /// Last enable pair and dither programmed per stream.
    streams: Mutex<HashMap<StreamId, StreamRegs>>,
    /// Scanout counter per pipe.
    frames: Mutex<HashMap<PipeId, u64>>,
}

#[derive(Clone, Copy, Debug, Default)]
struct StreamRegs {
    capture: (bool, bool),
    dither: DitherOption,
    scene: u64,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `configure_stage_capture` refuse every stream.
    pub fn set_reject_config(&self, reject: bool) {
        self.reject_config.store(reject, Ordering::SeqCst);
    }

    /// Make `read_stage_crc` report not-ready.
    pub fn set_crc_ready(&self, ready: bool) {
        self.crc_not_ready.store(!ready, Ordering::SeqCst);
    }

    /// Change what the stream scans out; CRCs follow the scene.
    pub fn set_scene(&self, stream: StreamId, scene: u64) {
        self.regs().entry(stream).or_default().scene = scene;
    }

    /// Finish scanning out a frame on `pipe`.
    pub fn advance(&self, pipe: PipeId) -> u64 {
        let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        let count = frames.entry(pipe).or_insert(0);
        *count += 1;
        *count
    }

    pub fn capture_enabled(&self, stream: StreamId) -> (bool, bool) {
        self.regs()
            .get(&stream)
            .map(|regs| regs.capture)
            .unwrap_or_default()
    }

    pub fn dither(&self, stream: StreamId) -> DitherOption {
        self.regs()
            .get(&stream)
            .map(|regs| regs.dither)
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            configure_calls: self.configure_calls.load(Ordering::SeqCst),
            dither_calls: self.dither_calls.load(Ordering::SeqCst),
            crc_reads: self.crc_reads.load(Ordering::SeqCst),
            vblank_gets: self.vblank_gets.load(Ordering::SeqCst),
            vblank_puts: self.vblank_puts.load(Ordering::SeqCst),
        }
    }

    fn regs(&self) -> std::sync::MutexGuard<'_, HashMap<StreamId, StreamRegs>> {
        self.streams.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl DisplayHardware for SimDevice {
    fn configure_stage_capture(&self, stream: StreamId, enable_a: bool, enable_b: bool) -> bool {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_config.load(Ordering::SeqCst) {
            return false;
        }
        self.regs().entry(stream).or_default().capture = (enable_a, enable_b);
        true
    }

    fn read_stage_crc(&self, stream: StreamId) -> Option<[u32; 3]> {
        self.crc_reads.fetch_add(1, Ordering::SeqCst);
        if self.crc_not_ready.load(Ordering::SeqCst) {
            return None;
        }
        let regs = self.regs().get(&stream).copied().unwrap_or_default();
        if !regs.capture.0 {
            return None;
        }
        Some(frame_crc(stream, regs.scene))
    }

    fn set_dither_option(&self, stream: StreamId, option: DitherOption) {
        self.dither_calls.fetch_add(1, Ordering::SeqCst);
        self.regs().entry(stream).or_default().dither = option;
    }
}

impl VblankSource for SimDevice {
    fn get(&self, _pipe: PipeId) {
        self.vblank_gets.fetch_add(1, Ordering::SeqCst);
    }

    fn put(&self, _pipe: PipeId) {
        self.vblank_puts.fetch_add(1, Ordering::SeqCst);
    }

    fn accurate_count(&self, pipe: PipeId) -> u64 {
        self.frames
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&pipe)
            .copied()
            .unwrap_or(0)
    }
}

/// Per-component CRC of a simulated frame. Components are 16 bits wide.
pub fn frame_crc(stream: StreamId, scene: u64) -> [u32; 3] {
    let mut hasher = Sha256::new();
    hasher.update(stream.0.to_le_bytes());
    hasher.update(scene.to_le_bytes());
    let digest = hasher.finalize();
    let component =
        |i: usize| u32::from(u16::from_le_bytes([digest[2 * i], digest[2 * i + 1]]));
    [component(0), component(1), component(2)]
}

/// Snapshot of `SimAux` call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuxStats {
    pub starts: u64,
    pub stops: u64,
    pub running: bool,
}

#[derive(Default)]
pub struct SimAux {
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    running: AtomicBool,
}

impl SimAux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> AuxStats {
        AuxStats {
            starts: self.starts.load(Ordering::SeqCst),
            stops: self.stops.load(Ordering::SeqCst),
            running: self.running.load(Ordering::SeqCst),
        }
    }
}

impl SidebandTransport for SimAux {
    fn start_crc(&self, pipe: PipeId) -> Result<(), SidebandError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(SidebandError::Timeout { ms: 10 });
        }
        log::debug!("receiver CRC started for pipe {}", pipe);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_crc(&self) -> Result<(), SidebandError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(SidebandError::Rejected {
                reason: "TEST_SINK write failed".to_string(),
            });
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A controller wired to simulated collaborators.
pub struct SimRig {
    pub controller: CrcController,
    pub device: Arc<SimDevice>,
    pub ring: Arc<CrcRing>,
    /// Sideband channel per pipe, when its connector has one.
    pub aux: Vec<Option<Arc<SimAux>>>,
}

impl SimRig {
    pub fn from_config(cfg: &CrcdConfig) -> Self {
        let device = Arc::new(SimDevice::new());
        let ring = Arc::new(CrcRing::new(cfg.pipes.len(), cfg.ring_capacity));
        let controller = CrcController::new(
            device.clone(),
            device.clone(),
            ring.clone(),
            cfg.pipe_contexts(),
        );
        let mut aux = Vec::with_capacity(cfg.pipes.len());
        for pipe in &cfg.pipes {
            let Some(link) = pipe.link else {
                aux.push(None);
                continue;
            };
            let mut connector = Connector::new(link);
            if pipe.transport {
                let channel = Arc::new(SimAux::new());
                connector = connector.with_transport(channel.clone());
                aux.push(Some(channel));
            } else {
                aux.push(None);
            }
            controller.attach_connector(connector);
        }
        Self {
            controller,
            device,
            ring,
            aux,
        }
    }

    /// Scan out one frame on every pipe and run the vblank handler.
    pub fn tick(&self) {
        for pipe in 0..self.controller.pipe_count() {
            self.device.advance(pipe);
            self.controller.on_vblank(pipe);
        }
    }
}
