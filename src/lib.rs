//! Display pipeline CRC capture.
//!
//! This crate controls per-frame CRC capture on a display device: which stage
//! of each output pipe produces the CRC, the resources capture depends on, and
//! delivery of each value to a consumer once per vertical blank.
//!
//! # Architecture
//!
//! Capture holds three resources that must move together:
//!
//! 1. **Vblank reference**: one reference on the interrupt subsystem per pipe
//!    while capture is active.
//! 2. **Receiver capture**: the sideband start/stop on a downstream receiver
//!    when capture happens there.
//! 3. **Stage capture and dithering**: the display controller's capture
//!    enable and the stream's dither mode.
//!
//! After every successful transition a pipe's source is `none` exactly when
//! no vblank reference is held for it.
//!
//! # Module Structure
//!
//! - `source`: Source names and parsing
//! - `controller`: Transitions and vblank delivery
//! - `state`, `vblank`, `sink`: Per-pipe state, interrupt gate, CRC ring
//! - `hw`, `sideband`: Collaborator traits
//! - `backends`: Simulated collaborators
//! - `config`: Daemon configuration

pub mod backends;
pub mod config;
pub mod controller;
pub mod error;
pub mod hw;
pub mod sideband;
pub mod sink;
pub mod source;
pub mod state;
pub mod vblank;

pub use controller::CrcController;
pub use error::{CrcError, Result};
pub use hw::{DisplayHardware, DitherOption, LinkId, PipeContext, PipeId, StreamId};
pub use sideband::{Connector, SidebandError, SidebandTransport};
pub use sink::{CrcEntry, CrcRing, CrcSink, SinkFull};
pub use source::{parse_source, CaptureSource, SourceParseError, CRC_SOURCES, CRC_VALUE_COUNT};
pub use state::{CaptureState, WARMUP_FRAMES};
pub use vblank::{VblankGate, VblankSource};
