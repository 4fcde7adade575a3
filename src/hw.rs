//! Display controller boundary.
//!
//! The controller hardware computes CRCs; this crate only programs capture
//! and reads results back through [`DisplayHardware`].

/// Index of a display output pipe.
pub type PipeId = usize;

/// Display controller stream driving a pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

/// Physical link a stream is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

/// Output dithering applied by the stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DitherOption {
    #[default]
    Default,
    /// Truncate to 8 bits per component, no dither noise.
    Trun8,
}

/// Per-pipe configuration owned by the display-mode layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipeContext {
    /// Active stream, if the pipe is lit.
    pub stream: Option<StreamId>,
    /// Link the stream is routed to.
    pub link: Option<LinkId>,
    /// Dithering currently programmed on the stream.
    pub dither: DitherOption,
}

impl PipeContext {
    pub fn new(stream: StreamId, link: LinkId) -> Self {
        Self {
            stream: Some(stream),
            link: Some(link),
            dither: DitherOption::Default,
        }
    }

    pub fn unlit() -> Self {
        Self::default()
    }
}

/// Hardware abstraction for stage CRC capture.
///
/// `read_stage_crc` is called from the vblank path and must not block.
pub trait DisplayHardware: Send + Sync {
    /// Program capture enable for the two stage sub-channels.
    ///
    /// Returns false when the stream cannot be captured in its current format.
    fn configure_stage_capture(&self, stream: StreamId, enable_a: bool, enable_b: bool) -> bool;

    /// Read the three captured components, or `None` if not latched yet.
    fn read_stage_crc(&self, stream: StreamId) -> Option<[u32; 3]>;

    fn set_dither_option(&self, stream: StreamId, option: DitherOption);
}
