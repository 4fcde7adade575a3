//! CRC capture source names.
//!
//! Operators pick the pipeline stage that produces the per-frame CRC by name.
//! Unrecognized names are an `Err`, never a storable source.

use std::fmt;

/// Number of CRC components every capture source exposes.
pub const CRC_VALUE_COUNT: usize = 3;

/// Every name accepted by [`parse_source`].
pub const CRC_SOURCES: &[&str] = &["none", "auto", "crtc", "dprx"];

/// Stage at which a pipe captures frame CRCs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    /// Capture disabled.
    #[default]
    None,
    /// Display controller output stage.
    Pipeline,
    /// Downstream receiver reached over the sideband channel.
    ExternalReceiver,
}

impl CaptureSource {
    /// Canonical name, accepted back by [`parse_source`].
    pub fn name(self) -> &'static str {
        match self {
            CaptureSource::None => "none",
            CaptureSource::Pipeline => "crtc",
            CaptureSource::ExternalReceiver => "dprx",
        }
    }

    /// True for every source that keeps capture running.
    pub fn is_enabled(self) -> bool {
        self != CaptureSource::None
    }

    pub(crate) fn to_raw(self) -> u8 {
        match self {
            CaptureSource::None => 0,
            CaptureSource::Pipeline => 1,
            CaptureSource::ExternalReceiver => 2,
        }
    }

    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CaptureSource::Pipeline,
            2 => CaptureSource::ExternalReceiver,
            _ => CaptureSource::None,
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source name that matched none of [`CRC_SOURCES`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown CRC source '{0}'")]
pub struct SourceParseError(pub String);

/// Map an operator-supplied name to a capture source.
///
/// An absent name means `none`. Matching is exact and case-sensitive.
pub fn parse_source(name: Option<&str>) -> Result<CaptureSource, SourceParseError> {
    match name {
        None | Some("none") => Ok(CaptureSource::None),
        Some("auto") | Some("crtc") => Ok(CaptureSource::Pipeline),
        Some("dprx") => Ok(CaptureSource::ExternalReceiver),
        Some(other) => Err(SourceParseError(other.to_string())),
    }
}

impl std::str::FromStr for CaptureSource {
    type Err = SourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_source(Some(s))
    }
}
