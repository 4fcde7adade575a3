use thiserror::Error;

use crate::hw::PipeId;
use crate::sideband::SidebandError;
use crate::source::SourceParseError;

/// Errno returned for every rejected CRC request.
pub const EINVAL: i32 = 22;

#[derive(Error, Debug)]
pub enum CrcError {
    #[error("{source} on pipe {pipe}")]
    UnknownSource {
        pipe: PipeId,
        #[source]
        source: SourceParseError,
    },

    #[error("no pipe {pipe} on this device")]
    UnknownPipe { pipe: PipeId },

    #[error("no active stream on pipe {pipe}")]
    NoActiveStream { pipe: PipeId },

    #[error("no sideband transport for pipe {pipe}: {reason}")]
    NoSidebandTransport { pipe: PipeId, reason: &'static str },

    #[error("display controller rejected CRC configuration on pipe {pipe}")]
    HardwareRejected { pipe: PipeId },

    #[error("sideband CRC start failed on pipe {pipe}")]
    SidebandStartFailed {
        pipe: PipeId,
        #[source]
        source: SidebandError,
    },

    #[error("sideband CRC stop failed on pipe {pipe}")]
    SidebandStopFailed {
        pipe: PipeId,
        #[source]
        source: SidebandError,
    },
}

impl CrcError {
    /// Negative errno for the control surface.
    pub fn status_code(&self) -> i32 {
        -EINVAL
    }

    /// True when the request was rejected before any side effect.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CrcError::SidebandStartFailed { .. } | CrcError::SidebandStopFailed { .. }
        )
    }

    pub fn pipe(&self) -> PipeId {
        match self {
            CrcError::UnknownSource { pipe, .. }
            | CrcError::UnknownPipe { pipe }
            | CrcError::NoActiveStream { pipe }
            | CrcError::NoSidebandTransport { pipe, .. }
            | CrcError::HardwareRejected { pipe }
            | CrcError::SidebandStartFailed { pipe, .. }
            | CrcError::SidebandStopFailed { pipe, .. } => *pipe,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_einval() {
        let errors = [
            CrcError::UnknownPipe { pipe: 3 },
            CrcError::NoActiveStream { pipe: 0 },
            CrcError::HardwareRejected { pipe: 1 },
            CrcError::SidebandStopFailed {
                pipe: 0,
                source: SidebandError::NotReady,
            },
        ];
        for err in errors {
            assert_eq!(err.status_code(), -22);
        }
    }

    #[test]
    fn sideband_failures_are_not_retryable() {
        let start = CrcError::SidebandStartFailed {
            pipe: 2,
            source: SidebandError::Timeout { ms: 10 },
        };
        assert!(!start.is_retryable());
        assert_eq!(start.pipe(), 2);
        assert!(CrcError::NoSidebandTransport {
            pipe: 0,
            reason: "no connector"
        }
        .is_retryable());
    }
}
