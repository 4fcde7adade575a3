//! Sideband channel to a downstream receiver.
//!
//! The receiver computes its own CRCs once told to start; results come back
//! through the transport's reporting path, not through this crate.

use std::sync::Arc;

use crate::hw::{LinkId, PipeId};

/// Failure reported by a sideband transport.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SidebandError {
    #[error("sideband transfer timed out after {ms}ms")]
    Timeout { ms: u64 },
    #[error("receiver rejected request: {reason}")]
    Rejected { reason: String },
    #[error("sideband channel not ready")]
    NotReady,
}

/// Auxiliary channel able to command CRC capture on a receiver.
///
/// Both calls may block for the transport's own timeout and must never be
/// invoked while the device lock is held.
pub trait SidebandTransport: Send + Sync {
    fn start_crc(&self, pipe: PipeId) -> Result<(), SidebandError>;

    fn stop_crc(&self) -> Result<(), SidebandError>;
}

/// Downstream connector bound to a physical link.
#[derive(Clone)]
pub struct Connector {
    pub link: LinkId,
    transport: Option<Arc<dyn SidebandTransport>>,
}

impl Connector {
    pub fn new(link: LinkId) -> Self {
        Self {
            link,
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn SidebandTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn transport(&self) -> Option<Arc<dyn SidebandTransport>> {
        self.transport.clone()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("link", &self.link)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
