//! Error taxonomy for the PTP session core (spec.md §7).
//!
//! Transient protocol errors (stale Delay_Resp sequence id, an
//! unmatched VLAN, a frame too short for its declared body) are never
//! represented here — they are dropped silently and only surface
//! through [`crate::session::SessionStats`] counters.

use thiserror::Error;

/// Errors the control surface and the per-session transmit path can report.
#[derive(Debug, Error)]
pub enum PtpError {
    #[error("PTP core not initialized")]
    NotInitialized,

    #[error("PTP core already running")]
    AlreadyRunning,

    #[error("no sessions configured")]
    NoSessions,

    #[error("port id {0} out of range [0, 8)")]
    PortOutOfRange(u8),

    #[error("port {0} already has {1} sessions (maximum 4 per port)")]
    TooManySessions(u8, usize),

    #[error("port {0} already has a session on vlan {1}")]
    DuplicateVlan(u8, u16),

    #[error("transmit failed on port {0} queue {1}")]
    TxFailed(u8, u16),

    #[error("flow-rule installation failed for every candidate pattern on every enabled port")]
    FlowRuleFailed,
}
