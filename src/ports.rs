//! Collaborator interfaces the core consumes (spec.md §6). The NIC
//! driver, its classifier/flow-steering control plane, buffer
//! allocator, and wall clock are all external to this crate (§1); the
//! core only ever talks to them through these traits.

use crate::error::PtpError;

/// A receive-side descriptor for one polled frame.
///
/// `data` borrows from the port's own buffer pool for the duration of
/// the dispatch call; callers must not retain it past that call.
pub struct RxDescriptor<'a> {
    pub data: &'a [u8],
    /// Hardware (or best-effort software) RX timestamp in nanoseconds,
    /// if the port can provide one.
    pub timestamp_ns: Option<i64>,
}

/// One ingress queue of a fabric port, owned exclusively by the worker
/// thread assigned to it (spec.md §5: single-threaded ownership, no
/// per-session lock needed).
pub trait RxPort: Send + Sync {
    /// Poll up to `max_frames` descriptors without blocking. An empty
    /// result means nothing was waiting; it is not an error.
    fn poll(&mut self, max_frames: usize, out: &mut Vec<RxDescriptor<'_>>);
}

/// A transmit-side queue used to emit Delay_Req frames.
pub trait TxPort: Send + Sync {
    /// Enqueue a fully-built frame for transmission. Returns an error
    /// if the queue is full or the underlying hardware path rejects
    /// the frame; the caller counts this as a stats failure, never
    /// panics (spec.md §4.7).
    fn send(&mut self, frame: &[u8]) -> Result<(), PtpError>;
}

/// Outer Ethernet type constraint carried by a VLAN-tagged pattern.
/// Spec.md §4.2's patterns #1 and #2 are identical except for this:
/// #1 leaves the outer Ethernet type unconstrained, #2 pins it to
/// 802.1Q (`0x8100`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OuterEthertype {
    Unconstrained,
    Explicit8021Q,
}

/// A single flow-steering rule installed on a port's NIC classifier
/// (spec.md §4.2's three candidate patterns).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowPattern {
    /// VLAN-tagged PTP with the VLAN's TCI left unmatched (any VLAN
    /// id), `inner_type == ethertype`.
    VlanTagged {
        outer: OuterEthertype,
        ethertype: u16,
    },
    /// Untagged: Ethernet `type == ethertype` directly, no VLAN tag at
    /// all.
    Untagged { ethertype: u16 },
}

/// Opaque handle returned by a successful [`FlowSteering::install`],
/// used only to request teardown later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleHandle(pub u64);

/// Control-plane interface to a port's NIC classifier (spec.md §4.2).
pub trait FlowSteering: Send + Sync {
    /// Attempt to install one candidate pattern on `port_id`. Returns
    /// `Ok(handle)` on success; `Err` means this candidate was
    /// rejected and the caller should try the next one in the cascade.
    fn install(&mut self, port_id: u8, pattern: FlowPattern) -> Result<RuleHandle, PtpError>;

    /// Remove a previously installed rule. Best-effort: failures are
    /// logged by the caller, never propagated (spec.md §4.2 teardown).
    fn teardown(&mut self, port_id: u8, handle: RuleHandle);
}

/// Fixed-size buffer obtained from a [`BufferPool`].
pub struct Buffer {
    pub data: Vec<u8>,
}

/// Allocator for TX buffers, kept as a trait rather than a bare `Vec`
/// allocation so a real NIC driver can hand back pool-backed DMA
/// memory instead (spec.md §6).
pub trait BufferPool: Send + Sync {
    fn acquire(&self, len: usize) -> Buffer;
}

/// The two clock domains spec.md §3/§4.3/§4.6 requires kept separate:
/// a wall clock in the same Unix epoch as the master's t1/t4 (used for
/// offset/delay math), and a monotonic tick of known frequency used
/// purely for interval math (timeouts, Delay_Req pacing) so that a
/// wall-clock step (NTP correction, operator `date` call) never
/// corrupts FSM timing. Conflating the two — sampling t2/t3 from a
/// monotonic-only source, or pacing timeouts off the wall clock — is
/// exactly the bug spec.md §4.6 calls out by name.
pub trait ClockSource: Send + Sync {
    /// Unix-epoch nanoseconds, same domain as the master's t1/t4.
    fn now_wall_ns(&self) -> i64;
    /// Nanoseconds since an arbitrary fixed epoch, monotonically
    /// non-decreasing, immune to wall-clock steps.
    fn now_monotonic_ns(&self) -> i64;
}
