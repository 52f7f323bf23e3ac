//! Per-session FSM, timestamp math, and the fixed-capacity two-level
//! session table (spec.md §3, §4.4-§4.6).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::PtpError;
use crate::ports::{ClockSource, TxPort};
use crate::wire::{self, PortIdentity, PtpTimestamp};

/// Maximum enabled ingress ports (spec.md §3).
pub const MAX_PORTS: u8 = 8;
/// Maximum sessions per port (spec.md §3).
pub const MAX_SESSIONS_PER_PORT: usize = 4;

/// No Sync seen for this long: session drops back to `Listening`
/// (spec.md §4.5).
pub const SYNC_TIMEOUT_NS: i64 = 3_000_000_000;
/// Delay between accepting a Sync and emitting the paired Delay_Req
/// (spec.md §4.5, §9 OQ2: fires on this schedule regardless of whether
/// the previous cycle's Delay_Resp ever arrived).
pub const DELAY_REQ_INTERVAL_NS: i64 = 100_000_000;
/// No matching Delay_Resp within this long of sending Delay_Req: the
/// cycle is abandoned and the session returns to `Listening`.
pub const DELAY_RESP_TIMEOUT_NS: i64 = 2_000_000_000;

/// Per-session FSM state (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FsmState {
    Init = 0,
    Listening = 1,
    SyncReceived = 2,
    DelayReqSent = 3,
    Synced = 4,
    Error = 5,
}

impl From<u8> for FsmState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::Listening,
            2 => Self::SyncReceived,
            3 => Self::DelayReqSent,
            4 => Self::Synced,
            _ => Self::Error,
        }
    }
}

/// Static, immutable-after-configure description of one session
/// (spec.md §3, keyed by `(rx_port_id, rx_vlan)`).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rx_port_id: u8,
    /// `None` for an untagged ingress classification.
    pub rx_vlan: Option<u16>,
    pub tx_port_id: u8,
    /// VLAN tag stamped on the outgoing Delay_Req.
    pub tx_vlan: u16,
    /// VL index encoded into the Delay_Req's destination MAC
    /// (spec.md §4.1).
    pub tx_vl_idx: u16,
    pub domain: u8,
    /// Delay_Req padded frame length; see `wire::DELAY_REQ_PADDED_LEN`
    /// and DESIGN.md's Open Question note on master compatibility.
    pub delay_req_padded_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rx_port_id: 0,
            rx_vlan: None,
            tx_port_id: 0,
            tx_vlan: 0,
            tx_vl_idx: 0,
            domain: wire::DOMAIN_NUMBER,
            delay_req_padded_len: wire::DELAY_REQ_PADDED_LEN,
        }
    }
}

/// Lock-free stats, single writer (the owning worker), many readers
/// (the control surface), per spec.md §9 REDESIGN FLAGS. Offset/delay
/// are read independently with `Relaxed` ordering: a reader may
/// observe a torn pair (offset from one cycle, delay from the next),
/// which spec.md accepts as a snapshot-freshness tradeoff rather than
/// pay for a lock on the hot path.
#[derive(Default)]
pub struct SessionStats {
    state: AtomicU8,
    synced: AtomicBool,
    offset_ns: AtomicI64,
    delay_ns: AtomicI64,
    sync_count: AtomicU64,
    delay_req_sent: AtomicU64,
    delay_resp_accepted: AtomicU64,
    sync_timeouts: AtomicU64,
    delay_resp_timeouts: AtomicU64,
    delay_resp_stale: AtomicU64,
    tx_failures: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`] for the control surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStatsSnapshot {
    pub state: FsmState,
    pub synced: bool,
    pub offset_ns: i64,
    pub delay_ns: i64,
    pub sync_count: u64,
    pub delay_req_sent: u64,
    pub delay_resp_accepted: u64,
    pub sync_timeouts: u64,
    pub delay_resp_timeouts: u64,
    pub delay_resp_stale: u64,
    pub tx_failures: u64,
}

impl Default for FsmState {
    fn default() -> Self {
        FsmState::Init
    }
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            state: FsmState::from(self.state.load(Ordering::Relaxed)),
            synced: self.synced.load(Ordering::Relaxed),
            offset_ns: self.offset_ns.load(Ordering::Relaxed),
            delay_ns: self.delay_ns.load(Ordering::Relaxed),
            sync_count: self.sync_count.load(Ordering::Relaxed),
            delay_req_sent: self.delay_req_sent.load(Ordering::Relaxed),
            delay_resp_accepted: self.delay_resp_accepted.load(Ordering::Relaxed),
            sync_timeouts: self.sync_timeouts.load(Ordering::Relaxed),
            delay_resp_timeouts: self.delay_resp_timeouts.load(Ordering::Relaxed),
            delay_resp_stale: self.delay_resp_stale.load(Ordering::Relaxed),
            tx_failures: self.tx_failures.load(Ordering::Relaxed),
        }
    }

    /// Human-readable one-liner, in the spirit of
    /// `bass-ptp/src/stats.rs`'s `format_display`.
    pub fn format_display(&self) -> String {
        let s = self.snapshot();
        format!(
            "{:?} offset={}ns delay={}ns synced={}",
            s.state, s.offset_ns, s.delay_ns, s.synced
        )
    }

    /// Verbose counters dump, in the spirit of `format_detailed`.
    pub fn format_detailed(&self) -> String {
        let s = self.snapshot();
        format!(
            "state={:?} synced={} offset_ns={} delay_ns={} sync_count={} delay_req_sent={} \
             delay_resp_accepted={} sync_timeouts={} delay_resp_timeouts={} delay_resp_stale={} \
             tx_failures={}",
            s.state,
            s.synced,
            s.offset_ns,
            s.delay_ns,
            s.sync_count,
            s.delay_req_sent,
            s.delay_resp_accepted,
            s.sync_timeouts,
            s.delay_resp_timeouts,
            s.delay_resp_stale,
            s.tx_failures
        )
    }

    /// Zero every counter and the offset/delay pair, leaving `state`
    /// and `synced` untouched (spec.md §7 `reset_stats`: a counter
    /// reset must not itself look like a state transition).
    pub fn reset(&self) {
        self.offset_ns.store(0, Ordering::Relaxed);
        self.delay_ns.store(0, Ordering::Relaxed);
        self.sync_count.store(0, Ordering::Relaxed);
        self.delay_req_sent.store(0, Ordering::Relaxed);
        self.delay_resp_accepted.store(0, Ordering::Relaxed);
        self.sync_timeouts.store(0, Ordering::Relaxed);
        self.delay_resp_timeouts.store(0, Ordering::Relaxed);
        self.delay_resp_stale.store(0, Ordering::Relaxed);
        self.tx_failures.store(0, Ordering::Relaxed);
    }

    fn set_state(&self, state: FsmState) {
        self.state.store(state as u8, Ordering::Relaxed);
        self.synced.store(matches!(state, FsmState::Synced), Ordering::Relaxed);
    }
}

/// Compute (offset, mean-path-delay) from the four PTP timestamps,
/// spec.md §4.6's standard one-step formula:
/// `offset = ((t2-t1) - (t4-t3)) / 2`, `delay = ((t2-t1) + (t4-t3)) / 2`.
pub fn compute_offset_delay(t1: i64, t2: i64, t3: i64, t4: i64) -> (i64, i64) {
    let forward = t2 - t1;
    let reverse = t4 - t3;
    let offset = (forward - reverse) / 2;
    let delay = (forward + reverse) / 2;
    (offset, delay)
}

/// One session's live FSM state plus its stats handle.
pub struct Session {
    pub config: SessionConfig,
    state: FsmState,
    t1: i64,
    t2: i64,
    t3: i64,
    last_sync_monotonic: i64,
    last_transition: i64,
    delay_req_seq: u16,
    /// Master identity and domain learned from the most recent Sync,
    /// regardless of whether that Sync was accepted into the in-flight
    /// cycle (spec.md §3, §4.4 "Always updated").
    master_port_id: PortIdentity,
    master_domain: u8,
    /// Sequence id of the most recently received Sync (spec.md §3's
    /// `sync_seq_id`), likewise always updated.
    sync_seq_id: u16,
    pub stats: Arc<SessionStats>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let stats = Arc::new(SessionStats::default());
        stats.set_state(FsmState::Init);
        Self {
            config,
            state: FsmState::Init,
            t1: 0,
            t2: 0,
            t3: 0,
            last_sync_monotonic: 0,
            last_transition: 0,
            delay_req_seq: 0,
            master_port_id: PortIdentity::default(),
            master_domain: 0,
            sync_seq_id: 0,
            stats,
        }
    }

    /// Master `PortIdentity`, domain, and sequence id learned from the
    /// most recently received Sync (spec.md §3). Exposed for tests and
    /// any operator-facing diagnostics; not part of [`SessionStats`]
    /// since spec.md §6's `snapshot_stats` shape doesn't carry it.
    pub fn master_info(&self) -> (PortIdentity, u8, u16) {
        (self.master_port_id, self.master_domain, self.sync_seq_id)
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    fn transition(&mut self, next: FsmState, now_ns: i64) {
        if next != self.state {
            debug!(
                "session rx_port={} rx_vlan={:?}: {:?} -> {:?}",
                self.config.rx_port_id, self.config.rx_vlan, self.state, next
            );
        }
        self.state = next;
        self.last_transition = now_ns;
        self.stats.set_state(next);
    }

    /// Accept a Sync frame. Per spec.md §4.4, master identity/domain,
    /// the sync sequence id, the rx counter, and `last_sync_monotonic`
    /// are updated unconditionally on every Sync, in every state — a
    /// session mid-cycle still needs to track who the master currently
    /// is. Only the timestamp pair and the state transition are gated:
    /// acceptance states are `{Init, Listening, Synced, Error}` (Init
    /// included here: a session's very first Sync can arrive before its
    /// owning worker's first `tick()` call ever promotes it out of
    /// `Init`, since dispatch runs before tick within a batch — see
    /// spec.md §4.3). A Sync arriving mid-cycle
    /// (`SyncReceived`/`DelayReqSent`) leaves the in-flight t1/t2 pair
    /// untouched (§9 OQ3), rather than restarting the cycle.
    pub fn on_sync(
        &mut self,
        now_ns: i64,
        origin_timestamp: PtpTimestamp,
        rx_timestamp_ns: i64,
        master_port_id: PortIdentity,
        master_domain: u8,
        sync_seq_id: u16,
    ) {
        self.master_port_id = master_port_id;
        self.master_domain = master_domain;
        self.sync_seq_id = sync_seq_id;
        self.last_sync_monotonic = now_ns;
        self.stats.sync_count.fetch_add(1, Ordering::Relaxed);

        match self.state {
            FsmState::Init | FsmState::Listening | FsmState::Synced | FsmState::Error => {
                self.t1 = origin_timestamp.to_ns();
                self.t2 = rx_timestamp_ns;
                self.transition(FsmState::SyncReceived, now_ns);
            }
            FsmState::SyncReceived | FsmState::DelayReqSent => {
                // t1/t2 preserved; cycle already in flight.
            }
        }
    }

    /// Accept a Delay_Resp. Only valid while `DelayReqSent` and only
    /// when the sequence id matches this session's own outstanding
    /// request; anything else is a stale/foreign response and is
    /// dropped, counted, never an error (spec.md §4.4, §7). The
    /// requesting-port-identity field carried in the wire body is
    /// deliberately NOT consulted here: spec.md §4.4 is explicit that
    /// this deployment's master echoes zeros or unrelated bytes in that
    /// field, so the VLAN (already applied by the caller's dispatch
    /// lookup) plus sequence id pair is the sole authority.
    pub fn on_delay_resp(&mut self, now_ns: i64, sequence_id: u16, receive_timestamp: PtpTimestamp) {
        let stale = self.state != FsmState::DelayReqSent || sequence_id != self.delay_req_seq;
        if stale {
            self.stats.delay_resp_stale.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let t4 = receive_timestamp.to_ns();
        // A zero receive-timestamp means the master omitted T4: the
        // protocol cycle still completes (Synced), but no meaningful
        // offset/delay can be published for this round (spec.md §4.6).
        let (offset_ns, delay_ns) = if t4 == 0 {
            (0, 0)
        } else {
            compute_offset_delay(self.t1, self.t2, self.t3, t4)
        };
        self.stats.offset_ns.store(offset_ns, Ordering::Relaxed);
        self.stats.delay_ns.store(delay_ns, Ordering::Relaxed);
        self.stats
            .delay_resp_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.transition(FsmState::Synced, now_ns);
    }

    /// Advance time-driven transitions, matched per-state against
    /// spec.md §4.5's table exactly — each state has its own timeout
    /// rule, not a rule shared globally across states. Called once per
    /// worker batch for every session it owns, regardless of whether
    /// that batch carried any frame for this session.
    ///
    /// `now_mono_ns` is this batch's coarse monotonic sample, used to
    /// decide *whether* an interval has elapsed (spec.md §3's
    /// "last-transition monotonic tick", §4.6's warning against
    /// corrupting FSM timing with wall-clock jumps). `clock` is handed
    /// down only so [`Self::send_delay_req`] can take its own
    /// fresh, tightly-bracketed samples right around the transmit call
    /// (spec.md §4.7) rather than reusing this batch's coarser value.
    pub fn tick(&mut self, now_mono_ns: i64, clock: &dyn ClockSource, tx: &mut dyn TxPort) {
        match self.state {
            FsmState::Init => {
                self.transition(FsmState::Listening, now_mono_ns);
            }
            FsmState::Listening | FsmState::Synced => {
                if self.last_sync_monotonic != 0
                    && now_mono_ns - self.last_sync_monotonic > SYNC_TIMEOUT_NS
                {
                    self.stats.sync_timeouts.fetch_add(1, Ordering::Relaxed);
                    // Re-arm: without this reset, every subsequent tick
                    // while still silent would re-fire the same timeout.
                    self.last_sync_monotonic = 0;
                    self.transition(FsmState::Listening, now_mono_ns);
                }
            }
            FsmState::SyncReceived => {
                if now_mono_ns - self.last_transition >= DELAY_REQ_INTERVAL_NS {
                    self.send_delay_req(clock, tx);
                }
            }
            FsmState::DelayReqSent => {
                if now_mono_ns - self.last_transition > DELAY_RESP_TIMEOUT_NS {
                    self.stats
                        .delay_resp_timeouts
                        .fetch_add(1, Ordering::Relaxed);
                    self.transition(FsmState::Listening, now_mono_ns);
                }
            }
            FsmState::Error => {
                if now_mono_ns - self.last_transition > SYNC_TIMEOUT_NS {
                    self.transition(FsmState::Listening, now_mono_ns);
                }
            }
        }
    }

    /// Build and hand off a Delay_Req, sampling `t3` freshly around the
    /// `tx.send` call rather than reusing a batch-wide timestamp
    /// (spec.md §4.7 steps 3-4, §2's "samples TX time just around the
    /// send call"): `t3_mono_before`/`t3_mono_after` bracket the send
    /// and their midpoint becomes this event's precise monotonic
    /// instant (used for `last_transition`, so Delay_Req pacing doesn't
    /// drift by a batch's worth of jitter); a single wall-clock read
    /// taken in the same window becomes `t3` for the offset formula
    /// (spec.md §4.6 requires `t3` share `t1`/`t2`/`t4`'s epoch).
    fn send_delay_req(&mut self, clock: &dyn ClockSource, tx: &mut dyn TxPort) {
        self.delay_req_seq = self.delay_req_seq.wrapping_add(1);
        let frame = wire::build_delay_req(
            PortIdentity::SLAVE_FIXED,
            self.config.tx_vlan,
            self.config.tx_vl_idx,
            self.config.domain,
            self.delay_req_seq,
            self.config.delay_req_padded_len,
        );

        let t3_mono_before = clock.now_monotonic_ns();
        let t3_wall = clock.now_wall_ns();
        let result = tx.send(&frame);
        let t3_mono_after = clock.now_monotonic_ns();
        let t3_mono = (t3_mono_before + t3_mono_after) / 2;

        match result {
            Ok(()) => {
                self.t3 = t3_wall;
                self.stats.delay_req_sent.fetch_add(1, Ordering::Relaxed);
                self.transition(FsmState::DelayReqSent, t3_mono);
            }
            Err(err) => {
                warn!(
                    "delay_req tx failed on port {} (vlan {:?}): {err}",
                    self.config.tx_port_id, self.config.rx_vlan
                );
                self.stats.tx_failures.fetch_add(1, Ordering::Relaxed);
                self.transition(FsmState::Error, t3_mono);
            }
        }
    }
}

/// Fixed-capacity two-level session table: up to [`MAX_PORTS`] ports,
/// each holding up to [`MAX_SESSIONS_PER_PORT`] sessions keyed by
/// `(rx_port_id, rx_vlan)` (spec.md §3).
#[derive(Default)]
pub struct SessionTable {
    ports: std::collections::HashMap<u8, Vec<Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the table's contents. Validates port range, per-port
    /// capacity, and VLAN-key uniqueness before committing anything;
    /// on error the table is left unchanged.
    pub fn configure(&mut self, configs: Vec<SessionConfig>) -> Result<(), PtpError> {
        let mut by_port: std::collections::HashMap<u8, Vec<SessionConfig>> =
            std::collections::HashMap::new();

        for config in configs {
            if config.rx_port_id >= MAX_PORTS {
                return Err(PtpError::PortOutOfRange(config.rx_port_id));
            }
            if config.tx_port_id >= MAX_PORTS {
                return Err(PtpError::PortOutOfRange(config.tx_port_id));
            }
            let bucket = by_port.entry(config.rx_port_id).or_default();
            if bucket
                .iter()
                .any(|existing| existing.rx_vlan == config.rx_vlan)
            {
                return Err(PtpError::DuplicateVlan(
                    config.rx_port_id,
                    config.rx_vlan.unwrap_or(0),
                ));
            }
            if bucket.len() >= MAX_SESSIONS_PER_PORT {
                return Err(PtpError::TooManySessions(
                    config.rx_port_id,
                    bucket.len() + 1,
                ));
            }
            bucket.push(config);
        }

        self.ports = by_port
            .into_iter()
            .map(|(port, configs)| {
                (
                    port,
                    configs.into_iter().map(Session::new).collect::<Vec<_>>(),
                )
            })
            .collect();
        Ok(())
    }

    /// Ports that have at least one configured session, ascending.
    pub fn enabled_ports(&self) -> Vec<u8> {
        let mut ports: Vec<u8> = self.ports.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Take exclusive ownership of one port's sessions, handing them to
    /// that port's worker thread (spec.md §5: single-threaded
    /// ownership, no per-session lock).
    pub fn take_sessions(&mut self, port_id: u8) -> Vec<Session> {
        self.ports.remove(&port_id).unwrap_or_default()
    }

    /// Find the session matching an ingress `(port_id, vlan)` key
    /// within a worker's owned slice — used by `worker.rs`'s dispatch.
    pub fn find_mut<'a>(
        sessions: &'a mut [Session],
        vlan: Option<u16>,
    ) -> Option<&'a mut Session> {
        sessions.iter_mut().find(|s| s.config.rx_vlan == vlan)
    }

    /// Every configured session's stats handle, for the control
    /// surface's snapshot/reset calls. Valid before `take_sessions` is
    /// called for a port; after that, stats handles should instead be
    /// captured by the caller at `take_sessions` time (they are
    /// `Arc`-shared, so either lives as long as needed).
    pub fn all_stats(&self) -> Vec<((u8, Option<u16>), Arc<SessionStats>)> {
        self.ports
            .iter()
            .flat_map(|(port, sessions)| {
                sessions
                    .iter()
                    .map(move |s| ((*port, s.config.rx_vlan), s.stats.clone()))
            })
            .collect()
    }
}
