//! Per-port RX worker thread: batch-poll, dispatch, tick every owned
//! session, brief yield, repeat (spec.md §4.3, §5).
//!
//! Each worker owns its port's sessions exclusively for its lifetime —
//! no per-session lock is needed, only the `Arc<SessionStats>` handles
//! published at configure time are ever shared outward.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, trace, warn};

use crate::ports::{ClockSource, RxDescriptor, RxPort, TxPort};
use crate::session::{Session, SessionTable};
use crate::wire::{PtpFrame, PtpMessageType};

/// Frames drained from an RX queue per poll iteration (spec.md §4.3).
pub const BATCH_SIZE: usize = 32;

/// Best-effort CPU core to pin this worker to, if the platform permits
/// (spec.md §5; grounded on the `ethercrab` XDP example's use of
/// `core_affinity`). Pinning failures are logged, never fatal.
pub struct WorkerThreadHint {
    pub core_id: Option<core_affinity::CoreId>,
}

/// Handle to a spawned worker, used by the control surface to request
/// a clean stop (spec.md §7 `stop`).
pub struct WorkerHandle {
    stop_flag: Arc<AtomicBool>,
    join: JoinHandle<Vec<Session>>,
}

impl WorkerHandle {
    /// Signal the worker to stop after its current batch and block
    /// until it exits, handing back its sessions so the control
    /// surface can tear down any pending state.
    pub fn stop(self) -> Vec<Session> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.join.join().unwrap_or_default()
    }
}

/// Spawn a dedicated thread owning `port_id`'s sessions for as long as
/// the returned handle lives.
pub fn spawn_worker(
    port_id: u8,
    sessions: Vec<Session>,
    rx: Box<dyn RxPort>,
    tx: Box<dyn TxPort>,
    clock: Arc<dyn ClockSource>,
    hint: WorkerThreadHint,
) -> WorkerHandle {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let thread_stop_flag = stop_flag.clone();

    let join = std::thread::Builder::new()
        .name(format!("ptp-rx-port-{port_id}"))
        .spawn(move || {
            if let Some(core_id) = hint.core_id {
                if !core_affinity::set_for_current(core_id) {
                    warn!("port {port_id}: failed to pin worker thread to {core_id:?}");
                }
            }
            run_worker_loop(port_id, sessions, rx, tx, clock.as_ref(), thread_stop_flag)
        })
        .expect("failed to spawn PTP RX worker thread");

    WorkerHandle { stop_flag, join }
}

/// The worker's main loop (spec.md §4.3): poll a batch, dispatch each
/// frame to the session whose `(port_id, vlan)` key matches, tick
/// every owned session once per batch (even ones with no frame this
/// round, so timeouts still fire), then briefly yield.
fn run_worker_loop(
    port_id: u8,
    mut sessions: Vec<Session>,
    mut rx: Box<dyn RxPort>,
    mut tx: Box<dyn TxPort>,
    clock: &dyn ClockSource,
    stop_flag: Arc<AtomicBool>,
) -> Vec<Session> {
    debug!("port {port_id}: worker started with {} session(s)", sessions.len());
    let mut batch: Vec<RxDescriptor<'_>> = Vec::with_capacity(BATCH_SIZE);

    while !stop_flag.load(Ordering::Relaxed) {
        batch.clear();
        rx.poll(BATCH_SIZE, &mut batch);

        // Sample both clock domains once per batch, as close to the
        // dequeue as this loop gets, per spec.md §4.3: a wall-clock
        // value for offset math and a monotonic tick for pacing math.
        // `clock` itself is also handed to `tick` so a session that
        // actually sends a Delay_Req this iteration can take its own
        // fresh samples bracketing the transmit call (spec.md §4.7)
        // instead of reusing this coarser batch-wide pair.
        let wall_now = clock.now_wall_ns();
        let mono_now = clock.now_monotonic_ns();
        for descriptor in &batch {
            dispatch(port_id, &mut sessions, descriptor, wall_now, mono_now);
        }

        for session in &mut sessions {
            session.tick(mono_now, clock, tx.as_mut());
        }

        if batch.is_empty() {
            std::thread::yield_now();
        }
    }

    debug!("port {port_id}: worker stopping");
    sessions
}

/// Classify and route one polled frame to its owning session.
/// Frames with no matching session (wrong VLAN, or a port with zero
/// configured sessions reached via the unfiltered fallback classifier
/// rule) are silently dropped — this is the "filter defensively in
/// software" behavior spec.md §4.2/§4.3 calls for when the hardware
/// classifier cascade found no acceptable candidate.
fn dispatch(
    port_id: u8,
    sessions: &mut [Session],
    descriptor: &RxDescriptor<'_>,
    wall_now_ns: i64,
    mono_now_ns: i64,
) {
    let Some(frame) = PtpFrame::parse(descriptor.data) else {
        trace!("port {port_id}: dropped unparseable frame ({} bytes)", descriptor.data.len());
        return;
    };

    let Some(session) = SessionTable::find_mut(sessions, frame.vlan_id) else {
        trace!("port {port_id}: no session for vlan {:?}", frame.vlan_id);
        return;
    };

    // t2's wall-clock value: the hardware/software RX timestamp if the
    // port supplied one, else this batch's wall-clock sample. Either
    // way it stays in the wall-clock domain — never the monotonic tick
    // used for FSM pacing (spec.md §4.6).
    let rx_timestamp_ns = descriptor.timestamp_ns.unwrap_or(wall_now_ns);

    match frame.header.message_type {
        PtpMessageType::Sync => {
            if let Some(body) = crate::wire::SyncBody::parse(frame.body) {
                session.on_sync(
                    mono_now_ns,
                    body.origin_timestamp,
                    rx_timestamp_ns,
                    frame.header.source_port_identity,
                    frame.header.domain_number,
                    frame.header.sequence_id,
                );
            }
        }
        PtpMessageType::DelayResp => {
            if let Some(body) = crate::wire::DelayRespBody::parse(frame.body) {
                // body.requesting_port_identity is decoded but
                // deliberately unused for gating (spec.md §4.4) — see
                // Session::on_delay_resp's doc comment.
                session.on_delay_resp(mono_now_ns, frame.header.sequence_id, body.receive_timestamp);
            }
        }
        // Follow_Up is accepted on the wire (it does not fail
        // classification or parsing) but deliberately ignored: this
        // deployment is one-step only (spec.md §1 non-goals).
        PtpMessageType::FollowUp | PtpMessageType::Announce | PtpMessageType::DelayReq
        | PtpMessageType::Other(_) => {}
    }
}
