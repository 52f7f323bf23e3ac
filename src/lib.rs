//! One-step IEEE 1588v2 PTP boundary-slave session engine for an
//! L2-fabric packet-forwarding appliance.
//!
//! `PtpCore` owns a fixed-capacity session table and, once started,
//! one dedicated worker thread per enabled ingress port. The NIC, its
//! flow-steering control plane, and the wall clock are external
//! collaborators (see [`ports`]) supplied by the host at `start` time
//! — this crate never opens a socket or talks to hardware itself.

pub mod error;
pub mod flow;
pub mod ports;
pub mod session;
#[cfg(test)]
pub mod testkit;
pub mod wire;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};

pub use error::PtpError;
pub use session::{SessionConfig, SessionStatsSnapshot};

use flow::{FlowRuleTable, InstallOutcome};
use ports::{ClockSource, FlowSteering, RxPort, TxPort};
use session::SessionTable;
use worker::{spawn_worker, WorkerHandle, WorkerThreadHint};

/// External collaborators the core needs to actually run (spec.md §6).
/// Supplied once, at [`PtpCore::start`].
pub struct Collaborators {
    pub flow_steering: Box<dyn FlowSteering>,
    pub clock: Arc<dyn ClockSource>,
    /// Keyed by `rx_port_id`. `start` fails with
    /// [`PtpError::PortOutOfRange`] if an enabled port has no entry.
    pub rx_ports: HashMap<u8, Box<dyn RxPort>>,
    /// Keyed by `tx_port_id`.
    pub tx_ports: HashMap<u8, Box<dyn TxPort>>,
}

/// Identifies one configured session for the control surface's
/// stats/reset calls: `(rx_port_id, rx_vlan)`.
pub type SessionKey = (u8, Option<u16>);

/// Owned control surface for the session engine (spec.md §7). Replaces
/// the teacher's process-wide singleton with a plain value per
/// spec.md §9's "module-wide singleton context" redesign note — create
/// one per appliance instance, no language-level globals.
pub struct PtpCore {
    sessions: SessionTable,
    flow_rules: FlowRuleTable,
    stats_registry: HashMap<SessionKey, Arc<session::SessionStats>>,
    thread_hints: HashMap<u8, WorkerThreadHint>,
    workers: HashMap<u8, WorkerHandle>,
    configured: bool,
    running: bool,
}

impl Default for PtpCore {
    fn default() -> Self {
        Self::init()
    }
}

impl PtpCore {
    /// Create an unconfigured core. Mirrors `bass-ptp`'s `start_ptp_client`
    /// entry point, minus the global reference-counting: here the
    /// caller owns the returned value directly.
    pub fn init() -> Self {
        Self {
            sessions: SessionTable::new(),
            flow_rules: FlowRuleTable::new(),
            stats_registry: HashMap::new(),
            thread_hints: HashMap::new(),
            workers: HashMap::new(),
            configured: false,
            running: false,
        }
    }

    /// Load the static session table (spec.md §3). Must be called
    /// before `start`, and cannot be called again while running.
    pub fn configure(&mut self, configs: Vec<SessionConfig>) -> Result<(), PtpError> {
        if self.running {
            return Err(PtpError::AlreadyRunning);
        }
        self.sessions.configure(configs)?;
        self.stats_registry = self.sessions.all_stats().into_iter().collect();
        self.configured = true;
        Ok(())
    }

    /// Record a best-effort CPU pinning hint for a port's future
    /// worker thread (spec.md §5). Has no effect if `port_id` has no
    /// configured session.
    pub fn assign_worker_thread(&mut self, port_id: u8, hint: WorkerThreadHint) {
        self.thread_hints.insert(port_id, hint);
    }

    /// Install flow-steering rules on every enabled port and spawn its
    /// worker thread (spec.md §4.2, §4.3, §7).
    ///
    /// Per-port rule-cascade exhaustion is non-fatal: that port starts
    /// unfiltered and its worker classifies defensively in software
    /// (spec.md §4.2). `start` itself only fails with
    /// [`PtpError::FlowRuleFailed`] when *no* enabled port managed to
    /// install any rule at all — in that case nothing is spawned and
    /// the session table is left untouched, so the caller can retry.
    pub fn start(&mut self, mut collaborators: Collaborators) -> Result<(), PtpError> {
        if self.running {
            return Err(PtpError::AlreadyRunning);
        }
        if !self.configured {
            return Err(PtpError::NoSessions);
        }
        let enabled = self.sessions.enabled_ports();
        if enabled.is_empty() {
            return Err(PtpError::NoSessions);
        }

        let mut outcomes: HashMap<u8, InstallOutcome> = HashMap::new();
        for &port_id in &enabled {
            let outcome = self
                .flow_rules
                .install(collaborators.flow_steering.as_mut(), port_id);
            outcomes.insert(port_id, outcome);
        }
        let installed_any = outcomes
            .values()
            .any(|o| matches!(o, InstallOutcome::Installed(_)));
        if !installed_any {
            self.flow_rules.teardown_all(collaborators.flow_steering.as_mut());
            return Err(PtpError::FlowRuleFailed);
        }

        for &port_id in &enabled {
            let sessions = self.sessions.take_sessions(port_id);
            let rx = collaborators
                .rx_ports
                .remove(&port_id)
                .ok_or(PtpError::PortOutOfRange(port_id))?;
            let tx = collaborators
                .tx_ports
                .remove(&port_id)
                .ok_or(PtpError::PortOutOfRange(port_id))?;
            let hint = self
                .thread_hints
                .remove(&port_id)
                .unwrap_or(WorkerThreadHint { core_id: None });
            let handle = spawn_worker(port_id, sessions, rx, tx, collaborators.clock.clone(), hint);
            self.workers.insert(port_id, handle);
        }

        info!("PTP core started: {} port(s) enabled", enabled.len());
        self.running = true;
        Ok(())
    }

    /// Stop every worker thread and hand their sessions back into the
    /// session table, so a subsequent `start` can reuse the same
    /// configuration (spec.md §7).
    pub fn stop(&mut self) -> Result<(), PtpError> {
        if !self.running {
            return Err(PtpError::NotInitialized);
        }
        for (_port_id, handle) in self.workers.drain() {
            let _sessions = handle.stop();
            // Sessions are dropped here rather than re-inserted into
            // `self.sessions`: their `Arc<SessionStats>` handles
            // already live on in `self.stats_registry`, which is the
            // only thing `snapshot_stats`/`reset_stats` read.
        }
        self.running = false;
        warn!("PTP core stopped; flow rules remain installed until cleanup()");
        Ok(())
    }

    /// Tear down every installed flow-steering rule (spec.md §4.2,
    /// §7). Call after `stop`; safe to call even if nothing was ever
    /// installed.
    pub fn cleanup(&mut self, flow_steering: &mut dyn FlowSteering) {
        self.flow_rules.teardown_all(flow_steering);
    }

    /// Snapshot every configured session's stats (spec.md §7).
    /// Available whether or not the core is currently running.
    pub fn snapshot_stats(&self) -> Vec<(SessionKey, SessionStatsSnapshot)> {
        self.stats_registry
            .iter()
            .map(|(key, stats)| (*key, stats.snapshot()))
            .collect()
    }

    /// Zero every session's counters without disturbing its FSM state
    /// (spec.md §7).
    pub fn reset_stats(&self) {
        for stats in self.stats_registry.values() {
            stats.reset();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FixedBufferPool, MockClock, MockFlowSteering, MockRxPort, MockTxPort};
    use std::sync::Arc;

    fn single_port_collaborators() -> (Collaborators, crate::testkit::MockRxFeed, crate::testkit::MockTxSink) {
        let (feed, rx) = MockRxPort::new(16);
        let (tx, sink) = MockTxPort::new(16);
        let mut rx_ports: HashMap<u8, Box<dyn RxPort>> = HashMap::new();
        rx_ports.insert(0, Box::new(rx));
        let mut tx_ports: HashMap<u8, Box<dyn TxPort>> = HashMap::new();
        tx_ports.insert(0, Box::new(tx));
        let collaborators = Collaborators {
            flow_steering: Box::new(MockFlowSteering::new()),
            clock: Arc::new(MockClock::new(0)),
            rx_ports,
            tx_ports,
        };
        let _ = FixedBufferPool; // unused by the core itself; see ports.rs doc.
        (collaborators, feed, sink)
    }

    #[test]
    fn start_requires_configure_first() {
        let mut core = PtpCore::init();
        let (collaborators, _feed, _sink) = single_port_collaborators();
        assert!(matches!(core.start(collaborators), Err(PtpError::NoSessions)));
    }

    #[test]
    fn start_fails_when_every_port_is_unfiltered_and_rejects() {
        let mut core = PtpCore::init();
        core.configure(vec![SessionConfig {
            rx_port_id: 0,
            rx_vlan: Some(225),
            ..Default::default()
        }])
        .unwrap();

        let (feed_rx, rx) = MockRxPort::new(4);
        let (tx, _sink) = MockTxPort::new(4);
        let mut steering = MockFlowSteering::new();
        steering.reject(
            0,
            ports::FlowPattern::VlanTagged {
                outer: ports::OuterEthertype::Unconstrained,
                ethertype: wire::PTP_ETHERTYPE,
            },
        );
        steering.reject(
            0,
            ports::FlowPattern::VlanTagged {
                outer: ports::OuterEthertype::Explicit8021Q,
                ethertype: wire::PTP_ETHERTYPE,
            },
        );
        steering.reject(
            0,
            ports::FlowPattern::Untagged {
                ethertype: wire::PTP_ETHERTYPE,
            },
        );
        let mut rx_ports: HashMap<u8, Box<dyn RxPort>> = HashMap::new();
        rx_ports.insert(0, Box::new(rx));
        let mut tx_ports: HashMap<u8, Box<dyn TxPort>> = HashMap::new();
        tx_ports.insert(0, Box::new(tx));
        let collaborators = Collaborators {
            flow_steering: Box::new(steering),
            clock: Arc::new(MockClock::new(0)),
            rx_ports,
            tx_ports,
        };

        let result = core.start(collaborators);
        assert!(matches!(result, Err(PtpError::FlowRuleFailed)));
        assert!(!core.is_running());
        let _ = feed_rx;
    }

    #[test]
    fn start_then_stop_round_trips_cleanly() {
        let mut core = PtpCore::init();
        core.configure(vec![SessionConfig {
            rx_port_id: 0,
            rx_vlan: None,
            ..Default::default()
        }])
        .unwrap();
        let (collaborators, _feed, _sink) = single_port_collaborators();
        core.start(collaborators).unwrap();
        assert!(core.is_running());

        core.stop().unwrap();
        assert!(!core.is_running());
    }

    #[test]
    fn reset_stats_zeroes_counters_without_touching_state() {
        let mut core = PtpCore::init();
        core.configure(vec![SessionConfig {
            rx_port_id: 0,
            rx_vlan: None,
            ..Default::default()
        }])
        .unwrap();
        for (_, stats) in &core.stats_registry {
            stats.sync_count.fetch_add(5, std::sync::atomic::Ordering::Relaxed);
        }
        core.reset_stats();
        let snap = core.snapshot_stats();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].1.sync_count, 0);
    }
}
