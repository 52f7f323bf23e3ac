//! NIC classifier rule cascade (spec.md §4.2).
//!
//! Each enabled port tries three candidate patterns in order, keeping
//! the first one the classifier accepts: VLAN-tagged with the outer
//! Ethernet type unconstrained, VLAN-tagged with the outer type pinned
//! to 0x8100, then untagged PTP. None of the three matches a specific
//! VLAN id — software dispatch re-checks VLAN regardless (§4.3). A
//! port that exhausts the cascade starts anyway with no hardware
//! filter installed; its worker is expected to filter defensively.

use std::collections::HashMap;

use log::warn;

use crate::ports::{FlowPattern, FlowSteering, OuterEthertype, RuleHandle};
use crate::wire::PTP_ETHERTYPE;

/// Build the three-pattern cascade, in the order spec.md §4.2 lists
/// them: outer-unconstrained VLAN-tagged, outer-0x8100 VLAN-tagged,
/// then untagged. None of the three matches a specific VLAN id — all
/// leave the tag's TCI unmatched (any VLAN) or carry no tag at all.
fn candidate_patterns() -> [FlowPattern; 3] {
    [
        FlowPattern::VlanTagged {
            outer: OuterEthertype::Unconstrained,
            ethertype: PTP_ETHERTYPE,
        },
        FlowPattern::VlanTagged {
            outer: OuterEthertype::Explicit8021Q,
            ethertype: PTP_ETHERTYPE,
        },
        FlowPattern::Untagged {
            ethertype: PTP_ETHERTYPE,
        },
    ]
}

/// Outcome of attempting the cascade on one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// A pattern was accepted; index into the cascade (0..=2) that won.
    Installed(usize),
    /// Every candidate was rejected; the port proceeds unfiltered.
    Unfiltered,
}

/// Tracks the rule handle installed per port, so it can be torn down
/// again on `stop`/`cleanup` (spec.md §4.2 teardown, §7 `stop`).
#[derive(Default)]
pub struct FlowRuleTable {
    handles: HashMap<u8, RuleHandle>,
}

impl FlowRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the cascade for `port_id` against `steering`, keeping the
    /// winning handle (if any) for later teardown.
    pub fn install(&mut self, steering: &mut dyn FlowSteering, port_id: u8) -> InstallOutcome {
        for (idx, pattern) in candidate_patterns().into_iter().enumerate() {
            match steering.install(port_id, pattern) {
                Ok(handle) => {
                    self.handles.insert(port_id, handle);
                    return InstallOutcome::Installed(idx);
                }
                Err(err) => {
                    warn!(
                        "flow-rule candidate {idx} rejected on port {port_id} ({pattern:?}): {err}"
                    );
                }
            }
        }
        warn!("port {port_id} starting unfiltered: no flow-rule candidate was accepted");
        InstallOutcome::Unfiltered
    }

    /// Tear down the rule installed on `port_id`, if any. A no-op for
    /// a port that ran unfiltered.
    pub fn teardown(&mut self, steering: &mut dyn FlowSteering, port_id: u8) {
        if let Some(handle) = self.handles.remove(&port_id) {
            steering.teardown(port_id, handle);
        }
    }

    /// Tear down every installed rule (spec.md §7 `cleanup`).
    pub fn teardown_all(&mut self, steering: &mut dyn FlowSteering) {
        for (port_id, handle) in self.handles.drain() {
            steering.teardown(port_id, handle);
        }
    }

    pub fn installed_ports(&self) -> impl Iterator<Item = u8> + '_ {
        self.handles.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedSteering {
        /// For each (port, cascade index), whether `install` succeeds.
        accept: HashMap<(u8, usize), bool>,
        teardown_calls: Vec<(u8, RuleHandle)>,
        next_handle: u64,
    }

    impl ScriptedSteering {
        fn new() -> Self {
            Self {
                accept: HashMap::new(),
                teardown_calls: Vec::new(),
                next_handle: 1,
            }
        }

        fn reject_first_n(mut self, port_id: u8, n: usize) -> Self {
            for idx in 0..n {
                self.accept.insert((port_id, idx), false);
            }
            self
        }

        fn reject_all(mut self, port_id: u8) -> Self {
            for idx in 0..3 {
                self.accept.insert((port_id, idx), false);
            }
            self
        }
    }

    impl FlowSteering for ScriptedSteering {
        fn install(&mut self, port_id: u8, pattern: FlowPattern) -> Result<RuleHandle, crate::error::PtpError> {
            let idx = candidate_patterns()
                .iter()
                .position(|p| p == &pattern)
                .unwrap_or(usize::MAX);
            if self.accept.get(&(port_id, idx)).copied().unwrap_or(true) {
                let handle = RuleHandle(self.next_handle);
                self.next_handle += 1;
                Ok(handle)
            } else {
                Err(crate::error::PtpError::FlowRuleFailed)
            }
        }

        fn teardown(&mut self, port_id: u8, handle: RuleHandle) {
            self.teardown_calls.push((port_id, handle));
        }
    }

    #[test]
    fn first_candidate_wins_when_accepted() {
        let mut steering = ScriptedSteering::new();
        let mut table = FlowRuleTable::new();
        let outcome = table.install(&mut steering, 0);
        assert_eq!(outcome, InstallOutcome::Installed(0));
        assert_eq!(table.installed_ports().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn falls_back_through_cascade() {
        // spec.md §8 seed scenario #6: the NIC rejects the VLAN-tagged
        // outer-unconstrained pattern but accepts the VLAN-tagged
        // outer-0x8100 pattern; the installed handle must correspond
        // to cascade index 1 (pattern #2), not some other candidate.
        let mut steering = ScriptedSteering::new().reject_first_n(3, 1);
        let mut table = FlowRuleTable::new();
        let outcome = table.install(&mut steering, 3);
        assert_eq!(outcome, InstallOutcome::Installed(1));
    }

    #[test]
    fn exhausted_cascade_leaves_port_unfiltered_and_untracked() {
        let mut steering = ScriptedSteering::new().reject_all(5);
        let mut table = FlowRuleTable::new();
        let outcome = table.install(&mut steering, 5);
        assert_eq!(outcome, InstallOutcome::Unfiltered);
        assert_eq!(table.installed_ports().count(), 0);
    }

    #[test]
    fn teardown_all_clears_every_tracked_port() {
        let mut steering = ScriptedSteering::new();
        let mut table = FlowRuleTable::new();
        table.install(&mut steering, 0);
        table.install(&mut steering, 1);
        table.teardown_all(&mut steering);
        assert_eq!(steering.teardown_calls.len(), 2);
        assert_eq!(table.installed_ports().count(), 0);
    }
}
