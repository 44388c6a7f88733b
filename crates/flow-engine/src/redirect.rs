//! Honeypot redirection planning.
//!
//! A flagged source is sent to the honeypot tier of its level: suspicious
//! to triage, malicious to deep. The redirect is a pair of exact-flow
//! rewrite rules, so the client keeps talking to the address it chose:
//!
//! ```text
//! client ── dst=server ──> [forward: set dst=honeypot] ──> honeypot
//! client <── src=server ── [reverse: set src=server] <──── honeypot
//! ```
//!
//! Redirect rules carry a hard timeout and no idle timeout, so a source
//! that is released by feedback falls back to normal forwarding once they
//! expire.

use std::net::Ipv4Addr;
use std::sync::Arc;

use honeyflow_core::event::{FlowAction, FlowInstall, OutputPort, PacketOut, PacketOutData};
use honeyflow_core::types::{ClassificationLevel, FiveTuple, MacAddr, PortNo, SwitchId};

use crate::config::{ForwardingConfig, HoneypotTarget, HoneypotTiers};
use crate::flow::{Rewrite, redirect_priority};
use crate::learning::HostLocator;
use crate::packet::arp_probe;
use crate::responder::{HoneypotTier, VirtualIpResponder};

/// How to send a flagged flow to its honeypot.
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectPlan {
    /// Honeypot MAC and port are known: install both directions and forward
    /// the triggering packet.
    Ready {
        tier: HoneypotTier,
        target: Ipv4Addr,
        forward: FlowInstall,
        reverse: FlowInstall,
        actions: Vec<FlowAction>,
    },
    /// Honeypot location is unknown: flood the rewritten packet and probe
    /// for the honeypot. A later packet installs the rules.
    Unresolved {
        tier: HoneypotTier,
        target: Ipv4Addr,
        actions: Vec<FlowAction>,
        probe: PacketOut,
    },
}

impl RedirectPlan {
    /// Honeypot tier the flow is sent to.
    pub fn tier(&self) -> HoneypotTier {
        match self {
            Self::Ready { tier, .. } | Self::Unresolved { tier, .. } => *tier,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Broadcast ARP probe for `target_ip` out of every port of `switch_id`.
pub fn probe_packet_out(
    switch_id: SwitchId,
    forwarding: &ForwardingConfig,
    target_ip: Ipv4Addr,
) -> PacketOut {
    PacketOut {
        switch_id,
        in_port: None,
        data: PacketOutData::Raw(arp_probe(
            forwarding.probe_mac,
            forwarding.probe_ip,
            target_ip,
        )),
        actions: vec![FlowAction::Output(OutputPort::Flood)],
    }
}

/// Plans redirects toward the configured honeypot tiers.
///
/// Holds no per-flow state. Honeypot location comes from the responder's
/// observed bindings, then the configured MAC, then the static topology.
pub struct RedirectionManager {
    tiers: HoneypotTiers,
    forwarding: ForwardingConfig,
    responder: Arc<VirtualIpResponder>,
    locator: Arc<HostLocator>,
}

impl RedirectionManager {
    pub fn new(
        tiers: HoneypotTiers,
        forwarding: ForwardingConfig,
        responder: Arc<VirtualIpResponder>,
        locator: Arc<HostLocator>,
    ) -> Self {
        Self {
            tiers,
            forwarding,
            responder,
            locator,
        }
    }

    fn target(&self, tier: HoneypotTier) -> &HoneypotTarget {
        match tier {
            HoneypotTier::Triage => &self.tiers.triage,
            HoneypotTier::Deep => &self.tiers.deep,
        }
    }

    /// Plan the redirect of `tuple` for a flagged `level`. `None` when the
    /// level is normal.
    ///
    /// `client_dst_mac` is the MAC the client addressed; the return path
    /// restores it as the source.
    pub fn plan(
        &self,
        switch_id: SwitchId,
        in_port: PortNo,
        tuple: &FiveTuple,
        client_dst_mac: MacAddr,
        level: ClassificationLevel,
    ) -> Option<RedirectPlan> {
        let tier = HoneypotTier::for_level(level)?;
        let priority = redirect_priority(level)?;
        let target = *self.target(tier);

        let mac = self
            .responder
            .honeypot_mac(target.ip)
            .or(target.mac)
            .or_else(|| self.locator.static_mac(target.ip));
        let port = self.locator.locate(switch_id, target.ip, mac);

        match (mac, port) {
            (Some(mac), Some(port)) => {
                let rewrite = Rewrite {
                    priority,
                    tuple: *tuple,
                    new_dst_ip: target.ip,
                    new_dst_mac: mac,
                    out_port: port,
                    client_port: in_port,
                    original_dst_mac: (!client_dst_mac.is_multicast()).then_some(client_dst_mac),
                    idle_timeout: 0,
                    hard_timeout: self.tiers.hard_timeout,
                };
                Some(RedirectPlan::Ready {
                    tier,
                    target: target.ip,
                    forward: rewrite.forward(switch_id),
                    reverse: rewrite.reverse(switch_id),
                    actions: rewrite.forward_actions(),
                })
            }
            _ => Some(RedirectPlan::Unresolved {
                tier,
                target: target.ip,
                actions: vec![
                    FlowAction::SetIpv4Dst(target.ip),
                    FlowAction::SetEthDst(mac.unwrap_or(MacAddr::BROADCAST)),
                    FlowAction::Output(OutputPort::Flood),
                ],
                probe: probe_packet_out(switch_id, &self.forwarding, target.ip),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{PRIORITY_REDIRECT_MALICIOUS, PRIORITY_REDIRECT_SUSPICIOUS};
    use crate::learning::AddressLearningTable;
    use honeyflow_core::types::IP_PROTO_TCP;

    const ATTACKER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const SERVER_MAC: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 1]);
    const TRIAGE_MAC: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 4]);

    struct Fixture {
        learning: Arc<AddressLearningTable>,
        responder: Arc<VirtualIpResponder>,
        manager: RedirectionManager,
    }

    fn fixture() -> Fixture {
        let tiers = HoneypotTiers::default();
        let learning = Arc::new(AddressLearningTable::new());
        let responder = Arc::new(VirtualIpResponder::new(&tiers, None));
        let locator = Arc::new(HostLocator::new(Arc::clone(&learning), Vec::new()));
        let manager = RedirectionManager::new(
            tiers,
            ForwardingConfig::default(),
            Arc::clone(&responder),
            locator,
        );
        Fixture {
            learning,
            responder,
            manager,
        }
    }

    fn tuple() -> FiveTuple {
        FiveTuple {
            src_ip: ATTACKER,
            dst_ip: SERVER,
            protocol: IP_PROTO_TCP,
            src_port: 51000,
            dst_port: 8080,
        }
    }

    #[test]
    fn normal_level_has_no_plan() {
        let f = fixture();
        assert!(
            f.manager
                .plan(1, 3, &tuple(), SERVER_MAC, ClassificationLevel::Normal)
                .is_none()
        );
    }

    #[test]
    fn unresolved_honeypot_floods_and_probes() {
        let f = fixture();
        let plan = f
            .manager
            .plan(1, 3, &tuple(), SERVER_MAC, ClassificationLevel::Suspicious)
            .unwrap();
        let RedirectPlan::Unresolved {
            tier,
            target,
            actions,
            probe,
        } = plan
        else {
            panic!("expected unresolved plan");
        };
        assert_eq!(tier, HoneypotTier::Triage);
        assert_eq!(target, Ipv4Addr::new(10, 0, 0, 4));
        assert_eq!(
            actions,
            vec![
                FlowAction::SetIpv4Dst(target),
                FlowAction::SetEthDst(MacAddr::BROADCAST),
                FlowAction::Output(OutputPort::Flood),
            ]
        );
        assert_eq!(probe.actions, vec![FlowAction::Output(OutputPort::Flood)]);
    }

    #[test]
    fn resolved_honeypot_gets_both_directions() {
        let f = fixture();
        f.responder.observe(Ipv4Addr::new(10, 0, 0, 4), TRIAGE_MAC);
        f.learning.learn(1, TRIAGE_MAC, 4);

        let plan = f
            .manager
            .plan(1, 3, &tuple(), SERVER_MAC, ClassificationLevel::Suspicious)
            .unwrap();
        let RedirectPlan::Ready {
            forward,
            reverse,
            actions,
            ..
        } = plan
        else {
            panic!("expected ready plan");
        };

        assert_eq!(forward.priority, PRIORITY_REDIRECT_SUSPICIOUS);
        assert_eq!(forward.hard_timeout, 300);
        assert_eq!(forward.flow_match.ipv4_src, Some(ATTACKER));
        assert_eq!(forward.actions, actions);
        assert_eq!(
            actions.last(),
            Some(&FlowAction::Output(OutputPort::Physical(4)))
        );

        assert_eq!(reverse.flow_match.ipv4_src, Some(Ipv4Addr::new(10, 0, 0, 4)));
        assert_eq!(reverse.flow_match.ipv4_dst, Some(ATTACKER));
        assert_eq!(reverse.actions[0], FlowAction::SetIpv4Src(SERVER));
        assert_eq!(reverse.actions[1], FlowAction::SetEthSrc(SERVER_MAC));
        assert_eq!(
            reverse.actions[2],
            FlowAction::Output(OutputPort::Physical(3))
        );
    }

    #[test]
    fn malicious_goes_to_deep_tier() {
        let f = fixture();
        let deep_mac = MacAddr::new([0, 0, 0, 0, 0, 5]);
        f.responder.observe(Ipv4Addr::new(10, 0, 0, 5), deep_mac);
        f.learning.learn(1, deep_mac, 5);

        let plan = f
            .manager
            .plan(1, 3, &tuple(), SERVER_MAC, ClassificationLevel::Malicious)
            .unwrap();
        assert_eq!(plan.tier(), HoneypotTier::Deep);
        let RedirectPlan::Ready { forward, .. } = plan else {
            panic!("expected ready plan");
        };
        assert_eq!(forward.priority, PRIORITY_REDIRECT_MALICIOUS);
    }
}
