//! Flow rule builders and the issued-flow ledger.
//!
//! Priorities, highest first:
//!
//! | priority | rule                                  |
//! |----------|---------------------------------------|
//! | 300      | redirect of a malicious source        |
//! | 250      | redirect of a suspicious source       |
//! | 200      | virtual IP load balancing             |
//! | 50       | static topology route                 |
//! | 10       | ARP punted to the controller          |
//! | 1        | learned L2 unicast                    |
//! | 0        | table-miss to the controller          |
//!
//! Static and learned rules are installed per packet-in with a match from
//! [`forwarding_match`]. Monitored IPv4 traffic is matched on its exact
//! 5-tuple, so the next flow of the same source is punted and classified
//! again instead of being switched past the controller.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use honeyflow_core::event::{FlowAction, FlowInstall, FlowMatch, OutputPort};
use honeyflow_core::types::{
    ClassificationLevel, ETHERTYPE_ARP, ETHERTYPE_IPV4, FiveTuple, MacAddr, PortNo, SwitchId,
};

pub const PRIORITY_REDIRECT_MALICIOUS: u16 = 300;
pub const PRIORITY_REDIRECT_SUSPICIOUS: u16 = 250;
pub const PRIORITY_LOAD_BALANCE: u16 = 200;
pub const PRIORITY_STATIC_ROUTE: u16 = 50;
pub const PRIORITY_ARP_PUNT: u16 = 10;
pub const PRIORITY_LEARNED_UNICAST: u16 = 1;
pub const PRIORITY_TABLE_MISS: u16 = 0;

/// Redirect priority for a flagged level.
pub fn redirect_priority(level: ClassificationLevel) -> Option<u16> {
    match level {
        ClassificationLevel::Normal => None,
        ClassificationLevel::Suspicious => Some(PRIORITY_REDIRECT_SUSPICIOUS),
        ClassificationLevel::Malicious => Some(PRIORITY_REDIRECT_MALICIOUS),
    }
}

fn output(port: PortNo) -> FlowAction {
    FlowAction::Output(OutputPort::Physical(port))
}

/// Everything unmatched goes to the controller.
pub fn table_miss(switch_id: SwitchId) -> FlowInstall {
    FlowInstall {
        switch_id,
        priority: PRIORITY_TABLE_MISS,
        flow_match: FlowMatch::any(),
        actions: vec![FlowAction::Output(OutputPort::Controller)],
        idle_timeout: 0,
        hard_timeout: 0,
    }
}

/// ARP always reaches the controller so virtual addresses can be answered.
pub fn arp_to_controller(switch_id: SwitchId) -> FlowInstall {
    FlowInstall {
        switch_id,
        priority: PRIORITY_ARP_PUNT,
        flow_match: FlowMatch::any().eth_type(ETHERTYPE_ARP),
        actions: vec![FlowAction::Output(OutputPort::Controller)],
        idle_timeout: 0,
        hard_timeout: 0,
    }
}

/// Scope of a forwarding rule installed for one punted frame.
///
/// - monitored IPv4: the exact 5-tuple.
/// - other IPv4: destination address, protocol and the unmonitored L4
///   destination port, so a monitored port is never covered.
/// - anything else: its ether type, so IPv4 is never covered.
///
/// The in port is always part of the match.
pub fn forwarding_match(
    in_port: PortNo,
    ether_type: u16,
    tuple: Option<&FiveTuple>,
    monitored: bool,
) -> FlowMatch {
    match tuple {
        Some(tuple) if monitored => FlowMatch::five_tuple(tuple).in_port(in_port),
        Some(tuple) => {
            let scoped = FlowMatch::any()
                .in_port(in_port)
                .eth_type(ETHERTYPE_IPV4)
                .ipv4_dst(tuple.dst_ip)
                .ip_proto(tuple.protocol);
            if tuple.has_ports() {
                scoped.l4_dst_port(tuple.dst_port)
            } else {
                scoped
            }
        }
        None => FlowMatch::any().in_port(in_port).eth_type(ether_type),
    }
}

/// IPv4 traffic for a pinned host goes straight to its port.
///
/// `flow_match` must name the host as `ipv4_dst`.
pub fn static_route(
    switch_id: SwitchId,
    flow_match: FlowMatch,
    mac: Option<MacAddr>,
    port: PortNo,
    idle_timeout: u16,
) -> FlowInstall {
    let mut actions = Vec::with_capacity(2);
    if let Some(mac) = mac {
        actions.push(FlowAction::SetEthDst(mac));
    }
    actions.push(output(port));
    FlowInstall {
        switch_id,
        priority: PRIORITY_STATIC_ROUTE,
        flow_match,
        actions,
        idle_timeout,
        hard_timeout: 0,
    }
}

/// L2 forwarding toward the learned port of `eth_dst`, limited to
/// `flow_match`.
pub fn learned_unicast(
    switch_id: SwitchId,
    flow_match: FlowMatch,
    eth_dst: MacAddr,
    out_port: PortNo,
    idle_timeout: u16,
) -> FlowInstall {
    FlowInstall {
        switch_id,
        priority: PRIORITY_LEARNED_UNICAST,
        flow_match: flow_match.eth_dst(eth_dst),
        actions: vec![output(out_port)],
        idle_timeout,
        hard_timeout: 0,
    }
}

/// Destination rewrite of one exact flow.
#[derive(Debug, Clone, Copy)]
pub struct Rewrite {
    pub priority: u16,
    /// The flow as the client sent it.
    pub tuple: FiveTuple,
    pub new_dst_ip: Ipv4Addr,
    pub new_dst_mac: MacAddr,
    /// Port toward the new destination.
    pub out_port: PortNo,
    /// Port the client is reachable on.
    pub client_port: PortNo,
    /// MAC the client believes it is talking to, restored on the way back.
    pub original_dst_mac: Option<MacAddr>,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
}

impl Rewrite {
    /// Client to new destination: rewrite the destination and output.
    pub fn forward(&self, switch_id: SwitchId) -> FlowInstall {
        FlowInstall {
            switch_id,
            priority: self.priority,
            flow_match: FlowMatch::five_tuple(&self.tuple),
            actions: self.forward_actions(),
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
        }
    }

    /// Actions of the forward rule, also used for the triggering packet.
    pub fn forward_actions(&self) -> Vec<FlowAction> {
        vec![
            FlowAction::SetIpv4Dst(self.new_dst_ip),
            FlowAction::SetEthDst(self.new_dst_mac),
            output(self.out_port),
        ]
    }

    /// New destination back to the client: restore the source the client
    /// originally addressed.
    pub fn reverse(&self, switch_id: SwitchId) -> FlowInstall {
        let mut back = self.tuple.reversed();
        back.src_ip = self.new_dst_ip;

        let mut actions = Vec::with_capacity(3);
        actions.push(FlowAction::SetIpv4Src(self.tuple.dst_ip));
        if let Some(mac) = self.original_dst_mac {
            actions.push(FlowAction::SetEthSrc(mac));
        }
        actions.push(output(self.client_port));

        FlowInstall {
            switch_id,
            priority: self.priority,
            flow_match: FlowMatch::five_tuple(&back),
            actions,
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
        }
    }
}

type LedgerKey = (SwitchId, u16, FlowMatch);

/// Flows the controller has issued and expects to still be installed.
///
/// Expiry is estimated from the timeouts at install time: the hard timeout
/// when set, else the idle timeout. Rules with neither are permanent until
/// their switch disconnects.
#[derive(Debug, Default)]
pub struct FlowLedger {
    entries: Mutex<HashMap<LedgerKey, Option<Instant>>>,
}

impl FlowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, flow: &FlowInstall, now: Instant) {
        let timeout = match (flow.hard_timeout, flow.idle_timeout) {
            (0, 0) => None,
            (0, idle) => Some(idle),
            (hard, _) => Some(hard),
        };
        let expiry = timeout.map(|secs| now + Duration::from_secs(u64::from(secs)));
        self.entries
            .lock()
            .insert((flow.switch_id, flow.priority, flow.flow_match.clone()), expiry);
    }

    /// Drop entries whose estimated expiry has passed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expiry| expiry.is_none_or(|at| at > now));
        before - entries.len()
    }

    pub fn forget_switch(&self, switch_id: SwitchId) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(sw, _, _), _| *sw != switch_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use honeyflow_core::types::IP_PROTO_TCP;

    const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 6);
    const VIP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 100);
    const BACKEND: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const BACKEND_MAC: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 2]);

    fn rewrite() -> Rewrite {
        Rewrite {
            priority: PRIORITY_LOAD_BALANCE,
            tuple: FiveTuple {
                src_ip: CLIENT,
                dst_ip: VIP,
                protocol: IP_PROTO_TCP,
                src_port: 40000,
                dst_port: 80,
            },
            new_dst_ip: BACKEND,
            new_dst_mac: BACKEND_MAC,
            out_port: 2,
            client_port: 6,
            original_dst_mac: Some(MacAddr::new([0, 0, 0, 0, 0, 0x64])),
            idle_timeout: 60,
            hard_timeout: 0,
        }
    }

    #[test]
    fn priority_ordering() {
        let ordered = [
            PRIORITY_REDIRECT_MALICIOUS,
            PRIORITY_REDIRECT_SUSPICIOUS,
            PRIORITY_LOAD_BALANCE,
            PRIORITY_STATIC_ROUTE,
            PRIORITY_ARP_PUNT,
            PRIORITY_LEARNED_UNICAST,
            PRIORITY_TABLE_MISS,
        ];
        assert!(ordered.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(redirect_priority(ClassificationLevel::Normal), None);
        assert_eq!(
            redirect_priority(ClassificationLevel::Malicious),
            Some(PRIORITY_REDIRECT_MALICIOUS)
        );
    }

    #[test]
    fn infrastructure_rules_are_permanent() {
        let miss = table_miss(1);
        assert_eq!(miss.priority, 0);
        assert_eq!(miss.flow_match, FlowMatch::any());
        assert_eq!((miss.idle_timeout, miss.hard_timeout), (0, 0));

        let arp = arp_to_controller(1);
        assert_eq!(arp.flow_match.eth_type, Some(ETHERTYPE_ARP));
        assert_eq!(
            arp.actions,
            vec![FlowAction::Output(OutputPort::Controller)]
        );
    }

    #[test]
    fn forward_rule_rewrites_destination() {
        let rule = rewrite().forward(1);
        assert_eq!(rule.priority, PRIORITY_LOAD_BALANCE);
        assert_eq!(rule.flow_match.ipv4_dst, Some(VIP));
        assert_eq!(rule.flow_match.l4_src_port, Some(40000));
        assert_eq!(
            rule.actions,
            vec![
                FlowAction::SetIpv4Dst(BACKEND),
                FlowAction::SetEthDst(BACKEND_MAC),
                FlowAction::Output(OutputPort::Physical(2)),
            ]
        );
        assert_eq!(rule.idle_timeout, 60);
    }

    #[test]
    fn reverse_rule_restores_original_source() {
        let rule = rewrite().reverse(1);
        assert_eq!(rule.flow_match.ipv4_src, Some(BACKEND));
        assert_eq!(rule.flow_match.ipv4_dst, Some(CLIENT));
        assert_eq!(rule.flow_match.l4_src_port, Some(80));
        assert_eq!(rule.flow_match.l4_dst_port, Some(40000));
        assert_eq!(rule.actions[0], FlowAction::SetIpv4Src(VIP));
        assert_eq!(
            rule.actions.last(),
            Some(&FlowAction::Output(OutputPort::Physical(6)))
        );
    }

    fn client_flow(dst_port: u16) -> FiveTuple {
        FiveTuple {
            src_ip: CLIENT,
            dst_ip: BACKEND,
            protocol: IP_PROTO_TCP,
            src_port: 40000,
            dst_port,
        }
    }

    #[test]
    fn static_route_sets_mac_when_known() {
        let scope = forwarding_match(6, ETHERTYPE_IPV4, Some(&client_flow(22)), true);
        let rule = static_route(1, scope.clone(), Some(BACKEND_MAC), 2, 30);
        assert_eq!(rule.priority, PRIORITY_STATIC_ROUTE);
        assert_eq!(rule.flow_match, scope);
        assert_eq!(rule.actions.len(), 2);
        assert_eq!(rule.idle_timeout, 30);
        assert_eq!(static_route(1, scope, None, 2, 30).actions.len(), 1);
    }

    #[test]
    fn monitored_ipv4_scope_is_the_exact_flow() {
        let scope = forwarding_match(6, ETHERTYPE_IPV4, Some(&client_flow(22)), true);
        assert_eq!(scope.in_port, Some(6));
        assert_eq!(scope.ipv4_src, Some(CLIENT));
        assert_eq!(scope.ipv4_dst, Some(BACKEND));
        assert_eq!(scope.l4_src_port, Some(40000));
        assert_eq!(scope.l4_dst_port, Some(22));
    }

    #[test]
    fn unmonitored_ipv4_scope_pins_the_destination_port() {
        let scope = forwarding_match(6, ETHERTYPE_IPV4, Some(&client_flow(8443)), false);
        assert_eq!(scope.eth_type, Some(ETHERTYPE_IPV4));
        assert_eq!(scope.ipv4_dst, Some(BACKEND));
        assert_eq!(scope.ip_proto, Some(IP_PROTO_TCP));
        assert_eq!(scope.l4_dst_port, Some(8443));
        // any source, any source port
        assert_eq!(scope.ipv4_src, None);
        assert_eq!(scope.l4_src_port, None);
    }

    #[test]
    fn non_ip_scope_pins_the_ether_type() {
        let scope = forwarding_match(3, 0x86dd, None, false);
        assert_eq!(scope, FlowMatch::any().in_port(3).eth_type(0x86dd));

        let rule = learned_unicast(1, scope, BACKEND_MAC, 2, 15);
        assert_eq!(rule.priority, PRIORITY_LEARNED_UNICAST);
        assert_eq!(rule.flow_match.eth_dst, Some(BACKEND_MAC));
        assert_eq!(rule.flow_match.eth_type, Some(0x86dd));
    }

    #[test]
    fn ledger_tracks_expiry() {
        let ledger = FlowLedger::new();
        let now = Instant::now();
        ledger.record(&table_miss(1), now);
        ledger.record(
            &learned_unicast(1, FlowMatch::any().in_port(1), BACKEND_MAC, 2, 15),
            now,
        );
        let mut redirect = rewrite();
        redirect.hard_timeout = 300;
        redirect.idle_timeout = 0;
        ledger.record(&redirect.forward(1), now);
        // same key overwrites
        ledger.record(&table_miss(1), now);
        assert_eq!(ledger.len(), 3);

        assert_eq!(ledger.prune(now + Duration::from_secs(16)), 1);
        assert_eq!(ledger.prune(now + Duration::from_secs(301)), 1);
        assert_eq!(ledger.len(), 1);

        ledger.record(&table_miss(2), now);
        assert_eq!(ledger.forget_switch(1), 1);
        assert_eq!(ledger.len(), 1);
    }
}
