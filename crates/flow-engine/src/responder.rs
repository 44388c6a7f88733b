//! Proxy-ARP for virtual addresses.
//!
//! The VIP and the honeypot addresses are answered by the controller so that
//! clients resolve them without the real hosts being involved. An address is
//! only answered once a MAC is known for it.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use honeyflow_core::event::{FlowAction, OutputPort, PacketOut, PacketOutData};
use honeyflow_core::types::{ClassificationLevel, MacAddr, PortNo, SwitchId};

use crate::balancer::LoadBalancerPool;
use crate::config::HoneypotTiers;
use crate::packet::{ArpOperation, ArpPacket, encode_arp};

/// Which tier a honeypot address serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoneypotTier {
    Triage,
    Deep,
}

impl HoneypotTier {
    /// Tier a flagged source is sent to. `None` for normal traffic.
    pub fn for_level(level: ClassificationLevel) -> Option<Self> {
        match level {
            ClassificationLevel::Normal => None,
            ClassificationLevel::Suspicious => Some(Self::Triage),
            ClassificationLevel::Malicious => Some(Self::Deep),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Deep => "deep",
        }
    }
}

/// Result of offering an ARP packet to the responder.
#[derive(Debug, Clone, PartialEq)]
pub enum ArpOutcome {
    /// Answered on behalf of a virtual address.
    Reply(PacketOut),
    /// The address is virtual but its MAC is not known yet. Nothing is sent.
    Suppressed,
    /// Not ours; forward normally.
    NotApplicable,
}

impl ArpOutcome {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::NotApplicable)
    }
}

#[derive(Debug, Clone, Copy)]
struct HoneypotBinding {
    tier: HoneypotTier,
    mac: Option<MacAddr>,
}

pub struct VirtualIpResponder {
    honeypots: RwLock<HashMap<Ipv4Addr, HoneypotBinding>>,
    pool: Option<Arc<LoadBalancerPool>>,
}

impl VirtualIpResponder {
    pub fn new(tiers: &HoneypotTiers, pool: Option<Arc<LoadBalancerPool>>) -> Self {
        let mut honeypots = HashMap::new();
        honeypots.insert(
            tiers.triage.ip,
            HoneypotBinding {
                tier: HoneypotTier::Triage,
                mac: tiers.triage.mac,
            },
        );
        honeypots.insert(
            tiers.deep.ip,
            HoneypotBinding {
                tier: HoneypotTier::Deep,
                mac: tiers.deep.mac,
            },
        );
        Self {
            honeypots: RwLock::new(honeypots),
            pool,
        }
    }

    /// Note an `(ip, mac)` pair seen in traffic.
    ///
    /// Honeypot bindings and backend MACs are filled in from here.
    pub fn observe(&self, ip: Ipv4Addr, mac: MacAddr) {
        if mac.is_multicast() {
            return;
        }
        {
            let mut honeypots = self.honeypots.write();
            if let Some(binding) = honeypots.get_mut(&ip)
                && binding.mac != Some(mac)
            {
                debug!(ip = %ip, mac = %mac, tier = binding.tier.as_str(), "honeypot MAC learned");
                binding.mac = Some(mac);
            }
        }
        if let Some(pool) = &self.pool
            && pool.learn_mac(ip, mac)
        {
            debug!(ip = %ip, mac = %mac, "backend MAC learned");
        }
    }

    /// Known MAC of a honeypot address.
    pub fn honeypot_mac(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.honeypots.read().get(&ip).and_then(|b| b.mac)
    }

    pub fn is_virtual(&self, ip: Ipv4Addr) -> bool {
        self.honeypots.read().contains_key(&ip)
            || self.pool.as_ref().is_some_and(|p| p.is_vip(ip))
    }

    /// `None` means the address is not virtual; `Some(None)` means it is
    /// virtual but unresolved.
    fn binding_mac(&self, ip: Ipv4Addr) -> Option<Option<MacAddr>> {
        if let Some(pool) = &self.pool
            && pool.is_vip(ip)
        {
            return Some(pool.vip_mac());
        }
        self.honeypots.read().get(&ip).map(|b| b.mac)
    }

    /// Answer an ARP request for a virtual address.
    pub fn handle_arp(&self, switch_id: SwitchId, in_port: PortNo, arp: &ArpPacket) -> ArpOutcome {
        if arp.operation != ArpOperation::Request {
            return ArpOutcome::NotApplicable;
        }

        match self.binding_mac(arp.target_ip) {
            None => ArpOutcome::NotApplicable,
            Some(None) => {
                trace!(
                    switch_id,
                    target = %arp.target_ip,
                    requester = %arp.sender_ip,
                    "virtual address unresolved, ARP request suppressed"
                );
                ArpOutcome::Suppressed
            }
            Some(Some(mac)) => {
                let reply = arp.reply_with(mac);
                debug!(
                    switch_id,
                    in_port,
                    target = %arp.target_ip,
                    mac = %mac,
                    requester = %arp.sender_ip,
                    "proxy-ARP reply"
                );
                ArpOutcome::Reply(PacketOut {
                    switch_id,
                    in_port: None,
                    data: PacketOutData::Raw(encode_arp(arp.sender_mac, &reply)),
                    actions: vec![FlowAction::Output(OutputPort::Physical(in_port))],
                })
            }
        }
    }
}
