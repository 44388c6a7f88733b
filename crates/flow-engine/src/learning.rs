//! Per-switch MAC learning and host location.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;

use honeyflow_core::types::{MacAddr, PortNo, SwitchId};

use crate::config::StaticHost;

/// `(switch, MAC) -> port` table.
///
/// The latest observation always wins, so a host that moves is followed on
/// its next frame.
#[derive(Debug, Default)]
pub struct AddressLearningTable {
    entries: RwLock<HashMap<(SwitchId, MacAddr), PortNo>>,
}

impl AddressLearningTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` was seen on `port` of `switch_id`.
    ///
    /// Returns the previous port when the host moved.
    pub fn learn(&self, switch_id: SwitchId, mac: MacAddr, port: PortNo) -> Option<PortNo> {
        if mac.is_multicast() {
            return None;
        }
        let previous = self.entries.write().insert((switch_id, mac), port);
        previous.filter(|&p| p != port)
    }

    /// Port of `mac` on `switch_id`, `None` means flood.
    pub fn lookup(&self, switch_id: SwitchId, mac: MacAddr) -> Option<PortNo> {
        self.entries.read().get(&(switch_id, mac)).copied()
    }

    /// Drop everything learned on a switch that went away.
    pub fn forget_switch(&self, switch_id: SwitchId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(sw, _), _| *sw != switch_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Finds the switch port of an IPv4 host from learned MACs, falling back to
/// the static topology.
pub struct HostLocator {
    learning: Arc<AddressLearningTable>,
    static_hosts: Vec<StaticHost>,
}

impl HostLocator {
    pub fn new(learning: Arc<AddressLearningTable>, static_hosts: Vec<StaticHost>) -> Self {
        Self {
            learning,
            static_hosts,
        }
    }

    pub fn learning(&self) -> &AddressLearningTable {
        &self.learning
    }

    /// Pinned host entry for `ip` on `switch_id`.
    pub fn static_host(&self, switch_id: SwitchId, ip: Ipv4Addr) -> Option<&StaticHost> {
        self.static_hosts
            .iter()
            .find(|h| h.switch_id == switch_id && h.ip == ip)
    }

    /// MAC of a pinned host on any switch.
    pub fn static_mac(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.static_hosts
            .iter()
            .find(|h| h.ip == ip)
            .and_then(|h| h.mac)
    }

    /// Output port toward `ip` on `switch_id`. A learned MAC wins over the
    /// static topology.
    pub fn locate(&self, switch_id: SwitchId, ip: Ipv4Addr, mac: Option<MacAddr>) -> Option<PortNo> {
        mac.and_then(|mac| self.learning.lookup(switch_id, mac))
            .or_else(|| self.static_host(switch_id, ip).map(|h| h.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H1: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 1]);
    const H2: MacAddr = MacAddr::new([0, 0, 0, 0, 0, 2]);

    #[test]
    fn unknown_mac_is_none() {
        let table = AddressLearningTable::new();
        assert_eq!(table.lookup(1, H1), None);
        assert!(table.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let table = AddressLearningTable::new();
        assert_eq!(table.learn(1, H1, 3), None);
        assert_eq!(table.learn(1, H1, 3), None);
        assert_eq!(table.learn(1, H1, 7), Some(3));
        assert_eq!(table.lookup(1, H1), Some(7));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn entries_are_per_switch() {
        let table = AddressLearningTable::new();
        table.learn(1, H1, 3);
        table.learn(2, H1, 9);
        table.learn(2, H2, 1);
        assert_eq!(table.lookup(1, H1), Some(3));
        assert_eq!(table.lookup(2, H1), Some(9));
        assert_eq!(table.lookup(1, H2), None);

        assert_eq!(table.forget_switch(2), 2);
        assert_eq!(table.lookup(2, H1), None);
        assert_eq!(table.lookup(1, H1), Some(3));
    }

    #[test]
    fn multicast_sources_are_not_learned() {
        let table = AddressLearningTable::new();
        table.learn(1, MacAddr::BROADCAST, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn locator_prefers_learned_port() {
        let learning = Arc::new(AddressLearningTable::new());
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let locator = HostLocator::new(
            Arc::clone(&learning),
            vec![StaticHost {
                ip,
                mac: Some(H1),
                switch_id: 1,
                port: 4,
            }],
        );

        assert_eq!(locator.locate(1, ip, Some(H1)), Some(4));
        assert_eq!(locator.locate(1, ip, None), Some(4));
        assert_eq!(locator.locate(2, ip, Some(H1)), None);
        assert_eq!(locator.static_mac(ip), Some(H1));

        learning.learn(1, H1, 9);
        assert_eq!(locator.locate(1, ip, Some(H1)), Some(9));
        assert!(locator.static_host(1, ip).is_some());
        assert!(locator.static_host(2, ip).is_none());
    }
}
