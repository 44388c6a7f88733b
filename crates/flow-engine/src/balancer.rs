//! Round-robin virtual IP pool.
//!
//! Clients address one virtual IP. Each new client flow gets the next backend
//! in strict rotation. A flow that could not be installed yet keeps that
//! backend for its retries, so resolution never reshuffles the rotation.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use honeyflow_core::types::{FiveTuple, MacAddr};

use crate::config::BalancerConfig;

/// Backend chosen for a client flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub backend: Ipv4Addr,
    /// `None` while the backend MAC is unresolved.
    pub mac: Option<MacAddr>,
    /// The backend came from an earlier unresolved attempt.
    pub retried: bool,
}

pub struct LoadBalancerPool {
    vip: Ipv4Addr,
    backends: Vec<Ipv4Addr>,
    idle_timeout: u16,
    pending_timeout: Duration,
    cursor: Mutex<usize>,
    macs: RwLock<HashMap<Ipv4Addr, MacAddr>>,
    /// Configured VIP MAC, or the first backend MAC learned.
    vip_mac: RwLock<Option<MacAddr>>,
    pending: Mutex<HashMap<FiveTuple, (Ipv4Addr, Instant)>>,
}

impl LoadBalancerPool {
    pub fn new(config: &BalancerConfig) -> Self {
        Self {
            vip: config.vip,
            backends: config.backends.clone(),
            idle_timeout: config.idle_timeout,
            pending_timeout: config.pending_timeout,
            cursor: Mutex::new(0),
            macs: RwLock::new(HashMap::new()),
            vip_mac: RwLock::new(config.vip_mac),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn vip(&self) -> Ipv4Addr {
        self.vip
    }

    pub fn is_vip(&self, ip: Ipv4Addr) -> bool {
        self.vip == ip
    }

    pub fn backends(&self) -> &[Ipv4Addr] {
        &self.backends
    }

    pub fn contains_backend(&self, ip: Ipv4Addr) -> bool {
        self.backends.contains(&ip)
    }

    pub fn idle_timeout(&self) -> u16 {
        self.idle_timeout
    }

    /// MAC answered for the VIP, if any is known yet.
    pub fn vip_mac(&self) -> Option<MacAddr> {
        *self.vip_mac.read()
    }

    /// Next backend in rotation. Advances the cursor.
    ///
    /// `None` only for a pool built without backends.
    pub fn next_backend(&self) -> Option<Ipv4Addr> {
        let len = self.backends.len();
        if len == 0 {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let backend = self.backends[*cursor % len];
        *cursor = (*cursor + 1) % len;
        Some(backend)
    }

    /// Position the cursor, e.g. to resume a known rotation.
    pub fn set_cursor(&self, index: usize) {
        *self.cursor.lock() = index.checked_rem(self.backends.len()).unwrap_or(0);
    }

    pub fn resolve_mac(&self, backend: Ipv4Addr) -> Option<MacAddr> {
        self.macs.read().get(&backend).copied()
    }

    /// Record a backend MAC observed in traffic. Ignores non-backends.
    ///
    /// Returns `true` when the stored MAC changed.
    pub fn learn_mac(&self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        if !self.contains_backend(ip) {
            return false;
        }
        let changed = self.macs.write().insert(ip, mac) != Some(mac);
        if changed {
            let mut vip_mac = self.vip_mac.write();
            if vip_mac.is_none() {
                debug!(vip = %self.vip, mac = %mac, "virtual IP adopts backend MAC");
                *vip_mac = Some(mac);
            }
        }
        changed
    }

    /// Pick the backend for a client flow toward the VIP.
    ///
    /// The flow stays pending until [`confirm`](Self::confirm) is called, and
    /// a pending flow gets the same backend again without advancing the
    /// rotation. `None` when the pool has no backends.
    pub fn assign(&self, flow: &FiveTuple, now: Instant) -> Option<Assignment> {
        let mut pending = self.pending.lock();
        let (backend, retried) = match pending.get(flow) {
            Some((backend, _)) => (*backend, true),
            None => (self.next_backend()?, false),
        };
        pending.insert(*flow, (backend, now));

        Some(Assignment {
            backend,
            mac: self.resolve_mac(backend),
            retried,
        })
    }

    /// The flow's rules are installed; it no longer needs a pinned backend.
    pub fn confirm(&self, flow: &FiveTuple) {
        self.pending.lock().remove(flow);
    }

    /// Forget unresolved assignments older than the pending timeout.
    pub fn prune_pending(&self, now: Instant) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, (_, since)| now.duration_since(*since) < self.pending_timeout);
        before - pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn learned_len(&self) -> usize {
        self.macs.read().len()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn every_backend_gets_equal_share(size in 1usize..8, rounds in 1usize..20, start in 0usize..50) {
            let backends: Vec<Ipv4Addr> = (1..=size as u8).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
            let pool = LoadBalancerPool::new(&BalancerConfig {
                vip: Ipv4Addr::new(10, 0, 0, 100),
                vip_mac: None,
                backends: backends.clone(),
                idle_timeout: 60,
                pending_timeout: Duration::from_secs(30),
            });
            pool.set_cursor(start);

            let mut counts: HashMap<Ipv4Addr, usize> = HashMap::new();
            for _ in 0..size * rounds {
                *counts.entry(pool.next_backend().unwrap()).or_default() += 1;
            }

            prop_assert_eq!(counts.len(), size);
            prop_assert!(counts.values().all(|&n| n == rounds));
        }
    }
}
