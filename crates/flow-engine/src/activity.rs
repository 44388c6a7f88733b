//! Per-source request rate and port-scan windows.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::ActivityConfig;

/// What the windows say about a source right after recording a packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// Packets from the source inside the rate window, this one included.
    pub request_count: usize,
    pub is_high_rate: bool,
    /// Distinct destination ports on this destination inside the scan window.
    pub port_scan_count: usize,
    pub is_port_scan: bool,
}

#[derive(Debug, Default)]
struct ActivityRecord {
    requests: VecDeque<Instant>,
    /// destination -> (port -> last seen)
    scans: HashMap<Ipv4Addr, HashMap<u16, Instant>>,
}

impl ActivityRecord {
    fn prune(&mut self, now: Instant, config: &ActivityConfig) {
        while let Some(&front) = self.requests.front() {
            if now.saturating_duration_since(front) >= config.rate_window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        self.scans.retain(|_, ports| {
            ports.retain(|_, seen| now.saturating_duration_since(*seen) < config.scan_window);
            !ports.is_empty()
        });
    }

    fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.scans.is_empty()
    }
}

pub struct ActivityMonitor {
    config: ActivityConfig,
    records: Mutex<HashMap<Ipv4Addr, ActivityRecord>>,
}

impl ActivityMonitor {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Record one packet and evaluate both windows for its source.
    ///
    /// `dst_port` is `None` for traffic without transport ports; such packets
    /// only count toward the rate window.
    pub fn record_and_evaluate(
        &self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        dst_port: Option<u16>,
        now: Instant,
    ) -> ActivitySnapshot {
        let mut records = self.records.lock();
        let record = records.entry(src).or_default();
        record.prune(now, &self.config);

        record.requests.push_back(now);
        let request_count = record.requests.len();

        let port_scan_count = match dst_port {
            Some(port) => {
                let ports = record.scans.entry(dst).or_default();
                ports.insert(port, now);
                ports.len()
            }
            None => record.scans.get(&dst).map_or(0, HashMap::len),
        };

        ActivitySnapshot {
            request_count,
            is_high_rate: request_count >= self.config.high_rate_threshold,
            port_scan_count,
            is_port_scan: port_scan_count >= self.config.port_scan_threshold,
        }
    }

    /// Prune all records and drop the empty ones. Returns how many were dropped.
    ///
    /// Keys are snapshotted first so the packet path is never blocked for a
    /// whole pass.
    pub fn sweep(&self, now: Instant) -> usize {
        let keys: Vec<Ipv4Addr> = self.records.lock().keys().copied().collect();
        let mut removed = 0;
        for key in keys {
            let mut records = self.records.lock();
            let empty = match records.get_mut(&key) {
                Some(record) => {
                    record.prune(now, &self.config);
                    record.is_empty()
                }
                None => false,
            };
            if empty {
                records.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    /// Sources with any state inside their windows, sorted.
    pub fn active_sources(&self) -> Vec<Ipv4Addr> {
        let mut sources: Vec<_> = self.records.lock().keys().copied().collect();
        sources.sort_unstable();
        sources
    }

    pub fn active_count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }
}
