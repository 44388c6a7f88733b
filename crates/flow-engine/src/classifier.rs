//! Source classification.
//!
//! Each packet is classified from sticky history, static lists, activity
//! windows and, when one has arrived, an oracle verdict. Flagged sources are
//! remembered in two sticky sets until feedback says otherwise.
//!
//! Within one call the level only rises. A benign oracle verdict never
//! lowers a heuristic result; only feedback clears a source.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use honeyflow_core::event::ClassificationFeedback;
use honeyflow_core::types::{Classification, ClassificationLevel, FiveTuple};

use crate::activity::ActivitySnapshot;
use crate::config::ClassifierConfig;

const RISK_KNOWN_BAD: u16 = 50;
const RISK_COMBO: u16 = 30;
const RISK_PORT_SCAN: u16 = 40;
const RISK_HIGH_RATE: u16 = 30;
const RISK_STICKY_SUSPICIOUS: u16 = 20;
const RISK_STICKY_MALICIOUS: u16 = 80;
const RISK_MAX: u16 = 100;

pub const REASON_HIGH_RATE: &str = "High Request Rate";
pub const REASON_KNOWN_BAD: &str = "Known Bad IP";

/// How long an unconsumed oracle verdict waits for its source to send again.
pub const PENDING_VERDICT_TTL: Duration = Duration::from_secs(60);

/// Verdict returned by the oracle for a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OracleVerdict {
    pub malicious: bool,
    pub confidence: f64,
}

#[derive(Debug, Default)]
struct StickySets {
    suspicious: HashSet<Ipv4Addr>,
    malicious: HashSet<Ipv4Addr>,
}

impl StickySets {
    fn level_of(&self, ip: &Ipv4Addr) -> ClassificationLevel {
        if self.malicious.contains(ip) {
            ClassificationLevel::Malicious
        } else if self.suspicious.contains(ip) {
            ClassificationLevel::Suspicious
        } else {
            ClassificationLevel::Normal
        }
    }

    /// Make `ip` a member of exactly the set for `level`.
    fn set_exact(&mut self, ip: Ipv4Addr, level: ClassificationLevel) {
        self.malicious.remove(&ip);
        self.suspicious.remove(&ip);
        match level {
            ClassificationLevel::Malicious => {
                self.malicious.insert(ip);
            }
            ClassificationLevel::Suspicious => {
                self.suspicious.insert(ip);
            }
            ClassificationLevel::Normal => {}
        }
    }

    /// Raise `ip` to at least `level`.
    fn escalate(&mut self, ip: Ipv4Addr, level: ClassificationLevel) -> bool {
        match level {
            ClassificationLevel::Malicious => {
                self.suspicious.remove(&ip);
                self.malicious.insert(ip)
            }
            ClassificationLevel::Suspicious if !self.malicious.contains(&ip) => {
                self.suspicious.insert(ip)
            }
            _ => false,
        }
    }
}

pub struct ClassificationEngine {
    config: ClassifierConfig,
    sticky: RwLock<StickySets>,
    pending_verdicts: Mutex<HashMap<Ipv4Addr, (OracleVerdict, Instant)>>,
}

impl ClassificationEngine {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            sticky: RwLock::new(StickySets::default()),
            pending_verdicts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one packet and update the sticky sets with the result.
    pub fn classify(
        &self,
        tuple: &FiveTuple,
        activity: &ActivitySnapshot,
        verdict: Option<&OracleVerdict>,
    ) -> Classification {
        let src = tuple.src_ip;
        let mut level = ClassificationLevel::Normal;
        let mut reasons = Vec::new();
        let mut risk: u16 = 0;

        match self.sticky.read().level_of(&src) {
            ClassificationLevel::Malicious => {
                level = ClassificationLevel::Malicious;
                reasons.push("Previously Classified Malicious".to_owned());
                risk += RISK_STICKY_MALICIOUS;
            }
            ClassificationLevel::Suspicious => {
                level = ClassificationLevel::Suspicious;
                reasons.push("Previously Classified Suspicious".to_owned());
                risk += RISK_STICKY_SUSPICIOUS;
            }
            ClassificationLevel::Normal => {}
        }

        if self.config.known_bad.contains(&src) {
            level = level.max(self.config.known_bad_level);
            reasons.push(REASON_KNOWN_BAD.to_owned());
            risk += RISK_KNOWN_BAD;
        }

        if tuple.has_ports()
            && let Some(combo) = self.config.combo_for(tuple.protocol, tuple.dst_port)
        {
            level = level.max(ClassificationLevel::Suspicious);
            reasons.push(combo.reason.clone());
            risk += RISK_COMBO;
        }

        if activity.is_port_scan {
            level = level.max(ClassificationLevel::Suspicious);
            reasons.push(format!(
                "Port Scan ({} ports to {})",
                activity.port_scan_count, tuple.dst_ip
            ));
            risk += RISK_PORT_SCAN;
        }

        if activity.is_high_rate {
            level = level.max(ClassificationLevel::Suspicious);
            reasons.push(REASON_HIGH_RATE.to_owned());
            risk += RISK_HIGH_RATE;
        }

        let risk_score = risk.min(RISK_MAX) as u8;
        let mut confidence = None;

        if let Some(verdict) = verdict {
            confidence = Some(verdict.confidence);
            if verdict.malicious {
                level = ClassificationLevel::Malicious;
                reasons.push("Oracle Verdict Malicious".to_owned());
            } else if risk_score > self.config.malicious_threshold {
                level = level.max(ClassificationLevel::Malicious);
                reasons.push(format!("Risk Score {risk_score}"));
            } else if risk_score > self.config.suspicious_threshold {
                level = level.max(ClassificationLevel::Suspicious);
                reasons.push(format!("Risk Score {risk_score}"));
            }
        }

        if level.is_flagged() && self.sticky.write().escalate(src, level) {
            info!(
                src = %src,
                level = %level,
                risk_score,
                reason = %reasons.join(", "),
                "source flagged"
            );
        }

        Classification {
            level,
            reasons,
            risk_score,
            confidence,
        }
    }

    /// Consume a verdict that arrived since the last packet from `ip`.
    pub fn take_pending_verdict(&self, ip: Ipv4Addr) -> Option<OracleVerdict> {
        self.pending_verdicts.lock().remove(&ip).map(|(verdict, _)| verdict)
    }

    /// Fold in an asynchronously returned oracle verdict.
    pub fn merge_oracle_verdict(&self, ip: Ipv4Addr, verdict: OracleVerdict) {
        self.merge_oracle_verdict_at(ip, verdict, Instant::now());
    }

    pub fn merge_oracle_verdict_at(&self, ip: Ipv4Addr, verdict: OracleVerdict, now: Instant) {
        if verdict.malicious && self.sticky.write().escalate(ip, ClassificationLevel::Malicious) {
            info!(src = %ip, confidence = verdict.confidence, "source flagged malicious by oracle");
        }
        self.pending_verdicts.lock().insert(ip, (verdict, now));
    }

    /// Drop verdicts whose source never sent again within the TTL.
    ///
    /// The sticky effect of a malicious verdict is kept.
    pub fn prune_verdicts(&self, now: Instant) -> usize {
        let mut pending = self.pending_verdicts.lock();
        let before = pending.len();
        pending.retain(|_, (_, at)| now.saturating_duration_since(*at) < PENDING_VERDICT_TTL);
        before - pending.len()
    }

    pub fn pending_verdicts(&self) -> usize {
        self.pending_verdicts.lock().len()
    }

    /// Apply honeypot feedback. The resulting membership depends only on the
    /// feedback, not on prior state.
    ///
    /// A tier is applied only when the label and the score agree on it: a
    /// `malicious` label above the malicious threshold, or a `suspicious`
    /// label above the suspicious threshold. Any other pair clears the
    /// source. A positive model prediction overrides both.
    pub fn update_from_feedback(&self, feedback: &ClassificationFeedback) -> ClassificationLevel {
        let score = feedback.risk_score;
        let level = match feedback.classification {
            _ if feedback.ml_prediction == Some(1) => ClassificationLevel::Malicious,
            ClassificationLevel::Malicious
                if score > f64::from(self.config.malicious_threshold) =>
            {
                ClassificationLevel::Malicious
            }
            ClassificationLevel::Suspicious
                if score > f64::from(self.config.suspicious_threshold) =>
            {
                ClassificationLevel::Suspicious
            }
            _ => ClassificationLevel::Normal,
        };

        self.sticky.write().set_exact(feedback.source_ip, level);
        debug!(
            src = %feedback.source_ip,
            label = %feedback.classification,
            risk_score = feedback.risk_score,
            ml_prediction = ?feedback.ml_prediction,
            honeypot = ?feedback.honeypot_type,
            result = %level,
            "feedback applied"
        );
        level
    }

    pub fn level_of(&self, ip: Ipv4Addr) -> ClassificationLevel {
        self.sticky.read().level_of(&ip)
    }

    /// Sorted suspicious sources.
    pub fn suspicious_ips(&self) -> Vec<Ipv4Addr> {
        sorted(&self.sticky.read().suspicious)
    }

    /// Sorted malicious sources.
    pub fn malicious_ips(&self) -> Vec<Ipv4Addr> {
        sorted(&self.sticky.read().malicious)
    }

    pub fn clear(&self) {
        *self.sticky.write() = StickySets::default();
        self.pending_verdicts.lock().clear();
    }
}

fn sorted(set: &HashSet<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut ips: Vec<_> = set.iter().copied().collect();
    ips.sort_unstable();
    ips
}
