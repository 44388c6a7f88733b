//! Packet-in decision engine.
//!
//! One intake function per southbound event kind. Each packet-in is parsed,
//! its source learned and classified, and turned into an ordered list of
//! controller commands: flow installs first, then the packet-out for the
//! triggering packet.
//!
//! ```text
//! PacketIn ─> parse ─┬─ LLDP ───────────────────────────> ignore
//!                    ├─ ARP ──> proxy-ARP ─┬─ handled ──> reply / nothing
//!                    │                     └─ otherwise ─> L2 forward
//!                    └─ IPv4 ─> activity ─> classify ─┬─ flagged ─> redirect
//!                                                      ├─ VIP ─────> load balance
//!                                                      ├─ pinned ──> static route
//!                                                      └─ else ────> learned unicast / flood
//! ```
//!
//! Forwarding rules are scoped by [`flow::forwarding_match`]: a rule installed
//! for one monitored flow never covers another, so every new flow of a source
//! still reaches [`FlowDecisionEngine::on_packet_in`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, info, trace};

use honeyflow_core::event::{
    ClassificationFeedback, ControllerCommand, FlowAction, FlowInstall, OutputPort, PacketIn,
    PacketOut, PacketOutData,
};
use honeyflow_core::metrics as m;
use honeyflow_core::types::{
    Classification, ClassificationLevel, ControllerStats, FiveTuple, MacAddr, PortNo, SwitchId,
};

use crate::activity::ActivityMonitor;
use crate::balancer::LoadBalancerPool;
use crate::classifier::ClassificationEngine;
use crate::config::{FlowEngineConfig, ForwardingConfig};
use crate::flow::{self, FlowLedger, PRIORITY_LOAD_BALANCE, Rewrite, forwarding_match};
use crate::learning::{AddressLearningTable, HostLocator};
use crate::oracle::OracleHandle;
use crate::packet::{ArpOperation, ArpPacket, FramePayload, ParsedFrame, parse_frame};
use crate::redirect::{RedirectPlan, RedirectionManager, probe_packet_out};
use crate::responder::{ArpOutcome, VirtualIpResponder};

/// What was done with a packet-in.
///
/// Also the `decision` label of the packet-in counter, see [`Self::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    /// Nothing sent (LLDP, probe answers).
    Ignored,
    /// Sent out of every port.
    Flooded,
    /// Answered by proxy-ARP.
    ProxyArp,
    /// ARP for an unresolved virtual address, dropped.
    ArpSuppressed,
    /// Forwarded to a learned port with a unicast rule.
    Forwarded,
    /// Forwarded along a pinned host route.
    StaticRoute,
    /// Rewritten toward a pool backend with forward and reverse rules.
    LoadBalanced,
    /// Backend not located yet: flooded rewritten and probed.
    LoadBalancePending,
    /// Rewritten toward a honeypot with forward and reverse rules.
    Redirected,
    /// Honeypot not located yet: flooded rewritten and probed.
    RedirectPending,
}

impl DecisionAction {
    /// Stable snake_case name, used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Flooded => "flooded",
            Self::ProxyArp => "proxy_arp",
            Self::ArpSuppressed => "arp_suppressed",
            Self::Forwarded => "forwarded",
            Self::StaticRoute => "static_route",
            Self::LoadBalanced => "load_balanced",
            Self::LoadBalancePending => "load_balance_pending",
            Self::Redirected => "redirected",
            Self::RedirectPending => "redirect_pending",
        }
    }
}

/// Outcome of one packet-in.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: DecisionAction,
    /// Set when the packet went through classification.
    pub classification: Option<Classification>,
    /// Flow installs first, then at most a packet-out and a probe.
    pub commands: Vec<ControllerCommand>,
}

impl Decision {
    fn new(action: DecisionAction) -> Self {
        Self {
            action,
            classification: None,
            commands: Vec::new(),
        }
    }

    /// Flow installs carried by this decision.
    pub fn flow_installs(&self) -> impl Iterator<Item = &FlowInstall> {
        self.commands.iter().filter_map(|c| match c {
            ControllerCommand::InstallFlow(flow) => Some(flow),
            ControllerCommand::PacketOut(_) => None,
        })
    }

    /// Packet-outs carried by this decision.
    pub fn packet_outs(&self) -> impl Iterator<Item = &PacketOut> {
        self.commands.iter().filter_map(|c| match c {
            ControllerCommand::PacketOut(out) => Some(out),
            ControllerCommand::InstallFlow(_) => None,
        })
    }
}

/// What a sweep pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sources whose activity windows emptied.
    pub idle_sources: usize,
    /// Ledger entries past their estimated expiry.
    pub expired_flows: usize,
    /// Load balancer assignments never confirmed in time.
    pub stale_assignments: usize,
    /// Oracle verdicts whose source never sent again.
    pub expired_verdicts: usize,
}

#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    redirects: AtomicU64,
    load_balanced: AtomicU64,
    proxy_arp_replies: AtomicU64,
}

/// Turns southbound events into controller commands.
///
/// All state sits behind interior locks or atomics, so one engine is shared
/// by every worker through an `Arc` and every method takes `&self`. Time is
/// passed in as `now`, never read inside, which keeps decisions reproducible
/// in tests.
pub struct FlowDecisionEngine {
    forwarding: ForwardingConfig,
    learning: Arc<AddressLearningTable>,
    locator: Arc<HostLocator>,
    responder: Arc<VirtualIpResponder>,
    activity: ActivityMonitor,
    classifier: Arc<ClassificationEngine>,
    pool: Option<Arc<LoadBalancerPool>>,
    redirect: RedirectionManager,
    ledger: FlowLedger,
    oracle: Option<OracleHandle>,
    counters: Counters,
}

impl FlowDecisionEngine {
    /// Build an engine with empty tables. No oracle is attached.
    pub fn new(config: &FlowEngineConfig) -> Self {
        let learning = Arc::new(AddressLearningTable::new());
        let locator = Arc::new(HostLocator::new(
            Arc::clone(&learning),
            config.static_hosts.clone(),
        ));
        let pool = config
            .balancer
            .as_ref()
            .map(|lb| Arc::new(LoadBalancerPool::new(lb)));
        let responder = Arc::new(VirtualIpResponder::new(&config.honeypots, pool.clone()));
        let redirect = RedirectionManager::new(
            config.honeypots.clone(),
            config.forwarding.clone(),
            Arc::clone(&responder),
            Arc::clone(&locator),
        );

        Self {
            forwarding: config.forwarding.clone(),
            learning,
            locator,
            responder,
            activity: ActivityMonitor::new(config.activity.clone()),
            classifier: Arc::new(ClassificationEngine::new(config.classifier.clone())),
            pool,
            redirect,
            ledger: FlowLedger::new(),
            oracle: None,
            counters: Counters::default(),
        }
    }

    /// Attach the oracle submission handle.
    pub fn set_oracle(&mut self, handle: OracleHandle) {
        self.oracle = Some(handle);
    }

    /// Sticky sets and pending oracle verdicts.
    pub fn classifier(&self) -> &Arc<ClassificationEngine> {
        &self.classifier
    }

    /// The virtual IP pool, when load balancing is configured.
    pub fn pool(&self) -> Option<&Arc<LoadBalancerPool>> {
        self.pool.as_ref()
    }

    pub fn learning(&self) -> &AddressLearningTable {
        &self.learning
    }

    pub fn responder(&self) -> &VirtualIpResponder {
        &self.responder
    }

    // ─── switch lifecycle ───────────────────────────────────────────

    /// Rules every switch gets on connect: table-miss and ARP punt.
    ///
    /// Pinned hosts get no proactive route. A rule covering all traffic to a
    /// host would hide it from classification, so static routes are
    /// installed per flow from [`Self::on_packet_in`].
    pub fn on_switch_connected(&self, switch_id: SwitchId, now: Instant) -> Vec<ControllerCommand> {
        let rules = [flow::table_miss(switch_id), flow::arp_to_controller(switch_id)];

        info!(switch_id, rules = rules.len(), "switch connected, installing base rules");
        let mut commands = Vec::with_capacity(rules.len());
        for rule in rules {
            self.push_install(&mut commands, rule, "bootstrap", now);
        }
        commands
    }

    /// Forget the learned MACs and issued flows of a switch.
    pub fn on_switch_disconnected(&self, switch_id: SwitchId) {
        let macs = self.learning.forget_switch(switch_id);
        let flows = self.ledger.forget_switch(switch_id);
        info!(switch_id, macs, flows, "switch disconnected, state forgotten");
    }

    // ─── packet-in ──────────────────────────────────────────────────

    /// Decide what to do with one punted packet.
    ///
    /// Never fails: a frame that cannot be parsed is flooded.
    pub fn on_packet_in(&self, event: &PacketIn, now: Instant) -> Decision {
        self.counters.packets.fetch_add(1, Ordering::Relaxed);

        let decision = match parse_frame(&event.data) {
            Ok(frame) => self.dispatch_frame(event, &frame, now),
            Err(e) => {
                debug!(
                    switch_id = event.switch_id,
                    in_port = event.in_port,
                    error = %e,
                    "unparseable frame, flooding"
                );
                self.flood(event)
            }
        };

        metrics::counter!(m::FLOW_ENGINE_PACKET_IN_TOTAL, m::LABEL_DECISION => decision.action.as_str())
            .increment(1);
        decision
    }

    fn dispatch_frame(&self, event: &PacketIn, frame: &ParsedFrame, now: Instant) -> Decision {
        if let FramePayload::Lldp = frame.payload {
            return Decision::new(DecisionAction::Ignored);
        }

        if let Some(previous) = self.learning.learn(event.switch_id, frame.eth_src, event.in_port) {
            debug!(
                switch_id = event.switch_id,
                mac = %frame.eth_src,
                from = previous,
                to = event.in_port,
                "host moved"
            );
        }

        match &frame.payload {
            FramePayload::Arp(arp) => self.on_arp(event, frame, arp, now),
            FramePayload::Ipv4(tuple) => self.on_ipv4(event, frame, tuple, now),
            FramePayload::Lldp | FramePayload::Other(_) => self.l2_forward(event, frame, now, true),
        }
    }

    fn on_arp(&self, event: &PacketIn, frame: &ParsedFrame, arp: &ArpPacket, now: Instant) -> Decision {
        if !arp.sender_ip.is_unspecified() {
            self.responder.observe(arp.sender_ip, arp.sender_mac);
        }

        // answers to our own probes have done their job once observed
        if arp.operation == ArpOperation::Reply && arp.target_mac == self.forwarding.probe_mac {
            trace!(ip = %arp.sender_ip, mac = %arp.sender_mac, "probe answered");
            return Decision::new(DecisionAction::Ignored);
        }

        match self.responder.handle_arp(event.switch_id, event.in_port, arp) {
            ArpOutcome::Reply(reply) => {
                self.counters.proxy_arp_replies.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::FLOW_ENGINE_PROXY_ARP_REPLIES_TOTAL).increment(1);
                let mut decision = Decision::new(DecisionAction::ProxyArp);
                decision.commands.push(ControllerCommand::PacketOut(reply));
                decision
            }
            ArpOutcome::Suppressed => Decision::new(DecisionAction::ArpSuppressed),
            // ARP stays punted, so no rule is installed for it
            ArpOutcome::NotApplicable => self.l2_forward(event, frame, now, false),
        }
    }

    fn on_ipv4(
        &self,
        event: &PacketIn,
        frame: &ParsedFrame,
        tuple: &FiveTuple,
        now: Instant,
    ) -> Decision {
        self.responder.observe(tuple.src_ip, frame.eth_src);

        let dst_port = tuple.has_ports().then_some(tuple.dst_port);
        let activity = self
            .activity
            .record_and_evaluate(tuple.src_ip, tuple.dst_ip, dst_port, now);

        let classification = self
            .should_classify(tuple)
            .then(|| {
                if let Some(oracle) = &self.oracle {
                    oracle.submit(tuple);
                }
                let verdict = self.classifier.take_pending_verdict(tuple.src_ip);
                let classification = self.classifier.classify(tuple, &activity, verdict.as_ref());
                metrics::counter!(
                    m::FLOW_ENGINE_CLASSIFICATIONS_TOTAL,
                    m::LABEL_LEVEL => classification.level.as_str()
                )
                .increment(1);
                classification
            });

        let level = classification
            .as_ref()
            .map_or(ClassificationLevel::Normal, |c| c.level);

        let mut decision = if let Some(plan) =
            self.redirect
                .plan(event.switch_id, event.in_port, tuple, frame.eth_dst, level)
        {
            self.apply_redirect(event, tuple, plan, now)
        } else if let Some(pool) = self.pool.as_ref().filter(|p| p.is_vip(tuple.dst_ip)) {
            self.load_balance(event, tuple, pool, now)
        } else if let Some(host) = self.locator.static_host(event.switch_id, tuple.dst_ip) {
            let rule = flow::static_route(
                event.switch_id,
                forwarding_match(event.in_port, frame.ether_type, Some(tuple), self.is_monitored(tuple)),
                host.mac,
                host.port,
                self.forwarding.static_idle_timeout,
            );
            let mut decision = Decision::new(DecisionAction::StaticRoute);
            let actions = rule.actions.clone();
            self.push_install(&mut decision.commands, rule, "static", now);
            decision.commands.push(packet_out(event, actions));
            decision
        } else {
            self.l2_forward(event, frame, now, true)
        };

        decision.classification = classification;
        decision
    }

    /// Traffic from honeypots is never classified, nor traffic to ports that
    /// are not monitored.
    fn should_classify(&self, tuple: &FiveTuple) -> bool {
        !self.responder.is_virtual(tuple.src_ip) && self.is_monitored(tuple)
    }

    fn is_monitored(&self, tuple: &FiveTuple) -> bool {
        let config = self.classifier.config();
        if tuple.has_ports() {
            config.is_monitored(tuple.dst_port)
        } else {
            config.monitored_ports.is_empty()
        }
    }

    fn apply_redirect(
        &self,
        event: &PacketIn,
        tuple: &FiveTuple,
        plan: RedirectPlan,
        now: Instant,
    ) -> Decision {
        let tier = plan.tier();
        match plan {
            RedirectPlan::Ready {
                target,
                forward,
                reverse,
                actions,
                ..
            } => {
                self.counters.redirects.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::FLOW_ENGINE_REDIRECTS_TOTAL, m::LABEL_TIER => tier.as_str())
                    .increment(1);
                info!(
                    src = %tuple.src_ip,
                    dst = %tuple.dst_ip,
                    honeypot = %target,
                    tier = tier.as_str(),
                    priority = forward.priority,
                    "redirecting flow to honeypot"
                );
                let mut decision = Decision::new(DecisionAction::Redirected);
                self.push_install(&mut decision.commands, forward, "redirect", now);
                self.push_install(&mut decision.commands, reverse, "redirect", now);
                decision.commands.push(packet_out(event, actions));
                decision
            }
            RedirectPlan::Unresolved {
                target,
                actions,
                probe,
                ..
            } => {
                debug!(
                    src = %tuple.src_ip,
                    honeypot = %target,
                    tier = tier.as_str(),
                    "honeypot not located yet, flooding and probing"
                );
                let mut decision = Decision::new(DecisionAction::RedirectPending);
                decision.commands.push(packet_out(event, actions));
                decision.commands.push(ControllerCommand::PacketOut(probe));
                decision
            }
        }
    }

    fn load_balance(
        &self,
        event: &PacketIn,
        tuple: &FiveTuple,
        pool: &LoadBalancerPool,
        now: Instant,
    ) -> Decision {
        let Some(assignment) = pool.assign(tuple, now) else {
            debug!(vip = %tuple.dst_ip, "virtual IP has no backends, flooding");
            return self.flood(event);
        };
        let port = self
            .locator
            .locate(event.switch_id, assignment.backend, assignment.mac);

        match (assignment.mac, port) {
            (Some(mac), Some(out_port)) => {
                let rewrite = Rewrite {
                    priority: PRIORITY_LOAD_BALANCE,
                    tuple: *tuple,
                    new_dst_ip: assignment.backend,
                    new_dst_mac: mac,
                    out_port,
                    client_port: event.in_port,
                    original_dst_mac: pool.vip_mac(),
                    idle_timeout: pool.idle_timeout(),
                    hard_timeout: 0,
                };
                pool.confirm(tuple);
                self.counters.load_balanced.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::FLOW_ENGINE_LB_ASSIGNMENTS_TOTAL).increment(1);
                debug!(
                    client = %tuple.src_ip,
                    backend = %assignment.backend,
                    retried = assignment.retried,
                    "client flow assigned"
                );

                let mut decision = Decision::new(DecisionAction::LoadBalanced);
                self.push_install(&mut decision.commands, rewrite.forward(event.switch_id), "load_balance", now);
                self.push_install(&mut decision.commands, rewrite.reverse(event.switch_id), "load_balance", now);
                decision.commands.push(packet_out(event, rewrite.forward_actions()));
                decision
            }
            _ => {
                debug!(
                    client = %tuple.src_ip,
                    backend = %assignment.backend,
                    "backend not located yet, flooding and probing"
                );
                let mut decision = Decision::new(DecisionAction::LoadBalancePending);
                decision.commands.push(packet_out(
                    event,
                    vec![
                        FlowAction::SetIpv4Dst(assignment.backend),
                        FlowAction::SetEthDst(assignment.mac.unwrap_or(MacAddr::BROADCAST)),
                        FlowAction::Output(OutputPort::Flood),
                    ],
                ));
                decision.commands.push(ControllerCommand::PacketOut(probe_packet_out(
                    event.switch_id,
                    &self.forwarding,
                    assignment.backend,
                )));
                decision
            }
        }
    }

    /// Plain L2 switching toward the learned port of `eth_dst`, or flood.
    fn l2_forward(&self, event: &PacketIn, frame: &ParsedFrame, now: Instant, install: bool) -> Decision {
        let Some(out_port) = self.learning.lookup(event.switch_id, frame.eth_dst) else {
            return self.flood(event);
        };

        let mut decision = Decision::new(DecisionAction::Forwarded);
        if install && out_port != event.in_port {
            let tuple = match &frame.payload {
                FramePayload::Ipv4(tuple) => Some(tuple),
                _ => None,
            };
            let monitored = tuple.is_some_and(|t| self.is_monitored(t));
            let rule = flow::learned_unicast(
                event.switch_id,
                forwarding_match(event.in_port, frame.ether_type, tuple, monitored),
                frame.eth_dst,
                out_port,
                self.forwarding.learned_idle_timeout,
            );
            self.push_install(&mut decision.commands, rule, "unicast", now);
        }
        decision.commands.push(packet_out(event, vec![output_to(out_port, event.in_port)]));
        decision
    }

    fn flood(&self, event: &PacketIn) -> Decision {
        let mut decision = Decision::new(DecisionAction::Flooded);
        decision
            .commands
            .push(packet_out(event, vec![FlowAction::Output(OutputPort::Flood)]));
        decision
    }

    fn push_install(
        &self,
        commands: &mut Vec<ControllerCommand>,
        rule: FlowInstall,
        kind: &'static str,
        now: Instant,
    ) {
        self.ledger.record(&rule, now);
        metrics::counter!(m::FLOW_ENGINE_FLOWS_INSTALLED_TOTAL, m::LABEL_KIND => kind).increment(1);
        commands.push(ControllerCommand::InstallFlow(rule));
    }

    // ─── feedback, sweep, stats ─────────────────────────────────────

    /// Apply honeypot feedback to the sticky sets. Takes effect from the
    /// next packet-in of that source.
    pub fn apply_feedback(&self, feedback: &ClassificationFeedback) -> ClassificationLevel {
        let level = self.classifier.update_from_feedback(feedback);
        metrics::counter!(m::FLOW_ENGINE_FEEDBACK_TOTAL, m::LABEL_LEVEL => level.as_str())
            .increment(1);
        level
    }

    /// Prune every time-bounded table. Run from the periodic sweep tick.
    pub fn sweep(&self, now: Instant) -> SweepReport {
        SweepReport {
            idle_sources: self.activity.sweep(now),
            expired_flows: self.ledger.prune(now),
            stale_assignments: self.pool.as_ref().map_or(0, |p| p.prune_pending(now)),
            expired_verdicts: self.classifier.prune_verdicts(now),
        }
    }

    /// Snapshot for the control listener and the sweep log line.
    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            active_sources: self.activity.active_sources(),
            suspicious_ips: self.classifier.suspicious_ips(),
            malicious_ips: self.classifier.malicious_ips(),
            installed_flows: self.ledger.len(),
            learned_macs: self.learning.len(),
            packets_processed: self.counters.packets.load(Ordering::Relaxed),
            redirects: self.counters.redirects.load(Ordering::Relaxed),
            load_balanced: self.counters.load_balanced.load(Ordering::Relaxed),
            proxy_arp_replies: self.counters.proxy_arp_replies.load(Ordering::Relaxed),
            oracle_failures: self.oracle.as_ref().map_or(0, OracleHandle::failures),
        }
    }
}

/// Output toward `port`; the switch needs `InPort` to send back where the
/// packet came from.
fn output_to(port: PortNo, in_port: PortNo) -> FlowAction {
    if port == in_port {
        FlowAction::Output(OutputPort::InPort)
    } else {
        FlowAction::Output(OutputPort::Physical(port))
    }
}

/// Release the triggering packet: by buffer id when the switch kept it,
/// otherwise with its bytes.
fn packet_out(event: &PacketIn, actions: Vec<FlowAction>) -> ControllerCommand {
    let data = match event.buffer_id {
        Some(id) => PacketOutData::Buffered(id),
        None => PacketOutData::Raw(event.data.clone()),
    };
    ControllerCommand::PacketOut(PacketOut {
        switch_id: event.switch_id,
        in_port: Some(event.in_port),
        data,
        actions,
    })
}
