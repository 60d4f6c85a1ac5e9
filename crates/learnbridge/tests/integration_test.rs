//! End-to-end tests of the learning bridge over the in-memory platform.

use async_trait::async_trait;
use bridge_types::{Ipv4Address, MacAddress, PortNumber, SwitchId};
use chrono::{Duration, TimeZone, Utc};
use learnbridge::packet::{encode_ethernet_frame, encode_tcp_frame, TcpFlags, ETHER_TYPE_ARP};
use learnbridge::platform::{
    AppId, InboundFrame, InstalledRule, PacketOut, PlatformResult, RuleEvent, RuleId,
};
use learnbridge::rule::ForwardingRule;
use learnbridge::{
    AdmissionMode, BridgeConfig, BridgeEvent, Clock, DispatchOutcome, Disposition,
    InstallFailurePolicy, LearningBridge, ManualClock, MemoryPlatform, Platform,
    ReconcileOutcome,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0, 0, 0, 0, 0, last])
}

fn switch() -> SwitchId {
    SwitchId::new("of:0000000000000001").unwrap()
}

fn arp(src: MacAddress, dst: MacAddress, port: u32) -> InboundFrame {
    InboundFrame::new(
        switch(),
        PortNumber::new(port),
        encode_ethernet_frame(src, dst, ETHER_TYPE_ARP, &[0; 28]),
    )
}

fn tcp(src: MacAddress, dst: MacAddress, port: u32, src_port: u16, syn: bool) -> InboundFrame {
    let data = encode_tcp_frame(
        src,
        dst,
        Ipv4Address::new(10, 0, 0, 1),
        Ipv4Address::new(10, 0, 0, 2),
        src_port,
        80,
        TcpFlags {
            syn,
            ack: !syn,
            ..Default::default()
        },
        &[],
    )
    .unwrap();
    InboundFrame::new(switch(), PortNumber::new(port), data)
}

struct Harness {
    platform: Arc<MemoryPlatform>,
    clock: Arc<ManualClock>,
    bridge: LearningBridge,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(config: BridgeConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MemoryPlatform::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
        ));
        let config = BridgeConfig {
            stats_log_path: dir.path().join("tcp_connections.log"),
            ..config
        };
        let bridge = LearningBridge::start(config, platform.clone(), clock.clone()).unwrap();
        Self {
            platform,
            clock,
            bridge,
            dir,
        }
    }

    fn with_defaults() -> Self {
        Self::new(BridgeConfig::default())
    }

    /// Teaches the bridge where `host` lives by flooding a broadcast from it.
    async fn learn(&self, host: MacAddress, port: u32) {
        let out = self
            .bridge
            .handle_inbound_frame(&arp(host, MacAddress::BROADCAST, port))
            .await;
        assert_eq!(out, Disposition::Flooded);
    }

    async fn expire_pair(&self, src: MacAddress, dst: MacAddress) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for event in self.platform.remove_matching(None, &src, &dst) {
            outcomes.push(self.bridge.handle_rule_removed(&event).await);
        }
        outcomes
    }

    fn log_lines(&self) -> Vec<String> {
        match std::fs::read_to_string(self.dir.path().join("tcp_connections.log")) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn tcp_rule(&self, src_port: u16) -> InstalledRule {
        self.platform
            .installed_rules()
            .into_iter()
            .find(|r| r.selector.tcp_src == Some(src_port))
            .unwrap()
    }
}

#[tokio::test]
async fn test_broadcast_is_flooded_and_never_limited() {
    let h = Harness::new(BridgeConfig {
        max_connections_per_host: 1,
        ..Default::default()
    });
    h.learn(mac(0xb1), 2).await;
    h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    assert_eq!(h.bridge.admission().active_count(&mac(0xa1)), 1);

    let out = h
        .bridge
        .handle_inbound_frame(&arp(mac(0xa1), MacAddress::BROADCAST, 1))
        .await;
    assert_eq!(out, Disposition::Flooded);
    assert_eq!(h.bridge.admission().active_count(&mac(0xa1)), 1);
    assert_eq!(
        h.platform.packet_outs().last(),
        Some(&PacketOut::Flood {
            switch: switch(),
            in_port: PortNumber::new(1),
        })
    );
}

#[tokio::test]
async fn test_syn_creates_single_record() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;

    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, true)).await;
    let start = h.clock.now();
    h.clock.advance(Duration::seconds(1));
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, true)).await;
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, false)).await;

    let open = h.bridge.tracker().open_snapshot();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].1.start, start);
    assert_eq!(open[0].1.switch, switch());
    assert_eq!(h.bridge.stats().connections_tracked, 1);
}

#[tokio::test]
async fn test_fanout_limit_blocks_new_destination_only() {
    let h = Harness::with_defaults();
    for (host, port) in [(0xb1, 2), (0xb2, 3), (0xb3, 4)] {
        h.learn(mac(host), port).await;
    }

    for dst in [0xb1, 0xb2] {
        let out = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(dst), 1)).await;
        assert!(matches!(out, Disposition::Forwarded { rule_id: Some(_) }));
    }

    let attempts = h.platform.install_attempts();
    let blocked = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb3), 1)).await;
    assert_eq!(blocked, Disposition::Blocked);
    assert_eq!(h.platform.install_attempts(), attempts);

    let again = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    assert!(matches!(again, Disposition::Forwarded { .. }));
    assert_eq!(h.bridge.admission().active_count(&mac(0xa1)), 2);
    assert_eq!(h.bridge.stats().frames_blocked, 1);
}

#[tokio::test]
async fn test_tcp_rule_removal_logs_connection() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, true)).await;

    let rule = h.tcp_rule(5000);
    assert_eq!(rule.priority, 20);
    h.platform.add_counters(rule.rule_id, 1000, 7);
    h.clock.advance(Duration::milliseconds(3500));

    let event = h.platform.remove_rule(rule.rule_id).unwrap();
    let outcome = h.bridge.handle_rule_removed(&event).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Reconciled {
            pair_retired: true,
            connection_logged: true,
        }
    );
    assert!(h.bridge.tracker().is_empty());

    let lines = h.log_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(
        lines[0],
        "2024-06-01 08:00:03.500 | of:0000000000000001 | 00:00:00:00:00:A1 | \
         00:00:00:00:00:B1 | 10.0.0.1:5000 -> 10.0.0.2:80 | 3500 | 1000 | 7"
    );
}

#[tokio::test]
async fn test_shutdown_flushes_open_connections() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, true)).await;
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5001, true)).await;
    h.clock.advance(Duration::seconds(2));

    let summary = h.bridge.stop().await;
    assert_eq!(summary.connections_flushed, 2);
    assert_eq!(summary.rules_removed, 2);
    assert!(h.platform.installed_rules().is_empty());
    assert!(h.bridge.tracker().is_empty());

    let lines = h.log_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|l| l.ends_with("| 2000 | 0 | 0")));

    h.bridge.stop().await;
    assert_eq!(h.log_lines().len(), 2);
}

#[tokio::test]
async fn test_expiry_frees_slot_for_new_destination() {
    let h = Harness::new(BridgeConfig {
        max_connections_per_host: 1,
        ..Default::default()
    });
    h.learn(mac(0xb1), 2).await;
    h.learn(mac(0xb2), 3).await;

    h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    let blocked = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb2), 1)).await;
    assert_eq!(blocked, Disposition::Blocked);

    let outcomes = h.expire_pair(mac(0xa1), mac(0xb1)).await;
    assert_eq!(
        outcomes,
        vec![ReconcileOutcome::Reconciled {
            pair_retired: true,
            connection_logged: false,
        }]
    );

    let out = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb2), 1)).await;
    assert!(matches!(out, Disposition::Forwarded { .. }));
}

#[tokio::test]
async fn test_open_connection_holds_slot_after_plain_rule_expiry() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;
    h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, 5000, true)).await;

    let plain = h
        .platform
        .installed_rules()
        .into_iter()
        .find(|r| !r.selector.has_tcp_ports())
        .unwrap();
    let event = h.platform.remove_rule(plain.rule_id).unwrap();
    h.bridge.handle_rule_removed(&event).await;
    assert!(h.bridge.admission().is_active(&mac(0xa1), &mac(0xb1)));

    // The TCP rule's own removal closes the connection and retires the pair.
    let outcomes = h.expire_pair(mac(0xa1), mac(0xb1)).await;
    assert_eq!(
        outcomes,
        vec![ReconcileOutcome::Reconciled {
            pair_retired: true,
            connection_logged: true,
        }]
    );
    assert!(!h.bridge.admission().is_active(&mac(0xa1), &mac(0xb1)));
}

#[tokio::test]
async fn test_learning_table_tracks_latest_port() {
    let h = Harness::with_defaults();
    let table = h.bridge.learning_table();
    let now = h.clock.now();

    h.learn(mac(0xa1), 1).await;
    assert_eq!(table.lookup(&switch(), &mac(0xa1), now), Some(PortNumber::new(1)));

    h.learn(mac(0xa1), 4).await;
    assert_eq!(table.lookup(&switch(), &mac(0xa1), now), Some(PortNumber::new(4)));

    h.learn(mac(0xb1), 2).await;
    h.bridge.handle_inbound_frame(&arp(mac(0xb1), mac(0xa1), 2)).await;
    assert_eq!(
        h.platform.packet_outs().last(),
        Some(&PacketOut::Forward {
            switch: switch(),
            in_port: PortNumber::new(2),
            port: PortNumber::new(4),
        })
    );
}

#[tokio::test]
async fn test_install_failure_forward_anyway() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;
    h.platform.set_fail_installs(true);

    let out = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    assert_eq!(out, Disposition::Forwarded { rule_id: None });
    assert!(h.bridge.admission().is_active(&mac(0xa1), &mac(0xb1)));
    assert_eq!(h.bridge.stats().install_failures, 1);
}

#[tokio::test]
async fn test_install_failure_drop() {
    let h = Harness::new(BridgeConfig {
        install_failure_policy: InstallFailurePolicy::Drop,
        ..Default::default()
    });
    h.learn(mac(0xb1), 2).await;
    h.platform.set_fail_installs(true);
    let outs_before = h.platform.packet_outs().len();

    let out = h.bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
    assert_eq!(out, Disposition::Dropped);
    assert!(!h.bridge.admission().is_active(&mac(0xa1), &mac(0xb1)));
    assert_eq!(h.platform.packet_outs().len(), outs_before);
}

#[tokio::test]
async fn test_each_finalized_connection_logs_once() {
    let h = Harness::with_defaults();
    h.learn(mac(0xb1), 2).await;
    for port in 5000..5004 {
        h.bridge.handle_inbound_frame(&tcp(mac(0xa1), mac(0xb1), 1, port, true)).await;
    }

    for port in [5000, 5002] {
        let rule = h.tcp_rule(port);
        let event = h.platform.remove_rule(rule.rule_id).unwrap();
        h.bridge.handle_rule_removed(&event).await;
    }
    assert_eq!(h.log_lines().len(), 2);
    assert_eq!(h.bridge.tracker().len(), 2);

    // A duplicate notification finds no record and writes nothing.
    let rule = h.tcp_rule(5001);
    let event = h.platform.remove_rule(rule.rule_id).unwrap();
    h.bridge.handle_rule_removed(&event).await;
    h.bridge.handle_rule_removed(&event).await;
    assert_eq!(h.log_lines().len(), 3);
    assert_eq!(h.bridge.tracker().len(), 1);
}

#[tokio::test]
async fn test_dispatch_routes_events() {
    let h = Harness::with_defaults();
    let out = h
        .bridge
        .dispatch(BridgeEvent::InboundFrame(arp(mac(0xa1), MacAddress::BROADCAST, 1)))
        .await;
    assert_eq!(out, DispatchOutcome::Frame(Disposition::Flooded));

    let foreign = RuleEvent::removed(&InstalledRule {
        rule_id: 1,
        switch: switch(),
        app_id: AppId::new("org.other"),
        selector: Default::default(),
        output: PortNumber::new(1),
        priority: 10,
        timeout_secs: 5,
        permanent: false,
        bytes: 0,
        packets: 0,
    });
    let out = h.bridge.dispatch(BridgeEvent::RuleRemoved(foreign)).await;
    assert_eq!(out, DispatchOutcome::Rule(ReconcileOutcome::Ignored));
}

/// Delegates to a [`MemoryPlatform`] but yields before every installation,
/// so two frames can interleave between admission check and reservation.
struct YieldingPlatform {
    inner: Arc<MemoryPlatform>,
}

#[async_trait]
impl Platform for YieldingPlatform {
    async fn flood_frame(&self, frame: &InboundFrame) -> PlatformResult<()> {
        self.inner.flood_frame(frame).await
    }

    async fn forward_frame(&self, frame: &InboundFrame, port: PortNumber) -> PlatformResult<()> {
        self.inner.forward_frame(frame, port).await
    }

    async fn install_rule(&self, rule: &ForwardingRule) -> PlatformResult<RuleId> {
        tokio::task::yield_now().await;
        self.inner.install_rule(rule).await
    }

    async fn query_installed_rules(&self, switch: &SwitchId) -> PlatformResult<Vec<InstalledRule>> {
        self.inner.query_installed_rules(switch).await
    }

    async fn query_known_switches(&self) -> PlatformResult<Vec<SwitchId>> {
        self.inner.query_known_switches().await
    }

    async fn remove_all_rules_owned_by(&self, app_id: &AppId) -> PlatformResult<usize> {
        self.inner.remove_all_rules_owned_by(app_id).await
    }
}

async fn race_two_destinations(mode: AdmissionMode) -> (LearningBridge, Disposition, Disposition) {
    let dir = tempfile::tempdir().unwrap();
    let platform = Arc::new(YieldingPlatform {
        inner: Arc::new(MemoryPlatform::new()),
    });
    let config = BridgeConfig {
        max_connections_per_host: 1,
        admission_mode: mode,
        stats_log_path: dir.path().join("tcp.log"),
        ..Default::default()
    };
    let bridge =
        LearningBridge::start(config, platform, Arc::new(learnbridge::SystemClock)).unwrap();

    for (host, port) in [(0xb1, 2), (0xb2, 3)] {
        bridge
            .handle_inbound_frame(&arp(mac(host), MacAddress::BROADCAST, port))
            .await;
    }

    let first = arp(mac(0xa1), mac(0xb1), 1);
    let second = arp(mac(0xa1), mac(0xb2), 1);
    let (a, b) = tokio::join!(
        bridge.handle_inbound_frame(&first),
        bridge.handle_inbound_frame(&second)
    );
    (bridge, a, b)
}

#[tokio::test]
async fn test_strict_admission_closes_race() {
    let (bridge, a, b) = race_two_destinations(AdmissionMode::Strict).await;

    assert!(matches!(a, Disposition::Forwarded { .. }));
    assert_eq!(b, Disposition::Blocked);
    assert_eq!(bridge.admission().active_count(&mac(0xa1)), 1);
}

#[tokio::test]
async fn test_relaxed_admission_may_overshoot() {
    let (bridge, a, b) = race_two_destinations(AdmissionMode::Relaxed).await;

    assert!(matches!(a, Disposition::Forwarded { .. }));
    assert!(matches!(b, Disposition::Forwarded { .. }));
    assert_eq!(bridge.admission().active_count(&mac(0xa1)), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_frames_respect_limit() {
    let h = Arc::new(Harness::with_defaults());
    for host in 0..16u8 {
        h.learn(mac(0x10 + host), u32::from(host) + 2).await;
    }

    let tasks: Vec<_> = (0..16u8)
        .map(|host| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.bridge
                    .handle_inbound_frame(&arp(mac(0xa1), mac(0x10 + host), 1))
                    .await
            })
        })
        .collect();

    let mut forwarded = 0;
    for task in tasks {
        if matches!(task.await.unwrap(), Disposition::Forwarded { .. }) {
            forwarded += 1;
        }
    }

    assert_eq!(forwarded, 2);
    assert_eq!(h.bridge.admission().active_count(&mac(0xa1)), 2);
    assert_eq!(h.bridge.stats().frames_blocked, 14);
}

/// Delegates to a [`MemoryPlatform`]. When armed, the next rule query takes
/// its snapshot, reports that it got there, and then waits to be released
/// before returning it.
struct GatedPlatform {
    inner: Arc<MemoryPlatform>,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl GatedPlatform {
    fn arm(&self, entered: oneshot::Sender<()>, release: oneshot::Receiver<()>) {
        *self.gate.lock() = Some((entered, release));
    }
}

#[async_trait]
impl Platform for GatedPlatform {
    async fn flood_frame(&self, frame: &InboundFrame) -> PlatformResult<()> {
        self.inner.flood_frame(frame).await
    }

    async fn forward_frame(&self, frame: &InboundFrame, port: PortNumber) -> PlatformResult<()> {
        self.inner.forward_frame(frame, port).await
    }

    async fn install_rule(&self, rule: &ForwardingRule) -> PlatformResult<RuleId> {
        self.inner.install_rule(rule).await
    }

    async fn query_installed_rules(&self, switch: &SwitchId) -> PlatformResult<Vec<InstalledRule>> {
        let rules = self.inner.query_installed_rules(switch).await?;
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }
        Ok(rules)
    }

    async fn query_known_switches(&self) -> PlatformResult<Vec<SwitchId>> {
        self.inner.query_known_switches().await
    }

    async fn remove_all_rules_owned_by(&self, app_id: &AppId) -> PlatformResult<usize> {
        self.inner.remove_all_rules_owned_by(app_id).await
    }
}

#[tokio::test]
async fn test_readmission_during_removal_keeps_slot() {
    let dir = tempfile::tempdir().unwrap();
    let inner = Arc::new(MemoryPlatform::new());
    let platform = Arc::new(GatedPlatform {
        inner: Arc::clone(&inner),
        gate: Mutex::new(None),
    });
    let config = BridgeConfig {
        stats_log_path: dir.path().join("tcp.log"),
        ..Default::default()
    };
    let bridge = LearningBridge::start(
        config,
        platform.clone(),
        Arc::new(learnbridge::SystemClock),
    )
    .unwrap();

    for (host, port) in [(0xb1, 2), (0xb2, 3), (0xb3, 4)] {
        bridge
            .handle_inbound_frame(&arp(mac(host), MacAddress::BROADCAST, port))
            .await;
    }
    for dst in [0xb1, 0xb2] {
        let out = bridge.handle_inbound_frame(&arp(mac(0xa1), mac(dst), 1)).await;
        assert!(matches!(out, Disposition::Forwarded { rule_id: Some(_) }));
    }

    let event = inner
        .remove_matching(None, &mac(0xa1), &mac(0xb1))
        .pop()
        .unwrap();
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    platform.arm(entered_tx, release_rx);

    // A1 talks to B1 again after the reconciler has read the rule table.
    let reforward = async {
        entered_rx.await.unwrap();
        let out = bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
        release_tx.send(()).unwrap();
        out
    };
    let (reconciled, reforwarded) = tokio::join!(bridge.handle_rule_removed(&event), reforward);

    assert_eq!(
        reconciled,
        ReconcileOutcome::Reconciled {
            pair_retired: false,
            connection_logged: false,
        }
    );
    assert!(matches!(reforwarded, Disposition::Forwarded { rule_id: Some(_) }));

    let third = bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb3), 1)).await;
    assert_eq!(third, Disposition::Blocked);
    assert_eq!(
        bridge.admission().destinations(&mac(0xa1)),
        HashSet::from([mac(0xb1), mac(0xb2)])
    );

    let live: HashSet<MacAddress> = inner
        .installed_rules()
        .iter()
        .filter(|r| r.selector.eth_src == Some(mac(0xa1)))
        .filter_map(|r| r.selector.eth_dst)
        .collect();
    assert_eq!(live, HashSet::from([mac(0xb1), mac(0xb2)]));
}
