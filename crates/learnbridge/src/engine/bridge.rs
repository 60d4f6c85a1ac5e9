//! The bridge engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::types::{BridgeEvent, DispatchOutcome, Disposition, StopSummary};
use crate::admission::AdmissionController;
use crate::clock::Clock;
use crate::config::BridgeConfig;
use crate::conntrack::{ConnectionKey, ConnectionTracker};
use crate::error::{BridgeError, Result};
use crate::fdb::LearningTable;
use crate::lifecycle::{FlowLifecycleReconciler, ReconcileOutcome};
use crate::packet::ParsedFrame;
use crate::platform::{AppId, InboundFrame, Platform, RuleEvent};
use crate::rule::{ForwardingDecision, InstallOutcome, RuleInstaller};
use crate::stats::{BridgeStats, BridgeStatsSnapshot, StatsLogger};

/// Reactive learning bridge.
pub struct LearningBridge {
    config: BridgeConfig,
    platform: Arc<dyn Platform>,
    clock: Arc<dyn Clock>,
    fdb: LearningTable,
    admission: Arc<AdmissionController>,
    tracker: Arc<ConnectionTracker>,
    logger: Arc<StatsLogger>,
    stats: Arc<BridgeStats>,
    installer: RuleInstaller,
    reconciler: FlowLifecycleReconciler,
    running: AtomicBool,
}

impl LearningBridge {
    /// Validates `config`, builds fresh state and starts accepting events.
    pub fn start(
        config: BridgeConfig,
        platform: Arc<dyn Platform>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let admission = Arc::new(AdmissionController::new(config.max_connections_per_host));
        let tracker = Arc::new(ConnectionTracker::new());
        let logger = Arc::new(StatsLogger::new(config.stats_log_path.clone()));
        let stats = Arc::new(BridgeStats::default());

        let installer = RuleInstaller::new(
            &config,
            Arc::clone(&platform),
            Arc::clone(&admission),
            Arc::clone(&stats),
        );
        let reconciler = FlowLifecycleReconciler::new(
            installer.app_id().clone(),
            Arc::clone(&platform),
            Arc::clone(&admission),
            Arc::clone(&tracker),
            Arc::clone(&logger),
            Arc::clone(&stats),
            Arc::clone(&clock),
        );

        info!(
            app = %config.app_name,
            max_connections_per_host = config.max_connections_per_host,
            flow_timeout_secs = config.flow_timeout_secs,
            admission_mode = ?config.admission_mode,
            install_failure_policy = ?config.install_failure_policy,
            stats_log = %config.stats_log_path.display(),
            "Learning bridge started"
        );

        Ok(Self {
            fdb: LearningTable::new(config.fdb_aging()),
            config,
            platform,
            clock,
            admission,
            tracker,
            logger,
            stats,
            installer,
            reconciler,
            running: AtomicBool::new(true),
        })
    }

    /// Stops accepting events, flushes every open connection to the stats
    /// log with zero counters and removes every rule this bridge owns.
    ///
    /// Calling `stop()` twice is a no-op the second time.
    pub async fn stop(&self) -> StopSummary {
        if !self.running.swap(false, Ordering::SeqCst) {
            return StopSummary::default();
        }

        let now = self.clock.now();
        let open = self.tracker.drain(now);
        let mut summary = StopSummary {
            connections_flushed: open.len(),
            rules_removed: 0,
        };
        for (key, record) in &open {
            if self.logger.log_connection(now, key, record, 0, 0) {
                BridgeStats::incr(&self.stats.connections_logged);
            }
        }

        match self.platform.remove_all_rules_owned_by(self.app_id()).await {
            Ok(removed) => summary.rules_removed = removed,
            Err(e) => warn!(error = %e, "Failed to remove owned rules at shutdown"),
        }

        self.fdb.clear();
        self.admission.clear();

        info!(
            connections_flushed = summary.connections_flushed,
            rules_removed = summary.rules_removed,
            "Learning bridge stopped"
        );
        summary
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Routes an event to its handler.
    pub async fn dispatch(&self, event: BridgeEvent) -> DispatchOutcome {
        match event {
            BridgeEvent::InboundFrame(frame) => {
                DispatchOutcome::Frame(self.handle_inbound_frame(&frame).await)
            }
            BridgeEvent::RuleRemoved(event) => {
                DispatchOutcome::Rule(self.handle_rule_removed(&event).await)
            }
        }
    }

    /// Handles a frame punted to the controller.
    #[instrument(skip_all, fields(switch = %frame.switch, in_port = %frame.in_port))]
    pub async fn handle_inbound_frame(&self, frame: &InboundFrame) -> Disposition {
        BridgeStats::incr(&self.stats.frames_received);
        match self.process_frame(frame).await {
            Ok(disposition) => disposition,
            Err(BridgeError::MalformedFrame(reason)) => {
                BridgeStats::incr(&self.stats.frames_dropped);
                debug!(%reason, "Dropping unparseable frame");
                Disposition::Dropped
            }
            Err(e) => {
                BridgeStats::incr(&self.stats.frames_dropped);
                warn!(error = %e, "Frame processing failed");
                Disposition::Dropped
            }
        }
    }

    /// Handles a rule notification from the platform.
    #[instrument(skip_all, fields(rule_id = event.rule_id))]
    pub async fn handle_rule_removed(&self, event: &RuleEvent) -> ReconcileOutcome {
        if !self.is_running() {
            debug!("Bridge stopped, ignoring rule event");
            return ReconcileOutcome::Ignored;
        }
        BridgeStats::incr(&self.stats.rule_events);
        self.reconciler.handle_rule_removed(event).await
    }

    async fn process_frame(&self, frame: &InboundFrame) -> Result<Disposition> {
        if !self.is_running() {
            return Err(BridgeError::NotRunning);
        }
        if frame.handled {
            BridgeStats::incr(&self.stats.frames_skipped);
            return Ok(Disposition::Skipped);
        }

        let parsed = ParsedFrame::parse(&frame.data)?;
        let src = parsed.src_mac;
        let dst = parsed.dst_mac;
        debug!(src = %src, dst = %dst, ether_type = parsed.ether_type, "Frame received");

        let now = self.clock.now();
        self.fdb.learn(&frame.switch, src, frame.in_port, now);

        // Group destinations are never admission-limited and never learned.
        let group = dst.is_multicast();
        if !group && !self.admission.is_allowed(&src, &dst) {
            BridgeStats::incr(&self.stats.frames_blocked);
            info!(
                src = %src,
                dst = %dst,
                limit = self.admission.limit(),
                "Blocking frame, source at fan-out limit"
            );
            return Ok(Disposition::Blocked);
        }

        let tcp = parsed.tcp_over_ipv4();
        let mut opened = None;
        if let Some((ip, tcp)) = &tcp {
            if tcp.flags.syn {
                let key = ConnectionKey::from_headers(src, dst, ip, tcp);
                if self.tracker.on_syn(key, &frame.switch, now) {
                    BridgeStats::incr(&self.stats.connections_tracked);
                    opened = Some(key);
                }
            }
        }

        let out_port = if group {
            None
        } else {
            self.fdb.lookup(&frame.switch, &dst, now)
        };
        let Some(out_port) = out_port else {
            self.installer.flood(frame).await?;
            BridgeStats::incr(&self.stats.frames_flooded);
            return Ok(Disposition::Flooded);
        };

        let decision = ForwardingDecision {
            switch: frame.switch.clone(),
            in_port: frame.in_port,
            src_mac: src,
            dst_mac: dst,
            out_port,
            tcp,
        };

        let disposition = match self.installer.install_and_forward(frame, &decision).await? {
            InstallOutcome::Forwarded { rule_id } => {
                BridgeStats::incr(&self.stats.frames_forwarded);
                Disposition::Forwarded { rule_id }
            }
            InstallOutcome::Blocked => {
                BridgeStats::incr(&self.stats.frames_blocked);
                Disposition::Blocked
            }
            InstallOutcome::Dropped => {
                BridgeStats::incr(&self.stats.frames_dropped);
                Disposition::Dropped
            }
        };

        // No rule carries this tuple, so no removal will ever close it.
        if matches!(disposition, Disposition::Blocked | Disposition::Dropped) {
            if let Some(key) = opened {
                self.tracker.finalize(&key, now);
                debug!(connection = %key, "Discarded connection opened by undelivered frame");
            }
        }

        Ok(disposition)
    }

    /// Removes aged learning entries. Returns how many were removed.
    pub fn sweep_learning_table(&self) -> usize {
        self.fdb.sweep(self.clock.now())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn app_id(&self) -> &AppId {
        self.installer.app_id()
    }

    pub fn learning_table(&self) -> &LearningTable {
        &self.fdb
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn stats_logger(&self) -> &StatsLogger {
        &self.logger
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::config::InstallFailurePolicy;
    use crate::packet::{encode_ethernet_frame, encode_tcp_frame, TcpFlags, ETHER_TYPE_ARP};
    use crate::platform::{MemoryPlatform, PacketOut};
    use bridge_types::{Ipv4Address, MacAddress, PortNumber, SwitchId};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    fn switch() -> SwitchId {
        SwitchId::new("of:0000000000000001").unwrap()
    }

    fn bridge(dir: &tempfile::TempDir) -> (Arc<MemoryPlatform>, LearningBridge) {
        let platform = Arc::new(MemoryPlatform::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let config = BridgeConfig {
            stats_log_path: dir.path().join("tcp.log"),
            ..Default::default()
        };
        let bridge = LearningBridge::start(config, platform.clone(), clock).unwrap();
        (platform, bridge)
    }

    fn arp(src: MacAddress, dst: MacAddress, port: u32) -> InboundFrame {
        InboundFrame::new(
            switch(),
            PortNumber::new(port),
            encode_ethernet_frame(src, dst, ETHER_TYPE_ARP, &[0; 28]),
        )
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = BridgeConfig {
            max_connections_per_host: 0,
            ..Default::default()
        };
        let result = LearningBridge::start(
            config,
            Arc::new(MemoryPlatform::new()),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn test_unparseable_frame_dropped_without_learning() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, bridge) = bridge(&dir);

        let frame = InboundFrame::new(switch(), PortNumber::new(1), vec![0; 5]);
        assert_eq!(bridge.handle_inbound_frame(&frame).await, Disposition::Dropped);
        assert!(bridge.learning_table().is_empty());
        assert!(platform.packet_outs().is_empty());
    }

    #[tokio::test]
    async fn test_handled_frame_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, bridge) = bridge(&dir);

        let mut frame = arp(mac(0xa1), mac(0xb1), 1);
        frame.handled = true;
        assert_eq!(bridge.handle_inbound_frame(&frame).await, Disposition::Skipped);
        assert!(bridge.learning_table().is_empty());
        assert!(platform.packet_outs().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_destination_floods_then_learned_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, bridge) = bridge(&dir);

        let out = bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
        assert_eq!(out, Disposition::Flooded);
        assert_eq!(bridge.admission().active_count(&mac(0xa1)), 0);

        let back = bridge.handle_inbound_frame(&arp(mac(0xb1), mac(0xa1), 2)).await;
        assert!(matches!(back, Disposition::Forwarded { rule_id: Some(_) }));
        assert!(bridge.admission().is_active(&mac(0xb1), &mac(0xa1)));
        assert_eq!(
            platform.packet_outs().last(),
            Some(&PacketOut::Forward {
                switch: switch(),
                in_port: PortNumber::new(2),
                port: PortNumber::new(1),
            })
        );
    }

    #[tokio::test]
    async fn test_dropped_syn_leaves_no_connection() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_fail_installs(true);
        let config = BridgeConfig {
            install_failure_policy: InstallFailurePolicy::Drop,
            stats_log_path: dir.path().join("tcp.log"),
            ..Default::default()
        };
        let bridge =
            LearningBridge::start(config, platform.clone(), Arc::new(SystemClock)).unwrap();

        bridge.handle_inbound_frame(&arp(mac(0xb1), mac(0xa1), 2)).await;
        let syn = encode_tcp_frame(
            mac(0xa1),
            mac(0xb1),
            Ipv4Address::new(10, 0, 0, 1),
            Ipv4Address::new(10, 0, 0, 2),
            5000,
            80,
            TcpFlags {
                syn: true,
                ..Default::default()
            },
            &[],
        )
        .unwrap();
        let frame = InboundFrame::new(switch(), PortNumber::new(1), syn);

        assert_eq!(bridge.handle_inbound_frame(&frame).await, Disposition::Dropped);
        assert!(bridge.tracker().is_empty());
        assert_eq!(bridge.stats().connections_tracked, 1);
        assert!(!bridge.admission().is_active(&mac(0xa1), &mac(0xb1)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_later_events() {
        let dir = tempfile::tempdir().unwrap();
        let (platform, bridge) = bridge(&dir);
        bridge.handle_inbound_frame(&arp(mac(0xb1), mac(0xa1), 2)).await;
        bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
        assert_eq!(platform.installed_rules().len(), 1);

        let summary = bridge.stop().await;
        assert_eq!(summary.rules_removed, 1);
        assert!(!bridge.is_running());
        assert!(platform.installed_rules().is_empty());
        assert_eq!(bridge.stop().await, StopSummary::default());

        let out = bridge.handle_inbound_frame(&arp(mac(0xa1), mac(0xb1), 1)).await;
        assert_eq!(out, Disposition::Dropped);
    }
}
