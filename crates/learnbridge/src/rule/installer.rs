//! Rule installer.

use bridge_types::{Ipv4Prefix, MacAddress, PortNumber, SwitchId};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::types::{ForwardingRule, MatchPredicate, RuleTier};
use crate::admission::{AdmissionController, Reservation};
use crate::config::{AdmissionMode, BridgeConfig, InstallFailurePolicy};
use crate::error::Result;
use crate::packet::{Ipv4Fields, TcpFields, ETHER_TYPE_IPV4, IP_PROTO_TCP};
use crate::platform::{AppId, InboundFrame, Platform, RuleId};
use crate::stats::BridgeStats;

/// Where a learned frame should go and what it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingDecision {
    pub switch: SwitchId,
    pub in_port: PortNumber,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub out_port: PortNumber,
    /// IPv4/TCP headers when the frame is TCP over IPv4.
    pub tcp: Option<(Ipv4Fields, TcpFields)>,
}

/// Result of handling a forwarding decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Frame was forwarded. `rule_id` is `None` when installation failed.
    Forwarded { rule_id: Option<RuleId> },
    /// Source lost the race for its last admission slot.
    Blocked,
    /// Installation failed and the frame was discarded.
    Dropped,
}

/// Builds and installs forwarding rules.
pub struct RuleInstaller {
    platform: Arc<dyn Platform>,
    admission: Arc<AdmissionController>,
    stats: Arc<BridgeStats>,
    app_id: AppId,
    plain_priority: u16,
    tcp_priority: u16,
    timeout_secs: u32,
    mode: AdmissionMode,
    policy: InstallFailurePolicy,
}

impl RuleInstaller {
    pub fn new(
        config: &BridgeConfig,
        platform: Arc<dyn Platform>,
        admission: Arc<AdmissionController>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            platform,
            admission,
            stats,
            app_id: AppId::new(config.app_name.clone()),
            plain_priority: config.plain_priority,
            tcp_priority: config.tcp_priority,
            timeout_secs: config.flow_timeout_secs,
            mode: config.admission_mode,
            policy: config.install_failure_policy,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Builds the rule for a decision.
    ///
    /// The match always covers ingress port and both MACs. TCP frames also
    /// match ether-type IPv4, both addresses as /32, protocol TCP and both
    /// ports, at the higher priority.
    pub fn build_rule(&self, decision: &ForwardingDecision) -> ForwardingRule {
        let mut selector = MatchPredicate {
            in_port: Some(decision.in_port),
            eth_src: Some(decision.src_mac),
            eth_dst: Some(decision.dst_mac),
            ..Default::default()
        };

        let (tier, priority) = match &decision.tcp {
            Some((ip, tcp)) => {
                selector.eth_type = Some(ETHER_TYPE_IPV4);
                selector.ipv4_src = Some(Ipv4Prefix::host(ip.src));
                selector.ipv4_dst = Some(Ipv4Prefix::host(ip.dst));
                selector.ip_proto = Some(IP_PROTO_TCP);
                selector.tcp_src = Some(tcp.src_port);
                selector.tcp_dst = Some(tcp.dst_port);
                (RuleTier::TcpAware, self.tcp_priority)
            }
            None => (RuleTier::Plain, self.plain_priority),
        };

        ForwardingRule {
            switch: decision.switch.clone(),
            selector,
            output: decision.out_port,
            tier,
            priority,
            app_id: self.app_id.clone(),
            timeout_secs: self.timeout_secs,
            permanent: false,
        }
    }

    /// Installs the rule for `decision` and forwards `frame` out the chosen
    /// port.
    pub async fn install_and_forward(
        &self,
        frame: &InboundFrame,
        decision: &ForwardingDecision,
    ) -> Result<InstallOutcome> {
        let src = decision.src_mac;
        let dst = decision.dst_mac;

        let reservation = match self.mode {
            AdmissionMode::Strict => {
                let reservation = self.admission.try_reserve(&src, &dst);
                if reservation == Reservation::Rejected {
                    info!(
                        src = %src,
                        dst = %dst,
                        limit = self.admission.limit(),
                        "Lost race for last admission slot, blocking"
                    );
                    return Ok(InstallOutcome::Blocked);
                }
                Some(reservation)
            }
            AdmissionMode::Relaxed => None,
        };

        let rule = self.build_rule(decision);
        let rule_id = match self.platform.install_rule(&rule).await {
            Ok(rule_id) => {
                BridgeStats::incr(&self.stats.rules_installed);
                info!(rule_id, rule = %rule, "Installed forwarding rule");
                Some(rule_id)
            }
            Err(e) => {
                BridgeStats::incr(&self.stats.install_failures);
                error!(rule = %rule, error = %e, "Rule installation failed");
                if self.policy == InstallFailurePolicy::Drop {
                    if let Some(reservation) = reservation {
                        self.admission.abandon(&src, &dst, reservation);
                    }
                    warn!(src = %src, dst = %dst, "Dropping frame after failed installation");
                    return Ok(InstallOutcome::Dropped);
                }
                None
            }
        };

        match reservation {
            Some(_) => self.admission.settle(&src, &dst),
            None => self.admission.admit(&src, &dst),
        }

        self.platform.forward_frame(frame, decision.out_port).await?;
        debug!(switch = %decision.switch, port = %decision.out_port, "Forwarded frame");
        Ok(InstallOutcome::Forwarded { rule_id })
    }

    /// Floods `frame` without installing anything.
    pub async fn flood(&self, frame: &InboundFrame) -> Result<()> {
        self.platform.flood_frame(frame).await?;
        debug!(switch = %frame.switch, in_port = %frame.in_port, "Flooded frame");
        Ok(())
    }
}
