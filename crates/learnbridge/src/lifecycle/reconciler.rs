//! Rule-removal reconciler.

use bridge_types::MacAddress;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::admission::AdmissionController;
use crate::clock::Clock;
use crate::conntrack::{ConnectionKey, ConnectionTracker};
use crate::platform::{AppId, Platform, PlatformResult, RuleEvent, RuleEventType, RuleId};
use crate::stats::{BridgeStats, StatsLogger};

/// What a removal event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not a removal, not ours, or no MAC pair in the match.
    Ignored,
    Reconciled {
        /// The pair was removed from the admission index.
        pair_retired: bool,
        /// A finalized connection was written to the stats log.
        connection_logged: bool,
    },
}

pub struct FlowLifecycleReconciler {
    app_id: AppId,
    platform: Arc<dyn Platform>,
    admission: Arc<AdmissionController>,
    tracker: Arc<ConnectionTracker>,
    logger: Arc<StatsLogger>,
    stats: Arc<BridgeStats>,
    clock: Arc<dyn Clock>,
}

impl FlowLifecycleReconciler {
    pub fn new(
        app_id: AppId,
        platform: Arc<dyn Platform>,
        admission: Arc<AdmissionController>,
        tracker: Arc<ConnectionTracker>,
        logger: Arc<StatsLogger>,
        stats: Arc<BridgeStats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            app_id,
            platform,
            admission,
            tracker,
            logger,
            stats,
            clock,
        }
    }

    /// Processes one rule notification.
    ///
    /// TCP teardown runs first so the record being closed does not count as
    /// evidence that the pair is still live.
    #[instrument(skip_all, fields(rule_id = event.rule_id, switch = %event.switch))]
    pub async fn handle_rule_removed(&self, event: &RuleEvent) -> ReconcileOutcome {
        if event.event_type != RuleEventType::Removed {
            return ReconcileOutcome::Ignored;
        }
        if event.app_id != self.app_id {
            debug!(app = %event.app_id, "Ignoring removal of foreign rule");
            return ReconcileOutcome::Ignored;
        }
        let Some((src, dst)) = event.selector.mac_pair() else {
            debug!(selector = %event.selector, "Removed rule has no MAC pair");
            return ReconcileOutcome::Ignored;
        };

        // Read before the liveness query so a re-admission racing with it
        // keeps the slot.
        let generation = self.admission.generation(&src, &dst);
        let connection_logged = self.teardown(event);

        let live = match self.other_rule_live(event.rule_id, &src, &dst).await {
            Ok(live) => live,
            Err(e) => {
                warn!(src = %src, dst = %dst, error = %e, "Rule query failed, keeping pair active");
                true
            }
        };
        let open = self.tracker.has_open_between(&src, &dst);

        let pair_retired = match generation {
            Some(generation) if !live && !open => self.admission.retire(&src, &dst, generation),
            _ => false,
        };
        if pair_retired {
            BridgeStats::incr(&self.stats.pairs_retired);
            info!(src = %src, dst = %dst, "Retired destination after rule expiry");
        } else {
            debug!(src = %src, dst = %dst, live, open, "Pair still active");
        }

        ReconcileOutcome::Reconciled {
            pair_retired,
            connection_logged,
        }
    }

    fn teardown(&self, event: &RuleEvent) -> bool {
        if !event.selector.has_tcp_ports() {
            return false;
        }
        let Some(key) = ConnectionKey::from_match(&event.selector) else {
            return false;
        };

        let now = self.clock.now();
        match self.tracker.finalize(&key, now) {
            Some(record) => {
                info!(
                    connection = %key,
                    duration_ms = record.duration_ms(now),
                    bytes = event.bytes,
                    packets = event.packets,
                    "TCP connection closed"
                );
                let logged = self
                    .logger
                    .log_connection(now, &key, &record, event.bytes, event.packets);
                if logged {
                    BridgeStats::incr(&self.stats.connections_logged);
                }
                logged
            }
            None => {
                warn!(connection = %key, "No tracked connection for removed TCP rule");
                false
            }
        }
    }

    /// Looks for another rule of ours matching the pair on any known switch.
    async fn other_rule_live(
        &self,
        removed: RuleId,
        src: &MacAddress,
        dst: &MacAddress,
    ) -> PlatformResult<bool> {
        for switch in self.platform.query_known_switches().await? {
            let rules = self.platform.query_installed_rules(&switch).await?;
            let live = rules.iter().any(|r| {
                r.rule_id != removed && r.app_id == self.app_id && r.selector.matches_pair(src, dst)
            });
            if live {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
