//! In-memory platform.
//!
//! Keeps an installed-rule table per switch and, unless turned off, records
//! every packet-out, so callers can drive the engine without a real control
//! plane and then inspect what it asked for. Rule expiry is explicit: the caller removes
//! rules and feeds the returned [`RuleEvent`]s back into the engine.

use async_trait::async_trait;
use bridge_types::{MacAddress, PortNumber, SwitchId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::types::{AppId, InboundFrame, InstalledRule, RuleEvent, RuleId};
use super::{Platform, PlatformError, PlatformResult};
use crate::rule::ForwardingRule;

/// A recorded packet-out request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOut {
    Flood {
        switch: SwitchId,
        in_port: PortNumber,
    },
    Forward {
        switch: SwitchId,
        in_port: PortNumber,
        port: PortNumber,
    },
}

#[derive(Debug, Default)]
struct MemoryState {
    switches: BTreeSet<SwitchId>,
    rules: BTreeMap<RuleId, InstalledRule>,
    packet_outs: Vec<PacketOut>,
}

/// Platform implementation backed by in-process tables.
#[derive(Debug)]
pub struct MemoryPlatform {
    state: Mutex<MemoryState>,
    next_rule_id: AtomicU64,
    install_attempts: AtomicU64,
    fail_installs: AtomicBool,
    fail_queries: AtomicBool,
    record_packet_outs: AtomicBool,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            next_rule_id: AtomicU64::new(1),
            install_attempts: AtomicU64::new(0),
            fail_installs: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            record_packet_outs: AtomicBool::new(true),
        }
    }

    /// Registers a switch so it shows up in `query_known_switches`.
    pub fn add_switch(&self, switch: SwitchId) {
        self.state.lock().switches.insert(switch);
    }

    /// Makes every subsequent `install_rule` call fail.
    pub fn set_fail_installs(&self, fail: bool) {
        self.fail_installs.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent rule/switch query fail.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Turns the packet-out log on or off. On by default.
    pub fn set_record_packet_outs(&self, record: bool) {
        self.record_packet_outs.store(record, Ordering::SeqCst);
    }

    /// Number of `install_rule` calls, successful or not.
    pub fn install_attempts(&self) -> u64 {
        self.install_attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of all installed rules, ordered by rule id.
    pub fn installed_rules(&self) -> Vec<InstalledRule> {
        self.state.lock().rules.values().cloned().collect()
    }

    /// Snapshot of all packet-out requests, in arrival order.
    pub fn packet_outs(&self) -> Vec<PacketOut> {
        self.state.lock().packet_outs.clone()
    }

    /// Adds traffic to a rule's counters.
    pub fn add_counters(&self, rule_id: RuleId, bytes: u64, packets: u64) -> bool {
        match self.state.lock().rules.get_mut(&rule_id) {
            Some(rule) => {
                rule.bytes += bytes;
                rule.packets += packets;
                true
            }
            None => false,
        }
    }

    /// Removes one rule, returning the removal notification for it.
    pub fn remove_rule(&self, rule_id: RuleId) -> Option<RuleEvent> {
        self.state
            .lock()
            .rules
            .remove(&rule_id)
            .map(|rule| RuleEvent::removed(&rule))
    }

    /// Removes every rule accepted by `filter`, returning their removal
    /// notifications in rule id order.
    pub fn remove_where<F>(&self, filter: F) -> Vec<RuleEvent>
    where
        F: Fn(&InstalledRule) -> bool,
    {
        let mut state = self.state.lock();
        let ids: Vec<RuleId> = state
            .rules
            .values()
            .filter(|r| filter(r))
            .map(|r| r.rule_id)
            .collect();

        ids.iter()
            .filter_map(|id| state.rules.remove(id))
            .map(|rule| RuleEvent::removed(&rule))
            .collect()
    }

    /// Removes every rule matching the MAC pair (on one switch, or all).
    pub fn remove_matching(
        &self,
        switch: Option<&SwitchId>,
        src: &MacAddress,
        dst: &MacAddress,
    ) -> Vec<RuleEvent> {
        self.remove_where(|r| {
            switch.map_or(true, |s| &r.switch == s) && r.selector.matches_pair(src, dst)
        })
    }

    /// Idle-expires every rule that is not permanent.
    pub fn expire_all(&self) -> Vec<RuleEvent> {
        self.remove_where(|r| !r.permanent)
    }

    fn record(&self, switch: &SwitchId, packet_out: PacketOut) {
        let mut state = self.state.lock();
        if !state.switches.contains(switch) {
            state.switches.insert(switch.clone());
        }
        if self.record_packet_outs.load(Ordering::SeqCst) {
            state.packet_outs.push(packet_out);
        }
    }

    fn check_queries(&self) -> PlatformResult<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(PlatformError::Query("query failure injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn flood_frame(&self, frame: &InboundFrame) -> PlatformResult<()> {
        self.record(
            &frame.switch,
            PacketOut::Flood {
                switch: frame.switch.clone(),
                in_port: frame.in_port,
            },
        );
        Ok(())
    }

    async fn forward_frame(&self, frame: &InboundFrame, port: PortNumber) -> PlatformResult<()> {
        self.record(
            &frame.switch,
            PacketOut::Forward {
                switch: frame.switch.clone(),
                in_port: frame.in_port,
                port,
            },
        );
        Ok(())
    }

    async fn install_rule(&self, rule: &ForwardingRule) -> PlatformResult<RuleId> {
        self.install_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_installs.load(Ordering::SeqCst) {
            return Err(PlatformError::InstallRejected(format!(
                "installation failure injected for {}",
                rule.switch
            )));
        }

        let mut state = self.state.lock();
        state.switches.insert(rule.switch.clone());

        // Same switch, selector and priority identifies the same rule.
        let existing = state
            .rules
            .values_mut()
            .find(|r| {
                r.switch == rule.switch
                    && r.selector == rule.selector
                    && r.priority == rule.priority
            });
        if let Some(existing) = existing {
            existing.output = rule.output;
            existing.app_id = rule.app_id.clone();
            existing.timeout_secs = rule.timeout_secs;
            existing.permanent = rule.permanent;
            return Ok(existing.rule_id);
        }

        let rule_id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
        state.rules.insert(
            rule_id,
            InstalledRule {
                rule_id,
                switch: rule.switch.clone(),
                app_id: rule.app_id.clone(),
                selector: rule.selector.clone(),
                output: rule.output,
                priority: rule.priority,
                timeout_secs: rule.timeout_secs,
                permanent: rule.permanent,
                bytes: 0,
                packets: 0,
            },
        );
        Ok(rule_id)
    }

    async fn query_installed_rules(&self, switch: &SwitchId) -> PlatformResult<Vec<InstalledRule>> {
        self.check_queries()?;
        Ok(self
            .state
            .lock()
            .rules
            .values()
            .filter(|r| &r.switch == switch)
            .cloned()
            .collect())
    }

    async fn query_known_switches(&self) -> PlatformResult<Vec<SwitchId>> {
        self.check_queries()?;
        Ok(self.state.lock().switches.iter().cloned().collect())
    }

    async fn remove_all_rules_owned_by(&self, app_id: &AppId) -> PlatformResult<usize> {
        let mut state = self.state.lock();
        let before = state.rules.len();
        state.rules.retain(|_, r| &r.app_id != app_id);
        Ok(before - state.rules.len())
    }
}
