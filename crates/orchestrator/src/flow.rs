use alloy::primitives::Address;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use swap_engine_types::{
    now_millis, FlowStatus, StepKind, TransactionFlow, TransactionStep, FLOW_ERROR_KEY,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Point-in-time view of a wallet's flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow_id: String,
    pub wallet: String,
    pub chain_id: u64,
    pub status: FlowStatus,
    /// 1-based number of the outstanding step, or the step count when none is
    pub current_step: u32,
    pub total_steps: u32,
    pub step_type: Option<StepKind>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&TransactionFlow> for FlowSummary {
    fn from(flow: &TransactionFlow) -> Self {
        let meta = flow.meta();
        Self {
            flow_id: flow.id.clone(),
            wallet: format!("{:#x}", flow.wallet),
            chain_id: flow.chain_id,
            status: flow.status,
            current_step: meta.current_step,
            total_steps: meta.total_steps,
            step_type: meta.step_type,
            error: flow.metadata.get(FLOW_ERROR_KEY).cloned(),
            created_at: Utc
                .timestamp_millis_opt(flow.created_at_ms as i64)
                .single()
                .unwrap_or_default(),
        }
    }
}

/// In-memory flow store keyed by wallet, holding at most one flow per wallet
#[derive(Debug, Default)]
pub struct FlowStore {
    flows: DashMap<Address, TransactionFlow>,
}

impl FlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flow for `wallet`, atomically replacing any previous one.
    ///
    /// Returns the new flow and the one it replaced.
    pub fn create(
        &self,
        wallet: Address,
        chain_id: u64,
        steps: Vec<TransactionStep>,
        metadata: HashMap<String, String>,
    ) -> (TransactionFlow, Option<TransactionFlow>) {
        let flow = TransactionFlow::new(
            Uuid::new_v4().to_string(),
            wallet,
            chain_id,
            steps,
            metadata,
            now_millis(),
        );
        let replaced = self.flows.insert(wallet, flow.clone());

        if let Some(previous) = &replaced {
            info!(
                wallet = %wallet,
                previous_flow = %previous.id,
                previous_status = ?previous.status,
                "Replacing existing flow"
            );
        }
        info!(wallet = %wallet, flow_id = %flow.id, steps = flow.steps.len(), "Created flow");
        (flow, replaced)
    }

    pub fn get(&self, wallet: &Address) -> Option<TransactionFlow> {
        self.flows.get(wallet).map(|flow| flow.clone())
    }

    /// First pending or submitted step of the wallet's active flow
    pub fn next_step(&self, wallet: &Address) -> Option<TransactionStep> {
        self.flows.get(wallet)?.next_step().cloned()
    }

    pub fn mark_submitted(&self, wallet: &Address, tx_hash: &str) -> bool {
        match self.flows.get_mut(wallet) {
            Some(mut flow) => flow.mark_submitted(tx_hash),
            None => false,
        }
    }

    /// Record the current step's outcome. Returns the flow as it stood right
    /// after the update, or `None` when there was nothing to record.
    pub fn complete_step(
        &self,
        wallet: &Address,
        tx_hash: &str,
        success: bool,
        error: Option<String>,
    ) -> Option<TransactionFlow> {
        let mut flow = self.flows.get_mut(wallet)?;
        if !flow.complete_current(tx_hash, success, error) {
            return None;
        }
        debug!(wallet = %wallet, flow_id = %flow.id, status = ?flow.status, success, "Step completed");
        Some(flow.clone())
    }

    /// Cancel the wallet's active flow, returning it as cancelled
    pub fn cancel(&self, wallet: &Address) -> Option<TransactionFlow> {
        let mut flow = self.flows.get_mut(wallet)?;
        flow.cancel().then(|| flow.clone())
    }

    pub fn status(&self, wallet: &Address) -> Option<FlowSummary> {
        self.flows.get(wallet).map(|flow| FlowSummary::from(&*flow))
    }

    /// Expire active flows older than `max_age`; returns the ids expired
    pub fn expire_stale(&self, max_age: Duration) -> Vec<String> {
        let now = now_millis();
        let max_age_ms = max_age.as_millis() as u64;
        let mut expired = Vec::new();
        for mut flow in self.flows.iter_mut() {
            if flow.expire_if_stale(now, max_age_ms) {
                expired.push(flow.id.clone());
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale flows");
        }
        expired
    }

    /// Mutate the outstanding step, but only while `flow_id` is still the
    /// wallet's flow and the step is still the one outstanding
    pub fn update_current_step<F>(&self, wallet: &Address, flow_id: &str, step_number: u32, update: F) -> bool
    where
        F: FnOnce(&mut TransactionStep),
    {
        let Some(mut flow) = self.flows.get_mut(wallet) else {
            return false;
        };
        if flow.id != flow_id {
            return false;
        }
        match flow.next_step_mut() {
            Some(step) if step.step_number == step_number => {
                update(step);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.flows.iter().filter(|flow| flow.is_active()).count()
    }
}
