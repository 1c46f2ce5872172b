use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Metadata key holding the failure reason of a cancelled flow
pub const FLOW_ERROR_KEY: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Approve,
    /// Off-chain typed-data signature, no transaction
    Signature,
    Swap,
    Bridge,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Approve => "approve",
            StepKind::Signature => "signature",
            StepKind::Swap => "swap",
            StepKind::Bridge => "bridge",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Confirmed | StepStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Complete,
    Cancelled,
    Expired,
}

/// One on-chain transaction or off-chain signature within a flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStep {
    /// 1-based position in the flow
    pub step_number: u32,
    pub kind: StepKind,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub status: StepStatus,

    /// Transaction hash, or signature for signature steps
    #[serde(default)]
    pub tx_hash: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

impl TransactionStep {
    /// Planned step with its payload filled in later by the assembler
    pub fn planned(kind: StepKind, to: Address) -> Self {
        Self {
            step_number: 0,
            kind,
            to,
            data: Bytes::new(),
            value: U256::ZERO,
            gas_limit: None,
            status: StepStatus::Pending,
            tx_hash: None,
            error: None,
        }
    }

    pub fn with_payload(mut self, data: Bytes, value: U256, gas_limit: Option<u64>) -> Self {
        self.data = data;
        self.value = value;
        self.gas_limit = gas_limit;
        self
    }

    pub fn is_outstanding(&self) -> bool {
        matches!(self.status, StepStatus::Pending | StepStatus::Submitted)
    }
}

/// Ordered, resumable sequence of steps owned by one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFlow {
    pub id: String,
    pub wallet: Address,
    pub chain_id: u64,
    pub steps: Vec<TransactionStep>,

    /// 0-based index of the step currently outstanding
    pub current_step: usize,
    pub status: FlowStatus,
    pub metadata: HashMap<String, String>,
    pub created_at_ms: u64,
}

impl TransactionFlow {
    /// Create an active flow; steps are renumbered from 1 and reset to pending
    pub fn new(
        id: impl Into<String>,
        wallet: Address,
        chain_id: u64,
        steps: Vec<TransactionStep>,
        metadata: HashMap<String, String>,
        created_at_ms: u64,
    ) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(i, mut step)| {
                step.step_number = i as u32 + 1;
                step.status = StepStatus::Pending;
                step.tx_hash = None;
                step.error = None;
                step
            })
            .collect::<Vec<_>>();

        let status = if steps.is_empty() {
            FlowStatus::Complete
        } else {
            FlowStatus::Active
        };

        Self {
            id: id.into(),
            wallet,
            chain_id,
            steps,
            current_step: 0,
            status,
            metadata,
            created_at_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FlowStatus::Active
    }

    /// Current outstanding step; never a later step while an earlier one is unconfirmed
    pub fn next_step(&self) -> Option<&TransactionStep> {
        if !self.is_active() {
            return None;
        }
        self.steps
            .get(self.current_step)
            .filter(|step| step.is_outstanding())
    }

    pub fn next_step_mut(&mut self) -> Option<&mut TransactionStep> {
        if !self.is_active() {
            return None;
        }
        self.steps
            .get_mut(self.current_step)
            .filter(|step| step.is_outstanding())
    }

    /// Move the current step from pending to submitted
    pub fn mark_submitted(&mut self, tx_hash: &str) -> bool {
        match self.next_step_mut() {
            Some(step) if step.status == StepStatus::Pending => {
                step.status = StepStatus::Submitted;
                step.tx_hash = Some(tx_hash.to_string());
                true
            }
            _ => false,
        }
    }

    /// Record the outcome of the current step. Returns false without mutating
    /// when the flow is not active, nothing is outstanding, or `tx_hash` was
    /// already recorded on a terminal step.
    pub fn complete_current(&mut self, tx_hash: &str, success: bool, error: Option<String>) -> bool {
        if self.steps.iter().any(|s| {
            s.status.is_terminal() && s.tx_hash.as_deref() == Some(tx_hash)
        }) {
            return false;
        }

        let Some(step) = self.next_step_mut() else {
            return false;
        };

        step.tx_hash = Some(tx_hash.to_string());
        if success {
            step.status = StepStatus::Confirmed;
            self.current_step += 1;
            if self.steps.iter().all(|s| s.status == StepStatus::Confirmed) {
                self.status = FlowStatus::Complete;
            }
        } else {
            let reason = error.unwrap_or_else(|| "step failed".to_string());
            step.status = StepStatus::Failed;
            step.error = Some(reason.clone());
            self.metadata.insert(FLOW_ERROR_KEY.to_string(), reason);
            self.status = FlowStatus::Cancelled;
        }
        true
    }

    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.status = FlowStatus::Cancelled;
        true
    }

    /// Expire an active flow older than `max_age_ms`
    pub fn expire_if_stale(&mut self, now_ms: u64, max_age_ms: u64) -> bool {
        if self.is_active() && now_ms.saturating_sub(self.created_at_ms) >= max_age_ms {
            self.status = FlowStatus::Expired;
            return true;
        }
        false
    }

    pub fn meta(&self) -> FlowMeta {
        let current = self.next_step();
        FlowMeta {
            flow_id: self.id.clone(),
            current_step: current.map(|s| s.step_number).unwrap_or(self.steps.len() as u32),
            total_steps: self.steps.len() as u32,
            step_type: current.map(|s| s.kind),
        }
    }

    /// Record for the current step, if one is outstanding
    pub fn step_record(&self) -> Option<StepRecord> {
        self.next_step().map(|step| StepRecord {
            to: format!("{:#x}", step.to),
            data: step.data.to_string(),
            value: step.value.to_string(),
            gas_limit: step.gas_limit.map(|g| g.to_string()),
            chain_id: self.chain_id,
            flow: self.meta(),
        })
    }
}

/// Multi-step flow step record handed to outer layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub to: String,
    pub data: String,
    pub value: String,
    pub gas_limit: Option<String>,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    pub flow: FlowMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMeta {
    pub flow_id: String,
    /// 1-based number of the outstanding step
    pub current_step: u32,
    pub total_steps: u32,
    pub step_type: Option<StepKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approve_swap_flow() -> TransactionFlow {
        TransactionFlow::new(
            "flow-1",
            Address::repeat_byte(0x11),
            1,
            vec![
                TransactionStep::planned(StepKind::Approve, Address::repeat_byte(0xaa)),
                TransactionStep::planned(StepKind::Swap, Address::repeat_byte(0xbb)),
            ],
            HashMap::new(),
            1_000,
        )
    }

    #[test]
    fn test_steps_numbered_from_one() {
        let flow = approve_swap_flow();
        let numbers: Vec<_> = flow.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(flow.next_step().map(|s| s.kind), Some(StepKind::Approve));
    }

    #[test]
    fn test_approve_then_swap_completes() {
        let mut flow = approve_swap_flow();
        assert!(flow.complete_current("0xaaa", true, None));
        assert_eq!(flow.next_step().map(|s| s.kind), Some(StepKind::Swap));
        assert!(flow.complete_current("0xbbb", true, None));
        assert!(flow.next_step().is_none());
        assert_eq!(flow.status, FlowStatus::Complete);
    }

    #[test]
    fn test_repeat_completion_is_noop() {
        let mut flow = approve_swap_flow();
        assert!(flow.complete_current("0xaaa", true, None));
        assert!(!flow.complete_current("0xaaa", true, None));
        assert_eq!(flow.next_step().map(|s| s.kind), Some(StepKind::Swap));
        assert_eq!(flow.steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_failed_step_cancels_flow() {
        let mut flow = approve_swap_flow();
        assert!(flow.complete_current("0xaaa", false, Some("reverted".into())));
        assert_eq!(flow.status, FlowStatus::Cancelled);
        assert_eq!(flow.steps[0].status, StepStatus::Failed);
        assert_eq!(flow.metadata.get(FLOW_ERROR_KEY).map(String::as_str), Some("reverted"));
        assert!(flow.next_step().is_none());
        assert!(!flow.complete_current("0xccc", true, None));
    }

    #[test]
    fn test_submit_then_confirm() {
        let mut flow = approve_swap_flow();
        assert!(flow.mark_submitted("0xaaa"));
        assert!(!flow.mark_submitted("0xaaa"));
        assert_eq!(flow.next_step().map(|s| s.status), Some(StepStatus::Submitted));
        assert!(flow.complete_current("0xaaa", true, None));
        assert_eq!(flow.meta().current_step, 2);
    }

    #[test]
    fn test_cancel_and_expire() {
        let mut flow = approve_swap_flow();
        assert!(!flow.expire_if_stale(1_500, 1_000));
        assert!(flow.expire_if_stale(2_000, 1_000));
        assert_eq!(flow.status, FlowStatus::Expired);
        assert!(!flow.cancel());

        let mut flow = approve_swap_flow();
        assert!(flow.cancel());
        assert!(!flow.cancel());
    }

    #[test]
    fn test_step_record_shape() {
        let flow = approve_swap_flow();
        let record = flow.step_record().unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["chainId"], 1);
        assert_eq!(json["flow"]["flow_id"], "flow-1");
        assert_eq!(json["flow"]["current_step"], 1);
        assert_eq!(json["flow"]["total_steps"], 2);
        assert_eq!(json["flow"]["step_type"], "approve");
    }
}
