//! Workflow History Ledger
//!
//! Append-only audit trail. Entries are written alongside every transition
//! and never updated or deleted; the store exposes no API for either.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Kind of action that produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    CaseOpened,
    RecordCreated,
    RecordRevised,
    RecordSubmitted,
    RecordApproved,
    RecordRejected,
    ManualChoice,
    Withdrawal,
    RefundOpened,
    RefundPhaseAdvanced,
    TransferCancelled,
    RefundDeleted,
    ClaimCreated,
    ClaimSubmitted,
    ClaimResponded,
    ClaimClosed,
    DisputedAmountChanged,
    NextActionChanged,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseOpened => "case_opened",
            Self::RecordCreated => "record_created",
            Self::RecordRevised => "record_revised",
            Self::RecordSubmitted => "record_submitted",
            Self::RecordApproved => "record_approved",
            Self::RecordRejected => "record_rejected",
            Self::ManualChoice => "manual_choice",
            Self::Withdrawal => "withdrawal",
            Self::RefundOpened => "refund_opened",
            Self::RefundPhaseAdvanced => "refund_phase_advanced",
            Self::TransferCancelled => "transfer_cancelled",
            Self::RefundDeleted => "refund_deleted",
            Self::ClaimCreated => "claim_created",
            Self::ClaimSubmitted => "claim_submitted",
            Self::ClaimResponded => "claim_responded",
            Self::ClaimClosed => "claim_closed",
            Self::DisputedAmountChanged => "disputed_amount_changed",
            Self::NextActionChanged => "next_action_changed",
        }
    }
}

impl std::str::FromStr for HistoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Self::CaseOpened,
            Self::RecordCreated,
            Self::RecordRevised,
            Self::RecordSubmitted,
            Self::RecordApproved,
            Self::RecordRejected,
            Self::ManualChoice,
            Self::Withdrawal,
            Self::RefundOpened,
            Self::RefundPhaseAdvanced,
            Self::TransferCancelled,
            Self::RefundDeleted,
            Self::ClaimCreated,
            Self::ClaimSubmitted,
            Self::ClaimResponded,
            Self::ClaimClosed,
            Self::DisputedAmountChanged,
            Self::NextActionChanged,
        ];
        all.into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Unknown history action: {}", s))
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: Uuid,
    pub case_id: Uuid,
    pub stage_from: Stage,
    pub stage_to: Stage,
    pub action: HistoryAction,
    pub acted_by: String,
    /// e.g. "objection_decision", "refund_choice"
    pub decision_point: Option<String>,
    pub decision_value: Option<String>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        case_id: Uuid,
        stage_from: Stage,
        stage_to: Stage,
        action: HistoryAction,
        acted_by: &str,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            case_id,
            stage_from,
            stage_to,
            action,
            acted_by: acted_by.to_string(),
            decision_point: None,
            decision_value: None,
            note: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_decision(mut self, point: impl Into<String>, value: impl Into<String>) -> Self {
        self.decision_point = Some(point.into());
        self.decision_value = Some(value.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_transition(&self) -> bool {
        self.stage_from != self.stage_to
    }
}

/// Decision point name used in history for a decision-bearing stage
pub fn decision_point(stage: Stage) -> &'static str {
    match stage {
        Stage::Assessment => "assessment_route",
        Stage::ObjectionDecision => "objection_decision",
        Stage::AppealDecision => "appeal_decision",
        Stage::SupremeCourtDecision => "supreme_court_decision",
        _ => "stage_approval",
    }
}
