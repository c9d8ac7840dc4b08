//! Workflow Stages
//!
//! The sixteen ordinal stages of a tax dispute case, grouped into tracks.
//! Numbering is canonical: 12 is the supreme court decision and 13 is the
//! bank transfer request that every refund route lands on.

use serde::{Deserialize, Serialize};

/// One ordinal step in a case's administrative lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    Filing = 1,
    FieldAuditNotice = 2,
    AuditResultLetter = 3,
    Assessment = 4,
    ObjectionFiling = 5,
    ObjectionResponseReceipt = 6,
    ObjectionDecision = 7,
    AppealFiling = 8,
    AppealExplanationRequest = 9,
    AppealDecision = 10,
    SupremeCourtFiling = 11,
    SupremeCourtDecision = 12,
    BankTransferRequest = 13,
    TransferInstruction = 14,
    RefundReceived = 15,
    Closed = 16,
}

/// Group of stages that belong to one administrative proceeding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Filing,
    Objection,
    Appeal,
    SupremeCourt,
    Refund,
    Terminal,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Track::Filing => "filing",
            Track::Objection => "objection",
            Track::Appeal => "appeal",
            Track::SupremeCourt => "supreme_court",
            Track::Refund => "refund",
            Track::Terminal => "terminal",
        }
    }
}

impl Stage {
    pub const ALL: [Stage; 16] = [
        Stage::Filing,
        Stage::FieldAuditNotice,
        Stage::AuditResultLetter,
        Stage::Assessment,
        Stage::ObjectionFiling,
        Stage::ObjectionResponseReceipt,
        Stage::ObjectionDecision,
        Stage::AppealFiling,
        Stage::AppealExplanationRequest,
        Stage::AppealDecision,
        Stage::SupremeCourtFiling,
        Stage::SupremeCourtDecision,
        Stage::BankTransferRequest,
        Stage::TransferInstruction,
        Stage::RefundReceived,
        Stage::Closed,
    ];

    /// Stages whose outcome determines the next stage
    pub const DECISION_BEARING: [Stage; 4] = [
        Stage::Assessment,
        Stage::ObjectionDecision,
        Stage::AppealDecision,
        Stage::SupremeCourtDecision,
    ];

    /// Where every refund route lands
    pub const REFUND_ENTRY: Stage = Stage::BankTransferRequest;

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Stage> {
        Stage::ALL.get(usize::from(id).checked_sub(1)?).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Filing => "Filing",
            Stage::FieldAuditNotice => "Field Audit Notice",
            Stage::AuditResultLetter => "Audit Result Letter",
            Stage::Assessment => "Assessment",
            Stage::ObjectionFiling => "Objection Filing",
            Stage::ObjectionResponseReceipt => "Objection Response Receipt",
            Stage::ObjectionDecision => "Objection Decision",
            Stage::AppealFiling => "Appeal Filing",
            Stage::AppealExplanationRequest => "Appeal Explanation Request",
            Stage::AppealDecision => "Appeal Decision",
            Stage::SupremeCourtFiling => "Supreme Court Filing",
            Stage::SupremeCourtDecision => "Supreme Court Decision",
            Stage::BankTransferRequest => "Bank Transfer Request",
            Stage::TransferInstruction => "Transfer Instruction Received",
            Stage::RefundReceived => "Refund Received",
            Stage::Closed => "Closed",
        }
    }

    pub fn track(self) -> Track {
        match self.id() {
            1..=4 => Track::Filing,
            5..=7 => Track::Objection,
            8..=10 => Track::Appeal,
            11 | 12 => Track::SupremeCourt,
            13..=15 => Track::Refund,
            _ => Track::Terminal,
        }
    }

    pub fn is_decision_bearing(self) -> bool {
        Stage::DECISION_BEARING.contains(&self)
    }

    /// Stages a case may pass over without a record
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Stage::FieldAuditNotice
                | Stage::AuditResultLetter
                | Stage::ObjectionResponseReceipt
                | Stage::AppealExplanationRequest
        )
    }

    /// Whether a stage record can exist for this stage. Refund-path stages
    /// mirror refund phases and are never submitted directly.
    pub fn carries_record(self) -> bool {
        self.id() <= Stage::SupremeCourtDecision.id()
    }

    pub fn next(self) -> Option<Stage> {
        Stage::from_id(self.id() + 1)
    }

    /// Whether a record for `self` may be submitted while the case sits at
    /// `current`: no going back, and only optional stages may be skipped.
    pub fn accepts_submission_at(self, current: Stage) -> bool {
        if !self.carries_record() || self < current {
            return false;
        }
        Stage::ALL
            .iter()
            .filter(|s| **s >= current && **s < self)
            .all(|s| s.is_optional())
    }

    /// The decision stage that opened this stage's track. Withdrawal rewinds
    /// to it.
    pub fn track_origin(self) -> Option<Stage> {
        match self.track() {
            Track::Objection => Some(Stage::Assessment),
            Track::Appeal => Some(Stage::ObjectionDecision),
            Track::SupremeCourt => Some(Stage::AppealDecision),
            _ => None,
        }
    }

    /// The decision-bearing stage closing this stage's track
    pub fn track_decision(self) -> Option<Stage> {
        match self.track() {
            Track::Filing => Some(Stage::Assessment),
            Track::Objection => Some(Stage::ObjectionDecision),
            Track::Appeal => Some(Stage::AppealDecision),
            Track::SupremeCourt => Some(Stage::SupremeCourtDecision),
            _ => None,
        }
    }

    pub fn is_refund_path(self) -> bool {
        self.track() == Track::Refund
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id(), self.name())
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Stage::from_id(id).ok_or_else(|| format!("Unknown stage: {} (expected 1-16)", id))
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        stage.id()
    }
}
