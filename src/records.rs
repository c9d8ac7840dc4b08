//! Stage Records
//!
//! One record per (case, stage). The payload enum carries the fields that
//! differ between stages; status and audit columns are shared.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, FieldError, Validator};
use crate::stage::Stage;

/// Lifecycle status of a stage record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Withdrawn,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Payload may still change
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Rejected)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            _ => Err(format!("Unknown record status: {}", s)),
        }
    }
}

/// Outcome recorded on a decision-bearing stage. Routing lives in
/// [`crate::router`], not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum DecisionType {
    Granted,
    PartiallyGranted,
    Rejected,
    /// Underpayment assessment upheld against the taxpayer
    SkpKb,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::PartiallyGranted => "partially_granted",
            Self::Rejected => "rejected",
            Self::SkpKb => "skp_kb",
        }
    }
}

impl std::fmt::Display for DecisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for DecisionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "granted" => Ok(Self::Granted),
            "partially_granted" => Ok(Self::PartiallyGranted),
            "rejected" => Ok(Self::Rejected),
            "skp_kb" => Ok(Self::SkpKb),
            _ => Err(format!(
                "Unknown decision type: {} (expected granted, partially_granted, rejected, skp_kb)",
                s
            )),
        }
    }
}

/// Explicit routing choice made at assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentRoute {
    Refund,
    Objection,
}

impl AssessmentRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund => "refund",
            Self::Objection => "objection",
        }
    }
}

impl std::str::FromStr for AssessmentRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refund" => Ok(Self::Refund),
            "objection" => Ok(Self::Objection),
            _ => Err(format!(
                "Unknown assessment route: {} (expected refund or objection)",
                s
            )),
        }
    }
}

/// Stage-specific content of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage_kind")]
pub enum StagePayload {
    Filing {
        reported_amount: Decimal,
        filed_on: Option<NaiveDate>,
    },
    FieldAuditNotice {
        letter_number: String,
        issued_on: Option<NaiveDate>,
    },
    AuditResultLetter {
        letter_number: String,
        corrected_amount: Decimal,
    },
    Assessment {
        assessment_number: String,
        assessed_amount: Decimal,
        /// Required before approval
        route_choice: Option<AssessmentRoute>,
    },
    ObjectionFiling {
        objected_amount: Decimal,
        filed_on: Option<NaiveDate>,
    },
    ObjectionResponseReceipt {
        letter_number: String,
        received_on: Option<NaiveDate>,
    },
    ObjectionDecision {
        decision_type: DecisionType,
        decision_amount: Decimal,
    },
    AppealFiling {
        appealed_amount: Decimal,
        filed_on: Option<NaiveDate>,
    },
    AppealExplanationRequest {
        requested_on: Option<NaiveDate>,
        response_due: Option<NaiveDate>,
    },
    AppealDecision {
        decision_type: DecisionType,
        decision_amount: Decimal,
    },
    SupremeCourtFiling {
        claimed_amount: Decimal,
        filed_on: Option<NaiveDate>,
    },
    SupremeCourtDecision {
        decision_type: DecisionType,
        decision_amount: Decimal,
    },
}

impl StagePayload {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Filing { .. } => Stage::Filing,
            Self::FieldAuditNotice { .. } => Stage::FieldAuditNotice,
            Self::AuditResultLetter { .. } => Stage::AuditResultLetter,
            Self::Assessment { .. } => Stage::Assessment,
            Self::ObjectionFiling { .. } => Stage::ObjectionFiling,
            Self::ObjectionResponseReceipt { .. } => Stage::ObjectionResponseReceipt,
            Self::ObjectionDecision { .. } => Stage::ObjectionDecision,
            Self::AppealFiling { .. } => Stage::AppealFiling,
            Self::AppealExplanationRequest { .. } => Stage::AppealExplanationRequest,
            Self::AppealDecision { .. } => Stage::AppealDecision,
            Self::SupremeCourtFiling { .. } => Stage::SupremeCourtFiling,
            Self::SupremeCourtDecision { .. } => Stage::SupremeCourtDecision,
        }
    }

    /// The monetary amount this stage is about, if any
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            Self::Filing {
                reported_amount, ..
            } => Some(*reported_amount),
            Self::AuditResultLetter {
                corrected_amount, ..
            } => Some(*corrected_amount),
            Self::Assessment {
                assessed_amount, ..
            } => Some(*assessed_amount),
            Self::ObjectionFiling {
                objected_amount, ..
            } => Some(*objected_amount),
            Self::AppealFiling {
                appealed_amount, ..
            } => Some(*appealed_amount),
            Self::SupremeCourtFiling { claimed_amount, .. } => Some(*claimed_amount),
            Self::ObjectionDecision {
                decision_amount, ..
            }
            | Self::AppealDecision {
                decision_amount, ..
            }
            | Self::SupremeCourtDecision {
                decision_amount, ..
            } => Some(*decision_amount),
            Self::FieldAuditNotice { .. }
            | Self::ObjectionResponseReceipt { .. }
            | Self::AppealExplanationRequest { .. } => None,
        }
    }

    pub fn decision_type(&self) -> Option<DecisionType> {
        match self {
            Self::ObjectionDecision { decision_type, .. }
            | Self::AppealDecision { decision_type, .. }
            | Self::SupremeCourtDecision { decision_type, .. } => Some(*decision_type),
            _ => None,
        }
    }

    pub fn assessment_route(&self) -> Option<AssessmentRoute> {
        match self {
            Self::Assessment { route_choice, .. } => *route_choice,
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let mut v = Validator::new();
        if let Some(amount) = self.amount() {
            v.non_negative(amount, amount_field(self));
        }
        match self {
            Self::FieldAuditNotice { letter_number, .. }
            | Self::AuditResultLetter { letter_number, .. }
            | Self::ObjectionResponseReceipt { letter_number, .. } => {
                v.check(
                    !letter_number.trim().is_empty(),
                    "letter_number",
                    "is required",
                );
            }
            Self::Assessment {
                assessment_number, ..
            } => {
                v.check(
                    !assessment_number.trim().is_empty(),
                    "assessment_number",
                    "is required",
                );
            }
            Self::AppealExplanationRequest {
                requested_on: Some(requested),
                response_due: Some(due),
            } if due < requested => {
                v.push(FieldError::new(
                    "response_due",
                    "must not be before requested_on",
                ));
            }
            _ => {}
        }
        v.finish()
    }
}

fn amount_field(payload: &StagePayload) -> &'static str {
    match payload {
        StagePayload::Filing { .. } => "reported_amount",
        StagePayload::AuditResultLetter { .. } => "corrected_amount",
        StagePayload::Assessment { .. } => "assessed_amount",
        StagePayload::ObjectionFiling { .. } => "objected_amount",
        StagePayload::AppealFiling { .. } => "appealed_amount",
        StagePayload::SupremeCourtFiling { .. } => "claimed_amount",
        _ => "decision_amount",
    }
}

/// A stage record owned by one case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub record_id: Uuid,
    pub case_id: Uuid,
    pub stage: Stage,
    pub status: RecordStatus,
    pub payload: StagePayload,
    /// Set by the router on approval, or by a manual choice
    pub next_stage: Option<Stage>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn new(case_id: Uuid, payload: StagePayload, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::new_v4(),
            case_id,
            stage: payload.stage(),
            status: RecordStatus::Draft,
            payload,
            next_stage: None,
            notes: None,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            decided_by: None,
            decided_at: None,
        }
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.payload.amount()
    }

    pub fn is_approved(&self) -> bool {
        self.status == RecordStatus::Approved
    }

    /// draft -> submitted
    pub fn submit(&mut self) -> Result<(), EngineError> {
        self.require_status(RecordStatus::Draft, "submit")?;
        let now = Utc::now();
        self.status = RecordStatus::Submitted;
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// submitted -> approved or rejected
    pub fn decide(&mut self, status: RecordStatus, by: &str) -> Result<(), EngineError> {
        debug_assert!(matches!(
            status,
            RecordStatus::Approved | RecordStatus::Rejected
        ));
        self.require_status(RecordStatus::Submitted, status.as_str())?;
        let now = Utc::now();
        self.status = status;
        self.decided_by = Some(by.to_string());
        self.decided_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Replace the payload of a draft or rejected record; resets to draft
    pub fn revise(&mut self, payload: StagePayload) -> Result<(), EngineError> {
        if !self.status.is_editable() {
            return Err(EngineError::precondition(format!(
                "{} record is {} and can no longer be edited",
                self.stage.name(),
                self.status
            )));
        }
        if payload.stage() != self.stage {
            return Err(EngineError::field(
                "payload",
                format!("expected a {} payload", self.stage.name()),
            ));
        }
        payload.validate()?;
        self.payload = payload;
        self.status = RecordStatus::Draft;
        self.decided_by = None;
        self.decided_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn withdraw(&mut self) {
        self.status = RecordStatus::Withdrawn;
        self.updated_at = Utc::now();
    }

    fn require_status(&self, expected: RecordStatus, action: &str) -> Result<(), EngineError> {
        if self.status != expected {
            return Err(EngineError::precondition(format!(
                "cannot {} {} record: status is {}, expected {}",
                action,
                self.stage.name(),
                self.status,
                expected
            )));
        }
        Ok(())
    }
}
