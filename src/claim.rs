//! Internal-loss claims (KIAN)
//!
//! At most one claim per (case, eligible stage). The loss amount is a
//! snapshot taken at creation and is never read back for eligibility.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::stage::Stage;

/// Stages that may carry an internal-loss claim
pub const CLAIM_STAGES: [Stage; 4] = [
    Stage::Assessment,
    Stage::ObjectionDecision,
    Stage::AppealDecision,
    Stage::SupremeCourtDecision,
];

pub fn is_claim_stage(stage: Stage) -> bool {
    CLAIM_STAGES.contains(&stage)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Draft,
    Submitted,
    #[serde(alias = "RESPONDED")]
    Responded,
    #[serde(alias = "CLOSED")]
    Closed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Responded => "responded",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "responded" => Ok(Self::Responded),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown claim status: {}", s)),
        }
    }
}

/// What the authority said about the claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Accepted,
    PartiallyAccepted,
    Rejected,
}

impl std::str::FromStr for ResponseOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accepted" => Ok(Self::Accepted),
            "partially_accepted" => Ok(Self::PartiallyAccepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown response outcome: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub outcome: ResponseOutcome,
    pub responded_on: NaiveDate,
    pub acknowledged_amount: Option<Decimal>,
    pub notes: Option<String>,
}

/// An internal-loss claim raised for one stage of a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KianSubmission {
    pub claim_id: Uuid,
    pub case_id: Uuid,
    pub stage: Stage,
    /// Snapshot for audit stability
    pub loss_amount: Decimal,
    pub status: ClaimStatus,
    pub response: Option<ClaimResponse>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl KianSubmission {
    pub fn new(case_id: Uuid, stage: Stage, loss_amount: Decimal, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            claim_id: Uuid::new_v4(),
            case_id,
            stage,
            loss_amount,
            status: ClaimStatus::Draft,
            response: None,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            closed_at: None,
        }
    }

    pub fn submit(&mut self) -> Result<(), EngineError> {
        self.require(ClaimStatus::Draft, "submit")?;
        let now = Utc::now();
        self.status = ClaimStatus::Submitted;
        self.submitted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn record_response(&mut self, response: ClaimResponse) -> Result<(), EngineError> {
        self.require(ClaimStatus::Submitted, "record a response for")?;
        if let Some(amount) = response.acknowledged_amount {
            if amount < Decimal::ZERO || amount > self.loss_amount {
                return Err(EngineError::field(
                    "acknowledged_amount",
                    format!("must be between 0 and the claimed loss {}", self.loss_amount),
                ));
            }
        }
        self.status = ClaimStatus::Responded;
        self.response = Some(response);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        self.require(ClaimStatus::Responded, "close")?;
        let now = Utc::now();
        self.status = ClaimStatus::Closed;
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn require(&self, expected: ClaimStatus, action: &str) -> Result<(), EngineError> {
        if self.status != expected {
            return Err(EngineError::precondition(format!(
                "cannot {} claim at stage {}: status is {}, expected {}",
                action, self.stage, self.status, expected
            )));
        }
        Ok(())
    }
}
