//! Case Aggregate
//!
//! The tax dispute case holds the authoritative stage pointer and the disputed
//! amount. Values that need sibling records (losses, refund totals) are
//! computed over a [`CaseFile`](crate::store::CaseFile), never stored here.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Validator};
use crate::stage::Stage;

/// The two case categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    /// Taxpayer-reported overpayment claim
    Overpayment,
    /// Dispute arising from an audit
    Audit,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overpayment => "overpayment",
            Self::Audit => "audit",
        }
    }
}

impl std::str::FromStr for CaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overpayment" => Ok(Self::Overpayment),
            "audit" => Ok(Self::Audit),
            _ => Err(format!("Unknown case type: {}", s)),
        }
    }
}

/// How a completed case ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    Refunded,
    Rejected,
    Withdrawn,
}

impl CaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refunded => "refunded",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl std::str::FromStr for CaseOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "refunded" => Ok(Self::Refunded),
            "rejected" => Ok(Self::Rejected),
            "withdrawn" => Ok(Self::Withdrawn),
            _ => Err(format!("Unknown case outcome: {}", s)),
        }
    }
}

/// A tax dispute case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub case_type: CaseType,
    pub tax_type: String,
    pub fiscal_period: String,
    pub reported_amount: Decimal,
    /// Starts equal to `reported_amount`
    pub disputed_amount: Decimal,
    pub currency: String,
    pub current_stage: Stage,
    /// Decision stage holding the case until a manual choice is made
    pub awaiting_choice: Option<Stage>,
    pub completed: bool,
    pub outcome: Option<CaseOutcome>,
    pub next_action: Option<String>,
    pub next_action_due: Option<NaiveDate>,
    /// Optimistic concurrency counter, bumped on every write
    pub version: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for opening a case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    pub case_type: CaseType,
    pub tax_type: String,
    pub fiscal_period: String,
    pub reported_amount: Decimal,
    pub currency: String,
}

impl NewCase {
    pub fn validate(&self) -> Result<(), EngineError> {
        Validator::new()
            .non_negative(self.reported_amount, "reported_amount")
            .check(
                is_currency_code(&self.currency),
                "currency",
                "must be a 3-letter upper-case code",
            )
            .check(!self.tax_type.trim().is_empty(), "tax_type", "is required")
            .check(
                !self.fiscal_period.trim().is_empty(),
                "fiscal_period",
                "is required",
            )
            .finish()
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

impl Case {
    /// Open a new case at stage 1
    pub fn open(fields: NewCase, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            case_id: Uuid::new_v4(),
            case_type: fields.case_type,
            tax_type: fields.tax_type,
            fiscal_period: fields.fiscal_period,
            reported_amount: fields.reported_amount,
            disputed_amount: fields.reported_amount,
            currency: fields.currency,
            current_stage: Stage::Filing,
            awaiting_choice: None,
            completed: false,
            outcome: None,
            next_action: Some(default_next_action(Stage::Filing).to_string()),
            next_action_due: None,
            version: 0,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move forward. Callers route through [`crate::router`]; this only
    /// refuses to go backwards.
    pub fn advance_to(&mut self, stage: Stage) -> bool {
        if stage < self.current_stage {
            return false;
        }
        self.current_stage = stage;
        self.awaiting_choice = None;
        self.next_action = Some(default_next_action(stage).to_string());
        self.touch();
        true
    }

    /// Hold at the current decision stage until someone chooses
    pub fn hold_for_choice(&mut self, decision_stage: Stage) {
        self.awaiting_choice = Some(decision_stage);
        self.next_action = Some(format!(
            "Choose next step after {}",
            decision_stage.name()
        ));
        self.touch();
    }

    /// Terminal close. Rejections and refunds land on stage 16; withdrawals
    /// rewind first and keep the rewound stage.
    pub fn close(&mut self, outcome: CaseOutcome) {
        if outcome != CaseOutcome::Withdrawn && self.current_stage < Stage::Closed {
            self.current_stage = Stage::Closed;
        }
        self.completed = true;
        self.outcome = Some(outcome);
        self.awaiting_choice = None;
        self.next_action = None;
        self.next_action_due = None;
        self.touch();
    }

    /// The single decrement the workflow allows
    pub fn rewind_for_withdrawal(&mut self, to: Stage) {
        self.current_stage = to;
        self.close(CaseOutcome::Withdrawn);
    }

    pub fn is_on_refund_path(&self) -> bool {
        self.current_stage.is_refund_path()
    }

    pub fn ensure_open(&self) -> Result<(), EngineError> {
        if self.completed {
            return Err(EngineError::precondition(format!(
                "case {} is closed ({})",
                self.case_id,
                self.outcome.map(|o| o.as_str()).unwrap_or("completed")
            )));
        }
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn default_next_action(stage: Stage) -> &'static str {
    match stage {
        Stage::Filing => "Submit the tax return filing",
        Stage::FieldAuditNotice => "Record the field audit notice or the assessment",
        Stage::AuditResultLetter => "Record the audit result letter or the assessment",
        Stage::Assessment => "Record the assessment and choose refund or objection",
        Stage::ObjectionFiling => "File the objection",
        Stage::ObjectionResponseReceipt => "Record the objection response or decision",
        Stage::ObjectionDecision => "Record the objection decision",
        Stage::AppealFiling => "File the appeal",
        Stage::AppealExplanationRequest => "Answer the appeal explanation request",
        Stage::AppealDecision => "Record the appeal decision",
        Stage::SupremeCourtFiling => "File the supreme court review",
        Stage::SupremeCourtDecision => "Record the supreme court decision",
        Stage::BankTransferRequest => "Create the bank transfer request",
        Stage::TransferInstruction => "Await the transfer instruction",
        Stage::RefundReceived => "Confirm receipt of refunded funds",
        Stage::Closed => "No further action",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_case() -> NewCase {
        NewCase {
            case_type: CaseType::Overpayment,
            tax_type: "VAT".to_string(),
            fiscal_period: "2021".to_string(),
            reported_amount: Decimal::from(1_000_000),
            currency: "IDR".to_string(),
        }
    }

    #[test]
    fn test_open_starts_at_filing_with_disputed_equal_reported() {
        let case = Case::open(new_case(), "analyst@example.com");
        assert_eq!(case.current_stage, Stage::Filing);
        assert_eq!(case.disputed_amount, case.reported_amount);
        assert!(!case.completed);
        assert_eq!(case.version, 0);
    }

    #[test]
    fn test_advance_refuses_to_go_back() {
        let mut case = Case::open(new_case(), "u");
        assert!(case.advance_to(Stage::Assessment));
        assert!(!case.advance_to(Stage::Filing));
        assert_eq!(case.current_stage, Stage::Assessment);
    }

    #[test]
    fn test_close_lands_on_stage_16() {
        let mut case = Case::open(new_case(), "u");
        case.advance_to(Stage::SupremeCourtDecision);
        case.close(CaseOutcome::Rejected);
        assert_eq!(case.current_stage, Stage::Closed);
        assert!(case.ensure_open().is_err());
    }

    #[test]
    fn test_validation_reports_each_field() {
        let mut fields = new_case();
        fields.currency = "idr".to_string();
        fields.reported_amount = Decimal::from(-1);
        match fields.validate() {
            Err(EngineError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
