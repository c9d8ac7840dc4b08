//! Loss and claim eligibility
//!
//! Pure functions over a [`CaseFile`] snapshot. The per-stage form
//! ([`claim_status_by_stage`]) is the one source of truth for eligibility;
//! [`needs_reminder`] and [`pending_claim_stages`] only aggregate it.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::claim::{is_claim_stage, ClaimStatus, CLAIM_STAGES};
use crate::error::{DuplicateKind, EngineError};
use crate::records::RecordStatus;
use crate::stage::Stage;
use crate::store::CaseFile;

/// Eligibility of one claim stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimEligibility {
    pub stage: Stage,
    pub eligible: bool,
    pub loss_amount: Option<Decimal>,
    /// Why the stage is not eligible
    pub reason: Option<String>,
    pub already_claimed: bool,
    pub claim_status: Option<ClaimStatus>,
}

/// Claimed side of the pair for a claim stage
fn claimed_amount(file: &CaseFile, stage: Stage) -> Option<Decimal> {
    let filing = match stage {
        Stage::Assessment => return Some(file.case.disputed_amount),
        Stage::ObjectionDecision => Stage::ObjectionFiling,
        Stage::AppealDecision => Stage::AppealFiling,
        Stage::SupremeCourtDecision => Stage::SupremeCourtFiling,
        _ => return None,
    };
    file.record(filing)
        .filter(|r| r.status != RecordStatus::Withdrawn)
        .and_then(|r| r.amount())
}

/// Decided side: only an approved decision counts
fn decided_amount(file: &CaseFile, stage: Stage) -> Option<Decimal> {
    file.record(stage)
        .filter(|r| r.is_approved())
        .and_then(|r| r.amount())
}

/// `claimed - decided` when both sides exist and the decision came in below
/// the claim
pub fn calculate_loss(file: &CaseFile, stage: Stage) -> Option<Decimal> {
    if !is_claim_stage(stage) {
        return None;
    }
    let claimed = claimed_amount(file, stage)?;
    let decided = decided_amount(file, stage)?;
    (decided < claimed).then(|| claimed - decided)
}

pub fn needs_claim_at_stage(file: &CaseFile, stage: Stage) -> bool {
    calculate_loss(file, stage).is_some()
}

fn ineligible_reason(file: &CaseFile, stage: Stage) -> String {
    if claimed_amount(file, stage).is_none() {
        return format!("no claimed amount recorded for {}", stage);
    }
    match decided_amount(file, stage) {
        None => format!("no approved decision at {}", stage),
        Some(_) => format!("decision at {} is not below the claimed amount", stage),
    }
}

/// Eligibility for one stage
pub fn eligibility(file: &CaseFile, stage: Stage) -> ClaimEligibility {
    let loss_amount = calculate_loss(file, stage);
    let claim = file.claim(stage);
    let reason = match (loss_amount, claim) {
        (_, Some(_)) => Some(format!("claim already exists for stage {}", stage.id())),
        (None, None) => Some(ineligible_reason(file, stage)),
        (Some(_), None) => None,
    };
    ClaimEligibility {
        stage,
        eligible: loss_amount.is_some() && claim.is_none(),
        loss_amount,
        reason,
        already_claimed: claim.is_some(),
        claim_status: claim.map(|c| c.status),
    }
}

/// All four claim stages, in stage order
pub fn claim_status_by_stage(file: &CaseFile) -> Vec<ClaimEligibility> {
    CLAIM_STAGES.iter().map(|s| eligibility(file, *s)).collect()
}

/// Check a claim may be created and return the loss to snapshot
pub fn can_create_claim(file: &CaseFile, stage: Stage) -> Result<Decimal, EngineError> {
    if !is_claim_stage(stage) {
        return Err(EngineError::field(
            "stage",
            format!("{} does not carry internal-loss claims (4, 7, 10 or 12)", stage),
        ));
    }
    if file.claim(stage).is_some() {
        return Err(EngineError::Duplicate(DuplicateKind::Claim { stage }));
    }
    calculate_loss(file, stage)
        .ok_or_else(|| EngineError::precondition(ineligible_reason(file, stage)))
}

/// Stages with a loss and no claim yet
pub fn pending_claim_stages(file: &CaseFile) -> Vec<Stage> {
    claim_status_by_stage(file)
        .into_iter()
        .filter(|e| e.eligible)
        .map(|e| e.stage)
        .collect()
}

pub fn needs_reminder(file: &CaseFile) -> bool {
    claim_status_by_stage(file).iter().any(|e| e.eligible)
}
