//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use tax_dispute_engine::{
    AssessmentRoute, Case, CaseType, DecisionType, DisputeEngine, MemoryCaseStore, NewCase,
    RecordOutcome, Stage, StagePayload,
};

pub const ANALYST: &str = "analyst@example.com";
pub const REVIEWER: &str = "reviewer@example.com";

pub fn d(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn engine() -> DisputeEngine {
    DisputeEngine::new(Arc::new(MemoryCaseStore::new()))
}

/// Engine plus a handle on its store for fault injection
pub fn engine_with_store() -> (DisputeEngine, Arc<MemoryCaseStore>) {
    let store = Arc::new(MemoryCaseStore::new());
    (DisputeEngine::new(store.clone()), store)
}

pub async fn open(engine: &DisputeEngine, disputed: i64) -> Case {
    engine
        .open_case(
            NewCase {
                case_type: CaseType::Audit,
                tax_type: "VAT".to_string(),
                fiscal_period: "2021".to_string(),
                reported_amount: d(disputed),
                currency: "IDR".to_string(),
            },
            ANALYST,
        )
        .await
        .unwrap()
}

/// Submit a record and approve it straight away
pub async fn approve(engine: &DisputeEngine, case_id: Uuid, payload: StagePayload) -> RecordOutcome {
    let stage = payload.stage();
    engine
        .submit_stage(case_id, payload, true, ANALYST)
        .await
        .unwrap();
    engine
        .approve_record(case_id, stage, None, REVIEWER)
        .await
        .unwrap()
}

// =============================================================================
// PAYLOADS
// =============================================================================

pub fn filing(amount: i64) -> StagePayload {
    StagePayload::Filing {
        reported_amount: d(amount),
        filed_on: None,
    }
}

pub fn assessment(amount: i64, route: AssessmentRoute) -> StagePayload {
    StagePayload::Assessment {
        assessment_number: "00012/207/21".to_string(),
        assessed_amount: d(amount),
        route_choice: Some(route),
    }
}

pub fn objection_filing(amount: i64) -> StagePayload {
    StagePayload::ObjectionFiling {
        objected_amount: d(amount),
        filed_on: None,
    }
}

pub fn objection_decision(decision_type: DecisionType, amount: i64) -> StagePayload {
    StagePayload::ObjectionDecision {
        decision_type,
        decision_amount: d(amount),
    }
}

pub fn appeal_filing(amount: i64) -> StagePayload {
    StagePayload::AppealFiling {
        appealed_amount: d(amount),
        filed_on: None,
    }
}

pub fn appeal_decision(decision_type: DecisionType, amount: i64) -> StagePayload {
    StagePayload::AppealDecision {
        decision_type,
        decision_amount: d(amount),
    }
}

pub fn supreme_court_filing(amount: i64) -> StagePayload {
    StagePayload::SupremeCourtFiling {
        claimed_amount: d(amount),
        filed_on: None,
    }
}

pub fn supreme_court_decision(decision_type: DecisionType, amount: i64) -> StagePayload {
    StagePayload::SupremeCourtDecision {
        decision_type,
        decision_amount: d(amount),
    }
}

/// A valid payload for any record-carrying stage
pub fn payload_for(stage: Stage, decision_type: DecisionType, amount: i64) -> StagePayload {
    match stage {
        Stage::Filing => filing(amount),
        Stage::FieldAuditNotice => StagePayload::FieldAuditNotice {
            letter_number: "SP2-0042".to_string(),
            issued_on: None,
        },
        Stage::AuditResultLetter => StagePayload::AuditResultLetter {
            letter_number: "SPHP-0042".to_string(),
            corrected_amount: d(amount),
        },
        Stage::Assessment => assessment(amount, AssessmentRoute::Objection),
        Stage::ObjectionFiling => objection_filing(amount),
        Stage::ObjectionResponseReceipt => StagePayload::ObjectionResponseReceipt {
            letter_number: "S-1100".to_string(),
            received_on: None,
        },
        Stage::ObjectionDecision => objection_decision(decision_type, amount),
        Stage::AppealFiling => appeal_filing(amount),
        Stage::AppealExplanationRequest => StagePayload::AppealExplanationRequest {
            requested_on: None,
            response_due: None,
        },
        Stage::AppealDecision => appeal_decision(decision_type, amount),
        Stage::SupremeCourtFiling => supreme_court_filing(amount),
        _ => supreme_court_decision(decision_type, amount),
    }
}

/// Walk a fresh case through the objection filing; it then sits at stage 6
pub async fn case_in_objection(engine: &DisputeEngine, disputed: i64) -> Case {
    let case = open(engine, disputed).await;
    approve(engine, case.case_id, filing(disputed)).await;
    approve(engine, case.case_id, assessment(disputed, AssessmentRoute::Objection)).await;
    approve(engine, case.case_id, objection_filing(disputed)).await;
    engine.get_case(case.case_id).await.unwrap().case
}
