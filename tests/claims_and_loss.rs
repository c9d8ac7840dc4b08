//! Internal-loss (KIAN) claim integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::*;
use tokio::sync::mpsc;
use uuid::Uuid;

use tax_dispute_engine::error::DuplicateKind;
use tax_dispute_engine::reminder::{DeliveryOutcome, SinkError};
use tax_dispute_engine::{
    AssessmentRoute, ClaimResponse, ClaimStatus, DecisionType, DisputeEngine, EngineError,
    ErrorKind, ManualChoice, OpenRefund, PhaseStep, RefundMethod, Reminder, ReminderDispatcher,
    ReminderSink, ResponseOutcome, Stage,
};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, day).unwrap()
}

/// Objection filed at 1,000 and partially granted at 600: a 400 loss at 7
async fn case_with_objection_loss(engine: &DisputeEngine) -> Uuid {
    let case = case_in_objection(engine, 1_000).await;
    approve(
        engine,
        case.case_id,
        objection_decision(DecisionType::PartiallyGranted, 600),
    )
    .await;
    case.case_id
}

fn accepted(amount: i64) -> ClaimResponse {
    ClaimResponse {
        outcome: ResponseOutcome::Accepted,
        responded_on: date(2),
        acknowledged_amount: Some(d(amount)),
        notes: None,
    }
}

#[tokio::test]
async fn test_claim_lifecycle() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;

    let claim = engine.create_claim(case_id, 7, ANALYST).await.unwrap();
    assert_eq!(claim.stage, Stage::ObjectionDecision);
    assert_eq!(claim.loss_amount, d(400));
    assert_eq!(claim.status, ClaimStatus::Draft);

    let claim = engine.submit_claim(case_id, 7, ANALYST).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Submitted);
    assert!(claim.submitted_at.is_some());

    let claim = engine
        .record_claim_response(case_id, 7, accepted(400), REVIEWER)
        .await
        .unwrap();
    assert_eq!(claim.status, ClaimStatus::Responded);
    assert_eq!(
        claim.response.as_ref().map(|r| r.outcome),
        Some(ResponseOutcome::Accepted)
    );

    let claim = engine.close_claim(case_id, 7, REVIEWER).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Closed);
    assert!(claim.closed_at.is_some());
}

#[tokio::test]
async fn test_claim_steps_out_of_order_fail() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;
    engine.create_claim(case_id, 7, ANALYST).await.unwrap();

    let err = engine.close_claim(case_id, 7, REVIEWER).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);

    let err = engine
        .record_claim_response(case_id, 7, accepted(400), REVIEWER)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

#[tokio::test]
async fn test_acknowledged_amount_is_bounded_by_loss() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;
    engine.create_claim(case_id, 7, ANALYST).await.unwrap();
    engine.submit_claim(case_id, 7, ANALYST).await.unwrap();

    let err = engine
        .record_claim_response(case_id, 7, accepted(401), REVIEWER)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(fields) => assert_eq!(fields[0].field, "acknowledged_amount"),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_claim_for_stage_is_duplicate() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;
    engine.create_claim(case_id, 7, ANALYST).await.unwrap();

    let err = engine.create_claim(case_id, 7, ANALYST).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Duplicate(DuplicateKind::Claim {
            stage: Stage::ObjectionDecision
        })
    ));
}

#[tokio::test]
async fn test_ineligible_stages_are_refused() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;

    // No appeal decision yet
    let err = engine.create_claim(case_id, 10, ANALYST).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);

    // Not a claim stage at all
    let err = engine.create_claim(case_id, 5, ANALYST).await.unwrap_err();
    match err {
        EngineError::Validation(fields) => assert_eq!(fields[0].field, "stage"),
        other => panic!("expected validation failure, got {:?}", other),
    }

    let err = engine.create_claim(case_id, 42, ANALYST).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
}

#[tokio::test]
async fn test_full_grant_has_no_loss() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    approve(
        &engine,
        case.case_id,
        objection_decision(DecisionType::Granted, 1_000),
    )
    .await;

    let err = engine
        .create_claim(case.case_id, 7, ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

#[tokio::test]
async fn test_status_by_stage_reports_each_claim_stage() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    approve(&engine, case.case_id, filing(1_000)).await;
    approve(
        &engine,
        case.case_id,
        assessment(700, AssessmentRoute::Objection),
    )
    .await;

    let status = engine.claim_status_by_stage(case.case_id).await.unwrap();
    let stages: Vec<Stage> = status.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Assessment,
            Stage::ObjectionDecision,
            Stage::AppealDecision,
            Stage::SupremeCourtDecision,
        ]
    );
    assert!(status[0].eligible);
    assert_eq!(status[0].loss_amount, Some(d(300)));
    assert!(!status[1].eligible);
    assert!(status[1].reason.is_some());

    engine.create_claim(case.case_id, 4, ANALYST).await.unwrap();
    let status = engine.claim_status_by_stage(case.case_id).await.unwrap();
    assert!(!status[0].eligible);
    assert!(status[0].already_claimed);
    assert_eq!(status[0].claim_status, Some(ClaimStatus::Draft));

    let view = engine.get_case(case.case_id).await.unwrap();
    assert!(!view.needs_reminder);
}

#[tokio::test]
async fn test_claims_remain_open_after_case_closes() {
    let engine = engine();
    let case_id = case_with_objection_loss(&engine).await;
    engine
        .choose_next_stage(case_id, ManualChoice::Refund, REVIEWER)
        .await
        .unwrap();

    let refund = engine
        .open_refund(
            case_id,
            OpenRefund {
                origin_stage_id: 7,
                amount: d(600),
                method: RefundMethod::BankTransfer,
                notes: None,
            },
            ANALYST,
        )
        .await
        .unwrap();
    let refund_id = refund.refund.refund_id;
    for step in [
        PhaseStep::RequestTransfer {
            requested_on: date(3),
            bank_name: None,
            account_name: None,
            account_number: None,
        },
        PhaseStep::RecordInstruction {
            received_on: date(5),
        },
        PhaseStep::RecordReceipt {
            received_on: Some(date(8)),
            received_amount: Some(d(600)),
        },
    ] {
        engine
            .advance_refund_phase(case_id, refund_id, step, ANALYST)
            .await
            .unwrap();
    }
    let view = engine.get_case(case_id).await.unwrap();
    assert!(view.case.completed);
    assert!(view.needs_reminder);

    let claim = engine.create_claim(case_id, 7, ANALYST).await.unwrap();
    assert_eq!(claim.loss_amount, d(400));
    engine.submit_claim(case_id, 7, ANALYST).await.unwrap();
}

// =============================================================================
// REMINDERS
// =============================================================================

struct ChannelSink {
    sent: mpsc::UnboundedSender<Reminder>,
}

#[async_trait]
impl ReminderSink for ChannelSink {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), SinkError> {
        self.sent
            .send(reminder.clone())
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn audit(&self, _reminder: &Reminder, _outcome: &DeliveryOutcome) -> Result<(), SinkError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_loss_on_approval_queues_reminder() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = engine().with_reminders(ReminderDispatcher::new(
        Arc::new(ChannelSink { sent: tx }),
        true,
    ));

    let case_id = case_with_objection_loss(&engine).await;

    let reminder = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reminder delivered")
        .expect("channel open");
    assert_eq!(reminder.case_id, case_id);
    assert_eq!(reminder.stage, Stage::ObjectionDecision);
    assert_eq!(reminder.loss_amount, d(400));
}
