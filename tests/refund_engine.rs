//! Refund sub-process integration tests

mod common;

use chrono::NaiveDate;
use common::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use tax_dispute_engine::error::DuplicateKind;
use tax_dispute_engine::{
    ApprovalRefund, CaseOutcome, DecisionType, DisputeEngine, EngineError, ErrorKind, OpenRefund,
    PhaseStep, RecordStatus, RefundMethod, RefundPhase, Stage,
};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
}

fn request(origin_stage_id: u8, amount: i64) -> OpenRefund {
    OpenRefund {
        origin_stage_id,
        amount: d(amount),
        method: RefundMethod::BankTransfer,
        notes: None,
    }
}

fn request_transfer() -> PhaseStep {
    PhaseStep::RequestTransfer {
        requested_on: date(3),
        bank_name: None,
        account_name: None,
        account_number: None,
    }
}

/// Case whose objection was granted in full; it sits at stage 13
async fn granted_case(engine: &DisputeEngine, disputed: i64) -> Uuid {
    let case = case_in_objection(engine, disputed).await;
    approve(
        engine,
        case.case_id,
        objection_decision(DecisionType::Granted, disputed),
    )
    .await;
    case.case_id
}

async fn run_to_receipt(engine: &DisputeEngine, case_id: Uuid, refund_id: Uuid, amount: i64) {
    engine
        .advance_refund_phase(case_id, refund_id, request_transfer(), ANALYST)
        .await
        .unwrap();
    engine
        .advance_refund_phase(
            case_id,
            refund_id,
            PhaseStep::RecordInstruction {
                received_on: date(10),
            },
            ANALYST,
        )
        .await
        .unwrap();
    engine
        .advance_refund_phase(
            case_id,
            refund_id,
            PhaseStep::RecordReceipt {
                received_on: Some(date(20)),
                received_amount: Some(d(amount)),
            },
            ANALYST,
        )
        .await
        .unwrap();
}

// =============================================================================
// OPENING
// =============================================================================

#[tokio::test]
async fn test_preliminary_refunds_may_repeat() {
    let engine = engine();
    let case = open(&engine, 1_000).await;

    for expected_sequence in 1..=3u32 {
        let view = engine
            .open_refund(case.case_id, request(0, 100), ANALYST)
            .await
            .unwrap();
        assert_eq!(view.refund.sequence_number, expected_sequence);
        assert_eq!(view.phase, RefundPhase::Initiated);
    }

    let listed = engine.list_refunds(case.case_id, Some(0)).await.unwrap();
    assert_eq!(listed.len(), 3);
    let view = engine.get_case(case.case_id).await.unwrap();
    assert_eq!(view.total_refunded, d(300));
    assert_eq!(view.available_for_refund, d(700));
    // Preliminary refunds leave the stage alone
    assert_eq!(view.case.current_stage, Stage::Filing);
}

#[tokio::test]
async fn test_second_refund_for_decision_is_duplicate() {
    let engine = engine();
    let case_id = granted_case(&engine, 1_000).await;

    engine
        .open_refund(case_id, request(7, 400), ANALYST)
        .await
        .unwrap();
    let err = engine
        .open_refund(case_id, request(7, 100), ANALYST)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Duplicate(DuplicateKind::RefundOrigin { origin_stage_id: 7 })
    ));
}

#[tokio::test]
async fn test_refund_cannot_exceed_disputed_amount() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    engine
        .open_refund(case.case_id, request(0, 800), ANALYST)
        .await
        .unwrap();

    let err = engine
        .open_refund(case.case_id, request(0, 201), ANALYST)
        .await
        .unwrap_err();
    match err {
        EngineError::AmountExceedsAvailable {
            requested,
            available,
        } => {
            assert_eq!(requested, d(201));
            assert_eq!(available, d(200));
        }
        other => panic!("expected amount failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_refund_request_validation() {
    let engine = engine();
    let case = open(&engine, 1_000).await;

    let err = engine
        .open_refund(case.case_id, request(5, 100), ANALYST)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(fields) => assert_eq!(fields[0].field, "origin_stage_id"),
        other => panic!("expected validation failure, got {:?}", other),
    }

    let err = engine
        .open_refund(case.case_id, request(0, 0), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
}

#[tokio::test]
async fn test_amounts_beyond_cents_are_rejected() {
    let engine = engine();
    let case = open(&engine, 1_000).await;

    let mut fractional = request(0, 0);
    fractional.amount = Decimal::new(10_005, 3);
    let err = engine
        .open_refund(case.case_id, fractional, ANALYST)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(fields) => assert_eq!(fields[0].field, "amount"),
        other => panic!("expected validation failure, got {:?}", other),
    }

    let err = engine
        .set_disputed_amount(case.case_id, Decimal::new(9_999_999, 4), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);

    let view = engine.get_case(case.case_id).await.unwrap();
    assert!(view.refunds.is_empty());
    assert_eq!(view.case.disputed_amount, d(1_000));

    // Trailing zeros are fine
    let mut padded = request(0, 0);
    padded.amount = Decimal::new(10_500, 3);
    let refund = engine
        .open_refund(case.case_id, padded, ANALYST)
        .await
        .unwrap();
    assert_eq!(refund.refund.amount, Decimal::new(105, 1));
}

#[tokio::test]
async fn test_refund_needs_approved_decision() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    engine
        .submit_stage(
            case.case_id,
            objection_decision(DecisionType::Granted, 1_000),
            false,
            ANALYST,
        )
        .await
        .unwrap();

    let err = engine
        .open_refund(case.case_id, request(7, 500), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);

    engine
        .submit_record(case.case_id, Stage::ObjectionDecision, ANALYST)
        .await
        .unwrap();
    engine
        .approve_record(case.case_id, Stage::ObjectionDecision, None, REVIEWER)
        .await
        .unwrap();

    let view = engine
        .open_refund(case.case_id, request(7, 500), ANALYST)
        .await
        .unwrap();
    assert_eq!(view.phase, RefundPhase::Initiated);
    assert_eq!(view.origin_stage_id, 7);
}

#[tokio::test]
async fn test_rejected_decision_does_not_authorize_refund() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    approve(
        &engine,
        case.case_id,
        objection_decision(DecisionType::Rejected, 0),
    )
    .await;

    let err = engine
        .open_refund(case.case_id, request(7, 100), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

// =============================================================================
// DELETION AND SEQUENCING
// =============================================================================

#[tokio::test]
async fn test_delete_frees_origin_slot_without_reusing_sequence() {
    let engine = engine();
    let case_id = granted_case(&engine, 1_000).await;

    let first = engine
        .open_refund(case_id, request(7, 1_000), ANALYST)
        .await
        .unwrap();
    assert_eq!(first.refund.sequence_number, 1);

    let deleted = engine
        .delete_refund(case_id, first.refund.refund_id, REVIEWER)
        .await
        .unwrap();
    assert!(deleted.refund.deleted_at.is_some());
    assert_eq!(deleted.refund.deleted_by.as_deref(), Some(REVIEWER));

    let second = engine
        .open_refund(case_id, request(7, 1_000), ANALYST)
        .await
        .unwrap();
    assert_eq!(second.refund.sequence_number, 2);

    let listed = engine.list_refunds(case_id, None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].refund.refund_id, second.refund.refund_id);
}

#[tokio::test]
async fn test_received_refund_cannot_be_deleted() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 300), ANALYST)
        .await
        .unwrap();
    run_to_receipt(&engine, case.case_id, refund.refund.refund_id, 300).await;

    let err = engine
        .delete_refund(case.case_id, refund.refund.refund_id, REVIEWER)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

#[tokio::test]
async fn test_deleting_refund_cancels_its_transfer() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 300), ANALYST)
        .await
        .unwrap();
    engine
        .advance_refund_phase(case.case_id, refund.refund.refund_id, request_transfer(), ANALYST)
        .await
        .unwrap();

    let deleted = engine
        .delete_refund(case.case_id, refund.refund.refund_id, REVIEWER)
        .await
        .unwrap();
    let transfer = deleted.transfer.expect("cancelled transfer");
    assert!(transfer.status.is_abandoned());
    assert_eq!(deleted.phase, RefundPhase::Initiated);

    let view = engine.get_case(case.case_id).await.unwrap();
    assert_eq!(view.total_refunded, d(0));
}

// =============================================================================
// PHASES
// =============================================================================

#[tokio::test]
async fn test_cancel_transfer_returns_to_initiated() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 250), ANALYST)
        .await
        .unwrap();
    let refund_id = refund.refund.refund_id;

    let view = engine
        .advance_refund_phase(case.case_id, refund_id, request_transfer(), ANALYST)
        .await
        .unwrap();
    assert_eq!(view.phase, RefundPhase::TransferRequested);

    let view = engine
        .cancel_transfer(case.case_id, refund_id, Some("wrong account".into()), REVIEWER)
        .await
        .unwrap();
    assert_eq!(view.phase, RefundPhase::Initiated);

    let listed = engine.list_refunds(case.case_id, None).await.unwrap();
    assert_eq!(listed[0].phase, RefundPhase::Initiated);

    // Nothing left to cancel
    let err = engine
        .cancel_transfer(case.case_id, refund_id, None, REVIEWER)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);

    // A fresh request starts phase 2 again
    let view = engine
        .advance_refund_phase(case.case_id, refund_id, request_transfer(), ANALYST)
        .await
        .unwrap();
    assert_eq!(view.phase, RefundPhase::TransferRequested);
}

#[tokio::test]
async fn test_phase_steps_must_follow_in_order() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 250), ANALYST)
        .await
        .unwrap();

    let err = engine
        .advance_refund_phase(
            case.case_id,
            refund.refund.refund_id,
            PhaseStep::RecordInstruction {
                received_on: date(4),
            },
            ANALYST,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

#[tokio::test]
async fn test_receipt_requires_date_and_amount() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 250), ANALYST)
        .await
        .unwrap();

    let err = engine
        .advance_refund_phase(
            case.case_id,
            refund.refund.refund_id,
            PhaseStep::RecordReceipt {
                received_on: None,
                received_amount: None,
            },
            ANALYST,
        )
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(fields) => {
            let names: Vec<&str> = fields.iter().map(|f| f.field.as_str()).collect();
            assert_eq!(names, vec!["received_on", "received_amount"]);
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_preliminary_receipt_closes_case_as_refunded() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    let refund = engine
        .open_refund(case.case_id, request(0, 1_000), ANALYST)
        .await
        .unwrap();
    run_to_receipt(&engine, case.case_id, refund.refund.refund_id, 1_000).await;

    let view = engine.get_case(case.case_id).await.unwrap();
    assert!(view.case.completed);
    assert_eq!(view.case.current_stage, Stage::Closed);
    assert_eq!(view.case.outcome, Some(CaseOutcome::Refunded));
}

#[tokio::test]
async fn test_refund_in_flight_books_receipt_after_case_closes() {
    let engine = engine();
    let case_id = granted_case(&engine, 1_000).await;

    let decision = engine
        .open_refund(case_id, request(7, 800), ANALYST)
        .await
        .unwrap();
    let decision_id = decision.refund.refund_id;
    engine
        .advance_refund_phase(case_id, decision_id, request_transfer(), ANALYST)
        .await
        .unwrap();
    engine
        .advance_refund_phase(
            case_id,
            decision_id,
            PhaseStep::RecordInstruction {
                received_on: date(10),
            },
            ANALYST,
        )
        .await
        .unwrap();

    // A preliminary refund lands first and closes the case
    let preliminary = engine
        .open_refund(case_id, request(0, 200), ANALYST)
        .await
        .unwrap();
    run_to_receipt(&engine, case_id, preliminary.refund.refund_id, 200).await;
    let closed = engine.get_case(case_id).await.unwrap();
    assert!(closed.case.completed);
    assert_eq!(closed.case.outcome, Some(CaseOutcome::Refunded));

    let view = engine
        .advance_refund_phase(
            case_id,
            decision_id,
            PhaseStep::RecordReceipt {
                received_on: Some(date(22)),
                received_amount: Some(d(800)),
            },
            ANALYST,
        )
        .await
        .unwrap();
    assert_eq!(view.phase, RefundPhase::FundsReceived);

    let after = engine.get_case(case_id).await.unwrap();
    assert_eq!(after.case.current_stage, Stage::Closed);
    assert_eq!(after.case.outcome, Some(CaseOutcome::Refunded));
    assert!(after
        .refunds
        .iter()
        .all(|r| r.phase == RefundPhase::FundsReceived));
    assert_eq!(after.history.len(), closed.history.len() + 1);

    // New refunds still need an open case
    let err = engine
        .open_refund(case_id, request(0, 1), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);
}

// =============================================================================
// ATOMICITY AND DISPUTED AMOUNT
// =============================================================================

#[tokio::test]
async fn test_failed_refund_leaves_approval_unapplied() {
    let engine = engine();
    let case = case_in_objection(&engine, 1_000).await;
    engine
        .submit_stage(
            case.case_id,
            objection_decision(DecisionType::Granted, 1_000),
            true,
            ANALYST,
        )
        .await
        .unwrap();

    let err = engine
        .approve_record(
            case.case_id,
            Stage::ObjectionDecision,
            Some(ApprovalRefund {
                amount: d(1_500),
                method: RefundMethod::BankTransfer,
                notes: None,
            }),
            REVIEWER,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AmountExceedsAvailable { .. }));

    let view = engine.get_case(case.case_id).await.unwrap();
    assert_eq!(view.case.current_stage, Stage::ObjectionResponseReceipt);
    let record = view
        .records
        .iter()
        .find(|r| r.stage == Stage::ObjectionDecision)
        .unwrap();
    assert_eq!(record.status, RecordStatus::Submitted);
    assert!(view.refunds.is_empty());
}

#[tokio::test]
async fn test_store_failure_rolls_back_whole_write() {
    let (engine, store) = engine_with_store();
    let case = case_in_objection(&engine, 1_000).await;
    engine
        .submit_stage(
            case.case_id,
            objection_decision(DecisionType::Granted, 1_000),
            true,
            ANALYST,
        )
        .await
        .unwrap();
    let history_before = engine.history(case.case_id).await.unwrap().len();

    store.fail_next_apply();
    let err = engine
        .approve_record(
            case.case_id,
            Stage::ObjectionDecision,
            Some(ApprovalRefund {
                amount: d(1_000),
                method: RefundMethod::BankTransfer,
                notes: None,
            }),
            REVIEWER,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);

    let view = engine.get_case(case.case_id).await.unwrap();
    assert_eq!(view.case.current_stage, Stage::ObjectionResponseReceipt);
    assert!(view.refunds.is_empty());
    assert_eq!(view.history.len(), history_before);

    // The injected failure is one-shot
    let outcome = engine
        .approve_record(case.case_id, Stage::ObjectionDecision, None, REVIEWER)
        .await
        .unwrap();
    assert_eq!(outcome.case.current_stage, Stage::BankTransferRequest);
}

#[tokio::test]
async fn test_disputed_amount_never_drops_below_refunded() {
    let engine = engine();
    let case = open(&engine, 1_000).await;
    engine
        .open_refund(case.case_id, request(0, 600), ANALYST)
        .await
        .unwrap();

    let err = engine
        .set_disputed_amount(case.case_id, d(500), ANALYST)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionNotMet);

    let updated = engine
        .set_disputed_amount(case.case_id, d(600), ANALYST)
        .await
        .unwrap();
    assert_eq!(updated.disputed_amount, d(600));

    let view = engine.get_case(case.case_id).await.unwrap();
    assert_eq!(view.available_for_refund, d(0));
}
