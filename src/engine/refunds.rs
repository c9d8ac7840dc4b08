//! Refund commands
//!
//! Opening, advancing, cancelling and deleting refund instances. The phase
//! of an instance is always re-derived from its transfers; while the case is
//! on the refund path the phase is mirrored into the case stage.
//!
//! Only opening needs an open case. Instances that already exist keep
//! moving after the case closes, so funds still in flight can be booked.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{require_actor, DisputeEngine};
use crate::case::{Case, CaseOutcome};
use crate::error::{DuplicateKind, EngineError, Validator};
use crate::history::{HistoryAction, HistoryEntry};
use crate::records::AssessmentRoute;
use crate::refund::{
    derive_phase, BankTransferRequest, RefundMethod, RefundOrigin, RefundPhase, RefundProcess,
    RefundView, TransferStatus,
};
use crate::stage::Stage;
use crate::store::{CaseFile, CaseWrite, Mutation};

/// Request to open a refund instance
#[derive(Debug, Clone, Deserialize)]
pub struct OpenRefund {
    /// 0 for preliminary, otherwise 4, 7, 10 or 12
    pub origin_stage_id: u8,
    pub amount: Decimal,
    pub method: RefundMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One forward step through the refund phases
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum PhaseStep {
    /// 1 -> 2
    RequestTransfer {
        requested_on: NaiveDate,
        #[serde(default)]
        bank_name: Option<String>,
        #[serde(default)]
        account_name: Option<String>,
        #[serde(default)]
        account_number: Option<String>,
    },
    /// 2 -> 3
    RecordInstruction { received_on: NaiveDate },
    /// 3 -> 4
    RecordReceipt {
        #[serde(default)]
        received_on: Option<NaiveDate>,
        #[serde(default)]
        received_amount: Option<Decimal>,
    },
}

impl PhaseStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestTransfer { .. } => "request_transfer",
            Self::RecordInstruction { .. } => "record_instruction",
            Self::RecordReceipt { .. } => "record_receipt",
        }
    }

    fn from_phase(&self) -> RefundPhase {
        match self {
            Self::RequestTransfer { .. } => RefundPhase::Initiated,
            Self::RecordInstruction { .. } => RefundPhase::TransferRequested,
            Self::RecordReceipt { .. } => RefundPhase::InstructionReceived,
        }
    }
}

/// Validate and build a new refund instance against the case file
pub(super) fn prepare_refund(
    file: &CaseFile,
    origin: RefundOrigin,
    amount: Decimal,
    method: RefundMethod,
    notes: Option<String>,
    actor: &str,
) -> Result<RefundProcess, EngineError> {
    Validator::new().positive(amount, "amount").finish()?;
    file.case.ensure_open()?;

    if let RefundOrigin::Decision(stage) = origin {
        let record = file.record(stage).ok_or_else(|| {
            EngineError::precondition(format!("no decision recorded at {}", stage))
        })?;
        if !record.is_approved() {
            return Err(EngineError::precondition(format!(
                "decision at {} is {}, not approved",
                stage, record.status
            )));
        }
        let authorized = record.next_stage == Some(Stage::REFUND_ENTRY)
            || record.payload.assessment_route() == Some(AssessmentRoute::Refund);
        if !authorized {
            return Err(EngineError::precondition(format!(
                "decision at {} does not route to a refund",
                stage
            )));
        }
        if file
            .live_refunds()
            .any(|r| r.origin == origin && origin.is_single_instance())
        {
            return Err(EngineError::Duplicate(DuplicateKind::RefundOrigin {
                origin_stage_id: origin.id(),
            }));
        }
    }

    let available = file.available_for_refund();
    if amount > available {
        return Err(EngineError::AmountExceedsAvailable {
            requested: amount,
            available,
        });
    }

    Ok(RefundProcess {
        refund_id: Uuid::new_v4(),
        case_id: file.case.case_id,
        origin,
        sequence_number: file.next_refund_sequence(),
        amount,
        method,
        notes,
        created_by: actor.to_string(),
        created_at: Utc::now(),
        deleted_at: None,
        deleted_by: None,
    })
}

pub(super) fn opened_entry(case: &Case, refund: &RefundProcess, actor: &str) -> HistoryEntry {
    let stage = case.current_stage;
    HistoryEntry::new(case.case_id, stage, stage, HistoryAction::RefundOpened, actor)
        .with_decision("refund_origin", refund.origin.id().to_string())
        .with_note(format!(
            "refund #{} of {} {}",
            refund.sequence_number, refund.amount, case.currency
        ))
}

fn parse_origin(origin_stage_id: u8) -> Result<RefundOrigin, EngineError> {
    RefundOrigin::try_from(origin_stage_id).map_err(|e| EngineError::field("origin_stage_id", e))
}

fn live_refund(file: &CaseFile, refund_id: Uuid) -> Result<RefundProcess, EngineError> {
    file.refund(refund_id)
        .filter(|r| r.is_live())
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("refund {}", refund_id)))
}

impl DisputeEngine {
    pub async fn open_refund(
        &self,
        case_id: Uuid,
        request: OpenRefund,
        actor: &str,
    ) -> Result<RefundView, EngineError> {
        require_actor(actor)?;
        let origin = parse_origin(request.origin_stage_id)?;
        let mut file = self.load(case_id).await?;

        let refund = prepare_refund(
            &file,
            origin,
            request.amount,
            request.method,
            request.notes,
            actor,
        )?;

        file.case.touch();
        let mut write = CaseWrite::new(file.case.clone());
        write
            .push(Mutation::InsertRefund(refund.clone()))
            .history(opened_entry(&file.case, &refund, actor));
        self.commit(write).await?;

        info!(
            case_id = %case_id,
            refund_id = %refund.refund_id,
            origin = origin.id(),
            sequence = refund.sequence_number,
            amount = %refund.amount,
            "refund opened"
        );
        Ok(RefundView::build(&refund, &[]))
    }

    /// Move a refund one phase forward
    pub async fn advance_refund_phase(
        &self,
        case_id: Uuid,
        refund_id: Uuid,
        step: PhaseStep,
        actor: &str,
    ) -> Result<RefundView, EngineError> {
        require_actor(actor)?;
        if let PhaseStep::RecordReceipt {
            received_on,
            received_amount,
        } = &step
        {
            let mut v = Validator::new();
            v.check(received_on.is_some(), "received_on", "is required");
            match received_amount {
                Some(amount) => v.positive(*amount, "received_amount"),
                None => v.check(false, "received_amount", "is required"),
            };
            v.finish()?;
        }

        let mut file = self.load(case_id).await?;
        let refund = live_refund(&file, refund_id)?;

        let latest = file.latest_transfer(refund_id).cloned();
        let phase = derive_phase(latest.as_ref());
        if phase != step.from_phase() {
            return Err(EngineError::precondition(format!(
                "cannot {} while refund #{} is at phase {}",
                step.as_str(),
                refund.sequence_number,
                phase
            )));
        }

        let now = Utc::now();
        let (transfer, mutation) = match (step, latest) {
            (
                PhaseStep::RequestTransfer {
                    requested_on,
                    bank_name,
                    account_name,
                    account_number,
                },
                _,
            ) => {
                let transfer = BankTransferRequest {
                    transfer_id: Uuid::new_v4(),
                    refund_id,
                    status: TransferStatus::Pending,
                    requested_on,
                    instruction_received_on: None,
                    received_on: None,
                    received_amount: None,
                    bank_name,
                    account_name,
                    account_number,
                    status_reason: None,
                    created_at: now,
                    updated_at: now,
                };
                (transfer.clone(), Mutation::InsertTransfer(transfer))
            }
            (PhaseStep::RecordInstruction { received_on }, Some(mut transfer)) => {
                transfer.instruction_received_on = Some(received_on);
                transfer.status = TransferStatus::Processing;
                transfer.updated_at = now;
                (transfer.clone(), Mutation::UpdateTransfer(transfer))
            }
            (
                PhaseStep::RecordReceipt {
                    received_on,
                    received_amount,
                },
                Some(mut transfer),
            ) => {
                transfer.received_on = received_on;
                transfer.received_amount = received_amount;
                transfer.status = TransferStatus::Completed;
                transfer.updated_at = now;
                (transfer.clone(), Mutation::UpdateTransfer(transfer))
            }
            (step, None) => {
                return Err(EngineError::precondition(format!(
                    "cannot {} without a transfer request",
                    step.as_str()
                )))
            }
        };

        let new_phase = derive_phase(Some(&transfer));
        let from = file.case.current_stage;
        mirror_phase(&mut file.case, &refund, new_phase);
        file.case.touch();

        let mut write = CaseWrite::new(file.case.clone());
        write.push(mutation).history(
            HistoryEntry::new(
                case_id,
                from,
                file.case.current_stage,
                HistoryAction::RefundPhaseAdvanced,
                actor,
            )
            .with_decision("refund_phase", new_phase.id().to_string())
            .with_note(format!("refund #{}: {}", refund.sequence_number, new_phase)),
        );
        self.commit(write).await?;

        info!(
            case_id = %case_id,
            refund_id = %refund_id,
            phase = new_phase.id(),
            stage = file.case.current_stage.id(),
            "refund phase advanced"
        );
        Ok(RefundView::build(&refund, &[transfer]))
    }

    /// Cancel the active transfer request; the refund derives phase 1 again
    pub async fn cancel_transfer(
        &self,
        case_id: Uuid,
        refund_id: Uuid,
        reason: Option<String>,
        actor: &str,
    ) -> Result<RefundView, EngineError> {
        require_actor(actor)?;
        let mut file = self.load(case_id).await?;
        let refund = live_refund(&file, refund_id)?;

        let mut transfer = file
            .latest_transfer(refund_id)
            .filter(|t| !t.status.is_abandoned())
            .cloned()
            .ok_or_else(|| {
                EngineError::precondition(format!(
                    "refund #{} has no active transfer request",
                    refund.sequence_number
                ))
            })?;
        if derive_phase(Some(&transfer)) == RefundPhase::FundsReceived {
            return Err(EngineError::precondition(format!(
                "refund #{} has already been received",
                refund.sequence_number
            )));
        }

        transfer.status = TransferStatus::Cancelled;
        transfer.status_reason = reason.clone();
        transfer.updated_at = Utc::now();

        file.case.touch();
        let stage = file.case.current_stage;
        let mut entry =
            HistoryEntry::new(case_id, stage, stage, HistoryAction::TransferCancelled, actor);
        if let Some(reason) = reason {
            entry = entry.with_note(reason);
        }
        let mut write = CaseWrite::new(file.case.clone());
        write
            .push(Mutation::UpdateTransfer(transfer.clone()))
            .history(entry);
        self.commit(write).await?;

        Ok(RefundView::build(&refund, &[transfer]))
    }

    /// Soft-delete a refund that has not been received; frees its origin slot
    /// and its amount
    pub async fn delete_refund(
        &self,
        case_id: Uuid,
        refund_id: Uuid,
        actor: &str,
    ) -> Result<RefundView, EngineError> {
        require_actor(actor)?;
        let mut file = self.load(case_id).await?;
        let mut refund = live_refund(&file, refund_id)?;

        let latest = file.latest_transfer(refund_id).cloned();
        if derive_phase(latest.as_ref()) == RefundPhase::FundsReceived {
            return Err(EngineError::precondition(format!(
                "refund #{} has already been received and cannot be deleted",
                refund.sequence_number
            )));
        }

        let now = Utc::now();
        refund.deleted_at = Some(now);
        refund.deleted_by = Some(actor.to_string());

        file.case.touch();
        let stage = file.case.current_stage;
        let mut write = CaseWrite::new(file.case.clone());
        write.push(Mutation::UpdateRefund(refund.clone()));

        let mut transfers = Vec::new();
        if let Some(mut active) = latest.filter(|t| !t.status.is_abandoned()) {
            active.status = TransferStatus::Cancelled;
            active.status_reason = Some("refund deleted".to_string());
            active.updated_at = now;
            write.push(Mutation::UpdateTransfer(active.clone()));
            transfers.push(active);
        }
        write.history(
            HistoryEntry::new(case_id, stage, stage, HistoryAction::RefundDeleted, actor)
                .with_decision("refund_origin", refund.origin.id().to_string())
                .with_note(format!("refund #{} deleted", refund.sequence_number)),
        );
        self.commit(write).await?;

        info!(case_id = %case_id, refund_id = %refund_id, "refund deleted");
        Ok(RefundView::build(&refund, &transfers))
    }

    /// Live refunds in sequence order, optionally for one origin
    pub async fn list_refunds(
        &self,
        case_id: Uuid,
        origin_stage_id: Option<u8>,
    ) -> Result<Vec<RefundView>, EngineError> {
        let origin = origin_stage_id.map(parse_origin).transpose()?;
        let file = self.load(case_id).await?;

        let mut views: Vec<RefundView> = file
            .live_refunds()
            .filter(|r| origin.map_or(true, |o| r.origin == o))
            .map(|r| file.refund_view(r))
            .collect();
        views.sort_by_key(|v| v.refund.sequence_number);
        Ok(views)
    }
}

/// Carry a refund's phase into the case. Preliminary refunds close the case
/// on receipt; decision refunds only move a case that is on the refund path.
/// The stage never moves backwards.
fn mirror_phase(case: &mut Case, refund: &RefundProcess, phase: RefundPhase) {
    if case.completed {
        return;
    }
    match refund.origin {
        RefundOrigin::Preliminary => {
            if phase == RefundPhase::FundsReceived {
                case.close(CaseOutcome::Refunded);
            }
        }
        RefundOrigin::Decision(_) => {
            if !case.is_on_refund_path() {
                return;
            }
            let target = phase.mirrored_stage();
            if target > case.current_stage {
                case.advance_to(target);
            }
            if phase == RefundPhase::FundsReceived {
                case.close(CaseOutcome::Refunded);
            }
        }
    }
}
