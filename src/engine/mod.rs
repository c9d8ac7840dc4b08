//! Dispute Engine
//!
//! Command boundary for tax dispute cases. Each command loads a
//! [`CaseFile`], validates and computes the change, and commits it as a single
//! [`CaseWrite`] that always carries at least one history entry. Claim
//! reminders are dispatched after the commit and never affect it.
//!
//! Refund commands live in [`refunds`], claim commands in [`claims`].

mod claims;
mod refunds;

pub use refunds::{OpenRefund, PhaseStep};

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::case::{Case, NewCase};
use crate::claim::KianSubmission;
use crate::error::{DuplicateKind, EngineError, Validator};
use crate::history::{decision_point, HistoryAction, HistoryEntry};
use crate::loss::{self, ClaimEligibility};
use crate::records::{RecordStatus, StagePayload, StageRecord};
use crate::refund::{RefundMethod, RefundOrigin, RefundView};
use crate::reminder::{Reminder, ReminderDispatcher};
use crate::router::{self, ManualChoice, RouteDecision};
use crate::stage::Stage;
use crate::store::{CaseFile, CaseStore, CaseWrite, Mutation};

/// Everything known about a case, with derived fields
#[derive(Debug, Clone, Serialize)]
pub struct CaseView {
    pub case: Case,
    pub records: Vec<StageRecord>,
    pub refunds: Vec<RefundView>,
    pub total_refunded: Decimal,
    pub available_for_refund: Decimal,
    pub claims: Vec<KianSubmission>,
    pub claim_eligibility: Vec<ClaimEligibility>,
    pub needs_reminder: bool,
    pub history: Vec<HistoryEntry>,
}

/// Result of a record command
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub case: Case,
    pub record: StageRecord,
    /// Set when the command ran the router
    pub route: Option<RouteDecision>,
    /// Refund opened in the same write, if one was requested
    pub refund: Option<RefundView>,
}

/// Refund to open together with an approval
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRefund {
    pub amount: Decimal,
    pub method: RefundMethod,
    pub notes: Option<String>,
}

/// Workflow engine over a [`CaseStore`]
#[derive(Clone)]
pub struct DisputeEngine {
    store: Arc<dyn CaseStore>,
    reminders: ReminderDispatcher,
}

impl std::fmt::Debug for DisputeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisputeEngine")
            .field("reminders", &self.reminders)
            .finish()
    }
}

impl DisputeEngine {
    /// Engine with reminders switched off
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self {
            store,
            reminders: ReminderDispatcher::disabled(),
        }
    }

    pub fn with_reminders(mut self, reminders: ReminderDispatcher) -> Self {
        self.reminders = reminders;
        self
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    // ========================================================================
    // Case commands
    // ========================================================================

    pub async fn open_case(&self, fields: NewCase, actor: &str) -> Result<Case, EngineError> {
        require_actor(actor)?;
        fields.validate()?;

        let case = Case::open(fields, actor);
        let opened = HistoryEntry::new(
            case.case_id,
            Stage::Filing,
            Stage::Filing,
            HistoryAction::CaseOpened,
            actor,
        );
        self.store.create_case(&case, &opened).await?;

        info!(
            case_id = %case.case_id,
            case_type = case.case_type.as_str(),
            disputed = %case.disputed_amount,
            "opened case"
        );
        Ok(case)
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<CaseView, EngineError> {
        let file = self.load(case_id).await?;
        let history = self.store.history(case_id).await?;

        let mut refunds: Vec<RefundView> =
            file.live_refunds().map(|r| file.refund_view(r)).collect();
        refunds.sort_by_key(|v| v.refund.sequence_number);

        Ok(CaseView {
            total_refunded: file.total_refunded(),
            available_for_refund: file.available_for_refund(),
            claim_eligibility: loss::claim_status_by_stage(&file),
            needs_reminder: loss::needs_reminder(&file),
            refunds,
            case: file.case,
            records: file.records,
            claims: file.claims,
            history,
        })
    }

    pub async fn history(&self, case_id: Uuid) -> Result<Vec<HistoryEntry>, EngineError> {
        self.store.load_case(case_id).await?;
        Ok(self.store.history(case_id).await?)
    }

    /// Change the disputed amount; never below what is already refunded
    pub async fn set_disputed_amount(
        &self,
        case_id: Uuid,
        amount: Decimal,
        actor: &str,
    ) -> Result<Case, EngineError> {
        require_actor(actor)?;
        Validator::new().non_negative(amount, "disputed_amount").finish()?;

        let mut file = self.load(case_id).await?;
        file.case.ensure_open()?;

        let refunded = file.total_refunded();
        if amount < refunded {
            return Err(EngineError::precondition(format!(
                "disputed amount {} is below the {} already refunded",
                amount, refunded
            )));
        }

        let previous = file.case.disputed_amount;
        file.case.disputed_amount = amount;
        file.case.touch();

        let stage = file.case.current_stage;
        let mut write = CaseWrite::new(file.case.clone());
        write.history(
            HistoryEntry::new(case_id, stage, stage, HistoryAction::DisputedAmountChanged, actor)
                .with_note(format!("{} -> {}", previous, amount)),
        );
        let case = self.commit(write).await?;
        file.case = case.clone();
        self.remind(&file);
        Ok(case)
    }

    pub async fn set_next_action(
        &self,
        case_id: Uuid,
        next_action: Option<String>,
        due: Option<NaiveDate>,
        actor: &str,
    ) -> Result<Case, EngineError> {
        require_actor(actor)?;
        let mut file = self.load(case_id).await?;
        file.case.ensure_open()?;

        file.case.next_action = next_action.filter(|a| !a.trim().is_empty());
        file.case.next_action_due = due;
        file.case.touch();

        let stage = file.case.current_stage;
        let mut entry =
            HistoryEntry::new(case_id, stage, stage, HistoryAction::NextActionChanged, actor);
        if let Some(action) = &file.case.next_action {
            entry = entry.with_note(action.clone());
        }
        let mut write = CaseWrite::new(file.case);
        write.history(entry);
        self.commit(write).await
    }

    // ========================================================================
    // Stage records
    // ========================================================================

    /// Create the record for a stage, as a draft or already submitted
    pub async fn submit_stage(
        &self,
        case_id: Uuid,
        payload: StagePayload,
        submit: bool,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        require_actor(actor)?;
        payload.validate()?;

        let file = self.load(case_id).await?;
        let case = &file.case;
        ensure_accepting_records(case)?;

        let stage = payload.stage();
        if !stage.accepts_submission_at(case.current_stage) {
            return Err(EngineError::StageMismatch {
                expected: stage,
                actual: case.current_stage,
            });
        }
        if file.record(stage).is_some() {
            return Err(EngineError::Duplicate(DuplicateKind::StageRecord { stage }));
        }

        let mut record = StageRecord::new(case_id, payload, actor);
        let action = if submit {
            record.submit()?;
            HistoryAction::RecordSubmitted
        } else {
            HistoryAction::RecordCreated
        };

        let mut case = file.case;
        case.touch();
        let current = case.current_stage;
        let mut write = CaseWrite::new(case);
        write
            .push(Mutation::InsertRecord(record.clone()))
            .history(
                HistoryEntry::new(case_id, current, current, action, actor)
                    .with_note(format!("{} record {}", stage, record.status)),
            );
        let case = self.commit(write).await?;

        debug!(case_id = %case_id, stage = stage.id(), status = %record.status, "stage record created");
        Ok(RecordOutcome {
            case,
            record,
            route: None,
            refund: None,
        })
    }

    /// Replace the payload of a draft or rejected record
    pub async fn revise_record(
        &self,
        case_id: Uuid,
        stage: Stage,
        payload: StagePayload,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        self.update_record(case_id, stage, actor, HistoryAction::RecordRevised, |record| {
            record.revise(payload)
        })
        .await
    }

    /// draft -> submitted
    pub async fn submit_record(
        &self,
        case_id: Uuid,
        stage: Stage,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        self.update_record(case_id, stage, actor, HistoryAction::RecordSubmitted, |record| {
            record.submit()
        })
        .await
    }

    /// submitted -> rejected. The case does not move.
    pub async fn reject_record(
        &self,
        case_id: Uuid,
        stage: Stage,
        reason: Option<String>,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        let decided_by = actor.to_string();
        self.update_record(case_id, stage, actor, HistoryAction::RecordRejected, |record| {
            record.decide(RecordStatus::Rejected, &decided_by)?;
            if reason.is_some() {
                record.notes = reason;
            }
            Ok(())
        })
        .await
    }

    async fn update_record<F>(
        &self,
        case_id: Uuid,
        stage: Stage,
        actor: &str,
        action: HistoryAction,
        change: F,
    ) -> Result<RecordOutcome, EngineError>
    where
        F: FnOnce(&mut StageRecord) -> Result<(), EngineError>,
    {
        require_actor(actor)?;
        let file = self.load(case_id).await?;
        ensure_accepting_records(&file.case)?;

        let mut record = find_record(&file, stage)?;
        change(&mut record)?;

        let mut case = file.case;
        case.touch();
        let current = case.current_stage;
        let note = match (&record.notes, action) {
            (Some(reason), HistoryAction::RecordRejected) => reason.clone(),
            _ => format!("{} record {}", stage, record.status),
        };
        let entry = HistoryEntry::new(case_id, current, current, action, actor).with_note(note);
        let mut write = CaseWrite::new(case);
        write.push(Mutation::UpdateRecord(record.clone())).history(entry);
        let case = self.commit(write).await?;

        Ok(RecordOutcome {
            case,
            record,
            route: None,
            refund: None,
        })
    }

    /// submitted -> approved, then route the case. With `refund`, a refund
    /// authorized by the route is opened in the same write; if the route does
    /// not authorize one, or opening it fails, nothing is approved.
    pub async fn approve_record(
        &self,
        case_id: Uuid,
        stage: Stage,
        refund: Option<ApprovalRefund>,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        require_actor(actor)?;
        let mut file = self.load(case_id).await?;
        ensure_accepting_records(&file.case)?;

        let mut record = find_record(&file, stage)?;
        if !stage.accepts_submission_at(file.case.current_stage) {
            return Err(EngineError::StageMismatch {
                expected: stage,
                actual: file.case.current_stage,
            });
        }

        let route = router::route(&record.payload)?;
        record.decide(RecordStatus::Approved, actor)?;
        record.next_stage = route.next_stage();

        let from = file.case.current_stage;
        match route {
            RouteDecision::Advance(target) => {
                file.case.advance_to(target);
            }
            RouteDecision::AwaitingChoice => {
                file.case.advance_to(stage);
                file.case.hold_for_choice(stage);
            }
            RouteDecision::Close(outcome) => {
                file.case.advance_to(stage);
                file.case.close(outcome);
            }
        }
        let to = file.case.current_stage;

        let mut entry = HistoryEntry::new(case_id, from, to, HistoryAction::RecordApproved, actor);
        if let Some(value) = decision_value(&record.payload) {
            entry = entry.with_decision(decision_point(stage), value);
        }
        put_record(&mut file, record.clone());

        let mut write = CaseWrite::new(file.case.clone());
        write.push(Mutation::UpdateRecord(record.clone())).history(entry);

        let opened = match refund {
            None => None,
            Some(request) => {
                if !route.authorizes_refund() {
                    return Err(EngineError::precondition(format!(
                        "approval of {} does not authorize a refund",
                        stage
                    )));
                }
                let refund = refunds::prepare_refund(
                    &file,
                    RefundOrigin::Decision(stage),
                    request.amount,
                    request.method,
                    request.notes,
                    actor,
                )?;
                write
                    .push(Mutation::InsertRefund(refund.clone()))
                    .history(refunds::opened_entry(&file.case, &refund, actor));
                file.refunds.push(refund.clone());
                Some(refund)
            }
        };

        let case = self.commit(write).await?;
        file.case = case.clone();

        info!(
            case_id = %case_id,
            stage = stage.id(),
            from = from.id(),
            to = case.current_stage.id(),
            route = ?route,
            "stage record approved"
        );

        let refund = opened.map(|r| file.refund_view(&r));
        self.remind(&file);
        Ok(RecordOutcome {
            case,
            record,
            route: Some(route),
            refund,
        })
    }

    // ========================================================================
    // Manual choice and withdrawal
    // ========================================================================

    /// Resolve a decision the router left to a person
    pub async fn choose_next_stage(
        &self,
        case_id: Uuid,
        choice: ManualChoice,
        actor: &str,
    ) -> Result<RecordOutcome, EngineError> {
        require_actor(actor)?;
        let mut file = self.load(case_id).await?;
        file.case.ensure_open()?;

        let held = file.case.awaiting_choice.ok_or_else(|| {
            EngineError::precondition(format!(
                "case {} has no pending manual choice",
                case_id
            ))
        })?;
        let target = router::route_choice(held, choice)?;

        let mut record = find_record(&file, held)?;
        record.next_stage = Some(target);
        record.updated_at = chrono::Utc::now();

        let from = file.case.current_stage;
        file.case.advance_to(target);
        put_record(&mut file, record.clone());

        let mut write = CaseWrite::new(file.case.clone());
        write.push(Mutation::UpdateRecord(record.clone())).history(
            HistoryEntry::new(case_id, from, target, HistoryAction::ManualChoice, actor)
                .with_decision(decision_point(held), choice.as_str()),
        );
        let case = self.commit(write).await?;

        info!(case_id = %case_id, choice = choice.as_str(), to = target.id(), "manual choice made");
        Ok(RecordOutcome {
            case,
            record,
            route: Some(RouteDecision::Advance(target)),
            refund: None,
        })
    }

    /// Abandon the running proceeding. Rewinds to the decision that opened
    /// the track and closes the case as withdrawn.
    pub async fn withdraw_case(
        &self,
        case_id: Uuid,
        reason: Option<String>,
        actor: &str,
    ) -> Result<Case, EngineError> {
        require_actor(actor)?;
        let file = self.load(case_id).await?;
        file.case.ensure_open()?;

        let current = file.case.current_stage;
        if let Some(held) = file.case.awaiting_choice {
            return Err(EngineError::precondition(format!(
                "case is awaiting a choice at {}; choose instead of withdrawing",
                held
            )));
        }
        let withdrawable = (Stage::ObjectionFiling..=Stage::SupremeCourtFiling).contains(&current);
        let (origin, decision) = match (current.track_origin(), current.track_decision()) {
            (Some(origin), Some(decision)) if withdrawable => (origin, decision),
            _ => {
                return Err(EngineError::precondition(format!(
                    "withdrawal is only possible during objection, appeal or supreme court proceedings; case is at {}",
                    current
                )))
            }
        };
        if file.record(decision).is_some_and(|r| r.is_approved()) {
            return Err(EngineError::precondition(format!(
                "{} is already approved",
                decision
            )));
        }

        let mut case = file.case.clone();
        case.rewind_for_withdrawal(origin);

        let mut write = CaseWrite::new(case);
        for record in file
            .records
            .iter()
            .filter(|r| r.stage.track() == current.track() && !r.is_approved())
        {
            let mut record = record.clone();
            record.withdraw();
            write.push(Mutation::UpdateRecord(record));
        }
        let mut entry = HistoryEntry::new(case_id, current, origin, HistoryAction::Withdrawal, actor)
            .with_decision("withdrawal", current.track().as_str());
        if let Some(reason) = reason {
            entry = entry.with_note(reason);
        }
        write.history(entry);
        let case = self.commit(write).await?;

        info!(case_id = %case_id, from = current.id(), to = origin.id(), "case withdrawn");
        Ok(case)
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    async fn load(&self, case_id: Uuid) -> Result<CaseFile, EngineError> {
        Ok(self.store.load_file(case_id).await?)
    }

    async fn commit(&self, write: CaseWrite) -> Result<Case, EngineError> {
        debug_assert!(write.has_history());
        let case_id = write.case.case_id;
        self.store.apply(write).await.map_err(|e| {
            let err = EngineError::from(e);
            if !err.kind().is_recoverable() {
                warn!(case_id = %case_id, error = %err, "case write failed");
            }
            err
        })
    }

    /// Queue reminders for every stage with an unclaimed loss
    fn remind(&self, file: &CaseFile) {
        if !self.reminders.is_enabled() {
            return;
        }
        let reminders: Vec<Reminder> = loss::claim_status_by_stage(file)
            .into_iter()
            .filter(|e| e.eligible)
            .filter_map(|e| {
                e.loss_amount.map(|amount| {
                    Reminder::claim_due(file.case.case_id, e.stage, amount, &file.case.currency)
                })
            })
            .collect();
        self.reminders.dispatch(reminders);
    }
}

fn require_actor(actor: &str) -> Result<(), EngineError> {
    if actor.trim().is_empty() {
        return Err(EngineError::field("acted_by", "is required"));
    }
    Ok(())
}

/// Record commands need an open case that is not held for a choice
fn ensure_accepting_records(case: &Case) -> Result<(), EngineError> {
    case.ensure_open()?;
    if let Some(held) = case.awaiting_choice {
        return Err(EngineError::precondition(format!(
            "case is awaiting a manual choice at {}",
            held
        )));
    }
    if case.is_on_refund_path() {
        return Err(EngineError::precondition(format!(
            "case is on the refund path at {}; stage records are closed",
            case.current_stage
        )));
    }
    Ok(())
}

fn find_record(file: &CaseFile, stage: Stage) -> Result<StageRecord, EngineError> {
    file.record(stage)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("{} record for case {}", stage, file.case.case_id)))
}

fn put_record(file: &mut CaseFile, record: StageRecord) {
    if let Some(slot) = file
        .records
        .iter_mut()
        .find(|r| r.record_id == record.record_id)
    {
        *slot = record;
    }
}

fn decision_value(payload: &StagePayload) -> Option<&'static str> {
    payload
        .decision_type()
        .map(|d| d.as_str())
        .or_else(|| payload.assessment_route().map(|r| r.as_str()))
}
