//! In-memory case store
//!
//! Used by tests and by the server when no database is configured. A write
//! is staged against a copy of the affected case's rows under one write lock
//! and swapped in only after every constraint has passed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{CaseFile, CaseStore, CaseWrite, Mutation, StoreError, UniqueConstraint};
use crate::case::Case;
use crate::history::HistoryEntry;

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<Uuid, CaseFile>,
    history: HashMap<Uuid, Vec<HistoryEntry>>,
}

/// In-memory [`CaseStore`]
#[derive(Debug, Default)]
pub struct MemoryCaseStore {
    state: RwLock<MemoryState>,
    fail_next_apply: AtomicBool,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail after staging, as a backend would on a
    /// mid-transaction crash
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn create_case(&self, case: &Case, opened: &HistoryEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.files.contains_key(&case.case_id) {
            return Err(StoreError::Backend(format!(
                "case {} already exists",
                case.case_id
            )));
        }
        state.files.insert(case.case_id, CaseFile::new(case.clone()));
        state.history.insert(case.case_id, vec![opened.clone()]);
        Ok(())
    }

    async fn load_case(&self, case_id: Uuid) -> Result<Case, StoreError> {
        let state = self.state.read().await;
        state
            .files
            .get(&case_id)
            .map(|f| f.case.clone())
            .ok_or_else(|| StoreError::NotFound(format!("case {}", case_id)))
    }

    async fn load_file(&self, case_id: Uuid) -> Result<CaseFile, StoreError> {
        let state = self.state.read().await;
        state
            .files
            .get(&case_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("case {}", case_id)))
    }

    async fn apply(&self, write: CaseWrite) -> Result<Case, StoreError> {
        let case_id = write.case.case_id;
        let mut state = self.state.write().await;

        let current = state
            .files
            .get(&case_id)
            .ok_or_else(|| StoreError::NotFound(format!("case {}", case_id)))?;
        if current.case.version != write.case.version {
            return Err(StoreError::Conflict { case_id });
        }

        let mut staged = current.clone();
        let mut appended = Vec::new();
        for mutation in write.mutations {
            stage_mutation(&mut staged, &mut appended, mutation)?;
        }

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }

        let mut case = write.case;
        case.version += 1;
        staged.case = case.clone();

        debug!(
            case_id = %case_id,
            version = case.version,
            history = appended.len(),
            "applied case write"
        );

        state.files.insert(case_id, staged);
        state.history.entry(case_id).or_default().extend(appended);
        Ok(case)
    }

    async fn history(&self, case_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError> {
        let state = self.state.read().await;
        state
            .history
            .get(&case_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("case {}", case_id)))
    }
}

fn stage_mutation(
    file: &mut CaseFile,
    history: &mut Vec<HistoryEntry>,
    mutation: Mutation,
) -> Result<(), StoreError> {
    match mutation {
        Mutation::InsertRecord(record) => {
            if file.records.iter().any(|r| r.stage == record.stage) {
                return Err(StoreError::UniqueViolation(UniqueConstraint::StageRecord(
                    record.stage,
                )));
            }
            file.records.push(record);
        }
        Mutation::UpdateRecord(record) => {
            let slot = file
                .records
                .iter_mut()
                .find(|r| r.record_id == record.record_id)
                .ok_or_else(|| StoreError::NotFound(format!("record {}", record.record_id)))?;
            *slot = record;
        }
        Mutation::InsertRefund(refund) => {
            check_origin_slot(file, &refund)?;
            file.refunds.push(refund);
        }
        Mutation::UpdateRefund(refund) => {
            check_origin_slot(file, &refund)?;
            let slot = file
                .refunds
                .iter_mut()
                .find(|r| r.refund_id == refund.refund_id)
                .ok_or_else(|| StoreError::NotFound(format!("refund {}", refund.refund_id)))?;
            *slot = refund;
        }
        Mutation::InsertTransfer(transfer) => {
            if file.refund(transfer.refund_id).is_none() {
                return Err(StoreError::NotFound(format!(
                    "refund {}",
                    transfer.refund_id
                )));
            }
            file.transfers.push(transfer);
        }
        Mutation::UpdateTransfer(transfer) => {
            let slot = file
                .transfers
                .iter_mut()
                .find(|t| t.transfer_id == transfer.transfer_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("transfer {}", transfer.transfer_id))
                })?;
            *slot = transfer;
        }
        Mutation::InsertClaim(claim) => {
            if file.claim(claim.stage).is_some() {
                return Err(StoreError::UniqueViolation(UniqueConstraint::ClaimStage(
                    claim.stage,
                )));
            }
            file.claims.push(claim);
        }
        Mutation::UpdateClaim(claim) => {
            let slot = file
                .claims
                .iter_mut()
                .find(|c| c.claim_id == claim.claim_id)
                .ok_or_else(|| StoreError::NotFound(format!("claim {}", claim.claim_id)))?;
            *slot = claim;
        }
        Mutation::AppendHistory(entry) => history.push(entry),
    }
    Ok(())
}

fn check_origin_slot(
    file: &CaseFile,
    refund: &crate::refund::RefundProcess,
) -> Result<(), StoreError> {
    if let Some(slot) = refund.origin_slot() {
        let taken = file
            .refunds
            .iter()
            .any(|r| r.refund_id != refund.refund_id && r.origin_slot() == Some(slot));
        if taken {
            return Err(StoreError::UniqueViolation(
                UniqueConstraint::RefundOriginSlot(slot),
            ));
        }
    }
    Ok(())
}
