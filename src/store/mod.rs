//! Case Persistence
//!
//! The engine talks to storage only through [`CaseStore`]. Every command
//! produces one [`CaseWrite`]: the updated case plus the record, refund,
//! transfer, claim and history mutations that go with it. `apply` commits
//! all of it or none of it, checks the case version, and enforces the
//! uniqueness constraints at the point of write.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::case::Case;
use crate::claim::KianSubmission;
use crate::history::HistoryEntry;
use crate::records::StageRecord;
use crate::refund::{latest_transfer, BankTransferRequest, RefundProcess, RefundView};
use crate::stage::Stage;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryCaseStore;
#[cfg(feature = "database")]
pub use postgres::PgCaseStore;

/// Storage-level uniqueness rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueConstraint {
    /// (case, stage) on stage records
    StageRecord(Stage),
    /// (case, origin slot) on live single-instance refunds
    RefundOriginSlot(u8),
    /// (case, stage) on internal-loss claims
    ClaimStage(Stage),
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Case {case_id} version changed since it was loaded")]
    Conflict { case_id: Uuid },

    #[error("Unique constraint violated: {0:?}")]
    UniqueViolation(UniqueConstraint),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// One change inside a [`CaseWrite`]
#[derive(Debug, Clone)]
pub enum Mutation {
    InsertRecord(StageRecord),
    UpdateRecord(StageRecord),
    InsertRefund(RefundProcess),
    UpdateRefund(RefundProcess),
    InsertTransfer(BankTransferRequest),
    UpdateTransfer(BankTransferRequest),
    InsertClaim(KianSubmission),
    UpdateClaim(KianSubmission),
    AppendHistory(HistoryEntry),
}

/// Atomic unit of work for one case. `case.version` is the version observed
/// at load time; the store rejects the write if it has moved on and stores
/// `version + 1` on success.
#[derive(Debug, Clone)]
pub struct CaseWrite {
    pub case: Case,
    pub mutations: Vec<Mutation>,
}

impl CaseWrite {
    pub fn new(case: Case) -> Self {
        Self {
            case,
            mutations: Vec::new(),
        }
    }

    pub fn push(&mut self, mutation: Mutation) -> &mut Self {
        self.mutations.push(mutation);
        self
    }

    pub fn history(&mut self, entry: HistoryEntry) -> &mut Self {
        self.push(Mutation::AppendHistory(entry))
    }

    pub fn has_history(&self) -> bool {
        self.mutations
            .iter()
            .any(|m| matches!(m, Mutation::AppendHistory(_)))
    }
}

/// Read snapshot of a case and everything it owns
#[derive(Debug, Clone)]
pub struct CaseFile {
    pub case: Case,
    pub records: Vec<StageRecord>,
    /// Includes soft-deleted instances
    pub refunds: Vec<RefundProcess>,
    pub transfers: Vec<BankTransferRequest>,
    pub claims: Vec<KianSubmission>,
}

impl CaseFile {
    pub fn new(case: Case) -> Self {
        Self {
            case,
            records: Vec::new(),
            refunds: Vec::new(),
            transfers: Vec::new(),
            claims: Vec::new(),
        }
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.records.iter().find(|r| r.stage == stage)
    }

    pub fn live_refunds(&self) -> impl Iterator<Item = &RefundProcess> {
        self.refunds.iter().filter(|r| r.is_live())
    }

    pub fn refund(&self, refund_id: Uuid) -> Option<&RefundProcess> {
        self.refunds.iter().find(|r| r.refund_id == refund_id)
    }

    pub fn total_refunded(&self) -> Decimal {
        self.live_refunds().map(|r| r.amount).sum()
    }

    /// Headroom left under the disputed amount
    pub fn available_for_refund(&self) -> Decimal {
        (self.case.disputed_amount - self.total_refunded()).max(Decimal::ZERO)
    }

    pub fn next_refund_sequence(&self) -> u32 {
        self.refunds
            .iter()
            .map(|r| r.sequence_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub fn latest_transfer(&self, refund_id: Uuid) -> Option<&BankTransferRequest> {
        latest_transfer(refund_id, &self.transfers)
    }

    pub fn refund_view(&self, refund: &RefundProcess) -> RefundView {
        RefundView::build(refund, &self.transfers)
    }

    pub fn claim(&self, stage: Stage) -> Option<&KianSubmission> {
        self.claims.iter().find(|c| c.stage == stage)
    }

    pub fn claim_by_id(&self, claim_id: Uuid) -> Option<&KianSubmission> {
        self.claims.iter().find(|c| c.claim_id == claim_id)
    }
}

/// Persistence trait for cases and everything they own
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Insert a new case with its opening history entry
    async fn create_case(&self, case: &Case, opened: &HistoryEntry) -> Result<(), StoreError>;

    async fn load_case(&self, case_id: Uuid) -> Result<Case, StoreError>;

    async fn load_file(&self, case_id: Uuid) -> Result<CaseFile, StoreError>;

    /// Apply a write atomically; see [`CaseWrite`]
    async fn apply(&self, write: CaseWrite) -> Result<Case, StoreError>;

    /// History in recording order
    async fn history(&self, case_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError>;
}
