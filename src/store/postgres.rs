//! Postgres case store
//!
//! Database persistence for cases and their owned rows. Every `apply` runs
//! in one SERIALIZABLE transaction; uniqueness rules are backed by the unique
//! indexes in `migrations/0001_tax_dispute.sql`.
//!
//! NOTE: All queries use runtime-checked sqlx::query() instead of compile-time
//! sqlx::query!() macros because the tables are created by migrations that may
//! not exist at compile time.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use async_trait::async_trait;

use super::{CaseFile, CaseStore, CaseWrite, Mutation, StoreError, UniqueConstraint};
use crate::case::Case;
use crate::claim::KianSubmission;
use crate::history::HistoryEntry;
use crate::records::StageRecord;
use crate::refund::{BankTransferRequest, RefundOrigin, RefundProcess};
use crate::stage::Stage;

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_tax_dispute.sql");

/// Postgres-backed [`CaseStore`]
#[derive(Clone, Debug)]
pub struct PgCaseStore {
    pool: PgPool,
}

impl PgCaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        info!("tax_dispute schema ready");
        Ok(())
    }

    async fn stage_mutation(
        tx: &mut Transaction<'_, Postgres>,
        case_id: Uuid,
        mutation: Mutation,
    ) -> Result<(), StoreError> {
        match mutation {
            Mutation::InsertRecord(record) => {
                let unique = UniqueConstraint::StageRecord(record.stage);
                sqlx::query(
                    r#"
                    INSERT INTO tax_dispute.stage_records
                    (record_id, case_id, stage, status, payload, next_stage, notes,
                     created_by, created_at, updated_at, submitted_at, decided_by, decided_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(record.record_id)
                .bind(record.case_id)
                .bind(stage_col(record.stage))
                .bind(record.status.as_str())
                .bind(to_json(&record.payload)?)
                .bind(record.next_stage.map(stage_col))
                .bind(&record.notes)
                .bind(&record.created_by)
                .bind(record.created_at)
                .bind(record.updated_at)
                .bind(record.submitted_at)
                .bind(&record.decided_by)
                .bind(record.decided_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, Some(unique)))?;
            }
            Mutation::UpdateRecord(record) => {
                let result = sqlx::query(
                    r#"
                    UPDATE tax_dispute.stage_records SET
                        status = $2, payload = $3, next_stage = $4, notes = $5,
                        updated_at = $6, submitted_at = $7, decided_by = $8, decided_at = $9
                    WHERE record_id = $1
                    "#,
                )
                .bind(record.record_id)
                .bind(record.status.as_str())
                .bind(to_json(&record.payload)?)
                .bind(record.next_stage.map(stage_col))
                .bind(&record.notes)
                .bind(record.updated_at)
                .bind(record.submitted_at)
                .bind(&record.decided_by)
                .bind(record.decided_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, None))?;
                ensure_found(result.rows_affected(), "record", record.record_id)?;
            }
            Mutation::InsertRefund(refund) => {
                let unique = refund.origin_slot().map(UniqueConstraint::RefundOriginSlot);
                sqlx::query(
                    r#"
                    INSERT INTO tax_dispute.refund_processes
                    (refund_id, case_id, origin_stage_id, origin_slot, sequence_number, amount,
                     method, notes, created_by, created_at, deleted_at, deleted_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(refund.refund_id)
                .bind(refund.case_id)
                .bind(i16::from(refund.origin.id()))
                .bind(refund.origin_slot().map(i16::from))
                .bind(refund.sequence_number as i32)
                .bind(refund.amount)
                .bind(refund.method.as_str())
                .bind(&refund.notes)
                .bind(&refund.created_by)
                .bind(refund.created_at)
                .bind(refund.deleted_at)
                .bind(&refund.deleted_by)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, unique))?;
            }
            Mutation::UpdateRefund(refund) => {
                let unique = refund.origin_slot().map(UniqueConstraint::RefundOriginSlot);
                let result = sqlx::query(
                    r#"
                    UPDATE tax_dispute.refund_processes SET
                        origin_slot = $2, amount = $3, method = $4, notes = $5,
                        deleted_at = $6, deleted_by = $7
                    WHERE refund_id = $1
                    "#,
                )
                .bind(refund.refund_id)
                .bind(refund.origin_slot().map(i16::from))
                .bind(refund.amount)
                .bind(refund.method.as_str())
                .bind(&refund.notes)
                .bind(refund.deleted_at)
                .bind(&refund.deleted_by)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, unique))?;
                ensure_found(result.rows_affected(), "refund", refund.refund_id)?;
            }
            Mutation::InsertTransfer(t) => {
                sqlx::query(
                    r#"
                    INSERT INTO tax_dispute.bank_transfer_requests
                    (transfer_id, refund_id, status, requested_on, instruction_received_on,
                     received_on, received_amount, bank_name, account_name, account_number,
                     status_reason, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                    "#,
                )
                .bind(t.transfer_id)
                .bind(t.refund_id)
                .bind(t.status.as_str())
                .bind(t.requested_on)
                .bind(t.instruction_received_on)
                .bind(t.received_on)
                .bind(t.received_amount)
                .bind(&t.bank_name)
                .bind(&t.account_name)
                .bind(&t.account_number)
                .bind(&t.status_reason)
                .bind(t.created_at)
                .bind(t.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, None))?;
            }
            Mutation::UpdateTransfer(t) => {
                let result = sqlx::query(
                    r#"
                    UPDATE tax_dispute.bank_transfer_requests SET
                        status = $2, instruction_received_on = $3, received_on = $4,
                        received_amount = $5, status_reason = $6, updated_at = $7
                    WHERE transfer_id = $1
                    "#,
                )
                .bind(t.transfer_id)
                .bind(t.status.as_str())
                .bind(t.instruction_received_on)
                .bind(t.received_on)
                .bind(t.received_amount)
                .bind(&t.status_reason)
                .bind(t.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, None))?;
                ensure_found(result.rows_affected(), "transfer", t.transfer_id)?;
            }
            Mutation::InsertClaim(claim) => {
                let unique = UniqueConstraint::ClaimStage(claim.stage);
                sqlx::query(
                    r#"
                    INSERT INTO tax_dispute.kian_submissions
                    (claim_id, case_id, stage_id, loss_amount, status, response,
                     created_by, created_at, updated_at, submitted_at, closed_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(claim.claim_id)
                .bind(claim.case_id)
                .bind(stage_col(claim.stage))
                .bind(claim.loss_amount)
                .bind(claim.status.as_str())
                .bind(claim.response.as_ref().map(to_json).transpose()?)
                .bind(&claim.created_by)
                .bind(claim.created_at)
                .bind(claim.updated_at)
                .bind(claim.submitted_at)
                .bind(claim.closed_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, Some(unique)))?;
            }
            Mutation::UpdateClaim(claim) => {
                let result = sqlx::query(
                    r#"
                    UPDATE tax_dispute.kian_submissions SET
                        status = $2, response = $3, updated_at = $4,
                        submitted_at = $5, closed_at = $6
                    WHERE claim_id = $1
                    "#,
                )
                .bind(claim.claim_id)
                .bind(claim.status.as_str())
                .bind(claim.response.as_ref().map(to_json).transpose()?)
                .bind(claim.updated_at)
                .bind(claim.submitted_at)
                .bind(claim.closed_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_db_err(e, case_id, None))?;
                ensure_found(result.rows_affected(), "claim", claim.claim_id)?;
            }
            Mutation::AppendHistory(entry) => insert_history(&mut **tx, &entry).await?,
        }
        Ok(())
    }
}

#[async_trait]
impl CaseStore for PgCaseStore {
    async fn create_case(&self, case: &Case, opened: &HistoryEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            r#"
            INSERT INTO tax_dispute.cases
            (case_id, case_type, tax_type, fiscal_period, reported_amount, disputed_amount,
             currency, current_stage, awaiting_choice, completed, outcome, next_action,
             next_action_due, version, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(case.case_id)
        .bind(case.case_type.as_str())
        .bind(&case.tax_type)
        .bind(&case.fiscal_period)
        .bind(case.reported_amount)
        .bind(case.disputed_amount)
        .bind(&case.currency)
        .bind(stage_col(case.current_stage))
        .bind(case.awaiting_choice.map(stage_col))
        .bind(case.completed)
        .bind(case.outcome.map(|o| o.as_str()))
        .bind(&case.next_action)
        .bind(case.next_action_due)
        .bind(case.version)
        .bind(&case.created_by)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        insert_history(&mut *tx, opened).await?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn load_case(&self, case_id: Uuid) -> Result<Case, StoreError> {
        let row = sqlx::query_as::<_, CaseRow>(
            r#"
            SELECT case_id, case_type, tax_type, fiscal_period, reported_amount, disputed_amount,
                   currency, current_stage, awaiting_choice, completed, outcome, next_action,
                   next_action_due, version, created_by, created_at, updated_at
            FROM tax_dispute.cases
            WHERE case_id = $1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::NotFound(format!("case {}", case_id)))?;

        row.try_into()
    }

    async fn load_file(&self, case_id: Uuid) -> Result<CaseFile, StoreError> {
        let case = self.load_case(case_id).await?;

        let records = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT record_id, case_id, stage, status, payload, next_stage, notes,
                   created_by, created_at, updated_at, submitted_at, decided_by, decided_at
            FROM tax_dispute.stage_records
            WHERE case_id = $1
            ORDER BY stage
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let refunds = sqlx::query_as::<_, RefundRow>(
            r#"
            SELECT refund_id, case_id, origin_stage_id, sequence_number, amount, method,
                   notes, created_by, created_at, deleted_at, deleted_by
            FROM tax_dispute.refund_processes
            WHERE case_id = $1
            ORDER BY sequence_number
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let transfers = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT t.transfer_id, t.refund_id, t.status, t.requested_on,
                   t.instruction_received_on, t.received_on, t.received_amount,
                   t.bank_name, t.account_name, t.account_number, t.status_reason,
                   t.created_at, t.updated_at
            FROM tax_dispute.bank_transfer_requests t
            JOIN tax_dispute.refund_processes r ON r.refund_id = t.refund_id
            WHERE r.case_id = $1
            ORDER BY t.created_at
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let claims = sqlx::query_as::<_, ClaimRow>(
            r#"
            SELECT claim_id, case_id, stage_id, loss_amount, status, response,
                   created_by, created_at, updated_at, submitted_at, closed_at
            FROM tax_dispute.kian_submissions
            WHERE case_id = $1
            ORDER BY stage_id
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(CaseFile {
            case,
            records: collect_rows(records)?,
            refunds: collect_rows(refunds)?,
            transfers: collect_rows(transfers)?,
            claims: collect_rows(claims)?,
        })
    }

    async fn apply(&self, write: CaseWrite) -> Result<Case, StoreError> {
        let case_id = write.case.case_id;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let mut case = write.case;
        let result = sqlx::query(
            r#"
            UPDATE tax_dispute.cases SET
                disputed_amount = $3, current_stage = $4, awaiting_choice = $5,
                completed = $6, outcome = $7, next_action = $8, next_action_due = $9,
                updated_at = $10, version = version + 1
            WHERE case_id = $1 AND version = $2
            "#,
        )
        .bind(case_id)
        .bind(case.version)
        .bind(case.disputed_amount)
        .bind(stage_col(case.current_stage))
        .bind(case.awaiting_choice.map(stage_col))
        .bind(case.completed)
        .bind(case.outcome.map(|o| o.as_str()))
        .bind(&case.next_action)
        .bind(case.next_action_due)
        .bind(case.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, case_id, None))?;

        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM tax_dispute.cases WHERE case_id = $1")
                    .bind(case_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;
            return Err(match exists {
                Some(_) => StoreError::Conflict { case_id },
                None => StoreError::NotFound(format!("case {}", case_id)),
            });
        }

        let count = write.mutations.len();
        for mutation in write.mutations {
            Self::stage_mutation(&mut tx, case_id, mutation).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err(e, case_id, None))?;

        case.version += 1;
        debug!(case_id = %case_id, version = case.version, mutations = count, "applied case write");
        Ok(case)
    }

    async fn history(&self, case_id: Uuid) -> Result<Vec<HistoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT entry_id, case_id, stage_from, stage_to, action, acted_by,
                   decision_point, decision_value, note, recorded_at
            FROM tax_dispute.workflow_history
            WHERE case_id = $1
            ORDER BY seq
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        collect_rows(rows)
    }
}

async fn insert_history<'e, E>(executor: E, entry: &HistoryEntry) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO tax_dispute.workflow_history
        (entry_id, case_id, stage_from, stage_to, action, acted_by,
         decision_point, decision_value, note, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.entry_id)
    .bind(entry.case_id)
    .bind(stage_col(entry.stage_from))
    .bind(stage_col(entry.stage_to))
    .bind(entry.action.as_str())
    .bind(&entry.acted_by)
    .bind(&entry.decision_point)
    .bind(&entry.decision_value)
    .bind(&entry.note)
    .bind(entry.recorded_at)
    .execute(executor)
    .await
    .map_err(backend)?;
    Ok(())
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn index_name(constraint: UniqueConstraint) -> &'static str {
    match constraint {
        UniqueConstraint::StageRecord(_) => "uq_stage_records_case_stage",
        UniqueConstraint::RefundOriginSlot(_) => "uq_refund_origin_slot",
        UniqueConstraint::ClaimStage(_) => "uq_kian_case_stage",
    }
}

/// Translate unique violations on the named indexes and serialization
/// failures; everything else is a backend error
fn map_db_err(err: sqlx::Error, case_id: Uuid, unique: Option<UniqueConstraint>) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("23505") => {
                if let Some(constraint) = unique.filter(|c| db.constraint() == Some(index_name(*c))) {
                    return StoreError::UniqueViolation(constraint);
                }
            }
            Some("40001") => return StoreError::Conflict { case_id },
            _ => {}
        }
    }
    backend(err)
}

fn ensure_found(rows: u64, what: &str, id: Uuid) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::NotFound(format!("{} {}", what, id)));
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn stage_col(stage: Stage) -> i16 {
    i16::from(stage.id())
}

fn stage_from_col(value: i16) -> Result<Stage, StoreError> {
    u8::try_from(value)
        .ok()
        .and_then(Stage::from_id)
        .ok_or_else(|| StoreError::Backend(format!("invalid stage column value {}", value)))
}

fn parse_col<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Backend)
}

fn collect_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Database row for a case
#[derive(Debug, FromRow)]
struct CaseRow {
    case_id: Uuid,
    case_type: String,
    tax_type: String,
    fiscal_period: String,
    reported_amount: Decimal,
    disputed_amount: Decimal,
    currency: String,
    current_stage: i16,
    awaiting_choice: Option<i16>,
    completed: bool,
    outcome: Option<String>,
    next_action: Option<String>,
    next_action_due: Option<NaiveDate>,
    version: i64,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CaseRow> for Case {
    type Error = StoreError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        Ok(Self {
            case_id: row.case_id,
            case_type: parse_col(&row.case_type)?,
            tax_type: row.tax_type,
            fiscal_period: row.fiscal_period,
            reported_amount: row.reported_amount,
            disputed_amount: row.disputed_amount,
            currency: row.currency,
            current_stage: stage_from_col(row.current_stage)?,
            awaiting_choice: row.awaiting_choice.map(stage_from_col).transpose()?,
            completed: row.completed,
            outcome: row.outcome.as_deref().map(parse_col).transpose()?,
            next_action: row.next_action,
            next_action_due: row.next_action_due,
            version: row.version,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    record_id: Uuid,
    case_id: Uuid,
    stage: i16,
    status: String,
    payload: serde_json::Value,
    next_stage: Option<i16>,
    notes: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
    decided_at: Option<DateTime<Utc>>,
}

impl TryFrom<RecordRow> for StageRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            record_id: row.record_id,
            case_id: row.case_id,
            stage: stage_from_col(row.stage)?,
            status: parse_col(&row.status)?,
            payload: from_json(row.payload)?,
            next_stage: row.next_stage.map(stage_from_col).transpose()?,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            submitted_at: row.submitted_at,
            decided_by: row.decided_by,
            decided_at: row.decided_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefundRow {
    refund_id: Uuid,
    case_id: Uuid,
    origin_stage_id: i16,
    sequence_number: i32,
    amount: Decimal,
    method: String,
    notes: Option<String>,
    created_by: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
}

impl TryFrom<RefundRow> for RefundProcess {
    type Error = StoreError;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        let origin = u8::try_from(row.origin_stage_id)
            .ok()
            .and_then(RefundOrigin::from_id)
            .ok_or_else(|| {
                StoreError::Backend(format!("invalid origin stage {}", row.origin_stage_id))
            })?;
        Ok(Self {
            refund_id: row.refund_id,
            case_id: row.case_id,
            origin,
            sequence_number: u32::try_from(row.sequence_number)
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            amount: row.amount,
            method: parse_col(&row.method)?,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    transfer_id: Uuid,
    refund_id: Uuid,
    status: String,
    requested_on: NaiveDate,
    instruction_received_on: Option<NaiveDate>,
    received_on: Option<NaiveDate>,
    received_amount: Option<Decimal>,
    bank_name: Option<String>,
    account_name: Option<String>,
    account_number: Option<String>,
    status_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for BankTransferRequest {
    type Error = StoreError;

    fn try_from(row: TransferRow) -> Result<Self, Self::Error> {
        Ok(Self {
            transfer_id: row.transfer_id,
            refund_id: row.refund_id,
            status: parse_col(&row.status)?,
            requested_on: row.requested_on,
            instruction_received_on: row.instruction_received_on,
            received_on: row.received_on,
            received_amount: row.received_amount,
            bank_name: row.bank_name,
            account_name: row.account_name,
            account_number: row.account_number,
            status_reason: row.status_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ClaimRow {
    claim_id: Uuid,
    case_id: Uuid,
    stage_id: i16,
    loss_amount: Decimal,
    status: String,
    response: Option<serde_json::Value>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ClaimRow> for KianSubmission {
    type Error = StoreError;

    fn try_from(row: ClaimRow) -> Result<Self, Self::Error> {
        Ok(Self {
            claim_id: row.claim_id,
            case_id: row.case_id,
            stage: stage_from_col(row.stage_id)?,
            loss_amount: row.loss_amount,
            status: parse_col(&row.status)?,
            response: row.response.map(from_json).transpose()?,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            submitted_at: row.submitted_at,
            closed_at: row.closed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    entry_id: Uuid,
    case_id: Uuid,
    stage_from: i16,
    stage_to: i16,
    action: String,
    acted_by: String,
    decision_point: Option<String>,
    decision_value: Option<String>,
    note: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = StoreError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entry_id: row.entry_id,
            case_id: row.case_id,
            stage_from: stage_from_col(row.stage_from)?,
            stage_to: stage_from_col(row.stage_to)?,
            action: parse_col(&row.action)?,
            acted_by: row.acted_by,
            decision_point: row.decision_point,
            decision_value: row.decision_value,
            note: row.note,
            recorded_at: row.recorded_at,
        })
    }
}
