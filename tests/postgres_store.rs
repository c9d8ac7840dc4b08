//! Postgres case store integration tests
//!
//! Need a reachable database: TEST_DATABASE_URL, falling back to
//! DATABASE_URL. Every test opens its own cases under fresh ids, so they can
//! share one schema; history is append-only and is never cleaned up.

#[cfg(feature = "database")]
mod pg_tests {
    use std::sync::Arc;

    use anyhow::Result;
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use tokio::sync::OnceCell;

    use tax_dispute_engine::store::{CaseWrite, StoreError};
    use tax_dispute_engine::{
        AssessmentRoute, CaseStore, CaseType, DecisionType, DisputeEngine, ErrorKind, HistoryAction,
        HistoryEntry, NewCase, OpenRefund, PgCaseStore, RecordStatus, RefundMethod, Stage,
        StagePayload,
    };

    // =========================================================================
    // TEST INFRASTRUCTURE
    // =========================================================================

    /// Schema is applied once per test binary; concurrent DDL races
    static MIGRATED: OnceCell<()> = OnceCell::const_new();

    struct TestDb {
        pool: PgPool,
        store: Arc<PgCaseStore>,
    }

    impl TestDb {
        async fn new() -> Result<Self> {
            let url = std::env::var("TEST_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "postgresql:///tax_dispute_test".into());

            let pool = PgPool::connect(&url).await?;
            let store = PgCaseStore::new(pool.clone());
            MIGRATED.get_or_try_init(|| store.migrate()).await?;
            Ok(Self {
                pool,
                store: Arc::new(store),
            })
        }

        fn engine(&self) -> DisputeEngine {
            DisputeEngine::new(self.store.clone())
        }
    }

    fn new_case() -> NewCase {
        NewCase {
            case_type: CaseType::Audit,
            tax_type: "CIT".into(),
            fiscal_period: "2020".into(),
            reported_amount: Decimal::from(5_000),
            currency: "IDR".into(),
        }
    }

    async fn approve(engine: &DisputeEngine, case_id: uuid::Uuid, payload: StagePayload) -> Result<()> {
        let stage = payload.stage();
        engine.submit_stage(case_id, payload, true, "analyst").await?;
        engine.approve_record(case_id, stage, None, "reviewer").await?;
        Ok(())
    }

    // =========================================================================
    // TESTS
    // =========================================================================

    #[tokio::test]
    async fn test_case_file_round_trip() -> Result<()> {
        let db = TestDb::new().await?;
        let engine = db.engine();

        let case = engine.open_case(new_case(), "analyst").await?;
        approve(
            &engine,
            case.case_id,
            StagePayload::Filing {
                reported_amount: Decimal::from(5_000),
                filed_on: None,
            },
        )
        .await?;
        approve(
            &engine,
            case.case_id,
            StagePayload::Assessment {
                assessment_number: "00077/206/20".into(),
                assessed_amount: Decimal::from(3_000),
                route_choice: Some(AssessmentRoute::Objection),
            },
        )
        .await?;

        let file = db.store.load_file(case.case_id).await?;
        assert_eq!(file.case.current_stage, Stage::ObjectionFiling);
        assert_eq!(file.case.version, 4);
        assert_eq!(file.records.len(), 2);
        let assessment = file.record(Stage::Assessment).unwrap();
        assert_eq!(assessment.status, RecordStatus::Approved);
        assert_eq!(assessment.next_stage, Some(Stage::ObjectionFiling));
        assert_eq!(
            assessment.payload.assessment_route(),
            Some(AssessmentRoute::Objection)
        );

        let history = db.store.history(case.case_id).await?;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].action, HistoryAction::CaseOpened);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict() -> Result<()> {
        let db = TestDb::new().await?;
        let engine = db.engine();
        let case = engine.open_case(new_case(), "analyst").await?;

        let stale = db.store.load_case(case.case_id).await?;
        engine
            .set_next_action(case.case_id, Some("Call the tax office".into()), None, "analyst")
            .await?;

        let mut write = CaseWrite::new(stale.clone());
        write.history(HistoryEntry::new(
            stale.case_id,
            stale.current_stage,
            stale.current_stage,
            HistoryAction::NextActionChanged,
            "analyst",
        ));
        let err = db.store.apply(write).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_decision_refund_is_duplicate() -> Result<()> {
        let db = TestDb::new().await?;
        let engine = db.engine();
        let case = engine.open_case(new_case(), "analyst").await?;
        for payload in [
            StagePayload::Filing {
                reported_amount: Decimal::from(5_000),
                filed_on: None,
            },
            StagePayload::Assessment {
                assessment_number: "00078/206/20".into(),
                assessed_amount: Decimal::from(5_000),
                route_choice: Some(AssessmentRoute::Objection),
            },
            StagePayload::ObjectionFiling {
                objected_amount: Decimal::from(5_000),
                filed_on: None,
            },
            StagePayload::ObjectionDecision {
                decision_type: DecisionType::Granted,
                decision_amount: Decimal::from(5_000),
            },
        ] {
            approve(&engine, case.case_id, payload).await?;
        }

        let request = OpenRefund {
            origin_stage_id: 7,
            amount: Decimal::from(1_000),
            method: RefundMethod::BankTransfer,
            notes: None,
        };
        let first = engine.open_refund(case.case_id, request.clone(), "analyst").await?;
        assert_eq!(first.refund.sequence_number, 1);

        let err = engine
            .open_refund(case.case_id, request.clone(), "analyst")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateConstraintViolation);

        engine
            .delete_refund(case.case_id, first.refund.refund_id, "reviewer")
            .await?;
        let second = engine.open_refund(case.case_id, request, "analyst").await?;
        assert_eq!(second.refund.sequence_number, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_rows_cannot_be_changed() -> Result<()> {
        let db = TestDb::new().await?;
        let engine = db.engine();
        let case = engine.open_case(new_case(), "analyst").await?;

        let result = sqlx::query("UPDATE tax_dispute.workflow_history SET note = 'edited' WHERE case_id = $1")
            .bind(case.case_id)
            .execute(&db.pool)
            .await;
        assert!(result.is_err());

        let result = sqlx::query("DELETE FROM tax_dispute.workflow_history WHERE case_id = $1")
            .bind(case.case_id)
            .execute(&db.pool)
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
