//! Tax Dispute Engine
//!
//! Workflow and decision-routing engine for multi-year tax dispute cases.
//! A case moves through filing, audit, assessment, objection, appeal and
//! supreme court review to a refund or a closure. Refund instances run as
//! sub-processes with their own phases, and a parallel track raises
//! internal-loss (KIAN) claims.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rust_decimal::Decimal;
//! use tax_dispute_engine::{CaseType, DisputeEngine, MemoryCaseStore, NewCase};
//!
//! # async fn demo() -> Result<(), tax_dispute_engine::EngineError> {
//! let engine = DisputeEngine::new(Arc::new(MemoryCaseStore::new()));
//! let case = engine
//!     .open_case(
//!         NewCase {
//!             case_type: CaseType::Audit,
//!             tax_type: "VAT".into(),
//!             fiscal_period: "2021".into(),
//!             reported_amount: Decimal::from(1_000_000),
//!             currency: "IDR".into(),
//!         },
//!         "analyst",
//!     )
//!     .await?;
//! assert_eq!(case.current_stage.id(), 1);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Workflow model
pub mod case;
pub mod history;
pub mod records;
pub mod stage;

// Routing, refunds and internal-loss claims
pub mod claim;
pub mod loss;
pub mod refund;
pub mod router;

// Persistence (memory always, Postgres with `database`)
pub mod store;

// Command boundary
pub mod config;
pub mod engine;
pub mod reminder;

// REST API (when enabled)
#[cfg(feature = "server")]
pub mod api;

pub use case::{Case, CaseOutcome, CaseType, NewCase};
pub use claim::{ClaimResponse, ClaimStatus, KianSubmission, ResponseOutcome};
pub use config::{ConfigError, EngineConfig};
pub use engine::{ApprovalRefund, CaseView, DisputeEngine, OpenRefund, PhaseStep, RecordOutcome};
pub use error::{CommandFailure, EngineError, ErrorKind, FieldError};
pub use history::{HistoryAction, HistoryEntry};
pub use loss::ClaimEligibility;
pub use records::{AssessmentRoute, DecisionType, RecordStatus, StagePayload, StageRecord};
pub use refund::{RefundMethod, RefundOrigin, RefundPhase, RefundView};
pub use reminder::{Reminder, ReminderDispatcher, ReminderSink, TracingReminderSink};
pub use router::{ManualChoice, RouteDecision};
pub use stage::Stage;
pub use store::{CaseStore, MemoryCaseStore};

#[cfg(feature = "database")]
pub use store::PgCaseStore;
