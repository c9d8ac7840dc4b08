//! Error handling for the dispute engine
//!
//! Every command returns `Result<_, EngineError>`. Storage failures are
//! converted at the command boundary so callers never see backend types.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::stage::Stage;
use crate::store::{StoreError, UniqueConstraint};

/// Per-field validation detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Which uniqueness rule a write collided with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "constraint")]
pub enum DuplicateKind {
    StageRecord { stage: Stage },
    RefundOrigin { origin_stage_id: u8 },
    Claim { stage: Stage },
}

impl std::fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DuplicateKind::StageRecord { stage } => {
                write!(f, "a record for stage {} already exists on this case", stage)
            }
            DuplicateKind::RefundOrigin { origin_stage_id } => write!(
                f,
                "refund already exists for origin stage {}",
                origin_stage_id
            ),
            DuplicateKind::Claim { stage } => write!(
                f,
                "internal-loss claim already exists for stage {}",
                stage
            ),
        }
    }
}

/// Main error type for engine commands
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {}", describe_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Stage mismatch: action requires stage {expected}, case is at {actual}")]
    StageMismatch { expected: Stage, actual: Stage },

    #[error("Duplicate: {0}")]
    Duplicate(DuplicateKind),

    #[error("Precondition not met: {reason}")]
    PreconditionNotMet { reason: String },

    #[error("Refund amount {requested} exceeds available amount {available}")]
    AmountExceedsAvailable {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Case {0} was modified concurrently; reload and retry")]
    ConcurrentModification(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Coarse error taxonomy reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationFailure,
    StageMismatch,
    DuplicateConstraintViolation,
    PreconditionNotMet,
    NotFound,
    Fatal,
}

impl ErrorKind {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::Fatal)
    }
}

impl EngineError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        EngineError::PreconditionNotMet {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::ValidationFailure,
            EngineError::StageMismatch { .. } | EngineError::ConcurrentModification(_) => {
                ErrorKind::StageMismatch
            }
            EngineError::Duplicate(_) => ErrorKind::DuplicateConstraintViolation,
            EngineError::PreconditionNotMet { .. } | EngineError::AmountExceedsAvailable { .. } => {
                ErrorKind::PreconditionNotMet
            }
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Storage(_) => ErrorKind::Fatal,
        }
    }

    /// Structured form handed back across the command boundary
    pub fn to_failure(&self) -> CommandFailure {
        CommandFailure {
            kind: self.kind(),
            message: self.to_string(),
            fields: match self {
                EngineError::Validation(fields) => fields.clone(),
                _ => Vec::new(),
            },
        }
    }
}

fn describe_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Conflict { case_id } => EngineError::ConcurrentModification(case_id),
            StoreError::UniqueViolation(constraint) => EngineError::Duplicate(match constraint {
                UniqueConstraint::StageRecord(stage) => DuplicateKind::StageRecord { stage },
                UniqueConstraint::RefundOriginSlot(origin_stage_id) => {
                    DuplicateKind::RefundOrigin { origin_stage_id }
                }
                UniqueConstraint::ClaimStage(stage) => DuplicateKind::Claim { stage },
            }),
            StoreError::Backend(msg) => EngineError::Storage(msg),
        }
    }
}

/// Serializable failure returned by the command boundary
#[derive(Debug, Clone, Serialize)]
pub struct CommandFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// Decimal places every stored amount is kept to (`NUMERIC(20, 2)`)
pub const MONEY_SCALE: u32 = 2;

/// Accumulates field errors so a caller sees all of them at once
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) -> &mut Self {
        if !ok {
            self.errors.push(FieldError::new(field, message));
        }
        self
    }

    pub fn positive(&mut self, amount: Decimal, field: &str) -> &mut Self {
        if amount <= Decimal::ZERO {
            return self.check(false, field, "must be greater than zero");
        }
        self.money_scale(amount, field)
    }

    pub fn non_negative(&mut self, amount: Decimal, field: &str) -> &mut Self {
        if amount < Decimal::ZERO {
            return self.check(false, field, "must not be negative");
        }
        self.money_scale(amount, field)
    }

    /// Trailing zeros do not count against the scale
    fn money_scale(&mut self, amount: Decimal, field: &str) -> &mut Self {
        self.check(
            amount.normalize().scale() <= MONEY_SCALE,
            field,
            format!("must have at most {} decimal places", MONEY_SCALE),
        )
    }

    pub fn push(&mut self, error: FieldError) -> &mut Self {
        self.errors.push(error);
        self
    }

    pub fn finish(&mut self) -> Result<(), EngineError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(std::mem::take(&mut self.errors)))
        }
    }
}
