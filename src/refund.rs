//! Refund Sub-Process Types
//!
//! A case may own several refund instances. Each instance's internal phase is
//! derived from its latest bank transfer request and is never stored.
//! Command handling lives in [`crate::engine`].

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;

/// Which decision (or the preliminary path) authorized a refund
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RefundOrigin {
    Preliminary,
    Decision(Stage),
}

impl RefundOrigin {
    pub const ORIGIN_IDS: [u8; 5] = [0, 4, 7, 10, 12];

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(RefundOrigin::Preliminary),
            _ => Stage::from_id(id)
                .filter(|s| s.is_decision_bearing())
                .map(RefundOrigin::Decision),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            RefundOrigin::Preliminary => 0,
            RefundOrigin::Decision(stage) => stage.id(),
        }
    }

    /// Decision-stage origins allow one live instance per case; the
    /// preliminary path allows any number.
    pub fn is_single_instance(&self) -> bool {
        matches!(self, RefundOrigin::Decision(_))
    }

    pub fn decision_stage(&self) -> Option<Stage> {
        match self {
            RefundOrigin::Preliminary => None,
            RefundOrigin::Decision(stage) => Some(*stage),
        }
    }
}

impl std::fmt::Display for RefundOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundOrigin::Preliminary => write!(f, "preliminary"),
            RefundOrigin::Decision(stage) => write!(f, "{}", stage),
        }
    }
}

impl TryFrom<u8> for RefundOrigin {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        RefundOrigin::from_id(id)
            .ok_or_else(|| format!("Unknown refund origin stage: {} (expected 0, 4, 7, 10 or 12)", id))
    }
}

impl From<RefundOrigin> for u8 {
    fn from(origin: RefundOrigin) -> u8 {
        origin.id()
    }
}

/// How the refund is paid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    BankTransfer,
    TaxOffset,
}

impl RefundMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankTransfer => "bank_transfer",
            Self::TaxOffset => "tax_offset",
        }
    }
}

impl std::str::FromStr for RefundMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bank_transfer" => Ok(Self::BankTransfer),
            "tax_offset" => Ok(Self::TaxOffset),
            _ => Err(format!("Unknown refund method: {}", s)),
        }
    }
}

/// One refund instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundProcess {
    pub refund_id: Uuid,
    pub case_id: Uuid,
    pub origin: RefundOrigin,
    /// 1-based, per case, never reused
    pub sequence_number: u32,
    pub amount: Decimal,
    pub method: RefundMethod,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl RefundProcess {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Key backing the one-live-instance-per-origin rule at the store. None
    /// for preliminary refunds and for deleted instances.
    pub fn origin_slot(&self) -> Option<u8> {
        (self.is_live() && self.origin.is_single_instance()).then(|| self.origin.id())
    }
}

/// Bank transfer status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Rejected and cancelled transfers no longer count toward progress
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown transfer status: {}", s)),
        }
    }
}

/// Child transfer request of a refund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransferRequest {
    pub transfer_id: Uuid,
    pub refund_id: Uuid,
    pub status: TransferStatus,
    pub requested_on: NaiveDate,
    pub instruction_received_on: Option<NaiveDate>,
    pub received_on: Option<NaiveDate>,
    pub received_amount: Option<Decimal>,
    pub bank_name: Option<String>,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub status_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Internal refund phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RefundPhase {
    Initiated = 1,
    TransferRequested = 2,
    InstructionReceived = 3,
    FundsReceived = 4,
}

impl RefundPhase {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::TransferRequested => "transfer request created",
            Self::InstructionReceived => "transfer instruction received",
            Self::FundsReceived => "funds received",
        }
    }

    /// Case stage mirrored while the case is on the refund path
    pub fn mirrored_stage(&self) -> Stage {
        match self {
            Self::Initiated | Self::TransferRequested => Stage::BankTransferRequest,
            Self::InstructionReceived => Stage::TransferInstruction,
            Self::FundsReceived => Stage::RefundReceived,
        }
    }
}

impl std::fmt::Display for RefundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id(), self.name())
    }
}

impl TryFrom<u8> for RefundPhase {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Self::Initiated),
            2 => Ok(Self::TransferRequested),
            3 => Ok(Self::InstructionReceived),
            4 => Ok(Self::FundsReceived),
            _ => Err(format!("Unknown refund phase: {}", id)),
        }
    }
}

impl From<RefundPhase> for u8 {
    fn from(phase: RefundPhase) -> u8 {
        phase.id()
    }
}

/// Most recent transfer of a refund (by creation time, then id)
pub fn latest_transfer<'a>(
    refund_id: Uuid,
    transfers: impl IntoIterator<Item = &'a BankTransferRequest>,
) -> Option<&'a BankTransferRequest> {
    transfers
        .into_iter()
        .filter(|t| t.refund_id == refund_id)
        .max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.transfer_id.cmp(&b.transfer_id))
        })
}

/// Project a refund's phase from its latest transfer request
pub fn derive_phase(latest: Option<&BankTransferRequest>) -> RefundPhase {
    match latest {
        None => RefundPhase::Initiated,
        Some(t) if t.status.is_abandoned() => RefundPhase::Initiated,
        Some(t) if t.status == TransferStatus::Completed && t.received_on.is_some() => {
            RefundPhase::FundsReceived
        }
        Some(t) if t.instruction_received_on.is_some() => RefundPhase::InstructionReceived,
        Some(_) => RefundPhase::TransferRequested,
    }
}

/// Refund annotated with its derived phase and latest transfer
#[derive(Debug, Clone, Serialize)]
pub struct RefundView {
    #[serde(flatten)]
    pub refund: RefundProcess,
    pub origin_stage_id: u8,
    pub phase: RefundPhase,
    pub phase_name: &'static str,
    pub transfer: Option<BankTransferRequest>,
}

impl RefundView {
    pub fn build(refund: &RefundProcess, transfers: &[BankTransferRequest]) -> Self {
        let latest = latest_transfer(refund.refund_id, transfers);
        let phase = derive_phase(latest);
        Self {
            refund: refund.clone(),
            origin_stage_id: refund.origin.id(),
            phase,
            phase_name: phase.name(),
            transfer: latest.cloned(),
        }
    }
}
