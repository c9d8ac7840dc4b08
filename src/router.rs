//! Decision Router
//!
//! Pure routing rules: given an approved record's outcome, where does the
//! case go next. Decision outcomes are defined in [`crate::records`]; the
//! stage numbers they map to live only in this table.

use serde::{Deserialize, Serialize};

use crate::case::CaseOutcome;
use crate::error::EngineError;
use crate::records::{AssessmentRoute, DecisionType, StagePayload};
use crate::stage::Stage;

/// Result of routing one approved record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "route", content = "target")]
pub enum RouteDecision {
    /// Move to this stage
    Advance(Stage),
    /// Hold; a person must pick via a manual choice
    AwaitingChoice,
    /// Terminal close without a refund
    Close(CaseOutcome),
}

impl RouteDecision {
    /// Stage number written to the record's `next_stage`
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            RouteDecision::Advance(stage) => Some(*stage),
            RouteDecision::Close(_) => Some(Stage::Closed),
            RouteDecision::AwaitingChoice => None,
        }
    }

    pub fn authorizes_refund(&self) -> bool {
        matches!(self, RouteDecision::Advance(s) if *s == Stage::REFUND_ENTRY)
    }
}

/// Branch a person picks when the router cannot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualChoice {
    Refund,
    Appeal,
}

impl ManualChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund => "refund",
            Self::Appeal => "appeal",
        }
    }
}

impl std::str::FromStr for ManualChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refund" => Ok(Self::Refund),
            "appeal" => Ok(Self::Appeal),
            _ => Err(format!("Unknown choice: {} (expected refund or appeal)", s)),
        }
    }
}

// Routing tables. Changing a target stage happens here and nowhere else.

const ASSESSMENT_ROUTES: &[(AssessmentRoute, Stage)] = &[
    (AssessmentRoute::Refund, Stage::REFUND_ENTRY),
    (AssessmentRoute::Objection, Stage::ObjectionFiling),
];

const OBJECTION_DECISION_ROUTES: &[(DecisionType, Option<Stage>)] = &[
    (DecisionType::Granted, Some(Stage::REFUND_ENTRY)),
    (DecisionType::Rejected, Some(Stage::AppealFiling)),
    (DecisionType::SkpKb, Some(Stage::AppealFiling)),
    (DecisionType::PartiallyGranted, None),
];

const APPEAL_DECISION_ROUTES: &[(DecisionType, Stage)] = &[
    (DecisionType::Granted, Stage::REFUND_ENTRY),
    (DecisionType::PartiallyGranted, Stage::REFUND_ENTRY),
    (DecisionType::Rejected, Stage::SupremeCourtFiling),
    (DecisionType::SkpKb, Stage::SupremeCourtFiling),
];

const MANUAL_CHOICES: &[(Stage, ManualChoice, Stage)] = &[
    (Stage::ObjectionDecision, ManualChoice::Refund, Stage::REFUND_ENTRY),
    (Stage::ObjectionDecision, ManualChoice::Appeal, Stage::AppealFiling),
];

/// Route an approved record
pub fn route(payload: &StagePayload) -> Result<RouteDecision, EngineError> {
    let stage = payload.stage();
    match payload {
        StagePayload::Assessment { route_choice, .. } => {
            let choice = route_choice.ok_or_else(|| {
                EngineError::field(
                    "route_choice",
                    "assessment requires an explicit choice of refund or objection",
                )
            })?;
            ASSESSMENT_ROUTES
                .iter()
                .find(|(c, _)| *c == choice)
                .map(|(_, target)| RouteDecision::Advance(*target))
                .ok_or_else(|| EngineError::field("route_choice", "unsupported route"))
        }
        StagePayload::ObjectionDecision { decision_type, .. } => OBJECTION_DECISION_ROUTES
            .iter()
            .find(|(d, _)| d == decision_type)
            .map(|(_, target)| match target {
                Some(stage) => RouteDecision::Advance(*stage),
                None => RouteDecision::AwaitingChoice,
            })
            .ok_or_else(|| unsupported(stage, *decision_type)),
        StagePayload::AppealDecision { decision_type, .. } => APPEAL_DECISION_ROUTES
            .iter()
            .find(|(d, _)| d == decision_type)
            .map(|(_, target)| RouteDecision::Advance(*target))
            .ok_or_else(|| unsupported(stage, *decision_type)),
        StagePayload::SupremeCourtDecision { decision_type, .. } => Ok(match decision_type {
            DecisionType::Rejected => RouteDecision::Close(CaseOutcome::Rejected),
            _ => RouteDecision::Advance(Stage::REFUND_ENTRY),
        }),
        _ => stage
            .next()
            .map(RouteDecision::Advance)
            .ok_or_else(|| EngineError::precondition(format!("{} has no successor", stage))),
    }
}

/// Resolve a manual choice made at a held decision stage
pub fn route_choice(decision_stage: Stage, choice: ManualChoice) -> Result<Stage, EngineError> {
    MANUAL_CHOICES
        .iter()
        .find(|(s, c, _)| *s == decision_stage && *c == choice)
        .map(|(_, _, target)| *target)
        .ok_or_else(|| {
            EngineError::field(
                "choice",
                format!(
                    "{} is not an available choice at {}",
                    choice.as_str(),
                    decision_stage
                ),
            )
        })
}

fn unsupported(stage: Stage, decision_type: DecisionType) -> EngineError {
    EngineError::field(
        "decision_type",
        format!("{} is not routable at {}", decision_type, stage),
    )
}
