//! Internal-loss claim commands
//!
//! Claims stay workable after a case closes; the loss they carry is the
//! snapshot taken at creation.

use tracing::info;
use uuid::Uuid;

use super::{require_actor, DisputeEngine};
use crate::claim::{ClaimResponse, KianSubmission};
use crate::error::EngineError;
use crate::history::{HistoryAction, HistoryEntry};
use crate::loss::{self, ClaimEligibility};
use crate::stage::Stage;
use crate::store::{CaseFile, CaseWrite, Mutation};

fn parse_stage(stage_id: u8) -> Result<Stage, EngineError> {
    Stage::from_id(stage_id)
        .ok_or_else(|| EngineError::field("stage", format!("unknown stage {}", stage_id)))
}

fn find_claim(file: &CaseFile, stage: Stage) -> Result<KianSubmission, EngineError> {
    file.claim(stage)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("internal-loss claim for {}", stage)))
}

fn claim_entry(file: &CaseFile, claim: &KianSubmission, action: HistoryAction, actor: &str) -> HistoryEntry {
    let stage = file.case.current_stage;
    HistoryEntry::new(file.case.case_id, stage, stage, action, actor)
        .with_decision("kian_stage", claim.stage.id().to_string())
        .with_note(format!("claim {} ({} {})", claim.status, claim.loss_amount, file.case.currency))
}

impl DisputeEngine {
    /// Open a draft claim with the current loss snapshotted
    pub async fn create_claim(
        &self,
        case_id: Uuid,
        stage_id: u8,
        actor: &str,
    ) -> Result<KianSubmission, EngineError> {
        require_actor(actor)?;
        let stage = parse_stage(stage_id)?;
        let mut file = self.load(case_id).await?;

        let loss_amount = loss::can_create_claim(&file, stage)?;
        let claim = KianSubmission::new(case_id, stage, loss_amount, actor);

        file.case.touch();
        let entry = claim_entry(&file, &claim, HistoryAction::ClaimCreated, actor);
        let mut write = CaseWrite::new(file.case);
        write.push(Mutation::InsertClaim(claim.clone())).history(entry);
        self.commit(write).await?;

        info!(case_id = %case_id, stage = stage.id(), loss = %loss_amount, "internal-loss claim created");
        Ok(claim)
    }

    pub async fn submit_claim(
        &self,
        case_id: Uuid,
        stage_id: u8,
        actor: &str,
    ) -> Result<KianSubmission, EngineError> {
        self.update_claim(case_id, stage_id, actor, HistoryAction::ClaimSubmitted, |claim| {
            claim.submit()
        })
        .await
    }

    pub async fn record_claim_response(
        &self,
        case_id: Uuid,
        stage_id: u8,
        response: ClaimResponse,
        actor: &str,
    ) -> Result<KianSubmission, EngineError> {
        self.update_claim(case_id, stage_id, actor, HistoryAction::ClaimResponded, |claim| {
            claim.record_response(response)
        })
        .await
    }

    pub async fn close_claim(
        &self,
        case_id: Uuid,
        stage_id: u8,
        actor: &str,
    ) -> Result<KianSubmission, EngineError> {
        self.update_claim(case_id, stage_id, actor, HistoryAction::ClaimClosed, |claim| {
            claim.close()
        })
        .await
    }

    /// Eligibility for stages 4, 7, 10 and 12
    pub async fn claim_status_by_stage(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<ClaimEligibility>, EngineError> {
        let file = self.load(case_id).await?;
        Ok(loss::claim_status_by_stage(&file))
    }

    async fn update_claim<F>(
        &self,
        case_id: Uuid,
        stage_id: u8,
        actor: &str,
        action: HistoryAction,
        change: F,
    ) -> Result<KianSubmission, EngineError>
    where
        F: FnOnce(&mut KianSubmission) -> Result<(), EngineError>,
    {
        require_actor(actor)?;
        let stage = parse_stage(stage_id)?;
        let mut file = self.load(case_id).await?;

        let mut claim = find_claim(&file, stage)?;
        change(&mut claim)?;

        file.case.touch();
        let entry = claim_entry(&file, &claim, action, actor);
        let mut write = CaseWrite::new(file.case);
        write.push(Mutation::UpdateClaim(claim.clone())).history(entry);
        self.commit(write).await?;

        info!(case_id = %case_id, stage = stage.id(), status = %claim.status, "internal-loss claim updated");
        Ok(claim)
    }
}
