//! Claim reminder dispatch
//!
//! After a command commits, the engine may hand reminders to a
//! [`ReminderSink`]. Dispatch runs on a spawned task: the command never waits
//! for it, failures are logged and dropped, and nothing is retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::stage::Stage;

/// A prompt to raise an internal-loss claim
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub reminder_id: Uuid,
    pub case_id: Uuid,
    pub stage: Stage,
    pub loss_amount: Decimal,
    pub currency: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn claim_due(case_id: Uuid, stage: Stage, loss_amount: Decimal, currency: &str) -> Self {
        Self {
            reminder_id: Uuid::new_v4(),
            case_id,
            stage,
            loss_amount,
            currency: currency.to_string(),
            message: format!(
                "Internal-loss claim due for {}: loss of {} {}",
                stage, loss_amount, currency
            ),
            created_at: Utc::now(),
        }
    }
}

/// What happened to one delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum DeliveryOutcome {
    Delivered,
    Failed { error: String },
}

/// Error raised by a sink
#[derive(Debug, thiserror::Error)]
#[error("reminder sink error: {0}")]
pub struct SinkError(pub String);

/// Outbound reminder channel (mail, queue, ...)
#[async_trait]
pub trait ReminderSink: Send + Sync {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), SinkError>;

    /// Record the delivery attempt
    async fn audit(&self, reminder: &Reminder, outcome: &DeliveryOutcome) -> Result<(), SinkError>;
}

/// Default sink: writes to the log and nowhere else
#[derive(Debug, Default, Clone)]
pub struct TracingReminderSink;

#[async_trait]
impl ReminderSink for TracingReminderSink {
    async fn deliver(&self, reminder: &Reminder) -> Result<(), SinkError> {
        info!(
            case_id = %reminder.case_id,
            stage = reminder.stage.id(),
            loss = %reminder.loss_amount,
            "{}",
            reminder.message
        );
        Ok(())
    }

    async fn audit(&self, reminder: &Reminder, outcome: &DeliveryOutcome) -> Result<(), SinkError> {
        info!(reminder_id = %reminder.reminder_id, outcome = ?outcome, "reminder audited");
        Ok(())
    }
}

/// Fire-and-forget dispatcher around a sink
#[derive(Clone)]
pub struct ReminderDispatcher {
    sink: Arc<dyn ReminderSink>,
    enabled: bool,
}

impl std::fmt::Debug for ReminderDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReminderDispatcher")
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ReminderDispatcher {
    pub fn new(sink: Arc<dyn ReminderSink>, enabled: bool) -> Self {
        Self { sink, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(TracingReminderSink), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Spawn delivery and audit for each reminder. Returns the task handle
    /// so tests can wait on it; callers normally drop it.
    pub fn dispatch(&self, reminders: Vec<Reminder>) -> Option<tokio::task::JoinHandle<()>> {
        if !self.enabled || reminders.is_empty() {
            return None;
        }
        let sink = Arc::clone(&self.sink);
        Some(tokio::spawn(async move {
            for reminder in reminders {
                let outcome = match sink.deliver(&reminder).await {
                    Ok(()) => DeliveryOutcome::Delivered,
                    Err(e) => {
                        warn!(
                            case_id = %reminder.case_id,
                            stage = reminder.stage.id(),
                            error = %e,
                            "reminder delivery failed"
                        );
                        DeliveryOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                if let Err(e) = sink.audit(&reminder, &outcome).await {
                    warn!(reminder_id = %reminder.reminder_id, error = %e, "reminder audit failed");
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct FailingSink {
        audited: Mutex<Vec<DeliveryOutcome>>,
    }

    #[async_trait]
    impl ReminderSink for FailingSink {
        async fn deliver(&self, _reminder: &Reminder) -> Result<(), SinkError> {
            Err(SinkError("smtp unavailable".into()))
        }

        async fn audit(
            &self,
            _reminder: &Reminder,
            outcome: &DeliveryOutcome,
        ) -> Result<(), SinkError> {
            self.audited.lock().unwrap().push(outcome.clone());
            Ok(())
        }
    }

    fn reminder() -> Reminder {
        Reminder::claim_due(
            Uuid::new_v4(),
            Stage::AppealDecision,
            Decimal::from(125),
            "IDR",
        )
    }

    #[tokio::test]
    async fn test_failed_delivery_is_audited_not_retried() {
        let sink = Arc::new(FailingSink::default());
        let dispatcher = ReminderDispatcher::new(sink.clone(), true);

        let handle = dispatcher.dispatch(vec![reminder()]).unwrap();
        handle.await.unwrap();

        let audited = sink.audited.lock().unwrap();
        assert_eq!(audited.len(), 1);
        assert!(matches!(audited[0], DeliveryOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_disabled_dispatcher_spawns_nothing() {
        let dispatcher = ReminderDispatcher::disabled();
        assert!(dispatcher.dispatch(vec![reminder()]).is_none());
    }

    #[test]
    fn test_message_names_stage_and_loss() {
        let r = reminder();
        assert!(r.message.contains("10 (Appeal Decision)"));
        assert!(r.message.contains("125 IDR"));
    }
}
