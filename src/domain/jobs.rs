use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Everything the transfer worker needs to resume a payout without re-reading
/// mutable state. Snapshotted at batch time, carried in the job.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct PayoutJob {
    pub payout_log_id: Uuid,
    pub teacher_id: Uuid,
    pub wallet_owner_id: Uuid,
    pub gross: Decimal,
    pub teacher_net: Decimal,
}

/// Typed per-kind job payloads.
///
/// One variant per job kind instead of an untyped map: payloads are validated
/// when the job is built, and handlers match on the variant they own.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Pre-class reminder, `reminder_lead_minutes` before start.
    Reminder { booking_id: Uuid },
    /// Participant check shortly before class end.
    ClassEndCheck { booking_id: Uuid },
    /// Room teardown and completion at class end.
    CallTeardown { booking_id: Uuid },
    /// Auto-expiry of a single unpaid booking.
    ExpireBooking { booking_id: Uuid },
    /// Recurring sweep over all stale unpaid bookings.
    ExpirySweep,
    /// Recurring payout batch run.
    PayoutBatch,
    /// One payout transfer, resumable from its snapshot.
    ExecutePayout(PayoutJob),
    /// Asynchronous call-room creation after payment.
    ProvisionRoom { booking_id: Uuid },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reminder { .. } => "reminder",
            Self::ClassEndCheck { .. } => "class_end_check",
            Self::CallTeardown { .. } => "call_teardown",
            Self::ExpireBooking { .. } => "expire_booking",
            Self::ExpirySweep => "expiry_sweep",
            Self::PayoutBatch => "payout_batch",
            Self::ExecutePayout(_) => "execute_payout",
            Self::ProvisionRoom { .. } => "provision_room",
        }
    }
}

/// When a job should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    At(DateTime<Utc>),
    /// Recurring job, deduplicated by `key`: re-registering under the same
    /// key replaces any stale registration instead of stacking a duplicate.
    Every {
        key: String,
        interval: Duration,
        first_run: DateTime<Utc>,
    },
}

/// A job as delivered to a handler. `attempts` counts prior failed runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobPayload,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Durable delayed-job queue contract.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Registers a job and returns its durable handle.
    async fn enqueue(&self, payload: JobPayload, schedule: Schedule) -> Result<Uuid>;
}

pub type JobQueueArc = Arc<dyn JobQueue>;

/// Worker contract: at-least-once delivery, so handlers must be idempotent
/// against redelivery, checking current entity state rather than job metadata.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<()>;
}
