use crate::application::booking::BookingEngine;
use crate::application::payout::PayoutProcessor;
use crate::config::PolicyConfig;
use crate::domain::jobs::{Job, JobHandler, JobPayload, JobQueue, Schedule};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Routes delivered jobs to the engine that owns their payload.
///
/// Handlers receive `job.run_at` as the logical "now" so a backlog drained
/// late still evaluates timing rules against the moment the job was meant to
/// fire, and test runs with a synthetic clock stay deterministic.
pub struct JobRouter {
    bookings: Arc<BookingEngine>,
    payouts: Arc<PayoutProcessor>,
}

impl JobRouter {
    pub fn new(bookings: Arc<BookingEngine>, payouts: Arc<PayoutProcessor>) -> Self {
        Self { bookings, payouts }
    }
}

#[async_trait]
impl JobHandler for JobRouter {
    async fn handle(&self, job: &Job) -> Result<()> {
        debug!(job_id = %job.id, kind = job.payload.kind(), attempts = job.attempts, "running job");
        match &job.payload {
            JobPayload::Reminder { booking_id } => self.bookings.handle_reminder(*booking_id).await,
            JobPayload::ClassEndCheck { booking_id } => {
                self.bookings.handle_class_end_check(*booking_id).await
            }
            JobPayload::CallTeardown { booking_id } => {
                self.bookings.handle_teardown(*booking_id).await
            }
            JobPayload::ExpireBooking { booking_id } => {
                self.bookings.handle_expire(*booking_id).await
            }
            JobPayload::ExpirySweep => self.bookings.expire_sweep(job.run_at).await.map(|_| ()),
            JobPayload::PayoutBatch => self.payouts.run_batch(job.run_at).await.map(|_| ()),
            JobPayload::ExecutePayout(payout) => self.payouts.execute_payout(payout).await,
            JobPayload::ProvisionRoom { booking_id } => {
                self.bookings.handle_provision_room(*booking_id).await
            }
        }
    }
}

/// Registers the two standing recurring jobs: the unpaid-booking expiry sweep
/// and the payout batch. Keyed registration makes this safe to call on every
/// startup.
pub async fn register_recurring(
    queue: &dyn JobQueue,
    config: &PolicyConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    let sweep_interval = Duration::minutes(config.expiry_sweep_interval_minutes);
    queue
        .enqueue(
            JobPayload::ExpirySweep,
            Schedule::Every {
                key: "expiry-sweep".to_string(),
                interval: sweep_interval,
                first_run: now + sweep_interval,
            },
        )
        .await?;

    let batch_interval = Duration::minutes(config.payout_batch_interval_minutes);
    queue
        .enqueue(
            JobPayload::PayoutBatch,
            Schedule::Every {
                key: "payout-batch".to_string(),
                interval: batch_interval,
                first_run: now + batch_interval,
            },
        )
        .await?;
    Ok(())
}
