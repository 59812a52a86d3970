use crate::config::PolicyConfig;
use crate::domain::jobs::{JobPayload, JobQueueArc, PayoutJob, Schedule};
use crate::domain::money::Amount;
use crate::domain::payout::{PayoutLog, PayoutStatus};
use crate::domain::ports::{NotifierArc, PaymentGatewayArc};
use crate::domain::wallet::WalletRole;
use crate::error::{CoreError, Result};
use crate::infrastructure::ledger::Ledger;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

/// Two-phase payout pipeline.
///
/// The batch run is the fast, money-safe half: per eligible teacher it locks
/// the wallet's available balance, writes a pending audit log and enqueues a
/// transfer job, all in one transaction per teacher. The slow half, talking
/// to the gateway, happens in the job worker against the snapshot carried in
/// the job. Locked funds can only move forward (transfer confirmed paid) or
/// back (compensating release), never vanish.
pub struct PayoutProcessor {
    ledger: Ledger,
    jobs: JobQueueArc,
    gateway: PaymentGatewayArc,
    notifier: NotifierArc,
    config: PolicyConfig,
}

impl PayoutProcessor {
    pub fn new(
        ledger: Ledger,
        jobs: JobQueueArc,
        gateway: PaymentGatewayArc,
        notifier: NotifierArc,
        config: PolicyConfig,
    ) -> Self {
        Self {
            ledger,
            jobs,
            gateway,
            notifier,
            config,
        }
    }

    /// One batch run: locks every eligible teacher wallet and enqueues one
    /// transfer job per lock. Returns the ids of the payout logs it created.
    ///
    /// Each teacher is processed in its own transaction, so one teacher
    /// failing eligibility re-check never aborts the rest of the batch. The
    /// lock precondition is re-evaluated inside the transaction; a teacher
    /// already mid-payout (locked bucket non-zero) is skipped, which is what
    /// makes overlapping batch runs safe.
    pub async fn run_batch(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let threshold = Amount::new(self.config.payout_threshold)?;

        // candidate scan on a read snapshot; every candidate is re-verified
        // inside its own transaction before any money moves
        let candidates: Vec<Uuid> = self.ledger.read(|state| {
            state
                .teacher_wallets()
                .filter(|w| w.locked.is_zero() && w.available.value() >= threshold.value())
                .map(|w| w.owner_id)
                .collect()
        });

        let mut created = Vec::new();
        for teacher_id in candidates {
            match self.lock_one(teacher_id, threshold, now) {
                Ok(Some(job)) => {
                    let log_id = job.payout_log_id;
                    if let Err(err) = self
                        .jobs
                        .enqueue(JobPayload::ExecutePayout(job), Schedule::At(now))
                        .await
                    {
                        // the lock exists but no worker will ever pick it up;
                        // undo it immediately rather than strand the funds
                        warn!(%teacher_id, %err, "payout job enqueue failed, compensating");
                        self.compensate(log_id, &format!("enqueue failed: {err}"))?;
                        continue;
                    }
                    created.push(log_id);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%teacher_id, %err, "skipping teacher in payout batch");
                }
            }
        }

        info!(count = created.len(), "payout batch run complete");
        Ok(created)
    }

    /// Locks one teacher's balance and writes the pending audit log.
    /// `Ok(None)` means the teacher stopped being eligible between the scan
    /// and the transaction.
    fn lock_one(
        &self,
        teacher_id: Uuid,
        threshold: Amount,
        now: DateTime<Utc>,
    ) -> Result<Option<PayoutJob>> {
        let rate = self.config.system_fee_rate;
        let gateway_fee = self.config.gateway_fee;

        self.ledger.transaction(|state| {
            let teacher = state.teacher(teacher_id)?;
            if !teacher.verified {
                return Ok(None);
            }

            let wallet = state.wallet_mut(teacher_id, WalletRole::Teacher);
            if !wallet.locked.is_zero() || wallet.available.value() < threshold.value() {
                return Ok(None);
            }
            let gross = wallet.lock_for_payout(threshold)?;
            let wallet_id = wallet.id;

            let system_fee = (gross.value() * rate).round_dp(2);
            let teacher_net = gross.value() - system_fee - gateway_fee;
            if teacher_net <= Decimal::ZERO {
                // fees would eat the whole payout; aborting rolls the lock back
                return Err(CoreError::validation(format!(
                    "payout of {gross} for teacher {teacher_id} is below the fee floor"
                )));
            }

            let log = PayoutLog {
                id: Uuid::new_v4(),
                teacher_id,
                wallet_id,
                amount: gross.value(),
                system_fee,
                gateway_fee,
                teacher_net,
                status: PayoutStatus::Pending,
                transfer_id: None,
                error_message: None,
                created_at: now,
            };
            let job = PayoutJob {
                payout_log_id: log.id,
                teacher_id,
                wallet_owner_id: teacher_id,
                gross: gross.value(),
                teacher_net,
            };
            state.insert_payout_log(log);
            Ok(Some(job))
        })
    }

    /// Transfer worker: initiates the gateway transfer for one locked payout.
    ///
    /// Redeliveries of the same job are no-ops once the log has left
    /// `Pending`. If initiation fails, the lock is released in a compensating
    /// transaction before the error propagates, so funds are back in the
    /// wallet regardless of what the job layer does with the failure.
    pub async fn execute_payout(&self, job: &PayoutJob) -> Result<()> {
        let actionable = self.ledger.read(|state| {
            state
                .payout_log(job.payout_log_id)
                .map(|log| log.is_actionable())
        })?;
        if !actionable {
            info!(payout_log_id = %job.payout_log_id, "payout already handled, skipping");
            return Ok(());
        }

        let recipient_id = match self.ensure_recipient(job.teacher_id).await {
            Ok(id) => id,
            Err(err) => {
                self.compensate(job.payout_log_id, &err.to_string())?;
                return Err(err);
            }
        };

        let net = Amount::new(job.teacher_net)?;
        match self
            .gateway
            .create_transfer(&recipient_id, net, job.payout_log_id)
            .await
        {
            Ok(transfer_id) => {
                self.ledger.transaction(|state| {
                    let log = state.payout_log_mut(job.payout_log_id)?;
                    log.status = PayoutStatus::Processing;
                    log.transfer_id = Some(transfer_id.clone());
                    Ok(())
                })?;
                info!(payout_log_id = %job.payout_log_id, transfer_id, "payout transfer initiated");
                if let Err(err) = self
                    .notifier
                    .notify_users(&[job.teacher_id], "Your payout is on its way")
                    .await
                {
                    warn!(teacher_id = %job.teacher_id, %err, "payout notification failed");
                }
                Ok(())
            }
            Err(err) => {
                warn!(payout_log_id = %job.payout_log_id, %err, "transfer initiation failed, compensating");
                self.compensate(job.payout_log_id, &err.to_string())?;
                Err(err)
            }
        }
    }

    /// Returns the teacher's gateway recipient id, registering one on first
    /// use and caching it on the teacher record.
    async fn ensure_recipient(&self, teacher_id: Uuid) -> Result<String> {
        let teacher = self
            .ledger
            .teacher_snapshot(teacher_id)
            .ok_or_else(|| CoreError::not_found(format!("teacher {teacher_id}")))?;
        if let Some(id) = teacher.recipient_id {
            return Ok(id);
        }

        let recipient_id = self
            .gateway
            .create_recipient(teacher_id, &teacher.display_name)
            .await?;
        self.ledger.transaction(|state| {
            state.teacher_mut(teacher_id)?.recipient_id = Some(recipient_id.clone());
            Ok(())
        })?;
        Ok(recipient_id)
    }

    /// Compensating transaction for a payout that never reached the gateway:
    /// the locked funds return to the wallet in full and the log records why.
    fn compensate(&self, payout_log_id: Uuid, reason: &str) -> Result<()> {
        self.ledger.transaction(|state| {
            let log = state.payout_log_mut(payout_log_id)?;
            if !log.is_actionable() {
                return Ok(());
            }
            log.status = PayoutStatus::Failed;
            log.error_message = Some(reason.to_string());
            let teacher_id = log.teacher_id;
            state
                .wallet_mut(teacher_id, WalletRole::Teacher)
                .release_lock()
        })
    }
}
