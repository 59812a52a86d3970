use crate::domain::booking::SlotStatus;
use crate::domain::jobs::{JobPayload, JobQueueArc, Schedule};
use crate::domain::money::Amount;
use crate::domain::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::domain::payout::PayoutStatus;
use crate::domain::ports::{ChargeStatus, NotifierArc, PaymentGatewayArc, TransferStatus};
use crate::domain::wallet::WalletRole;
use crate::error::{CoreError, Result};
use crate::infrastructure::ledger::Ledger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Gateway webhook envelope: an event name plus a pointer to the object that
/// changed. Amounts embedded in the event are ignored on principle; the
/// reconciler re-fetches the object by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub key: String,
    pub data: WebhookObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookObject {
    pub object: String,
    pub id: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A charge settled this booking.
    ChargePaid { booking_id: Uuid },
    /// Charge event consumed without financial effect (not successful yet,
    /// replay of an already-applied charge, or booking no longer payable).
    ChargeSkipped,
    /// Transfer confirmed paid; locked funds left the system.
    TransferSettled,
    /// Transfer failed; locked funds returned to the wallet.
    TransferReversed,
    /// Transfer accepted by the gateway, still in flight.
    TransferProcessing,
    /// Event about an object type the core does not track.
    Ignored,
}

/// Applies asynchronous gateway events to the ledger, idempotently and
/// race-safe against the synchronous payment path.
pub struct WebhookReconciler {
    ledger: Ledger,
    gateway: PaymentGatewayArc,
    jobs: JobQueueArc,
    notifier: NotifierArc,
}

impl WebhookReconciler {
    pub fn new(
        ledger: Ledger,
        gateway: PaymentGatewayArc,
        jobs: JobQueueArc,
        notifier: NotifierArc,
    ) -> Self {
        Self {
            ledger,
            gateway,
            jobs,
            notifier,
        }
    }

    /// Webhook endpoints must always acknowledge receipt so the gateway
    /// stops redelivering; internal failure is logged and alerted instead of
    /// surfaced. Retries come from gateway-side event redelivery.
    pub async fn acknowledge(&self, event: &WebhookEvent, now: DateTime<Utc>) {
        match self.process(event, now).await {
            Ok(outcome) => info!(key = event.key, ?outcome, "webhook processed"),
            Err(err) => error!(key = event.key, id = event.data.id, %err, "webhook processing failed"),
        }
    }

    pub async fn process(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        match event.data.object.as_str() {
            "charge" => self.reconcile_charge(&event.data.id, now).await,
            "transfer" => self.reconcile_transfer(&event.data.id).await,
            other => {
                warn!(object = other, "ignoring webhook for untracked object type");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    /// Charge reconciliation. The webhook is treated purely as a "something
    /// changed" signal: state is re-fetched from the gateway, and the
    /// payment row is upserted by charge id so duplicate deliveries collapse
    /// into one effect.
    async fn reconcile_charge(&self, charge_id: &str, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        let charge = self.gateway.fetch_charge(charge_id).await?;

        // Some((booking, student, teacher)) when the charge settled the
        // booking in this call, None when it was consumed without effect.
        let settled = self.ledger.transaction(|state| {
            // upsert by external charge id
            let payment_id = match state.payment_id_by_external_ref(&charge.id) {
                Some(id) => id,
                None => {
                    let amount = Amount::new(charge.amount).map_err(|_| {
                        CoreError::consistency(format!(
                            "charge {} reports non-positive amount {}",
                            charge.id, charge.amount
                        ))
                    })?;
                    let mut payment = Payment::new(
                        charge.payer_id,
                        charge.booking_id,
                        amount,
                        PaymentMethod::Promptpay,
                        now,
                    );
                    payment.status = PaymentStatus::AwaitingPayment;
                    payment.external_charge_id = Some(charge.id.clone());
                    payment.raw = Some(charge.raw.clone());
                    let id = payment.id;
                    state.insert_payment(payment)?;
                    id
                }
            };

            if state.payment_mut(payment_id)?.status == PaymentStatus::Successful {
                // replayed delivery of an already-applied charge
                return Ok(None);
            }
            if charge.status != ChargeStatus::Successful {
                // nothing settled yet; reported, not fatal
                return Ok(None);
            }

            let booking = state.booking(charge.booking_id)?;
            if !booking.status.is_payable() {
                // a different payment won; acknowledge without touching money
                state.payment_mut(payment_id)?.status = PaymentStatus::Failed;
                return Ok(None);
            }
            let price = booking.price;
            let teacher_id = booking.teacher_id;
            let slot_id = booking.slot_id;
            let student_id = booking.student_id;

            // money in: the settled charge lands in the payer's wallet
            let charged = Amount::new(charge.amount).map_err(|_| {
                CoreError::consistency(format!(
                    "charge {} reports non-positive amount {}",
                    charge.id, charge.amount
                ))
            })?;
            let payer = state.wallet_mut(charge.payer_id, WalletRole::User);
            payer.credit_available(charged);

            // the gateway-confirmed amount must match the booking exactly;
            // aborting here rolls the credit above back out
            if charge.amount != price.value() {
                return Err(CoreError::consistency(format!(
                    "charge {} amount {} does not match booking price {}",
                    charge.id,
                    charge.amount,
                    price.value()
                )));
            }

            // money out again: settle the booking
            payer.debit_available(charged)?;
            state
                .wallet_mut(teacher_id, WalletRole::Teacher)
                .credit_pending(price);

            let payment = state.payment_mut(payment_id)?;
            payment.status = PaymentStatus::Successful;
            payment.raw = Some(charge.raw.clone());

            state.booking_mut(charge.booking_id)?.mark_paid(now)?;
            state.slot_mut(slot_id)?.status = SlotStatus::Paid;

            Ok(Some((charge.booking_id, student_id, teacher_id)))
        })?;

        match settled {
            Some((booking_id, student_id, teacher_id)) => {
                info!(%booking_id, charge_id, "charge settled booking");
                if let Err(err) = self
                    .jobs
                    .enqueue(JobPayload::ProvisionRoom { booking_id }, Schedule::At(now))
                    .await
                {
                    warn!(%booking_id, %err, "failed to schedule room provisioning");
                }
                if let Err(err) = self
                    .notifier
                    .notify_users(
                        &[student_id, teacher_id],
                        "Payment received, your class is confirmed",
                    )
                    .await
                {
                    warn!(%booking_id, %err, "payment notification failed");
                }
                Ok(WebhookOutcome::ChargePaid { booking_id })
            }
            None => Ok(WebhookOutcome::ChargeSkipped),
        }
    }

    /// Transfer reconciliation: settles or compensates a payout by the
    /// payout-log id embedded in the transfer metadata.
    async fn reconcile_transfer(&self, transfer_id: &str) -> Result<WebhookOutcome> {
        let transfer = self.gateway.fetch_transfer(transfer_id).await?;

        let outcome = self.ledger.transaction(|state| {
            let log = state.payout_log(transfer.payout_log_id)?;
            let teacher_id = log.teacher_id;
            let status = log.status;

            match transfer.status {
                TransferStatus::Sent => {
                    if status == PayoutStatus::Pending {
                        let log = state.payout_log_mut(transfer.payout_log_id)?;
                        log.status = PayoutStatus::Processing;
                        log.transfer_id = Some(transfer.id.clone());
                    }
                    Ok(WebhookOutcome::TransferProcessing)
                }
                TransferStatus::Paid => {
                    if status == PayoutStatus::Paid {
                        return Ok(WebhookOutcome::TransferSettled); // replay
                    }
                    // funds have left the system: drop the lock entirely
                    state
                        .wallet_mut(teacher_id, WalletRole::Teacher)
                        .clear_lock();
                    state.payout_log_mut(transfer.payout_log_id)?.status = PayoutStatus::Paid;
                    Ok(WebhookOutcome::TransferSettled)
                }
                TransferStatus::Failed => {
                    if matches!(status, PayoutStatus::Reversed | PayoutStatus::Failed) {
                        return Ok(WebhookOutcome::TransferReversed); // replay
                    }
                    // compensating transaction: locked funds go back to the
                    // wallet in full
                    state
                        .wallet_mut(teacher_id, WalletRole::Teacher)
                        .release_lock()?;
                    let log = state.payout_log_mut(transfer.payout_log_id)?;
                    log.status = PayoutStatus::Reversed;
                    log.error_message = Some("transfer failed at gateway".to_string());
                    Ok(WebhookOutcome::TransferReversed)
                }
            }
        })?;

        info!(transfer_id, ?outcome, "transfer reconciled");
        Ok(outcome)
    }
}
