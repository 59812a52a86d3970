use crate::domain::booking::SlotStatus;
use crate::domain::jobs::{JobPayload, JobQueueArc, Schedule};
use crate::domain::payment::{Payment, PaymentMethod, PaymentStatus};
use crate::domain::ports::{NotifierArc, PaymentGatewayArc, ReceiptVerifierArc};
use crate::domain::wallet::WalletRole;
use crate::error::{CoreError, Result};
use crate::infrastructure::ledger::Ledger;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Evidence for the bank-transfer strategy: the uploaded receipt image.
#[derive(Debug, Clone)]
pub struct ReceiptEvidence {
    pub image_base64: String,
}

/// Strategy-dispatched payment entry point.
///
/// All strategies share one guarantee: either the payment row, the booking
/// and slot transitions and the wallet moves commit together, or none of
/// them do. External verification and charge creation happen before the
/// transaction opens; the booking's payable status is re-checked inside it,
/// which is what serializes two racing payment attempts down to one winner.
pub struct PaymentEngine {
    ledger: Ledger,
    jobs: JobQueueArc,
    gateway: PaymentGatewayArc,
    receipts: ReceiptVerifierArc,
    notifier: NotifierArc,
}

impl PaymentEngine {
    pub fn new(
        ledger: Ledger,
        jobs: JobQueueArc,
        gateway: PaymentGatewayArc,
        receipts: ReceiptVerifierArc,
        notifier: NotifierArc,
    ) -> Self {
        Self {
            ledger,
            jobs,
            gateway,
            receipts,
            notifier,
        }
    }

    pub async fn pay(
        &self,
        method: PaymentMethod,
        booking_id: Uuid,
        payer_id: Uuid,
        evidence: Option<ReceiptEvidence>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match method {
            PaymentMethod::Wallet => self.pay_with_wallet(booking_id, payer_id, now).await,
            PaymentMethod::BankTransfer => {
                let evidence = evidence.ok_or_else(|| {
                    CoreError::validation("bank-transfer payment requires a receipt image")
                })?;
                self.pay_with_receipt(booking_id, payer_id, evidence, now)
                    .await
            }
            PaymentMethod::Promptpay => self.start_promptpay(booking_id, payer_id, now).await,
        }
    }

    /// Wallet strategy: debit the payer, credit the teacher's pending
    /// earnings and settle the booking, all in one transaction.
    async fn pay_with_wallet(
        &self,
        booking_id: Uuid,
        payer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ledger.transaction(|state| {
            let booking = state.booking(booking_id)?;
            if !booking.status.is_payable() {
                return Err(CoreError::conflict(format!(
                    "booking {booking_id} is not payable (status {:?})",
                    booking.status
                )));
            }
            let price = booking.price;
            let teacher_id = booking.teacher_id;
            let slot_id = booking.slot_id;

            // balance re-read inside the transaction; a concurrent spend of
            // the same wallet cannot slip between check and debit
            state
                .wallet_mut(payer_id, WalletRole::User)
                .debit_available(price)?;
            state
                .wallet_mut(teacher_id, WalletRole::Teacher)
                .credit_pending(price);

            let mut payment = Payment::new(payer_id, booking_id, price, PaymentMethod::Wallet, now);
            payment.status = PaymentStatus::Successful;
            state.insert_payment(payment)?;

            state.booking_mut(booking_id)?.mark_paid(now)?;
            state.slot_mut(slot_id)?.status = SlotStatus::Paid;
            Ok(())
        })?;

        info!(%booking_id, %payer_id, "booking paid from wallet");
        self.after_paid(booking_id, now).await;
        Ok(())
    }

    /// Receipt strategy: the verified bank transaction reference is the
    /// idempotency key; a reference can only ever be redeemed once, even
    /// against a different booking.
    async fn pay_with_receipt(
        &self,
        booking_id: Uuid,
        payer_id: Uuid,
        evidence: ReceiptEvidence,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (price, receiver_name) = self.ledger.read(|state| {
            let booking = state.booking(booking_id)?;
            if !booking.status.is_payable() {
                return Err(CoreError::conflict(format!(
                    "booking {booking_id} is not payable (status {:?})",
                    booking.status
                )));
            }
            let teacher = state.teacher(booking.teacher_id)?;
            Ok((booking.price, teacher.display_name.clone()))
        })?;

        // external verification completes before the transaction opens; its
        // result is an already-validated input below
        let receipt = self
            .receipts
            .verify(&evidence.image_base64, price, &receiver_name)
            .await?;
        let raw = serde_json::json!({
            "trans_ref": receipt.trans_ref,
            "amount": receipt.amount,
            "receiver": receipt.receiver_name,
        });

        self.ledger.transaction(|state| {
            if state.payment_by_external_ref(&receipt.trans_ref).is_some() {
                return Err(CoreError::conflict(format!(
                    "receipt {} has already been used",
                    receipt.trans_ref
                )));
            }

            let booking = state.booking(booking_id)?;
            if !booking.status.is_payable() {
                return Err(CoreError::conflict(format!(
                    "booking {booking_id} is not payable (status {:?})",
                    booking.status
                )));
            }
            let price = booking.price;
            let teacher_id = booking.teacher_id;
            let slot_id = booking.slot_id;

            state
                .wallet_mut(teacher_id, WalletRole::Teacher)
                .credit_pending(price);

            let mut payment =
                Payment::new(payer_id, booking_id, price, PaymentMethod::BankTransfer, now);
            payment.status = PaymentStatus::Successful;
            payment.external_receipt_ref = Some(receipt.trans_ref.clone());
            payment.raw = Some(raw.clone());
            state.insert_payment(payment)?;

            state.booking_mut(booking_id)?.mark_paid(now)?;
            state.slot_mut(slot_id)?.status = SlotStatus::Paid;
            Ok(())
        })?;

        info!(%booking_id, %payer_id, "booking paid by verified bank transfer");
        self.after_paid(booking_id, now).await;
        Ok(())
    }

    /// PromptPay strategy: creates the gateway charge and records it as
    /// awaiting payment. Settlement arrives through the webhook reconciler.
    async fn start_promptpay(
        &self,
        booking_id: Uuid,
        payer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let price = self.ledger.read(|state| {
            let booking = state.booking(booking_id)?;
            if !booking.status.is_payable() {
                return Err(CoreError::conflict(format!(
                    "booking {booking_id} is not payable (status {:?})",
                    booking.status
                )));
            }
            Ok(booking.price)
        })?;

        let charge = self.gateway.create_charge(booking_id, payer_id, price).await?;

        self.ledger.transaction(|state| {
            let mut payment =
                Payment::new(payer_id, booking_id, price, PaymentMethod::Promptpay, now);
            payment.status = PaymentStatus::AwaitingPayment;
            payment.external_charge_id = Some(charge.id.clone());
            payment.raw = Some(charge.raw.clone());
            state.insert_payment(payment)
        })?;

        info!(%booking_id, charge_id = charge.id, "promptpay charge created, awaiting settlement");
        Ok(())
    }

    /// Best-effort follow-ups once a booking is paid: the call room is
    /// provisioned by a job (room creation is slow and must not extend the
    /// payment transaction) and both parties are notified.
    async fn after_paid(&self, booking_id: Uuid, now: DateTime<Utc>) {
        if let Err(err) = self
            .jobs
            .enqueue(JobPayload::ProvisionRoom { booking_id }, Schedule::At(now))
            .await
        {
            warn!(%booking_id, %err, "failed to schedule room provisioning");
        }

        if let Some(booking) = self.ledger.booking(booking_id) {
            if let Err(err) = self
                .notifier
                .notify_users(
                    &[booking.student_id, booking.teacher_id],
                    "Payment received, your class is confirmed",
                )
                .await
            {
                warn!(%booking_id, %err, "payment notification failed");
            }
        }
    }
}
