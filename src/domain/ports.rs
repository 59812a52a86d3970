use crate::domain::money::Amount;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Authoritative state of a gateway charge, as re-fetched by id.
///
/// Webhook payload amounts are never trusted; this is what the reconciler
/// acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeState {
    pub id: String,
    pub booking_id: Uuid,
    pub payer_id: Uuid,
    pub amount: Decimal,
    pub status: ChargeStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Pending,
    Successful,
    Failed,
    Expired,
}

/// Authoritative state of a gateway transfer; `payout_log_id` travels in the
/// transfer metadata so settlement can find its audit record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferState {
    pub id: String,
    pub payout_log_id: Uuid,
    pub amount: Decimal,
    pub status: TransferStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Sent,
    Paid,
    Failed,
}

/// External payment gateway (charges in, transfers out).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a charge the payer will settle out-of-band; the returned id is
    /// the idempotency key for later webhook deliveries.
    async fn create_charge(
        &self,
        booking_id: Uuid,
        payer_id: Uuid,
        amount: Amount,
    ) -> Result<ChargeState>;

    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeState>;

    async fn fetch_transfer(&self, transfer_id: &str) -> Result<TransferState>;

    /// Registers a bank recipient for a teacher. Called once per teacher; the
    /// returned id is cached on the teacher record.
    async fn create_recipient(&self, teacher_id: Uuid, display_name: &str) -> Result<String>;

    /// Initiates a transfer to a registered recipient; settlement arrives
    /// later as a `transfer` webhook.
    async fn create_transfer(
        &self,
        recipient_id: &str,
        amount: Amount,
        payout_log_id: Uuid,
    ) -> Result<String>;
}

/// Result of externally verifying an uploaded bank-transfer receipt.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedReceipt {
    /// Bank transaction reference; unique per real-world transfer, used as
    /// the idempotency key for receipt redemption.
    pub trans_ref: String,
    pub amount: Decimal,
    pub receiver_name: String,
}

#[async_trait]
pub trait ReceiptVerifier: Send + Sync {
    async fn verify(
        &self,
        image_base64: &str,
        expected_amount: Amount,
        expected_receiver: &str,
    ) -> Result<VerifiedReceipt>;
}

/// Push/SMS/email fan-out. Best effort: failures are logged, never propagated
/// into a financial transaction.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_users(&self, user_ids: &[Uuid], message: &str) -> Result<()>;
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str, sender_id: Uuid) -> Result<()>;
}

/// Video call room lifecycle. Provisioning is slow, so it runs in a job after
/// the payment transaction commits, never inside it.
#[async_trait]
pub trait CallRoomProvisioner: Send + Sync {
    async fn provision(&self, booking_id: Uuid) -> Result<String>;
    async fn teardown(&self, room_id: &str) -> Result<()>;
}

pub type PaymentGatewayArc = Arc<dyn PaymentGateway>;
pub type ReceiptVerifierArc = Arc<dyn ReceiptVerifier>;
pub type NotifierArc = Arc<dyn Notifier>;
pub type ChatServiceArc = Arc<dyn ChatService>;
pub type CallRoomProvisionerArc = Arc<dyn CallRoomProvisioner>;
