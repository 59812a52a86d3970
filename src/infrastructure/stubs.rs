//! Stub collaborators for the CLI replayer and the integration tests.
//!
//! These stand in for the out-of-scope delivery/chat/video/gateway systems:
//! they record what the core asked them to do and can be scripted to fail,
//! which is all the consistency tests need.

use crate::domain::money::Amount;
use crate::domain::ports::{
    CallRoomProvisioner, ChargeState, ChargeStatus, ChatService, Notifier, PaymentGateway,
    ReceiptVerifier, TransferState, TransferStatus, VerifiedReceipt,
};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every notification instead of delivering it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<Uuid>, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Vec<Uuid>, String)> {
        lock(&self.sent).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        lock(&self.sent)
            .iter()
            .filter(|(_, msg)| msg.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_users(&self, user_ids: &[Uuid], message: &str) -> Result<()> {
        lock(&self.sent).push((user_ids.to_vec(), message.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChat {
    messages: Mutex<Vec<(String, String, Uuid)>>,
}

impl RecordingChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String, Uuid)> {
        lock(&self.messages).clone()
    }
}

#[async_trait]
impl ChatService for RecordingChat {
    async fn send_message(&self, channel_id: &str, text: &str, sender_id: Uuid) -> Result<()> {
        lock(&self.messages)
            .push((channel_id.to_string(), text.to_string(), sender_id));
        Ok(())
    }
}

/// Hands out sequential room ids; remembers what was torn down.
#[derive(Default)]
pub struct CountingRoomProvisioner {
    seq: AtomicU32,
    torn_down: Mutex<Vec<String>>,
}

impl CountingRoomProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provisioned(&self) -> u32 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn torn_down(&self) -> Vec<String> {
        lock(&self.torn_down).clone()
    }
}

#[async_trait]
impl CallRoomProvisioner for CountingRoomProvisioner {
    async fn provision(&self, _booking_id: Uuid) -> Result<String> {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("room-{n}"))
    }

    async fn teardown(&self, room_id: &str) -> Result<()> {
        lock(&self.torn_down).push(room_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct GatewayInner {
    charges: HashMap<String, ChargeState>,
    transfers: HashMap<String, TransferState>,
    recipients_created: u32,
    fail_transfers: bool,
    seq: u32,
}

/// Scripted payment gateway.
///
/// Charges and transfers it creates are held in memory; tests flip a charge
/// to `Successful` (simulating the payer settling out-of-band) before
/// replaying the corresponding webhook, or script a transfer outcome.
#[derive(Default)]
pub struct ScriptedGateway {
    inner: Mutex<GatewayInner>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_charge(&self, charge: ChargeState) {
        lock(&self.inner).charges.insert(charge.id.clone(), charge);
    }

    /// Marks an existing charge settled, optionally overriding the amount
    /// (to exercise amount-mismatch reconciliation).
    pub fn settle_charge(&self, charge_id: &str, amount: Option<rust_decimal::Decimal>) {
        let mut inner = lock(&self.inner);
        if let Some(charge) = inner.charges.get_mut(charge_id) {
            charge.status = ChargeStatus::Successful;
            if let Some(amount) = amount {
                charge.amount = amount;
            }
        }
    }

    pub fn set_transfer_status(&self, transfer_id: &str, status: TransferStatus) {
        let mut inner = lock(&self.inner);
        if let Some(transfer) = inner.transfers.get_mut(transfer_id) {
            transfer.status = status;
        }
    }

    pub fn fail_transfer_creation(&self, fail: bool) {
        lock(&self.inner).fail_transfers = fail;
    }

    pub fn transfers(&self) -> Vec<TransferState> {
        lock(&self.inner).transfers.values().cloned().collect()
    }

    pub fn recipients_created(&self) -> u32 {
        lock(&self.inner).recipients_created
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_charge(
        &self,
        booking_id: Uuid,
        payer_id: Uuid,
        amount: Amount,
    ) -> Result<ChargeState> {
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        let id = format!("chrg_{}", inner.seq);
        let charge = ChargeState {
            id: id.clone(),
            booking_id,
            payer_id,
            amount: amount.value(),
            status: ChargeStatus::Pending,
            raw: json!({"object": "charge", "id": id}),
        };
        inner.charges.insert(id, charge.clone());
        Ok(charge)
    }

    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeState> {
        lock(&self.inner)
            .charges
            .get(charge_id)
            .cloned()
            .ok_or_else(|| CoreError::external(format!("charge {charge_id} unknown at gateway")))
    }

    async fn fetch_transfer(&self, transfer_id: &str) -> Result<TransferState> {
        lock(&self.inner)
            .transfers
            .get(transfer_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::external(format!("transfer {transfer_id} unknown at gateway"))
            })
    }

    async fn create_recipient(&self, _teacher_id: Uuid, _display_name: &str) -> Result<String> {
        let mut inner = lock(&self.inner);
        inner.seq += 1;
        inner.recipients_created += 1;
        Ok(format!("rcpt_{}", inner.seq))
    }

    async fn create_transfer(
        &self,
        _recipient_id: &str,
        amount: Amount,
        payout_log_id: Uuid,
    ) -> Result<String> {
        let mut inner = lock(&self.inner);
        if inner.fail_transfers {
            return Err(CoreError::external("transfer initiation failed"));
        }
        inner.seq += 1;
        let id = format!("trf_{}", inner.seq);
        inner.transfers.insert(
            id.clone(),
            TransferState {
                id: id.clone(),
                payout_log_id,
                amount: amount.value(),
                status: TransferStatus::Sent,
            },
        );
        Ok(id)
    }
}

/// Receipt verifier scripted with known-good receipt images.
#[derive(Default)]
pub struct ScriptedReceiptVerifier {
    receipts: Mutex<HashMap<String, VerifiedReceipt>>,
}

impl ScriptedReceiptVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image the verifier will accept.
    pub fn approve(&self, image_base64: &str, receipt: VerifiedReceipt) {
        lock(&self.receipts).insert(image_base64.to_string(), receipt);
    }
}

#[async_trait]
impl ReceiptVerifier for ScriptedReceiptVerifier {
    async fn verify(
        &self,
        image_base64: &str,
        expected_amount: Amount,
        expected_receiver: &str,
    ) -> Result<VerifiedReceipt> {
        let receipt = lock(&self.receipts)
            .get(image_base64)
            .cloned()
            .ok_or_else(|| CoreError::external("receipt could not be verified"))?;
        if receipt.amount != expected_amount.value() {
            return Err(CoreError::validation(format!(
                "receipt amount {} does not match expected {expected_amount}",
                receipt.amount
            )));
        }
        if receipt.receiver_name != expected_receiver {
            return Err(CoreError::validation(format!(
                "receipt receiver {} does not match expected {expected_receiver}",
                receipt.receiver_name
            )));
        }
        Ok(receipt)
    }
}
