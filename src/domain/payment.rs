use crate::domain::money::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    Wallet,
    Promptpay,
    BankTransfer,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    /// A gateway charge exists and settlement will arrive via webhook.
    AwaitingPayment,
    Successful,
    Failed,
}

/// An attempted or completed charge against a booking.
///
/// The external reference (gateway charge id or verified receipt transaction
/// ref) is unique across all payments; it is the idempotency key that
/// collapses webhook redelivery and receipt replay into a single effect.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Amount,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_charge_id: Option<String>,
    pub external_receipt_ref: Option<String>,
    /// Raw gateway payload, kept verbatim for audit.
    pub raw: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        user_id: Uuid,
        booking_id: Uuid,
        amount: Amount,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            booking_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            external_charge_id: None,
            external_receipt_ref: None,
            raw: None,
            created_at: now,
        }
    }

    /// The idempotency key for this payment, if it has one.
    pub fn external_ref(&self) -> Option<&str> {
        self.external_charge_id
            .as_deref()
            .or(self.external_receipt_ref.as_deref())
    }
}
