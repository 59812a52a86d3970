use rust_decimal::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Failed,
    Reversed,
}

/// Audit record of one payout attempt.
///
/// Created when a batch run locks a wallet's balance; reaches a terminal
/// status only via webhook confirmation or an explicit reversal. The gross
/// amount always equals `system_fee + gateway_fee + teacher_net`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PayoutLog {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub system_fee: Decimal,
    pub gateway_fee: Decimal,
    pub teacher_net: Decimal,
    pub status: PayoutStatus,
    pub transfer_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PayoutLog {
    /// Whether the transfer worker may still act on this log.
    ///
    /// Guards redelivered payout jobs: once the log has left `Pending`, the
    /// worker must not initiate a second transfer.
    pub fn is_actionable(&self) -> bool {
        self.status == PayoutStatus::Pending
    }
}
