use crate::domain::money::Amount;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tutor profile, reduced to what the booking/payout core needs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Teacher {
    pub id: Uuid,
    pub display_name: String,
    pub hourly_rate: Amount,
    /// Only verified teachers are eligible for payouts.
    pub verified: bool,
    /// Whether new bookings wait for the teacher's confirmation before
    /// becoming payable.
    pub requires_confirmation: bool,
    /// Gateway recipient registration, created once and cached here.
    pub recipient_id: Option<String>,
}

impl Teacher {
    pub fn new(display_name: impl Into<String>, hourly_rate: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            hourly_rate,
            verified: false,
            requires_confirmation: false,
            recipient_id: None,
        }
    }
}
