use crate::domain::money::Amount;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical booking status set.
///
/// Transitions are monotonic: a booking only ever moves to a status with a
/// higher rank, and the four terminal statuses share the top rank. Handlers
/// that find a booking already at or beyond their target state no-op instead
/// of erroring, which is what makes job redelivery and webhook replay safe.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    TeacherConfirmPending,
    Pending,
    Paid,
    Studied,
    Expired,
    Rejected,
    Canceled,
}

impl BookingStatus {
    fn rank(self) -> u8 {
        match self {
            Self::TeacherConfirmPending => 0,
            Self::Pending => 1,
            Self::Paid => 2,
            Self::Studied | Self::Expired | Self::Rejected | Self::Canceled => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Payment is only accepted while the booking sits in `Pending`.
    pub fn is_payable(self) -> bool {
        self == Self::Pending
    }

    /// True before any money has moved: the states expiry and cancellation
    /// may still act on.
    pub fn is_pre_payment(self) -> bool {
        matches!(self, Self::TeacherConfirmPending | Self::Pending)
    }
}

/// A student's claim on a tutor's time. Never physically deleted.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Booking {
    pub id: Uuid,
    pub student_id: Uuid,
    pub teacher_id: Uuid,
    pub subject_id: Uuid,
    pub slot_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: Amount,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub call_room_id: Option<String>,
}

impl Booking {
    fn transition(&mut self, from_ok: bool, to: BookingStatus) -> Result<()> {
        if !from_ok {
            return Err(CoreError::conflict(format!(
                "booking {} is {:?}, cannot move to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        Ok(())
    }

    /// Teacher accepts the request; the booking becomes payable.
    pub fn confirm(&mut self) -> Result<()> {
        let ok = self.status == BookingStatus::TeacherConfirmPending;
        self.transition(ok, BookingStatus::Pending)
    }

    /// Teacher declines before payment.
    pub fn reject(&mut self) -> Result<()> {
        let ok = self.status.is_pre_payment();
        self.transition(ok, BookingStatus::Rejected)
    }

    /// Student withdraws before payment.
    pub fn cancel(&mut self) -> Result<()> {
        let ok = self.status.is_pre_payment();
        self.transition(ok, BookingStatus::Canceled)
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        let ok = self.status.is_payable();
        self.transition(ok, BookingStatus::Paid)?;
        self.paid_at = Some(now);
        Ok(())
    }

    pub fn mark_studied(&mut self) -> Result<()> {
        let ok = self.status == BookingStatus::Paid;
        self.transition(ok, BookingStatus::Studied)
    }

    pub fn expire(&mut self) -> Result<()> {
        let ok = self.status.is_pre_payment();
        self.transition(ok, BookingStatus::Expired)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Pending,
    Paid,
    Booked,
    Completed,
    Expired,
}

/// A tutor-side time window consumed by a booking.
///
/// Released slots are retained with status `Expired` rather than deleted, so
/// history survives while the overlap check ignores them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Slot {
    pub id: Uuid,
    pub teacher_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: SlotStatus,
    pub booked_by: Option<Uuid>,
    pub call_room_id: Option<String>,
}

impl Slot {
    pub fn reserved(
        teacher_id: Uuid,
        student_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            teacher_id,
            start_time,
            end_time,
            status: SlotStatus::Pending,
            booked_by: Some(student_id),
            call_room_id: None,
        }
    }

    /// Whether this slot blocks a new reservation in `[start, end)`.
    pub fn conflicts_with(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.status != SlotStatus::Expired && self.start_time < end && start < self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    fn booking(status: BookingStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            teacher_id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            slot_id: Uuid::new_v4(),
            start_time: at(10),
            end_time: at(11),
            price: Amount::new(dec!(500)).unwrap(),
            status,
            created_at: at(8),
            paid_at: None,
            call_room_id: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut b = booking(BookingStatus::TeacherConfirmPending);
        b.confirm().unwrap();
        b.mark_paid(at(9)).unwrap();
        assert_eq!(b.paid_at, Some(at(9)));
        b.mark_studied().unwrap();
        assert!(b.status.is_terminal());
    }

    #[test]
    fn test_no_backward_transitions() {
        let mut b = booking(BookingStatus::Paid);
        assert!(matches!(b.expire(), Err(CoreError::Conflict(_))));
        assert!(matches!(b.cancel(), Err(CoreError::Conflict(_))));
        assert!(matches!(b.mark_paid(at(9)), Err(CoreError::Conflict(_))));
        assert_eq!(b.status, BookingStatus::Paid);
    }

    #[test]
    fn test_expire_only_before_payment() {
        let mut b = booking(BookingStatus::Pending);
        b.expire().unwrap();
        assert_eq!(b.status, BookingStatus::Expired);

        let mut b = booking(BookingStatus::Studied);
        assert!(b.expire().is_err());
    }

    #[test]
    fn test_pay_requires_teacher_confirmation_first() {
        let mut b = booking(BookingStatus::TeacherConfirmPending);
        assert!(matches!(b.mark_paid(at(9)), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn test_slot_overlap() {
        let teacher = Uuid::new_v4();
        let slot = Slot::reserved(teacher, Uuid::new_v4(), at(10), at(12));

        assert!(slot.conflicts_with(at(11), at(13)));
        assert!(slot.conflicts_with(at(9), at(11)));
        // half-open interval: touching edges do not conflict
        assert!(!slot.conflicts_with(at(12), at(14)));
        assert!(!slot.conflicts_with(at(8), at(10)));
    }

    #[test]
    fn test_expired_slot_does_not_block() {
        let mut slot = Slot::reserved(Uuid::new_v4(), Uuid::new_v4(), at(10), at(12));
        slot.status = SlotStatus::Expired;
        assert!(!slot.conflicts_with(at(10), at(12)));
    }
}
