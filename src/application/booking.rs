use crate::config::PolicyConfig;
use crate::domain::booking::{Booking, BookingStatus, Slot, SlotStatus};
use crate::domain::jobs::{JobPayload, JobQueueArc, Schedule};
use crate::domain::money::Amount;
use crate::domain::ports::{CallRoomProvisionerArc, ChatServiceArc, NotifierArc};
use crate::domain::wallet::WalletRole;
use crate::error::{CoreError, Result};
use crate::infrastructure::ledger::Ledger;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns the booking/slot state machine: reservation, teacher decision,
/// cancellation, time-based transitions and the expiry sweep.
///
/// Every status change happens inside one ledger transaction with the
/// current status re-checked there, so racing jobs, webhooks and requests
/// cannot move a booking backward or double-apply an effect. Notifications
/// and chat messages are best-effort side effects after commit.
pub struct BookingEngine {
    ledger: Ledger,
    jobs: JobQueueArc,
    notifier: NotifierArc,
    chat: ChatServiceArc,
    rooms: CallRoomProvisionerArc,
    config: PolicyConfig,
}

impl BookingEngine {
    pub fn new(
        ledger: Ledger,
        jobs: JobQueueArc,
        notifier: NotifierArc,
        chat: ChatServiceArc,
        rooms: CallRoomProvisionerArc,
        config: PolicyConfig,
    ) -> Self {
        Self {
            ledger,
            jobs,
            notifier,
            chat,
            rooms,
            config,
        }
    }

    /// Reserves a slot and creates the matching booking.
    ///
    /// An end time earlier than the start is taken as an overnight span and
    /// advanced by one day; an end time equal to the start is invalid.
    pub async fn create_booking_slot(
        &self,
        student_id: Uuid,
        teacher_id: Uuid,
        subject_id: Uuid,
        start_time: DateTime<Utc>,
        mut end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Booking> {
        if end_time < start_time {
            end_time += Duration::days(1);
        }
        if end_time == start_time {
            return Err(CoreError::validation("booking must have a non-zero duration"));
        }

        let booking = self.ledger.transaction(|state| {
            let teacher = state.teacher(teacher_id)?;
            let hourly_rate = teacher.hourly_rate;
            let requires_confirmation = teacher.requires_confirmation;

            if state.has_slot_conflict(teacher_id, start_time, end_time) {
                return Err(CoreError::conflict(format!(
                    "teacher {teacher_id} already has a slot overlapping the requested window"
                )));
            }

            let minutes = (end_time - start_time).num_minutes();
            let hours = Decimal::from(minutes) / Decimal::from(60);
            let price = Amount::new(hourly_rate.value() * hours)?;

            let slot = Slot::reserved(teacher_id, student_id, start_time, end_time);
            let status = if requires_confirmation {
                BookingStatus::TeacherConfirmPending
            } else {
                BookingStatus::Pending
            };
            let booking = Booking {
                id: Uuid::new_v4(),
                student_id,
                teacher_id,
                subject_id,
                slot_id: slot.id,
                start_time,
                end_time,
                price,
                status,
                created_at: now,
                paid_at: None,
                call_room_id: None,
            };
            state.insert_slot(slot);
            state.insert_booking(booking.clone());
            Ok(booking)
        })?;

        info!(booking_id = %booking.id, %teacher_id, %student_id, "booking created");
        self.notify(
            &[teacher_id],
            &format!("New booking request for {}", booking.start_time),
        )
        .await;
        if let Err(err) = self
            .chat
            .send_message(
                &format!("booking-{}", booking.id),
                "A new class has been requested.",
                student_id,
            )
            .await
        {
            warn!(booking_id = %booking.id, %err, "chat announcement failed");
        }

        self.schedule_booking_jobs(&booking, now).await;
        Ok(booking)
    }

    /// The three class-time jobs plus the auto-expiry of an unpaid booking.
    async fn schedule_booking_jobs(&self, booking: &Booking, now: DateTime<Utc>) {
        let id = booking.id;
        let plan = [
            (
                JobPayload::Reminder { booking_id: id },
                booking.start_time - Duration::minutes(self.config.reminder_lead_minutes),
            ),
            (
                JobPayload::ClassEndCheck { booking_id: id },
                booking.end_time - Duration::minutes(self.config.class_end_check_minutes),
            ),
            (JobPayload::CallTeardown { booking_id: id }, booking.end_time),
            (
                JobPayload::ExpireBooking { booking_id: id },
                now + Duration::minutes(self.config.booking_expiry_minutes),
            ),
        ];
        for (payload, run_at) in plan {
            if let Err(err) = self.jobs.enqueue(payload, Schedule::At(run_at)).await {
                warn!(booking_id = %id, %err, "failed to schedule booking job");
            }
        }
    }

    /// Teacher accepts; the booking becomes payable.
    pub async fn confirm_booking(&self, booking_id: Uuid, teacher_id: Uuid) -> Result<()> {
        let student_id = self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if booking.teacher_id != teacher_id {
                return Err(CoreError::validation("only the booked teacher may confirm"));
            }
            booking.confirm()?;
            Ok(booking.student_id)
        })?;
        self.notify(&[student_id], "Your booking was confirmed, please pay to secure it")
            .await;
        Ok(())
    }

    /// Teacher declines; the slot is released.
    pub async fn reject_booking(&self, booking_id: Uuid, teacher_id: Uuid) -> Result<()> {
        let student_id = self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if booking.teacher_id != teacher_id {
                return Err(CoreError::validation("only the booked teacher may reject"));
            }
            booking.reject()?;
            let slot_id = booking.slot_id;
            let student_id = booking.student_id;
            state.slot_mut(slot_id)?.status = SlotStatus::Expired;
            Ok(student_id)
        })?;
        self.notify(&[student_id], "Your booking request was declined")
            .await;
        Ok(())
    }

    /// Student withdraws before paying; the slot is released.
    pub async fn cancel_booking(&self, booking_id: Uuid, student_id: Uuid) -> Result<()> {
        let teacher_id = self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if booking.student_id != student_id {
                return Err(CoreError::validation("only the booking owner may cancel"));
            }
            booking.cancel()?;
            let slot_id = booking.slot_id;
            let teacher_id = booking.teacher_id;
            state.slot_mut(slot_id)?.status = SlotStatus::Expired;
            Ok(teacher_id)
        })?;
        self.notify(&[teacher_id], "A booking was canceled by the student")
            .await;
        Ok(())
    }

    /// Expires unpaid bookings older than the configured window.
    ///
    /// Idempotent: the status is re-checked inside the same transaction that
    /// flips it, so a second run over the same booking finds it already
    /// expired, does nothing, and sends nothing.
    pub async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::minutes(self.config.booking_expiry_minutes);
        let candidates = self.ledger.read(|state| state.stale_unpaid_bookings(cutoff));

        let mut expired = Vec::new();
        for booking_id in candidates {
            match self.expire_one(booking_id) {
                Ok(Some(student_id)) => expired.push((booking_id, student_id)),
                Ok(None) => {}
                Err(err) => warn!(%booking_id, %err, "expiry failed"),
            }
        }

        for (booking_id, student_id) in &expired {
            debug!(%booking_id, "booking expired by sweep");
            self.notify(
                &[*student_id],
                "Your booking expired because it was not paid in time",
            )
            .await;
        }
        Ok(expired.len())
    }

    /// Expires a single booking if it is still awaiting payment. Returns the
    /// student to notify when a transition actually happened.
    fn expire_one(&self, booking_id: Uuid) -> Result<Option<Uuid>> {
        self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if !booking.status.is_pre_payment() {
                // already paid or terminal, someone else won the race
                return Ok(None);
            }
            booking.expire()?;
            let slot_id = booking.slot_id;
            let student_id = booking.student_id;
            let slot = state.slot_mut(slot_id)?;
            if slot.status == SlotStatus::Pending {
                slot.status = SlotStatus::Expired;
            }
            Ok(Some(student_id))
        })
    }

    /// `ExpireBooking` job: per-booking timeout scheduled at creation.
    pub async fn handle_expire(&self, booking_id: Uuid) -> Result<()> {
        if let Some(student_id) = self.expire_one(booking_id)? {
            info!(%booking_id, "booking auto-expired");
            self.notify(
                &[student_id],
                "Your booking expired because it was not paid in time",
            )
            .await;
        }
        Ok(())
    }

    /// `Reminder` job: no-op unless the class was actually paid for.
    pub async fn handle_reminder(&self, booking_id: Uuid) -> Result<()> {
        let booking = self
            .ledger
            .booking(booking_id)
            .ok_or_else(|| CoreError::not_found(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Paid {
            return Ok(());
        }
        self.notify(
            &[booking.student_id, booking.teacher_id],
            "Your class starts in a few minutes",
        )
        .await;
        Ok(())
    }

    /// `ClassEndCheck` job: nudge shortly before the end of a paid class.
    pub async fn handle_class_end_check(&self, booking_id: Uuid) -> Result<()> {
        let booking = self
            .ledger
            .booking(booking_id)
            .ok_or_else(|| CoreError::not_found(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Paid {
            return Ok(());
        }
        self.notify(
            &[booking.student_id, booking.teacher_id],
            "Class is ending soon",
        )
        .await;
        Ok(())
    }

    /// `CallTeardown` job: closes the room, completes the booking and makes
    /// the teacher's earnings payable.
    pub async fn handle_teardown(&self, booking_id: Uuid) -> Result<()> {
        let booking = self
            .ledger
            .booking(booking_id)
            .ok_or_else(|| CoreError::not_found(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Paid {
            return Ok(());
        }

        // external teardown before the transaction opens
        if let Some(room_id) = &booking.call_room_id
            && let Err(err) = self.rooms.teardown(room_id).await
        {
            warn!(%booking_id, %err, "room teardown failed");
        }

        self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if booking.status != BookingStatus::Paid {
                return Ok(()); // lost the race, nothing to do
            }
            booking.mark_studied()?;
            booking.call_room_id = None;
            let slot_id = booking.slot_id;
            let teacher_id = booking.teacher_id;
            let price = booking.price;

            let slot = state.slot_mut(slot_id)?;
            slot.status = SlotStatus::Completed;
            slot.call_room_id = None;

            state
                .wallet_mut(teacher_id, WalletRole::Teacher)
                .settle_pending(price)?;
            Ok(())
        })?;

        info!(%booking_id, "class completed, earnings settled to available");
        Ok(())
    }

    /// `ProvisionRoom` job: slow external call, deliberately decoupled from
    /// the payment transaction. Retried by the scheduler on failure.
    pub async fn handle_provision_room(&self, booking_id: Uuid) -> Result<()> {
        let booking = self
            .ledger
            .booking(booking_id)
            .ok_or_else(|| CoreError::not_found(format!("booking {booking_id}")))?;
        if booking.status != BookingStatus::Paid || booking.call_room_id.is_some() {
            return Ok(());
        }

        let room_id = self.rooms.provision(booking_id).await?;
        self.ledger.transaction(|state| {
            let booking = state.booking_mut(booking_id)?;
            if booking.status != BookingStatus::Paid || booking.call_room_id.is_some() {
                return Ok(());
            }
            booking.call_room_id = Some(room_id.clone());
            let slot_id = booking.slot_id;
            state.slot_mut(slot_id)?.call_room_id = Some(room_id.clone());
            Ok(())
        })?;

        debug!(%booking_id, room_id, "call room provisioned");
        Ok(())
    }

    async fn notify(&self, user_ids: &[Uuid], message: &str) {
        if let Err(err) = self.notifier.notify_users(user_ids, message).await {
            warn!(%err, "notification delivery failed");
        }
    }
}
