use crate::domain::booking::{Booking, BookingStatus, Slot};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::payout::PayoutLog;
use crate::domain::teacher::Teacher;
use crate::domain::wallet::{Wallet, WalletRole};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Every durable record the core owns, in one place so a transaction can
/// mutate any combination of them atomically.
#[derive(Debug, Default, Clone)]
pub struct LedgerState {
    bookings: HashMap<Uuid, Booking>,
    slots: HashMap<Uuid, Slot>,
    payments: HashMap<Uuid, Payment>,
    /// External charge id / receipt trans-ref -> payment id. Uniqueness here
    /// is what collapses webhook redelivery and receipt replay.
    external_refs: HashMap<String, Uuid>,
    wallets: HashMap<(Uuid, WalletRole), Wallet>,
    payout_logs: HashMap<Uuid, PayoutLog>,
    teachers: HashMap<Uuid, Teacher>,
}

impl LedgerState {
    // --- bookings & slots ---

    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id, booking);
    }

    pub fn booking(&self, id: Uuid) -> Result<&Booking> {
        self.bookings
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("booking {id}")))
    }

    pub fn booking_mut(&mut self, id: Uuid) -> Result<&mut Booking> {
        self.bookings
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("booking {id}")))
    }

    pub fn insert_slot(&mut self, slot: Slot) {
        self.slots.insert(slot.id, slot);
    }

    pub fn slot_mut(&mut self, id: Uuid) -> Result<&mut Slot> {
        self.slots
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("slot {id}")))
    }

    /// Whether any non-expired slot of the teacher overlaps `[start, end)`.
    pub fn has_slot_conflict(
        &self,
        teacher_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> bool {
        self.slots
            .values()
            .any(|s| s.teacher_id == teacher_id && s.conflicts_with(start, end))
    }

    /// Bookings still awaiting payment that were created before `cutoff`.
    pub fn stale_unpaid_bookings(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.created_at < cutoff)
            .map(|b| b.id)
            .collect()
    }

    // --- teachers ---

    pub fn insert_teacher(&mut self, teacher: Teacher) {
        self.teachers.insert(teacher.id, teacher);
    }

    pub fn teacher(&self, id: Uuid) -> Result<&Teacher> {
        self.teachers
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("teacher {id}")))
    }

    pub fn teacher_mut(&mut self, id: Uuid) -> Result<&mut Teacher> {
        self.teachers
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("teacher {id}")))
    }

    // --- wallets ---

    /// Upsert-on-insert only: an existing wallet is returned untouched, never
    /// overwritten.
    pub fn wallet_mut(&mut self, owner_id: Uuid, role: WalletRole) -> &mut Wallet {
        self.wallets
            .entry((owner_id, role))
            .or_insert_with(|| Wallet::new(owner_id, role))
    }

    pub fn wallet(&self, owner_id: Uuid, role: WalletRole) -> Option<&Wallet> {
        self.wallets.get(&(owner_id, role))
    }

    pub fn teacher_wallets(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets
            .values()
            .filter(|w| w.role == WalletRole::Teacher)
    }

    // --- payments ---

    /// Inserts a payment, enforcing the two payment invariants: external
    /// references are unique across all payments, and a booking carries at
    /// most one successful payment.
    pub fn insert_payment(&mut self, payment: Payment) -> Result<()> {
        if let Some(ext) = payment.external_ref()
            && self.external_refs.contains_key(ext)
        {
            return Err(CoreError::conflict(format!(
                "external reference {ext} already used"
            )));
        }
        if payment.status == PaymentStatus::Successful
            && self.has_successful_payment(payment.booking_id)
        {
            return Err(CoreError::conflict(format!(
                "booking {} already has a successful payment",
                payment.booking_id
            )));
        }
        if let Some(ext) = payment.external_ref() {
            self.external_refs.insert(ext.to_string(), payment.id);
        }
        self.payments.insert(payment.id, payment);
        Ok(())
    }

    pub fn payment_mut(&mut self, id: Uuid) -> Result<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("payment {id}")))
    }

    pub fn payment_by_external_ref(&self, external_ref: &str) -> Option<&Payment> {
        self.external_refs
            .get(external_ref)
            .and_then(|id| self.payments.get(id))
    }

    pub fn payment_id_by_external_ref(&self, external_ref: &str) -> Option<Uuid> {
        self.external_refs.get(external_ref).copied()
    }

    pub fn has_successful_payment(&self, booking_id: Uuid) -> bool {
        self.payments
            .values()
            .any(|p| p.booking_id == booking_id && p.status == PaymentStatus::Successful)
    }

    pub fn payments_for_booking(&self, booking_id: Uuid) -> Vec<&Payment> {
        self.payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .collect()
    }

    // --- payout logs ---

    pub fn insert_payout_log(&mut self, log: PayoutLog) {
        self.payout_logs.insert(log.id, log);
    }

    pub fn payout_log(&self, id: Uuid) -> Result<&PayoutLog> {
        self.payout_logs
            .get(&id)
            .ok_or_else(|| CoreError::not_found(format!("payout log {id}")))
    }

    pub fn payout_log_mut(&mut self, id: Uuid) -> Result<&mut PayoutLog> {
        self.payout_logs
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(format!("payout log {id}")))
    }
}

/// Transactional store for all core records.
///
/// `transaction` stages the closure's mutations on a copy of the state and
/// swaps it in only on success, so a multi-record update commits entirely or
/// not at all. The mutex serializes transactions, which makes precondition
/// checks inside the closure (booking still payable, wallet still unlocked)
/// linearizable conditional updates. The closure is synchronous on purpose:
/// external calls must finish before a transaction opens.
#[derive(Default, Clone)]
pub struct Ledger {
    inner: Arc<Mutex<LedgerState>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        // A panic inside a previous closure only poisons the lock before the
        // staged copy was swapped in, so the committed state is intact and
        // recovering the guard is safe.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        *guard = staged;
        Ok(out)
    }

    /// Read-only access to a consistent snapshot of the state.
    pub fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> T {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    // Convenience snapshot accessors for reporting and tests.

    pub fn booking(&self, id: Uuid) -> Option<Booking> {
        self.read(|s| s.bookings.get(&id).cloned())
    }

    pub fn slot(&self, id: Uuid) -> Option<Slot> {
        self.read(|s| s.slots.get(&id).cloned())
    }

    pub fn wallet_snapshot(&self, owner_id: Uuid, role: WalletRole) -> Option<Wallet> {
        self.read(|s| s.wallet(owner_id, role).cloned())
    }

    pub fn payout_log_snapshot(&self, id: Uuid) -> Option<PayoutLog> {
        self.read(|s| s.payout_logs.get(&id).cloned())
    }

    pub fn teacher_snapshot(&self, id: Uuid) -> Option<Teacher> {
        self.read(|s| s.teachers.get(&id).cloned())
    }

    pub fn booking_payments(&self, booking_id: Uuid) -> Vec<Payment> {
        self.read(|s| {
            s.payments_for_booking(booking_id)
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn wallets(&self) -> Vec<Wallet> {
        self.read(|s| s.wallets.values().cloned().collect())
    }

    pub fn bookings(&self) -> Vec<Booking> {
        self.read(|s| s.bookings.values().cloned().collect())
    }

    pub fn payout_logs(&self) -> Vec<PayoutLog> {
        self.read(|s| s.payout_logs.values().cloned().collect())
    }
}
