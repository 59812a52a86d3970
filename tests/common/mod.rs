#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use classpay::application::booking::BookingEngine;
use classpay::application::jobs::JobRouter;
use classpay::application::payment::PaymentEngine;
use classpay::application::payout::PayoutProcessor;
use classpay::application::webhook::WebhookReconciler;
use classpay::config::PolicyConfig;
use classpay::domain::booking::Booking;
use classpay::domain::money::Amount;
use classpay::domain::teacher::Teacher;
use classpay::domain::wallet::{Wallet, WalletRole};
use classpay::infrastructure::ledger::Ledger;
use classpay::infrastructure::scheduler::{InMemoryJobQueue, RetryPolicy};
use classpay::infrastructure::stubs::{
    CountingRoomProvisioner, RecordingChat, RecordingNotifier, ScriptedGateway,
    ScriptedReceiptVerifier,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Fully wired engine stack over the in-memory ledger and scripted
/// collaborators, driven by a synthetic clock.
pub struct Harness {
    pub ledger: Ledger,
    pub queue: Arc<InMemoryJobQueue>,
    pub bookings: Arc<BookingEngine>,
    pub payments: Arc<PaymentEngine>,
    pub payouts: Arc<PayoutProcessor>,
    pub webhooks: WebhookReconciler,
    pub router: JobRouter,
    pub notifier: Arc<RecordingNotifier>,
    pub chat: Arc<RecordingChat>,
    pub rooms: Arc<CountingRoomProvisioner>,
    pub gateway: Arc<ScriptedGateway>,
    pub receipts: Arc<ScriptedReceiptVerifier>,
    pub config: PolicyConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(PolicyConfig::default())
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        let ledger = Ledger::new();
        let queue = Arc::new(InMemoryJobQueue::new(RetryPolicy::from_config(&config)));
        let notifier = Arc::new(RecordingNotifier::new());
        let chat = Arc::new(RecordingChat::new());
        let rooms = Arc::new(CountingRoomProvisioner::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let receipts = Arc::new(ScriptedReceiptVerifier::new());

        let bookings = Arc::new(BookingEngine::new(
            ledger.clone(),
            queue.clone(),
            notifier.clone(),
            chat.clone(),
            rooms.clone(),
            config.clone(),
        ));
        let payments = Arc::new(PaymentEngine::new(
            ledger.clone(),
            queue.clone(),
            gateway.clone(),
            receipts.clone(),
            notifier.clone(),
        ));
        let payouts = Arc::new(PayoutProcessor::new(
            ledger.clone(),
            queue.clone(),
            gateway.clone(),
            notifier.clone(),
            config.clone(),
        ));
        let webhooks = WebhookReconciler::new(
            ledger.clone(),
            gateway.clone(),
            queue.clone(),
            notifier.clone(),
        );
        let router = JobRouter::new(bookings.clone(), payouts.clone());

        Self {
            ledger,
            queue,
            bookings,
            payments,
            payouts,
            webhooks,
            router,
            notifier,
            chat,
            rooms,
            gateway,
            receipts,
            config,
        }
    }

    pub fn add_teacher(
        &self,
        hourly_rate: Decimal,
        verified: bool,
        requires_confirmation: bool,
    ) -> Uuid {
        let mut teacher = Teacher::new("Ada Lovelace", Amount::new(hourly_rate).unwrap());
        teacher.verified = verified;
        teacher.requires_confirmation = requires_confirmation;
        let id = teacher.id;
        self.ledger
            .transaction(|state| {
                state.insert_teacher(teacher);
                Ok(())
            })
            .unwrap();
        id
    }

    pub fn fund(&self, owner: Uuid, role: WalletRole, amount: Decimal) {
        self.ledger
            .transaction(|state| {
                state
                    .wallet_mut(owner, role)
                    .credit_available(Amount::new(amount).unwrap());
                Ok(())
            })
            .unwrap();
    }

    /// A fresh student with the given spendable balance.
    pub fn student_with(&self, amount: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        self.fund(id, WalletRole::User, amount);
        id
    }

    pub fn wallet(&self, owner: Uuid, role: WalletRole) -> Wallet {
        self.ledger
            .wallet_snapshot(owner, role)
            .expect("wallet should exist")
    }

    /// Creates a booking starting `start_min` minutes after the epoch.
    pub async fn book(
        &self,
        student: Uuid,
        teacher: Uuid,
        start_min: i64,
        duration_min: i64,
    ) -> Booking {
        self.bookings
            .create_booking_slot(
                student,
                teacher,
                Uuid::new_v4(),
                at(start_min),
                at(start_min + duration_min),
                epoch(),
            )
            .await
            .expect("booking creation should succeed")
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
}

/// `minutes` after the epoch.
pub fn at(minutes: i64) -> DateTime<Utc> {
    epoch() + Duration::minutes(minutes)
}
