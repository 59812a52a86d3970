mod common;

use classpay::domain::booking::{BookingStatus, SlotStatus};
use classpay::domain::payment::PaymentMethod;
use classpay::domain::wallet::WalletRole;
use classpay::error::CoreError;
use common::{Harness, at, epoch};
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn test_create_booking_prices_from_hourly_rate() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(600), true, false);
    let student = h.student_with(dec!(1000));

    // 90 minutes at 600/h
    let booking = h.book(student, teacher, 60, 90).await;

    assert_eq!(booking.price.value(), dec!(900));
    assert_eq!(booking.status, BookingStatus::Pending);
    let slot = h.ledger.slot(booking.slot_id).unwrap();
    assert_eq!(slot.status, SlotStatus::Pending);
    assert_eq!(slot.booked_by, Some(student));
    // teacher is told about the request
    assert_eq!(h.notifier.count_containing("New booking request"), 1);
    assert_eq!(h.chat.messages().len(), 1);
}

#[tokio::test]
async fn test_overlapping_slot_rejected() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(1000));
    h.book(student, teacher, 60, 60).await;

    let other = Uuid::new_v4();
    let result = h
        .bookings
        .create_booking_slot(other, teacher, Uuid::new_v4(), at(90), at(150), epoch())
        .await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));

    // touching windows are fine: [60,120) then [120,180)
    let result = h
        .bookings
        .create_booking_slot(other, teacher, Uuid::new_v4(), at(120), at(180), epoch())
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_overnight_booking_wraps_to_next_day() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(1000));

    // 23:30 to 00:30 given as end-before-start
    let start = at(14 * 60 + 30); // 23:30
    let end = at(-(8 * 60) - 30); // 00:30 same calendar day
    let booking = h
        .bookings
        .create_booking_slot(student, teacher, Uuid::new_v4(), start, end, epoch())
        .await
        .unwrap();

    assert_eq!(booking.end_time - booking.start_time, chrono::Duration::hours(1));
    assert_eq!(booking.price.value(), dec!(500));
}

#[tokio::test]
async fn test_zero_duration_rejected() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let result = h
        .bookings
        .create_booking_slot(Uuid::new_v4(), teacher, Uuid::new_v4(), at(60), at(60), epoch())
        .await;
    assert!(matches!(result, Err(CoreError::Validation(_))));
}

#[tokio::test]
async fn test_confirmation_gate_blocks_payment() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, true);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 60, 60).await;
    assert_eq!(booking.status, BookingStatus::TeacherConfirmPending);

    // unpayable until the teacher confirms
    let result = h
        .payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));

    // only the booked teacher may confirm
    let result = h.bookings.confirm_booking(booking.id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(CoreError::Validation(_))));

    h.bookings.confirm_booking(booking.id, teacher).await.unwrap();
    assert_eq!(
        h.ledger.booking(booking.id).unwrap().status,
        BookingStatus::Pending
    );
    h.payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reject_releases_slot_for_rebooking() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, true);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 60, 60).await;

    h.bookings.reject_booking(booking.id, teacher).await.unwrap();
    assert_eq!(
        h.ledger.booking(booking.id).unwrap().status,
        BookingStatus::Rejected
    );
    assert_eq!(
        h.ledger.slot(booking.slot_id).unwrap().status,
        SlotStatus::Expired
    );

    // the window is free again
    let again = h.book(student, teacher, 60, 60).await;
    assert_eq!(again.status, BookingStatus::TeacherConfirmPending);
}

#[tokio::test]
async fn test_cancel_only_by_owner_and_only_before_payment() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 60, 60).await;

    let result = h.bookings.cancel_booking(booking.id, Uuid::new_v4()).await;
    assert!(matches!(result, Err(CoreError::Validation(_))));

    h.payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await
        .unwrap();
    let result = h.bookings.cancel_booking(booking.id, student).await;
    assert!(matches!(result, Err(CoreError::Conflict(_))));
}

#[tokio::test]
async fn test_expiry_sweep_is_idempotent() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 120, 60).await;

    // past the 30-minute payment window
    let later = at(45);
    assert_eq!(h.bookings.expire_sweep(later).await.unwrap(), 1);
    assert_eq!(
        h.ledger.booking(booking.id).unwrap().status,
        BookingStatus::Expired
    );
    assert_eq!(
        h.ledger.slot(booking.slot_id).unwrap().status,
        SlotStatus::Expired
    );

    // second run finds nothing and notifies nobody twice
    let before = h.notifier.count_containing("expired");
    assert_eq!(h.bookings.expire_sweep(later).await.unwrap(), 0);
    assert_eq!(h.notifier.count_containing("expired"), before);
}

#[tokio::test]
async fn test_expire_job_loses_race_to_payment() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 120, 60).await;

    h.payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await
        .unwrap();

    // the per-booking timeout fires after payment: must be a no-op
    h.bookings.handle_expire(booking.id).await.unwrap();
    assert_eq!(
        h.ledger.booking(booking.id).unwrap().status,
        BookingStatus::Paid
    );
}

#[tokio::test]
async fn test_teardown_completes_class_and_settles_earnings() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 60, 60).await;

    h.payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await
        .unwrap();
    h.bookings.handle_provision_room(booking.id).await.unwrap();
    assert!(h.ledger.booking(booking.id).unwrap().call_room_id.is_some());

    h.bookings.handle_teardown(booking.id).await.unwrap();

    let booking = h.ledger.booking(booking.id).unwrap();
    assert_eq!(booking.status, BookingStatus::Studied);
    assert_eq!(booking.call_room_id, None);
    assert_eq!(
        h.ledger.slot(booking.slot_id).unwrap().status,
        SlotStatus::Completed
    );
    assert_eq!(h.rooms.torn_down(), vec!["room-1".to_string()]);

    // earnings moved from pending to available
    let wallet = h.wallet(teacher, WalletRole::Teacher);
    assert!(wallet.pending.is_zero());
    assert_eq!(wallet.available.value(), dec!(500));

    // redelivered teardown is a no-op
    h.bookings.handle_teardown(booking.id).await.unwrap();
    assert_eq!(h.wallet(teacher, WalletRole::Teacher).available.value(), dec!(500));
}

#[tokio::test]
async fn test_reminder_only_for_paid_bookings() {
    let h = Harness::new();
    let teacher = h.add_teacher(dec!(500), true, false);
    let student = h.student_with(dec!(500));
    let booking = h.book(student, teacher, 60, 60).await;

    h.bookings.handle_reminder(booking.id).await.unwrap();
    assert_eq!(h.notifier.count_containing("starts in a few minutes"), 0);

    h.payments
        .pay(PaymentMethod::Wallet, booking.id, student, None, epoch())
        .await
        .unwrap();
    h.bookings.handle_reminder(booking.id).await.unwrap();
    assert_eq!(h.notifier.count_containing("starts in a few minutes"), 1);
}
