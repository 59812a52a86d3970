use chrono::{DateTime, Duration, TimeZone, Utc};
use clap::Parser;
use classpay::application::booking::BookingEngine;
use classpay::application::jobs::{JobRouter, register_recurring};
use classpay::application::payment::{PaymentEngine, ReceiptEvidence};
use classpay::application::payout::PayoutProcessor;
use classpay::application::webhook::{WebhookEvent, WebhookObject, WebhookReconciler};
use classpay::config::PolicyConfig;
use classpay::domain::money::Amount;
use classpay::domain::payment::PaymentMethod;
use classpay::domain::ports::VerifiedReceipt;
use classpay::domain::teacher::Teacher;
use classpay::domain::wallet::WalletRole;
use classpay::error::{CoreError, Result as CoreResult};
use classpay::infrastructure::ledger::Ledger;
use classpay::infrastructure::scheduler::{InMemoryJobQueue, RetryPolicy};
use classpay::infrastructure::stubs::{
    CountingRoomProvisioner, RecordingChat, RecordingNotifier, ScriptedGateway,
    ScriptedReceiptVerifier,
};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file: one JSON step per line, applied in order.
    input: PathBuf,

    /// Policy overrides as JSON (fees, thresholds, timing windows).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// One scenario step. Aliases are scenario-local names for entities whose ids
/// are generated at runtime.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    RegisterTeacher {
        alias: String,
        name: String,
        hourly_rate: Decimal,
        #[serde(default)]
        verified: bool,
        #[serde(default)]
        requires_confirmation: bool,
    },
    RegisterStudent {
        alias: String,
    },
    FundWallet {
        owner: String,
        amount: Decimal,
    },
    CreateBooking {
        alias: String,
        student: String,
        teacher: String,
        start_in_minutes: i64,
        duration_minutes: i64,
    },
    ConfirmBooking {
        booking: String,
        teacher: String,
    },
    RejectBooking {
        booking: String,
        teacher: String,
    },
    CancelBooking {
        booking: String,
        student: String,
    },
    Pay {
        booking: String,
        payer: String,
        method: PaymentMethod,
        #[serde(default)]
        receipt_image: Option<String>,
    },
    /// Registers a receipt image the verifier will accept.
    ScriptReceipt {
        image: String,
        trans_ref: String,
        amount: Decimal,
        receiver: String,
    },
    /// Marks a gateway charge settled, optionally with a divergent amount.
    SettleCharge {
        charge_id: String,
        #[serde(default)]
        amount: Option<Decimal>,
    },
    /// Delivers a gateway webhook to the reconciler.
    Webhook {
        object: String,
        id: String,
        #[serde(default)]
        key: Option<String>,
    },
    /// Moves the clock forward, draining every job that comes due.
    Advance {
        minutes: i64,
    },
    PayoutBatch,
}

struct Replayer {
    ledger: Ledger,
    queue: Arc<InMemoryJobQueue>,
    bookings: Arc<BookingEngine>,
    payments: PaymentEngine,
    payouts: Arc<PayoutProcessor>,
    reconciler: WebhookReconciler,
    router: JobRouter,
    gateway: Arc<ScriptedGateway>,
    receipts: Arc<ScriptedReceiptVerifier>,
    aliases: HashMap<String, Uuid>,
    now: DateTime<Utc>,
}

impl Replayer {
    fn resolve(&self, alias: &str) -> CoreResult<Uuid> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| CoreError::validation(format!("unknown alias {alias}")))
    }

    async fn apply(&mut self, step: Step) -> CoreResult<()> {
        match step {
            Step::RegisterTeacher {
                alias,
                name,
                hourly_rate,
                verified,
                requires_confirmation,
            } => {
                let mut teacher = Teacher::new(name, Amount::new(hourly_rate)?);
                teacher.verified = verified;
                teacher.requires_confirmation = requires_confirmation;
                let id = teacher.id;
                self.ledger.transaction(|state| {
                    state.insert_teacher(teacher);
                    Ok(())
                })?;
                self.aliases.insert(alias, id);
            }
            Step::RegisterStudent { alias } => {
                self.aliases.insert(alias, Uuid::new_v4());
            }
            Step::FundWallet { owner, amount } => {
                let owner_id = self.resolve(&owner)?;
                let amount = Amount::new(amount)?;
                self.ledger.transaction(|state| {
                    state
                        .wallet_mut(owner_id, WalletRole::User)
                        .credit_available(amount);
                    Ok(())
                })?;
            }
            Step::CreateBooking {
                alias,
                student,
                teacher,
                start_in_minutes,
                duration_minutes,
            } => {
                let student_id = self.resolve(&student)?;
                let teacher_id = self.resolve(&teacher)?;
                let start = self.now + Duration::minutes(start_in_minutes);
                let end = start + Duration::minutes(duration_minutes);
                let booking = self
                    .bookings
                    .create_booking_slot(student_id, teacher_id, Uuid::new_v4(), start, end, self.now)
                    .await?;
                self.aliases.insert(alias, booking.id);
            }
            Step::ConfirmBooking { booking, teacher } => {
                self.bookings
                    .confirm_booking(self.resolve(&booking)?, self.resolve(&teacher)?)
                    .await?;
            }
            Step::RejectBooking { booking, teacher } => {
                self.bookings
                    .reject_booking(self.resolve(&booking)?, self.resolve(&teacher)?)
                    .await?;
            }
            Step::CancelBooking { booking, student } => {
                self.bookings
                    .cancel_booking(self.resolve(&booking)?, self.resolve(&student)?)
                    .await?;
            }
            Step::Pay {
                booking,
                payer,
                method,
                receipt_image,
            } => {
                let evidence = receipt_image.map(|image_base64| ReceiptEvidence { image_base64 });
                self.payments
                    .pay(
                        method,
                        self.resolve(&booking)?,
                        self.resolve(&payer)?,
                        evidence,
                        self.now,
                    )
                    .await?;
            }
            Step::ScriptReceipt {
                image,
                trans_ref,
                amount,
                receiver,
            } => {
                self.receipts.approve(
                    &image,
                    VerifiedReceipt {
                        trans_ref,
                        amount,
                        receiver_name: receiver,
                    },
                );
            }
            Step::SettleCharge { charge_id, amount } => {
                self.gateway.settle_charge(&charge_id, amount);
            }
            Step::Webhook { object, id, key } => {
                let event = WebhookEvent {
                    key: key.unwrap_or_else(|| format!("{object}.updated")),
                    data: WebhookObject { object, id },
                };
                self.reconciler.acknowledge(&event, self.now).await;
            }
            Step::Advance { minutes } => {
                let horizon = self.now + Duration::minutes(minutes);
                self.queue.run_until(self.now, horizon, &self.router).await;
                self.now = horizon;
            }
            Step::PayoutBatch => {
                self.payouts.run_batch(self.now).await?;
                // the batch only enqueues; the transfer jobs run here
                self.queue.tick(self.now, &self.router).await;
            }
        }
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "clock": self.now,
            "aliases": self.aliases,
            "wallets": self.ledger.wallets(),
            "bookings": self.ledger.bookings(),
            "payout_logs": self.ledger.payout_logs(),
            "pending_jobs": self.queue.pending_len(),
            "dead_jobs": self.queue.dead_jobs().len(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).into_diagnostic()?;
            serde_json::from_str::<PolicyConfig>(&raw).into_diagnostic()?
        }
        None => PolicyConfig::default(),
    };

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
        chat,
        rooms,
        config.clone(),
    ));
    let payments = PaymentEngine::new(
        ledger.clone(),
        queue.clone(),
        gateway.clone(),
        receipts.clone(),
        notifier.clone(),
    );
    let payouts = Arc::new(PayoutProcessor::new(
        ledger.clone(),
        queue.clone(),
        gateway.clone(),
        notifier.clone(),
        config.clone(),
    ));
    let reconciler = WebhookReconciler::new(
        ledger.clone(),
        gateway.clone(),
        queue.clone(),
        notifier.clone(),
    );
    let router = JobRouter::new(bookings.clone(), payouts.clone());

    // scenarios run on a synthetic clock so replays are deterministic
    let now = Utc
        .with_ymd_and_hms(2026, 1, 5, 9, 0, 0)
        .single()
        .ok_or_else(|| miette::miette!("invalid scenario epoch"))?;
    register_recurring(queue.as_ref(), &config, now)
        .await
        .into_diagnostic()?;

    let mut replayer = Replayer {
        ledger,
        queue,
        bookings,
        payments,
        payouts,
        reconciler,
        router,
        gateway,
        receipts,
        aliases: HashMap::new(),
        now,
    };

    let raw = std::fs::read_to_string(cli.input).into_diagnostic()?;
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match serde_json::from_str::<Step>(line) {
            Ok(step) => {
                if let Err(e) = replayer.apply(step).await {
                    eprintln!("step {} failed: {}", lineno + 1, e);
                }
            }
            Err(e) => {
                eprintln!("step {} unreadable: {}", lineno + 1, e);
            }
        }
    }

    let report = serde_json::to_string_pretty(&replayer.report()).into_diagnostic()?;
    println!("{report}");
    Ok(())
}
