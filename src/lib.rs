//! Consistency core for a student/teacher class marketplace: the booking and
//! slot state machine, three-bucket wallets, strategy-dispatched payments,
//! webhook reconciliation and batched payouts with compensating rollbacks.
//!
//! Layout follows a hexagonal split: [`domain`] holds entities and the port
//! traits, [`application`] the use-case engines, [`infrastructure`] the
//! transactional ledger, the delayed-job queue and scripted collaborators.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
