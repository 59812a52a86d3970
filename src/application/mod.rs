//! Use-case engines: each owns one slice of the booking/payment lifecycle
//! and coordinates ledger transactions, jobs and external collaborators.

pub mod booking;
pub mod jobs;
pub mod payment;
pub mod payout;
pub mod webhook;
