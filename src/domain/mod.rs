//! Entities, value objects and collaborator contracts.

pub mod booking;
pub mod jobs;
pub mod money;
pub mod payment;
pub mod payout;
pub mod ports;
pub mod teacher;
pub mod wallet;
