//! Concrete implementations behind the domain ports: the transactional
//! ledger, the delayed job queue, and scripted collaborator stubs.

pub mod ledger;
pub mod scheduler;
pub mod stubs;
