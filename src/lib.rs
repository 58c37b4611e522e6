//! Lockstep Coordinator - gasless cross-chain swap brokering
//!
//! The coordinator admits signed swap intents, runs a descending-price
//! auction per order across a resolver fleet, supervises dual-HTLC escrow
//! funding, and publishes the hashlock preimage once both sides verify
//! funded so either party can unlock atomically. Defaulted commitments
//! open a rescue window paid for by the defaulter's safety deposit.

pub mod api;
pub mod auction;
pub mod bus;
pub mod chain;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod model;
pub mod oracle;
pub mod reaper;
pub mod signature;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testkit;
