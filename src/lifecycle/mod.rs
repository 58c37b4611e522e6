//! Lifecycle controller for the order state machine
//!
//! The controller:
//! 1. Admits signed intents (signature, hashlock, allowance)
//! 2. Runs commitments through the descending-price auction
//! 3. Supervises escrow funding, the user fund move, and settlement
//! 4. Publishes the secret and performs the authoritative reveal
//! 5. Absorbs the reaper's deadline events (expiry, lapse, rescue)

pub mod controller;
pub mod locks;

pub use controller::{
    Admitted, AuctionQuote, CommitReceipt, LifecycleController, Rescued, RevealInfo,
};
pub use locks::OrderLocks;

#[cfg(test)]
mod tests;
