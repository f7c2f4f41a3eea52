/// Deduplicated, quota-gated signal delivery
///
/// This module provides:
/// - The delivery filter, which records each (identity, signal) pair once
/// - The signal feed, which resolves a credential and runs a full poll

pub mod feed;
pub mod filter;

pub use feed::{FetchOutcome, FetchParams, SignalFeed};
pub use filter::{Delivery, DeliveryFilter};
