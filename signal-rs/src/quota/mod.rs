/// Daily quota accounting for actionable signals
///
/// This module provides:
/// - Plan defaults and quota overrides
/// - Atomic per-identity, per-UTC-day charging
/// - Referral boosts that temporarily raise a plan

pub mod ledger;
pub mod types;

pub use ledger::QuotaLedger;
pub use types::{effective_quota, Allowance, Plan, QuotaSnapshot, ReferralBoost};
