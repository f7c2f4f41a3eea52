//! Signal publishing and the candidate source used by delivery

pub mod store;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::Identity;

pub use store::SignalStore;
pub use types::{FetchWindow, NewSignal, Signal, SignalAction};

/// Signals a receiver is eligible to see, oldest first
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, identity: &Identity, window: &FetchWindow) -> Result<Vec<Signal>>;
}
