//! # tether-client
//!
//! Mount-side plumbing for TetherFS: one logical channel to the daemon with
//! per-call deadlines and reconnect, a bounded exponential-backoff retry
//! policy, the per-path write-verifier table, and the operation gateway that
//! translates kernel upcall arguments into wire exchanges.

pub mod channel;
pub mod error;
pub mod gateway;
pub mod retry;
pub mod verifier;

pub use channel::Channel;
pub use error::TransportError;
pub use gateway::{Gateway, OpResult};
pub use retry::RetryPolicy;
pub use verifier::VerifierTable;
