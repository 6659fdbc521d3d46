//! Client side of the Agentflow HTTP API.
//!
//! - [`ProgressClient`]: typed calls for submit, progress and listings.
//! - [`Poller`]: follows a job until it is terminal, with backoff, a
//!   duration cap and explicit cancellation through [`PollHandle`].

/// Typed HTTP client.
pub mod client;
/// Client error taxonomy.
pub mod error;
/// Cancellable progress poller.
pub mod poller;

pub use client::ProgressClient;
pub use error::ClientError;
pub use poller::{PollConfig, PollHandle, PollOutcome, Poller};
