//! HTTP gateway for Agentflow.
//!
//! Exposes job submission and progress polling over axum:
//!
//! - `POST /api/orchestration/execute`: submit a task (async or sync).
//! - `GET /api/progress/{execution_id}`: current job snapshot.
//! - `GET /api/orchestration/status/{execution_id}`: alias of the above.
//! - `GET /api/executions`: job summaries and aggregate stats.
//! - `GET /health`: liveness probe.

/// Handler error type and its HTTP mapping.
pub mod error;
/// Auth and rate limiting middleware.
pub mod middleware;
/// Token bucket rate limiter.
pub mod rate_limit;
/// Router construction and handlers.
pub mod server;

pub use error::{ApiError, ApiResult};
pub use middleware::{MiddlewareState, SecurityConfig};
pub use rate_limit::{Admission, ClientId, RateLimit, RateLimiter};
pub use server::{AppState, GatewayServer};
