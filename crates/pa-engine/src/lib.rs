//! The reconciliation engine.
//!
//! Five periodic loops keep the node converged on what the Panel
//! declares: configuration polling (cold path, restarts the core), user
//! polling (hot path over the management RPC with a cold fallback),
//! traffic reporting, status reporting, and alive polling for device
//! limit enforcement. They share one agent-state record behind a
//! read-mostly lock and a cancellation token that drives orderly
//! shutdown.
//!
//! The one cross-loop ordering guarantee lives here: a counter flush
//! strictly precedes every restart the config loop issues, because a
//! restart zeroes the core's counters.

mod diff;
mod engine;
mod state;

pub use diff::{diff_memberships, diff_rate_limits, MembershipDiff, RateLimitDiff};
pub use engine::{BootError, Engine, Intervals};
pub use state::SharedState;
