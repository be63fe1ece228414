//! Core abuse-protection logic for Warden.
//!
//! The five cooperating components (activity tracker, token-bucket rate
//! limiter, block/whitelist manager, brute-force detector, DDoS protector)
//! live here together with the facade that owns them, the event bus, the
//! background sweeper, and the axum glue (middleware + admin API).

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod admin;
pub mod blocklist;
pub mod brute_force;
pub mod config;
pub mod ddos;
pub mod events;
pub mod limiter;
pub mod memory;
pub mod middleware;
pub mod prelude;
pub mod reject;
pub mod sweeper;
pub mod tracker;
pub mod warden;

// Re-export commonly used types
pub use brute_force::AttemptOutcome;
pub use events::{EventBus, GuardEvent};
pub use limiter::{CheckOptions, RateLimitDecision};
pub use memory::MemoryGuardAdapter;
pub use middleware::{guard_middleware, GuardMiddlewareConfig, GuardPrincipal, GuardState};
pub use sweeper::{Sweeper, SweeperConfig};
pub use warden::{RequestContext, RequestVerdict, Warden};

// vim: ts=4
