//! Shared types, adapter traits, and core utilities for the Warden
//! abuse-protection subsystem.
//!
//! This crate contains the foundational types shared between the core
//! crate and all adapter implementations. Extracting these into a
//! separate crate allows adapter crates to compile in parallel with
//! the core's feature modules.

pub mod clock;
pub mod error;
pub mod guard_adapter;
pub mod prelude;
pub mod types;

pub use error::{Error, WdResult};
pub use types::{Timestamp, TnId};

// vim: ts=4
