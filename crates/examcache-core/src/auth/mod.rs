//! Session management.
//!
//! This module provides:
//! - `TokenStore`: the encrypted bearer token plus expiry and identity, persisted to disk
//! - `SessionEvents`: broadcast of "session expired" to any number of listeners
//!
//! An expired session is treated exactly like a missing one.

pub mod events;
pub mod session;

pub use events::{SessionEvent, SessionEvents};
pub use session::{SessionRecord, TokenStore, SESSION_TTL_DAYS};
