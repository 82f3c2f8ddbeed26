//! Core domain types and utilities for gatehouse.
//!
//! This crate provides the identity types, the clock abstraction, and the
//! error-handling foundation shared by the authentication core and the server.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Result;
pub use id::{ParseIdError, SessionTokenId, UserId};
