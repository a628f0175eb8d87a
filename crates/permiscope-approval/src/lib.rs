//! # permiscope-approval
//!
//! Persistent, cross-process store of human approval decisions.
//!
//! A gateway records every intent that needs a human as a PENDING
//! [`ApprovalRequest`]; a person (terminal prompt, CLI, dashboard) moves it to
//! APPROVED or REJECTED. Approved intents become time-limited grants that let
//! identical future actions run without asking again.
//!
//! The store is a plain JSON file so external tools can read and edit it;
//! all access goes through a lock-then-reload cycle (see [`ApprovalStore`]).

pub mod error;
pub mod request;
pub mod store;

pub use error::ApprovalError;
pub use request::{request_key, ApprovalRequest, ApprovalStatus};
pub use store::{ApprovalStore, LockRetry, DEFAULT_TTL_SECS};
