//! # permiscope-policy
//!
//! Actions, permission scopes and the policy evaluator for Permiscope.
//!
//! Every action an agent wants to perform is described by an [`Action`] and
//! evaluated by the [`PolicyEngine`] against a [`Policy`], producing Allow,
//! Block, or RequireApproval.
//!
//! ## Key invariants
//!
//! - **Default deny**: no scope for an action name → blocked.
//! - **Most restrictive wins**: any matching scope that blocks (explicitly or
//!   through a failed guardrail) blocks the action; otherwise any
//!   RequireApproval wins over Allow.
//! - **Fail closed**: guardrail errors, missing parameters and validator
//!   panics all block.
//! - **Evasion resistant**: paths are canonicalized before prefix checks and
//!   commands are normalized before pattern checks.

pub mod action;
pub mod decision;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod guardrail;
pub mod policy;
pub mod scope;

pub use action::{canonical_json, Action, Params, READ_FILE, RUN_COMMAND, WRITE_FILE};
pub use decision::{BlockReason, Decision, Guardrail, PolicyDecision, ScopeDecision};
pub use defaults::default_policy;
pub use engine::{evaluate, EvaluationStep, EvaluationTrace, PolicyEngine};
pub use error::{PolicyError, ValidatorError};
pub use policy::Policy;
pub use scope::{ActionValidator, PermissionScope};
