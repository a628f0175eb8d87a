//! # permiscope-gateway
//!
//! Policy-gated execution for agent actions.
//!
//! The [`ExecutionGateway`] is the only path from an agent's intent to a side
//! effect: it evaluates the action against a policy, waits for a human when
//! the policy asks for one, runs the matching executor, and writes a
//! hash-chained audit entry for every run. [`Agent`] is the thin
//! "act or fail" wrapper most callers use.

pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod prompt;

pub use agent::{Agent, DEFAULT_AGENT_ID};
pub use config::GatewayConfig;
pub use error::{ExecutorError, GatewayError, PromptError};
pub use executor::{ActionExecutor, ExecutorRegistry};
pub use gateway::{ExecutionGateway, GatewayResult, SHADOW_OUTPUT};
pub use prompt::{ApprovalPrompt, PromptAnswer, StaticPrompt, TerminalPrompt};
