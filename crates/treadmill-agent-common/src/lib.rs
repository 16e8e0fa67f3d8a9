//! Common infrastructure for Treadmill node agent daemons.
//!
//! This crate provides shared functionality for the daemons that reconcile
//! host network state on a Treadmill node:
//!
//! - [`shell`]: Safe shell command execution with proper quoting
//! - [`error`]: Error types for agent operations
//!
//! # Example
//!
//! ```ignore
//! use treadmill_agent_common::{
//!     shell::{self, IPTABLES_CMD, shellquote},
//!     AgentResult,
//! };
//!
//! async fn create_chain(chain: &str) -> AgentResult<()> {
//!     let cmd = format!("{} -t nat -N {}", IPTABLES_CMD, shellquote(chain));
//!     shell::exec_or_throw(&cmd).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod shell;

pub use error::{AgentError, AgentResult};
