//! TM server access
//!
//! This module defines the session capability every remote call goes
//! through, plus an in-process server implementation and a decorator that
//! bounds remote calls with a timeout.

pub mod config;
pub mod memory;
pub mod session;
pub mod store;
pub mod timeout;

pub use config::DatabaseServerRef;
pub use memory::{CallCounts, FaultPlan, HostedServer, InMemoryServer, PhysicalDatabase};
pub use session::{RemoteError, RemoteResult, ServerSession};
pub use store::{StateLock, StateStore};
pub use timeout::{TimeoutSession, DEFAULT_MAX_BLOCKING_CALLS, DEFAULT_TIMEOUT};
