//! tmc - Translation-memory container management
//!
//! tmc manages TM containers on a remote translation-memory server through
//! an authenticated session. It provides:
//!
//! - Container creation, with duplicate detection and post-create verification
//! - Existence checks and listing
//! - Deletion that either unregisters a container or purges its database
//! - Pluggable database server selection
//! - Timeouts on remote calls
//! - An in-process TM server for tests and offline use

pub mod container;
pub mod error;
pub mod server;
pub mod settings;

pub use error::{Result, TmError};
