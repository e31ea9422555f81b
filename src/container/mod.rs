//! Container management module
//!
//! This module provides the workflow for creating, validating and deleting
//! TM containers against a remote server session.

pub mod config;
pub mod lifecycle;
pub mod selection;

pub use config::{ContainerDescriptor, OrgPath, PATH_SEPARATOR};
pub use lifecycle::{ContainerManager, DATABASE_NAME_SUFFIX};
pub use selection::{FirstServer, NamedServer, ServerSelector};
