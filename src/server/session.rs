//! Remote TM server session

use super::config::DatabaseServerRef;
use crate::container::ContainerDescriptor;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Result type for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors reported by the TM server management interface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("communication failure: {0}")]
    Communication(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("session expired")]
    SessionExpired,
}

/// Authenticated connection to a TM server
///
/// Every remote operation goes through this capability. Implementations are
/// owned by the caller; the container workflow never creates, renews or
/// re-authenticates a session.
pub trait ServerSession {
    /// Whether the session is still authenticated
    fn is_valid(&self) -> bool;

    /// Look up a registered database server by friendly name
    fn resolve_database_server(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> RemoteResult<DatabaseServerRef>;

    /// All database servers known to the session, possibly none
    fn list_database_servers(&self) -> RemoteResult<Vec<DatabaseServerRef>>;

    /// Containers registered on a database server
    fn list_containers(&self, server: &DatabaseServerRef) -> RemoteResult<Vec<ContainerDescriptor>>;

    /// Persist a new container, returning the server's copy
    fn create_container(&self, descriptor: &ContainerDescriptor) -> RemoteResult<ContainerDescriptor>;

    /// Look up a container by its fully qualified path
    fn resolve_container(&self, path: &str) -> RemoteResult<ContainerDescriptor>;

    /// Unregister a container, dropping its physical database when `purge` is set
    fn delete_container(&self, descriptor: &ContainerDescriptor, purge: bool) -> RemoteResult<()>;
}

impl<S: ServerSession + ?Sized> ServerSession for std::sync::Arc<S> {
    fn is_valid(&self) -> bool {
        (**self).is_valid()
    }

    fn resolve_database_server(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> RemoteResult<DatabaseServerRef> {
        (**self).resolve_database_server(name, properties)
    }

    fn list_database_servers(&self) -> RemoteResult<Vec<DatabaseServerRef>> {
        (**self).list_database_servers()
    }

    fn list_containers(&self, server: &DatabaseServerRef) -> RemoteResult<Vec<ContainerDescriptor>> {
        (**self).list_containers(server)
    }

    fn create_container(&self, descriptor: &ContainerDescriptor) -> RemoteResult<ContainerDescriptor> {
        (**self).create_container(descriptor)
    }

    fn resolve_container(&self, path: &str) -> RemoteResult<ContainerDescriptor> {
        (**self).resolve_container(path)
    }

    fn delete_container(&self, descriptor: &ContainerDescriptor, purge: bool) -> RemoteResult<()> {
        (**self).delete_container(descriptor, purge)
    }
}
