//! Container lifecycle management

use super::config::{ContainerDescriptor, OrgPath, PATH_SEPARATOR};
use super::selection::{FirstServer, ServerSelector};
use crate::error::{Result, TmError};
use crate::server::{DatabaseServerRef, RemoteError, ServerSession};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Suffix appended to a container name to form its physical database name
pub const DATABASE_NAME_SUFFIX: &str = "DB";

/// Container manager for creating, checking and deleting TM containers
///
/// The manager keeps no copy of remote state. Every operation is a
/// sequence of blocking calls on the session handed in by the caller.
pub struct ContainerManager {
    /// Server selection policy for [`ContainerManager::create_advanced`]
    selector: Box<dyn ServerSelector>,
    /// Per-name locks serializing duplicate check and create
    creation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for ContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerManager {
    /// Create a manager that always picks the first database server
    pub fn new() -> Self {
        Self::with_selector(FirstServer)
    }

    /// Create a manager with a custom server selection policy
    pub fn with_selector<S: ServerSelector + 'static>(selector: S) -> Self {
        Self {
            selector: Box::new(selector),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a container on a named database server, without checks
    pub fn create_simple(
        &self,
        session: &dyn ServerSession,
        server_name: &str,
        database_name: &str,
        container_name: &str,
    ) -> Result<ContainerDescriptor> {
        require_non_empty("database name", database_name)?;
        require_container_name(container_name)?;
        ensure_valid(session)?;

        let server = session
            .resolve_database_server(server_name, &HashMap::new())
            .map_err(|e| match e {
                RemoteError::NotFound(_) => TmError::ServerLookup {
                    server: server_name.to_string(),
                },
                other => remote_error("resolve_database_server", other),
            })?;

        let descriptor =
            ContainerDescriptor::new(container_name, database_name, OrgPath::root(), &server);

        let created = create(session, &descriptor)?;
        info!(
            server = %created.server,
            path = %created.path(),
            database = %created.database_name,
            "Created container"
        );
        Ok(created)
    }

    /// Create a container after checking for duplicates, and verify it exists
    ///
    /// The physical database is named `container_name + "DB"`. The duplicate
    /// check and the create are serialized per container name among callers
    /// of this manager; callers in other processes can still race.
    pub fn create_advanced(
        &self,
        session: &dyn ServerSession,
        organization_path: &str,
        container_name: &str,
    ) -> Result<ContainerDescriptor> {
        require_container_name(container_name)?;
        ensure_valid(session)?;

        let servers = session
            .list_database_servers()
            .map_err(|e| remote_error("list_database_servers", e))?;
        if servers.is_empty() {
            return Err(TmError::NoServerRegistered);
        }

        let server = self.select(&servers)?;
        let parent_path = OrgPath::new(organization_path);
        let path = parent_path.join(container_name);
        debug!(server = %server.name, path = %path, "Selected database server");

        let lock = self.creation_lock(container_name)?;
        let result = match lock.lock() {
            Ok(_guard) => create_verified(session, server, parent_path, container_name, path),
            Err(_) => Err(TmError::Lock("Failed to acquire creation lock".to_string())),
        };
        self.release_creation_lock(container_name, lock)?;

        result
    }

    /// Delete the container at `organization_path + container_name`
    ///
    /// With `purge_physical_data` the physical database is dropped and its
    /// data is lost. Without it the container is only unregistered and can
    /// be registered again on the same physical database.
    pub fn delete(
        &self,
        session: &dyn ServerSession,
        organization_path: &str,
        container_name: &str,
        purge_physical_data: bool,
    ) -> Result<ContainerDescriptor> {
        require_container_name(container_name)?;
        ensure_valid(session)?;

        let path = OrgPath::new(organization_path).join(container_name);
        let descriptor = resolve(session, &path)?.ok_or_else(|| TmError::ContainerNotFound {
            path: path.clone(),
        })?;

        session
            .delete_container(&descriptor, purge_physical_data)
            .map_err(|e| match e {
                RemoteError::NotFound(_) => TmError::ContainerNotFound { path: path.clone() },
                other => remote_error("delete_container", other),
            })?;

        if purge_physical_data {
            warn!(
                server = %descriptor.server,
                path = %path,
                database = %descriptor.database_name,
                "Deleted container and purged physical database"
            );
        } else {
            info!(server = %descriptor.server, path = %path, "Unregistered container");
        }

        Ok(descriptor)
    }

    /// Whether a container exists at `organization_path + container_name`
    pub fn exists(
        &self,
        session: &dyn ServerSession,
        organization_path: &str,
        container_name: &str,
    ) -> Result<bool> {
        require_container_name(container_name)?;
        ensure_valid(session)?;

        let path = OrgPath::new(organization_path).join(container_name);
        Ok(resolve(session, &path)?.is_some())
    }

    /// List containers on one database server, or on all of them
    pub fn list(
        &self,
        session: &dyn ServerSession,
        server_name: Option<&str>,
    ) -> Result<Vec<ContainerDescriptor>> {
        ensure_valid(session)?;

        let servers = match server_name {
            Some(name) => vec![session
                .resolve_database_server(name, &HashMap::new())
                .map_err(|e| match e {
                    RemoteError::NotFound(_) => TmError::ServerLookup {
                        server: name.to_string(),
                    },
                    other => remote_error("resolve_database_server", other),
                })?],
            None => session
                .list_database_servers()
                .map_err(|e| remote_error("list_database_servers", e))?,
        };

        let mut containers = Vec::new();
        for server in &servers {
            containers.extend(
                session
                    .list_containers(server)
                    .map_err(|e| remote_error("list_containers", e))?,
            );
        }

        containers.sort_by_key(|c| c.path());
        Ok(containers)
    }

    fn select<'a>(&self, servers: &'a [DatabaseServerRef]) -> Result<&'a DatabaseServerRef> {
        let index = self
            .selector
            .select(servers)
            .ok_or_else(|| TmError::ServerSelection {
                reason: format!("no acceptable server among {} registered", servers.len()),
            })?;

        servers.get(index).ok_or_else(|| TmError::ServerSelection {
            reason: format!("selected index {} out of {} servers", index, servers.len()),
        })
    }

    fn creation_lock(&self, container_name: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .creation_locks
            .lock()
            .map_err(|_| TmError::Lock("Failed to acquire lock table".to_string()))?;

        Ok(Arc::clone(
            locks.entry(container_name.to_string()).or_default(),
        ))
    }

    /// Drop the table entry for `container_name` unless another caller holds it
    fn release_creation_lock(&self, container_name: &str, lock: Arc<Mutex<()>>) -> Result<()> {
        let mut locks = self
            .creation_locks
            .lock()
            .map_err(|_| TmError::Lock("Failed to acquire lock table".to_string()))?;

        // One reference in the table, one held here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(container_name);
        }
        Ok(())
    }

    #[cfg(test)]
    fn pending_creation_locks(&self) -> usize {
        self.creation_locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Duplicate check, create and verification; runs under the creation lock
fn create_verified(
    session: &dyn ServerSession,
    server: &DatabaseServerRef,
    parent_path: OrgPath,
    container_name: &str,
    path: String,
) -> Result<ContainerDescriptor> {
    let existing = session
        .list_containers(server)
        .map_err(|e| remote_error("list_containers", e))?;
    if existing.iter().any(|c| c.name == container_name) {
        return Err(TmError::DuplicateContainer {
            server: server.name.clone(),
            path,
        });
    }

    let database_name = format!("{}{}", container_name, DATABASE_NAME_SUFFIX);
    let descriptor = ContainerDescriptor::new(container_name, &database_name, parent_path, server);
    let created = create(session, &descriptor)?;

    let after = session
        .list_containers(server)
        .map_err(|e| remote_error("list_containers", e))?;
    if !after.iter().any(|c| c.same_container(&descriptor)) {
        warn!(server = %server.name, path = %path, "Create reported success but container is missing");
        return Err(TmError::CreationVerification {
            server: server.name.clone(),
            path,
        });
    }

    info!(
        server = %created.server,
        path = %created.path(),
        database = %created.database_name,
        "Created and verified container"
    );
    Ok(created)
}

fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TmError::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Container names are single path segments
fn require_container_name(name: &str) -> Result<()> {
    require_non_empty("container name", name)?;
    if name.contains(PATH_SEPARATOR) {
        return Err(TmError::InvalidArgument(format!(
            "container name '{}' must not contain '{}'",
            name, PATH_SEPARATOR
        )));
    }
    Ok(())
}

fn ensure_valid(session: &dyn ServerSession) -> Result<()> {
    if session.is_valid() {
        Ok(())
    } else {
        Err(TmError::SessionInvalid)
    }
}

fn create(session: &dyn ServerSession, descriptor: &ContainerDescriptor) -> Result<ContainerDescriptor> {
    session.create_container(descriptor).map_err(|e| match e {
        RemoteError::Timeout { .. } | RemoteError::SessionExpired => {
            remote_error("create_container", e)
        }
        other => TmError::RemoteCreate {
            server: descriptor.server.clone(),
            path: descriptor.path(),
            reason: other.to_string(),
        },
    })
}

fn resolve(session: &dyn ServerSession, path: &str) -> Result<Option<ContainerDescriptor>> {
    match session.resolve_container(path) {
        Ok(descriptor) => Ok(Some(descriptor)),
        Err(RemoteError::NotFound(_)) => Ok(None),
        Err(e) => Err(remote_error("resolve_container", e)),
    }
}

fn remote_error(operation: &str, error: RemoteError) -> TmError {
    match error {
        RemoteError::Timeout { timeout, .. } => TmError::Timeout {
            operation: operation.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        },
        RemoteError::SessionExpired => TmError::SessionInvalid,
        other => TmError::RemoteCommunication {
            operation: operation.to_string(),
            message: other.to_string(),
        },
    }
}
