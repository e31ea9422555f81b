//! In-process TM server
//!
//! Implements [`ServerSession`] entirely in memory. Used by the CLI (backed
//! by a state file) and by tests, which can expire the session, slow it
//! down or make container creation misbehave.

use super::config::DatabaseServerRef;
use super::session::{RemoteError, RemoteResult, ServerSession};
use crate::container::{ContainerDescriptor, PATH_SEPARATOR};
use crate::error::{Result, TmError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Physical database naming rule enforced by the engine
pub const DATABASE_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]{0,127}$";

fn naming_rule() -> &'static Regex {
    static RULE: OnceLock<Regex> = OnceLock::new();
    RULE.get_or_init(|| Regex::new(DATABASE_NAME_PATTERN).expect("valid database name pattern"))
}

/// Physical database allocated on a database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDatabase {
    /// Physical database name
    pub name: String,
    /// Whether a registered container currently uses it
    pub attached: bool,
    /// Allocation time
    pub created_at: DateTime<Utc>,
}

/// A registered database server with everything it hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedServer {
    /// Server reference
    pub server: DatabaseServerRef,
    /// Registered containers, in creation order
    #[serde(default)]
    pub containers: Vec<ContainerDescriptor>,
    /// Physical databases indexed by name
    #[serde(default)]
    pub databases: HashMap<String, PhysicalDatabase>,
}

impl HostedServer {
    fn new(server: DatabaseServerRef) -> Self {
        Self {
            server,
            containers: Vec::new(),
            databases: HashMap::new(),
        }
    }
}

/// Misbehaviour injected into container creation
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Report success for creates without persisting anything
    pub drop_creates: bool,
    /// Reject every create with this reason
    pub reject_creates: Option<String>,
    /// Extra delay on container creation only
    pub create_latency: Option<Duration>,
}

/// Number of remote calls served, by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub servers_listed: usize,
    pub containers_listed: usize,
    pub creates: usize,
}

#[derive(Default)]
struct Counters {
    servers_listed: AtomicUsize,
    containers_listed: AtomicUsize,
    creates: AtomicUsize,
}

/// In-memory TM server
pub struct InMemoryServer {
    /// Registered database servers, in registration order
    servers: RwLock<Vec<HostedServer>>,
    /// Session validity
    valid: AtomicBool,
    /// Artificial latency applied to every remote call, in milliseconds
    latency_ms: AtomicU64,
    faults: RwLock<FaultPlan>,
    counters: Counters,
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServer {
    /// Create an empty server with a valid session
    pub fn new() -> Self {
        Self::from_snapshot(Vec::new())
    }

    /// Restore a server from a snapshot
    pub fn from_snapshot(servers: Vec<HostedServer>) -> Self {
        Self {
            servers: RwLock::new(servers),
            valid: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            faults: RwLock::new(FaultPlan::default()),
            counters: Counters::default(),
        }
    }

    /// Copy of the full server state
    pub fn snapshot(&self) -> Result<Vec<HostedServer>> {
        let servers = self
            .servers
            .read()
            .map_err(|_| TmError::Lock("Failed to acquire read lock".to_string()))?;

        Ok(servers.clone())
    }

    /// Register a database server (administrator operation)
    pub fn register_database_server(&self, server: DatabaseServerRef) -> Result<()> {
        if server.name.trim().is_empty() {
            return Err(TmError::InvalidArgument(
                "database server name must not be empty".to_string(),
            ));
        }

        let mut servers = self
            .servers
            .write()
            .map_err(|_| TmError::Lock("Failed to acquire write lock".to_string()))?;

        if servers.iter().any(|h| h.server.name == server.name) {
            return Err(TmError::InvalidArgument(format!(
                "database server {} is already registered",
                server.name
            )));
        }

        info!(server = %server.name, "Registered database server");
        servers.push(HostedServer::new(server));
        Ok(())
    }

    /// Unregister a database server that hosts no containers
    pub fn unregister_database_server(&self, name: &str) -> Result<()> {
        let mut servers = self
            .servers
            .write()
            .map_err(|_| TmError::Lock("Failed to acquire write lock".to_string()))?;

        let index = servers
            .iter()
            .position(|h| h.server.name == name)
            .ok_or_else(|| TmError::ServerLookup {
                server: name.to_string(),
            })?;

        let hosted = servers[index].containers.len();
        if hosted > 0 {
            return Err(TmError::InvalidArgument(format!(
                "database server {} still hosts {} container(s)",
                name, hosted
            )));
        }

        servers.remove(index);
        info!(server = %name, "Unregistered database server");
        Ok(())
    }

    /// Physical databases on a server, sorted by name
    pub fn physical_databases(&self, server: &str) -> Result<Vec<PhysicalDatabase>> {
        let servers = self
            .servers
            .read()
            .map_err(|_| TmError::Lock("Failed to acquire read lock".to_string()))?;

        let hosted = servers
            .iter()
            .find(|h| h.server.name == server)
            .ok_or_else(|| TmError::ServerLookup {
                server: server.to_string(),
            })?;

        let mut databases: Vec<PhysicalDatabase> = hosted.databases.values().cloned().collect();
        databases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(databases)
    }

    /// Invalidate the session
    pub fn expire(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    /// Make the session valid again
    pub fn renew(&self) {
        self.valid.store(true, Ordering::SeqCst);
    }

    /// Delay every remote call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Replace the injected faults
    pub fn set_faults(&self, plan: FaultPlan) -> Result<()> {
        let mut faults = self
            .faults
            .write()
            .map_err(|_| TmError::Lock("Failed to acquire write lock".to_string()))?;

        *faults = plan;
        Ok(())
    }

    /// Remote calls served so far
    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            servers_listed: self.counters.servers_listed.load(Ordering::SeqCst),
            containers_listed: self.counters.containers_listed.load(Ordering::SeqCst),
            creates: self.counters.creates.load(Ordering::SeqCst),
        }
    }

    /// Common prologue of every remote call
    fn enter(&self, operation: &str) -> RemoteResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }

        if !self.valid.load(Ordering::SeqCst) {
            debug!(operation, "Rejected call on expired session");
            return Err(RemoteError::SessionExpired);
        }

        Ok(())
    }

    fn poisoned() -> RemoteError {
        RemoteError::Communication("server state lock poisoned".to_string())
    }
}

impl ServerSession for InMemoryServer {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn resolve_database_server(
        &self,
        name: &str,
        _properties: &HashMap<String, String>,
    ) -> RemoteResult<DatabaseServerRef> {
        self.enter("resolve_database_server")?;
        let servers = self.servers.read().map_err(|_| Self::poisoned())?;

        servers
            .iter()
            .find(|h| h.server.name == name)
            .map(|h| h.server.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("database server {}", name)))
    }

    fn list_database_servers(&self) -> RemoteResult<Vec<DatabaseServerRef>> {
        self.enter("list_database_servers")?;
        self.counters.servers_listed.fetch_add(1, Ordering::SeqCst);
        let servers = self.servers.read().map_err(|_| Self::poisoned())?;

        Ok(servers.iter().map(|h| h.server.clone()).collect())
    }

    fn list_containers(&self, server: &DatabaseServerRef) -> RemoteResult<Vec<ContainerDescriptor>> {
        self.enter("list_containers")?;
        self.counters.containers_listed.fetch_add(1, Ordering::SeqCst);
        let servers = self.servers.read().map_err(|_| Self::poisoned())?;

        servers
            .iter()
            .find(|h| h.server.name == server.name)
            .map(|h| h.containers.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("database server {}", server.name)))
    }

    fn create_container(&self, descriptor: &ContainerDescriptor) -> RemoteResult<ContainerDescriptor> {
        self.enter("create_container")?;
        self.counters.creates.fetch_add(1, Ordering::SeqCst);

        let faults = self.faults.read().map_err(|_| Self::poisoned())?.clone();
        if let Some(delay) = faults.create_latency {
            std::thread::sleep(delay);
        }
        if let Some(reason) = faults.reject_creates {
            return Err(RemoteError::Rejected(reason));
        }

        let mut created = descriptor.clone();
        created.id = Uuid::new_v4().to_string().replace("-", "")[..12].to_string();
        created.created_at = Some(Utc::now());

        if faults.drop_creates {
            debug!(path = %created.path(), "Dropping create request");
            return Ok(created);
        }

        if descriptor.name.contains(PATH_SEPARATOR) {
            return Err(RemoteError::Rejected(format!(
                "container name '{}' is not a single path segment",
                descriptor.name
            )));
        }

        if !naming_rule().is_match(&descriptor.database_name) {
            return Err(RemoteError::Rejected(format!(
                "invalid physical database name '{}'",
                descriptor.database_name
            )));
        }

        let mut servers = self.servers.write().map_err(|_| Self::poisoned())?;
        let hosted = servers
            .iter_mut()
            .find(|h| h.server.name == descriptor.server)
            .ok_or_else(|| RemoteError::NotFound(format!("database server {}", descriptor.server)))?;

        if hosted.containers.iter().any(|c| c.same_container(descriptor)) {
            return Err(RemoteError::Rejected(format!(
                "container {} already exists",
                descriptor.path()
            )));
        }

        match hosted.databases.get_mut(&descriptor.database_name) {
            Some(database) if database.attached => {
                return Err(RemoteError::Rejected(format!(
                    "physical database {} is in use",
                    database.name
                )));
            }
            Some(database) => {
                database.attached = true;
                info!(database = %database.name, "Re-attached physical database");
            }
            None => {
                hosted.databases.insert(
                    descriptor.database_name.clone(),
                    PhysicalDatabase {
                        name: descriptor.database_name.clone(),
                        attached: true,
                        created_at: Utc::now(),
                    },
                );
            }
        }

        info!(
            server = %hosted.server.name,
            path = %created.path(),
            database = %created.database_name,
            "Created container"
        );
        hosted.containers.push(created.clone());
        Ok(created)
    }

    fn resolve_container(&self, path: &str) -> RemoteResult<ContainerDescriptor> {
        self.enter("resolve_container")?;
        let servers = self.servers.read().map_err(|_| Self::poisoned())?;

        servers
            .iter()
            .flat_map(|h| h.containers.iter())
            .find(|c| c.path() == path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("container {}", path)))
    }

    fn delete_container(&self, descriptor: &ContainerDescriptor, purge: bool) -> RemoteResult<()> {
        self.enter("delete_container")?;
        let mut servers = self.servers.write().map_err(|_| Self::poisoned())?;

        let hosted = servers
            .iter_mut()
            .find(|h| h.server.name == descriptor.server)
            .ok_or_else(|| RemoteError::NotFound(format!("database server {}", descriptor.server)))?;

        let index = hosted
            .containers
            .iter()
            .position(|c| c.same_container(descriptor))
            .ok_or_else(|| RemoteError::NotFound(format!("container {}", descriptor.path())))?;

        let removed = hosted.containers.remove(index);

        if purge {
            hosted.databases.remove(&removed.database_name);
            warn!(
                path = %removed.path(),
                database = %removed.database_name,
                "Purged physical database"
            );
        } else if let Some(database) = hosted.databases.get_mut(&removed.database_name) {
            database.attached = false;
            info!(path = %removed.path(), "Unregistered container, physical database kept");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::OrgPath;

    fn server_with(name: &str) -> InMemoryServer {
        let server = InMemoryServer::new();
        server
            .register_database_server(DatabaseServerRef::new(name))
            .unwrap();
        server
    }

    fn descriptor(name: &str, database: &str) -> ContainerDescriptor {
        ContainerDescriptor::new(
            name,
            database,
            OrgPath::new("acme"),
            &DatabaseServerRef::new("DB01"),
        )
    }

    #[test]
    fn test_register_database_server() {
        let server = server_with("DB01");

        assert!(server
            .register_database_server(DatabaseServerRef::new("DB01"))
            .is_err());
        assert!(server
            .register_database_server(DatabaseServerRef::new(" "))
            .is_err());
        assert_eq!(server.list_database_servers().unwrap().len(), 1);
    }

    #[test]
    fn test_unregister_busy_server_is_refused() {
        let server = server_with("DB01");
        server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        assert!(matches!(
            server.unregister_database_server("DB01"),
            Err(TmError::InvalidArgument(_))
        ));
        assert!(matches!(
            server.unregister_database_server("DB02"),
            Err(TmError::ServerLookup { .. })
        ));
    }

    #[test]
    fn test_create_assigns_identity() {
        let server = server_with("DB01");
        let created = server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        assert_eq!(created.id.len(), 12);
        assert!(created.created_at.is_some());
        assert_eq!(
            server.resolve_container("acme/ProjectX").unwrap(),
            created
        );
    }

    #[test]
    fn test_invalid_physical_name_is_rejected() {
        let server = server_with("DB01");
        let result = server.create_container(&descriptor("Project X", "Project X DB"));

        assert!(matches!(result, Err(RemoteError::Rejected(_))));
        assert!(server.physical_databases("DB01").unwrap().is_empty());
    }

    #[test]
    fn test_nested_container_name_is_rejected() {
        let server = server_with("DB01");
        let result = server.create_container(&descriptor("sub/X", "GlossaryDB"));

        assert!(matches!(result, Err(RemoteError::Rejected(_))));
        assert!(server.physical_databases("DB01").unwrap().is_empty());
    }

    #[test]
    fn test_attached_database_cannot_be_reused() {
        let server = server_with("DB01");
        server
            .create_container(&descriptor("ProjectX", "SharedDB"))
            .unwrap();

        let result = server.create_container(&descriptor("ProjectY", "SharedDB"));
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[test]
    fn test_delete_without_purge_keeps_database() {
        let server = server_with("DB01");
        let created = server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        server.delete_container(&created, false).unwrap();

        let databases = server.physical_databases("DB01").unwrap();
        assert_eq!(databases.len(), 1);
        assert!(!databases[0].attached);
        assert!(server.resolve_container("acme/ProjectX").is_err());
    }

    #[test]
    fn test_delete_with_purge_drops_database() {
        let server = server_with("DB01");
        let created = server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        server.delete_container(&created, true).unwrap();

        assert!(server.physical_databases("DB01").unwrap().is_empty());
    }

    #[test]
    fn test_expired_session() {
        let server = server_with("DB01");
        server.expire();

        assert!(!server.is_valid());
        assert_eq!(
            server.list_database_servers(),
            Err(RemoteError::SessionExpired)
        );

        server.renew();
        assert!(server.list_database_servers().is_ok());
    }

    #[test]
    fn test_dropped_create_is_not_persisted() {
        let server = server_with("DB01");
        server
            .set_faults(FaultPlan {
                drop_creates: true,
                ..Default::default()
            })
            .unwrap();

        let created = server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        assert!(created.is_persisted());
        assert!(server
            .list_containers(&DatabaseServerRef::new("DB01"))
            .unwrap()
            .is_empty());
        assert_eq!(server.call_counts().creates, 1);
    }

    #[test]
    fn test_snapshot_restores_state() {
        let server = server_with("DB01");
        server
            .create_container(&descriptor("ProjectX", "ProjectXDB"))
            .unwrap();

        let restored = InMemoryServer::from_snapshot(server.snapshot().unwrap());
        assert!(restored.resolve_container("acme/ProjectX").is_ok());
        assert_eq!(restored.physical_databases("DB01").unwrap().len(), 1);
    }
}
