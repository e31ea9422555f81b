//! Container configuration

use crate::server::DatabaseServerRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between organizational path segments
pub const PATH_SEPARATOR: char = '/';

/// Normalized organizational path
///
/// Always ends with [`PATH_SEPARATOR`], so `"org"` and `"org/"` name the
/// same location. An empty path is the root, `"/"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct OrgPath(String);

impl OrgPath {
    /// Normalize a raw organizational path
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::root();
        }

        if trimmed.ends_with(PATH_SEPARATOR) {
            Self(trimmed.to_string())
        } else {
            Self(format!("{}{}", trimmed, PATH_SEPARATOR))
        }
    }

    /// The root path
    pub fn root() -> Self {
        Self(PATH_SEPARATOR.to_string())
    }

    /// Fully qualified path of a container under this path
    pub fn join(&self, container_name: &str) -> String {
        format!("{}{}", self.0, container_name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OrgPath {
    fn default() -> Self {
        Self::root()
    }
}

impl From<&str> for OrgPath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for OrgPath {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<OrgPath> for String {
    fn from(path: OrgPath) -> Self {
        path.0
    }
}

impl std::fmt::Display for OrgPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical TM container hosted on a database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Server-assigned ID, empty until persisted
    #[serde(default)]
    pub id: String,
    /// Friendly name, unique within the parent path
    pub name: String,
    /// Physical database name (validated by the remote engine)
    pub database_name: String,
    /// Parent organizational path
    pub parent_path: OrgPath,
    /// Name of the database server hosting the container
    pub server: String,
    /// Creation time, set by the server
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ContainerDescriptor {
    /// Create a new, not yet persisted, descriptor
    pub fn new(
        name: &str,
        database_name: &str,
        parent_path: OrgPath,
        server: &DatabaseServerRef,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            database_name: database_name.to_string(),
            parent_path,
            server: server.name.clone(),
            created_at: None,
        }
    }

    /// Fully qualified path (`parent_path + name`)
    pub fn path(&self) -> String {
        self.parent_path.join(&self.name)
    }

    /// Whether the server has assigned an identity to this descriptor
    pub fn is_persisted(&self) -> bool {
        !self.id.is_empty()
    }

    /// Whether both descriptors denote the same container, ignoring
    /// server-assigned fields
    pub fn same_container(&self, other: &ContainerDescriptor) -> bool {
        self.server == other.server
            && self.parent_path == other.parent_path
            && self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(OrgPath::new("org"), OrgPath::new("org/"));
        assert_eq!(OrgPath::new("acme/sub").as_str(), "acme/sub/");
        assert_eq!(OrgPath::new("  acme/ ").as_str(), "acme/");
    }

    #[test]
    fn test_empty_path_is_root() {
        assert_eq!(OrgPath::new(""), OrgPath::root());
        assert_eq!(OrgPath::new("/"), OrgPath::root());
        assert_eq!(OrgPath::root().join("ProjectX"), "/ProjectX");
    }

    #[test]
    fn test_fully_qualified_path() {
        let server = DatabaseServerRef::new("DB01");
        let a = ContainerDescriptor::new("ProjectX", "ProjectXDB", "acme".into(), &server);
        let b = ContainerDescriptor::new("ProjectX", "ProjectXDB", "acme/".into(), &server);

        assert_eq!(a.path(), "acme/ProjectX");
        assert_eq!(a.path(), b.path());
        assert!(a.same_container(&b));
        assert!(!a.is_persisted());
    }

    #[test]
    fn test_same_container_ignores_server_fields() {
        let server = DatabaseServerRef::new("DB01");
        let local = ContainerDescriptor::new("ProjectX", "ProjectXDB", "acme/".into(), &server);
        let mut remote = local.clone();
        remote.id = "0123456789ab".to_string();
        remote.created_at = Some(Utc::now());

        assert!(local.same_container(&remote));
        assert_ne!(local, remote);
    }

    #[test]
    fn test_org_path_serializes_as_string() {
        let json = serde_json::to_string(&OrgPath::new("acme")).unwrap();
        assert_eq!(json, r#""acme/""#);

        let path: OrgPath = serde_json::from_str(r#""acme""#).unwrap();
        assert_eq!(path.as_str(), "acme/");
    }
}
