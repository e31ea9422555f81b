//! Database server selection

use crate::server::DatabaseServerRef;

/// Picks the database server a new container is created on
///
/// Returns an index into `servers`, or `None` when no server is acceptable.
/// Closures of the same shape are selectors too.
pub trait ServerSelector: Send + Sync {
    fn select(&self, servers: &[DatabaseServerRef]) -> Option<usize>;
}

impl<F> ServerSelector for F
where
    F: Fn(&[DatabaseServerRef]) -> Option<usize> + Send + Sync,
{
    fn select(&self, servers: &[DatabaseServerRef]) -> Option<usize> {
        self(servers)
    }
}

/// Always the first server listed; assumes a single-server deployment
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstServer;

impl ServerSelector for FirstServer {
    fn select(&self, servers: &[DatabaseServerRef]) -> Option<usize> {
        if servers.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}

/// The server with a given friendly name
#[derive(Debug, Clone)]
pub struct NamedServer(pub String);

impl ServerSelector for NamedServer {
    fn select(&self, servers: &[DatabaseServerRef]) -> Option<usize> {
        servers.iter().position(|s| s.name == self.0)
    }
}
