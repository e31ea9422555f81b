//! Deadline-bounded remote calls

use super::config::DatabaseServerRef;
use super::session::{RemoteError, RemoteResult, ServerSession};
use crate::container::ContainerDescriptor;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::warn;

/// Default bound on a single remote call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of remote calls that may run at once
pub const DEFAULT_MAX_BLOCKING_CALLS: usize = 8;

/// Session decorator that bounds every remote call with a timeout
///
/// Calls run on the blocking pool of a private tokio runtime, so threads
/// are reused and their number is capped. When the deadline passes the
/// caller gets [`RemoteError::Timeout`]; the abandoned call keeps its pool
/// thread until it returns, and time spent queued for a thread counts
/// against the deadline. Must not be used from inside an async context.
pub struct TimeoutSession<S> {
    inner: Arc<S>,
    timeout: Duration,
    /// Taken on drop
    runtime: Option<Runtime>,
}

impl<S> TimeoutSession<S>
where
    S: ServerSession + Send + Sync + 'static,
{
    /// Wrap a session
    pub fn new(inner: Arc<S>, timeout: Duration) -> Result<Self> {
        Self::with_max_blocking(inner, timeout, DEFAULT_MAX_BLOCKING_CALLS)
    }

    /// Wrap a session, allowing at most `max_blocking` calls in flight
    pub fn with_max_blocking(inner: Arc<S>, timeout: Duration, max_blocking: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_blocking.max(1))
            .thread_name("tmc-remote")
            .enable_time()
            .build()?;

        Ok(Self {
            inner,
            timeout,
            runtime: Some(runtime),
        })
    }

    /// The wrapped session
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call<T, F>(&self, operation: &'static str, f: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> RemoteResult<T> + Send + 'static,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| RemoteError::Communication("session runtime is shut down".to_string()))?;

        let inner = Arc::clone(&self.inner);
        let task = runtime.spawn_blocking(move || f(&inner));

        match runtime.block_on(tokio::time::timeout(self.timeout, task)) {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RemoteError::Communication(format!(
                "{} aborted before replying: {}",
                operation, e
            ))),
            Err(_) => {
                warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Remote call timed out");
                Err(RemoteError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }
}

impl<S> Drop for TimeoutSession<S> {
    fn drop(&mut self) {
        // Do not wait for abandoned calls
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl<S> ServerSession for TimeoutSession<S>
where
    S: ServerSession + Send + Sync + 'static,
{
    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn resolve_database_server(
        &self,
        name: &str,
        properties: &HashMap<String, String>,
    ) -> RemoteResult<DatabaseServerRef> {
        let name = name.to_string();
        let properties = properties.clone();
        self.call("resolve_database_server", move |s| {
            s.resolve_database_server(&name, &properties)
        })
    }

    fn list_database_servers(&self) -> RemoteResult<Vec<DatabaseServerRef>> {
        self.call("list_database_servers", |s| s.list_database_servers())
    }

    fn list_containers(&self, server: &DatabaseServerRef) -> RemoteResult<Vec<ContainerDescriptor>> {
        let server = server.clone();
        self.call("list_containers", move |s| s.list_containers(&server))
    }

    fn create_container(&self, descriptor: &ContainerDescriptor) -> RemoteResult<ContainerDescriptor> {
        let descriptor = descriptor.clone();
        self.call("create_container", move |s| s.create_container(&descriptor))
    }

    fn resolve_container(&self, path: &str) -> RemoteResult<ContainerDescriptor> {
        let path = path.to_string();
        self.call("resolve_container", move |s| s.resolve_container(&path))
    }

    fn delete_container(&self, descriptor: &ContainerDescriptor, purge: bool) -> RemoteResult<()> {
        let descriptor = descriptor.clone();
        self.call("delete_container", move |s| {
            s.delete_container(&descriptor, purge)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::InMemoryServer;
    use std::time::Instant;

    fn registered() -> Arc<InMemoryServer> {
        let server = Arc::new(InMemoryServer::new());
        server
            .register_database_server(DatabaseServerRef::new("DB01"))
            .unwrap();
        server
    }

    #[test]
    fn test_fast_call_passes_through() {
        let session = TimeoutSession::new(registered(), Duration::from_secs(5)).unwrap();

        let servers = session.list_database_servers().unwrap();
        assert_eq!(servers[0].name, "DB01");
    }

    #[test]
    fn test_slow_call_times_out() {
        let server = registered();
        server.set_latency(Duration::from_millis(500));
        let session = TimeoutSession::new(server, Duration::from_millis(20)).unwrap();

        match session.list_database_servers() {
            Err(RemoteError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "list_database_servers");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_errors_are_forwarded() {
        let session = TimeoutSession::new(registered(), Duration::from_secs(5)).unwrap();

        assert!(matches!(
            session.resolve_container("acme/missing"),
            Err(RemoteError::NotFound(_))
        ));
    }

    #[test]
    fn test_abandoned_calls_occupy_the_capped_pool() {
        let server = registered();
        server.set_latency(Duration::from_millis(400));
        let session =
            TimeoutSession::with_max_blocking(Arc::clone(&server), Duration::from_millis(50), 1)
                .unwrap();

        assert!(matches!(
            session.list_database_servers(),
            Err(RemoteError::Timeout { .. })
        ));

        // The only pool thread is still busy with the abandoned call
        server.set_latency(Duration::ZERO);
        assert!(matches!(
            session.list_database_servers(),
            Err(RemoteError::Timeout { .. })
        ));

        // Once it returns, the same thread serves new calls
        std::thread::sleep(Duration::from_millis(500));
        assert!(session.list_database_servers().is_ok());
    }

    #[test]
    fn test_drop_does_not_wait_for_abandoned_calls() {
        let server = registered();
        server.set_latency(Duration::from_secs(2));
        let session = TimeoutSession::new(server, Duration::from_millis(10)).unwrap();

        let start = Instant::now();
        for _ in 0..20 {
            assert!(matches!(
                session.list_database_servers(),
                Err(RemoteError::Timeout { .. })
            ));
        }
        drop(session);

        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
