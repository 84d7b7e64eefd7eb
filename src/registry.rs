//! The process-wide list of running servers.
//!
//! This is the only process-wide state in the crate.  The collection
//! itself is never exposed: callers get snapshots.

use lazy_static::lazy_static;
use std::sync::{Arc, Mutex};

use crate::server::MockServer;

lazy_static! {
    static ref RUNNING: Mutex<Vec<Arc<MockServer>>> = Mutex::new(Vec::new());
}

pub(crate) fn register(server: Arc<MockServer>) {
    RUNNING.lock().unwrap().push(server);
}

pub(crate) fn unregister(server: &MockServer) {
    RUNNING
        .lock()
        .unwrap()
        .retain(|s| !std::ptr::eq(Arc::as_ptr(s), server));
}

/// A snapshot of the running servers, in start order.
pub fn running_servers() -> Vec<Arc<MockServer>> {
    RUNNING.lock().unwrap().clone()
}

/// Stop every running server, waiting for each accept worker to exit,
/// and empty the registry.  Always returns `true`, even when the
/// registry is already empty.  Strict-mode misses are logged rather
/// than surfaced; tests that assert on them stop servers
/// individually.
pub async fn stop_running_servers() -> bool {
    let servers: Vec<Arc<MockServer>> = RUNNING.lock().unwrap().drain(..).collect();

    for server in servers {
        if let Err(error) = server.stop().await {
            tracing::warn!(%error, "server stopped with an unmatched query");
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopping_an_empty_registry_succeeds() {
        assert!(stop_running_servers().await);
        assert!(running_servers().is_empty());
    }
}
