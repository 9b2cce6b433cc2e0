//! Test helper utilities and common testing patterns

use std::future::Future;
use std::time::Duration;

use saferide_domain::store::{Document, DocumentStore, WriteBatch};
use saferide_errors::DispatchResult;
use tokio::time::sleep;

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Wait for a condition to be true with timeout
    ///
    /// Background workers (trigger router, worker pool) settle asynchronously,
    /// so integration tests poll for the expected end state.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }
}

/// Insert documents in a single batch
pub async fn seed<T: Document>(store: &dyn DocumentStore, documents: &[T]) -> DispatchResult<()> {
    if documents.is_empty() {
        return Ok(());
    }
    let mut batch = WriteBatch::new();
    for document in documents {
        batch.insert(document)?;
    }
    store.commit(batch).await
}
