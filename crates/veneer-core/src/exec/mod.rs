//! Query execution.
//!
//! The engine talks to databases through the thin [`DatabaseClient`] trait;
//! pooled connections, wire protocols, and transaction brackets live in the
//! driver implementations outside this crate (tests inject a scripted
//! fake). [`QueryExecutor`] wraps a client with the engine's resource
//! policy: a per-data-source semaphore for back-pressure, a per-request
//! timeout, and cancellation propagation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use veneer_error::{Result, VeneerError};

use crate::sql::RenderedQuery;

/// Default per-request database timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a write statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationResult {
    /// Rows the statement affected.
    pub rows_affected: u64,

    /// Key columns returned by the statement's RETURNING/OUTPUT clause, or
    /// reported by the driver (generated keys) where the dialect has no
    /// returning form.
    pub returned_keys: Option<Value>,
}

/// Thin asynchronous database interface.
///
/// `query_json` statements are issued inside a read transaction at READ
/// COMMITTED, so sibling subqueries of one operation observe a consistent
/// snapshot. `execute_batch` wraps its statements in one transaction with
/// all-or-nothing commit.
#[async_trait::async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Execute a statement that returns a single JSON column and decode it.
    ///
    /// Zero rows decode as `Value::Null`.
    async fn query_json(&self, query: &RenderedQuery, cancel: &CancellationToken)
    -> Result<Value>;

    /// Execute a write statement.
    async fn execute(
        &self,
        query: &RenderedQuery,
        cancel: &CancellationToken,
    ) -> Result<MutationResult>;

    /// Execute several writes in one transaction; all-or-nothing.
    async fn execute_batch(
        &self,
        queries: &[RenderedQuery],
        cancel: &CancellationToken,
    ) -> Result<Vec<MutationResult>>;
}

/// Executor wrapping a client with back-pressure and deadlines.
pub struct QueryExecutor {
    client: Arc<dyn DatabaseClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
    timeout: Duration,
}

impl QueryExecutor {
    /// New executor. `max_concurrency` bounds in-flight database commands
    /// for this data source (default should match the pool's max size).
    #[must_use]
    pub fn new(client: Arc<dyn DatabaseClient>, max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            client,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrency.max(1))),
            timeout,
        }
    }

    /// Run a JSON query under the resource policy.
    ///
    /// # Errors
    ///
    /// `ServiceBusy` when no command slot frees up within the deadline;
    /// `DatabaseOperationFailed` on driver errors or timeout.
    pub async fn query_json(
        &self,
        query: &RenderedQuery,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let _permit = self.acquire_slot().await?;
        self.bounded(self.client.query_json(query, cancel), cancel)
            .await
    }

    /// Run a write under the resource policy.
    ///
    /// # Errors
    ///
    /// As [`Self::query_json`].
    pub async fn execute(
        &self,
        query: &RenderedQuery,
        cancel: &CancellationToken,
    ) -> Result<MutationResult> {
        let _permit = self.acquire_slot().await?;
        self.bounded(self.client.execute(query, cancel), cancel).await
    }

    /// Run a transactional batch under the resource policy.
    ///
    /// # Errors
    ///
    /// As [`Self::query_json`]; any statement failure rolls back the batch.
    pub async fn execute_batch(
        &self,
        queries: &[RenderedQuery],
        cancel: &CancellationToken,
    ) -> Result<Vec<MutationResult>> {
        let _permit = self.acquire_slot().await?;
        self.bounded(self.client.execute_batch(queries, cancel), cancel)
            .await
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        match tokio::time::timeout(self.timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(VeneerError::busy("executor is shutting down")),
            Err(_) => Err(VeneerError::busy(
                "no database command slot became available within the request deadline",
            )),
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl std::future::Future<Output = Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        tokio::select! {
            () = cancel.cancelled() => {
                // Partial results are never returned.
                Err(VeneerError::internal("request was cancelled"))
            }
            outcome = tokio::time::timeout(self.timeout, operation) => match outcome {
                Ok(result) => result,
                Err(_) => Err(VeneerError::database(format!(
                    "statement exceeded the {}s request timeout",
                    self.timeout.as_secs()
                ))),
            },
        }
    }
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("available_slots", &self.semaphore.available_permits())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// SQLSTATE / vendor codes that mean a unique-constraint violation.
const UNIQUE_VIOLATION_CODES: &[&str] = &["23505", "2627", "2601", "1062"];

/// Map a driver error onto the taxonomy with entity context.
///
/// Unique-constraint violations become `ItemAlreadyExists`; everything else
/// passes through.
#[must_use]
pub fn classify_driver_error(error: VeneerError, entity: &str) -> VeneerError {
    match &error {
        VeneerError::Database {
            sql_state: Some(state),
            ..
        } if UNIQUE_VIOLATION_CODES.contains(&state.as_str()) => VeneerError::conflict(entity),
        _ => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeClient;
    use serde_json::json;

    fn query() -> RenderedQuery {
        RenderedQuery {
            sql: "SELECT 1".to_string(),
            params: vec![],
        }
    }

    #[tokio::test]
    async fn query_json_passes_through() {
        let client = Arc::new(FakeClient::default());
        client.push_json(json!([{ "id": 1 }]));
        let executor = QueryExecutor::new(client, 4, DEFAULT_QUERY_TIMEOUT);

        let value = executor
            .query_json(&query(), &CancellationToken::new())
            .await
            .expect("queries");
        assert_eq!(value, json!([{ "id": 1 }]));
    }

    #[tokio::test]
    async fn exhausted_semaphore_is_service_busy() {
        let client = Arc::new(FakeClient::default());
        client.set_delay(Duration::from_secs(60));
        let executor = Arc::new(QueryExecutor::new(client, 1, Duration::from_millis(100)));

        // Two slow requests: the first holds the single slot until its
        // timeout, the second is queued ahead of ours (acquisition is
        // FIFO), so our acquire window expires before a slot reaches us.
        let mut hogs = Vec::new();
        for _ in 0..2 {
            let busy_executor = Arc::clone(&executor);
            hogs.push(tokio::spawn(async move {
                let _ = busy_executor
                    .query_json(&query(), &CancellationToken::new())
                    .await;
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = executor
            .query_json(&query(), &CancellationToken::new())
            .await
            .expect_err("must be busy");
        assert_eq!(err.status(), 503);
        for hog in hogs {
            hog.abort();
        }
    }

    #[tokio::test]
    async fn slow_statement_times_out_as_database_failure() {
        let client = Arc::new(FakeClient::default());
        client.set_delay(Duration::from_secs(60));
        client.push_json(json!(null));
        let executor = QueryExecutor::new(client, 4, Duration::from_millis(20));

        let err = executor
            .query_json(&query(), &CancellationToken::new())
            .await
            .expect_err("must time out");
        assert_eq!(err.sub_code(), veneer_error::SubCode::DatabaseOperationFailed);
    }

    #[tokio::test]
    async fn cancellation_aborts_inflight_statement() {
        let client = Arc::new(FakeClient::default());
        client.set_delay(Duration::from_secs(60));
        client.push_json(json!(null));
        let executor = QueryExecutor::new(client, 4, DEFAULT_QUERY_TIMEOUT);

        let cancel = CancellationToken::new();
        let cancel_soon = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_soon.cancel();
        });

        let err = executor
            .query_json(&query(), &cancel)
            .await
            .expect_err("must cancel");
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = classify_driver_error(
            VeneerError::database_with_state("duplicate key value", "23505"),
            "Book",
        );
        assert_eq!(err.status(), 409);

        let passthrough = classify_driver_error(
            VeneerError::database_with_state("syntax error", "42601"),
            "Book",
        );
        assert_eq!(passthrough.status(), 500);
    }
}
