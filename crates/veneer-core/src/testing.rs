//! Test support: canned shapes, a fixture config, and a scripted fake
//! database client.
//!
//! The fake client stands behind the thin [`DatabaseClient`] trait exactly
//! where a real driver would, so executor and engine tests exercise the
//! full pipeline without a database (and without fabricating driver
//! exceptions through reflection or similar tricks).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use veneer_config::RuntimeConfig;
use veneer_error::{Result, VeneerError};

use crate::exec::{DatabaseClient, MutationResult};
use crate::metadata::{ColumnShape, DbType, ForeignKey, ProcParameter, SchemaIntrospector, TableShape};
use crate::sql::RenderedQuery;

/// Shape of the `books` fixture table.
#[must_use]
pub fn book_shape() -> TableShape {
    TableShape {
        columns: vec![
            column("id", DbType::Int, false, true),
            column("title", DbType::String, false, false),
            column("year", DbType::Int, true, false),
            column("price", DbType::Float, true, false),
            column("featured", DbType::Boolean, true, false),
            column("ssn", DbType::String, true, false),
            column("author_id", DbType::Int, true, false),
            column("publisher_id", DbType::Int, true, false),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![ForeignKey {
            columns: vec!["publisher_id".to_string()],
            ref_table: "publishers".to_string(),
            ref_columns: vec!["id".to_string()],
        }],
        parameters: vec![],
    }
}

/// Shape of the `publishers` fixture table.
#[must_use]
pub fn publisher_shape() -> TableShape {
    TableShape {
        columns: vec![
            column("id", DbType::Int, false, true),
            column("name", DbType::String, false, false),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        parameters: vec![],
    }
}

fn audit_shape() -> TableShape {
    TableShape {
        columns: vec![
            column("id", DbType::Int, false, true),
            column("message", DbType::String, false, false),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        parameters: vec![],
    }
}

fn top_sellers_shape() -> TableShape {
    TableShape {
        columns: vec![],
        primary_key: vec![],
        foreign_keys: vec![],
        parameters: vec![
            ProcParameter {
                name: "top_n".to_string(),
                db_type: DbType::Int,
                has_default: false,
            },
            ProcParameter {
                name: "since_year".to_string(),
                db_type: DbType::Int,
                has_default: false,
            },
        ],
    }
}

fn column(name: &str, db_type: DbType, nullable: bool, auto_generated: bool) -> ColumnShape {
    ColumnShape {
        name: name.to_string(),
        db_type,
        nullable,
        default: None,
        auto_generated,
    }
}

/// The fixture catalog: a book/publisher pair with relationships in both
/// directions, a REST-only audit entity, and a stored procedure.
#[must_use]
pub fn test_config() -> RuntimeConfig {
    let json = r#"{
        "$schema": "https://veneer.dev/schemas/v1.json",
        "data-source": {
            "database-type": "postgresql",
            "connection-string": "postgresql://localhost/fixture"
        },
        "runtime": {
            "rest": { "enabled": true, "path": "/api" },
            "graphql": { "enabled": true, "allow-introspection": true },
            "host": { "mode": "development" }
        },
        "entities": {
            "Book": {
                "source": "books",
                "permissions": [
                    {
                        "role": "anonymous",
                        "actions": [
                            { "action": "read", "fields": { "include": [ "*" ], "exclude": [ "ssn" ] } }
                        ]
                    },
                    {
                        "role": "author",
                        "actions": [
                            { "action": "read", "fields": { "include": [ "*" ], "exclude": [ "ssn" ] } },
                            {
                                "action": "update",
                                "policy": { "database": "@item.author_id eq @claims.sub" }
                            }
                        ]
                    },
                    { "role": "admin", "actions": [ "*" ] }
                ],
                "relationships": {
                    "publisher": { "cardinality": "one", "target.entity": "Publisher" }
                }
            },
            "Publisher": {
                "source": "publishers",
                "permissions": [
                    { "role": "anonymous", "actions": [ "read" ] },
                    { "role": "restricted", "actions": [ "read" ] },
                    { "role": "admin", "actions": [ "*" ] }
                ],
                "relationships": {
                    "books": { "cardinality": "many", "target.entity": "Book" }
                }
            },
            "Audit": {
                "source": "audit_log",
                "graphql": false,
                "rest": { "path": "audit-log", "methods": [ "get" ] },
                "permissions": [
                    { "role": "anonymous", "actions": [ "read" ] }
                ]
            },
            "TopSellers": {
                "source": {
                    "object": "dbo.top_sellers",
                    "type": "stored-procedure",
                    "parameters": { "since_year": 2020 }
                },
                "permissions": [
                    { "role": "admin", "actions": [ "execute" ] }
                ]
            }
        }
    }"#;
    serde_json::from_str(json).expect("fixture config is valid")
}

/// Introspector returning the canned fixture shapes, counting calls.
#[derive(Debug, Default)]
pub struct CannedIntrospector {
    calls: AtomicUsize,
}

impl CannedIntrospector {
    /// How many describe calls were made (memoization assertions).
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SchemaIntrospector for CannedIntrospector {
    async fn describe(&self, object: &str) -> Result<TableShape> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match object {
            "books" => Ok(book_shape()),
            "publishers" => Ok(publisher_shape()),
            "audit_log" => Ok(audit_shape()),
            "dbo.top_sellers" => Ok(top_sellers_shape()),
            other => Err(VeneerError::init(format!("Unknown fixture object '{other}'"))),
        }
    }
}

/// Scripted database client.
///
/// Responses are queued per method; every statement the engine issues is
/// recorded for assertions on SQL text and bindings.
#[derive(Default)]
pub struct FakeClient {
    json_responses: Mutex<VecDeque<Result<Value>>>,
    mutation_responses: Mutex<VecDeque<Result<MutationResult>>>,
    delay: Mutex<Option<Duration>>,
    statements: Mutex<Vec<RenderedQuery>>,
}

impl FakeClient {
    /// Construct a shareable fake.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a JSON response for the next `query_json`.
    pub fn push_json(&self, value: Value) {
        self.json_responses.lock().push_back(Ok(value));
    }

    /// Queue an error for the next `query_json`.
    pub fn push_json_error(&self, error: VeneerError) {
        self.json_responses.lock().push_back(Err(error));
    }

    /// Queue a result for the next `execute`.
    pub fn push_mutation(&self, result: MutationResult) {
        self.mutation_responses.lock().push_back(Ok(result));
    }

    /// Queue an error for the next `execute`.
    pub fn push_mutation_error(&self, error: VeneerError) {
        self.mutation_responses.lock().push_back(Err(error));
    }

    /// Delay every call (timeout and cancellation tests).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Every statement issued so far.
    #[must_use]
    pub fn statements(&self) -> Vec<RenderedQuery> {
        self.statements.lock().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for FakeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeClient")
            .field("recorded_statements", &self.statements.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl DatabaseClient for FakeClient {
    async fn query_json(
        &self,
        query: &RenderedQuery,
        _cancel: &CancellationToken,
    ) -> Result<Value> {
        self.statements.lock().push(query.clone());
        self.pause().await;
        self.json_responses
            .lock()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }

    async fn execute(
        &self,
        query: &RenderedQuery,
        _cancel: &CancellationToken,
    ) -> Result<MutationResult> {
        self.statements.lock().push(query.clone());
        self.pause().await;
        self.mutation_responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(MutationResult::default()))
    }

    async fn execute_batch(
        &self,
        queries: &[RenderedQuery],
        cancel: &CancellationToken,
    ) -> Result<Vec<MutationResult>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.execute(query, cancel).await?);
        }
        Ok(results)
    }
}
