//! Request-translation engine for the veneer data API gateway.
//!
//! Given a declarative entity catalog (see `veneer-config`), this crate
//! synthesizes a GraphQL schema and a REST route table, authorizes every
//! request against role/action/field/row policies, compiles it into a
//! single parameterized query whose JSON projection the database shapes
//! itself, executes it through a thin driver interface, and finishes the
//! document for the wire.
//!
//! # Architecture
//!
//! Requests flow top to bottom:
//!
//! ```text
//! engine      - snapshot capture, dispatch, error boundary
//! schema      - GraphQL type/route synthesis from config ∪ metadata
//! auth        - role/action/field resolution, policy compilation
//! plan        - selection/query-string → SqlQueryStructure tree
//! sql         - dialect capability record, tree → parameterized SQL
//! exec        - thin driver trait, back-pressure, timeout, cancellation
//! shape       - column masks, keyset-probe decoding, wire envelopes
//! metadata    - lazy per-snapshot table shapes (introspection or SDL)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//! use veneer_core::auth::Principal;
//! use veneer_core::engine::{Engine, GraphQLRequest};
//!
//! # async fn example(
//! #     introspector: Arc<dyn veneer_core::metadata::SchemaIntrospector>,
//! #     client: Arc<dyn veneer_core::exec::DatabaseClient>,
//! # ) -> veneer_error::Result<()> {
//! let loader = Arc::new(veneer_config::ConfigLoader::from_file("config.json")?);
//! let engine = Engine::new(loader, introspector, client, 16, Duration::from_secs(30))?;
//!
//! let request = GraphQLRequest {
//!     query: "query { book(id: 5) { id title } }".to_string(),
//!     ..GraphQLRequest::default()
//! };
//! let response = engine
//!     .execute_graphql(&request, &Principal::anonymous(), &CancellationToken::new())
//!     .await;
//! println!("{}", response.to_json());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod engine;
pub mod exec;
pub mod metadata;
pub mod plan;
pub mod schema;
pub mod shape;
pub mod sql;
pub mod testing;

pub use engine::{Engine, GraphQLRequest, GraphQLResponse, RestResponse};
