//! The request-translation engine.
//!
//! [`Engine`] wires the pipeline together: it captures one config snapshot
//! per request, synthesizes (and caches, per snapshot generation) the
//! GraphQL schema and REST route table, authorizes, plans, renders,
//! executes, and shapes. Every error is mapped at this boundary; in
//! production mode driver text is sanitized before it reaches a client.
//!
//! Resolver paths never mutate shared state: the per-snapshot caches are
//! built once under a lock and read through `Arc`s afterwards, so the host
//! GraphQL scheduler may invoke sibling resolutions concurrently.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use veneer_config::{ConfigLoader, HostMode, RuntimeConfig, SourceKind};
use veneer_error::{Result, VeneerError};

use crate::auth::Principal;
use crate::exec::{DatabaseClient, QueryExecutor, classify_driver_error};
use crate::metadata::{MetadataProvider, SchemaIntrospector};
use crate::plan::mutation::MutationPlan;
use crate::plan::query::{FieldSelection, Planner};
use crate::plan::{JsonShape, SqlQueryStructure, rest};
use crate::schema::routes::{self, RouteTable};
use crate::schema::{GatewaySchema, RootFieldKind, SchemaBuilder};
use crate::shape;
use crate::sql::{Dialect, SqlRenderer};

/// A GraphQL request body.
#[derive(Debug, Clone, Default)]
pub struct GraphQLRequest {
    /// The query document.
    pub query: String,
    /// Variable values.
    pub variables: Map<String, Value>,
    /// Operation to run when the document holds several.
    pub operation_name: Option<String>,
}

/// A GraphQL response: `data` plus standard-format errors.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQLResponse {
    /// The `data` object (`Value::Null` when the request failed).
    pub data: Value,
    /// Errors in the standard format with `{code, status}` extensions.
    pub errors: Vec<Value>,
}

impl GraphQLResponse {
    /// Serialize as the wire body.
    #[must_use]
    pub fn to_json(&self) -> Value {
        if self.errors.is_empty() {
            json!({ "data": self.data })
        } else {
            json!({ "data": self.data, "errors": self.errors })
        }
    }
}

/// A REST response: HTTP status plus JSON body (`Null` for 204).
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Value,
}

/// Per-snapshot derived state, rebuilt when the loader publishes a new
/// generation.
struct SnapshotState {
    generation: u64,
    config: Arc<RuntimeConfig>,
    metadata: Arc<MetadataProvider>,
    schema: Arc<GatewaySchema>,
    routes: Arc<RouteTable>,
}

/// The engine.
pub struct Engine {
    loader: Arc<ConfigLoader>,
    introspector: Arc<dyn SchemaIntrospector>,
    executor: Arc<QueryExecutor>,
    renderer: SqlRenderer,
    state: tokio::sync::Mutex<Option<Arc<SnapshotState>>>,
}

impl Engine {
    /// Build an engine over a loader, a driver-supplied introspector, and a
    /// database client.
    ///
    /// # Errors
    ///
    /// `ErrorInInitialization` when the configured database kind has no SQL
    /// dialect.
    pub fn new(
        loader: Arc<ConfigLoader>,
        introspector: Arc<dyn SchemaIntrospector>,
        client: Arc<dyn DatabaseClient>,
        max_concurrency: usize,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let dialect = Dialect::for_kind(loader.current().data_source.database_type)?;
        Ok(Self {
            loader,
            introspector,
            executor: Arc::new(QueryExecutor::new(client, max_concurrency, timeout)),
            renderer: SqlRenderer::new(dialect),
            state: tokio::sync::Mutex::new(None),
        })
    }

    /// Whether introspection should be served, per config and host mode.
    #[must_use]
    pub fn introspection_allowed(&self) -> bool {
        let config = self.loader.current();
        config.runtime.graphql.allow_introspection
            || config.runtime.host.mode == HostMode::Development
    }

    /// The generated SDL for the current snapshot.
    ///
    /// # Errors
    ///
    /// Metadata failures surface as `ErrorInInitialization`.
    pub async fn sdl(&self) -> Result<String> {
        let state = self.snapshot().await?;
        Ok(state.schema.to_sdl())
    }

    /// Capture (or rebuild) the per-snapshot state.
    ///
    /// In-flight requests keep the `Arc` they captured; a reload only
    /// affects requests that start after it.
    async fn snapshot(&self) -> Result<Arc<SnapshotState>> {
        let generation = self.loader.generation();
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.generation == generation {
                return Ok(state.clone());
            }
            tracing::info!(generation, "rebuilding per-snapshot caches after reload");
        }

        let config = self.loader.current();
        let metadata = Arc::new(MetadataProvider::new(self.introspector.clone()));
        let schema = Arc::new(SchemaBuilder::build(&config, &metadata).await?);
        let routes = Arc::new(RouteTable::build(&config));
        let state = Arc::new(SnapshotState {
            generation,
            config,
            metadata,
            schema,
            routes,
        });
        *guard = Some(state.clone());
        Ok(state)
    }

    // =========================================================================
    // GraphQL surface
    // =========================================================================

    /// Execute a GraphQL request.
    pub async fn execute_graphql(
        &self,
        request: &GraphQLRequest,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> GraphQLResponse {
        match self.graphql_inner(request, principal, cancel).await {
            Ok(data) => GraphQLResponse {
                data,
                errors: Vec::new(),
            },
            Err(error) => {
                let error = self.boundary_error(error);
                GraphQLResponse {
                    data: Value::Null,
                    errors: vec![json!({
                        "message": error.to_string(),
                        "extensions": error.to_graphql_extensions(),
                    })],
                }
            }
        }
    }

    async fn graphql_inner(
        &self,
        request: &GraphQLRequest,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let state = self.snapshot().await?;
        if !state.config.runtime.graphql.enabled {
            return Err(VeneerError::bad_request("The GraphQL endpoint is disabled"));
        }

        let operation = parse_operation(request)?;
        enforce_depth_limit(&state.config, &operation.selections)?;

        let planner = Planner {
            config: &state.config,
            metadata: &state.metadata,
            principal,
        };

        let mut data = Map::new();
        match operation.kind {
            OperationKind::Query => {
                for field in &operation.selections {
                    let value = self
                        .resolve_query_field(&state, &planner, field, cancel)
                        .await?;
                    data.insert(field.output_key.clone(), value);
                }
            }
            OperationKind::Mutation => {
                if operation.selections.len() > 1 {
                    if !state.config.runtime.graphql.multiple_mutations {
                        return Err(VeneerError::bad_request(
                            "Multiple mutations per request are disabled",
                        ));
                    }
                    return self
                        .resolve_mutation_batch(&state, &planner, &operation.selections, cancel)
                        .await;
                }
                for field in &operation.selections {
                    let value = self
                        .resolve_mutation_field(&state, &planner, field, cancel)
                        .await?;
                    data.insert(field.output_key.clone(), value);
                }
            }
        }

        Ok(Value::Object(data))
    }

    async fn resolve_query_field(
        &self,
        state: &SnapshotState,
        planner: &Planner<'_>,
        field: &FieldSelection,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let root = state
            .schema
            .query_field(&field.name)
            .ok_or_else(|| {
                VeneerError::bad_request(format!("Unknown query field '{}'", field.name))
            })?
            .clone();

        match root.kind {
            RootFieldKind::ByPk => {
                let plan = planner
                    .plan_by_pk(&root.entity, &field.arguments, &field.selections)
                    .await?;
                let raw = self.run_query(&plan, &root.entity, cancel).await?;
                shape::shape_object(raw, &plan)
            }
            RootFieldKind::List => {
                self.resolve_list_field(state, planner, &root.entity, field, cancel)
                    .await
            }
            RootFieldKind::Execute => {
                let plan = planner.plan_execute(&root.entity, &field.arguments).await?;
                let rendered = self.renderer.render_execute(&plan);
                self.executor
                    .query_json(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &root.entity))
            }
            _ => Err(VeneerError::bad_request(format!(
                "'{}' is a mutation field",
                field.name
            ))),
        }
    }

    /// Resolve a paged list field, including its optional `groupBy`.
    async fn resolve_list_field(
        &self,
        state: &SnapshotState,
        planner: &Planner<'_>,
        entity: &str,
        field: &FieldSelection,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let (group_by, connection_selection): (Vec<_>, Vec<_>) = field
            .selections
            .iter()
            .cloned()
            .partition(|f| f.name == "groupBy");

        let mut connection = Map::new();

        if !connection_selection.is_empty() {
            let plan = planner
                .plan_list(entity, &field.arguments, &connection_selection)
                .await?;
            let raw = self.run_query(&plan, entity, cancel).await?;
            let page = shape::shape_list(raw, &plan)?;
            let fields = plan.connection.unwrap_or_default();
            if let Value::Object(rendered) = shape::connection_value(&page, fields) {
                connection.extend(rendered);
            }
        }

        for group_field in &group_by {
            if !state.schema.aggregations_enabled {
                return Err(VeneerError::bad_request(
                    "groupBy is not available on this backend",
                ));
            }
            // The list filter applies to the aggregation too.
            let mut arguments = group_field.arguments.clone();
            if let Some(filter) = field.arguments.get("filter") {
                arguments.entry("filter".to_string()).or_insert(filter.clone());
            }
            let plan = planner.plan_group_by(entity, &arguments).await?;
            let rendered = self.renderer.render_aggregate(&plan)?;
            let raw = self
                .executor
                .query_json(&rendered, cancel)
                .await
                .map_err(|e| classify_driver_error(e, entity))?;
            connection.insert(group_field.output_key.clone(), shape::shape_group_by(raw, &plan)?);
        }

        Ok(Value::Object(connection))
    }

    async fn resolve_mutation_field(
        &self,
        state: &SnapshotState,
        planner: &Planner<'_>,
        field: &FieldSelection,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let root = state
            .schema
            .mutation_field(&field.name)
            .ok_or_else(|| {
                VeneerError::bad_request(format!("Unknown mutation field '{}'", field.name))
            })?
            .clone();

        match root.kind {
            RootFieldKind::Create => {
                let item = object_argument(&field.arguments, "item")?;
                let plan = planner.plan_create(&root.entity, &item, true).await?;
                let key = self.run_mutation_returning_key(&plan, &root.entity, cancel).await?;
                self.reread(planner, &root.entity, &key, &field.selections, cancel)
                    .await
            }
            RootFieldKind::Update => {
                let item = object_argument(&field.arguments, "item")?;
                let key_arguments = non_item_arguments(&field.arguments);
                let plan = planner
                    .plan_update(&root.entity, &key_arguments, &item)
                    .await?;
                let rendered = self.renderer.render_mutation(&plan)?;
                let result = self
                    .executor
                    .execute(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &root.entity))?;
                if result.rows_affected == 0 {
                    return Err(self.zero_rows_verdict(state, &plan, cancel).await);
                }
                self.reread(planner, &root.entity, &key_arguments, &field.selections, cancel)
                    .await
            }
            RootFieldKind::Delete => {
                let key_arguments = non_item_arguments(&field.arguments);
                // Read the row first so the response can carry it; the
                // delete's own predicates decide whether it may go.
                let read_plan = planner
                    .plan_by_pk(&root.entity, &key_arguments, &field.selections)
                    .await?;
                let row = self.run_query(&read_plan, &root.entity, cancel).await?;
                let plan = planner.plan_delete(&root.entity, &key_arguments).await?;
                let rendered = self.renderer.render_mutation(&plan)?;
                let result = self
                    .executor
                    .execute(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &root.entity))?;
                if result.rows_affected == 0 {
                    return Err(self.zero_rows_verdict(state, &plan, cancel).await);
                }
                shape::shape_object(row, &read_plan)
            }
            RootFieldKind::Execute => {
                let plan = planner.plan_execute(&root.entity, &field.arguments).await?;
                let rendered = self.renderer.render_execute(&plan);
                self.executor
                    .query_json(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &root.entity))
            }
            _ => Err(VeneerError::bad_request(format!(
                "'{}' is a query field",
                field.name
            ))),
        }
    }

    /// Execute several root mutation fields in one transaction
    /// (all-or-nothing commit), then re-read each written row.
    ///
    /// Stored procedures cannot join a batch: their effects are opaque to
    /// the transaction bracket the driver provides.
    async fn resolve_mutation_batch(
        &self,
        state: &SnapshotState,
        planner: &Planner<'_>,
        selections: &[FieldSelection],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut plans = Vec::with_capacity(selections.len());
        for field in selections {
            let root = state
                .schema
                .mutation_field(&field.name)
                .ok_or_else(|| {
                    VeneerError::bad_request(format!("Unknown mutation field '{}'", field.name))
                })?
                .clone();
            let plan = match root.kind {
                RootFieldKind::Create => {
                    let item = object_argument(&field.arguments, "item")?;
                    planner.plan_create(&root.entity, &item, true).await?
                }
                RootFieldKind::Update => {
                    let item = object_argument(&field.arguments, "item")?;
                    planner
                        .plan_update(&root.entity, &non_item_arguments(&field.arguments), &item)
                        .await?
                }
                RootFieldKind::Delete => {
                    planner
                        .plan_delete(&root.entity, &non_item_arguments(&field.arguments))
                        .await?
                }
                _ => {
                    return Err(VeneerError::bad_request(format!(
                        "'{}' cannot be part of a multi-mutation transaction",
                        field.name
                    )));
                }
            };
            // Deleted rows are read up front; there is nothing left to
            // re-read after the transaction commits.
            let preread = if root.kind == RootFieldKind::Delete {
                let read_plan = planner
                    .plan_by_pk(
                        &root.entity,
                        &non_item_arguments(&field.arguments),
                        &field.selections,
                    )
                    .await?;
                let raw = self.run_query(&read_plan, &root.entity, cancel).await?;
                Some(shape::shape_object(raw, &read_plan)?)
            } else {
                None
            };
            plans.push((field, plan, preread));
        }

        let statements: Vec<_> = plans
            .iter()
            .map(|(_, plan, _)| self.renderer.render_mutation(plan))
            .collect::<Result<_>>()?;
        let results = self
            .executor
            .execute_batch(&statements, cancel)
            .await
            .map_err(|e| classify_driver_error(e, &plans[0].1.entity))?;

        let mut data = Map::new();
        for ((field, plan, preread), result) in plans.iter().zip(results) {
            if plan.kind != crate::plan::mutation::MutationKind::Create
                && result.rows_affected == 0
            {
                return Err(self.zero_rows_verdict(state, plan, cancel).await);
            }
            let value = match plan.kind {
                crate::plan::mutation::MutationKind::Delete => {
                    preread.clone().unwrap_or(Value::Null)
                }
                _ => {
                    let key = match result.returned_keys {
                        Some(Value::Object(keys)) => keys,
                        _ => plan
                            .key
                            .iter()
                            .map(|a| (a.column.clone(), a.value.clone()))
                            .chain(plan.assignments.iter().filter_map(|a| {
                                plan.primary_key
                                    .contains(&a.column)
                                    .then(|| (a.column.clone(), a.value.clone()))
                            }))
                            .collect(),
                    };
                    self.reread(planner, &plan.entity, &key, &field.selections, cancel)
                        .await?
                }
            };
            data.insert(field.output_key.clone(), value);
        }
        Ok(Value::Object(data))
    }

    /// Run a mutation and recover the row's primary key for the follow-up
    /// read: RETURNING/OUTPUT keys win, body-supplied keys otherwise.
    async fn run_mutation_returning_key(
        &self,
        plan: &MutationPlan,
        entity: &str,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>> {
        let rendered = self.renderer.render_mutation(plan)?;
        let result = self
            .executor
            .execute(&rendered, cancel)
            .await
            .map_err(|e| classify_driver_error(e, entity))?;

        if let Some(Value::Object(keys)) = result.returned_keys {
            return Ok(keys);
        }
        let mut keys = Map::new();
        for pk in &plan.primary_key {
            if let Some(assignment) = plan.assignments.iter().find(|a| &a.column == pk) {
                keys.insert(pk.clone(), assignment.value.clone());
            }
        }
        if keys.len() == plan.primary_key.len() {
            Ok(keys)
        } else {
            Err(VeneerError::internal(
                "driver reported no generated keys for the inserted row",
            ))
        }
    }

    /// Re-read a written row through the read path so nested selections and
    /// masks resolve like any query.
    async fn reread(
        &self,
        planner: &Planner<'_>,
        entity: &str,
        key: &Map<String, Value>,
        selections: &[FieldSelection],
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let plan = planner.plan_by_pk(entity, key, selections).await?;
        let raw = self.run_query(&plan, entity, cancel).await?;
        shape::shape_object(raw, &plan)
    }

    /// Zero affected rows: `EntityNotFound` in production. Development runs
    /// a key-only probe (no policy) to distinguish a row the policy hides.
    async fn zero_rows_verdict(
        &self,
        state: &SnapshotState,
        plan: &MutationPlan,
        cancel: &CancellationToken,
    ) -> VeneerError {
        if state.config.runtime.host.mode == HostMode::Production {
            return VeneerError::not_found(&plan.entity);
        }

        let mut probe = SqlQueryStructure::new(&plan.entity, &plan.source, JsonShape::Object);
        for assignment in &plan.key {
            probe.project(&assignment.column, &assignment.column, true);
            probe.predicates.push(crate::plan::Predicate::Compare {
                column: assignment.column.clone(),
                op: crate::plan::CompareOp::Eq,
                value: assignment.value.clone(),
                db_type: assignment.db_type,
            });
        }
        match self.run_query(&probe, &plan.entity, cancel).await {
            Ok(Value::Null) | Err(_) => VeneerError::not_found(&plan.entity),
            Ok(_) => VeneerError::forbidden(format!(
                "The row exists but the policy for this role does not permit writing it \
                 (entity '{}')",
                plan.entity
            )),
        }
    }

    async fn run_query(
        &self,
        plan: &SqlQueryStructure,
        entity: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let rendered = self.renderer.render_query(plan)?;
        tracing::debug!(entity, sql = %rendered.sql, params = rendered.params.len(), "executing query");
        self.executor
            .query_json(&rendered, cancel)
            .await
            .map_err(|e| classify_driver_error(e, entity))
    }

    fn boundary_error(&self, error: VeneerError) -> VeneerError {
        if self.loader.current().runtime.host.mode == HostMode::Production {
            error.sanitized()
        } else {
            error
        }
    }

    // =========================================================================
    // REST surface
    // =========================================================================

    /// Execute a REST request.
    pub async fn execute_rest(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        body: Option<&Value>,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> RestResponse {
        match self
            .rest_inner(method, path, query_string, body, principal, cancel)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                let error = self.boundary_error(error);
                RestResponse {
                    status: error.status(),
                    body: error.to_rest_body(),
                }
            }
        }
    }

    async fn rest_inner(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        body: Option<&Value>,
        principal: &Principal,
        cancel: &CancellationToken,
    ) -> Result<RestResponse> {
        let state = self.snapshot().await?;
        if !state.config.runtime.rest.enabled {
            return Err(VeneerError::bad_request("The REST endpoint is disabled"));
        }

        let matched = state.routes.resolve(path)?;
        routes::check_entity_method(&state.config, &matched.entity, method)?;
        let entity_name = matched.entity.clone();

        let planner = Planner {
            config: &state.config,
            metadata: &state.metadata,
            principal,
        };

        let entity = state
            .config
            .entity(&entity_name)
            .ok_or_else(|| VeneerError::not_found(&entity_name))?;
        if entity.source.kind() == SourceKind::StoredProcedure {
            let parameters = match body {
                Some(Value::Object(map)) => map.clone(),
                None => Map::new(),
                Some(_) => {
                    return Err(VeneerError::bad_request("Request body must be a JSON object"));
                }
            };
            let plan = planner.plan_execute(&entity_name, &parameters).await?;
            let rendered = self.renderer.render_execute(&plan);
            let value = self
                .executor
                .query_json(&rendered, cancel)
                .await
                .map_err(|e| classify_driver_error(e, &entity_name))?;
            return Ok(RestResponse {
                status: 200,
                body: json!({ "value": value }),
            });
        }

        match method.to_ascii_uppercase().as_str() {
            "GET" => {
                self.rest_read(&state, &planner, &entity_name, &matched.key_segments, path, query_string, cancel)
                    .await
            }
            "POST" => {
                let item = body_object(body)?;
                let strict = state.config.runtime.rest.request_body_strict;
                let plan = planner.plan_create(&entity_name, &item, strict).await?;
                let key = self
                    .run_mutation_returning_key(&plan, &entity_name, cancel)
                    .await?;
                let row = self.rest_reread(&planner, &entity_name, &key, cancel).await?;
                Ok(RestResponse {
                    status: 201,
                    body: json!({ "value": [row] }),
                })
            }
            "PUT" | "PATCH" => {
                let item = body_object(body)?;
                let shape_info = state.metadata.describe(&state.config, &entity_name).await?;
                let key = rest::parse_key_segments(&matched.key_segments, &shape_info)?;
                let plan = planner
                    .plan_upsert(&entity_name, &key, &item, method.eq_ignore_ascii_case("PATCH"))
                    .await?;
                let rendered = self.renderer.render_mutation(&plan)?;
                self.executor
                    .execute(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &entity_name))?;
                let row = self.rest_reread(&planner, &entity_name, &key, cancel).await?;
                Ok(RestResponse {
                    status: 200,
                    body: json!({ "value": [row] }),
                })
            }
            "DELETE" => {
                let shape_info = state.metadata.describe(&state.config, &entity_name).await?;
                let key = rest::parse_key_segments(&matched.key_segments, &shape_info)?;
                let plan = planner.plan_delete(&entity_name, &key).await?;
                let rendered = self.renderer.render_mutation(&plan)?;
                let result = self
                    .executor
                    .execute(&rendered, cancel)
                    .await
                    .map_err(|e| classify_driver_error(e, &entity_name))?;
                if result.rows_affected == 0 {
                    return Err(self.zero_rows_verdict(&state, &plan, cancel).await);
                }
                Ok(RestResponse {
                    status: 204,
                    body: Value::Null,
                })
            }
            other => Err(VeneerError::bad_request(format!(
                "Method '{other}' is not supported"
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)] // request context arrives as parts
    async fn rest_read(
        &self,
        state: &SnapshotState,
        planner: &Planner<'_>,
        entity_name: &str,
        key_segments: &[&str],
        path: &str,
        query_string: &str,
        cancel: &CancellationToken,
    ) -> Result<RestResponse> {
        let parsed = rest::parse_query_string(query_string)?;

        if key_segments.is_empty() {
            let plan = planner
                .plan_rest_collection(
                    entity_name,
                    parsed.select.as_deref(),
                    parsed.filter.as_deref(),
                    &parsed.order,
                    parsed.first,
                    parsed.after.as_deref(),
                )
                .await?;
            let raw = self.run_query(&plan, entity_name, cancel).await?;
            let page = shape::shape_list(raw, &plan)?;
            let next_link = page
                .end_cursor
                .as_ref()
                .map(|cursor| next_link(path, query_string, cursor));
            return Ok(RestResponse {
                status: 200,
                body: shape::rest_envelope(&page, next_link),
            });
        }

        let shape_info = state.metadata.describe(&state.config, entity_name).await?;
        let key = rest::parse_key_segments(key_segments, &shape_info)?;
        let plan = planner
            .plan_rest_by_pk(entity_name, &key, parsed.select.as_deref())
            .await?;
        let raw = self.run_query(&plan, entity_name, cancel).await?;
        let row = shape::shape_object(raw, &plan)?;
        if row.is_null() {
            return Err(VeneerError::not_found(entity_name));
        }
        Ok(RestResponse {
            status: 200,
            body: json!({ "value": [row] }),
        })
    }

    async fn rest_reread(
        &self,
        planner: &Planner<'_>,
        entity: &str,
        key: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let plan = planner.plan_rest_by_pk(entity, key, None).await?;
        let raw = self.run_query(&plan, entity, cancel).await?;
        let row = shape::shape_object(raw, &plan)?;
        if row.is_null() {
            return Err(VeneerError::not_found(entity));
        }
        Ok(row)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.renderer.dialect().kind)
            .finish_non_exhaustive()
    }
}

/// Rebuild the query string with the page cursor swapped in.
fn next_link(path: &str, query_string: &str, cursor: &str) -> String {
    let mut parts: Vec<String> = query_string
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with("%24after=") && !p.starts_with("$after="))
        .map(str::to_string)
        .collect();
    parts.push(format!("$after={cursor}"));
    format!("{path}?{}", parts.join("&"))
}

fn body_object(body: Option<&Value>) -> Result<Map<String, Value>> {
    match body {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(VeneerError::bad_request("Request body must be a JSON object")),
    }
}

fn object_argument(arguments: &Map<String, Value>, name: &str) -> Result<Map<String, Value>> {
    match arguments.get(name) {
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(VeneerError::bad_request(format!(
            "Argument '{name}' must be an input object"
        ))),
    }
}

fn non_item_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    arguments
        .iter()
        .filter(|(k, _)| k.as_str() != "item")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// =============================================================================
// GraphQL document handling
// =============================================================================

#[derive(Debug)]
enum OperationKind {
    Query,
    Mutation,
}

#[derive(Debug)]
struct ParsedOperation {
    kind: OperationKind,
    selections: Vec<FieldSelection>,
}

/// Parse the document, pick the operation, bind variables, flatten
/// fragments.
fn parse_operation(request: &GraphQLRequest) -> Result<ParsedOperation> {
    use graphql_parser::query::{Definition, OperationDefinition};

    let document = graphql_parser::parse_query::<String>(&request.query)
        .map_err(|e| VeneerError::bad_request(format!("GraphQL parse error: {e}")))?;

    let mut fragments = std::collections::HashMap::new();
    for definition in &document.definitions {
        if let Definition::Fragment(fragment) = definition {
            fragments.insert(fragment.name.clone(), fragment);
        }
    }

    let mut chosen = None;
    for definition in &document.definitions {
        let Definition::Operation(operation) = definition else {
            continue;
        };
        let name = match operation {
            OperationDefinition::Query(q) => q.name.as_deref(),
            OperationDefinition::Mutation(m) => m.name.as_deref(),
            OperationDefinition::SelectionSet(_) => None,
            OperationDefinition::Subscription(_) => {
                return Err(VeneerError::bad_request("Subscriptions are not supported"));
            }
        };
        let matches = match (&request.operation_name, name) {
            (Some(requested), Some(name)) => requested == name,
            (Some(_), None) => false,
            (None, _) => true,
        };
        if matches {
            if chosen.is_some() && request.operation_name.is_none() {
                return Err(VeneerError::bad_request(
                    "operationName is required when the document holds several operations",
                ));
            }
            chosen = Some(operation);
        }
    }

    let operation = chosen.ok_or_else(|| {
        VeneerError::bad_request("No matching operation found in the document")
    })?;

    let (kind, selection_set) = match operation {
        OperationDefinition::Query(q) => (OperationKind::Query, &q.selection_set),
        OperationDefinition::SelectionSet(set) => (OperationKind::Query, set),
        OperationDefinition::Mutation(m) => (OperationKind::Mutation, &m.selection_set),
        OperationDefinition::Subscription(_) => {
            return Err(VeneerError::bad_request("Subscriptions are not supported"));
        }
    };

    let selections = convert_selection_set(selection_set, &request.variables, &fragments)?;
    Ok(ParsedOperation { kind, selections })
}

fn convert_selection_set(
    set: &graphql_parser::query::SelectionSet<'_, String>,
    variables: &Map<String, Value>,
    fragments: &std::collections::HashMap<
        String,
        &graphql_parser::query::FragmentDefinition<'_, String>,
    >,
) -> Result<Vec<FieldSelection>> {
    use graphql_parser::query::Selection;

    let mut fields = Vec::new();
    for selection in &set.items {
        match selection {
            Selection::Field(field) => {
                if field.name == "__typename" {
                    continue;
                }
                let mut arguments = Map::new();
                for (name, value) in &field.arguments {
                    arguments.insert(name.clone(), convert_value(value, variables)?);
                }
                fields.push(FieldSelection {
                    output_key: field.alias.clone().unwrap_or_else(|| field.name.clone()),
                    name: field.name.clone(),
                    arguments,
                    selections: convert_selection_set(&field.selection_set, variables, fragments)?,
                });
            }
            Selection::FragmentSpread(spread) => {
                let fragment = fragments.get(&spread.fragment_name).ok_or_else(|| {
                    VeneerError::bad_request(format!(
                        "Unknown fragment '{}'",
                        spread.fragment_name
                    ))
                })?;
                fields.extend(convert_selection_set(
                    &fragment.selection_set,
                    variables,
                    fragments,
                )?);
            }
            Selection::InlineFragment(inline) => {
                fields.extend(convert_selection_set(
                    &inline.selection_set,
                    variables,
                    fragments,
                )?);
            }
        }
    }
    Ok(fields)
}

fn convert_value(
    value: &graphql_parser::query::Value<'_, String>,
    variables: &Map<String, Value>,
) -> Result<Value> {
    use graphql_parser::query::Value as GqlValue;

    Ok(match value {
        GqlValue::Variable(name) => variables.get(name).cloned().ok_or_else(|| {
            VeneerError::bad_request(format!("Variable '${name}' was not provided"))
        })?,
        GqlValue::Int(n) => n
            .as_i64()
            .map(Value::from)
            .ok_or_else(|| VeneerError::bad_request("Integer literal out of range"))?,
        GqlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| VeneerError::bad_request("Float literal is not finite"))?,
        GqlValue::String(s) => Value::String(s.clone()),
        GqlValue::Boolean(b) => Value::Bool(*b),
        GqlValue::Null => Value::Null,
        GqlValue::Enum(name) => Value::String(name.clone()),
        GqlValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| convert_value(item, variables))
                .collect::<Result<_>>()?,
        ),
        GqlValue::Object(entries) => {
            let mut map = Map::new();
            for (key, entry) in entries {
                map.insert(key.clone(), convert_value(entry, variables)?);
            }
            Value::Object(map)
        }
    })
}

fn enforce_depth_limit(config: &RuntimeConfig, selections: &[FieldSelection]) -> Result<()> {
    let Some(limit) = config.runtime.graphql.depth_limit else {
        return Ok(());
    };
    if limit == -1 {
        return Ok(());
    }
    let depth = selections
        .iter()
        .map(FieldSelection::depth)
        .max()
        .unwrap_or(0);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    if depth > limit {
        return Err(VeneerError::bad_request(format!(
            "Query depth {depth} exceeds the configured limit of {limit}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_replaces_cursor() {
        let link = next_link("/api/Book", "$first=2&$after=old", "new");
        assert_eq!(link, "/api/Book?$first=2&$after=new");
    }

    #[test]
    fn parse_operation_binds_variables_and_aliases() {
        let request = GraphQLRequest {
            query: "query Q($id: Int!) { myBook: book(id: $id) { id title } }".to_string(),
            variables: serde_json::from_str(r#"{ "id": 5 }"#).expect("variables"),
            operation_name: None,
        };
        let operation = parse_operation(&request).expect("parses");
        assert_eq!(operation.selections.len(), 1);
        let field = &operation.selections[0];
        assert_eq!(field.name, "book");
        assert_eq!(field.output_key, "myBook");
        assert_eq!(field.arguments.get("id"), Some(&json!(5)));
        assert_eq!(field.selections.len(), 2);
    }

    #[test]
    fn parse_operation_flattens_fragments() {
        let request = GraphQLRequest {
            query: "query { book(id: 1) { ...core } } fragment core on Book { id title }"
                .to_string(),
            variables: Map::new(),
            operation_name: None,
        };
        let operation = parse_operation(&request).expect("parses");
        assert_eq!(operation.selections[0].selections.len(), 2);
    }

    #[test]
    fn missing_variable_is_bad_request() {
        let request = GraphQLRequest {
            query: "query Q($id: Int!) { book(id: $id) { id } }".to_string(),
            variables: Map::new(),
            operation_name: None,
        };
        let err = parse_operation(&request).expect_err("must fail");
        assert!(err.to_string().contains("$id"));
    }

    #[test]
    fn enum_values_arrive_as_strings() {
        let request = GraphQLRequest {
            query: "query { books(orderBy: { id: DESC }) { items { id } } }".to_string(),
            variables: Map::new(),
            operation_name: None,
        };
        let operation = parse_operation(&request).expect("parses");
        assert_eq!(
            operation.selections[0].arguments["orderBy"]["id"],
            json!("DESC")
        );
    }
}
