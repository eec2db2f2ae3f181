//! Read-path planning: selection sets to query trees.
//!
//! One planner walk produces the whole [`SqlQueryStructure`] tree for a
//! request: scalar selections become projected columns, relationship
//! selections become correlated child queries, filters and policies become
//! predicates, and pagination becomes an order key plus a keyset predicate.
//! Authorization runs for every entity the walk touches, each with its own
//! column mask and policy.

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use veneer_config::{ActionKind, Cardinality, Entity, RuntimeConfig};
use veneer_error::{Result, VeneerError};

use crate::auth::{self, Principal};
use crate::metadata::{MetadataProvider, TableShape, resolve_join};
use super::{
    ChildPlan, ConnectionFields, JsonShape, OrderDirection, OrderKey, Predicate,
    SqlQueryStructure, cursor, filter,
};

/// A resolved GraphQL field selection (aliases applied, variables bound,
/// fragments flattened). REST requests synthesize the same structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    /// Field name.
    pub name: String,

    /// Output key (the alias when one was given).
    pub output_key: String,

    /// Arguments with variables already substituted.
    pub arguments: Map<String, Value>,

    /// Nested selections.
    pub selections: Vec<FieldSelection>,
}

impl FieldSelection {
    /// Plain field without arguments or sub-selections.
    #[must_use]
    pub fn leaf(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output_key: name.to_string(),
            selections: Vec::new(),
            arguments: Map::new(),
        }
    }

    /// Nesting depth of this selection (a leaf is depth 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self
            .selections
            .iter()
            .map(FieldSelection::depth)
            .max()
            .unwrap_or(0)
    }
}

/// Read-path planner over one config snapshot.
pub struct Planner<'a> {
    /// The captured config snapshot.
    pub config: &'a RuntimeConfig,
    /// Per-snapshot metadata cache.
    pub metadata: &'a MetadataProvider,
    /// The authenticated caller.
    pub principal: &'a Principal,
}

impl Planner<'_> {
    /// Plan a by-primary-key read: `book(id: 5) { id title }`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for wrong key arguments, `AuthorizationFailed` per the
    /// entity's permissions.
    pub async fn plan_by_pk(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
        selection: &[FieldSelection],
    ) -> Result<SqlQueryStructure> {
        let (entity, shape) = self.describe(entity_name).await?;
        let key_predicates = primary_key_predicates(entity_name, &shape, key_arguments)?;

        let mut node = self
            .plan_node(entity_name, entity, &shape, selection, JsonShape::Object, None)
            .await?;
        node.predicates.extend(key_predicates);
        Ok(node)
    }

    /// Plan a paged list read from a connection selection:
    /// `books(first: 2, after: "...", filter: ..., orderBy: ...) { items { ... } hasNextPage endCursor }`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for invalid pagination arguments or filters,
    /// `AuthorizationFailed` per the entity's permissions.
    pub async fn plan_list(
        &self,
        entity_name: &str,
        arguments: &Map<String, Value>,
        connection_selection: &[FieldSelection],
    ) -> Result<SqlQueryStructure> {
        let (entity, shape) = self.describe(entity_name).await?;

        let (connection, item_selection) = split_connection(connection_selection)?;
        let mut node = self
            .plan_node(
                entity_name,
                entity,
                &shape,
                &item_selection,
                JsonShape::Array,
                Some(connection),
            )
            .await?;
        self.apply_page_arguments(&mut node, &shape, arguments)?;
        Ok(node)
    }

    /// Plan a REST collection read. `select` of `None` projects the whole
    /// authorized mask.
    ///
    /// # Errors
    ///
    /// As [`Self::plan_list`].
    pub async fn plan_rest_collection(
        &self,
        entity_name: &str,
        select: Option<&[String]>,
        filter_expression: Option<&str>,
        order: &[(String, OrderDirection)],
        first: Option<i64>,
        after: Option<&str>,
    ) -> Result<SqlQueryStructure> {
        let (entity, shape) = self.describe(entity_name).await?;

        let requested: Vec<String> = select.map(<[String]>::to_vec).unwrap_or_default();
        let decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Read,
            &requested,
        )?;

        let mut node = SqlQueryStructure::new(entity_name, entity.object(), JsonShape::Array);
        node.connection = Some(ConnectionFields {
            items: true,
            has_next_page: true,
            end_cursor: true,
        });

        let projected: Vec<String> = match select {
            Some(columns) => columns.to_vec(),
            None => decision.mask.iter().cloned().collect(),
        };
        for column in &projected {
            shape.column_type(column)?;
            node.project(column, column, true);
        }

        if let Some(expression) = filter_expression {
            node.predicates
                .push(super::rest::compile_filter(expression, &shape)?);
        }
        if let Some(policy) = decision.predicate {
            node.predicates.push(policy);
        }

        let mut arguments = Map::new();
        if !order.is_empty() {
            let mut order_object = Map::new();
            for (column, direction) in order {
                order_object.insert(
                    column.clone(),
                    Value::String(match direction {
                        OrderDirection::Asc => "ASC".to_string(),
                        OrderDirection::Desc => "DESC".to_string(),
                    }),
                );
            }
            arguments.insert("orderBy".to_string(), Value::Object(order_object));
        }
        if let Some(first) = first {
            arguments.insert("first".to_string(), Value::Number(first.into()));
        }
        if let Some(after) = after {
            arguments.insert("after".to_string(), Value::String(after.to_string()));
        }
        self.apply_page_arguments(&mut node, &shape, &arguments)?;
        Ok(node)
    }

    /// Plan a REST by-primary-key read.
    ///
    /// # Errors
    ///
    /// As [`Self::plan_by_pk`].
    pub async fn plan_rest_by_pk(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
        select: Option<&[String]>,
    ) -> Result<SqlQueryStructure> {
        let (entity, shape) = self.describe(entity_name).await?;

        let requested: Vec<String> = select.map(<[String]>::to_vec).unwrap_or_default();
        let decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Read,
            &requested,
        )?;

        let mut node = SqlQueryStructure::new(entity_name, entity.object(), JsonShape::Object);
        let projected: Vec<String> = match select {
            Some(columns) => columns.to_vec(),
            None => decision.mask.iter().cloned().collect(),
        };
        for column in &projected {
            shape.column_type(column)?;
            node.project(column, column, true);
        }
        node.predicates
            .extend(primary_key_predicates(entity_name, &shape, key_arguments)?);
        if let Some(policy) = decision.predicate {
            node.predicates.push(policy);
        }
        Ok(node)
    }

    async fn describe(&self, entity_name: &str) -> Result<(&Entity, std::sync::Arc<TableShape>)> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;
        Ok((entity, shape))
    }

    /// Compile one entity node from an item selection: projection,
    /// authorization, and nested navigations.
    fn plan_node<'s>(
        &'s self,
        entity_name: &'s str,
        entity: &'s Entity,
        shape: &'s TableShape,
        selection: &'s [FieldSelection],
        node_shape: JsonShape,
        connection: Option<ConnectionFields>,
    ) -> BoxFuture<'s, Result<SqlQueryStructure>> {
        Box::pin(async move {
            let mut scalar_fields = Vec::new();
            let mut navigation_fields = Vec::new();
            for field in selection {
                if shape.column(&field.name).is_some() {
                    scalar_fields.push(field);
                } else if entity.relationships.contains_key(&field.name) {
                    navigation_fields.push(field);
                } else {
                    return Err(VeneerError::bad_request(format!(
                        "Unknown field '{}' on entity '{entity_name}'",
                        field.name
                    )));
                }
            }

            let requested: Vec<String> =
                scalar_fields.iter().map(|f| f.name.clone()).collect();
            let decision = auth::authorize(
                entity_name,
                entity,
                shape,
                self.principal,
                ActionKind::Read,
                &requested,
            )?;

            let mut node =
                SqlQueryStructure::new(entity_name, entity.object(), node_shape);
            node.connection = connection;
            for field in &scalar_fields {
                node.project(&field.name, &field.output_key, true);
            }
            if let Some(policy) = decision.predicate {
                node.predicates.push(policy);
            }

            for field in navigation_fields {
                let child = self.plan_navigation(entity, shape, field).await?;
                node.children.push(child);
            }

            Ok(node)
        })
    }

    async fn plan_navigation(
        &self,
        entity: &Entity,
        shape: &TableShape,
        field: &FieldSelection,
    ) -> Result<ChildPlan> {
        // Presence was checked during field classification.
        let relationship = entity
            .relationships
            .get(&field.name)
            .ok_or_else(|| VeneerError::internal("navigation field vanished"))?;
        let target_name = relationship.target_entity.as_str();
        let (target_entity, target_shape) = self.describe(target_name).await?;

        let join = resolve_join(
            &field.name,
            relationship,
            entity.object(),
            shape,
            target_entity.object(),
            &target_shape,
        )?;

        let plan = match relationship.cardinality {
            Cardinality::One => {
                self.plan_node(
                    target_name,
                    target_entity,
                    &target_shape,
                    &field.selections,
                    JsonShape::Object,
                    None,
                )
                .await?
            }
            Cardinality::Many => {
                let (connection, item_selection) = split_connection(&field.selections)?;
                let mut child = self
                    .plan_node(
                        target_name,
                        target_entity,
                        &target_shape,
                        &item_selection,
                        JsonShape::Array,
                        Some(connection),
                    )
                    .await?;
                self.apply_page_arguments(&mut child, &target_shape, &field.arguments)?;
                child
            }
        };

        Ok(ChildPlan {
            field: field.output_key.clone(),
            join,
            plan,
        })
    }

    /// Apply `filter`, `orderBy`, `first`, and `after` to a list node.
    fn apply_page_arguments(
        &self,
        node: &mut SqlQueryStructure,
        shape: &TableShape,
        arguments: &Map<String, Value>,
    ) -> Result<()> {
        if let Some(filter_value) = arguments.get("filter") {
            if let Some(predicate) = filter::compile(filter_value, shape)? {
                node.predicates.push(predicate);
            }
        }

        node.order_by = order_key(arguments.get("orderBy"), shape)?;

        let first = match arguments.get("first") {
            None => None,
            Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| {
                VeneerError::bad_request("'first' must be an integer")
            })?),
            Some(_) => return Err(VeneerError::bad_request("'first' must be an integer")),
        };
        node.page_size = Some(cursor::page_size(first)?);

        if let Some(after) = arguments.get("after") {
            let token = after
                .as_str()
                .ok_or_else(|| VeneerError::bad_request("'after' must be a string"))?;
            let elements = cursor::decode(token, &node.order_by)?;
            node.predicates
                .push(cursor::keyset_predicate(&elements, &node.order_by));
        }

        // Order-key columns are needed to encode endCursor; project them and
        // let the response shaper strip the ones the caller did not select.
        let order_by_columns: Vec<String> = node.order_by.iter().map(|key| key.column.clone()).collect();
        for column in &order_by_columns {
            node.project(column, column, false);
        }
        Ok(())
    }
}

/// Build the effective order key: the caller's `orderBy` with the primary
/// key appended as a tie-breaker wherever it is not already present.
///
/// Ordering is a metadata operation: columns outside the caller's mask are
/// accepted here and never surfaced in the output.
fn order_key(order_by: Option<&Value>, shape: &TableShape) -> Result<Vec<OrderKey>> {
    let mut keys = Vec::new();

    if let Some(value) = order_by {
        let Value::Object(entries) = value else {
            return Err(VeneerError::bad_request("'orderBy' must be an input object"));
        };
        for (column, direction) in entries {
            let db_type = shape.column_type(column)?;
            let direction = match direction.as_str() {
                Some("ASC") => OrderDirection::Asc,
                Some("DESC") => OrderDirection::Desc,
                _ => {
                    return Err(VeneerError::bad_request(format!(
                        "'orderBy.{column}' must be ASC or DESC"
                    )));
                }
            };
            keys.push(OrderKey {
                column: column.clone(),
                direction,
                db_type,
            });
        }
    }

    for pk_column in &shape.primary_key {
        if !keys.iter().any(|k| &k.column == pk_column) {
            keys.push(OrderKey {
                column: pk_column.clone(),
                direction: OrderDirection::Asc,
                db_type: shape.column_type(pk_column)?,
            });
        }
    }

    Ok(keys)
}

/// Split a connection selection into its flags and the `items` selection.
fn split_connection(
    selection: &[FieldSelection],
) -> Result<(ConnectionFields, Vec<FieldSelection>)> {
    let mut connection = ConnectionFields::default();
    let mut items = Vec::new();

    for field in selection {
        match field.name.as_str() {
            "items" => {
                connection.items = true;
                items = field.selections.clone();
            }
            "hasNextPage" => connection.has_next_page = true,
            "endCursor" => connection.end_cursor = true,
            other => {
                return Err(VeneerError::bad_request(format!(
                    "Unknown connection field '{other}'"
                )));
            }
        }
    }

    Ok((connection, items))
}

/// Compile by-primary-key arguments into equality predicates.
///
/// Every key column must be supplied, and nothing else.
pub fn primary_key_predicates(
    entity_name: &str,
    shape: &TableShape,
    key_arguments: &Map<String, Value>,
) -> Result<Vec<Predicate>> {
    if shape.primary_key.is_empty() {
        return Err(VeneerError::bad_request(format!(
            "Entity '{entity_name}' has no primary key"
        )));
    }

    let mut predicates = Vec::with_capacity(shape.primary_key.len());
    for pk_column in &shape.primary_key {
        let value = key_arguments.get(pk_column).ok_or_else(|| {
            VeneerError::bad_request(format!(
                "Primary-key column '{pk_column}' is required"
            ))
        })?;
        predicates.push(Predicate::Compare {
            column: pk_column.clone(),
            op: super::CompareOp::Eq,
            value: value.clone(),
            db_type: shape.column_type(pk_column)?,
        });
    }

    for supplied in key_arguments.keys() {
        if !shape.primary_key.contains(supplied) {
            return Err(VeneerError::bad_request(format!(
                "'{supplied}' is not a primary-key column of '{entity_name}'"
            )));
        }
    }

    Ok(predicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use crate::metadata::MetadataProvider;
    use crate::testing::{test_config, CannedIntrospector};
    use serde_json::json;
    use std::sync::Arc;

    fn selection(fields: &[&str]) -> Vec<FieldSelection> {
        fields.iter().map(|f| FieldSelection::leaf(f)).collect()
    }

    fn connection_selection(item_fields: &[&str]) -> Vec<FieldSelection> {
        vec![
            FieldSelection {
                name: "items".to_string(),
                output_key: "items".to_string(),
                arguments: Map::new(),
                selections: selection(item_fields),
            },
            FieldSelection::leaf("hasNextPage"),
            FieldSelection::leaf("endCursor"),
        ]
    }

    fn planner_fixture() -> (veneer_config::RuntimeConfig, MetadataProvider, Principal) {
        (
            test_config(),
            MetadataProvider::new(Arc::new(CannedIntrospector::default())),
            Principal::anonymous(),
        )
    }

    #[tokio::test]
    async fn by_pk_plan_projects_and_filters() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        let mut args = Map::new();
        args.insert("id".to_string(), json!(5));
        let plan = planner
            .plan_by_pk("Book", &args, &selection(&["id", "title"]))
            .await
            .expect("plans");

        assert_eq!(plan.shape, JsonShape::Object);
        assert_eq!(plan.columns.len(), 2);
        assert!(matches!(
            &plan.predicates[..],
            [Predicate::Compare { column, .. }] if column == "id"
        ));
    }

    #[tokio::test]
    async fn missing_pk_argument_is_bad_request() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };
        let err = planner
            .plan_by_pk("Book", &Map::new(), &selection(&["id"]))
            .await
            .expect_err("must fail");
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn unknown_field_is_bad_request() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };
        let err = planner
            .plan_list("Book", &Map::new(), &connection_selection(&["id", "nope"]))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("'nope'"));
    }

    #[tokio::test]
    async fn list_plan_appends_pk_tiebreaker_and_probe() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        let mut args = Map::new();
        args.insert("first".to_string(), json!(2));
        args.insert("orderBy".to_string(), json!({ "year": "DESC" }));
        let plan = planner
            .plan_list("Book", &args, &connection_selection(&["id"]))
            .await
            .expect("plans");

        assert_eq!(plan.page_size, Some(2));
        assert_eq!(plan.fetch_limit(), Some(3));
        assert_eq!(plan.order_by.len(), 2);
        assert_eq!(plan.order_by[0].column, "year");
        assert_eq!(plan.order_by[1].column, "id");
        // year is force-projected for the cursor but not requested.
        let year = plan
            .columns
            .iter()
            .find(|c| c.column == "year")
            .expect("year projected");
        assert!(!year.requested);
    }

    #[tokio::test]
    async fn order_by_outside_mask_is_accepted() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        // 'ssn' is excluded from the anonymous mask but ordering by it is a
        // metadata operation.
        let mut args = Map::new();
        args.insert("orderBy".to_string(), json!({ "ssn": "ASC" }));
        let plan = planner
            .plan_list("Book", &args, &connection_selection(&["id"]))
            .await
            .expect("plans");
        assert_eq!(plan.order_by[0].column, "ssn");
    }

    #[tokio::test]
    async fn nested_to_many_becomes_child_plan() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        let mut args = Map::new();
        args.insert("id".to_string(), json!(1));
        let nav = FieldSelection {
            name: "books".to_string(),
            output_key: "books".to_string(),
            arguments: Map::new(),
            selections: connection_selection(&["id", "title"]),
        };
        let mut fields = selection(&["name"]);
        fields.push(nav);

        let plan = planner
            .plan_by_pk("Publisher", &args, &fields)
            .await
            .expect("plans");

        assert_eq!(plan.children.len(), 1);
        let child = &plan.children[0];
        assert_eq!(child.field, "books");
        assert_eq!(child.plan.entity, "Book");
        assert_eq!(child.plan.shape, JsonShape::Array);
        assert_eq!(
            child.join.pairs,
            vec![("id".to_string(), "publisher_id".to_string())]
        );
    }

    #[tokio::test]
    async fn nested_entity_uses_its_own_authorization() {
        let (config, metadata, _) = planner_fixture();
        // 'restricted' may read Publisher but has no Book permission.
        let principal = Principal {
            role: "restricted".to_string(),
            claims: std::collections::HashMap::new(),
        };
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        let mut args = Map::new();
        args.insert("id".to_string(), json!(1));
        let nav = FieldSelection {
            name: "books".to_string(),
            output_key: "books".to_string(),
            arguments: Map::new(),
            selections: connection_selection(&["id"]),
        };

        let err = planner
            .plan_by_pk("Publisher", &args, &[nav])
            .await
            .expect_err("child must be denied");
        assert_eq!(err.status(), 403);
    }

    #[tokio::test]
    async fn cursor_against_changed_order_is_rejected() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };

        // Mint a cursor under orderBy {year DESC, id ASC}...
        let order = vec![
            OrderKey {
                column: "year".to_string(),
                direction: OrderDirection::Desc,
                db_type: crate::metadata::DbType::Int,
            },
            OrderKey {
                column: "id".to_string(),
                direction: OrderDirection::Asc,
                db_type: crate::metadata::DbType::Int,
            },
        ];
        let token = cursor::encode(&json!({ "year": 2001, "id": 7 }), &order).expect("encodes");

        // ...then replay it under the default ordering.
        let mut args = Map::new();
        args.insert("after".to_string(), json!(token));
        let err = planner
            .plan_list("Book", &args, &connection_selection(&["id"]))
            .await
            .expect_err("must fail");
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn first_above_cap_is_rejected() {
        let (config, metadata, principal) = planner_fixture();
        let planner = Planner {
            config: &config,
            metadata: &metadata,
            principal: &principal,
        };
        let mut args = Map::new();
        args.insert("first".to_string(), json!(5000));
        let err = planner
            .plan_list("Book", &args, &connection_selection(&["id"]))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("1000"));
    }
}
