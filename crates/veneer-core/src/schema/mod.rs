//! GraphQL schema synthesis.
//!
//! From the entity catalog and the discovered table shapes this module
//! derives the whole GraphQL surface: one object type per entity, filter
//! and orderBy inputs, connection types with pagination and groupBy,
//! create/update inputs, root query and mutation fields, and navigation
//! fields for relationships. [`GatewaySchema::to_sdl`] renders the surface
//! deterministically: two engines fed byte-identical configs print
//! byte-identical SDL.
//!
//! The REST side of synthesis lives in [`routes`].

pub mod routes;

use indexmap::IndexMap;
use veneer_config::{ActionKind, GraphQLOperation, RuntimeConfig};
use veneer_error::{Result, VeneerError};

use crate::metadata::{MetadataProvider, TableShape};

/// A synthesized scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnField {
    /// Column / field name.
    pub name: String,
    /// GraphQL scalar name.
    pub graphql_type: &'static str,
    /// Whether the field may be null.
    pub nullable: bool,
    /// Auto-generated columns are excluded from create input types.
    pub auto_generated: bool,
}

/// A synthesized navigation field.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipField {
    /// Field name (the relationship name from the config).
    pub name: String,
    /// Target entity logical name.
    pub target_entity: String,
    /// True for to-many (connection-typed) navigations.
    pub many: bool,
}

/// Which mutations an entity's permissions admit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationSurface {
    /// Some role may create.
    pub create: bool,
    /// Some role may update.
    pub update: bool,
    /// Some role may delete.
    pub delete: bool,
}

/// A stored procedure's synthesized root field.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureField {
    /// Root field name (`executeTopSellers`).
    pub field_name: String,
    /// Query or mutation mount point.
    pub operation: GraphQLOperation,
    /// Parameter names with GraphQL types.
    pub parameters: Vec<(String, &'static str)>,
}

/// Everything synthesized for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Logical entity name.
    pub entity: String,
    /// Singular GraphQL type name.
    pub singular: String,
    /// By-PK root query field name.
    pub single_field: String,
    /// Paged root query field name.
    pub plural_field: String,
    /// Scalar fields in column order.
    pub columns: Vec<ColumnField>,
    /// Primary-key fields with their GraphQL types.
    pub key_fields: Vec<(String, &'static str)>,
    /// Navigation fields.
    pub relationships: Vec<RelationshipField>,
    /// Admitted mutations.
    pub mutations: MutationSurface,
    /// Present for stored-procedure entities (which synthesize only an
    /// execute field).
    pub procedure: Option<ProcedureField>,
}

/// What a root field resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootFieldKind {
    /// By-PK single read.
    ByPk,
    /// Paged list read.
    List,
    /// Insert.
    Create,
    /// Update by PK.
    Update,
    /// Delete by PK.
    Delete,
    /// Stored-procedure execution.
    Execute,
}

/// One root query or mutation field.
#[derive(Debug, Clone, PartialEq)]
pub struct RootField {
    /// Resolution kind.
    pub kind: RootFieldKind,
    /// Entity the field addresses.
    pub entity: String,
}

/// The synthesized GraphQL surface of one config snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewaySchema {
    /// Entity types in catalog order.
    pub entities: Vec<EntityType>,
    /// Root query fields.
    pub queries: IndexMap<String, RootField>,
    /// Root mutation fields.
    pub mutations: IndexMap<String, RootField>,
    /// Whether groupBy fields are synthesized (relational backends only).
    pub aggregations_enabled: bool,
}

impl GatewaySchema {
    /// Look up a root query field.
    #[must_use]
    pub fn query_field(&self, name: &str) -> Option<&RootField> {
        self.queries.get(name)
    }

    /// Look up a root mutation field.
    #[must_use]
    pub fn mutation_field(&self, name: &str) -> Option<&RootField> {
        self.mutations.get(name)
    }

    /// Entity type info by logical name.
    #[must_use]
    pub fn entity_type(&self, entity: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.entity == entity)
    }
}

/// Builds [`GatewaySchema`] from config plus metadata.
pub struct SchemaBuilder;

impl SchemaBuilder {
    /// Synthesize the GraphQL surface for a snapshot.
    ///
    /// # Errors
    ///
    /// Metadata failures surface as `ErrorInInitialization`.
    pub async fn build(
        config: &RuntimeConfig,
        metadata: &MetadataProvider,
    ) -> Result<GatewaySchema> {
        let mut schema = GatewaySchema {
            aggregations_enabled: config.data_source.database_type.is_relational(),
            ..GatewaySchema::default()
        };

        for (name, entity) in &config.entities {
            if !entity.graphql.enabled() {
                continue;
            }
            let shape = metadata.describe(config, name).await?;
            let entity_type = Self::entity_type(name, entity, &shape)?;

            if let Some(procedure) = &entity_type.procedure {
                let field = RootField {
                    kind: RootFieldKind::Execute,
                    entity: name.clone(),
                };
                match procedure.operation {
                    GraphQLOperation::Query => {
                        schema.queries.insert(procedure.field_name.clone(), field);
                    }
                    GraphQLOperation::Mutation => {
                        schema.mutations.insert(procedure.field_name.clone(), field);
                    }
                }
            } else {
                schema.queries.insert(
                    entity_type.single_field.clone(),
                    RootField {
                        kind: RootFieldKind::ByPk,
                        entity: name.clone(),
                    },
                );
                schema.queries.insert(
                    entity_type.plural_field.clone(),
                    RootField {
                        kind: RootFieldKind::List,
                        entity: name.clone(),
                    },
                );
                let surface = entity_type.mutations;
                for (enabled, kind, prefix) in [
                    (surface.create, RootFieldKind::Create, "create"),
                    (surface.update, RootFieldKind::Update, "update"),
                    (surface.delete, RootFieldKind::Delete, "delete"),
                ] {
                    if enabled {
                        schema.mutations.insert(
                            format!("{prefix}{}", entity_type.singular),
                            RootField {
                                kind,
                                entity: name.clone(),
                            },
                        );
                    }
                }
            }

            schema.entities.push(entity_type);
        }

        Ok(schema)
    }

    fn entity_type(
        name: &str,
        entity: &veneer_config::Entity,
        shape: &TableShape,
    ) -> Result<EntityType> {
        let singular = entity.graphql.singular(name).to_string();
        let plural = entity.graphql.plural(name);

        let columns: Vec<ColumnField> = shape
            .columns
            .iter()
            .map(|c| ColumnField {
                name: c.name.clone(),
                graphql_type: c.db_type.graphql_type_name(),
                nullable: c.nullable,
                auto_generated: c.auto_generated,
            })
            .collect();

        let key_fields: Vec<(String, &'static str)> = shape
            .primary_key
            .iter()
            .map(|pk| {
                shape
                    .column_type(pk)
                    .map(|t| (pk.clone(), t.graphql_type_name()))
            })
            .collect::<Result<_>>()
            .map_err(|_| {
                VeneerError::init(format!(
                    "Entity '{name}': key column is missing from the table shape"
                ))
            })?;

        let relationships: Vec<RelationshipField> = entity
            .relationships
            .iter()
            .map(|(rel_name, rel)| RelationshipField {
                name: rel_name.clone(),
                target_entity: rel.target_entity.clone(),
                many: rel.cardinality == veneer_config::Cardinality::Many,
            })
            .collect();

        let mut mutations = MutationSurface::default();
        for permission in &entity.permissions {
            for action in &permission.actions {
                match action.kind() {
                    ActionKind::Create => mutations.create = true,
                    ActionKind::Update => mutations.update = true,
                    ActionKind::Delete => mutations.delete = true,
                    ActionKind::All => {
                        mutations.create = true;
                        mutations.update = true;
                        mutations.delete = true;
                    }
                    ActionKind::Read | ActionKind::Execute => {}
                }
            }
        }
        if entity.is_stored_procedure() {
            mutations = MutationSurface::default();
        }

        let procedure = entity.is_stored_procedure().then(|| ProcedureField {
            field_name: format!("execute{singular}"),
            operation: entity.graphql.operation(),
            parameters: shape
                .parameters
                .iter()
                .map(|p| (p.name.clone(), p.db_type.graphql_type_name()))
                .collect(),
        });

        Ok(EntityType {
            entity: name.to_string(),
            singular: singular.clone(),
            single_field: lower_first(&singular),
            plural_field: lower_first(&plural),
            columns,
            key_fields,
            relationships,
            mutations,
            procedure,
        })
    }
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

// =============================================================================
// SDL rendering
// =============================================================================

/// Scalar filter input types referenced by entity filter inputs, keyed by
/// the scalar they filter.
const FILTER_SCALARS: &[(&str, &str)] = &[
    ("Int", "IntFilterInput"),
    ("Long", "LongFilterInput"),
    ("String", "StringFilterInput"),
    ("ID", "IdFilterInput"),
    ("Boolean", "BooleanFilterInput"),
    ("DateTime", "DateTimeFilterInput"),
    ("Float", "FloatFilterInput"),
    ("ByteArray", "ByteArrayFilterInput"),
];

impl GatewaySchema {
    /// Render the schema as SDL.
    ///
    /// Output is deterministic: entities in catalog order, fields in column
    /// order, fixed preamble.
    #[must_use]
    pub fn to_sdl(&self) -> String {
        let mut sdl = String::new();
        sdl.push_str(SDL_PREAMBLE);

        for entity in &self.entities {
            if entity.procedure.is_some() {
                continue;
            }
            self.render_object_type(&mut sdl, entity);
            render_filter_input(&mut sdl, entity);
            render_order_by_input(&mut sdl, entity);
            self.render_connection_type(&mut sdl, entity);
            render_write_inputs(&mut sdl, entity);
        }

        self.render_root_type(&mut sdl, "Query", &self.queries);
        if !self.mutations.is_empty() {
            self.render_root_type(&mut sdl, "Mutation", &self.mutations);
        }
        sdl
    }

    fn render_object_type(&self, sdl: &mut String, entity: &EntityType) {
        sdl.push_str(&format!("type {} {{\n", entity.singular));
        for column in &entity.columns {
            let bang = if column.nullable { "" } else { "!" };
            sdl.push_str(&format!("  {}: {}{bang}\n", column.name, column.graphql_type));
        }
        for relationship in &entity.relationships {
            let target = self
                .entities
                .iter()
                .find(|e| e.entity == relationship.target_entity)
                .map_or(relationship.target_entity.clone(), |e| e.singular.clone());
            if relationship.many {
                sdl.push_str(&format!(
                    "  {}(first: Int, after: String, filter: {target}FilterInput, \
                     orderBy: {target}OrderByInput): {target}Connection!\n",
                    relationship.name,
                ));
            } else {
                sdl.push_str(&format!("  {}: {target}\n", relationship.name));
            }
        }
        sdl.push_str("}\n\n");
    }

    fn render_connection_type(&self, sdl: &mut String, entity: &EntityType) {
        sdl.push_str(&format!("type {}Connection {{\n", entity.singular));
        sdl.push_str(&format!("  items: [{}!]!\n", entity.singular));
        sdl.push_str("  hasNextPage: Boolean!\n");
        sdl.push_str("  endCursor: String\n");
        if self.aggregations_enabled {
            sdl.push_str(&format!(
                "  groupBy(by: [String!], aggregations: [AggregationInput!]): \
                 [{}GroupByResult!]!\n",
                entity.singular
            ));
        }
        sdl.push_str("}\n\n");
        if self.aggregations_enabled {
            sdl.push_str(&format!(
                "type {}GroupByResult {{\n  fields: JSON\n  aggregations: JSON\n}}\n\n",
                entity.singular
            ));
        }
    }

    fn render_root_type(&self, sdl: &mut String, name: &str, fields: &IndexMap<String, RootField>) {
        sdl.push_str(&format!("type {name} {{\n"));
        for (field_name, field) in fields {
            let Some(entity) = self.entity_type(&field.entity) else {
                continue;
            };
            match field.kind {
                RootFieldKind::ByPk => {
                    sdl.push_str(&format!(
                        "  {field_name}({}): {}\n",
                        key_arguments(entity),
                        entity.singular
                    ));
                }
                RootFieldKind::List => {
                    sdl.push_str(&format!(
                        "  {field_name}(first: Int, after: String, filter: {s}FilterInput, \
                         orderBy: {s}OrderByInput): {s}Connection!\n",
                        s = entity.singular
                    ));
                }
                RootFieldKind::Create => {
                    sdl.push_str(&format!(
                        "  {field_name}(item: {}CreateInput!): {}\n",
                        entity.singular, entity.singular
                    ));
                }
                RootFieldKind::Update => {
                    sdl.push_str(&format!(
                        "  {field_name}({}, item: {}UpdateInput!): {}\n",
                        key_arguments(entity),
                        entity.singular,
                        entity.singular
                    ));
                }
                RootFieldKind::Delete => {
                    sdl.push_str(&format!(
                        "  {field_name}({}): {}\n",
                        key_arguments(entity),
                        entity.singular
                    ));
                }
                RootFieldKind::Execute => {
                    let arguments = entity.procedure.as_ref().map_or_else(String::new, |p| {
                        p.parameters
                            .iter()
                            .map(|(name, ty)| format!("{name}: {ty}"))
                            .collect::<Vec<_>>()
                            .join(", ")
                    });
                    if arguments.is_empty() {
                        sdl.push_str(&format!("  {field_name}: JSON\n"));
                    } else {
                        sdl.push_str(&format!("  {field_name}({arguments}): JSON\n"));
                    }
                }
            }
        }
        sdl.push_str("}\n\n");
    }
}

fn key_arguments(entity: &EntityType) -> String {
    entity
        .key_fields
        .iter()
        .map(|(name, ty)| format!("{name}: {ty}!"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_filter_input(sdl: &mut String, entity: &EntityType) {
    let name = format!("{}FilterInput", entity.singular);
    sdl.push_str(&format!("input {name} {{\n"));
    for column in &entity.columns {
        if let Some((_, filter)) = FILTER_SCALARS.iter().find(|(s, _)| *s == column.graphql_type)
        {
            sdl.push_str(&format!("  {}: {filter}\n", column.name));
        }
    }
    sdl.push_str(&format!("  and: [{name}!]\n"));
    sdl.push_str(&format!("  or: [{name}!]\n"));
    sdl.push_str(&format!("  not: {name}\n"));
    sdl.push_str("}\n\n");
}

fn render_order_by_input(sdl: &mut String, entity: &EntityType) {
    sdl.push_str(&format!("input {}OrderByInput {{\n", entity.singular));
    for column in &entity.columns {
        sdl.push_str(&format!("  {}: OrderBy\n", column.name));
    }
    sdl.push_str("}\n\n");
}

fn render_write_inputs(sdl: &mut String, entity: &EntityType) {
    if entity.mutations.create {
        sdl.push_str(&format!("input {}CreateInput {{\n", entity.singular));
        for column in &entity.columns {
            if column.auto_generated {
                continue;
            }
            let bang = if column.nullable { "" } else { "!" };
            sdl.push_str(&format!("  {}: {}{bang}\n", column.name, column.graphql_type));
        }
        sdl.push_str("}\n\n");
    }
    if entity.mutations.update {
        sdl.push_str(&format!("input {}UpdateInput {{\n", entity.singular));
        for column in &entity.columns {
            if column.auto_generated {
                continue;
            }
            sdl.push_str(&format!("  {}: {}\n", column.name, column.graphql_type));
        }
        sdl.push_str("}\n\n");
    }
}

const SDL_PREAMBLE: &str = "\
scalar Long
scalar DateTime
scalar ByteArray
scalar JSON

enum OrderBy {
  ASC
  DESC
}

enum AggregationFn {
  count
  countDistinct
  sum
  avg
  min
  max
}

input AggregationInput {
  fn: AggregationFn!
  field: String
  alias: String
}

input IntFilterInput {
  eq: Int
  neq: Int
  gt: Int
  gte: Int
  lt: Int
  lte: Int
  in: [Int!]
  isNull: Boolean
}

input LongFilterInput {
  eq: Long
  neq: Long
  gt: Long
  gte: Long
  lt: Long
  lte: Long
  in: [Long!]
  isNull: Boolean
}

input StringFilterInput {
  eq: String
  neq: String
  gt: String
  gte: String
  lt: String
  lte: String
  in: [String!]
  contains: String
  startsWith: String
  endsWith: String
  isNull: Boolean
}

input IdFilterInput {
  eq: ID
  neq: ID
  in: [ID!]
  isNull: Boolean
}

input BooleanFilterInput {
  eq: Boolean
  neq: Boolean
  isNull: Boolean
}

input DateTimeFilterInput {
  eq: DateTime
  neq: DateTime
  gt: DateTime
  gte: DateTime
  lt: DateTime
  lte: DateTime
  in: [DateTime!]
  isNull: Boolean
}

input FloatFilterInput {
  eq: Float
  neq: Float
  gt: Float
  gte: Float
  lt: Float
  lte: Float
  in: [Float!]
  isNull: Boolean
}

input ByteArrayFilterInput {
  eq: ByteArray
  neq: ByteArray
  isNull: Boolean
}

";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, CannedIntrospector};
    use std::sync::Arc;

    async fn build_schema() -> GatewaySchema {
        let config = test_config();
        let metadata = MetadataProvider::new(Arc::new(CannedIntrospector::default()));
        SchemaBuilder::build(&config, &metadata)
            .await
            .expect("builds")
    }

    #[tokio::test]
    async fn root_fields_cover_queries_and_mutations() {
        let schema = build_schema().await;

        assert_eq!(
            schema.query_field("book").map(|f| f.kind),
            Some(RootFieldKind::ByPk)
        );
        assert_eq!(
            schema.query_field("books").map(|f| f.kind),
            Some(RootFieldKind::List)
        );
        assert_eq!(
            schema.mutation_field("createBook").map(|f| f.kind),
            Some(RootFieldKind::Create)
        );
        assert_eq!(
            schema.mutation_field("updateBook").map(|f| f.kind),
            Some(RootFieldKind::Update)
        );
        assert_eq!(
            schema.mutation_field("deleteBook").map(|f| f.kind),
            Some(RootFieldKind::Delete)
        );
    }

    #[tokio::test]
    async fn stored_procedure_synthesizes_execute_only() {
        let schema = build_schema().await;

        let field = schema
            .mutation_field("executeTopSellers")
            .expect("execute field");
        assert_eq!(field.kind, RootFieldKind::Execute);
        assert!(schema.query_field("topSellers").is_none());
        assert!(schema.mutation_field("createTopSellers").is_none());
    }

    #[tokio::test]
    async fn graphql_disabled_entity_is_absent() {
        let schema = build_schema().await;
        assert!(schema.query_field("audit").is_none());
        assert!(schema.entity_type("Audit").is_none());
    }

    #[tokio::test]
    async fn sdl_contains_types_inputs_and_navigations() {
        let schema = build_schema().await;
        let sdl = schema.to_sdl();

        assert!(sdl.contains("type Book {"));
        assert!(sdl.contains("id: Int!"));
        assert!(sdl.contains("input BookFilterInput {"));
        assert!(sdl.contains("input BookOrderByInput {"));
        assert!(sdl.contains("type BookConnection {"));
        assert!(sdl.contains("hasNextPage: Boolean!"));
        // Publisher -> books is a to-many navigation.
        assert!(sdl.contains(
            "books(first: Int, after: String, filter: BookFilterInput, \
             orderBy: BookOrderByInput): BookConnection!"
        ));
        // Book -> publisher is to-one.
        assert!(sdl.contains("publisher: Publisher"));
        // Create input skips the identity column.
        let create_input = sdl
            .split("input BookCreateInput {")
            .nth(1)
            .and_then(|s| s.split('}').next())
            .expect("create input block");
        assert!(!create_input.contains("id:"));
    }

    #[tokio::test]
    async fn sdl_is_deterministic() {
        let first = build_schema().await.to_sdl();
        let second = build_schema().await.to_sdl();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn group_by_is_present_for_relational_backends() {
        let schema = build_schema().await;
        assert!(schema.aggregations_enabled);
        assert!(schema.to_sdl().contains("groupBy(by: [String!]"));
    }

    #[test]
    fn lower_first_handles_edge_cases() {
        assert_eq!(lower_first("Book"), "book");
        assert_eq!(lower_first("IDCard"), "iDCard");
        assert_eq!(lower_first(""), "");
    }
}
