//! Configuration model.
//!
//! The canonical in-memory description of a gateway deployment: one data
//! source, runtime options for the REST and GraphQL surfaces, and a catalog
//! of entities mapping logical names to physical tables, views, containers,
//! or stored procedures.
//!
//! A published [`RuntimeConfig`] is immutable; hot-reload builds a fresh one
//! and swaps the shared pointer (see [`crate::loader`]).
//!
//! # Configuration File Format
//!
//! ```json
//! {
//!   "$schema": "https://veneer.dev/schemas/v1.json",
//!   "data-source": {
//!     "database-type": "postgresql",
//!     "connection-string": "@env('DATABASE_URL')"
//!   },
//!   "runtime": {
//!     "rest": { "enabled": true, "path": "/api" },
//!     "graphql": { "enabled": true, "allow-introspection": true },
//!     "host": { "mode": "development" }
//!   },
//!   "entities": {
//!     "Book": {
//!       "source": "dbo.books",
//!       "permissions": [
//!         { "role": "anonymous", "actions": [ "read" ] }
//!       ]
//!     }
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Root
// =============================================================================

/// Root configuration snapshot.
///
/// Immutable once published; requests capture an `Arc` to the snapshot they
/// started against and keep it for their whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Schema URL identifying the config file format version.
    #[serde(rename = "$schema", default)]
    pub schema: String,

    /// The single backing data source.
    #[serde(rename = "data-source")]
    pub data_source: DataSource,

    /// Runtime options for the wire surfaces and host.
    #[serde(default)]
    pub runtime: RuntimeOptions,

    /// Entity catalog, keyed by logical entity name.
    ///
    /// Catalog order is observable: schema synthesis walks entities in this
    /// order, which keeps the generated SDL deterministic.
    #[serde(default)]
    pub entities: IndexMap<String, Entity>,
}

impl RuntimeConfig {
    /// Look up an entity by logical name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }
}

// =============================================================================
// Data source
// =============================================================================

/// Backend database connection description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSource {
    /// Database engine kind.
    #[serde(rename = "database-type")]
    pub database_type: DatabaseKind,

    /// Connection string. Usually supplied via `@env('...')`.
    #[serde(rename = "connection-string", default)]
    pub connection_string: String,

    /// Engine-specific options (e.g. Cosmos `database`, `container`,
    /// `schema` file path).
    #[serde(default)]
    pub options: IndexMap<String, serde_json::Value>,
}

/// Supported database engine kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseKind {
    /// Microsoft SQL Server.
    Mssql,
    /// PostgreSQL.
    Postgresql,
    /// MySQL.
    Mysql,
    /// Azure Cosmos DB through its SQL API.
    CosmosSql,
    /// Azure Cosmos DB through the NoSQL (item) API.
    CosmosNosql,
    /// Azure Synapse (SQL data warehouse dialect).
    Dwsql,
}

impl DatabaseKind {
    /// True for engines queried with parameterized SQL.
    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(self, Self::Mssql | Self::Postgresql | Self::Mysql | Self::Dwsql)
    }

    /// True for document engines described by a user-supplied schema file.
    #[must_use]
    pub const fn is_document(self) -> bool {
        matches!(self, Self::CosmosSql | Self::CosmosNosql)
    }
}

// =============================================================================
// Runtime options
// =============================================================================

/// Runtime options covering both wire surfaces and the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeOptions {
    /// REST surface options.
    pub rest: RestOptions,

    /// GraphQL surface options.
    pub graphql: GraphQLOptions,

    /// Host options (mode, CORS, authentication).
    pub host: HostOptions,
}

/// Global REST surface options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RestOptions {
    /// Whether the REST surface is served at all.
    pub enabled: bool,

    /// Path prefix for all REST routes.
    pub path: String,

    /// Reject request bodies containing fields absent from the entity.
    #[serde(rename = "request-body-strict")]
    pub request_body_strict: bool,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/api".to_string(),
            request_body_strict: true,
        }
    }
}

/// Global GraphQL surface options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GraphQLOptions {
    /// Whether the GraphQL surface is served at all.
    pub enabled: bool,

    /// Path the GraphQL endpoint is mounted on.
    pub path: String,

    /// Allow introspection queries regardless of host mode.
    ///
    /// Introspection is always allowed in development mode.
    #[serde(rename = "allow-introspection")]
    pub allow_introspection: bool,

    /// Maximum selection depth. `None` or `Some(-1)` means unlimited.
    #[serde(rename = "depth-limit")]
    pub depth_limit: Option<i32>,

    /// Allow several mutations per request, executed in one transaction.
    #[serde(rename = "multiple-mutations")]
    pub multiple_mutations: bool,
}

impl Default for GraphQLOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/graphql".to_string(),
            allow_introspection: false,
            depth_limit: None,
            multiple_mutations: false,
        }
    }
}

/// Host options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostOptions {
    /// Development or production. Controls hot-reload, introspection,
    /// and error detail exposure.
    pub mode: HostMode,

    /// CORS settings, consumed by the HTTP host.
    pub cors: CorsOptions,

    /// Authentication settings, consumed by the token-validation
    /// collaborator.
    pub authentication: AuthenticationOptions,
}

/// Host operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostMode {
    /// Verbose errors, introspection on, hot-reload enabled.
    #[default]
    Development,
    /// Sanitized errors, hot-reload disabled.
    Production,
}

impl HostMode {
    /// True in development mode.
    #[must_use]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

/// CORS settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CorsOptions {
    /// Allowed origins.
    pub origins: Vec<String>,

    /// Whether credentialed requests are allowed.
    #[serde(rename = "allow-credentials")]
    pub allow_credentials: bool,
}

/// Authentication settings.
///
/// Token validation happens outside the engine; these fields configure that
/// collaborator and are otherwise opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthenticationOptions {
    /// Identity provider name (e.g. "AppService", "AzureAD", "Simulator").
    pub provider: String,

    /// JWT validation parameters, when the provider uses them.
    pub jwt: Option<JwtOptions>,
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        Self {
            provider: "StaticWebApps".to_string(),
            jwt: None,
        }
    }
}

/// JWT validation parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JwtOptions {
    /// Expected audience claim.
    pub audience: Option<String>,

    /// Expected issuer claim.
    pub issuer: Option<String>,
}

// =============================================================================
// Entities
// =============================================================================

/// A logical resource mapped to a physical database object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    /// The physical object this entity maps to.
    pub source: EntitySource,

    /// GraphQL exposure override.
    #[serde(default)]
    pub graphql: GraphQLEntityConfig,

    /// REST exposure override.
    #[serde(default)]
    pub rest: RestEntityConfig,

    /// Per-role permission blocks.
    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// Named relationships to other entities.
    #[serde(default)]
    pub relationships: IndexMap<String, Relationship>,
}

impl Entity {
    /// Physical object name.
    #[must_use]
    pub fn object(&self) -> &str {
        self.source.object()
    }

    /// True when the source is a stored procedure.
    #[must_use]
    pub fn is_stored_procedure(&self) -> bool {
        self.source.kind() == SourceKind::StoredProcedure
    }

    /// Permission block for a role, if declared.
    #[must_use]
    pub fn permission_for(&self, role: &str) -> Option<&Permission> {
        self.permissions.iter().find(|p| p.role == role)
    }
}

/// Physical object description: a bare name or a detailed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntitySource {
    /// Shorthand: just the physical object name; the object is assumed to
    /// be a table whose key columns come from introspection.
    Name(String),

    /// Detailed source description.
    Detailed {
        /// Physical object name (e.g. "dbo.books").
        object: String,

        /// Object kind.
        #[serde(rename = "type", default)]
        kind: SourceKind,

        /// Key columns, required for views (no introspectable PK).
        #[serde(rename = "key-fields", default)]
        key_fields: Vec<String>,

        /// Stored-procedure parameter defaults.
        #[serde(default)]
        parameters: IndexMap<String, serde_json::Value>,
    },
}

impl EntitySource {
    /// Physical object name.
    #[must_use]
    pub fn object(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Detailed { object, .. } => object,
        }
    }

    /// Object kind; bare names are tables.
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Name(_) => SourceKind::Table,
            Self::Detailed { kind, .. } => *kind,
        }
    }

    /// Explicitly configured key columns (views need them).
    #[must_use]
    pub fn key_fields(&self) -> &[String] {
        match self {
            Self::Name(_) => &[],
            Self::Detailed { key_fields, .. } => key_fields,
        }
    }

    /// Stored-procedure parameter defaults.
    #[must_use]
    pub fn parameters(&self) -> Option<&IndexMap<String, serde_json::Value>> {
        match self {
            Self::Name(_) => None,
            Self::Detailed { parameters, .. } => Some(parameters),
        }
    }
}

/// Physical object kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Base table.
    #[default]
    Table,
    /// View; requires explicit `key-fields`.
    View,
    /// Stored procedure; exposes only the `execute` action.
    StoredProcedure,
}

// =============================================================================
// Per-entity surface overrides
// =============================================================================

/// GraphQL exposure: a bare bool or an options block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphQLEntityConfig {
    /// `"graphql": false` disables the entity on the GraphQL surface.
    Enabled(bool),
    /// Full options block.
    Options(GraphQLEntityOptions),
}

impl Default for GraphQLEntityConfig {
    fn default() -> Self {
        Self::Options(GraphQLEntityOptions::default())
    }
}

impl GraphQLEntityConfig {
    /// Whether this entity is exposed over GraphQL.
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            Self::Enabled(enabled) => *enabled,
            Self::Options(opts) => opts.enabled,
        }
    }

    /// Singular GraphQL type name; falls back to the entity name.
    #[must_use]
    pub fn singular<'a>(&'a self, entity_name: &'a str) -> &'a str {
        match self {
            Self::Options(GraphQLEntityOptions {
                singular: Some(singular),
                ..
            }) => singular,
            _ => entity_name,
        }
    }

    /// Plural query field name; falls back to singular + "s".
    #[must_use]
    pub fn plural(&self, entity_name: &str) -> String {
        match self {
            Self::Options(GraphQLEntityOptions {
                plural: Some(plural),
                ..
            }) => plural.clone(),
            _ => format!("{}s", self.singular(entity_name)),
        }
    }

    /// Root operation stored procedures mount under.
    #[must_use]
    pub fn operation(&self) -> GraphQLOperation {
        match self {
            Self::Options(opts) => opts.operation,
            Self::Enabled(_) => GraphQLOperation::default(),
        }
    }
}

/// GraphQL per-entity options block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GraphQLEntityOptions {
    /// Whether this entity is exposed over GraphQL.
    pub enabled: bool,

    /// Singular GraphQL type name override.
    pub singular: Option<String>,

    /// Plural query field name override.
    pub plural: Option<String>,

    /// For stored procedures: mount under `query` or `mutation`.
    pub operation: GraphQLOperation,
}

impl Default for GraphQLEntityOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            singular: None,
            plural: None,
            operation: GraphQLOperation::default(),
        }
    }
}

/// Root operation a stored-procedure field mounts under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GraphQLOperation {
    /// Mount as a query field.
    Query,
    /// Mount as a mutation field.
    #[default]
    Mutation,
}

/// REST exposure: a bare bool or an options block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RestEntityConfig {
    /// `"rest": false` disables the entity on the REST surface.
    Enabled(bool),
    /// Full options block.
    Options(RestEntityOptions),
}

impl Default for RestEntityConfig {
    fn default() -> Self {
        Self::Options(RestEntityOptions::default())
    }
}

impl RestEntityConfig {
    /// Whether this entity is exposed over REST.
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            Self::Enabled(enabled) => *enabled,
            Self::Options(opts) => opts.enabled,
        }
    }

    /// Route segment; falls back to the entity name.
    #[must_use]
    pub fn path<'a>(&'a self, entity_name: &'a str) -> &'a str {
        match self {
            Self::Options(RestEntityOptions {
                path: Some(path), ..
            }) => path.trim_start_matches('/'),
            _ => entity_name,
        }
    }

    /// Explicitly allowed methods; empty means all methods the entity's
    /// permissions admit.
    #[must_use]
    pub fn methods(&self) -> &[RestMethod] {
        match self {
            Self::Options(opts) => &opts.methods,
            Self::Enabled(_) => &[],
        }
    }
}

/// REST per-entity options block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RestEntityOptions {
    /// Whether this entity is exposed over REST.
    pub enabled: bool,

    /// Route segment override (leading slash optional).
    pub path: Option<String>,

    /// Explicitly allowed methods.
    pub methods: Vec<RestMethod>,
}

impl Default for RestEntityOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            methods: Vec::new(),
        }
    }
}

/// HTTP methods an entity route accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestMethod {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Full upsert.
    Put,
    /// Incremental upsert.
    Patch,
    /// Delete.
    Delete,
}

// =============================================================================
// Permissions
// =============================================================================

/// Permission block: the actions one role may take on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Permission {
    /// Role name this block applies to.
    pub role: String,

    /// Granted actions.
    pub actions: Vec<Action>,
}

impl Permission {
    /// Find the action entry matching `kind`, accepting `*` as wildcard.
    #[must_use]
    pub fn action_for(&self, kind: ActionKind) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.kind() == kind)
            .or_else(|| self.actions.iter().find(|a| a.kind() == ActionKind::All))
    }
}

/// A granted action: a bare verb or a detailed block with a field mask and
/// a row policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Bare verb, full field access, no policy.
    Verb(ActionKind),

    /// Detailed action block.
    Detailed {
        /// The verb.
        action: ActionKind,

        /// Column include/exclude scope.
        #[serde(default)]
        fields: Option<FieldScope>,

        /// Row-level policy.
        #[serde(default)]
        policy: Option<Policy>,
    },
}

impl Action {
    /// The verb this entry grants.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Verb(kind) => *kind,
            Self::Detailed { action, .. } => *action,
        }
    }

    /// Column scope, if restricted.
    #[must_use]
    pub fn fields(&self) -> Option<&FieldScope> {
        match self {
            Self::Verb(_) => None,
            Self::Detailed { fields, .. } => fields.as_ref(),
        }
    }

    /// Row policy, if any.
    #[must_use]
    pub fn policy(&self) -> Option<&Policy> {
        match self {
            Self::Verb(_) => None,
            Self::Detailed { policy, .. } => policy.as_ref(),
        }
    }
}

/// Action verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Insert rows.
    Create,
    /// Select rows.
    Read,
    /// Update rows.
    Update,
    /// Delete rows.
    Delete,
    /// Execute a stored procedure.
    Execute,
    /// Wildcard matching every verb valid for the entity.
    #[serde(rename = "*")]
    All,
}

/// Column include/exclude scope.
///
/// `include = ["*"]` expands to all columns; a column in both lists is
/// excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FieldScope {
    /// Included columns, `"*"` for all.
    pub include: Vec<String>,

    /// Excluded columns; wins over `include`.
    pub exclude: Vec<String>,
}

impl Default for FieldScope {
    fn default() -> Self {
        Self {
            include: vec!["*".to_string()],
            exclude: Vec::new(),
        }
    }
}

/// Row-level policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Predicate expression over `@item.<field>` and `@claims.<name>`,
    /// injected into the generated query's WHERE clause.
    pub database: String,
}

// =============================================================================
// Relationships
// =============================================================================

/// A directed navigation edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Relationship {
    /// One row or many rows on the target side.
    pub cardinality: Cardinality,

    /// Target entity logical name.
    #[serde(rename = "target.entity")]
    pub target_entity: String,

    /// Join columns on the source entity. Inferred from foreign keys when
    /// absent.
    #[serde(rename = "source.fields", default)]
    pub source_fields: Vec<String>,

    /// Join columns on the target entity, paired with `source_fields`.
    #[serde(rename = "target.fields", default)]
    pub target_fields: Vec<String>,

    /// Link table for many-to-many relationships.
    #[serde(rename = "linking.object", default)]
    pub linking_object: Option<String>,

    /// Link-table columns joined to the source entity.
    #[serde(rename = "linking.source.fields", default)]
    pub linking_source_fields: Vec<String>,

    /// Link-table columns joined to the target entity.
    #[serde(rename = "linking.target.fields", default)]
    pub linking_target_fields: Vec<String>,
}

impl Relationship {
    /// True when the edge goes through a link table.
    #[must_use]
    pub const fn is_linking(&self) -> bool {
        self.linking_object.is_some()
    }

    /// True when join columns are spelled out on both sides.
    #[must_use]
    pub fn has_explicit_fields(&self) -> bool {
        !self.source_fields.is_empty() && !self.target_fields.is_empty()
    }
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// Navigation resolves to a single row.
    One,
    /// Navigation resolves to a page of rows.
    Many,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> &'static str {
        r#"{
            "$schema": "https://veneer.dev/schemas/v1.json",
            "data-source": {
                "database-type": "postgresql",
                "connection-string": "postgresql://localhost/app"
            },
            "entities": {
                "Book": {
                    "source": "dbo.books",
                    "permissions": [
                        { "role": "anonymous", "actions": [ "read" ] }
                    ]
                }
            }
        }"#
    }

    #[test]
    fn parses_minimal_config() {
        let config: RuntimeConfig =
            serde_json::from_str(minimal_config()).expect("minimal config parses");
        assert_eq!(config.data_source.database_type, DatabaseKind::Postgresql);
        assert_eq!(config.entities.len(), 1);

        let book = config.entity("Book").expect("Book entity");
        assert_eq!(book.object(), "dbo.books");
        assert_eq!(book.source.kind(), SourceKind::Table);
        assert!(!book.is_stored_procedure());
    }

    #[test]
    fn rejects_unknown_keys() {
        let bad = r#"{
            "data-source": { "database-type": "mysql" },
            "entitees": {}
        }"#;
        assert!(serde_json::from_str::<RuntimeConfig>(bad).is_err());
    }

    #[test]
    fn defaults_fill_runtime_block() {
        let config: RuntimeConfig =
            serde_json::from_str(minimal_config()).expect("minimal config parses");
        assert!(config.runtime.rest.enabled);
        assert_eq!(config.runtime.rest.path, "/api");
        assert_eq!(config.runtime.graphql.path, "/graphql");
        assert_eq!(config.runtime.host.mode, HostMode::Development);
        assert!(config.runtime.graphql.depth_limit.is_none());
    }

    #[test]
    fn detailed_source_with_key_fields() {
        let json = r#"{
            "object": "dbo.books_view",
            "type": "view",
            "key-fields": [ "id" ]
        }"#;
        let source: EntitySource = serde_json::from_str(json).expect("detailed source parses");
        assert_eq!(source.object(), "dbo.books_view");
        assert_eq!(source.kind(), SourceKind::View);
        assert_eq!(source.key_fields(), ["id".to_string()]);
    }

    #[test]
    fn graphql_bool_shorthand() {
        let json = r#"{
            "source": "dbo.audit",
            "graphql": false,
            "permissions": []
        }"#;
        let entity: Entity = serde_json::from_str(json).expect("entity parses");
        assert!(!entity.graphql.enabled());
        assert!(entity.rest.enabled());
    }

    #[test]
    fn graphql_naming_overrides() {
        let json = r#"{
            "source": "dbo.people",
            "graphql": { "singular": "Person", "plural": "People" },
            "permissions": []
        }"#;
        let entity: Entity = serde_json::from_str(json).expect("entity parses");
        assert_eq!(entity.graphql.singular("Person_entity"), "Person");
        assert_eq!(entity.graphql.plural("Person_entity"), "People");
    }

    #[test]
    fn plural_defaults_to_singular_s() {
        let config = GraphQLEntityConfig::default();
        assert_eq!(config.plural("Book"), "Books");
    }

    #[test]
    fn action_wildcard_matches_any_verb() {
        let json = r#"{ "role": "admin", "actions": [ "*" ] }"#;
        let permission: Permission = serde_json::from_str(json).expect("permission parses");
        assert!(permission.action_for(ActionKind::Read).is_some());
        assert!(permission.action_for(ActionKind::Delete).is_some());
    }

    #[test]
    fn detailed_action_with_fields_and_policy() {
        let json = r#"{
            "role": "author",
            "actions": [
                {
                    "action": "update",
                    "fields": { "include": [ "*" ], "exclude": [ "royalties" ] },
                    "policy": { "database": "@item.author_id eq @claims.sub" }
                }
            ]
        }"#;
        let permission: Permission = serde_json::from_str(json).expect("permission parses");
        let action = permission
            .action_for(ActionKind::Update)
            .expect("update action");
        assert_eq!(action.kind(), ActionKind::Update);
        assert_eq!(
            action.fields().expect("fields").exclude,
            ["royalties".to_string()]
        );
        assert!(
            action
                .policy()
                .expect("policy")
                .database
                .contains("@claims.sub")
        );
    }

    #[test]
    fn relationship_dotted_keys() {
        let json = r#"{
            "cardinality": "many",
            "target.entity": "Book",
            "linking.object": "dbo.book_authors",
            "linking.source.fields": [ "author_id" ],
            "linking.target.fields": [ "book_id" ]
        }"#;
        let rel: Relationship = serde_json::from_str(json).expect("relationship parses");
        assert_eq!(rel.cardinality, Cardinality::Many);
        assert_eq!(rel.target_entity, "Book");
        assert!(rel.is_linking());
        assert!(!rel.has_explicit_fields());
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config: RuntimeConfig =
            serde_json::from_str(minimal_config()).expect("minimal config parses");
        let text = serde_json::to_string(&config).expect("serializes");
        let again: RuntimeConfig = serde_json::from_str(&text).expect("round-trips");
        assert_eq!(again.entities.len(), config.entities.len());
    }
}
