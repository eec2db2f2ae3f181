//! Backend metadata discovery.
//!
//! For each entity the engine needs the shape of the physical object it maps
//! to: columns and their types, the primary key, and foreign keys for
//! relationship inference. Discovery is lazy per entity and memoized for the
//! lifetime of one config snapshot; a hot-reload drops the whole cache.
//!
//! Relational backends are introspected through the [`SchemaIntrospector`]
//! trait (implemented by the database drivers, outside this crate). Document
//! backends are described by a user-supplied GraphQL schema file instead;
//! see [`document`].

pub mod document;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use veneer_config::{Relationship, RuntimeConfig};
use veneer_error::{Result, VeneerError};

// =============================================================================
// Column types
// =============================================================================

/// Engine-internal column type.
///
/// The fixed mapping to GraphQL scalars lives in
/// [`DbType::graphql_type_name`]; binding metadata for drivers rides along
/// with every parameter so values are coerced without implicit conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Bigint,
    /// Character data (varchar, text, nvarchar...).
    String,
    /// UUID / uniqueidentifier.
    Uuid,
    /// Boolean / bit.
    Boolean,
    /// Date-time (timestamp, datetime2...).
    DateTime,
    /// Floating point (real, float, double precision).
    Float,
    /// Fixed-precision decimal / numeric / money.
    Decimal,
    /// Binary data (bytea, varbinary).
    Bytes,
}

impl DbType {
    /// GraphQL scalar this column type surfaces as.
    #[must_use]
    pub const fn graphql_type_name(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Bigint => "Long",
            Self::String => "String",
            Self::Uuid => "ID",
            Self::Boolean => "Boolean",
            Self::DateTime => "DateTime",
            Self::Float | Self::Decimal => "Float",
            Self::Bytes => "ByteArray",
        }
    }

    /// Whether ordering comparisons (`gt`, `lt`, ...) make sense.
    #[must_use]
    pub const fn is_comparable(self) -> bool {
        !matches!(self, Self::Bytes | Self::Boolean)
    }

    /// Whether the string operators (`contains`, `startsWith`, `endsWith`)
    /// apply.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::String)
    }

    /// Map a backend type name (e.g. `varchar(255)`, `timestamp with time
    /// zone`) onto the engine type. Unknown names default to [`Self::String`].
    #[must_use]
    pub fn from_sql_type(sql_type: &str) -> Self {
        let base = sql_type
            .split(['(', ' '])
            .next()
            .unwrap_or(sql_type)
            .to_ascii_lowercase();
        match base.as_str() {
            "int" | "integer" | "int4" | "smallint" | "int2" | "tinyint" | "serial" => Self::Int,
            "bigint" | "int8" | "bigserial" => Self::Bigint,
            "uuid" | "uniqueidentifier" => Self::Uuid,
            "bit" | "bool" | "boolean" => Self::Boolean,
            "date" | "datetime" | "datetime2" | "smalldatetime" | "timestamp" | "timestamptz"
            | "time" | "datetimeoffset" => Self::DateTime,
            "real" | "float" | "float4" | "float8" | "double" => Self::Float,
            "decimal" | "numeric" | "money" | "smallmoney" => Self::Decimal,
            "bytea" | "varbinary" | "binary" | "blob" | "image" => Self::Bytes,
            _ => Self::String,
        }
    }
}

// =============================================================================
// Table shape
// =============================================================================

/// One column of a physical object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    /// Column name.
    pub name: String,

    /// Engine-internal type.
    pub db_type: DbType,

    /// Whether NULL is admitted.
    pub nullable: bool,

    /// Default value expression, if any.
    pub default: Option<String>,

    /// Identity / auto-increment / generated column. Excluded from create
    /// inputs.
    pub auto_generated: bool,
}

/// A foreign key edge discovered by introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing columns, in key order.
    pub columns: Vec<String>,

    /// Referenced physical object.
    pub ref_table: String,

    /// Referenced columns, paired with `columns`.
    pub ref_columns: Vec<String>,
}

/// A stored-procedure parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcParameter {
    /// Parameter name, without any dialect sigil.
    pub name: String,

    /// Engine-internal type.
    pub db_type: DbType,

    /// Whether the parameter has a server-side default.
    pub has_default: bool,
}

/// The discovered shape of a physical object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableShape {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnShape>,

    /// Primary-key column names.
    pub primary_key: Vec<String>,

    /// Outbound foreign keys.
    pub foreign_keys: Vec<ForeignKey>,

    /// Stored-procedure parameters (empty for tables and views).
    pub parameters: Vec<ProcParameter>,
}

impl TableShape {
    /// Look up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All column names, in ordinal order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Type of a column, erroring on unknown names.
    ///
    /// # Errors
    ///
    /// `BadRequest` naming the column when it does not exist.
    pub fn column_type(&self, name: &str) -> Result<DbType> {
        self.column(name)
            .map(|c| c.db_type)
            .ok_or_else(|| VeneerError::bad_request(format!("Unknown column '{name}'")))
    }
}

// =============================================================================
// Introspection
// =============================================================================

/// Thin introspection interface implemented by database drivers.
///
/// One implementation exists per backend kind outside this crate; tests
/// inject a canned implementation.
#[async_trait::async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Describe a physical object by name.
    async fn describe(&self, object: &str) -> Result<TableShape>;
}

/// Lazy, per-snapshot metadata cache.
///
/// Lives and dies with one config snapshot: the engine builds a fresh
/// provider whenever the loader publishes a new generation, so reloads
/// invalidate atomically.
pub struct MetadataProvider {
    introspector: Arc<dyn SchemaIntrospector>,
    cache: DashMap<String, Arc<TableShape>>,
}

impl MetadataProvider {
    /// Create a provider over a driver-supplied introspector.
    #[must_use]
    pub fn new(introspector: Arc<dyn SchemaIntrospector>) -> Self {
        Self {
            introspector,
            cache: DashMap::new(),
        }
    }

    /// Shape of the object backing `entity_name`, memoized.
    ///
    /// The entity's configured `key-fields` override the introspected
    /// primary key (views have none to introspect).
    ///
    /// # Errors
    ///
    /// `EntityNotFound` for names absent from the catalog; introspection
    /// failures are surfaced as `ErrorInInitialization`.
    pub async fn describe(
        &self,
        config: &RuntimeConfig,
        entity_name: &str,
    ) -> Result<Arc<TableShape>> {
        if let Some(shape) = self.cache.get(entity_name) {
            return Ok(shape.clone());
        }

        let entity = config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;

        let mut shape = self
            .introspector
            .describe(entity.object())
            .await
            .map_err(|e| {
                VeneerError::init(format!(
                    "Cannot introspect source of entity '{entity_name}': {e}"
                ))
            })?;

        let key_override = entity.source.key_fields();
        if !key_override.is_empty() {
            shape.primary_key = key_override.to_vec();
        }

        let shape = Arc::new(shape);
        self.cache.insert(entity_name.to_string(), shape.clone());
        Ok(shape)
    }
}

impl std::fmt::Debug for MetadataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataProvider")
            .field("cached_entities", &self.cache.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Join resolution
// =============================================================================

/// Resolved join columns for a relationship: `(source_column, target_column)`
/// pairs, plus the link table bridge when the edge is many-to-many.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedJoin {
    /// Equi-join pairs between source and target (or source and link table).
    pub pairs: Vec<(String, String)>,

    /// Present for many-to-many edges.
    pub link: Option<LinkJoin>,
}

/// Link-table bridge of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkJoin {
    /// Physical link table name.
    pub object: String,

    /// `(source_entity_column, link_column)` pairs.
    pub source_pairs: Vec<(String, String)>,

    /// `(link_column, target_entity_column)` pairs.
    pub target_pairs: Vec<(String, String)>,
}

/// Resolve the join columns of a relationship.
///
/// Explicit `source.fields`/`target.fields` win. Otherwise the foreign keys
/// of both shapes are searched; exactly one candidate must exist.
///
/// # Errors
///
/// `BadRequest` when no join can be derived (`RelationshipUnresolvable`) or
/// when several foreign keys make the edge ambiguous
/// (`RelationshipAmbiguous`).
pub fn resolve_join(
    relationship_name: &str,
    relationship: &Relationship,
    source_object: &str,
    source_shape: &TableShape,
    target_object: &str,
    target_shape: &TableShape,
) -> Result<ResolvedJoin> {
    if let Some(link_object) = &relationship.linking_object {
        // Entity-side columns default to the primary keys; the linking
        // field lists are always explicit (validated at load time).
        let source_columns = if relationship.source_fields.is_empty() {
            &source_shape.primary_key
        } else {
            &relationship.source_fields
        };
        let target_columns = if relationship.target_fields.is_empty() {
            &target_shape.primary_key
        } else {
            &relationship.target_fields
        };
        let source_pairs = zip_fields(source_columns, &relationship.linking_source_fields);
        let target_pairs = zip_fields(&relationship.linking_target_fields, target_columns);
        return Ok(ResolvedJoin {
            pairs: Vec::new(),
            link: Some(LinkJoin {
                object: link_object.clone(),
                source_pairs,
                target_pairs,
            }),
        });
    }

    if relationship.has_explicit_fields() {
        return Ok(ResolvedJoin {
            pairs: zip_fields(&relationship.source_fields, &relationship.target_fields),
            link: None,
        });
    }

    // FK inference: an edge can be carried by a foreign key on either side.
    let mut candidates: Vec<Vec<(String, String)>> = Vec::new();
    for fk in &source_shape.foreign_keys {
        if fk.ref_table == target_object {
            candidates.push(zip_fields(&fk.columns, &fk.ref_columns));
        }
    }
    for fk in &target_shape.foreign_keys {
        if fk.ref_table == source_object {
            candidates.push(zip_fields(&fk.ref_columns, &fk.columns));
        }
    }

    match candidates.len() {
        1 => Ok(ResolvedJoin {
            pairs: candidates.remove(0),
            link: None,
        }),
        0 => Err(VeneerError::bad_request(format!(
            "Relationship '{relationship_name}' cannot be resolved: no foreign key between \
             '{source_object}' and '{target_object}' and no explicit fields configured"
        ))),
        n => Err(VeneerError::bad_request(format!(
            "Relationship '{relationship_name}' is ambiguous: {n} foreign keys exist between \
             '{source_object}' and '{target_object}'; configure source.fields and target.fields"
        ))),
    }
}

fn zip_fields(left: &[String], right: &[String]) -> Vec<(String, String)> {
    left.iter().cloned().zip(right.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{book_shape, publisher_shape, test_config, CannedIntrospector};
    use veneer_config::Cardinality;

    #[test]
    fn sql_type_names_map_to_engine_types() {
        assert_eq!(DbType::from_sql_type("int"), DbType::Int);
        assert_eq!(DbType::from_sql_type("BIGINT"), DbType::Bigint);
        assert_eq!(DbType::from_sql_type("varchar(255)"), DbType::String);
        assert_eq!(DbType::from_sql_type("timestamp with time zone"), DbType::DateTime);
        assert_eq!(DbType::from_sql_type("uniqueidentifier"), DbType::Uuid);
        assert_eq!(DbType::from_sql_type("numeric(10, 2)"), DbType::Decimal);
        assert_eq!(DbType::from_sql_type("mystery_type"), DbType::String);
    }

    #[test]
    fn graphql_scalar_mapping_is_fixed() {
        assert_eq!(DbType::Int.graphql_type_name(), "Int");
        assert_eq!(DbType::Bigint.graphql_type_name(), "Long");
        assert_eq!(DbType::Uuid.graphql_type_name(), "ID");
        assert_eq!(DbType::Decimal.graphql_type_name(), "Float");
        assert_eq!(DbType::Bytes.graphql_type_name(), "ByteArray");
    }

    #[tokio::test]
    async fn describe_memoizes_per_entity() {
        let introspector = Arc::new(CannedIntrospector::default());
        let provider = MetadataProvider::new(introspector.clone());
        let config = test_config();

        let first = provider.describe(&config, "Book").await.expect("shape");
        let second = provider.describe(&config, "Book").await.expect("shape");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(introspector.calls(), 1);
    }

    #[tokio::test]
    async fn describe_unknown_entity_is_not_found() {
        let provider = MetadataProvider::new(Arc::new(CannedIntrospector::default()));
        let config = test_config();
        let err = provider
            .describe(&config, "Nope")
            .await
            .expect_err("must fail");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn explicit_fields_win_over_fk_inference() {
        let rel = Relationship {
            cardinality: Cardinality::One,
            target_entity: "Publisher".to_string(),
            source_fields: vec!["publisher_id".to_string()],
            target_fields: vec!["id".to_string()],
            linking_object: None,
            linking_source_fields: vec![],
            linking_target_fields: vec![],
        };
        let join = resolve_join(
            "publisher",
            &rel,
            "books",
            &book_shape(),
            "publishers",
            &publisher_shape(),
        )
        .expect("resolves");
        assert_eq!(
            join.pairs,
            vec![("publisher_id".to_string(), "id".to_string())]
        );
        assert!(join.link.is_none());
    }

    #[test]
    fn fk_inference_finds_single_candidate() {
        let rel = Relationship {
            cardinality: Cardinality::Many,
            target_entity: "Book".to_string(),
            source_fields: vec![],
            target_fields: vec![],
            linking_object: None,
            linking_source_fields: vec![],
            linking_target_fields: vec![],
        };
        // publisher -> books: the FK lives on the books side.
        let join = resolve_join(
            "books",
            &rel,
            "publishers",
            &publisher_shape(),
            "books",
            &book_shape(),
        )
        .expect("resolves");
        assert_eq!(
            join.pairs,
            vec![("id".to_string(), "publisher_id".to_string())]
        );
    }

    #[test]
    fn missing_join_is_unresolvable() {
        let rel = Relationship {
            cardinality: Cardinality::Many,
            target_entity: "Book".to_string(),
            source_fields: vec![],
            target_fields: vec![],
            linking_object: None,
            linking_source_fields: vec![],
            linking_target_fields: vec![],
        };
        let bare = TableShape::default();
        let err = resolve_join("books", &rel, "orphans", &bare, "books", &book_shape())
            .expect_err("must fail");
        assert!(err.to_string().contains("cannot be resolved"));
    }

    #[test]
    fn multiple_fks_are_ambiguous() {
        let rel = Relationship {
            cardinality: Cardinality::One,
            target_entity: "Publisher".to_string(),
            source_fields: vec![],
            target_fields: vec![],
            linking_object: None,
            linking_source_fields: vec![],
            linking_target_fields: vec![],
        };
        let mut shape = book_shape();
        shape.foreign_keys.push(ForeignKey {
            columns: vec!["distributor_id".to_string()],
            ref_table: "publishers".to_string(),
            ref_columns: vec!["id".to_string()],
        });
        let err = resolve_join(
            "publisher",
            &rel,
            "books",
            &shape,
            "publishers",
            &publisher_shape(),
        )
        .expect_err("must fail");
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn linking_relationship_builds_bridge() {
        let rel = Relationship {
            cardinality: Cardinality::Many,
            target_entity: "Author".to_string(),
            source_fields: vec![],
            target_fields: vec![],
            linking_object: Some("book_authors".to_string()),
            linking_source_fields: vec!["book_id".to_string()],
            linking_target_fields: vec!["author_id".to_string()],
        };
        let author_shape = TableShape {
            columns: vec![ColumnShape {
                name: "id".to_string(),
                db_type: DbType::Int,
                nullable: false,
                default: None,
                auto_generated: true,
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
            parameters: vec![],
        };
        let join = resolve_join(
            "authors",
            &rel,
            "books",
            &book_shape(),
            "authors",
            &author_shape,
        )
        .expect("resolves");
        let link = join.link.expect("link join");
        assert_eq!(link.object, "book_authors");
        assert_eq!(link.source_pairs, vec![("id".to_string(), "book_id".to_string())]);
        assert_eq!(link.target_pairs, vec![("author_id".to_string(), "id".to_string())]);
    }
}
