//! Query planning.
//!
//! The planner compiles a GraphQL selection set or a REST query string into
//! a [`SqlQueryStructure`]: a rooted tree of selects with predicates, order
//! keys, keyset pagination, and one child per nested navigation. The tree is
//! dialect-agnostic; lowering to SQL text happens in [`crate::sql`].
//!
//! User-supplied values never enter the tree as SQL text. They ride in
//! [`Predicate::Compare`] nodes as JSON values and become numbered bind
//! parameters at render time.

pub mod aggregate;
pub mod cursor;
pub mod expr;
pub mod filter;
pub mod mutation;
pub mod query;
pub mod rest;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use veneer_error::{Result, VeneerError};

use crate::metadata::DbType;

// =============================================================================
// Predicates
// =============================================================================

/// Comparison operators admitted in filters and policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of a list.
    In,
    /// Substring match.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
}

impl CompareOp {
    /// Parse a GraphQL filter operator name.
    ///
    /// # Errors
    ///
    /// `BadRequest` on unknown names.
    pub fn from_graphql(name: &str) -> Result<Self> {
        match name {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            "in" => Ok(Self::In),
            "contains" => Ok(Self::Contains),
            "startsWith" => Ok(Self::StartsWith),
            "endsWith" => Ok(Self::EndsWith),
            other => Err(VeneerError::bad_request(format!(
                "Unknown filter operator '{other}'"
            ))),
        }
    }

    /// Whether a column of `db_type` admits this operator.
    #[must_use]
    pub const fn admits(self, db_type: DbType) -> bool {
        match self {
            Self::Eq | Self::Neq | Self::In => true,
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => db_type.is_comparable(),
            Self::Contains | Self::StartsWith | Self::EndsWith => db_type.is_text(),
        }
    }

    /// Mirror of the operator, for flipping `literal op column` into
    /// `column op literal`.
    #[must_use]
    pub const fn mirrored(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
            other => other,
        }
    }
}

/// A boolean expression over one entity's columns.
///
/// Compiled from GraphQL filter inputs, the REST `$filter` grammar, and
/// permission policies; rendered into the WHERE clause with every value
/// bound as a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Constant truth value. Appears when a policy comparison involves only
    /// claims and literals and folds at compile time.
    Literal(bool),

    /// Column comparison against a bound value.
    Compare {
        /// Column name on the entity being filtered.
        column: String,
        /// Comparison operator.
        op: CompareOp,
        /// The user-supplied value; bound, never inlined.
        value: Value,
        /// Column type, carried for driver coercion.
        db_type: DbType,
    },

    /// `IS NULL` / `IS NOT NULL` check.
    IsNull {
        /// Column name.
        column: String,
        /// True for `IS NOT NULL`.
        negated: bool,
    },

    /// Conjunction. Empty is the identity (true).
    And(Vec<Predicate>),

    /// Disjunction. Empty is the identity of OR (false).
    Or(Vec<Predicate>),

    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Conjoin two optional predicates.
    #[must_use]
    pub fn conjoin(left: Option<Self>, right: Option<Self>) -> Option<Self> {
        match (left, right) {
            (Some(l), Some(r)) => Some(Self::And(vec![l, r])),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        }
    }
}

// =============================================================================
// Ordering and pagination
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl OrderDirection {
    /// SQL keyword.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One element of the effective order key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Column name.
    pub column: String,
    /// Direction.
    pub direction: OrderDirection,
    /// Column type, for cursor value binding.
    pub db_type: DbType,
}

// =============================================================================
// Query structure
// =============================================================================

/// JSON shape the backend is asked to produce for one tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonShape {
    /// A single JSON object (by-PK reads, to-one navigations).
    Object,
    /// A JSON array of objects (list queries, to-many navigations).
    Array,
}

/// A projected column and the JSON key it surfaces under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedColumn {
    /// Physical column name.
    pub column: String,
    /// Output key in the JSON document (the GraphQL alias or field name).
    pub output_key: String,
    /// False for columns projected only for joins, ordering, or cursor
    /// encoding; the response shaper strips them.
    pub requested: bool,
}

/// Connection sub-fields requested around a paged list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFields {
    /// `items` was selected.
    pub items: bool,
    /// `hasNextPage` was selected.
    pub has_next_page: bool,
    /// `endCursor` was selected.
    pub end_cursor: bool,
}

/// A nested navigation compiled as a correlated child query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildPlan {
    /// Output key of the navigation field in the parent object.
    pub field: String,
    /// Join columns binding child rows to the parent row.
    pub join: crate::metadata::ResolvedJoin,
    /// The child query tree.
    pub plan: SqlQueryStructure,
}

/// The rooted tree a request compiles into.
///
/// One node per entity in the selection; children are correlated subqueries
/// projected as JSON objects or arrays in the parent's output.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQueryStructure {
    /// Logical entity name (for masks and error messages).
    pub entity: String,

    /// Physical object name.
    pub source: String,

    /// Projected columns, including force-projected support columns.
    pub columns: Vec<ProjectedColumn>,

    /// AND-combined WHERE predicates (filters, PK, keyset, authorization).
    pub predicates: Vec<Predicate>,

    /// Effective order key. For paged queries this always ends with the
    /// primary key so keyset pagination is stable.
    pub order_by: Vec<OrderKey>,

    /// Page size the caller asked for (capped); the rendered LIMIT is one
    /// more to detect `hasNextPage`.
    pub page_size: Option<u64>,

    /// Connection sub-fields, when the node is a paged connection.
    pub connection: Option<ConnectionFields>,

    /// Nested navigations.
    pub children: Vec<ChildPlan>,

    /// JSON shape of this node's result.
    pub shape: JsonShape,
}

impl SqlQueryStructure {
    /// New empty node over an entity/source pair.
    #[must_use]
    pub fn new(entity: impl Into<String>, source: impl Into<String>, shape: JsonShape) -> Self {
        Self {
            entity: entity.into(),
            source: source.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
            order_by: Vec::new(),
            page_size: None,
            connection: None,
            children: Vec::new(),
            shape,
        }
    }

    /// Rendered LIMIT: page size plus the `hasNextPage` probe row.
    #[must_use]
    pub fn fetch_limit(&self) -> Option<u64> {
        self.page_size.map(|first| first + 1)
    }

    /// Project a column if it is not already projected; keeps the stronger
    /// `requested` flag when both appear.
    pub fn project(&mut self, column: &str, output_key: &str, requested: bool) {
        if let Some(existing) = self
            .columns
            .iter_mut()
            .find(|c| c.column == column && c.output_key == output_key)
        {
            existing.requested |= requested;
            return;
        }
        self.columns.push(ProjectedColumn {
            column: column.to_string(),
            output_key: output_key.to_string(),
            requested,
        });
    }
}
