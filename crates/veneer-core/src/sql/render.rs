//! Lowering query trees to SQL text.
//!
//! The renderer turns a [`SqlQueryStructure`] into one statement whose
//! single output column (`data`) is a ready-shaped JSON document: nested
//! navigations become correlated subqueries projected with the dialect's
//! JSON functions (`FOR JSON PATH`, `json_build_object`/`json_agg`,
//! `JSON_OBJECT`/`JSON_ARRAYAGG`), so the executor streams the document
//! instead of stitching rows.
//!
//! Every user-supplied value is bound through [`Binder`]; no value ever
//! appears in the SQL text.

use itertools::Itertools;
use serde_json::Value;
use veneer_error::{Result, VeneerError};

use crate::metadata::DbType;
use crate::plan::aggregate::{AggregateFunction, AggregatePlan};
use crate::plan::mutation::{ColumnAssignment, ExecutePlan, MutationKind, MutationPlan};
use crate::plan::{CompareOp, JsonShape, OrderKey, Predicate, SqlQueryStructure};
use super::dialect::{Dialect, JsonStyle, ReturningStyle, UpsertStyle};

/// One bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    /// Canonical name (`@p0`, `@p1`, ...), stable across dialects.
    pub name: String,
    /// Value to bind.
    pub value: Value,
    /// Declared type for driver coercion; prevents implicit-conversion
    /// scans on typed indexes.
    pub db_type: DbType,
}

/// A rendered statement plus its binding table, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    /// The SQL text.
    pub sql: String,
    /// Parameters in order of appearance.
    pub params: Vec<SqlParameter>,
}

/// Collects bind parameters and hands out placeholders.
struct Binder<'a> {
    dialect: &'a Dialect,
    params: Vec<SqlParameter>,
}

impl<'a> Binder<'a> {
    fn new(dialect: &'a Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn bind(&mut self, value: Value, db_type: DbType) -> String {
        let index = self.params.len();
        self.params.push(SqlParameter {
            name: Dialect::param_name(index),
            value,
            db_type,
        });
        self.dialect.placeholder(index)
    }
}

/// Tree-to-SQL renderer for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer {
    dialect: Dialect,
}

impl SqlRenderer {
    /// Renderer for a dialect record.
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// The dialect being rendered.
    #[must_use]
    pub const fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Render a read tree into one JSON-producing statement.
    ///
    /// # Errors
    ///
    /// `BadRequest` when predicate values do not fit their operators (e.g.
    /// a non-string `contains`).
    pub fn render_query(&self, node: &SqlQueryStructure) -> Result<RenderedQuery> {
        let mut binder = Binder::new(&self.dialect);
        let mut aliases = AliasSequence::default();
        let sql = match node.shape {
            JsonShape::Object => self.object_select(node, &mut aliases, &mut binder, None)?,
            JsonShape::Array => self.array_select(node, &mut aliases, &mut binder, None)?,
        };
        Ok(RenderedQuery {
            sql,
            params: binder.params,
        })
    }

    fn object_select(
        &self,
        node: &SqlQueryStructure,
        aliases: &mut AliasSequence,
        binder: &mut Binder<'_>,
        correlation: Option<&Correlation<'_>>,
    ) -> Result<String> {
        let alias = aliases.next();
        let from_clause = self.from_clause(node, &alias, correlation);

        // The select list renders before the WHERE clause so that bind
        // order matches placeholder appearance (MySQL binds positionally).
        match self.dialect.json {
            JsonStyle::ForJsonPath => {
                let items = self.json_path_items(node, &alias, aliases, binder)?;
                let where_clause = self.where_clause(node, &alias, binder, correlation)?;
                Ok(format!(
                    "SELECT TOP (1) {items} FROM {from_clause}{where_clause} \
                     FOR JSON PATH, WITHOUT_ARRAY_WRAPPER"
                ))
            }
            JsonStyle::PostgresJson | JsonStyle::MysqlJson => {
                let object = self.json_object_expr(node, &alias, aliases, binder)?;
                let where_clause = self.where_clause(node, &alias, binder, correlation)?;
                Ok(format!(
                    "SELECT {object} AS {data} FROM {from_clause}{where_clause} LIMIT 1",
                    data = self.dialect.quote_ident("data"),
                ))
            }
        }
    }

    fn array_select(
        &self,
        node: &SqlQueryStructure,
        aliases: &mut AliasSequence,
        binder: &mut Binder<'_>,
        correlation: Option<&Correlation<'_>>,
    ) -> Result<String> {
        let alias = aliases.next();
        let from_clause = self.from_clause(node, &alias, correlation);
        let order_clause = self.order_clause(&node.order_by, &alias);

        match self.dialect.json {
            JsonStyle::ForJsonPath => {
                let items = self.json_path_items(node, &alias, aliases, binder)?;
                let where_clause = self.where_clause(node, &alias, binder, correlation)?;
                let top = node
                    .fetch_limit()
                    .map_or_else(String::new, |n| format!("TOP ({n}) "));
                Ok(format!(
                    "SELECT {top}{items} FROM {from_clause}{where_clause}{order_clause} \
                     FOR JSON PATH"
                ))
            }
            JsonStyle::PostgresJson | JsonStyle::MysqlJson => {
                let object = self.json_object_expr(node, &alias, aliases, binder)?;
                let where_clause = self.where_clause(node, &alias, binder, correlation)?;
                let limit_clause = node
                    .fetch_limit()
                    .map_or_else(String::new, |n| format!(" LIMIT {n}"));
                let sub = aliases.next();
                let (agg_open, agg_close) = match self.dialect.json {
                    JsonStyle::PostgresJson => ("COALESCE(json_agg(", "), '[]')"),
                    _ => ("COALESCE(JSON_ARRAYAGG(", "), JSON_ARRAY())"),
                };
                let row = self.dialect.quote_ident("row");
                let sub_ident = self.dialect.quote_ident(&sub);
                let data = self.dialect.quote_ident("data");
                Ok(format!(
                    "SELECT {agg_open}{sub_ident}.{row}{agg_close} AS {data} FROM \
                     (SELECT {object} AS {row} FROM {from_clause}{where_clause}{order_clause}\
                     {limit_clause}) AS {sub_ident}"
                ))
            }
        }
    }

    /// `'key', expr, ...` pairs for `json_build_object` / `JSON_OBJECT`.
    fn json_object_expr(
        &self,
        node: &SqlQueryStructure,
        alias: &str,
        aliases: &mut AliasSequence,
        binder: &mut Binder<'_>,
    ) -> Result<String> {
        let function = match self.dialect.json {
            JsonStyle::PostgresJson => "json_build_object",
            _ => "JSON_OBJECT",
        };
        let mut pairs = Vec::with_capacity(node.columns.len() + node.children.len());
        for column in &node.columns {
            pairs.push(format!(
                "'{}', {}.{}",
                escape_json_key(&column.output_key),
                self.dialect.quote_ident(alias),
                self.dialect.quote_ident(&column.column),
            ));
        }
        for child in &node.children {
            let correlation = Correlation {
                parent_alias: alias,
                join: &child.join,
            };
            let subquery = match child.plan.shape {
                JsonShape::Object => {
                    self.object_select(&child.plan, aliases, binder, Some(&correlation))?
                }
                JsonShape::Array => {
                    self.array_select(&child.plan, aliases, binder, Some(&correlation))?
                }
            };
            pairs.push(format!(
                "'{}', ({subquery})",
                escape_json_key(&child.field)
            ));
        }
        Ok(format!("{function}({})", pairs.join(", ")))
    }

    /// Select-list items for `FOR JSON PATH`.
    fn json_path_items(
        &self,
        node: &SqlQueryStructure,
        alias: &str,
        aliases: &mut AliasSequence,
        binder: &mut Binder<'_>,
    ) -> Result<String> {
        let mut items = Vec::with_capacity(node.columns.len() + node.children.len());
        for column in &node.columns {
            items.push(format!(
                "{}.{} AS {}",
                self.dialect.quote_ident(alias),
                self.dialect.quote_ident(&column.column),
                self.dialect.quote_ident(&column.output_key),
            ));
        }
        for child in &node.children {
            let correlation = Correlation {
                parent_alias: alias,
                join: &child.join,
            };
            let subquery = match child.plan.shape {
                JsonShape::Object => {
                    self.object_select(&child.plan, aliases, binder, Some(&correlation))?
                }
                JsonShape::Array => {
                    self.array_select(&child.plan, aliases, binder, Some(&correlation))?
                }
            };
            items.push(format!(
                "JSON_QUERY(({subquery})) AS {}",
                self.dialect.quote_ident(&child.field)
            ));
        }
        Ok(items.join(", "))
    }

    fn from_clause(
        &self,
        node: &SqlQueryStructure,
        alias: &str,
        correlation: Option<&Correlation<'_>>,
    ) -> String {
        let mut from = format!(
            "{} AS {}",
            self.dialect.quote_ident(&node.source),
            self.dialect.quote_ident(alias),
        );

        // Many-to-many: bridge through the link table.
        if let Some(link) = correlation.and_then(|c| c.join.link.as_ref()) {
            let link_alias = format!("{alias}_link");
            let on: Vec<String> = link
                .target_pairs
                .iter()
                .map(|(link_col, child_col)| {
                    format!(
                        "{}.{} = {}.{}",
                        self.dialect.quote_ident(&link_alias),
                        self.dialect.quote_ident(link_col),
                        self.dialect.quote_ident(alias),
                        self.dialect.quote_ident(child_col),
                    )
                })
                .collect();
            from.push_str(&format!(
                " INNER JOIN {} AS {} ON {}",
                self.dialect.quote_ident(&link.object),
                self.dialect.quote_ident(&link_alias),
                on.join(" AND "),
            ));
        }

        from
    }

    fn where_clause(
        &self,
        node: &SqlQueryStructure,
        alias: &str,
        binder: &mut Binder<'_>,
        correlation: Option<&Correlation<'_>>,
    ) -> Result<String> {
        let mut conjuncts = Vec::new();

        if let Some(correlation) = correlation {
            match correlation.join.link.as_ref() {
                Some(link) => {
                    let link_alias = format!("{alias}_link");
                    for (parent_col, link_col) in &link.source_pairs {
                        conjuncts.push(format!(
                            "{}.{} = {}.{}",
                            self.dialect.quote_ident(&link_alias),
                            self.dialect.quote_ident(link_col),
                            self.dialect.quote_ident(correlation.parent_alias),
                            self.dialect.quote_ident(parent_col),
                        ));
                    }
                }
                None => {
                    for (parent_col, child_col) in &correlation.join.pairs {
                        conjuncts.push(format!(
                            "{}.{} = {}.{}",
                            self.dialect.quote_ident(alias),
                            self.dialect.quote_ident(child_col),
                            self.dialect.quote_ident(correlation.parent_alias),
                            self.dialect.quote_ident(parent_col),
                        ));
                    }
                }
            }
        }

        for predicate in &node.predicates {
            conjuncts.push(self.predicate_sql(predicate, Some(alias), binder)?);
        }

        Ok(if conjuncts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conjuncts.join(" AND "))
        })
    }

    fn order_clause(&self, order: &[OrderKey], alias: &str) -> String {
        if order.is_empty() {
            return String::new();
        }
        let terms = order
            .iter()
            .map(|key| {
                format!(
                    "{}.{} {}",
                    self.dialect.quote_ident(alias),
                    self.dialect.quote_ident(&key.column),
                    key.direction.sql(),
                )
            })
            .join(", ");
        format!(" ORDER BY {terms}")
    }

    /// Render one predicate. `alias` of `None` leaves columns unqualified
    /// (mutation statements have no table alias).
    fn predicate_sql(
        &self,
        predicate: &Predicate,
        alias: Option<&str>,
        binder: &mut Binder<'_>,
    ) -> Result<String> {
        let column_ref = |column: &str| match alias {
            Some(alias) => format!(
                "{}.{}",
                self.dialect.quote_ident(alias),
                self.dialect.quote_ident(column)
            ),
            None => self.dialect.quote_ident(column),
        };

        match predicate {
            Predicate::Literal(true) => Ok("1 = 1".to_string()),
            Predicate::Literal(false) => Ok("1 = 0".to_string()),
            Predicate::IsNull { column, negated } => Ok(format!(
                "{} IS{} NULL",
                column_ref(column),
                if *negated { " NOT" } else { "" },
            )),
            Predicate::Compare {
                column,
                op,
                value,
                db_type,
            } => self.comparison_sql(&column_ref(column), *op, value, *db_type, binder),
            Predicate::And(parts) => self.connective_sql(parts, " AND ", "1 = 1", alias, binder),
            Predicate::Or(parts) => self.connective_sql(parts, " OR ", "1 = 0", alias, binder),
            Predicate::Not(inner) => Ok(format!(
                "NOT ({})",
                self.predicate_sql(inner, alias, binder)?
            )),
        }
    }

    fn connective_sql(
        &self,
        parts: &[Predicate],
        separator: &str,
        identity: &str,
        alias: Option<&str>,
        binder: &mut Binder<'_>,
    ) -> Result<String> {
        if parts.is_empty() {
            return Ok(identity.to_string());
        }
        let rendered: Vec<String> = parts
            .iter()
            .map(|p| self.predicate_sql(p, alias, binder))
            .collect::<Result<_>>()?;
        Ok(format!("({})", rendered.join(separator)))
    }

    fn comparison_sql(
        &self,
        column_ref: &str,
        op: CompareOp,
        value: &Value,
        db_type: DbType,
        binder: &mut Binder<'_>,
    ) -> Result<String> {
        match op {
            CompareOp::Eq => Ok(format!("{column_ref} = {}", binder.bind(value.clone(), db_type))),
            CompareOp::Neq => Ok(format!("{column_ref} <> {}", binder.bind(value.clone(), db_type))),
            CompareOp::Gt => Ok(format!("{column_ref} > {}", binder.bind(value.clone(), db_type))),
            CompareOp::Gte => Ok(format!("{column_ref} >= {}", binder.bind(value.clone(), db_type))),
            CompareOp::Lt => Ok(format!("{column_ref} < {}", binder.bind(value.clone(), db_type))),
            CompareOp::Lte => Ok(format!("{column_ref} <= {}", binder.bind(value.clone(), db_type))),
            CompareOp::In => {
                let Value::Array(items) = value else {
                    return Err(VeneerError::bad_request("'in' expects a list"));
                };
                if items.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| binder.bind(item.clone(), db_type))
                    .collect();
                Ok(format!("{column_ref} IN ({})", placeholders.join(", ")))
            }
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
                let Some(text) = value.as_str() else {
                    return Err(VeneerError::bad_request(
                        "String operators expect a string value",
                    ));
                };
                let escaped = escape_like(text);
                let pattern = match op {
                    CompareOp::Contains => format!("%{escaped}%"),
                    CompareOp::StartsWith => format!("{escaped}%"),
                    _ => format!("%{escaped}"),
                };
                Ok(format!(
                    "{column_ref} LIKE {}{}",
                    binder.bind(Value::String(pattern), db_type),
                    self.like_escape_clause(),
                ))
            }
        }
    }

    const fn like_escape_clause(&self) -> &'static str {
        // MySQL string literals treat backslash as an escape character
        // themselves, so the clause needs a doubled one.
        match self.dialect.json {
            JsonStyle::MysqlJson => r" ESCAPE '\\'",
            _ => r" ESCAPE '\'",
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Render a mutation plan.
    ///
    /// # Errors
    ///
    /// `BadRequest` for predicate/value mismatches (as in the read path).
    pub fn render_mutation(&self, plan: &MutationPlan) -> Result<RenderedQuery> {
        let mut binder = Binder::new(&self.dialect);
        let sql = match plan.kind {
            MutationKind::Create => self.insert_sql(plan, &mut binder),
            MutationKind::Update => self.update_sql(plan, &mut binder)?,
            MutationKind::Delete => self.delete_sql(plan, &mut binder)?,
            MutationKind::Upsert | MutationKind::UpsertIncremental => {
                self.upsert_sql(plan, &mut binder)?
            }
        };
        Ok(RenderedQuery {
            sql,
            params: binder.params,
        })
    }

    fn insert_sql(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> String {
        let columns: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| self.dialect.quote_ident(&a.column))
            .collect();
        let output = self.returning_clause(&plan.primary_key);
        let values: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| binder.bind(a.value.clone(), a.db_type))
            .collect();

        match self.dialect.returning {
            ReturningStyle::OutputInserted => format!(
                "INSERT INTO {} ({}){output} VALUES ({})",
                self.dialect.quote_ident(&plan.source),
                columns.join(", "),
                values.join(", "),
            ),
            ReturningStyle::Returning => format!(
                "INSERT INTO {} ({}) VALUES ({}){output}",
                self.dialect.quote_ident(&plan.source),
                columns.join(", "),
                values.join(", "),
            ),
            ReturningStyle::None => format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.dialect.quote_ident(&plan.source),
                columns.join(", "),
                values.join(", "),
            ),
        }
    }

    fn update_sql(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        let assignments: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| {
                format!(
                    "{} = {}",
                    self.dialect.quote_ident(&a.column),
                    binder.bind(a.value.clone(), a.db_type),
                )
            })
            .collect();
        let output = self.returning_clause(&plan.primary_key);
        let where_clause = self.mutation_where(plan, binder)?;

        Ok(match self.dialect.returning {
            ReturningStyle::OutputInserted => format!(
                "UPDATE {} SET {}{output}{where_clause}",
                self.dialect.quote_ident(&plan.source),
                assignments.join(", "),
            ),
            ReturningStyle::Returning => format!(
                "UPDATE {} SET {}{where_clause}{output}",
                self.dialect.quote_ident(&plan.source),
                assignments.join(", "),
            ),
            ReturningStyle::None => format!(
                "UPDATE {} SET {}{where_clause}",
                self.dialect.quote_ident(&plan.source),
                assignments.join(", "),
            ),
        })
    }

    fn delete_sql(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        let where_clause = self.mutation_where(plan, binder)?;
        let output = match self.dialect.returning {
            ReturningStyle::OutputInserted => {
                let columns: Vec<String> = plan
                    .primary_key
                    .iter()
                    .map(|c| format!("DELETED.{}", self.dialect.quote_ident(c)))
                    .collect();
                format!(" OUTPUT {}", columns.join(", "))
            }
            ReturningStyle::Returning => self.returning_clause(&plan.primary_key),
            ReturningStyle::None => String::new(),
        };

        Ok(match self.dialect.returning {
            ReturningStyle::OutputInserted => format!(
                "DELETE FROM {}{output}{where_clause}",
                self.dialect.quote_ident(&plan.source),
            ),
            _ => format!(
                "DELETE FROM {}{where_clause}{output}",
                self.dialect.quote_ident(&plan.source),
            ),
        })
    }

    fn upsert_sql(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        match self.dialect.upsert {
            UpsertStyle::OnConflict => self.upsert_on_conflict(plan, binder),
            UpsertStyle::OnDuplicateKey => Ok(self.upsert_on_duplicate(plan, binder)),
            UpsertStyle::Merge => self.upsert_merge(plan, binder),
        }
    }

    fn upsert_on_conflict(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        let all: Vec<&ColumnAssignment> = plan.key.iter().chain(&plan.assignments).collect();
        let columns: Vec<String> = all
            .iter()
            .map(|a| self.dialect.quote_ident(&a.column))
            .collect();
        let values: Vec<String> = all
            .iter()
            .map(|a| binder.bind(a.value.clone(), a.db_type))
            .collect();
        let conflict_target: Vec<String> = plan
            .primary_key
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect();
        let updates: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| {
                let quoted = self.dialect.quote_ident(&a.column);
                format!("{quoted} = EXCLUDED.{quoted}")
            })
            .collect();

        // Policy predicates guard the update arm; the key equality they
        // repeat is trivially true on the conflicting row.
        let guard = if plan.predicates.is_empty() {
            String::new()
        } else {
            let rendered: Vec<String> = plan
                .predicates
                .iter()
                .map(|p| self.predicate_sql(p, Some(&plan.source), binder))
                .collect::<Result<_>>()?;
            format!(" WHERE {}", rendered.join(" AND "))
        };

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}{guard}{}",
            self.dialect.quote_ident(&plan.source),
            columns.join(", "),
            values.join(", "),
            conflict_target.join(", "),
            updates.join(", "),
            self.returning_clause(&plan.primary_key),
        ))
    }

    fn upsert_on_duplicate(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> String {
        let all: Vec<&ColumnAssignment> = plan.key.iter().chain(&plan.assignments).collect();
        let columns: Vec<String> = all
            .iter()
            .map(|a| self.dialect.quote_ident(&a.column))
            .collect();
        let values: Vec<String> = all
            .iter()
            .map(|a| binder.bind(a.value.clone(), a.db_type))
            .collect();
        let updates: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| {
                let quoted = self.dialect.quote_ident(&a.column);
                format!("{quoted} = VALUES({quoted})")
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.dialect.quote_ident(&plan.source),
            columns.join(", "),
            values.join(", "),
            updates.join(", "),
        )
    }

    fn upsert_merge(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        let target = self.dialect.quote_ident("T");
        let source = self.dialect.quote_ident("S");
        let all: Vec<&ColumnAssignment> = plan.key.iter().chain(&plan.assignments).collect();

        let using: Vec<String> = all
            .iter()
            .map(|a| {
                format!(
                    "{} AS {}",
                    binder.bind(a.value.clone(), a.db_type),
                    self.dialect.quote_ident(&a.column),
                )
            })
            .collect();
        let on: Vec<String> = plan
            .primary_key
            .iter()
            .map(|c| {
                let quoted = self.dialect.quote_ident(c);
                format!("{target}.{quoted} = {source}.{quoted}")
            })
            .collect();
        let matched_guard = if plan.predicates.is_empty() {
            String::new()
        } else {
            let rendered: Vec<String> = plan
                .predicates
                .iter()
                .map(|p| self.predicate_sql(p, Some("T"), binder))
                .collect::<Result<_>>()?;
            format!(" AND {}", rendered.join(" AND "))
        };
        let updates: Vec<String> = plan
            .assignments
            .iter()
            .map(|a| {
                let quoted = self.dialect.quote_ident(&a.column);
                format!("{target}.{quoted} = {source}.{quoted}")
            })
            .collect();
        let insert_columns: Vec<String> = all
            .iter()
            .map(|a| self.dialect.quote_ident(&a.column))
            .collect();
        let insert_values: Vec<String> = all
            .iter()
            .map(|a| format!("{source}.{}", self.dialect.quote_ident(&a.column)))
            .collect();
        let output: Vec<String> = plan
            .primary_key
            .iter()
            .map(|c| format!("INSERTED.{}", self.dialect.quote_ident(c)))
            .collect();

        Ok(format!(
            "MERGE INTO {} WITH (HOLDLOCK) AS {target} USING (SELECT {}) AS {source} ON {} \
             WHEN MATCHED{matched_guard} THEN UPDATE SET {} \
             WHEN NOT MATCHED THEN INSERT ({}) VALUES ({}) OUTPUT {};",
            self.dialect.quote_ident(&plan.source),
            using.join(", "),
            on.join(" AND "),
            updates.join(", "),
            insert_columns.join(", "),
            insert_values.join(", "),
            output.join(", "),
        ))
    }

    fn mutation_where(&self, plan: &MutationPlan, binder: &mut Binder<'_>) -> Result<String> {
        if plan.predicates.is_empty() {
            return Ok(String::new());
        }
        let rendered: Vec<String> = plan
            .predicates
            .iter()
            .map(|p| self.predicate_sql(p, None, binder))
            .collect::<Result<_>>()?;
        Ok(format!(" WHERE {}", rendered.join(" AND ")))
    }

    fn returning_clause(&self, primary_key: &[String]) -> String {
        match self.dialect.returning {
            ReturningStyle::OutputInserted => {
                let columns: Vec<String> = primary_key
                    .iter()
                    .map(|c| format!("INSERTED.{}", self.dialect.quote_ident(c)))
                    .collect();
                format!(" OUTPUT {}", columns.join(", "))
            }
            ReturningStyle::Returning => {
                let columns: Vec<String> = primary_key
                    .iter()
                    .map(|c| self.dialect.quote_ident(c))
                    .collect();
                format!(" RETURNING {}", columns.join(", "))
            }
            ReturningStyle::None => String::new(),
        }
    }

    // =========================================================================
    // Stored procedures
    // =========================================================================

    /// Render a stored-procedure call.
    #[must_use]
    pub fn render_execute(&self, plan: &ExecutePlan) -> RenderedQuery {
        let mut binder = Binder::new(&self.dialect);
        let sql = match self.dialect.json {
            JsonStyle::ForJsonPath => {
                let arguments: Vec<String> = plan
                    .parameters
                    .iter()
                    .map(|p| {
                        format!("@{} = {}", p.column, binder.bind(p.value.clone(), p.db_type))
                    })
                    .collect();
                format!(
                    "EXEC {} {}",
                    self.dialect.quote_ident(&plan.source),
                    arguments.join(", "),
                )
            }
            JsonStyle::PostgresJson => {
                let arguments: Vec<String> = plan
                    .parameters
                    .iter()
                    .map(|p| binder.bind(p.value.clone(), p.db_type))
                    .collect();
                format!(
                    "SELECT * FROM {}({})",
                    self.dialect.quote_ident(&plan.source),
                    arguments.join(", "),
                )
            }
            JsonStyle::MysqlJson => {
                let arguments: Vec<String> = plan
                    .parameters
                    .iter()
                    .map(|p| binder.bind(p.value.clone(), p.db_type))
                    .collect();
                format!(
                    "CALL {}({})",
                    self.dialect.quote_ident(&plan.source),
                    arguments.join(", "),
                )
            }
        };
        RenderedQuery {
            sql,
            params: binder.params,
        }
    }

    // =========================================================================
    // Aggregations
    // =========================================================================

    /// Render a groupBy plan into a JSON array of
    /// `{<byCol>: ..., <alias>: ...}` objects.
    ///
    /// # Errors
    ///
    /// As the read path.
    pub fn render_aggregate(&self, plan: &AggregatePlan) -> Result<RenderedQuery> {
        let mut binder = Binder::new(&self.dialect);
        let alias = "t0";
        let qualified = |column: &str| {
            format!(
                "{}.{}",
                self.dialect.quote_ident(alias),
                self.dialect.quote_ident(column)
            )
        };

        let mut select_items = Vec::new();
        for column in &plan.group_columns {
            select_items.push(format!(
                "{} AS {}",
                qualified(column),
                self.dialect.quote_ident(column)
            ));
        }
        for aggregation in &plan.aggregations {
            let argument = match &aggregation.column {
                Some(column) if aggregation.function == AggregateFunction::CountDistinct => {
                    format!("DISTINCT {}", qualified(column))
                }
                Some(column) => qualified(column),
                None => "*".to_string(),
            };
            select_items.push(format!(
                "{}({argument}) AS {}",
                aggregation.function.sql_name(),
                self.dialect.quote_ident(&aggregation.alias),
            ));
        }

        let mut conjuncts = Vec::new();
        for predicate in &plan.predicates {
            conjuncts.push(self.predicate_sql(predicate, Some(alias), &mut binder)?);
        }
        let where_clause = if conjuncts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conjuncts.join(" AND "))
        };
        let group_clause = if plan.group_columns.is_empty() {
            String::new()
        } else {
            let terms: Vec<String> = plan.group_columns.iter().map(|c| qualified(c)).collect();
            format!(" GROUP BY {}", terms.join(", "))
        };

        let inner = format!(
            "SELECT {} FROM {} AS {}{where_clause}{group_clause}",
            select_items.join(", "),
            self.dialect.quote_ident(&plan.source),
            self.dialect.quote_ident(alias),
        );

        let sql = match self.dialect.json {
            JsonStyle::ForJsonPath => format!("{inner} FOR JSON PATH"),
            JsonStyle::PostgresJson | JsonStyle::MysqlJson => {
                let mut keys: Vec<String> = Vec::new();
                for column in &plan.group_columns {
                    keys.push(column.clone());
                }
                for aggregation in &plan.aggregations {
                    keys.push(aggregation.alias.clone());
                }
                let g = self.dialect.quote_ident("g");
                let pairs: Vec<String> = keys
                    .iter()
                    .map(|key| {
                        format!(
                            "'{}', {g}.{}",
                            escape_json_key(key),
                            self.dialect.quote_ident(key)
                        )
                    })
                    .collect();
                let object = match self.dialect.json {
                    JsonStyle::PostgresJson => format!("json_build_object({})", pairs.join(", ")),
                    _ => format!("JSON_OBJECT({})", pairs.join(", ")),
                };
                let aggregated = match self.dialect.json {
                    JsonStyle::PostgresJson => format!("COALESCE(json_agg({object}), '[]')"),
                    _ => format!("COALESCE(JSON_ARRAYAGG({object}), JSON_ARRAY())"),
                };
                format!(
                    "SELECT {aggregated} AS {data} FROM ({inner}) AS {g}",
                    data = self.dialect.quote_ident("data"),
                )
            }
        };

        Ok(RenderedQuery {
            sql,
            params: binder.params,
        })
    }
}

/// Correlation context for a child subquery.
struct Correlation<'a> {
    parent_alias: &'a str,
    join: &'a crate::metadata::ResolvedJoin,
}

/// Hands out `t0`, `t1`, ... table aliases.
#[derive(Debug, Default)]
struct AliasSequence {
    next: usize,
}

impl AliasSequence {
    fn next(&mut self) -> String {
        let alias = format!("t{}", self.next);
        self.next += 1;
        alias
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', r"\\")
        .replace('%', r"\%")
        .replace('_', r"\_")
}

fn escape_json_key(key: &str) -> String {
    key.replace('\'', "''")
}
