//! Permission-policy compilation.
//!
//! A policy expression like `@item.author_id eq @claims.sub` compiles into
//! the planner's [`Predicate`] AST. `@claims.<name>` references are replaced
//! by the principal's claim values at compile time; `@item.<field>`
//! references stay symbolic as column references and are resolved by the
//! database per row.

use std::collections::HashMap;

use serde_json::Value;
use veneer_error::{Result, VeneerError};

use crate::metadata::TableShape;
use crate::plan::expr::{self, Operand, OperandResolver};
use crate::plan::Predicate;

const ITEM_PREFIX: &str = "@item.";
const CLAIMS_PREFIX: &str = "@claims.";

/// Compile a policy expression against a principal's claims and an entity
/// shape.
///
/// # Errors
///
/// `BadRequest` for grammar violations and unknown `@item` columns;
/// `AuthorizationFailed` when a referenced claim is absent from the
/// principal.
pub fn compile(
    expression: &str,
    claims: &HashMap<String, Value>,
    shape: &TableShape,
) -> Result<Predicate> {
    let resolver = PolicyResolver { claims, shape };
    expr::parse(expression, &resolver)
}

struct PolicyResolver<'a> {
    claims: &'a HashMap<String, Value>,
    shape: &'a TableShape,
}

impl OperandResolver for PolicyResolver<'_> {
    fn resolve(&self, ident: &str) -> Result<Operand> {
        if let Some(field) = ident.strip_prefix(ITEM_PREFIX) {
            let db_type = self.shape.column_type(field).map_err(|_| {
                VeneerError::bad_request(format!(
                    "Policy references unknown column '@item.{field}'"
                ))
            })?;
            return Ok(Operand::Column(field.to_string(), db_type));
        }
        if let Some(name) = ident.strip_prefix(CLAIMS_PREFIX) {
            let value = self.claims.get(name).ok_or_else(|| {
                VeneerError::forbidden(format!("Claim '{name}' required by policy is not present"))
            })?;
            return Ok(Operand::Literal(value.clone()));
        }
        Err(VeneerError::bad_request(format!(
            "Policy operand '{ident}' must be a literal, '@item.<field>', or '@claims.<name>'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DbType;
    use crate::plan::CompareOp;
    use crate::testing::book_shape;
    use serde_json::json;

    fn claims() -> HashMap<String, Value> {
        HashMap::from([
            ("sub".to_string(), json!(42)),
            ("is_admin".to_string(), json!(false)),
        ])
    }

    #[test]
    fn claims_bind_as_literals_items_stay_symbolic() {
        let predicate =
            compile("@item.author_id eq @claims.sub", &claims(), &book_shape()).expect("compiles");
        assert_eq!(
            predicate,
            Predicate::Compare {
                column: "author_id".to_string(),
                op: CompareOp::Eq,
                value: json!(42),
                db_type: DbType::Int,
            }
        );
    }

    #[test]
    fn boolean_connectives_compose() {
        let predicate = compile(
            "@item.author_id eq @claims.sub and not @item.year lt 1900",
            &claims(),
            &book_shape(),
        )
        .expect("compiles");
        assert!(matches!(predicate, Predicate::And(parts) if parts.len() == 2));
    }

    #[test]
    fn claims_only_comparison_folds() {
        let predicate =
            compile("@claims.is_admin eq true", &claims(), &book_shape()).expect("compiles");
        assert_eq!(predicate, Predicate::Literal(false));
    }

    #[test]
    fn missing_claim_is_authorization_failure() {
        let err = compile("@item.author_id eq @claims.tenant", &claims(), &book_shape())
            .expect_err("must fail");
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn unknown_item_column_is_bad_request() {
        let err = compile("@item.nope eq 1", &claims(), &book_shape()).expect_err("must fail");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn bare_identifier_is_rejected() {
        let err = compile("author_id eq 1", &claims(), &book_shape()).expect_err("must fail");
        assert!(err.to_string().contains("@item"));
    }
}
