//! GraphQL filter-input compilation.
//!
//! A filter argument arrives as a JSON object after variable resolution:
//!
//! ```json
//! {
//!   "year": { "gt": 2000 },
//!   "or": [
//!     { "title": { "startsWith": "The" } },
//!     { "featured": { "eq": true } }
//!   ]
//! }
//! ```
//!
//! Sibling keys are implicitly ANDed. Each scalar field maps 1:1 to a SQL
//! comparison; `and`/`or`/`not` map to the boolean connectives; `isNull`
//! lowers to `IS NULL` / `IS NOT NULL`. The empty object is the identity.

use serde_json::Value;
use veneer_error::{Result, VeneerError};

use crate::metadata::TableShape;
use super::{CompareOp, Predicate};

/// Compile a filter-input value into a predicate.
///
/// # Errors
///
/// `BadRequest` for unknown columns, unknown operators, operators applied
/// to types that do not admit them, and malformed nesting.
pub fn compile(filter: &Value, shape: &TableShape) -> Result<Option<Predicate>> {
    let Value::Object(fields) = filter else {
        return Err(VeneerError::bad_request("filter must be an input object"));
    };

    let mut parts = Vec::new();
    for (key, value) in fields {
        match key.as_str() {
            "and" => parts.extend(compile_list(value, shape, "and")?.map(Predicate::And)),
            "or" => parts.extend(compile_list(value, shape, "or")?.map(Predicate::Or)),
            "not" => {
                if let Some(inner) = compile(value, shape)? {
                    parts.push(Predicate::Not(Box::new(inner)));
                }
            }
            column => parts.push(compile_field(column, value, shape)?),
        }
    }

    Ok(match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Predicate::And(parts)),
    })
}

fn compile_list(
    value: &Value,
    shape: &TableShape,
    connective: &str,
) -> Result<Option<Vec<Predicate>>> {
    let Value::Array(items) = value else {
        return Err(VeneerError::bad_request(format!(
            "'{connective}' expects a list of filter objects"
        )));
    };
    let parts: Vec<Predicate> = items
        .iter()
        .map(|item| compile(item, shape))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    Ok((!parts.is_empty()).then_some(parts))
}

fn compile_field(column: &str, operations: &Value, shape: &TableShape) -> Result<Predicate> {
    let db_type = shape.column_type(column)?;

    let Value::Object(ops) = operations else {
        return Err(VeneerError::bad_request(format!(
            "Filter on '{column}' must be an object of operators"
        )));
    };

    let mut parts = Vec::new();
    for (op_name, value) in ops {
        if op_name == "isNull" {
            let negated = !value.as_bool().ok_or_else(|| {
                VeneerError::bad_request(format!("'isNull' on '{column}' expects a boolean"))
            })?;
            parts.push(Predicate::IsNull {
                column: column.to_string(),
                negated,
            });
            continue;
        }

        let op = CompareOp::from_graphql(op_name)?;
        if !op.admits(db_type) {
            return Err(VeneerError::bad_request(format!(
                "Operator '{op_name}' is not valid for column '{column}'"
            )));
        }
        if op == CompareOp::In && !value.is_array() {
            return Err(VeneerError::bad_request(format!(
                "'in' on '{column}' expects a list"
            )));
        }
        parts.push(Predicate::Compare {
            column: column.to_string(),
            op,
            value: value.clone(),
            db_type,
        });
    }

    match parts.len() {
        0 => Err(VeneerError::bad_request(format!(
            "Filter on '{column}' must name at least one operator"
        ))),
        1 => Ok(parts.remove(0)),
        _ => Ok(Predicate::And(parts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DbType;
    use crate::testing::book_shape;
    use serde_json::json;

    #[test]
    fn empty_filter_is_identity() {
        assert_eq!(compile(&json!({}), &book_shape()).expect("compiles"), None);
    }

    #[test]
    fn sibling_fields_are_anded() {
        let predicate = compile(
            &json!({ "year": { "gt": 2000 }, "featured": { "eq": true } }),
            &book_shape(),
        )
        .expect("compiles")
        .expect("non-empty");
        assert!(matches!(predicate, Predicate::And(parts) if parts.len() == 2));
    }

    #[test]
    fn or_list_compiles() {
        let predicate = compile(
            &json!({ "or": [
                { "year": { "lt": 1900 } },
                { "year": { "gt": 2000 } }
            ]}),
            &book_shape(),
        )
        .expect("compiles")
        .expect("non-empty");
        assert!(matches!(predicate, Predicate::Or(parts) if parts.len() == 2));
    }

    #[test]
    fn not_wraps_inner_filter() {
        let predicate = compile(&json!({ "not": { "featured": { "eq": true } } }), &book_shape())
            .expect("compiles")
            .expect("non-empty");
        assert!(matches!(predicate, Predicate::Not(_)));
    }

    #[test]
    fn is_null_lowers_with_polarity() {
        let predicate = compile(&json!({ "title": { "isNull": false } }), &book_shape())
            .expect("compiles")
            .expect("non-empty");
        assert_eq!(
            predicate,
            Predicate::IsNull {
                column: "title".to_string(),
                negated: true,
            }
        );
    }

    #[test]
    fn in_requires_a_list() {
        assert!(compile(&json!({ "year": { "in": 2000 } }), &book_shape()).is_err());
        let predicate = compile(&json!({ "year": { "in": [1999, 2000] } }), &book_shape())
            .expect("compiles")
            .expect("non-empty");
        assert!(matches!(
            predicate,
            Predicate::Compare {
                op: CompareOp::In,
                ..
            }
        ));
    }

    #[test]
    fn string_operator_on_int_is_rejected() {
        let err = compile(&json!({ "year": { "contains": "20" } }), &book_shape())
            .expect_err("must fail");
        assert!(err.to_string().contains("'contains'"));
    }

    #[test]
    fn unknown_column_is_rejected() {
        assert!(compile(&json!({ "nope": { "eq": 1 } }), &book_shape()).is_err());
    }

    #[test]
    fn multiple_operators_on_one_field_are_anded() {
        let predicate = compile(
            &json!({ "year": { "gte": 1990, "lte": 1999 } }),
            &book_shape(),
        )
        .expect("compiles")
        .expect("non-empty");
        match predicate {
            Predicate::And(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(parts.iter().all(|p| matches!(
                    p,
                    Predicate::Compare {
                        db_type: DbType::Int,
                        ..
                    }
                )));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }
}
