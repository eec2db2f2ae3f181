//! Keyset pagination cursors.
//!
//! A cursor is a base64-url-encoded JSON array capturing the last row's
//! values along the effective order key. Re-issuing the query with the
//! cursor produces a strict "tuple-greater-than" predicate, which keeps
//! pages stable under concurrent inserts (unlike OFFSET).
//!
//! A cursor is only valid against the order key it was minted for: decode
//! compares the embedded column/direction list with the current one and
//! rejects mismatches deterministically, without echoing row data.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use veneer_error::{Result, VeneerError};

use super::{CompareOp, OrderDirection, OrderKey, Predicate};

/// Hard cap on `first`; values above it are rejected with `BadRequest`.
pub const MAX_PAGE_SIZE: u64 = 1000;

/// Page size applied when the caller does not pass `first`.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// One element of a decoded cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorElement {
    /// Order-key column.
    pub column: String,

    /// The last row's value for that column.
    pub value: Value,

    /// Direction the column was ordered by when the cursor was minted.
    pub direction: OrderDirection,
}

/// Validate and clamp a requested page size.
///
/// # Errors
///
/// `BadRequest` for zero, negative, or above-cap values.
pub fn page_size(first: Option<i64>) -> Result<u64> {
    match first {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(n) => {
            let n = u64::try_from(n).ok().filter(|&n| n > 0).ok_or_else(|| {
                VeneerError::bad_request("'first' must be a positive integer")
            })?;
            if n > MAX_PAGE_SIZE {
                return Err(VeneerError::bad_request(format!(
                    "'first' must not exceed {MAX_PAGE_SIZE}"
                )));
            }
            Ok(n)
        }
    }
}

/// Encode a cursor from a result row's order-key values.
///
/// The planner force-projects every order-key column, so `row` always
/// carries them even when the caller did not select them.
///
/// # Errors
///
/// Internal error if a force-projected column is missing from the row.
pub fn encode(row: &Value, order: &[OrderKey]) -> Result<String> {
    let elements: Vec<CursorElement> = order
        .iter()
        .map(|key| {
            row.get(&key.column)
                .cloned()
                .map(|value| CursorElement {
                    column: key.column.clone(),
                    value,
                    direction: key.direction,
                })
                .ok_or_else(|| {
                    VeneerError::internal(format!(
                        "Order-key column '{}' missing from result row",
                        key.column
                    ))
                })
        })
        .collect::<Result<_>>()?;

    let json = serde_json::to_vec(&elements)
        .map_err(|e| VeneerError::internal(format!("Cannot encode cursor: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a cursor and check it against the current order key.
///
/// # Errors
///
/// `BadRequest` for undecodable tokens and for cursors minted against a
/// different order key. The message never contains row data.
pub fn decode(token: &str, order: &[OrderKey]) -> Result<Vec<CursorElement>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| VeneerError::bad_request("'after' is not a valid cursor"))?;
    let elements: Vec<CursorElement> = serde_json::from_slice(&bytes)
        .map_err(|_| VeneerError::bad_request("'after' is not a valid cursor"))?;

    let matches_order = elements.len() == order.len()
        && elements
            .iter()
            .zip(order)
            .all(|(e, k)| e.column == k.column && e.direction == k.direction);
    if !matches_order {
        return Err(VeneerError::bad_request(
            "'after' cursor does not match the requested ordering",
        ));
    }

    Ok(elements)
}

/// Build the strict keyset predicate for a decoded cursor.
///
/// For an order key `(a ASC, b DESC, id ASC)` with cursor values
/// `(va, vb, vid)` this expands to:
///
/// ```text
/// (a > va) OR (a = va AND b < vb) OR (a = va AND b = vb AND id > vid)
/// ```
#[must_use]
pub fn keyset_predicate(elements: &[CursorElement], order: &[OrderKey]) -> Predicate {
    let mut alternatives = Vec::with_capacity(elements.len());

    for (depth, (element, key)) in elements.iter().zip(order).enumerate() {
        let mut conjuncts: Vec<Predicate> = elements
            .iter()
            .zip(order)
            .take(depth)
            .map(|(prior, prior_key)| Predicate::Compare {
                column: prior.column.clone(),
                op: CompareOp::Eq,
                value: prior.value.clone(),
                db_type: prior_key.db_type,
            })
            .collect();

        let strict = match key.direction {
            OrderDirection::Asc => CompareOp::Gt,
            OrderDirection::Desc => CompareOp::Lt,
        };
        conjuncts.push(Predicate::Compare {
            column: element.column.clone(),
            op: strict,
            value: element.value.clone(),
            db_type: key.db_type,
        });

        alternatives.push(if conjuncts.len() == 1 {
            conjuncts.remove(0)
        } else {
            Predicate::And(conjuncts)
        });
    }

    if alternatives.len() == 1 {
        alternatives.remove(0)
    } else {
        Predicate::Or(alternatives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DbType;
    use serde_json::json;

    fn order() -> Vec<OrderKey> {
        vec![
            OrderKey {
                column: "year".to_string(),
                direction: OrderDirection::Desc,
                db_type: DbType::Int,
            },
            OrderKey {
                column: "id".to_string(),
                direction: OrderDirection::Asc,
                db_type: DbType::Int,
            },
        ]
    }

    #[test]
    fn cursor_round_trips() {
        let row = json!({ "id": 7, "year": 2001, "title": "x" });
        let token = encode(&row, &order()).expect("encodes");
        let elements = decode(&token, &order()).expect("decodes");
        assert_eq!(elements[0].value, json!(2001));
        assert_eq!(elements[1].value, json!(7));
    }

    #[test]
    fn cursor_is_url_safe() {
        let row = json!({ "id": 98765, "year": -3 });
        let token = encode(&row, &order()).expect("encodes");
        assert!(!token.contains('+') && !token.contains('/') && !token.contains('='));
    }

    #[test]
    fn garbage_token_is_bad_request() {
        let err = decode("not-base64!!", &order()).expect_err("must fail");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn order_mismatch_is_deterministic_and_data_free() {
        let row = json!({ "id": 7, "year": 2001 });
        let token = encode(&row, &order()).expect("encodes");

        let different = vec![OrderKey {
            column: "id".to_string(),
            direction: OrderDirection::Asc,
            db_type: DbType::Int,
        }];
        let err = decode(&token, &different).expect_err("must fail");
        assert_eq!(err.status(), 400);
        assert!(!err.to_string().contains("2001"), "no row data in error");
    }

    #[test]
    fn direction_flip_invalidates_cursor() {
        let row = json!({ "id": 7, "year": 2001 });
        let token = encode(&row, &order()).expect("encodes");

        let mut flipped = order();
        flipped[0].direction = OrderDirection::Asc;
        assert!(decode(&token, &flipped).is_err());
    }

    #[test]
    fn keyset_predicate_expands_tuple_comparison() {
        let row = json!({ "id": 7, "year": 2001 });
        let token = encode(&row, &order()).expect("encodes");
        let elements = decode(&token, &order()).expect("decodes");

        let predicate = keyset_predicate(&elements, &order());
        match predicate {
            Predicate::Or(alternatives) => {
                assert_eq!(alternatives.len(), 2);
                // First alternative: year < 2001 (DESC order).
                assert!(matches!(
                    &alternatives[0],
                    Predicate::Compare { column, op: CompareOp::Lt, .. } if column == "year"
                ));
                // Second: year = 2001 AND id > 7.
                assert!(matches!(
                    &alternatives[1],
                    Predicate::And(parts) if parts.len() == 2
                ));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn page_size_caps_and_defaults() {
        assert_eq!(page_size(None).expect("default"), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(2)).expect("two"), 2);
        assert!(page_size(Some(0)).is_err());
        assert!(page_size(Some(-1)).is_err());
        assert!(page_size(Some(1001)).is_err());
        assert_eq!(page_size(Some(1000)).expect("cap"), 1000);
    }
}
