//! Response shaping.
//!
//! The executor hands back the JSON document the database produced. The
//! shaper finishes it for the wire: strips force-projected support columns
//! (cursor/order keys the caller never asked for), decodes the `+1` keyset
//! probe row into `hasNextPage`, encodes `endCursor` from the last row's
//! order-key values, wraps nested to-many navigations as connections, and
//! builds the REST `{"value": [...], "nextLink": ...}` envelope.
//!
//! Stripping to the requested keys also enforces the authorization
//! invariant: planning already verified that every requested column sits
//! inside the caller's mask, per entity, so nothing outside a mask can
//! survive shaping.

use serde_json::{Map, Value};
use veneer_error::{Result, VeneerError};

use crate::plan::aggregate::AggregatePlan;
use crate::plan::{ConnectionFields, JsonShape, SqlQueryStructure, cursor};

/// A shaped page of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedPage {
    /// The rows, probe removed, keys stripped.
    pub items: Vec<Value>,

    /// Whether a further page exists (the probe row was present).
    pub has_next_page: bool,

    /// Cursor of the last row, when one exists.
    pub end_cursor: Option<String>,
}

/// Shape a list result.
///
/// # Errors
///
/// Internal error when the database returned something other than an array
/// (or null for no rows).
pub fn shape_list(raw: Value, node: &SqlQueryStructure) -> Result<ShapedPage> {
    let mut rows = match raw {
        Value::Null => Vec::new(),
        Value::Array(rows) => rows,
        other => {
            return Err(VeneerError::internal(format!(
                "expected a JSON array from the database, got {}",
                kind_name(&other)
            )));
        }
    };

    let mut has_next_page = false;
    if let Some(first) = node.page_size {
        let page_len = usize::try_from(first).unwrap_or(usize::MAX);
        if rows.len() > page_len {
            rows.truncate(page_len);
            has_next_page = true;
        }
    }

    // Encode the cursor before stripping removes the order-key columns.
    let end_cursor = match rows.last() {
        Some(last) if !node.order_by.is_empty() => Some(cursor::encode(last, &node.order_by)?),
        _ => None,
    };

    for row in &mut rows {
        shape_row(row, node)?;
    }

    Ok(ShapedPage {
        items: rows,
        has_next_page,
        end_cursor,
    })
}

/// Shape a single-object result (`null` passes through).
///
/// # Errors
///
/// Internal error when the database returned a non-object.
pub fn shape_object(mut raw: Value, node: &SqlQueryStructure) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    shape_row(&mut raw, node)?;
    Ok(raw)
}

fn shape_row(row: &mut Value, node: &SqlQueryStructure) -> Result<()> {
    let Value::Object(fields) = row else {
        return Err(VeneerError::internal(format!(
            "expected a JSON object row, got {}",
            kind_name(row)
        )));
    };

    // Keep the requested scalar keys and the navigation fields; everything
    // else was projected for ordering, cursors, or joins.
    let mut keep: Vec<&str> = node
        .columns
        .iter()
        .filter(|c| c.requested)
        .map(|c| c.output_key.as_str())
        .collect();
    keep.extend(node.children.iter().map(|c| c.field.as_str()));
    fields.retain(|key, _| keep.contains(&key.as_str()));

    for child in &node.children {
        let Some(slot) = fields.get_mut(&child.field) else {
            continue;
        };
        match child.plan.shape {
            JsonShape::Object => {
                let value = std::mem::take(slot);
                *slot = shape_object(value, &child.plan)?;
            }
            JsonShape::Array => {
                let value = std::mem::take(slot);
                let page = shape_list(value, &child.plan)?;
                *slot = connection_value(
                    &page,
                    child.plan.connection.unwrap_or(ConnectionFields {
                        items: true,
                        has_next_page: false,
                        end_cursor: false,
                    }),
                );
            }
        }
    }

    Ok(())
}

/// Assemble a GraphQL connection object, including only the selected
/// sub-fields.
#[must_use]
pub fn connection_value(page: &ShapedPage, fields: ConnectionFields) -> Value {
    let mut connection = Map::new();
    if fields.items {
        connection.insert("items".to_string(), Value::Array(page.items.clone()));
    }
    if fields.has_next_page {
        connection.insert("hasNextPage".to_string(), Value::Bool(page.has_next_page));
    }
    if fields.end_cursor {
        connection.insert(
            "endCursor".to_string(),
            page.end_cursor
                .as_ref()
                .map_or(Value::Null, |c| Value::String(c.clone())),
        );
    }
    Value::Object(connection)
}

/// Assemble the REST collection envelope. `next_link` is attached only when
/// a further page exists.
#[must_use]
pub fn rest_envelope(page: &ShapedPage, next_link: Option<String>) -> Value {
    let mut envelope = Map::new();
    envelope.insert("value".to_string(), Value::Array(page.items.clone()));
    if page.has_next_page {
        if let Some(link) = next_link {
            envelope.insert("nextLink".to_string(), Value::String(link));
        }
    }
    Value::Object(envelope)
}

/// Repack a groupBy result into `{fields, aggregations}` objects.
///
/// # Errors
///
/// Internal error when the database returned a malformed document.
pub fn shape_group_by(raw: Value, plan: &AggregatePlan) -> Result<Value> {
    let rows = match raw {
        Value::Null => Vec::new(),
        Value::Array(rows) => rows,
        other => {
            return Err(VeneerError::internal(format!(
                "expected a JSON array from the database, got {}",
                kind_name(&other)
            )));
        }
    };

    let mut shaped = Vec::with_capacity(rows.len());
    for row in rows {
        let Value::Object(mut row) = row else {
            return Err(VeneerError::internal("expected JSON object rows in groupBy result"));
        };
        let mut fields = Map::new();
        for column in &plan.group_columns {
            fields.insert(column.clone(), row.remove(column).unwrap_or(Value::Null));
        }
        let mut aggregations = Map::new();
        for aggregation in &plan.aggregations {
            aggregations.insert(
                aggregation.alias.clone(),
                row.remove(&aggregation.alias).unwrap_or(Value::Null),
            );
        }
        shaped.push(serde_json::json!({
            "fields": fields,
            "aggregations": aggregations,
        }));
    }

    Ok(Value::Array(shaped))
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DbType;
    use crate::plan::{OrderDirection, OrderKey};
    use serde_json::json;

    fn paged_node(first: u64) -> SqlQueryStructure {
        let mut node = SqlQueryStructure::new("Book", "books", JsonShape::Array);
        node.project("id", "id", true);
        node.project("year", "year", false);
        node.page_size = Some(first);
        node.order_by = vec![OrderKey {
            column: "id".to_string(),
            direction: OrderDirection::Asc,
            db_type: DbType::Int,
        }];
        node.connection = Some(ConnectionFields {
            items: true,
            has_next_page: true,
            end_cursor: true,
        });
        node
    }

    #[test]
    fn probe_row_is_popped_and_flags_next_page() {
        let node = paged_node(2);
        let raw = json!([
            { "id": 1, "year": 1999 },
            { "id": 2, "year": 2001 },
            { "id": 3, "year": 2003 }
        ]);
        let page = shape_list(raw, &node).expect("shapes");

        assert_eq!(page.items.len(), 2);
        assert!(page.has_next_page);
        // endCursor decodes back to the second row's key.
        let cursor_elements =
            cursor::decode(page.end_cursor.as_deref().expect("cursor"), &node.order_by)
                .expect("decodes");
        assert_eq!(cursor_elements[0].value, json!(2));
    }

    #[test]
    fn exact_page_has_no_next() {
        let node = paged_node(2);
        let raw = json!([
            { "id": 1, "year": 1999 },
            { "id": 2, "year": 2001 }
        ]);
        let page = shape_list(raw, &node).expect("shapes");
        assert_eq!(page.items.len(), 2);
        assert!(!page.has_next_page);
    }

    #[test]
    fn force_projected_columns_are_stripped() {
        let node = paged_node(5);
        let raw = json!([{ "id": 1, "year": 1999 }]);
        let page = shape_list(raw, &node).expect("shapes");
        assert_eq!(page.items[0], json!({ "id": 1 }));
    }

    #[test]
    fn null_result_is_empty_page() {
        let node = paged_node(2);
        let page = shape_list(Value::Null, &node).expect("shapes");
        assert!(page.items.is_empty());
        assert!(!page.has_next_page);
        assert!(page.end_cursor.is_none());
    }

    #[test]
    fn nested_to_many_wraps_as_connection() {
        let mut child = SqlQueryStructure::new("Book", "books", JsonShape::Array);
        child.project("id", "id", true);
        child.page_size = Some(1);
        child.order_by = vec![OrderKey {
            column: "id".to_string(),
            direction: OrderDirection::Asc,
            db_type: DbType::Int,
        }];
        child.connection = Some(ConnectionFields {
            items: true,
            has_next_page: true,
            end_cursor: false,
        });

        let mut parent = SqlQueryStructure::new("Publisher", "publishers", JsonShape::Object);
        parent.project("name", "name", true);
        parent.children.push(crate::plan::ChildPlan {
            field: "books".to_string(),
            join: crate::metadata::ResolvedJoin {
                pairs: vec![],
                link: None,
            },
            plan: child,
        });

        let raw = json!({
            "name": "Tor",
            "books": [ { "id": 1 }, { "id": 2 } ]
        });
        let shaped = shape_object(raw, &parent).expect("shapes");
        assert_eq!(
            shaped,
            json!({
                "name": "Tor",
                "books": { "items": [ { "id": 1 } ], "hasNextPage": true }
            })
        );
    }

    #[test]
    fn connection_includes_only_selected_fields() {
        let page = ShapedPage {
            items: vec![json!({ "id": 1 })],
            has_next_page: false,
            end_cursor: Some("abc".to_string()),
        };
        let value = connection_value(
            &page,
            ConnectionFields {
                items: true,
                has_next_page: false,
                end_cursor: true,
            },
        );
        assert_eq!(value, json!({ "items": [ { "id": 1 } ], "endCursor": "abc" }));
    }

    #[test]
    fn rest_envelope_attaches_next_link_only_when_more() {
        let mut page = ShapedPage {
            items: vec![json!({ "id": 1 })],
            has_next_page: false,
            end_cursor: None,
        };
        assert_eq!(
            rest_envelope(&page, Some("/api/Book?$after=x".to_string())),
            json!({ "value": [ { "id": 1 } ] })
        );

        page.has_next_page = true;
        let enveloped = rest_envelope(&page, Some("/api/Book?$after=x".to_string()));
        assert_eq!(enveloped["nextLink"], "/api/Book?$after=x");
    }

    #[test]
    fn group_by_repacks_fields_and_aggregations() {
        let plan = AggregatePlan {
            entity: "Book".to_string(),
            source: "books".to_string(),
            group_columns: vec!["year".to_string()],
            aggregations: vec![crate::plan::aggregate::AggregationSpec {
                function: crate::plan::aggregate::AggregateFunction::Count,
                column: None,
                alias: "n".to_string(),
            }],
            predicates: vec![],
        };
        let raw = json!([ { "year": 2001, "n": 3 }, { "year": 2002, "n": 1 } ]);
        let shaped = shape_group_by(raw, &plan).expect("shapes");
        assert_eq!(
            shaped,
            json!([
                { "fields": { "year": 2001 }, "aggregations": { "n": 3 } },
                { "fields": { "year": 2002 }, "aggregations": { "n": 1 } }
            ])
        );
    }
}
