//! REST query-string planning.
//!
//! The REST surface accepts `$select`, `$filter` (an OData comparison
//! subset), `$orderby`, `$first`, and `$after`. This module parses the raw
//! query string (the HTTP host hands it over undecoded) and lowers each
//! part onto the same planner primitives the GraphQL path uses.

use serde_json::{Map, Value};
use veneer_error::{Result, VeneerError};

use crate::metadata::{DbType, TableShape};
use super::expr::{self, Operand, OperandResolver};
use super::{OrderDirection, Predicate};

/// Parsed REST query-string surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestQuery {
    /// `$select`: projected columns.
    pub select: Option<Vec<String>>,

    /// `$filter`: OData expression, compiled via [`compile_filter`].
    pub filter: Option<String>,

    /// `$orderby`: `(column, direction)` pairs in order.
    pub order: Vec<(String, OrderDirection)>,

    /// `$first`: requested page size.
    pub first: Option<i64>,

    /// `$after`: keyset cursor.
    pub after: Option<String>,
}

/// Parse a raw query string (without the leading `?`).
///
/// Unknown `$`-prefixed parameters are rejected; other parameters are
/// ignored (reserved for the host).
///
/// # Errors
///
/// `BadRequest` for malformed percent-encoding, unknown `$` parameters, or
/// a non-numeric `$first`.
pub fn parse_query_string(query: &str) -> Result<RestQuery> {
    let mut parsed = RestQuery::default();
    if query.is_empty() {
        return Ok(parsed);
    }

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(raw_key)?;
        let value = percent_decode(raw_value)?;

        match key.as_str() {
            "$select" => {
                parsed.select = Some(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            "$filter" => parsed.filter = Some(value),
            "$orderby" => parsed.order = parse_orderby(&value)?,
            "$first" => {
                parsed.first = Some(value.parse().map_err(|_| {
                    VeneerError::bad_request("'$first' must be an integer")
                })?);
            }
            "$after" => parsed.after = Some(value),
            other if other.starts_with('$') => {
                return Err(VeneerError::bad_request(format!(
                    "Unknown query parameter '{other}'"
                )));
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Compile a `$filter` expression against an entity shape.
///
/// # Errors
///
/// `BadRequest` for syntax errors and unknown columns.
pub fn compile_filter(expression: &str, shape: &TableShape) -> Result<Predicate> {
    let resolver = ColumnResolver { shape };
    expr::parse(expression, &resolver)
}

struct ColumnResolver<'a> {
    shape: &'a TableShape,
}

impl OperandResolver for ColumnResolver<'_> {
    fn resolve(&self, ident: &str) -> Result<Operand> {
        let db_type = self.shape.column_type(ident)?;
        Ok(Operand::Column(ident.to_string(), db_type))
    }
}

/// Parse `$orderby`: a comma list of `column [asc|desc]` terms.
fn parse_orderby(value: &str) -> Result<Vec<(String, OrderDirection)>> {
    let mut order = Vec::new();
    for term in value.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let mut words = term.split_whitespace();
        let column = words
            .next()
            .ok_or_else(|| VeneerError::bad_request("Empty '$orderby' term"))?
            .to_string();
        let direction = match words.next() {
            None => OrderDirection::Asc,
            Some(word) if word.eq_ignore_ascii_case("asc") => OrderDirection::Asc,
            Some(word) if word.eq_ignore_ascii_case("desc") => OrderDirection::Desc,
            Some(other) => {
                return Err(VeneerError::bad_request(format!(
                    "'$orderby' direction must be asc or desc, got '{other}'"
                )));
            }
        };
        if words.next().is_some() {
            return Err(VeneerError::bad_request(format!(
                "Malformed '$orderby' term '{term}'"
            )));
        }
        order.push((column, direction));
    }
    Ok(order)
}

/// Parse primary-key path segments into typed key arguments.
///
/// Accepts alternating `/{column}/{value}` pairs, or a single bare value
/// when the key has exactly one column.
///
/// # Errors
///
/// `BadRequest` for dangling segments, wrong columns, or values that do
/// not parse as the column type.
pub fn parse_key_segments(
    segments: &[&str],
    shape: &TableShape,
) -> Result<Map<String, Value>> {
    let mut key = Map::new();

    if segments.len() == 1 && shape.primary_key.len() == 1 {
        let column = &shape.primary_key[0];
        key.insert(
            column.clone(),
            coerce_path_value(segments[0], shape.column_type(column)?)?,
        );
        return Ok(key);
    }

    if segments.len() % 2 != 0 {
        return Err(VeneerError::bad_request(
            "Primary-key path must alternate column and value segments",
        ));
    }
    for pair in segments.chunks(2) {
        let column = pair[0];
        let db_type = shape.column_type(column)?;
        key.insert(column.to_string(), coerce_path_value(pair[1], db_type)?);
    }
    Ok(key)
}

fn coerce_path_value(raw: &str, db_type: DbType) -> Result<Value> {
    let parse_error =
        || VeneerError::bad_request(format!("'{raw}' is not a valid key value"));
    match db_type {
        DbType::Int | DbType::Bigint => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| parse_error()),
        DbType::Float | DbType::Decimal => raw
            .parse::<f64>()
            .map_err(|_| parse_error())
            .and_then(|f| {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(parse_error)
            }),
        DbType::Boolean => match raw {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(parse_error()),
        },
        DbType::Uuid => uuid::Uuid::parse_str(raw)
            .map(|u| Value::String(u.to_string()))
            .map_err(|_| parse_error()),
        DbType::DateTime => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|_| Value::String(raw.to_string()))
            .map_err(|_| parse_error()),
        DbType::String | DbType::Bytes => Ok(Value::String(raw.to_string())),
    }
}

fn percent_decode(input: &str) -> Result<String> {
    let mut bytes = Vec::with_capacity(input.len());
    let mut iter = input.bytes();
    while let Some(byte) = iter.next() {
        match byte {
            b'%' => {
                let hi = iter.next();
                let lo = iter.next();
                let decoded = hi
                    .zip(lo)
                    .and_then(|(hi, lo)| {
                        let hex = [hi, lo];
                        std::str::from_utf8(&hex)
                            .ok()
                            .and_then(|s| u8::from_str_radix(s, 16).ok())
                    })
                    .ok_or_else(|| {
                        VeneerError::bad_request("Malformed percent-encoding in query string")
                    })?;
                bytes.push(decoded);
            }
            b'+' => bytes.push(b' '),
            other => bytes.push(other),
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| VeneerError::bad_request("Query string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CompareOp;
    use crate::testing::book_shape;
    use serde_json::json;

    #[test]
    fn full_query_string_parses() {
        let parsed = parse_query_string(
            "$select=id,title&$filter=year%20gt%202000&$orderby=year%20desc,id&$first=2&$after=abc",
        )
        .expect("parses");
        assert_eq!(
            parsed.select,
            Some(vec!["id".to_string(), "title".to_string()])
        );
        assert_eq!(parsed.filter.as_deref(), Some("year gt 2000"));
        assert_eq!(
            parsed.order,
            vec![
                ("year".to_string(), OrderDirection::Desc),
                ("id".to_string(), OrderDirection::Asc),
            ]
        );
        assert_eq!(parsed.first, Some(2));
        assert_eq!(parsed.after.as_deref(), Some("abc"));
    }

    #[test]
    fn plus_decodes_to_space() {
        let parsed = parse_query_string("$filter=title+eq+'War+and+Peace'").expect("parses");
        assert_eq!(parsed.filter.as_deref(), Some("title eq 'War and Peace'"));
    }

    #[test]
    fn unknown_dollar_parameter_is_rejected() {
        assert!(parse_query_string("$top=5").is_err());
    }

    #[test]
    fn non_dollar_parameters_are_ignored() {
        let parsed = parse_query_string("api-version=2024-01-01").expect("parses");
        assert_eq!(parsed, RestQuery::default());
    }

    #[test]
    fn filter_compiles_against_shape() {
        let predicate =
            compile_filter("year gt 2000 and featured eq true", &book_shape()).expect("compiles");
        assert!(matches!(predicate, Predicate::And(parts) if parts.len() == 2));
    }

    #[test]
    fn filter_with_unknown_column_is_rejected() {
        assert!(compile_filter("bogus eq 1", &book_shape()).is_err());
    }

    #[test]
    fn bare_key_segment_uses_single_pk() {
        let key = parse_key_segments(&["5"], &book_shape()).expect("parses");
        assert_eq!(key.get("id"), Some(&json!(5)));
    }

    #[test]
    fn named_key_segments_parse_pairs() {
        let key = parse_key_segments(&["id", "5"], &book_shape()).expect("parses");
        assert_eq!(key.get("id"), Some(&json!(5)));
    }

    #[test]
    fn non_numeric_key_for_int_column_is_rejected() {
        assert!(parse_key_segments(&["abc"], &book_shape()).is_err());
    }

    #[test]
    fn dangling_segment_is_rejected() {
        let shape = book_shape();
        assert!(parse_key_segments(&["id", "5", "extra"], &shape).is_err());
    }

    #[test]
    fn orderby_rejects_bad_direction() {
        assert!(parse_query_string("$orderby=year%20sideways").is_err());
    }

    #[test]
    fn in_comparison_via_filter_is_not_part_of_odata_subset() {
        // The OData subset has only the six comparison operators.
        assert!(compile_filter("year in 2000", &book_shape()).is_err());
    }

    #[test]
    fn compile_filter_produces_bound_compare() {
        let predicate = compile_filter("title eq 'Dune'", &book_shape()).expect("compiles");
        assert_eq!(
            predicate,
            Predicate::Compare {
                column: "title".to_string(),
                op: CompareOp::Eq,
                value: json!("Dune"),
                db_type: crate::metadata::DbType::String,
            }
        );
    }
}
