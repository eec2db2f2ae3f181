//! Aggregation (groupBy) planning.
//!
//! A `groupBy` selection compiles to `SELECT <byCols>, <aggs> FROM <source>
//! WHERE <preds> GROUP BY <byCols>`. Unlike ordering, aggregations read
//! column values, so both the grouping columns and the aggregated fields
//! must sit inside the caller's column mask.

use serde_json::{Map, Value};
use veneer_config::ActionKind;
use veneer_error::{Result, VeneerError};

use crate::auth;
use crate::metadata::DbType;
use super::query::Planner;
use super::{Predicate, filter};

/// Supported aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    /// Row count.
    Count,
    /// Distinct-value count.
    CountDistinct,
    /// Sum of a numeric column.
    Sum,
    /// Average of a numeric column.
    Avg,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl AggregateFunction {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "count" => Ok(Self::Count),
            "countDistinct" => Ok(Self::CountDistinct),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(VeneerError::bad_request(format!(
                "Unknown aggregation function '{other}'"
            ))),
        }
    }

    /// Whether the function needs a numeric input column.
    #[must_use]
    pub const fn requires_numeric(self) -> bool {
        matches!(self, Self::Sum | Self::Avg)
    }

    /// SQL spelling, without the DISTINCT modifier.
    #[must_use]
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Count | Self::CountDistinct => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One aggregation output.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationSpec {
    /// Function applied.
    pub function: AggregateFunction,
    /// Aggregated column; `None` only for bare `count`.
    pub column: Option<String>,
    /// Output alias.
    pub alias: String,
}

/// A planned groupBy query.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// Logical entity name.
    pub entity: String,
    /// Physical object name.
    pub source: String,
    /// Grouping columns, in request order.
    pub group_columns: Vec<String>,
    /// Aggregation outputs.
    pub aggregations: Vec<AggregationSpec>,
    /// WHERE predicates (filters plus the role policy).
    pub predicates: Vec<Predicate>,
}

impl Planner<'_> {
    /// Plan a groupBy over an entity.
    ///
    /// Arguments: `by` (list of column names), `aggregations` (list of
    /// `{fn, field, alias}` objects), and the optional shared `filter`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for unknown columns/functions and non-numeric sum/avg
    /// targets; `AuthorizationFailed` when any referenced column is outside
    /// the caller's mask.
    pub async fn plan_group_by(
        &self,
        entity_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<AggregatePlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        let group_columns: Vec<String> = match arguments.get("by") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().map(str::to_string).ok_or_else(|| {
                        VeneerError::bad_request("'by' must be a list of column names")
                    })
                })
                .collect::<Result<_>>()?,
            Some(_) => {
                return Err(VeneerError::bad_request("'by' must be a list of column names"));
            }
            None => Vec::new(),
        };

        let mut aggregations = Vec::new();
        if let Some(value) = arguments.get("aggregations") {
            let Value::Array(entries) = value else {
                return Err(VeneerError::bad_request("'aggregations' must be a list"));
            };
            for entry in entries {
                aggregations.push(parse_aggregation(entry, &shape)?);
            }
        }
        if group_columns.is_empty() && aggregations.is_empty() {
            return Err(VeneerError::bad_request(
                "groupBy requires 'by' columns or 'aggregations'",
            ));
        }

        // Aggregations read values, so everything referenced must be
        // readable by the caller.
        let mut read_columns = group_columns.clone();
        read_columns.extend(aggregations.iter().filter_map(|a| a.column.clone()));
        let decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Read,
            &read_columns,
        )?;

        for column in &group_columns {
            shape.column_type(column)?;
        }

        let mut predicates = Vec::new();
        if let Some(filter_value) = arguments.get("filter") {
            if let Some(predicate) = filter::compile(filter_value, &shape)? {
                predicates.push(predicate);
            }
        }
        if let Some(policy) = decision.predicate {
            predicates.push(policy);
        }

        Ok(AggregatePlan {
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            group_columns,
            aggregations,
            predicates,
        })
    }
}

fn parse_aggregation(
    entry: &Value,
    shape: &crate::metadata::TableShape,
) -> Result<AggregationSpec> {
    let Value::Object(fields) = entry else {
        return Err(VeneerError::bad_request(
            "Each aggregation must be an object with 'fn', 'field', and 'alias'",
        ));
    };

    let function = AggregateFunction::parse(
        fields
            .get("fn")
            .and_then(Value::as_str)
            .ok_or_else(|| VeneerError::bad_request("Aggregation requires a 'fn' name"))?,
    )?;

    let column = fields
        .get("field")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(name) = &column {
        let db_type = shape.column_type(name)?;
        if function.requires_numeric()
            && !matches!(
                db_type,
                DbType::Int | DbType::Bigint | DbType::Float | DbType::Decimal
            )
        {
            return Err(VeneerError::bad_request(format!(
                "'{}' requires a numeric column, '{name}' is not",
                function.sql_name()
            )));
        }
    } else if function != AggregateFunction::Count {
        return Err(VeneerError::bad_request(format!(
            "'{}' requires a 'field'",
            function.sql_name()
        )));
    }

    let alias = fields
        .get("alias")
        .and_then(Value::as_str)
        .map_or_else(
            || default_alias(function, column.as_deref()),
            str::to_string,
        );

    Ok(AggregationSpec {
        function,
        column,
        alias,
    })
}

fn default_alias(function: AggregateFunction, column: Option<&str>) -> String {
    match column {
        Some(column) => format!("{}_{column}", function.sql_name().to_ascii_lowercase()),
        None => "count".to_string(),
    }
}
