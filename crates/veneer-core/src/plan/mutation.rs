//! Write-path planning.
//!
//! Mutations compile into a [`MutationPlan`]: the assignments to write, the
//! key being addressed, and the predicates guarding the write. The
//! authorization policy of the acting role is conjoined into UPDATE and
//! DELETE predicates, so a row the policy hides cannot be written: the
//! executor reports zero affected rows and the engine maps that to
//! `EntityNotFound` (or `AuthorizationFailed` in development mode, after a
//! key-only probe).
//!
//! A successful create or update is re-read through the read path so nested
//! selections resolve through the same shaping pipeline as queries.

use serde_json::{Map, Value};
use veneer_config::ActionKind;
use veneer_error::{Result, VeneerError};

use crate::auth;
use crate::metadata::{DbType, TableShape};
use super::query::{Planner, primary_key_predicates};
use super::Predicate;

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// INSERT.
    Create,
    /// UPDATE by key.
    Update,
    /// DELETE by key.
    Delete,
    /// Full-row upsert (REST PUT).
    Upsert,
    /// Partial upsert (REST PATCH).
    UpsertIncremental,
}

/// A column/value pair carrying binding metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAssignment {
    /// Column (or stored-procedure parameter) name.
    pub column: String,
    /// Value to bind.
    pub value: Value,
    /// Binding type.
    pub db_type: DbType,
}

/// A planned write against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    /// Kind of write.
    pub kind: MutationKind,
    /// Logical entity name.
    pub entity: String,
    /// Physical object name.
    pub source: String,
    /// Values being written.
    pub assignments: Vec<ColumnAssignment>,
    /// Key values addressed by update/delete/upsert.
    pub key: Vec<ColumnAssignment>,
    /// WHERE predicates for update/delete: the key plus the role's policy.
    pub predicates: Vec<Predicate>,
    /// Primary-key column names, for RETURNING and the follow-up read.
    pub primary_key: Vec<String>,
}

/// A planned stored-procedure execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutePlan {
    /// Logical entity name.
    pub entity: String,
    /// Procedure object name.
    pub source: String,
    /// Bound parameters, config defaults merged with request values.
    pub parameters: Vec<ColumnAssignment>,
}

impl Planner<'_> {
    /// Plan an insert. `strict` rejects body fields that are not columns
    /// (GraphQL inputs are always strict; REST follows
    /// `runtime.rest.request-body-strict`).
    ///
    /// # Errors
    ///
    /// `BadRequest` for unknown or auto-generated columns in the body,
    /// `AuthorizationFailed` per the role's create permission.
    pub async fn plan_create(
        &self,
        entity_name: &str,
        item: &Map<String, Value>,
        strict: bool,
    ) -> Result<MutationPlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        let assignments = assignments_from_body(entity_name, &shape, item, strict)?;
        let written: Vec<String> = assignments.iter().map(|a| a.column.clone()).collect();
        auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Create,
            &written,
        )?;
        Ok(MutationPlan {
            kind: MutationKind::Create,
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            assignments,
            key: Vec::new(),
            predicates: Vec::new(),
            primary_key: shape.primary_key.clone(),
        })
    }

    /// Plan an update by key.
    ///
    /// # Errors
    ///
    /// `BadRequest` when the body touches key or unknown columns,
    /// `AuthorizationFailed` per the role's update permission.
    pub async fn plan_update(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
        item: &Map<String, Value>,
    ) -> Result<MutationPlan> {
        self.plan_keyed_write(entity_name, key_arguments, item, MutationKind::Update)
            .await
    }

    /// Plan a delete by key.
    ///
    /// # Errors
    ///
    /// `AuthorizationFailed` per the role's delete permission.
    pub async fn plan_delete(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
    ) -> Result<MutationPlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        let decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Delete,
            &[],
        )?;

        let mut predicates = primary_key_predicates(entity_name, &shape, key_arguments)?;
        if let Some(policy) = decision.predicate {
            predicates.push(policy);
        }

        Ok(MutationPlan {
            kind: MutationKind::Delete,
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            assignments: Vec::new(),
            key: key_assignments(&shape, key_arguments)?,
            predicates,
            primary_key: shape.primary_key.clone(),
        })
    }

    /// Plan an upsert (REST PUT/PATCH). Requires both the create and update
    /// permissions; the update policy guards the match arm.
    ///
    /// # Errors
    ///
    /// As [`Self::plan_create`] and [`Self::plan_update`].
    pub async fn plan_upsert(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
        item: &Map<String, Value>,
        incremental: bool,
    ) -> Result<MutationPlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        let strict = self.config.runtime.rest.request_body_strict;
        let mut assignments = assignments_from_body(entity_name, &shape, item, strict)?;
        if !incremental {
            // PUT replaces the whole row: columns absent from the body are
            // reset to NULL (the database applies defaults where declared).
            for column in &shape.columns {
                if column.auto_generated
                    || shape.primary_key.contains(&column.name)
                    || item.contains_key(&column.name)
                {
                    continue;
                }
                assignments.push(ColumnAssignment {
                    column: column.name.clone(),
                    value: Value::Null,
                    db_type: column.db_type,
                });
            }
        }

        // Upsert needs both permissions; the mask covers every column the
        // statement touches, including PUT's implicit resets.
        let written: Vec<String> = assignments.iter().map(|a| a.column.clone()).collect();
        auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Create,
            &written,
        )?;
        let update_decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Update,
            &written,
        )?;

        let mut predicates = primary_key_predicates(entity_name, &shape, key_arguments)?;
        if let Some(policy) = update_decision.predicate {
            predicates.push(policy);
        }

        Ok(MutationPlan {
            kind: if incremental {
                MutationKind::UpsertIncremental
            } else {
                MutationKind::Upsert
            },
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            assignments,
            key: key_assignments(&shape, key_arguments)?,
            predicates,
            primary_key: shape.primary_key.clone(),
        })
    }

    /// Plan a stored-procedure execution.
    ///
    /// Request values are merged over the config's parameter defaults. Row
    /// policies do not apply to procedures.
    ///
    /// # Errors
    ///
    /// `BadRequest` for unknown or missing parameters,
    /// `AuthorizationFailed` per the role's execute permission.
    pub async fn plan_execute(
        &self,
        entity_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ExecutePlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Execute,
            &[],
        )?;

        for supplied in arguments.keys() {
            if !shape.parameters.iter().any(|p| &p.name == supplied) {
                return Err(VeneerError::bad_request(format!(
                    "'{supplied}' is not a parameter of '{entity_name}'"
                )));
            }
        }

        let defaults = entity.source.parameters();
        let mut parameters = Vec::with_capacity(shape.parameters.len());
        for parameter in &shape.parameters {
            let value = arguments
                .get(&parameter.name)
                .or_else(|| defaults.and_then(|d| d.get(&parameter.name)))
                .cloned();
            match value {
                Some(value) => parameters.push(ColumnAssignment {
                    column: parameter.name.clone(),
                    value,
                    db_type: parameter.db_type,
                }),
                None if parameter.has_default => {}
                None => {
                    return Err(VeneerError::bad_request(format!(
                        "Parameter '{}' of '{entity_name}' is required",
                        parameter.name
                    )));
                }
            }
        }

        Ok(ExecutePlan {
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            parameters,
        })
    }

    async fn plan_keyed_write(
        &self,
        entity_name: &str,
        key_arguments: &Map<String, Value>,
        item: &Map<String, Value>,
        kind: MutationKind,
    ) -> Result<MutationPlan> {
        let entity = self
            .config
            .entity(entity_name)
            .ok_or_else(|| VeneerError::not_found(entity_name))?;
        let shape = self.metadata.describe(self.config, entity_name).await?;

        let written: Vec<String> = item.keys().cloned().collect();
        let decision = auth::authorize(
            entity_name,
            entity,
            &shape,
            self.principal,
            ActionKind::Update,
            &written,
        )?;

        for column in item.keys() {
            if shape.primary_key.contains(column) {
                return Err(VeneerError::bad_request(format!(
                    "Primary-key column '{column}' cannot be updated"
                )));
            }
        }

        let assignments = assignments_from_body(entity_name, &shape, item, true)?;
        if assignments.is_empty() {
            return Err(VeneerError::bad_request("Update body must set at least one column"));
        }

        let mut predicates = primary_key_predicates(entity_name, &shape, key_arguments)?;
        if let Some(policy) = decision.predicate {
            predicates.push(policy);
        }

        Ok(MutationPlan {
            kind,
            entity: entity_name.to_string(),
            source: entity.object().to_string(),
            assignments,
            key: key_assignments(&shape, key_arguments)?,
            predicates,
            primary_key: shape.primary_key.clone(),
        })
    }
}

fn assignments_from_body(
    entity_name: &str,
    shape: &TableShape,
    item: &Map<String, Value>,
    strict: bool,
) -> Result<Vec<ColumnAssignment>> {
    let mut assignments = Vec::with_capacity(item.len());
    for (column, value) in item {
        let Some(column_shape) = shape.column(column) else {
            if strict {
                return Err(VeneerError::bad_request(format!(
                    "'{column}' is not a column of '{entity_name}'"
                )));
            }
            continue;
        };
        if column_shape.auto_generated {
            return Err(VeneerError::bad_request(format!(
                "Column '{column}' is auto-generated and cannot be written"
            )));
        }
        assignments.push(ColumnAssignment {
            column: column.clone(),
            value: value.clone(),
            db_type: column_shape.db_type,
        });
    }
    Ok(assignments)
}

fn key_assignments(
    shape: &TableShape,
    key_arguments: &Map<String, Value>,
) -> Result<Vec<ColumnAssignment>> {
    shape
        .primary_key
        .iter()
        .map(|pk| {
            let value = key_arguments
                .get(pk)
                .ok_or_else(|| {
                    VeneerError::bad_request(format!("Primary-key column '{pk}' is required"))
                })?
                .clone();
            Ok(ColumnAssignment {
                column: pk.clone(),
                value,
                db_type: shape.column_type(pk)?,
            })
        })
        .collect()
}
