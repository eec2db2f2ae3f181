//! Cross-reference validation of a parsed configuration.
//!
//! Validation collects every violation before failing, so one reload reports
//! the whole set of problems rather than the first one found.

use veneer_error::{Result, VeneerError};

use crate::model::{ActionKind, RuntimeConfig, SourceKind};

/// Validate cross-references and value ranges across the whole config.
///
/// # Errors
///
/// Returns one `ErrorInInitialization` whose message lists every violation.
pub fn validate(config: &RuntimeConfig) -> Result<()> {
    let mut violations = Vec::new();

    validate_data_source(config, &mut violations);
    validate_runtime(config, &mut violations);
    validate_entities(config, &mut violations);
    validate_graphql_names(config, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(VeneerError::init(format!(
            "Configuration is invalid:\n  - {}",
            violations.join("\n  - ")
        )))
    }
}

fn validate_data_source(config: &RuntimeConfig, violations: &mut Vec<String>) {
    if config.data_source.connection_string.is_empty() {
        violations.push("data-source.connection-string must not be empty".to_string());
    }
    if config.data_source.database_type.is_document()
        && !config.data_source.options.contains_key("schema")
    {
        violations.push(
            "document database types require a 'schema' entry in data-source.options \
             pointing at a GraphQL schema file"
                .to_string(),
        );
    }
}

fn validate_runtime(config: &RuntimeConfig, violations: &mut Vec<String>) {
    if let Some(limit) = config.runtime.graphql.depth_limit {
        if limit == 0 || limit < -1 {
            violations.push(format!(
                "runtime.graphql.depth-limit must be -1 (unlimited) or a positive integer, got {limit}"
            ));
        }
    }
}

fn validate_entities(config: &RuntimeConfig, violations: &mut Vec<String>) {
    for (name, entity) in &config.entities {
        if name.is_empty() {
            violations.push("entity names must not be empty".to_string());
        }
        if entity.object().is_empty() {
            violations.push(format!("entity '{name}': source object must not be empty"));
        }
        if entity.source.kind() == SourceKind::View && entity.source.key_fields().is_empty() {
            violations.push(format!(
                "entity '{name}': views require key-fields (no introspectable primary key)"
            ));
        }

        validate_permissions(name, entity, violations);
        validate_relationships(config, name, entity, violations);
    }
}

fn validate_permissions(
    name: &str,
    entity: &crate::model::Entity,
    violations: &mut Vec<String>,
) {
    let is_procedure = entity.is_stored_procedure();

    for permission in &entity.permissions {
        if permission.role.is_empty() {
            violations.push(format!("entity '{name}': permission role must not be empty"));
        }
        for action in &permission.actions {
            let kind = action.kind();
            if is_procedure && !matches!(kind, ActionKind::Execute | ActionKind::All) {
                violations.push(format!(
                    "entity '{name}': stored procedures expose only the 'execute' action, \
                     role '{}' grants '{kind:?}'",
                    permission.role
                ));
            }
            if !is_procedure && kind == ActionKind::Execute {
                violations.push(format!(
                    "entity '{name}': 'execute' is only valid on stored procedures",
                ));
            }
        }
    }
}

fn validate_relationships(
    config: &RuntimeConfig,
    name: &str,
    entity: &crate::model::Entity,
    violations: &mut Vec<String>,
) {
    for (rel_name, rel) in &entity.relationships {
        if !config.entities.contains_key(&rel.target_entity) {
            violations.push(format!(
                "entity '{name}': relationship '{rel_name}' targets unknown entity '{}'",
                rel.target_entity
            ));
        }
        if rel.source_fields.len() != rel.target_fields.len() {
            violations.push(format!(
                "entity '{name}': relationship '{rel_name}' has {} source.fields but {} target.fields",
                rel.source_fields.len(),
                rel.target_fields.len()
            ));
        }
        if let Some(linking) = &rel.linking_object {
            if linking.is_empty() {
                violations.push(format!(
                    "entity '{name}': relationship '{rel_name}' has an empty linking.object"
                ));
            }
            if rel.linking_source_fields.is_empty() || rel.linking_target_fields.is_empty() {
                violations.push(format!(
                    "entity '{name}': relationship '{rel_name}' declares linking.object but not \
                     both linking field lists"
                ));
            }
        }
    }
}

fn validate_graphql_names(config: &RuntimeConfig, violations: &mut Vec<String>) {
    let mut seen: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    for (name, entity) in &config.entities {
        if !entity.graphql.enabled() {
            continue;
        }
        let singular = entity.graphql.singular(name).to_string();
        let plural = entity.graphql.plural(name);

        for graphql_name in [singular, plural] {
            if let Some(owner) = seen.get(&graphql_name) {
                if owner != name {
                    violations.push(format!(
                        "GraphQL name '{graphql_name}' is used by both '{owner}' and '{name}'"
                    ));
                }
            } else {
                seen.insert(graphql_name, name.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(json: &str) -> RuntimeConfig {
        serde_json::from_str(json).expect("test config parses")
    }

    #[test]
    fn valid_config_passes() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "postgresql",
                    "connection-string": "postgresql://localhost/app"
                },
                "entities": {
                    "Book": {
                        "source": "books",
                        "permissions": [ { "role": "anonymous", "actions": [ "read" ] } ],
                        "relationships": {
                            "publisher": { "cardinality": "one", "target.entity": "Publisher" }
                        }
                    },
                    "Publisher": {
                        "source": "publishers",
                        "permissions": [ { "role": "anonymous", "actions": [ "read" ] } ]
                    }
                }
            }"#,
        );
        validate(&config).expect("valid config");
    }

    #[test]
    fn dangling_relationship_target_is_reported() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "postgresql",
                    "connection-string": "postgresql://localhost/app"
                },
                "entities": {
                    "Book": {
                        "source": "books",
                        "permissions": [],
                        "relationships": {
                            "publisher": { "cardinality": "one", "target.entity": "Missing" }
                        }
                    }
                }
            }"#,
        );
        let err = validate(&config).expect_err("must fail");
        assert!(err.to_string().contains("unknown entity 'Missing'"));
    }

    #[test]
    fn all_violations_are_collected() {
        let config = config_from(
            r#"{
                "data-source": { "database-type": "mssql", "connection-string": "" },
                "runtime": { "graphql": { "depth-limit": 0 } },
                "entities": {
                    "Report": {
                        "source": { "object": "dbo.report_view", "type": "view" },
                        "permissions": [ { "role": "", "actions": [ "execute" ] } ]
                    }
                }
            }"#,
        );
        let message = validate(&config).expect_err("must fail").to_string();
        assert!(message.contains("connection-string"));
        assert!(message.contains("depth-limit"));
        assert!(message.contains("key-fields"));
        assert!(message.contains("role must not be empty"));
        assert!(message.contains("'execute' is only valid on stored procedures"));
    }

    #[test]
    fn stored_procedure_rejects_crud_actions() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "mssql",
                    "connection-string": "Server=localhost"
                },
                "entities": {
                    "TopSellers": {
                        "source": { "object": "dbo.top_sellers", "type": "stored-procedure" },
                        "permissions": [ { "role": "reader", "actions": [ "read" ] } ]
                    }
                }
            }"#,
        );
        let err = validate(&config).expect_err("must fail");
        assert!(err.to_string().contains("stored procedures expose only"));
    }

    #[test]
    fn duplicate_graphql_names_are_reported() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "postgresql",
                    "connection-string": "postgresql://localhost/app"
                },
                "entities": {
                    "Book": { "source": "books", "permissions": [] },
                    "Tome": {
                        "source": "tomes",
                        "graphql": { "singular": "Book" },
                        "permissions": []
                    }
                }
            }"#,
        );
        let err = validate(&config).expect_err("must fail");
        assert!(err.to_string().contains("'Book' is used by both"));
    }

    #[test]
    fn uneven_relationship_fields_are_reported() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "mysql",
                    "connection-string": "mysql://localhost/app"
                },
                "entities": {
                    "Book": {
                        "source": "books",
                        "permissions": [],
                        "relationships": {
                            "publisher": {
                                "cardinality": "one",
                                "target.entity": "Publisher",
                                "source.fields": [ "publisher_id", "region" ],
                                "target.fields": [ "id" ]
                            }
                        }
                    },
                    "Publisher": { "source": "publishers", "permissions": [] }
                }
            }"#,
        );
        let err = validate(&config).expect_err("must fail");
        assert!(err.to_string().contains("2 source.fields but 1 target.fields"));
    }

    #[test]
    fn document_backend_requires_schema_option() {
        let config = config_from(
            r#"{
                "data-source": {
                    "database-type": "cosmos-nosql",
                    "connection-string": "AccountEndpoint=..."
                },
                "entities": {}
            }"#,
        );
        let err = validate(&config).expect_err("must fail");
        assert!(err.to_string().contains("'schema' entry"));
    }
}
