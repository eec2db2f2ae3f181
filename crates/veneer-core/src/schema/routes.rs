//! REST route synthesis.
//!
//! Every REST-enabled entity registers one route segment under the global
//! REST path: `{rest.path}/{entity.rest.path ?? entityName}`. Trailing path
//! segments address a row by primary key, either as bare values (single
//! column keys) or alternating `column/value` pairs.

use indexmap::IndexMap;
use veneer_config::{ActionKind, RestMethod, RuntimeConfig, SourceKind};
use veneer_error::{Result, VeneerError};

/// One resolved REST route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch<'a> {
    /// Entity the route addresses.
    pub entity: String,
    /// Remaining path segments (primary-key addressing).
    pub key_segments: Vec<&'a str>,
}

/// Table mapping REST path segments onto entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    base: String,
    routes: IndexMap<String, String>,
}

impl RouteTable {
    /// Build the table for a snapshot. Empty when the REST surface is
    /// disabled.
    #[must_use]
    pub fn build(config: &RuntimeConfig) -> Self {
        let mut table = Self {
            base: config.runtime.rest.path.trim_matches('/').to_string(),
            routes: IndexMap::new(),
        };
        if !config.runtime.rest.enabled {
            return table;
        }
        for (name, entity) in &config.entities {
            if !entity.rest.enabled() {
                continue;
            }
            let segment = entity.rest.path(name).to_string();
            table.routes.insert(segment, name.clone());
        }
        table
    }

    /// Resolve a request path (e.g. `/api/Book/id/5`).
    ///
    /// # Errors
    ///
    /// `EntityNotFound` for paths outside the table.
    pub fn resolve<'a>(&self, path: &'a str) -> Result<RouteMatch<'a>> {
        let trimmed = path.trim_matches('/');
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty());

        if !self.base.is_empty() {
            for expected in self.base.split('/') {
                if segments.next() != Some(expected) {
                    return Err(VeneerError::not_found(path));
                }
            }
        }

        let Some(entity_segment) = segments.next() else {
            return Err(VeneerError::not_found(path));
        };
        let Some(entity) = self.routes.get(entity_segment) else {
            return Err(VeneerError::not_found(entity_segment));
        };

        Ok(RouteMatch {
            entity: entity.clone(),
            key_segments: segments.collect(),
        })
    }
}

/// Map an HTTP method onto the action it gates.
///
/// # Errors
///
/// `BadRequest` for unsupported methods.
pub fn action_for_method(method: &str) -> Result<ActionKind> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(ActionKind::Read),
        "POST" => Ok(ActionKind::Create),
        "PUT" | "PATCH" => Ok(ActionKind::Update),
        "DELETE" => Ok(ActionKind::Delete),
        other => Err(VeneerError::bad_request(format!(
            "Method '{other}' is not supported"
        ))),
    }
}

/// Check an entity's explicit method list (empty list admits everything the
/// permissions admit). Stored procedures accept only POST.
///
/// # Errors
///
/// `BadRequest` when the method is excluded for the entity.
pub fn check_entity_method(
    config: &RuntimeConfig,
    entity_name: &str,
    method: &str,
) -> Result<()> {
    let Some(entity) = config.entity(entity_name) else {
        return Err(VeneerError::not_found(entity_name));
    };

    if entity.source.kind() == SourceKind::StoredProcedure {
        if method.eq_ignore_ascii_case("POST") {
            return Ok(());
        }
        return Err(VeneerError::bad_request(
            "Stored procedures accept only POST",
        ));
    }

    let allowed = entity.rest.methods();
    if allowed.is_empty() {
        return Ok(());
    }
    let requested = match method.to_ascii_uppercase().as_str() {
        "GET" => RestMethod::Get,
        "POST" => RestMethod::Post,
        "PUT" => RestMethod::Put,
        "PATCH" => RestMethod::Patch,
        "DELETE" => RestMethod::Delete,
        other => {
            return Err(VeneerError::bad_request(format!(
                "Method '{other}' is not supported"
            )));
        }
    };
    if allowed.contains(&requested) {
        Ok(())
    } else {
        Err(VeneerError::bad_request(format!(
            "Method '{method}' is not enabled for '{entity_name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_config;

    #[test]
    fn routes_register_under_rest_base() {
        let table = RouteTable::build(&test_config());
        let matched = table.resolve("/api/Book/id/5").expect("resolves");
        assert_eq!(matched.entity, "Book");
        assert_eq!(matched.key_segments, vec!["id", "5"]);
    }

    #[test]
    fn collection_path_has_no_key_segments() {
        let table = RouteTable::build(&test_config());
        let matched = table.resolve("/api/Book").expect("resolves");
        assert!(matched.key_segments.is_empty());
    }

    #[test]
    fn custom_rest_path_overrides_entity_name() {
        // The Audit entity remaps its REST segment to "audit-log".
        let table = RouteTable::build(&test_config());
        let matched = table.resolve("/api/audit-log").expect("resolves");
        assert_eq!(matched.entity, "Audit");
        assert!(table.resolve("/api/Audit").is_err());
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let table = RouteTable::build(&test_config());
        let err = table.resolve("/api/Nope").expect_err("must fail");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn wrong_base_is_not_found() {
        let table = RouteTable::build(&test_config());
        assert!(table.resolve("/elsewhere/Book").is_err());
    }

    #[test]
    fn method_to_action_mapping() {
        assert_eq!(action_for_method("GET").expect("get"), ActionKind::Read);
        assert_eq!(action_for_method("post").expect("post"), ActionKind::Create);
        assert_eq!(action_for_method("PUT").expect("put"), ActionKind::Update);
        assert_eq!(action_for_method("DELETE").expect("delete"), ActionKind::Delete);
        assert!(action_for_method("TRACE").is_err());
    }

    #[test]
    fn stored_procedures_accept_only_post() {
        let config = test_config();
        assert!(check_entity_method(&config, "TopSellers", "POST").is_ok());
        assert!(check_entity_method(&config, "TopSellers", "GET").is_err());
    }

    #[test]
    fn explicit_method_list_is_enforced() {
        // Audit restricts REST methods to GET.
        let config = test_config();
        assert!(check_entity_method(&config, "Audit", "GET").is_ok());
        assert!(check_entity_method(&config, "Audit", "DELETE").is_err());
    }
}
