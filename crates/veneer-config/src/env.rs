//! `@env('NAME')` token resolution.
//!
//! Connection strings and other secrets are referenced from the config file
//! as `@env('NAME')` tokens. Resolution runs against the raw JSON tree after
//! parse and before typed deserialization, so every string value in the file
//! participates. An unresolved variable is a fatal validation error.

use serde_json::Value;
use veneer_error::{Result, VeneerError};

/// Name of the environment variable selecting the config overlay.
pub const ENVIRONMENT_VAR: &str = "VENEER_ENVIRONMENT";

/// Environment variable overriding the data-source connection string.
pub const CONNSTRING_VAR: &str = "VENEER_CONNSTRING";

const TOKEN_OPEN: &str = "@env('";
const TOKEN_CLOSE: char = '\'';

/// Resolve every `@env('NAME')` token in the JSON tree in place.
///
/// # Errors
///
/// Returns `ErrorInInitialization` naming the first variable that is not
/// set in the process environment.
pub fn resolve_env_tokens(value: &mut Value) -> Result<()> {
    match value {
        Value::String(text) => {
            if text.contains(TOKEN_OPEN) {
                *text = substitute(text)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter_mut().try_for_each(resolve_env_tokens),
        Value::Object(map) => map.values_mut().try_for_each(resolve_env_tokens),
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

/// Apply the `VENEER_CONNSTRING` override onto the raw config tree.
///
/// When the variable is set, it replaces `data-source.connection-string`
/// wholesale; otherwise the tree is untouched.
pub fn apply_connstring_override(value: &mut Value) {
    let Ok(override_value) = std::env::var(CONNSTRING_VAR) else {
        return;
    };
    if let Some(data_source) = value
        .get_mut("data-source")
        .and_then(Value::as_object_mut)
    {
        tracing::info!(
            var = CONNSTRING_VAR,
            "connection string overridden from environment"
        );
        data_source.insert(
            "connection-string".to_string(),
            Value::String(override_value),
        );
    }
}

fn substitute(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(TOKEN_OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + TOKEN_OPEN.len()..];

        let Some(name_end) = after_open.find(TOKEN_CLOSE) else {
            return Err(VeneerError::init(format!(
                "Unterminated @env token in config value: {text}"
            )));
        };
        let name = &after_open[..name_end];

        let after_name = &after_open[name_end + 1..];
        let Some(tail) = after_name.strip_prefix(')') else {
            return Err(VeneerError::init(format!(
                "Malformed @env token in config value: {text}"
            )));
        };

        let resolved = std::env::var(name).map_err(|_| {
            VeneerError::init(format!("Environment variable '{name}' is not set"))
        })?;
        out.push_str(&resolved);
        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Env-var mutation is process-global; each test uses a unique name.

    #[test]
    fn resolves_full_string_token() {
        std::env::set_var("VENEER_TEST_DB_URL", "postgresql://localhost/app");
        let mut tree = json!({
            "data-source": { "connection-string": "@env('VENEER_TEST_DB_URL')" }
        });
        resolve_env_tokens(&mut tree).expect("resolves");
        assert_eq!(
            tree["data-source"]["connection-string"],
            "postgresql://localhost/app"
        );
    }

    #[test]
    fn resolves_embedded_token() {
        std::env::set_var("VENEER_TEST_HOST", "db.internal");
        let mut tree = json!({ "url": "Server=@env('VENEER_TEST_HOST');Port=5432" });
        resolve_env_tokens(&mut tree).expect("resolves");
        assert_eq!(tree["url"], "Server=db.internal;Port=5432");
    }

    #[test]
    fn resolves_inside_arrays_and_nested_objects() {
        std::env::set_var("VENEER_TEST_ORIGIN", "https://app.example");
        let mut tree = json!({
            "runtime": { "host": { "cors": { "origins": ["@env('VENEER_TEST_ORIGIN')"] } } }
        });
        resolve_env_tokens(&mut tree).expect("resolves");
        assert_eq!(
            tree["runtime"]["host"]["cors"]["origins"][0],
            "https://app.example"
        );
    }

    #[test]
    fn unresolved_variable_is_fatal() {
        let mut tree = json!({ "x": "@env('VENEER_TEST_DEFINITELY_NOT_SET')" });
        let err = resolve_env_tokens(&mut tree).expect_err("must fail");
        assert!(err.to_string().contains("VENEER_TEST_DEFINITELY_NOT_SET"));
    }

    #[test]
    fn malformed_token_is_fatal() {
        let mut tree = json!({ "x": "@env('UNTERMINATED" });
        assert!(resolve_env_tokens(&mut tree).is_err());
    }

    #[test]
    fn connstring_override_replaces_value() {
        std::env::set_var(CONNSTRING_VAR, "mysql://override/app");
        let mut tree = json!({
            "data-source": { "database-type": "mysql", "connection-string": "original" }
        });
        apply_connstring_override(&mut tree);
        std::env::remove_var(CONNSTRING_VAR);
        assert_eq!(tree["data-source"]["connection-string"], "mysql://override/app");
    }
}
