//! Environment overlay merging.
//!
//! With `VENEER_ENVIRONMENT=foo`, loading `config.json` also loads
//! `config.foo.json` and `config.foo.overrides.json` (when present) and
//! deep-merges them over the base file, in that order. Objects merge key by
//! key; arrays and scalars are replaced wholesale, never concatenated.

use std::path::{Path, PathBuf};

use serde_json::Value;

/// Overlay file paths for a base config path and environment name.
///
/// `config.json` + `staging` yields `config.staging.json` and
/// `config.staging.overrides.json`, resolved next to the base file.
#[must_use]
pub fn overlay_paths(base: &Path, environment: &str) -> Vec<PathBuf> {
    let stem = base
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let extension = base
        .extension()
        .map_or_else(|| "json".to_string(), |e| e.to_string_lossy().into_owned());
    let dir = base.parent().unwrap_or_else(|| Path::new("."));

    vec![
        dir.join(format!("{stem}.{environment}.{extension}")),
        dir.join(format!("{stem}.{environment}.overrides.{extension}")),
    ]
}

/// Deep-merge `overlay` into `base` in place.
///
/// Objects merge recursively; any other value kind in the overlay replaces
/// the base value, so arrays are replaced rather than concatenated.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_merge_recursively() {
        let mut base = json!({
            "runtime": { "rest": { "enabled": true, "path": "/api" } }
        });
        deep_merge(
            &mut base,
            json!({ "runtime": { "rest": { "enabled": false } } }),
        );
        assert_eq!(base["runtime"]["rest"]["enabled"], false);
        assert_eq!(base["runtime"]["rest"]["path"], "/api");
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let mut base = json!({ "origins": ["https://a"] });
        deep_merge(&mut base, json!({ "origins": ["https://b"] }));
        assert_eq!(base["origins"], json!(["https://b"]));
    }

    #[test]
    fn overlay_adds_new_keys() {
        let mut base = json!({ "entities": { "Book": { "source": "books" } } });
        deep_merge(
            &mut base,
            json!({ "entities": { "Author": { "source": "authors" } } }),
        );
        assert!(base["entities"]["Book"].is_object());
        assert!(base["entities"]["Author"].is_object());
    }

    #[test]
    fn scalar_replaces_object() {
        let mut base = json!({ "graphql": { "enabled": true } });
        deep_merge(&mut base, json!({ "graphql": false }));
        assert_eq!(base["graphql"], false);
    }

    #[test]
    fn overlay_paths_follow_base_name() {
        let paths = overlay_paths(Path::new("/etc/veneer/config.json"), "staging");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/etc/veneer/config.staging.json"),
                PathBuf::from("/etc/veneer/config.staging.overrides.json"),
            ]
        );
    }
}
