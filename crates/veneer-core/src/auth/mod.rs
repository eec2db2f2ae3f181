//! Authorization.
//!
//! Maps `(principal, entity, action)` to a verdict: either a column mask
//! plus an optional row predicate, or a denial. The mask is applied to the
//! response after the database returns data (never during query
//! compilation, to avoid leaking column existence through differential
//! errors); the predicate is conjoined into the generated WHERE clause.

pub mod policy;

use std::collections::HashMap;

use indexmap::IndexSet;
use serde_json::Value;
use veneer_config::{ActionKind, Entity, FieldScope};
use veneer_error::{Result, VeneerError};

use crate::metadata::TableShape;
use crate::plan::Predicate;

/// Header carrying the caller's role selection.
///
/// Hosts may remap the header name through `X-MS-CLIENT-ROLE-HEADER`;
/// whichever header is in effect, its value feeds
/// [`Principal::with_role_header`].
pub const ROLE_HEADER: &str = "X-MS-API-ROLE";

/// Role name applied to requests without a token.
pub const ANONYMOUS_ROLE: &str = "anonymous";

/// Role name applied to authenticated requests that pick no explicit role.
pub const AUTHENTICATED_ROLE: &str = "authenticated";

/// The already-authenticated caller, as handed over by the token-validation
/// collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// Effective role, chosen via the `X-MS-API-ROLE` header or defaulted.
    pub role: String,

    /// Claims from the validated token.
    pub claims: HashMap<String, Value>,
}

impl Principal {
    /// Unauthenticated caller.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            role: ANONYMOUS_ROLE.to_string(),
            claims: HashMap::new(),
        }
    }

    /// Authenticated caller without an explicit role selection.
    #[must_use]
    pub fn authenticated(claims: HashMap<String, Value>) -> Self {
        Self {
            role: AUTHENTICATED_ROLE.to_string(),
            claims,
        }
    }

    /// Apply the role-selection header: an authenticated caller may assume
    /// any role; its absence keeps the default.
    #[must_use]
    pub fn with_role_header(mut self, header: Option<&str>) -> Self {
        if let Some(role) = header {
            self.role = role.to_string();
        }
        self
    }
}

/// A positive authorization verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Columns the principal may observe on this entity. Applied by the
    /// response shaper, per nested entity.
    pub mask: IndexSet<String>,

    /// Row predicate to conjoin into the WHERE clause, if the action
    /// carries a policy.
    pub predicate: Option<Predicate>,
}

/// Authorize one action against one entity.
///
/// Resolution order: role block, then action (with `*` wildcard), then the
/// column mask, then the requested columns against the mask, then policy
/// compilation. Policies are not compiled for `execute`; stored procedures
/// are opaque to row policies.
///
/// # Errors
///
/// `AuthorizationFailed` at whichever step denies; the field-denial message
/// names only the column the caller already supplied.
pub fn authorize(
    entity_name: &str,
    entity: &Entity,
    shape: &TableShape,
    principal: &Principal,
    action: ActionKind,
    requested_columns: &[String],
) -> Result<Decision> {
    let Some(permission) = entity.permission_for(&principal.role) else {
        return Err(VeneerError::forbidden(format!(
            "Role '{}' is not permitted on entity '{entity_name}'",
            principal.role
        )));
    };

    let Some(granted) = permission.action_for(action) else {
        return Err(VeneerError::forbidden(format!(
            "Action is not permitted on entity '{entity_name}' for role '{}'",
            principal.role
        )));
    };

    let mask = effective_columns(granted.fields(), shape);

    for column in requested_columns {
        if !mask.contains(column) {
            return Err(VeneerError::forbidden(format!(
                "Field '{column}' is not permitted"
            )));
        }
    }

    let predicate = match granted.policy() {
        Some(policy) if action != ActionKind::Execute => {
            Some(policy::compile(&policy.database, &principal.claims, shape)?)
        }
        _ => None,
    };

    Ok(Decision { mask, predicate })
}

/// Expand the include/exclude scope against the table shape.
///
/// `include = ["*"]` means all columns; a column listed in both include and
/// exclude resolves to excluded.
#[must_use]
pub fn effective_columns(fields: Option<&FieldScope>, shape: &TableShape) -> IndexSet<String> {
    let all = || shape.columns.iter().map(|c| c.name.clone());

    let Some(scope) = fields else {
        return all().collect();
    };

    let included: IndexSet<String> = if scope.include.iter().any(|c| c == "*") {
        all().collect()
    } else {
        scope.include.iter().cloned().collect()
    };

    included
        .into_iter()
        .filter(|c| !scope.exclude.contains(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{book_shape, test_config};
    use serde_json::json;

    fn principal(role: &str) -> Principal {
        Principal {
            role: role.to_string(),
            claims: HashMap::from([("sub".to_string(), json!(42))]),
        }
    }

    #[test]
    fn undeclared_role_is_denied() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let err = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("stranger"),
            ActionKind::Read,
            &[],
        )
        .expect_err("must deny");
        assert_eq!(err.status(), 403);
        assert!(err.to_string().contains("stranger"));
    }

    #[test]
    fn missing_action_is_denied() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let err = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("anonymous"),
            ActionKind::Delete,
            &[],
        )
        .expect_err("must deny");
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn wildcard_action_grants_everything() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let decision = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("admin"),
            ActionKind::Delete,
            &[],
        )
        .expect("allowed");
        assert!(decision.mask.contains("ssn"));
        assert!(decision.predicate.is_none());
    }

    #[test]
    fn excluded_column_is_out_of_mask() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let decision = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("anonymous"),
            ActionKind::Read,
            &["id".to_string(), "title".to_string()],
        )
        .expect("allowed");
        assert!(decision.mask.contains("title"));
        assert!(!decision.mask.contains("ssn"));
    }

    #[test]
    fn requesting_masked_column_names_only_that_column() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let err = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("anonymous"),
            ActionKind::Read,
            &["ssn".to_string()],
        )
        .expect_err("must deny");
        let message = err.to_string();
        assert!(message.contains("'ssn'"));
        assert!(!message.contains("title"), "must not enumerate other columns");
    }

    #[test]
    fn policy_compiles_with_claims_bound() {
        let config = test_config();
        let entity = config.entity("Book").expect("Book");
        let decision = authorize(
            "Book",
            entity,
            &book_shape(),
            &principal("author"),
            ActionKind::Update,
            &["title".to_string()],
        )
        .expect("allowed");
        let predicate = decision.predicate.expect("policy predicate");
        assert!(matches!(predicate, Predicate::Compare { ref column, .. } if column == "author_id"));
    }

    #[test]
    fn include_and_exclude_overlap_resolves_to_excluded() {
        let scope = FieldScope {
            include: vec!["id".to_string(), "title".to_string()],
            exclude: vec!["title".to_string()],
        };
        let mask = effective_columns(Some(&scope), &book_shape());
        assert!(mask.contains("id"));
        assert!(!mask.contains("title"));
    }
}
