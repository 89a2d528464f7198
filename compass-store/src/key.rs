//! Session-scoped cache key system.
//!
//! The key insight is that `ScopedCacheKey`'s private constructor makes
//! unscoped cache access UNCOMPILABLE. Every key carries either a session
//! user id or an explicit anonymous marker, so one user's cached data can
//! never be addressed from another user's session.

use serde_json::Value;

use compass_core::{compute_content_hash, hash_to_hex, ANONYMOUS_SCOPE};

/// Separator between key components inside the hashed material. 0x1F is a
/// unit separator and cannot appear in operation ids or JSON text.
const SEPARATOR: char = '\u{1F}';

/// A cache key scoped to one session (or explicitly anonymous).
///
/// # Design
///
/// The private inner struct ensures a key can ONLY be built via
/// [`ScopedCacheKey::for_user`] or [`ScopedCacheKey::anonymous`], both of
/// which pin the scope. Parameters are canonicalized (recursively
/// key-sorted, compact JSON) before hashing so logically equal parameter
/// maps always produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedCacheKey {
    inner: ScopedKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    operation: String,
    scope: String,
    digest: String,
}

impl ScopedCacheKey {
    /// Key for data owned by (or fetched on behalf of) a session user.
    pub fn for_user(operation: &str, params: &Value, user_id: &str) -> Self {
        Self::build(operation, params, user_id)
    }

    /// Key for data fetched with no session bound.
    pub fn anonymous(operation: &str, params: &Value) -> Self {
        Self::build(operation, params, ANONYMOUS_SCOPE)
    }

    fn build(operation: &str, params: &Value, scope: &str) -> Self {
        let canonical = canonicalize_params(params);
        let material = format!(
            "{}{}{}{}{}",
            operation, SEPARATOR, scope, SEPARATOR, canonical
        );
        let digest = hash_to_hex(&compute_content_hash(material.as_bytes()));
        Self {
            inner: ScopedKeyInner {
                operation: operation.to_string(),
                scope: scope.to_string(),
                digest,
            },
        }
    }

    /// The operation this key belongs to.
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// The session scope (user id or the anonymous marker).
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Whether this key is bound to a session user.
    pub fn is_anonymous(&self) -> bool {
        self.inner.scope == ANONYMOUS_SCOPE
    }

    /// Hex digest over (operation, scope, canonical params).
    pub fn digest(&self) -> &str {
        &self.inner.digest
    }
}

impl std::fmt::Display for ScopedCacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short digest prefix keeps log lines readable.
        write!(
            f,
            "{}:{}:{}",
            self.inner.operation,
            self.inner.scope,
            &self.inner.digest[..12.min(self.inner.digest.len())]
        )
    }
}

/// Canonicalize a parameter value: objects are key-sorted recursively,
/// arrays keep their order, scalars serialize compactly.
pub fn canonicalize_params(params: &Value) -> String {
    let mut out = String::new();
    write_canonical(params, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Keys and scalars serialize through serde_json so string
                // escaping stays consistent with the wire format.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_inputs_same_key() {
        let a = ScopedCacheKey::for_user("github.profile", &json!({"username": "octocat"}), "111");
        let b = ScopedCacheKey::for_user("github.profile", &json!({"username": "octocat"}), "111");
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = ScopedCacheKey::for_user(
            "github.repositories",
            &json!({"username": "octocat", "per_page": 30}),
            "111",
        );
        let b = ScopedCacheKey::for_user(
            "github.repositories",
            &json!({"per_page": 30, "username": "octocat"}),
            "111",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_users_different_keys() {
        let params = json!({"username": "octocat"});
        let a = ScopedCacheKey::for_user("github.profile", &params, "111");
        let b = ScopedCacheKey::for_user("github.profile", &params, "222");
        assert_ne!(a, b);
    }

    #[test]
    fn test_anonymous_differs_from_user_scope() {
        let params = json!({"topic": "interviews"});
        let anon = ScopedCacheKey::anonymous("content.advice", &params);
        let user = ScopedCacheKey::for_user("content.advice", &params, "111");
        assert!(anon.is_anonymous());
        assert!(!user.is_anonymous());
        assert_ne!(anon, user);
    }

    #[test]
    fn test_different_operations_different_keys() {
        let params = json!({"username": "octocat"});
        let a = ScopedCacheKey::for_user("github.profile", &params, "111");
        let b = ScopedCacheKey::for_user("github.activity", &params, "111");
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_params_different_keys() {
        let a = ScopedCacheKey::for_user("github.profile", &json!({"username": "a"}), "111");
        let b = ScopedCacheKey::for_user("github.profile", &json!({"username": "b"}), "111");
        assert_ne!(a, b);
    }

    #[test]
    fn test_canonicalize_sorts_nested_objects() {
        let canonical = canonicalize_params(&json!({
            "b": {"z": 1, "a": [true, null]},
            "a": "x"
        }));
        assert_eq!(canonical, r#"{"a":"x","b":{"a":[true,null],"z":1}}"#);
    }

    #[test]
    fn test_display_is_prefixed_and_short() {
        let key = ScopedCacheKey::for_user("github.profile", &json!({}), "111");
        let shown = key.to_string();
        assert!(shown.starts_with("github.profile:111:"));
        assert!(shown.len() < 40);
    }
}
