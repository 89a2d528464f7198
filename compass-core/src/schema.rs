//! Declarative field validation for outbound params and inbound responses.
//!
//! Schemas are immutable, defined once per operation, and applied twice per
//! call: on the caller's parameters before any network I/O, and on the
//! upstream response before it reaches the cache or the caller. Unknown
//! top-level fields are tolerated (logged and dropped) so upstream schema
//! drift does not break the dashboard — except on owner-scoped payloads,
//! where structural anomalies are security-relevant.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::sanitize::sanitize_string;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s]+$").expect("url regex is valid"));

// ============================================================================
// FIELD TYPES AND RULES
// ============================================================================

/// Primitive types a field can be constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Email,
    Url,
    Array,
    Object,
    Boolean,
}

impl FieldType {
    /// Stable lowercase name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Boolean => "boolean",
        }
    }

    /// Check a JSON value against this type.
    ///
    /// `Email` and `Url` are strings with a format constraint on top.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Email => value.as_str().is_some_and(|s| EMAIL_RE.is_match(s)),
            FieldType::Url => value.as_str().is_some_and(|s| URL_RE.is_match(s)),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

/// Name the JSON type of a value, for error messages.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Custom predicate attached to a field rule.
///
/// Carries a label so a failed check produces a meaningful error without
/// the predicate itself having to build one.
#[derive(Clone)]
pub struct CustomRule {
    label: String,
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl CustomRule {
    pub fn new(
        label: impl Into<String>,
        predicate: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("label", &self.label)
            .finish()
    }
}

/// Declarative constraints for one field.
#[derive(Debug, Clone, Default)]
pub struct FieldRule {
    required: bool,
    field_type: Option<FieldType>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<Regex>,
    allowed_values: Option<Vec<Value>>,
    custom: Option<CustomRule>,
    sanitize: bool,
}

impl FieldRule {
    /// Start an empty rule with sanitization enabled.
    pub fn new() -> Self {
        Self {
            sanitize: true,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    /// Length bounds. Applies to string character counts and array lengths.
    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Numeric range bounds, inclusive.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Constrain string values to a regex pattern (checked post-sanitization).
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Constrain to an explicit value set.
    pub fn allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    /// Attach a labelled custom predicate.
    pub fn custom(mut self, rule: CustomRule) -> Self {
        self.custom = Some(rule);
        self
    }

    /// Opt this field out of string sanitization (e.g. opaque tokens).
    pub fn raw(mut self) -> Self {
        self.sanitize = false;
        self
    }

    /// Apply this rule to a present value, appending violations.
    /// Returns the (possibly sanitized) value to carry into the output.
    fn apply(&self, field: &str, value: &Value, violations: &mut Vec<ValidationError>) -> Value {
        let value = match value {
            Value::String(s) if self.sanitize => Value::String(sanitize_string(s)),
            other => other.clone(),
        };

        if let Some(expected) = self.field_type {
            if !expected.matches(&value) {
                violations.push(ValidationError::InvalidType {
                    field: field.to_string(),
                    expected: expected.name().to_string(),
                    got: json_type_name(&value).to_string(),
                });
                return value;
            }
        }

        let observed_len = match &value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = observed_len {
            if let Some(min) = self.min_length {
                if len < min {
                    violations.push(ValidationError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("length {} below minimum {}", len, min),
                    });
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    violations.push(ValidationError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("length {} above maximum {}", len, max),
                    });
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    violations.push(ValidationError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("{} below minimum {}", n, min),
                    });
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    violations.push(ValidationError::InvalidValue {
                        field: field.to_string(),
                        reason: format!("{} above maximum {}", n, max),
                    });
                }
            }
        }

        if let (Some(pattern), Some(s)) = (&self.pattern, value.as_str()) {
            if !pattern.is_match(s) {
                violations.push(ValidationError::PatternMismatch {
                    field: field.to_string(),
                });
            }
        }

        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(&value) {
                violations.push(ValidationError::NotAllowed {
                    field: field.to_string(),
                });
            }
        }

        if let Some(custom) = &self.custom {
            if !(custom.predicate)(&value) {
                violations.push(ValidationError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("failed {} check", custom.label),
                });
            }
        }

        value
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// An immutable per-operation validation schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldRule>,
    owner_scoped: bool,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field rule. Later additions with the same name replace earlier ones.
    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    /// Mark this schema as validating owner-scoped data: structural
    /// anomalies escalate from a drift warning to a security event.
    pub fn owner_scoped(mut self) -> Self {
        self.owner_scoped = true;
        self
    }

    pub fn is_owner_scoped(&self) -> bool {
        self.owner_scoped
    }

    /// Validate and sanitize a payload.
    ///
    /// Always returns a report; callers that want fail-fast semantics use
    /// [`ValidationReport::into_result`].
    pub fn validate(&self, data: &Value) -> ValidationReport {
        let mut violations = Vec::new();

        let Some(object) = data.as_object() else {
            violations.push(ValidationError::InvalidPayload {
                reason: format!("expected object, got {}", json_type_name(data)),
            });
            return ValidationReport {
                violations,
                sanitized: Value::Null,
            };
        };

        let mut sanitized = Map::new();

        for (name, rule) in &self.fields {
            match object.get(name) {
                Some(Value::Null) | None => {
                    if rule.required {
                        violations.push(ValidationError::RequiredFieldMissing {
                            field: name.clone(),
                        });
                    }
                }
                Some(value) => {
                    let kept = rule.apply(name, value, &mut violations);
                    sanitized.insert(name.clone(), kept);
                }
            }
        }

        // Forward tolerance: unknown top-level fields are dropped, not fatal.
        for unexpected in object.keys().filter(|k| !self.fields.contains_key(*k)) {
            if self.owner_scoped {
                tracing::error!(
                    security = true,
                    field = %unexpected,
                    "unexpected field in owner-scoped payload"
                );
            } else {
                tracing::warn!(field = %unexpected, "dropping unexpected field");
            }
        }

        ValidationReport {
            violations,
            sanitized: Value::Object(sanitized),
        }
    }
}

/// Outcome of validating one payload.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Every violation found, in schema field order.
    pub violations: Vec<ValidationError>,
    /// The sanitized payload (unknown fields dropped, strings cleaned).
    pub sanitized: Value,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Collapse to the sanitized payload or the first violation.
    pub fn into_result(mut self) -> Result<Value, ValidationError> {
        if self.violations.is_empty() {
            Ok(self.sanitized)
        } else {
            Err(self.violations.remove(0))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn username_schema() -> Schema {
        Schema::new().field(
            "username",
            FieldRule::new()
                .required()
                .of_type(FieldType::String)
                .length(1, 39),
        )
    }

    #[test]
    fn test_valid_payload_passes() {
        let report = username_schema().validate(&json!({"username": "octocat"}));
        assert!(report.is_valid());
        assert_eq!(report.sanitized, json!({"username": "octocat"}));
    }

    #[test]
    fn test_missing_required_field() {
        let report = username_schema().validate(&json!({}));
        assert_eq!(
            report.violations,
            vec![ValidationError::RequiredFieldMissing {
                field: "username".to_string()
            }]
        );
    }

    #[test]
    fn test_null_counts_as_missing() {
        let report = username_schema().validate(&json!({"username": null}));
        assert!(!report.is_valid());
    }

    #[test]
    fn test_type_mismatch() {
        let report = username_schema().validate(&json!({"username": 42}));
        assert_eq!(
            report.violations,
            vec![ValidationError::InvalidType {
                field: "username".to_string(),
                expected: "string".to_string(),
                got: "number".to_string(),
            }]
        );
    }

    #[test]
    fn test_string_is_sanitized_before_checks() {
        let report =
            username_schema().validate(&json!({"username": "<script>alert(1)</script>Hello"}));
        assert!(report.is_valid());
        assert_eq!(report.sanitized, json!({"username": "Hello"}));
    }

    #[test]
    fn test_sanitization_can_empty_a_field_below_min_length() {
        let report = username_schema().validate(&json!({"username": "<script>x</script>"}));
        assert!(!report.is_valid());
    }

    #[test]
    fn test_raw_field_skips_sanitization() {
        let schema = Schema::new().field("token", FieldRule::new().required().raw());
        let report = schema.validate(&json!({"token": "<keep-me>"}));
        assert!(report.is_valid());
        assert_eq!(report.sanitized, json!({"token": "<keep-me>"}));
    }

    #[test]
    fn test_email_and_url_types() {
        let schema = Schema::new()
            .field("email", FieldRule::new().of_type(FieldType::Email))
            .field("homepage", FieldRule::new().of_type(FieldType::Url).raw());

        let ok = schema.validate(&json!({
            "email": "dev@example.com",
            "homepage": "https://example.com/profile"
        }));
        assert!(ok.is_valid());

        let bad = schema.validate(&json!({
            "email": "not-an-email",
            "homepage": "ftp://example.com"
        }));
        assert_eq!(bad.violations.len(), 2);
    }

    #[test]
    fn test_numeric_range() {
        let schema = Schema::new().field(
            "per_page",
            FieldRule::new().of_type(FieldType::Number).range(1.0, 100.0),
        );
        assert!(schema.validate(&json!({"per_page": 30})).is_valid());
        assert!(!schema.validate(&json!({"per_page": 0})).is_valid());
        assert!(!schema.validate(&json!({"per_page": 500})).is_valid());
    }

    #[test]
    fn test_allowed_values() {
        let schema = Schema::new().field(
            "sort",
            FieldRule::new().allowed_values(vec![json!("stars"), json!("updated")]),
        );
        assert!(schema.validate(&json!({"sort": "stars"})).is_valid());
        assert!(!schema.validate(&json!({"sort": "forks"})).is_valid());
    }

    #[test]
    fn test_pattern() {
        let schema = Schema::new().field(
            "login",
            FieldRule::new().pattern(Regex::new(r"^[A-Za-z0-9-]+$").unwrap()),
        );
        assert!(schema.validate(&json!({"login": "octo-cat"})).is_valid());
        assert!(!schema.validate(&json!({"login": "octo cat!"})).is_valid());
    }

    #[test]
    fn test_custom_predicate() {
        let schema = Schema::new().field(
            "languages",
            FieldRule::new()
                .of_type(FieldType::Array)
                .custom(CustomRule::new("non-empty list", |v| {
                    v.as_array().is_some_and(|a| !a.is_empty())
                })),
        );
        assert!(schema.validate(&json!({"languages": ["rust"]})).is_valid());
        let report = schema.validate(&json!({"languages": []}));
        assert_eq!(
            report.violations,
            vec![ValidationError::InvalidValue {
                field: "languages".to_string(),
                reason: "failed non-empty list check".to_string(),
            }]
        );
    }

    #[test]
    fn test_unexpected_fields_dropped() {
        let report = username_schema().validate(&json!({
            "username": "octocat",
            "surprise": "field"
        }));
        assert!(report.is_valid());
        assert_eq!(report.sanitized, json!({"username": "octocat"}));
    }

    #[test]
    fn test_non_object_payload_rejected() {
        let report = username_schema().validate(&json!([1, 2, 3]));
        assert_eq!(
            report.violations,
            vec![ValidationError::InvalidPayload {
                reason: "expected object, got array".to_string()
            }]
        );
        assert_eq!(report.sanitized, Value::Null);
    }

    #[test]
    fn test_into_result() {
        let ok = username_schema()
            .validate(&json!({"username": "octocat"}))
            .into_result();
        assert_eq!(ok.unwrap(), json!({"username": "octocat"}));

        let err = username_schema().validate(&json!({})).into_result();
        assert!(matches!(
            err,
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Property: sanitized output only ever contains schema fields.
        #[test]
        fn prop_sanitized_is_subset_of_schema(
            known in "[a-z]{1,8}",
            unknown in "[A-Z]{1,8}",
            value in "[a-z ]{0,20}",
        ) {
            let schema = Schema::new()
                .field(known.clone(), FieldRule::new().of_type(FieldType::String));

            let mut payload = serde_json::Map::new();
            payload.insert(known.clone(), json!(value));
            payload.insert(unknown, json!("dropped"));
            let report = schema.validate(&serde_json::Value::Object(payload));

            let out = report.sanitized.as_object().expect("object out");
            prop_assert!(out.keys().all(|k| k == &known));
        }

        /// Property: a valid report's sanitized strings are already clean
        /// (validating the sanitized output again changes nothing).
        #[test]
        fn prop_validation_idempotent(value in ".{0,60}") {
            let schema = Schema::new()
                .field("bio", FieldRule::new().of_type(FieldType::String));
            let first = schema.validate(&json!({"bio": value}));
            let second = schema.validate(&first.sanitized);
            prop_assert_eq!(first.sanitized, second.sanitized);
        }
    }
}
