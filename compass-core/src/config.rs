//! Configuration types
//!
//! All resilience tuning lives in one injected table: per-operation cache
//! TTLs, retry policies, circuit thresholds, timeouts, schemas, owner
//! fields, and degradation fallbacks. Call sites never carry their own
//! numbers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{CompassResult, ConfigError};
use crate::identity::OperationId;
use crate::schema::{FieldRule, FieldType, Schema};

// ============================================================================
// RETRY / CIRCUIT POLICIES
// ============================================================================

/// Retry policy for transport calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 = single attempt).
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single backoff.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total number of attempts this policy permits.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before attempt `attempt` (1-based; only attempts >= 2 sleep):
    /// `min(base_delay * multiplier^(attempt - 2), max_delay)`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Circuit breaker policy for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitPolicy {
    /// Consecutive overall failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a half-open trial.
    pub reset_timeout: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

// ============================================================================
// PER-OPERATION CONFIGURATION
// ============================================================================

/// Everything the client needs to know about one named operation.
#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// How long a successful response stays fresh in cache.
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub circuit: CircuitPolicy,
    /// Overall deadline for a single transport attempt.
    pub call_timeout: Duration,
    /// Schema applied to caller params before any network I/O.
    pub input_schema: Option<Schema>,
    /// Schema applied to the upstream response before cache or caller.
    pub response_schema: Option<Schema>,
    /// Dot-path into the response identifying the owning user; set on
    /// owner-scoped operations, enabling the ownership check.
    pub owner_field: Option<String>,
    /// Degradation payload returned (flagged) when all else fails.
    pub fallback: Option<Value>,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            circuit: CircuitPolicy::default(),
            call_timeout: Duration::from_secs(30),
            input_schema: None,
            response_schema: None,
            owner_field: None,
            fallback: None,
        }
    }
}

impl OperationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit(mut self, circuit: CircuitPolicy) -> Self {
        self.circuit = circuit;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_response_schema(mut self, schema: Schema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn owned_by(mut self, owner_field: impl Into<String>) -> Self {
        self.owner_field = Some(owner_field.into());
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// The injected per-operation configuration table.
#[derive(Debug, Clone, Default)]
pub struct OperationTable {
    operations: HashMap<OperationId, OperationConfig>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) one operation's configuration.
    pub fn register(mut self, operation: impl Into<String>, config: OperationConfig) -> Self {
        self.operations.insert(operation.into(), config);
        self
    }

    /// Look up an operation; unknown operations are a configuration error,
    /// never a silent default.
    pub fn get(&self, operation: &str) -> CompassResult<&OperationConfig> {
        self.operations.get(operation).ok_or_else(|| {
            ConfigError::MissingOperation {
                operation: operation.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.operations.contains_key(operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operation_ids(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    /// The standard career-dashboard operation set.
    ///
    /// TTLs follow the product's staleness budget: profiles change rarely
    /// (30 min), repository lists occasionally (10 min), activity and
    /// analysis results frequently (5 min), editorial advice content
    /// almost never (60 min).
    pub fn default_dashboard() -> Self {
        let username_rule = || {
            FieldRule::new()
                .required()
                .of_type(FieldType::String)
                .length(1, 39)
        };

        Self::new()
            .register(
                "github.profile",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(30 * 60))
                    .with_input_schema(Schema::new().field("username", username_rule()))
                    .with_response_schema(
                        Schema::new()
                            .owner_scoped()
                            .field("id", FieldRule::new().required())
                            .field("login", FieldRule::new().of_type(FieldType::String))
                            .field("name", FieldRule::new().of_type(FieldType::String))
                            .field("bio", FieldRule::new().of_type(FieldType::String))
                            .field("email", FieldRule::new().of_type(FieldType::Email))
                            .field("html_url", FieldRule::new().of_type(FieldType::Url).raw())
                            .field("public_repos", FieldRule::new().of_type(FieldType::Number))
                            .field("followers", FieldRule::new().of_type(FieldType::Number)),
                    )
                    .owned_by("id"),
            )
            .register(
                "github.repositories",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(10 * 60))
                    .with_input_schema(
                        Schema::new().field("username", username_rule()).field(
                            "per_page",
                            FieldRule::new().of_type(FieldType::Number).range(1.0, 100.0),
                        ),
                    )
                    .with_response_schema(
                        Schema::new()
                            .owner_scoped()
                            .field("owner", FieldRule::new().required().of_type(FieldType::Object))
                            .field(
                                "repositories",
                                FieldRule::new().required().of_type(FieldType::Array),
                            ),
                    )
                    .owned_by("owner.id"),
            )
            .register(
                "github.activity",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(5 * 60))
                    .with_input_schema(Schema::new().field("username", username_rule()))
                    .with_response_schema(
                        Schema::new()
                            .field("events", FieldRule::new().of_type(FieldType::Array))
                            .field("total", FieldRule::new().of_type(FieldType::Number)),
                    ),
            )
            .register(
                "analysis.skill_gap",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(5 * 60))
                    .with_input_schema(
                        Schema::new().field(
                            "target_role",
                            FieldRule::new().required().of_type(FieldType::String).length(2, 80),
                        ),
                    )
                    .with_fallback(json!({
                        "skills": [],
                        "gaps": [],
                        "summary": "Skill analysis is temporarily unavailable."
                    })),
            )
            .register(
                "analysis.roadmap",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(5 * 60))
                    .with_input_schema(
                        Schema::new().field(
                            "target_role",
                            FieldRule::new().required().of_type(FieldType::String).length(2, 80),
                        ),
                    )
                    .with_fallback(json!({
                        "milestones": [],
                        "summary": "Roadmap generation is temporarily unavailable."
                    })),
            )
            .register(
                "analysis.resume",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(5 * 60))
                    .with_input_schema(
                        Schema::new().field(
                            "resume_text",
                            FieldRule::new()
                                .required()
                                .of_type(FieldType::String)
                                .length(1, 20_000),
                        ),
                    ),
            )
            .register(
                "content.advice",
                OperationConfig::new()
                    .with_ttl(Duration::from_secs(60 * 60))
                    .with_input_schema(
                        Schema::new().field(
                            "topic",
                            FieldRule::new().of_type(FieldType::String).max_length(60),
                        ),
                    )
                    .with_fallback(json!({
                        "articles": [],
                        "summary": "Career advice content could not be loaded."
                    })),
            )
    }
}

// ============================================================================
// SESSION / CACHE POLICIES
// ============================================================================

/// Session token acceptance policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Token provider prefixes this deployment accepts.
    pub allowed_providers: Vec<String>,
    /// Maximum age of the timestamp embedded in the token.
    pub max_token_age: Duration,
    /// Allowance for tokens stamped slightly in the future (clock skew).
    pub future_skew: Duration,
    /// Minimum decoded payload size considered plausible.
    pub min_payload_bytes: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            allowed_providers: vec!["github".to_string()],
            max_token_age: Duration::from_secs(24 * 60 * 60),
            future_skew: Duration::from_secs(5 * 60),
            min_payload_bytes: 8,
        }
    }
}

impl SessionPolicy {
    /// Widened acceptance window for test environments.
    pub fn for_tests() -> Self {
        Self {
            max_token_age: Duration::from_secs(7 * 24 * 60 * 60),
            ..Self::default()
        }
    }
}

/// Cache sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Upper bound on live entries; oldest entries are evicted beyond it.
    pub max_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self { max_entries: 4096 }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for a [`CompassClient`](crate) instance.
#[derive(Debug, Clone, Default)]
pub struct CompassConfig {
    pub operations: OperationTable,
    pub session: SessionPolicy,
    pub cache: CachePolicy,
}

impl CompassConfig {
    /// The standard dashboard configuration.
    pub fn default_dashboard() -> Self {
        Self {
            operations: OperationTable::default_dashboard(),
            session: SessionPolicy::default(),
            cache: CachePolicy::default(),
        }
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(CompassError::Config) if invalid.
    pub fn validate(&self) -> CompassResult<()> {
        if self.operations.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "operations".to_string(),
                value: "{}".to_string(),
                reason: "at least one operation must be registered".to_string(),
            }
            .into());
        }

        if self.session.allowed_providers.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "session.allowed_providers".to_string(),
                value: "[]".to_string(),
                reason: "at least one provider prefix is required".to_string(),
            }
            .into());
        }

        if self.session.max_token_age.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "session.max_token_age".to_string(),
                value: format!("{:?}", self.session.max_token_age),
                reason: "max_token_age must be positive".to_string(),
            }
            .into());
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_entries".to_string(),
                value: "0".to_string(),
                reason: "max_entries must be positive".to_string(),
            }
            .into());
        }

        for id in self.operations.operation_ids() {
            let op = self.operations.get(id)?;
            if op.cache_ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("operations.{}.cache_ttl", id),
                    value: format!("{:?}", op.cache_ttl),
                    reason: "cache_ttl must be positive".to_string(),
                }
                .into());
            }
            if op.call_timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("operations.{}.call_timeout", id),
                    value: format!("{:?}", op.call_timeout),
                    reason: "call_timeout must be positive".to_string(),
                }
                .into());
            }
            if op.retry.backoff_multiplier < 1.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("operations.{}.retry.backoff_multiplier", id),
                    value: op.retry.backoff_multiplier.to_string(),
                    reason: "backoff_multiplier must be at least 1.0".to_string(),
                }
                .into());
            }
            if op.circuit.failure_threshold == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("operations.{}.circuit.failure_threshold", id),
                    value: "0".to_string(),
                    reason: "failure_threshold must be positive".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
