//! Transport abstraction.
//!
//! Compass does not define any wire protocol. A transport maps a named
//! operation and validated parameters onto whatever upstream it fronts
//! (GitHub REST, an analysis service) and reports failures as tagged
//! [`TransportError`] kinds so retryability is decided by the variant,
//! never by scanning message text.

use async_trait::async_trait;
use serde_json::Value;

use compass_core::TransportError;

/// A successful transport answer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportResponse {
    /// A full payload, optionally carrying an opaque revalidation tag
    /// (e.g. an HTTP ETag) for later conditional fetches.
    Payload {
        data: Value,
        revalidation_tag: Option<String>,
    },
    /// The upstream confirmed the caller's revalidation tag is still
    /// current; the cached payload remains valid.
    NotModified,
}

impl TransportResponse {
    /// Payload without a revalidation tag.
    pub fn payload(data: Value) -> Self {
        Self::Payload {
            data,
            revalidation_tag: None,
        }
    }

    /// Payload with a revalidation tag.
    pub fn tagged(data: Value, tag: impl Into<String>) -> Self {
        Self::Payload {
            data,
            revalidation_tag: Some(tag.into()),
        }
    }
}

/// The single seam between Compass and the outside world.
///
/// Implementations must be thread-safe; one transport instance serves
/// every operation the client executes. `revalidation_tag` is the stored
/// tag from a previous response, if any — implementations that support
/// conditional fetches answer [`TransportResponse::NotModified`] when the
/// tag still matches, everything else returns a fresh payload.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        operation: &str,
        params: &Value,
        revalidation_tag: Option<&str>,
    ) -> Result<TransportResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_constructor_has_no_tag() {
        let response = TransportResponse::payload(json!({"id": 1}));
        assert_eq!(
            response,
            TransportResponse::Payload {
                data: json!({"id": 1}),
                revalidation_tag: None
            }
        );
    }

    #[test]
    fn test_tagged_constructor() {
        let response = TransportResponse::tagged(json!({"id": 1}), "etag-1");
        assert_eq!(
            response,
            TransportResponse::Payload {
                data: json!({"id": 1}),
                revalidation_tag: Some("etag-1".to_string())
            }
        );
    }
}
