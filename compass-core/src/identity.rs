//! Identity and time primitives for Compass

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// External user identifier as issued by the upstream provider.
///
/// Provider user ids are opaque strings (GitHub numeric ids arrive as
/// decimal strings); Compass never interprets them beyond equality.
pub type UserId = String;

/// Named external operation (e.g. "github.profile", "analysis.skill_gap").
pub type OperationId = String;

/// Epoch milliseconds. All timestamps in the data-access core are carried
/// as epoch ms so they compare directly against token timestamps.
pub type EpochMs = i64;

/// Duration in milliseconds for TTL and timeout values.
pub type DurationMs = i64;

/// SHA-256 content hash used for cache keys and mirror comparisons.
pub type ContentHash = [u8; 32];

/// Scope identifier for cache isolation when no session is bound.
pub const ANONYMOUS_SCOPE: &str = "anonymous";

/// Generate a trace id for correlating log records of one `execute` call.
/// UUIDv7 embeds a timestamp, keeping trace ids sortable by creation time.
pub fn new_trace_id() -> Uuid {
    Uuid::now_v7()
}

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encode a content hash for use in string-keyed stores.
pub fn hash_to_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}
