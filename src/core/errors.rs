// Custom error types for better error handling and debugging
//
// Using thiserror for ergonomic error definitions with:
// - Context preservation
// - Type-safe error matching
// - Automatic Display/Error trait implementations

use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No API keys configured (set GEMINI_API_KEYS environment variable)")]
    NoApiKeys,

    #[error("Batch size must be > 0, got {0}")]
    InvalidBatchSize(usize),

    #[error("Invalid retry config: {0}")]
    InvalidRetryConfig(String),

    #[error("Unknown rotation policy '{0}' (expected 'round-robin' or 'least-used')")]
    InvalidRotationPolicy(String),
}

/// Scan orchestration errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("'{label}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    #[error("Key pool is empty")]
    PoolEmpty,
}

/// How a failed remote attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The active key ran out of quota; rotate before retrying.
    Quota,
    /// Network hiccup, timeout, malformed response; back off and retry
    /// with the same key.
    Transient,
}

/// Single seam for backend failure classification.
///
/// Gemini surfaces quota exhaustion through the error message rather than a
/// typed field, so this pattern-matches on message substrings. The tokens
/// must not occur in incidental text: bare "rate" matches the
/// `streamGenerateContent` endpoint path, so only multi-word forms are used.
/// Transport errors must never carry the request URL for the same reason.
/// Swap this out for structured status-code matching when targeting a
/// backend with a machine-readable error taxonomy; nothing in the retry
/// logic depends on how the decision is made.
pub fn classify_failure(err: &anyhow::Error) -> FailureKind {
    let message = format!("{err:#}").to_lowercase();
    if message.contains("quota")
        || message.contains("429")
        || message.contains("rate limit")
        || message.contains("too many requests")
    {
        FailureKind::Quota
    } else {
        FailureKind::Transient
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn quota_messages_are_classified_as_quota() {
        for msg in [
            "429 Too Many Requests",
            "Resource has been exhausted (e.g. check quota)",
            "rate limited, slow down",
            "Too many requests, retry later",
        ] {
            assert_eq!(classify_failure(&anyhow!("{msg}")), FailureKind::Quota);
        }
    }

    #[test]
    fn other_messages_are_transient() {
        for msg in ["connection reset by peer", "Attempt timed out after 60s"] {
            assert_eq!(classify_failure(&anyhow!("{msg}")), FailureKind::Transient);
        }
    }

    #[test]
    fn endpoint_path_in_a_transport_error_does_not_look_like_quota() {
        // "streamGenerateContent" contains "rate"; a connection failure that
        // quotes the URL must still back off, not rotate keys
        let err = anyhow!(
            "error sending request for url \
             (http://127.0.0.1:9/models/gemma-3-27b-it:streamGenerateContent?alt=sse&key=k): \
             Connection refused"
        )
        .context("Failed to send request");
        assert_eq!(classify_failure(&err), FailureKind::Transient);
    }

    #[test]
    fn classification_sees_context_chain() {
        let err = anyhow!("status 429").context("request dispatch failed");
        assert_eq!(classify_failure(&err), FailureKind::Quota);
    }
}
