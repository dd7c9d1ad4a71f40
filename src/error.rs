//! Per-item failure taxonomy for the enrichment stages.
//!
//! The batch orchestrator consults [`ResolveError::is_skippable`] to decide
//! whether a failed item ends its chunk or is passed over.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with unexpected status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("inconsistent content from {url}: {detail}")]
    Integrity { url: String, detail: String },

    #[error("object {object_id} has unsupported content type {mime_type}")]
    UnsupportedContent {
        object_id: String,
        mime_type: String,
    },

    #[error("no available url serves object {0}")]
    NoLiveUrl(String),

    #[error("object {0} not found")]
    MissingObject(String),

    #[error("decoder could not open {url}: {detail}")]
    Decoder { url: String, detail: String },

    #[error("classifier {service} failed: {detail}")]
    Classifier { service: String, detail: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ResolveError {
    pub fn network(url: &str, source: reqwest::Error) -> Self {
        ResolveError::Network {
            url: url.to_string(),
            source,
        }
    }

    pub fn integrity(url: &str, detail: impl Into<String>) -> Self {
        ResolveError::Integrity {
            url: url.to_string(),
            detail: detail.into(),
        }
    }

    pub fn decoder(url: &str, detail: impl Into<String>) -> Self {
        ResolveError::Decoder {
            url: url.to_string(),
            detail: detail.into(),
        }
    }

    /// Items failing this way are logged and passed over; the rest of the
    /// chunk still runs. Every other failure aborts the chunk.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ResolveError::UnsupportedContent { .. } | ResolveError::NoLiveUrl(_)
        )
    }

    /// Whether a later run can be expected to succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResolveError::Network { .. } | ResolveError::NoLiveUrl(_) => true,
            ResolveError::UnexpectedStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ResolveError::Classifier { .. } | ResolveError::Store(_) => true,
            ResolveError::Integrity { .. }
            | ResolveError::UnsupportedContent { .. }
            | ResolveError::MissingObject(_)
            | ResolveError::Decoder { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_policy() {
        let unsupported = ResolveError::UnsupportedContent {
            object_id: "abc".into(),
            mime_type: "image/webp".into(),
        };
        assert!(unsupported.is_skippable());
        assert!(!unsupported.is_retryable());

        assert!(ResolveError::NoLiveUrl("abc".into()).is_skippable());

        let integrity = ResolveError::integrity("http://x/", "range starts at 5");
        assert!(!integrity.is_skippable());
        assert!(integrity.to_string().contains("range starts at 5"));
    }

    #[test]
    fn status_retry_classification() {
        let busy = ResolveError::UnexpectedStatus {
            url: "http://x/".into(),
            status: 503,
        };
        let gone = ResolveError::UnexpectedStatus {
            url: "http://x/".into(),
            status: 404,
        };
        assert!(busy.is_retryable());
        assert!(!gone.is_retryable());
        assert!(!gone.is_skippable());
    }
}
