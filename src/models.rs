//! Core data models for the identity catalog.
//!
//! A [`UrlRecord`] is one submitted source URL; an [`ObjectRecord`] is one
//! distinct content identity keyed by its prefix hash. Stages never write
//! records directly: they produce [`Mutation`]s that the store applies in bulk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One row per distinct source URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecord {
    /// SHA-1 of `url`.
    pub id: String,
    pub url: String,
    pub host: Option<String>,
    pub prefix_hash: Option<String>,
    pub available: Option<bool>,
    pub error: Option<UrlError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accessed_at: Option<DateTime<Utc>>,
}

/// Structured failure detail attached to an unavailable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlError {
    pub detail: String,
}

impl UrlError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    /// The error recorded when a URL serves a zero-length body.
    pub fn empty_content() -> Self {
        Self::new("content length is zero")
    }

    /// The error recorded when a URL's prefix hash names an object of a
    /// different size.
    pub fn prefix_collision() -> Self {
        Self::new("prefix hash collision")
    }
}

/// One row per distinct content identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// SHA-1 of the first N bytes.
    pub id: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// SHA-1 of the complete content.
    pub sha1: Option<String>,
    pub image: Option<ImageMeta>,
    pub video: Option<VideoMeta>,
    /// Newest prediction per classifier service.
    pub predictions: BTreeMap<String, Prediction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    pub fps: f64,
    pub number_of_frames: u64,
}

/// A classifier verdict, versioned by the service that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub version: String,
    pub predicted_at: DateTime<Utc>,
    pub labels: BTreeMap<String, f64>,
}

/// Availability of a URL after a fetch attempt. Sets `available` and `error`
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(UrlError),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn error(&self) -> Option<&UrlError> {
        match self {
            Availability::Available => None,
            Availability::Unavailable(err) => Some(err),
        }
    }
}

/// Partial update of an existing [`UrlRecord`]. `None` fields are left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlUpdate {
    pub id: String,
    pub prefix_hash: Option<String>,
    pub availability: Option<Availability>,
    pub accessed_at: Option<DateTime<Utc>>,
}

impl UrlUpdate {
    /// Outcome of a prefix fetch: identity, availability and access time.
    pub fn resolved(
        id: impl Into<String>,
        prefix_hash: impl Into<String>,
        availability: Availability,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            prefix_hash: Some(prefix_hash.into()),
            availability: Some(availability),
            accessed_at: Some(at),
        }
    }

    /// Records that bytes were fetched through this URL.
    pub fn accessed(id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            prefix_hash: None,
            availability: None,
            accessed_at: Some(at),
        }
    }
}

/// Upsert of an [`ObjectRecord`]. Provided fields are written only where the
/// stored value is still missing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectUpdate {
    pub id: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub sha1: Option<String>,
    /// Image dimensions; any perceptual hash inside is ignored in favor of
    /// `perceptual_hash`.
    pub image: Option<ImageMeta>,
    pub perceptual_hash: Option<String>,
    pub video: Option<VideoMeta>,
}

impl ObjectUpdate {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// A single write produced by a stage for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Url(UrlUpdate),
    Object(ObjectUpdate),
    Prediction {
        object_id: String,
        service: String,
        prediction: Prediction,
    },
}

/// Result of [`crate::store::IdentityStore::add_urls`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    pub inserted: u64,
    pub existing: u64,
}

/// Field coverage counts reported by `ocaz stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub urls: u64,
    pub urls_resolved: u64,
    pub urls_available: u64,
    pub urls_unavailable: u64,
    pub objects: u64,
    pub objects_sha1: u64,
    pub objects_image: u64,
    pub objects_perceptual_hash: u64,
    pub objects_video: u64,
    /// Objects with at least one prediction, per service.
    pub predictions: BTreeMap<String, u64>,
}
