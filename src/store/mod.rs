//! Identity store abstraction.
//!
//! Every stage and the forwarder go through [`IdentityStore`], injected as an
//! `Arc<dyn IdentityStore>`. Two backends exist:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`SqliteStore`] | [`sqlite`] | production, shared by concurrent runs |
//! | [`InMemoryStore`] | [`memory`] | tests and embedding applications |
//!
//! # Guarantees
//!
//! Only per-record atomicity is promised. A [`IdentityStore::bulk_write`]
//! may be applied in a single transaction by a backend, but callers must not
//! rely on that.
//!
//! # Write semantics
//!
//! | Target | Rule |
//! |--------|------|
//! | object fields | first writer wins; a set field is never changed or cleared |
//! | url `prefix_hash`, availability, `accessed_at` | latest writer wins |
//! | predictions | keyed by (object, service, version); new versions add rows |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{InsertSummary, Mutation, ObjectRecord, StoreStats, UrlRecord};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Selection predicate of an object-level stage: which field is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    /// `sha1` missing.
    FullHash,
    /// Supported MIME type, neither image nor video metadata.
    MediaMeta,
    /// Image metadata present, perceptual hash missing.
    PerceptualHash,
    /// Image metadata present, no prediction from this service.
    Prediction(String),
}

/// A URL submitted for cataloguing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUrl {
    pub id: String,
    pub url: String,
    pub host: Option<String>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Inserts URLs that are not yet known; existing rows are left unchanged.
    async fn add_urls(&self, urls: &[NewUrl]) -> Result<InsertSummary>;

    /// URL rows whose prefix hash is still unknown, ordered by id.
    async fn pending_urls(&self) -> Result<Vec<UrlRecord>>;

    /// Ids of objects matching `pending`, ordered by id.
    async fn pending_objects(&self, pending: &Pending) -> Result<Vec<String>>;

    async fn get_url(&self, id: &str) -> Result<Option<UrlRecord>>;

    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>>;

    /// An available URL whose content has `prefix_hash`.
    async fn find_available_url(&self, prefix_hash: &str) -> Result<Option<UrlRecord>>;

    /// The object whose full-content hash is `sha1`.
    async fn find_object_by_sha1(&self, sha1: &str) -> Result<Option<ObjectRecord>>;

    /// Applies a batch of mutations. Returns the number applied.
    async fn bulk_write(&self, mutations: &[Mutation]) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}
