use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::batch::Resolver;
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::models::{Mutation, ObjectUpdate, UrlUpdate};
use crate::phash::perceptual_hash_bytes;
use crate::store::{IdentityStore, Pending};

use super::object_source;

/// Fingerprints decoded image pixels for near-duplicate detection.
pub struct PerceptualHashResolver {
    fetcher: Fetcher,
}

impl PerceptualHashResolver {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Resolver for PerceptualHashResolver {
    type Candidate = String;

    fn name(&self) -> &str {
        "phash"
    }

    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<String>> {
        store.pending_objects(&Pending::PerceptualHash).await
    }

    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        object_id: &String,
    ) -> Result<Vec<Mutation>, ResolveError> {
        let (object, source) = object_source(store, object_id).await?;
        let bytes = self.fetcher.fetch_bytes(&source.url).await?;

        let hash = tokio::task::spawn_blocking(move || perceptual_hash_bytes(&bytes))
            .await
            .map_err(|e| ResolveError::decoder(&source.url, e.to_string()))?
            .map_err(|e| ResolveError::decoder(&source.url, e.to_string()))?;

        info!(object_id = %object_id, perceptual_hash = %hash, "resolved perceptual hash");
        let mut update = ObjectUpdate::new(object.id.clone());
        update.perceptual_hash = Some(hash);
        Ok(vec![
            Mutation::Object(update),
            Mutation::Url(UrlUpdate::accessed(source.id, Utc::now())),
        ])
    }
}
