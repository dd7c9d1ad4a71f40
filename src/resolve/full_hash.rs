use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::batch::Resolver;
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::models::{Mutation, ObjectUpdate, UrlUpdate};
use crate::store::{IdentityStore, Pending};

use super::object_source;

/// Streams objects larger than the prefix window to compute their full
/// SHA-1.
///
/// The prefix window is re-hashed during the same stream; if it no longer
/// matches the object id, or the byte count disagrees with the recorded
/// size, the URL is serving different content and nothing is written.
pub struct FullHashResolver {
    fetcher: Fetcher,
    prefix_size: u64,
}

impl FullHashResolver {
    pub fn new(fetcher: Fetcher, prefix_size: u64) -> Self {
        Self {
            fetcher,
            prefix_size,
        }
    }
}

#[async_trait]
impl Resolver for FullHashResolver {
    type Candidate = String;

    fn name(&self) -> &str {
        "sha1"
    }

    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<String>> {
        store.pending_objects(&Pending::FullHash).await
    }

    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        object_id: &String,
    ) -> Result<Vec<Mutation>, ResolveError> {
        let (object, source) = object_source(store, object_id).await?;
        info!(object_id = %object_id, url = %source.url, size = ?object.size, "streaming full body");

        let digest = self
            .fetcher
            .stream_digest(&source.url, self.prefix_size)
            .await?;

        if digest.prefix_sha1 != object.id {
            return Err(ResolveError::integrity(
                &source.url,
                format!(
                    "leading bytes hash to {} instead of object {}",
                    digest.prefix_sha1, object.id
                ),
            ));
        }
        if let Some(size) = object.size {
            if size != digest.length {
                return Err(ResolveError::integrity(
                    &source.url,
                    format!("streamed {} bytes but object size is {}", digest.length, size),
                ));
            }
        }

        info!(object_id = %object_id, sha1 = %digest.sha1, "resolved full hash");
        let mut update = ObjectUpdate::new(object.id.clone());
        update.sha1 = Some(digest.sha1);
        Ok(vec![
            Mutation::Object(update),
            Mutation::Url(UrlUpdate::accessed(source.id, Utc::now())),
        ])
    }
}
