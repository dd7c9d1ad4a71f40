use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::batch::Resolver;
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::hash::sha1_hex;
use crate::mime;
use crate::models::{Availability, Mutation, ObjectUpdate, UrlError, UrlRecord, UrlUpdate};
use crate::store::IdentityStore;

/// Establishes the identity of URLs whose content has never been fetched.
pub struct PrefixResolver {
    fetcher: Fetcher,
    prefix_size: u64,
}

impl PrefixResolver {
    pub fn new(fetcher: Fetcher, prefix_size: u64) -> Self {
        Self {
            fetcher,
            prefix_size,
        }
    }
}

#[async_trait]
impl Resolver for PrefixResolver {
    type Candidate = UrlRecord;

    fn name(&self) -> &str {
        "prefix"
    }

    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<UrlRecord>> {
        store.pending_urls().await
    }

    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        candidate: &UrlRecord,
    ) -> Result<Vec<Mutation>, ResolveError> {
        info!(url = %candidate.url, "fetching prefix");
        let fetched = self
            .fetcher
            .fetch_prefix(&candidate.url, self.prefix_size)
            .await?;
        let now = Utc::now();
        let prefix_hash = sha1_hex(&fetched.bytes);

        if fetched.bytes.is_empty() {
            warn!(url = %candidate.url, "content length is zero");
            return Ok(vec![Mutation::Url(UrlUpdate::resolved(
                candidate.id.clone(),
                prefix_hash,
                Availability::Unavailable(UrlError::empty_content()),
                now,
            ))]);
        }

        let mime_type = mime::sniff(&fetched.bytes);
        if let Some(declared) = fetched.declared_type.as_deref() {
            if declared != mime_type {
                warn!(
                    url = %candidate.url,
                    sniffed = mime_type,
                    declared,
                    "MIME type does not match Content-Type"
                );
            }
        }
        if !mime::is_supported(mime_type) {
            warn!(url = %candidate.url, mime_type, "unsupported MIME type");
        }

        let existing = store.get_object(&prefix_hash).await?;
        if let Some(recorded) = existing.as_ref().and_then(|o| o.size) {
            if recorded != fetched.size {
                warn!(
                    url = %candidate.url,
                    prefix_hash = %prefix_hash,
                    recorded_size = recorded,
                    fetched_size = fetched.size,
                    "prefix hash collision, keeping the recorded object"
                );
                return Ok(vec![Mutation::Url(UrlUpdate::resolved(
                    candidate.id.clone(),
                    prefix_hash,
                    Availability::Unavailable(UrlError::prefix_collision()),
                    now,
                ))]);
            }
        }

        let mut object = ObjectUpdate::new(prefix_hash.clone());
        object.size = Some(fetched.size);
        object.mime_type = Some(mime_type.to_string());
        if fetched.size <= self.prefix_size {
            object.sha1 = Some(prefix_hash.clone());
        }

        info!(
            url = %candidate.url,
            prefix_hash = %prefix_hash,
            size = fetched.size,
            mime_type,
            "resolved prefix"
        );
        Ok(vec![
            Mutation::Object(object),
            Mutation::Url(UrlUpdate::resolved(
                candidate.id.clone(),
                prefix_hash,
                Availability::Available,
                now,
            )),
        ])
    }
}
