use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::batch::Resolver;
use crate::classifier::ClassifierClient;
use crate::error::ResolveError;
use crate::fetch::Fetcher;
use crate::mime;
use crate::models::{Mutation, Prediction, UrlUpdate};
use crate::store::{IdentityStore, Pending};

use super::object_source;

/// Sends image objects to one classifier service and records its verdict
/// under that service's name.
pub struct ClassifyResolver {
    fetcher: Fetcher,
    classifier: ClassifierClient,
    pending: Pending,
}

impl ClassifyResolver {
    pub fn new(fetcher: Fetcher, classifier: ClassifierClient) -> Self {
        let pending = Pending::Prediction(classifier.service().to_string());
        Self {
            fetcher,
            classifier,
            pending,
        }
    }
}

#[async_trait]
impl Resolver for ClassifyResolver {
    type Candidate = String;

    fn name(&self) -> &str {
        self.classifier.service()
    }

    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<String>> {
        store.pending_objects(&self.pending).await
    }

    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        object_id: &String,
    ) -> Result<Vec<Mutation>, ResolveError> {
        let (object, source) = object_source(store, object_id).await?;
        let mime_type = object.mime_type.clone().unwrap_or_default();
        if !mime::is_supported(&mime_type) || !mime::is_image(&mime_type) {
            return Err(ResolveError::UnsupportedContent {
                object_id: object_id.clone(),
                mime_type,
            });
        }

        let bytes = self.fetcher.fetch_bytes(&source.url).await?;
        let classification = self
            .classifier
            .classify(&object.id, bytes, &mime_type)
            .await?;

        if classification.service.name != self.classifier.service() {
            warn!(
                expected = self.classifier.service(),
                reported = %classification.service.name,
                "classifier reports a different service name"
            );
        }
        info!(
            object_id = %object_id,
            version = %classification.service.version,
            labels = ?classification.labels,
            "classified"
        );

        let now = Utc::now();
        Ok(vec![
            Mutation::Prediction {
                object_id: object.id,
                service: self.classifier.service().to_string(),
                prediction: Prediction {
                    version: classification.service.version,
                    predicted_at: now,
                    labels: classification.labels,
                },
            },
            Mutation::Url(UrlUpdate::accessed(source.id, now)),
        ])
    }
}
