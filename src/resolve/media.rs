use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::batch::Resolver;
use crate::error::ResolveError;
use crate::mime;
use crate::models::{ImageMeta, Mutation, ObjectUpdate, UrlUpdate, VideoMeta};
use crate::probe::MediaDecoder;
use crate::store::{IdentityStore, Pending};

use super::object_source;

/// Records image dimensions or video stream metadata.
pub struct MediaProbeResolver {
    decoder: Arc<dyn MediaDecoder>,
}

impl MediaProbeResolver {
    pub fn new(decoder: Arc<dyn MediaDecoder>) -> Self {
        Self { decoder }
    }
}

#[async_trait]
impl Resolver for MediaProbeResolver {
    type Candidate = String;

    fn name(&self) -> &str {
        "media"
    }

    async fn candidates(&self, store: &dyn IdentityStore) -> Result<Vec<String>> {
        store.pending_objects(&Pending::MediaMeta).await
    }

    async fn resolve(
        &self,
        store: &dyn IdentityStore,
        object_id: &String,
    ) -> Result<Vec<Mutation>, ResolveError> {
        let (object, source) = object_source(store, object_id).await?;
        let mime_type = object.mime_type.clone().unwrap_or_default();
        if !mime::is_image(&mime_type) && !mime::is_video(&mime_type) {
            return Err(ResolveError::UnsupportedContent {
                object_id: object_id.clone(),
                mime_type,
            });
        }

        let info = self.decoder.probe(&source.url).await?;
        let mut update = ObjectUpdate::new(object.id.clone());

        if mime::is_image(&mime_type) {
            info!(object_id = %object_id, width = info.width, height = info.height, "probed image");
            update.image = Some(ImageMeta {
                width: info.width,
                height: info.height,
                perceptual_hash: None,
            });
        } else {
            if info.fps <= 0.0 {
                return Err(ResolveError::decoder(&source.url, "video has no frame rate"));
            }
            let duration_seconds = info.frame_count as f64 / info.fps;
            info!(
                object_id = %object_id,
                width = info.width,
                height = info.height,
                fps = info.fps,
                frames = info.frame_count,
                duration_seconds,
                "probed video"
            );
            update.video = Some(VideoMeta {
                width: info.width,
                height: info.height,
                duration_seconds,
                fps: info.fps,
                number_of_frames: info.frame_count,
            });
        }

        Ok(vec![
            Mutation::Object(update),
            Mutation::Url(UrlUpdate::accessed(source.id, Utc::now())),
        ])
    }
}
