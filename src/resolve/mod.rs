//! Enrichment stages. Each implements [`crate::batch::Resolver`] and fills
//! exactly one class of field.
//!
//! | Stage | Type | Selects | Writes |
//! |-------|------|---------|--------|
//! | prefix | [`PrefixResolver`] | urls without prefix hash | url identity, object size/mime (+sha1 when small) |
//! | sha1 | [`FullHashResolver`] | objects without sha1 | `sha1` |
//! | media | [`MediaProbeResolver`] | supported objects without image/video | `image` or `video` |
//! | phash | [`PerceptualHashResolver`] | images without perceptual hash | `image.perceptual_hash` |
//! | classify | [`ClassifyResolver`] | images without this service's prediction | `predictions[service]` |

mod classify;
mod full_hash;
mod media;
mod phash;
mod prefix;

pub use classify::ClassifyResolver;
pub use full_hash::FullHashResolver;
pub use media::MediaProbeResolver;
pub use phash::PerceptualHashResolver;
pub use prefix::PrefixResolver;

use crate::error::ResolveError;
use crate::models::{ObjectRecord, UrlRecord};
use crate::store::IdentityStore;

/// Loads an object and one available URL serving it.
pub(crate) async fn object_source(
    store: &dyn IdentityStore,
    object_id: &str,
) -> Result<(ObjectRecord, UrlRecord), ResolveError> {
    let object = store
        .get_object(object_id)
        .await?
        .ok_or_else(|| ResolveError::MissingObject(object_id.to_string()))?;
    let source = store
        .find_available_url(object_id)
        .await?
        .ok_or_else(|| ResolveError::NoLiveUrl(object_id.to_string()))?;
    Ok((object, source))
}
