//! In-memory [`IdentityStore`] for tests and embedding applications.
//!
//! Rows live in `HashMap`s behind `std::sync::RwLock`. Every read lookup
//! increments a counter exposed by [`InMemoryStore::lookups`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::mime;
use crate::models::{
    ImageMeta, InsertSummary, Mutation, ObjectRecord, ObjectUpdate, Prediction, StoreStats,
    UrlRecord, UrlUpdate,
};

use super::{IdentityStore, NewUrl, Pending};

/// (service, version) → prediction, per object.
type PredictionHistory = BTreeMap<(String, String), Prediction>;

#[derive(Default)]
pub struct InMemoryStore {
    urls: RwLock<HashMap<String, UrlRecord>>,
    objects: RwLock<HashMap<String, ObjectRecord>>,
    predictions: RwLock<HashMap<String, PredictionHistory>>,
    lookups: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of read operations served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn count_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::SeqCst);
    }

    fn read_urls(&self) -> Result<RwLockReadGuard<'_, HashMap<String, UrlRecord>>> {
        self.urls.read().map_err(|_| anyhow!("url table lock poisoned"))
    }

    fn write_urls(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, UrlRecord>>> {
        self.urls.write().map_err(|_| anyhow!("url table lock poisoned"))
    }

    fn read_objects(&self) -> Result<RwLockReadGuard<'_, HashMap<String, ObjectRecord>>> {
        self.objects
            .read()
            .map_err(|_| anyhow!("object table lock poisoned"))
    }

    fn write_objects(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, ObjectRecord>>> {
        self.objects
            .write()
            .map_err(|_| anyhow!("object table lock poisoned"))
    }

    fn read_predictions(&self) -> Result<RwLockReadGuard<'_, HashMap<String, PredictionHistory>>> {
        self.predictions
            .read()
            .map_err(|_| anyhow!("prediction table lock poisoned"))
    }

    /// Object row with its newest prediction per service filled in.
    fn assemble(&self, mut record: ObjectRecord) -> Result<ObjectRecord> {
        let predictions = self.read_predictions()?;
        if let Some(history) = predictions.get(&record.id) {
            record.predictions = latest_per_service(history);
        }
        Ok(record)
    }
}

fn latest_per_service(history: &PredictionHistory) -> BTreeMap<String, Prediction> {
    let mut latest: BTreeMap<String, Prediction> = BTreeMap::new();
    for ((service, _), prediction) in history {
        let newer = latest
            .get(service)
            .map_or(true, |current| prediction.predicted_at >= current.predicted_at);
        if newer {
            latest.insert(service.clone(), prediction.clone());
        }
    }
    latest
}

fn apply_url(urls: &mut HashMap<String, UrlRecord>, update: &UrlUpdate) -> Result<()> {
    let Some(record) = urls.get_mut(&update.id) else {
        bail!("url {} not found", update.id);
    };
    if let Some(prefix_hash) = &update.prefix_hash {
        record.prefix_hash = Some(prefix_hash.clone());
    }
    if let Some(availability) = &update.availability {
        record.available = Some(availability.is_available());
        record.error = availability.error().cloned();
    }
    if let Some(at) = update.accessed_at {
        record.accessed_at = Some(at);
    }
    record.updated_at = Utc::now();
    Ok(())
}

fn apply_object(objects: &mut HashMap<String, ObjectRecord>, update: &ObjectUpdate) {
    let now = Utc::now();
    let record = objects
        .entry(update.id.clone())
        .or_insert_with(|| ObjectRecord {
            id: update.id.clone(),
            size: None,
            mime_type: None,
            sha1: None,
            image: None,
            video: None,
            predictions: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        });

    if record.size.is_none() {
        record.size = update.size;
    }
    if record.mime_type.is_none() {
        record.mime_type = update.mime_type.clone();
    }
    if record.sha1.is_none() {
        record.sha1 = update.sha1.clone();
    }
    if record.image.is_none() {
        record.image = update.image.as_ref().map(|image| ImageMeta {
            width: image.width,
            height: image.height,
            perceptual_hash: None,
        });
    }
    if let (Some(image), Some(hash)) = (record.image.as_mut(), &update.perceptual_hash) {
        if image.perceptual_hash.is_none() {
            image.perceptual_hash = Some(hash.clone());
        }
    }
    if record.video.is_none() {
        record.video = update.video.clone();
    }
    record.updated_at = now;
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn add_urls(&self, urls: &[NewUrl]) -> Result<InsertSummary> {
        let mut stored = self.write_urls()?;
        let mut summary = InsertSummary::default();
        let now = Utc::now();
        for new in urls {
            if stored.contains_key(&new.id) {
                summary.existing += 1;
                continue;
            }
            stored.insert(
                new.id.clone(),
                UrlRecord {
                    id: new.id.clone(),
                    url: new.url.clone(),
                    host: new.host.clone(),
                    prefix_hash: None,
                    available: None,
                    error: None,
                    created_at: now,
                    updated_at: now,
                    accessed_at: None,
                },
            );
            summary.inserted += 1;
        }
        Ok(summary)
    }

    async fn pending_urls(&self) -> Result<Vec<UrlRecord>> {
        self.count_lookup();
        let urls = self.read_urls()?;
        let mut pending: Vec<UrlRecord> = urls
            .values()
            .filter(|u| u.prefix_hash.is_none())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(pending)
    }

    async fn pending_objects(&self, pending: &Pending) -> Result<Vec<String>> {
        self.count_lookup();
        let objects = self.read_objects()?;
        let predictions = self.read_predictions()?;
        let mut ids: Vec<String> = objects
            .values()
            .filter(|o| match pending {
                Pending::FullHash => o.sha1.is_none(),
                Pending::MediaMeta => {
                    o.mime_type.as_deref().is_some_and(mime::is_supported)
                        && o.image.is_none()
                        && o.video.is_none()
                }
                Pending::PerceptualHash => o
                    .image
                    .as_ref()
                    .is_some_and(|image| image.perceptual_hash.is_none()),
                Pending::Prediction(service) => {
                    o.image.is_some()
                        && !predictions
                            .get(&o.id)
                            .is_some_and(|history| history.keys().any(|(s, _)| s == service))
                }
            })
            .map(|o| o.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_url(&self, id: &str) -> Result<Option<UrlRecord>> {
        self.count_lookup();
        Ok(self.read_urls()?.get(id).cloned())
    }

    async fn get_object(&self, id: &str) -> Result<Option<ObjectRecord>> {
        self.count_lookup();
        let record = self.read_objects()?.get(id).cloned();
        record.map(|r| self.assemble(r)).transpose()
    }

    async fn find_available_url(&self, prefix_hash: &str) -> Result<Option<UrlRecord>> {
        self.count_lookup();
        let urls = self.read_urls()?;
        Ok(urls
            .values()
            .filter(|u| u.prefix_hash.as_deref() == Some(prefix_hash) && u.available == Some(true))
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned())
    }

    async fn find_object_by_sha1(&self, sha1: &str) -> Result<Option<ObjectRecord>> {
        self.count_lookup();
        let record = self
            .read_objects()?
            .values()
            .filter(|o| o.sha1.as_deref() == Some(sha1))
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned();
        record.map(|r| self.assemble(r)).transpose()
    }

    async fn bulk_write(&self, mutations: &[Mutation]) -> Result<u64> {
        let mut applied = 0;
        for mutation in mutations {
            match mutation {
                Mutation::Url(update) => apply_url(&mut *self.write_urls()?, update)?,
                Mutation::Object(update) => apply_object(&mut *self.write_objects()?, update),
                Mutation::Prediction {
                    object_id,
                    service,
                    prediction,
                } => {
                    if !self.read_objects()?.contains_key(object_id) {
                        bail!("object {} not found", object_id);
                    }
                    let mut predictions = self
                        .predictions
                        .write()
                        .map_err(|_| anyhow!("prediction table lock poisoned"))?;
                    predictions
                        .entry(object_id.clone())
                        .or_default()
                        .entry((service.clone(), prediction.version.clone()))
                        .or_insert_with(|| prediction.clone());
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let urls = self.read_urls()?;
        let objects = self.read_objects()?;
        let predictions = self.read_predictions()?;

        let mut stats = StoreStats {
            urls: urls.len() as u64,
            urls_resolved: urls.values().filter(|u| u.prefix_hash.is_some()).count() as u64,
            urls_available: urls.values().filter(|u| u.available == Some(true)).count() as u64,
            urls_unavailable: urls.values().filter(|u| u.available == Some(false)).count() as u64,
            objects: objects.len() as u64,
            objects_sha1: objects.values().filter(|o| o.sha1.is_some()).count() as u64,
            objects_image: objects.values().filter(|o| o.image.is_some()).count() as u64,
            objects_perceptual_hash: objects
                .values()
                .filter(|o| o.image.as_ref().is_some_and(|i| i.perceptual_hash.is_some()))
                .count() as u64,
            objects_video: objects.values().filter(|o| o.video.is_some()).count() as u64,
            predictions: BTreeMap::new(),
        };
        for history in predictions.values() {
            let mut services: Vec<&String> = history.keys().map(|(s, _)| s).collect();
            services.dedup();
            for service in services {
                *stats.predictions.entry(service.clone()).or_default() += 1;
            }
        }
        Ok(stats)
    }
}
