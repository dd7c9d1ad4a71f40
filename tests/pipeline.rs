//! Every stage end to end against a live origin and an in-memory store.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    jpeg_bytes, mp4_bytes, png_bytes, trickle, FakeDecoder, Origin, CLASSIFIER_VERSION,
};
use ocaz::batch::{run_batch, BatchOptions, BatchReport, Resolver};
use ocaz::classifier::ClassifierClient;
use ocaz::config::{ClassifierConfig, FetchConfig};
use ocaz::fetch::Fetcher;
use ocaz::hash::{sha1_hex, url_id};
use ocaz::mime::UNKNOWN_MIME_TYPE;
use ocaz::ingest::add_urls;
use ocaz::phash::perceptual_hash_bytes;
use ocaz::probe::MediaInfo;
use ocaz::resolve::{
    ClassifyResolver, FullHashResolver, MediaProbeResolver, PerceptualHashResolver,
    PrefixResolver,
};
use ocaz::store::{IdentityStore, InMemoryStore, Pending};

/// Small prefix window so that "large" objects stay small in tests.
const PREFIX: u64 = 64;

fn fetcher() -> Fetcher {
    Fetcher::new(&FetchConfig::default()).unwrap()
}

async fn run<R: Resolver>(resolver: R, store: &Arc<InMemoryStore>) -> anyhow::Result<BatchReport> {
    let store: Arc<dyn IdentityStore> = store.clone();
    run_batch(
        Arc::new(resolver),
        store,
        &BatchOptions::default(),
        std::future::pending::<()>(),
    )
    .await
}

async fn resolve_prefixes(store: &Arc<InMemoryStore>) -> BatchReport {
    run(PrefixResolver::new(fetcher(), PREFIX), store)
        .await
        .unwrap()
}

#[tokio::test]
async fn small_jpeg_gets_both_hashes_from_the_prefix() {
    let origin = Origin::start().await;
    let body = jpeg_bytes(40, 7);
    let url = origin.serve("small.jpg", body.clone(), "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    let report = resolve_prefixes(&store).await;
    assert_eq!(report.resolved, 1);

    let record = store.get_url(&url_id(&url)).await.unwrap().unwrap();
    let digest = sha1_hex(&body);
    assert_eq!(record.prefix_hash.as_deref(), Some(digest.as_str()));
    assert_eq!(record.available, Some(true));
    assert!(record.error.is_none());
    assert!(record.accessed_at.is_some());

    let object = store.get_object(&digest).await.unwrap().unwrap();
    assert_eq!(object.size, Some(40));
    assert_eq!(object.mime_type.as_deref(), Some("image/jpeg"));
    assert_eq!(object.sha1.as_deref(), Some(digest.as_str()));
    assert!(store
        .pending_objects(&Pending::FullHash)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn large_mp4_needs_the_full_hash_stage() {
    let origin = Origin::start().await;
    let body = mp4_bytes(300, 3);
    let url = origin.serve("big.mp4", body.clone(), "video/mp4");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    resolve_prefixes(&store).await;
    let prefix_hash = sha1_hex(&body[..PREFIX as usize]);
    let object = store.get_object(&prefix_hash).await.unwrap().unwrap();
    assert_eq!(object.size, Some(300));
    assert_eq!(object.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(object.sha1, None);

    let report = run(FullHashResolver::new(fetcher(), PREFIX), &store)
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);
    let object = store.get_object(&prefix_hash).await.unwrap().unwrap();
    assert_eq!(object.sha1, Some(sha1_hex(&body)));

    let by_sha1 = store.find_object_by_sha1(&sha1_hex(&body)).await.unwrap();
    assert_eq!(by_sha1.map(|o| o.id), Some(prefix_hash));
}

#[tokio::test]
async fn server_ignoring_range_still_yields_prefix_identity() {
    let origin = Origin::start().await;
    let body = jpeg_bytes(500, 9);
    let url = origin.serve_ignoring_range("norange.jpg", body.clone(), "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    resolve_prefixes(&store).await;
    let prefix_hash = sha1_hex(&body[..PREFIX as usize]);
    let object = store.get_object(&prefix_hash).await.unwrap().unwrap();
    assert_eq!(object.size, Some(500));
    assert_eq!(object.sha1, None);
}

#[tokio::test]
async fn empty_body_marks_url_unavailable_without_object() {
    let origin = Origin::start().await;
    let url = origin.serve("empty.jpg", Vec::new(), "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    resolve_prefixes(&store).await;
    let record = store.get_url(&url_id(&url)).await.unwrap().unwrap();
    let empty = sha1_hex(b"");
    assert_eq!(record.prefix_hash.as_deref(), Some(empty.as_str()));
    assert_eq!(record.available, Some(false));
    assert_eq!(
        record.error.map(|e| e.detail),
        Some("content length is zero".to_string())
    );
    assert!(store.get_object(&empty).await.unwrap().is_none());
    assert_eq!(store.stats().await.unwrap().objects, 0);
}

#[tokio::test]
async fn rerun_is_a_no_op_and_duplicates_share_one_object() {
    let origin = Origin::start().await;
    let body = jpeg_bytes(50, 1);
    let a = origin.serve("a.jpg", body.clone(), "image/jpeg");
    let b = origin.serve("b.jpg", body, "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&a, &b]).await.unwrap();

    let first = resolve_prefixes(&store).await;
    assert_eq!(first.resolved, 2);
    let second = resolve_prefixes(&store).await;
    assert_eq!(second.candidates, 0);
    assert_eq!(second.mutations_written, 0);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.urls, 2);
    assert_eq!(stats.urls_available, 2);
    assert_eq!(stats.objects, 1);
}

#[tokio::test]
async fn missing_url_fails_its_chunk_but_not_others() {
    let origin = Origin::start().await;
    let good = origin.serve("good.jpg", jpeg_bytes(20, 2), "image/jpeg");
    let gone = origin.url("gone.jpg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&good, &gone]).await.unwrap();

    let options = BatchOptions {
        chunk_size: 1,
        ..BatchOptions::default()
    };
    let dyn_store: Arc<dyn IdentityStore> = store.clone();
    let result = run_batch(
        Arc::new(PrefixResolver::new(fetcher(), PREFIX)),
        dyn_store,
        &options,
        std::future::pending::<()>(),
    )
    .await;
    assert!(result.is_err());

    let good = store.get_url(&url_id(&good)).await.unwrap().unwrap();
    assert_eq!(good.available, Some(true));
    let gone = store.get_url(&url_id(&gone)).await.unwrap().unwrap();
    assert_eq!(gone.prefix_hash, None);
}

#[tokio::test]
async fn media_probe_records_image_and_video_metadata() {
    let origin = Origin::start().await;
    let jpeg = origin.serve("photo.jpg", jpeg_bytes(30, 4), "image/jpeg");
    let mp4 = origin.serve("clip.mp4", mp4_bytes(200, 5), "video/mp4");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&jpeg, &mp4]).await.unwrap();
    resolve_prefixes(&store).await;

    let decoder = FakeDecoder::default()
        .with(
            &jpeg,
            MediaInfo {
                width: 640,
                height: 480,
                frame_count: 0,
                fps: 0.0,
            },
        )
        .with(
            &mp4,
            MediaInfo {
                width: 1920,
                height: 1080,
                frame_count: 250,
                fps: 25.0,
            },
        );
    let report = run(MediaProbeResolver::new(Arc::new(decoder)), &store)
        .await
        .unwrap();
    assert_eq!(report.resolved, 2);

    let jpeg_id = store.get_url(&url_id(&jpeg)).await.unwrap().unwrap().prefix_hash.unwrap();
    let image = store.get_object(&jpeg_id).await.unwrap().unwrap().image.unwrap();
    assert_eq!((image.width, image.height), (640, 480));

    let mp4_id = store.get_url(&url_id(&mp4)).await.unwrap().unwrap().prefix_hash.unwrap();
    let video = store.get_object(&mp4_id).await.unwrap().unwrap().video.unwrap();
    assert_eq!((video.width, video.height), (1920, 1080));
    assert_eq!(video.number_of_frames, 250);
    assert!((video.duration_seconds - 10.0).abs() < 1e-9);

    assert!(store
        .pending_objects(&Pending::MediaMeta)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn perceptual_hash_and_classification_of_an_image() {
    let origin = Origin::start().await;
    let png = png_bytes(48, 32);
    let url = origin.serve("gradient.png", png.clone(), "image/png");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    // Large enough that only the prefix is hashed by the first stage.
    run(PrefixResolver::new(fetcher(), 10_000_000), &store)
        .await
        .unwrap();
    let object_id = sha1_hex(&png);
    let decoder = FakeDecoder::default().with(
        &url,
        MediaInfo {
            width: 48,
            height: 32,
            frame_count: 0,
            fps: 0.0,
        },
    );
    run(MediaProbeResolver::new(Arc::new(decoder)), &store)
        .await
        .unwrap();

    run(PerceptualHashResolver::new(fetcher()), &store)
        .await
        .unwrap();
    let object = store.get_object(&object_id).await.unwrap().unwrap();
    let image = object.image.unwrap();
    assert_eq!(image.perceptual_hash, Some(perceptual_hash_bytes(&png).unwrap()));
    assert_eq!(image.width, 48);

    let service = "nsfw-test";
    let client = ClassifierClient::new(service, &ClassifierConfig::new(origin.base.clone())).unwrap();
    let report = run(ClassifyResolver::new(fetcher(), client), &store)
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);
    assert_eq!(origin.classify_calls(), 1);

    let object = store.get_object(&object_id).await.unwrap().unwrap();
    let prediction = object.predictions.get(service).unwrap();
    assert_eq!(prediction.version, CLASSIFIER_VERSION);
    assert_eq!(prediction.labels.get("nsfw"), Some(&0.125));

    let client = ClassifierClient::new(service, &ClassifierConfig::new(origin.base.clone())).unwrap();
    let again = run(ClassifyResolver::new(fetcher(), client), &store)
        .await
        .unwrap();
    assert_eq!(again.candidates, 0);
    assert_eq!(origin.classify_calls(), 1);
}

#[tokio::test]
async fn prefix_collision_keeps_the_first_object() {
    let origin = Origin::start().await;
    let first = mp4_bytes(200, 1);
    let mut second = first.clone();
    second.resize(260, 8);
    let a = origin.serve("first.mp4", first.clone(), "video/mp4");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&a]).await.unwrap();
    resolve_prefixes(&store).await;

    let b = origin.serve("second.mp4", second, "video/mp4");
    add_urls(store.as_ref(), [&b]).await.unwrap();
    resolve_prefixes(&store).await;

    let prefix_hash = sha1_hex(&first[..PREFIX as usize]);
    let b_record = store.get_url(&url_id(&b)).await.unwrap().unwrap();
    assert_eq!(b_record.prefix_hash.as_deref(), Some(prefix_hash.as_str()));
    assert_eq!(b_record.available, Some(false));
    assert_eq!(
        b_record.error.map(|e| e.detail),
        Some("prefix hash collision".to_string())
    );
    let object = store.get_object(&prefix_hash).await.unwrap().unwrap();
    assert_eq!(object.size, Some(200));
    assert_eq!(store.stats().await.unwrap().objects, 1);

    // Only the URL serving the recorded bytes is forwarded to.
    let live = store.find_available_url(&prefix_hash).await.unwrap();
    assert_eq!(live.map(|u| u.id), Some(url_id(&a)));
}

#[tokio::test]
async fn changed_content_fails_full_hash_integrity() {
    let origin = Origin::start().await;
    let original = mp4_bytes(200, 1);
    let url = origin.serve("mutable.mp4", original.clone(), "video/mp4");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();
    resolve_prefixes(&store).await;

    let mut replaced = original.clone();
    replaced[20] ^= 0xFF;
    origin.serve("mutable.mp4", replaced, "video/mp4");

    let result = run(FullHashResolver::new(fetcher(), PREFIX), &store).await;
    assert!(result.is_err());
    let prefix_hash = sha1_hex(&original[..PREFIX as usize]);
    let object = store.get_object(&prefix_hash).await.unwrap().unwrap();
    assert_eq!(object.sha1, None);
}

#[tokio::test]
async fn mime_mismatch_is_recorded_with_the_sniffed_type() {
    let origin = Origin::start().await;
    let body = jpeg_bytes(40, 3);
    let url = origin.serve("labelled.png", body.clone(), "image/png");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    let report = resolve_prefixes(&store).await;
    assert_eq!(report.resolved, 1);
    let record = store.get_url(&url_id(&url)).await.unwrap().unwrap();
    assert_eq!(record.available, Some(true));
    let object = store.get_object(&sha1_hex(&body)).await.unwrap().unwrap();
    assert_eq!(object.mime_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn unsupported_content_is_still_catalogued() {
    let origin = Origin::start().await;
    let mut body = b"plain words without any file signature".to_vec();
    body.resize(48, b'.');
    let url = origin.serve("notes.jpg", body.clone(), "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();

    let report = resolve_prefixes(&store).await;
    assert_eq!(report.resolved, 1);
    let record = store.get_url(&url_id(&url)).await.unwrap().unwrap();
    assert_eq!(record.available, Some(true));
    assert!(record.error.is_none());

    let object = store.get_object(&sha1_hex(&body)).await.unwrap().unwrap();
    assert_eq!(object.mime_type.as_deref(), Some(UNKNOWN_MIME_TYPE));
    assert_eq!(object.size, Some(48));
    assert!(store
        .pending_objects(&Pending::MediaMeta)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn decoder_failure_leaves_media_unresolved() {
    let origin = Origin::start().await;
    let body = jpeg_bytes(30, 5);
    let url = origin.serve("broken.jpg", body.clone(), "image/jpeg");
    let store = Arc::new(InMemoryStore::new());
    add_urls(store.as_ref(), [&url]).await.unwrap();
    resolve_prefixes(&store).await;

    // No entry for the URL: the decoder cannot open it.
    let result = run(MediaProbeResolver::new(Arc::new(FakeDecoder::default())), &store).await;
    assert!(result.is_err());

    let object_id = sha1_hex(&body);
    let object = store.get_object(&object_id).await.unwrap().unwrap();
    assert!(object.image.is_none());
    assert!(object.video.is_none());
    assert_eq!(
        store.pending_objects(&Pending::MediaMeta).await.unwrap(),
        vec![object_id]
    );
}

#[tokio::test]
async fn slow_transfer_outlasts_the_idle_timeout() {
    let body = mp4_bytes(12 * 1024, 6);
    let url = trickle(body.clone(), 1024, Duration::from_millis(150)).await;
    let fetcher = Fetcher::new(&FetchConfig {
        timeout_secs: 1,
        ..FetchConfig::default()
    })
    .unwrap();

    let started = Instant::now();
    let digest = fetcher.stream_digest(&url, PREFIX).await.unwrap();
    assert!(started.elapsed() > Duration::from_secs(1));
    assert_eq!(digest.sha1, sha1_hex(&body));
    assert_eq!(digest.prefix_sha1, sha1_hex(&body[..PREFIX as usize]));
    assert_eq!(digest.length, body.len() as u64);
}

#[tokio::test]
async fn stalled_transfer_hits_the_idle_timeout() {
    let body = mp4_bytes(2048, 6);
    let url = trickle(body, 1024, Duration::from_secs(3)).await;
    let fetcher = Fetcher::new(&FetchConfig {
        timeout_secs: 1,
        ..FetchConfig::default()
    })
    .unwrap();

    assert!(fetcher.stream_digest(&url, PREFIX).await.is_err());
}
