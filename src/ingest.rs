//! URL registration.
//!
//! Submitted strings are trimmed, validated as absolute http(s) URLs and
//! inserted as [`NewUrl`] rows in batches. Re-submitting a known URL is a
//! no-op.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::hash::url_id;
use crate::store::{IdentityStore, NewUrl};

/// URLs per insert batch.
pub const ADD_BATCH_SIZE: usize = 1000;

/// Outcome of [`add_urls`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub submitted: u64,
    pub inserted: u64,
    pub existing: u64,
    pub rejected: u64,
}

/// Parses `raw` into a [`NewUrl`]. `host` is the network authority
/// (host plus explicit port).
pub fn parse_url(raw: &str) -> Option<NewUrl> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;
    let authority = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Some(NewUrl {
        id: url_id(trimmed),
        url: trimmed.to_string(),
        host: Some(authority),
    })
}

/// Registers every valid URL in `urls`; blank lines are ignored.
pub async fn add_urls<I, S>(store: &dyn IdentityStore, urls: I) -> Result<AddSummary>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut summary = AddSummary::default();
    let mut batch = Vec::with_capacity(ADD_BATCH_SIZE);

    for raw in urls {
        let raw = raw.as_ref();
        if raw.trim().is_empty() {
            continue;
        }
        summary.submitted += 1;
        match parse_url(raw) {
            Some(new_url) => {
                debug!(url = %new_url.url, id = %new_url.id, "queueing url");
                batch.push(new_url);
            }
            None => {
                warn!(url = raw.trim(), "rejecting url: not an absolute http(s) url");
                summary.rejected += 1;
            }
        }
        if batch.len() == ADD_BATCH_SIZE {
            flush(store, &mut batch, &mut summary).await?;
        }
    }
    flush(store, &mut batch, &mut summary).await?;

    info!(
        submitted = summary.submitted,
        inserted = summary.inserted,
        existing = summary.existing,
        rejected = summary.rejected,
        "added urls"
    );
    Ok(summary)
}

async fn flush(
    store: &dyn IdentityStore,
    batch: &mut Vec<NewUrl>,
    summary: &mut AddSummary,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let inserted = store.add_urls(batch).await?;
    summary.inserted += inserted.inserted;
    summary.existing += inserted.existing;
    batch.clear();
    Ok(())
}
