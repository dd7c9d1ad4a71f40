//! Record inspection by hash.
//!
//! `ocaz show <hash>` accepts any of the three identities (url id, prefix
//! hash, full sha1) and prints the matching url and object records as JSON.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::hash::is_sha1_hex;
use crate::models::{ObjectRecord, UrlRecord};
use crate::store::IdentityStore;

/// The records a hash leads to.
#[derive(Debug, Clone, Serialize)]
pub struct Lookup {
    pub url: Option<UrlRecord>,
    pub object: Option<ObjectRecord>,
}

/// Finds the records for `hash`. A url hit also pulls in the object its
/// prefix hash points at.
pub async fn lookup(store: &dyn IdentityStore, hash: &str) -> Result<Lookup> {
    if !is_sha1_hex(hash) {
        bail!("not a sha1 hex digest: {}", hash);
    }

    if let Some(url) = store.get_url(hash).await? {
        let object = match &url.prefix_hash {
            Some(prefix) => store.get_object(prefix).await?,
            None => None,
        };
        return Ok(Lookup {
            url: Some(url),
            object,
        });
    }

    let object = match store.get_object(hash).await? {
        Some(object) => Some(object),
        None => store.find_object_by_sha1(hash).await?,
    };
    Ok(Lookup { url: None, object })
}

pub async fn run_show(store: &dyn IdentityStore, hash: &str) -> Result<()> {
    let found = lookup(store, hash).await?;
    if found.url.is_none() && found.object.is_none() {
        bail!("nothing known for hash {}", hash);
    }
    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}
