//! Hash → live URL lookup chain used by the forwarder.
//!
//! | Kind | Rule |
//! |------|------|
//! | [`HashKind::Url`] | url row by id, returned whatever its availability |
//! | [`HashKind::Prefix`] | an available url with this prefix hash |
//! | [`HashKind::Sha1`] | object by full sha1, then the prefix rule on its id |
//!
//! Malformed hashes resolve to nothing without touching the store.

use anyhow::Result;

use crate::hash::is_sha1_hex;
use crate::store::IdentityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Url,
    Prefix,
    Sha1,
}

/// Resolves `hash` under a single rule.
pub async fn resolve(store: &dyn IdentityStore, kind: HashKind, hash: &str) -> Result<Option<String>> {
    if !is_sha1_hex(hash) {
        return Ok(None);
    }
    match kind {
        HashKind::Url => Ok(store.get_url(hash).await?.map(|u| u.url)),
        HashKind::Prefix => Ok(store.find_available_url(hash).await?.map(|u| u.url)),
        HashKind::Sha1 => match store.find_object_by_sha1(hash).await? {
            Some(object) => Ok(store.find_available_url(&object.id).await?.map(|u| u.url)),
            None => Ok(None),
        },
    }
}

/// Tries every rule in order: url hash, prefix hash, full hash.
pub async fn resolve_any(store: &dyn IdentityStore, hash: &str) -> Result<Option<String>> {
    if !is_sha1_hex(hash) {
        return Ok(None);
    }
    for kind in [HashKind::Url, HashKind::Prefix, HashKind::Sha1] {
        if let Some(url) = resolve(store, kind, hash).await? {
            return Ok(Some(url));
        }
    }
    Ok(None)
}
