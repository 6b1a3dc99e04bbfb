use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::backend::{BackendError, StorageBackend};
use crate::error::StoreError;

/// Load a store's whole blob from its fixed key, or start empty.
pub(crate) fn load_or_default<T>(
    backend: &Arc<dyn StorageBackend>,
    key: &str,
) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match backend.get(key)? {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(T::default()),
    }
}

/// The tiered write path shared by all three stores.
///
/// Serialize and write the whole blob. If the backend rejects the write as
/// over quota, run the store's lossy compression pass over the in-memory
/// state and retry exactly once; a second rejection surfaces
/// `StoreError::QuotaExceeded` and the caller keeps the uncompressed record
/// in memory.
pub(crate) fn persist_with_recovery<T, F>(
    backend: &Arc<dyn StorageBackend>,
    key: &str,
    state: &mut T,
    compress: F,
) -> Result<(), StoreError>
where
    T: Serialize,
    F: FnOnce(&mut T) -> bool,
{
    let raw = serde_json::to_string(state)?;
    match backend.set(key, &raw) {
        Ok(()) => return Ok(()),
        Err(BackendError::QuotaExceeded { attempted, limit }) => {
            warn!(key, attempted, limit, "write rejected over quota, compressing oldest records");
        }
        Err(e) => return Err(e.into()),
    }

    if !compress(state) {
        return Err(StoreError::QuotaExceeded(format!(
            "{key}: no compressible records remain"
        )));
    }

    let raw = serde_json::to_string(state)?;
    backend.set(key, &raw).map_err(|e| match e {
        BackendError::QuotaExceeded { attempted, limit } => StoreError::QuotaExceeded(format!(
            "{key}: {attempted} bytes still over the {limit} byte budget after compression"
        )),
        other => other.into(),
    })
}

/// Serialized size of the blob as it would be written.
pub(crate) fn serialized_size<T: Serialize>(state: &T) -> usize {
    serde_json::to_string(state).map(|s| s.len()).unwrap_or(0)
}

/// Replace bulky text with a short derived summary: a head excerpt plus a
/// marker recording how much was dropped. Returns `None` when shrinking the
/// field would not actually save space.
pub(crate) fn summarize(text: &str, keep: usize) -> Option<String> {
    if text.len() <= keep + 32 {
        return None;
    }
    let mut end = keep.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{} [+{} bytes]", &text[..end], text.len() - end))
}
