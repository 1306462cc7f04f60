//! Full-replace bucket synchronization.
//!
//! The bucket is emptied, then every regular file under the build output is
//! uploaded under its mapped key. Deletion always completes before the first
//! upload. There is no rollback: a failure in the delete phase can leave the
//! bucket partially emptied.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{DeployError, Result};
use crate::storage::{MAX_DELETE_BATCH, ObjectStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub deleted: usize,
    pub uploaded: Vec<String>,
}

/// Map a file under `output_root` to its bucket key.
///
/// The part of the path below the root keeps its leading separator and is
/// appended to `prefix`. A leading `/` on the final key is then dropped, so
/// with no prefix `public/b.html` is stored as `b.html`, never `/b.html`.
/// Separators are always `/`. Returns `None` when `file` is not below
/// `output_root`.
pub fn object_key(output_root: &Path, file: &Path, prefix: &str) -> Option<String> {
    let relative = file.strip_prefix(output_root).ok()?;
    let mut remainder = String::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                remainder.push('/');
                remainder.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if remainder.is_empty() {
        return None;
    }
    let key = format!("{}{}", prefix.trim_end_matches('/'), remainder);
    Some(key.trim_start_matches('/').to_string())
}

/// Every regular file under `dir`, sorted. Directories produce nothing.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Delete every object in the bucket, in batches. Any batch error or
/// per-key failure stops the sync.
pub async fn empty_bucket(store: &dyn ObjectStore) -> Result<usize> {
    let keys = store.list_keys().await?;
    info!(step = "delete", "Deleting {} objects from '{}'", keys.len(), store.bucket());

    let mut deleted = 0;
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        let report = store.delete_batch(batch).await?;
        deleted += report.deleted;
        if !report.failed.is_empty() {
            let detail = report
                .failed
                .iter()
                .map(|(key, reason)| format!("{} ({})", key, reason))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DeployError::StorageDelete(format!(
                "{} of {} objects could not be deleted: {}",
                report.failed.len(),
                batch.len(),
                detail
            )));
        }
    }
    Ok(deleted)
}

/// Upload `files` one object each. Keeps going past failures and reports
/// them all at the end.
pub async fn upload_files(
    store: &dyn ObjectStore,
    output_dir: &Path,
    files: &[PathBuf],
    prefix: &str,
) -> Result<Vec<String>> {
    let mut uploaded = Vec::with_capacity(files.len());
    let mut failed = Vec::new();

    for file in files {
        let Some(key) = object_key(output_dir, file, prefix) else {
            warn!("{} is outside {}, skipping", file.display(), output_dir.display());
            failed.push(file.display().to_string());
            continue;
        };
        let body = match tokio::fs::read(file).await {
            Ok(body) => body,
            Err(e) => {
                warn!(step = "upload", key = %key, "Failed to open {}: {}", file.display(), e);
                failed.push(key);
                continue;
            }
        };
        let content_type = mime_guess::from_path(file).first_raw();

        debug!(key = %key, "upload {} to {}", file.display(), store.bucket());
        match store.put_object(&key, body, content_type).await {
            Ok(()) => uploaded.push(key),
            Err(e) => {
                warn!(step = "upload", key = %key, "Failed to upload data to {}/{}: {}", store.bucket(), key, e);
                failed.push(key);
            }
        }
    }

    if failed.is_empty() {
        Ok(uploaded)
    } else {
        Err(DeployError::StorageUpload {
            failed,
            uploaded: uploaded.len(),
        })
    }
}

/// Replace the bucket's contents with the files under `output_dir`.
pub async fn sync(output_dir: &Path, store: &dyn ObjectStore, prefix: &str) -> Result<SyncReport> {
    // Walk first so an unreadable output tree never empties the bucket.
    let dir = output_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || collect_files(&dir))
        .await
        .map_err(std::io::Error::other)??;

    let deleted = empty_bucket(store).await?;

    info!(step = "upload", "Uploading {} files to '{}'", files.len(), store.bucket());
    let uploaded = upload_files(store, output_dir, &files, prefix).await?;
    Ok(SyncReport { deleted, uploaded })
}
