//! Uploads source images from a local directory into the asset store.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use folio_storage::StorageProvider;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::MediaResult;

/// Extensions considered source images, lowercase.
pub const SOURCE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Image files found.
    pub scanned: usize,
    /// Files written to the store.
    pub uploaded: usize,
    /// Files already present in the store.
    pub skipped: usize,
    /// Files that could not be read or saved.
    pub failed: usize,
}

/// A source image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Location on disk.
    pub path: PathBuf,
    /// `/`-separated key relative to the scanned root.
    pub key: String,
}

fn is_source_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

/// Lists source images under `root`, sorted by key.
///
/// Failing to read `root` itself is an error; unreadable subdirectories are
/// logged and skipped.
pub async fn collect_source_files(root: &Path) -> MediaResult<Vec<SourceFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    let mut first = true;

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if first => return Err(e.into()),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        first = false;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_source_image(&path) {
                match relative_key(root, &path) {
                    Some(key) => files.push(SourceFile { path, key }),
                    None => warn!(path = %path.display(), "skipping non UTF-8 path"),
                }
            }
        }
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

/// Copies every source image under `sources_dir` that the store lacks.
pub async fn sync_assets(store: &dyn StorageProvider, sources_dir: &Path) -> MediaResult<SyncReport> {
    let files = collect_source_files(sources_dir).await?;
    let mut report = SyncReport {
        scanned: files.len(),
        ..SyncReport::default()
    };

    for file in files {
        if store.exists(&file.key).await {
            report.skipped += 1;
            continue;
        }
        let body = match tokio::fs::read(&file.path).await {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "failed to read source");
                report.failed += 1;
                continue;
            }
        };
        match store.save(&file.key, body).await {
            Ok(()) => {
                debug!(key = %file.key, "source uploaded");
                report.uploaded += 1;
            }
            Err(e) => {
                warn!(key = %file.key, error = %e, "failed to upload source");
                report.failed += 1;
            }
        }
    }

    info!(
        dir = %sources_dir.display(),
        backend = store.backend_name(),
        scanned = report.scanned,
        uploaded = report.uploaded,
        skipped = report.skipped,
        failed = report.failed,
        "asset sync finished"
    );
    Ok(report)
}
