use std::path::Path;

use walkdir::WalkDir;

use crate::runtime::storage_keys::directory_object_key;

/// Bucket-scoped blob storage.
///
/// Network and authorization failures are logged by the implementation and
/// reported as `false` or an empty listing, so callers can fall through to
/// another source instead of failing the job.
pub trait BlobStore: Send + Sync {
    fn exists(&self, key: &str) -> bool;

    fn upload_file(&self, local_path: &Path, key: &str) -> bool;

    /// Creates the parent directories of `local_path` before transferring.
    fn download_file(&self, key: &str, local_path: &Path) -> bool;

    fn list_keys(&self, prefix: &str) -> Vec<String>;

    fn delete(&self, key: &str) -> bool;

    fn reference_url(&self, key: &str) -> String;

    /// Uploads every regular file under `local_dir` to `prefix` + its relative
    /// path. Symlinks are followed, since model downloads link weight files
    /// into a shared cache. Individual failures do not stop the walk.
    fn upload_directory(&self, local_dir: &Path, prefix: &str) -> bool {
        if !local_dir.is_dir() {
            tracing::error!(
                local_dir = %local_dir.display(),
                "local directory not found"
            );
            return false;
        }

        let mut summary = DirectoryUploadSummary::default();
        for entry in WalkDir::new(local_dir)
            .follow_links(true)
            .sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    tracing::warn!(%error, "skipping unreadable directory entry");
                    summary.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative_path) = entry.path().strip_prefix(local_dir) else {
                summary.failed += 1;
                continue;
            };
            let key = directory_object_key(prefix, relative_path);
            if self.upload_file(entry.path(), &key) {
                summary.uploaded += 1;
            } else {
                summary.failed += 1;
            }
        }

        tracing::info!(
            local_dir = %local_dir.display(),
            prefix,
            uploaded = summary.uploaded,
            failed = summary.failed,
            "directory upload complete"
        );
        summary.all_succeeded()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryUploadSummary {
    pub uploaded: usize,
    pub failed: usize,
}

impl DirectoryUploadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}
