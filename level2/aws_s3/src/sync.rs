//! Mirror a local directory into a bucket: every file is uploaded under its
//! path relative to the directory, and keys with no matching local file are
//! deleted afterwards.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::{
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{Delete, ObjectIdentifier},
    Client,
};

/// DeleteObjects accepts at most this many keys per request.
pub const MAX_DELETE_BATCH: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to read {path:?}\n{source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("Object store request failed: {0}")]
    Store(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_keys(&self) -> Result<Vec<String>, SyncError>;
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), SyncError>;
    async fn delete_keys(&self, keys: &[String]) -> Result<(), SyncError>;
}

pub struct S3ObjectStore {
    pub client: Client,
    pub bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: &str) -> Self {
        Self { client, bucket: bucket.to_string() }
    }
}

fn store_err<E: std::error::Error>(e: E) -> SyncError {
    SyncError::Store(DisplayErrorContext(e).to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_keys(&self) -> Result<Vec<String>, SyncError> {
        let mut keys = vec![];
        let mut continuation: Option<String> = None;
        loop {
            let resp = self.client.list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(store_err)?;
            keys.extend(resp.contents().iter().filter_map(|o| o.key()).map(|k| k.to_string()));
            continuation = resp.next_continuation_token().map(|t| t.to_string());
            if continuation.is_none() {
                break;
            }
        }
        Ok(keys)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), SyncError> {
        self.client.put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(store_err)
    }

    async fn delete_keys(&self, keys: &[String]) -> Result<(), SyncError> {
        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            let mut objects = Vec::with_capacity(chunk.len());
            for key in chunk {
                objects.push(ObjectIdentifier::builder().key(key).build().map_err(store_err)?);
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(store_err)?;
            let resp = self.client.delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(store_err)?;
            if let Some(failed) = resp.errors().first() {
                return Err(SyncError::Store(format!(
                    "Failed to delete {:?}: {}",
                    failed.key().unwrap_or_default(),
                    failed.message().unwrap_or_default(),
                )));
            }
        }
        Ok(())
    }
}

pub fn iter_files_recursively<P: AsRef<Path>>(
    start_dir: P,
    callback: &mut impl FnMut(PathBuf) -> Result<(), SyncError>,
) -> Result<(), SyncError> {
    let io_err = |source: std::io::Error| SyncError::Io { path: start_dir.as_ref().to_path_buf(), source };
    let readdir = std::fs::read_dir(start_dir.as_ref()).map_err(io_err)?;
    for entry in readdir {
        let direntry = entry.map_err(io_err)?;
        let path = direntry.path();
        let fp = direntry.file_type().map_err(|source| SyncError::Io { path: path.clone(), source })?;
        if fp.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

/// A file to upload and the key it lands on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalFile {
    pub key: String,
    pub path: PathBuf,
}

/// every file under `dir`, keyed by its `/` separated relative path, sorted by key.
pub fn collect_files(dir: &Path) -> Result<Vec<LocalFile>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::NotADirectory(dir.to_path_buf()));
    }
    let mut files = vec![];
    iter_files_recursively(dir, &mut |path| {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        let key = relative.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push(LocalFile { key, path });
        Ok(())
    })?;
    files.sort();
    Ok(files)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// keys present remotely with no local counterpart, sorted.
pub fn plan_deletions(remote: &[String], local: &[LocalFile]) -> Vec<String> {
    let local: BTreeSet<&str> = local.iter().map(|f| f.key.as_str()).collect();
    let mut stale: Vec<String> = remote.iter().filter(|k| !local.contains(k.as_str())).cloned().collect();
    stale.sort();
    stale.dedup();
    stale
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
}

/// Upload every file under `dir`, then prune what the directory no longer has.
/// Uploads happen before any delete.
pub async fn sync_directory(store: &dyn ObjectStore, dir: &Path) -> Result<SyncReport, SyncError> {
    let files = collect_files(dir)?;
    let mut report = SyncReport::default();
    for file in files.iter() {
        let body = tokio::fs::read(&file.path).await
            .map_err(|source| SyncError::Io { path: file.path.clone(), source })?;
        let content_type = content_type_for(&file.path);
        tracing::debug!(key = %file.key, content_type, bytes = body.len(), "uploading");
        store.put_object(&file.key, body, content_type).await?;
        report.uploaded.push(file.key.clone());
    }
    let remote = store.list_keys().await?;
    let stale = plan_deletions(&remote, &files);
    if !stale.is_empty() {
        tracing::debug!(count = stale.len(), "pruning stale objects");
        store.delete_keys(&stale).await?;
    }
    report.deleted = stale;
    tracing::info!(uploaded = report.uploaded.len(), deleted = report.deleted.len(), "synced {:?}", dir);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<BTreeMap<String, (Vec<u8>, String)>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn list_keys(&self) -> Result<Vec<String>, SyncError> {
            Ok(self.objects.lock().unwrap().keys().cloned().collect())
        }
        async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), SyncError> {
            self.objects.lock().unwrap().insert(key.to_string(), (body, content_type.to_string()));
            Ok(())
        }
        async fn delete_keys(&self, keys: &[String]) -> Result<(), SyncError> {
            let mut objects = self.objects.lock().unwrap();
            for key in keys {
                objects.remove(key);
            }
            Ok(())
        }
    }

    fn write(dir: &Path, relative: &str, body: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn keys_are_relative_and_slash_separated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<h1>hi</h1>");
        write(dir.path(), "assets/css/site.css", "body{}");
        let keys: Vec<String> = collect_files(dir.path()).unwrap().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["assets/css/site.css", "index.html"]);
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(collect_files(&dir.path().join("nope")), Err(SyncError::NotADirectory(_))));
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("a/b/LOGO.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("README")), "application/octet-stream");
    }

    #[tokio::test]
    async fn sync_uploads_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<h1>site1</h1>");
        write(dir.path(), "about/index.html", "<p>about</p>");

        let store = MemoryStore::default();
        store.put_object("old.html", b"stale".to_vec(), "text/html").await.unwrap();
        store.put_object("index.html", b"previous".to_vec(), "text/html").await.unwrap();

        let report = sync_directory(&store, dir.path()).await.unwrap();
        assert_eq!(report.uploaded, vec!["about/index.html", "index.html"]);
        assert_eq!(report.deleted, vec!["old.html"]);

        let objects = store.objects.lock().unwrap();
        assert_eq!(objects.keys().collect::<Vec<_>>(), vec!["about/index.html", "index.html"]);
        assert_eq!(objects["index.html"].0, b"<h1>site1</h1>".to_vec());
        assert_eq!(objects["index.html"].1, "text/html");
    }

    #[tokio::test]
    async fn second_sync_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", "<h1>site1</h1>");
        let store = MemoryStore::default();
        sync_directory(&store, dir.path()).await.unwrap();
        let report = sync_directory(&store, dir.path()).await.unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(store.objects.lock().unwrap().len(), 1);
    }
}
