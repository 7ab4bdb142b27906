use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("S3 error: {0}")]
    S3(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// What kind of artifact a blob is. Each kind lives under its own
/// directory so plugin binaries are never reachable through the public
/// thumbnail path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Packaged plugin binary (a `.jar` archive).
    PluginArchive,
    /// Listing thumbnail image.
    Thumbnail,
}

impl ArtifactKind {
    pub fn dir(&self) -> &'static str {
        match self {
            ArtifactKind::PluginArchive => "plugins",
            ArtifactKind::Thumbnail => "thumbnails",
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::PluginArchive => "plugin",
            ArtifactKind::Thumbnail => "thumbnail",
        }
    }
}

/// Build a collision-resistant stored filename: kind prefix, upload
/// timestamp, random suffix, and the sanitized original extension.
pub fn generate_stored_name(kind: ArtifactKind, original_name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix = Uuid::new_v4().simple();
    let ext = Path::new(&sanitize_filename(original_name))
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());
    format!("{}-{millis}-{suffix}.{ext}", kind.file_prefix())
}

/// Trait defining operations all artifact store backends must implement.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an uploaded blob and return its relative path
    /// (`<kind dir>/<generated name>`).
    async fn store_file(
        &self,
        kind: ArtifactKind,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, StorageError>;

    fn full_path(&self, relative_path: &str) -> PathBuf;

    async fn file_exists(&self, relative_path: &str) -> bool;

    async fn delete_file(&self, relative_path: &str) -> Result<(), StorageError>;

    async fn read_file(&self, relative_path: &str) -> Result<Vec<u8>, StorageError>;
}

// ─── Local Filesystem Backend ──────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_env() -> Self {
        let base =
            std::env::var("UPLOAD_STORAGE_PATH").unwrap_or_else(|_| "./data/uploads".to_string());
        Self::new(base)
    }

    pub fn base(&self) -> &Path {
        &self.base_path
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    async fn store_file(
        &self,
        kind: ArtifactKind,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let dir = self.base_path.join(kind.dir());
        fs::create_dir_all(&dir).await?;

        let stored_name = generate_stored_name(kind, original_name);
        let file_path = dir.join(&stored_name);
        fs::write(&file_path, data).await?;

        Ok(format!("{}/{stored_name}", kind.dir()))
    }

    fn full_path(&self, relative_path: &str) -> PathBuf {
        self.base_path.join(relative_path)
    }

    async fn file_exists(&self, relative_path: &str) -> bool {
        fs::metadata(self.full_path(relative_path)).await.is_ok()
    }

    async fn delete_file(&self, relative_path: &str) -> Result<(), StorageError> {
        let path = self.full_path(relative_path);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn read_file(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.full_path(relative_path);
        fs::read(&path)
            .await
            .map_err(|_| StorageError::NotFound(relative_path.to_string()))
    }
}

// ─── S3 Backend ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    cache_path: PathBuf,
}

impl S3Storage {
    pub async fn from_config(
        endpoint: Option<&str>,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        prefix: &str,
    ) -> Result<Self, StorageError> {
        let creds =
            aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "forgemart");

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(creds)
            .behavior_version_latest();

        if let Some(ep) = endpoint {
            config_builder = config_builder.endpoint_url(ep).force_path_style(true);
        }

        let config = config_builder.build();
        let client = aws_sdk_s3::Client::from_conf(config);

        let cache_path = PathBuf::from(
            std::env::var("S3_CACHE_PATH")
                .unwrap_or_else(|_| "/tmp/forgemart-s3-cache".to_string()),
        );
        fs::create_dir_all(&cache_path)
            .await
            .map_err(|e| StorageError::Config(format!("Cannot create S3 cache dir: {e}")))?;

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            cache_path,
        })
    }

    fn s3_key(&self, relative_path: &str) -> String {
        if self.prefix.is_empty() {
            relative_path.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), relative_path)
        }
    }
}

#[async_trait]
impl ArtifactStore for S3Storage {
    async fn store_file(
        &self,
        kind: ArtifactKind,
        original_name: &str,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let stored_name = generate_stored_name(kind, original_name);
        let relative = format!("{}/{stored_name}", kind.dir());
        let key = self.s3_key(&relative);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("PutObject failed: {e}")))?;

        // Cache locally so downloads can stream from disk
        let cache_file = self.cache_path.join(&relative);
        if let Some(parent) = cache_file.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let _ = fs::write(&cache_file, data).await;

        Ok(relative)
    }

    fn full_path(&self, relative_path: &str) -> PathBuf {
        self.cache_path.join(relative_path)
    }

    async fn file_exists(&self, relative_path: &str) -> bool {
        let key = self.s3_key(relative_path);
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
    }

    async fn delete_file(&self, relative_path: &str) -> Result<(), StorageError> {
        let key = self.s3_key(relative_path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("DeleteObject failed: {e}")))?;

        let cache_file = self.cache_path.join(relative_path);
        let _ = fs::remove_file(cache_file).await;

        Ok(())
    }

    async fn read_file(&self, relative_path: &str) -> Result<Vec<u8>, StorageError> {
        let cache_file = self.cache_path.join(relative_path);
        if cache_file.exists() {
            return fs::read(&cache_file).await.map_err(StorageError::Io);
        }

        let key = self.s3_key(relative_path);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("GetObject failed: {e}")))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("Read body: {e}")))?
            .into_bytes()
            .to_vec();

        if let Some(parent) = cache_file.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let _ = fs::write(&cache_file, &data).await;

        Ok(data)
    }
}

// ─── Helpers ───────────────────────────────────────────────────────

pub async fn ensure_local_file(
    storage: &dyn ArtifactStore,
    relative_path: &str,
) -> Result<PathBuf, StorageError> {
    let local = storage.full_path(relative_path);
    if local.exists() {
        return Ok(local);
    }
    let data = storage.read_file(relative_path).await?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&local, &data).await?;
    Ok(local)
}

pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string();
    // SECURITY: reject path traversal sequences
    if sanitized == ".." || sanitized == "." || sanitized.contains("..") {
        return sanitized.replace("..", "__");
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_clean() {
        assert_eq!(sanitize_filename("economy-core.jar"), "economy-core.jar");
    }

    #[test]
    fn test_sanitize_filename_slashes() {
        assert_eq!(sanitize_filename("path/to/file"), "path_to_file");
    }

    #[test]
    fn test_sanitize_filename_traversal() {
        let out = sanitize_filename("../../etc/passwd");
        assert!(!out.contains(".."));
        assert!(!out.contains('/'));
    }

    #[test]
    fn test_sanitize_filename_special_chars() {
        assert_eq!(sanitize_filename("a:b*c?d"), "a_b_c_d");
    }

    #[test]
    fn test_generate_stored_name_plugin() {
        let name = generate_stored_name(ArtifactKind::PluginArchive, "WorldEdit.JAR");
        assert!(name.starts_with("plugin-"));
        assert!(name.ends_with(".jar"));
    }

    #[test]
    fn test_generate_stored_name_thumbnail() {
        let name = generate_stored_name(ArtifactKind::Thumbnail, "shot.png");
        assert!(name.starts_with("thumbnail-"));
        assert!(name.ends_with(".png"));
    }

    #[test]
    fn test_generate_stored_name_no_extension() {
        let name = generate_stored_name(ArtifactKind::PluginArchive, "nameless");
        assert!(name.ends_with(".bin"));
    }

    #[test]
    fn test_generate_stored_name_unique() {
        let a = generate_stored_name(ArtifactKind::PluginArchive, "same.jar");
        let b = generate_stored_name(ArtifactKind::PluginArchive, "same.jar");
        assert_ne!(a, b);
    }

    #[test]
    fn test_artifact_kind_dirs() {
        assert_eq!(ArtifactKind::PluginArchive.dir(), "plugins");
        assert_eq!(ArtifactKind::Thumbnail.dir(), "thumbnails");
    }

    #[tokio::test]
    async fn test_store_and_read_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let relative = storage
            .store_file(ArtifactKind::PluginArchive, "eco.jar", b"fake jar bytes")
            .await
            .unwrap();

        assert!(relative.starts_with("plugins/"));
        assert!(relative.ends_with(".jar"));

        let data = storage.read_file(&relative).await.unwrap();
        assert_eq!(data, b"fake jar bytes");
    }

    #[tokio::test]
    async fn test_thumbnail_segregated_from_plugins() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let rel = storage
            .store_file(ArtifactKind::Thumbnail, "cover.png", b"png data")
            .await
            .unwrap();

        assert!(rel.starts_with("thumbnails/"));
        assert!(tmp.path().join("thumbnails").is_dir());
        assert!(!tmp.path().join("plugins").exists());
    }

    #[tokio::test]
    async fn test_file_exists() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let relative = storage
            .store_file(ArtifactKind::PluginArchive, "a.jar", b"data")
            .await
            .unwrap();

        assert!(storage.file_exists(&relative).await);
        assert!(!storage.file_exists("plugins/nope.jar").await);
    }

    #[tokio::test]
    async fn test_delete_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let relative = storage
            .store_file(ArtifactKind::Thumbnail, "deleteme.png", b"data")
            .await
            .unwrap();

        assert!(storage.file_exists(&relative).await);
        storage.delete_file(&relative).await.unwrap();
        assert!(!storage.file_exists(&relative).await);
    }

    #[tokio::test]
    async fn test_delete_nonexistent_file_ok() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let result = storage.delete_file("plugins/nonexistent.jar").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_original_names_get_unique_paths() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let rel1 = storage
            .store_file(ArtifactKind::PluginArchive, "eco.jar", b"v1")
            .await
            .unwrap();
        let rel2 = storage
            .store_file(ArtifactKind::PluginArchive, "eco.jar", b"v2")
            .await
            .unwrap();

        assert_ne!(rel1, rel2);
        assert_eq!(storage.read_file(&rel1).await.unwrap(), b"v1");
        assert_eq!(storage.read_file(&rel2).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_read_nonexistent_file() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let result = storage.read_file("plugins/nope.jar").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_full_path() {
        let storage = LocalStorage::new("/data/uploads");
        let full = storage.full_path("plugins/plugin-1-x.jar");
        assert_eq!(full, PathBuf::from("/data/uploads/plugins/plugin-1-x.jar"));
    }

    #[tokio::test]
    async fn test_ensure_local_file_local_backend() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let relative = storage
            .store_file(ArtifactKind::PluginArchive, "x.jar", b"bytes")
            .await
            .unwrap();

        let path = ensure_local_file(&storage, &relative).await.unwrap();
        assert!(path.is_file());
    }
}
