//! Content-addressed binary resource storage
//!
//! Resources are stored under `resource://{type}/{sha256-hex}{ext}` URIs.
//! Bytes land on disk (with a JSON metadata sidecar) under a temp/ or
//! permanent/ subtree depending on whether the resource carries a TTL;
//! metadata is kept in memory for lookups.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceMetadata {
    pub created_at: DateTime<Utc>,
    pub size: usize,
    pub hash: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceMetadata {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub resource_type: String,
    pub resource_id: String,
    pub extension: String,
}

/// Split a `resource://{type}/{id}[.ext]` URI into its components. Segments
/// are restricted to filename-safe characters so a URI can never escape the
/// storage root.
pub fn parse_resource_uri(uri: &str) -> Result<ParsedUri, AppError> {
    let invalid = || AppError::malformed(format!("Invalid resource URI format: {uri}"));

    let path = uri.strip_prefix("resource://").ok_or_else(invalid)?;
    let (resource_type, rest) = path.split_once('/').ok_or_else(invalid)?;
    if resource_type.is_empty() || rest.is_empty() {
        return Err(invalid());
    }
    if !is_safe_segment(resource_type) || !is_safe_segment(rest) {
        return Err(invalid());
    }

    let (resource_id, extension) = match rest.rsplit_once('.') {
        Some((id, ext)) if !id.is_empty() && !ext.is_empty() => {
            (id.to_string(), format!(".{ext}"))
        }
        _ => (rest.to_string(), String::new()),
    };

    Ok(ParsedUri {
        resource_type: resource_type.to_string(),
        resource_id,
        extension,
    })
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.contains("..")
        && segment.chars().all(|character| {
            character.is_ascii_alphanumeric()
                || character == '-'
                || character == '_'
                || character == '.'
        })
}

pub struct ResourceStore {
    root: PathBuf,
    max_size: usize,
    entries: RwLock<HashMap<String, ResourceMetadata>>,
}

impl ResourceStore {
    pub fn new(root: impl Into<PathBuf>, max_size: usize) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("temp"))?;
        std::fs::create_dir_all(root.join("permanent"))?;
        Ok(Self {
            root,
            max_size,
            entries: RwLock::new(HashMap::new()),
        })
    }

    fn storage_path(&self, parsed: &ParsedUri, temporary: bool) -> PathBuf {
        self.root
            .join(if temporary { "temp" } else { "permanent" })
            .join(&parsed.resource_type)
            .join(format!("{}{}", parsed.resource_id, parsed.extension))
    }

    /// Store bytes and return their content-addressed URI. The same content
    /// always yields the same URI.
    pub async fn store(
        &self,
        content: &[u8],
        resource_type: &str,
        extra: Map<String, Value>,
        extension: &str,
        ttl_secs: Option<i64>,
    ) -> Result<String, AppError> {
        if resource_type.is_empty() || !is_safe_segment(resource_type) {
            return Err(AppError::invalid_params(
                "resource type must contain only alphanumeric characters, dashes, underscores, and dots",
            ));
        }
        if content.len() > self.max_size {
            return Err(AppError::invalid_params(format!(
                "Resource size ({} bytes) exceeds maximum allowed ({} bytes)",
                content.len(),
                self.max_size
            )));
        }

        let extension = normalize_extension(extension)?;
        let hash = hex::encode(Sha256::digest(content));
        let uri = format!("resource://{resource_type}/{hash}{extension}");
        let parsed = parse_resource_uri(&uri)?;

        let expires_at = ttl_secs
            .filter(|ttl| *ttl > 0)
            .map(|ttl| Utc::now() + Duration::seconds(ttl));
        let metadata = ResourceMetadata {
            created_at: Utc::now(),
            size: content.len(),
            hash,
            resource_type: resource_type.to_string(),
            expires_at,
            extra,
        };

        let path = self.storage_path(&parsed, expires_at.is_some());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::internal(format!("Error storing resource: {err}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|err| AppError::internal(format!("Error storing resource: {err}")))?;

        let sidecar = json!({ "metadata": metadata });
        tokio::fs::write(sidecar_path(&path), sidecar.to_string())
            .await
            .map_err(|err| AppError::internal(format!("Error storing resource metadata: {err}")))?;

        self.entries.write().await.insert(uri.clone(), metadata);
        debug!(uri = %uri, "stored resource");
        Ok(uri)
    }

    /// Fetch the bytes and metadata for a URI. Expired resources are removed
    /// on the way and reported as absent.
    pub async fn fetch(&self, uri: &str) -> Result<Option<(Vec<u8>, ResourceMetadata)>, AppError> {
        let parsed = parse_resource_uri(uri)?;

        let metadata = {
            let entries = self.entries.read().await;
            entries.get(uri).cloned()
        };
        let Some(metadata) = metadata else {
            return Ok(None);
        };
        if metadata.is_expired(Utc::now()) {
            self.delete(uri).await?;
            return Ok(None);
        }

        let path = self.storage_path(&parsed, metadata.expires_at.is_some());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((bytes, metadata))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(uri = %uri, "resource metadata present but file missing");
                Ok(None)
            }
            Err(err) => Err(AppError::internal(format!(
                "Error reading resource: {err}"
            ))),
        }
    }

    pub async fn metadata(&self, uri: &str) -> Result<Option<ResourceMetadata>, AppError> {
        parse_resource_uri(uri)?;
        let entries = self.entries.read().await;
        Ok(entries
            .get(uri)
            .filter(|metadata| !metadata.is_expired(Utc::now()))
            .cloned())
    }

    /// Merge extra metadata into a resource. Returns false when absent.
    pub async fn update_metadata(
        &self,
        uri: &str,
        updates: Map<String, Value>,
    ) -> Result<bool, AppError> {
        parse_resource_uri(uri)?;
        let mut entries = self.entries.write().await;
        let Some(metadata) = entries.get_mut(uri) else {
            return Ok(false);
        };
        metadata.extra.extend(updates);
        Ok(true)
    }

    pub async fn delete(&self, uri: &str) -> Result<bool, AppError> {
        let parsed = parse_resource_uri(uri)?;
        let Some(metadata) = self.entries.write().await.remove(uri) else {
            return Ok(false);
        };

        let path = self.storage_path(&parsed, metadata.expires_at.is_some());
        for target in [path.clone(), sidecar_path(&path)] {
            if let Err(err) = tokio::fs::remove_file(&target).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(uri = %uri, error = %err, "failed to remove resource file");
                }
            }
        }
        info!(uri = %uri, "deleted resource");
        Ok(true)
    }

    pub async fn reap_expired(&self) -> Result<usize, AppError> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|(_, metadata)| metadata.is_expired(now))
                .map(|(uri, _)| uri.clone())
                .collect()
        };

        let mut removed = 0;
        for uri in expired {
            if self.delete(&uri).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    #[cfg(test)]
    async fn force_expire(&self, uri: &str) {
        if let Some(metadata) = self.entries.write().await.get_mut(uri) {
            metadata.expires_at = Some(Utc::now() - Duration::seconds(1));
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".meta");
    path.with_file_name(name)
}

fn normalize_extension(extension: &str) -> Result<String, AppError> {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::invalid_params(
            "resource extension must be alphanumeric",
        ));
    }
    Ok(format!(".{trimmed}"))
}

/// Periodically drop expired resources. Spawned once at startup.
pub async fn run_resource_reaper(store: Arc<ResourceStore>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.reap_expired().await {
            Ok(0) => {}
            Ok(count) => info!(count, "reaped expired resources"),
            Err(err) => warn!(error = %err, "resource reaper pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ResourceStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResourceStore::new(dir.path(), 1024).expect("store init");
        (dir, store)
    }

    #[test]
    fn parses_uri_with_extension() {
        let parsed = parse_resource_uri("resource://screenshot/abc123.png").expect("valid uri");
        assert_eq!(
            parsed,
            ParsedUri {
                resource_type: "screenshot".to_string(),
                resource_id: "abc123".to_string(),
                extension: ".png".to_string(),
            }
        );
    }

    #[test]
    fn parses_uri_without_extension() {
        let parsed = parse_resource_uri("resource://blob/abc123").expect("valid uri");
        assert_eq!(parsed.resource_id, "abc123");
        assert_eq!(parsed.extension, "");
    }

    #[test]
    fn rejects_malformed_uris() {
        for uri in [
            "http://blob/abc",
            "resource://",
            "resource://noslash",
            "resource:///abc",
            "resource://a/",
            "resource://../escape",
            "resource://blob/../../etc/passwd",
        ] {
            let err = parse_resource_uri(uri).expect_err("must fail");
            assert_eq!(err.rpc_code(), -32600, "uri: {uri}");
        }
    }

    #[tokio::test]
    async fn store_then_fetch_round_trips() {
        let (_dir, store) = store();
        let uri = store
            .store(b"payload", "blob", Map::new(), "bin", None)
            .await
            .expect("store succeeds");

        assert!(uri.starts_with("resource://blob/"));
        assert!(uri.ends_with(".bin"));

        let (bytes, metadata) = store
            .fetch(&uri)
            .await
            .expect("fetch succeeds")
            .expect("resource exists");
        assert_eq!(bytes, b"payload");
        assert_eq!(metadata.size, 7);
        assert_eq!(metadata.resource_type, "blob");
    }

    #[tokio::test]
    async fn identical_content_yields_identical_uri() {
        let (_dir, store) = store();
        let first = store
            .store(b"same", "blob", Map::new(), "", None)
            .await
            .expect("store succeeds");
        let second = store
            .store(b"same", "blob", Map::new(), "", None)
            .await
            .expect("store succeeds");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let (_dir, store) = store();
        let err = store
            .store(&[0u8; 2048], "blob", Map::new(), "", None)
            .await
            .expect_err("over cap must fail");
        assert_eq!(err.rpc_code(), -32602);
    }

    #[tokio::test]
    async fn delete_removes_resource_and_is_idempotent() {
        let (_dir, store) = store();
        let uri = store
            .store(b"gone", "blob", Map::new(), "", None)
            .await
            .expect("store succeeds");

        assert!(store.delete(&uri).await.expect("delete succeeds"));
        assert!(store.fetch(&uri).await.expect("fetch succeeds").is_none());
        assert!(!store.delete(&uri).await.expect("second delete succeeds"));
    }

    #[tokio::test]
    async fn metadata_merge_preserves_intrinsic_fields() {
        let (_dir, store) = store();
        let mut extra = Map::new();
        extra.insert("label".to_string(), json!("first"));
        let uri = store
            .store(b"meta", "blob", extra, "", None)
            .await
            .expect("store succeeds");

        let mut updates = Map::new();
        updates.insert("label".to_string(), json!("second"));
        assert!(store
            .update_metadata(&uri, updates)
            .await
            .expect("update succeeds"));

        let metadata = store
            .metadata(&uri)
            .await
            .expect("metadata succeeds")
            .expect("resource exists");
        assert_eq!(metadata.extra["label"], "second");
        assert_eq!(metadata.size, 4);
    }

    #[tokio::test]
    async fn expired_resources_vanish_and_get_reaped() {
        let (_dir, store) = store();
        let uri = store
            .store(b"ttl", "blob", Map::new(), "", Some(3600))
            .await
            .expect("store succeeds");

        store.force_expire(&uri).await;
        assert!(store.metadata(&uri).await.expect("metadata succeeds").is_none());

        let uri2 = store
            .store(b"ttl2", "blob", Map::new(), "", Some(3600))
            .await
            .expect("store succeeds");
        store.force_expire(&uri2).await;
        assert_eq!(store.reap_expired().await.expect("reap succeeds"), 2);
    }

    #[tokio::test]
    async fn non_positive_ttl_means_permanent() {
        let (_dir, store) = store();
        let uri = store
            .store(b"keep", "blob", Map::new(), "", Some(0))
            .await
            .expect("store succeeds");
        let metadata = store
            .metadata(&uri)
            .await
            .expect("metadata succeeds")
            .expect("resource exists");
        assert!(metadata.expires_at.is_none());
    }
}
