//! Packaged deployment artifacts.
//!
//! An artifact is a tar archive (optionally zstd compressed) holding the
//! template and its configuration files, stored in an `object_store` backend.

pub mod archive;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::debug;

use crate::config::ArtifactConfig;
use crate::error::{DeployError, DeployResult};

/// Source of template and configuration bytes.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read one entry from the artifact at `location`.
    ///
    /// Fails with [`DeployError::ArtifactNotFound`] if the artifact or the
    /// entry does not exist.
    async fn get_entry(&self, location: &str, file_name: &str) -> DeployResult<Bytes>;
}

/// [`ArtifactStore`] backed by an object store.
pub struct ObjectArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectArtifactStore {
    /// Create a store from configuration.
    pub fn new(config: &ArtifactConfig) -> DeployResult<Self> {
        Ok(Self {
            store: create_object_store(config)?,
        })
    }

    /// Create a store around a pre-configured object store.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Upload an archive under `location`.
    pub async fn put(&self, location: &str, data: Bytes) -> DeployResult<()> {
        let path = ObjectPath::from(object_key(location));
        self.store
            .put(&path, data.into())
            .await
            .map_err(|e| DeployError::storage(format!("failed to upload {location}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    async fn get_entry(&self, location: &str, file_name: &str) -> DeployResult<Bytes> {
        let path = ObjectPath::from(object_key(location));

        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(DeployError::ArtifactNotFound(location.to_owned()));
            }
            Err(e) => {
                return Err(DeployError::storage(format!(
                    "failed to download {location}: {e}"
                )));
            }
        };

        let data = result
            .bytes()
            .await
            .map_err(|e| DeployError::storage(format!("failed to read {location}: {e}")))?;

        debug!(location, size = data.len(), file_name, "artifact downloaded");

        archive::extract_entry(data, file_name)
            .await
            .map_err(|e| DeployError::storage(format!("failed to unpack {location}: {e}")))?
            .ok_or_else(|| DeployError::ArtifactNotFound(format!("{location}!{file_name}")))
    }
}

/// Object key for an artifact location.
///
/// URL-style locations (`s3://bucket/key`) drop the scheme and bucket, since
/// the bucket is fixed by configuration.
fn object_key(location: &str) -> &str {
    match location.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, key)| key),
        None => location.trim_start_matches('/'),
    }
}

/// Create an object store from configuration.
fn create_object_store(config: &ArtifactConfig) -> DeployResult<Arc<dyn ObjectStore>> {
    match config.storage_type.as_str() {
        "local" => {
            let store = object_store::local::LocalFileSystem::new_with_prefix(&config.path)
                .map_err(|e| DeployError::storage(format!("failed to create local store: {e}")))?;
            Ok(Arc::new(store))
        }
        "memory" => Ok(Arc::new(object_store::memory::InMemory::new())),
        "s3" => {
            use object_store::aws::AmazonS3Builder;
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.path);

            if let Some(region) = &config.region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }

            let store = builder
                .build()
                .map_err(|e| DeployError::storage(format!("failed to create S3 store: {e}")))?;
            Ok(Arc::new(store))
        }
        other => Err(DeployError::Config(format!(
            "unsupported storage type: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> ObjectArtifactStore {
        ObjectArtifactStore::new(&ArtifactConfig {
            storage_type: "memory".to_owned(),
            ..ArtifactConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn object_keys() {
        assert_eq!(object_key("s3://artifacts/builds/42.tar"), "builds/42.tar");
        assert_eq!(object_key("builds/42.tar"), "builds/42.tar");
        assert_eq!(object_key("/builds/42.tar"), "builds/42.tar");
    }

    #[test]
    fn unsupported_storage_type() {
        let result = ObjectArtifactStore::new(&ArtifactConfig {
            storage_type: "ftp".to_owned(),
            ..ArtifactConfig::default()
        });
        assert!(matches!(result, Err(DeployError::Config(_))));
    }

    #[tokio::test]
    async fn get_entry_from_uploaded_archive() {
        let store = memory_store();
        let data = archive::pack(&[("template.yml", b"Resources: {}".as_slice())], Some(3)).unwrap();
        store.put("s3://artifacts/build-1.tar.zst", data).await.unwrap();

        let entry = store
            .get_entry("s3://artifacts/build-1.tar.zst", "template.yml")
            .await
            .unwrap();
        assert_eq!(entry.as_ref(), b"Resources: {}");
    }

    #[tokio::test]
    async fn missing_artifact_and_entry() {
        let store = memory_store();
        let err = store.get_entry("missing.tar", "template.yml").await.unwrap_err();
        assert!(matches!(err, DeployError::ArtifactNotFound(_)));

        let data = archive::pack(&[("template.yml", b"v1".as_slice())], None).unwrap();
        store.put("build-2.tar", data).await.unwrap();
        let err = store.get_entry("build-2.tar", "config.json").await.unwrap_err();
        assert!(matches!(err, DeployError::ArtifactNotFound(_)));
    }
}
