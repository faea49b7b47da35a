//! Staging area for file uploads.
//!
//! The request path writes the raw file here and enqueues an add-file intent
//! that names the object; the worker reads it back, adds it to the network
//! and deletes the staged copy.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use holdfast_core::{PinError, PinResult};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bucket: &str, object_name: &str, data: Bytes) -> PinResult<()>;

    /// Fails with `Validation` if the object does not exist, since retrying
    /// cannot make it appear.
    async fn get(&self, bucket: &str, object_name: &str) -> PinResult<Bytes>;

    async fn delete(&self, bucket: &str, object_name: &str) -> PinResult<()>;
}

fn missing(bucket: &str, object_name: &str) -> PinError {
    PinError::validation(format!("staged object {}/{} not found", bucket, object_name))
}

#[cfg(feature = "storage-s3")]
pub use s3::S3BlobStore;

#[cfg(feature = "storage-s3")]
mod s3 {
    use super::*;
    use holdfast_core::config::BlobStoreConfig;
    use object_store::aws::{AmazonS3, AmazonS3Builder};
    use object_store::path::Path;
    use object_store::Error as ObjectStoreError;
    use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};

    /// S3 (or S3-compatible) blob store. One client per bucket, built on first use.
    pub struct S3BlobStore {
        region: String,
        endpoint_url: Option<String>,
        default_bucket: String,
        stores: Mutex<HashMap<String, AmazonS3>>,
    }

    impl S3BlobStore {
        pub fn new(config: &BlobStoreConfig) -> Self {
            Self {
                region: config.region.clone(),
                endpoint_url: config.endpoint.clone(),
                default_bucket: config.bucket.clone(),
                stores: Mutex::new(HashMap::new()),
            }
        }

        /// Bucket that new uploads are staged in.
        pub fn default_bucket(&self) -> &str {
            &self.default_bucket
        }

        fn store(&self, bucket: &str) -> PinResult<AmazonS3> {
            let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(store) = stores.get(bucket) {
                return Ok(store.clone());
            }

            let mut builder = AmazonS3Builder::from_env()
                .with_region(self.region.clone())
                .with_bucket_name(bucket.to_string());
            if let Some(ref endpoint) = self.endpoint_url {
                let allow_http = endpoint.starts_with("http://");
                builder = builder
                    .with_endpoint(endpoint.clone())
                    .with_allow_http(allow_http);
            }
            let store = builder
                .build()
                .map_err(|e| PinError::StorageBackend(format!("object store config: {}", e)))?;

            stores.insert(bucket.to_string(), store.clone());
            Ok(store)
        }
    }

    fn backend_error(bucket: &str, object_name: &str, err: ObjectStoreError) -> PinError {
        match err {
            ObjectStoreError::NotFound { .. } => missing(bucket, object_name),
            other => PinError::StorageBackend(format!("object store: {}", other)),
        }
    }

    #[async_trait]
    impl BlobStore for S3BlobStore {
        #[tracing::instrument(skip(self, data), fields(s3.bucket = %bucket, s3.key = %object_name, s3.size = data.len()))]
        async fn put(&self, bucket: &str, object_name: &str, data: Bytes) -> PinResult<()> {
            let location = Path::from(object_name.to_string());
            let result: ObjectResult<_> = self
                .store(bucket)?
                .put(&location, PutPayload::from(data))
                .await;
            result.map_err(|e| backend_error(bucket, object_name, e))?;
            tracing::debug!("Blob staged");
            Ok(())
        }

        #[tracing::instrument(skip(self), fields(s3.bucket = %bucket, s3.key = %object_name))]
        async fn get(&self, bucket: &str, object_name: &str) -> PinResult<Bytes> {
            let location = Path::from(object_name.to_string());
            let result: ObjectResult<_> = self.store(bucket)?.get(&location).await;
            let response = result.map_err(|e| backend_error(bucket, object_name, e))?;
            response
                .bytes()
                .await
                .map_err(|e| backend_error(bucket, object_name, e))
        }

        #[tracing::instrument(skip(self), fields(s3.bucket = %bucket, s3.key = %object_name))]
        async fn delete(&self, bucket: &str, object_name: &str) -> PinResult<()> {
            let location = Path::from(object_name.to_string());
            let result: ObjectResult<_> = self.store(bucket)?.delete(&location).await;
            result.map_err(|e| backend_error(bucket, object_name, e))
        }
    }
}

/// Blob store held in process memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, bucket: &str, object_name: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(bucket.to_string(), object_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, object_name: &str, data: Bytes) -> PinResult<()> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), object_name.to_string()), data);
        Ok(())
    }

    async fn get(&self, bucket: &str, object_name: &str) -> PinResult<Bytes> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), object_name.to_string()))
            .cloned()
            .ok_or_else(|| missing(bucket, object_name))
    }

    async fn delete(&self, bucket: &str, object_name: &str) -> PinResult<()> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(bucket.to_string(), object_name.to_string()));
        Ok(())
    }
}
