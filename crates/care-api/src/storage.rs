//! # Object Store
//!
//! Attachment bytes live outside the datastore; rows carry only the object
//! key. An S3-compatible bucket is used when `S3_ENDPOINT` is set, otherwise
//! an in-process map (development and tests).

use std::collections::HashMap;
use std::sync::Arc;

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("S3 GetObject error: {0}")]
    GetObject(String),

    #[error("S3 PutObject error: {0}")]
    PutObject(String),

    #[error("object store config error: {0}")]
    Config(String),
}

/// Bytes plus the content type recorded at upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub enum ObjectStore {
    S3 { client: Client, bucket: String },
    Memory(Arc<RwLock<HashMap<String, StoredObject>>>),
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::S3 { bucket, .. } => f.debug_struct("S3").field("bucket", bucket).finish(),
            Self::Memory(objects) => f
                .debug_struct("Memory")
                .field("objects", &objects.read().len())
                .finish(),
        }
    }
}

impl ObjectStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Build the store described by `config`.
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let Some(endpoint) = &config.endpoint else {
            tracing::warn!("S3_ENDPOINT not set; attachments are kept in memory");
            return Ok(Self::in_memory());
        };
        let endpoint = normalize_endpoint(endpoint, config.use_tls);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&endpoint);
        match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access,
                    secret,
                    None,
                    None,
                    "care-api-config",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::Config(
                    "S3_ACCESS_KEY and S3_SECRET_KEY must be set together".into(),
                ))
            }
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        tracing::info!(endpoint = %endpoint, bucket = %config.bucket, "object store backed by S3");
        Ok(Self::S3 {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::Memory(_) => "memory",
        }
    }

    pub async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        match self {
            Self::S3 { client, bucket } => {
                let mut req = client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body));
                if let Some(ct) = content_type {
                    req = req.content_type(ct);
                }
                req.send()
                    .await
                    .map_err(|e| StorageError::PutObject(e.into_service_error().to_string()))?;
                Ok(())
            }
            Self::Memory(objects) => {
                objects.write().insert(
                    key.to_string(),
                    StoredObject {
                        body,
                        content_type: content_type.map(str::to_string),
                    },
                );
                Ok(())
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<StoredObject, StorageError> {
        match self {
            Self::S3 { client, bucket } => {
                let resp = client
                    .get_object()
                    .bucket(bucket)
                    .key(key)
                    .send()
                    .await
                    .map_err(|e| {
                        let err = e.into_service_error();
                        if err.is_no_such_key() {
                            StorageError::NotFound {
                                key: key.to_string(),
                            }
                        } else {
                            StorageError::GetObject(err.to_string())
                        }
                    })?;
                let content_type = resp.content_type().map(str::to_string);
                let body = resp
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::GetObject(e.to_string()))?
                    .into_bytes()
                    .to_vec();
                Ok(StoredObject { body, content_type })
            }
            Self::Memory(objects) => {
                objects
                    .read()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| StorageError::NotFound {
                        key: key.to_string(),
                    })
            }
        }
    }
}

/// Prefix a bare `host:port` endpoint with the scheme implied by `use_tls`.
fn normalize_endpoint(endpoint: &str, use_tls: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_tls {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_bytes_and_content_type() {
        let store = ObjectStore::in_memory();
        store
            .put("attachments/a", b"hello".to_vec(), Some("text/plain"))
            .await
            .unwrap();
        let object = store.get("attachments/a").await.unwrap();
        assert_eq!(object.body, b"hello");
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let store = ObjectStore::in_memory();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { key } if key == "nope"));
    }

    #[test]
    fn bare_endpoints_get_a_scheme() {
        assert_eq!(normalize_endpoint("minio:9000", false), "http://minio:9000");
        assert_eq!(normalize_endpoint("s3.example.com", true), "https://s3.example.com");
        assert_eq!(normalize_endpoint("http://x:1", true), "http://x:1");
    }

    #[tokio::test]
    async fn connect_without_endpoint_uses_memory() {
        let mut config = crate::config::AppConfig::development().storage_config();
        config.endpoint = None;
        let store = ObjectStore::connect(&config).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }
}
