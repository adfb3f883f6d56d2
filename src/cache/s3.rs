//! S3-compatible object store.
//!
//! One blob per cache key. The render instant travels in the
//! `updated_at` user-metadata field as a decimal Unix second and is
//! omitted entirely when unknown. Path-style addressing with a custom
//! endpoint so MinIO-style deployments work unchanged.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use time::OffsetDateTime;

use crate::config::S3Settings;

use super::keys::CacheKey;
use super::store::{
    CachedObject, ObjectStore, StoreError, UPDATED_AT_META_KEY, encode_updated_at,
    parse_updated_at,
};

pub struct S3Store {
    bucket: String,
    client: Client,
}

impl S3Store {
    pub fn new(bucket: impl Into<String>, client: Client) -> Self {
        Self {
            bucket: bucket.into(),
            client,
        }
    }

    /// Build the store from validated settings.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "inazuma-settings",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(settings.endpoint.clone())
            .force_path_style(true)
            .build();
        Self::new(settings.bucket.clone(), Client::from_conf(config))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get(&self, key: &CacheKey) -> Result<CachedObject, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    StoreError::NotFound
                } else {
                    StoreError::Transport(service.to_string())
                }
            })?;

        let updated_at = stored_updated_at(output.metadata());
        let content_type = output.content_type().unwrap_or_default().to_string();
        let content_encoding = output.content_encoding().unwrap_or_default().to_string();

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?
            .into_bytes();

        Ok(CachedObject {
            body,
            content_type,
            content_encoding,
            updated_at,
        })
    }

    async fn updated_at(&self, key: &CacheKey) -> Result<Option<OffsetDateTime>, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_not_found() {
                    StoreError::NotFound
                } else {
                    StoreError::Transport(service.to_string())
                }
            })?;

        Ok(stored_updated_at(output.metadata()))
    }

    async fn put(&self, key: &CacheKey, object: &CachedObject) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .body(ByteStream::from(object.body.clone()))
            .content_type(&object.content_type)
            .content_encoding(&object.content_encoding);

        if let Some(updated_at) = object.updated_at {
            request = request.metadata(UPDATED_AT_META_KEY, encode_updated_at(updated_at));
        }

        request
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(())
    }
}

fn stored_updated_at(
    metadata: Option<&std::collections::HashMap<String, String>>,
) -> Option<OffsetDateTime> {
    metadata
        .and_then(|meta| meta.get(UPDATED_AT_META_KEY))
        .and_then(|value| parse_updated_at(value))
}
