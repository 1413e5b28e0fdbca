//! Amazon S3 object storage

use super::{ObjectLocation, ObjectStore};
use crate::error::PipelineError;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use eyre::Result;
use url::Url;

/// S3 backend built on the AWS SDK.
///
/// Credentials and region come from the standard AWS provider chain
/// (environment, profile, instance metadata), optionally overriding the region.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the environment
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

/// `x-amz-copy-source` value for an object: `bucket/key` with each key
/// segment percent-encoded and `/` separators kept
pub(crate) fn copy_source_for(location: &ObjectLocation) -> Result<String> {
    let mut url = Url::parse("s3://copy-source/").map_err(|e| PipelineError::storage(location, e))?;
    url.path_segments_mut()
        .map_err(|_| PipelineError::storage(location, "cannot encode copy source"))?
        .pop_if_empty()
        .push(&location.bucket)
        .extend(location.key.split('/'));
    Ok(url.path().trim_start_matches('/').to_string())
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, location: &ObjectLocation, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| PipelineError::storage(location, aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| PipelineError::storage(location, aws_sdk_s3::error::DisplayErrorContext(e)))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::storage(location, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn exists(&self, location: &ObjectLocation) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => {
                Err(PipelineError::storage(location, aws_sdk_s3::error::DisplayErrorContext(e)).into())
            }
        }
    }

    async fn copy(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(copy_source_for(from)?)
            .bucket(&to.bucket)
            .key(&to.key)
            .send()
            .await
            .map_err(|e| PipelineError::storage(to, aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn delete(&self, location: &ObjectLocation) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| PipelineError::storage(location, aws_sdk_s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| PipelineError::storage(bucket, aws_sdk_s3::error::DisplayErrorContext(e)))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        keys.sort();
        Ok(keys)
    }

    fn describe(&self) -> String {
        "s3".to_string()
    }
}
