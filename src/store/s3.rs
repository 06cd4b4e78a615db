//! S3-compatible object store on the AWS SDK.
//!
//! PutObject needs the exact content length up front, so `put` waits for
//! the spool copy to finish, rewinds the stream and then sends the spool
//! file as the request body. Memory use stays flat regardless of object
//! size; the payload only ever lives on disk.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_smithy_types::body::SdkBody;
use aws_smithy_types::error::display::DisplayErrorContext;
use futures::TryStreamExt;
use hyper::body::Frame;
use tokio::io::{AsyncSeekExt, AsyncWrite};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::{ObjectStore, StoreError};
use crate::config::S3Config;
use crate::spool::SpooledStream;

/// S3-compatible object store.
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    acl: Option<ObjectCannedAcl>,
}

impl S3Store {
    /// Create a store from configuration.
    ///
    /// Static credentials from the config take precedence; without them the
    /// ambient AWS chain (environment, profiles, instance metadata) is used.
    pub async fn new(config: &S3Config) -> Result<Self, StoreError> {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .force_path_style(true);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "spoolgate-config",
                ));
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                if let Some(provider) = shared.credentials_provider() {
                    builder = builder.credentials_provider(provider);
                }
            }
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            acl: config.acl.as_deref().map(ObjectCannedAcl::from),
        })
    }

    /// The configured bucket.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, mut source: SpooledStream) -> Result<u64, StoreError> {
        let total = source
            .handle()
            .finished()
            .await
            .map_err(|err| StoreError::UploadFailed(err.to_string()))?;
        source.rewind().await?;

        let body = http_body_util::StreamBody::new(ReaderStream::new(source).map_ok(Frame::data));
        let stream = ByteStream::new(SdkBody::from_body_1_x(body));

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(stream)
            .content_length(total as i64);
        if let Some(acl) = &self.acl {
            request = request.acl(acl.clone());
        }
        let output = request
            .send()
            .await
            .map_err(|err| StoreError::UploadFailed(DisplayErrorContext(err).to_string()))?;

        debug!(key = %key, bytes = total, etag = ?output.e_tag(), "put object");
        Ok(total)
    }

    async fn get(
        &self,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::DownloadFailed(DisplayErrorContext(service).to_string())
                }
            })?;

        let mut body = output.body.into_async_read();
        let bytes = tokio::io::copy(&mut body, sink).await?;
        Ok(bytes)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| StoreError::DeleteFailed(DisplayErrorContext(err).to_string()))?;
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", self.region))
    }

    fn download_url_prefix(&self) -> String {
        format!("{}/{}", self.endpoint().trim_end_matches('/'), self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: Option<&str>) -> S3Config {
        S3Config {
            bucket: "uploads".into(),
            region: "us-west-2".into(),
            endpoint: endpoint.map(String::from),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
            acl: None,
        }
    }

    #[tokio::test]
    async fn default_endpoint_is_regional() {
        let store = S3Store::new(&test_config(None)).await.unwrap();
        assert_eq!(store.endpoint(), "https://s3.us-west-2.amazonaws.com");
        assert_eq!(
            store.download_url_prefix(),
            "https://s3.us-west-2.amazonaws.com/uploads"
        );
    }

    #[tokio::test]
    async fn custom_endpoint_is_kept() {
        let store = S3Store::new(&test_config(Some("http://localhost:9000/")))
            .await
            .unwrap();
        assert_eq!(store.endpoint(), "http://localhost:9000/");
        assert_eq!(
            store.download_url_prefix(),
            "http://localhost:9000/uploads"
        );
    }
}
