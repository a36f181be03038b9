//! S3 client construction.

use object_store::aws::AmazonS3Builder;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::sync::Arc;

use crate::config::{AuthMode, AwsSettings};
use crate::error::{ConfigError, MissingPropertySnafu, S3ClientSnafu};

/// Build an S3 client for one bucket from the connector's AWS settings.
///
/// `credentials` mode requires a static key pair; `default` mode leaves
/// resolution to the ambient provider chain (environment, instance
/// profile). A custom endpoint switches to path-style addressing unless
/// vhost-bucket is requested, and permits plain HTTP for local stores.
pub(super) fn build_store(
    aws: &AwsSettings,
    bucket: &str,
) -> Result<Arc<dyn ObjectStore>, ConfigError> {
    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_retry(RetryConfig::default());

    if let Some(region) = &aws.region {
        builder = builder.with_region(region);
    }

    if aws.auth_mode == AuthMode::Credentials {
        let access_key = aws.access_key.as_deref().context(MissingPropertySnafu {
            key: crate::config::AWS_ACCESS_KEY,
        })?;
        let secret_key = aws.secret_key.as_deref().context(MissingPropertySnafu {
            key: crate::config::AWS_SECRET_KEY,
        })?;
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    if let Some(endpoint) = &aws.custom_endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(aws.vhost_bucket)
            .with_allow_http(true);
    }

    let store = builder.build().context(S3ClientSnafu)?;
    Ok(Arc::new(store))
}
