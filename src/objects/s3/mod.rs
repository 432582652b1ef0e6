use serde::Deserialize;

use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use http::Uri;

pub(crate) mod logging;
use crate::{
    errors::Result,
    objects::s3::logging::LoggingInterceptor,
    objects::{object_prefix, FileManager},
};

#[derive(Clone, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
}

impl S3Config {
    pub async fn new_files(&self) -> Result<S3FileManager> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "registry-reaper",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme("https")
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .interceptor(LoggingInterceptor)
            .build();

        Ok(S3FileManager {
            bucket_name: self.bucket_name.clone(),
            client: Client::from_conf(config),
        })
    }
}

/// [`FileManager`] over an S3 bucket. Files of a registry live under
/// `registries/<registry id>/files/`.
#[derive(Clone)]
pub struct S3FileManager {
    bucket_name: String,
    client: Client,
}

impl S3FileManager {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await?;

            keys.extend(
                output
                    .contents()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|o| o.key().map(String::from)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl FileManager for S3FileManager {
    async fn delete_file(&self, registry_id: i64, path: &str) -> Result<()> {
        let prefix = object_prefix(registry_id, path)?;

        // the path itself may be a single object or a directory-like prefix
        let mut keys = self.list_keys(&format!("{prefix}/")).await?;
        keys.push(prefix.clone());

        for key in keys.iter() {
            let _delete_object_output = self
                .client
                .delete_object()
                .key(key)
                .bucket(&self.bucket_name)
                .send()
                .await?;
        }
        tracing::debug!(
            registry_id,
            prefix = prefix.as_str(),
            deleted = keys.len(),
            "deleted files"
        );
        Ok(())
    }
}
