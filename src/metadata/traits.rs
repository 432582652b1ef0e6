use async_trait::async_trait;

use super::soft_delete::SoftDeleteFilter;
use super::types::{Artifact, Image, Manifest, Registry, Tag};
use crate::{OciDigest, Result};

/// Target of a soft-delete or restore. Only the addressed row is written; descendants inherit
/// the state through [`SoftDeleteFilter`] reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftDeleteScope {
    Registry {
        registry_id: i64,
    },
    Image {
        registry_id: i64,
        image: String,
    },
    Artifact {
        registry_id: i64,
        image: String,
        version: String,
    },
}

impl SoftDeleteScope {
    pub fn registry_id(&self) -> i64 {
        match self {
            SoftDeleteScope::Registry { registry_id }
            | SoftDeleteScope::Image { registry_id, .. }
            | SoftDeleteScope::Artifact { registry_id, .. } => *registry_id,
        }
    }
}

impl std::fmt::Display for SoftDeleteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftDeleteScope::Registry { registry_id } => write!(f, "registry {registry_id}"),
            SoftDeleteScope::Image { registry_id, image } => {
                write!(f, "image {image} in registry {registry_id}")
            }
            SoftDeleteScope::Artifact {
                registry_id,
                image,
                version,
            } => write!(f, "version {version} of {image} in registry {registry_id}"),
        }
    }
}

/// Pool level access to registry metadata.
///
/// Reads take a [`SoftDeleteFilter`] that is applied across the ownership chain of the row
/// being read. Soft-delete and restore are single guarded statements reporting the number of
/// rows they changed; the purge methods physically remove rows soft-deleted at or before the
/// cutoff within one account and report how many rows went away.
#[async_trait]
pub trait MetadataStore: Clone + Send + Sync + 'static {
    /// The transaction type handed out by [`MetadataStore::begin`].
    type Tx: MetadataTx;

    /// Start a transaction. Dropping it without [`MetadataTx::commit`] rolls back.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn get_registry(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Registry>;

    async fn list_registries(
        &self,
        account_identifier: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Registry>>;

    async fn get_image(
        &self,
        registry_id: i64,
        name: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Image>;

    async fn list_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Vec<Image>>;

    async fn count_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<i64>;

    async fn get_artifact(
        &self,
        registry_id: i64,
        image: &str,
        version: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Artifact>;

    async fn list_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Artifact>>;

    async fn count_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<i64>;

    /// Set `deleted_at`/`deleted_by` on the addressed row if it is not already soft-deleted.
    async fn soft_delete(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64>;

    /// Clear `deleted_at`/`deleted_by` on the addressed row if it is soft-deleted.
    async fn restore(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64>;

    async fn purge_artifacts(&self, account_identifier: &str, deleted_before_or_at: i64)
        -> Result<u64>;

    async fn purge_images(&self, account_identifier: &str, deleted_before_or_at: i64)
        -> Result<u64>;

    async fn purge_registries(
        &self,
        account_identifier: &str,
        deleted_before_or_at: i64,
    ) -> Result<u64>;
}

/// Cascade primitives used by the deletion service inside one transaction.
#[async_trait]
pub trait MetadataTx: Send {
    async fn commit(&mut self) -> Result<()>;

    async fn find_manifest(
        &mut self,
        registry_id: i64,
        image: &str,
        digest: &OciDigest,
    ) -> Result<Option<Manifest>>;

    async fn get_manifest(&mut self, manifest_id: i64) -> Result<Option<Manifest>>;

    /// Manifests (image indexes, manifest lists) that list the given manifest as a child.
    async fn referenced_by(&mut self, manifest_id: i64) -> Result<Vec<Manifest>>;

    async fn delete_manifest(&mut self, manifest_id: i64) -> Result<u64>;

    async fn delete_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64>;

    async fn count_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<i64>;

    async fn find_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<Option<Tag>>;

    async fn delete_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<u64>;

    async fn delete_tags_by_manifest(&mut self, manifest_id: i64) -> Result<u64>;

    async fn delete_tags_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64>;

    /// Drop the image's links to shared blobs. Blob rows themselves are left alone.
    async fn unlink_blobs_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64>;

    async fn delete_artifact(&mut self, registry_id: i64, image: &str, version: &str)
        -> Result<u64>;

    async fn delete_artifacts_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64>;

    async fn delete_image(&mut self, registry_id: i64, image: &str) -> Result<u64>;

    /// Delete the image only if no artifact row references it, as one statement.
    async fn delete_image_if_no_artifacts(&mut self, registry_id: i64, image: &str)
        -> Result<u64>;
}

/// Sink for flattened audit rows consumed by downstream systems.
#[async_trait]
pub trait UdpEventStore: Send + Sync {
    async fn insert_udp_event(&self, data_type: &str, payload: &serde_json::Value) -> Result<()>;
}
