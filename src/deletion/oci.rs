use crate::events::ArtifactDeletedPayload;
use crate::metadata::{MetadataStore, MetadataTx};
use crate::types::{Principal, RegistryInfo};
use crate::{Error, OciDigest, Result};

use super::DeletionService;

impl<M: MetadataStore> DeletionService<M> {
    /// Delete an OCI image with its tags, manifests and artifacts. Blobs shared with other
    /// images are unlinked, never deleted.
    pub async fn delete_oci_image(&self, registry: &RegistryInfo, image: &str) -> Result<()> {
        let registry_id = registry.registry_id;
        let mut tx = self.metadata.begin().await?;

        let tags = tx.delete_tags_by_image(registry_id, image).await?;
        let manifests = tx.delete_manifests_by_image(registry_id, image).await?;
        let blobs = tx.unlink_blobs_by_image(registry_id, image).await?;
        let artifacts = tx.delete_artifacts_by_image(registry_id, image).await?;
        if tx.delete_image(registry_id, image).await? == 0 {
            return Err(Error::NotFound(format!("image {image}")));
        }
        tx.commit().await?;

        tracing::info!(
            registry_id,
            image,
            tags,
            manifests,
            blobs,
            artifacts,
            "deleted oci image"
        );
        Ok(())
    }

    pub async fn delete_oci_artifact_version(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
        principal: Option<&Principal>,
        registry_name_for_webhook: &str,
    ) -> Result<()> {
        let digest = if self.untagged_images_enabled {
            Some(self.delete_oci_manifest(registry, image, version).await?)
        } else {
            self.delete_oci_tag(registry, image, version).await?
        };

        match (principal, digest) {
            (Some(principal), Some(digest)) => {
                self.events.artifact_deleted(ArtifactDeletedPayload::Oci {
                    principal_id: principal.id,
                    registry_id: registry.registry_id,
                    registry_name: registry_name_for_webhook.to_string(),
                    root_identifier: registry.root_identifier.clone(),
                    package_type: registry.package_type.clone(),
                    image: image.to_string(),
                    version: version.to_string(),
                    digest,
                    untagged: self.untagged_images_enabled,
                })
            }
            (Some(_), None) => {
                tracing::debug!(
                    registry_id = registry.registry_id,
                    image,
                    version,
                    "no digest resolved, skipping artifact deleted event"
                );
            }
            (None, _) => {}
        }
        Ok(())
    }

    /// Untagged mode: `version` is a manifest digest.
    async fn delete_oci_manifest(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
    ) -> Result<OciDigest> {
        let registry_id = registry.registry_id;
        let digest = OciDigest::try_from(version)?;
        let mut tx = self.metadata.begin().await?;

        let manifest = tx
            .find_manifest(registry_id, image, &digest)
            .await?
            .ok_or_else(|| Error::NotFound(format!("manifest {digest}")))?;

        let parents = tx.referenced_by(manifest.id).await?;
        if !parents.is_empty() {
            let parents: Vec<String> = parents.iter().map(|m| m.digest.to_string()).collect();
            tracing::warn!(
                registry_id,
                image,
                digest = %digest,
                ?parents,
                "refusing to delete manifest referenced by a manifest list"
            );
            return Err(Error::Conflict(format!(
                "manifest {digest} is referenced by {}",
                parents.join(", ")
            )));
        }

        let tags = tx.delete_tags_by_manifest(manifest.id).await?;
        tx.delete_manifest(manifest.id).await?;
        tx.delete_artifact(registry_id, image, version).await?;

        let image_deleted = if tx.count_manifests_by_image(registry_id, image).await? == 0 {
            tx.delete_image(registry_id, image).await? > 0
        } else {
            false
        };
        tx.commit().await?;

        tracing::info!(
            registry_id,
            image,
            digest = %digest,
            tags,
            image_deleted,
            "deleted oci manifest"
        );
        Ok(digest)
    }

    /// Tagged mode: `version` is a tag name. Returns the digest the tag pointed at, if it
    /// could be resolved.
    async fn delete_oci_tag(
        &self,
        registry: &RegistryInfo,
        image: &str,
        tag: &str,
    ) -> Result<Option<OciDigest>> {
        let registry_id = registry.registry_id;
        let mut tx = self.metadata.begin().await?;

        let digest = match tx.find_tag(registry_id, image, tag).await? {
            Some(t) => tx.get_manifest(t.manifest_id).await?.map(|m| m.digest),
            None => None,
        };

        if tx.delete_tag(registry_id, image, tag).await? == 0 {
            return Err(Error::NotFound(format!("tag {tag} of {image}")));
        }
        tx.commit().await?;

        tracing::info!(registry_id, image, tag, ?digest, "deleted oci tag");
        Ok(digest)
    }
}
