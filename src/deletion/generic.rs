use crate::metadata::{MetadataStore, MetadataTx};
use crate::package_type::storage_path;
use crate::types::RegistryInfo;
use crate::{Error, Result};

use super::DeletionService;

impl<M: MetadataStore> DeletionService<M> {
    /// Delete a file-backed package: its rows, then its files. A file manager failure drops
    /// the transaction, leaving every row in place.
    pub async fn delete_generic_image(&self, registry: &RegistryInfo, image: &str) -> Result<()> {
        let registry_id = registry.registry_id;
        let path = storage_path(&registry.package_type, image, "")?;
        let mut tx = self.metadata.begin().await?;

        let artifacts = tx.delete_artifacts_by_image(registry_id, image).await?;
        if tx.delete_image(registry_id, image).await? == 0 {
            return Err(Error::NotFound(format!("image {image}")));
        }

        if let Err(e) = self.files.delete_file(registry_id, &path).await {
            tracing::warn!(
                registry_id,
                image,
                path = path.as_str(),
                error = %e,
                "failed to delete package files"
            );
            return Err(e);
        }
        tx.commit().await?;

        tracing::info!(registry_id, image, artifacts, "deleted package");
        Ok(())
    }

    /// Delete one version of a file-backed package. The image row goes too once no version
    /// references it.
    pub async fn delete_generic_artifact(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
    ) -> Result<()> {
        let registry_id = registry.registry_id;
        let path = storage_path(&registry.package_type, image, version)?;
        let mut tx = self.metadata.begin().await?;

        if tx.delete_artifact(registry_id, image, version).await? == 0 {
            return Err(Error::NotFound(format!("version {version} of {image}")));
        }

        if let Err(e) = self.files.delete_file(registry_id, &path).await {
            tracing::warn!(
                registry_id,
                image,
                version,
                path = path.as_str(),
                error = %e,
                "failed to delete version files"
            );
            return Err(e);
        }

        let image_deleted = tx.delete_image_if_no_artifacts(registry_id, image).await? > 0;
        tx.commit().await?;

        tracing::info!(registry_id, image, version, image_deleted, "deleted package version");
        Ok(())
    }
}
