//! Hard deletion of images and artifact versions, dispatched on the registry's package type.

use std::sync::Arc;

use async_trait::async_trait;

mod generic;
mod oci;
mod soft;
pub use soft::SoftDeletionService;

use crate::audit::{Action, AuditEvent, AuditService, Resource, ResourceType};
use crate::events::EventReporter;
use crate::metadata::{Image, MetadataStore, SoftDeleteFilter};
use crate::objects::FileManager;
use crate::package_type::{Capabilities, ImageDeletion, VersionDeletion};
use crate::reindexing::ReindexingService;
use crate::types::{Principal, RegistryInfo};
use crate::{Error, Result};

/// Extension point for package types the core has no deletion mechanics for.
#[async_trait]
pub trait PackageWrapper: Send + Sync {
    async fn delete_artifact(&self, registry: &RegistryInfo, image: &str) -> Result<()>;

    async fn delete_artifact_version(
        &self,
        registry: &RegistryInfo,
        image: &Image,
        artifact: &str,
        version: &str,
    ) -> Result<()>;
}

/// Used when no package types are plugged in; rejects everything.
pub struct NoPackageWrapper;

#[async_trait]
impl PackageWrapper for NoPackageWrapper {
    async fn delete_artifact(&self, registry: &RegistryInfo, _image: &str) -> Result<()> {
        Err(Error::Unsupported(format!(
            "unsupported package type {}",
            registry.package_type
        )))
    }

    async fn delete_artifact_version(
        &self,
        registry: &RegistryInfo,
        _image: &Image,
        _artifact: &str,
        _version: &str,
    ) -> Result<()> {
        Err(Error::Unsupported(format!(
            "unsupported package type {}",
            registry.package_type
        )))
    }
}

pub struct DeletionService<M: MetadataStore> {
    metadata: M,
    files: Arc<dyn FileManager>,
    wrapper: Arc<dyn PackageWrapper>,
    events: Arc<dyn EventReporter>,
    reindexing: ReindexingService,
    capabilities: Arc<Capabilities>,
    untagged_images_enabled: bool,
    audit: Option<AuditService>,
}

impl<M: MetadataStore> DeletionService<M> {
    pub fn new(
        metadata: M,
        files: Arc<dyn FileManager>,
        wrapper: Arc<dyn PackageWrapper>,
        events: Arc<dyn EventReporter>,
        capabilities: Arc<Capabilities>,
        untagged_images_enabled: bool,
    ) -> Self {
        Self {
            metadata,
            files,
            wrapper,
            reindexing: ReindexingService::new(events.clone(), capabilities.clone()),
            events,
            capabilities,
            untagged_images_enabled,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditService) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Remove a package and everything stored for it.
    ///
    /// `principal` is `None` for background cleanup, which is not audited.
    pub async fn delete_image_by_package_type(
        &self,
        registry: &RegistryInfo,
        image: &str,
        principal: Option<&Principal>,
    ) -> Result<()> {
        match self
            .capabilities
            .get(&registry.package_type)
            .image_deletion
        {
            ImageDeletion::Oci => self.delete_oci_image(registry, image).await?,
            ImageDeletion::Files => self.delete_generic_image(registry, image).await?,
            ImageDeletion::Unsupported(reason) => {
                return Err(Error::Unsupported(reason.to_string()))
            }
            ImageDeletion::Wrapper => self.wrapper.delete_artifact(registry, image).await?,
        }

        if let Some(principal) = principal {
            self.audit(
                principal,
                registry,
                Resource::new(ResourceType::Artifact, image)
                    .with_data("registryName", &registry.registry_name),
            )
            .await;
        }
        Ok(())
    }

    /// Remove one version of a package, then run the package type's reindexing.
    ///
    /// For OCI registries `version` is a digest when untagged images are enabled and a tag
    /// name otherwise. The artifact-deleted webhook for OCI versions is only sent for user
    /// initiated deletes, ie when `principal` is given.
    pub async fn delete_artifact_version_by_package_type(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
        principal: Option<&Principal>,
        registry_name_for_webhook: &str,
    ) -> Result<()> {
        match self
            .capabilities
            .get(&registry.package_type)
            .version_deletion
        {
            VersionDeletion::Oci => {
                self.delete_oci_artifact_version(
                    registry,
                    image,
                    version,
                    principal,
                    registry_name_for_webhook,
                )
                .await?
            }
            VersionDeletion::Files => {
                self.delete_generic_artifact(registry, image, version)
                    .await?
            }
            VersionDeletion::Wrapper => {
                let img = self
                    .metadata
                    .get_image(
                        registry.registry_id,
                        image,
                        SoftDeleteFilter::ExcludeDeleted,
                    )
                    .await?;
                self.wrapper
                    .delete_artifact_version(registry, &img, image, version)
                    .await?
            }
        }

        self.reindexing.trigger_artifact_version_reindexing(
            &registry.package_type,
            registry.registry_id,
            image,
            version,
            principal.map(|p| p.id).unwrap_or_default(),
        );

        if let Some(principal) = principal {
            self.audit(
                principal,
                registry,
                Resource::new(ResourceType::Version, image)
                    .with_data("registryName", &registry.registry_name)
                    .with_data("version", version),
            )
            .await;
        }
        Ok(())
    }

    async fn audit(&self, principal: &Principal, registry: &RegistryInfo, resource: Resource) {
        if let Some(audit) = &self.audit {
            audit
                .log(
                    principal,
                    &resource,
                    Action::Deleted,
                    &registry.parent_ref,
                    AuditEvent::default()
                        .with_data("packageType", &registry.package_type.to_string()),
                )
                .await;
        }
    }
}
