use chrono::Utc;

use crate::audit::{Action, AuditEvent, AuditService, Resource, ResourceType};
use crate::metadata::{MetadataStore, SoftDeleteScope};
use crate::reindexing::ReindexingService;
use crate::types::{Principal, RegistryInfo};
use crate::{Error, Result};

/// Caller facing soft-delete and restore.
///
/// Only the addressed row changes. A mutation that touches no row (missing target, or already
/// in the requested state) is reported as [`Error::NotFoundOrUnchanged`].
pub struct SoftDeletionService<M: MetadataStore> {
    metadata: M,
    reindexing: ReindexingService,
    audit: Option<AuditService>,
}

impl<M: MetadataStore> SoftDeletionService<M> {
    pub fn new(metadata: M, reindexing: ReindexingService) -> Self {
        Self {
            metadata,
            reindexing,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditService) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn soft_delete_registry(
        &self,
        registry: &RegistryInfo,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Registry {
            registry_id: registry.registry_id,
        };
        self.apply(registry, scope, Action::Deleted, principal).await
    }

    pub async fn soft_delete_image(
        &self,
        registry: &RegistryInfo,
        image: &str,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Image {
            registry_id: registry.registry_id,
            image: image.to_string(),
        };
        self.apply(registry, scope, Action::Deleted, principal).await
    }

    pub async fn soft_delete_artifact_version(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Artifact {
            registry_id: registry.registry_id,
            image: image.to_string(),
            version: version.to_string(),
        };
        self.apply(registry, scope, Action::Deleted, principal).await
    }

    pub async fn restore_registry(
        &self,
        registry: &RegistryInfo,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Registry {
            registry_id: registry.registry_id,
        };
        self.apply(registry, scope, Action::Restored, principal).await
    }

    pub async fn restore_image(
        &self,
        registry: &RegistryInfo,
        image: &str,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Image {
            registry_id: registry.registry_id,
            image: image.to_string(),
        };
        self.apply(registry, scope, Action::Restored, principal).await
    }

    pub async fn restore_artifact_version(
        &self,
        registry: &RegistryInfo,
        image: &str,
        version: &str,
        principal: &Principal,
    ) -> Result<()> {
        let scope = SoftDeleteScope::Artifact {
            registry_id: registry.registry_id,
            image: image.to_string(),
            version: version.to_string(),
        };
        self.apply(registry, scope, Action::Restored, principal).await
    }

    async fn apply(
        &self,
        registry: &RegistryInfo,
        scope: SoftDeleteScope,
        action: Action,
        principal: &Principal,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let rows = match action {
            Action::Deleted => self.metadata.soft_delete(&scope, principal.id, now).await?,
            Action::Restored => self.metadata.restore(&scope, principal.id, now).await?,
        };
        if rows == 0 {
            return Err(Error::NotFoundOrUnchanged(format!(
                "{scope} not found or already {}",
                match action {
                    Action::Deleted => "deleted",
                    Action::Restored => "active",
                }
            )));
        }
        tracing::info!(%scope, ?action, principal = principal.id, "soft delete state changed");

        let resource = match &scope {
            SoftDeleteScope::Registry { .. } => {
                Resource::new(ResourceType::Registry, &registry.registry_name)
            }
            SoftDeleteScope::Image { image, .. } => Resource::new(ResourceType::Artifact, image)
                .with_data("registryName", &registry.registry_name),
            SoftDeleteScope::Artifact { image, version, .. } => {
                self.reindexing.trigger_artifact_version_reindexing(
                    &registry.package_type,
                    registry.registry_id,
                    image,
                    version,
                    principal.id,
                );
                Resource::new(ResourceType::Version, image)
                    .with_data("registryName", &registry.registry_name)
                    .with_data("version", version)
            }
        };

        if let Some(audit) = &self.audit {
            audit
                .log(
                    principal,
                    &resource,
                    action,
                    &registry.parent_ref,
                    AuditEvent::default()
                        .with_data("packageType", &registry.package_type.to_string())
                        .with_data("timestamp", &now.to_string()),
                )
                .await;
        }
        Ok(())
    }
}
