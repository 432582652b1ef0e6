use std::sync::Arc;

use crate::events::{ArtifactDeletedPayload, EventReporter};
use crate::package_type::{Capabilities, Reindex};
use crate::PackageType;

/// Decides which index rebuilds and webhooks follow a change in the versions of a package.
///
/// Every deletion and restore path funnels through
/// [`ReindexingService::trigger_artifact_version_reindexing`] so the side effects are the same no
/// matter who triggered the change. Nothing here touches the database and nothing is reported
/// back to the caller.
#[derive(Clone)]
pub struct ReindexingService {
    events: Arc<dyn EventReporter>,
    capabilities: Arc<Capabilities>,
}

impl ReindexingService {
    pub fn new(events: Arc<dyn EventReporter>, capabilities: Arc<Capabilities>) -> Self {
        Self {
            events,
            capabilities,
        }
    }

    pub fn trigger_artifact_version_reindexing(
        &self,
        package_type: &PackageType,
        registry_id: i64,
        image: &str,
        version: &str,
        principal_id: i64,
    ) {
        match self.capabilities.get(package_type).reindex {
            Reindex::None => {}
            Reindex::RegistryIndex => {
                tracing::debug!(registry_id, %package_type, "requesting registry index rebuild");
                self.events.build_registry_index(registry_id, Vec::new());
            }
            Reindex::PackageIndexAndWebhook => {
                tracing::debug!(
                    registry_id,
                    image,
                    version,
                    %package_type,
                    "requesting package index rebuild"
                );
                self.events
                    .artifact_deleted(ArtifactDeletedPayload::Common {
                        principal_id,
                        registry_id,
                        package_type: package_type.clone(),
                        image: image.to_string(),
                        version: version.to_string(),
                    });
                self.events.build_package_index(registry_id, image);
            }
            Reindex::Unknown => {
                tracing::warn!(
                    registry_id,
                    image,
                    version,
                    %package_type,
                    "unknown package type for reindexing"
                );
            }
        }
    }
}
