#![allow(dead_code)]


use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oci_spec::image::MediaType;
use uuid::Uuid;

use registry_reaper::audit::{
    Action, AuditEvent, AuditLogger, AuditService, Resource, ResourceType,
};
use registry_reaper::deletion::{DeletionService, PackageWrapper, SoftDeletionService};
use registry_reaper::events::{EventReporter, RegistryEvent};
use registry_reaper::metadata::{
    Artifact, Deletion, Image, Manifest, MetadataStore, MetadataTx, Registry, SoftDeleteFilter,
    SoftDeleteScope, Tag, UdpEventStore,
};
use registry_reaper::objects::FileManager;
use registry_reaper::package_type::Capabilities;
use registry_reaper::reindexing::ReindexingService;
use registry_reaper::{Error, OciDigest, PackageType, Principal, RegistryInfo, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct RegistryRow {
    pub id: i64,
    pub name: String,
    pub account: String,
    pub parent_ref: String,
    pub package_type: PackageType,
    pub updated_at: i64,
    pub updated_by: Option<i64>,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageRow {
    pub id: i64,
    pub registry_id: i64,
    pub name: String,
    pub updated_at: i64,
    pub updated_by: Option<i64>,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactRow {
    pub id: i64,
    pub image_id: i64,
    pub version: String,
    pub updated_at: i64,
    pub updated_by: Option<i64>,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlobLink {
    pub id: i64,
    pub registry_id: i64,
    pub blob_id: i64,
    pub image_id: i64,
}

/// Table contents of the in-memory store. Deletes follow the cascades of the Postgres schema;
/// removing a manifest still listed as a child by a surviving manifest is rejected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct State {
    next_id: i64,
    pub registries: Vec<RegistryRow>,
    pub images: Vec<ImageRow>,
    pub artifacts: Vec<ArtifactRow>,
    pub manifests: Vec<Manifest>,
    pub references: Vec<(i64, i64)>,
    pub tags: Vec<Tag>,
    pub blobs: Vec<i64>,
    pub registry_blobs: Vec<BlobLink>,
}

impl State {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn registry(&self, registry_id: i64) -> Option<&RegistryRow> {
        self.registries.iter().find(|r| r.id == registry_id)
    }

    fn image_ids(&self, registry_id: i64, image: &str) -> Vec<i64> {
        self.images
            .iter()
            .filter(|i| i.registry_id == registry_id && i.name == image)
            .map(|i| i.id)
            .collect()
    }

    fn to_registry(&self, r: &RegistryRow) -> Registry {
        Registry {
            id: r.id,
            uuid: Uuid::nil(),
            name: r.name.clone(),
            parent_id: 0,
            root_parent_id: 0,
            account_identifier: r.account.clone(),
            parent_ref: r.parent_ref.clone(),
            package_type: r.package_type.clone(),
            created_at: 0,
            updated_at: r.updated_at,
            deletion: Deletion::cascade(r.deleted_at, r.deleted_by, &[]),
        }
    }

    fn to_image(&self, i: &ImageRow) -> Image {
        let registry_deleted_at = self.registry(i.registry_id).and_then(|r| r.deleted_at);
        Image {
            id: i.id,
            uuid: Uuid::nil(),
            name: i.name.clone(),
            registry_id: i.registry_id,
            artifact_type: None,
            enabled: true,
            created_at: 0,
            updated_at: i.updated_at,
            deletion: Deletion::cascade(i.deleted_at, i.deleted_by, &[registry_deleted_at]),
        }
    }

    fn to_artifact(&self, a: &ArtifactRow) -> Option<Artifact> {
        let image = self.images.iter().find(|i| i.id == a.image_id)?;
        let registry_deleted_at = self.registry(image.registry_id).and_then(|r| r.deleted_at);
        Some(Artifact {
            id: a.id,
            uuid: Uuid::nil(),
            version: a.version.clone(),
            image_id: a.image_id,
            image_name: image.name.clone(),
            metadata: None,
            created_at: 0,
            updated_at: a.updated_at,
            deletion: Deletion::cascade(
                a.deleted_at,
                a.deleted_by,
                &[image.deleted_at, registry_deleted_at],
            ),
        })
    }

    fn artifacts_of(&self, registry_id: i64, image: &str) -> Vec<&ArtifactRow> {
        let ids = self.image_ids(registry_id, image);
        self.artifacts
            .iter()
            .filter(|a| ids.contains(&a.image_id))
            .collect()
    }

    fn remove_manifests(&mut self, ids: &HashSet<i64>) -> Result<u64> {
        if self
            .references
            .iter()
            .any(|(parent, child)| ids.contains(child) && !ids.contains(parent))
        {
            return Err(Error::Conflict(String::from(
                "cannot delete manifest, as it is still referenced",
            )));
        }
        let before = self.manifests.len();
        self.manifests.retain(|m| !ids.contains(&m.id));
        self.tags.retain(|t| !ids.contains(&t.manifest_id));
        self.references
            .retain(|(parent, child)| !ids.contains(parent) && !ids.contains(child));
        Ok((before - self.manifests.len()) as u64)
    }

    fn remove_images(&mut self, ids: &HashSet<i64>) -> Result<u64> {
        let manifests: HashSet<i64> = self
            .manifests
            .iter()
            .filter(|m| ids.contains(&m.image_id))
            .map(|m| m.id)
            .collect();
        self.remove_manifests(&manifests)?;
        self.artifacts.retain(|a| !ids.contains(&a.image_id));
        self.tags.retain(|t| !ids.contains(&t.image_id));
        self.registry_blobs.retain(|l| !ids.contains(&l.image_id));
        let before = self.images.len();
        self.images.retain(|i| !ids.contains(&i.id));
        Ok((before - self.images.len()) as u64)
    }

    fn remove_registries(&mut self, ids: &HashSet<i64>) -> Result<u64> {
        let images: HashSet<i64> = self
            .images
            .iter()
            .filter(|i| ids.contains(&i.registry_id))
            .map(|i| i.id)
            .collect();
        self.remove_images(&images)?;
        self.registry_blobs.retain(|l| !ids.contains(&l.registry_id));
        let before = self.registries.len();
        self.registries.retain(|r| !ids.contains(&r.id));
        Ok((before - self.registries.len()) as u64)
    }

    fn account_of_image(&self, image_id: i64) -> Option<&str> {
        let image = self.images.iter().find(|i| i.id == image_id)?;
        self.registry(image.registry_id).map(|r| r.account.as_str())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_image_purge: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn snapshot(&self) -> State {
        self.state.lock().unwrap().clone()
    }

    pub fn fail_image_purge(&self, fail: bool) {
        self.fail_image_purge.store(fail, Ordering::SeqCst);
    }

    /// Run `f` against a copy of the tables and keep the result only if it succeeds.
    fn atomically<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock().unwrap();
        let mut work = guard.clone();
        let out = f(&mut work)?;
        *guard = work;
        Ok(out)
    }

    pub fn add_registry(
        &self,
        name: &str,
        account: &str,
        package_type: PackageType,
    ) -> RegistryInfo {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        let row = RegistryRow {
            id,
            name: name.to_string(),
            account: account.to_string(),
            parent_ref: format!("{account}/org/project"),
            package_type,
            updated_at: 0,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };
        let info = RegistryInfo::from(&s.to_registry(&row));
        s.registries.push(row);
        info
    }

    pub fn add_image(&self, registry_id: i64, name: &str) -> i64 {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.images.push(ImageRow {
            id,
            registry_id,
            name: name.to_string(),
            updated_at: 0,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        });
        id
    }

    pub fn add_artifact(&self, image_id: i64, version: &str) -> i64 {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.artifacts.push(ArtifactRow {
            id,
            image_id,
            version: version.to_string(),
            updated_at: 0,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        });
        id
    }

    pub fn add_manifest(
        &self,
        registry_id: i64,
        image_id: i64,
        digest: &str,
        media_type: Option<MediaType>,
    ) -> i64 {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.manifests.push(Manifest {
            id,
            registry_id,
            image_id,
            digest: OciDigest::try_from(digest).unwrap(),
            media_type,
            total_size: 0,
        });
        id
    }

    pub fn add_reference(&self, parent_id: i64, child_id: i64) {
        self.state
            .lock()
            .unwrap()
            .references
            .push((parent_id, child_id));
    }

    pub fn add_tag(&self, registry_id: i64, image_id: i64, manifest_id: i64, name: &str) -> i64 {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.tags.push(Tag {
            id,
            name: name.to_string(),
            registry_id,
            image_id,
            manifest_id,
        });
        id
    }

    pub fn add_blob(&self) -> i64 {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.blobs.push(id);
        id
    }

    pub fn link_blob(&self, registry_id: i64, blob_id: i64, image_id: i64) {
        let mut s = self.state.lock().unwrap();
        let id = s.id();
        s.registry_blobs.push(BlobLink {
            id,
            registry_id,
            blob_id,
            image_id,
        });
    }

    pub fn has_image(&self, registry_id: i64, name: &str) -> bool {
        !self.snapshot().image_ids(registry_id, name).is_empty()
    }

    pub fn manifest_digests(&self) -> Vec<String> {
        self.snapshot()
            .manifests
            .iter()
            .map(|m| m.digest.to_string())
            .collect()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.snapshot().tags.iter().map(|t| t.name.clone()).collect()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(MemoryTx {
            work: Some(self.snapshot()),
            state: self.state.clone(),
        })
    }

    async fn get_registry(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Registry> {
        let s = self.state.lock().unwrap();
        s.registry(registry_id)
            .map(|r| s.to_registry(r))
            .filter(|r| filter.matches(&r.deletion))
            .ok_or_else(|| Error::NotFound(format!("registry {registry_id}")))
    }

    async fn list_registries(
        &self,
        account_identifier: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Registry>> {
        let s = self.state.lock().unwrap();
        Ok(s.registries
            .iter()
            .filter(|r| r.account == account_identifier)
            .map(|r| s.to_registry(r))
            .filter(|r| filter.matches(&r.deletion))
            .collect())
    }

    async fn get_image(
        &self,
        registry_id: i64,
        name: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Image> {
        let s = self.state.lock().unwrap();
        s.images
            .iter()
            .filter(|i| i.registry_id == registry_id && i.name == name)
            .map(|i| s.to_image(i))
            .find(|i| filter.matches(&i.deletion))
            .ok_or_else(|| Error::NotFound(format!("image {name}")))
    }

    async fn list_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Vec<Image>> {
        let s = self.state.lock().unwrap();
        Ok(s.images
            .iter()
            .filter(|i| i.registry_id == registry_id)
            .map(|i| s.to_image(i))
            .filter(|i| filter.matches(&i.deletion))
            .collect())
    }

    async fn count_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<i64> {
        Ok(self.list_images(registry_id, filter).await?.len() as i64)
    }

    async fn get_artifact(
        &self,
        registry_id: i64,
        image: &str,
        version: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Artifact> {
        let s = self.state.lock().unwrap();
        s.artifacts_of(registry_id, image)
            .into_iter()
            .filter(|a| a.version == version)
            .filter_map(|a| s.to_artifact(a))
            .find(|a| filter.matches(&a.deletion))
            .ok_or_else(|| Error::NotFound(format!("version {version} of {image}")))
    }

    async fn list_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Artifact>> {
        let s = self.state.lock().unwrap();
        Ok(s.artifacts_of(registry_id, image)
            .into_iter()
            .filter_map(|a| s.to_artifact(a))
            .filter(|a| filter.matches(&a.deletion))
            .collect())
    }

    async fn count_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<i64> {
        Ok(self.list_artifacts(registry_id, image, filter).await?.len() as i64)
    }

    async fn soft_delete(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        let mut s = self.state.lock().unwrap();
        let mut n = 0;
        match scope {
            SoftDeleteScope::Registry { registry_id } => {
                for r in s.registries.iter_mut() {
                    if r.id == *registry_id && r.deleted_at.is_none() {
                        r.deleted_at = Some(now);
                        r.deleted_by = Some(actor);
                        n += 1;
                    }
                }
            }
            SoftDeleteScope::Image { registry_id, image } => {
                for i in s.images.iter_mut() {
                    if i.registry_id == *registry_id && &i.name == image && i.deleted_at.is_none()
                    {
                        i.deleted_at = Some(now);
                        i.deleted_by = Some(actor);
                        n += 1;
                    }
                }
            }
            SoftDeleteScope::Artifact {
                registry_id,
                image,
                version,
            } => {
                let ids = s.image_ids(*registry_id, image);
                for a in s.artifacts.iter_mut() {
                    if ids.contains(&a.image_id) && &a.version == version && a.deleted_at.is_none()
                    {
                        a.deleted_at = Some(now);
                        a.deleted_by = Some(actor);
                        n += 1;
                    }
                }
            }
        }
        Ok(n)
    }

    async fn restore(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        let mut s = self.state.lock().unwrap();
        let mut n = 0;
        match scope {
            SoftDeleteScope::Registry { registry_id } => {
                for r in s.registries.iter_mut() {
                    if r.id == *registry_id && r.deleted_at.is_some() {
                        r.deleted_at = None;
                        r.deleted_by = None;
                        r.updated_at = now;
                        r.updated_by = Some(actor);
                        n += 1;
                    }
                }
            }
            SoftDeleteScope::Image { registry_id, image } => {
                for i in s.images.iter_mut() {
                    if i.registry_id == *registry_id && &i.name == image && i.deleted_at.is_some()
                    {
                        i.deleted_at = None;
                        i.deleted_by = None;
                        i.updated_at = now;
                        i.updated_by = Some(actor);
                        n += 1;
                    }
                }
            }
            SoftDeleteScope::Artifact {
                registry_id,
                image,
                version,
            } => {
                let ids = s.image_ids(*registry_id, image);
                for a in s.artifacts.iter_mut() {
                    if ids.contains(&a.image_id) && &a.version == version && a.deleted_at.is_some()
                    {
                        a.deleted_at = None;
                        a.deleted_by = None;
                        a.updated_at = now;
                        a.updated_by = Some(actor);
                        n += 1;
                    }
                }
            }
        }
        Ok(n)
    }

    async fn purge_artifacts(&self, account_identifier: &str, cutoff: i64) -> Result<u64> {
        self.atomically(|s| {
            let expired: HashSet<i64> = s
                .artifacts
                .iter()
                .filter(|a| a.deleted_at.map_or(false, |at| at <= cutoff))
                .filter(|a| s.account_of_image(a.image_id) == Some(account_identifier))
                .map(|a| a.id)
                .collect();
            s.artifacts.retain(|a| !expired.contains(&a.id));
            Ok(expired.len() as u64)
        })
    }

    async fn purge_images(&self, account_identifier: &str, cutoff: i64) -> Result<u64> {
        if self.fail_image_purge.load(Ordering::SeqCst) {
            return Err(Error::StorageFailure(String::from("images table unavailable")));
        }
        self.atomically(|s| {
            let expired: HashSet<i64> = s
                .images
                .iter()
                .filter(|i| i.deleted_at.map_or(false, |at| at <= cutoff))
                .filter(|i| s.account_of_image(i.id) == Some(account_identifier))
                .map(|i| i.id)
                .collect();
            s.remove_images(&expired)
        })
    }

    async fn purge_registries(&self, account_identifier: &str, cutoff: i64) -> Result<u64> {
        self.atomically(|s| {
            let expired: HashSet<i64> = s
                .registries
                .iter()
                .filter(|r| r.account == account_identifier)
                .filter(|r| r.deleted_at.map_or(false, |at| at <= cutoff))
                .map(|r| r.id)
                .collect();
            s.remove_registries(&expired)
        })
    }
}

/// Works on a private copy of the tables; `commit` publishes it, dropping discards it.
pub struct MemoryTx {
    work: Option<State>,
    state: Arc<Mutex<State>>,
}

impl MemoryTx {
    fn work(&mut self) -> Result<&mut State> {
        self.work.as_mut().ok_or(Error::PostgresMetadataTxInactive)
    }

    /// Apply `f` to the working copy, leaving it untouched when `f` fails, the way a failed
    /// statement leaves its transaction.
    fn statement<T>(&mut self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let work = self.work()?;
        let mut attempt = work.clone();
        let out = f(&mut attempt)?;
        *work = attempt;
        Ok(out)
    }
}

#[async_trait]
impl MetadataTx for MemoryTx {
    async fn commit(&mut self) -> Result<()> {
        if let Some(work) = self.work.take() {
            *self.state.lock().unwrap() = work;
        }
        Ok(())
    }

    async fn find_manifest(
        &mut self,
        registry_id: i64,
        image: &str,
        digest: &OciDigest,
    ) -> Result<Option<Manifest>> {
        let s = self.work()?;
        let ids = s.image_ids(registry_id, image);
        Ok(s.manifests
            .iter()
            .find(|m| {
                m.registry_id == registry_id && ids.contains(&m.image_id) && &m.digest == digest
            })
            .cloned())
    }

    async fn get_manifest(&mut self, manifest_id: i64) -> Result<Option<Manifest>> {
        let s = self.work()?;
        Ok(s.manifests.iter().find(|m| m.id == manifest_id).cloned())
    }

    async fn referenced_by(&mut self, manifest_id: i64) -> Result<Vec<Manifest>> {
        let s = self.work()?;
        let parents: Vec<i64> = s
            .references
            .iter()
            .filter(|(_, child)| *child == manifest_id)
            .map(|(parent, _)| *parent)
            .collect();
        Ok(s.manifests
            .iter()
            .filter(|m| parents.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn delete_manifest(&mut self, manifest_id: i64) -> Result<u64> {
        self.statement(|s| s.remove_manifests(&HashSet::from([manifest_id])))
    }

    async fn delete_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let manifests: HashSet<i64> = s
                .manifests
                .iter()
                .filter(|m| m.registry_id == registry_id && ids.contains(&m.image_id))
                .map(|m| m.id)
                .collect();
            s.remove_manifests(&manifests)
        })
    }

    async fn count_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<i64> {
        let s = self.work()?;
        let ids = s.image_ids(registry_id, image);
        Ok(s.manifests
            .iter()
            .filter(|m| m.registry_id == registry_id && ids.contains(&m.image_id))
            .count() as i64)
    }

    async fn find_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<Option<Tag>> {
        let s = self.work()?;
        let ids = s.image_ids(registry_id, image);
        Ok(s.tags
            .iter()
            .find(|t| t.registry_id == registry_id && ids.contains(&t.image_id) && t.name == tag)
            .cloned())
    }

    async fn delete_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let before = s.tags.len();
            s.tags.retain(|t| {
                !(t.registry_id == registry_id && ids.contains(&t.image_id) && t.name == tag)
            });
            Ok((before - s.tags.len()) as u64)
        })
    }

    async fn delete_tags_by_manifest(&mut self, manifest_id: i64) -> Result<u64> {
        self.statement(|s| {
            let before = s.tags.len();
            s.tags.retain(|t| t.manifest_id != manifest_id);
            Ok((before - s.tags.len()) as u64)
        })
    }

    async fn delete_tags_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let before = s.tags.len();
            s.tags
                .retain(|t| !(t.registry_id == registry_id && ids.contains(&t.image_id)));
            Ok((before - s.tags.len()) as u64)
        })
    }

    async fn unlink_blobs_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let before = s.registry_blobs.len();
            s.registry_blobs
                .retain(|l| !(l.registry_id == registry_id && ids.contains(&l.image_id)));
            Ok((before - s.registry_blobs.len()) as u64)
        })
    }

    async fn delete_artifact(
        &mut self,
        registry_id: i64,
        image: &str,
        version: &str,
    ) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let before = s.artifacts.len();
            s.artifacts
                .retain(|a| !(ids.contains(&a.image_id) && a.version == version));
            Ok((before - s.artifacts.len()) as u64)
        })
    }

    async fn delete_artifacts_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        self.statement(|s| {
            let ids = s.image_ids(registry_id, image);
            let before = s.artifacts.len();
            s.artifacts.retain(|a| !ids.contains(&a.image_id));
            Ok((before - s.artifacts.len()) as u64)
        })
    }

    async fn delete_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        self.statement(|s| {
            let ids: HashSet<i64> = s.image_ids(registry_id, image).into_iter().collect();
            s.remove_images(&ids)
        })
    }

    async fn delete_image_if_no_artifacts(
        &mut self,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        self.statement(|s| {
            let ids: HashSet<i64> = s
                .image_ids(registry_id, image)
                .into_iter()
                .filter(|id| !s.artifacts.iter().any(|a| a.image_id == *id))
                .collect();
            s.remove_images(&ids)
        })
    }
}

#[derive(Default)]
pub struct RecordingFiles {
    pub deleted: Mutex<Vec<(i64, String)>>,
    fail: AtomicBool,
}

impl RecordingFiles {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<(i64, String)> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileManager for RecordingFiles {
    async fn delete_file(&self, registry_id: i64, path: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::StorageFailure(format!("cannot delete {path}")));
        }
        self.deleted
            .lock()
            .unwrap()
            .push((registry_id, path.to_string()));
        Ok(())
    }
}

/// A file manager whose deletes never finish, for cancelling a cascade midway.
#[derive(Default)]
pub struct StalledFiles {
    reached: AtomicBool,
}

impl StalledFiles {
    pub fn reached(&self) -> bool {
        self.reached.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileManager for StalledFiles {
    async fn delete_file(&self, _registry_id: i64, _path: &str) -> Result<()> {
        self.reached.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<RegistryEvent>>,
}

impl RecordingEvents {
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventReporter for RecordingEvents {
    fn report(&self, event: RegistryEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Default)]
pub struct RecordingWrapper {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl PackageWrapper for RecordingWrapper {
    async fn delete_artifact(&self, registry: &RegistryInfo, image: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("artifact {}/{image}", registry.registry_name));
        Ok(())
    }

    async fn delete_artifact_version(
        &self,
        registry: &RegistryInfo,
        image: &Image,
        artifact: &str,
        version: &str,
    ) -> Result<()> {
        assert_eq!(image.name, artifact);
        self.calls
            .lock()
            .unwrap()
            .push(format!("version {}/{artifact}@{version}", registry.registry_name));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<(ResourceType, String, Action, String)>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<(ResourceType, String, Action, String)> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLogger for RecordingAudit {
    async fn log(
        &self,
        _principal: &Principal,
        resource: &Resource,
        action: Action,
        scope_path: &str,
        _event: &AuditEvent,
    ) -> Result<()> {
        self.entries.lock().unwrap().push((
            resource.resource_type,
            resource.identifier.clone(),
            action,
            scope_path.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUdp {
    pub rows: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl UdpEventStore for RecordingUdp {
    async fn insert_udp_event(&self, data_type: &str, payload: &serde_json::Value) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .push((data_type.to_string(), payload.clone()));
        Ok(())
    }
}

/// The in-memory store wired to recording collaborators.
#[derive(Default)]
pub struct Harness {
    pub store: MemoryStore,
    pub files: Arc<RecordingFiles>,
    pub events: Arc<RecordingEvents>,
    pub wrapper: Arc<RecordingWrapper>,
    pub audit: Arc<RecordingAudit>,
    pub udp: Arc<RecordingUdp>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_service(&self) -> AuditService {
        let udp: Arc<dyn UdpEventStore> = self.udp.clone();
        AuditService::new(self.audit.clone(), Some(udp))
    }

    pub fn deletion(&self, untagged_images_enabled: bool) -> DeletionService<MemoryStore> {
        self.deletion_with_files(untagged_images_enabled, self.files.clone())
    }

    pub fn deletion_with_files(
        &self,
        untagged_images_enabled: bool,
        files: Arc<dyn FileManager>,
    ) -> DeletionService<MemoryStore> {
        DeletionService::new(
            self.store.clone(),
            files,
            self.wrapper.clone(),
            self.events.clone(),
            Arc::new(Capabilities::new()),
            untagged_images_enabled,
        )
        .with_audit(self.audit_service())
    }

    pub fn soft_deletion(&self) -> SoftDeletionService<MemoryStore> {
        SoftDeletionService::new(
            self.store.clone(),
            ReindexingService::new(self.events.clone(), Arc::new(Capabilities::new())),
        )
        .with_audit(self.audit_service())
    }
}

pub fn principal() -> Principal {
    Principal::user(42, "jdoe", "jdoe@example.com", "J Doe")
}

pub fn index_media_type() -> Option<MediaType> {
    Some(MediaType::ImageIndex)
}

pub fn manifest_media_type() -> Option<MediaType> {
    Some(MediaType::ImageManifest)
}
