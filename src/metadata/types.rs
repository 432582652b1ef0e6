use oci_spec::image::MediaType;
use sea_query::Iden;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use crate::OciDigest;
use crate::PackageType;

#[derive(Iden)]
pub enum Registries {
    Table,
    Id,
    Uuid,
    Name,
    ParentId,
    RootParentId,
    AccountIdentifier,
    ParentRef,
    PackageType,
    CreatedAt,
    UpdatedAt,
    UpdatedBy,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden)]
pub enum Images {
    Table,
    Id,
    Uuid,
    Name,
    RegistryId,
    ArtifactType,
    Enabled,
    CreatedAt,
    UpdatedAt,
    UpdatedBy,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden)]
pub enum Artifacts {
    Table,
    Id,
    Uuid,
    Version,
    ImageId,
    Metadata,
    CreatedAt,
    UpdatedAt,
    UpdatedBy,
    DeletedAt,
    DeletedBy,
}

#[derive(Iden)]
pub enum Manifests {
    Table,
    Id,
    RegistryId,
    ImageId,
    Digest,
    MediaType,
    TotalSize,
    CreatedAt,
}

#[derive(Iden)]
pub enum ManifestReferences {
    Table,
    ParentId,
    ChildId,
}

#[derive(Iden)]
pub enum Tags {
    Table,
    Id,
    Name,
    RegistryId,
    ImageId,
    ManifestId,
    UpdatedAt,
}

#[derive(Iden)]
pub enum RegistryBlobs {
    Table,
    Id,
    RegistryId,
    BlobId,
    ImageId,
}

#[derive(Iden)]
pub enum UdpEvents {
    Table,
    Id,
    DataType,
    Payload,
    CreatedAt,
}

/// Soft-delete state of a row together with the state inherited from its ancestors.
///
/// Parent soft-deletes are never written down to children; a child is effectively deleted
/// when it or any ancestor carries a deletion timestamp, and the timestamp reported for it is
/// the earliest of those.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deletion {
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<i64>,
    pub effective_deleted_at: Option<i64>,
}

impl Deletion {
    pub fn cascade(deleted_at: Option<i64>, deleted_by: Option<i64>, ancestors: &[Option<i64>]) -> Self {
        let effective_deleted_at = std::iter::once(deleted_at)
            .chain(ancestors.iter().copied())
            .flatten()
            .min();
        Self {
            deleted_at,
            deleted_by,
            effective_deleted_at,
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.effective_deleted_at.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Registry {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub parent_id: i64,
    pub root_parent_id: i64,
    pub account_identifier: String,
    pub parent_ref: String,
    pub package_type: PackageType,
    pub created_at: i64,
    pub updated_at: i64,
    pub deletion: Deletion,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for Registry {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            name: row.try_get("name")?,
            parent_id: row.try_get("parent_id")?,
            root_parent_id: row.try_get("root_parent_id")?,
            account_identifier: row.try_get("account_identifier")?,
            parent_ref: row.try_get("parent_ref")?,
            package_type: PackageType::from(row.try_get::<String, _>("package_type")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deletion: Deletion::cascade(row.try_get("deleted_at")?, row.try_get("deleted_by")?, &[]),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub registry_id: i64,
    pub artifact_type: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deletion: Deletion,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for Image {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            name: row.try_get("name")?,
            registry_id: row.try_get("registry_id")?,
            artifact_type: row.try_get("artifact_type")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deletion: Deletion::cascade(
                row.try_get("deleted_at")?,
                row.try_get("deleted_by")?,
                &[row.try_get("registry_deleted_at")?],
            ),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Artifact {
    pub id: i64,
    pub uuid: Uuid,
    pub version: String,
    pub image_id: i64,
    pub image_name: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deletion: Deletion,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for Artifact {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            version: row.try_get("version")?,
            image_id: row.try_get("image_id")?,
            image_name: row.try_get("image_name")?,
            metadata: row
                .try_get::<Option<Json<serde_json::Value>>, _>("metadata")?
                .map(|Json(v)| v),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deletion: Deletion::cascade(
                row.try_get("deleted_at")?,
                row.try_get("deleted_by")?,
                &[
                    row.try_get("image_deleted_at")?,
                    row.try_get("registry_deleted_at")?,
                ],
            ),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    pub id: i64,
    pub registry_id: i64,
    pub image_id: i64,
    pub digest: OciDigest,
    pub media_type: Option<MediaType>,
    pub total_size: i64,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for Manifest {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            registry_id: row.try_get("registry_id")?,
            image_id: row.try_get("image_id")?,
            digest: match row.try_get::<String, _>("digest")?.as_str().try_into() {
                Ok(v) => v,
                Err(e) => {
                    return Err(sqlx::Error::ColumnDecode {
                        index: "digest".to_string(),
                        source: Box::new(e),
                    })
                }
            },
            media_type: row
                .try_get::<Option<String>, _>("media_type")?
                .map(|v| v.as_str().into()),
            total_size: row.try_get("total_size")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub registry_id: i64,
    pub image_id: i64,
    pub manifest_id: i64,
}

impl sqlx::FromRow<'_, sqlx_postgres::PgRow> for Tag {
    fn from_row(row: &sqlx_postgres::PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            registry_id: row.try_get("registry_id")?,
            image_id: row.try_get("image_id")?,
            manifest_id: row.try_get("manifest_id")?,
        })
    }
}
