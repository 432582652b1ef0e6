use async_trait::async_trait;
use sea_query::{Alias, Expr, Func, IntoIden, PostgresQueryBuilder, Query, SelectStatement, UpdateStatement, Value};
use sea_query_binder::SqlxBinder;
use serde::Deserialize;
use sqlx::{
    pool::PoolConnection,
    postgres::{PgPoolOptions, Postgres},
    PgConnection, Pool, Row, Transaction,
};

use super::soft_delete::{artifact_chain, image_chain, registry_chain, SoftDeleteFilter};
use super::traits::{MetadataStore, MetadataTx, SoftDeleteScope, UdpEventStore};
use super::types::{
    Artifact, Artifacts, Image, Images, Manifest, ManifestReferences, Manifests, Registries,
    Registry, RegistryBlobs, Tag, Tags, UdpEvents,
};
use crate::errors::{Error, Result};
use crate::OciDigest;

#[derive(Clone, Deserialize)]
pub struct PostgresConfig {
    connection_string: String,
    #[serde(default)]
    max_connections: Option<u32>,
}

impl PostgresConfig {
    pub fn new(connection_string: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            max_connections: None,
        }
    }

    pub async fn new_metadata(&self) -> Result<PostgresMetadataPool> {
        let mut options = PgPoolOptions::new();
        if let Some(n) = self.max_connections {
            options = options.max_connections(n);
        }
        let pool = options.connect(&self.connection_string).await?;
        Ok(PostgresMetadataPool { pool })
    }
}

#[derive(Clone)]
pub struct PostgresMetadataPool {
    pool: Pool<Postgres>,
}

impl PostgresMetadataPool {
    pub async fn get_conn(&self) -> Result<PostgresMetadataConn> {
        Ok(PostgresMetadataConn {
            conn: self.pool.acquire().await?,
        })
    }

    pub async fn get_tx(&self) -> Result<PostgresMetadataTx> {
        Ok(PostgresMetadataTx {
            tx: Some(self.pool.begin().await?),
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

pub struct PostgresMetadataConn {
    conn: PoolConnection<Postgres>,
}

fn not_found<T>(found: Option<T>, what: impl FnOnce() -> String) -> Result<T> {
    match found {
        Some(v) => Ok(v),
        None => Err(Error::NotFound(what())),
    }
}

// Foreign key violations on deletes mean some other row still points at the target.
fn referenced(e: sqlx::Error, what: &str) -> Error {
    match e {
        sqlx::Error::Database(dberr) => match dberr.kind() {
            sqlx::error::ErrorKind::ForeignKeyViolation => {
                tracing::warn!("foreign key violation error: {dberr}");
                Error::Conflict(format!("cannot delete {what}, as it is still referenced"))
            }
            _ => sqlx::Error::Database(dberr).into(),
        },
        e => e.into(),
    }
}

fn image_ids(registry_id: i64, image: &str) -> SelectStatement {
    Query::select()
        .column((Images::Table, Images::Id))
        .from(Images::Table)
        .and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
        .and_where(Expr::col((Images::Table, Images::Name)).eq(image))
        .to_owned()
}

fn set_deleted<T: IntoIden>(
    q: &mut UpdateStatement,
    deleted_at: T,
    deleted_by: T,
    actor: i64,
    now: i64,
) {
    q.values([
        (deleted_at, Value::from(now).into()),
        (deleted_by, Value::from(actor).into()),
    ]);
}

fn set_restored<T: IntoIden>(
    q: &mut UpdateStatement,
    deleted_at: T,
    deleted_by: T,
    updated_at: T,
    updated_by: T,
    actor: i64,
    now: i64,
) {
    q.values([
        (deleted_at, Value::BigInt(None).into()),
        (deleted_by, Value::BigInt(None).into()),
        (updated_at, Value::from(now).into()),
        (updated_by, Value::from(actor).into()),
    ]);
}

// A collection of queries that are only require a `&mut PgConnection` and don't care whether it
// came from a transaction or a pool connection.
struct Queries {}

impl Queries {
    fn select_registries() -> SelectStatement {
        Query::select()
            .columns([
                (Registries::Table, Registries::Id),
                (Registries::Table, Registries::Uuid),
                (Registries::Table, Registries::Name),
                (Registries::Table, Registries::ParentId),
                (Registries::Table, Registries::RootParentId),
                (Registries::Table, Registries::AccountIdentifier),
                (Registries::Table, Registries::ParentRef),
                (Registries::Table, Registries::PackageType),
                (Registries::Table, Registries::CreatedAt),
                (Registries::Table, Registries::UpdatedAt),
                (Registries::Table, Registries::DeletedAt),
                (Registries::Table, Registries::DeletedBy),
            ])
            .from(Registries::Table)
            .to_owned()
    }

    fn select_images() -> SelectStatement {
        Query::select()
            .columns([
                (Images::Table, Images::Id),
                (Images::Table, Images::Uuid),
                (Images::Table, Images::Name),
                (Images::Table, Images::RegistryId),
                (Images::Table, Images::ArtifactType),
                (Images::Table, Images::Enabled),
                (Images::Table, Images::CreatedAt),
                (Images::Table, Images::UpdatedAt),
                (Images::Table, Images::DeletedAt),
                (Images::Table, Images::DeletedBy),
            ])
            .expr_as(
                Expr::col((Registries::Table, Registries::DeletedAt)),
                Alias::new("registry_deleted_at"),
            )
            .from(Images::Table)
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .to_owned()
    }

    fn select_artifacts() -> SelectStatement {
        Query::select()
            .columns([
                (Artifacts::Table, Artifacts::Id),
                (Artifacts::Table, Artifacts::Uuid),
                (Artifacts::Table, Artifacts::Version),
                (Artifacts::Table, Artifacts::ImageId),
                (Artifacts::Table, Artifacts::Metadata),
                (Artifacts::Table, Artifacts::CreatedAt),
                (Artifacts::Table, Artifacts::UpdatedAt),
                (Artifacts::Table, Artifacts::DeletedAt),
                (Artifacts::Table, Artifacts::DeletedBy),
            ])
            .expr_as(
                Expr::col((Images::Table, Images::Name)),
                Alias::new("image_name"),
            )
            .expr_as(
                Expr::col((Images::Table, Images::DeletedAt)),
                Alias::new("image_deleted_at"),
            )
            .expr_as(
                Expr::col((Registries::Table, Registries::DeletedAt)),
                Alias::new("registry_deleted_at"),
            )
            .from(Artifacts::Table)
            .inner_join(
                Images::Table,
                Expr::col((Images::Table, Images::Id))
                    .equals((Artifacts::Table, Artifacts::ImageId)),
            )
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .to_owned()
    }

    fn select_manifests() -> SelectStatement {
        Query::select()
            .columns([
                (Manifests::Table, Manifests::Id),
                (Manifests::Table, Manifests::RegistryId),
                (Manifests::Table, Manifests::ImageId),
                (Manifests::Table, Manifests::Digest),
                (Manifests::Table, Manifests::MediaType),
                (Manifests::Table, Manifests::TotalSize),
            ])
            .from(Manifests::Table)
            .to_owned()
    }

    pub(crate) fn get_registry_query(registry_id: i64, filter: SoftDeleteFilter) -> SelectStatement {
        let mut q = Self::select_registries();
        q.and_where(Expr::col((Registries::Table, Registries::Id)).eq(registry_id));
        if let Some(c) = filter.condition(&registry_chain()) {
            q.cond_where(c);
        }
        q
    }

    pub async fn get_registry(
        executor: &mut PgConnection,
        registry_id: i64,
        filter: SoftDeleteFilter,
    ) -> Result<Registry> {
        let (sql, values) =
            Self::get_registry_query(registry_id, filter).build_sqlx(PostgresQueryBuilder);
        let found = sqlx::query_as_with::<_, Registry, _>(&sql, values)
            .fetch_optional(executor)
            .await?;
        not_found(found, || format!("registry {registry_id}"))
    }

    pub async fn list_registries(
        executor: &mut PgConnection,
        account_identifier: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Registry>> {
        let mut q = Self::select_registries();
        q.and_where(
            Expr::col((Registries::Table, Registries::AccountIdentifier)).eq(account_identifier),
        )
        .order_by((Registries::Table, Registries::Name), sea_query::Order::Asc);
        if let Some(c) = filter.condition(&registry_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_as_with::<_, Registry, _>(&sql, values)
            .fetch_all(executor)
            .await?)
    }

    pub(crate) fn get_image_query(
        registry_id: i64,
        name: &str,
        filter: SoftDeleteFilter,
    ) -> SelectStatement {
        let mut q = Self::select_images();
        q.and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(name))
            .and_where(Expr::col((Images::Table, Images::ArtifactType)).is_null());
        if let Some(c) = filter.condition(&image_chain()) {
            q.cond_where(c);
        }
        q
    }

    pub async fn get_image(
        executor: &mut PgConnection,
        registry_id: i64,
        name: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Image> {
        let (sql, values) =
            Self::get_image_query(registry_id, name, filter).build_sqlx(PostgresQueryBuilder);
        let found = sqlx::query_as_with::<_, Image, _>(&sql, values)
            .fetch_optional(executor)
            .await?;
        not_found(found, || format!("image {name}"))
    }

    pub async fn list_images(
        executor: &mut PgConnection,
        registry_id: i64,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Image>> {
        let mut q = Self::select_images();
        q.and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .order_by((Images::Table, Images::Name), sea_query::Order::Asc);
        if let Some(c) = filter.condition(&image_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_as_with::<_, Image, _>(&sql, values)
            .fetch_all(executor)
            .await?)
    }

    pub async fn count_images(
        executor: &mut PgConnection,
        registry_id: i64,
        filter: SoftDeleteFilter,
    ) -> Result<i64> {
        let mut q = Query::select();
        q.expr(Func::count(Expr::col((Images::Table, Images::Id))))
            .from(Images::Table)
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id));
        if let Some(c) = filter.condition(&image_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn get_artifact(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        version: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Artifact> {
        let mut q = Self::select_artifacts();
        q.and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(image))
            .and_where(Expr::col((Artifacts::Table, Artifacts::Version)).eq(version));
        if let Some(c) = filter.condition(&artifact_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        let found = sqlx::query_as_with::<_, Artifact, _>(&sql, values)
            .fetch_optional(executor)
            .await?;
        not_found(found, || format!("version {version} of {image}"))
    }

    pub async fn list_artifacts(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Artifact>> {
        let mut q = Self::select_artifacts();
        q.and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(image))
            .order_by((Artifacts::Table, Artifacts::CreatedAt), sea_query::Order::Desc);
        if let Some(c) = filter.condition(&artifact_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_as_with::<_, Artifact, _>(&sql, values)
            .fetch_all(executor)
            .await?)
    }

    pub async fn count_artifacts(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<i64> {
        let mut q = Query::select();
        q.expr(Func::count(Expr::col((Artifacts::Table, Artifacts::Id))))
            .from(Artifacts::Table)
            .inner_join(
                Images::Table,
                Expr::col((Images::Table, Images::Id))
                    .equals((Artifacts::Table, Artifacts::ImageId)),
            )
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(image));
        if let Some(c) = filter.condition(&artifact_chain()) {
            q.cond_where(c);
        }
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;
        Ok(row.try_get(0)?)
    }

    // Point update identifying exactly the row addressed by `scope`.
    fn scoped_update(scope: &SoftDeleteScope) -> UpdateStatement {
        match scope {
            SoftDeleteScope::Registry { registry_id } => Query::update()
                .table(Registries::Table)
                .and_where(Expr::col(Registries::Id).eq(*registry_id))
                .to_owned(),
            SoftDeleteScope::Image { registry_id, image } => Query::update()
                .table(Images::Table)
                .and_where(Expr::col(Images::RegistryId).eq(*registry_id))
                .and_where(Expr::col(Images::Name).eq(image.as_str()))
                .to_owned(),
            SoftDeleteScope::Artifact {
                registry_id,
                image,
                version,
            } => Query::update()
                .table(Artifacts::Table)
                .and_where(Expr::col(Artifacts::Version).eq(version.as_str()))
                .and_where(Expr::col(Artifacts::ImageId).in_subquery(image_ids(*registry_id, image)))
                .to_owned(),
        }
    }

    pub(crate) fn soft_delete_query(scope: &SoftDeleteScope, actor: i64, now: i64) -> UpdateStatement {
        let mut q = Self::scoped_update(scope);
        match scope {
            SoftDeleteScope::Registry { .. } => {
                set_deleted(&mut q, Registries::DeletedAt, Registries::DeletedBy, actor, now);
                q.and_where(Expr::col(Registries::DeletedAt).is_null());
            }
            SoftDeleteScope::Image { .. } => {
                set_deleted(&mut q, Images::DeletedAt, Images::DeletedBy, actor, now);
                q.and_where(Expr::col(Images::DeletedAt).is_null());
            }
            SoftDeleteScope::Artifact { .. } => {
                set_deleted(&mut q, Artifacts::DeletedAt, Artifacts::DeletedBy, actor, now);
                q.and_where(Expr::col(Artifacts::DeletedAt).is_null());
            }
        }
        q
    }

    pub(crate) fn restore_query(scope: &SoftDeleteScope, actor: i64, now: i64) -> UpdateStatement {
        let mut q = Self::scoped_update(scope);
        match scope {
            SoftDeleteScope::Registry { .. } => {
                set_restored(
                    &mut q,
                    Registries::DeletedAt,
                    Registries::DeletedBy,
                    Registries::UpdatedAt,
                    Registries::UpdatedBy,
                    actor,
                    now,
                );
                q.and_where(Expr::col(Registries::DeletedAt).is_not_null());
            }
            SoftDeleteScope::Image { .. } => {
                set_restored(
                    &mut q,
                    Images::DeletedAt,
                    Images::DeletedBy,
                    Images::UpdatedAt,
                    Images::UpdatedBy,
                    actor,
                    now,
                );
                q.and_where(Expr::col(Images::DeletedAt).is_not_null());
            }
            SoftDeleteScope::Artifact { .. } => {
                set_restored(
                    &mut q,
                    Artifacts::DeletedAt,
                    Artifacts::DeletedBy,
                    Artifacts::UpdatedAt,
                    Artifacts::UpdatedBy,
                    actor,
                    now,
                );
                q.and_where(Expr::col(Artifacts::DeletedAt).is_not_null());
            }
        }
        q
    }

    pub async fn soft_delete(
        executor: &mut PgConnection,
        scope: &SoftDeleteScope,
        actor: i64,
        now: i64,
    ) -> Result<u64> {
        let (sql, values) = Self::soft_delete_query(scope, actor, now).build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn restore(
        executor: &mut PgConnection,
        scope: &SoftDeleteScope,
        actor: i64,
        now: i64,
    ) -> Result<u64> {
        let (sql, values) = Self::restore_query(scope, actor, now).build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub(crate) fn purge_artifacts_query(account: &str, cutoff: i64) -> sea_query::DeleteStatement {
        let expired = Query::select()
            .column((Artifacts::Table, Artifacts::Id))
            .from(Artifacts::Table)
            .inner_join(
                Images::Table,
                Expr::col((Images::Table, Images::Id))
                    .equals((Artifacts::Table, Artifacts::ImageId)),
            )
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .and_where(Expr::col((Registries::Table, Registries::AccountIdentifier)).eq(account))
            .and_where(Expr::col((Artifacts::Table, Artifacts::DeletedAt)).is_not_null())
            .and_where(Expr::col((Artifacts::Table, Artifacts::DeletedAt)).lte(cutoff))
            .to_owned();

        Query::delete()
            .from_table(Artifacts::Table)
            .and_where(Expr::col(Artifacts::Id).in_subquery(expired))
            .to_owned()
    }

    pub(crate) fn purge_images_query(account: &str, cutoff: i64) -> sea_query::DeleteStatement {
        let expired = Query::select()
            .column((Images::Table, Images::Id))
            .from(Images::Table)
            .inner_join(
                Registries::Table,
                Expr::col((Registries::Table, Registries::Id))
                    .equals((Images::Table, Images::RegistryId)),
            )
            .and_where(Expr::col((Registries::Table, Registries::AccountIdentifier)).eq(account))
            .and_where(Expr::col((Images::Table, Images::DeletedAt)).is_not_null())
            .and_where(Expr::col((Images::Table, Images::DeletedAt)).lte(cutoff))
            .to_owned();

        Query::delete()
            .from_table(Images::Table)
            .and_where(Expr::col(Images::Id).in_subquery(expired))
            .to_owned()
    }

    pub(crate) fn purge_registries_query(account: &str, cutoff: i64) -> sea_query::DeleteStatement {
        Query::delete()
            .from_table(Registries::Table)
            .and_where(Expr::col(Registries::AccountIdentifier).eq(account))
            .and_where(Expr::col(Registries::DeletedAt).is_not_null())
            .and_where(Expr::col(Registries::DeletedAt).lte(cutoff))
            .to_owned()
    }

    async fn execute_purge(
        executor: &mut PgConnection,
        q: sea_query::DeleteStatement,
    ) -> Result<u64> {
        let (sql, values) = q.build_sqlx(PostgresQueryBuilder);
        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn insert_udp_event(
        executor: &mut PgConnection,
        data_type: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let (sql, values) = Query::insert()
            .into_table(UdpEvents::Table)
            .columns([UdpEvents::DataType, UdpEvents::Payload])
            .values([data_type.into(), payload.clone().into()])?
            .build_sqlx(PostgresQueryBuilder);

        sqlx::query_with(&sql, values).execute(executor).await?;
        Ok(())
    }

    pub async fn find_manifest(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        digest: &OciDigest,
    ) -> Result<Option<Manifest>> {
        let (sql, values) = Self::select_manifests()
            .inner_join(
                Images::Table,
                Expr::col((Images::Table, Images::Id))
                    .equals((Manifests::Table, Manifests::ImageId)),
            )
            .and_where(Expr::col((Manifests::Table, Manifests::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(image))
            // TODO: impl Value for OciDigest
            .and_where(Expr::col((Manifests::Table, Manifests::Digest)).eq(String::from(digest)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, Manifest, _>(&sql, values)
            .fetch_optional(executor)
            .await?)
    }

    pub async fn get_manifest(
        executor: &mut PgConnection,
        manifest_id: i64,
    ) -> Result<Option<Manifest>> {
        let (sql, values) = Self::select_manifests()
            .and_where(Expr::col((Manifests::Table, Manifests::Id)).eq(manifest_id))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, Manifest, _>(&sql, values)
            .fetch_optional(executor)
            .await?)
    }

    pub async fn referenced_by(
        executor: &mut PgConnection,
        manifest_id: i64,
    ) -> Result<Vec<Manifest>> {
        let (sql, values) = Self::select_manifests()
            .inner_join(
                ManifestReferences::Table,
                Expr::col((ManifestReferences::Table, ManifestReferences::ParentId))
                    .equals((Manifests::Table, Manifests::Id)),
            )
            .and_where(
                Expr::col((ManifestReferences::Table, ManifestReferences::ChildId)).eq(manifest_id),
            )
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, Manifest, _>(&sql, values)
            .fetch_all(executor)
            .await?)
    }

    pub async fn delete_manifest(executor: &mut PgConnection, manifest_id: i64) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Manifests::Table)
            .cond_where(Expr::col(Manifests::Id).eq(manifest_id))
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).execute(executor).await {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) => Err(referenced(e, "manifest")),
        }
    }

    pub async fn delete_manifests_by_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Manifests::Table)
            .and_where(Expr::col(Manifests::RegistryId).eq(registry_id))
            .and_where(Expr::col(Manifests::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).execute(executor).await {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) => Err(referenced(e, "manifests")),
        }
    }

    pub async fn count_manifests_by_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<i64> {
        let (sql, values) = Query::select()
            .expr(Func::count(Expr::col((Manifests::Table, Manifests::Id))))
            .from(Manifests::Table)
            .and_where(Expr::col(Manifests::RegistryId).eq(registry_id))
            .and_where(Expr::col(Manifests::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_one(executor).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn find_tag(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        tag: &str,
    ) -> Result<Option<Tag>> {
        let (sql, values) = Query::select()
            .columns([
                (Tags::Table, Tags::Id),
                (Tags::Table, Tags::Name),
                (Tags::Table, Tags::RegistryId),
                (Tags::Table, Tags::ImageId),
                (Tags::Table, Tags::ManifestId),
            ])
            .from(Tags::Table)
            .and_where(Expr::col((Tags::Table, Tags::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Tags::Table, Tags::Name)).eq(tag))
            .and_where(Expr::col((Tags::Table, Tags::ImageId)).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_as_with::<_, Tag, _>(&sql, values)
            .fetch_optional(executor)
            .await?)
    }

    pub async fn delete_tag(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        tag: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Tags::Table)
            .and_where(Expr::col(Tags::RegistryId).eq(registry_id))
            .and_where(Expr::col(Tags::Name).eq(tag))
            .and_where(Expr::col(Tags::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn delete_tags_by_manifest(
        executor: &mut PgConnection,
        manifest_id: i64,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Tags::Table)
            .cond_where(Expr::col(Tags::ManifestId).eq(manifest_id))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn delete_tags_by_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Tags::Table)
            .and_where(Expr::col(Tags::RegistryId).eq(registry_id))
            .and_where(Expr::col(Tags::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn unlink_blobs_by_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(RegistryBlobs::Table)
            .and_where(Expr::col(RegistryBlobs::RegistryId).eq(registry_id))
            .and_where(Expr::col(RegistryBlobs::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn delete_artifact(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
        version: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Artifacts::Table)
            .and_where(Expr::col(Artifacts::Version).eq(version))
            .and_where(Expr::col(Artifacts::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn delete_artifacts_by_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Artifacts::Table)
            .and_where(Expr::col(Artifacts::ImageId).in_subquery(image_ids(registry_id, image)))
            .build_sqlx(PostgresQueryBuilder);

        Ok(sqlx::query_with(&sql, values)
            .execute(executor)
            .await?
            .rows_affected())
    }

    pub async fn delete_image(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Query::delete()
            .from_table(Images::Table)
            .and_where(Expr::col(Images::RegistryId).eq(registry_id))
            .and_where(Expr::col(Images::Name).eq(image))
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).execute(executor).await {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) => Err(referenced(e, "image")),
        }
    }

    pub(crate) fn delete_image_if_no_artifacts_query(
        registry_id: i64,
        image: &str,
    ) -> sea_query::DeleteStatement {
        let linked = Query::select()
            .expr(Expr::val(1))
            .from(Artifacts::Table)
            .and_where(
                Expr::col((Artifacts::Table, Artifacts::ImageId))
                    .equals((Images::Table, Images::Id)),
            )
            .to_owned();

        Query::delete()
            .from_table(Images::Table)
            .and_where(Expr::col((Images::Table, Images::RegistryId)).eq(registry_id))
            .and_where(Expr::col((Images::Table, Images::Name)).eq(image))
            .and_where(Expr::exists(linked).not())
            .to_owned()
    }

    pub async fn delete_image_if_no_artifacts(
        executor: &mut PgConnection,
        registry_id: i64,
        image: &str,
    ) -> Result<u64> {
        let (sql, values) = Self::delete_image_if_no_artifacts_query(registry_id, image)
            .build_sqlx(PostgresQueryBuilder);

        match sqlx::query_with(&sql, values).execute(executor).await {
            Ok(r) => Ok(r.rows_affected()),
            Err(e) => Err(referenced(e, "image")),
        }
    }
}

// higher level DB interaction methods
impl PostgresMetadataConn {
    pub async fn get_registry(&mut self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Registry> {
        Queries::get_registry(&mut *self.conn, registry_id, filter).await
    }

    pub async fn list_registries(
        &mut self,
        account_identifier: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Registry>> {
        Queries::list_registries(&mut *self.conn, account_identifier, filter).await
    }

    pub async fn get_image(
        &mut self,
        registry_id: i64,
        name: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Image> {
        Queries::get_image(&mut *self.conn, registry_id, name, filter).await
    }

    pub async fn list_images(&mut self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Vec<Image>> {
        Queries::list_images(&mut *self.conn, registry_id, filter).await
    }

    pub async fn count_images(&mut self, registry_id: i64, filter: SoftDeleteFilter) -> Result<i64> {
        Queries::count_images(&mut *self.conn, registry_id, filter).await
    }

    pub async fn get_artifact(
        &mut self,
        registry_id: i64,
        image: &str,
        version: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Artifact> {
        Queries::get_artifact(&mut *self.conn, registry_id, image, version, filter).await
    }

    pub async fn list_artifacts(
        &mut self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Artifact>> {
        Queries::list_artifacts(&mut *self.conn, registry_id, image, filter).await
    }

    pub async fn count_artifacts(
        &mut self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<i64> {
        Queries::count_artifacts(&mut *self.conn, registry_id, image, filter).await
    }

    pub async fn soft_delete(&mut self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        Queries::soft_delete(&mut *self.conn, scope, actor, now).await
    }

    pub async fn restore(&mut self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        Queries::restore(&mut *self.conn, scope, actor, now).await
    }

    pub async fn purge_artifacts(&mut self, account: &str, cutoff: i64) -> Result<u64> {
        Queries::execute_purge(&mut *self.conn, Queries::purge_artifacts_query(account, cutoff)).await
    }

    pub async fn purge_images(&mut self, account: &str, cutoff: i64) -> Result<u64> {
        Queries::execute_purge(&mut *self.conn, Queries::purge_images_query(account, cutoff)).await
    }

    pub async fn purge_registries(&mut self, account: &str, cutoff: i64) -> Result<u64> {
        Queries::execute_purge(&mut *self.conn, Queries::purge_registries_query(account, cutoff)).await
    }

    pub async fn insert_udp_event(&mut self, data_type: &str, payload: &serde_json::Value) -> Result<()> {
        Queries::insert_udp_event(&mut *self.conn, data_type, payload).await
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataPool {
    type Tx = PostgresMetadataTx;

    async fn begin(&self) -> Result<Self::Tx> {
        self.get_tx().await
    }

    async fn get_registry(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Registry> {
        self.get_conn().await?.get_registry(registry_id, filter).await
    }

    async fn list_registries(
        &self,
        account_identifier: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Registry>> {
        self.get_conn()
            .await?
            .list_registries(account_identifier, filter)
            .await
    }

    async fn get_image(&self, registry_id: i64, name: &str, filter: SoftDeleteFilter) -> Result<Image> {
        self.get_conn().await?.get_image(registry_id, name, filter).await
    }

    async fn list_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<Vec<Image>> {
        self.get_conn().await?.list_images(registry_id, filter).await
    }

    async fn count_images(&self, registry_id: i64, filter: SoftDeleteFilter) -> Result<i64> {
        self.get_conn().await?.count_images(registry_id, filter).await
    }

    async fn get_artifact(
        &self,
        registry_id: i64,
        image: &str,
        version: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Artifact> {
        self.get_conn()
            .await?
            .get_artifact(registry_id, image, version, filter)
            .await
    }

    async fn list_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<Vec<Artifact>> {
        self.get_conn()
            .await?
            .list_artifacts(registry_id, image, filter)
            .await
    }

    async fn count_artifacts(
        &self,
        registry_id: i64,
        image: &str,
        filter: SoftDeleteFilter,
    ) -> Result<i64> {
        self.get_conn()
            .await?
            .count_artifacts(registry_id, image, filter)
            .await
    }

    async fn soft_delete(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        self.get_conn().await?.soft_delete(scope, actor, now).await
    }

    async fn restore(&self, scope: &SoftDeleteScope, actor: i64, now: i64) -> Result<u64> {
        self.get_conn().await?.restore(scope, actor, now).await
    }

    async fn purge_artifacts(&self, account_identifier: &str, deleted_before_or_at: i64) -> Result<u64> {
        self.get_conn()
            .await?
            .purge_artifacts(account_identifier, deleted_before_or_at)
            .await
    }

    async fn purge_images(&self, account_identifier: &str, deleted_before_or_at: i64) -> Result<u64> {
        self.get_conn()
            .await?
            .purge_images(account_identifier, deleted_before_or_at)
            .await
    }

    async fn purge_registries(&self, account_identifier: &str, deleted_before_or_at: i64) -> Result<u64> {
        self.get_conn()
            .await?
            .purge_registries(account_identifier, deleted_before_or_at)
            .await
    }
}

#[async_trait]
impl UdpEventStore for PostgresMetadataPool {
    async fn insert_udp_event(&self, data_type: &str, payload: &serde_json::Value) -> Result<()> {
        self.get_conn()
            .await?
            .insert_udp_event(data_type, payload)
            .await
    }
}

// Wrapper around a Postgres transaction with the ability to commit transactions.
pub struct PostgresMetadataTx {
    tx: Option<Transaction<'static, Postgres>>,
}

#[async_trait]
impl MetadataTx for PostgresMetadataTx {
    async fn commit(&mut self) -> Result<()> {
        if let Some(t) = self.tx.take() {
            Ok(t.commit().await?)
        } else {
            Ok(())
        }
    }

    async fn find_manifest(
        &mut self,
        registry_id: i64,
        image: &str,
        digest: &OciDigest,
    ) -> Result<Option<Manifest>> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::find_manifest(&mut **tx, registry_id, image, digest).await
    }

    async fn get_manifest(&mut self, manifest_id: i64) -> Result<Option<Manifest>> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::get_manifest(&mut **tx, manifest_id).await
    }

    async fn referenced_by(&mut self, manifest_id: i64) -> Result<Vec<Manifest>> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::referenced_by(&mut **tx, manifest_id).await
    }

    async fn delete_manifest(&mut self, manifest_id: i64) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_manifest(&mut **tx, manifest_id).await
    }

    async fn delete_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_manifests_by_image(&mut **tx, registry_id, image).await
    }

    async fn count_manifests_by_image(&mut self, registry_id: i64, image: &str) -> Result<i64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::count_manifests_by_image(&mut **tx, registry_id, image).await
    }

    async fn find_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<Option<Tag>> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::find_tag(&mut **tx, registry_id, image, tag).await
    }

    async fn delete_tag(&mut self, registry_id: i64, image: &str, tag: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_tag(&mut **tx, registry_id, image, tag).await
    }

    async fn delete_tags_by_manifest(&mut self, manifest_id: i64) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_tags_by_manifest(&mut **tx, manifest_id).await
    }

    async fn delete_tags_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_tags_by_image(&mut **tx, registry_id, image).await
    }

    async fn unlink_blobs_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::unlink_blobs_by_image(&mut **tx, registry_id, image).await
    }

    async fn delete_artifact(&mut self, registry_id: i64, image: &str, version: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_artifact(&mut **tx, registry_id, image, version).await
    }

    async fn delete_artifacts_by_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_artifacts_by_image(&mut **tx, registry_id, image).await
    }

    async fn delete_image(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_image(&mut **tx, registry_id, image).await
    }

    async fn delete_image_if_no_artifacts(&mut self, registry_id: i64, image: &str) -> Result<u64> {
        let tx = self.tx.as_mut().ok_or(Error::PostgresMetadataTxInactive)?;
        Queries::delete_image_if_no_artifacts(&mut **tx, registry_id, image).await
    }
}
