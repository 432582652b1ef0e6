use sea_query::{ColumnRef, Condition, Expr, IntoColumnRef};
use serde::Deserialize;

use super::types::{Artifacts, Deletion, Images, Registries};

/// Selects rows by soft-delete state. Applies to the row itself and every ancestor in its
/// ownership chain (artifact -> image -> registry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftDeleteFilter {
    /// Live rows whose ancestors are live as well.
    #[default]
    ExcludeDeleted,
    /// Rows that are soft-deleted themselves or through an ancestor.
    OnlyDeleted,
    IncludeAll,
}

impl SoftDeleteFilter {
    /// Build the predicate over the `deleted_at` columns of a row's ownership chain. `None` means
    /// no predicate applies.
    pub fn condition(&self, chain: &[ColumnRef]) -> Option<Condition> {
        match self {
            SoftDeleteFilter::ExcludeDeleted => Some(
                chain
                    .iter()
                    .fold(Condition::all(), |c, col| c.add(Expr::col(col.clone()).is_null())),
            ),
            SoftDeleteFilter::OnlyDeleted => Some(
                chain
                    .iter()
                    .fold(Condition::any(), |c, col| {
                        c.add(Expr::col(col.clone()).is_not_null())
                    }),
            ),
            SoftDeleteFilter::IncludeAll => None,
        }
    }

    /// Same decision as [`Self::condition`], evaluated against an already loaded row.
    pub fn matches(&self, deletion: &Deletion) -> bool {
        match self {
            SoftDeleteFilter::ExcludeDeleted => !deletion.is_deleted(),
            SoftDeleteFilter::OnlyDeleted => deletion.is_deleted(),
            SoftDeleteFilter::IncludeAll => true,
        }
    }
}

pub(crate) fn registry_chain() -> Vec<ColumnRef> {
    vec![(Registries::Table, Registries::DeletedAt).into_column_ref()]
}

pub(crate) fn image_chain() -> Vec<ColumnRef> {
    vec![
        (Images::Table, Images::DeletedAt).into_column_ref(),
        (Registries::Table, Registries::DeletedAt).into_column_ref(),
    ]
}

pub(crate) fn artifact_chain() -> Vec<ColumnRef> {
    vec![
        (Artifacts::Table, Artifacts::DeletedAt).into_column_ref(),
        (Images::Table, Images::DeletedAt).into_column_ref(),
        (Registries::Table, Registries::DeletedAt).into_column_ref(),
    ]
}
