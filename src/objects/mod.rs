use std::path::{Component, Path};

use async_trait::async_trait;

pub(crate) mod s3;
pub use s3::S3Config;
pub use s3::S3FileManager;

use crate::{Error, Result};

/// Byte storage backing file-based package versions.
///
/// Paths are the package-type specific layouts produced by
/// [`storage_path`](crate::package_type::storage_path) and name a directory-like prefix; deleting
/// one removes everything stored beneath it. Deleting a prefix with nothing under it succeeds.
#[async_trait]
pub trait FileManager: Send + Sync + 'static {
    async fn delete_file(&self, registry_id: i64, path: &str) -> Result<()>;
}

/// Build the object key prefix holding the files of `path` in a registry.
///
/// Rejects relative segments so a crafted package name can never reach outside its registry.
pub fn object_prefix(registry_id: i64, path: &str) -> Result<String> {
    let mut prefix = format!("registries/{registry_id}/files");
    for c in Path::new(path).components() {
        match c {
            Component::RootDir => {}
            Component::Normal(s) => match s.to_str() {
                Some(s) => {
                    prefix.push('/');
                    prefix.push_str(s);
                }
                None => {
                    return Err(Error::InvalidArgument(String::from(
                        "path components must be valid unicode",
                    )))
                }
            },
            Component::CurDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::InvalidArgument(format!(
                    "relative path segments not allowed: {path}"
                )))
            }
        }
    }
    Ok(prefix)
}
