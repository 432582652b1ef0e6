//! Package types and the per-type capability table that deletion and reindexing dispatch on.

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The package format a registry serves. Immutable once a registry is created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum PackageType {
    Docker,
    Helm,
    Npm,
    Maven,
    Python,
    Generic,
    Nuget,
    Rpm,
    Cargo,
    Go,
    HuggingFace,
    /// Package types plugged in from outside the core; handled by a
    /// [`PackageWrapper`](crate::deletion::PackageWrapper).
    Custom(String),
}

impl std::str::FromStr for PackageType {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Ok(match upper.as_str() {
            "DOCKER" => PackageType::Docker,
            "HELM" => PackageType::Helm,
            "NPM" => PackageType::Npm,
            "MAVEN" => PackageType::Maven,
            "PYTHON" => PackageType::Python,
            "GENERIC" => PackageType::Generic,
            "NUGET" => PackageType::Nuget,
            "RPM" => PackageType::Rpm,
            "CARGO" => PackageType::Cargo,
            "GO" => PackageType::Go,
            "HUGGINGFACE" => PackageType::HuggingFace,
            _ => PackageType::Custom(upper),
        })
    }
}

impl From<String> for PackageType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(pt) => pt,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for PackageType {
    fn from(s: &str) -> Self {
        PackageType::from(s.to_string())
    }
}

impl From<PackageType> for String {
    fn from(pt: PackageType) -> String {
        pt.to_string()
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageType::Docker => "DOCKER",
            PackageType::Helm => "HELM",
            PackageType::Npm => "NPM",
            PackageType::Maven => "MAVEN",
            PackageType::Python => "PYTHON",
            PackageType::Generic => "GENERIC",
            PackageType::Nuget => "NUGET",
            PackageType::Rpm => "RPM",
            PackageType::Cargo => "CARGO",
            PackageType::Go => "GO",
            PackageType::HuggingFace => "HUGGINGFACE",
            PackageType::Custom(s) => s.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageFamily {
    /// Content-addressed manifests, tags and shared blobs.
    Oci,
    /// Versions backed by files held in the file manager.
    FileBacked,
    /// Everything else; the package wrapper owns the mechanics.
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageDeletion {
    Oci,
    Files,
    Unsupported(&'static str),
    Wrapper,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionDeletion {
    Oci,
    Files,
    Wrapper,
}

/// What has to happen downstream after a version of a package changes membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reindex {
    None,
    /// Rebuild the index covering every package in the registry.
    RegistryIndex,
    /// Emit an artifact-deleted webhook and rebuild the index of the affected package.
    PackageIndexAndWebhook,
    /// Not known to the core; logged and skipped.
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capability {
    pub family: PackageFamily,
    pub image_deletion: ImageDeletion,
    pub version_deletion: VersionDeletion,
    pub reindex: Reindex,
}

impl Capability {
    const OCI: Capability = Capability {
        family: PackageFamily::Oci,
        image_deletion: ImageDeletion::Oci,
        version_deletion: VersionDeletion::Oci,
        reindex: Reindex::None,
    };

    const FILES: Capability = Capability {
        family: PackageFamily::FileBacked,
        image_deletion: ImageDeletion::Files,
        version_deletion: VersionDeletion::Files,
        reindex: Reindex::None,
    };

    const CUSTOM: Capability = Capability {
        family: PackageFamily::Custom,
        image_deletion: ImageDeletion::Wrapper,
        version_deletion: VersionDeletion::Wrapper,
        reindex: Reindex::Unknown,
    };
}

/// Package type keyed dispatch table. Adding a package type means adding a row here.
#[derive(Clone, Debug)]
pub struct Capabilities {
    table: HashMap<PackageType, Capability>,
}

static BUILTIN: Lazy<Capabilities> = Lazy::new(Capabilities::new);

impl Capabilities {
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert(PackageType::Docker, Capability::OCI);
        table.insert(PackageType::Helm, Capability::OCI);

        for pt in [
            PackageType::Generic,
            PackageType::Maven,
            PackageType::Python,
            PackageType::Npm,
            PackageType::Nuget,
        ] {
            table.insert(pt, Capability::FILES);
        }
        table.insert(
            PackageType::Go,
            Capability {
                reindex: Reindex::PackageIndexAndWebhook,
                ..Capability::FILES
            },
        );
        table.insert(
            PackageType::Rpm,
            Capability {
                image_deletion: ImageDeletion::Unsupported("delete artifact not supported for rpm"),
                reindex: Reindex::RegistryIndex,
                ..Capability::FILES
            },
        );

        table.insert(
            PackageType::Cargo,
            Capability {
                reindex: Reindex::None,
                ..Capability::CUSTOM
            },
        );
        table.insert(
            PackageType::HuggingFace,
            Capability {
                image_deletion: ImageDeletion::Unsupported("unsupported package type"),
                reindex: Reindex::None,
                ..Capability::CUSTOM
            },
        );

        Self { table }
    }

    /// The shared table for the builtin package types.
    pub fn builtin() -> &'static Capabilities {
        &BUILTIN
    }

    pub fn register(&mut self, package_type: PackageType, capability: Capability) {
        self.table.insert(package_type, capability);
    }

    pub fn get(&self, package_type: &PackageType) -> Capability {
        self.table
            .get(package_type)
            .copied()
            .unwrap_or(Capability::CUSTOM)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the file manager prefix holding the files of `image` (and of `version`, when it is
/// not empty) for a file-backed package type.
pub fn storage_path(package_type: &PackageType, image: &str, version: &str) -> Result<String> {
    if image.is_empty() {
        return Err(Error::InvalidArgument(String::from("image name is empty")));
    }

    let path = match package_type {
        PackageType::Generic
        | PackageType::Python
        | PackageType::Nuget
        | PackageType::Npm
        | PackageType::Rpm => format!("/{image}"),
        PackageType::Maven => {
            let (group, artifact) = image.split_once(':').ok_or_else(|| {
                Error::InvalidArgument(format!("invalid maven package name: {image}"))
            })?;
            if group.is_empty() || artifact.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "invalid maven package name: {image}"
                )));
            }
            format!("/{}/{artifact}", group.replace('.', "/"))
        }
        PackageType::Go => {
            if version.is_empty() {
                return Ok(format!("/{image}"));
            }
            return Ok(format!("/{image}/@v/{version}"));
        }
        pt => {
            return Err(Error::InvalidArgument(format!(
                "no file storage layout for package type {pt}"
            )))
        }
    };

    if version.is_empty() {
        Ok(path)
    } else {
        Ok(format!("{path}/{version}"))
    }
}
