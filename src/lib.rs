mod config;
pub use config::Config;
pub use config::{DeletionConfig, EventsConfig, FilesBackend, MetadataBackend, PurgeConfig};

mod oci_digest;
pub use oci_digest::OciDigest;

mod errors;
pub use errors::{Error, ErrorKind, Result};

pub mod package_type;
pub use package_type::PackageType;

mod types;
pub use types::{Principal, PrincipalType, RegistryInfo};

pub mod audit;
pub mod deletion;
pub mod events;
pub mod metadata;
pub mod objects;
pub mod purge;
pub mod reindexing;
