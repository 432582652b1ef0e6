mod postgres;
pub use postgres::PostgresConfig;
pub use postgres::PostgresMetadataConn;
pub use postgres::PostgresMetadataPool;
pub use postgres::PostgresMetadataTx;

mod soft_delete;
pub use soft_delete::SoftDeleteFilter;

mod traits;
pub use traits::{MetadataStore, MetadataTx, SoftDeleteScope, UdpEventStore};

mod types;
pub use types::Deletion;
pub use types::{Artifact, Image, Manifest, Registry, Tag};
pub use types::{Artifacts, Images, ManifestReferences, Manifests, Registries, RegistryBlobs, Tags, UdpEvents};
