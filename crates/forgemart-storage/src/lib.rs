pub mod store;

pub use store::{
    ensure_local_file, sanitize_filename, ArtifactKind, ArtifactStore, LocalStorage, S3Storage,
    StorageError,
};
