//! Filesystem-backed store for rendered PDF artifacts.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::domain::artifact::ArtifactId;

const SOURCE: &str = "infra::artifacts";

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact `{id}` does not exist")]
    NotFound { id: String },
    #[error("failed to write artifact `{id}`")]
    WriteFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read artifact `{id}`")]
    ReadFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Stores each artifact as `<root>/<id>.pdf`, or `<root>/<shard>/<id>.pdf` when
/// sharding is enabled. Files are written once and never modified.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    shard: bool,
}

impl ArtifactStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: impl Into<PathBuf>, shard: bool) -> Result<Self, std::io::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, shard })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of an artifact, whether or not it exists yet.
    pub fn path_for(&self, id: &ArtifactId) -> PathBuf {
        if self.shard {
            self.root.join(id.shard()).join(id.file_name())
        } else {
            self.root.join(id.file_name())
        }
    }

    /// Persist `data` under a freshly generated identifier.
    ///
    /// The bytes land in a temporary sibling first and are renamed into place, so
    /// a reader never observes a partially written artifact.
    pub async fn store(&self, data: Bytes) -> Result<ArtifactId, ArtifactStoreError> {
        let id = ArtifactId::generate();
        let target = self.path_for(&id);
        let staging = target.with_extension("pdf.partial");
        let write_failed = |source| ArtifactStoreError::WriteFailed {
            id: id.to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let written = async {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, &target).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&staging).await;
            warn!(
                target = SOURCE,
                op = "artifacts::store",
                result = "error",
                artifact_id = %id,
                error = %err,
                "Failed to persist artifact"
            );
            return Err(write_failed(err));
        }

        debug!(
            target = SOURCE,
            op = "artifacts::store",
            result = "ok",
            artifact_id = %id,
            bytes = data.len(),
            "Artifact stored"
        );
        Ok(id)
    }

    /// Read an artifact back into memory.
    pub async fn retrieve(&self, id: &ArtifactId) -> Result<Bytes, ArtifactStoreError> {
        match fs::read(self.path_for(id)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ArtifactStoreError::NotFound {
                id: id.to_string(),
            }),
            Err(source) => Err(ArtifactStoreError::ReadFailed {
                id: id.to_string(),
                source,
            }),
        }
    }

    /// Map a URL file name such as `<uuid>.pdf` to an identifier.
    ///
    /// Names that can never have been issued are reported as `NotFound` without
    /// touching the filesystem.
    pub fn resolve(&self, name: &str) -> Result<ArtifactId, ArtifactStoreError> {
        ArtifactId::parse(name).map_err(|err| {
            debug!(
                target = SOURCE,
                op = "artifacts::resolve",
                result = "rejected",
                error = %err,
                "Artifact name rejected"
            );
            ArtifactStoreError::NotFound {
                id: name.to_string(),
            }
        })
    }

    pub async fn contains(&self, id: &ArtifactId) -> bool {
        fs::metadata(self.path_for(id))
            .await
            .is_ok_and(|meta| meta.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(shard: bool) -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::new(dir.path().join("pdfs"), shard).expect("store");
        (dir, store)
    }

    #[tokio::test]
    async fn stores_and_retrieves_bytes() {
        let (_dir, store) = store(false);
        let payload = Bytes::from_static(b"%PDF-1.7 hello");

        let id = store.store(payload.clone()).await.expect("store");

        assert!(store.contains(&id).await);
        assert_eq!(store.retrieve(&id).await.expect("retrieve"), payload);
        assert_eq!(
            store.path_for(&id),
            store.root().join(format!("{id}.pdf"))
        );
    }

    #[tokio::test]
    async fn each_store_gets_a_new_identifier() {
        let (_dir, store) = store(false);
        let first = store.store(Bytes::from_static(b"a")).await.expect("first");
        let second = store.store(Bytes::from_static(b"a")).await.expect("second");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn sharded_layout_uses_prefix_directory() {
        let (_dir, store) = store(true);
        let id = store
            .store(Bytes::from_static(b"%PDF"))
            .await
            .expect("store");

        let path = store.path_for(&id);
        assert!(path.is_file());
        assert_eq!(path.parent(), Some(store.root().join(id.shard()).as_path()));
        assert_eq!(store.retrieve(&id).await.expect("retrieve"), "%PDF");
    }

    #[tokio::test]
    async fn no_staging_files_are_left_behind() {
        let (_dir, store) = store(false);
        store
            .store(Bytes::from_static(b"%PDF"))
            .await
            .expect("store");

        let mut entries = std::fs::read_dir(store.root())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().into_string().expect("utf8"))
            .collect::<Vec<_>>();
        entries.sort();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with(".pdf"));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (_dir, store) = store(false);
        let id = ArtifactId::generate();
        assert!(!store.contains(&id).await);
        assert!(matches!(
            store.retrieve(&id).await,
            Err(ArtifactStoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_names_never_reach_the_filesystem() {
        let (dir, store) = store(false);
        std::fs::write(dir.path().join("secret.pdf"), b"secret").expect("write");

        for name in [
            "../secret.pdf",
            "../etc/passwd",
            "secret",
            "",
            "..%2Fsecret.pdf",
        ] {
            assert!(
                matches!(
                    store.resolve(name),
                    Err(ArtifactStoreError::NotFound { .. })
                ),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn resolve_accepts_pdf_suffix() {
        let (_dir, store) = store(false);
        let id = store
            .store(Bytes::from_static(b"%PDF"))
            .await
            .expect("store");

        for name in [format!("{id}.pdf"), id.to_string()] {
            let resolved = store.resolve(&name).expect("resolve");
            assert_eq!(resolved, id);
            assert_eq!(store.retrieve(&resolved).await.expect("retrieve"), "%PDF");
        }
    }
}
