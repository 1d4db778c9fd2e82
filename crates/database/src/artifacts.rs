//! Versioned model bundles on an `object_store` backend.
//!
//! Layout, per project:
//!
//! ```text
//! {project}/model/{version:020}/model.mpk
//! {project}/model/{version:020}/scaler.json
//! {project}/model/{version:020}/function_encoding.json
//! {project}/model/{version:020}/manifest.json
//! {project}/archive/...            previously published bundles
//! ```

use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use invocation_structs::{ENCODING_FILE, MANIFEST_FILE, MODEL_FILE, SCALER_FILE};
use object_store::path::{DELIMITER, Path as ObjectStorePath};
use object_store::{ObjectStore, ObjectStoreExt};
use tracing::{debug, info};

const MODEL_DIR: &str = "model";
const ARCHIVE_DIR: &str = "archive";

/// The four files of a bundle, ready to publish.
#[derive(Debug, Clone)]
pub struct BundleFiles {
    pub model: Bytes,
    pub scaler: Bytes,
    pub encoding: Bytes,
    pub manifest: Bytes,
}

/// A bundle read back from the store. Files that were not found are `None`.
#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub version: u64,
    pub model: Option<Bytes>,
    pub scaler: Option<Bytes>,
    pub encoding: Option<Bytes>,
    pub manifest: Option<Bytes>,
}

/// Model bundle storage for all projects.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Prefix holding the published bundles of a project.
    #[must_use]
    pub fn model_prefix(project_id: &str) -> ObjectStorePath {
        ObjectStorePath::from(format!("{project_id}/{MODEL_DIR}"))
    }

    /// Prefix holding one bundle version.
    #[must_use]
    pub fn version_prefix(project_id: &str, version: u64) -> ObjectStorePath {
        ObjectStorePath::from(format!("{project_id}/{MODEL_DIR}/{version:020}"))
    }

    /// Every published version of a project, ascending.
    ///
    /// Non-numeric prefixes are skipped, and so are versions without a
    /// manifest. The manifest is written last, so a bundle that is still
    /// being published, or whose publish was interrupted, is not listed.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing or a manifest lookup fails.
    pub async fn versions(&self, project_id: &str) -> anyhow::Result<Vec<u64>> {
        let prefix = Self::model_prefix(project_id);
        let listing = self
            .store
            .list_with_delimiter(Some(&prefix))
            .await
            .with_context(|| format!("Failed to list {prefix}"))?;

        let mut versions = Vec::new();
        for directory in &listing.common_prefixes {
            let Some(version) = directory.filename().and_then(|name| name.parse::<u64>().ok())
            else {
                continue;
            };

            let manifest = directory.clone().join(MANIFEST_FILE);
            match self.store.head(&manifest).await {
                Ok(_) => versions.push(version),
                Err(object_store::Error::NotFound { .. }) => {
                    debug!(project_id, version, "Skipping bundle without manifest");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to read {manifest}"));
                }
            }
        }

        versions.sort_unstable();
        Ok(versions)
    }

    /// Greatest published version of a project, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn latest_version(&self, project_id: &str) -> anyhow::Result<Option<u64>> {
        Ok(self.versions(project_id).await?.last().copied())
    }

    /// Writes a bundle under its version prefix, manifest last.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails.
    pub async fn save_bundle(
        &self,
        project_id: &str,
        version: u64,
        files: BundleFiles,
    ) -> anyhow::Result<ObjectStorePath> {
        let prefix = Self::version_prefix(project_id, version);

        for (name, data) in [
            (MODEL_FILE, files.model),
            (SCALER_FILE, files.scaler),
            (ENCODING_FILE, files.encoding),
            (MANIFEST_FILE, files.manifest),
        ] {
            let path = prefix.clone().join(name);
            self.store
                .put(&path, data.into())
                .await
                .with_context(|| format!("Failed to write {path}"))?;
        }

        info!(project_id, version, prefix = %prefix, "Published model bundle");
        Ok(prefix)
    }

    /// Reads one bundle version.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails for any reason other than a missing file.
    pub async fn load_bundle(&self, project_id: &str, version: u64) -> anyhow::Result<StoredBundle> {
        let prefix = Self::version_prefix(project_id, version);

        Ok(StoredBundle {
            version,
            model: self.read_optional(&prefix.clone().join(MODEL_FILE)).await?,
            scaler: self.read_optional(&prefix.clone().join(SCALER_FILE)).await?,
            encoding: self.read_optional(&prefix.clone().join(ENCODING_FILE)).await?,
            manifest: self.read_optional(&prefix.clone().join(MANIFEST_FILE)).await?,
        })
    }

    /// Moves everything under `{project}/model/` to `{project}/archive/`.
    ///
    /// Returns the number of objects moved.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing, copy or delete fails.
    pub async fn archive_existing(&self, project_id: &str) -> anyhow::Result<usize> {
        let model_prefix = Self::model_prefix(project_id);
        let archive_prefix = format!("{project_id}/{ARCHIVE_DIR}");

        let mut moved = 0;
        for object in self.list_recursive(&model_prefix).await? {
            let relative = object
                .as_ref()
                .strip_prefix(model_prefix.as_ref())
                .unwrap_or(object.as_ref())
                .trim_start_matches(DELIMITER);
            let target = ObjectStorePath::from(format!("{archive_prefix}/{relative}"));

            self.store
                .copy(&object, &target)
                .await
                .with_context(|| format!("Failed to copy {object} to {target}"))?;
            self.store
                .delete(&object)
                .await
                .with_context(|| format!("Failed to delete {object}"))?;

            debug!(from = %object, to = %target, "Archived object");
            moved += 1;
        }

        if moved > 0 {
            info!(project_id, objects = moved, "Archived previous model bundles");
        }
        Ok(moved)
    }

    async fn read_optional(&self, path: &ObjectStorePath) -> anyhow::Result<Option<Bytes>> {
        match self.store.get(path).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .with_context(|| format!("Failed to read {path}"))?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read {path}")),
        }
    }

    /// Object paths under `prefix`, two levels deep (files and version directories).
    async fn list_recursive(&self, prefix: &ObjectStorePath) -> anyhow::Result<Vec<ObjectStorePath>> {
        let listing = self
            .store
            .list_with_delimiter(Some(prefix))
            .await
            .with_context(|| format!("Failed to list {prefix}"))?;

        let mut objects: Vec<ObjectStorePath> =
            listing.objects.into_iter().map(|meta| meta.location).collect();

        for directory in listing.common_prefixes {
            let nested = self
                .store
                .list_with_delimiter(Some(&directory))
                .await
                .with_context(|| format!("Failed to list {directory}"))?;
            objects.extend(nested.objects.into_iter().map(|meta| meta.location));
        }

        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn files(tag: &str) -> BundleFiles {
        BundleFiles {
            model: Bytes::from(format!("model-{tag}")),
            scaler: Bytes::from(format!("scaler-{tag}")),
            encoding: Bytes::from(format!("encoding-{tag}")),
            manifest: Bytes::from(format!("manifest-{tag}")),
        }
    }

    fn store() -> ArtifactStore {
        ArtifactStore::new(Arc::new(InMemory::new()))
    }

    #[test]
    fn test_version_prefix_is_zero_padded() {
        assert_eq!(
            ArtifactStore::version_prefix("p1", 42).as_ref(),
            "p1/model/00000000000000000042"
        );
    }

    #[tokio::test]
    async fn test_latest_is_numeric_max() {
        let store = store();
        assert_eq!(store.latest_version("p1").await.expect("list"), None);

        store.save_bundle("p1", 900, files("a")).await.expect("save");
        store
            .save_bundle("p1", 1_700_000_000_000, files("b"))
            .await
            .expect("save");
        store.save_bundle("p1", 5_000, files("c")).await.expect("save");
        store.save_bundle("p2", 9_999_999_999_999, files("d")).await.expect("save");

        assert_eq!(
            store.versions("p1").await.expect("list"),
            vec![900, 5_000, 1_700_000_000_000]
        );

        let version = store.latest_version("p1").await.expect("list").expect("version");
        assert_eq!(version, 1_700_000_000_000);
        let latest = store.load_bundle("p1", version).await.expect("load");
        assert_eq!(latest.model, Some(Bytes::from("model-b")));
        assert_eq!(latest.encoding, Some(Bytes::from("encoding-b")));
    }

    #[tokio::test]
    async fn test_non_numeric_prefixes_ignored() {
        let store = store();
        store
            .store
            .put(&ObjectStorePath::from("p1/model/latest/model.mpk"), Bytes::from("x").into())
            .await
            .expect("put");

        assert!(store.latest_version("p1").await.expect("list").is_none());
    }

    #[tokio::test]
    async fn test_versions_skip_bundles_without_manifest() {
        let store = store();
        store.save_bundle("p1", 1, files("a")).await.expect("save");

        // A newer publish that stopped before its manifest was written.
        let partial = ArtifactStore::version_prefix("p1", 2);
        for name in [MODEL_FILE, SCALER_FILE, ENCODING_FILE] {
            store
                .store
                .put(&partial.clone().join(name), Bytes::from("x").into())
                .await
                .expect("put");
        }

        assert_eq!(store.versions("p1").await.expect("list"), vec![1]);
        assert_eq!(store.latest_version("p1").await.expect("list"), Some(1));

        store
            .store
            .put(&partial.join(MANIFEST_FILE), Bytes::from("m").into())
            .await
            .expect("put");
        assert_eq!(store.latest_version("p1").await.expect("list"), Some(2));
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_none() {
        let store = store();
        store.save_bundle("p1", 1, files("a")).await.expect("save");
        store
            .store
            .delete(&ArtifactStore::version_prefix("p1", 1).join(ENCODING_FILE))
            .await
            .expect("delete");

        let bundle = store.load_bundle("p1", 1).await.expect("load");
        assert!(bundle.encoding.is_none());
        assert!(bundle.scaler.is_some());
    }

    #[tokio::test]
    async fn test_archive_moves_previous_bundles() {
        let store = store();
        store.save_bundle("p1", 1, files("a")).await.expect("save");
        store.save_bundle("p1", 2, files("b")).await.expect("save");

        let moved = store.archive_existing("p1").await.expect("archive");
        assert_eq!(moved, 8);
        assert!(store.versions("p1").await.expect("list").is_empty());

        let archived = store
            .store
            .get(&ObjectStorePath::from(
                "p1/archive/00000000000000000002/model.mpk",
            ))
            .await
            .expect("archived object")
            .bytes()
            .await
            .expect("bytes");
        assert_eq!(archived, Bytes::from("model-b"));

        assert_eq!(store.archive_existing("p1").await.expect("archive"), 0);
    }
}
