use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use vitrine_backend::{Backend, BackendError, Collection, Connector, InMemoryConnector};
use vitrine_types::{
    now_ms, removed_keys, HeroSlides, ImageKey, NewProject, Project, ProjectId, ProjectPatch,
};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::handle::{DisplayHandle, HandleCache};
use crate::references::ReferenceIndex;
use crate::report::{CleanupReport, Disposition};

/// Settings key holding the five hero slide keys.
pub const HERO_SLIDES_KEY: &str = "heroSlides";

/// Settings key holding the gallery list, newest first.
pub const GALLERY_KEY: &str = "galleryImageKeys";

/// The site content store.
///
/// Owns one lazily opened backend handle, shared by every operation and
/// never explicitly closed, plus the display handle cache. Collaborators
/// receive the store (usually as `Arc<ContentStore>`) rather than looking it
/// up globally.
///
/// Read-modify-write operations (`add_gallery_images`,
/// `remove_gallery_images`, `update_project`) do not lock: concurrent
/// writers to the same settings value or project record race, and the last
/// write wins. Reference checks likewise see whatever state the backend
/// holds at scan time.
pub struct ContentStore {
    connector: Arc<dyn Connector>,
    backend: OnceCell<Arc<dyn Backend>>,
    handles: HandleCache,
}

impl ContentStore {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            backend: OnceCell::new(),
            handles: HandleCache::new(),
        }
    }

    /// A store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryConnector::new()))
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.connector())
    }

    // ---- Connection ----

    /// Open the backend, or return the handle opened earlier.
    ///
    /// A failed open is not remembered; the next call tries again.
    pub async fn open(&self) -> StoreResult<Arc<dyn Backend>> {
        let backend = self
            .backend
            .get_or_try_init(|| async {
                let backend =
                    self.connector
                        .connect()
                        .await
                        .map_err(|source| StoreError::StorageUnavailable {
                            backend: self.connector.describe(),
                            source,
                        })?;
                info!(backend = %self.connector.describe(), "content store opened");
                Ok::<_, StoreError>(backend)
            })
            .await?;
        Ok(Arc::clone(backend))
    }

    pub fn is_open(&self) -> bool {
        self.backend.initialized()
    }

    /// The display handle cache.
    pub fn handles(&self) -> &HandleCache {
        &self.handles
    }

    // ---- Images ----

    /// Persist image bytes under a freshly generated key.
    pub async fn store_image(&self, bytes: impl Into<Bytes>) -> StoreResult<ImageKey> {
        let backend = self.open().await?;
        let bytes = bytes.into();
        let key = ImageKey::generate();
        let len = bytes.len();
        put(&*backend, Collection::Images, key.as_str(), bytes).await?;
        debug!(key = %key, len, "image stored");
        Ok(key)
    }

    /// A display handle for the blob under `key`, or `None` if nothing is
    /// stored there.
    ///
    /// Memoized: while the blob exists, repeated calls return the same live
    /// handle without touching the backend. A read that overlaps the blob's
    /// deletion returns `None` and caches nothing.
    pub async fn get_image_handle(&self, key: &ImageKey) -> StoreResult<Option<DisplayHandle>> {
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(handle) = self.handles.get(key) {
            return Ok(Some(handle));
        }
        let backend = self.open().await?;
        let ticket = self.handles.ticket(key);
        let Some(bytes) = get(&*backend, Collection::Images, key.as_str()).await? else {
            return Ok(None);
        };
        // `None` here means the blob was deleted while it was being read.
        Ok(self.handles.insert(key.clone(), bytes, ticket))
    }

    /// Keys of every stored blob, referenced or not.
    pub async fn image_keys(&self) -> StoreResult<Vec<ImageKey>> {
        let backend = self.open().await?;
        let keys = backend
            .keys(Collection::Images)
            .await
            .map_err(read_failed(Collection::Images, "*"))?;
        Ok(keys.into_iter().map(ImageKey::from).collect())
    }

    // ---- Hero slides ----

    /// Replace the hero carousel. Exactly five keys; duplicates allowed.
    pub async fn set_hero_slides(&self, keys: Vec<ImageKey>) -> StoreResult<()> {
        let slides = HeroSlides::try_from(keys)?;
        let backend = self.open().await?;
        put_json(&*backend, Collection::Settings, HERO_SLIDES_KEY, &slides).await?;
        debug!("hero slides replaced");
        Ok(())
    }

    /// The hero carousel, or `None` if never set. A stored value that is
    /// not exactly five keys is treated as absent.
    pub async fn get_hero_slides(&self) -> StoreResult<Option<HeroSlides>> {
        let backend = self.open().await?;
        let Some(raw) = get(&*backend, Collection::Settings, HERO_SLIDES_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<HeroSlides>(&raw) {
            Ok(slides) => Ok(Some(slides)),
            Err(e) => {
                debug!(error = %e, "ignoring malformed hero slides");
                Ok(None)
            }
        }
    }

    // ---- Gallery ----

    /// Put `keys` at the front of the gallery, in the given order.
    ///
    /// Empty input is a no-op. Not atomic against concurrent gallery writes.
    pub async fn add_gallery_images(&self, keys: Vec<ImageKey>) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let backend = self.open().await?;
        let existing = read_gallery(&*backend).await?;
        let added = keys.len();
        let mut updated = keys;
        updated.extend(existing);
        put_json(&*backend, Collection::Settings, GALLERY_KEY, &updated).await?;
        debug!(added, total = updated.len(), "gallery images added");
        Ok(())
    }

    /// The gallery, newest first. Empty when unset or malformed.
    pub async fn get_gallery_images(&self) -> StoreResult<Vec<ImageKey>> {
        let backend = self.open().await?;
        read_gallery(&*backend).await
    }

    /// Drop every occurrence of `keys` from the gallery, then delete the
    /// removed blobs that nothing else references.
    pub async fn remove_gallery_images(&self, keys: &[ImageKey]) -> StoreResult<CleanupReport> {
        if keys.is_empty() {
            return Ok(CleanupReport::new());
        }
        let backend = self.open().await?;
        let existing = read_gallery(&*backend).await?;
        let dropping: HashSet<&ImageKey> = keys.iter().collect();
        let kept: Vec<ImageKey> = existing
            .iter()
            .filter(|k| !dropping.contains(k))
            .cloned()
            .collect();
        let removed = removed_keys(&existing, &kept);
        if removed.is_empty() {
            return Ok(CleanupReport::new());
        }
        put_json(&*backend, Collection::Settings, GALLERY_KEY, &kept).await?;
        info!(removed = removed.len(), "gallery images removed");
        Ok(self.cleanup(removed).await)
    }

    // ---- Projects ----

    /// Create a project and return its generated id.
    pub async fn add_project(&self, new: NewProject) -> StoreResult<ProjectId> {
        new.validate()?;
        let backend = self.open().await?;
        let id = ProjectId::derive(&new.name);
        let project = Project::create(id.clone(), new, now_ms());
        put_json(&*backend, Collection::Projects, id.as_str(), &project).await?;
        info!(id = %id, images = project.image_keys.len(), "project added");
        Ok(id)
    }

    /// All projects, most recently updated first.
    pub async fn get_projects(&self) -> StoreResult<Vec<Project>> {
        let backend = self.open().await?;
        let mut projects = read_projects(&*backend).await?;
        projects.sort_by(Project::newest_first);
        Ok(projects)
    }

    pub async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        if id.is_empty() {
            return Ok(None);
        }
        let backend = self.open().await?;
        read_project(&*backend, id).await
    }

    /// Merge `patch` over the stored project and return the new record.
    ///
    /// The id never changes and `updated_at` is refreshed. The merged record
    /// must still satisfy every project invariant; otherwise nothing is
    /// written.
    pub async fn update_project(&self, id: &ProjectId, patch: ProjectPatch) -> StoreResult<Project> {
        let (_, updated) = self.apply_patch(id, &patch).await?;
        Ok(updated)
    }

    /// [`update_project`](Self::update_project), then delete the images the
    /// update dropped from the project if nothing else references them.
    pub async fn update_project_and_prune(
        &self,
        id: &ProjectId,
        patch: ProjectPatch,
    ) -> StoreResult<(Project, CleanupReport)> {
        let (previous, updated) = self.apply_patch(id, &patch).await?;
        let dropped = removed_keys(&previous.image_keys, &updated.image_keys);
        let report = self.cleanup(dropped).await;
        Ok((updated, report))
    }

    async fn apply_patch(&self, id: &ProjectId, patch: &ProjectPatch) -> StoreResult<(Project, Project)> {
        let backend = self.open().await?;
        let existing = read_project(&*backend, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let updated = patch.apply(&existing, now_ms());
        updated.validate()?;
        put_json(&*backend, Collection::Projects, id.as_str(), &updated).await?;
        debug!(id = %id, "project updated");
        Ok((existing, updated))
    }

    /// Delete a project, then try to delete each of its images.
    ///
    /// Image cleanup is best effort and per key: failures are logged and
    /// listed in the report, and never undo the project deletion.
    pub async fn delete_project(&self, id: &ProjectId) -> StoreResult<CleanupReport> {
        let backend = self.open().await?;
        let project = read_project(&*backend, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        backend
            .delete(Collection::Projects, id.as_str())
            .await
            .map_err(write_failed(Collection::Projects, id.as_str()))?;
        info!(id = %id, images = project.image_keys.len(), "project deleted");
        Ok(self.cleanup(project.image_keys).await)
    }

    // ---- Reference checking & garbage collection ----

    /// Build the reference index from the current hero slides, gallery and
    /// projects.
    pub async fn reference_index(&self) -> StoreResult<ReferenceIndex> {
        let hero = self.get_hero_slides().await?;
        let gallery = self.get_gallery_images().await?;
        let projects = self.get_projects().await?;
        Ok(ReferenceIndex::build(hero.as_ref(), &gallery, &projects))
    }

    /// Whether any hero slide, gallery entry or project references `key`.
    ///
    /// Scans fresh on every call. If the scan cannot complete the answer is
    /// `true`: a key we cannot prove unreferenced is kept.
    pub async fn is_image_key_referenced(&self, key: &ImageKey) -> bool {
        if key.is_empty() {
            return false;
        }
        match self.reference_index().await {
            Ok(index) => index.contains(key),
            Err(e) => {
                warn!(key = %key, error = %e, "reference check failed; treating image as referenced");
                true
            }
        }
    }

    /// Delete the blob under `key` unless something references it.
    ///
    /// A referenced key is left alone without error. Deleting also revokes
    /// any cached display handle for the key.
    pub async fn delete_image_if_unreferenced(&self, key: &ImageKey) -> StoreResult<Disposition> {
        if key.is_empty() {
            return Ok(Disposition::Absent);
        }
        if self.is_image_key_referenced(key).await {
            return Ok(Disposition::Retained);
        }
        let backend = self.open().await?;
        let existed = backend
            .delete(Collection::Images, key.as_str())
            .await
            .map_err(write_failed(Collection::Images, key.as_str()))?;
        self.handles.invalidate(key);
        debug!(key = %key, existed, "unreferenced image deleted");
        Ok(if existed {
            Disposition::Deleted
        } else {
            Disposition::Absent
        })
    }

    /// Delete every stored blob that nothing references.
    ///
    /// Candidates come from one index snapshot; each is re-checked by
    /// [`delete_image_if_unreferenced`](Self::delete_image_if_unreferenced)
    /// before it is removed. Aborts without deleting anything if the
    /// snapshot cannot be built.
    ///
    /// An image stored by [`store_image`](Self::store_image) but not yet
    /// attached to the hero slides, the gallery or a project is an orphan
    /// here. Do not run a sweep while uploads are in progress: the
    /// dashboard uploads first and saves the referencing record after.
    pub async fn collect_garbage(&self) -> StoreResult<CleanupReport> {
        let index = self.reference_index().await?;
        let stored = self.image_keys().await?;
        let mut report = CleanupReport::new();
        let mut orphans = Vec::new();
        for key in stored {
            if index.contains(&key) {
                report.record(key, Disposition::Retained);
            } else {
                orphans.push(key);
            }
        }
        info!(
            stored = report.retained.len() + orphans.len(),
            orphans = orphans.len(),
            "garbage collection started"
        );
        let swept = self.cleanup(orphans).await;
        report.deleted = swept.deleted;
        report.retained.extend(swept.retained);
        report.absent = swept.absent;
        report.failed = swept.failed;
        Ok(report)
    }

    /// Best-effort reference-checked deletion of each key, in order.
    async fn cleanup(&self, keys: Vec<ImageKey>) -> CleanupReport {
        let mut report = CleanupReport::new();
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.delete_image_if_unreferenced(&key).await {
                Ok(disposition) => report.record(key, disposition),
                Err(e) => {
                    warn!(key = %key, error = %e, "image cleanup failed; continuing");
                    report.record_failure(key, &e);
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("backend", &self.connector.describe())
            .field("open", &self.is_open())
            .field("handles", &self.handles)
            .finish()
    }
}

// ---- Backend helpers ----

fn read_failed(collection: Collection, key: &str) -> impl FnOnce(BackendError) -> StoreError {
    let key = key.to_string();
    move |source| StoreError::StorageReadFailed {
        collection,
        key,
        source,
    }
}

fn write_failed(collection: Collection, key: &str) -> impl FnOnce(BackendError) -> StoreError {
    let key = key.to_string();
    move |source| StoreError::StorageWriteFailed {
        collection,
        key,
        source,
    }
}

async fn get(backend: &dyn Backend, collection: Collection, key: &str) -> StoreResult<Option<Bytes>> {
    backend
        .get(collection, key)
        .await
        .map_err(read_failed(collection, key))
}

async fn put(backend: &dyn Backend, collection: Collection, key: &str, value: Bytes) -> StoreResult<()> {
    backend
        .put(collection, key, value)
        .await
        .map_err(write_failed(collection, key))
}

async fn put_json<T: Serialize + Sync>(
    backend: &dyn Backend,
    collection: Collection,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let encoded = serde_json::to_vec(value).map_err(|e| StoreError::StorageWriteFailed {
        collection,
        key: key.to_string(),
        source: BackendError::Corrupt {
            collection,
            key: key.to_string(),
            reason: e.to_string(),
        },
    })?;
    put(backend, collection, key, Bytes::from(encoded)).await
}

fn decode<T: DeserializeOwned>(collection: Collection, key: &str, raw: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(raw).map_err(|e| StoreError::StorageReadFailed {
        collection,
        key: key.to_string(),
        source: BackendError::Corrupt {
            collection,
            key: key.to_string(),
            reason: e.to_string(),
        },
    })
}

async fn read_gallery(backend: &dyn Backend) -> StoreResult<Vec<ImageKey>> {
    let Some(raw) = get(backend, Collection::Settings, GALLERY_KEY).await? else {
        return Ok(Vec::new());
    };
    match serde_json::from_slice::<Vec<ImageKey>>(&raw) {
        Ok(keys) => Ok(keys),
        Err(e) => {
            debug!(error = %e, "ignoring malformed gallery list");
            Ok(Vec::new())
        }
    }
}

async fn read_project(backend: &dyn Backend, id: &ProjectId) -> StoreResult<Option<Project>> {
    get(backend, Collection::Projects, id.as_str())
        .await?
        .map(|raw| decode(Collection::Projects, id.as_str(), &raw))
        .transpose()
}

async fn read_projects(backend: &dyn Backend) -> StoreResult<Vec<Project>> {
    let entries = backend
        .entries(Collection::Projects)
        .await
        .map_err(read_failed(Collection::Projects, "*"))?;
    entries
        .iter()
        .map(|(key, raw)| decode(Collection::Projects, key, raw))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use vitrine_backend::{BackendResult, FsConnector, InMemoryBackend};

    /// Backend wrapper with switchable failures.
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        fail_reads: AtomicBool,
        failing_deletes: Mutex<HashSet<String>>,
    }

    impl FlakyBackend {
        fn fail_reads(&self, on: bool) {
            self.fail_reads.store(on, Ordering::SeqCst);
        }

        fn fail_delete_of(&self, key: &ImageKey) {
            self.failing_deletes
                .lock()
                .unwrap()
                .insert(key.as_str().to_string());
        }

        fn read_guard(&self) -> BackendResult<()> {
            if self.fail_reads.load(Ordering::SeqCst) {
                Err(BackendError::Io(std::io::Error::other("injected read failure")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn get(&self, collection: Collection, key: &str) -> BackendResult<Option<Bytes>> {
            self.read_guard()?;
            self.inner.get(collection, key).await
        }

        async fn put(&self, collection: Collection, key: &str, value: Bytes) -> BackendResult<()> {
            self.inner.put(collection, key, value).await
        }

        async fn delete(&self, collection: Collection, key: &str) -> BackendResult<bool> {
            if self.failing_deletes.lock().unwrap().contains(key) {
                return Err(BackendError::Io(std::io::Error::other("injected delete failure")));
            }
            self.inner.delete(collection, key).await
        }

        async fn keys(&self, collection: Collection) -> BackendResult<Vec<String>> {
            self.read_guard()?;
            self.inner.keys(collection).await
        }
    }

    struct SharedConnector<B>(Arc<B>);

    #[async_trait]
    impl<B: Backend + 'static> Connector for SharedConnector<B> {
        async fn connect(&self) -> BackendResult<Arc<dyn Backend>> {
            Ok(self.0.clone() as Arc<dyn Backend>)
        }

        fn describe(&self) -> String {
            "shared".into()
        }
    }

    /// Refuses the first `failures` connects, then opens a memory backend.
    struct DeniedConnector {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for DeniedConnector {
        async fn connect(&self) -> BackendResult<Arc<dyn Backend>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(BackendError::Unavailable("persistent storage denied".into()))
            } else {
                Ok(Arc::new(InMemoryBackend::new()))
            }
        }

        fn describe(&self) -> String {
            "denied".into()
        }
    }

    fn flaky_store() -> (ContentStore, Arc<FlakyBackend>) {
        let backend = Arc::new(FlakyBackend::default());
        let store = ContentStore::new(Arc::new(SharedConnector(backend.clone())));
        (store, backend)
    }

    fn memory_store() -> (ContentStore, Arc<InMemoryBackend>) {
        let connector = InMemoryConnector::new();
        let backend = connector.backend();
        (ContentStore::new(Arc::new(connector)), backend)
    }

    fn k(s: &str) -> ImageKey {
        ImageKey::new(s)
    }

    async fn store_images(store: &ContentStore, n: usize) -> Vec<ImageKey> {
        let mut keys = Vec::with_capacity(n);
        for i in 0..n {
            keys.push(store.store_image(format!("image-{i}").into_bytes()).await.unwrap());
        }
        keys
    }

    async fn exists(store: &ContentStore, key: &ImageKey) -> bool {
        store.get_image_handle(key).await.unwrap().is_some()
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn open_is_idempotent() {
        let store = ContentStore::in_memory();
        assert!(!store.is_open());
        let a = store.open().await.unwrap();
        let b = store.open().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn denied_storage_is_unavailable_and_retried() {
        let store = ContentStore::new(Arc::new(DeniedConnector {
            failures: 1,
            attempts: AtomicUsize::new(0),
        }));

        let err = store.store_image(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
        assert!(!store.is_open());

        assert!(store.store_image(b"x".to_vec()).await.is_ok());
        assert!(store.is_open());
    }

    #[tokio::test]
    async fn filesystem_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let key;
        let id;
        {
            let store = ContentStore::new(Arc::new(FsConnector::new(dir.path())));
            key = store.store_image(b"jpeg".to_vec()).await.unwrap();
            store.add_gallery_images(vec![key.clone()]).await.unwrap();
            id = store
                .add_project(NewProject::new("Smyrna", 35.98, -86.51, vec![key.clone()]))
                .await
                .unwrap();
        }
        let store = ContentStore::new(Arc::new(FsConnector::new(dir.path())));
        assert_eq!(store.get_gallery_images().await.unwrap(), vec![key.clone()]);
        assert_eq!(store.get_project(&id).await.unwrap().unwrap().image_keys, vec![key.clone()]);
        let handle = store.get_image_handle(&key).await.unwrap().unwrap();
        assert_eq!(handle.bytes(), Some(Bytes::from_static(b"jpeg")));
    }

    #[tokio::test]
    async fn filesystem_store_accepts_long_project_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(Arc::new(FsConnector::new(dir.path())));
        let name = "Franklin Build ".repeat(9);
        assert!(name.len() > 130);

        let id = store
            .add_project(NewProject::new(name.trim(), 35.9, -86.8, vec![k("img_1")]))
            .await
            .unwrap();

        let project = store.get_project(&id).await.unwrap().unwrap();
        assert_eq!(project.name, name.trim());
        assert_eq!(store.get_projects().await.unwrap().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Images & display handles
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stored_image_resolves_to_handle() {
        let store = ContentStore::in_memory();
        let key = store.store_image(b"photo".to_vec()).await.unwrap();
        assert!(key.as_str().starts_with("img_"));

        let handle = store.get_image_handle(&key).await.unwrap().unwrap();
        assert_eq!(handle.key(), &key);
        assert_eq!(handle.bytes(), Some(Bytes::from_static(b"photo")));
    }

    #[tokio::test]
    async fn handles_are_memoized_without_backend_reads() {
        let (store, backend) = flaky_store();
        let key = store.store_image(b"photo".to_vec()).await.unwrap();
        let first = store.get_image_handle(&key).await.unwrap().unwrap();

        backend.fail_reads(true);
        let second = store.get_image_handle(&key).await.unwrap().unwrap();
        assert!(first.same_handle(&second));
    }

    #[tokio::test]
    async fn deletion_during_read_leaves_no_live_handle() {
        let store = ContentStore::in_memory();
        let key = store.store_image(b"photo".to_vec()).await.unwrap();

        // Interleave by hand: ticket, read, delete, then the read's insert.
        let ticket = store.handles().ticket(&key);
        let backend = store.open().await.unwrap();
        let bytes = backend
            .get(Collection::Images, key.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Deleted
        );
        assert!(store.handles().insert(key.clone(), bytes, ticket).is_none());

        assert!(store.get_image_handle(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_image_has_no_handle() {
        let store = ContentStore::in_memory();
        assert!(store.get_image_handle(&k("img_missing")).await.unwrap().is_none());
        assert!(store.get_image_handle(&k("")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handle_read_error_surfaces() {
        let (store, backend) = flaky_store();
        backend.fail_reads(true);
        let err = store.get_image_handle(&k("img_1")).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::StorageReadFailed {
                collection: Collection::Images,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn quota_rejection_is_write_failure() {
        let backend = Arc::new(InMemoryBackend::with_quota(4));
        let store = ContentStore::new(Arc::new(InMemoryConnector::with_backend(backend)));
        let err = store.store_image(vec![0u8; 16]).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::StorageWriteFailed {
                collection: Collection::Images,
                source: BackendError::QuotaExceeded { .. },
                ..
            }
        ));
        assert!(store.image_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn parallel_uploads_get_distinct_keys() {
        let store = Arc::new(ContentStore::in_memory());
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.store_image(vec![i as u8; 4]).await.unwrap() })
            })
            .collect();
        let mut keys = HashSet::new();
        for task in tasks {
            keys.insert(task.await.unwrap());
        }
        assert_eq!(keys.len(), 16);
        assert_eq!(store.image_keys().await.unwrap().len(), 16);
    }

    // -----------------------------------------------------------------------
    // Hero slides
    // -----------------------------------------------------------------------

    proptest! {
        #[test]
        fn hero_slides_round_trip(keys in proptest::collection::vec("[a-z0-9_]{1,12}", 5)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store = ContentStore::in_memory();
                let keys: Vec<ImageKey> = keys.into_iter().map(ImageKey::from).collect();
                store.set_hero_slides(keys.clone()).await.unwrap();
                let slides = store.get_hero_slides().await.unwrap().unwrap();
                assert_eq!(slides.keys(), keys.as_slice());
            });
        }

        #[test]
        fn wrong_slide_count_keeps_previous(n in (0usize..12).prop_filter("not five", |n| *n != 5)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let store = ContentStore::in_memory();
                let original: Vec<ImageKey> = (0..5).map(|i| ImageKey::new(format!("img_{i}"))).collect();
                store.set_hero_slides(original.clone()).await.unwrap();

                let attempt: Vec<ImageKey> = (0..n).map(|i| ImageKey::new(format!("new_{i}"))).collect();
                let err = store.set_hero_slides(attempt).await.unwrap_err();
                assert!(err.is_invalid_argument());

                let slides = store.get_hero_slides().await.unwrap().unwrap();
                assert_eq!(slides.keys(), original.as_slice());
            });
        }
    }

    #[tokio::test]
    async fn invalid_hero_slides_touch_no_storage() {
        let store = ContentStore::new(Arc::new(DeniedConnector {
            failures: usize::MAX,
            attempts: AtomicUsize::new(0),
        }));
        let err = store.set_hero_slides(vec![k("a")]).await.unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn hero_slides_absent_until_set() {
        let store = ContentStore::in_memory();
        assert!(store.get_hero_slides().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_hero_slides_read_as_absent() {
        let (store, backend) = memory_store();
        backend
            .put(Collection::Settings, HERO_SLIDES_KEY, Bytes::from_static(br#"["a","b"]"#))
            .await
            .unwrap();
        assert!(store.get_hero_slides().await.unwrap().is_none());

        backend
            .put(Collection::Settings, HERO_SLIDES_KEY, Bytes::from_static(b"not json"))
            .await
            .unwrap();
        assert!(store.get_hero_slides().await.unwrap().is_none());
    }

    // -----------------------------------------------------------------------
    // Gallery
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn gallery_prepends_newest_first() {
        let store = ContentStore::in_memory();
        assert!(store.get_gallery_images().await.unwrap().is_empty());

        store.add_gallery_images(vec![k("a"), k("b")]).await.unwrap();
        store.add_gallery_images(vec![k("c")]).await.unwrap();
        assert_eq!(store.get_gallery_images().await.unwrap(), vec![k("c"), k("a"), k("b")]);
    }

    #[tokio::test]
    async fn empty_gallery_add_is_noop() {
        let (store, backend) = memory_store();
        store.add_gallery_images(Vec::new()).await.unwrap();
        assert!(backend.get(Collection::Settings, GALLERY_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_gallery_reads_as_empty() {
        let (store, backend) = memory_store();
        backend
            .put(Collection::Settings, GALLERY_KEY, Bytes::from_static(br#"{"oops":1}"#))
            .await
            .unwrap();
        assert!(store.get_gallery_images().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_gallery_images_cleans_unreferenced() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 3).await;
        let (a, b, c) = (keys[0].clone(), keys[1].clone(), keys[2].clone());
        store.add_gallery_images(vec![a.clone(), b.clone()]).await.unwrap();
        store.add_gallery_images(vec![c.clone()]).await.unwrap();
        store
            .add_project(NewProject::new("Keeps B", 0.0, 0.0, vec![b.clone()]))
            .await
            .unwrap();

        let report = store.remove_gallery_images(&[a.clone(), b.clone()]).await.unwrap();

        assert_eq!(store.get_gallery_images().await.unwrap(), vec![c.clone()]);
        assert_eq!(report.deleted, vec![a.clone()]);
        assert_eq!(report.retained, vec![b.clone()]);
        assert!(!exists(&store, &a).await);
        assert!(exists(&store, &b).await);
    }

    #[tokio::test]
    async fn remove_middle_gallery_entry() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 3).await;
        let (a, b, c) = (keys[0].clone(), keys[1].clone(), keys[2].clone());
        store.add_gallery_images(vec![a.clone(), b.clone()]).await.unwrap();
        store.add_gallery_images(vec![c.clone()]).await.unwrap();

        let report = store.remove_gallery_images(&[a.clone()]).await.unwrap();

        assert_eq!(store.get_gallery_images().await.unwrap(), vec![c, b]);
        assert_eq!(report.deleted, vec![a.clone()]);
        assert!(!exists(&store, &a).await);
    }

    #[tokio::test]
    async fn removing_unknown_gallery_key_changes_nothing() {
        let store = ContentStore::in_memory();
        store.add_gallery_images(vec![k("a")]).await.unwrap();
        let report = store.remove_gallery_images(&[k("zzz")]).await.unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(store.get_gallery_images().await.unwrap(), vec![k("a")]);
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn add_project_scenario() {
        let store = ContentStore::in_memory();
        let id = store
            .add_project(NewProject::new("Franklin Build", 35.9251, -86.8689, vec![k("img_1")]))
            .await
            .unwrap();
        assert!(id.as_str().starts_with("franklin-build-"));

        let project = store.get_project(&id).await.unwrap().unwrap();
        assert_eq!(project.image_keys, vec![k("img_1")]);
        assert_eq!(project.created_at, project.updated_at);
        assert_eq!(project.name, "Franklin Build");

        let all = store.get_projects().await.unwrap();
        assert_eq!(all[0].id, id);
    }

    #[tokio::test]
    async fn add_project_validates_before_io() {
        let store = ContentStore::new(Arc::new(DeniedConnector {
            failures: usize::MAX,
            attempts: AtomicUsize::new(0),
        }));
        for bad in [
            NewProject::new("", 1.0, 1.0, vec![k("a")]),
            NewProject::new("x", f64::NAN, 1.0, vec![k("a")]),
            NewProject::new("x", 1.0, 1.0, Vec::new()),
        ] {
            let err = store.add_project(bad).await.unwrap_err();
            assert!(err.is_invalid_argument(), "{err}");
        }
    }

    #[tokio::test]
    async fn projects_sort_by_update_then_creation() {
        let (store, backend) = memory_store();
        let mut records = Vec::new();
        for (id, created, updated) in [("old", 1, 1), ("tie-a", 2, 50), ("tie-b", 9, 50), ("new", 3, 90), ("bare", 0, 0)] {
            let mut p = Project::create(
                ProjectId::new(id),
                NewProject::new(id, 0.0, 0.0, vec![k("img")]),
                0,
            );
            p.created_at = created;
            p.updated_at = updated;
            records.push(p);
        }
        for p in &records {
            backend
                .put(
                    Collection::Projects,
                    p.id.as_str(),
                    Bytes::from(serde_json::to_vec(p).unwrap()),
                )
                .await
                .unwrap();
        }
        // A record from an older build without timestamps.
        backend
            .put(
                Collection::Projects,
                "legacy",
                Bytes::from_static(br#"{"id":"legacy","name":"L","lat":0,"lng":0,"imageKeys":["x"]}"#),
            )
            .await
            .unwrap();

        let order: Vec<String> = store
            .get_projects()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.as_str().to_string())
            .collect();
        assert_eq!(&order[..4], &["new", "tie-b", "tie-a", "old"]);
        assert!(order[4..].contains(&"bare".to_string()));
        assert!(order[4..].contains(&"legacy".to_string()));
    }

    #[tokio::test]
    async fn get_project_missing_or_empty_id() {
        let store = ContentStore::in_memory();
        assert!(store.get_project(&ProjectId::new("nope")).await.unwrap().is_none());
        assert!(store.get_project(&ProjectId::new("")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_merges_and_keeps_id() {
        let store = ContentStore::in_memory();
        let id = store
            .add_project(NewProject::new("Antioch", 36.06, -86.67, vec![k("a")]))
            .await
            .unwrap();
        let before = store.get_project(&id).await.unwrap().unwrap();

        let updated = store
            .update_project(&id, ProjectPatch::new().name("Antioch, TN").image_keys(vec![k("a"), k("b")]))
            .await
            .unwrap();

        assert_eq!(updated.id, id);
        assert_eq!(updated.name, "Antioch, TN");
        assert_eq!(updated.lat, before.lat);
        assert_eq!(updated.created_at, before.created_at);
        assert!(updated.updated_at >= before.updated_at);
        assert_eq!(store.get_project(&id).await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn update_with_no_images_rejected_and_unchanged() {
        let store = ContentStore::in_memory();
        let id = store
            .add_project(NewProject::new("Nashville", 36.16, -86.78, vec![k("a"), k("b")]))
            .await
            .unwrap();
        let before = store.get_project(&id).await.unwrap().unwrap();

        let err = store
            .update_project(&id, ProjectPatch::new().image_keys(Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(store.get_project(&id).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn update_with_seven_images_rejected() {
        let store = ContentStore::in_memory();
        let id = store
            .add_project(NewProject::new("Murfreesboro", 35.84, -86.39, vec![k("a")]))
            .await
            .unwrap();
        let seven: Vec<ImageKey> = (0..7).map(|i| ImageKey::new(format!("img_{i}"))).collect();
        let err = store
            .update_project(&id, ProjectPatch::new().image_keys(seven))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(store.get_project(&id).await.unwrap().unwrap().image_keys, vec![k("a")]);
    }

    #[tokio::test]
    async fn update_rejects_blank_name_and_bad_coordinates() {
        let store = ContentStore::in_memory();
        let id = store
            .add_project(NewProject::new("Smyrna", 35.98, -86.51, vec![k("a")]))
            .await
            .unwrap();
        assert!(store
            .update_project(&id, ProjectPatch::new().name(""))
            .await
            .unwrap_err()
            .is_invalid_argument());
        assert!(store
            .update_project(&id, ProjectPatch::new().location(f64::INFINITY, 0.0))
            .await
            .unwrap_err()
            .is_invalid_argument());
    }

    #[tokio::test]
    async fn update_missing_project_is_not_found() {
        let store = ContentStore::in_memory();
        let err = store
            .update_project(&ProjectId::new("ghost-000000"), ProjectPatch::new().name("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_and_prune_deletes_dropped_images() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 3).await;
        let (a, b, c) = (keys[0].clone(), keys[1].clone(), keys[2].clone());
        store.add_gallery_images(vec![b.clone()]).await.unwrap();
        let id = store
            .add_project(NewProject::new("Edit Me", 1.0, 1.0, vec![a.clone(), b.clone(), c.clone()]))
            .await
            .unwrap();

        let (updated, report) = store
            .update_project_and_prune(&id, ProjectPatch::new().image_keys(vec![c.clone()]))
            .await
            .unwrap();

        assert_eq!(updated.image_keys, vec![c.clone()]);
        assert_eq!(report.deleted, vec![a.clone()]);
        assert_eq!(report.retained, vec![b.clone()]);
        assert!(!exists(&store, &a).await);
        assert!(exists(&store, &b).await);
        assert!(exists(&store, &c).await);
    }

    #[tokio::test]
    async fn rejected_update_prunes_nothing() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 1).await;
        let id = store
            .add_project(NewProject::new("Keep", 1.0, 1.0, keys.clone()))
            .await
            .unwrap();
        let err = store
            .update_project_and_prune(&id, ProjectPatch::new().image_keys(Vec::new()))
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(exists(&store, &keys[0]).await);
    }

    // -----------------------------------------------------------------------
    // Deletion & reference checks
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn delete_project_cascades_to_exclusive_images() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 5).await;
        let exclusive = keys[0].clone();
        let in_hero = keys[1].clone();
        let in_gallery = keys[2].clone();
        let in_other_project = keys[3].clone();

        store
            .set_hero_slides(vec![in_hero.clone(), keys[4].clone(), keys[4].clone(), keys[4].clone(), keys[4].clone()])
            .await
            .unwrap();
        store.add_gallery_images(vec![in_gallery.clone()]).await.unwrap();
        store
            .add_project(NewProject::new("Other", 0.0, 0.0, vec![in_other_project.clone()]))
            .await
            .unwrap();
        let id = store
            .add_project(NewProject::new(
                "Doomed",
                0.0,
                0.0,
                vec![exclusive.clone(), in_hero.clone(), in_gallery.clone(), in_other_project.clone()],
            ))
            .await
            .unwrap();

        // Warm the cache so revocation is observable.
        let stale = store.get_image_handle(&exclusive).await.unwrap().unwrap();

        let report = store.delete_project(&id).await.unwrap();

        assert!(store.get_project(&id).await.unwrap().is_none());
        assert_eq!(report.deleted, vec![exclusive.clone()]);
        assert_eq!(report.retained.len(), 3);
        assert!(report.is_complete());
        assert!(stale.is_revoked());
        assert!(store.get_image_handle(&exclusive).await.unwrap().is_none());
        for shared in [&in_hero, &in_gallery, &in_other_project] {
            assert!(exists(&store, shared).await);
        }
    }

    #[tokio::test]
    async fn delete_missing_project_is_not_found() {
        let store = ContentStore::in_memory();
        let err = store.delete_project(&ProjectId::new("ghost-000000")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn cascade_continues_past_failed_key() {
        let (store, backend) = flaky_store();
        let keys = store_images(&store, 3).await;
        let id = store
            .add_project(NewProject::new("Partial", 0.0, 0.0, keys.clone()))
            .await
            .unwrap();
        backend.fail_delete_of(&keys[1]);

        let report = store.delete_project(&id).await.unwrap();

        assert!(store.get_project(&id).await.unwrap().is_none());
        assert_eq!(report.deleted, vec![keys[0].clone(), keys[2].clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, keys[1]);
        assert!(!report.is_complete());
        assert!(exists(&store, &keys[1]).await);
    }

    #[tokio::test]
    async fn never_stored_key_is_unreferenced_noop() {
        let store = ContentStore::in_memory();
        let key = k("img_never");
        assert!(!store.is_image_key_referenced(&key).await);
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Absent
        );
    }

    #[tokio::test]
    async fn double_delete_is_idempotent() {
        let store = ContentStore::in_memory();
        let key = store.store_image(b"x".to_vec()).await.unwrap();
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Deleted
        );
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Absent
        );
    }

    #[tokio::test]
    async fn referenced_image_is_retained() {
        let store = ContentStore::in_memory();
        let key = store.store_image(b"x".to_vec()).await.unwrap();
        store.add_gallery_images(vec![key.clone()]).await.unwrap();

        assert!(store.is_image_key_referenced(&key).await);
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Retained
        );
        assert!(exists(&store, &key).await);
    }

    #[tokio::test]
    async fn reference_check_fails_safe_on_read_error() {
        let (store, backend) = flaky_store();
        let key = store.store_image(b"x".to_vec()).await.unwrap();
        backend.fail_reads(true);

        assert!(store.is_image_key_referenced(&key).await);
        assert_eq!(
            store.delete_image_if_unreferenced(&key).await.unwrap(),
            Disposition::Retained
        );

        backend.fail_reads(false);
        assert!(exists(&store, &key).await);
    }

    #[tokio::test]
    async fn corrupt_project_record_fails_safe() {
        let (store, backend) = memory_store();
        let key = store.store_image(b"x".to_vec()).await.unwrap();
        backend
            .put(Collection::Projects, "broken", Bytes::from_static(b"{"))
            .await
            .unwrap();

        assert!(matches!(
            store.get_projects().await.unwrap_err(),
            StoreError::StorageReadFailed {
                collection: Collection::Projects,
                ..
            }
        ));
        assert!(store.is_image_key_referenced(&key).await);
    }

    #[tokio::test]
    async fn reference_index_lists_referrers() {
        let store = ContentStore::in_memory();
        store.add_gallery_images(vec![k("shared")]).await.unwrap();
        let id = store
            .add_project(NewProject::new("P", 0.0, 0.0, vec![k("shared")]))
            .await
            .unwrap();

        let index = store.reference_index().await.unwrap();
        assert_eq!(
            index.referrers(&k("shared")),
            &[
                crate::references::Referrer::Gallery { position: 0 },
                crate::references::Referrer::Project { id },
            ]
        );
    }

    // -----------------------------------------------------------------------
    // Garbage collection
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn garbage_collection_sweeps_orphans_only() {
        let store = ContentStore::in_memory();
        let keys = store_images(&store, 4).await;
        store.add_gallery_images(vec![keys[0].clone()]).await.unwrap();
        store
            .add_project(NewProject::new("P", 0.0, 0.0, vec![keys[1].clone()]))
            .await
            .unwrap();

        let report = store.collect_garbage().await.unwrap();

        let mut deleted = report.deleted.clone();
        deleted.sort();
        let mut expected = vec![keys[2].clone(), keys[3].clone()];
        expected.sort();
        assert_eq!(deleted, expected);
        assert_eq!(report.retained.len(), 2);

        let mut remaining = store.image_keys().await.unwrap();
        remaining.sort();
        let mut live = vec![keys[0].clone(), keys[1].clone()];
        live.sort();
        assert_eq!(remaining, live);
    }

    #[tokio::test]
    async fn garbage_collection_sweeps_unattached_uploads() {
        let store = ContentStore::in_memory();
        let pending = store.store_image(b"uploaded, not saved yet".to_vec()).await.unwrap();

        let report = store.collect_garbage().await.unwrap();

        assert_eq!(report.deleted, vec![pending.clone()]);
        assert!(!exists(&store, &pending).await);
    }

    #[tokio::test]
    async fn garbage_collection_aborts_when_index_unreadable() {
        let (store, backend) = flaky_store();
        let key = store.store_image(b"x".to_vec()).await.unwrap();
        backend.fail_reads(true);

        assert!(store.collect_garbage().await.is_err());

        backend.fail_reads(false);
        assert!(exists(&store, &key).await);
    }
}
