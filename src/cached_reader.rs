//! The [CachedReader] is a path-keyed cache of decoded file contents, built
//! on the [crate::ComputationCache] and therefore on the [ObjectPool].
//!
//! Reads resolve the path against a configurable search path, hand the file
//! to an external [ReaderFactory], optionally post-process the decoded
//! object, and publish the result through the pool.  A failed read is
//! remembered as a negative entry: later reads of the same path replay the
//! recorded error immediately instead of re-attempting expensive I/O, until
//! the entry is cleared or overwritten by [CachedReader::insert].
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use ahash::RandomState;
use relative_path::RelativePath;
use tracing::debug;

use crate::computation_cache::ComputationCache;
use crate::content_hash::ContentHash;
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::object_pool::{default_object_pool, ObjectPool};
use crate::post_process::{PostProcess, PostProcessWorker};

/// Produces a decoder for a resolved file, typically dispatching on the
/// extension.  `None` means no reader understands this file.
pub trait ReaderFactory: Send + Sync + 'static {
    fn create(&self, path: &Path) -> Option<Box<dyn ObjectReader>>;
}

/// Decodes one file into an object.
pub trait ObjectReader {
    fn read(
        &mut self,
    ) -> std::result::Result<ObjectRef, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, derive_builder::Builder)]
pub struct CachedReaderConfig {
    /// Roots that relative paths are resolved against, in order.
    #[builder(default)]
    pub search_paths: Vec<PathBuf>,
    /// Bound on the number of tracked path entries; this is an index bound,
    /// the byte budget belongs to the pool.
    #[builder(default = "10_000")]
    pub max_computations: usize,
}

/// Everything a read needs outside the caches; shared with the computation
/// cache's compute closure.
struct ReadPipeline {
    factory: Box<dyn ReaderFactory>,
    search_paths: RwLock<Vec<PathBuf>>,
    post_process: Option<PostProcessWorker>,
}

impl ReadPipeline {
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let direct = Path::new(path);
        if direct.is_absolute() {
            if direct.is_file() {
                return Some(direct.to_path_buf());
            }
            return None;
        }
        let relative = RelativePath::new(path);
        for root in self.search_paths.read().unwrap().iter() {
            let candidate = relative.to_logical_path(root);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn read_uncached(&self, path: &str) -> Result<ObjectRef> {
        let resolved = self.resolve(path).ok_or_else(|| Error::FileNotFound {
            path: path.to_string(),
        })?;
        let mut reader =
            self.factory
                .create(&resolved)
                .ok_or_else(|| Error::NoReaderAvailable {
                    path: path.to_string(),
                })?;
        let object = reader.read().map_err(|e| Error::DecodeFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        match &self.post_process {
            Some(worker) => worker
                .apply(object)
                .map_err(|reason| Error::PostProcessFailed {
                    path: path.to_string(),
                    reason,
                }),
            None => Ok(object),
        }
    }
}

pub struct CachedReader {
    pipeline: Arc<ReadPipeline>,
    cache: ComputationCache<String>,
    negative: Mutex<HashMap<String, Error, RandomState>>,
}

impl CachedReader {
    pub fn new(
        config: CachedReaderConfig,
        factory: Box<dyn ReaderFactory>,
        pool: Arc<ObjectPool>,
        post_process: Option<Box<dyn PostProcess>>,
    ) -> CachedReader {
        let pipeline = Arc::new(ReadPipeline {
            factory,
            search_paths: RwLock::new(config.search_paths),
            post_process: post_process.map(PostProcessWorker::spawn),
        });
        let compute_pipeline = pipeline.clone();
        let cache = ComputationCache::new(
            Box::new(|path: &String, hash: &mut ContentHash| hash.append_str(path)),
            Box::new(move |path: &String| compute_pipeline.read_uncached(path)),
            pool,
            config.max_computations,
        );
        CachedReader {
            pipeline,
            cache,
            negative: Mutex::new(Default::default()),
        }
    }

    /// A reader over `paths` using the default object pool and no
    /// post-processing.
    pub fn with_search_paths(paths: Vec<PathBuf>, factory: Box<dyn ReaderFactory>) -> CachedReader {
        let config = CachedReaderConfigBuilder::default()
            .search_paths(paths)
            .build()
            .expect("config builder has defaults for every other field");
        CachedReader::new(config, factory, default_object_pool(), None)
    }

    /// Read and decode `path`, from cache when possible.  A previously
    /// failed path replays the recorded error without touching the
    /// filesystem.
    pub fn read(&self, path: &str) -> Result<ObjectRef> {
        if let Some(error) = self.negative.lock().unwrap().get(path) {
            return Err(error.clone());
        }
        match self.cache.get(&path.to_string()) {
            Ok(object) => Ok(object),
            Err(error) => {
                debug!(path, error = %error, "recording negative cache entry");
                self.negative
                    .lock()
                    .unwrap()
                    .insert(path.to_string(), error.clone());
                Err(error)
            }
        }
    }

    /// Force-publish an already-decoded object under `path`, overriding any
    /// cached or negative entry.
    pub fn insert(&self, path: &str, object: ObjectRef) -> ObjectRef {
        self.negative.lock().unwrap().remove(path);
        self.cache.set(&path.to_string(), object)
    }

    /// True only if a successful decode of `path` is currently retrievable.
    /// Never triggers a decode.
    pub fn cached(&self, path: &str) -> bool {
        if self.negative.lock().unwrap().contains_key(path) {
            return false;
        }
        self.cache.contains(&path.to_string())
    }

    /// Drop every cached result, negative entries included.
    pub fn clear(&self) {
        self.cache.clear();
        self.negative.lock().unwrap().clear();
    }

    /// Drop the entry for one path, negative or not.
    pub fn clear_path(&self, path: &str) {
        self.cache.erase(&path.to_string());
        self.negative.lock().unwrap().remove(path);
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.pipeline.search_paths.read().unwrap().clone()
    }

    /// Replace the search path.  Cached results may resolve differently under
    /// the new roots, so everything is invalidated.
    pub fn set_search_paths(&self, paths: Vec<PathBuf>) {
        debug!(?paths, "replacing search path and clearing the cache");
        *self.pipeline.search_paths.write().unwrap() = paths;
        self.clear();
    }

    /// The pool decoded objects are published through.
    pub fn object_pool(&self) -> Arc<ObjectPool> {
        self.cache.object_pool()
    }
}

/// Split a colon-separated search path string.
fn parse_search_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// The process-wide default reader, created on first use with the search
/// path from `CACHEDREADER_PATHS` and the default object pool.  The factory
/// argument only matters on the first call.
pub fn default_cached_reader(factory: Box<dyn ReaderFactory>) -> Arc<CachedReader> {
    static DEFAULT: OnceLock<Arc<CachedReader>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            let paths = std::env::var("CACHEDREADER_PATHS")
                .map(|raw| parse_search_paths(&raw))
                .unwrap_or_default();
            debug!(?paths, "initializing default cached reader");
            Arc::new(CachedReader::with_search_paths(paths, factory))
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::object::memory_usage;
    use crate::object_pool::StoreMode;
    use crate::types::{IntData, StringData};

    /// Decodes `.txt` files to [StringData]; counts factory calls so tests
    /// can prove when I/O was skipped.
    struct TextFactory {
        calls: Arc<AtomicUsize>,
    }

    struct TextReader {
        path: PathBuf,
    }

    impl ReaderFactory for TextFactory {
        fn create(&self, path: &Path) -> Option<Box<dyn ObjectReader>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.extension().map_or(false, |e| e == "txt") {
                Some(Box::new(TextReader {
                    path: path.to_path_buf(),
                }))
            } else {
                None
            }
        }
    }

    impl ObjectReader for TextReader {
        fn read(
            &mut self,
        ) -> std::result::Result<ObjectRef, Box<dyn std::error::Error + Send + Sync>> {
            let contents = fs::read_to_string(&self.path)?;
            if contents.contains("poison") {
                return Err("poisoned file".into());
            }
            Ok(Arc::new(StringData::new(contents)))
        }
    }

    fn reader_over(
        dir: &Path,
        pool: Arc<ObjectPool>,
        post: Option<Box<dyn PostProcess>>,
    ) -> (CachedReader, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CachedReaderConfigBuilder::default()
            .search_paths(vec![dir.to_path_buf()])
            .build()
            .unwrap();
        let reader = CachedReader::new(
            config,
            Box::new(TextFactory {
                calls: calls.clone(),
            }),
            pool,
            post,
        );
        (reader, calls)
    }

    #[test]
    fn reads_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let pool = Arc::new(ObjectPool::new(1 << 20));
        let (reader, calls) = reader_over(dir.path(), pool.clone(), None);

        let first = reader.read("a.txt").unwrap();
        assert!(first.is_equal_to(&StringData::new("alpha")));
        assert!(reader.cached("a.txt"));
        // The pool accounts for exactly this object.
        assert_eq!(pool.memory_usage(), memory_usage(&first) as u64);

        let second = reader.read("a.txt").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_file_is_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, calls) = reader_over(dir.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        let first = reader.read("missing.txt").unwrap_err();
        assert_eq!(
            first,
            Error::FileNotFound {
                path: "missing.txt".to_string()
            }
        );
        // Resolution failed before the factory, and the replay must not
        // touch the factory either.
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let second = reader.read("missing.txt").unwrap_err();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!reader.cached("missing.txt"));
    }

    #[test]
    fn unrecognized_extension_is_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("scene.bin"), "data").unwrap();
        let (reader, calls) = reader_over(dir.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        let err = reader.read("scene.bin").unwrap_err();
        assert_eq!(
            err,
            Error::NoReaderAvailable {
                path: "scene.bin".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Replay, no second factory call.
        let again = reader.read("scene.bin").unwrap_err();
        assert_eq!(err, again);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn decode_failure_is_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.txt"), "poison").unwrap();
        let (reader, calls) = reader_over(dir.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        let err = reader.read("bad.txt").unwrap_err();
        assert!(matches!(err, Error::DecodeFailed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let again = reader.read("bad.txt").unwrap_err();
        assert_eq!(err, again);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_path_allows_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, _) = reader_over(dir.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        reader.read("late.txt").unwrap_err();
        // The file shows up after the failure; a plain read still replays.
        fs::write(dir.path().join("late.txt"), "better late").unwrap();
        reader.read("late.txt").unwrap_err();

        reader.clear_path("late.txt");
        let object = reader.read("late.txt").unwrap();
        assert!(object.is_equal_to(&StringData::new("better late")));
    }

    #[test]
    fn insert_overrides_negative_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, calls) = reader_over(dir.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        reader.read("virtual.txt").unwrap_err();
        let object = Arc::new(StringData::new("from elsewhere")) as ObjectRef;
        reader.insert("virtual.txt", object.clone());

        assert!(reader.cached("virtual.txt"));
        let got = reader.read("virtual.txt").unwrap();
        assert!(Arc::ptr_eq(&object, &got));
        // No decode happened for the inserted path.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_search_path_invalidates() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        fs::write(dir_a.path().join("x.txt"), "from a").unwrap();
        fs::write(dir_b.path().join("x.txt"), "from b").unwrap();
        let (reader, calls) = reader_over(dir_a.path(), Arc::new(ObjectPool::new(1 << 20)), None);

        let a = reader.read("x.txt").unwrap();
        assert!(a.is_equal_to(&StringData::new("from a")));
        assert!(reader.cached("x.txt"));

        reader.set_search_paths(vec![dir_b.path().to_path_buf()]);
        assert!(!reader.cached("x.txt"));
        let b = reader.read("x.txt").unwrap();
        assert!(b.is_equal_to(&StringData::new("from b")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reader.search_paths(), vec![dir_b.path().to_path_buf()]);
    }

    #[test]
    fn first_search_path_match_wins() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        fs::write(dir_b.path().join("only_b.txt"), "b only").unwrap();
        fs::write(dir_a.path().join("both.txt"), "a wins").unwrap();
        fs::write(dir_b.path().join("both.txt"), "b loses").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let config = CachedReaderConfigBuilder::default()
            .search_paths(vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()])
            .build()
            .unwrap();
        let reader = CachedReader::new(
            config,
            Box::new(TextFactory {
                calls: calls.clone(),
            }),
            Arc::new(ObjectPool::new(1 << 20)),
            None,
        );

        assert!(reader
            .read("both.txt")
            .unwrap()
            .is_equal_to(&StringData::new("a wins")));
        assert!(reader
            .read("only_b.txt")
            .unwrap()
            .is_equal_to(&StringData::new("b only")));
    }

    #[test]
    fn shared_pool_dedups_across_readers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("common.txt"), "same bytes").unwrap();
        let pool = Arc::new(ObjectPool::new(1 << 20));
        let (reader_a, _) = reader_over(dir.path(), pool.clone(), None);
        let (reader_b, _) = reader_over(dir.path(), pool.clone(), None);

        let a = reader_a.read("common.txt").unwrap();
        let b = reader_b.read("common.txt").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn eviction_makes_cached_false_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("e.txt"), "evict me").unwrap();
        let pool = Arc::new(ObjectPool::new(1 << 20));
        let (reader, calls) = reader_over(dir.path(), pool.clone(), None);

        reader.read("e.txt").unwrap();
        assert!(reader.cached("e.txt"));
        pool.clear();
        assert!(!reader.cached("e.txt"));

        // The index hint is stale; the reader transparently decodes again.
        let again = reader.read("e.txt").unwrap();
        assert!(again.is_equal_to(&StringData::new("evict me")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    struct Exclaim;

    impl PostProcess for Exclaim {
        fn apply(
            &mut self,
            object: ObjectRef,
        ) -> std::result::Result<ObjectRef, Box<dyn std::error::Error + Send + Sync>> {
            let text = object
                .as_any()
                .downcast_ref::<StringData>()
                .ok_or("expected StringData")?;
            if text.value.is_empty() {
                return Err("refusing to process empty files".into());
            }
            Ok(Arc::new(StringData::new(format!("{}!", text.value))))
        }
    }

    #[test]
    fn post_process_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("p.txt"), "loud").unwrap();
        let (reader, _) = reader_over(
            dir.path(),
            Arc::new(ObjectPool::new(1 << 20)),
            Some(Box::new(Exclaim)),
        );
        let object = reader.read("p.txt").unwrap();
        assert!(object.is_equal_to(&StringData::new("loud!")));
    }

    #[test]
    fn post_process_failure_is_negatively_cached() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        let (reader, calls) = reader_over(
            dir.path(),
            Arc::new(ObjectPool::new(1 << 20)),
            Some(Box::new(Exclaim)),
        );

        let err = reader.read("empty.txt").unwrap_err();
        assert!(matches!(err, Error::PostProcessFailed { .. }));
        let again = reader.read("empty.txt").unwrap_err();
        assert_eq!(err, again);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insert_participates_in_content_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(ObjectPool::new(1 << 20));
        let (reader, _) = reader_over(dir.path(), pool.clone(), None);

        let pooled = pool.store(
            Arc::new(IntData::new(11)) as ObjectRef,
            StoreMode::Reference,
        );
        // Inserting equal content returns the already-pooled instance.
        let inserted = reader.insert("alias.txt", Arc::new(IntData::new(11)));
        assert!(Arc::ptr_eq(&pooled, &inserted));
        assert_eq!(pool.len(), 1);
    }
}
