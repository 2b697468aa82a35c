use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, ErrorKind};
use crate::template::CompiledTemplate;

#[cfg(test)]
use similar_asserts::assert_eq;

/// The default number of loader backed templates kept in memory.
const DEFAULT_CACHE_CAPACITY: usize = 400;

/// The source of a template as returned by a [`Loader`].
pub struct TemplateSource {
    /// The template source code.
    pub source: String,
    /// An optional file name for diagnostics.
    pub filename: Option<String>,
    /// An optional probe invoked on cache hits.  When it returns `false`
    /// the cached compiled template is thrown away and recompiled.
    pub uptodate: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl TemplateSource {
    /// Creates a new template source without metadata.
    pub fn new<S: Into<String>>(source: S) -> TemplateSource {
        TemplateSource {
            source: source.into(),
            filename: None,
            uptodate: None,
        }
    }

    /// Attaches a file name.
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> TemplateSource {
        self.filename = Some(filename.into());
        self
    }

    /// Attaches an uptodate probe.
    pub fn with_uptodate<F: Fn() -> bool + Send + Sync + 'static>(
        mut self,
        probe: F,
    ) -> TemplateSource {
        self.uptodate = Some(Box::new(probe));
        self
    }
}

/// A trait for dynamically loading template sources.
///
/// The engine only ever asks a loader for a source by name; everything
/// else (compiling, caching, invalidation) is handled by the
/// environment.  Returning `Ok(None)` signals that the template does not
/// exist which the environment turns into a "template not found" error.
///
/// The trait is implemented for plain functions so the common case stays
/// as simple as with a closure:
///
/// ```
/// # use torii::Environment;
/// let mut env = Environment::new();
/// env.set_loader(|name: &str| {
///     if name == "layout.html" {
///         Ok(Some("...".to_string()))
///     } else {
///         Ok(None)
///     }
/// });
/// ```
pub trait Loader: Send + Sync {
    /// Loads the source for the template of the given name.
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>, Error>;

    /// Enumerates the known template names if the loader supports it.
    fn list_templates(&self) -> Vec<String> {
        Vec::new()
    }
}

impl<F> Loader for F
where
    F: for<'a> Fn(&'a str) -> Result<Option<String>, Error> + Send + Sync,
{
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>, Error> {
        Ok(ok!(self(name)).map(TemplateSource::new))
    }
}

fn safe_join(base: &Path, template: &str) -> Option<PathBuf> {
    let mut rv = base.to_path_buf();
    for segment in template.split('/') {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }
        rv.push(segment);
    }
    Some(rv)
}

struct PathLoader {
    dir: PathBuf,
}

impl Loader for PathLoader {
    fn get_source(&self, name: &str) -> Result<Option<TemplateSource>, Error> {
        let path = match safe_join(&self.dir, name) {
            Some(path) => path,
            None => return Ok(None),
        };
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(
                    Error::new(ErrorKind::InvalidOperation, "could not read template")
                        .with_source(err),
                )
            }
        };
        let mtime = fs::metadata(&path).and_then(|x| x.modified()).ok();
        let probe_path = path.clone();
        Ok(Some(
            TemplateSource::new(source)
                .with_filename(path.display().to_string())
                .with_uptodate(move || {
                    fs::metadata(&probe_path).and_then(|x| x.modified()).ok() == mtime
                }),
        ))
    }

    fn list_templates(&self) -> Vec<String> {
        fn walk(dir: &Path, prefix: &str, rv: &mut Vec<String>) {
            let iter = match fs::read_dir(dir) {
                Ok(iter) => iter,
                Err(_) => return,
            };
            for entry in iter.flatten() {
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                if name.starts_with('.') {
                    continue;
                }
                let full = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, &full, rv);
                } else {
                    rv.push(full);
                }
            }
        }
        let mut rv = Vec::new();
        walk(&self.dir, "", &mut rv);
        rv.sort();
        rv
    }
}

/// Helper to load templates from a given directory.
///
/// This creates a dynamic loader which looks up templates in the given
/// directory.  Templates that start with a dot (`.`) or are contained in a
/// folder starting with a dot cannot be loaded.  The loader attaches an
/// mtime based uptodate probe so that changed files are recompiled.
///
/// # Example
///
/// ```rust
/// # use torii::{path_loader, Environment};
/// fn create_env() -> Environment {
///     let mut env = Environment::new();
///     env.set_loader(path_loader("path/to/templates"));
///     env
/// }
/// ```
pub fn path_loader<P: AsRef<Path>>(dir: P) -> impl Loader + 'static {
    PathLoader {
        dir: dir.as_ref().to_path_buf(),
    }
}

struct CacheEntry {
    template: Arc<CompiledTemplate>,
    uptodate: Option<Box<dyn Fn() -> bool + Send + Sync>>,
    last_used: u64,
}

struct LruCacheInner {
    entries: HashMap<Arc<str>, CacheEntry>,
    clock: u64,
}

/// A bounded least-recently-used cache for compiled templates.
///
/// Lookups bump the entry's recency; when the capacity is exceeded the
/// least recently used entry is evicted.  `setdefault` is atomic at entry
/// granularity: two renders racing for the same missing key both compile
/// but only one result is stored and both receive the stored one.
pub(crate) struct LruCache {
    inner: Mutex<LruCacheInner>,
    capacity: usize,
}

impl LruCache {
    pub fn new(capacity: usize) -> LruCache {
        LruCache {
            inner: Mutex::new(LruCacheInner {
                entries: HashMap::new(),
                clock: 0,
            }),
            capacity,
        }
    }

    /// Looks up a template, dropping entries whose uptodate probe fails.
    pub fn get(&self, name: &str) -> Option<Arc<CompiledTemplate>> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        let stale = match inner.entries.get_mut(name) {
            Some(entry) => {
                if entry.uptodate.as_ref().map_or(true, |probe| probe()) {
                    entry.last_used = clock;
                    return Some(entry.template.clone());
                }
                true
            }
            None => false,
        };
        if stale {
            inner.entries.remove(name);
        }
        None
    }

    /// Inserts an entry unless one was stored concurrently, returning the
    /// entry that ended up in the cache.
    pub fn setdefault(
        &self,
        name: Arc<str>,
        template: Arc<CompiledTemplate>,
        uptodate: Option<Box<dyn Fn() -> bool + Send + Sync>>,
    ) -> Arc<CompiledTemplate> {
        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        if let Some(existing) = inner.entries.get_mut(&name) {
            existing.last_used = clock;
            return existing.template.clone();
        }
        inner.entries.insert(
            name,
            CacheEntry {
                template: template.clone(),
                uptodate,
                last_used: clock,
            },
        );
        if inner.entries.len() > self.capacity {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                inner.entries.remove(&lru_key);
            }
        }
        template
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

/// Holds the templates of an environment.
///
/// Explicitly added templates are compiled eagerly and never evicted; the
/// loader backed ones live in a bounded [`LruCache`] and are re-validated
/// against their uptodate probe on every lookup.
pub(crate) struct TemplateStore {
    pub loader: Option<Arc<dyn Loader>>,
    pub explicit: BTreeMap<Arc<str>, Arc<CompiledTemplate>>,
    pub cache: LruCache,
}

impl Default for TemplateStore {
    fn default() -> TemplateStore {
        TemplateStore {
            loader: None,
            explicit: BTreeMap::new(),
            cache: LruCache::new(DEFAULT_CACHE_CAPACITY),
        }
    }
}

impl Clone for TemplateStore {
    fn clone(&self) -> TemplateStore {
        // the loader backed cache is repopulated lazily on the clone
        TemplateStore {
            loader: self.loader.clone(),
            explicit: self.explicit.clone(),
            cache: LruCache::new(self.cache.capacity),
        }
    }
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.explicit.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_safe_join() {
        assert_eq!(
            safe_join(Path::new("foo"), "bar/baz"),
            Some(PathBuf::from("foo").join("bar").join("baz"))
        );
        assert_eq!(safe_join(Path::new("foo"), ".bar/baz"), None);
        assert_eq!(safe_join(Path::new("foo"), "bar/.baz"), None);
        assert_eq!(safe_join(Path::new("foo"), "bar/../baz"), None);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = LruCache::new(2);
        let t = CompiledTemplate::new(
            "x",
            "x",
            Default::default(),
            Default::default(),
        )
        .unwrap();
        cache.setdefault("a".into(), t.clone(), None);
        cache.setdefault("b".into(), t.clone(), None);
        assert!(cache.get("a").is_some());
        cache.setdefault("c".into(), t.clone(), None);
        assert_eq!(cache.len(), 2);
        // "b" was the least recently used entry
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_uptodate_invalidation() {
        use std::sync::atomic::{AtomicBool, Ordering};
        static FRESH: AtomicBool = AtomicBool::new(true);
        let cache = LruCache::new(4);
        let t = CompiledTemplate::new(
            "x",
            "x",
            Default::default(),
            Default::default(),
        )
        .unwrap();
        cache.setdefault(
            "a".into(),
            t,
            Some(Box::new(|| FRESH.load(Ordering::SeqCst))),
        );
        assert!(cache.get("a").is_some());
        FRESH.store(false, Ordering::SeqCst);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 0);
    }
}
