//! Document store boundary: keyed JSON documents grouped in collections.
//!
//! Two implementations ship with the crate:
//! * [`MemoryStore`] for tests and store-less local runs (supports fault injection),
//! * [`FileStore`] which keeps one JSON file per document under a root directory.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transient: network down, disk missing, backend not reachable.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// Configuration problem that needs operator action (access rules, file modes).
    #[error("document store permission denied: {0}")]
    PermissionDenied(String),
    #[error("corrupt document {collection}/{id}: {reason}")]
    Corrupt {
        collection: String,
        id: String,
        reason: String,
    },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;
    /// Overwrite (or create) a document.
    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;
    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError>;
    /// All documents whose top-level string `field` equals `value`.
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError>;
    fn name(&self) -> &'static str;
}

fn field_matches(doc: &Value, field: &str, value: &str) -> bool {
    doc.get(field).and_then(Value::as_str) == Some(value)
}

// ------------------------------------------------------------
// In-memory store
// ------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    collections: HashMap<String, BTreeMap<String, Value>>,
    fault: Option<StoreError>,
    writes: usize,
}

/// Process-local store. `fail_with` makes every call return the given error
/// until `heal` is called.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, err: StoreError) {
        self.lock().fault = Some(err);
    }

    pub fn heal(&self) {
        self.lock().fault = None;
    }

    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn check(inner: &MemoryInner) -> Result<(), StoreError> {
        match &inner.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let g = self.lock();
        Self::check(&g)?;
        Ok(g.collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let mut g = self.lock();
        Self::check(&g)?;
        g.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        g.writes += 1;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let g = self.lock();
        Self::check(&g)?;
        Ok(g
            .collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let g = self.lock();
        Self::check(&g)?;
        Ok(g
            .collections
            .get(collection)
            .map(|c| {
                c.values()
                    .filter(|doc| field_matches(doc, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

// ------------------------------------------------------------
// File-backed store
// ------------------------------------------------------------

/// `<root>/<collection>/<encoded id>.json`, written atomically via tmp + rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(encode_id(collection))
    }

    fn doc_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection)
            .join(format!("{}.json", encode_id(id)))
    }

    async fn read_doc(&self, collection: &str, path: &Path) -> Result<Option<Value>, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io(e, path)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                collection: collection.to_string(),
                id: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let dir = self.collection_dir(collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e, &dir)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(e, &dir))? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut docs = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read_doc(collection, &path).await {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(StoreError::Corrupt { id, reason, .. }) => {
                    tracing::warn!(target: "store", path = %id, %reason, "skipping corrupt document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.doc_path(collection, id);
        self.read_doc(collection, &path).await
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let dir = self.collection_dir(collection);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| map_io(e, &dir))?;

        let path = self.doc_path(collection, id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&doc).map_err(|e| StoreError::Corrupt {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| map_io(e, &tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| map_io(e, &path))?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        self.read_all(collection).await
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .read_all(collection)
            .await?
            .into_iter()
            .filter(|doc| field_matches(doc, field, value))
            .collect())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn map_io(e: io::Error, path: &Path) -> StoreError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            StoreError::PermissionDenied(format!("{}: {e}", path.display()))
        }
        _ => StoreError::Unavailable(format!("{}: {e}", path.display())),
    }
}

/// File-name safe, injective encoding: ASCII alphanumerics and `-` pass through,
/// everything else becomes `_<hex>_`.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for ch in id.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch);
        } else {
            out.push_str(&format!("_{:x}_", ch as u32));
        }
    }
    out
}
