//! Point-in-time snapshots of the whole store, written atomically (temp file then
//! rename). Document bodies are kept as JSON bytes inside the bincode envelope since
//! bincode cannot decode self-describing values.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::catalog::{Catalog, Collection, StoredDoc};
use super::document::Document;
use super::error::StoreResult;
use super::Store;

const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE: &str = "snapshot.bin";

#[derive(Serialize, Deserialize)]
struct SnapDoc { id: String, version: u64, body: Vec<u8> }
#[derive(Serialize, Deserialize)]
struct SnapCollection { name: String, docs: Vec<SnapDoc> }
#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_ms: i64, commits: u64, collections: Vec<SnapCollection> }

pub(crate) fn snapshot_path(dir: &Path) -> PathBuf { dir.join(SNAPSHOT_FILE) }

impl Store {
    /// Write a snapshot into the store's data directory. No-op for in-memory stores.
    pub fn save_snapshot(&self) -> StoreResult<()> {
        let Some(dir) = self.data_dir.as_deref() else { return Ok(()) };
        std::fs::create_dir_all(dir)?;
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
        let snap = {
            let catalog = self.inner.read();
            let mut collections = Vec::with_capacity(catalog.collections.len());
            for (name, coll) in catalog.collections.iter() {
                let mut docs = Vec::with_capacity(coll.docs.len());
                for (id, d) in coll.docs.iter() {
                    docs.push(SnapDoc { id: id.clone(), version: d.version, body: serde_json::to_vec(&d.body)? });
                }
                collections.push(SnapCollection { name: name.clone(), docs });
            }
            Snapshot { version: SNAPSHOT_VERSION, created_ms: now_ms, commits: catalog.commits, collections }
        };
        let bytes = bincode::serialize(&snap)?;
        let path = snapshot_path(dir);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, &path)?;
        debug!(target: "accountd::storage", path = %path.display(), commits = snap.commits, "snapshot written");
        Ok(())
    }
}

/// Read a snapshot into a fresh catalog. Indexes are rebuilt when collections are
/// declared via `Store::ensure_collection`.
pub(crate) fn load_snapshot(dir: &Path) -> StoreResult<Option<Catalog>> {
    let path = snapshot_path(dir);
    if !path.exists() { return Ok(None); }
    let bytes = std::fs::read(&path)?;
    let snap: Snapshot = bincode::deserialize(&bytes)?;
    let mut catalog = Catalog { commits: snap.commits, ..Catalog::default() };
    let mut total = 0usize;
    for c in snap.collections {
        let mut coll = Collection::default();
        for d in c.docs {
            let body: Document = serde_json::from_slice(&d.body)?;
            coll.docs.insert(d.id, StoredDoc { version: d.version, body });
            total += 1;
        }
        catalog.collections.insert(c.name, coll);
    }
    info!(target: "accountd::storage", path = %path.display(), documents = total, format_version = snap.version, "snapshot loaded");
    Ok(Some(catalog))
}
