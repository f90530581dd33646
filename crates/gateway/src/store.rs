//! Persistent Store — one JSON file per entity under a known
//! directory layout, written atomically (tmp file + rename onto the final
//! path, same directory/filesystem so the rename is atomic). The store
//! itself does no locking: at most one writer per entity is guaranteed by
//! the owning supervisor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pageindex_domain::error::{Error, Result};
use pageindex_domain::trace::TraceEvent;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A directory of JSON files, one per entity, keyed by an id extracted
/// from the filename stem. Generic over the entity type so the same
/// atomic-write/load-all/delete machinery backs both jobs and chat
/// sessions.
pub struct EntityStore {
    dir: PathBuf,
    /// Short name used only in trace events / error messages (`"job"`,
    /// `"chat session"`).
    kind: &'static str,
}

impl EntityStore {
    pub fn new(dir: PathBuf, kind: &'static str) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, kind })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomically persist `entity` under `id`. Writes to `<id>.json.tmp`
    /// in the same directory, then renames onto `<id>.json` — the
    /// partial file is never visible at the final path.
    pub fn save<T: Serialize>(&self, id: &str, entity: &T) -> Result<()> {
        let final_path = self.path_for(id);
        let tmp_path = self.dir.join(format!("{id}.json.tmp"));
        let json = serde_json::to_vec_pretty(entity)?;
        let result = std::fs::write(&tmp_path, &json).and_then(|_| std::fs::rename(&tmp_path, &final_path));
        if let Err(e) = &result {
            let _ = std::fs::remove_file(&tmp_path);
            TraceEvent::StoreSaveFailed {
                entity: self.kind,
                id: id.to_string(),
                error: e.to_string(),
            }
            .emit();
        }
        result.map_err(Error::Io)
    }

    /// Load every entity in the directory. `.tmp` files (a save that
    /// crashed mid-write) are ignored; a file that fails to parse is
    /// logged and skipped rather than failing the whole load.
    pub fn load_all<T: DeserializeOwned>(&self) -> Result<HashMap<String, T>> {
        let mut out = HashMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        for entry in entries {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue; // also skips `*.json.tmp`
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<T>(&raw) {
                    Ok(entity) => {
                        out.insert(stem.to_string(), entity);
                    }
                    Err(e) => tracing::warn!(
                        kind = self.kind,
                        path = %path.display(),
                        error = %e,
                        "failed to parse persisted entity, skipping"
                    ),
                },
                Err(e) => tracing::warn!(
                    kind = self.kind,
                    path = %path.display(),
                    error = %e,
                    "failed to read persisted entity, skipping"
                ),
            }
        }
        Ok(out)
    }

    /// Remove the entity's file. Returns `true` if a file was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// Group loaded chat sessions by their owning job, each group ordered by
/// `updated_at` descending. A pure grouping query over already-loaded
/// entities — it does not touch disk.
pub fn sessions_by_job(
    chats: &HashMap<String, pageindex_domain::chat::ChatSession>,
) -> HashMap<String, Vec<pageindex_domain::chat::ChatSession>> {
    let mut grouped: HashMap<String, Vec<pageindex_domain::chat::ChatSession>> = HashMap::new();
    for session in chats.values() {
        grouped.entry(session.job_id.clone()).or_default().push(session.clone());
    }
    for sessions in grouped.values_mut() {
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
    grouped
}

/// Directory layout root: `<root>/.pageindex-web/{jobs,chats,uploads}`.
pub struct Store {
    pub jobs: EntityStore,
    pub chats: EntityStore,
    uploads_dir: PathBuf,
}

impl Store {
    pub fn new(root: &Path) -> Result<Self> {
        let base = root.join(".pageindex-web");
        let uploads_dir = base.join("uploads");
        std::fs::create_dir_all(&uploads_dir)?;
        Ok(Self {
            jobs: EntityStore::new(base.join("jobs"), "job")?,
            chats: EntityStore::new(base.join("chats"), "chat session")?,
            uploads_dir,
        })
    }

    /// Path an uploaded file for `job_id` should be streamed to. `safe_name`
    /// is expected to already be sanitised by the caller (job creation).
    pub fn upload_path(&self, job_id: &str, safe_name: &str) -> PathBuf {
        self.uploads_dir.join(format!("{job_id}_{safe_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[test]
    fn save_then_load_all_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path().to_path_buf(), "widget").unwrap();
        let w = Widget { name: "gear".into(), count: 3 };
        store.save("abc123", &w).unwrap();

        let all: HashMap<String, Widget> = store.load_all().unwrap();
        assert_eq!(all.get("abc123"), Some(&w));

        // No .tmp file left behind.
        let tmp = dir.path().join("abc123.json.tmp");
        assert!(!tmp.exists());
    }

    #[test]
    fn load_all_ignores_tmp_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stale.json.tmp"), b"{not json").unwrap();
        let store = EntityStore::new(dir.path().to_path_buf(), "widget").unwrap();
        let all: HashMap<String, Widget> = store.load_all().unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn delete_reports_whether_a_file_existed() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path().to_path_buf(), "widget").unwrap();
        store.save("x", &Widget { name: "a".into(), count: 1 }).unwrap();
        assert!(store.delete("x").unwrap());
        assert!(!store.delete("x").unwrap());
    }

    #[test]
    fn save_overwrites_existing_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path().to_path_buf(), "widget").unwrap();
        store.save("x", &Widget { name: "a".into(), count: 1 }).unwrap();
        store.save("x", &Widget { name: "b".into(), count: 2 }).unwrap();
        let all: HashMap<String, Widget> = store.load_all().unwrap();
        assert_eq!(all.get("x"), Some(&Widget { name: "b".into(), count: 2 }));
    }
}
