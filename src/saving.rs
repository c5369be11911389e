//! Upload persistence
//!
//! [`UploadStore`] is the seam between the pipeline and whatever keeps the
//! decoded datasets. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a concurrent map, lost on restart
//! - [`DiskStore`]: one gzip-compressed bincode file per upload
//!
//! Ids are random v4 UUIDs. An id that has been deleted is retired and is
//! never handed out again by the same store.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bincode::{deserialize_from, serialize_into};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dataset::Dataset;

const UPLOAD_EXTENSION: &str = "bin.gz";
const RETIRED_EXTENSION: &str = "deleted";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn generate() -> Self {
        UploadId(Uuid::new_v4())
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for UploadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(UploadId)
    }
}

/// A stored upload and the dataset decoded from it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub owner_id: String,
    pub source_name: String,
    pub created_at: DateTime<Utc>,
    pub dataset: Dataset,
}

/// Listing entry; carries no rows
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    #[serde(rename = "uploadId")]
    pub id: UploadId,
    #[serde(rename = "userId")]
    pub owner_id: String,
    #[serde(rename = "filename")]
    pub source_name: String,
    #[serde(rename = "uploadDate")]
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub headers: Vec<String>,
}

impl From<&Upload> for UploadSummary {
    fn from(upload: &Upload) -> Self {
        UploadSummary {
            id: upload.id,
            owner_id: upload.owner_id.clone(),
            source_name: upload.source_name.clone(),
            created_at: upload.created_at,
            row_count: upload.dataset.row_count(),
            headers: upload.dataset.columns().to_vec(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Upload {0} not found")]
    NotFound(UploadId),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt upload record: {0}")]
    Codec(#[from] bincode::Error),
}

pub trait UploadStore: Send + Sync {
    /// Persist a dataset under a fresh id
    fn put(&self, owner_id: &str, source_name: &str, dataset: Dataset)
    -> Result<UploadId, StoreError>;

    fn get(&self, id: UploadId) -> Result<Arc<Upload>, StoreError>;

    /// Remove an upload; deleting it again reports [`StoreError::NotFound`]
    fn delete(&self, id: UploadId) -> Result<(), StoreError>;

    /// Uploads of one owner, or of everyone when `owner_id` is `None`,
    /// newest first
    fn list(&self, owner_id: Option<&str>) -> Result<Vec<UploadSummary>, StoreError>;
}

fn new_upload(id: UploadId, owner_id: &str, source_name: &str, dataset: Dataset) -> Upload {
    Upload {
        id,
        owner_id: owner_id.to_string(),
        source_name: source_name.to_string(),
        created_at: Utc::now(),
        dataset,
    }
}

fn newest_first(mut summaries: Vec<UploadSummary>) -> Vec<UploadSummary> {
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
    summaries
}

#[derive(Default)]
pub struct MemoryStore {
    uploads: DashMap<UploadId, Arc<Upload>>,
    retired: DashSet<UploadId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadStore for MemoryStore {
    fn put(
        &self,
        owner_id: &str,
        source_name: &str,
        dataset: Dataset,
    ) -> Result<UploadId, StoreError> {
        loop {
            let id = UploadId::generate();
            if self.retired.contains(&id) {
                continue;
            }

            if let Entry::Vacant(slot) = self.uploads.entry(id) {
                slot.insert(Arc::new(new_upload(id, owner_id, source_name, dataset)));
                debug!(%id, owner_id, "Stored upload in memory");
                return Ok(id);
            }
        }
    }

    fn get(&self, id: UploadId) -> Result<Arc<Upload>, StoreError> {
        self.uploads
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn delete(&self, id: UploadId) -> Result<(), StoreError> {
        match self.uploads.remove(&id) {
            Some(_) => {
                self.retired.insert(id);
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    fn list(&self, owner_id: Option<&str>) -> Result<Vec<UploadSummary>, StoreError> {
        let summaries = self
            .uploads
            .iter()
            .filter(|entry| owner_id.is_none_or(|owner| entry.owner_id == owner))
            .map(|entry| UploadSummary::from(entry.value().as_ref()))
            .collect();

        Ok(newest_first(summaries))
    }
}

/// Uploads kept as `<root>/<id>.bin.gz`
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(DiskStore { root })
    }

    fn upload_path(&self, id: UploadId) -> PathBuf {
        self.root.join(format!("{id}.{UPLOAD_EXTENSION}"))
    }

    fn retired_path(&self, id: UploadId) -> PathBuf {
        self.root.join(format!("{id}.{RETIRED_EXTENSION}"))
    }

    fn write(&self, upload: &Upload) -> Result<(), StoreError> {
        // Write beside the target and rename so readers never see half a file
        let temp = NamedTempFile::new_in(&self.root)?;
        {
            let encoder = GzEncoder::new(temp.as_file(), Compression::default());
            let mut writer = BufWriter::new(encoder);
            serialize_into(&mut writer, upload)?;
            writer
                .into_inner()
                .map_err(|e| e.into_error())?
                .finish()?;
        }
        temp.as_file().sync_all()?;

        temp.persist_noclobber(self.upload_path(upload.id))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Upload, StoreError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(GzDecoder::new(file));
        Ok(deserialize_from(&mut reader)?)
    }
}

impl UploadStore for DiskStore {
    fn put(
        &self,
        owner_id: &str,
        source_name: &str,
        dataset: Dataset,
    ) -> Result<UploadId, StoreError> {
        let mut id = UploadId::generate();
        while self.upload_path(id).exists() || self.retired_path(id).exists() {
            id = UploadId::generate();
        }

        let upload = new_upload(id, owner_id, source_name, dataset);
        self.write(&upload)?;
        debug!(%id, owner_id, path = %self.upload_path(id).display(), "Stored upload on disk");

        Ok(id)
    }

    fn get(&self, id: UploadId) -> Result<Arc<Upload>, StoreError> {
        match self.read(&self.upload_path(id)) {
            Ok(upload) => Ok(Arc::new(upload)),
            Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(id))
            }
            Err(e) => Err(e),
        }
    }

    fn delete(&self, id: UploadId) -> Result<(), StoreError> {
        match fs::remove_file(self.upload_path(id)) {
            Ok(()) => {
                File::create(self.retired_path(id))?;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, owner_id: Option<&str>) -> Result<Vec<UploadSummary>, StoreError> {
        let mut summaries = Vec::new();
        let suffix = format!(".{UPLOAD_EXTENSION}");

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_upload = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix));
            if !is_upload {
                continue;
            }

            match self.read(&path) {
                Ok(upload) => {
                    if owner_id.is_none_or(|owner| upload.owner_id == owner) {
                        summaries.push(UploadSummary::from(&upload));
                    }
                }
                // Deleted between read_dir and open
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Skipping unreadable upload: {e}"),
            }
        }

        Ok(newest_first(summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellValue;
    use std::thread;

    fn sample() -> Dataset {
        Dataset::new(
            vec!["Month".into(), "Sales".into()],
            vec![
                vec![CellValue::Text("Jan".into()), CellValue::Int(100)],
                vec![CellValue::Text("Feb".into()), CellValue::Float(150.5)],
            ],
        )
    }

    fn exercise(store: &dyn UploadStore) {
        let id = store.put("alice", "sales.xlsx", sample()).unwrap();

        let upload = store.get(id).unwrap();
        assert_eq!(upload.id, id);
        assert_eq!(upload.owner_id, "alice");
        assert_eq!(upload.source_name, "sales.xlsx");
        assert_eq!(upload.dataset, sample());

        store.delete(id).unwrap();
        assert!(matches!(store.get(id), Err(StoreError::NotFound(missing)) if missing == id));
        assert!(matches!(store.delete(id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_memory_round_trip_and_delete() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_disk_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&DiskStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = DiskStore::open(dir.path())
            .unwrap()
            .put("bob", "a.xls", sample())
            .unwrap();

        let reopened = DiskStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(id).unwrap().dataset, sample());
    }

    #[test]
    fn test_disk_store_retires_deleted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let id = store.put("bob", "a.xlsx", sample()).unwrap();
        store.delete(id).unwrap();

        assert!(store.retired_path(id).exists());
        assert!(!store.upload_path(id).exists());
    }

    #[test]
    fn test_list_filters_by_owner() {
        let store = MemoryStore::new();
        store.put("alice", "a.xlsx", sample()).unwrap();
        store.put("alice", "b.xlsx", sample()).unwrap();
        store.put("bob", "c.xlsx", sample()).unwrap();

        let mine = store.list(Some("alice")).unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|s| s.owner_id == "alice" && s.row_count == 2));
        assert_eq!(store.list(None).unwrap().len(), 3);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        let id = UploadId::generate();
        assert!(matches!(store.get(id), Err(StoreError::NotFound(_))));
        assert!(matches!(MemoryStore::new().get(id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_concurrent_puts_get_distinct_ids() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || store.put(&format!("user{i}"), "x.xlsx", sample()).unwrap())
            })
            .collect();

        let mut ids: Vec<UploadId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn test_upload_id_parses_its_display() {
        let id = UploadId::generate();
        assert_eq!(id.to_string().parse::<UploadId>().unwrap(), id);
        assert!("not-a-uuid".parse::<UploadId>().is_err());
    }
}
