//! Artifact store
//!
//! Export artifacts kept in a local directory so they can be listed and
//! imported later. JSON artifacts can be gzip-compressed on write.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;

use super::document::{parse_artifact, parse_artifact_date, Artifact};
use super::Snapshot;
use crate::error::{Error, Result};

/// A stored artifact
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    /// File name
    pub name: String,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Export date from the file name, falling back to the file's mtime
    pub created_at: DateTime<Utc>,
    pub compressed: bool,
}

/// Directory-backed artifact store
pub struct ArtifactStore {
    dir: PathBuf,
    compress: bool,
}

impl ArtifactStore {
    /// Open a store, creating the directory if it doesn't exist
    pub fn new(dir: impl Into<PathBuf>, compress: bool) -> Result<Self> {
        let dir = dir.into();

        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| {
                Error::Artifact(format!(
                    "Failed to create export directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            info!("Created export directory: {}", dir.display());
        }

        Ok(Self { dir, compress })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an artifact. Returns the stored file's info.
    ///
    /// An existing file of the same name is never overwritten; a numeric
    /// suffix is added instead (`..._2024-01-05-2.json`).
    pub fn write(&self, artifact: &Artifact) -> Result<ArtifactInfo> {
        let compress = self.compress && artifact.file_name.ends_with(".json");
        let base = if compress {
            format!("{}.gz", artifact.file_name)
        } else {
            artifact.file_name.clone()
        };
        let path = self.free_path(&base);

        // Write beside the target, then rename into place
        let tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            if compress {
                let mut encoder = GzEncoder::new(writer, Compression::default());
                encoder.write_all(&artifact.bytes)?;
                encoder.finish()?.flush()?;
            } else {
                writer.write_all(&artifact.bytes)?;
                writer.flush()?;
            }
        }
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        info!("Stored export: {}", path.display());
        self.info(&path)
    }

    /// Read and parse a stored artifact by file name
    pub fn read(&self, name: &str) -> Result<Snapshot> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(Error::Artifact(format!("Export not found: {}", path.display())));
        }
        let bytes = fs::read(&path)?;
        parse_artifact(&bytes, name)
    }

    /// List stored artifacts, newest first
    pub fn list(&self) -> Result<Vec<ArtifactInfo>> {
        let mut artifacts = Vec::new();

        if !self.dir.exists() {
            return Ok(artifacts);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_export = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| parse_artifact_date(n).is_some());
            if is_export && path.is_file() {
                artifacts.push(self.info(&path)?);
            }
        }

        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        Ok(artifacts)
    }

    /// Delete a stored artifact
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(Error::Artifact(format!("Export not found: {}", path.display())));
        }
        fs::remove_file(&path)?;
        info!("Deleted export: {}", path.display());
        Ok(())
    }

    fn info(&self, path: &Path) -> Result<ArtifactInfo> {
        let metadata = fs::metadata(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let modified: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);
        // Same-day exports sort by mtime within the day
        let created_at = match (parse_artifact_date(&name), modified) {
            (Some(date), Some(m)) if m.date_naive() == date => m,
            (Some(date), _) => date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(Utc::now),
            (None, Some(m)) => m,
            (None, None) => Utc::now(),
        };

        Ok(ArtifactInfo {
            compressed: name.ends_with(".gz"),
            name,
            path: path.to_path_buf(),
            size: metadata.len(),
            created_at,
        })
    }

    fn free_path(&self, file_name: &str) -> PathBuf {
        let candidate = self.dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let (stem, ext) = split_extension(file_name);
        (2..)
            .map(|n| self.dir.join(format!("{}-{}{}", stem, n, ext)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

/// Split `name.json.gz` into (`name`, `.json.gz`)
fn split_extension(file_name: &str) -> (&str, &str) {
    for ext in [".json.gz", ".json", ".csv", ".xlsx"] {
        if let Some(stem) = file_name.strip_suffix(ext) {
            return (stem, &file_name[stem.len()..]);
        }
    }
    (file_name, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::snapshot::{serialize_on, ExportFormat, SnapshotMode};
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup_test_store(compress: bool) -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("exports"), compress).unwrap();
        (dir, store)
    }

    fn artifact(day: u32) -> Artifact {
        let snapshot = Snapshot::new().with(
            EntityType::Bank,
            vec![json!({"id": 1, "name": "Alpha"}).as_object().cloned().unwrap()],
            SnapshotMode::Raw,
        );
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        serialize_on(&snapshot, ExportFormat::Json, date).unwrap()
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = TempDir::new().unwrap();
        let exports = dir.path().join("nested").join("exports");
        ArtifactStore::new(&exports, false).unwrap();
        assert!(exports.exists());
    }

    #[test]
    fn test_write_and_read_back() {
        let (_dir, store) = setup_test_store(false);
        let info = store.write(&artifact(5)).unwrap();
        assert_eq!(info.name, "ledgerline_export_raw_2024-01-05.json");
        assert!(!info.compressed);

        let snapshot = store.read(&info.name).unwrap();
        assert_eq!(snapshot.records(EntityType::Bank)[0]["name"], json!("Alpha"));
    }

    #[test]
    fn test_compressed_write() {
        let (_dir, store) = setup_test_store(true);
        let info = store.write(&artifact(5)).unwrap();
        assert_eq!(info.name, "ledgerline_export_raw_2024-01-05.json.gz");
        assert!(info.compressed);
        assert!(store.read(&info.name).is_ok());
    }

    #[test]
    fn test_same_day_gets_suffix() {
        let (_dir, store) = setup_test_store(false);
        store.write(&artifact(5)).unwrap();
        let second = store.write(&artifact(5)).unwrap();
        assert_eq!(second.name, "ledgerline_export_raw_2024-01-05-2.json");
        assert!(store.read(&second.name).is_ok());
    }

    #[test]
    fn test_list_newest_first() {
        let (_dir, store) = setup_test_store(false);
        store.write(&artifact(3)).unwrap();
        store.write(&artifact(9)).unwrap();
        fs::write(store.dir().join("notes.txt"), "ignore me").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "ledgerline_export_raw_2024-01-09.json");
        assert!(listed[0].size > 0);
    }

    #[test]
    fn test_delete_and_missing() {
        let (_dir, store) = setup_test_store(false);
        let info = store.write(&artifact(5)).unwrap();
        store.delete(&info.name).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(store.delete(&info.name).is_err());
        assert!(matches!(store.read(&info.name), Err(Error::Artifact(_))));
    }
}
