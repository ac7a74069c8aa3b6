//! Filesystem store for uploaded sources and watermarked outputs.
//!
//! Every file lives directly in one directory and is addressed by its bare
//! file name. Identifiers that could escape the directory (path separators,
//! a bare `..`) are treated as unknown files rather than as errors of their own, so
//! callers never learn anything about paths outside the store.

use crate::config::WatermarkConfig;
use crate::error::WatermarkError;
use crate::pipeline::document::OUTPUT_PREFIX;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// `watermarked-<digits>-<original name>`
static OUTPUT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^watermarked-\d+-(.+)$").unwrap());

/// One entry of [`UploadStore::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    /// Last modification time, Unix milliseconds.
    pub modified: u64,
    pub is_watermarked: bool,
}

/// A directory of PDFs.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_file_size: u64,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }

    pub fn from_config(config: &WatermarkConfig) -> Self {
        Self::new(&config.upload_dir, config.max_file_size)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, WatermarkError> {
        let escapes = id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\', '\0']);
        if escapes {
            debug!("Rejected store identifier {:?}", id);
            return Err(WatermarkError::NotFound { id: id.to_string() });
        }
        Ok(self.root.join(id))
    }

    fn storage_err(path: &Path, id: &str, source: std::io::Error) -> WatermarkError {
        if source.kind() == std::io::ErrorKind::NotFound {
            WatermarkError::NotFound { id: id.to_string() }
        } else {
            WatermarkError::Storage {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// The bytes stored under `id`.
    pub async fn read(&self, id: &str) -> Result<Vec<u8>, WatermarkError> {
        let path = self.path_for(id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Self::storage_err(&path, id, e))?;
        debug!("Read {} bytes from {}", bytes.len(), path.display());
        Ok(bytes)
    }

    /// PDFs and watermarked outputs, newest first. A missing directory is
    /// an empty store.
    pub async fn list(&self) -> Result<Vec<StoredFile>, WatermarkError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WatermarkError::Storage {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut files = Vec::new();
        let io_err = |source: std::io::Error| WatermarkError::Storage {
            path: self.root.clone(),
            source,
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_watermarked = name.starts_with(OUTPUT_PREFIX);
            if !(name.ends_with(".pdf") || is_watermarked) {
                continue;
            }
            let meta = entry.metadata().await.map_err(io_err)?;
            if !meta.is_file() {
                continue;
            }
            files.push(StoredFile {
                name,
                size: meta.len(),
                modified: meta.modified().map(unix_millis).unwrap_or_default(),
                is_watermarked,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
        Ok(files)
    }

    /// Copy a local PDF into the store.
    ///
    /// Only `.pdf` files (any case) up to the size limit are accepted. If the
    /// name is taken, the copy is stored as `<stem>_<unix-millis><ext>`.
    pub async fn import(&self, source: &Path) -> Result<StoredFile, WatermarkError> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WatermarkError::Rejected {
                reason: format!("'{}' has no usable file name", source.display()),
            })?;
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(WatermarkError::Rejected {
                reason: format!("only PDF files can be uploaded, got '.{ext}'"),
            });
        }

        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| Self::storage_err(source, name, e))?;
        if meta.len() > self.max_file_size {
            return Err(WatermarkError::Rejected {
                reason: format!(
                    "file is {} bytes, the limit is {} bytes",
                    meta.len(),
                    self.max_file_size
                ),
            });
        }

        let mut stored_name = name.to_string();
        if tokio::fs::try_exists(self.path_for(&stored_name)?)
            .await
            .unwrap_or(false)
        {
            stored_name = timestamped_name(name, unix_millis(SystemTime::now()));
        }

        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| Self::storage_err(source, name, e))?;
        let size = bytes.len() as u64;
        self.write(&stored_name, &bytes).await?;
        info!("Imported {} as '{}'", source.display(), stored_name);

        Ok(StoredFile {
            name: stored_name,
            size,
            modified: unix_millis(SystemTime::now()),
            is_watermarked: false,
        })
    }

    /// Store `bytes` under `id`, replacing any previous file atomically.
    ///
    /// The bytes go to a temporary file in the same directory which is then
    /// renamed over the target, so readers never see a partial file.
    pub async fn write(&self, id: &str, bytes: &[u8]) -> Result<(), WatermarkError> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| WatermarkError::Storage {
                path: self.root.clone(),
                source: e,
            })?;

        let storage = |source: std::io::Error| WatermarkError::Storage {
            path: path.clone(),
            source,
        };
        let tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(storage)?;
        let mut file = tokio::fs::File::from_std(tmp.as_file().try_clone().map_err(storage)?);
        file.write_all(bytes).await.map_err(storage)?;
        file.sync_all().await.map_err(storage)?;
        drop(file);
        tmp.persist(&path).map_err(|e| storage(e.error))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), WatermarkError> {
        let path = self.path_for(id)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Self::storage_err(&path, id, e))?;
        info!("Deleted '{}'", id);
        Ok(())
    }
}

/// A friendlier name for a stored file: `watermarked-<ts>-report.pdf`
/// becomes `reportWM.pdf`. Other names are returned unchanged.
pub fn display_name(id: &str) -> String {
    let Some(original) = OUTPUT_NAME.captures(id).and_then(|c| c.get(1)) else {
        return id.to_string();
    };
    let original = original.as_str();
    match original.rfind('.') {
        Some(dot) if dot > 0 => format!("{}WM{}", &original[..dot], &original[dot..]),
        _ => format!("{original}WM"),
    }
}

fn timestamped_name(name: &str, millis: u64) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{}{}", &name[..dot], millis, &name[dot..]),
        _ => format!("{name}_{millis}"),
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> UploadStore {
        UploadStore::new(dir.path(), 1024)
    }

    #[test]
    fn display_names() {
        assert_eq!(display_name("watermarked-1712345678901-report.pdf"), "reportWM.pdf");
        assert_eq!(display_name("watermarked-1-a.b.pdf"), "a.bWM.pdf");
        assert_eq!(display_name("watermarked-42-README"), "READMEWM");
        assert_eq!(display_name("watermarked-42-.hidden"), ".hiddenWM");
        assert_eq!(display_name("watermarked-x-report.pdf"), "watermarked-x-report.pdf");
        assert_eq!(display_name("plain.pdf"), "plain.pdf");
    }

    #[test]
    fn timestamped_names() {
        assert_eq!(timestamped_name("report.pdf", 99), "report_99.pdf");
        assert_eq!(timestamped_name("noext", 99), "noext_99");
    }

    #[tokio::test]
    async fn write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.write("a.pdf", b"%PDF-1.4 first").await.unwrap();
        store.write("a.pdf", b"%PDF-1.4 second").await.unwrap();
        assert_eq!(store.read("a.pdf").await.unwrap(), b"%PDF-1.4 second");

        store.delete("a.pdf").await.unwrap();
        assert!(store.read("a.pdf").await.unwrap_err().is_not_found());
        assert!(store.delete("a.pdf").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn escaping_identifiers_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        for id in ["../secret.pdf", "sub/a.pdf", "..", ".", "", "a\\b.pdf"] {
            assert!(store.read(id).await.unwrap_err().is_not_found(), "{id:?}");
        }
    }

    #[tokio::test]
    async fn double_dots_inside_a_name_are_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.write("v1..final.pdf", b"%PDF-1.4").await.unwrap();
        assert_eq!(store.read("v1..final.pdf").await.unwrap(), b"%PDF-1.4");
        assert!(dir.path().join("v1..final.pdf").exists());
        store.delete("v1..final.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_and_flags_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.write("source.pdf", b"x").await.unwrap();
        store
            .write("watermarked-5-source.pdf", b"yy")
            .await
            .unwrap();
        store.write("notes.txt", b"z").await.unwrap();

        let files = store.list().await.unwrap();
        let mut names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["source.pdf", "watermarked-5-source.pdf"]);
        let output = files.iter().find(|f| f.is_watermarked).unwrap();
        assert_eq!(output.size, 2);

        for pair in files.windows(2) {
            assert!(pair[0].modified >= pair[1].modified);
        }
    }

    #[tokio::test]
    async fn list_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("nope"), 1024);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_renames_on_collision() {
        let src_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("Report.PDF");
        tokio::fs::write(&source, b"%PDF-1.4").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let first = store.import(&source).await.unwrap();
        assert_eq!(first.name, "Report.PDF");
        let second = store.import(&source).await.unwrap();
        assert!(second.name.starts_with("Report_") && second.name.ends_with(".PDF"));
        assert_eq!(store.read(&second.name).await.unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn import_rejects_wrong_type_and_size() {
        let src_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let txt = src_dir.path().join("notes.txt");
        tokio::fs::write(&txt, b"hello").await.unwrap();
        assert!(matches!(
            store.import(&txt).await,
            Err(WatermarkError::Rejected { .. })
        ));

        let big = src_dir.path().join("big.pdf");
        tokio::fs::write(&big, vec![0u8; 2048]).await.unwrap();
        assert!(matches!(
            store.import(&big).await,
            Err(WatermarkError::Rejected { .. })
        ));
    }
}
