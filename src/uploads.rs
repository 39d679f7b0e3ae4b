//! Staged ("draft") uploads: files a user has sent but not yet attached.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub filename: String,
}

pub trait StagedUploads: Send + Sync {
    /// Most recently staged file of a draft area, if any.
    fn latest(&self, user: i64, draft: Uuid) -> io::Result<Option<StagedFile>>;
}

/// Draft areas stored as `<root>/<user>/<draft>/<filename>`.
#[derive(Debug, Clone)]
pub struct FsDraftArea {
    root: PathBuf,
}

impl FsDraftArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn area(&self, user: i64, draft: Uuid) -> PathBuf {
        self.root.join(user.to_string()).join(draft.to_string())
    }

    /// Stores `bytes` under a sanitized `filename` in the given draft area.
    pub fn stage(&self, user: i64, draft: Uuid, filename: &str, bytes: &[u8]) -> io::Result<StagedFile> {
        let filename = sanitize_filename(filename);
        let dir = self.area(user, draft);
        fs::create_dir_all(&dir)?;
        let path = dir.join(&filename);
        fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "staged upload");
        Ok(StagedFile { path, filename })
    }
}

impl StagedUploads for FsDraftArea {
    fn latest(&self, user: i64, draft: Uuid) -> io::Result<Option<StagedFile>> {
        let dir = self.area(user, draft);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut newest: Option<(DateTime<Utc>, StagedFile)> = None;
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = meta.modified()?.into();
            let candidate = StagedFile {
                path: entry.path(),
                filename: entry.file_name().to_string_lossy().into_owned(),
            };
            let replace = match &newest {
                None => true,
                Some((at, cur)) => modified > *at || (modified == *at && candidate.filename > cur.filename),
            };
            if replace {
                newest = Some((modified, candidate));
            }
        }
        Ok(newest.map(|(_, f)| f))
    }
}

/// Keeps only the final path component and replaces anything outside
/// `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload.zip".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn latest_picks_newest_file() {
        let tmp = tempfile::tempdir().unwrap();
        let area = FsDraftArea::new(tmp.path());
        let draft = Uuid::new_v4();

        let first = area.stage(3, draft, "old.zip", b"one").unwrap();
        let second = area.stage(3, draft, "new.zip", b"two").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&first.path)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let latest = area.latest(3, draft).unwrap().unwrap();
        assert_eq!(latest, second);
    }

    #[test]
    fn missing_area_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let area = FsDraftArea::new(tmp.path());
        assert!(area.latest(1, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my project (1).zip"), "my_project__1_.zip");
        assert_eq!(sanitize_filename(".."), "upload.zip");
        assert_eq!(sanitize_filename(""), "upload.zip");
    }
}
