//! Project archive lifecycle: store the uploaded zip, unpack it into the
//! served tree, patch in the bundled helper files and the finish hook.

use chrono::Utc;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::models::Instance;
use crate::uploads::StagedUploads;

/// Files shipped with the service that replace their namesakes in every
/// unpacked project, as `(name inside the project, name in the scripts dir)`.
pub const HELPER_FILES: &[(&str, &str)] = &[
    ("finaliza.html", "finaliza.html"),
    ("finaliza.htm", "finaliza.html"),
    ("moodle.js", "moodle.js"),
    ("GeraHTML_json2.js", "GeraHTML_json2.js"),
    ("logo.jpg", "logo.jpg"),
    ("loading.gif", "loading.gif"),
    ("status_error.png", "status_error.png"),
    ("status_ok.png", "status_ok.png"),
];

/// Generated navigation script that receives the finish hook.
pub const NAV_SCRIPT: &str = "GeraHTML_source.js";

pub const FINISH_HOOK: &str =
    "\nfunction chamaFinaliza() {\n    link_click('finaliza.html', null, null, null, null);\n}\n";

// path segment: keep unreserved characters, encode the rest
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("no archive is associated with this instance")]
    NoArchive,
    #[error("no staged file found")]
    NoStagedFile,
    #[error("path {0} is outside the managed directories")]
    OutsideRoot(String),
}

/// Where archives live, where they are unpacked, and how the unpacked tree
/// is reached over HTTP.
#[derive(Debug, Clone)]
pub struct ProjectFiles {
    pub data_root: PathBuf,
    pub www_root: PathBuf,
    pub public_url: String,
    pub scripts_dir: PathBuf,
}

impl ProjectFiles {
    /// Replaces the instance's archive with the newest file of a draft area.
    pub fn write_projectdata(
        &self,
        instance: &mut Instance,
        staged: &dyn StagedUploads,
        user: i64,
        draft: uuid::Uuid,
    ) -> Result<(), ArchiveError> {
        if instance.projectdata.is_some() {
            self.delete_projectdata(instance)?;
        }

        let dir = self.data_root.join("visualclass").join(instance.course.to_string());
        fs::create_dir_all(&dir)?;

        let file = staged.latest(user, draft)?.ok_or(ArchiveError::NoStagedFile)?;
        let target = dir.join(format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S"), file.filename));
        fs::copy(&file.path, &target)?;
        tracing::info!(instance = ?instance.id, archive = %target.display(), "project archive stored");

        instance.projectdata = Some(target.to_string_lossy().into_owned());
        Ok(())
    }

    /// Removes the archive file; `false` when none was associated.
    pub fn delete_projectdata(&self, instance: &mut Instance) -> Result<bool, ArchiveError> {
        let Some(path) = instance.projectdata.take() else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                instance.projectdata = Some(path);
                return Err(e.into());
            }
        }
        tracing::info!(archive = %path, "project archive removed");
        Ok(true)
    }

    /// Unpacks the associated archive into the served tree, replacing any
    /// previous unpack.
    pub fn write_projecturl(&self, instance: &mut Instance) -> Result<(), ArchiveError> {
        let archive = instance.projectdata.clone().ok_or(ArchiveError::NoArchive)?;
        if instance.projecturl.is_some() {
            self.delete_projecturl(instance)?;
        }

        let rel = self.unpack_relative(Path::new(&archive))?;
        let out_dir = self.www_root.join(&rel);
        fs::create_dir_all(&out_dir)?;

        let file = fs::File::open(&archive)?;
        extract_zip_to_dir(file, &out_dir)?;

        for (name, source) in HELPER_FILES {
            let target = out_dir.join(name);
            if target.exists() {
                fs::remove_file(&target)?;
            }
            fs::copy(self.scripts_dir.join(source), &target)?;
        }

        let mut nav = OpenOptions::new()
            .create(true)
            .append(true)
            .open(out_dir.join(NAV_SCRIPT))?;
        nav.write_all(FINISH_HOOK.as_bytes())?;

        let url = self.url_for(&rel);
        tracing::info!(instance = ?instance.id, dir = %out_dir.display(), %url, "project unpacked");
        instance.projecturl = Some(url);
        Ok(())
    }

    /// Removes the unpacked tree; `false` when nothing was unpacked.
    pub fn delete_projecturl(&self, instance: &mut Instance) -> Result<bool, ArchiveError> {
        let Some(url) = instance.projecturl.clone() else {
            return Ok(false);
        };
        let dir = self.path_for_url(&url)?;
        if dir.exists() {
            remove_tree(&dir)?;
        }
        tracing::info!(dir = %dir.display(), "unpacked project removed");
        instance.projecturl = None;
        Ok(true)
    }

    /// Archive path relative to the data root, without its extension.
    fn unpack_relative(&self, archive: &Path) -> Result<PathBuf, ArchiveError> {
        let rel = archive
            .strip_prefix(&self.data_root)
            .map_err(|_| ArchiveError::OutsideRoot(archive.display().to_string()))?;
        Ok(rel.with_extension(""))
    }

    fn url_for(&self, rel: &Path) -> String {
        let mut url = self.public_url.trim_end_matches('/').to_string();
        for part in rel.components() {
            url.push('/');
            url.extend(utf8_percent_encode(&part.as_os_str().to_string_lossy(), SEGMENT));
        }
        url.push('/');
        url
    }

    fn path_for_url(&self, url: &str) -> Result<PathBuf, ArchiveError> {
        let base = self.public_url.trim_end_matches('/');
        let rest = url
            .strip_prefix(base)
            .ok_or_else(|| ArchiveError::OutsideRoot(url.to_string()))?;
        let decoded = percent_decode_str(rest).decode_utf8_lossy();
        let rel = Path::new(decoded.trim_matches('/'));
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe || rel.as_os_str().is_empty() {
            return Err(ArchiveError::OutsideRoot(url.to_string()));
        }
        Ok(self.www_root.join(rel))
    }
}

/// Extracts every entry of a zip archive below `out_dir`. Entries whose
/// names would escape `out_dir` are skipped.
pub fn extract_zip_to_dir<R: Read + Seek>(reader: R, out_dir: &Path) -> Result<usize, ArchiveError> {
    fs::create_dir_all(out_dir)?;
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut written = 0;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let Some(name) = file.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = file.name(), "skipping unsafe zip entry");
            continue;
        };
        let outpath = out_dir.join(name);
        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = fs::File::create(&outpath)?;
        io::copy(&mut file, &mut outfile)?;
        written += 1;
    }
    Ok(written)
}

/// Deletes a directory tree, files before the directories holding them.
pub fn remove_tree(dir: &Path) -> io::Result<()> {
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploads::FsDraftArea;
    use std::io::Cursor;
    use tempfile::TempDir;
    use uuid::Uuid;
    use zip::write::FileOptions;

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            w.start_file(*name, FileOptions::default()).unwrap();
            w.write_all(body.as_bytes()).unwrap();
        }
        w.finish().unwrap().into_inner()
    }

    struct Fixture {
        _tmp: TempDir,
        files: ProjectFiles,
        drafts: FsDraftArea,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let scripts = tmp.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        for (_, source) in HELPER_FILES {
            fs::write(scripts.join(source), format!("helper:{source}")).unwrap();
        }
        let files = ProjectFiles {
            data_root: tmp.path().join("data"),
            www_root: tmp.path().join("www"),
            public_url: "http://example.test/content".into(),
            scripts_dir: scripts,
        };
        let drafts = FsDraftArea::new(tmp.path().join("data").join("drafts"));
        Fixture { _tmp: tmp, files, drafts }
    }

    #[test]
    fn replacing_the_archive_removes_the_old_file() {
        let fx = fixture();
        let mut inst = Instance::new(7, "demo");

        let first = Uuid::new_v4();
        fx.drafts.stage(1, first, "first.zip", b"one").unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 1, first).unwrap();
        let first_path = PathBuf::from(inst.projectdata.clone().unwrap());
        assert!(first_path.exists());
        assert!(first_path.starts_with(fx.files.data_root.join("visualclass").join("7")));

        let second = Uuid::new_v4();
        fx.drafts.stage(1, second, "second.zip", b"two").unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 1, second).unwrap();
        let second_path = PathBuf::from(inst.projectdata.clone().unwrap());

        assert!(!first_path.exists());
        assert_eq!(fs::read(&second_path).unwrap(), b"two");
        let stored: Vec<_> = fs::read_dir(second_path.parent().unwrap()).unwrap().collect();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn empty_draft_area_fails() {
        let fx = fixture();
        let mut inst = Instance::new(7, "demo");
        let err = fx
            .files
            .write_projectdata(&mut inst, &fx.drafts, 1, Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NoStagedFile));
        assert!(inst.projectdata.is_none());
    }

    #[test]
    fn unpack_installs_helpers_and_finish_hook() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        let draft = Uuid::new_v4();
        let bytes = zip_bytes(&[
            ("index.html", "<html></html>"),
            ("GeraHTML_source.js", "var x = 1;"),
            ("moodle.js", "original"),
            ("img/pic.txt", "pic"),
        ]);
        fx.drafts.stage(2, draft, "lesson one.zip", &bytes).unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 2, draft).unwrap();
        fx.files.write_projecturl(&mut inst).unwrap();

        let url = inst.projecturl.clone().unwrap();
        assert!(url.starts_with("http://example.test/content/visualclass/3/"));
        assert!(url.ends_with("_lesson_one/"));

        let dir = fx.files.path_for_url(&url).unwrap();
        assert!(dir.join("index.html").exists());
        assert!(dir.join("img").join("pic.txt").exists());
        assert_eq!(fs::read_to_string(dir.join("moodle.js")).unwrap(), "helper:moodle.js");
        assert_eq!(fs::read_to_string(dir.join("finaliza.htm")).unwrap(), "helper:finaliza.html");
        let nav = fs::read_to_string(dir.join(NAV_SCRIPT)).unwrap();
        assert!(nav.starts_with("var x = 1;"));
        assert!(nav.ends_with(FINISH_HOOK));
    }

    #[test]
    fn reunpacking_replaces_the_tree() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        let draft = Uuid::new_v4();
        fx.drafts
            .stage(2, draft, "p.zip", &zip_bytes(&[("a.html", "a")]))
            .unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 2, draft).unwrap();
        fx.files.write_projecturl(&mut inst).unwrap();
        let dir = fx.files.path_for_url(inst.projecturl.as_deref().unwrap()).unwrap();
        fs::write(dir.join("stale.txt"), "x").unwrap();

        fx.files.write_projecturl(&mut inst).unwrap();
        assert!(!dir.join("stale.txt").exists());
        let nav = fs::read_to_string(dir.join(NAV_SCRIPT)).unwrap();
        assert_eq!(nav.matches("chamaFinaliza").count(), 1);
    }

    #[test]
    fn unpack_without_archive_fails() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        assert!(matches!(fx.files.write_projecturl(&mut inst), Err(ArchiveError::NoArchive)));
    }

    #[test]
    fn corrupt_archive_aborts() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        let draft = Uuid::new_v4();
        fx.drafts.stage(2, draft, "bad.zip", b"not a zip").unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 2, draft).unwrap();
        assert!(matches!(fx.files.write_projecturl(&mut inst), Err(ArchiveError::Zip(_))));
        assert!(inst.projecturl.is_none());
    }

    #[test]
    fn delete_helpers_report_absence() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        assert!(!fx.files.delete_projectdata(&mut inst).unwrap());
        assert!(!fx.files.delete_projecturl(&mut inst).unwrap());
    }

    #[test]
    fn delete_projecturl_removes_directory() {
        let fx = fixture();
        let mut inst = Instance::new(3, "demo");
        let draft = Uuid::new_v4();
        fx.drafts
            .stage(2, draft, "p.zip", &zip_bytes(&[("deep/er/x.html", "x")]))
            .unwrap();
        fx.files.write_projectdata(&mut inst, &fx.drafts, 2, draft).unwrap();
        fx.files.write_projecturl(&mut inst).unwrap();
        let dir = fx.files.path_for_url(inst.projecturl.as_deref().unwrap()).unwrap();
        assert!(dir.exists());

        assert!(fx.files.delete_projecturl(&mut inst).unwrap());
        assert!(!dir.exists());
        assert!(inst.projecturl.is_none());
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let bytes = zip_bytes(&[("../escape.txt", "x"), ("ok.txt", "y")]);
        let n = extract_zip_to_dir(Cursor::new(bytes), &out).unwrap();
        assert_eq!(n, 1);
        assert!(out.join("ok.txt").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[test]
    fn urls_cannot_point_outside_www() {
        let fx = fixture();
        assert!(fx.files.path_for_url("http://example.test/content/../../etc").is_err());
        assert!(fx.files.path_for_url("http://elsewhere.test/x/").is_err());
    }
}
