//! Bundle archives and working directories.
//!
//! A bundle on disk is a zip archive holding `document.json`, `meta.json`,
//! `user.json`, one `pages/<uuid>.json` per page and binary assets under
//! `images/` and `previews/`. Entry names are preserved verbatim; file
//! entries use deflate. Working directories are temporaries owned here
//! and removed on drop, whichever way the pipeline exits.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::EngineError;

/// Unpack `archive` into `dir`. Entry names that would escape the target
/// directory are rejected.
pub fn extract(archive: &Path, dir: &Path) -> Result<(), EngineError> {
    let file = File::open(archive).map_err(|e| EngineError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| EngineError::archive(archive, e))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| EngineError::archive(archive, e))?;
        let name = entry.name().to_string();
        let target = safe_join(dir, &name).ok_or_else(|| {
            EngineError::archive(
                archive,
                zip::result::ZipError::InvalidArchive("entry escapes the target directory".into()),
            )
        })?;

        if name.ends_with('/') {
            fs::create_dir_all(&target).map_err(|e| EngineError::io(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| EngineError::io(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| EngineError::io(&target, e))?;
    }
    Ok(())
}

/// Pack the contents of `dir` into `archive` (deflate, `/`-separated
/// entry names relative to `dir`).
pub fn pack(dir: &Path, archive: &Path) -> Result<(), EngineError> {
    if let Some(parent) = archive.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
    }
    let file = File::create(archive).map_err(|e| EngineError::io(archive, e))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            EngineError::io(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{rel}/"), options)
                .map_err(|e| EngineError::archive(archive, e))?;
            continue;
        }
        zip.start_file(rel, options)
            .map_err(|e| EngineError::archive(archive, e))?;
        let mut input = File::open(entry.path()).map_err(|e| EngineError::io(entry.path(), e))?;
        io::copy(&mut input, &mut zip).map_err(|e| EngineError::io(entry.path(), e))?;
    }
    zip.finish().map_err(|e| EngineError::archive(archive, e))?;
    Ok(())
}

/// Join an archive entry name under `dir`, refusing absolute names and
/// parent traversal.
fn safe_join(dir: &Path, name: &str) -> Option<PathBuf> {
    let rel = Path::new(name);
    if rel.is_absolute() {
        return None;
    }
    let mut out = dir.to_path_buf();
    for component in rel.components() {
        match component {
            std::path::Component::Normal(part) => out.push(part),
            std::path::Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

/// Decode a JSON file, preserving numeric notation.
pub fn read_json(path: &Path) -> Result<Value, EngineError> {
    let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::decode(path, e))
}

/// Decode a JSON file; a missing file reads as an empty mapping, so
/// comparisons against added or deleted files still produce structural
/// diffs.
pub fn read_json_or_empty(path: &Path) -> Result<Value, EngineError> {
    if !path.exists() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    read_json(path)
}

/// Encode a JSON value to a file.
pub fn write_json(path: &Path, value: &Value) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(value).map_err(|e| EngineError::decode(path, e))?;
    fs::write(path, bytes).map_err(|e| EngineError::io(path, e))
}

/// An unpacked bundle on disk. Opening an archive extracts it into a
/// temporary directory that lives exactly as long as this value; opening
/// a directory borrows it in place.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    _temp: Option<TempDir>,
}

impl Workspace {
    /// Open a bundle read-only: directories are used in place, archives
    /// are extracted into an owned temporary.
    pub fn open(bundle: &Path) -> Result<Workspace, EngineError> {
        let meta = fs::metadata(bundle).map_err(|e| EngineError::io(bundle, e))?;
        if meta.is_dir() {
            return Ok(Workspace {
                dir: bundle.to_path_buf(),
                _temp: None,
            });
        }
        let temp = TempDir::new().map_err(|e| EngineError::io(bundle, e))?;
        extract(bundle, temp.path())?;
        Ok(Workspace {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    /// Open a bundle for mutation: always materialises an owned working
    /// copy, so the caller's input is never touched.
    pub fn open_mut(bundle: &Path) -> Result<Workspace, EngineError> {
        let meta = fs::metadata(bundle).map_err(|e| EngineError::io(bundle, e))?;
        let temp = TempDir::new().map_err(|e| EngineError::io(bundle, e))?;
        if meta.is_dir() {
            copy_tree(bundle, temp.path())?;
        } else {
            extract(bundle, temp.path())?;
        }
        Ok(Workspace {
            dir: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), EngineError> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(from).to_path_buf();
            EngineError::io(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let target = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| EngineError::io(&target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| EngineError::io(&target, e))?;
        }
    }
    Ok(())
}

/// Copy one bundle entry between workspaces, creating parents as needed.
pub fn copy_entry(src_root: &Path, dst_root: &Path, rel: &str) -> Result<(), EngineError> {
    let from = src_root.join(rel);
    let to = dst_root.join(rel);
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
    }
    fs::copy(&from, &to).map_err(|e| EngineError::io(&from, e))?;
    Ok(())
}

/// Remove one bundle entry if present.
pub fn remove_entry(root: &Path, rel: &str) -> Result<(), EngineError> {
    let target = root.join(rel);
    match fs::remove_file(&target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io(&target, e)),
    }
}
