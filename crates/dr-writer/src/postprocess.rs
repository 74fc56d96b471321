//! Finalization run after a window's output has been closed.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dr_config::RecordingConfig;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::sink::{atomic_rename, temp_path_for};

#[derive(Error, Debug)]
pub enum PostProcessError {
    /// The stage has nothing to do; callers treat this as success.
    #[error("post-processing not implemented")]
    NotImplemented,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("cannot archive {0}: not a regular file or directory")]
    Unsupported(PathBuf),
}

/// Post-processing strategy attached to a window.
#[derive(Debug, Clone, Default)]
pub enum PostProcessor {
    /// No finalization.
    #[default]
    None,
    /// Package the output into `<path>.zip`.
    Archive(ArchiveStage),
}

impl PostProcessor {
    pub fn archive(remove_original: bool) -> Self {
        PostProcessor::Archive(ArchiveStage { remove_original })
    }

    /// Archive stage configured by `recording.archive_remove_original`.
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self::archive(config.archive_remove_original)
    }

    /// Run the stage on a closed output. Returns the artifact produced.
    pub fn run(&self, path: &Path) -> Result<PathBuf, PostProcessError> {
        match self {
            PostProcessor::None => Err(PostProcessError::NotImplemented),
            PostProcessor::Archive(stage) => stage.run(path),
        }
    }
}

/// Wraps a finished output in a deflated zip archive next to it.
#[derive(Debug, Clone)]
pub struct ArchiveStage {
    /// Delete the raw output once the archive is in place.
    pub remove_original: bool,
}

impl ArchiveStage {
    pub fn archive_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".zip");
        PathBuf::from(name)
    }

    /// Archive `path`. On failure the raw output is left untouched.
    pub fn run(&self, path: &Path) -> Result<PathBuf, PostProcessError> {
        let archive = Self::archive_path(path);
        let prefix = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        package(path, &prefix, &archive)?;

        if self.remove_original {
            remove_path(path)?;
        }

        info!(
            path = %path.display(),
            archive = %archive.display(),
            removed_original = self.remove_original,
            "Output archived"
        );
        Ok(archive)
    }
}

/// Zip a file or directory tree into `dest`.
///
/// Entries are stored under `prefix`. The archive is written to
/// `<dest>.tmp` and renamed into place; a failed write removes the temp.
pub(crate) fn package(src: &Path, prefix: &str, dest: &Path) -> Result<(), PostProcessError> {
    let temp = temp_path_for(dest);
    let result = write_zip(src, prefix, &temp).and_then(|()| Ok(atomic_rename(&temp, dest)?));
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

fn write_zip(src: &Path, prefix: &str, temp: &Path) -> Result<(), PostProcessError> {
    let file = File::create(temp)?;
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<'_, ()> = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let meta = fs::metadata(src)?;
    if meta.is_file() {
        zip.start_file(prefix, options)?;
        io::copy(&mut File::open(src)?, &mut zip)?;
    } else if meta.is_dir() {
        let mut files = Vec::new();
        collect_files(src, Path::new(prefix), &mut files)?;
        files.sort();
        for (name, path) in &files {
            zip.start_file(name.as_str(), options)?;
            io::copy(&mut File::open(path)?, &mut zip)?;
        }
        debug!(src = %src.display(), files = files.len(), "Directory packaged");
    } else {
        return Err(PostProcessError::Unsupported(src.to_path_buf()));
    }

    let mut file = zip.finish()?;
    file.flush()?;
    Ok(())
}

fn collect_files(
    dir: &Path,
    rel: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<(), io::Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = rel.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            collect_files(&path, &name, out)?;
        } else {
            out.push((name.to_string_lossy().replace('\\', "/"), path));
        }
    }
    Ok(())
}

/// Remove a file or directory tree.
pub(crate) fn remove_path(path: &Path) -> Result<(), io::Error> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_entry(archive: &Path, name: &str) -> String {
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut entry = zip.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_none_is_not_implemented() {
        let err = PostProcessor::None.run(Path::new("/tmp/x")).unwrap_err();
        assert!(matches!(err, PostProcessError::NotImplemented));
    }

    #[test]
    fn test_archive_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("obs.parquet");
        fs::write(&path, b"payload").unwrap();

        let archive = PostProcessor::archive(true).run(&path).unwrap();
        assert_eq!(archive, dir.path().join("obs.parquet.zip"));
        assert!(archive.exists());
        assert!(!path.exists());
        assert_eq!(read_entry(&archive, "obs.parquet"), "payload");
    }

    #[test]
    fn test_archive_keeps_original_when_asked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("obs.parquet");
        fs::write(&path, b"payload").unwrap();

        PostProcessor::archive(false).run(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_archive_failure_propagates_and_keeps_raw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("obs.parquet");
        fs::write(&path, b"payload").unwrap();
        // A directory squatting on the archive name makes the rename fail.
        let blocker = ArchiveStage::archive_path(&path);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        let err = PostProcessor::archive(true).run(&path);
        assert!(err.is_err());
        assert!(path.exists());
        assert!(!temp_path_for(&blocker).exists());
    }

    #[test]
    fn test_package_directory_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.json"), b"{}").unwrap();
        fs::write(src.join("sub").join("b.bin"), b"bb").unwrap();

        let dest = dir.path().join("tree.zip");
        package(&src, "snap", &dest).unwrap();

        assert_eq!(read_entry(&dest, "snap/a.json"), "{}");
        assert_eq!(read_entry(&dest, "snap/sub/b.bin"), "bb");
    }
}
