//! Filesystem statistics: disk capacity, tree sizes, load averages.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Capacity of the filesystem holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    /// Space available to unprivileged users.
    pub free_bytes: u64,
}

impl DiskUsage {
    /// Fraction of the disk still free.
    pub fn free_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.free_bytes as f64 / self.total_bytes as f64
    }
}

/// `statvfs(2)` on `path`.
pub fn disk_usage(path: &Path) -> io::Result<DiskUsage> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut st = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), st.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let st = unsafe { st.assume_init() };

    let frsize = st.f_frsize as u64;
    Ok(DiskUsage {
        total_bytes: st.f_blocks as u64 * frsize,
        free_bytes: st.f_bavail as u64 * frsize,
    })
}

/// Size of a file, or the summed size of every file under a directory.
/// Symlinks are not followed.
pub fn path_size(path: &Path) -> io::Result<u64> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(meta.len());
    }

    let mut total = 0u64;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        match path_size(&entry.path()) {
            Ok(size) => total += size,
            // Removed while we were walking.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// 1, 5 and 15 minute load averages.
pub fn load_average() -> Option<[f64; 3]> {
    let mut loads = [0f64; 3];
    let n = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
    (n == 3).then_some(loads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_disk_usage_of_temp_dir() {
        let dir = TempDir::new().unwrap();
        let usage = disk_usage(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.free_bytes <= usage.total_bytes);
        assert!((0.0..=1.0).contains(&usage.free_ratio()));
    }

    #[test]
    fn test_disk_usage_missing_path() {
        let err = disk_usage(Path::new("/definitely/not/here")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_path_size_recurses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b"), vec![0u8; 23]).unwrap();

        assert_eq!(path_size(&dir.path().join("a")).unwrap(), 100);
        assert_eq!(path_size(dir.path()).unwrap(), 123);
    }

    #[test]
    fn test_free_ratio_of_empty_disk() {
        let usage = DiskUsage {
            total_bytes: 0,
            free_bytes: 0,
        };
        assert_eq!(usage.free_ratio(), 0.0);
    }

    #[test]
    fn test_load_average_available_on_linux() {
        if cfg!(target_os = "linux") {
            let loads = load_average().unwrap();
            assert!(loads.iter().all(|l| *l >= 0.0));
        }
    }
}
