use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Atomically write bytes to a file by writing to a temp file then renaming.
///
/// Readers observe either the old contents or the new contents, never a
/// partial write.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));

    // Same directory as the target so the rename stays on one filesystem
    let mut temp_path = parent.to_path_buf();
    temp_path.push(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    match fs::rename(&temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // On Windows, rename can fail if target exists. Try copy + remove as fallback.
            if cfg!(windows) {
                fs::copy(&temp_path, path)?;
                let _ = fs::remove_file(&temp_path);
                Ok(())
            } else {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}

/// Returns true if something (including a broken symlink) occupies `path`.
#[must_use]
pub fn path_occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Remove whatever occupies `path`: a symlink, junction, file, or directory tree.
///
/// Links are removed without touching their targets. Missing paths are not an error.
///
/// # Errors
/// Returns an error if the entry exists but cannot be removed.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if metadata.file_type().is_symlink() {
        // Directory symlinks on Windows must be removed with remove_dir
        return fs::remove_file(path).or_else(|_| fs::remove_dir(path));
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;

        // FILE_ATTRIBUTE_REPARSE_POINT = 0x400 (junctions)
        if metadata.file_attributes() & 0x400 != 0 {
            return fs::remove_dir(path);
        }
    }

    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_read_to_string_lossy_invalid_utf8() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x80, 0x81])
            .unwrap();
        file.flush().unwrap();

        let content = read_to_string_lossy(file.path()).unwrap();
        assert!(content.starts_with("Hello"));
        assert!(content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_atomic_write_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link-manifest.json");

        atomic_write(&path, b"{}").unwrap();
        atomic_write(&path, b"{\"localLinks\":{}}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"localLinks\":{}}");
    }

    #[test]
    fn test_atomic_write_no_temp_left_on_success() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link-manifest.json");

        atomic_write(&path, b"content").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].as_ref().unwrap().file_name().to_str().unwrap(),
            "link-manifest.json"
        );
    }

    #[test]
    fn test_remove_path_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_path(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_remove_path_directory_tree() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("node_modules").join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("index.js"), "").unwrap();

        remove_path(&dir.path().join("node_modules")).unwrap();
        assert!(!path_occupied(&dir.path().join("node_modules")));
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_path_symlink_keeps_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.txt"), "x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        remove_path(&link).unwrap();
        assert!(!path_occupied(&link));
        assert!(target.join("keep.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_path_occupied_broken_symlink() {
        let dir = tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink(dir.path().join("missing"), &link).unwrap();

        assert!(!link.exists());
        assert!(path_occupied(&link));
    }
}
