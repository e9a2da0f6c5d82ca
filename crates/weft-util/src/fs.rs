use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Read a file to string, replacing invalid UTF-8 sequences with the replacement character.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_to_string_lossy(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write bytes to `path`, creating missing parent directories first.
///
/// # Errors
/// Returns an error if a directory cannot be created or the write fails.
pub fn write_creating_dirs(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// Remove a directory tree. A missing directory is not an error.
///
/// # Errors
/// Returns any error other than `NotFound`.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Recursively copy the contents of `from` into `to`.
///
/// Returns the number of files copied.
///
/// # Errors
/// Returns an error if walking the source or writing the destination fails.
pub fn copy_dir_all(from: &Path, to: &Path) -> io::Result<usize> {
    let mut copied = 0;
    fs::create_dir_all(to)?;

    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Sibling path used to stage a new generation of `dir`.
///
/// Staging next to the target keeps the final rename on one filesystem.
#[must_use]
pub fn sibling_path(dir: &Path, tag: &str) -> PathBuf {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("out");
    let parent = dir.parent().unwrap_or(Path::new("."));
    parent.join(format!(".{name}.{tag}.{}", std::process::id()))
}

/// Replace `target` with the fully populated `staged` directory.
///
/// The previous generation is renamed aside, the staged directory is renamed
/// into place, and only then is the previous generation deleted. If the
/// second rename fails, the previous generation is moved back.
///
/// # Errors
/// Returns an error if either rename fails. Failure to delete the retired
/// generation is ignored because the swap itself has already happened.
pub fn swap_dir(staged: &Path, target: &Path) -> io::Result<()> {
    let retired = sibling_path(target, "old");
    remove_dir_if_exists(&retired)?;

    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &retired)?;
    }

    if let Err(e) = fs::rename(staged, target) {
        if had_previous {
            let _ = fs::rename(&retired, target);
        }
        return Err(e);
    }

    if had_previous {
        let _ = fs::remove_dir_all(&retired);
    }
    Ok(())
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
    fn test_write_creating_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");

        write_creating_dirs(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_remove_dir_if_exists_missing_is_ok() {
        let dir = tempdir().unwrap();
        remove_dir_if_exists(&dir.path().join("nope")).unwrap();
    }

    #[test]
    fn test_copy_dir_all() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("nested/b.txt"), "b").unwrap();

        let dst = dir.path().join("dst");
        let copied = copy_dir_all(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("nested/b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_swap_dir_replaces_previous_generation() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.js"), "old").unwrap();

        let staged = sibling_path(&target, "staging");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("fresh.js"), "new").unwrap();

        swap_dir(&staged, &target).unwrap();

        assert!(target.join("fresh.js").exists());
        assert!(!target.join("stale.js").exists());
        assert!(!staged.exists());
        // Only the swapped-in directory remains
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_swap_dir_without_previous() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("build");
        let staged = sibling_path(&target, "staging");
        fs::create_dir_all(&staged).unwrap();

        swap_dir(&staged, &target).unwrap();
        assert!(target.is_dir());
    }
}
