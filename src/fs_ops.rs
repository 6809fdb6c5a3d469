//! Filesystem capability seam.
//!
//! Named `Fs` in the design notes; threaded through the extractor,
//! installer, and quarantine manager so tests can inject a failing rename
//! (the rollback scenario, spec §8 scenario 6) without relying on real disk
//! faults.

use std::fs;
use std::io;
use std::path::Path;

pub trait Fs: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn copy_dir_all(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn symlink_metadata(&self, path: &Path) -> io::Result<fs::Metadata>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl Fs for StdFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        if path.exists() {
            fs::remove_dir_all(path)
        } else {
            Ok(())
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn copy_dir_all(&self, from: &Path, to: &Path) -> io::Result<()> {
        copy_dir_recursive(from, to)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<fs::Metadata> {
        fs::symlink_metadata(path)
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            // Archives must never contain symlinks; a staging tree that
            // somehow does is not something we propagate.
            continue;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_dir_all_replicates_tree() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"a").unwrap();
        std::fs::write(src.path().join("nested/b.txt"), b"b").unwrap();

        let dest = tempdir().unwrap();
        let fs_ops = StdFs;
        fs_ops.copy_dir_all(src.path(), &dest.path().join("out")).unwrap();

        assert!(dest.path().join("out/a.txt").exists());
        assert!(dest.path().join("out/nested/b.txt").exists());
    }

    #[test]
    fn remove_dir_all_is_idempotent_on_missing_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        StdFs.remove_dir_all(&missing).unwrap();
    }
}

/// A filesystem wrapper that fails renames matching a predicate, for
/// exercising the rollback path deterministically.
pub struct FailingRenameFs<F: Fn(&Path, &Path) -> bool + Send + Sync> {
    pub inner: StdFs,
    pub should_fail: F,
}

impl<F: Fn(&Path, &Path) -> bool + Send + Sync> Fs for FailingRenameFs<F> {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if (self.should_fail)(from, to) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected rename failure"));
        }
        self.inner.rename(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn copy_dir_all(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.copy_dir_all(from, to)
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<fs::Metadata> {
        self.inner.symlink_metadata(path)
    }
}
