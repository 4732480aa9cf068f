use crate::definitions::DefinitionFormat;
use crate::error::{read_text, Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Snapshot the original to `<file>.backup` before overwriting
    pub backup: bool,
    /// Treat a failed backup as fatal instead of a warning
    pub strict_backup: bool,
    /// Compute everything, write nothing
    pub dry_run: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            backup: true,
            strict_backup: true,
            dry_run: false,
        }
    }
}

/// What happened on disk.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    pub written: bool,
    pub backup: Option<PathBuf>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RemovalResult {
    pub removed_count: usize,
    pub remaining_count: usize,
    pub removed: Vec<String>,
    #[serde(flatten)]
    pub commit: Commit,
}

pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".backup");
    PathBuf::from(name)
}

/// Replace `path` with `content` via a temporary file in the same directory.
///
/// An existing target keeps its permissions; a symlink is followed and the
/// file it points to is replaced. A new file is written directly.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let target = match fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return fs::write(path, content).map_err(|e| Error::write(path, e));
        }
        Err(e) => return Err(Error::write(path, e)),
    };
    let permissions = fs::metadata(&target)
        .map_err(|e| Error::write(path, e))?
        .permissions();

    let dir = target.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::write(path, e))?;
    tmp.write_all(content.as_bytes())
        .and_then(|_| tmp.as_file().set_permissions(permissions))
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::write(path, e))?;
    tmp.persist(&target).map_err(|e| Error::write(path, e.error))?;
    Ok(())
}

/// Write `updated` over `path`, whose current content is `original`.
///
/// Nothing is written when the content is unchanged or in dry-run mode. The
/// backup, when requested, is written before the target is touched.
pub fn commit(path: &Path, original: &str, updated: &str, opts: WriteOptions) -> Result<Commit> {
    if opts.dry_run || original == updated {
        return Ok(Commit::default());
    }

    let mut backup = None;
    if opts.backup {
        let target = backup_path(path);
        match fs::write(&target, original) {
            Ok(()) => {
                tracing::info!(backup = %target.display(), "backup created");
                backup = Some(target);
            }
            Err(source) if opts.strict_backup => {
                return Err(Error::Backup {
                    path: target,
                    source,
                })
            }
            Err(e) => {
                tracing::warn!(backup = %target.display(), error = %e, "could not create backup, continuing");
            }
        }
    }

    write_atomic(path, updated)?;
    tracing::info!(file = %path.display(), "file rewritten");

    Ok(Commit {
        written: true,
        backup,
    })
}

/// Remove the definitions of `keys` from the definitions file.
///
/// The file is re-read and re-parsed, so the result reflects its current
/// content; keys without a definition are ignored.
pub fn remove<F: DefinitionFormat>(
    path: &Path,
    keys: &BTreeSet<String>,
    opts: WriteOptions,
) -> Result<RemovalResult> {
    let original = read_text(path)?;
    let pruned = F::prune(&original, keys);
    let commit = commit(path, &original, &pruned.content, opts)?;

    Ok(RemovalResult {
        removed_count: pruned.removed.len(),
        remaining_count: pruned.remaining(),
        removed: pruned.removed,
        commit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acronyms::Acronyms;
    use crate::bibtex::Bibliography;

    const ACRONYMS: &str = "\\acro{ml}[ML]{Machine Learning}\n\\acro{ai}[AI]{Artificial Intelligence}\n";

    fn keys(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(Path::new("dir/refs.bib")), PathBuf::from("dir/refs.bib.backup"));
    }

    #[test]
    fn test_remove_writes_backup_of_original() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acronyms.tex");
        fs::write(&path, ACRONYMS).unwrap();

        let result = remove::<Acronyms>(&path, &keys(&["ml"]), WriteOptions::default()).unwrap();
        assert_eq!(result.removed_count, 1);
        assert_eq!(result.remaining_count, 1);
        assert!(result.commit.written);
        assert_eq!(result.commit.backup, Some(backup_path(&path)));

        assert_eq!(fs::read_to_string(&path).unwrap(), "\\acro{ai}[AI]{Artificial Intelligence}\n");
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), ACRONYMS);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acronyms.tex");
        fs::write(&path, ACRONYMS).unwrap();
        let k = keys(&["ml"]);
        let opts = WriteOptions {
            backup: false,
            ..WriteOptions::default()
        };

        remove::<Acronyms>(&path, &k, opts).unwrap();
        let after_first = fs::read_to_string(&path).unwrap();

        let second = remove::<Acronyms>(&path, &k, opts).unwrap();
        assert_eq!(second.removed_count, 0);
        assert_eq!(second.remaining_count, 1);
        assert!(!second.commit.written);
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.bib");
        let content = "@misc{a,\n  title = {A}\n}\n\n@misc{b,\n  title = {B}\n}\n";
        fs::write(&path, content).unwrap();

        let opts = WriteOptions {
            dry_run: true,
            ..WriteOptions::default()
        };
        let result = remove::<Bibliography>(&path, &keys(&["a", "b"]), opts).unwrap();

        assert_eq!(result.removed_count, 2);
        assert_eq!(result.remaining_count, 0);
        assert_eq!(result.commit, Commit::default());
        assert_eq!(fs::read(&path).unwrap(), content.as_bytes());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_strict_backup_failure_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acronyms.tex");
        fs::write(&path, ACRONYMS).unwrap();
        // A directory where the backup file should go makes the backup write fail
        fs::create_dir(backup_path(&path)).unwrap();

        let err = remove::<Acronyms>(&path, &keys(&["ml"]), WriteOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Backup { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), ACRONYMS);
    }

    #[test]
    fn test_lenient_backup_failure_still_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acronyms.tex");
        fs::write(&path, ACRONYMS).unwrap();
        fs::create_dir(backup_path(&path)).unwrap();

        let opts = WriteOptions {
            strict_backup: false,
            ..WriteOptions::default()
        };
        let result = remove::<Acronyms>(&path, &keys(&["ml"]), opts).unwrap();
        assert!(result.commit.written);
        assert_eq!(result.commit.backup, None);
        assert_eq!(fs::read_to_string(&path).unwrap(), "\\acro{ai}[AI]{Artificial Intelligence}\n");
    }

    #[test]
    fn test_remove_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = remove::<Acronyms>(&dir.path().join("none.tex"), &keys(&["x"]), WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acronyms.tex");
        fs::write(&path, ACRONYMS).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        remove::<Acronyms>(&path, &keys(&["ml"]), WriteOptions::default()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_follows_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.tex");
        let link = dir.path().join("acronyms.tex");
        fs::write(&real, ACRONYMS).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let opts = WriteOptions {
            backup: false,
            ..WriteOptions::default()
        };
        remove::<Acronyms>(&link, &keys(&["ml"]), opts).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&real).unwrap(), "\\acro{ai}[AI]{Artificial Intelligence}\n");
    }

    #[test]
    fn test_write_atomic_creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sorted.tex");
        write_atomic(&path, "x\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\n");
    }
}
