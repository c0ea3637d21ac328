//! Default watch targets: the immediate entries of the watch root.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::watcher::WatchError;

/// List the entries directly under `root`, sorted by name.
///
/// The root itself is not included. Entries that vanish while listing are
/// skipped; a missing or unreadable root is an error.
pub fn list_entries(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, WatchError> {
    let root = root.as_ref();
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        match entry {
            Ok(entry) => entries.push(entry.into_path()),
            Err(e) if e.depth() == 0 => {
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed"));
                return Err(WatchError::from_open(root.to_path_buf(), source));
            }
            Err(e) => {
                crate::debug_event!("discovery", "skipped", "{e}");
            }
        }
    }

    crate::debug_event!(
        "discovery",
        "listed",
        "{} entries under {}",
        entries.len(),
        root.display()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lists_immediate_entries_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::create_dir(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("deep.txt"), "d").unwrap();

        let entries = list_entries(root).unwrap();
        assert_eq!(
            entries,
            vec![root.join("a.txt"), root.join("b.txt"), root.join("nested")]
        );
    }

    #[test]
    fn test_empty_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_entries(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = list_entries(temp_dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, WatchError::NotFound { .. }));
    }
}
