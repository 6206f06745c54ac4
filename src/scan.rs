//! Directory traversal for indexing candidates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Recursively collect regular files under `dirs` whose extension is in
/// `extensions` (case-insensitive, leading dot optional).
///
/// Unreadable entries are skipped with a warning. Paths are de-duplicated,
/// keeping the first-seen order.
pub fn collect_files<P, S>(dirs: &[P], extensions: &[S]) -> Vec<PathBuf>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let allowed: HashSet<String> = extensions
        .iter()
        .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for dir in dirs {
        let dir = dir.as_ref();
        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| allowed.contains(&e.to_ascii_lowercase()));
            if matches && seen.insert(entry.path().to_path_buf()) {
                files.push(entry.into_path());
            }
        }
    }

    tracing::debug!(dirs = dirs.len(), files = files.len(), "directories scanned");
    files
}
