//! Job file discovery.
//!
//! Walks every root recursively and keeps the entries whose extension matches
//! the configured job file extension. Traversal is all-or-nothing: the first
//! error aborts the whole collection, since a partial job set would silently
//! under-submit work.
//!
//! Entries are visited in lexical order within each directory and roots are
//! processed in the order given, so the resulting set is deterministic.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{HerdError, Result};

/// Collect every job file under `roots`.
///
/// A matching file whose path is not valid UTF-8 is fatal: it could be
/// neither named in the aggregate script nor recorded faithfully.
///
/// Symlinks are reported as found but never followed, so a symlinked
/// directory is not descended into. When `absolute` is set each match is
/// joined onto the current directory and lexically cleaned; symlinks are not
/// resolved.
pub fn collect_job_files<P: AsRef<Path>>(
    roots: &[P],
    extension: &str,
    absolute: bool,
) -> Result<Vec<PathBuf>> {
    let extension = extension.trim_start_matches('.');
    let mut files = Vec::new();

    for root in roots {
        let root = root.as_ref();
        tracing::debug!(root = %root.display(), "Scanning for job files");

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|source| HerdError::Walk {
                root: root.to_path_buf(),
                source,
            })?;

            if entry.file_type().is_dir() || !has_extension(entry.path(), extension) {
                continue;
            }

            let path = if absolute {
                absolutize(entry.path())?
            } else {
                entry.into_path()
            };
            // Paths end up in a text script and ledger, so they must be text.
            if path.to_str().is_none() {
                return Err(HerdError::NonUtf8Path(path));
            }
            files.push(path);
        }
    }

    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().is_some_and(|ext| ext == extension)
}

/// Remove exact duplicates, keeping the first occurrence of each path.
///
/// Paths are compared by their raw string form. Two spellings of the same
/// file stay distinct unless absolute resolution already unified them.
pub fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen: HashSet<OsString> = HashSet::with_capacity(paths.len());
    paths
        .into_iter()
        .filter(|p| seen.insert(p.as_os_str().to_os_string()))
        .collect()
}

/// Join a relative path onto the current directory and clean it.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(clean(path));
    }
    let cwd = std::env::current_dir().map_err(|source| HerdError::Resolve {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(clean(&cwd.join(path)))
}

/// Lexically resolve `.` and `..` components.
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => {
                out.push(component.as_os_str());
                depth = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    out.pop();
                    depth -= 1;
                } else if !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }

    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}
