//! Turning filesystem paths into named pack inputs.

use crate::dag::FileInput;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// Walk `paths` and produce one input per file.
///
/// Each name is relative to its input's parent directory, so packing
/// `photos/` yields `photos/a.jpg`, `photos/2024/b.jpg`, and so on. Entries
/// come out sorted by name within each directory. Directories only show up
/// as inputs of their own when they are empty. Dot-files and dot-directories
/// below an input are skipped unless `hidden` is set; `.gitignore` files are
/// not consulted.
///
/// Every path is checked for existence before anything is walked.
pub fn files_from_paths<P: AsRef<Path>>(paths: &[P], hidden: bool) -> Result<Vec<FileInput>> {
    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::invalid_input(format!(
                "the path {} does not exist",
                path.display()
            )));
        }
    }

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    let mut parents: HashSet<String> = HashSet::new();

    for path in paths {
        let input = named_root(path.as_ref())?;
        let base = input.parent().map(Path::to_path_buf).unwrap_or_default();

        let walker = ignore::WalkBuilder::new(&input)
            .standard_filters(false)
            .hidden(!hidden)
            .follow_links(true)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry?;
            let name = relative_name(&base, entry.path())?;

            if let Some((parent, _)) = name.rsplit_once('/') {
                parents.insert(parent.to_string());
            }

            match entry.file_type() {
                Some(kind) if kind.is_dir() => dirs.push(name),
                Some(kind) if kind.is_file() => {
                    files.push(FileInput::path(name, entry.into_path()));
                }
                _ => {
                    tracing::warn!(path = %entry.path().display(), "skipping special file");
                }
            }
        }
    }

    let empty_dirs = dirs
        .into_iter()
        .filter(|dir| !parents.contains(dir))
        .map(FileInput::directory);
    files.extend(empty_dirs);

    tracing::debug!(inputs = files.len(), "collected pack inputs");
    Ok(files)
}

/// A path whose last component is a real name (`.` and `..` resolved).
fn named_root(path: &Path) -> Result<PathBuf> {
    match path.components().next_back() {
        Some(Component::Normal(_)) => Ok(path.to_path_buf()),
        _ => Ok(path.canonicalize()?),
    }
}

fn relative_name(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let mut segments = Vec::new();
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            let segment = segment.to_str().ok_or_else(|| {
                Error::invalid_input(format!("path is not valid UTF-8: {}", path.display()))
            })?;
            segments.push(segment);
        }
    }
    if segments.is_empty() {
        return Err(Error::invalid_input(format!(
            "cannot name input {}",
            path.display()
        )));
    }
    Ok(segments.join("/"))
}
