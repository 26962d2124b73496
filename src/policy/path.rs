//! Path resolution for folder-rule matching.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Resolves `path` to an absolute, normalised form.
///
/// Relative paths are joined onto the current directory and `.`/`..`
/// are removed lexically. The longest existing ancestor is then
/// canonicalised, so symlinks are followed even for paths that do not
/// exist yet (a file about to be written).
pub fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let normalized = normalize(&absolute);

    let mut existing = normalized.clone();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return normalized,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Number of path components, used to rank prefix matches.
pub fn depth(path: &Path) -> usize {
    path.components().count()
}
