//! Path normalization.
//!
//! All paths inside the filesystem are absolute, `/`-separated, without
//! `.`/`..` components, duplicate slashes or a trailing slash. `..` at the
//! root stays at the root.

use crate::error::{FsError, FsResult};

/// The root path.
pub const ROOT: &str = "/";

/// Normalize a path.
///
/// Relative paths are taken relative to the root. Empty paths and paths
/// containing NUL are rejected.
pub fn normalize(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(FsError::invalid_path("empty path"));
    }
    if path.contains('\0') {
        return Err(FsError::invalid_path(path.replace('\0', "\\0")));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        Ok(ROOT.to_string())
    } else {
        Ok(format!("/{}", parts.join("/")))
    }
}

/// Iterate the components of a normalized path.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

/// Split a normalized path into parent and final component.
///
/// Returns `None` for the root.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { ROOT } else { &trimmed[..idx] };
    Some((parent, name))
}

/// Join a name onto a directory path. Absolute `name`s replace the base.
pub fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else if base == ROOT || base.is_empty() {
        format!("/{name}")
    } else {
        format!("{}/{name}", base.trim_end_matches('/'))
    }
}

/// Returns true if `path` is `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
