//! Repository path helpers
//!
//! Repository paths are always absolute, `/`-separated, NFC normalized and
//! carry no trailing slash (except the root itself).

use unicode_normalization::UnicodeNormalization;

/// Normalize a path: NFC, leading slash, no `.`/`..`/empty segments, no trailing slash
pub fn clean(path: &str) -> String {
    let normalized: String = path.nfc().collect();

    let mut parts: Vec<&str> = Vec::new();
    for elem in normalized.split('/') {
        match elem {
            "" | "." => continue,
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return "/".to_string();
    }

    let mut result = String::with_capacity(normalized.len() + 1);
    for part in parts {
        result.push('/');
        result.push_str(part);
    }

    result
}

/// Join a directory path and a child name
pub fn join(dir: &str, name: &str) -> String {
    clean(&format!("{}/{}", dir, name))
}

/// Parent directory of `path`; the root is its own parent
pub fn dirname(path: &str) -> String {
    let path = clean(path);
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Last element of `path`; empty for the root
pub fn basename(path: &str) -> String {
    let path = clean(path);
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path,
    }
}

/// Path elements below the root
pub fn split(path: &str) -> Vec<String> {
    clean(path)
        .split('/')
        .filter(|elem| !elem.is_empty())
        .map(|elem| elem.to_string())
        .collect()
}

/// True if `child` equals `parent` or lives somewhere below it
pub fn is_within(parent: &str, child: &str) -> bool {
    let parent = clean(parent);
    let child = clean(child);
    if parent == "/" {
        return true;
    }

    match child.strip_prefix(&parent) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Number of elements below the root
pub fn depth(path: &str) -> usize {
    split(path).len()
}
