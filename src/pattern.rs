//! Pattern resolution: a literal path or a directory plus a shell-style glob
//! in its last segment. Listing is never recursive.

use globset::{GlobBuilder, GlobMatcher};
use log::{debug, warn};
use std::path::Path;

const WILDCARDS: [char; 3] = ['*', '?', '['];

/// True when the pattern carries a wildcard and needs a directory listing.
pub fn is_pattern(pattern: &str) -> bool {
    pattern.contains(&WILDCARDS[..])
}

/// Split at the last `/` into (directory, glob). No `/` means the current
/// directory; a leading `/` alone means the filesystem root.
pub fn split_pattern(pattern: &str) -> (&str, &str) {
    match pattern.rfind('/') {
        Some(0) => ("/", &pattern[1..]),
        Some(pos) => (&pattern[..pos], &pattern[pos + 1..]),
        None => (".", pattern),
    }
}

fn compile(glob: &str) -> Option<GlobMatcher> {
    match GlobBuilder::new(glob).literal_separator(true).build() {
        Ok(g) => Some(g.compile_matcher()),
        Err(e) => {
            warn!("invalid pattern {:?}: {}", glob, e);
            None
        }
    }
}

fn join_entry(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Resolve `pattern` to matching paths.
///
/// A path that exists is returned as-is, even when its name holds `?` or
/// `[`. Otherwise, without a wildcard there are no matches; with one, the
/// directory is listed and entries whose name matches the glob are kept.
/// Order follows the filesystem and must not be relied on. A directory that
/// cannot be opened yields no matches.
pub fn resolve(pattern: &str) -> Vec<String> {
    if std::fs::metadata(pattern).is_ok() {
        return vec![pattern.to_string()];
    }
    if !is_pattern(pattern) {
        return Vec::new();
    }

    let (dir, glob) = split_pattern(pattern);
    let Some(matcher) = compile(glob) else {
        return Vec::new();
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            warn!("could not open directory {}: {}", dir, e);
            return Vec::new();
        }
    };

    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            debug!("skipping non UTF-8 entry {:?} in {}", name, dir);
            continue;
        };
        if matcher.is_match(Path::new(name)) {
            matches.push(join_entry(dir, name));
        }
    }
    debug!("pattern {} matched {} entries", pattern, matches.len());
    matches
}

/// Prefix a separator-free pattern with a default root, when one is set.
pub fn with_default_root(pattern: &str, default_root: Option<&Path>) -> String {
    match default_root {
        Some(root) if !pattern.contains('/') => join_entry(&root.to_string_lossy(), pattern),
        _ => pattern.to_string(),
    }
}
