//! Include pattern expansion.
//!
//! `*` matches any run of characters except the path separator, `**` matches
//! across separators. Patterns are translated to an anchored regex and
//! matched against the paths found by walking the directory tree below the
//! pattern's literal prefix.

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use super::ManifestError;

const WILDCARD: char = '*';

pub(crate) fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(WILDCARD)
}

#[derive(Debug)]
pub(crate) struct IncludePattern {
    regex: Regex,
    base: PathBuf,
    /// Number of components below `base`; `None` when `**` makes it unbounded.
    depth: Option<usize>,
}

impl IncludePattern {
    pub(crate) fn new(pattern: &Path) -> Result<Self, ManifestError> {
        let text = pattern.to_string_lossy();
        let regex = Regex::new(&translate(&text)).map_err(|e| ManifestError::InvalidPattern {
            pattern: text.to_string(),
            reason: e.to_string(),
        })?;

        let mut base = PathBuf::new();
        let mut remaining = 0usize;
        let mut in_literal_prefix = true;
        for component in pattern.components() {
            let is_wild = matches!(component, Component::Normal(part) if part.to_string_lossy().contains(WILDCARD));
            if in_literal_prefix && !is_wild {
                base.push(component);
            } else {
                in_literal_prefix = false;
                remaining += 1;
            }
        }

        let depth = if text.contains("**") {
            None
        } else {
            Some(remaining)
        };

        Ok(Self { regex, base, depth })
    }

    pub(crate) fn is_match(&self, path: &Path) -> bool {
        self.regex.is_match(&path.to_string_lossy())
    }

    /// Walks the filesystem and returns every existing path the pattern
    /// matches, in sorted order.
    pub(crate) fn expand(&self) -> Vec<PathBuf> {
        let mut matches = Vec::new();
        if self.base.is_dir() {
            self.walk(&self.base, 0, &mut matches);
        }
        matches.sort();
        matches
    }

    fn walk(&self, dir: &Path, depth: usize, matches: &mut Vec<PathBuf>) {
        if self.depth.is_some_and(|max| depth >= max) {
            return;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if self.is_match(&path) {
                matches.push(path.clone());
            }

            // Recursive patterns do not follow directory symlinks.
            let descend = match self.depth {
                None => entry.file_type().is_ok_and(|t| t.is_dir()),
                Some(_) => path.is_dir(),
            };
            if descend {
                self.walk(&path, depth + 1, matches);
            }
        }
    }
}

fn translate(pattern: &str) -> String {
    let separators = if cfg!(windows) { r"/\\" } else { "/" };
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != WILDCARD {
            literal.push(ch);
            continue;
        }
        regex.push_str(&regex::escape(&literal));
        literal.clear();
        if chars.peek() == Some(&WILDCARD) {
            while chars.peek() == Some(&WILDCARD) {
                chars.next();
            }
            regex.push_str(".*");
        } else {
            regex.push_str(&format!("[^{}]*", separators));
        }
    }
    regex.push_str(&regex::escape(&literal));
    regex.push('$');
    regex
}
