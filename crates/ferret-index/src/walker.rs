//! Gitignore-aware source discovery.

use std::path::Path;

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};

use crate::config::{ConfigError, WalkerConfig};
use crate::error::Result;
use crate::languages::{Lang, detect_language};

/// One readable source file. `path` is relative to the walk root with `/` separators.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub language: Lang,
    pub content: String,
    pub content_hash: String,
}

impl SourceFile {
    #[must_use]
    pub fn new(path: impl Into<String>, language: Lang, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            language,
            content_hash: content_hash(&content),
            content,
        }
    }
}

/// Hex blake3 digest used for file and chunk identity.
#[must_use]
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Compile include/exclude globs into an override matcher rooted at `root`.
///
/// # Errors
///
/// Returns [`ConfigError::Glob`] for a pattern the matcher rejects.
pub fn build_overrides(
    root: &Path,
    config: &WalkerConfig,
) -> std::result::Result<Override, ConfigError> {
    let mut builder = OverrideBuilder::new(root);
    for pattern in &config.include {
        builder.add(pattern.trim()).map_err(|e| ConfigError::Glob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }
    for pattern in &config.exclude {
        let negated = format!("!{}", pattern.trim());
        builder.add(&negated).map_err(|e| ConfigError::Glob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
    }
    builder.build().map_err(|e| ConfigError::Glob {
        pattern: String::new(),
        reason: e.to_string(),
    })
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Result of walking a tree.
///
/// `unreadable` holds paths the walk saw but could not read, relative to the
/// root. A directory entry covers everything beneath it and an empty string
/// covers the whole tree. Records under these paths must be left alone rather
/// than treated as deleted.
#[derive(Debug, Default)]
pub struct Walk {
    pub files: Vec<SourceFile>,
    pub unreadable: Vec<String>,
}

impl Walk {
    /// Whether `path` lies under an unreadable entry.
    #[must_use]
    pub fn covers_unreadable(&self, path: &str) -> bool {
        self.unreadable.iter().any(|u| {
            u.is_empty()
                || path == u
                || path.strip_prefix(u.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl From<Vec<SourceFile>> for Walk {
    fn from(files: Vec<SourceFile>) -> Self {
        Self {
            files,
            unreadable: Vec::new(),
        }
    }
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

/// Walk `root` and return every indexable file in path order.
///
/// Files with unknown extensions, over `max_file_bytes`, or not valid UTF-8
/// are skipped. Entries that fail to stat or read are listed in
/// [`Walk::unreadable`].
///
/// # Errors
///
/// Returns an error if the override globs are invalid.
pub fn walk(root: &Path, config: &WalkerConfig) -> Result<Walk> {
    let overrides = build_overrides(root, config)?;
    let walker = WalkBuilder::new(root)
        .hidden(!config.hidden)
        .git_ignore(true)
        .git_exclude(true)
        .require_git(false)
        .follow_links(config.follow_links)
        .overrides(overrides)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let mut out = Walk::default();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let rel = error_path(&e).map_or_else(String::new, |p| relative_path(root, p));
                tracing::warn!(path = %rel, "walk error: {e}");
                out.unreadable.push(rel);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.path();
        let Some(language) = detect_language(path) else {
            continue;
        };
        let rel_path = relative_path(root, path);

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::warn!(file = %rel_path, "metadata failed: {e}");
                out.unreadable.push(rel_path);
                continue;
            }
        };
        if size > config.max_file_bytes {
            tracing::debug!(file = %rel_path, size, "skipping oversized file");
            continue;
        }

        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = %rel_path, "read failed: {e}");
                out.unreadable.push(rel_path);
                continue;
            }
        };
        let Ok(content) = String::from_utf8(bytes) else {
            tracing::debug!(file = %rel_path, "skipping non-UTF-8 file");
            continue;
        };

        out.files.push(SourceFile::new(rel_path, language, content));
    }

    tracing::debug!(
        root = %root.display(),
        files = out.files.len(),
        unreadable = out.unreadable.len(),
        "walk complete"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn walk_finds_known_languages_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", b"fn main() {}\n");
        write(dir.path(), "src/util.py", b"x = 1\n");
        write(dir.path(), "assets/logo.png", b"\x89PNG");

        let files = walk(dir.path(), &WalkerConfig::default()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs", "src/util.py"]);
        assert_eq!(files[0].language, Lang::Rust);
        assert_eq!(files[0].content_hash, content_hash("fn main() {}\n"));
    }

    #[test]
    fn walk_respects_gitignore_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", b"generated/\n");
        write(dir.path(), "generated/out.rs", b"fn gen() {}\n");
        write(dir.path(), "target/debug/build.rs", b"fn b() {}\n");
        write(dir.path(), "src/lib.rs", b"pub fn lib() {}\n");

        let files = walk(dir.path(), &WalkerConfig::default()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/lib.rs"]);
    }

    #[test]
    fn walk_include_restricts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs", b"fn a() {}\n");
        write(dir.path(), "docs/readme.md", b"# hi\n");

        let config = WalkerConfig {
            include: vec!["*.rs".into()],
            ..WalkerConfig::default()
        };
        let files = walk(dir.path(), &config).unwrap().files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/a.rs");
    }

    #[test]
    fn walk_skips_oversized_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.txt", &vec![b'a'; 2048]);
        write(dir.path(), "bad.rs", &[0xff, 0xfe, 0x00, 0x41]);
        write(dir.path(), "ok.rs", b"fn ok() {}\n");

        let config = WalkerConfig {
            max_file_bytes: 1024,
            ..WalkerConfig::default()
        };
        let files = walk(dir.path(), &config).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["ok.rs"]);
    }

    #[test]
    fn unreadable_entries_cover_their_subtree() {
        let walk = Walk {
            files: Vec::new(),
            unreadable: vec!["src/locked".into(), "lib.rs".into()],
        };
        assert!(walk.covers_unreadable("lib.rs"));
        assert!(walk.covers_unreadable("src/locked/a.rs"));
        assert!(!walk.covers_unreadable("src/locked_out.rs"));
        assert!(!walk.covers_unreadable("src/open.rs"));

        let whole = Walk {
            files: Vec::new(),
            unreadable: vec![String::new()],
        };
        assert!(whole.covers_unreadable("anything.rs"));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_reported_not_dropped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.rs", b"fn ok() {}\n");
        write(dir.path(), "locked.rs", b"fn locked() {}\n");
        let locked = dir.path().join("locked.rs");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        if std::fs::read(&locked).is_ok() {
            // running as root; permissions are not enforced
            return;
        }

        let walk = walk(dir.path(), &WalkerConfig::default()).unwrap();
        let paths: Vec<_> = walk.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["ok.rs"]);
        assert_eq!(walk.unreadable, vec!["locked.rs".to_string()]);
    }

    #[test]
    fn content_hash_is_hex_blake3() {
        let h = content_hash("test input");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("test input"));
        assert_ne!(h, content_hash("test input "));
    }
}
