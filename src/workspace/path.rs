//! Tenant-relative path resolution
//!
//! Every path handed to the engine is resolved here before any I/O.
//! Input is percent-decoded exactly once, separators are unified, and the
//! result must stay under the workspace root without crossing a symlink.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves relative paths inside a single workspace root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for an existing workspace root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathResolver { root: root.into() }
    }

    /// Workspace root this resolver confines to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` to an absolute path under the root.
    ///
    /// An empty path (or one made only of `.` segments) resolves to the
    /// root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let segments = normalize(relative)?;

        let mut resolved = self.root.clone();
        for segment in &segments {
            resolved.push(segment);
        }

        if !is_confined(&self.root, &resolved) {
            return Err(violation(relative, "resolves outside the workspace"));
        }

        self.reject_symlinks(&segments, relative)?;

        Ok(resolved)
    }

    /// Relative display form of a resolved path
    pub fn relative_display(&self, resolved: &Path) -> String {
        resolved
            .strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default()
    }

    /// Walk from the root to the target and refuse any existing symlink.
    ///
    /// Uses `symlink_metadata` so links are never followed.
    fn reject_symlinks(&self, segments: &[String], original: &str) -> Result<()> {
        let mut current = self.root.clone();
        for segment in segments {
            current.push(segment);
            match std::fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(violation(original, "symbolic links are not allowed"));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

/// Decode once and split a caller path into safe segments
fn normalize(input: &str) -> Result<Vec<String>> {
    let decoded = urlencoding::decode(input)
        .map_err(|_| violation(input, "path is not valid UTF-8 after decoding"))?;

    if decoded.contains('\0') {
        return Err(violation(input, "path contains a NUL byte"));
    }

    let unified = decoded.replace('\\', "/");

    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(violation(input, "absolute paths are not allowed"));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(violation(input, "parent directory segments are not allowed")),
            other => segments.push(other.to_string()),
        }
    }

    Ok(segments)
}

/// `C:` / `c:foo` style prefixes
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Root itself, or a path with the root as a strict component prefix
fn is_confined(root: &Path, candidate: &Path) -> bool {
    if candidate == root {
        return true;
    }
    if !candidate.starts_with(root) {
        return false;
    }
    candidate
        .strip_prefix(root)
        .map(|rest| rest.components().all(|c| matches!(c, Component::Normal(_))))
        .unwrap_or(false)
}

fn violation(input: &str, reason: &str) -> Error {
    Error::PathViolation(format!("'{}': {}", input, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn resolver() -> (tempfile::TempDir, PathResolver) {
        let dir = tempdir().unwrap();
        let resolver = PathResolver::new(dir.path().to_path_buf());
        (dir, resolver)
    }

    #[test]
    fn test_rejects_traversal_variants() {
        let (_dir, resolver) = resolver();
        let attempts = [
            "../etc/passwd",
            "../../etc/passwd",
            "a/../../b",
            "a/b/..",
            "..",
            "..\\windows\\system32",
            "a\\..\\..\\b",
            "a/..\\b",
            "%2e%2e/etc/passwd",
            "%2E%2E%2Fetc%2Fpasswd",
            "a%5c..%5cb",
            "./../x",
        ];
        for attempt in attempts {
            let err = resolver.resolve(attempt).unwrap_err();
            assert!(
                matches!(err, Error::PathViolation(_)),
                "expected violation for {attempt}"
            );
        }
    }

    #[test]
    fn test_rejects_absolute_paths() {
        let (_dir, resolver) = resolver();
        for attempt in ["/etc/passwd", "\\etc\\passwd", "C:\\Windows", "c:foo", "%2Fetc"] {
            assert!(matches!(
                resolver.resolve(attempt),
                Err(Error::PathViolation(_))
            ));
        }
    }

    #[test]
    fn test_decodes_only_once() {
        let (_dir, resolver) = resolver();
        // %252e decodes once to the literal "%2e", a normal file name
        let path = resolver.resolve("%252e%252e/file.txt").unwrap();
        assert!(path.starts_with(resolver.root()));
        assert!(path.ends_with("%2e%2e/file.txt"));
    }

    #[test]
    fn test_root_is_valid_target() {
        let (dir, resolver) = resolver();
        assert_eq!(resolver.resolve("").unwrap(), dir.path());
        assert_eq!(resolver.resolve(".").unwrap(), dir.path());
        assert_eq!(resolver.resolve("./").unwrap(), dir.path());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let (_dir, resolver) = resolver();
        let first = resolver.resolve("notes/today.md").unwrap();
        let second = resolver.resolve("notes/today.md").unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.relative_display(&first), "notes/today.md");
    }

    #[test]
    fn test_collapses_redundant_separators() {
        let (_dir, resolver) = resolver();
        assert_eq!(
            resolver.resolve("a//b/./c.txt").unwrap(),
            resolver.resolve("a/b/c.txt").unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_target_and_ancestors() {
        let (dir, resolver) = resolver();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "s").unwrap();

        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        assert!(matches!(
            resolver.resolve("link.txt"),
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            resolver.resolve("escape/secret.txt"),
            Err(Error::PathViolation(_))
        ));
        assert!(matches!(
            resolver.resolve("escape/new.txt"),
            Err(Error::PathViolation(_))
        ));
    }

    #[test]
    fn test_confinement_check() {
        let root = Path::new("/srv/ws/acme/default");
        assert!(is_confined(root, root));
        assert!(is_confined(root, Path::new("/srv/ws/acme/default/a.txt")));
        assert!(!is_confined(root, Path::new("/srv/ws/acme/default-other/a.txt")));
        assert!(!is_confined(root, Path::new("/srv/ws/acme")));
    }
}
