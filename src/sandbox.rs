//! Confinement of client-supplied paths to the served root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{LdtError, Result};

/// A canonical root directory that client paths are resolved against.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Canonicalize `root` once; it must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(LdtError::NotFound(format!(
                "root is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path to an absolute path under the root.
    ///
    /// Leading slashes, backslashes and whitespace are stripped, so `/a` and
    /// `a` name the same entry. The result is checked after symlinks and `..`
    /// are resolved:
    /// 1. NUL bytes and absolute/prefix components are rejected
    /// 2. Each existing symlink along the way is canonicalized
    /// 3. The final path must equal the root or live below it
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        if rel.contains('\0') {
            return Err(LdtError::SecurityViolation(
                "path contains NUL byte".to_string(),
            ));
        }
        let trimmed =
            rel.trim_start_matches(|c: char| c == '/' || c == '\\' || c.is_whitespace());

        let mut cur = self.root.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    cur.pop();
                }
                Component::Normal(s) => {
                    cur.push(s);
                    let is_link = fs::symlink_metadata(&cur)
                        .map(|md| md.file_type().is_symlink())
                        .unwrap_or(false);
                    if is_link {
                        // Never follow (or report on) links outside the root
                        if !cur.starts_with(&self.root) {
                            return Err(self.escape(rel));
                        }
                        cur = match fs::canonicalize(&cur) {
                            Ok(p) => p,
                            Err(_) => return Err(self.dangling(&cur, rel)),
                        };
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(LdtError::SecurityViolation(format!(
                        "path {:?} contains disallowed component",
                        rel
                    )));
                }
            }
        }

        if !cur.starts_with(&self.root) {
            return Err(self.escape(rel));
        }
        Ok(cur)
    }

    fn escape(&self, rel: &str) -> LdtError {
        LdtError::SecurityViolation(format!("path traversal attempt blocked: {:?}", rel))
    }

    /// Error for a link that cannot be followed. Targets pointing outside
    /// the root are reported as escapes, not as missing files.
    fn dangling(&self, link: &Path, rel: &str) -> LdtError {
        let target = match fs::read_link(link) {
            Ok(t) => t,
            Err(_) => return self.escape(rel),
        };
        let mut abs = link.parent().map(Path::to_path_buf).unwrap_or_default();
        for component in target.components() {
            match component {
                Component::ParentDir => {
                    abs.pop();
                }
                Component::CurDir => {}
                other => abs.push(other.as_os_str()),
            }
        }
        if abs.starts_with(&self.root) {
            LdtError::NotFound(format!("dangling link: {}", rel))
        } else {
            self.escape(rel)
        }
    }
}
