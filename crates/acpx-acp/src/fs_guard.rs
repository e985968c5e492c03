//! Path containment check for `fs/read_text_file` and `fs/write_text_file`
//! (§6): the agent may only touch absolute paths inside the session's cwd
//! subtree.

use crate::error::{AcpError, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize `.`/`..` components without touching the filesystem (the
/// target file may not exist yet, so `canonicalize` isn't an option for
/// writes).
fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Reject any `path` that is not absolute or escapes `cwd`, per §6's
/// "otherwise a non-retryable usage error".
pub fn ensure_within_cwd(path: &Path, cwd: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(AcpError::usage(format!(
            "path {} is not absolute",
            path.display()
        )));
    }

    let normalized = lexically_normalize(path);
    let cwd_normalized = lexically_normalize(cwd);

    if !normalized.starts_with(&cwd_normalized) {
        return Err(AcpError::usage(format!(
            "path {} escapes session cwd {}",
            path.display(),
            cwd.display()
        ))
        .with_detail("FS_PATH_OUTSIDE_CWD"));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_path_inside_cwd() {
        let cwd = Path::new("/home/user/project");
        let path = Path::new("/home/user/project/src/main.rs");
        assert!(ensure_within_cwd(path, cwd).is_ok());
    }

    #[test]
    fn rejects_relative_path() {
        let cwd = Path::new("/home/user/project");
        let path = Path::new("src/main.rs");
        let err = ensure_within_cwd(path, cwd).unwrap_err();
        assert_eq!(err.kind, acpx_protocol::ErrorKind::Usage);
    }

    #[test]
    fn rejects_path_that_escapes_cwd_via_dotdot() {
        let cwd = Path::new("/home/user/project");
        let path = Path::new("/home/user/project/../../etc/passwd");
        let err = ensure_within_cwd(path, cwd).unwrap_err();
        assert_eq!(err.detail_code.as_deref(), Some("FS_PATH_OUTSIDE_CWD"));
    }

    #[test]
    fn rejects_sibling_directory_with_shared_prefix() {
        let cwd = Path::new("/home/user/project");
        let path = Path::new("/home/user/project-other/secret.txt");
        assert!(ensure_within_cwd(path, cwd).is_err());
    }

    #[test]
    fn accepts_cwd_itself() {
        let cwd = Path::new("/home/user/project");
        assert!(ensure_within_cwd(cwd, cwd).is_ok());
    }
}
