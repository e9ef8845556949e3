use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Resolve the project root: explicit argument, else the PROJECT_ROOT
/// environment variable, else the current working directory.
pub fn resolve_project_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(root) = explicit {
        return root.to_path_buf();
    }
    if let Ok(root) = std::env::var("PROJECT_ROOT") {
        if !root.trim().is_empty() {
            return PathBuf::from(root);
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Compute the Unix socket path for the daemon serving a given project root.
///
/// Each project gets its own socket file in the system temp directory, named
/// from a short hash of the root path, so multiple projects can run their own
/// daemons on one machine without clashing. Same root, same path, across
/// process restarts.
pub fn socket_path(project_root: &Path) -> PathBuf {
    let hash = Sha256::digest(project_root.to_string_lossy().as_bytes());
    let hex = format!("{:x}", hash);
    std::env::temp_dir().join(format!("telegram-mcp-{}.sock", &hex[..8]))
}
