//! Where langlink keeps its files, and how project roots are found.

use std::path::{Component, Path, PathBuf};

/// Directory holding per-server settings inside a project root.
pub const SERVER_SETTINGS_DIR: &str = ".lsp";

/// Entries whose presence marks a directory as a project root, nearest first.
const ROOT_MARKERS: &[&str] = &[
    SERVER_SETTINGS_DIR,
    ".git",
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
];

/// `<config dir>/langlink`, e.g. `~/.config/langlink` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("langlink"))
}

/// Default location of the client configuration file.
pub fn default_config_file() -> Option<PathBuf> {
    config_dir().map(|p| p.join("langlink.json"))
}

/// Settings file of one server inside a project: `<root>/.lsp/<server_id>.json`.
pub fn server_settings_file(project_root: &Path, server_id: &str) -> PathBuf {
    project_root
        .join(SERVER_SETTINGS_DIR)
        .join(format!("{server_id}.json"))
}

/// Resolve `.` and `..` lexically, without touching the file system.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .fold(PathBuf::new(), |mut normalized, component| {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other),
            }
            normalized
        })
}

/// Closest ancestor of `start` (itself included) holding a root marker.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| ROOT_MARKERS.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_file_location() {
        let file = default_config_file().unwrap();
        assert!(file.ends_with("langlink/langlink.json"));
    }

    #[test]
    fn test_server_settings_file() {
        let file = server_settings_file(Path::new("/proj"), "rust");
        assert_eq!(file, PathBuf::from("/proj/.lsp/rust.json"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/work/./proj/../proj/src/..")),
            PathBuf::from("/work/proj")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("b"));
    }

    #[test]
    fn test_nearest_marker_wins() {
        let dir = tempdir().unwrap();
        let outer = dir.path().join("repo");
        let inner = outer.join("crates").join("inner");
        std::fs::create_dir_all(outer.join(".git")).unwrap();
        std::fs::create_dir_all(inner.join("src")).unwrap();
        std::fs::write(inner.join("Cargo.toml"), "").unwrap();

        assert_eq!(find_project_root(&inner.join("src")), Some(inner));
        assert_eq!(find_project_root(&outer.join("crates")), Some(outer));
    }
}
