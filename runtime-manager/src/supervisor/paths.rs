//! Engine binary path resolution.

use std::path::{Path, PathBuf};

/// Path of an engine binary inside `dir`, with the platform executable suffix.
pub fn binary_path(dir: &Path, name: &str) -> PathBuf {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() || name.ends_with(suffix) {
        dir.join(name)
    } else {
        dir.join(format!("{}{}", name, suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(windows))]
    fn test_binary_path_unix() {
        assert_eq!(
            binary_path(Path::new("/opt/llama"), "llama-server"),
            PathBuf::from("/opt/llama/llama-server")
        );
    }

    #[test]
    #[cfg(windows)]
    fn test_binary_path_windows() {
        assert_eq!(
            binary_path(Path::new("C:\\llama"), "llama-server"),
            PathBuf::from("C:\\llama\\llama-server.exe")
        );
        assert_eq!(
            binary_path(Path::new("C:\\llama"), "llama-server.exe"),
            PathBuf::from("C:\\llama\\llama-server.exe")
        );
    }
}
