//! Small filesystem helpers shared by the store and the installer.

use std::path::{Path, PathBuf};

use crate::error::{Result, SignetError};

/// Lists every regular file under `root`, recursively, in sorted order.
///
/// A missing `root` yields an empty list.
pub fn list_files_recursive(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let root_str = root
        .to_str()
        .ok_or_else(|| SignetError::Store(format!("Non UTF-8 path: {}", root.display())))?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root_str));

    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| SignetError::Store(format!("Invalid glob pattern: {}", e)))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Lists the regular files directly inside `dir`, in sorted order.
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_recursive_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("profiles/adhoc");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        tokio::fs::write(dir.path().join("top.txt"), b"x").await.unwrap();
        tokio::fs::write(nested.join("a.mobileprovision"), b"x").await.unwrap();

        let all = list_files_recursive(dir.path()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|p| p.is_file()));

        let flat = list_files(dir.path()).await.unwrap();
        assert_eq!(flat, vec![dir.path().join("top.txt")]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_files_recursive(&missing).unwrap().is_empty());
        assert!(list_files(&missing).await.unwrap().is_empty());
    }
}
