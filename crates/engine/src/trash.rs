use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

/// Name of the recoverable trash directory created next to the source file.
const TRASH_DIR: &str = ".trash";

/// Move a file into a sibling `.trash` directory so the user can recover it.
///
/// Rename within the same filesystem, so this is atomic and cheap. A name
/// collision in the trash gets a unique prefix instead of overwriting the
/// previously trashed file.
pub fn move_to_trash(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .with_context(|| format!("No parent directory for: {}", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("No file name for: {}", path.display()))?;

    let trash_dir = parent.join(TRASH_DIR);
    std::fs::create_dir_all(&trash_dir)
        .with_context(|| format!("Failed to create trash directory: {}", trash_dir.display()))?;

    let mut dest = trash_dir.join(name);
    if dest.exists() {
        let unique = format!("{}-{}", uuid::Uuid::new_v4(), name.to_string_lossy());
        dest = trash_dir.join(unique);
    }

    std::fs::rename(path, &dest)
        .with_context(|| format!("Failed to move {} to trash", path.display()))?;

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moves_file_into_sibling_trash_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mp4");
        std::fs::write(&file, b"data").unwrap();

        let dest = move_to_trash(&file).unwrap();

        assert!(!file.exists());
        assert_eq!(dest, dir.path().join(".trash").join("movie.mp4"));
        assert_eq!(std::fs::read(&dest).unwrap(), b"data");
    }

    #[test]
    fn test_collision_keeps_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mp4");

        std::fs::write(&file, b"first").unwrap();
        let first = move_to_trash(&file).unwrap();

        std::fs::write(&file, b"second").unwrap();
        let second = move_to_trash(&file).unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"first");
        assert_eq!(std::fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = move_to_trash(&dir.path().join("gone.mp4")).unwrap_err();
        assert!(format!("{err:#}").contains("to trash"));
    }
}
