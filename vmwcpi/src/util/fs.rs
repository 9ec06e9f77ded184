use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// First file under `dir` with extension `ext`, visiting entries in name order
pub fn find_with_extension(dir: &Path, ext: &str) -> Result<Option<PathBuf>> {
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            Error::io(path, e.into())
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .map_or(false, |e| e.eq_ignore_ascii_case(ext))
        {
            return Ok(Some(path.to_path_buf()));
        }
    }
    Ok(None)
}

#[test]
fn test_find_with_extension() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("b")).unwrap();
    std::fs::write(dir.path().join("a.mf"), "").unwrap();
    std::fs::write(dir.path().join("b").join("image.OVF"), "").unwrap();
    std::fs::write(dir.path().join("c.ovf"), "").unwrap();

    assert_eq!(
        find_with_extension(dir.path(), "ovf").unwrap(),
        Some(dir.path().join("b").join("image.OVF"))
    );
    assert_eq!(find_with_extension(dir.path(), "iso").unwrap(), None);
}
