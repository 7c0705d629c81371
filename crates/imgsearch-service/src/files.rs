use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use imgsearch_core::{Error, Result};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Final path component as a string; empty if there is none.
pub fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Image files directly inside `dir`, sorted by name.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("image directory {}", dir.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Operation(e.to_string()))?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Stable item id for an image file: the `<uuid>_` prefix uploads carry, or
/// a name-based UUID of the path. Re-indexing a file overwrites its entry.
pub fn item_id_for(path: &Path) -> String {
    let name = file_name(path);
    if let Some(id) = name.get(..36).and_then(|p| Uuid::parse_str(p).ok()) {
        if name[36..].starts_with('_') {
            return id.to_string();
        }
    }
    Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert!(has_image_extension(Path::new("a/B.JPG")));
        assert!(has_image_extension(Path::new("x.jpeg")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("png")));
    }

    #[test]
    fn uploaded_files_keep_their_id() {
        let id = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
        assert_eq!(item_id_for(Path::new(&format!("/imgs/{id}_cat.jpg"))), id);
    }

    #[test]
    fn other_files_get_a_stable_id() {
        let a = item_id_for(Path::new("/imgs/cat.jpg"));
        assert_eq!(a, item_id_for(Path::new("/imgs/cat.jpg")));
        assert_ne!(a, item_id_for(Path::new("/imgs/dog.jpg")));
    }
}
