use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::data::preprocess::has_image_extension;
use crate::error::{FoodError, Result};

/// Immediate subdirectory names of `dir`, sorted lexicographically so class
/// order does not depend on the platform's directory listing order.
pub fn list_class_dirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(FoodError::config(format!("directory {} not found", dir.display())));
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => warn!(name = ?raw, "skipping class folder with non UTF-8 name"),
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Chooses the class set from the available folders.
///
/// Without keywords every folder is kept. With keywords, each keyword picks
/// the first folder (in sorted order) whose name contains it,
/// case-insensitively; a folder is never picked twice. The result follows
/// keyword order. Either way the list is truncated to `max_classes`.
pub fn select_classes(available: &[String], keywords: &[String], max_classes: usize) -> Vec<String> {
    let mut selected: Vec<String> = if keywords.is_empty() {
        available.to_vec()
    } else {
        let mut picked: Vec<String> = Vec::new();
        for keyword in keywords {
            let needle = keyword.to_lowercase();
            let hit = available.iter()
                .find(|name| name.to_lowercase().contains(&needle) && !picked.contains(name));
            match hit {
                Some(name) => picked.push(name.clone()),
                None => debug!(keyword = %keyword, "no class folder matches keyword"),
            }
        }
        picked
    };
    selected.truncate(max_classes);
    selected
}

/// Image files directly inside `dir`, sorted by file name.
///
/// A missing folder yields no files: an empty class contributes zero samples.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// `(path, class index)` pairs for every image of every class under `root`.
pub fn collect_samples(root: &Path, classes: &[String]) -> Result<Vec<(PathBuf, usize)>> {
    let mut samples = Vec::new();
    for (label, class) in classes.iter().enumerate() {
        let files = list_images(&root.join(class))?;
        if files.is_empty() {
            warn!(split = %root.display(), class = %class, "class folder has no images");
        }
        samples.extend(files.into_iter().map(|p| (p, label)));
    }
    Ok(samples)
}
