//! Pull image entries out of an archive as standalone files, e.g. to show
//! them as thumbnails next to the recompressed archive.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::io::ReadAt;
use crate::raster::ImageKind;
use crate::zip::{ZipExtractor, ZipFileEntry};

/// Image entries of an archive, in Central Directory order.
pub async fn list_images<R: ReadAt>(extractor: &ZipExtractor<R>) -> Result<Vec<(ZipFileEntry, ImageKind)>> {
    let entries = extractor.list_files().await?;
    Ok(entries
        .into_iter()
        .filter(|e| !e.is_directory)
        .filter_map(|e| {
            let kind = ImageKind::from_file_name(&e.file_name);
            kind.is_image().then_some((e, kind))
        })
        .collect())
}

/// Relative path an entry is extracted to, or `None` if its name would
/// escape the destination directory.
pub fn safe_entry_path(file_name: &str, junk_paths: bool) -> Option<PathBuf> {
    let path = Path::new(file_name);
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }

    if junk_paths {
        path.file_name().map(PathBuf::from)
    } else {
        Some(path.to_path_buf())
    }
}

/// Write every image entry below `dest`, returning the written paths.
pub async fn extract_images<R: ReadAt>(
    reader: Arc<R>,
    dest: &Path,
    junk_paths: bool,
) -> Result<Vec<PathBuf>> {
    let extractor = ZipExtractor::new(reader);
    let images = list_images(&extractor).await?;

    let mut written = Vec::with_capacity(images.len());
    for (entry, kind) in images {
        let Some(relative) = safe_entry_path(&entry.file_name, junk_paths) else {
            warn!("Skipping unsafe entry name {}", entry.file_name);
            continue;
        };

        let output_path = dest.join(relative);
        extractor.extract_to_file(&entry, &output_path).await?;
        info!("{} -> {:?}", entry.file_name, kind);
        written.push(output_path);
    }

    Ok(written)
}
