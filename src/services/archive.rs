// ZIP archive expansion into scannable work items

use anyhow::{Context, Result};
use std::io::{Cursor, Read};
use tracing::{debug, warn};

use crate::core::types::WorkItem;
use crate::utils::mime;

/// Expands a ZIP upload into one work item per contained image.
///
/// Never fails: an unreadable archive contributes no items, and unreadable
/// or non-image entries inside a readable archive are skipped. The scan
/// continues with whatever was recovered.
pub fn expand_zip(archive_name: &str, bytes: &[u8]) -> Vec<WorkItem> {
    match try_expand(archive_name, bytes) {
        Ok(items) => items,
        Err(err) => {
            warn!(archive = %archive_name, error = %format!("{err:#}"), "Failed to read archive, skipping");
            Vec::new()
        }
    }
}

fn try_expand(archive_name: &str, bytes: &[u8]) -> Result<Vec<WorkItem>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a readable ZIP archive")?;

    let mut items = Vec::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(archive = %archive_name, index, error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let entry_name = entry.name().to_string();
        if !mime::is_image_name(&entry_name) {
            debug!(archive = %archive_name, entry = %entry_name, "Skipping non-image entry");
            continue;
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        if let Err(err) = entry.read_to_end(&mut data) {
            warn!(archive = %archive_name, entry = %entry_name, error = %err, "Skipping entry that failed to decompress");
            continue;
        }

        // display name keeps the archive for traceability, drops inner dirs
        let basename = entry_name.rsplit('/').next().unwrap_or(&entry_name);
        items.push(WorkItem::new(
            format!("{archive_name}/{basename}"),
            mime::from_name(&entry_name),
            data,
        ));
    }

    debug!(archive = %archive_name, images = items.len(), "Archive expanded");
    Ok(items)
}

/// Archive types routed to expansion versus rejected up front.
pub fn is_zip_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".zip")
}

pub fn is_rar_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".rar")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn images_are_extracted_and_named_after_the_archive() {
        let bytes = build_zip(&[
            ("photos/a.jpg", b"jpegdata"),
            ("readme.txt", b"not an image"),
            ("b.png", b"pngdata"),
        ]);
        let items = expand_zip("upload.zip", &bytes);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "upload.zip/a.jpg");
        assert_eq!(items[0].mime_type, "image/jpeg");
        assert_eq!(items[0].bytes.as_slice(), b"jpegdata");
        assert_eq!(items[1].name, "upload.zip/b.png");
    }

    #[test]
    fn corrupt_archive_yields_no_items() {
        let items = expand_zip("broken.zip", b"this is not a zip file");
        assert!(items.is_empty());
    }

    #[test]
    fn archive_name_detection() {
        assert!(is_zip_name("a.ZIP"));
        assert!(!is_zip_name("a.zip.txt"));
        assert!(is_rar_name("b.rar"));
        assert!(!is_rar_name("b.zip"));
    }
}
