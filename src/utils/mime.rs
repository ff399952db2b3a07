// Extension-based MIME detection for uploaded files

/// MIME type for a file name, by extension. Unknown extensions fall back to
/// `application/octet-stream`.
pub fn from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit('.')
        .next()
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

/// Whether the name carries a recognized image extension.
pub fn is_image_name(name: &str) -> bool {
    from_name(name).starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map_to_image_types() {
        assert_eq!(from_name("photo.JPG"), "image/jpeg");
        assert_eq!(from_name("photo.jpeg"), "image/jpeg");
        assert_eq!(from_name("scan.png"), "image/png");
        assert_eq!(from_name("pic.webp"), "image/webp");
        assert_eq!(from_name("anim.gif"), "image/gif");
        assert_eq!(from_name("old.bmp"), "image/bmp");
    }

    #[test]
    fn unknown_extensions_fall_back() {
        assert_eq!(from_name("notes.txt"), "application/octet-stream");
        assert_eq!(from_name("no_extension"), "application/octet-stream");
        assert!(!is_image_name("archive.zip"));
        assert!(is_image_name("nested/dir/img.PNG"));
    }
}
