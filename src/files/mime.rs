//! Supported file types

use std::path::Path;

pub const MIME_UNKNOWN: &str = "vmime/unknown";
pub const UNKNOWN_EXTENSION: &str = "vstor";

pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/bmp"];
pub const VIDEO_TYPES: &[&str] = &["video/mp4", "video/mov", "video/3gpp"];
pub const DOC_TYPES: &[&str] = &[
    "application/msword",
    "application/msexcel",
    "application/pdf",
    "application/txt",
];
pub const CONTACT_TYPES: &[&str] = &["text/vcard"];
pub const AUDIO_TYPES: &[&str] = &["audio/mpeg", "audio/mp4", "audio/wav", "audio/aac"];

/// Extension to mime type. The first extension listed for a mime type is its canonical one.
const EXTENSION_TABLE: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("mp4", "video/mp4"),
    ("mov", "video/mov"),
    ("3gp", "video/3gpp"),
    ("doc", "application/msword"),
    ("xls", "application/msexcel"),
    ("pdf", "application/pdf"),
    ("txt", "application/txt"),
    ("vcf", "text/vcard"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("wav", "audio/wav"),
    ("aac", "audio/aac"),
    (UNKNOWN_EXTENSION, MIME_UNKNOWN),
];

pub fn supported_types() -> &'static [(&'static str, &'static str)] {
    EXTENSION_TABLE
}

/// Mime type for an extension, `vmime/unknown` when unsupported
pub fn mime_for_extension(extension: &str) -> &'static str {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    EXTENSION_TABLE
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
        .unwrap_or(MIME_UNKNOWN)
}

/// Canonical extension for a mime type, `vstor` when unsupported
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    EXTENSION_TABLE
        .iter()
        .find(|(_, mime)| *mime == mime_type)
        .map(|(ext, _)| *ext)
        .unwrap_or(UNKNOWN_EXTENSION)
}

pub fn is_mime_type_supported(mime_type: &str) -> bool {
    EXTENSION_TABLE.iter().any(|(_, mime)| *mime == mime_type)
}

pub fn is_extension_supported(extension: &str) -> bool {
    let extension = extension.to_ascii_lowercase();
    EXTENSION_TABLE.iter().any(|(ext, _)| *ext == extension)
}

/// Mime type and extension of a file on disk, derived from its name
pub fn mime_and_extension(path: &Path) -> (&'static str, String) {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if is_extension_supported(ext) => {
            (mime_for_extension(ext), ext.to_ascii_lowercase())
        }
        _ => (MIME_UNKNOWN, UNKNOWN_EXTENSION.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(mime_for_extension("jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("JPEG"), "image/jpeg");
        assert_eq!(mime_for_extension(".pdf"), "application/pdf");
        assert_eq!(mime_for_extension("3gp"), "video/3gpp");
        assert_eq!(mime_for_extension("exe"), MIME_UNKNOWN);
    }

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("audio/mp4"), "m4a");
        assert_eq!(extension_for_mime("application/zip"), "vstor");
    }

    #[test]
    fn test_supported_checks() {
        assert!(is_mime_type_supported("text/vcard"));
        assert!(!is_mime_type_supported("text/html"));
        assert!(is_extension_supported("WAV"));
        assert!(!is_extension_supported("html"));
    }

    #[test]
    fn test_mime_from_path() {
        let (mime, ext) = mime_and_extension(Path::new("/tmp/Holiday.PNG"));
        assert_eq!(mime, "image/png");
        assert_eq!(ext, "png");

        let (mime, ext) = mime_and_extension(Path::new("/tmp/archive.tar.gz"));
        assert_eq!(mime, MIME_UNKNOWN);
        assert_eq!(ext, "vstor");

        let (_, ext) = mime_and_extension(Path::new("/tmp/README"));
        assert_eq!(ext, "vstor");
    }
}
