//! File policy validation
//!
//! `validate` runs before a session exists and collects every violation it
//! finds. `validate_signature` runs on assembled bytes and is the last line
//! against corrupted or disguised files.

use super::types::{FileType, ValidationReport};

/// Longest accepted file name, in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

const FSEQ_MAGIC: &[u8] = b"PSEQ";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87_MAGIC: &[u8] = b"GIF87a";
const GIF89_MAGIC: &[u8] = b"GIF89a";
const EBML_MAGIC: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Check name, extension, MIME type and size for a declared file type
pub fn validate(file_name: &str, size: u64, mime_type: &str, declared: FileType) -> ValidationReport {
    let mut errors = validate_file_name(file_name);
    let mut warnings = Vec::new();

    match extension(file_name) {
        Some(ext) if declared.allowed_extensions().contains(&ext.as_str()) => {}
        Some(ext) => errors.push(format!(
            "extension .{ext} is not allowed for {declared} files (allowed: {})",
            declared.allowed_extensions().join(", ")
        )),
        None => errors.push(format!(
            "file name has no extension (allowed for {declared}: {})",
            declared.allowed_extensions().join(", ")
        )),
    }

    let mime = normalize_mime(mime_type);
    if !declared.expected_mime_types().contains(&mime.as_str()) {
        warnings.push(format!(
            "MIME type '{mime_type}' is unusual for {declared} files; content will be verified after upload"
        ));
    }

    if size == 0 {
        errors.push("file is empty".to_string());
    } else if size > declared.max_size() {
        errors.push(format!(
            "file size {size} exceeds the {declared} limit of {} bytes",
            declared.max_size()
        ));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Safety checks on a client-supplied file name
///
/// Runs before any storage key is built from the name.
pub fn validate_file_name(file_name: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if file_name.trim().is_empty() {
        errors.push("file name is empty".to_string());
        return errors;
    }
    if file_name.len() > MAX_FILE_NAME_LEN {
        errors.push(format!("file name is longer than {MAX_FILE_NAME_LEN} bytes"));
    }
    if file_name.contains("..") {
        errors.push("file name contains a path traversal sequence".to_string());
    }
    if file_name.contains('/') || file_name.contains('\\') {
        errors.push("file name contains a path separator".to_string());
    }
    if file_name.contains('\0') {
        errors.push("file name contains a null byte".to_string());
    }
    if file_name.chars().any(|c| c.is_control() && c != '\0') {
        errors.push("file name contains control characters".to_string());
    }
    if file_name.starts_with('.') {
        errors.push("file name must not start with '.'".to_string());
    }

    errors
}

/// Lowercase extension without the dot
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn normalize_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Compare the leading bytes of a file against the magic numbers for its type
///
/// Types without a single known signature pass.
pub fn validate_signature(bytes: &[u8], declared: FileType) -> bool {
    match declared {
        FileType::Rendered => bytes.starts_with(FSEQ_MAGIC),
        FileType::Source => has_xml_prologue(bytes),
        FileType::Preview => {
            bytes.starts_with(PNG_MAGIC)
                || bytes.starts_with(JPEG_MAGIC)
                || bytes.starts_with(GIF87_MAGIC)
                || bytes.starts_with(GIF89_MAGIC)
                || bytes.starts_with(EBML_MAGIC)
                || is_iso_media(bytes)
        }
        FileType::Asset => true,
    }
}

/// MP4 / QuickTime: box size then `ftyp` at offset 4
fn is_iso_media(bytes: &[u8]) -> bool {
    bytes.get(4..8) == Some(b"ftyp".as_slice())
}

fn has_xml_prologue(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"<?xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_valid_rendered_file() {
        let report = validate("Wizards in Winter.fseq", 20 * MB, "application/octet-stream", FileType::Rendered);
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_mime_mismatch_is_only_a_warning() {
        let report = validate("show.fseq", MB, "video/mp4", FileType::Rendered);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_mime_parameters_ignored() {
        let report = validate("show.xsq", MB, "text/xml; charset=utf-8", FileType::Source);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_accumulates_every_violation() {
        let report = validate(".hidden/../x.exe", 0, "application/x-msdownload", FileType::Asset);
        assert!(!report.valid);
        // hidden, traversal, separator, extension, empty
        assert_eq!(report.errors.len(), 5, "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_size_limits_per_type() {
        assert!(validate("a.fseq", 500 * MB, "application/octet-stream", FileType::Rendered).valid);
        assert!(!validate("a.fseq", 500 * MB + 1, "application/octet-stream", FileType::Rendered).valid);
        assert!(!validate("a.xsq", 100 * MB + 1, "text/xml", FileType::Source).valid);
        assert!(!validate("a.mp3", 50 * MB + 1, "audio/mpeg", FileType::Asset).valid);
        assert!(validate("a.mp4", 200 * MB, "video/mp4", FileType::Preview).valid);
        assert!(!validate("a.mp4", 200 * MB + 1, "video/mp4", FileType::Preview).valid);
    }

    #[test]
    fn test_wrong_extension_for_type() {
        let report = validate("song.mp3", MB, "audio/mpeg", FileType::Rendered);
        assert!(!report.valid);
        assert!(report.errors[0].contains(".mp3"));
    }

    #[test]
    fn test_unsafe_file_names() {
        assert!(!validate_file_name("../etc/passwd.fseq").is_empty());
        assert!(!validate_file_name("show\0.fseq").is_empty());
        assert!(!validate_file_name("dir\\show.fseq").is_empty());
        assert!(!validate_file_name("show\n.fseq").is_empty());
        assert!(!validate_file_name(".env.fseq").is_empty());
        assert!(!validate_file_name("   ").is_empty());
        assert!(!validate_file_name(&format!("{}.fseq", "a".repeat(300))).is_empty());
        assert!(validate_file_name("Carol of the Bells (v2).fseq").is_empty());
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("Show.FSEQ").as_deref(), Some("fseq"));
        assert_eq!(extension("archive.tar.xml").as_deref(), Some("xml"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension("trailing."), None);
    }

    #[test]
    fn test_rendered_signature() {
        assert!(validate_signature(b"PSEQ\x20\x00\x00\x02", FileType::Rendered));
        assert!(!validate_signature(b"ID3\x04", FileType::Rendered));
        assert!(!validate_signature(b"PS", FileType::Rendered));
    }

    #[test]
    fn test_source_signature() {
        assert!(validate_signature(b"<?xml version=\"1.0\"?>", FileType::Source));
        assert!(validate_signature(b"\xEF\xBB\xBF  \n<?xml version", FileType::Source));
        assert!(!validate_signature(b"PK\x03\x04", FileType::Source));
    }

    #[test]
    fn test_preview_signatures() {
        assert!(validate_signature(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], FileType::Preview));
        assert!(validate_signature(&[0xFF, 0xD8, 0xFF, 0xE0], FileType::Preview));
        assert!(validate_signature(b"GIF89a....", FileType::Preview));
        assert!(validate_signature(b"\x00\x00\x00\x18ftypmp42", FileType::Preview));
        assert!(!validate_signature(b"PSEQ", FileType::Preview));
    }

    #[test]
    fn test_asset_passes_trivially() {
        assert!(validate_signature(b"anything", FileType::Asset));
        assert!(validate_signature(b"", FileType::Asset));
    }
}
