// Document type detection: filename extension and magic bytes, where the
// magic wins any disagreement.

use driftnet_common::DocumentType;

/// Magic-byte signatures for binary formats we recognize.
fn detect_by_magic(bytes: &[u8]) -> Option<DocumentType> {
    if bytes.starts_with(b"%PDF") {
        return Some(DocumentType::Pdf);
    }
    let image_magics: [&[u8]; 6] = [
        b"\x89PNG",
        b"\xff\xd8\xff",
        b"GIF87a",
        b"GIF89a",
        b"II*\x00",
        b"MM\x00*",
    ];
    if image_magics.iter().any(|m| bytes.starts_with(m)) {
        return Some(DocumentType::Image);
    }
    if bytes.starts_with(b"BM") && bytes.len() > 14 {
        return Some(DocumentType::Image);
    }
    None
}

fn detect_by_extension(filename: &str) -> Option<DocumentType> {
    let lower = filename.to_lowercase();
    let ext = lower.rsplit('.').next()?;
    match ext {
        "pdf" => Some(DocumentType::Pdf),
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" => Some(DocumentType::Image),
        "html" | "htm" => Some(DocumentType::Html),
        "txt" | "md" | "csv" | "json" => Some(DocumentType::Text),
        "doc" | "docx" => Some(DocumentType::Office),
        _ => None,
    }
}

/// Detect a document's type from its filename and content. Extension and
/// magic must agree; when they disagree the magic wins. Files with no
/// recognized extension and no recognized magic are `Other` (extracted as
/// plain text).
pub fn detect_type(filename: &str, bytes: &[u8]) -> DocumentType {
    match (detect_by_magic(bytes), detect_by_extension(filename)) {
        (Some(magic), _) => magic,
        (None, Some(ext)) => ext,
        (None, None) => DocumentType::Other,
    }
}

/// Whether a filename's extension is on the ingestion whitelist.
pub fn extension_allowed(filename: &str, allowed: &[String]) -> bool {
    let lower = filename.to_lowercase();
    allowed.iter().any(|ext| lower.ends_with(ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_wins_over_extension() {
        assert_eq!(detect_type("report.txt", b"%PDF-1.7 ..."), DocumentType::Pdf);
        assert_eq!(
            detect_type("photo.pdf", b"\x89PNG\r\n\x1a\n...."),
            DocumentType::Image
        );
    }

    #[test]
    fn extension_decides_text_formats() {
        assert_eq!(detect_type("page.html", b"<html></html>"), DocumentType::Html);
        assert_eq!(detect_type("notes.txt", b"plain text"), DocumentType::Text);
        assert_eq!(detect_type("memo.docx", b"PK..."), DocumentType::Office);
    }

    #[test]
    fn image_magics_are_recognized() {
        assert_eq!(detect_type("f", b"\xff\xd8\xff\xe0JFIF"), DocumentType::Image);
        assert_eq!(detect_type("f", b"GIF89a......"), DocumentType::Image);
        assert_eq!(detect_type("f", b"II*\x00........"), DocumentType::Image);
    }

    #[test]
    fn unknown_everything_is_other() {
        assert_eq!(detect_type("blob.xyz", b"\x00\x01\x02"), DocumentType::Other);
        assert_eq!(detect_type("noext", b"hello"), DocumentType::Other);
    }

    #[test]
    fn whitelist_check_is_case_insensitive() {
        let allowed = vec![".pdf".to_string(), ".txt".to_string()];
        assert!(extension_allowed("Report.PDF", &allowed));
        assert!(extension_allowed("notes.txt", &allowed));
        assert!(!extension_allowed("archive.zip", &allowed));
    }
}
