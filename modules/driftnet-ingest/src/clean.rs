// Content cleaning. Minimal by design: collapse whitespace runs and trim.
// Structural preservation beyond that is a non-goal.

/// Normalize runs of whitespace (including newlines) to single spaces and
/// trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip HTML down to readable text.
pub fn strip_html(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 120).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(
            normalize_whitespace("  Hello,\n\n   world.\t\t "),
            "Hello, world."
        );
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize_whitespace("   \n\t  "), "");
    }

    #[test]
    fn html_tags_are_stripped() {
        let text = strip_html("<html><body><h1>Title</h1><p>Some <b>bold</b> text.</p></body></html>");
        assert!(text.contains("Title"));
        assert!(text.contains("bold"));
        assert!(!text.contains("<p>"));
    }
}
