use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Matches `href` attributes — the only semantic "link" in HTML.
/// Covers `<a href>`, `<link href>`, `<area href>`.
static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

/// Resolve a raw href against a base URL, returning an absolute URL with
/// fragment stripped.
fn resolve_href(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        base?.join(raw).ok()?
    };
    parsed.set_fragment(None);
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    Some(parsed.to_string())
}

/// Pluggable link extraction over fetched HTML.
pub trait LinkExtractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &str) -> Vec<String>;
}

/// Default extractor: every `href` attribute, resolved and deduplicated.
pub struct HrefLinkExtractor;

impl LinkExtractor for HrefLinkExtractor {
    fn extract(&self, html: &str, base_url: &str) -> Vec<String> {
        let base = url::Url::parse(base_url).ok();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for cap in HREF_RE.captures_iter(html) {
            let raw = &cap[1];
            if let Some(resolved) = resolve_href(raw, base.as_ref()) {
                if seen.insert(resolved.clone()) {
                    links.push(resolved);
                }
            }
        }

        links
    }
}

/// Links split into downloadable documents and same-host pages to follow.
#[derive(Debug, Default)]
pub struct LinkPartition {
    pub documents: Vec<String>,
    pub follow: Vec<String>,
}

/// Whether a URL's path ends in a document extension. `.html`/`.htm` count
/// as pages, not documents.
pub fn is_document_link(link: &str, allowed_extensions: &[String]) -> bool {
    let path = url::Url::parse(link)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| link.to_lowercase());
    allowed_extensions
        .iter()
        .filter(|ext| ext.as_str() != ".html" && ext.as_str() != ".htm")
        .any(|ext| path.ends_with(ext.as_str()))
}

/// Partition extracted links: document links by extension, follow links by
/// same-host.
pub fn partition_links(
    links: &[String],
    base_url: &str,
    allowed_extensions: &[String],
) -> LinkPartition {
    let base_host = url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string));

    let mut partition = LinkPartition::default();
    for link in links {
        if is_document_link(link, allowed_extensions) {
            partition.documents.push(link.clone());
            continue;
        }
        let same_host = match (&base_host, url::Url::parse(link)) {
            (Some(base), Ok(parsed)) => parsed.host_str() == Some(base.as_str()),
            _ => false,
        };
        if same_host {
            partition.follow.push(link.clone());
        }
    }
    partition
}

/// Filename for a document URL: the last path segment, with a fallback for
/// bare hosts.
pub fn filename_from_url(link: &str) -> String {
    let name = url::Url::parse(link)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_default();
    if name.is_empty() {
        "index.html".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str, base: &str) -> Vec<String> {
        HrefLinkExtractor.extract(html, base)
    }

    fn allowed() -> Vec<String> {
        driftnet_common::config::default_allowed_extensions()
    }

    // --- href extraction ---

    #[test]
    fn href_links_are_extracted() {
        let html = r#"<a href="https://example.com/a.pdf">report</a>"#;
        let links = extract(html, "https://example.com");
        assert_eq!(links, vec!["https://example.com/a.pdf"]);
    }

    #[test]
    fn relative_hrefs_resolve_against_base() {
        let html = r#"<a href="/reports/q2.pdf">Q2</a>"#;
        let links = extract(html, "https://example.com/index");
        assert_eq!(links, vec!["https://example.com/reports/q2.pdf"]);
    }

    #[test]
    fn image_src_is_not_extracted() {
        let html = r#"<img src="https://cdn.example.com/banner.png">"#;
        assert!(extract(html, "https://example.com").is_empty());
    }

    #[test]
    fn fragments_are_stripped_and_deduplicated() {
        let html = r#"
            <a href="/page#top">one</a>
            <a href="/page#bottom">two</a>
        "#;
        let links = extract(html, "https://example.com");
        assert_eq!(links, vec!["https://example.com/page"]);
    }

    #[test]
    fn non_http_schemes_are_skipped() {
        let html = r#"
            <a href="mailto:team@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="https://example.com/ok">ok</a>
        "#;
        let links = extract(html, "https://example.com");
        assert_eq!(links, vec!["https://example.com/ok"]);
    }

    // --- partitioning ---

    #[test]
    fn documents_and_follow_links_partition() {
        let links = vec![
            "https://example.com/a.pdf".to_string(),
            "https://example.com/about".to_string(),
            "https://other.com/b.pdf".to_string(),
            "https://other.com/elsewhere".to_string(),
        ];
        let partition = partition_links(&links, "https://example.com/index", &allowed());
        // Document links are taken from any host; follow links stay on the
        // seed's host.
        assert_eq!(
            partition.documents,
            vec!["https://example.com/a.pdf", "https://other.com/b.pdf"]
        );
        assert_eq!(partition.follow, vec!["https://example.com/about"]);
    }

    #[test]
    fn html_links_are_pages_not_documents() {
        let links = vec!["https://example.com/page.html".to_string()];
        let partition = partition_links(&links, "https://example.com", &allowed());
        assert!(partition.documents.is_empty());
        assert_eq!(partition.follow.len(), 1);
    }

    #[test]
    fn query_strings_do_not_confuse_extension_checks() {
        assert!(is_document_link(
            "https://example.com/a.pdf?version=2",
            &allowed()
        ));
        assert!(!is_document_link(
            "https://example.com/page?file=.pdf",
            &allowed()
        ));
    }

    #[test]
    fn filenames_come_from_the_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/docs/annual-report.pdf"),
            "annual-report.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/"), "index.html");
        assert_eq!(filename_from_url("https://example.com"), "index.html");
    }
}
