/// Link detection for incoming Telegram messages.
///
/// The relay only acts on URLs that match one of the configured
/// allow-list prefixes; everything else in a message is ignored.
use once_cell::sync::Lazy;
use regex::Regex;

/// Generic URL pattern to catch any http/https link.
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s<>\[\](){},"']+"#).unwrap()
});

/// Extract every http/https URL from a message, in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether a URL starts with any of the allowed prefixes.
///
/// An empty prefix list allows nothing.
pub fn is_url_allowed(url: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| url.starts_with(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_single_url() {
        let urls = extract_urls("Check this out: https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(urls, vec!["https://www.youtube.com/watch?v=dQw4w9WgXcQ"]);
    }

    #[test]
    fn test_extracts_multiple_urls_in_order() {
        let text = "first https://youtu.be/abc12345678 then http://example.com/v.mp4";
        let urls = extract_urls(text);
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://youtu.be/abc12345678");
        assert_eq!(urls[1], "http://example.com/v.mp4");
    }

    #[test]
    fn test_no_urls() {
        assert!(extract_urls("just a regular message").is_empty());
    }

    #[test]
    fn test_url_stops_at_delimiters() {
        let urls = extract_urls("(see https://example.com/watch?v=x)");
        assert_eq!(urls, vec!["https://example.com/watch?v=x"]);
    }

    #[test]
    fn test_allow_list_prefix_match() {
        let prefixes = vec![
            "https://www.youtube.com/".to_string(),
            "https://youtu.be/".to_string(),
        ];
        assert!(is_url_allowed("https://youtu.be/abc12345678", &prefixes));
        assert!(is_url_allowed(
            "https://www.youtube.com/watch?v=abc",
            &prefixes
        ));
        assert!(!is_url_allowed("https://example.com/video", &prefixes));
    }

    #[test]
    fn test_empty_allow_list_blocks_everything() {
        assert!(!is_url_allowed("https://youtu.be/abc", &[]));
    }
}
