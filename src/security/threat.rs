//! Signature-based request scanning.
//!
//! Patterns are tested in a fixed order and the first match wins. The scanner
//! is a monitoring aid; whether a match rejects is decided by the caller.

use std::sync::LazyLock;

use regex::Regex;

/// (name, pattern) in evaluation order.
const SIGNATURES: &[(&str, &str)] = &[
    ("path_traversal", r"(\.\.[/\\])+"),
    ("script_tag", r"(?is)<script[^>]*>.*?</script>"),
    ("javascript_uri", r"(?i)javascript:"),
    ("event_handler", r"(?i)on\w+\s*="),
    ("sql_union_select", r"(?i)union.*select"),
    ("exec_call", r"(?i)exec\s*\("),
    ("eval_call", r"(?i)eval\s*\("),
    ("encoded_control", r"(?i)%0[0-9a-f]"),
    ("template_dollar", r"\$\{.*\}"),
    ("template_braces", r"\{\{.*\}\}"),
];

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    SIGNATURES
        .iter()
        .filter_map(|(name, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*name, re)),
            Err(err) => {
                tracing::error!(pattern = name, error = %err, "Invalid threat signature");
                None
            }
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatMatch {
    pub pattern: &'static str,
    pub matched: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreatScanner;

impl ThreatScanner {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, haystack: &str) -> Option<ThreatMatch> {
        PATTERNS.iter().find_map(|(name, re)| {
            re.find(haystack).map(|m| ThreatMatch {
                pattern: name,
                matched: m.as_str().chars().take(100).collect(),
            })
        })
    }

    /// Scan the request parts as one space-joined string.
    pub fn scan_parts(&self, path: &str, query: &str, body: &str, headers: &str) -> Option<ThreatMatch> {
        self.scan(&[path, query, body, headers].join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(input: &str) -> Option<&'static str> {
        ThreatScanner::new().scan(input).map(|m| m.pattern)
    }

    #[test]
    fn test_all_signatures_compile() {
        assert_eq!(PATTERNS.len(), SIGNATURES.len());
    }

    #[test]
    fn test_detects_each_family() {
        assert_eq!(pattern("/files/../../etc/passwd"), Some("path_traversal"));
        assert_eq!(pattern("<script>alert(1)</script>"), Some("script_tag"));
        assert_eq!(pattern("href=JavaScript:void(0)"), Some("javascript_uri"));
        assert_eq!(pattern("<img src=x onerror =boom>"), Some("event_handler"));
        assert_eq!(pattern("1 UNION ALL SELECT password"), Some("sql_union_select"));
        assert_eq!(pattern("exec (cmd)"), Some("exec_call"));
        assert_eq!(pattern("eval(atob(x))"), Some("eval_call"));
        assert_eq!(pattern("name=%0a"), Some("encoded_control"));
        assert_eq!(pattern("${jndi:ldap://x}"), Some("template_dollar"));
        assert_eq!(pattern("{{7*7}}"), Some("template_braces"));
    }

    #[test]
    fn test_first_match_wins() {
        // The script tag also contains an event handler; the earlier signature is reported.
        assert_eq!(pattern("<script onload=x>1</script>"), Some("script_tag"));
    }

    #[test]
    fn test_parts_scan_as_one_line() {
        let scanner = ThreatScanner::new();
        let found = scanner.scan_parts("/api/search", r#"{"q":"${user"}"#, "}", "{}");
        assert_eq!(found.map(|m| m.pattern), Some("template_dollar"));
        assert!(scanner
            .scan_parts("/api/contact", "{}", r#"{"message":"line one\nline two"}"#, "{}")
            .is_none());
    }

    #[test]
    fn test_benign_text_passes() {
        assert_eq!(pattern("/api/contact"), None);
        assert_eq!(
            pattern(r#"{"name":"Dana","message":"We need help with SOC 2 readiness."}"#),
            None
        );
    }
}
