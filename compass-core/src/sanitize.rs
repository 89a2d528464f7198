//! String sanitization applied before constraint checks.
//!
//! Upstream payloads are untrusted: profile fields and analysis text can
//! carry markup or script fragments. Sanitization strips executable
//! content first, then normalizes whitespace, so constraint checks and
//! cached data only ever see the cleaned form.

use once_cell::sync::Lazy;
use regex::Regex;

/// Script elements including their content.
static SCRIPT_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("script block regex is valid")
});

/// Unterminated script opening tags (everything after them is dropped).
static SCRIPT_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*$").expect("script open regex is valid"));

/// Any remaining markup tag.
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"));

/// Inline event-handler attributes (onclick=, onerror=, ...).
static EVENT_HANDLER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\bon\w+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#)
        .expect("event handler regex is valid")
});

/// Executable URI schemes.
static URI_SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(javascript|data)\s*:").expect("uri scheme regex is valid"));

/// Runs of whitespace, collapsed to a single space.
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Sanitize a single string value.
///
/// Order matters: script blocks go first (with their content), then
/// event handlers while their host tags still exist, then every other
/// tag, then executable URI schemes, then whitespace normalization.
pub fn sanitize_string(input: &str) -> String {
    let out = SCRIPT_BLOCK_RE.replace_all(input, "");
    let mut out = SCRIPT_OPEN_RE.replace_all(&out, "").into_owned();
    // Each removal can splice a new occurrence together (a tag inside an
    // event handler, "javajavascript::"), so strip to a fixpoint. Every
    // pass only deletes characters, so this terminates.
    loop {
        let next = EVENT_HANDLER_RE.replace_all(&out, "");
        let next = TAG_RE.replace_all(&next, "");
        let next = URI_SCHEME_RE.replace_all(&next, "").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    let out = WHITESPACE_RE.replace_all(&out, " ");
    out.trim().to_string()
}

/// Whether sanitization would alter the input.
pub fn is_clean(input: &str) -> bool {
    sanitize_string(input) == input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_script_with_content() {
        assert_eq!(sanitize_string("<script>alert(1)</script>Hello"), "Hello");
    }

    #[test]
    fn test_strips_script_case_insensitive_with_attrs() {
        assert_eq!(
            sanitize_string(r#"<SCRIPT type="text/javascript">evil()</SCRIPT>ok"#),
            "ok"
        );
    }

    #[test]
    fn test_strips_unterminated_script() {
        assert_eq!(sanitize_string("safe<script>while(1){}"), "safe");
    }

    #[test]
    fn test_strips_html_tags_keeps_text() {
        assert_eq!(
            sanitize_string("<b>Rust</b> engineer at <i>Example</i>"),
            "Rust engineer at Example"
        );
    }

    #[test]
    fn test_strips_event_handlers() {
        let out = sanitize_string(r#"<img src=x onerror="alert(1)">profile"#);
        assert_eq!(out, "profile");
        assert!(!out.contains("onerror"));
    }

    #[test]
    fn test_strips_executable_uri_schemes() {
        assert_eq!(sanitize_string("javascript:alert(1)"), "alert(1)");
        assert_eq!(
            sanitize_string("data:text/html;base64,xyz"),
            "text/html;base64,xyz"
        );
    }

    #[test]
    fn test_collapses_whitespace_and_trims() {
        assert_eq!(sanitize_string("  hello \n\t world  "), "hello world");
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(sanitize_string("Backend Engineer"), "Backend Engineer");
        assert!(is_clean("Backend Engineer"));
    }

    #[test]
    fn test_markup_is_not_clean() {
        assert!(!is_clean("<b>bold</b>"));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: sanitized output never contains markup tags or
        /// executable URI schemes, whatever the input.
        #[test]
        fn prop_output_has_no_markup(input in ".{0,200}") {
            let out = sanitize_string(&input);
            prop_assert!(!out.contains('<') || !out.contains('>')
                || !TAG_RE.is_match(&out));
            prop_assert!(!URI_SCHEME_RE.is_match(&out));
        }

        /// Property: sanitization is idempotent.
        #[test]
        fn prop_sanitize_idempotent(input in ".{0,200}") {
            let once = sanitize_string(&input);
            let twice = sanitize_string(&once);
            prop_assert_eq!(once, twice);
        }

        /// Property: output never has leading/trailing or doubled spaces.
        #[test]
        fn prop_whitespace_normalized(input in ".{0,200}") {
            let out = sanitize_string(&input);
            prop_assert_eq!(out.trim(), out.as_str());
            prop_assert!(!out.contains("  "));
        }
    }
}
