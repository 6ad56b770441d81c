//! Structured-text extraction from model output
//!
//! Model responses are free-form markdown; these functions pull out the
//! pieces the orchestrator consumes: the first fenced code block and the
//! `##`-headed sections. Everything here is a total function over arbitrary
//! input - absence of structure yields `None` or an empty list, never an
//! error. Parsing is a two-phase line scan: find line-anchored delimiters,
//! then slice.

/// Extract the trimmed inner content of the first fenced code block.
///
/// The opening fence must occupy its own line and may carry a language tag
/// (```` ```html ````). The closing fence must occupy its own line too
/// (whitespace padding allowed); backticks appearing inline within content
/// do not terminate the block. A missing closing fence captures to the end
/// of the input, tolerating truncated responses. An empty body yields
/// `None`.
pub fn extract_fenced_block(text: &str) -> Option<String> {
    let mut offset = 0;
    let mut body_start: Option<usize> = None;
    let mut body_end = text.len();

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        match body_start {
            None => {
                if is_opening_fence(line.trim()) {
                    body_start = Some(line_start + line.len());
                }
            }
            Some(_) => {
                if line.trim() == "```" {
                    body_end = line_start;
                    break;
                }
            }
        }
    }

    let body = text.get(body_start?..body_end)?.trim();
    if body.is_empty() { None } else { Some(body.to_string()) }
}

/// A fence opener is ``` followed by at most one tag token and nothing
/// else; anything containing further backticks is inline content.
fn is_opening_fence(line: &str) -> bool {
    match line.strip_prefix("```") {
        Some(rest) => !rest.contains('`') && rest.split_whitespace().count() <= 1,
        None => false,
    }
}

/// Extract the trimmed body of the `## <heading>` section.
///
/// The heading is matched case-insensitively at line start; the body runs
/// until the next level-2 heading or the end of the input. Returns `None`
/// when the heading is absent.
pub fn extract_section(text: &str, heading: &str) -> Option<String> {
    let mut offset = 0;
    let mut body_start: Option<usize> = None;
    let mut body_end = text.len();

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        match body_start {
            None => {
                if section_heading_name(line).is_some_and(|name| name.eq_ignore_ascii_case(heading)) {
                    body_start = Some(line_start + line.len());
                }
            }
            Some(_) => {
                if section_heading_name(line).is_some() {
                    body_end = line_start;
                    break;
                }
            }
        }
    }

    Some(text.get(body_start?..body_end)?.trim().to_string())
}

/// Parse a line as a level-2 markdown heading, returning its name.
///
/// Requires `##` at line start followed by whitespace, which also rejects
/// deeper headings (`###`).
fn section_heading_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("##")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

/// Normalize a markdown bullet section into plain text lines.
///
/// Strips leading bullet/quote markers (`-`, `*`, `>`) and surrounding
/// whitespace, dropping lines that end up empty.
pub fn normalize_bullet_lines(section: &str) -> Vec<String> {
    section
        .lines()
        .map(|line| {
            line.trim_start_matches(|c: char| c.is_whitespace() || c == '>' || c == '*' || c == '-')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_tagged_fence() {
        assert_eq!(extract_fenced_block("```html\nX\n```").as_deref(), Some("X"));
        assert_eq!(extract_fenced_block("```HTML\nX\n```").as_deref(), Some("X"));
    }

    #[test]
    fn test_extract_untagged_fence() {
        assert_eq!(extract_fenced_block("before\n```\n<p>hi</p>\n```\nafter").as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn test_inline_backticks_do_not_close() {
        let text = "```html\nconst s = \"```\";\nmore\n```\n";
        assert_eq!(extract_fenced_block(text).as_deref(), Some("const s = \"```\";\nmore"));
    }

    #[test]
    fn test_missing_closing_fence_captures_to_end() {
        let text = "intro\n```html\n<html>\n<body>truncated";
        assert_eq!(extract_fenced_block(text).as_deref(), Some("<html>\n<body>truncated"));
    }

    #[test]
    fn test_whitespace_padded_closing_fence() {
        assert_eq!(extract_fenced_block("```html\nX\n   ```   \n").as_deref(), Some("X"));
    }

    #[test]
    fn test_no_fence_returns_none() {
        assert_eq!(extract_fenced_block("just prose, `inline code` only"), None);
    }

    #[test]
    fn test_empty_body_returns_none() {
        assert_eq!(extract_fenced_block("```html\n```"), None);
        assert_eq!(extract_fenced_block("```html\n\n   \n```"), None);
    }

    #[test]
    fn test_inline_fence_pair_is_not_an_opener() {
        // A one-line ```js x``` is content, not a block
        assert_eq!(extract_fenced_block("see ```js x``` inline"), None);
    }

    #[test]
    fn test_first_block_wins() {
        let text = "```\nfirst\n```\n```\nsecond\n```";
        assert_eq!(extract_fenced_block(text).as_deref(), Some("first"));
    }

    #[test]
    fn test_extract_section_basic() {
        let text = "intro\n## Architecture\nfoo\nbar\n## Code\nrest";
        assert_eq!(extract_section(text, "Architecture").as_deref(), Some("foo\nbar"));
    }

    #[test]
    fn test_extract_section_case_insensitive() {
        let text = "## product\n- thing\n";
        assert_eq!(extract_section(text, "Product").as_deref(), Some("- thing"));
    }

    #[test]
    fn test_extract_section_runs_to_end() {
        let text = "## Product\nlast section";
        assert_eq!(extract_section(text, "Product").as_deref(), Some("last section"));
    }

    #[test]
    fn test_extract_section_absent() {
        assert_eq!(extract_section("## Product\nstuff", "Architecture"), None);
    }

    #[test]
    fn test_extract_section_deeper_heading_is_body() {
        let text = "## Product\n### Detail\nmore\n## Code\nx";
        assert_eq!(extract_section(text, "Product").as_deref(), Some("### Detail\nmore"));
    }

    #[test]
    fn test_extract_section_requires_line_start() {
        assert_eq!(extract_section("  ## Product\nstuff", "Product"), None);
    }

    #[test]
    fn test_extract_section_empty_body() {
        assert_eq!(extract_section("## Product\n## Code\nx", "Product").as_deref(), Some(""));
    }

    #[test]
    fn test_normalize_bullet_lines() {
        let section = "- one\n  * two\n> three\n\n   \nplain";
        assert_eq!(normalize_bullet_lines(section), vec!["one", "two", "three", "plain"]);
    }

    #[test]
    fn test_normalize_strips_marker_runs() {
        assert_eq!(normalize_bullet_lines("- - mixed > markers"), vec!["mixed > markers"]);
    }

    proptest! {
        #[test]
        fn prop_extraction_never_panics(text in any::<String>()) {
            let _ = extract_fenced_block(&text);
            let _ = extract_section(&text, "Product");
            let _ = normalize_bullet_lines(&text);
        }

        #[test]
        fn prop_extraction_is_deterministic(text in any::<String>()) {
            prop_assert_eq!(extract_fenced_block(&text), extract_fenced_block(&text));
            prop_assert_eq!(extract_section(&text, "Architecture"), extract_section(&text, "Architecture"));
        }

        #[test]
        fn prop_extracted_block_is_trimmed(text in any::<String>()) {
            if let Some(body) = extract_fenced_block(&text) {
                prop_assert_eq!(body.trim(), body.as_str());
                prop_assert!(!body.is_empty());
            }
        }
    }
}
