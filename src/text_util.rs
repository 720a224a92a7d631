/// Default snippet width in characters.
pub const DEFAULT_CONTEXT_CHARS: usize = 100;

/// Extract a window of `context_chars` characters around the first query
/// word found in `content`, matching case-insensitively.
///
/// The window is centered on the match and marked with `...` where content
/// was cut. When no query word occurs, the head of the content is returned.
///
/// # Examples
///
/// ```
/// use docsift::text_util::highlight;
///
/// assert_eq!(highlight("short text", "missing", 100), "short text");
/// let long = format!("{}needle{}", "a ".repeat(100), " b".repeat(100));
/// let snippet = highlight(&long, "NEEDLE", 20);
/// assert!(snippet.starts_with("...") && snippet.ends_with("..."));
/// assert!(snippet.contains("needle"));
/// ```
pub fn highlight(content: &str, query: &str, context_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let position = query
        .split_whitespace()
        .map(|w| w.to_lowercase().chars().collect::<Vec<_>>())
        .find_map(|word| find_chars(&lower, &word));

    match position {
        Some(pos) => {
            let start = pos.saturating_sub(context_chars / 2);
            let end = (start + context_chars).min(chars.len());
            let mut snippet: String = chars[start..end].iter().collect();
            if start > 0 {
                snippet.insert_str(0, "...");
            }
            if end < chars.len() {
                snippet.push_str("...");
            }
            snippet
        }
        None if chars.len() > context_chars => {
            let mut head: String = chars[..context_chars].iter().collect();
            head.push_str("...");
            head
        }
        None => content.to_string(),
    }
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Collapse whitespace runs so a chunk prints on one line.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
