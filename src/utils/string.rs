//! Small string helpers used in log lines and prompt assembly.

/// Shorten a string for log output, appending an ellipsis when truncated.
///
/// Truncation is character-based, never splitting a UTF-8 code point.
///
/// # Example
/// ```
/// use roundtable::utils::string::preview;
///
/// assert_eq!(preview("short", 10), "short");
/// assert_eq!(preview("a longer sentence", 8), "a longer…");
/// ```
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Truncate a string to at most `max_chars` characters, without a marker.
///
/// Used for transcript condensing where a hard cap matters more than
/// signaling the cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
