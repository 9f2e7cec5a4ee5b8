/// Per-stream character budget for the log snippet carried in a status update.
pub const LOG_SNIPPET_CHARS: usize = 512;

/// Keeps at most `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Builds the `execution_log` field from captured output.
///
/// Each stream is trimmed and truncated to [`LOG_SNIPPET_CHARS`]; empty streams
/// are left out and `None` is returned when there is nothing to report.
pub fn execution_log(stdout: &str, stderr: &str) -> Option<String> {
    let mut sections = Vec::with_capacity(2);
    for (label, text) in [("stdout", stdout), ("stderr", stderr)] {
        let text = text.trim();
        if !text.is_empty() {
            sections.push(format!(
                "{label}:\n{}",
                truncate_chars(text, LOG_SNIPPET_CHARS)
            ));
        }
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n"))
    }
}
