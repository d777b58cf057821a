//! Text helpers shared by logging and query augmentation

/// Cut `input` to at most `max_chars` characters, respecting char boundaries
///
/// Returns the kept prefix and whether anything was dropped.
pub(crate) fn truncate_chars(input: &str, max_chars: usize) -> (&str, bool) {
    match input.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&input[..byte_index], true),
        None => (input, false),
    }
}

/// Shortened copy for log fields
pub(crate) fn preview(input: &str, max_chars: usize) -> String {
    match truncate_chars(input, max_chars) {
        (kept, true) => format!("{}... [truncated, total_chars={}]", kept, input.chars().count()),
        (kept, false) => kept.to_string(),
    }
}
