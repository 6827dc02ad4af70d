//! Text cleanup applied before anything is sent to the embedding provider.

/// Character budget that stays under an 8191-token model limit even for
/// token-dense text (roughly three characters per token).
pub const DEFAULT_MAX_CHARS: usize = 24_000;

/// Normalizes text for embedding.
///
/// Trims the input, collapses every run of whitespace into a single space and
/// truncates the result to at most `max_chars` characters. Returns `None` when
/// nothing is left to embed.
#[must_use]
pub fn preprocess(text: &str, max_chars: usize) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() || max_chars == 0 {
        return None;
    }
    Some(truncate_chars(collapsed, max_chars))
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => text[..byte_offset].trim_end().to_string(),
        None => text,
    }
}
