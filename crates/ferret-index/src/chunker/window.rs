//! Character-window fallback splitter.

/// Split `text` into overlapping windows of at most `size` characters.
///
/// Returns byte ranges into `text`. Consecutive windows step by
/// `size - overlap` characters; when a newline falls in the second half of a
/// window the window ends right after it instead. Never fails and always
/// covers the whole text.
#[must_use]
pub(crate) fn split(text: &str, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }

    let size = size.max(1);
    let byte_at = |idx: usize| chars.get(idx).map_or(text.len(), |(b, _)| *b);

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let mut end = (start + size).min(total);
        if end < total {
            let half = start + size / 2;
            if let Some(nl) = (half..end).rev().find(|&i| chars[i].1 == '\n') {
                end = nl + 1;
            }
        }

        windows.push((byte_at(start), byte_at(end)));
        if end >= total {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    windows
}
