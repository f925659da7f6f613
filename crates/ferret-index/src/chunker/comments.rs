//! Leading comment capture.

use super::LineIndex;
use crate::languages::CommentSyntax;

/// License blocks mentioning copyright are only dropped past this many lines.
const LICENSE_MIN_LINES: usize = 20;

/// A comment block found directly above a chunk.
#[derive(Debug)]
pub(super) struct LeadingComment {
    pub start_row: usize,
    pub text: String,
    pub is_license: bool,
}

/// Scan upward from `start_row` for a comment block.
///
/// Rows at or below `floor_row` belong to an earlier chunk and are never
/// captured. At most one consecutive blank line is allowed inside the block.
pub(super) fn leading_comment(
    lines: &LineIndex<'_>,
    start_row: usize,
    floor_row: Option<usize>,
    max_lookback: usize,
    syntax: &CommentSyntax,
) -> Option<LeadingComment> {
    let lowest = floor_row.map_or(0, |r| r + 1);
    let lowest = lowest.max(start_row.saturating_sub(max_lookback));

    let mut first_comment = None;
    let mut blank_run = 0;
    let mut row = start_row;
    while row > lowest {
        row -= 1;
        let trimmed = lines.line(row).trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                break;
            }
            continue;
        }
        if !syntax.is_comment_line(trimmed) {
            break;
        }
        blank_run = 0;
        first_comment = Some(row);
    }

    let first = first_comment?;
    let text = (first..start_row)
        .map(|r| lines.line(r))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string();
    let is_license = is_license_block(&text);

    Some(LeadingComment {
        start_row: first,
        text,
        is_license,
    })
}

/// SPDX headers, or long blocks that mention copyright.
pub(super) fn is_license_block(text: &str) -> bool {
    let lower = text.to_lowercase();
    if lower.contains("spdx-license-identifier") {
        return true;
    }
    lower.contains("copyright") && text.lines().count() > LICENSE_MIN_LINES
}
