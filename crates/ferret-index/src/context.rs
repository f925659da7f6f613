//! Embedding text and terminal display for chunks.

use std::fmt::Write as _;

use crate::chunker::Chunk;
use crate::retriever::SearchResult;

/// Lines of chunk content shown under each search result.
const PREVIEW_LINES: usize = 6;
const MAX_HEADER_SYMBOLS: usize = 8;

/// Text sent to the embedding provider.
///
/// Language tag and symbol names, then the chunk content. The path is left out
/// so identical bodies in different files embed identically.
#[must_use]
pub fn embedding_text(chunk: &Chunk) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 64);
    text.push_str("# Language: ");
    text.push_str(chunk.language.id());
    text.push('\n');

    if !chunk.symbols.is_empty() {
        text.push_str("# Symbols: ");
        let names: Vec<String> = chunk
            .symbols
            .iter()
            .take(MAX_HEADER_SYMBOLS)
            .map(|s| format!("{} {}", s.kind, s.name))
            .collect();
        text.push_str(&names.join(", "));
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// `path:start-end :: name` header for a chunk.
#[must_use]
pub fn display_header(chunk: &Chunk) -> String {
    let name = chunk
        .symbols
        .first()
        .map_or(chunk.kind.as_str(), |s| s.name.as_str());
    format!(
        "{}:{}-{} :: {}",
        chunk.file_path, chunk.line_range.0, chunk.line_range.1, name
    )
}

fn rank_label(rank: Option<usize>) -> String {
    rank.map_or_else(|| "-".to_string(), |r| r.to_string())
}

/// One search result as printed by the CLI.
#[must_use]
pub fn format_result(position: usize, result: &SearchResult, chunk: Option<&Chunk>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{position}. {}:{}-{} [{}] score {:.4} (lexical {}, vector {})",
        result.file_path,
        result.line_range.0,
        result.line_range.1,
        result.language,
        result.score,
        rank_label(result.lexical_rank),
        rank_label(result.vector_rank),
    );
    if let Some(chunk) = chunk {
        if let Some(sym) = chunk.symbols.first() {
            let _ = writeln!(out, "   {} {}", sym.kind, sym.name);
        }
        for line in chunk.content.lines().take(PREVIEW_LINES) {
            let _ = writeln!(out, "   | {line}");
        }
        let total = chunk.content.lines().count();
        if total > PREVIEW_LINES {
            let _ = writeln!(out, "   | ... {} more lines", total - PREVIEW_LINES);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk;
    use crate::config::ChunkerConfig;
    use crate::languages::Lang;

    fn sample() -> Chunk {
        chunk(
            "fn hello() -> u32 {\n    42\n}\n",
            Lang::Rust,
            "src/lib.rs",
            &ChunkerConfig::default(),
        )
        .remove(0)
    }

    #[test]
    fn embedding_text_has_language_and_symbols() {
        let text = embedding_text(&sample());
        assert!(text.starts_with("# Language: rust\n"));
        assert!(text.contains("# Symbols: function hello\n"));
        assert!(text.ends_with("fn hello() -> u32 {\n    42\n}"));
    }

    #[test]
    fn embedding_text_excludes_path() {
        let a = sample();
        let mut b = a.clone();
        b.file_path = "other/place.rs".into();
        assert_eq!(embedding_text(&a), embedding_text(&b));
        assert!(!embedding_text(&a).contains("src/lib.rs"));
    }

    #[test]
    fn header_prefers_symbol_name() {
        assert_eq!(display_header(&sample()), "src/lib.rs:1-3 :: hello");
        let mut c = sample();
        c.symbols.clear();
        assert_eq!(display_header(&c), "src/lib.rs:1-3 :: function_item");
    }

    #[test]
    fn format_result_shows_ranks_and_preview() {
        let c = sample();
        let r = SearchResult {
            chunk_id: c.id.clone(),
            score: 0.0325,
            lexical_rank: Some(1),
            vector_rank: None,
            file_path: c.file_path.clone(),
            line_range: c.line_range,
            language: c.language,
        };
        let out = format_result(1, &r, Some(&c));
        assert!(out.starts_with("1. src/lib.rs:1-3 [rust] score 0.0325 (lexical 1, vector -)"));
        assert!(out.contains("   | fn hello() -> u32 {"));
    }
}
