//! Structural chunking via tree-sitter with a character-window fallback.

mod comments;
mod declarations;
mod structural;
mod symbols;
pub(crate) mod window;

use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Tree};

pub use symbols::{Location, Symbol};

use crate::classify::TestClassifier;
use crate::config::ChunkerConfig;
use crate::languages::Lang;
use crate::walker::content_hash;

/// Hex characters of the content hash used in a chunk id.
const ID_HASH_PREFIX: usize = 16;

/// One chunk of source code with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `"{path}#{hash prefix}"`.
    pub id: String,
    pub file_path: String,
    pub language: Lang,
    /// Grammar node kind, or `batch`, `block`, `window`.
    pub kind: String,
    pub content: String,
    pub content_hash: String,
    /// Byte range in the file, including a skipped license header.
    pub byte_range: (usize, usize),
    /// 1-based inclusive line range.
    pub line_range: (usize, usize),
    /// 0-based start column on the first line, exclusive end column on the last.
    pub column_range: (usize, usize),
    pub is_test: bool,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

#[must_use]
pub fn chunk_id(path: &str, hash: &str) -> String {
    let prefix = hash.get(..ID_HASH_PREFIX).unwrap_or(hash);
    format!("{path}#{prefix}")
}

/// Line lookup over a source text.
pub(crate) struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { source, starts }
    }

    pub(crate) fn line_count(&self) -> usize {
        self.starts.len()
    }

    pub(crate) fn line_start(&self, row: usize) -> usize {
        self.starts.get(row).copied().unwrap_or(self.source.len())
    }

    /// Byte offset of the end of `row`, excluding the line terminator.
    pub(crate) fn line_end(&self, row: usize) -> usize {
        let end = self
            .starts
            .get(row + 1)
            .map_or(self.source.len(), |next| next - 1);
        let start = self.line_start(row);
        if end > start && self.source.as_bytes()[end - 1] == b'\r' {
            end - 1
        } else {
            end
        }
    }

    /// Text of `row` without its line terminator.
    pub(crate) fn line(&self, row: usize) -> &'a str {
        let start = self.line_start(row);
        &self.source[start..self.line_end(row).max(start)]
    }

    pub(crate) fn row_of(&self, byte: usize) -> usize {
        self.starts.partition_point(|&s| s <= byte).saturating_sub(1)
    }

    /// First and last row touched by the byte range `start..end`.
    pub(crate) fn rows(&self, start: usize, end: usize) -> (usize, usize) {
        (self.row_of(start), self.row_of(end.saturating_sub(1).max(start)))
    }
}

/// Chunk under construction.
#[derive(Debug)]
pub(crate) struct Draft {
    pub kind: String,
    /// Start of the chunk's range, including any license header.
    pub start_byte: usize,
    /// Start of the chunk's content.
    pub content_start: usize,
    pub end_byte: usize,
    pub symbols: Vec<Symbol>,
    pub documentation: Option<String>,
    pub is_unit: bool,
}

impl Draft {
    fn window(start: usize, end: usize) -> Self {
        Self {
            kind: "window".to_string(),
            start_byte: start,
            content_start: start,
            end_byte: end,
            symbols: Vec::new(),
            documentation: None,
            is_unit: false,
        }
    }
}

/// How a file is chunked, resolved once per file.
pub(crate) enum Strategy {
    Structural(Tree),
    Window,
}

pub(crate) fn select_strategy(source: &str, lang: Lang, path: &str) -> Strategy {
    let Some(grammar) = lang.grammar() else {
        return Strategy::Window;
    };
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&grammar) {
        tracing::debug!(path, lang = %lang, error = %e, "grammar rejected, using window strategy");
        return Strategy::Window;
    }
    match parser.parse(source, None) {
        Some(tree) => Strategy::Structural(tree),
        None => {
            tracing::debug!(path, lang = %lang, "parse failed, using window strategy");
            Strategy::Window
        }
    }
}

/// Chunker bound to a configuration and test classifier.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    tests: TestClassifier,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig, tests: TestClassifier) -> Self {
        Self { config, tests }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split a file into source-ordered chunks. Deterministic and infallible.
    #[must_use]
    pub fn chunk(&self, source: &str, lang: Lang, path: &str) -> Vec<Chunk> {
        let lines = LineIndex::new(source);

        let mut drafts = match select_strategy(source, lang, path) {
            Strategy::Structural(tree) => {
                structural::drafts(&tree, source, lang, &self.config, &lines)
            }
            Strategy::Window => Vec::new(),
        };
        if drafts.is_empty() && !source.trim().is_empty() {
            drafts = window::split(
                source,
                self.config.chunk_size_chars,
                self.config.chunk_overlap_chars,
            )
            .into_iter()
            .map(|(s, e)| Draft::window(s, e))
            .collect();
        }

        let drafts = self.split_oversize(source, drafts);
        let is_test = self.tests.is_test(path);

        let chunks: Vec<Chunk> = drafts
            .into_iter()
            .filter_map(|d| finalize(d, source, lang, path, is_test, &lines))
            .collect();
        tracing::trace!(path, lang = %lang, chunks = chunks.len(), "chunked");
        chunks
    }

    /// Subdivide drafts longer than `chunk_size_chars`; the first piece keeps
    /// the symbols, documentation and any license span.
    fn split_oversize(&self, source: &str, drafts: Vec<Draft>) -> Vec<Draft> {
        let size = self.config.chunk_size_chars;
        let mut out = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let text = &source[draft.content_start..draft.end_byte];
            if text.chars().count() <= size {
                out.push(draft);
                continue;
            }
            let base = draft.content_start;
            let kind = draft.kind.clone();
            let windows = window::split(text, size, self.config.chunk_overlap_chars);
            let mut first = Some(draft);
            for (s, e) in windows {
                let piece = match first.take() {
                    Some(d) => Draft {
                        content_start: base + s,
                        end_byte: base + e,
                        ..d
                    },
                    None => Draft {
                        kind: kind.clone(),
                        start_byte: base + s,
                        content_start: base + s,
                        end_byte: base + e,
                        symbols: Vec::new(),
                        documentation: None,
                        is_unit: false,
                    },
                };
                out.push(piece);
            }
        }
        out
    }
}

fn finalize(
    draft: Draft,
    source: &str,
    lang: Lang,
    path: &str,
    is_test: bool,
    lines: &LineIndex<'_>,
) -> Option<Chunk> {
    let content = &source[draft.content_start..draft.end_byte];
    if content.trim().is_empty() {
        return None;
    }
    let hash = content_hash(content);
    let (first_row, last_row) = lines.rows(draft.start_byte, draft.end_byte);
    let start_col = draft.start_byte - lines.line_start(first_row);
    let end_col = draft.end_byte.saturating_sub(lines.line_start(last_row));

    Some(Chunk {
        id: chunk_id(path, &hash),
        file_path: path.to_string(),
        language: lang,
        kind: draft.kind,
        content: content.to_string(),
        content_hash: hash,
        byte_range: (draft.start_byte, draft.end_byte),
        line_range: (first_row + 1, last_row + 1),
        column_range: (start_col, end_col),
        is_test,
        symbols: draft.symbols,
        documentation: draft.documentation,
    })
}

/// Chunk with the default test classifier.
#[must_use]
pub fn chunk(source: &str, lang: Lang, path: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    Chunker::new(config.clone(), TestClassifier::default()).chunk(source, lang, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::SymbolKind;

    const CALCULATOR_CPP: &str = r#"// Calculator sample
#include <iostream>
#include <string>

// Simple function
int add(int a, int b) {
    return a + b;
}

int factorial(int n) {
    if (n <= 1) {
        return 1;
    }
    return n * factorial(n - 1);
}

// Class definition
class Calculator {
private:
    std::string name;

public:
    Calculator(std::string n) : name(n) {}

    int multiply(int a, int b) {
        return a * b;
    }

    double divide(double a, double b) {
        if (b == 0) {
            throw std::runtime_error("Division by zero");
        }
        return a / b;
    }
};

namespace MathUtils {
    const double PI = 3.14159;

    double circleArea(double radius) {
        return PI * radius * radius;
    }
}

template<typename T>
T maximum(T a, T b) {
    return (a > b) ? a : b;
}

int main() {
    int sum = add(5, 3);
    Calculator calc("demo");
    double area = MathUtils::circleArea(5.0);
    return sum + calc.multiply(4, 5) + maximum(1, 2);
}
"#;

    fn config() -> ChunkerConfig {
        ChunkerConfig::default()
    }

    fn find<'a>(chunks: &'a [Chunk], name: &str) -> Option<(&'a Chunk, &'a Symbol)> {
        chunks.iter().find_map(|c| {
            c.symbols
                .iter()
                .find(|s| s.name == name)
                .map(|s| (c, s))
        })
    }

    #[test]
    fn window_scenario_three_chunks() {
        let text = "x".repeat(5200);
        let chunks = chunk(&text, Lang::Text, "notes.txt", &config());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].byte_range.0, 2200);
        assert!(chunks.iter().all(|c| c.kind == "window"));
    }

    #[test]
    fn empty_source_no_chunks() {
        assert!(chunk("", Lang::Rust, "a.rs", &config()).is_empty());
        assert!(chunk("  \n\n", Lang::Text, "a.txt", &config()).is_empty());
    }

    #[test]
    fn bare_declarations_batch_before_function() {
        let src = "int alpha;\nint beta;\nint gamma;\n\nint compute(int x) {\n    int y = x * 2;\n    y += 1;\n    y -= 3;\n    y *= 4;\n    y /= 2;\n    y %= 7;\n    y <<= 1;\n    return y;\n}\n";
        let chunks = chunk(src, Lang::Cpp, "calc.cpp", &config());
        assert_eq!(chunks.len(), 2, "{chunks:#?}");
        assert_eq!(chunks[0].kind, "batch");
        assert_eq!(chunks[0].line_range, (1, 3));
        let names: Vec<&str> = chunks[0].symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["alpha", "beta", "gamma"]);
        assert_eq!(chunks[1].kind, "function_definition");
        assert_eq!(chunks[1].line_range, (5, 14));
        assert_eq!(chunks[1].symbols[0].name, "compute");
        assert_eq!(chunks[1].symbols[0].kind, SymbolKind::Function);
    }

    #[test]
    fn scalar_initializers_keep_declarations_apart() {
        let cases = [
            (Lang::Rust, "consts.rs", "const X: u8 = 1;\nconst Y: u8 = 2;\n"),
            (Lang::Python, "consts.py", "x = 1\ny = 2\n"),
            (Lang::JavaScript, "consts.js", "const x = 1;\nconst y = 2;\n"),
            (Lang::Cpp, "consts.cpp", "int x = 1;\nint y = 2;\n"),
        ];
        for (lang, path, src) in cases {
            let chunks = chunk(src, lang, path, &config());
            assert_eq!(chunks.len(), 2, "{path}: {chunks:#?}");
            assert!(chunks.iter().all(|c| c.kind != "batch"), "{path}");
            assert_eq!(chunks[0].line_range, (1, 1));
            assert_eq!(chunks[1].line_range, (2, 2));
        }
    }

    #[test]
    fn uninitialized_declarations_batch_in_every_language() {
        let cases = [
            (Lang::Python, "decls.py", "x: int\ny: int\n"),
            (Lang::JavaScript, "decls.js", "let x;\nlet y;\n"),
            (Lang::Cpp, "decls.cpp", "int x;\nint y;\n"),
        ];
        for (lang, path, src) in cases {
            let chunks = chunk(src, lang, path, &config());
            assert_eq!(chunks.len(), 1, "{path}: {chunks:#?}");
            assert_eq!(chunks[0].kind, "batch", "{path}");
            assert_eq!(chunks[0].line_range, (1, 2));
        }
    }

    #[test]
    fn cpp_units_and_kinds() {
        let chunks = chunk(CALCULATOR_CPP, Lang::Cpp, "src/calc.cpp", &config());
        let expect = [
            ("add", SymbolKind::Function),
            ("factorial", SymbolKind::Function),
            ("Calculator", SymbolKind::Class),
            ("MathUtils", SymbolKind::Namespace),
            ("maximum", SymbolKind::Template),
            ("main", SymbolKind::Function),
        ];
        for (name, kind) in expect {
            let (_, sym) = find(&chunks, name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(sym.kind, kind, "{name}");
        }
        let (class_chunk, _) = find(&chunks, "Calculator").unwrap();
        assert_eq!(class_chunk.kind, "class_specifier");
    }

    #[test]
    fn chunks_are_in_source_order() {
        let chunks = chunk(CALCULATOR_CPP, Lang::Cpp, "src/calc.cpp", &config());
        for pair in chunks.windows(2) {
            assert!(pair[0].byte_range.0 <= pair[1].byte_range.0);
        }
    }

    #[test]
    fn leading_comment_becomes_documentation() {
        let chunks = chunk(CALCULATOR_CPP, Lang::Cpp, "src/calc.cpp", &config());
        let (c, sym) = find(&chunks, "Calculator").unwrap();
        assert_eq!(c.documentation.as_deref(), Some("// Class definition"));
        assert_eq!(sym.documentation.as_deref(), Some("// Class definition"));
        assert!(c.content.starts_with("// Class definition\nclass Calculator"));

        let (add_chunk, _) = find(&chunks, "add").unwrap();
        assert_eq!(add_chunk.documentation.as_deref(), Some("// Simple function"));
    }

    #[test]
    fn usages_are_recorded_outside_definition() {
        let chunks = chunk(CALCULATOR_CPP, Lang::Cpp, "src/calc.cpp", &config());
        let (_, add) = find(&chunks, "add").unwrap();
        assert!(!add.usages.is_empty());
        assert!(add.usages.iter().all(|u| *u != add.definition));
        let (_, fact) = find(&chunks, "factorial").unwrap();
        assert!(fact.usages.iter().any(|u| u.line == 14));
    }

    #[test]
    fn large_container_is_descended() {
        let cfg = ChunkerConfig {
            chunk_size_chars: 200,
            chunk_overlap_chars: 20,
            ..config()
        };
        let chunks = chunk(CALCULATOR_CPP, Lang::Cpp, "src/calc.cpp", &cfg);
        let (_, multiply) = find(&chunks, "multiply").unwrap();
        assert_eq!(multiply.kind, SymbolKind::Method);
        let (header, class) = find(&chunks, "Calculator").unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        assert!(header.content.contains("class Calculator {"));
        assert!(!header.content.contains("return a * b;"));
    }

    #[test]
    fn forward_declaration_has_no_symbol() {
        let src = "// Forward declaration\nclass Node;\n\n// Struct definition\nstruct Point {\n    double x;\n    double y;\n};\n";
        let chunks = chunk(src, Lang::Cpp, "shapes.cpp", &config());
        assert!(find(&chunks, "Node").is_none());
        assert!(chunks.iter().any(|c| c.content.contains("class Node")));
        let (_, point) = find(&chunks, "Point").unwrap();
        assert_eq!(point.kind, SymbolKind::Struct);
    }

    #[test]
    fn license_header_excluded_from_content() {
        let src = "// SPDX-License-Identifier: MIT\n\nint f() {\n    return 1;\n}\n";
        let chunks = chunk(src, Lang::Cpp, "f.cpp", &config());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].byte_range.0, 0);
        assert_eq!(chunks[0].line_range.0, 1);
        assert!(chunks[0].content.starts_with("int f()"));
        assert!(chunks[0].documentation.is_none());
    }

    #[test]
    fn oversize_unit_split_keeps_symbols_on_first() {
        let mut src = String::from("fn big() {\n");
        for i in 0..200 {
            src.push_str(&format!("    let value_{i} = {i};\n"));
        }
        src.push_str("}\n");
        let chunks = chunk(&src, Lang::Rust, "big.rs", &config());
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.kind == "function_item"));
        assert_eq!(chunks[0].symbols.len(), 1);
        assert_eq!(chunks[0].symbols[0].name, "big");
        assert!(chunks[1..].iter().all(|c| c.symbols.is_empty()));
        assert_eq!(chunks[0].byte_range.0, 0);
        assert_eq!(chunks.last().map(|c| c.line_range.1), Some(202));
    }

    #[test]
    fn rust_doc_comment_and_usages() {
        let src = "/// A point.\nstruct Point {\n    x: i32,\n}\n\nfn origin() -> Point {\n    Point { x: 0 }\n}\n";
        let chunks = chunk(src, Lang::Rust, "src/point.rs", &config());
        let (c, point) = find(&chunks, "Point").unwrap();
        assert_eq!(c.documentation.as_deref(), Some("/// A point."));
        assert_eq!(point.kind, SymbolKind::Struct);
        assert_eq!(point.definition, Location { line: 2, column: 7 });
        assert_eq!(point.usages.len(), 2);
        let (_, origin) = find(&chunks, "origin").unwrap();
        assert_eq!(origin.kind, SymbolKind::Function);
    }

    #[test]
    fn impl_members_become_methods_when_descended() {
        let src = "impl Point {\n    fn a(&self) -> i32 { self.x }\n    fn b(&self) -> i32 { self.x + 1 }\n}\n";
        let cfg = ChunkerConfig {
            chunk_size_chars: 40,
            chunk_overlap_chars: 0,
            ..config()
        };
        let chunks = chunk(src, Lang::Rust, "point.rs", &cfg);
        for name in ["a", "b"] {
            let (_, sym) = find(&chunks, name).unwrap();
            assert_eq!(sym.kind, SymbolKind::Method);
        }
    }

    #[test]
    fn test_paths_flagged() {
        let chunks = chunk(
            "int x = 1;\n",
            Lang::Cpp,
            "src/foo/tests/bar_test.cpp",
            &config(),
        );
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.is_test));
        let chunks = chunk("int x = 1;\n", Lang::Cpp, "src/foo/bar.cpp", &config());
        assert!(chunks.iter().all(|c| !c.is_test));
    }

    #[test]
    fn chunk_id_uses_hash_prefix() {
        let chunks = chunk("fn f() {}\n", Lang::Rust, "src/f.rs", &config());
        let c = &chunks[0];
        assert_eq!(c.id, format!("src/f.rs#{}", &c.content_hash[..16]));
        assert_eq!(c.content_hash, content_hash(&c.content));
    }

    #[test]
    fn line_index_rows() {
        let lines = LineIndex::new("ab\r\ncd\n\nef");
        assert_eq!(lines.line_count(), 4);
        assert_eq!(lines.line(0), "ab");
        assert_eq!(lines.line(2), "");
        assert_eq!(lines.line(3), "ef");
        assert_eq!(lines.row_of(0), 0);
        assert_eq!(lines.row_of(4), 1);
        assert_eq!(lines.rows(0, 6), (0, 1));
    }

    mod proptest_chunker {
        use super::*;
        use proptest::prelude::*;

        const RUST_LINES: &[&str] = &[
            "fn a() {}",
            "fn b(x: u8) -> u8 {",
            "    x + 1",
            "}",
            "struct S;",
            "const X: u8 = 1;",
            "impl S { fn m(&self) {} }",
            "// note",
            "/// doc",
            "",
            "let y = 2;",
            "#[derive(Debug)]",
            "use std::fmt;",
            "{",
        ];

        fn source(lines: &[&str]) -> String {
            let mut s = lines.join("\n");
            s.push('\n');
            s
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn chunking_is_idempotent(
                lines in prop::collection::vec(prop::sample::select(RUST_LINES), 0..40),
                size in 20usize..400,
            ) {
                let src = source(&lines);
                let cfg = ChunkerConfig { chunk_size_chars: size, chunk_overlap_chars: size / 4, ..ChunkerConfig::default() };
                prop_assert_eq!(chunk(&src, Lang::Rust, "p.rs", &cfg), chunk(&src, Lang::Rust, "p.rs", &cfg));
            }

            #[test]
            fn every_meaningful_line_is_covered(
                lines in prop::collection::vec(prop::sample::select(RUST_LINES), 0..40),
                size in 20usize..400,
            ) {
                let src = source(&lines);
                let cfg = ChunkerConfig { chunk_size_chars: size, chunk_overlap_chars: size / 4, ..ChunkerConfig::default() };
                let chunks = chunk(&src, Lang::Rust, "p.rs", &cfg);
                for (row, line) in src.lines().enumerate() {
                    if !line.chars().any(|c| c.is_alphanumeric() || c == '_') {
                        continue;
                    }
                    let n = row + 1;
                    prop_assert!(
                        chunks.iter().any(|c| c.line_range.0 <= n && n <= c.line_range.1),
                        "line {} uncovered: {:?}", n, line
                    );
                }
            }
        }
    }
}
