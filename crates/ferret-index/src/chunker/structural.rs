//! Grammar-driven chunk assembly.

use tree_sitter::{Node, Tree};

use super::comments::leading_comment;
use super::declarations;
use super::symbols::{Symbol, collect_usages, in_scope, resolve_name, unit_kind};
use super::{Draft, LineIndex};
use crate::config::ChunkerConfig;
use crate::languages::{Lang, LangSpec, SymbolKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Always its own chunk.
    Unit,
    /// Merged with neighbouring batchable pieces.
    Batchable,
}

#[derive(Debug)]
struct Piece {
    kind: &'static str,
    start_byte: usize,
    end_byte: usize,
    start_row: usize,
    end_row: usize,
    role: Role,
    symbol: Option<Symbol>,
}

impl Piece {
    fn from_node(node: Node<'_>, role: Role, symbol: Option<Symbol>) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        // Preprocessor lines own their newline and end at column 0 of the next row.
        let end_row = if end.column == 0 && end.row > start.row {
            end.row - 1
        } else {
            end.row
        };
        Self {
            kind: node.kind(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_row: start.row,
            end_row,
            role,
            symbol,
        }
    }

    fn line_span(&self) -> usize {
        self.end_row - self.start_row + 1
    }
}

fn is_comment(kind: &str) -> bool {
    kind.ends_with("comment")
}

struct Walker<'a> {
    source: &'a str,
    spec: &'static LangSpec,
    config: &'a ChunkerConfig,
    lines: &'a LineIndex<'a>,
}

impl Walker<'_> {
    fn char_len(&self, node: Node<'_>) -> usize {
        self.source[node.byte_range()].chars().count()
    }

    /// Flatten the tree into source-ordered pieces using an explicit stack.
    fn pieces(&self, root: Node<'_>) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut stack: Vec<(Node<'_>, bool)> = Vec::new();
        push_children(&mut stack, root, false);

        while let Some((node, inside_type)) = stack.pop() {
            let kind = node.kind();
            if is_comment(kind) {
                continue;
            }

            if let Some(rule) = self.spec.rule(kind) {
                let symbol_kind = unit_kind(node, rule).map(|k| in_scope(k, inside_type));
                let has_body = node.child_by_field_name("body").is_some();

                // `class Node;` and friends: no body, no symbol.
                if symbol_kind.is_some_and(SymbolKind::allows_forward_declaration)
                    && !has_body
                    && self.spec.named_form(kind).is_some()
                {
                    pieces.push(Piece::from_node(node, Role::Batchable, None));
                    continue;
                }

                let name = resolve_name(node, self.spec);
                let symbol = match (symbol_kind, name) {
                    (Some(sk), Some(n)) => Some(Symbol::defined_at(n, self.source, sk)),
                    _ => None,
                };

                if rule.container && self.char_len(node) > self.config.chunk_size_chars {
                    let members_inside_type = symbol_kind.map_or(
                        rule.symbol.is_none() || inside_type,
                        SymbolKind::is_type_like,
                    );
                    if let Some(body) = node.child_by_field_name("body") {
                        if let Some(header) = self.header_piece(node, body, symbol) {
                            pieces.push(header);
                        }
                        push_children(&mut stack, body, members_inside_type);
                    } else {
                        push_children(&mut stack, node, inside_type);
                    }
                    continue;
                }

                let role = if rule.symbol.is_some() && symbol.is_none() && !rule.container {
                    Role::Batchable
                } else {
                    Role::Unit
                };
                pieces.push(Piece::from_node(node, role, symbol));
                continue;
            }

            if let Some(decl_kind) = self.spec.declaration(kind) {
                let shape = declarations::classify(
                    node,
                    self.source,
                    self.spec,
                    decl_kind,
                    self.config.min_declaration_lines,
                    inside_type,
                );
                let role = if shape.keep {
                    Role::Unit
                } else {
                    Role::Batchable
                };
                pieces.push(Piece::from_node(node, role, shape.symbol));
                continue;
            }

            pieces.push(Piece::from_node(node, Role::Batchable, None));
        }

        pieces
    }

    /// Container header from its first line up to the line that opens the body.
    fn header_piece(&self, node: Node<'_>, body: Node<'_>, symbol: Option<Symbol>) -> Option<Piece> {
        let start = node.start_byte();
        let mut cursor = body.walk();
        let first_member = body
            .named_children(&mut cursor)
            .next()
            .map_or(body.end_byte(), |n| n.start_byte());
        let body_row = self.lines.row_of(body.start_byte());
        let mut end = self.lines.line_end(body_row).min(first_member).max(start);
        while end > start && self.source.as_bytes()[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        if end <= start {
            return None;
        }
        Some(Piece {
            kind: node.kind(),
            start_byte: start,
            end_byte: end,
            start_row: node.start_position().row,
            end_row: self.lines.row_of(end - 1),
            role: Role::Batchable,
            symbol,
        })
    }
}

fn push_children<'t>(stack: &mut Vec<(Node<'t>, bool)>, parent: Node<'t>, inside_type: bool) {
    let mut cursor = parent.walk();
    let children: Vec<Node<'t>> = parent.named_children(&mut cursor).collect();
    stack.extend(children.into_iter().rev().map(|c| (c, inside_type)));
}

/// Merge pieces into drafts: units stand alone, batchable runs merge until
/// their summed line span reaches `threshold`.
fn assemble(pieces: Vec<Piece>, threshold: usize) -> Vec<Draft> {
    let mut drafts = Vec::new();
    let mut batch: Vec<Piece> = Vec::new();
    let mut span = 0;

    for piece in pieces {
        match piece.role {
            Role::Unit => {
                flush_batch(&mut batch, &mut drafts);
                span = 0;
                drafts.push(Draft {
                    kind: piece.kind.to_string(),
                    start_byte: piece.start_byte,
                    content_start: piece.start_byte,
                    end_byte: piece.end_byte,
                    symbols: piece.symbol.into_iter().collect(),
                    documentation: None,
                    is_unit: true,
                });
            }
            Role::Batchable => {
                span += piece.line_span();
                batch.push(piece);
                if span >= threshold {
                    flush_batch(&mut batch, &mut drafts);
                    span = 0;
                }
            }
        }
    }
    flush_batch(&mut batch, &mut drafts);
    drafts
}

fn flush_batch(batch: &mut Vec<Piece>, drafts: &mut Vec<Draft>) {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return;
    };
    let kind = if batch.len() == 1 {
        first.kind.to_string()
    } else {
        "batch".to_string()
    };
    let start_byte = first.start_byte;
    let end_byte = last.end_byte;
    let symbols = batch.drain(..).filter_map(|p| p.symbol).collect();
    drafts.push(Draft {
        kind,
        start_byte,
        content_start: start_byte,
        end_byte,
        symbols,
        documentation: None,
        is_unit: false,
    });
}

/// Extend each draft upward over its leading comment block.
fn attach_comments(
    drafts: &mut [Draft],
    lines: &LineIndex<'_>,
    spec: &LangSpec,
    config: &ChunkerConfig,
) {
    let mut floor: Option<usize> = None;
    for draft in drafts.iter_mut() {
        let start_row = lines.row_of(draft.start_byte);
        if let Some(comment) = leading_comment(
            lines,
            start_row,
            floor,
            config.max_comment_lookback_lines,
            &spec.comments,
        ) {
            draft.start_byte = lines.line_start(comment.start_row);
            if comment.is_license {
                tracing::trace!(row = comment.start_row, "license block excluded from chunk");
            } else {
                draft.content_start = draft.start_byte;
                if draft.is_unit
                    && let Some(sym) = draft.symbols.first_mut()
                {
                    sym.documentation = Some(comment.text.clone());
                }
                draft.documentation = Some(comment.text);
            }
        }
        floor = Some(lines.row_of(draft.end_byte.saturating_sub(1).max(draft.start_byte)));
    }
}

fn has_identifier_char(line: &str) -> bool {
    line.chars().any(|c| c.is_alphanumeric() || c == '_')
}

/// Cover every uncovered run of meaningful lines with a `block` draft.
fn cover_gaps(drafts: &mut Vec<Draft>, lines: &LineIndex<'_>) {
    let total = lines.line_count();
    let mut covered = vec![false; total];
    for d in drafts.iter() {
        let (first, last) = lines.rows(d.start_byte, d.end_byte);
        for flag in covered.iter_mut().take(last + 1).skip(first) {
            *flag = true;
        }
    }

    let mut blocks = Vec::new();
    let mut row = 0;
    while row < total {
        if covered[row] {
            row += 1;
            continue;
        }
        let run_start = row;
        while row < total && !covered[row] {
            row += 1;
        }
        let run: Vec<usize> = (run_start..row)
            .filter(|&r| !lines.line(r).trim().is_empty())
            .collect();
        if !run.iter().any(|&r| has_identifier_char(lines.line(r))) {
            continue;
        }
        if let (Some(&first), Some(&last)) = (run.first(), run.last()) {
            let start_byte = lines.line_start(first) + leading_ws(lines.line(first));
            blocks.push(Draft {
                kind: "block".to_string(),
                start_byte,
                content_start: start_byte,
                end_byte: lines.line_start(last) + lines.line(last).trim_end().len(),
                symbols: Vec::new(),
                documentation: None,
                is_unit: false,
            });
        }
    }

    if !blocks.is_empty() {
        drafts.extend(blocks);
        drafts.sort_by_key(|d| (d.start_byte, d.end_byte));
    }
}

fn leading_ws(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Structural drafts for a parsed file, in source order.
pub(super) fn drafts(
    tree: &Tree,
    source: &str,
    lang: Lang,
    config: &ChunkerConfig,
    lines: &LineIndex<'_>,
) -> Vec<Draft> {
    let spec = lang.spec();
    let walker = Walker {
        source,
        spec,
        config,
        lines,
    };
    let root = tree.root_node();

    let pieces = walker.pieces(root);
    let mut drafts = assemble(pieces, config.declaration_batch_threshold_lines);
    if drafts.is_empty() {
        return drafts;
    }
    attach_comments(&mut drafts, lines, spec, config);
    cover_gaps(&mut drafts, lines);
    collect_usages(root, source, &mut drafts);
    drafts
}
