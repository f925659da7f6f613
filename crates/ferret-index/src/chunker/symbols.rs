//! Symbol names, kinds and lexical usages.
//!
//! Usages are matched by identifier text only. Two symbols that share a
//! name in one file both receive every usage; scopes are not resolved.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use super::Draft;
use crate::languages::{LangSpec, NodeRule, SymbolKind};

const MAX_NAME_DEPTH: usize = 6;
const REFINE_DEPTH: usize = 2;

/// Position in a file: 1-based line, 0-based byte column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub(super) fn of(node: Node<'_>) -> Self {
        let p = node.start_position();
        Self {
            line: p.row + 1,
            column: p.column,
        }
    }
}

/// A named entity defined in a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub definition: Location,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl Symbol {
    pub(super) fn defined_at(name_node: Node<'_>, source: &str, kind: SymbolKind) -> Self {
        Self {
            name: source[name_node.byte_range()].to_string(),
            kind,
            definition: Location::of(name_node),
            usages: Vec::new(),
            documentation: None,
        }
    }
}

fn is_name_leaf(kind: &str) -> bool {
    kind.ends_with("identifier") || matches!(kind, "word" | "destructor_name" | "operator_name")
}

fn is_qualified(kind: &str) -> bool {
    matches!(
        kind,
        "qualified_identifier" | "scoped_identifier" | "scoped_type_identifier"
    )
}

/// Find the node holding a unit's name using the language's field order.
pub(super) fn resolve_name<'t>(node: Node<'t>, spec: &LangSpec) -> Option<Node<'t>> {
    resolve(node, spec, 0)
}

fn resolve<'t>(node: Node<'t>, spec: &LangSpec, depth: usize) -> Option<Node<'t>> {
    if depth > MAX_NAME_DEPTH {
        return None;
    }
    let kind = node.kind();
    if depth > 0 && is_qualified(kind) {
        return node
            .child_by_field_name("name")
            .and_then(|n| resolve(n, spec, depth + 1))
            .or(Some(node));
    }
    if depth > 0 && is_name_leaf(kind) {
        return Some(node);
    }

    for field in spec.name_fields {
        if let Some(child) = node.child_by_field_name(field)
            && let Some(found) = resolve(child, spec, depth + 1)
        {
            return Some(found);
        }
    }

    let mut cursor = node.walk();
    let carriers: Vec<Node<'t>> = node
        .named_children(&mut cursor)
        .filter(|c| spec.name_carriers.contains(&c.kind()))
        .collect();
    carriers
        .into_iter()
        .find_map(|c| resolve(c, spec, depth + 1))
}

/// Whether any named descendant within `depth` levels has one of `kinds`.
pub(super) fn has_descendant(node: Node<'_>, kinds: &[&str], depth: usize) -> bool {
    find_descendant(node, kinds, depth).is_some()
}

fn find_descendant<'t>(node: Node<'t>, kinds: &[&str], depth: usize) -> Option<Node<'t>> {
    if kinds.is_empty() {
        return None;
    }
    let mut stack = vec![(node, 0usize)];
    while let Some((current, level)) = stack.pop() {
        if level > 0 && kinds.contains(&current.kind()) {
            return Some(current);
        }
        if level == depth {
            continue;
        }
        let mut cursor = current.walk();
        let children: Vec<Node<'t>> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev().map(|c| (c, level + 1)));
    }
    None
}

/// Symbol kind for a unit, applying the rule's refinements.
pub(super) fn unit_kind(node: Node<'_>, rule: &NodeRule) -> Option<SymbolKind> {
    let base = rule.symbol?;
    if rule.refine.is_empty() {
        return Some(base);
    }
    let kinds: Vec<&str> = rule.refine.iter().map(|(k, _)| *k).collect();
    let refined = find_descendant(node, &kinds, REFINE_DEPTH).and_then(|found| {
        rule.refine
            .iter()
            .find(|(k, _)| *k == found.kind())
            .map(|(_, s)| *s)
    });
    Some(refined.unwrap_or(base))
}

/// Functions declared inside a type body are methods.
pub(super) fn in_scope(kind: SymbolKind, inside_type: bool) -> SymbolKind {
    if inside_type && kind == SymbolKind::Function {
        SymbolKind::Method
    } else {
        kind
    }
}

/// Record every identifier leaf that matches a symbol declared in the file.
pub(super) fn collect_usages(root: Node<'_>, source: &str, drafts: &mut [Draft]) {
    let mut by_name: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
    for (d, draft) in drafts.iter().enumerate() {
        for (s, sym) in draft.symbols.iter().enumerate() {
            by_name.entry(sym.name.clone()).or_default().push((d, s));
        }
    }
    if by_name.is_empty() {
        return;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.named_child_count() == 0 {
            if node.kind().ends_with("identifier")
                && let Some(owners) = by_name.get(&source[node.byte_range()])
            {
                let at = Location::of(node);
                for &(d, s) in owners {
                    let sym = &mut drafts[d].symbols[s];
                    if sym.definition != at {
                        sym.usages.push(at);
                    }
                }
            }
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
}
