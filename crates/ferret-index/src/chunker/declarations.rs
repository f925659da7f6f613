//! Declaration shape: keep as a unit or batch with neighbours.

use tree_sitter::Node;

use super::symbols::{Symbol, has_descendant, in_scope, resolve_name};
use crate::languages::{LangSpec, SymbolKind};

/// Initializers and prototypes are looked for this far below the declaration.
const MARKER_DEPTH: usize = 2;

#[derive(Debug)]
pub(super) struct DeclarationShape {
    pub keep: bool,
    pub symbol: Option<Symbol>,
}

/// Classify a declaration-like node.
///
/// Kept when it has an initializer, spans at least `min_lines`, or declares
/// a named type form with a body; otherwise it is batched.
pub(super) fn classify(
    node: Node<'_>,
    source: &str,
    spec: &LangSpec,
    kind: SymbolKind,
    min_lines: usize,
    inside_type: bool,
) -> DeclarationShape {
    if let Some((form, form_kind)) = named_form(node, spec) {
        let symbol = resolve_name(form, spec)
            .map(|n| Symbol::defined_at(n, source, form_kind))
            .or_else(|| resolve_name(node, spec).map(|n| Symbol::defined_at(n, source, kind)));
        return DeclarationShape { keep: true, symbol };
    }

    let span = node.end_position().row - node.start_position().row + 1;
    let keep = span >= min_lines || has_initializer(node, spec);

    let kind = if has_descendant(node, spec.prototypes, MARKER_DEPTH) {
        in_scope(SymbolKind::Function, inside_type)
    } else {
        kind
    };
    let symbol = resolve_name(node, spec).map(|n| Symbol::defined_at(n, source, kind));

    DeclarationShape { keep, symbol }
}

/// An assigned value on the declaration or a declarator below it, whatever
/// the value is.
fn has_initializer(node: Node<'_>, spec: &LangSpec) -> bool {
    if has_descendant(node, spec.initializers, MARKER_DEPTH) {
        return true;
    }
    if spec.initializer_fields.is_empty() {
        return false;
    }
    let mut stack = vec![(node, 0usize)];
    while let Some((current, level)) = stack.pop() {
        if spec
            .initializer_fields
            .iter()
            .any(|f| current.child_by_field_name(f).is_some())
        {
            return true;
        }
        if level == MARKER_DEPTH {
            continue;
        }
        let mut cursor = current.walk();
        stack.extend(current.named_children(&mut cursor).map(|c| (c, level + 1)));
    }
    false
}

/// A `type` field holding a struct/enum/union/class specifier with a body.
fn named_form<'t>(node: Node<'t>, spec: &LangSpec) -> Option<(Node<'t>, SymbolKind)> {
    let ty = node.child_by_field_name("type")?;
    let kind = spec.named_form(ty.kind())?;
    ty.child_by_field_name("body")?;
    Some((ty, kind))
}
