//! Language detection and the per-language chunking table.
//!
//! Everything the structural chunker knows about a grammar lives here as
//! data: which node kinds become units, which of them are containers, how a
//! unit's name is found, what counts as a declaration or an initializer, and
//! how comments look.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    C,
    Cpp,
    Bash,
    Toml,
    Json,
    Markdown,
    Yaml,
    Text,
}

impl Lang {
    pub const ALL: [Self; 13] = [
        Self::Rust,
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Go,
        Self::C,
        Self::Cpp,
        Self::Bash,
        Self::Toml,
        Self::Json,
        Self::Markdown,
        Self::Yaml,
        Self::Text,
    ];

    /// Identifier used in the catalog, payloads and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Bash => "bash",
            Self::Toml => "toml",
            Self::Json => "json",
            Self::Markdown => "markdown",
            Self::Yaml => "yaml",
            Self::Text => "text",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled or the language is window-split.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::C => Some(tree_sitter_c::LANGUAGE.into()),
            #[cfg(feature = "lang-c")]
            Self::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            #[cfg(feature = "lang-shell")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Chunking table for this language.
    #[must_use]
    pub(crate) fn spec(self) -> &'static LangSpec {
        match self {
            Self::Rust => &RUST,
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::TypeScript => &TYPESCRIPT,
            Self::Go => &GO,
            Self::C => &C,
            Self::Cpp => &CPP,
            Self::Bash => &BASH,
            Self::Toml | Self::Yaml => &HASH_COMMENTED,
            Self::Json | Self::Markdown | Self::Text => &PLAIN,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "js" => return Ok(Self::JavaScript),
            "ts" => return Ok(Self::TypeScript),
            "c++" | "cxx" => return Ok(Self::Cpp),
            "sh" | "shell" => return Ok(Self::Bash),
            "md" => return Ok(Self::Markdown),
            "yml" => return Ok(Self::Yaml),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|l| l.id() == lower)
            .ok_or_else(|| format!("unknown language: {s}"))
    }
}

/// Kind of a named code entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Union,
    Namespace,
    Module,
    Trait,
    Interface,
    TypeAlias,
    Template,
    Variable,
    Constant,
    Macro,
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Union => "union",
            Self::Namespace => "namespace",
            Self::Module => "module",
            Self::Trait => "trait",
            Self::Interface => "interface",
            Self::TypeAlias => "type_alias",
            Self::Template => "template",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Macro => "macro",
        }
    }

    /// Kinds whose members are methods rather than free functions.
    #[must_use]
    pub(crate) fn is_type_like(self) -> bool {
        matches!(
            self,
            Self::Class | Self::Struct | Self::Trait | Self::Interface | Self::Union
        )
    }

    /// Kinds that may appear as bodiless forward declarations.
    #[must_use]
    pub(crate) fn allows_forward_declaration(self) -> bool {
        matches!(self, Self::Class | Self::Struct | Self::Union | Self::Enum)
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node kind that becomes its own chunk.
#[derive(Debug)]
pub(crate) struct NodeRule {
    pub kind: &'static str,
    /// Symbol recorded for the unit; `None` for anonymous wrappers like `impl` blocks.
    pub symbol: Option<SymbolKind>,
    /// Descended into when larger than the chunk size.
    pub container: bool,
    /// Inner node kinds (depth 1-2) that override `symbol`.
    pub refine: &'static [(&'static str, SymbolKind)],
}

const fn unit(kind: &'static str, symbol: SymbolKind) -> NodeRule {
    NodeRule {
        kind,
        symbol: Some(symbol),
        container: false,
        refine: &[],
    }
}

const fn container(kind: &'static str, symbol: SymbolKind) -> NodeRule {
    NodeRule {
        kind,
        symbol: Some(symbol),
        container: true,
        refine: &[],
    }
}

/// Line and block comment markers.
#[derive(Debug)]
pub(crate) struct CommentSyntax {
    pub line: &'static [&'static str],
    pub block: Option<(&'static str, &'static str)>,
}

impl CommentSyntax {
    /// Whether a trimmed source line is part of a comment.
    #[must_use]
    pub fn is_comment_line(&self, trimmed: &str) -> bool {
        if trimmed.is_empty() {
            return false;
        }
        if self.line.iter().any(|p| trimmed.starts_with(p)) {
            return true;
        }
        if let Some((open, close)) = self.block {
            return trimmed.starts_with(open)
                || trimmed.ends_with(close)
                || (open.starts_with('/') && trimmed.starts_with('*'));
        }
        false
    }
}

/// Chunking table for one language.
#[derive(Debug)]
pub(crate) struct LangSpec {
    pub units: &'static [NodeRule],
    /// Declaration-like kinds that are kept or batched depending on shape.
    pub declarations: &'static [(&'static str, SymbolKind)],
    /// Type specifiers that make a declaration worth its own chunk when they carry a body.
    pub named_forms: &'static [(&'static str, SymbolKind)],
    /// Node kinds that mark a declaration as initialized.
    pub initializers: &'static [&'static str],
    /// Fields holding an assigned value, on the declaration or its declarators.
    pub initializer_fields: &'static [&'static str],
    /// Field names tried in order when resolving a unit's name.
    pub name_fields: &'static [&'static str],
    /// Child kinds searched for a name when no field matches.
    pub name_carriers: &'static [&'static str],
    /// Declarator kinds that turn a declaration into a function prototype.
    pub prototypes: &'static [&'static str],
    pub comments: CommentSyntax,
}

impl LangSpec {
    #[must_use]
    pub fn rule(&self, kind: &str) -> Option<&NodeRule> {
        self.units.iter().find(|r| r.kind == kind)
    }

    #[must_use]
    pub fn declaration(&self, kind: &str) -> Option<SymbolKind> {
        self.declarations
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
    }

    #[must_use]
    pub fn named_form(&self, kind: &str) -> Option<SymbolKind> {
        self.named_forms
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
    }
}

const C_COMMENTS: CommentSyntax = CommentSyntax {
    line: &["//"],
    block: Some(("/*", "*/")),
};

const HASH_COMMENTS: CommentSyntax = CommentSyntax {
    line: &["#"],
    block: None,
};

static RUST: LangSpec = LangSpec {
    units: &[
        unit("function_item", SymbolKind::Function),
        unit("function_signature_item", SymbolKind::Function),
        unit("struct_item", SymbolKind::Struct),
        unit("enum_item", SymbolKind::Enum),
        unit("union_item", SymbolKind::Union),
        unit("type_item", SymbolKind::TypeAlias),
        unit("macro_definition", SymbolKind::Macro),
        container("trait_item", SymbolKind::Trait),
        container("mod_item", SymbolKind::Module),
        NodeRule {
            kind: "impl_item",
            symbol: None,
            container: true,
            refine: &[],
        },
    ],
    declarations: &[
        ("const_item", SymbolKind::Constant),
        ("static_item", SymbolKind::Variable),
    ],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["value"],
    name_fields: &["name", "type"],
    name_carriers: &[],
    prototypes: &[],
    comments: C_COMMENTS,
};

static PYTHON: LangSpec = LangSpec {
    units: &[
        unit("function_definition", SymbolKind::Function),
        container("class_definition", SymbolKind::Class),
        NodeRule {
            kind: "decorated_definition",
            symbol: Some(SymbolKind::Function),
            container: true,
            refine: &[("class_definition", SymbolKind::Class)],
        },
    ],
    declarations: &[("expression_statement", SymbolKind::Variable)],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["right"],
    name_fields: &["name", "definition", "left"],
    name_carriers: &["assignment"],
    prototypes: &[],
    comments: HASH_COMMENTS,
};

const JS_EXPORT_REFINE: &[(&str, SymbolKind)] = &[
    ("function_declaration", SymbolKind::Function),
    ("generator_function_declaration", SymbolKind::Function),
    ("class_declaration", SymbolKind::Class),
    ("abstract_class_declaration", SymbolKind::Class),
    ("interface_declaration", SymbolKind::Interface),
    ("type_alias_declaration", SymbolKind::TypeAlias),
    ("enum_declaration", SymbolKind::Enum),
    ("internal_module", SymbolKind::Namespace),
];

static JAVASCRIPT: LangSpec = LangSpec {
    units: &[
        unit("function_declaration", SymbolKind::Function),
        unit("generator_function_declaration", SymbolKind::Function),
        unit("method_definition", SymbolKind::Method),
        container("class_declaration", SymbolKind::Class),
        NodeRule {
            kind: "export_statement",
            symbol: Some(SymbolKind::Variable),
            container: true,
            refine: JS_EXPORT_REFINE,
        },
    ],
    declarations: &[
        ("lexical_declaration", SymbolKind::Variable),
        ("variable_declaration", SymbolKind::Variable),
        ("field_definition", SymbolKind::Variable),
    ],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["value"],
    name_fields: &["name", "declaration", "property"],
    name_carriers: &["variable_declarator"],
    prototypes: &[],
    comments: C_COMMENTS,
};

static TYPESCRIPT: LangSpec = LangSpec {
    units: &[
        unit("function_declaration", SymbolKind::Function),
        unit("generator_function_declaration", SymbolKind::Function),
        unit("function_signature", SymbolKind::Function),
        unit("method_definition", SymbolKind::Method),
        unit("method_signature", SymbolKind::Method),
        container("class_declaration", SymbolKind::Class),
        container("abstract_class_declaration", SymbolKind::Class),
        container("interface_declaration", SymbolKind::Interface),
        unit("type_alias_declaration", SymbolKind::TypeAlias),
        unit("enum_declaration", SymbolKind::Enum),
        container("internal_module", SymbolKind::Namespace),
        container("module", SymbolKind::Module),
        NodeRule {
            kind: "export_statement",
            symbol: Some(SymbolKind::Variable),
            container: true,
            refine: JS_EXPORT_REFINE,
        },
    ],
    declarations: &[
        ("lexical_declaration", SymbolKind::Variable),
        ("variable_declaration", SymbolKind::Variable),
        ("public_field_definition", SymbolKind::Variable),
        ("property_signature", SymbolKind::Variable),
    ],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["value"],
    name_fields: &["name", "declaration", "property"],
    name_carriers: &["variable_declarator"],
    prototypes: &[],
    comments: C_COMMENTS,
};

static GO: LangSpec = LangSpec {
    units: &[
        unit("function_declaration", SymbolKind::Function),
        unit("method_declaration", SymbolKind::Method),
        NodeRule {
            kind: "type_declaration",
            symbol: Some(SymbolKind::TypeAlias),
            container: false,
            refine: &[
                ("struct_type", SymbolKind::Struct),
                ("interface_type", SymbolKind::Interface),
            ],
        },
    ],
    declarations: &[
        ("const_declaration", SymbolKind::Constant),
        ("var_declaration", SymbolKind::Variable),
    ],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["value"],
    name_fields: &["name"],
    name_carriers: &["type_spec", "type_alias", "const_spec", "var_spec"],
    prototypes: &[],
    comments: C_COMMENTS,
};

const C_NAMED_FORMS: &[(&str, SymbolKind)] = &[
    ("struct_specifier", SymbolKind::Struct),
    ("union_specifier", SymbolKind::Union),
    ("enum_specifier", SymbolKind::Enum),
    ("class_specifier", SymbolKind::Class),
];

static C: LangSpec = LangSpec {
    units: &[
        unit("function_definition", SymbolKind::Function),
        unit("struct_specifier", SymbolKind::Struct),
        unit("union_specifier", SymbolKind::Union),
        unit("enum_specifier", SymbolKind::Enum),
        unit("type_definition", SymbolKind::TypeAlias),
    ],
    declarations: &[
        ("declaration", SymbolKind::Variable),
        ("field_declaration", SymbolKind::Variable),
    ],
    named_forms: C_NAMED_FORMS,
    initializers: &["init_declarator", "initializer_list"],
    initializer_fields: &["value"],
    name_fields: &["name", "declarator", "type"],
    name_carriers: &[],
    prototypes: &["function_declarator"],
    comments: C_COMMENTS,
};

static CPP: LangSpec = LangSpec {
    units: &[
        unit("function_definition", SymbolKind::Function),
        container("class_specifier", SymbolKind::Class),
        container("struct_specifier", SymbolKind::Struct),
        container("union_specifier", SymbolKind::Union),
        unit("enum_specifier", SymbolKind::Enum),
        container("namespace_definition", SymbolKind::Namespace),
        container("template_declaration", SymbolKind::Template),
        unit("type_definition", SymbolKind::TypeAlias),
        unit("alias_declaration", SymbolKind::TypeAlias),
        unit("concept_definition", SymbolKind::Template),
        container("linkage_specification", SymbolKind::Namespace),
    ],
    declarations: &[
        ("declaration", SymbolKind::Variable),
        ("field_declaration", SymbolKind::Variable),
        ("using_declaration", SymbolKind::TypeAlias),
    ],
    named_forms: C_NAMED_FORMS,
    initializers: &["init_declarator", "initializer_list"],
    initializer_fields: &["value"],
    name_fields: &["name", "declarator", "type"],
    name_carriers: &[
        "function_definition",
        "class_specifier",
        "struct_specifier",
        "union_specifier",
        "enum_specifier",
        "declaration",
        "alias_declaration",
        "template_declaration",
        "concept_definition",
    ],
    prototypes: &["function_declarator"],
    comments: C_COMMENTS,
};

static BASH: LangSpec = LangSpec {
    units: &[unit("function_definition", SymbolKind::Function)],
    declarations: &[
        ("variable_assignment", SymbolKind::Variable),
        ("declaration_command", SymbolKind::Variable),
    ],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &["value"],
    name_fields: &["name"],
    name_carriers: &["variable_assignment"],
    prototypes: &[],
    comments: HASH_COMMENTS,
};

static HASH_COMMENTED: LangSpec = LangSpec {
    units: &[],
    declarations: &[],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &[],
    name_fields: &[],
    name_carriers: &[],
    prototypes: &[],
    comments: HASH_COMMENTS,
};

static PLAIN: LangSpec = LangSpec {
    units: &[],
    declarations: &[],
    named_forms: &[],
    initializers: &[],
    initializer_fields: &[],
    name_fields: &[],
    name_carriers: &[],
    prototypes: &[],
    comments: CommentSyntax {
        line: &[],
        block: None,
    },
};

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        "c" => Some(Lang::C),
        "h" | "cc" | "cpp" | "cxx" | "c++" | "hh" | "hpp" | "hxx" | "ipp" | "inl" => {
            Some(Lang::Cpp)
        }
        "sh" | "bash" | "zsh" => Some(Lang::Bash),
        "toml" => Some(Lang::Toml),
        "json" | "jsonc" => Some(Lang::Json),
        "md" | "markdown" => Some(Lang::Markdown),
        "yaml" | "yml" => Some(Lang::Yaml),
        "txt" | "rst" => Some(Lang::Text),
        _ => None,
    }
}
