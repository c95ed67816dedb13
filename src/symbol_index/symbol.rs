//! Indexed symbol rows
//!
//! Flattens the nested symbol trees returned by a language server into
//! the flat rows persisted by the store, carrying the dotted container
//! path from parent to child.

use serde::{Deserialize, Serialize};

use crate::lsp::{DocumentSymbol, Position, Range};

/// Kinds of symbols, numbered as in the LSP `SymbolKind` taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum SymbolKind {
    File = 1,
    Module = 2,
    Namespace = 3,
    Package = 4,
    Class = 5,
    Method = 6,
    Property = 7,
    Field = 8,
    Constructor = 9,
    Enum = 10,
    Interface = 11,
    Function = 12,
    Variable = 13,
    Constant = 14,
    String = 15,
    Number = 16,
    Boolean = 17,
    Array = 18,
    Object = 19,
    Key = 20,
    Null = 21,
    EnumMember = 22,
    Struct = 23,
    Event = 24,
    Operator = 25,
    TypeParameter = 26,
}

impl SymbolKind {
    /// Map the integer sent over the wire; unknown values are `None`
    pub fn from_i32(value: i32) -> Option<Self> {
        let kind = match value {
            1 => SymbolKind::File,
            2 => SymbolKind::Module,
            3 => SymbolKind::Namespace,
            4 => SymbolKind::Package,
            5 => SymbolKind::Class,
            6 => SymbolKind::Method,
            7 => SymbolKind::Property,
            8 => SymbolKind::Field,
            9 => SymbolKind::Constructor,
            10 => SymbolKind::Enum,
            11 => SymbolKind::Interface,
            12 => SymbolKind::Function,
            13 => SymbolKind::Variable,
            14 => SymbolKind::Constant,
            15 => SymbolKind::String,
            16 => SymbolKind::Number,
            17 => SymbolKind::Boolean,
            18 => SymbolKind::Array,
            19 => SymbolKind::Object,
            20 => SymbolKind::Key,
            21 => SymbolKind::Null,
            22 => SymbolKind::EnumMember,
            23 => SymbolKind::Struct,
            24 => SymbolKind::Event,
            25 => SymbolKind::Operator,
            26 => SymbolKind::TypeParameter,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SymbolKind::File => "file",
            SymbolKind::Module => "module",
            SymbolKind::Namespace => "namespace",
            SymbolKind::Package => "package",
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Property => "property",
            SymbolKind::Field => "field",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Enum => "enum",
            SymbolKind::Interface => "interface",
            SymbolKind::Function => "function",
            SymbolKind::Variable => "variable",
            SymbolKind::Constant => "constant",
            SymbolKind::String => "string",
            SymbolKind::Number => "number",
            SymbolKind::Boolean => "boolean",
            SymbolKind::Array => "array",
            SymbolKind::Object => "object",
            SymbolKind::Key => "key",
            SymbolKind::Null => "null",
            SymbolKind::EnumMember => "enum_member",
            SymbolKind::Struct => "struct",
            SymbolKind::Event => "event",
            SymbolKind::Operator => "operator",
            SymbolKind::TypeParameter => "type_parameter",
        };
        write!(f, "{}", s)
    }
}

/// A symbol row ready to be written for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSymbol {
    pub name: String,
    /// Free-form detail such as a type signature; empty when absent
    pub detail: String,
    /// Raw kind as reported by the provider
    pub kind: i32,
    /// Full declaration range
    pub range: Range,
    /// Narrower range used for navigation, always inside `range`
    pub selection_range: Range,
    /// Dotted names of the enclosing symbols, empty at top level
    pub container_name: String,
}

impl IndexedSymbol {
    pub fn kind(&self) -> Option<SymbolKind> {
        SymbolKind::from_i32(self.kind)
    }
}

/// A symbol row read back from the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSymbol {
    pub id: i64,
    pub file_path: String,
    #[serde(flatten)]
    pub symbol: IndexedSymbol,
}

/// Flatten a nested symbol tree in pre-order.
///
/// Parents always precede their children; the container name of a child
/// is its parent's container name joined with the parent's name. A root
/// that arrives with its own container name keeps it.
pub fn flatten_symbols(symbols: &[DocumentSymbol]) -> Vec<IndexedSymbol> {
    let mut out = Vec::new();
    for symbol in symbols {
        let container = symbol.container_name.as_deref().unwrap_or("");
        flatten_into(symbol, container, &mut out);
    }
    out
}

fn flatten_into(symbol: &DocumentSymbol, container: &str, out: &mut Vec<IndexedSymbol>) {
    out.push(IndexedSymbol {
        name: symbol.name.clone(),
        detail: symbol.detail.clone().unwrap_or_default(),
        kind: symbol.kind,
        range: symbol.range,
        selection_range: clamp_range(symbol.selection_range, symbol.range),
        container_name: container.to_string(),
    });

    if symbol.children.is_empty() {
        return;
    }

    let child_container = if container.is_empty() {
        symbol.name.clone()
    } else {
        format!("{}.{}", container, symbol.name)
    };
    for child in &symbol.children {
        flatten_into(child, &child_container, out);
    }
}

/// Pull `inner` back inside `outer` when a provider reports a selection
/// range that escapes the declaration.
fn clamp_range(inner: Range, outer: Range) -> Range {
    let clamp = |p: Position| -> Position {
        if before(p, outer.start) {
            outer.start
        } else if before(outer.end, p) {
            outer.end
        } else {
            p
        }
    };
    let start = clamp(inner.start);
    let end = clamp(inner.end);
    if before(end, start) {
        Range::new(start, start)
    } else {
        Range::new(start, end)
    }
}

fn before(a: Position, b: Position) -> bool {
    (a.line, a.character) < (b.line, b.character)
}
