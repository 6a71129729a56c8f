use serde::Serialize;

use crate::ast::SectionKind;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Constant,
    Label,
    Data,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolScope {
    Global,
    Local,
}

/// One exported symbol. `value` is the constant value for constants and the
/// absolute address for everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolEntry {
    pub kind: SymbolKind,
    pub name: String,
    pub value: i64,
    pub file: Option<String>,
    pub line: Option<usize>,
    pub scope: SymbolScope,
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolTable {
    pub entries: Vec<SymbolEntry>,
}

impl SymbolTable {
    /// First global entry with the given name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.iter().find(|entry| {
            entry.scope == SymbolScope::Global && entry.name.eq_ignore_ascii_case(name)
        })
    }

    pub fn get_local(&self, name: &str) -> Option<&SymbolEntry> {
        self.entries.iter().find(|entry| {
            entry.scope == SymbolScope::Local && entry.name.eq_ignore_ascii_case(name)
        })
    }
}

/// Where a symbol's final value comes from once section bases are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SymbolValue {
    Constant(i64),
    Section { section: SectionKind, offset: u32 },
    Absolute(i64),
    /// Extern entry declared relative to another symbol.
    Relative { base: String, addend: i64 },
}

#[derive(Debug, Clone)]
pub(crate) struct SymbolDef {
    pub name: String,
    pub kind: SymbolKind,
    pub scope: SymbolScope,
    pub value: SymbolValue,
    pub size: Option<u32>,
    pub span: Span,
    /// Compiler-generated labels resolve fixups but are never exported.
    pub hidden: bool,
}
