use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstKind {
    Const,
    EnumMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstMeta {
    pub name: String,
    pub value: i64,
    pub kind: ConstKind,
    pub span: Span,
}

/// A resolved type. Aliases and enum names are resolved away; `Named`
/// always refers to a record or union in [`SemanticModel::aggregates`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Byte,
    Word,
    Addr,
    Named(String),
    Array { element: Box<Ty>, len: Option<u32> },
}

impl Ty {
    pub fn scalar(&self) -> Option<Scalar> {
        match self {
            Self::Byte => Some(Scalar::Byte),
            Self::Word | Self::Addr => Some(Scalar::Word),
            Self::Named(_) | Self::Array { .. } => None,
        }
    }

    pub fn is_word(&self) -> bool {
        self.scalar() == Some(Scalar::Word)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Byte,
    Word,
}

impl Scalar {
    pub fn size(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Record,
    Union,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateMeta {
    pub name: String,
    pub kind: AggregateKind,
    pub fields: Vec<FieldMeta>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Func,
    Extern { base: Option<String>, at: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamMeta {
    pub name: String,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callable {
    pub name: String,
    pub params: Vec<ParamMeta>,
    pub ret: Option<Ty>,
    pub target: CallTarget,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct OpOverload {
    pub decl: OpDecl,
    pub span: Span,
    /// Position in the overload set, used to identify the declaration on
    /// the expansion stack.
    pub ordinal: usize,
}

impl OpOverload {
    pub fn signature(&self) -> String {
        let params = self
            .decl
            .params
            .iter()
            .map(|param| format!("{}: {}", param.name, matcher_name(&param.matcher)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({params})", self.decl.name)
    }
}

pub fn matcher_name(matcher: &Matcher) -> String {
    match matcher {
        Matcher::Reg8 => "reg8".to_string(),
        Matcher::Reg16 => "reg16".to_string(),
        Matcher::Idx16 => "idx16".to_string(),
        Matcher::Imm8 => "imm8".to_string(),
        Matcher::Imm16 => "imm16".to_string(),
        Matcher::Ea => "ea".to_string(),
        Matcher::Mem8 => "mem8".to_string(),
        Matcher::Mem16 => "mem16".to_string(),
        Matcher::Token(token) => format!("'{token}'"),
        Matcher::Cond => "cc".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Data,
    Var,
    Bin,
    Hex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageMeta {
    pub name: String,
    pub kind: StorageKind,
    pub ty: Ty,
    pub size: u32,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMeta {
    pub name: String,
    pub ea: EaExpr,
    pub span: Span,
}

/// Whole-program environment built before lowering. Every table is keyed by
/// the lowercased name.
#[derive(Debug, Clone, Default)]
pub struct SemanticModel {
    pub consts: IndexMap<String, ConstMeta>,
    pub aggregates: IndexMap<String, AggregateMeta>,
    pub type_aliases: IndexMap<String, Ty>,
    pub callables: IndexMap<String, Callable>,
    pub ops: IndexMap<String, Vec<OpOverload>>,
    pub storage: IndexMap<String, StorageMeta>,
    pub aliases: IndexMap<String, AliasMeta>,
}
