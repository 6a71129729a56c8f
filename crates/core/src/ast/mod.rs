use zax_eval::ImmExpr;
use zax_isaz80::{IndexReg, Reg8, Reg16, Register};

use crate::span::{SourceId, Span, Spanned};

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub source_id: SourceId,
    pub decls: Vec<Spanned<Decl>>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Import(String),
    Const(ConstDecl),
    Enum(EnumDecl),
    Type(TypeDecl),
    Func(FuncDecl),
    Op(OpDecl),
    Extern(ExternDecl),
    Data(DataDecl),
    Var(VarDecl),
    Bin(BinDecl),
    Hex(HexDecl),
    Section(SectionDecl),
    Align(ImmExpr),
}

#[derive(Debug, Clone)]
pub struct ConstDecl {
    pub name: String,
    pub value: ImmExpr,
}

#[derive(Debug, Clone)]
pub struct EnumDecl {
    pub name: String,
    pub members: Vec<EnumMember>,
}

#[derive(Debug, Clone)]
pub struct EnumMember {
    pub name: String,
    pub value: Option<ImmExpr>,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub def: TypeDef,
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Record(Vec<Field>),
    Union(Vec<Field>),
    Alias(TypeExpr),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    Byte,
    Word,
    Addr,
    Named(String),
    Array {
        element: Box<TypeExpr>,
        len: Option<ImmExpr>,
    },
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub locals: Vec<Spanned<LocalDecl>>,
    pub body: Vec<Spanned<Item>>,
}

#[derive(Debug, Clone)]
pub enum LocalDecl {
    Slot {
        name: String,
        ty: TypeExpr,
        init: Option<ImmExpr>,
    },
    Alias {
        name: String,
        ea: EaExpr,
    },
}

impl LocalDecl {
    pub fn name(&self) -> &str {
        match self {
            Self::Slot { name, .. } | Self::Alias { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpDecl {
    pub name: String,
    pub params: Vec<OpParam>,
    pub body: Vec<Spanned<Item>>,
}

#[derive(Debug, Clone)]
pub struct OpParam {
    pub name: String,
    pub matcher: Matcher,
}

/// Operand class an op parameter accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Reg8,
    Reg16,
    Idx16,
    Imm8,
    Imm16,
    Ea,
    Mem8,
    Mem16,
    Token(String),
    Cond,
}

#[derive(Debug, Clone)]
pub struct ExternDecl {
    pub base: Option<String>,
    pub funcs: Vec<Spanned<ExternFunc>>,
}

#[derive(Debug, Clone)]
pub struct ExternFunc {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub at: ImmExpr,
}

#[derive(Debug, Clone)]
pub struct DataDecl {
    pub entries: Vec<Spanned<DataEntry>>,
}

#[derive(Debug, Clone)]
pub struct DataEntry {
    pub name: String,
    pub ty: TypeExpr,
    pub init: DataInit,
}

#[derive(Debug, Clone)]
pub enum DataInit {
    Values(Vec<ImmExpr>),
    Str(String),
    Zero,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub entries: Vec<Spanned<VarEntry>>,
}

#[derive(Debug, Clone)]
pub struct VarEntry {
    pub name: String,
    pub kind: VarKind,
}

#[derive(Debug, Clone)]
pub enum VarKind {
    Storage(TypeExpr),
    Alias(EaExpr),
}

/// Raw bytes ingested from a binary file, placed in the given section.
#[derive(Debug, Clone)]
pub struct BinDecl {
    pub name: String,
    pub section: SectionKind,
    pub bytes: Vec<u8>,
}

/// Absolute-addressed chunks ingested from an Intel HEX file.
#[derive(Debug, Clone)]
pub struct HexDecl {
    pub name: String,
    pub chunks: Vec<HexChunk>,
}

#[derive(Debug, Clone)]
pub struct HexChunk {
    pub address: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Code,
    Data,
    Var,
}

impl SectionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Data => "data",
            Self::Var => "var",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionDecl {
    pub kind: SectionKind,
    pub at: Option<ImmExpr>,
}

#[derive(Debug, Clone)]
pub enum Item {
    Label(String),
    Instruction(Instruction),
    If(Operand),
    Else,
    End,
    While(Operand),
    Repeat,
    Until(Operand),
    Select(Operand),
    Case(Vec<ImmExpr>),
    SelectElse,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

/// Parsed instruction operand. Register indirection arrives as
/// `Mem(Name("hl"))`, indexed addressing as `Mem(Add { Name("ix"), d })`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(Register),
    Imm(ImmExpr),
    Ea(EaExpr),
    Mem(EaExpr),
    PortC,
    PortImm(ImmExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EaExpr {
    Name(String),
    Imm(ImmExpr),
    Field {
        base: Box<EaExpr>,
        field: String,
    },
    Index {
        base: Box<EaExpr>,
        index: EaIndex,
    },
    Add {
        base: Box<EaExpr>,
        offset: ImmExpr,
    },
    Sub {
        base: Box<EaExpr>,
        offset: ImmExpr,
    },
}

impl EaExpr {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn field(base: EaExpr, field: impl Into<String>) -> Self {
        Self::Field {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn index(base: EaExpr, index: EaIndex) -> Self {
        Self::Index {
            base: Box::new(base),
            index,
        }
    }

    pub fn add(base: EaExpr, offset: ImmExpr) -> Self {
        Self::Add {
            base: Box::new(base),
            offset,
        }
    }

    /// Name at the root of the access chain, if any.
    pub fn root_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Imm(_) => None,
            Self::Field { base, .. }
            | Self::Index { base, .. }
            | Self::Add { base, .. }
            | Self::Sub { base, .. } => base.root_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EaIndex {
    Imm(ImmExpr),
    Reg8(Reg8),
    Reg16(Reg16),
    MemHl,
    Indexed { base: IndexReg, disp: ImmExpr },
    Ea(Box<EaExpr>),
}

/// Lowercased lookup key; all user names are case-insensitive.
pub fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

pub fn item_span(items: &[Spanned<Item>], index: usize, fallback: Span) -> Span {
    items.get(index).map(|item| item.span).unwrap_or(fallback)
}
