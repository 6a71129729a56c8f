use zax_eval::ImmExpr;
use zax_isaz80::Register;

use crate::ast::{
    DataDecl, DataEntry, DataInit, Decl, EaExpr, Field, FuncDecl, Instruction, Item, LocalDecl,
    Matcher, Module, OpDecl, OpParam, Operand, Param, Program, TypeDecl, TypeDef, TypeExpr,
    VarDecl, VarEntry, VarKind,
};
use crate::config::CompileOptions;
use crate::driver::{CompileError, CompileOutput, compile};
use crate::span::{SourceId, SourceMap, Span, Spanned};

pub(crate) const TEST_SOURCE: SourceId = SourceId(0);

pub(crate) fn at<T>(node: T) -> Spanned<T> {
    Spanned::new(node, Span::new(TEST_SOURCE, 0, 1))
}

pub(crate) fn source_map() -> SourceMap {
    let mut map = SourceMap::default();
    map.add_source("test.zax", "; test program\n");
    map
}

pub(crate) fn program(decls: Vec<Decl>) -> Program {
    Program {
        modules: vec![Module {
            name: "test".to_string(),
            source_id: TEST_SOURCE,
            decls: decls.into_iter().map(at).collect(),
        }],
    }
}

pub(crate) fn compile_decls(decls: Vec<Decl>) -> Result<CompileOutput, CompileError> {
    compile_with(decls, &CompileOptions::default())
}

pub(crate) fn compile_with(
    decls: Vec<Decl>,
    options: &CompileOptions,
) -> Result<CompileOutput, CompileError> {
    compile(&program(decls), &source_map(), options)
}

/// Code bytes of a successful compilation, in address order.
pub(crate) fn code_bytes(output: &CompileOutput) -> Vec<u8> {
    output.byte_map.bytes.values().copied().collect()
}

pub(crate) fn messages(error: &CompileError) -> Vec<String> {
    error
        .diagnostics
        .iter()
        .map(|diagnostic| diagnostic.message.clone())
        .collect()
}

pub(crate) fn func(name: &str, body: Vec<Item>) -> Decl {
    func_with(name, Vec::new(), Vec::new(), body)
}

pub(crate) fn func_with(
    name: &str,
    params: Vec<Param>,
    locals: Vec<LocalDecl>,
    body: Vec<Item>,
) -> Decl {
    Decl::Func(FuncDecl {
        name: name.to_string(),
        params,
        ret: None,
        locals: locals.into_iter().map(at).collect(),
        body: body.into_iter().map(at).collect(),
    })
}

pub(crate) fn param(name: &str, ty: TypeExpr) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

pub(crate) fn slot(name: &str, ty: TypeExpr, init: Option<i64>) -> LocalDecl {
    LocalDecl::Slot {
        name: name.to_string(),
        ty,
        init: init.map(ImmExpr::Literal),
    }
}

pub(crate) fn op(name: &str, params: Vec<(&str, Matcher)>, body: Vec<Item>) -> Decl {
    Decl::Op(OpDecl {
        name: name.to_string(),
        params: params
            .into_iter()
            .map(|(name, matcher)| OpParam {
                name: name.to_string(),
                matcher,
            })
            .collect(),
        body: body.into_iter().map(at).collect(),
    })
}

pub(crate) fn konst(name: &str, value: i64) -> Decl {
    Decl::Const(crate::ast::ConstDecl {
        name: name.to_string(),
        value: ImmExpr::Literal(value),
    })
}

pub(crate) fn record(name: &str, fields: Vec<(&str, TypeExpr)>) -> Decl {
    Decl::Type(TypeDecl {
        name: name.to_string(),
        def: TypeDef::Record(
            fields
                .into_iter()
                .map(|(name, ty)| Field {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        ),
    })
}

pub(crate) fn data(name: &str, ty: TypeExpr, init: DataInit) -> Decl {
    Decl::Data(DataDecl {
        entries: vec![at(DataEntry {
            name: name.to_string(),
            ty,
            init,
        })],
    })
}

pub(crate) fn var(name: &str, ty: TypeExpr) -> Decl {
    Decl::Var(VarDecl {
        entries: vec![at(VarEntry {
            name: name.to_string(),
            kind: VarKind::Storage(ty),
        })],
    })
}

pub(crate) fn array(element: TypeExpr, len: i64) -> TypeExpr {
    TypeExpr::Array {
        element: Box::new(element),
        len: Some(ImmExpr::Literal(len)),
    }
}

pub(crate) fn ins(mnemonic: &str, operands: Vec<Operand>) -> Item {
    Item::Instruction(Instruction {
        mnemonic: mnemonic.to_string(),
        operands,
    })
}

pub(crate) fn label(name: &str) -> Item {
    Item::Label(name.to_string())
}

pub(crate) fn reg(name: &str) -> Operand {
    Operand::Reg(Register::from_name(name).expect("register name"))
}

pub(crate) fn imm(value: i64) -> Operand {
    Operand::Imm(ImmExpr::Literal(value))
}

/// A bare identifier operand: label, constant, condition or storage name.
pub(crate) fn name(name: &str) -> Operand {
    Operand::Imm(ImmExpr::name(name))
}

pub(crate) fn mem(name: &str) -> Operand {
    Operand::Mem(EaExpr::name(name))
}

pub(crate) fn mem_ea(ea: EaExpr) -> Operand {
    Operand::Mem(ea)
}
