use zax_eval::ImmExpr;

use super::operands::{self, Value};
use super::{LowerContext, define_global};
use crate::ast::{
    BinDecl, DataDecl, DataEntry, DataInit, HexDecl, SectionKind, VarDecl, VarKind, key,
};
use crate::diag::DiagnosticId;
use crate::emit::{HexBlob, SegmentKind};
use crate::fixup::{Fixup, FixupKind};
use crate::sema::{Scalar, Ty};
use crate::span::Span;
use crate::symbols::{SymbolKind, SymbolValue};

/// Initialized storage: bytes go to the data section, word-sized symbol
/// references become fixups.
pub(crate) fn lower_data(ctx: &mut LowerContext, decl: &DataDecl) {
    for entry in &decl.entries {
        let model = ctx.model;
        let Some(meta) = model.storage.get(&key(&entry.node.name)) else {
            continue;
        };
        let offset = ctx.emitter.offset(SectionKind::Data);
        define_global(
            ctx,
            &entry.node.name,
            SymbolKind::Data,
            SymbolValue::Section {
                section: SectionKind::Data,
                offset,
            },
            Some(meta.size),
            entry.span,
        );
        let bytes = initializer_bytes(ctx, &entry.node, &meta.ty, meta.size, offset, entry.span);
        ctx.emitter
            .write(SectionKind::Data, &bytes, entry.span, SegmentKind::Data);
    }
}

fn initializer_bytes(
    ctx: &mut LowerContext,
    entry: &DataEntry,
    ty: &Ty,
    size: u32,
    offset: u32,
    span: Span,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(size as usize);
    match &entry.init {
        DataInit::Zero => bytes.resize(size as usize, 0),
        DataInit::Str(text) => {
            if text.len() > size as usize {
                ctx.error(
                    DiagnosticId::Semantic,
                    span,
                    format!(
                        "string of {} bytes does not fit '{}' ({size} bytes)",
                        text.len(),
                        entry.name
                    ),
                );
            }
            bytes.extend(text.bytes().take(size as usize));
            bytes.resize(size as usize, 0);
        }
        DataInit::Values(values) => {
            let Some(slots) = ctx.model.scalar_slots(ty) else {
                ctx.error(
                    DiagnosticId::Semantic,
                    span,
                    format!("data '{}' of type '{ty}' cannot take a value list", entry.name),
                );
                bytes.resize(size as usize, 0);
                return bytes;
            };
            if slots.len() != values.len() {
                ctx.error(
                    DiagnosticId::Semantic,
                    span,
                    format!(
                        "data '{}' needs {} initializer value(s), found {}",
                        entry.name,
                        slots.len(),
                        values.len()
                    ),
                );
            }
            for (slot, value) in slots.iter().zip(values) {
                let at = offset + bytes.len() as u32;
                bytes.extend(slot_bytes(ctx, *slot, value, at, span));
            }
            bytes.resize(size as usize, 0);
        }
    }
    bytes
}

fn slot_bytes(
    ctx: &mut LowerContext,
    slot: Scalar,
    expr: &ImmExpr,
    at: u32,
    span: Span,
) -> Vec<u8> {
    let value = match operands::eval_value(ctx, expr) {
        Ok(value) => value,
        Err(fault) => {
            ctx.report(fault, span);
            return vec![0; slot.size() as usize];
        }
    };
    match (slot, value) {
        (Scalar::Byte, Value::Const(value)) => {
            if !(-128..=0xFF).contains(&value) {
                ctx.error(
                    DiagnosticId::Semantic,
                    span,
                    format!("value {value} does not fit in a byte"),
                );
            }
            vec![value as u8]
        }
        (Scalar::Byte, Value::Symbol { display, .. }) => {
            ctx.error(
                DiagnosticId::Semantic,
                span,
                format!("address of '{display}' does not fit in a byte"),
            );
            vec![0]
        }
        (Scalar::Word, Value::Const(value)) => {
            if !(-0x8000..=0xFFFF).contains(&value) {
                ctx.error(
                    DiagnosticId::Semantic,
                    span,
                    format!("value {value} does not fit in a word"),
                );
            }
            (value as u16).to_le_bytes().to_vec()
        }
        (Scalar::Word, Value::Symbol { key, display, addend }) => {
            ctx.emitter.add_fixup(Fixup {
                section: SectionKind::Data,
                offset: at,
                symbol: Some(key),
                display,
                addend,
                kind: FixupKind::Absolute16,
                span,
            });
            vec![0, 0]
        }
    }
}

pub(crate) fn lower_var(ctx: &mut LowerContext, decl: &VarDecl) {
    for entry in &decl.entries {
        let VarKind::Storage(_) = &entry.node.kind else {
            continue;
        };
        let model = ctx.model;
        let Some(meta) = model.storage.get(&key(&entry.node.name)) else {
            continue;
        };
        let offset = ctx.emitter.offset(SectionKind::Var);
        define_global(
            ctx,
            &entry.node.name,
            SymbolKind::Var,
            SymbolValue::Section {
                section: SectionKind::Var,
                offset,
            },
            Some(meta.size),
            entry.span,
        );
        ctx.emitter.reserve(SectionKind::Var, meta.size);
    }
}

pub(crate) fn lower_bin(ctx: &mut LowerContext, bin: &BinDecl, span: Span) {
    let offset = ctx.emitter.offset(bin.section);
    let size = bin.bytes.len() as u32;
    define_global(
        ctx,
        &bin.name,
        SymbolKind::Data,
        SymbolValue::Section {
            section: bin.section,
            offset,
        },
        Some(size),
        span,
    );
    if bin.section == SectionKind::Var {
        ctx.error(
            DiagnosticId::Layout,
            span,
            format!("bin '{}' cannot be placed in the var section", bin.name),
        );
        return;
    }
    ctx.emitter.write(bin.section, &bin.bytes, span, SegmentKind::Data);
}

/// Absolute-addressed chunks bypass the sections; the symbol names the
/// first chunk.
pub(crate) fn lower_hex(ctx: &mut LowerContext, hex: &HexDecl, span: Span) {
    let Some(first) = hex.chunks.first() else {
        ctx.error(
            DiagnosticId::Layout,
            span,
            format!("hex '{}' contains no data", hex.name),
        );
        return;
    };
    let total: usize = hex.chunks.iter().map(|chunk| chunk.bytes.len()).sum();
    define_global(
        ctx,
        &hex.name,
        SymbolKind::Data,
        SymbolValue::Absolute(i64::from(first.address)),
        Some(total as u32),
        span,
    );
    for chunk in &hex.chunks {
        ctx.emitter.hex.push(HexBlob {
            name: hex.name.clone(),
            address: chunk.address,
            bytes: chunk.bytes.clone(),
            span,
        });
    }
}
