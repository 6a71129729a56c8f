use zax_isaz80::{Operand as IsaOperand, Reg8, Reg16, is_relative_branch};

use super::ea::Linear;
use super::materialize::{address_into_hl, load_hl_value};
use super::operands::{LOperand, MemRef, Value};
use super::{Fault, LowerContext, Patch, ix, r8, r16};
use crate::diag::{Diagnostic, DiagnosticId};
use crate::span::Span;

use Reg16::{De, Hl};

/// Converts operands that need no helper code into encoder operands plus
/// at most one symbolic patch.
pub(crate) fn to_direct(
    mnemonic: &str,
    operands: &[LOperand],
) -> Result<(Vec<IsaOperand>, Option<Patch>), Fault> {
    let relative = is_relative_branch(mnemonic);
    let wide_immediate = matches!(mnemonic, "jp" | "call")
        || (mnemonic == "ld" && matches!(operands.first(), Some(LOperand::Reg16(_))));
    let last = operands.len().saturating_sub(1);

    let mut lowered = Vec::with_capacity(operands.len());
    let mut patch: Option<Patch> = None;
    for (index, operand) in operands.iter().enumerate() {
        let (isa, operand_patch) = match operand {
            LOperand::Reg8(reg) => (r8(*reg), None),
            LOperand::Reg16(reg) => (r16(*reg), None),
            LOperand::Cond(condition) => (IsaOperand::Cond(*condition), None),
            LOperand::PortC => (IsaOperand::PortC, None),
            LOperand::PortImm(port) => (IsaOperand::PortImm(*port), None),
            LOperand::Value(value) if relative && index == last => {
                (IsaOperand::Imm(0), Some(relative_patch(value, index)))
            }
            LOperand::Value(value) => {
                if let Value::Symbol { display, .. } = value {
                    if !wide_immediate {
                        return Err(Fault::addressing(format!(
                            "address of '{display}' does not fit an 8-bit operand of '{mnemonic}'"
                        )));
                    }
                }
                let (placeholder, patch) = Patch::split(value, index);
                (IsaOperand::Imm(placeholder), patch)
            }
            LOperand::Mem(MemRef::Absolute { value, .. }) => {
                let (placeholder, patch) = Patch::split(value, index);
                (IsaOperand::Absolute(placeholder), patch)
            }
            LOperand::Mem(MemRef::Indirect(reg)) => (IsaOperand::Indirect(*reg), None),
            LOperand::Mem(MemRef::Indexed { base, disp }) => (
                IsaOperand::Indexed {
                    base: *base,
                    disp: *disp,
                },
                None,
            ),
            LOperand::Mem(MemRef::Stack { disp, .. }) => (ix(*disp), None),
            LOperand::Mem(MemRef::Runtime(_)) | LOperand::AddressOf(_) => {
                return Err(Fault::addressing(format!(
                    "operand {} of '{mnemonic}' needs a runtime address computation",
                    index + 1
                )));
            }
        };
        if operand_patch.is_some() {
            if patch.is_some() {
                return Err(Fault::addressing(format!(
                    "'{mnemonic}' can carry only one symbolic operand"
                )));
            }
            patch = operand_patch;
        }
        lowered.push(isa);
    }
    Ok((lowered, patch))
}

fn relative_patch(value: &Value, operand: usize) -> Patch {
    match value {
        Value::Const(target) => Patch {
            operand,
            symbol: None,
            display: format!("${:04X}", target & 0xFFFF),
            addend: *target,
            relative: true,
        },
        Value::Symbol {
            key,
            display,
            addend,
        } => Patch {
            operand,
            symbol: Some(key.clone()),
            display: display.clone(),
            addend: *addend,
            relative: true,
        },
    }
}

pub(crate) fn emit_direct(
    ctx: &mut LowerContext,
    mnemonic: &str,
    operands: &[LOperand],
    span: Span,
) -> bool {
    match to_direct(mnemonic, operands) {
        Ok((isa, patch)) => ctx.emit_patched(mnemonic, &isa, patch, span),
        Err(fault) => {
            ctx.report(fault, span);
            false
        }
    }
}

fn uses_h_or_l(operand: &LOperand) -> bool {
    matches!(
        operand,
        LOperand::Reg8(Reg8::H | Reg8::L) | LOperand::Reg16(Hl)
    )
}

fn uses_d_or_e(operand: &LOperand) -> bool {
    matches!(
        operand,
        LOperand::Reg8(Reg8::D | Reg8::E) | LOperand::Reg16(De)
    )
}

fn needs_helper(operand: &LOperand) -> bool {
    matches!(
        operand,
        LOperand::Mem(MemRef::Absolute { .. } | MemRef::Runtime(_))
    )
}

/// Any instruction other than `ld`: operands are lowered directly, except
/// that one absolute or runtime memory operand is routed through `(hl)`.
pub(crate) fn lower_generic(
    ctx: &mut LowerContext,
    mnemonic: &str,
    operands: &[LOperand],
    span: Span,
) {
    if let Some(LOperand::AddressOf(linear)) = operands
        .iter()
        .find(|operand| matches!(operand, LOperand::AddressOf(_)))
    {
        ctx.error(
            DiagnosticId::Addressing,
            span,
            format!(
                "'{mnemonic}' cannot take a computed address{}; load it with 'ld rr, ...' first",
                describe(linear)
            ),
        );
        return;
    }

    let memory = operands
        .iter()
        .filter(|operand| matches!(operand, LOperand::Mem(_)))
        .count();
    if memory > 1 {
        ctx.error(
            DiagnosticId::Addressing,
            span,
            format!("'{mnemonic}' takes at most one memory operand"),
        );
        return;
    }
    let Some(position) = operands.iter().position(needs_helper) else {
        emit_direct(ctx, mnemonic, operands, span);
        return;
    };

    let mut rewritten = operands.to_vec();
    rewritten[position] = LOperand::Mem(MemRef::Indirect(Hl));
    match &operands[position] {
        LOperand::Mem(MemRef::Absolute { value, .. }) => {
            if operands.iter().any(uses_h_or_l) {
                reject_pair(ctx, mnemonic, "HL", span);
                return;
            }
            ctx.emit("push", &[r16(Hl)], span);
            load_hl_value(ctx, value, span);
            emit_direct(ctx, mnemonic, &rewritten, span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        LOperand::Mem(MemRef::Runtime(linear)) => {
            if operands
                .iter()
                .any(|operand| uses_h_or_l(operand) || uses_d_or_e(operand))
            {
                reject_pair(ctx, mnemonic, "HL and DE", span);
                return;
            }
            with_runtime_address(ctx, linear, span, |ctx| {
                emit_direct(ctx, mnemonic, &rewritten, span);
            });
        }
        _ => {}
    }
}

fn describe(linear: &Linear) -> String {
    match linear.ty.as_ref() {
        Some(ty) => format!(" of type '{ty}'"),
        None => String::new(),
    }
}

fn reject_pair(ctx: &mut LowerContext, mnemonic: &str, pair: &str, span: Span) {
    ctx.diagnostics.push(
        Diagnostic::error(
            DiagnosticId::Addressing,
            span,
            format!(
                "'{mnemonic}' cannot combine {pair} with a memory operand addressed through HL"
            ),
        )
        .with_help("move the value through another register first"),
    );
}

/// `push hl; push de; <address into hl>; body; pop de; pop hl`.
fn with_runtime_address(
    ctx: &mut LowerContext,
    linear: &Linear,
    span: Span,
    body: impl FnOnce(&mut LowerContext),
) {
    ctx.emit("push", &[r16(Hl)], span);
    ctx.emit("push", &[r16(De)], span);
    if address_into_hl(ctx, linear, span) {
        body(ctx);
    }
    ctx.emit("pop", &[r16(De)], span);
    ctx.emit("pop", &[r16(Hl)], span);
}

pub(crate) fn lower_ld(ctx: &mut LowerContext, operands: &[LOperand], span: Span) {
    let [dst, src] = operands else {
        emit_direct(ctx, "ld", operands, span);
        return;
    };

    match (dst, src) {
        (_, LOperand::AddressOf(linear)) => load_address(ctx, dst, linear, span),
        (LOperand::AddressOf(linear), _) => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                format!(
                    "cannot store into a computed address{}; use '(...)' to write memory",
                    describe(linear)
                ),
            );
        }
        (LOperand::Mem(_), LOperand::Mem(_)) => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                "'ld' cannot move memory to memory",
            );
        }
        (LOperand::Mem(MemRef::Absolute { value, ty }), src) => {
            store_absolute(ctx, value, ty.as_ref().is_some_and(|ty| ty.is_word()), src, span);
        }
        (dst, LOperand::Mem(MemRef::Absolute { value, .. })) => {
            load_absolute(ctx, dst, value, span);
        }
        (LOperand::Mem(MemRef::Stack { disp, ty }), src) => {
            store_frame(ctx, *disp, ty.as_ref().is_some_and(|ty| ty.is_word()), src, span);
        }
        (dst, LOperand::Mem(MemRef::Stack { disp, .. })) => load_frame(ctx, dst, *disp, span),
        (LOperand::Mem(MemRef::Runtime(linear)), src) => {
            store_runtime(ctx, linear, src, span);
        }
        (dst, LOperand::Mem(MemRef::Runtime(linear))) => load_runtime(ctx, dst, linear, span),
        _ => {
            emit_direct(ctx, "ld", operands, span);
        }
    }
}

fn load_address(ctx: &mut LowerContext, dst: &LOperand, linear: &Linear, span: Span) {
    match dst {
        LOperand::Reg16(Hl) => {
            ctx.emit("push", &[r16(De)], span);
            address_into_hl(ctx, linear, span);
            ctx.emit("pop", &[r16(De)], span);
        }
        LOperand::Reg16(De) => {
            ctx.emit("push", &[r16(Hl)], span);
            address_into_hl(ctx, linear, span);
            ctx.emit("ex", &[r16(De), r16(Hl)], span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        LOperand::Reg16(Reg16::Bc) => {
            ctx.emit("push", &[r16(Hl)], span);
            ctx.emit("push", &[r16(De)], span);
            address_into_hl(ctx, linear, span);
            ctx.emit("ld", &[r8(Reg8::C), r8(Reg8::L)], span);
            ctx.emit("ld", &[r8(Reg8::B), r8(Reg8::H)], span);
            ctx.emit("pop", &[r16(De)], span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        LOperand::Reg16(reg @ (Reg16::Ix | Reg16::Iy)) => {
            ctx.emit("push", &[r16(Hl)], span);
            ctx.emit("push", &[r16(De)], span);
            address_into_hl(ctx, linear, span);
            ctx.emit("push", &[r16(Hl)], span);
            ctx.emit("pop", &[r16(*reg)], span);
            ctx.emit("pop", &[r16(De)], span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        _ => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                format!(
                    "a computed address{} can only be loaded into bc, de, hl, ix or iy",
                    describe(linear)
                ),
            );
        }
    }
}

fn absolute(value: &Value) -> LOperand {
    LOperand::Mem(MemRef::Absolute {
        value: value.clone(),
        ty: None,
    })
}

fn load_absolute(ctx: &mut LowerContext, dst: &LOperand, value: &Value, span: Span) {
    match dst {
        LOperand::Reg8(Reg8::A) | LOperand::Reg16(_) => {
            emit_direct(ctx, "ld", &[dst.clone(), absolute(value)], span);
        }
        LOperand::Reg8(reg) if reg.is_general() => {
            ctx.emit("push", &[r16(Reg16::Af)], span);
            emit_direct(ctx, "ld", &[LOperand::Reg8(Reg8::A), absolute(value)], span);
            ctx.emit("ld", &[r8(*reg), r8(Reg8::A)], span);
            ctx.emit("pop", &[r16(Reg16::Af)], span);
        }
        _ => {
            emit_direct(ctx, "ld", &[dst.clone(), absolute(value)], span);
        }
    }
}

fn store_absolute(ctx: &mut LowerContext, value: &Value, word: bool, src: &LOperand, span: Span) {
    match src {
        LOperand::Reg8(Reg8::A) | LOperand::Reg16(_) => {
            emit_direct(ctx, "ld", &[absolute(value), src.clone()], span);
        }
        LOperand::Reg8(reg) if reg.is_general() => {
            ctx.emit("push", &[r16(Reg16::Af)], span);
            ctx.emit("ld", &[r8(Reg8::A), r8(*reg)], span);
            emit_direct(ctx, "ld", &[absolute(value), LOperand::Reg8(Reg8::A)], span);
            ctx.emit("pop", &[r16(Reg16::Af)], span);
        }
        LOperand::Value(immediate) if word => {
            ctx.emit("push", &[r16(Hl)], span);
            load_hl_value(ctx, immediate, span);
            emit_direct(ctx, "ld", &[absolute(value), LOperand::Reg16(Hl)], span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        LOperand::Value(immediate) => {
            let operands = [
                LOperand::Mem(MemRef::Indirect(Hl)),
                LOperand::Value(immediate.clone()),
            ];
            if let Err(fault) = to_direct("ld", &operands) {
                ctx.report(fault, span);
                return;
            }
            ctx.emit("push", &[r16(Hl)], span);
            load_hl_value(ctx, value, span);
            emit_direct(ctx, "ld", &operands, span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        _ => {
            emit_direct(ctx, "ld", &[absolute(value), src.clone()], span);
        }
    }
}

fn frame_pair(ctx: &mut LowerContext, reg: Reg16, span: Span) -> Option<(Reg8, Reg8)> {
    let halves = match reg {
        Reg16::Bc | De | Hl => reg.halves(),
        _ => None,
    };
    if halves.is_none() {
        ctx.error(
            DiagnosticId::Addressing,
            span,
            format!("'{}' cannot be transferred to or from a stack slot", reg.name()),
        );
    }
    halves
}

fn load_frame(ctx: &mut LowerContext, dst: &LOperand, disp: i64, span: Span) {
    match dst {
        LOperand::Reg16(reg) => {
            let Some((high, low)) = frame_pair(ctx, *reg, span) else {
                return;
            };
            ctx.emit("ld", &[r8(low), ix(disp)], span);
            ctx.emit("ld", &[r8(high), ix(disp.saturating_add(1))], span);
        }
        _ => {
            let slot = LOperand::Mem(MemRef::Stack { disp, ty: None });
            emit_direct(ctx, "ld", &[dst.clone(), slot], span);
        }
    }
}

fn store_frame(ctx: &mut LowerContext, disp: i64, word: bool, src: &LOperand, span: Span) {
    match src {
        LOperand::Reg16(reg) => {
            let Some((high, low)) = frame_pair(ctx, *reg, span) else {
                return;
            };
            ctx.emit("ld", &[ix(disp), r8(low)], span);
            ctx.emit("ld", &[ix(disp.saturating_add(1)), r8(high)], span);
        }
        LOperand::Value(Value::Const(value)) if word => {
            let value = *value;
            ctx.emit("ld", &[ix(disp), IsaOperand::Imm(value & 0xFF)], span);
            let high = IsaOperand::Imm((value >> 8) & 0xFF);
            ctx.emit("ld", &[ix(disp.saturating_add(1)), high], span);
        }
        LOperand::Value(value @ Value::Symbol { .. }) if word => {
            ctx.emit("push", &[r16(Hl)], span);
            load_hl_value(ctx, value, span);
            ctx.emit("ld", &[ix(disp), r8(Reg8::L)], span);
            ctx.emit("ld", &[ix(disp.saturating_add(1)), r8(Reg8::H)], span);
            ctx.emit("pop", &[r16(Hl)], span);
        }
        _ => {
            let slot = LOperand::Mem(MemRef::Stack { disp, ty: None });
            emit_direct(ctx, "ld", &[slot, src.clone()], span);
        }
    }
}

fn load_runtime(ctx: &mut LowerContext, dst: &LOperand, linear: &Linear, span: Span) {
    if matches!(dst, LOperand::Reg16(Hl)) {
        ctx.emit("push", &[r16(De)], span);
        if address_into_hl(ctx, linear, span) {
            ctx.emit("ld", &[r8(Reg8::E), IsaOperand::Indirect(Hl)], span);
            ctx.emit("inc", &[r16(Hl)], span);
            ctx.emit("ld", &[r8(Reg8::D), IsaOperand::Indirect(Hl)], span);
            ctx.emit("ex", &[r16(De), r16(Hl)], span);
        }
        ctx.emit("pop", &[r16(De)], span);
        return;
    }
    if uses_h_or_l(dst) || uses_d_or_e(dst) {
        reject_pair(ctx, "ld", "HL and DE", span);
        return;
    }
    match dst {
        LOperand::Reg8(reg) if reg.is_general() => {
            with_runtime_address(ctx, linear, span, |ctx| {
                ctx.emit("ld", &[r8(*reg), IsaOperand::Indirect(Hl)], span);
            });
        }
        LOperand::Reg16(Reg16::Bc) => {
            with_runtime_address(ctx, linear, span, |ctx| {
                ctx.emit("ld", &[r8(Reg8::C), IsaOperand::Indirect(Hl)], span);
                ctx.emit("inc", &[r16(Hl)], span);
                ctx.emit("ld", &[r8(Reg8::B), IsaOperand::Indirect(Hl)], span);
            });
        }
        _ => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                "this register cannot be loaded from a runtime-indexed address",
            );
        }
    }
}

fn store_runtime(ctx: &mut LowerContext, linear: &Linear, src: &LOperand, span: Span) {
    if uses_h_or_l(src) || uses_d_or_e(src) {
        reject_pair(ctx, "ld", "HL and DE", span);
        return;
    }
    let word = linear.ty.as_ref().is_some_and(|ty| ty.is_word());
    match src {
        LOperand::Reg8(reg) if reg.is_general() => {
            with_runtime_address(ctx, linear, span, |ctx| {
                ctx.emit("ld", &[IsaOperand::Indirect(Hl), r8(*reg)], span);
            });
        }
        LOperand::Reg16(Reg16::Bc) => {
            with_runtime_address(ctx, linear, span, |ctx| {
                ctx.emit("ld", &[IsaOperand::Indirect(Hl), r8(Reg8::C)], span);
                ctx.emit("inc", &[r16(Hl)], span);
                ctx.emit("ld", &[IsaOperand::Indirect(Hl), r8(Reg8::B)], span);
            });
        }
        LOperand::Value(value) if word => {
            with_runtime_address(ctx, linear, span, |ctx| {
                let (placeholder, patch) = Patch::split(value, 1);
                ctx.emit_patched("ld", &[r16(De), IsaOperand::Imm(placeholder)], patch, span);
                ctx.emit("ld", &[IsaOperand::Indirect(Hl), r8(Reg8::E)], span);
                ctx.emit("inc", &[r16(Hl)], span);
                ctx.emit("ld", &[IsaOperand::Indirect(Hl), r8(Reg8::D)], span);
            });
        }
        LOperand::Value(value) => {
            let operands = [LOperand::Mem(MemRef::Indirect(Hl)), LOperand::Value(value.clone())];
            if let Err(fault) = to_direct("ld", &operands) {
                ctx.report(fault, span);
                return;
            }
            with_runtime_address(ctx, linear, span, |ctx| {
                emit_direct(ctx, "ld", &operands, span);
            });
        }
        _ => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                "this operand cannot be stored to a runtime-indexed address",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_branch_to_constant_keeps_the_address() {
        let (isa, patch) = to_direct("jr", &[LOperand::Value(Value::Const(0x8010))])
            .expect("relative branch lowers");
        assert_eq!(isa, vec![IsaOperand::Imm(0)]);
        let patch = patch.expect("relative patch");
        assert!(patch.relative);
        assert_eq!(patch.symbol, None);
        assert_eq!(patch.addend, 0x8010);
        assert_eq!(patch.display, "$8010");
    }

    #[test]
    fn symbol_in_byte_position_is_rejected() {
        let symbol = Value::Symbol {
            key: "table".to_string(),
            display: "table".to_string(),
            addend: 0,
        };
        let fault = to_direct("ld", &[LOperand::Reg8(Reg8::A), LOperand::Value(symbol)])
            .expect_err("8-bit slot");
        assert!(fault.message.contains("does not fit an 8-bit operand"));
    }

    #[test]
    fn frame_slots_become_ix_displacements() {
        let slot = LOperand::Mem(MemRef::Stack { disp: -4, ty: None });
        let (isa, patch) =
            to_direct("ld", &[LOperand::Reg8(Reg8::A), slot]).expect("frame slot lowers");
        assert_eq!(isa[1], ix(-4));
        assert!(patch.is_none());
    }
}
