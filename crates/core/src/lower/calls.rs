use zax_isaz80::{Operand as IsaOperand, Reg8, Reg16};

use super::materialize::{address_into_hl, load_hl_value, load_value_hl};
use super::operands::{self, LOperand, MemRef, Value};
use super::{LowerContext, Patch, r8, r16};
use crate::ast::{Operand, key};
use crate::diag::{Diagnostic, DiagnosticId};
use crate::sema::{Callable, ParamMeta, Scalar};
use crate::span::Span;

/// Lowers `name arg, ...` against a typed function or extern signature.
/// Arguments are pushed right to left as words, the caller pops them.
pub(crate) fn lower_call(
    ctx: &mut LowerContext,
    callable: &Callable,
    operands: &[Operand],
    span: Span,
) {
    if operands.len() != callable.params.len() {
        ctx.diagnostics.push(
            Diagnostic::error(
                DiagnosticId::Call,
                span,
                format!(
                    "'{}' expects {} argument(s), found {}",
                    callable.name,
                    callable.params.len(),
                    operands.len()
                ),
            )
            .with_note(format!("signature: {}", signature(callable))),
        );
        return;
    }
    ctx.check_call(span);

    let mut hl_clobbered = false;
    let mut failed = false;
    for (operand, param) in operands.iter().zip(&callable.params).rev() {
        let lowered = match operands::lower_operand(ctx, operand) {
            Ok(lowered) => lowered,
            Err(fault) => {
                ctx.report(fault, span);
                failed = true;
                continue;
            }
        };
        if hl_clobbered && reads_hl(&lowered) {
            ctx.diagnostics.push(
                Diagnostic::error(
                    DiagnosticId::Call,
                    span,
                    format!(
                        "argument '{}' reads HL after a later argument already overwrote it",
                        param.name
                    ),
                )
                .with_help("arguments are evaluated right to left; copy the value elsewhere first"),
            );
            failed = true;
            continue;
        }
        match push_argument(ctx, callable, param, &lowered, span) {
            Some(clobbers_hl) => hl_clobbered |= clobbers_hl,
            None => failed = true,
        }
    }
    if failed {
        return;
    }

    let target = Value::Symbol {
        key: key(&callable.name),
        display: callable.name.clone(),
        addend: 0,
    };
    let (placeholder, patch) = Patch::split(&target, 0);
    ctx.emit_patched("call", &[IsaOperand::Imm(placeholder)], patch, span);
    for _ in 0..callable.params.len() * 2 {
        ctx.emit("inc", &[r16(Reg16::Sp)], span);
    }
}

fn signature(callable: &Callable) -> String {
    let params = callable
        .params
        .iter()
        .map(|param| format!("{}: {}", param.name, param.ty))
        .collect::<Vec<_>>()
        .join(", ");
    match &callable.ret {
        Some(ret) => format!("{}({params}): {ret}", callable.name),
        None => format!("{}({params})", callable.name),
    }
}

fn reads_hl(operand: &LOperand) -> bool {
    match operand {
        LOperand::Reg8(Reg8::H | Reg8::L) | LOperand::Reg16(Reg16::Hl) => true,
        LOperand::Mem(MemRef::Indirect(Reg16::Hl)) => true,
        LOperand::Mem(MemRef::Runtime(linear)) | LOperand::AddressOf(linear) => {
            linear.reads_hl()
        }
        _ => false,
    }
}

fn argument_error(
    ctx: &mut LowerContext,
    callable: &Callable,
    param: &ParamMeta,
    message: &str,
    span: Span,
) {
    ctx.error(
        DiagnosticId::Call,
        span,
        format!(
            "argument '{}' of '{}': {message}",
            param.name, callable.name
        ),
    );
}

/// Pushes one argument. Returns whether HL was overwritten, or `None`
/// after reporting an error.
fn push_argument(
    ctx: &mut LowerContext,
    callable: &Callable,
    param: &ParamMeta,
    argument: &LOperand,
    span: Span,
) -> Option<bool> {
    let byte = param.ty.scalar() == Some(Scalar::Byte);
    match argument {
        LOperand::Reg16(reg @ (Reg16::Bc | Reg16::De | Reg16::Hl | Reg16::Ix | Reg16::Iy)) => {
            if byte {
                argument_error(
                    ctx,
                    callable,
                    param,
                    "a 16-bit register cannot be passed as a byte",
                    span,
                );
                return None;
            }
            ctx.emit("push", &[r16(*reg)], span);
            Some(false)
        }
        LOperand::Reg16(reg) => {
            let message = format!("'{}' cannot be passed as an argument", reg.name());
            argument_error(ctx, callable, param, &message, span);
            None
        }
        LOperand::Reg8(reg) if reg.is_general() => {
            match reg {
                Reg8::L => {}
                Reg8::H => {
                    ctx.emit("ld", &[r8(Reg8::L), r8(Reg8::H)], span);
                }
                _ => {
                    ctx.emit("ld", &[r8(Reg8::L), r8(*reg)], span);
                }
            }
            ctx.emit("ld", &[r8(Reg8::H), IsaOperand::Imm(0)], span);
            ctx.emit("push", &[r16(Reg16::Hl)], span);
            Some(true)
        }
        LOperand::Value(Value::Const(value)) => {
            let value = if byte {
                value & 0xFF
            } else if (-0x8000..=0xFFFF).contains(value) {
                value & 0xFFFF
            } else {
                let message = format!("value {value} does not fit in 16 bits");
                argument_error(ctx, callable, param, &message, span);
                return None;
            };
            ctx.emit("ld", &[r16(Reg16::Hl), IsaOperand::Imm(value)], span);
            ctx.emit("push", &[r16(Reg16::Hl)], span);
            Some(true)
        }
        LOperand::Value(value @ Value::Symbol { display, .. }) => {
            if byte {
                let message = format!("address of '{display}' cannot be passed as a byte");
                argument_error(ctx, callable, param, &message, span);
                return None;
            }
            load_hl_value(ctx, value, span);
            ctx.emit("push", &[r16(Reg16::Hl)], span);
            Some(true)
        }
        LOperand::AddressOf(linear) => {
            if byte {
                argument_error(ctx, callable, param, "an address cannot be passed as a byte", span);
                return None;
            }
            ctx.emit("push", &[r16(Reg16::De)], span);
            address_into_hl(ctx, linear, span);
            ctx.emit("pop", &[r16(Reg16::De)], span);
            ctx.emit("push", &[r16(Reg16::Hl)], span);
            Some(true)
        }
        LOperand::Mem(mem) => {
            ctx.emit("push", &[r16(Reg16::De)], span);
            load_value_hl(ctx, mem, !byte, span);
            ctx.emit("pop", &[r16(Reg16::De)], span);
            ctx.emit("push", &[r16(Reg16::Hl)], span);
            Some(true)
        }
        LOperand::Reg8(_) | LOperand::Cond(_) | LOperand::PortC | LOperand::PortImm(_) => {
            argument_error(ctx, callable, param, "unsupported argument form", span);
            None
        }
    }
}
