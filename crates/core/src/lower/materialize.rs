use zax_isaz80::{Operand as IsaOperand, Reg8, Reg16};

use super::ea::{Atom, Base, Linear, StaticMem};
use super::operands::{MemRef, Value};
use super::{LowerContext, Patch, ix, r8, r16};
use crate::diag::DiagnosticId;
use crate::span::Span;

use Reg16::{De, Hl};

/// Emits code leaving the address described by `linear` in HL. DE may be
/// clobbered; callers that need it save it.
pub(crate) fn address_into_hl(ctx: &mut LowerContext, linear: &Linear, span: Span) -> bool {
    let Some(term) = &linear.term else {
        return static_address(ctx, linear, span);
    };

    let mut ok = load_atom(ctx, &term.atom, span);
    for _ in 0..term.coef.unsigned_abs().trailing_zeros() {
        ok &= ctx.emit("add", &[r16(Hl), r16(Hl)], span);
    }
    if term.coef < 0 {
        ok &= negate_hl(ctx, span);
    }

    match &linear.base {
        Base::Stack => {
            if linear.offset != 0 {
                ok &= add_constant(ctx, linear.offset, span);
            }
            ok &= ctx.emit("ex", &[r16(De), r16(Hl)], span);
            ok &= ctx.emit("push", &[r16(Reg16::Ix)], span);
            ok &= ctx.emit("pop", &[r16(Hl)], span);
            ok &= ctx.emit("add", &[r16(Hl), r16(De)], span);
        }
        Base::Symbol { key, display } => {
            let value = Value::Symbol {
                key: key.clone(),
                display: display.clone(),
                addend: linear.offset,
            };
            let (placeholder, patch) = Patch::split(&value, 1);
            ok &= ctx.emit_patched("ld", &[r16(De), IsaOperand::Imm(placeholder)], patch, span);
            ok &= ctx.emit("add", &[r16(Hl), r16(De)], span);
        }
        Base::Literal => {
            if linear.offset != 0 {
                ok &= add_constant(ctx, linear.offset, span);
            }
        }
    }
    ok
}

fn static_address(ctx: &mut LowerContext, linear: &Linear, span: Span) -> bool {
    if let Some(value) = linear.static_value() {
        return load_hl_value(ctx, &value, span);
    }
    let mut ok = ctx.emit("push", &[r16(Reg16::Ix)], span);
    ok &= ctx.emit("pop", &[r16(Hl)], span);
    if linear.offset != 0 {
        ok &= add_constant(ctx, linear.offset, span);
    }
    ok
}

pub(crate) fn load_hl_value(ctx: &mut LowerContext, value: &Value, span: Span) -> bool {
    let (placeholder, patch) = Patch::split(value, 1);
    ctx.emit_patched("ld", &[r16(Hl), IsaOperand::Imm(placeholder)], patch, span)
}

fn add_constant(ctx: &mut LowerContext, value: i64, span: Span) -> bool {
    ctx.emit("ld", &[r16(De), IsaOperand::Imm(value & 0xFFFF)], span)
        && ctx.emit("add", &[r16(Hl), r16(De)], span)
}

fn negate_hl(ctx: &mut LowerContext, span: Span) -> bool {
    ctx.emit("ex", &[r16(De), r16(Hl)], span)
        && ctx.emit("ld", &[r16(Hl), IsaOperand::Imm(0)], span)
        && ctx.emit("or", &[r8(Reg8::A)], span)
        && ctx.emit("sbc", &[r16(Hl), r16(De)], span)
}

fn load_atom(ctx: &mut LowerContext, atom: &Atom, span: Span) -> bool {
    match atom {
        Atom::Reg8(Reg8::L) => ctx.emit("ld", &[r8(Reg8::H), IsaOperand::Imm(0)], span),
        Atom::Reg8(reg) if reg.is_general() => {
            ctx.emit("ld", &[r8(Reg8::L), r8(*reg)], span) && clear_h(ctx, span)
        }
        Atom::Reg8(reg) => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                format!("'{}' cannot be used as an index register", reg.name()),
            );
            false
        }
        Atom::Reg16(Reg16::Hl) => true,
        Atom::Reg16(reg @ (Reg16::Bc | Reg16::De)) => {
            let Some((high, low)) = reg.halves() else {
                return false;
            };
            ctx.emit("ld", &[r8(Reg8::L), r8(low)], span)
                && ctx.emit("ld", &[r8(Reg8::H), r8(high)], span)
        }
        Atom::Reg16(reg @ (Reg16::Ix | Reg16::Iy)) => {
            ctx.emit("push", &[r16(*reg)], span) && ctx.emit("pop", &[r16(Hl)], span)
        }
        Atom::Reg16(Reg16::Sp) => {
            ctx.emit("ld", &[r16(Hl), IsaOperand::Imm(0)], span)
                && ctx.emit("add", &[r16(Hl), r16(Reg16::Sp)], span)
        }
        Atom::Reg16(reg) => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                format!("'{}' cannot be used as an index register", reg.name()),
            );
            false
        }
        Atom::MemHl => {
            ctx.emit("ld", &[r8(Reg8::L), IsaOperand::Indirect(Hl)], span) && clear_h(ctx, span)
        }
        Atom::Indexed { base, disp } => {
            let cell = IsaOperand::Indexed {
                base: *base,
                disp: *disp,
            };
            ctx.emit("ld", &[r8(Reg8::L), cell], span) && clear_h(ctx, span)
        }
        Atom::Mem {
            at: StaticMem::Absolute(value),
            word,
        } => {
            let (placeholder, patch) = Patch::split(value, 1);
            ctx.emit_patched("ld", &[r16(Hl), IsaOperand::Absolute(placeholder)], patch, span)
                && (*word || clear_h(ctx, span))
        }
        Atom::Mem {
            at: StaticMem::Stack(disp),
            word,
        } => load_frame_hl(ctx, *disp, *word, span),
    }
}

fn clear_h(ctx: &mut LowerContext, span: Span) -> bool {
    ctx.emit("ld", &[r8(Reg8::H), IsaOperand::Imm(0)], span)
}

fn load_frame_hl(ctx: &mut LowerContext, disp: i64, word: bool, span: Span) -> bool {
    if !ctx.emit("ld", &[r8(Reg8::L), ix(disp)], span) {
        return false;
    }
    if word {
        ctx.emit("ld", &[r8(Reg8::H), ix(disp.saturating_add(1))], span)
    } else {
        clear_h(ctx, span)
    }
}

pub(crate) fn load_value_hl(ctx: &mut LowerContext, mem: &MemRef, word: bool, span: Span) -> bool {
    match mem {
        MemRef::Indirect(Hl) => load_through_hl(ctx, word, span),
        MemRef::Indirect(reg @ (Reg16::Bc | Reg16::De)) => {
            let Some((high, low)) = reg.halves() else {
                return false;
            };
            ctx.emit("ld", &[r8(Reg8::L), r8(low)], span)
                && ctx.emit("ld", &[r8(Reg8::H), r8(high)], span)
                && load_through_hl(ctx, word, span)
        }
        MemRef::Indirect(reg) => {
            ctx.error(
                DiagnosticId::Addressing,
                span,
                format!("cannot load a value through '({})'", reg.name()),
            );
            false
        }
        MemRef::Indexed { base, disp } => {
            let cell = |disp| IsaOperand::Indexed { base: *base, disp };
            if !ctx.emit("ld", &[r8(Reg8::L), cell(*disp)], span) {
                return false;
            }
            if word {
                ctx.emit("ld", &[r8(Reg8::H), cell(disp.saturating_add(1))], span)
            } else {
                clear_h(ctx, span)
            }
        }
        MemRef::Stack { disp, .. } => load_frame_hl(ctx, *disp, word, span),
        MemRef::Absolute { value, .. } => {
            let (placeholder, patch) = Patch::split(value, 1);
            ctx.emit_patched("ld", &[r16(Hl), IsaOperand::Absolute(placeholder)], patch, span)
                && (word || clear_h(ctx, span))
        }
        MemRef::Runtime(linear) => {
            address_into_hl(ctx, linear, span) && load_through_hl(ctx, word, span)
        }
    }
}

fn load_through_hl(ctx: &mut LowerContext, word: bool, span: Span) -> bool {
    if !word {
        return ctx.emit("ld", &[r8(Reg8::L), IsaOperand::Indirect(Hl)], span)
            && clear_h(ctx, span);
    }
    ctx.emit("ld", &[r8(Reg8::E), IsaOperand::Indirect(Hl)], span)
        && ctx.emit("inc", &[r16(Hl)], span)
        && ctx.emit("ld", &[r8(Reg8::D), IsaOperand::Indirect(Hl)], span)
        && ctx.emit("ex", &[r16(De), r16(Hl)], span)
}
