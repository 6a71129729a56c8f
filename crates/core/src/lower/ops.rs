use rustc_hash::FxHashMap;
use zax_eval::ImmExpr;
use zax_isaz80::{Reg16, Register, is_mnemonic};

use super::operands::{self, MemRef, Value, condition_of};
use super::{ActiveOp, LabelInfo, LowerContext, control};
use crate::ast::{EaExpr, EaIndex, Instruction, Item, Matcher, Operand, key};
use crate::diag::{Diagnostic, DiagnosticId};
use crate::sema::{OpOverload, Scalar};
use crate::span::{Span, Spanned};

/// Resolves and expands an op invocation. Returns `false` when the name
/// should fall through to the plain instruction encoder.
pub(crate) fn expand(ctx: &mut LowerContext, name: &str, operands: &[Operand], span: Span) -> bool {
    let model = ctx.model;
    let Some(overloads) = model.ops.get(name) else {
        return false;
    };

    let by_arity: Vec<&OpOverload> = overloads
        .iter()
        .filter(|overload| overload.decl.params.len() == operands.len())
        .collect();
    if by_arity.is_empty() {
        if is_mnemonic(name) {
            return false;
        }
        let mut diagnostic = Diagnostic::error(
            DiagnosticId::OpResolution,
            span,
            format!(
                "no overload of op '{name}' takes {} operand(s)",
                operands.len()
            ),
        );
        for overload in overloads {
            diagnostic = diagnostic.with_note(format!("candidate: {}", overload.signature()));
        }
        ctx.diagnostics.push(diagnostic);
        return true;
    }

    let mut matching = Vec::new();
    let mut rejected = Vec::new();
    for overload in by_arity {
        match first_mismatch(ctx, overload, operands) {
            None => matching.push(overload),
            Some(reason) => rejected.push(format!("{}: {reason}", overload.signature())),
        }
    }
    if matching.is_empty() {
        if is_mnemonic(name) {
            return false;
        }
        let mut diagnostic = Diagnostic::error(
            DiagnosticId::OpResolution,
            span,
            format!("no matching overload for op '{name}'"),
        );
        for reason in rejected {
            diagnostic = diagnostic.with_note(reason);
        }
        ctx.diagnostics.push(diagnostic);
        return true;
    }

    let best: Vec<&OpOverload> = matching
        .iter()
        .copied()
        .filter(|candidate| {
            !matching
                .iter()
                .any(|other| dominates(&other.decl.params, &candidate.decl.params))
        })
        .collect();
    let [chosen] = best.as_slice() else {
        let mut diagnostic = Diagnostic::error(
            DiagnosticId::OpResolution,
            span,
            format!(
                "ambiguous op '{name}': {} overloads match equally well",
                best.len()
            ),
        );
        for candidate in &best {
            diagnostic = diagnostic
                .with_label(candidate.span, "candidate")
                .with_note(format!("candidate: {}", candidate.signature()));
        }
        ctx.diagnostics.push(diagnostic);
        return true;
    };
    let chosen = *chosen;

    let active = ctx
        .op_stack
        .iter()
        .position(|active| active.key == name && active.ordinal == chosen.ordinal);
    if let Some(start) = active {
        // One report per cycle; re-entries below the first report stay quiet.
        if !ctx.op_stack[start].cycle_reported {
            ctx.op_stack[start].cycle_reported = true;
            let mut chain: Vec<&str> = ctx.op_stack[start..]
                .iter()
                .map(|active| active.name.as_str())
                .collect();
            chain.push(&chosen.decl.name);
            let message = format!("cyclic op expansion: {}", chain.join(" -> "));
            ctx.error(DiagnosticId::OpResolution, span, message);
        }
        return true;
    }

    log::trace!("expanding {}", chosen.signature());
    let body = instantiate(ctx, chosen, operands);
    ctx.op_stack.push(ActiveOp {
        key: name.to_string(),
        ordinal: chosen.ordinal,
        name: chosen.decl.name.clone(),
        cycle_reported: false,
    });
    let outermost = ctx.macro_site.is_none();
    if outermost {
        ctx.macro_site = Some(span);
    }
    control::lower_body(ctx, &body);
    if outermost {
        ctx.macro_site = None;
    }
    ctx.op_stack.pop();
    true
}

fn first_mismatch(
    ctx: &LowerContext,
    overload: &OpOverload,
    operands: &[Operand],
) -> Option<String> {
    overload
        .decl
        .params
        .iter()
        .zip(operands)
        .enumerate()
        .find_map(|(index, (param, operand))| {
            accepts(ctx, &param.matcher, operand)
                .err()
                .map(|reason| format!("operand {} ('{}'): {reason}", index + 1, param.name))
        })
}

fn accepts(ctx: &LowerContext, matcher: &Matcher, operand: &Operand) -> Result<(), String> {
    match matcher {
        Matcher::Reg8 => match operand {
            Operand::Reg(Register::R8(_)) => Ok(()),
            _ => Err("expected an 8-bit register".to_string()),
        },
        Matcher::Reg16 => match operand {
            Operand::Reg(Register::R16(Reg16::Bc | Reg16::De | Reg16::Hl | Reg16::Sp)) => Ok(()),
            _ => Err("expected bc, de, hl or sp".to_string()),
        },
        Matcher::Idx16 => match operand {
            Operand::Reg(Register::R16(Reg16::Ix | Reg16::Iy)) => Ok(()),
            _ => Err("expected ix or iy".to_string()),
        },
        Matcher::Imm8 => match immediate(ctx, operand)? {
            Value::Const(value) if (-128..=0xFF).contains(&value) => Ok(()),
            Value::Const(value) => Err(format!("{value} does not fit in 8 bits")),
            Value::Symbol { display, .. } => {
                Err(format!("address of '{display}' does not fit in 8 bits"))
            }
        },
        Matcher::Imm16 => match immediate(ctx, operand)? {
            Value::Const(value) if !(-0x8000..=0xFFFF).contains(&value) => {
                Err(format!("{value} does not fit in 16 bits"))
            }
            _ => Ok(()),
        },
        Matcher::Ea => match operand {
            Operand::Ea(_) | Operand::Mem(_) => Ok(()),
            Operand::Imm(ImmExpr::Name(name)) if names_storage(ctx, name) => Ok(()),
            _ => Err("expected an effective address".to_string()),
        },
        Matcher::Mem8 => dereference(ctx, operand, Scalar::Byte),
        Matcher::Mem16 => dereference(ctx, operand, Scalar::Word),
        Matcher::Token(token) => match operand_text(operand) {
            Some(text) if text.eq_ignore_ascii_case(token) => Ok(()),
            _ => Err(format!("expected '{token}'")),
        },
        Matcher::Cond => match condition_of(operand) {
            Some(_) => Ok(()),
            None => Err("expected a condition code".to_string()),
        },
    }
}

fn immediate(ctx: &LowerContext, operand: &Operand) -> Result<Value, String> {
    let Operand::Imm(expr) = operand else {
        return Err("expected an immediate".to_string());
    };
    operands::eval_value(ctx, expr).map_err(|fault| fault.message)
}

fn names_storage(ctx: &LowerContext, name: &str) -> bool {
    let lookup = key(name);
    let local = ctx.func.as_ref().is_some_and(|scope| {
        scope.slots.contains_key(&lookup) || scope.aliases.contains_key(&lookup)
    });
    local || ctx.model.storage.contains_key(&lookup) || ctx.model.aliases.contains_key(&lookup)
}

fn dereference(ctx: &LowerContext, operand: &Operand, width: Scalar) -> Result<(), String> {
    let Operand::Mem(ea) = operand else {
        return Err("expected a memory operand".to_string());
    };
    let mem = operands::memory_operand(ctx, ea).map_err(|fault| fault.message)?;
    let ty = match &mem {
        MemRef::Indirect(_) | MemRef::Indexed { .. } => return Ok(()),
        _ => mem.ty(),
    };
    match ty {
        None => Ok(()),
        Some(ty) if ty.scalar() == Some(width) => Ok(()),
        Some(ty) => Err(format!("memory operand has type '{ty}'")),
    }
}

fn operand_text(operand: &Operand) -> Option<String> {
    match operand {
        Operand::Reg(register) => Some(register.name().to_string()),
        Operand::Imm(ImmExpr::Name(name)) | Operand::Ea(EaExpr::Name(name)) => Some(name.clone()),
        Operand::Imm(ImmExpr::Literal(value)) => Some(value.to_string()),
        Operand::Mem(EaExpr::Name(name)) => Some(format!("({name})")),
        _ => None,
    }
}

fn at_least(left: &Matcher, right: &Matcher) -> bool {
    left == right || more_specific(left, right)
}

fn more_specific(left: &Matcher, right: &Matcher) -> bool {
    match (left, right) {
        (Matcher::Token(_), Matcher::Token(_)) => false,
        (Matcher::Token(_), _) => true,
        (Matcher::Imm8, Matcher::Imm16) => true,
        (Matcher::Mem8 | Matcher::Mem16, Matcher::Ea) => true,
        _ => false,
    }
}

fn dominates(left: &[crate::ast::OpParam], right: &[crate::ast::OpParam]) -> bool {
    let pairs = || left.iter().zip(right);
    pairs().all(|(l, r)| at_least(&l.matcher, &r.matcher))
        && pairs().any(|(l, r)| more_specific(&l.matcher, &r.matcher))
}

fn instantiate(
    ctx: &mut LowerContext,
    overload: &OpOverload,
    operands: &[Operand],
) -> Vec<Spanned<Item>> {
    let mut bindings: FxHashMap<String, Operand> = overload
        .decl
        .params
        .iter()
        .zip(operands)
        .map(|(param, operand)| (key(&param.name), operand.clone()))
        .collect();

    let site = ctx.next_id();
    for item in &overload.decl.body {
        let Item::Label(label) = &item.node else {
            continue;
        };
        let fresh = format!("__zax_op_{}_{}_{site}", key(&overload.decl.name), key(label));
        if let Some(scope) = ctx.func.as_mut() {
            scope.labels.insert(
                key(&fresh),
                LabelInfo {
                    symbol: format!("{}::{}", scope.key, key(&fresh)),
                    display: fresh.clone(),
                    hidden: true,
                },
            );
        }
        bindings.insert(key(label), Operand::Imm(ImmExpr::name(fresh)));
    }

    overload
        .decl
        .body
        .iter()
        .map(|item| Spanned::new(substitute_item(&item.node, &bindings), item.span))
        .collect()
}

fn substitute_item(item: &Item, bindings: &FxHashMap<String, Operand>) -> Item {
    match item {
        Item::Label(label) => match bindings.get(&key(label)) {
            Some(Operand::Imm(ImmExpr::Name(fresh))) => Item::Label(fresh.clone()),
            _ => Item::Label(label.clone()),
        },
        Item::Instruction(instruction) => Item::Instruction(Instruction {
            mnemonic: instruction.mnemonic.clone(),
            operands: instruction
                .operands
                .iter()
                .map(|operand| substitute_operand(operand, bindings))
                .collect(),
        }),
        Item::If(operand) => Item::If(substitute_operand(operand, bindings)),
        Item::While(operand) => Item::While(substitute_operand(operand, bindings)),
        Item::Until(operand) => Item::Until(substitute_operand(operand, bindings)),
        Item::Select(operand) => Item::Select(substitute_operand(operand, bindings)),
        Item::Case(values) => Item::Case(
            values
                .iter()
                .map(|value| substitute_imm(value, bindings))
                .collect(),
        ),
        Item::Else | Item::End | Item::Repeat | Item::SelectElse => item.clone(),
    }
}

fn substitute_operand(operand: &Operand, bindings: &FxHashMap<String, Operand>) -> Operand {
    match operand {
        Operand::Imm(ImmExpr::Name(name)) | Operand::Ea(EaExpr::Name(name)) => {
            match bindings.get(&key(name)) {
                Some(bound) => bound.clone(),
                None => operand.clone(),
            }
        }
        Operand::Imm(expr) => Operand::Imm(substitute_imm(expr, bindings)),
        Operand::Ea(ea) => Operand::Ea(substitute_ea(ea, bindings)),
        Operand::Mem(ea) => Operand::Mem(substitute_ea(ea, bindings)),
        Operand::PortImm(expr) => Operand::PortImm(substitute_imm(expr, bindings)),
        Operand::Reg(_) | Operand::PortC => operand.clone(),
    }
}

fn substitute_imm(expr: &ImmExpr, bindings: &FxHashMap<String, Operand>) -> ImmExpr {
    expr.map_names(&mut |name| match bindings.get(&key(name))? {
        Operand::Imm(bound) => Some(bound.clone()),
        Operand::Reg(register) => Some(ImmExpr::name(register.name())),
        Operand::Ea(EaExpr::Name(bound)) | Operand::Mem(EaExpr::Name(bound)) => {
            Some(ImmExpr::name(bound.clone()))
        }
        Operand::Ea(EaExpr::Imm(bound)) => Some(bound.clone()),
        _ => None,
    })
}

fn substitute_ea(ea: &EaExpr, bindings: &FxHashMap<String, Operand>) -> EaExpr {
    match ea {
        EaExpr::Name(name) => match bindings.get(&key(name)) {
            Some(Operand::Ea(bound) | Operand::Mem(bound)) => bound.clone(),
            Some(Operand::Imm(ImmExpr::Name(bound))) => EaExpr::Name(bound.clone()),
            Some(Operand::Imm(bound)) => EaExpr::Imm(bound.clone()),
            Some(Operand::Reg(register)) => EaExpr::Name(register.name().to_string()),
            _ => ea.clone(),
        },
        EaExpr::Imm(expr) => EaExpr::Imm(substitute_imm(expr, bindings)),
        EaExpr::Field { base, field } => EaExpr::Field {
            base: Box::new(substitute_ea(base, bindings)),
            field: field.clone(),
        },
        EaExpr::Index { base, index } => EaExpr::Index {
            base: Box::new(substitute_ea(base, bindings)),
            index: substitute_index(index, bindings),
        },
        EaExpr::Add { base, offset } => EaExpr::Add {
            base: Box::new(substitute_ea(base, bindings)),
            offset: substitute_imm(offset, bindings),
        },
        EaExpr::Sub { base, offset } => EaExpr::Sub {
            base: Box::new(substitute_ea(base, bindings)),
            offset: substitute_imm(offset, bindings),
        },
    }
}

fn substitute_index(index: &EaIndex, bindings: &FxHashMap<String, Operand>) -> EaIndex {
    match index {
        EaIndex::Imm(ImmExpr::Name(name)) => match bindings.get(&key(name)) {
            Some(Operand::Reg(Register::R8(reg))) => EaIndex::Reg8(*reg),
            Some(Operand::Reg(Register::R16(reg))) => EaIndex::Reg16(*reg),
            Some(Operand::Ea(bound)) => EaIndex::Ea(Box::new(bound.clone())),
            _ => EaIndex::Imm(substitute_imm(&ImmExpr::Name(name.clone()), bindings)),
        },
        EaIndex::Imm(expr) => EaIndex::Imm(substitute_imm(expr, bindings)),
        EaIndex::Indexed { base, disp } => EaIndex::Indexed {
            base: *base,
            disp: substitute_imm(disp, bindings),
        },
        EaIndex::Ea(inner) => EaIndex::Ea(Box::new(substitute_ea(inner, bindings))),
        EaIndex::Reg8(_) | EaIndex::Reg16(_) | EaIndex::MemHl => index.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OpParam;

    fn params(matchers: &[Matcher]) -> Vec<OpParam> {
        matchers
            .iter()
            .enumerate()
            .map(|(index, matcher)| OpParam {
                name: format!("p{index}"),
                matcher: matcher.clone(),
            })
            .collect()
    }

    #[test]
    fn token_dominates_open_class() {
        let token = params(&[Matcher::Token("a".to_string()), Matcher::Imm8]);
        let open = params(&[Matcher::Reg8, Matcher::Imm8]);
        assert!(dominates(&token, &open));
        assert!(!dominates(&open, &token));
    }

    #[test]
    fn crossed_specificity_is_incomparable() {
        let left = params(&[Matcher::Imm8, Matcher::Ea]);
        let right = params(&[Matcher::Imm16, Matcher::Mem8]);
        assert!(!dominates(&left, &right));
        assert!(!dominates(&right, &left));
    }

    #[test]
    fn identical_signatures_do_not_dominate() {
        let left = params(&[Matcher::Reg16]);
        assert!(!dominates(&left, &left.clone()));
    }

    #[test]
    fn labels_and_params_are_substituted() {
        let mut bindings = FxHashMap::default();
        bindings.insert("dst".to_string(), Operand::Reg(Register::R16(Reg16::De)));
        bindings.insert(
            "loop".to_string(),
            Operand::Imm(ImmExpr::name("__zax_op_fill_loop_3")),
        );
        let item = Item::Instruction(Instruction {
            mnemonic: "jr".to_string(),
            operands: vec![Operand::Imm(ImmExpr::name("Loop"))],
        });
        let Item::Instruction(rewritten) = substitute_item(&item, &bindings) else {
            panic!("instruction expected");
        };
        assert_eq!(
            rewritten.operands,
            vec![Operand::Imm(ImmExpr::name("__zax_op_fill_loop_3"))]
        );

        let mem = substitute_operand(&Operand::Mem(EaExpr::name("dst")), &bindings);
        assert_eq!(mem, Operand::Mem(EaExpr::name("de")));
    }
}
