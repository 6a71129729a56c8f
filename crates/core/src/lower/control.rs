use rustc_hash::FxHashMap;
use zax_isaz80::{Condition, Operand as IsaOperand, Reg8, Reg16};

use super::flow::{self, FlowState};
use super::materialize::{address_into_hl, load_hl_value, load_value_hl};
use super::operands::{self, LOperand, MemRef, Value, condition_of};
use super::{LowerContext, lower_instruction, lower_label, r8, r16};
use crate::ast::{Item, Operand, item_span};
use crate::diag::{Diagnostic, DiagnosticId};
use crate::span::{Span, Spanned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Else,
    End,
    Until,
    Case,
    SelectElse,
    Eof,
}

impl Stop {
    fn keyword(self) -> &'static str {
        match self {
            Self::Else => "else",
            Self::End => "end",
            Self::Until => "until",
            Self::Case => "case",
            Self::SelectElse => "else",
            Self::Eof => "end of body",
        }
    }
}

/// Lowers a function or op body. Keywords that close nothing are reported
/// and skipped.
pub(crate) fn lower_body(ctx: &mut LowerContext, items: &[Spanned<Item>]) {
    let mut index = 0;
    while index < items.len() {
        let (next, stop) = lower_region(ctx, items, index);
        if stop == Stop::Eof {
            break;
        }
        ctx.error(
            DiagnosticId::ControlFlow,
            items[next].span,
            format!("'{}' without a matching opening construct", stop.keyword()),
        );
        index = next + 1;
    }
}

fn lower_region(ctx: &mut LowerContext, items: &[Spanned<Item>], start: usize) -> (usize, Stop) {
    let mut index = start;
    while let Some(item) = items.get(index) {
        let span = item.span;
        index = match &item.node {
            Item::Label(name) => {
                lower_label(ctx, name, span);
                index + 1
            }
            Item::Instruction(instruction) => {
                lower_instruction(ctx, instruction, span);
                index + 1
            }
            Item::If(condition) => lower_if(ctx, items, index, condition),
            Item::While(condition) => lower_while(ctx, items, index, condition),
            Item::Repeat => lower_repeat(ctx, items, index),
            Item::Select(selector) => lower_select(ctx, items, index, selector),
            Item::Else => return (index, Stop::Else),
            Item::End => return (index, Stop::End),
            Item::Until(_) => return (index, Stop::Until),
            Item::Case(_) => return (index, Stop::Case),
            Item::SelectElse => return (index, Stop::SelectElse),
        };
    }
    (items.len(), Stop::Eof)
}

fn expect_condition(
    ctx: &mut LowerContext,
    operand: &Operand,
    construct: &str,
    span: Span,
) -> Option<Condition> {
    let condition = condition_of(operand);
    if condition.is_none() {
        ctx.error(
            DiagnosticId::ControlFlow,
            span,
            format!("'{construct}' expects a condition code (z, nz, c, nc, po, pe, p, m)"),
        );
    }
    condition
}

fn unterminated(ctx: &mut LowerContext, construct: &str, expected: &str, span: Span, stop: Stop) {
    ctx.diagnostics.push(
        Diagnostic::error(
            DiagnosticId::ControlFlow,
            span,
            format!("'{construct}' is not closed by '{expected}'"),
        )
        .with_note(format!("found {} first", stop.keyword())),
    );
}

fn lower_if(
    ctx: &mut LowerContext,
    items: &[Spanned<Item>],
    at: usize,
    operand: &Operand,
) -> usize {
    let span = items[at].span;
    let condition = expect_condition(ctx, operand, "if", span);
    let else_label = ctx.hidden_label("if_else");
    if let Some(condition) = condition {
        ctx.emit_jump(Some(condition.inverse()), &else_label, span);
    }
    let entry = ctx.flow;

    let (next, stop) = lower_region(ctx, items, at + 1);
    match stop {
        Stop::Else => {
            let else_span = items[next].span;
            let end_label = ctx.hidden_label("if_end");
            let then_exit = ctx.flow;
            if then_exit.reachable {
                ctx.emit_jump(None, &end_label, else_span);
            }
            ctx.define_hidden(&else_label, else_span);
            ctx.flow = entry;

            let (close, stop) = lower_region(ctx, items, next + 1);
            let end_span = item_span(items, close, else_span);
            ctx.define_hidden(&end_label, end_span);
            ctx.merge(then_exit, end_span, "end of if");
            if stop == Stop::End {
                close + 1
            } else {
                unterminated(ctx, "if", "end", span, stop);
                close
            }
        }
        Stop::End => {
            let end_span = items[next].span;
            let then_exit = ctx.flow;
            ctx.define_hidden(&else_label, end_span);
            ctx.flow = entry;
            ctx.merge(then_exit, end_span, "end of if");
            next + 1
        }
        _ => {
            unterminated(ctx, "if", "end", span, stop);
            let then_exit = ctx.flow;
            ctx.define_hidden(&else_label, item_span(items, next, span));
            ctx.flow = entry;
            ctx.merge(then_exit, span, "end of if");
            next
        }
    }
}

fn lower_while(
    ctx: &mut LowerContext,
    items: &[Spanned<Item>],
    at: usize,
    operand: &Operand,
) -> usize {
    let span = items[at].span;
    let condition = expect_condition(ctx, operand, "while", span);
    let test_label = ctx.hidden_label("while_test");
    let end_label = ctx.hidden_label("while_end");

    ctx.define_hidden(&test_label, span);
    let entry = ctx.flow;
    if let Some(condition) = condition {
        ctx.emit_jump(Some(condition.inverse()), &end_label, span);
    }

    let (next, stop) = lower_region(ctx, items, at + 1);
    let end_span = item_span(items, next, span);
    let body_exit = ctx.flow;
    if body_exit.reachable {
        let (_, issue) = flow::join(entry, body_exit, ctx.uses_slots());
        ctx.report_join(issue, end_span, "while loop back edge");
        ctx.emit_jump(None, &test_label, end_span);
    }
    ctx.define_hidden(&end_label, end_span);

    let mut exit = entry;
    if body_exit.tainted {
        exit.invalidate(true);
    }
    ctx.flow = exit;

    if stop == Stop::End {
        next + 1
    } else {
        unterminated(ctx, "while", "end", span, stop);
        next
    }
}

fn lower_repeat(ctx: &mut LowerContext, items: &[Spanned<Item>], at: usize) -> usize {
    let span = items[at].span;
    let body_label = ctx.hidden_label("repeat_body");
    ctx.define_hidden(&body_label, span);
    let entry = ctx.flow;

    let (next, stop) = lower_region(ctx, items, at + 1);
    let Some(Item::Until(operand)) = items.get(next).map(|item| &item.node) else {
        unterminated(ctx, "repeat", "until", span, stop);
        return next;
    };
    let until_span = items[next].span;
    let body_exit = ctx.flow;
    if body_exit.reachable {
        let (_, issue) = flow::join(entry, body_exit, ctx.uses_slots());
        ctx.report_join(issue, until_span, "repeat loop back edge");
    }
    if let Some(condition) = expect_condition(ctx, operand, "until", until_span) {
        if body_exit.reachable {
            ctx.emit_jump(Some(condition.inverse()), &body_label, until_span);
        }
    }
    next + 1
}

struct Arm {
    label: String,
    exit: FlowState,
}

enum Selector {
    Constant(i64),
    Byte,
    Word,
}

fn lower_select(
    ctx: &mut LowerContext,
    items: &[Spanned<Item>],
    at: usize,
    operand: &Operand,
) -> usize {
    let span = items[at].span;
    let dispatch_label = ctx.hidden_label("select_dispatch");
    let end_label = ctx.hidden_label("select_end");
    let entry = ctx.flow;
    ctx.emit_jump(None, &dispatch_label, span);

    let selector = classify_selector(ctx, operand, span);
    let mut arms: Vec<Arm> = Vec::new();
    let mut else_arm: Option<Arm> = None;
    let mut values: Vec<(i64, Span, usize)> = Vec::new();
    let mut first_seen: FxHashMap<i64, Span> = FxHashMap::default();

    let (mut next, mut stop) = lower_region(ctx, items, at + 1);
    if next != at + 1 {
        ctx.error(
            DiagnosticId::ControlFlow,
            item_span(items, at + 1, span),
            "statements between 'select' and the first 'case' are unreachable",
        );
    }
    let mut open: Option<Arm> = None;
    let close = loop {
        if let Some(mut arm) = open.take() {
            arm.exit = ctx.flow;
            if ctx.flow.reachable {
                ctx.emit_jump(None, &end_label, item_span(items, next, span));
            }
            if else_arm.as_ref().is_some_and(|existing| existing.label == arm.label) {
                else_arm = Some(arm);
            } else {
                arms.push(arm);
            }
        }
        match stop {
            Stop::Case => {
                let case_span = items[next].span;
                let label = ctx.hidden_label("case");
                if let Item::Case(exprs) = &items[next].node {
                    for expr in exprs {
                        match zax_eval::evaluate(expr, ctx.model) {
                            Ok(value) => {
                                if let Some(previous) = first_seen.get(&value) {
                                    ctx.diagnostics.push(
                                        Diagnostic::error(
                                            DiagnosticId::ControlFlow,
                                            case_span,
                                            format!("duplicate case value {value}"),
                                        )
                                        .with_label(*previous, "first used here"),
                                    );
                                    continue;
                                }
                                first_seen.insert(value, case_span);
                                values.push((value, case_span, arms.len()));
                            }
                            Err(error) => ctx.error(
                                DiagnosticId::ControlFlow,
                                case_span,
                                format!("case value must be a constant: {error}"),
                            ),
                        }
                    }
                }
                ctx.define_hidden(&label, case_span);
                ctx.flow = entry;
                open = Some(Arm { label, exit: entry });
            }
            Stop::SelectElse => {
                let else_span = items[next].span;
                if else_arm.is_some() {
                    ctx.error(
                        DiagnosticId::ControlFlow,
                        else_span,
                        "'select' has more than one 'else'",
                    );
                }
                let label = ctx.hidden_label("select_else");
                ctx.define_hidden(&label, else_span);
                ctx.flow = entry;
                else_arm = Some(Arm {
                    label: label.clone(),
                    exit: entry,
                });
                open = Some(Arm { label, exit: entry });
            }
            Stop::End => break next + 1,
            _ => {
                unterminated(ctx, "select", "end", span, stop);
                break next;
            }
        }
        (next, stop) = lower_region(ctx, items, next + 1);
    };
    let end_span = item_span(items, close.saturating_sub(1), span);

    ctx.define_hidden(&dispatch_label, span);
    ctx.flow = entry;
    let mut exits: Vec<FlowState> = Vec::new();
    match selector {
        Some((Selector::Constant(value), _)) => {
            let target = values
                .iter()
                .find(|(case, _, _)| *case == value)
                .map(|(_, _, arm)| &arms[*arm]);
            match (target, &else_arm) {
                (Some(arm), _) | (None, Some(arm)) => {
                    ctx.emit_jump(None, &arm.label, span);
                    exits.push(arm.exit);
                }
                (None, None) => {
                    exits.push(ctx.flow);
                    ctx.emit_jump(None, &end_label, span);
                }
            }
        }
        Some((selector, operand)) => {
            load_selector(ctx, &operand, span);
            for (value, case_span, arm) in &values {
                compare_case(ctx, &selector, *value, &arms[*arm].label, *case_span);
            }
            exits.extend(arms.iter().map(|arm| arm.exit));
            match &else_arm {
                Some(arm) => {
                    exits.push(arm.exit);
                    ctx.emit_jump(None, &arm.label, span);
                }
                None => {
                    exits.push(ctx.flow);
                    ctx.emit_jump(None, &end_label, span);
                }
            }
        }
        None => {
            exits.extend(arms.iter().map(|arm| arm.exit));
            exits.extend(else_arm.as_ref().map(|arm| arm.exit));
            exits.push(ctx.flow);
            ctx.emit_jump(None, &end_label, span);
        }
    }

    ctx.define_hidden(&end_label, end_span);
    ctx.flow = FlowState::unreachable();
    for exit in exits {
        ctx.merge(exit, end_span, "end of select");
    }
    close
}

fn classify_selector(
    ctx: &mut LowerContext,
    operand: &Operand,
    span: Span,
) -> Option<(Selector, LOperand)> {
    let lowered = match operands::lower_operand(ctx, operand) {
        Ok(lowered) => lowered,
        Err(fault) => {
            ctx.report(fault, span);
            return None;
        }
    };
    let selector = match &lowered {
        LOperand::Value(Value::Const(value)) => Selector::Constant(*value),
        LOperand::Reg8(reg) if reg.is_general() => Selector::Byte,
        LOperand::Reg16(Reg16::Hl | Reg16::Bc | Reg16::De) => Selector::Word,
        LOperand::Value(Value::Symbol { .. }) | LOperand::AddressOf(_) => Selector::Word,
        LOperand::Mem(mem) if mem.is_word() => Selector::Word,
        LOperand::Mem(_) => Selector::Byte,
        _ => {
            ctx.error(
                DiagnosticId::ControlFlow,
                span,
                "'select' expects a register, memory operand or constant",
            );
            return None;
        }
    };
    Some((selector, lowered))
}

/// Loads the selector into HL, zero-extending byte selectors.
fn load_selector(ctx: &mut LowerContext, operand: &LOperand, span: Span) {
    match operand {
        LOperand::Reg8(Reg8::L) => {
            ctx.emit("ld", &[r8(Reg8::H), IsaOperand::Imm(0)], span);
        }
        LOperand::Reg8(reg) => {
            ctx.emit("ld", &[r8(Reg8::L), r8(*reg)], span);
            ctx.emit("ld", &[r8(Reg8::H), IsaOperand::Imm(0)], span);
        }
        LOperand::Reg16(Reg16::Hl) => {}
        LOperand::Reg16(reg @ (Reg16::Bc | Reg16::De)) => {
            if let Some((high, low)) = reg.halves() {
                ctx.emit("ld", &[r8(Reg8::L), r8(low)], span);
                ctx.emit("ld", &[r8(Reg8::H), r8(high)], span);
            }
        }
        LOperand::Value(value) => {
            load_hl_value(ctx, value, span);
        }
        LOperand::AddressOf(linear) => {
            address_into_hl(ctx, linear, span);
        }
        LOperand::Mem(mem) => {
            load_value_hl(ctx, mem, mem.is_word(), span);
        }
        _ => {}
    }
}

fn compare_case(ctx: &mut LowerContext, selector: &Selector, value: i64, label: &str, span: Span) {
    match selector {
        Selector::Byte => {
            if !(0..=0xFF).contains(&value) {
                ctx.diagnostics.push(Diagnostic::warning(
                    DiagnosticId::ControlFlow,
                    span,
                    format!("case value {value} can never match an 8-bit selector"),
                ));
                return;
            }
        }
        Selector::Word => {
            if !(-0x8000..=0xFFFF).contains(&value) {
                ctx.error(
                    DiagnosticId::ControlFlow,
                    span,
                    format!("case value {value} does not fit in 16 bits"),
                );
                return;
            }
        }
        Selector::Constant(_) => return,
    }
    ctx.emit("or", &[r8(Reg8::A)], span);
    ctx.emit("ld", &[r16(Reg16::De), IsaOperand::Imm(value & 0xFFFF)], span);
    ctx.emit("sbc", &[r16(Reg16::Hl), r16(Reg16::De)], span);
    ctx.emit("add", &[r16(Reg16::Hl), r16(Reg16::De)], span);
    ctx.emit_jump(Some(Condition::Z), label, span);
}
