use zax_eval::{BinaryOp, ImmExpr, UnaryOp};
use zax_isaz80::{IndexReg, Reg8, Reg16, Register};

use super::operands::{self, MemRef, Value};
use super::{Fault, LowerContext};
use crate::ast::{EaExpr, EaIndex, key};
use crate::sema::Ty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Base {
    /// A placed symbol; the linear offset is its addend.
    Symbol { key: String, display: String },
    /// A plain number; the linear offset is the address.
    Literal,
    /// The frame pointer; the linear offset is the IX displacement.
    Stack,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StaticMem {
    Absolute(Value),
    Stack(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Atom {
    Reg8(Reg8),
    Reg16(Reg16),
    MemHl,
    Indexed { base: IndexReg, disp: i64 },
    Mem { at: StaticMem, word: bool },
}

impl Atom {
    pub fn reads_hl(&self) -> bool {
        matches!(
            self,
            Self::Reg8(Reg8::H | Reg8::L) | Self::Reg16(Reg16::Hl) | Self::MemHl
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Term {
    pub atom: Atom,
    pub coef: i64,
}

/// `base + offset + coef * atom`, with the type of the addressed object
/// when it is still known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Linear {
    pub base: Base,
    pub offset: i64,
    pub ty: Option<Ty>,
    pub term: Option<Term>,
}

impl Linear {
    fn anchored(base: Base, offset: i64, ty: Option<Ty>) -> Self {
        Self {
            base,
            offset,
            ty,
            term: None,
        }
    }

    /// The address as an immediate, when no code is needed to form it.
    pub fn static_value(&self) -> Option<Value> {
        if self.term.is_some() {
            return None;
        }
        match &self.base {
            Base::Symbol { key, display } => Some(Value::Symbol {
                key: key.clone(),
                display: display.clone(),
                addend: self.offset,
            }),
            Base::Literal => Some(Value::Const(self.offset)),
            Base::Stack => None,
        }
    }

    pub fn into_mem(self) -> MemRef {
        if self.term.is_some() {
            return MemRef::Runtime(self);
        }
        match self.static_value() {
            Some(value) => MemRef::Absolute { value, ty: self.ty },
            None => MemRef::Stack {
                disp: self.offset,
                ty: self.ty,
            },
        }
    }

    pub fn reads_hl(&self) -> bool {
        self.term.as_ref().is_some_and(|term| term.atom.reads_hl())
    }
}

pub(crate) fn resolve(ctx: &LowerContext, ea: &EaExpr) -> Result<Linear, Fault> {
    let mut expanding = Vec::new();
    let linear = resolve_inner(ctx, ea, &mut expanding)?;
    if let Some(term) = &linear.term {
        if !term.coef.unsigned_abs().is_power_of_two() {
            return Err(Fault::addressing(format!(
                "non-constant indexing requires power-of-two element size, found scale {}",
                term.coef
            )));
        }
    }
    Ok(linear)
}

fn resolve_inner(
    ctx: &LowerContext,
    ea: &EaExpr,
    expanding: &mut Vec<String>,
) -> Result<Linear, Fault> {
    match ea {
        EaExpr::Name(name) => resolve_name(ctx, name, expanding),
        EaExpr::Imm(expr) => Ok(match operands::eval_value(ctx, expr)? {
            Value::Const(value) => Linear::anchored(Base::Literal, value, None),
            Value::Symbol {
                key,
                display,
                addend,
            } => Linear::anchored(Base::Symbol { key, display }, addend, None),
        }),
        EaExpr::Field { base, field } => {
            if let EaExpr::Name(owner) = base.as_ref() {
                let member = key(&format!("{owner}.{field}"));
                if let Some(meta) = ctx.model.consts.get(&member) {
                    return Ok(Linear::anchored(Base::Literal, meta.value, None));
                }
            }
            let mut linear = resolve_inner(ctx, base, expanding)?;
            let Some(ty) = &linear.ty else {
                return Err(Fault::addressing(format!(
                    "field access '.{field}' needs a typed base"
                )));
            };
            let (offset, field_ty) = ctx.model.field(ty, field).map_err(Fault::addressing)?;
            linear.offset = checked(linear.offset.checked_add(i64::from(offset)))?;
            linear.ty = Some(field_ty);
            Ok(linear)
        }
        EaExpr::Index { base, index } => {
            let linear = resolve_inner(ctx, base, expanding)?;
            apply_index(ctx, linear, index, expanding)
        }
        EaExpr::Add { base, offset } | EaExpr::Sub { base, offset } => {
            let mut linear = resolve_inner(ctx, base, expanding)?;
            let delta = operands::constant(ctx, offset)?;
            linear.offset = checked(if matches!(ea, EaExpr::Sub { .. }) {
                linear.offset.checked_sub(delta)
            } else {
                linear.offset.checked_add(delta)
            })?;
            linear.ty = None;
            Ok(linear)
        }
    }
}

fn resolve_name(
    ctx: &LowerContext,
    name: &str,
    expanding: &mut Vec<String>,
) -> Result<Linear, Fault> {
    let lookup = key(name);
    let model = ctx.model;

    if let Some(scope) = &ctx.func {
        if let Some(target) = scope.aliases.get(&lookup) {
            return expand_alias(ctx, name, target, expanding);
        }
        if let Some(slot) = scope.slots.get(&lookup) {
            return Ok(Linear::anchored(Base::Stack, slot.disp, Some(slot.ty.clone())));
        }
        if let Some(label) = scope.labels.get(&lookup) {
            let base = Base::Symbol {
                key: label.symbol.clone(),
                display: label.display.clone(),
            };
            return Ok(Linear::anchored(base, 0, None));
        }
    }
    if let Some(meta) = model.consts.get(&lookup) {
        return Ok(Linear::anchored(Base::Literal, meta.value, None));
    }
    if let Some(alias) = model.aliases.get(&lookup) {
        return expand_alias(ctx, name, &alias.ea, expanding);
    }
    if let Some(meta) = model.storage.get(&lookup) {
        let base = Base::Symbol {
            key: lookup,
            display: meta.name.clone(),
        };
        return Ok(Linear::anchored(base, 0, Some(meta.ty.clone())));
    }
    if let Some(callable) = model.callables.get(&lookup) {
        let base = Base::Symbol {
            key: lookup,
            display: callable.name.clone(),
        };
        return Ok(Linear::anchored(base, 0, None));
    }
    if Register::from_name(name).is_some() {
        return Err(Fault::addressing(format!(
            "register '{name}' cannot be used as an address here"
        )));
    }
    Err(Fault::semantic(format!("unknown name '{name}'")))
}

fn expand_alias(
    ctx: &LowerContext,
    name: &str,
    target: &EaExpr,
    expanding: &mut Vec<String>,
) -> Result<Linear, Fault> {
    let lookup = key(name);
    if expanding.contains(&lookup) {
        let mut chain = expanding.clone();
        chain.push(lookup);
        return Err(Fault::semantic(format!(
            "alias cycle: {}",
            chain.join(" -> ")
        )));
    }
    expanding.push(lookup);
    let resolved = resolve_inner(ctx, target, expanding);
    expanding.pop();
    resolved
}

fn apply_index(
    ctx: &LowerContext,
    mut linear: Linear,
    index: &EaIndex,
    expanding: &mut Vec<String>,
) -> Result<Linear, Fault> {
    let Some(Ty::Array { element, len }) = linear.ty.clone() else {
        return Err(Fault::addressing(match &linear.ty {
            Some(ty) => format!("indexing requires an array, found '{ty}'"),
            None => "indexing requires an array-typed base".to_string(),
        }));
    };
    let size = ctx
        .model
        .size_of(&element)
        .ok_or_else(|| Fault::addressing(format!("element type '{element}' has no static size")))?;
    let size = i64::from(size);

    let (constant, term) = match index {
        EaIndex::Imm(expr) => linearize(ctx, expr)?,
        EaIndex::Reg8(reg) => (0, Some(unit(Atom::Reg8(*reg)))),
        EaIndex::Reg16(reg) => (0, Some(unit(Atom::Reg16(*reg)))),
        EaIndex::MemHl => (0, Some(unit(Atom::MemHl))),
        EaIndex::Indexed { base, disp } => {
            let disp = operands::constant(ctx, disp)?;
            (0, Some(unit(Atom::Indexed { base: *base, disp })))
        }
        EaIndex::Ea(inner) => {
            let cell = resolve_inner(ctx, inner, expanding)?;
            let word = cell.ty.as_ref().is_some_and(Ty::is_word);
            let at = match cell.into_mem() {
                MemRef::Absolute { value, .. } => StaticMem::Absolute(value),
                MemRef::Stack { disp, .. } => StaticMem::Stack(disp),
                _ => {
                    return Err(Fault::addressing(
                        "an index read from memory must have a static address",
                    ));
                }
            };
            (0, Some(unit(Atom::Mem { at, word })))
        }
    };

    if term.is_none() {
        if let Some(len) = len {
            if constant < 0 || constant >= i64::from(len) {
                return Err(Fault::addressing(format!(
                    "index {constant} out of bounds for '{}'",
                    Ty::Array {
                        element: element.clone(),
                        len: Some(len),
                    }
                )));
            }
        }
    }

    let scaled = checked(constant.checked_mul(size))?;
    linear.offset = checked(linear.offset.checked_add(scaled))?;
    let term = scale(term, size)?;
    linear.term = merge_terms(linear.term.take(), term)?;
    linear.ty = Some(*element);
    Ok(linear)
}

fn unit(atom: Atom) -> Term {
    Term { atom, coef: 1 }
}

fn merge_terms(left: Option<Term>, right: Option<Term>) -> Result<Option<Term>, Fault> {
    match (left, right) {
        (None, term) | (term, None) => Ok(term),
        (Some(left), Some(right)) if left.atom == right.atom => {
            let coef = checked(left.coef.checked_add(right.coef))?;
            Ok((coef != 0).then_some(Term {
                atom: left.atom,
                coef,
            }))
        }
        _ => Err(Fault::addressing(
            "runtime-atom budget exceeded: an address may depend on one runtime register or cell",
        )),
    }
}

fn scale(term: Option<Term>, by: i64) -> Result<Option<Term>, Fault> {
    let Some(term) = term else {
        return Ok(None);
    };
    let coef = checked(term.coef.checked_mul(by))?;
    Ok((coef != 0).then_some(Term {
        atom: term.atom,
        coef,
    }))
}

pub(crate) fn checked(value: Option<i64>) -> Result<i64, Fault> {
    value.ok_or_else(|| Fault::addressing("address arithmetic overflows"))
}

/// Splits an index expression into `constant + coef * register`.
fn linearize(ctx: &LowerContext, expr: &ImmExpr) -> Result<(i64, Option<Term>), Fault> {
    if let Ok(value) = zax_eval::evaluate(expr, ctx.model) {
        return Ok((value, None));
    }
    match expr {
        ImmExpr::Name(name) => match Register::from_name(name) {
            Some(Register::R8(reg)) => Ok((0, Some(unit(Atom::Reg8(reg))))),
            Some(Register::R16(reg)) => Ok((0, Some(unit(Atom::Reg16(reg))))),
            None => operands::constant(ctx, expr).map(|value| (value, None)),
        },
        ImmExpr::Unary {
            op: UnaryOp::Plus,
            expr,
        } => linearize(ctx, expr),
        ImmExpr::Unary {
            op: UnaryOp::Neg,
            expr,
        } => {
            let (constant, term) = linearize(ctx, expr)?;
            Ok((checked(constant.checked_neg())?, scale(term, -1)?))
        }
        ImmExpr::Binary { op, lhs, rhs } => {
            let (left, left_term) = linearize(ctx, lhs)?;
            let (right, right_term) = linearize(ctx, rhs)?;
            match op {
                BinaryOp::Add => Ok((
                    checked(left.checked_add(right))?,
                    merge_terms(left_term, right_term)?,
                )),
                BinaryOp::Sub => Ok((
                    checked(left.checked_sub(right))?,
                    merge_terms(left_term, scale(right_term, -1)?)?,
                )),
                BinaryOp::Mul => {
                    let product = checked(left.checked_mul(right))?;
                    match (left_term, right_term) {
                        (None, term) => Ok((product, scale(term, left)?)),
                        (term, None) => Ok((product, scale(term, right)?)),
                        _ => Err(nonlinear(expr)),
                    }
                }
                BinaryOp::Shl if right_term.is_none() && (0..16).contains(&right) => {
                    let factor = 1_i64 << right;
                    Ok((checked(left.checked_mul(factor))?, scale(left_term, factor)?))
                }
                _ => Err(nonlinear(expr)),
            }
        }
        _ => Err(nonlinear(expr)),
    }
}

fn nonlinear(expr: &ImmExpr) -> Fault {
    Fault::addressing(format!(
        "index '{expr}' is not a constant plus a scaled register"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(atom: Reg8, coef: i64) -> Option<Term> {
        Some(Term {
            atom: Atom::Reg8(atom),
            coef,
        })
    }

    #[test]
    fn same_atom_terms_combine() {
        let merged = merge_terms(reg(Reg8::B, 2), reg(Reg8::B, 6)).expect("same atom merges");
        assert_eq!(merged, reg(Reg8::B, 8));
    }

    #[test]
    fn cancelling_terms_vanish() {
        let merged = merge_terms(reg(Reg8::C, 4), reg(Reg8::C, -4)).expect("same atom merges");
        assert_eq!(merged, None);
    }

    #[test]
    fn two_runtime_atoms_are_rejected() {
        let fault = merge_terms(reg(Reg8::B, 1), reg(Reg8::C, 1)).expect_err("two atoms");
        assert!(fault.message.contains("runtime-atom budget exceeded"));
    }

    #[test]
    fn stack_based_address_has_no_static_value() {
        let linear = Linear::anchored(Base::Stack, -2, Some(Ty::Word));
        assert_eq!(linear.static_value(), None);
        assert_eq!(
            linear.into_mem(),
            MemRef::Stack {
                disp: -2,
                ty: Some(Ty::Word)
            }
        );
    }
}
