use zax_eval::{BinaryOp, EvalError, ImmExpr};
use zax_isaz80::{Condition, IndexReg, Reg8, Reg16, Register, takes_condition};

use super::ea::{self, Linear};
use super::{Fault, LowerContext};
use crate::ast::{EaExpr, Operand, key};
use crate::sema::Ty;
use crate::span::Span;

/// A statically known value: a number, or a symbol address plus addend
/// that is patched at finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Const(i64),
    Symbol {
        key: String,
        display: String,
        addend: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MemRef {
    Indirect(Reg16),
    Indexed { base: IndexReg, disp: i64 },
    Absolute { value: Value, ty: Option<Ty> },
    Stack { disp: i64, ty: Option<Ty> },
    Runtime(Linear),
}

impl MemRef {
    pub fn ty(&self) -> Option<&Ty> {
        match self {
            Self::Indirect(_) | Self::Indexed { .. } => None,
            Self::Absolute { ty, .. } | Self::Stack { ty, .. } => ty.as_ref(),
            Self::Runtime(linear) => linear.ty.as_ref(),
        }
    }

    pub fn is_word(&self) -> bool {
        self.ty().is_some_and(Ty::is_word)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LOperand {
    Reg8(Reg8),
    Reg16(Reg16),
    Cond(Condition),
    Value(Value),
    /// An address that needs code to compute (stack-relative or indexed).
    AddressOf(Linear),
    Mem(MemRef),
    PortC,
    PortImm(i64),
}

pub(crate) fn condition_of(operand: &Operand) -> Option<Condition> {
    match operand {
        Operand::Imm(ImmExpr::Name(name)) | Operand::Ea(EaExpr::Name(name)) => {
            Condition::from_name(name)
        }
        Operand::Reg(Register::R8(Reg8::C)) => Some(Condition::C),
        _ => None,
    }
}

pub(crate) fn lower_operands(
    ctx: &mut LowerContext,
    mnemonic: &str,
    operands: &[Operand],
    span: Span,
) -> Option<Vec<LOperand>> {
    let conditional = takes_condition(mnemonic, operands.len());
    let mut lowered = Vec::with_capacity(operands.len());
    let mut failed = false;
    for (index, operand) in operands.iter().enumerate() {
        let result = if conditional && index == 0 {
            condition_of(operand).map(LOperand::Cond).ok_or_else(|| {
                Fault::addressing(format!("'{mnemonic}' expects a condition code here"))
            })
        } else {
            lower_operand(ctx, operand)
        };
        match result {
            Ok(operand) => lowered.push(operand),
            Err(fault) => {
                ctx.report(fault, span);
                failed = true;
            }
        }
    }
    (!failed).then_some(lowered)
}

pub(crate) fn lower_operand(ctx: &LowerContext, operand: &Operand) -> Result<LOperand, Fault> {
    match operand {
        Operand::Reg(Register::R8(reg)) => Ok(LOperand::Reg8(*reg)),
        Operand::Reg(Register::R16(reg)) => Ok(LOperand::Reg16(*reg)),
        Operand::Imm(ImmExpr::Name(name)) => address_operand(ctx, &EaExpr::Name(name.clone())),
        Operand::Imm(expr) => eval_value(ctx, expr).map(LOperand::Value),
        Operand::Ea(ea) => address_operand(ctx, ea),
        Operand::Mem(ea) => memory_operand(ctx, ea).map(LOperand::Mem),
        Operand::PortC => Ok(LOperand::PortC),
        Operand::PortImm(expr) => match eval_value(ctx, expr)? {
            Value::Const(port) => Ok(LOperand::PortImm(port)),
            Value::Symbol { display, .. } => Err(Fault::addressing(format!(
                "port number must be a constant, found symbol '{display}'"
            ))),
        },
    }
}

fn address_operand(ctx: &LowerContext, ea: &EaExpr) -> Result<LOperand, Fault> {
    let linear = ea::resolve(ctx, ea)?;
    Ok(match linear.static_value() {
        Some(value) => LOperand::Value(value),
        None => LOperand::AddressOf(linear),
    })
}

pub(crate) fn memory_operand(ctx: &LowerContext, ea: &EaExpr) -> Result<MemRef, Fault> {
    match ea {
        EaExpr::Name(name) => match Register::from_name(name) {
            Some(Register::R16(Reg16::Ix)) => {
                return Ok(MemRef::Indexed {
                    base: IndexReg::Ix,
                    disp: 0,
                });
            }
            Some(Register::R16(Reg16::Iy)) => {
                return Ok(MemRef::Indexed {
                    base: IndexReg::Iy,
                    disp: 0,
                });
            }
            Some(Register::R16(reg @ (Reg16::Hl | Reg16::Bc | Reg16::De | Reg16::Sp))) => {
                return Ok(MemRef::Indirect(reg));
            }
            Some(Register::R16(reg)) => {
                return Err(Fault::addressing(format!(
                    "'{}' cannot be used for indirect addressing",
                    reg.name()
                )));
            }
            _ => {}
        },
        EaExpr::Add { base, offset } | EaExpr::Sub { base, offset } => {
            let index = match base.as_ref() {
                EaExpr::Name(name) => match key(name).as_str() {
                    "ix" => Some(IndexReg::Ix),
                    "iy" => Some(IndexReg::Iy),
                    _ => None,
                },
                _ => None,
            };
            if let Some(index) = index {
                let disp = constant(ctx, offset)?;
                let disp = if matches!(ea, EaExpr::Sub { .. }) {
                    ea::checked(disp.checked_neg())?
                } else {
                    disp
                };
                return Ok(MemRef::Indexed { base: index, disp });
            }
        }
        _ => {}
    }
    Ok(ea::resolve(ctx, ea)?.into_mem())
}

pub(crate) fn eval_value(ctx: &LowerContext, expr: &ImmExpr) -> Result<Value, Fault> {
    match zax_eval::evaluate(expr, ctx.model) {
        Ok(value) => return Ok(Value::Const(value)),
        Err(EvalError::UnknownIdentifier { .. }) => {}
        Err(error) => return Err(Fault::semantic(error.to_string())),
    }
    symbolic(ctx, expr)?.ok_or_else(|| match first_unknown(ctx, expr) {
        Some(name) => Fault::semantic(format!("unknown name '{name}'")),
        None => Fault::addressing(format!(
            "'{expr}' is neither a constant nor a symbol plus a constant"
        )),
    })
}

pub(crate) fn constant(ctx: &LowerContext, expr: &ImmExpr) -> Result<i64, Fault> {
    match eval_value(ctx, expr)? {
        Value::Const(value) => Ok(value),
        Value::Symbol { display, .. } => Err(Fault::addressing(format!(
            "expected a constant, found symbol '{display}'"
        ))),
    }
}

fn symbolic(ctx: &LowerContext, expr: &ImmExpr) -> Result<Option<Value>, Fault> {
    let known = |expr: &ImmExpr| zax_eval::evaluate(expr, ctx.model).ok();
    let shifted = |value: Option<Value>, by: i64| -> Result<Option<Value>, Fault> {
        match value {
            Some(Value::Symbol {
                key,
                display,
                addend,
            }) => Ok(Some(Value::Symbol {
                key,
                display,
                addend: ea::checked(addend.checked_add(by))?,
            })),
            other => Ok(other),
        }
    };
    Ok(match expr {
        ImmExpr::Name(name) => ctx.symbol_key(name).map(|key| Value::Symbol {
            key,
            display: name.clone(),
            addend: 0,
        }),
        ImmExpr::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        } => match (known(lhs), known(rhs)) {
            (None, Some(addend)) => shifted(symbolic(ctx, lhs)?, addend)?,
            (Some(addend), None) => shifted(symbolic(ctx, rhs)?, addend)?,
            _ => None,
        },
        ImmExpr::Binary {
            op: BinaryOp::Sub,
            lhs,
            rhs,
        } => match known(rhs) {
            Some(subtrahend) => {
                shifted(symbolic(ctx, lhs)?, ea::checked(subtrahend.checked_neg())?)?
            }
            None => None,
        },
        _ => None,
    })
}

fn first_unknown(ctx: &LowerContext, expr: &ImmExpr) -> Option<String> {
    let mut unknown = None;
    expr.for_each_name(&mut |name| {
        if unknown.is_none()
            && zax_eval::evaluate(&ImmExpr::name(name), ctx.model).is_err()
            && ctx.symbol_key(name).is_none()
        {
            unknown = Some(name.to_string());
        }
    });
    unknown
}

impl LowerContext<'_> {
    /// Symbol key of a name that denotes a static address: a label of the
    /// current function, module storage or a callable.
    pub fn symbol_key(&self, name: &str) -> Option<String> {
        let lookup = key(name);
        if let Some(label) = self
            .func
            .as_ref()
            .and_then(|scope| scope.labels.get(&lookup))
        {
            return Some(label.symbol.clone());
        }
        if self.model.storage.contains_key(&lookup) || self.model.callables.contains_key(&lookup)
        {
            return Some(lookup);
        }
        None
    }
}
