mod expr;

use thiserror::Error;

pub use expr::{BinaryOp, ImmExpr, UnaryOp};

/// Name and type queries the evaluator delegates to the semantic
/// environment.
pub trait Resolver {
    /// Value of a constant, enum member (`Enum.Member`) or already-placed
    /// symbol. Names are compared case-insensitively by the implementor.
    fn lookup(&self, name: &str) -> Option<i64>;

    fn size_of(&self, ty: &str) -> Option<i64>;

    /// Byte offset of the field chain `path` inside `ty`.
    fn offset_of(&self, ty: &str, path: &[String]) -> Result<i64, EvalError>;
}

/// Resolves nothing. Useful for literal-only expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl Resolver for NoSymbols {
    fn lookup(&self, _name: &str) -> Option<i64> {
        None
    }

    fn size_of(&self, ty: &str) -> Option<i64> {
        builtin_size(ty)
    }

    fn offset_of(&self, ty: &str, _path: &[String]) -> Result<i64, EvalError> {
        Err(EvalError::UnknownType {
            name: ty.to_string(),
        })
    }
}

/// Sizes of the scalar types every environment knows.
pub fn builtin_size(ty: &str) -> Option<i64> {
    match ty.to_ascii_lowercase().as_str() {
        "byte" => Some(1),
        "word" | "addr" => Some(2),
        _ => None,
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },
    #[error("unknown type '{name}'")]
    UnknownType { name: String },
    #[error("type '{ty}' has no field '{field}'")]
    UnknownField { ty: String, field: String },
    #[error("type '{ty}' is not a record or union")]
    NotAggregate { ty: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("shift amount {amount} out of range 0..=63")]
    BadShift { amount: i64 },
}

pub fn evaluate(expr: &ImmExpr, resolver: &dyn Resolver) -> Result<i64, EvalError> {
    match expr {
        ImmExpr::Literal(value) => Ok(*value),
        ImmExpr::Name(name) => resolver
            .lookup(name)
            .ok_or_else(|| EvalError::UnknownIdentifier { name: name.clone() }),
        ImmExpr::SizeOf(ty) => resolver
            .size_of(ty)
            .ok_or_else(|| EvalError::UnknownType { name: ty.clone() }),
        ImmExpr::OffsetOf { ty, path } => resolver.offset_of(ty, path),
        ImmExpr::Unary { op, expr } => {
            let value = evaluate(expr, resolver)?;
            match op {
                UnaryOp::Neg => value.checked_neg().ok_or(EvalError::Overflow),
                UnaryOp::Plus => Ok(value),
                UnaryOp::BitNot => Ok(!value),
            }
        }
        ImmExpr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, resolver)?;
            let rhs = evaluate(rhs, resolver)?;
            apply_binary(*op, lhs, rhs)
        }
    }
}

/// Evaluates without any symbol context; names fail as unknown.
pub fn evaluate_literal(expr: &ImmExpr) -> Result<i64, EvalError> {
    evaluate(expr, &NoSymbols)
}

pub fn apply_binary(op: BinaryOp, lhs: i64, rhs: i64) -> Result<i64, EvalError> {
    match op {
        BinaryOp::Add => lhs.checked_add(rhs).ok_or(EvalError::Overflow),
        BinaryOp::Sub => lhs.checked_sub(rhs).ok_or(EvalError::Overflow),
        BinaryOp::Mul => lhs.checked_mul(rhs).ok_or(EvalError::Overflow),
        BinaryOp::Div => {
            if rhs == 0 {
                return Err(EvalError::DivisionByZero);
            }
            lhs.checked_div(rhs).ok_or(EvalError::Overflow)
        }
        BinaryOp::Rem => {
            if rhs == 0 {
                return Err(EvalError::DivisionByZero);
            }
            lhs.checked_rem(rhs).ok_or(EvalError::Overflow)
        }
        BinaryOp::Shl | BinaryOp::Shr => {
            if !(0..=63).contains(&rhs) {
                return Err(EvalError::BadShift { amount: rhs });
            }
            if op == BinaryOp::Shl {
                lhs.checked_shl(rhs as u32).ok_or(EvalError::Overflow)
            } else {
                Ok(lhs >> rhs)
            }
        }
        BinaryOp::BitAnd => Ok(lhs & rhs),
        BinaryOp::BitOr => Ok(lhs | rhs),
        BinaryOp::BitXor => Ok(lhs ^ rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Table;

    impl Resolver for Table {
        fn lookup(&self, name: &str) -> Option<i64> {
            match name.to_ascii_lowercase().as_str() {
                "width" => Some(32),
                "mode.fast" => Some(2),
                _ => None,
            }
        }

        fn size_of(&self, ty: &str) -> Option<i64> {
            match ty {
                "Point" => Some(4),
                other => builtin_size(other),
            }
        }

        fn offset_of(&self, ty: &str, path: &[String]) -> Result<i64, EvalError> {
            match (ty, path.first().map(String::as_str)) {
                ("Point", Some("y")) => Ok(2),
                ("Point", Some(field)) => Err(EvalError::UnknownField {
                    ty: ty.to_string(),
                    field: field.to_string(),
                }),
                _ => Err(EvalError::UnknownType {
                    name: ty.to_string(),
                }),
            }
        }
    }

    #[test]
    fn evaluates_basic_arithmetic() {
        let expr = ImmExpr::binary(
            BinaryOp::Add,
            ImmExpr::Literal(1),
            ImmExpr::binary(BinaryOp::Mul, ImmExpr::Literal(2), ImmExpr::Literal(3)),
        );
        assert_eq!(evaluate_literal(&expr).expect("eval"), 7);
    }

    #[test]
    fn resolves_names_and_type_queries() {
        let expr = ImmExpr::binary(
            BinaryOp::Add,
            ImmExpr::binary(BinaryOp::Mul, ImmExpr::name("WIDTH"), ImmExpr::SizeOf("Point".into())),
            ImmExpr::OffsetOf {
                ty: "Point".into(),
                path: vec!["y".into()],
            },
        );
        assert_eq!(evaluate(&expr, &Table).expect("eval"), 130);
        assert_eq!(evaluate(&ImmExpr::name("Mode.Fast"), &Table).expect("eval"), 2);
    }

    #[test]
    fn reports_unknown_names() {
        let err = evaluate(&ImmExpr::name("missing"), &Table).expect_err("unknown");
        assert_eq!(
            err,
            EvalError::UnknownIdentifier {
                name: "missing".to_string()
            }
        );
        let err = evaluate(
            &ImmExpr::OffsetOf {
                ty: "Point".into(),
                path: vec!["z".into()],
            },
            &Table,
        )
        .expect_err("no field");
        assert_eq!(err.to_string(), "type 'Point' has no field 'z'");
    }

    #[test]
    fn rejects_division_by_zero_and_overflow() {
        let div = ImmExpr::binary(BinaryOp::Div, ImmExpr::Literal(1), ImmExpr::Literal(0));
        assert_eq!(evaluate_literal(&div), Err(EvalError::DivisionByZero));
        let neg = ImmExpr::unary(UnaryOp::Neg, ImmExpr::Literal(i64::MIN));
        assert_eq!(evaluate_literal(&neg), Err(EvalError::Overflow));
        let shift = ImmExpr::binary(BinaryOp::Shl, ImmExpr::Literal(1), ImmExpr::Literal(64));
        assert_eq!(
            evaluate_literal(&shift),
            Err(EvalError::BadShift { amount: 64 })
        );
    }

    #[test]
    fn maps_names_for_substitution() {
        let expr = ImmExpr::binary(BinaryOp::Add, ImmExpr::name("n"), ImmExpr::Literal(1));
        let mapped = expr.map_names(&mut |name| (name == "n").then(|| ImmExpr::Literal(4)));
        assert_eq!(evaluate_literal(&mapped).expect("eval"), 5);

        let mut seen = Vec::new();
        expr.for_each_name(&mut |name| seen.push(name.to_string()));
        assert_eq!(seen, vec!["n".to_string()]);
    }
}
