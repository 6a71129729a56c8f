use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Plus => "+",
            Self::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }
}

/// A compile-time immediate expression as produced by the parser.
///
/// Names are unresolved: they may refer to constants, enum members
/// (`Mode.Fast`), labels, storage symbols, or, inside an index expression,
/// registers acting as runtime atoms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImmExpr {
    Literal(i64),
    Name(String),
    SizeOf(String),
    OffsetOf {
        ty: String,
        path: Vec<String>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<ImmExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<ImmExpr>,
        rhs: Box<ImmExpr>,
    },
}

impl ImmExpr {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn unary(op: UnaryOp, expr: ImmExpr) -> Self {
        Self::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, lhs: ImmExpr, rhs: ImmExpr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// The bare name when the whole expression is a single identifier.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            _ => None,
        }
    }

    /// Visits every identifier in evaluation order.
    pub fn for_each_name(&self, visit: &mut impl FnMut(&str)) {
        match self {
            Self::Literal(_) | Self::SizeOf(_) | Self::OffsetOf { .. } => {}
            Self::Name(name) => visit(name),
            Self::Unary { expr, .. } => expr.for_each_name(visit),
            Self::Binary { lhs, rhs, .. } => {
                lhs.for_each_name(visit);
                rhs.for_each_name(visit);
            }
        }
    }

    /// Rebuilds the expression with every identifier passed through `map`.
    /// Returning `None` keeps the identifier unchanged.
    pub fn map_names(&self, map: &mut impl FnMut(&str) -> Option<ImmExpr>) -> ImmExpr {
        match self {
            Self::Name(name) => map(name).unwrap_or_else(|| self.clone()),
            Self::Literal(_) | Self::SizeOf(_) | Self::OffsetOf { .. } => self.clone(),
            Self::Unary { op, expr } => Self::unary(*op, expr.map_names(map)),
            Self::Binary { op, lhs, rhs } => {
                Self::binary(*op, lhs.map_names(map), rhs.map_names(map))
            }
        }
    }
}

impl From<i64> for ImmExpr {
    fn from(value: i64) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for ImmExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) if *value > 9 => write!(f, "${value:X}"),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Name(name) => f.write_str(name),
            Self::SizeOf(ty) => write!(f, "sizeof({ty})"),
            Self::OffsetOf { ty, path } => write!(f, "offsetof({ty}, {})", path.join(".")),
            Self::Unary { op, expr } => write!(f, "{}{expr}", op.symbol()),
            Self::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}
